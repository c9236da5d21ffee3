pub mod bin_common;
pub mod daylight;
pub mod frame_source;
pub mod grabber;
pub mod schedule;
pub mod selection;

/// For stand-alone functionality that fit comfortably within one file.
pub mod utils;
