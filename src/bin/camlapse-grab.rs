use std::ffi::OsString;
use std::num::NonZeroU32;
use std::path::PathBuf;

use camlapse::bin_common::init::{init_eyre, init_logger};
use camlapse::daylight;
use camlapse::frame_source::FrameSource;
use camlapse::grabber::{self, SessionConfig};
use camlapse::schedule::{CaptureGate, DaylightGate, Schedule, WallClock};
use camlapse::utils::fsutils::read_optional_file;
use clap::Parser;
use color_eyre::eyre::{self, Context};

#[derive(Parser, Debug)]
#[command()]
/// Grab timelapse frames from an RTSP source
struct Cli {
    /// The stream to capture from, e.g. rtsp://camera/live
    #[arg(long)]
    url: String,

    /// strftime template for the directory to place frames in
    #[arg(long)]
    output_directory: String,

    /// strftime template for the frame filenames
    #[arg(long, default_value = grabber::DEFAULT_FILENAMES)]
    output_filenames: String,

    /// How many frames to capture during one run
    #[arg(long, default_value = "6")]
    frames: NonZeroU32,

    /// How long one run lasts
    #[arg(long, default_value = "1m")]
    duration: humantime::Duration,

    /// Capture on weekends too
    #[arg(long)]
    no_weekday_gate: bool,

    /// Capture in the dark too
    #[arg(long)]
    no_daylight_gate: bool,

    /// The city the camera is in, for the daylight window
    #[arg(long, default_value = "Seattle")]
    city: String,

    /// How far outside the daylight window capturing is still ok
    #[arg(long, default_value = "15m")]
    daylight_buffer: humantime::Duration,

    /// A file to additionally write the logs to
    #[arg(long)]
    logfile: Option<PathBuf>,
}

fn cli_arguments() -> eyre::Result<Cli> {
    const ARGS_FILE: &str = ".camlapserc";
    let mut args: Vec<OsString> = std::env::args_os().collect();

    if args.len() == 1 {
        if let Some(flags) = read_optional_file(ARGS_FILE)
            .wrap_err_with(|| format!("Could not read config file at: {ARGS_FILE}"))?
        {
            args.extend(
                flags
                    .split_whitespace()
                    .map(|s| std::ffi::OsStr::new(s).to_owned()),
            );
        }
    }

    Ok(Cli::parse_from(args))
}

fn main() -> eyre::Result<()> {
    init_eyre()?;
    let cli = cli_arguments()?;
    init_logger(cli.logfile.as_deref())?;

    let gate = CaptureGate {
        weekdays_only: !cli.no_weekday_gate,
        daylight: if cli.no_daylight_gate {
            None
        } else {
            Some(DaylightGate {
                city: daylight::lookup(&cli.city)?,
                buffer: cli.daylight_buffer.into(),
            })
        },
    };

    let schedule = Schedule::evenly_spaced(cli.duration.into(), cli.frames);
    let config = SessionConfig {
        output_directory: cli.output_directory,
        output_filenames: cli.output_filenames,
    };
    let mut clock = WallClock::start_now();

    grabber::run_gated_session(&gate, &schedule, &config, &mut clock, || {
        FrameSource::open(&cli.url).wrap_err_with(|| {
            format!("failed to connect to the stream at: {}", cli.url)
        })
    })?;

    Ok(())
}
