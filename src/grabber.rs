use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use color_eyre::eyre::{self, Context};
use image::RgbImage;

use crate::frame_source::FrameSource;
use crate::schedule::{CaptureGate, Clock, Schedule};

pub const DEFAULT_FILENAMES: &str = "cam-%Y-%m-%d_%H%M%S.png";

/// Where a session puts its frames. Both fields are strftime templates interpolated
/// with the wall time of each individual capture.
pub struct SessionConfig {
    pub output_directory: String,
    pub output_filenames: String,
}

impl SessionConfig {
    /// The full output path for a frame captured at `now`. A template without a year
    /// in it gets a timestamped fallback appended, so repeated invocations never
    /// collide even with static templates.
    pub fn frame_path(&self, now: DateTime<Local>) -> eyre::Result<PathBuf> {
        let mut dir = PathBuf::from(strftime(&self.output_directory, now)?);
        if !self.output_directory.contains("%Y") {
            dir.push(strftime("%Y/%m/%d/%H", now)?);
        }

        let mut filenames = self.output_filenames.clone();
        if !filenames.contains("%Y") {
            filenames.push_str("-%Y-%m-%d_%H%M%S.png");
        }

        Ok(dir.join(strftime(&filenames, now)?))
    }
}

fn strftime(template: &str, now: DateTime<Local>) -> eyre::Result<String> {
    use std::fmt::Write;

    // chrono surfaces bad specifiers as a fmt error first when displayed
    let mut out = String::new();
    write!(out, "{}", now.format(template))
        .map_err(|_| eyre::eyre!("invalid time format template: {template}"))?;
    Ok(out)
}

/// Something that can produce the frame closest to now from a stream. Exists so
/// sessions can be tested without a camera.
pub trait GrabFrame {
    /// `Ok(None)` means the stream ended.
    fn grab(&mut self) -> eyre::Result<Option<RgbImage>>;
}

impl GrabFrame for FrameSource {
    fn grab(&mut self) -> eyre::Result<Option<RgbImage>> {
        self.latest_frame()
    }
}

/// What every invocation does: check the gate, and only when it is open connect to
/// the stream and run the session. A closed gate is a successful no-op that writes
/// nothing.
pub fn run_gated_session<G: GrabFrame>(
    gate: &CaptureGate,
    schedule: &Schedule,
    config: &SessionConfig,
    clock: &mut impl Clock,
    connect: impl FnOnce() -> eyre::Result<G>,
) -> eyre::Result<Vec<PathBuf>> {
    let decision = gate.check(clock.now());
    if !decision.is_open() {
        log::info!("skipping this run, {decision}");
        return Ok(Vec::new());
    }

    let mut source = connect()?;
    run_session(&mut source, schedule, config, clock)
}

/// Run one capture session to completion: wait for each scheduled offset, grab a
/// frame and write it to its timestamped path. A failed grab skips that offset only,
/// a failed write is fatal. Returns the paths that were written, in capture order.
pub fn run_session(
    source: &mut impl GrabFrame,
    schedule: &Schedule,
    config: &SessionConfig,
    clock: &mut impl Clock,
) -> eyre::Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    for (i, offset) in schedule.offsets().iter().enumerate() {
        clock.wait_until(*offset);

        let path = config.frame_path(clock.now())?;
        log::info!("capturing frame {} of {}", i + 1, schedule.len());

        match source.grab() {
            Ok(Some(img)) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).wrap_err_with(|| {
                        format!(
                            "failed to create the output directory at: {}",
                            parent.display()
                        )
                    })?;
                }
                img.save(&path).wrap_err_with(|| {
                    format!("failed to write the frame to: {}", path.display())
                })?;
                written.push(path);
            }
            Ok(None) => {
                log::warn!("the stream ended early");
                break;
            }
            Err(e) => {
                log::error!("failed to grab a frame for {}: {:#}", path.display(), e);
            }
        }
    }

    Ok(written)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schedule::ManualClock;
    use chrono::TimeZone;
    use std::num::NonZeroU32;
    use std::time::Duration;

    struct StubGrab {
        fail_on: Vec<usize>,
        calls: usize,
    }

    impl StubGrab {
        fn new() -> Self {
            Self {
                fail_on: vec![],
                calls: 0,
            }
        }
    }

    impl GrabFrame for StubGrab {
        fn grab(&mut self) -> eyre::Result<Option<RgbImage>> {
            let call = self.calls;
            self.calls += 1;
            if self.fail_on.contains(&call) {
                eyre::bail!("simulated decode failure");
            }
            Ok(Some(RgbImage::new(4, 4)))
        }
    }

    fn eight_oclock() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn schedule() -> Schedule {
        Schedule::evenly_spaced(Duration::from_secs(60), NonZeroU32::new(6).unwrap())
    }

    #[test]
    fn writes_every_scheduled_frame() {
        let tmp = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            output_directory: tmp.path().join("frames").display().to_string(),
            output_filenames: DEFAULT_FILENAMES.to_string(),
        };
        let mut clock = ManualClock::starting_at(eight_oclock());

        let written =
            run_session(&mut StubGrab::new(), &schedule(), &config, &mut clock)
                .unwrap();

        assert_eq!(6, written.len());
        let mut sorted = written.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(written, sorted, "paths are distinct and chronological");
        assert!(written.iter().all(|p| p.is_file()));
        assert!(written[0].ends_with("2024/05/01/08/cam-2024-05-01_080000.png"));
        assert!(written[5].ends_with("2024/05/01/08/cam-2024-05-01_080050.png"));
    }

    #[test]
    fn a_bad_grab_skips_only_that_frame() {
        let tmp = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            output_directory: tmp.path().join("frames").display().to_string(),
            output_filenames: DEFAULT_FILENAMES.to_string(),
        };
        let mut clock = ManualClock::starting_at(eight_oclock());
        let mut source = StubGrab {
            fail_on: vec![1, 3],
            calls: 0,
        };

        let written = run_session(&mut source, &schedule(), &config, &mut clock).unwrap();

        assert_eq!(4, written.len());
        assert!(written[1].ends_with("cam-2024-05-01_080020.png"));
    }

    #[test]
    fn a_finished_stream_ends_the_session() {
        struct Eof;
        impl GrabFrame for Eof {
            fn grab(&mut self) -> eyre::Result<Option<RgbImage>> {
                Ok(None)
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            output_directory: tmp.path().display().to_string(),
            output_filenames: DEFAULT_FILENAMES.to_string(),
        };
        let mut clock = ManualClock::starting_at(eight_oclock());

        let written = run_session(&mut Eof, &schedule(), &config, &mut clock).unwrap();
        assert!(written.is_empty());
    }

    #[test]
    fn a_closed_gate_writes_nothing_and_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            output_directory: tmp.path().join("frames").display().to_string(),
            output_filenames: DEFAULT_FILENAMES.to_string(),
        };
        // 2024-05-04 is a Saturday
        let saturday = Local.with_ymd_and_hms(2024, 5, 4, 8, 0, 0).unwrap();
        let mut clock = ManualClock::starting_at(saturday);
        let gate = CaptureGate {
            weekdays_only: true,
            daylight: None,
        };

        let written = run_gated_session(
            &gate,
            &schedule(),
            &config,
            &mut clock,
            || -> eyre::Result<StubGrab> {
                panic!("a closed gate must not connect to the stream")
            },
        )
        .unwrap();

        assert!(written.is_empty());
        assert!(
            std::fs::read_dir(tmp.path()).unwrap().next().is_none(),
            "nothing may be written on a gated run"
        );
    }

    #[test]
    fn an_open_gate_runs_the_whole_session() {
        let tmp = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            output_directory: tmp.path().join("frames").display().to_string(),
            output_filenames: DEFAULT_FILENAMES.to_string(),
        };
        let mut clock = ManualClock::starting_at(eight_oclock());
        let gate = CaptureGate {
            weekdays_only: true,
            daylight: None,
        };

        let written = run_gated_session(&gate, &schedule(), &config, &mut clock, || {
            Ok(StubGrab::new())
        })
        .unwrap();

        assert_eq!(6, written.len());
    }

    #[test]
    fn templated_directories_are_kept_as_is() {
        let config = SessionConfig {
            output_directory: "/data/%Y-%m".to_string(),
            output_filenames: "cam.png".to_string(),
        };
        let path = config.frame_path(eight_oclock()).unwrap();
        assert_eq!(
            PathBuf::from("/data/2024-05/cam.png-2024-05-01_080000.png"),
            path
        );
    }

    #[test]
    fn invalid_templates_are_an_error() {
        let config = SessionConfig {
            output_directory: "/data".to_string(),
            output_filenames: "cam-%Y-%ö.png".to_string(),
        };
        assert!(config.frame_path(eight_oclock()).is_err());
    }
}
