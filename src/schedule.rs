use std::fmt;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Local, Weekday};

use crate::daylight::City;

/// The offsets from session start that frames should be captured at, computed up
/// front. The capture loop targets these instead of sleeping a fixed interval, so a
/// slow grab does not push every later frame forward.
#[derive(Debug, Clone)]
pub struct Schedule {
    offsets: Vec<Duration>,
}

impl Schedule {
    /// `frames` offsets spaced `duration / frames` apart, starting at zero.
    pub fn evenly_spaced(duration: Duration, frames: NonZeroU32) -> Self {
        let step = duration / frames.get();
        Self {
            offsets: (0..frames.get()).map(|i| step * i).collect(),
        }
    }

    pub fn offsets(&self) -> &[Duration] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// The session's view of time. The grabber only ever asks for the current wall time
/// and to be woken at a given offset, so a whole session can run against a simulated
/// clock without sleeping.
pub trait Clock {
    /// Current local time, used for path interpolation and gating.
    fn now(&self) -> DateTime<Local>;

    /// Block until at least `offset` has passed since the session started. Does
    /// nothing if that point is already in the past.
    fn wait_until(&mut self, offset: Duration);
}

pub struct WallClock {
    start: Instant,
}

impl WallClock {
    pub fn start_now() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for WallClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn wait_until(&mut self, offset: Duration) {
        if let Some(left) = offset.checked_sub(self.start.elapsed()) {
            std::thread::sleep(left);
        }
    }
}

/// A clock that jumps instantly to each requested offset.
pub struct ManualClock {
    start: DateTime<Local>,
    elapsed: Duration,
}

impl ManualClock {
    pub fn starting_at(start: DateTime<Local>) -> Self {
        Self {
            start,
            elapsed: Duration::ZERO,
        }
    }

    /// Pretend that time passed, e.g. a slow grab.
    pub fn advance(&mut self, dur: Duration) {
        self.elapsed += dur;
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        self.start
            + chrono::Duration::from_std(self.elapsed).expect("simulated times are small")
    }

    fn wait_until(&mut self, offset: Duration) {
        if offset > self.elapsed {
            self.elapsed = offset;
        }
    }
}

pub struct DaylightGate {
    pub city: &'static City,
    pub buffer: Duration,
}

/// Decides whether an invocation should capture at all. A closed gate is a normal
/// no-op, not an error.
pub struct CaptureGate {
    pub weekdays_only: bool,
    pub daylight: Option<DaylightGate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Open,
    Weekend,
    Dark,
}

impl GateDecision {
    pub fn is_open(self) -> bool {
        matches!(self, GateDecision::Open)
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateDecision::Open => write!(f, "open"),
            GateDecision::Weekend => write!(f, "it is the weekend"),
            GateDecision::Dark => write!(f, "outside of daylight hours"),
        }
    }
}

impl CaptureGate {
    pub fn check(&self, now: DateTime<Local>) -> GateDecision {
        if self.weekdays_only && matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            return GateDecision::Weekend;
        }

        if let Some(DaylightGate { city, buffer }) = &self.daylight {
            if !city.sun_is_out(now, *buffer) {
                return GateDecision::Dark;
            }
        }

        GateDecision::Open
    }
}
