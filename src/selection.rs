use std::cmp;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use color_eyre::eyre::{self, Context};
use regex::Regex;
use walkdir::WalkDir;

use crate::daylight::City;

/// A file whose name carries a `YYYY-MM-DD_HHMMSS` capture timestamp, which is the
/// naming convention the grabber writes. Separators inside the time part are
/// optional, `..._08-00-00.png` parses too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFile {
    pub path: PathBuf,
    pub stamp: NaiveDateTime,
}

fn frame_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:^|\D)(\d{4})-(\d{2})-(\d{2})_(\d{2})-?(\d{2})-?(\d{2})\D.*(?:png|jpe?g)$",
        )
        .expect("the regex is valid")
    })
}

impl FrameFile {
    /// `None` if the file name does not follow the convention, or if the digits do
    /// not form a real calendar time.
    pub fn parse(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let cap = frame_name_regex().captures(name)?;

        let date = NaiveDate::from_ymd_opt(
            cap[1].parse().ok()?,
            cap[2].parse().ok()?,
            cap[3].parse().ok()?,
        )?;
        let stamp = date.and_hms_opt(
            cap[4].parse().ok()?,
            cap[5].parse().ok()?,
            cap[6].parse().ok()?,
        )?;

        Some(Self { path, stamp })
    }

    /// The day this frame belongs to, as a `yyyymmdd` number. The same scheme the
    /// supersample ranges are written in.
    pub fn day_key(&self) -> u32 {
        let date = self.stamp.date();
        date.day() + 100 * date.month() + 10_000 * date.year() as u32
    }
}

/// A date range that keeps more frames than the rest, `YYYYMMDD-YYYYMMDD:rate` on
/// the command line. Both endpoints are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRange {
    start: u32,
    stop: u32,
    scale: u32,
}

#[derive(thiserror::Error, Debug)]
#[error("expected YYYYMMDD-YYYYMMDD:rate, got: {0}")]
pub struct BadSampleRange(String);

impl FromStr for SampleRange {
    type Err = BadSampleRange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"^(\d{8})-(\d{8}):(\d+)$").expect("the regex is valid")
        });

        let cap = re.captures(s).ok_or_else(|| BadSampleRange(s.to_owned()))?;
        let num = |i: usize| cap[i].parse().map_err(|_| BadSampleRange(s.to_owned()));
        Ok(Self {
            start: num(1)?,
            stop: num(2)?,
            scale: num(3)?,
        })
    }
}

impl SampleRange {
    fn contains(&self, day_key: u32) -> bool {
        self.start <= day_key && day_key <= self.stop
    }
}

/// The sample scale for a day is the largest rate of any range covering it, 1 if
/// none does.
fn scale_for(ranges: &[SampleRange], day_key: u32) -> u32 {
    ranges
        .iter()
        .filter(|range| range.contains(day_key))
        .map(|range| range.scale)
        .max()
        .unwrap_or(1)
        .max(1)
}

pub struct FilterOptions {
    /// Keep every `sample`:th frame of each day.
    pub sample: NonZeroU32,
    pub skip_weekends: bool,
    /// Keep only frames between sunrise and sunset in this city.
    pub daylight_only: Option<&'static City>,
    pub supersample: Vec<SampleRange>,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            sample: NonZeroU32::new(1).expect("1 is not 0"),
            skip_weekends: false,
            daylight_only: None,
            supersample: Vec::new(),
        }
    }
}

struct DayBucket {
    scale: u32,
    files: Vec<PathBuf>,
}

impl DayBucket {
    /// Every `sample / scale`:th file, 0-indexed. That is, the first file of the day
    /// always survives and a day of F files yields ceil(F / stride) of them.
    fn select(&self, sample: u32) -> impl Iterator<Item = &PathBuf> {
        let stride = cmp::max(1, sample / self.scale) as usize;
        self.files.iter().step_by(stride)
    }
}

/// Walk `root` for frame files and pick the ones to encode, in chronological order,
/// ready to be printed one per line for the encoder.
pub fn select_frames(
    root: &Path,
    options: &FilterOptions,
) -> eyre::Result<Vec<PathBuf>> {
    eyre::ensure!(
        root.is_dir(),
        "not a readable directory: {}",
        root.display()
    );

    let mut frames = Vec::new();
    for entry in WalkDir::new(root) {
        let entry =
            entry.wrap_err_with(|| format!("failed to walk: {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(frame) = FrameFile::parse(entry.into_path()) {
            frames.push(frame);
        }
    }

    // the timestamped names make path order chronological
    frames.sort_by(|a, b| a.path.cmp(&b.path));

    let mut buckets: BTreeMap<u32, DayBucket> = BTreeMap::new();
    for frame in frames {
        if options.skip_weekends && is_weekend(frame.stamp) {
            continue;
        }
        if let Some(city) = options.daylight_only {
            if !city.is_daylight(frame.stamp) {
                continue;
            }
        }

        let key = frame.day_key();
        buckets
            .entry(key)
            .or_insert_with(|| DayBucket {
                scale: scale_for(&options.supersample, key),
                files: Vec::new(),
            })
            .files
            .push(frame.path);
    }

    Ok(buckets
        .values()
        .flat_map(|bucket| bucket.select(options.sample.get()))
        .cloned()
        .collect())
}

fn is_weekend(stamp: NaiveDateTime) -> bool {
    matches!(stamp.weekday(), Weekday::Sat | Weekday::Sun)
}
