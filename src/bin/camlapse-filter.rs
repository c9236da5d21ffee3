use std::ffi::OsString;
use std::io::Write;
use std::num::NonZeroU32;
use std::path::PathBuf;

use camlapse::bin_common::init::{init_eyre, init_logger};
use camlapse::daylight;
use camlapse::selection::{self, FilterOptions, SampleRange};
use camlapse::utils::fsutils::read_optional_file;
use clap::Parser;
use color_eyre::eyre::{self, Context};

#[derive(Parser, Debug)]
#[command()]
/// Select captured timelapse frames for encoding, printed one path per line
struct Cli {
    /// Only keep every Nth frame of each day
    #[arg(long, default_value = "1")]
    sample: NonZeroU32,

    /// Drop frames captured on weekends
    #[arg(long)]
    skip_weekends: bool,

    /// Only keep frames captured between sunrise and sunset
    #[arg(long)]
    daylight_only: bool,

    /// The city the camera is in, for the daylight window
    #[arg(long, default_value = "Seattle")]
    city: String,

    /// Date ranges to keep more frames of: YYYYMMDD-YYYYMMDD:rate,...
    #[arg(long, value_delimiter = ',')]
    supersample_ranges: Vec<SampleRange>,

    /// A file to additionally write the logs to
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// The directory to look for frames in
    root: PathBuf,
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

    let options = FilterOptions {
        sample: cli.sample,
        skip_weekends: cli.skip_weekends,
        daylight_only: if cli.daylight_only {
            Some(daylight::lookup(&cli.city)?)
        } else {
            None
        },
        supersample: cli.supersample_ranges,
    };

    let selected = selection::select_frames(&cli.root, &options)?;
    log::debug!("selected {} frames under {}", selected.len(), cli.root.display());

    let mut stdout = std::io::BufWriter::new(std::io::stdout().lock());
    for path in selected {
        writeln!(stdout, "{}", path.display()).wrap_err("failed to write to stdout")?;
    }
    stdout.flush().wrap_err("failed to write to stdout")?;

    Ok(())
}
