//! Command-line surface: one verb (extract), a handful of flags. There are
//! no subcommands — unlike the archiver this crate started from, `unxip`
//! only ever does one thing to one kind of input.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Parallel extractor for Xcode .xip archives.", long_about = None)]
pub struct Args {
    /// The .xip archive to extract.
    pub input: PathBuf,

    /// Directory to extract into. Defaults to the archive's file stem in
    /// the current directory.
    pub output: Option<PathBuf>,

    /// Disable decmpfs output compression; always write plain files.
    #[arg(short = 'c', long = "no-compress")]
    pub no_compress: bool,

    /// Parse and schedule the whole archive but don't touch the
    /// filesystem.
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Increase log verbosity. Repeatable (`-v` info, `-vv` debug, `-vvv`
    /// trace). Overridden by `RUST_LOG` when set.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Worker threads for chunk decode and block compression. [default:
    /// number of CPUs]
    #[arg(short = 'j', long = "jobs")]
    pub jobs: Option<usize>,
}

impl Args {
    /// Where extraction should land when `output` wasn't given: the
    /// archive's file stem, in the current directory.
    pub fn output_dir(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            self.input
                .file_stem()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("xip-extracted"))
        })
    }
}
