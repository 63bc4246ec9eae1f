//! CLI entry point. Parses arguments, wires up logging, picks a sink based
//! on `--no-compress`/`--dry-run`, and runs the extractor.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;
use unxip::cli::Args;
use unxip::extractor::{self, Options};
use unxip::sink::{DefaultSink, DryRunSink};
use unxip::{decmpfs::CompressedSink, scheduler::StatsSnapshot};

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let options = Options { jobs: args.jobs.unwrap_or_else(|| num_cpus::get().max(1)) };
    let output_dir = args.output_dir();

    let result = if args.dry_run {
        extractor::extract(&args.input, &output_dir, Arc::new(DryRunSink), options)
    } else if args.no_compress {
        extractor::extract(&args.input, &output_dir, Arc::new(DefaultSink), options)
    } else {
        extractor::extract(&args.input, &output_dir, Arc::new(CompressedSink::new()), options)
    };

    match result {
        Ok(stats) => {
            // Per-file errors are logged and swallowed (see §7); they never
            // change the exit code.
            report(&stats);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(path = %args.input.display(), error = %e, "extraction failed");
            eprintln!("unxip: {}: {e}", args.input.display());
            ExitCode::FAILURE
        }
    }
}

fn report(stats: &StatsSnapshot) {
    eprintln!(
        "extracted {} file(s), {} dir(s), {} symlink(s), {} hardlink(s) ({} bytes){}",
        stats.files,
        stats.directories,
        stats.symlinks,
        stats.hardlinks,
        stats.bytes_written,
        if stats.errors > 0 { format!(", {} error(s) (see log)", stats.errors) } else { String::new() },
    );
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
