//! # Top-Level Driver
//!
//! Wires the whole pipeline together: memory-map the archive (C1), locate
//! the PBZX content stream (C2), decode its chunks in order (C4), parse
//! the chunk stream as CPIO (C5), and hand the resulting `File` stream to
//! the extraction scheduler (C6) against whatever [`Sink`] the caller
//! chose. This is the crate's only public entry point; `main.rs` is a thin
//! CLI shell around it.

use std::fs;
use std::sync::Arc;

use memmap2::Mmap;
use std::path::Path;
use tracing::info;

use crate::cpio::CpioParser;
use crate::error::{Result, UnxipError};
use crate::pbzx;
use crate::scheduler::{self, StatsSnapshot};
use crate::sink::Sink;
use crate::xar;

/// Tunables that don't change the pipeline's semantics, only its
/// parallelism.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Concurrent chunk decodes / LZFSE block encodes in flight. Defaults
    /// to the active CPU count (§4.2's default `batch_size`).
    pub jobs: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self { jobs: num_cpus::get().max(1) }
    }
}

/// Extract `input` (a `.xip` archive) into `output`, creating it if
/// necessary, using `sink` for every filesystem mutation.
///
/// Fatal errors (bad container framing, decode failures) abort the whole
/// run and propagate here; per-file materialization failures are logged
/// and swallowed by the scheduler (see [`crate::scheduler`]).
pub fn extract<S: Sink + 'static>(
    input: &Path,
    output: &Path,
    sink: Arc<S>,
    options: Options,
) -> Result<StatsSnapshot> {
    let file = fs::File::open(input).map_err(|e| UnxipError::io(input, e))?;
    let map = Arc::new(unsafe { Mmap::map(&file) }.map_err(|e| UnxipError::io(input, e))?);

    info!(path = %input.display(), bytes = map.len(), "mapped archive");

    let range = xar::locate_pbzx(&map)?;
    info!(offset = range.offset, length = range.length, "located PBZX content stream");

    let chunks = pbzx::decode_chunks(map, range, options.jobs)?;
    let files = CpioParser::new(chunks);

    fs::create_dir_all(output).map_err(|e| UnxipError::io(output, e))?;

    let stats = scheduler::run(output, sink, files)?;
    info!(
        directories = stats.directories,
        files = stats.files,
        symlinks = stats.symlinks,
        hardlinks = stats.hardlinks,
        bytes_written = stats.bytes_written,
        errors = stats.errors,
        "extraction complete"
    );
    Ok(stats)
}
