//! # unxip
//!
//! A parallel extractor for Xcode `.xip` archives. An outer XAR container
//! wraps a PBZX stream of LZMA-compressed chunks, which decode into a CPIO
//! byte stream of directories, regular files, symlinks, and hardlinks. This
//! crate exploits the parallelism available at every layer of that stack —
//! chunk decompression, CPIO materialization, and (optionally) per-block
//! LZFSE re-compression for transparent on-disk storage — while preserving
//! the orderings each layer actually requires.
//!
//! ## Pipeline
//!
//! - [`xar`]: locate the PBZX content stream inside the outer XAR container.
//! - [`pbzx`]: split that stream into chunks and LZMA-decode them in order.
//! - [`cpio`]: parse the ordered chunk stream into zero-copy `File` records.
//! - [`scheduler`]: materialize files with a dependency-respecting,
//!   unordered work pool.
//! - [`sink`] / [`decmpfs`]: the pluggable filesystem backend the scheduler
//!   drives, with an optional decmpfs-compressing implementation.
//! - [`extractor`]: the top-level driver tying the above together; this is
//!   the crate's primary entry point.
//!
//! [`ordered_queue`] and [`work_pool`] are the two bounded-parallelism
//! primitives everything above is built from.

pub mod chunk;
pub mod cli;
pub mod compress_encoder;
pub mod cpio;
pub mod decmpfs;
pub mod error;
pub mod extractor;
pub mod file;
pub mod ordered_queue;
pub mod pbzx;
pub mod scheduler;
pub mod sink;
pub mod work_pool;
pub mod xar;

pub use error::{Result, UnxipError};
