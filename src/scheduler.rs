//! # Extraction Scheduler
//!
//! Walks `File` records in CPIO arrival order and dispatches one
//! materialization job per file onto an unordered [`WorkPool`]. The only
//! ordering a job needs beyond "its own turn" is expressed as zero-to-two
//! [`Flag`] waits: the parent directory's completion, and — for
//! hardlinks — the link origin's completion. CPIO itself guarantees a
//! directory precedes its contents and a hardlink's origin precedes its
//! aliases, so those two maps are all the scheduling state this needs.
//!
//! `DirTask` and `LinkOrigin` are mutated only by this loop (single writer,
//! per the data model); jobs dispatched onto the pool only ever clone
//! handles out of them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::cpio::File;
use crate::error::Result;
use crate::file::{FileType, Identifier};
use crate::sink::Sink;
use crate::work_pool::{Flag, WorkPool};

/// Per-file materialization jobs run unordered with this many in flight at
/// once; matches the batch size the reference implementation uses.
const SCHEDULER_BATCH_SIZE: usize = 64;

/// Counts of what happened during a run. Per-file sink failures are
/// swallowed (see module docs) but still tallied here so callers can
/// report a non-zero-but-not-fatal outcome.
#[derive(Default)]
pub struct Stats {
    pub directories: AtomicU64,
    pub files: AtomicU64,
    pub symlinks: AtomicU64,
    pub hardlinks: AtomicU64,
    pub bytes_written: AtomicU64,
    pub errors: AtomicU64,
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            directories: self.directories.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
            symlinks: self.symlinks.load(Ordering::Relaxed),
            hardlinks: self.hardlinks.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub directories: u64,
    pub files: u64,
    pub symlinks: u64,
    pub hardlinks: u64,
    pub bytes_written: u64,
    pub errors: u64,
}

/// Everything after the first component up to (not including) the final
/// `/`, or `None` if `name` has no parent beyond the implicit extraction
/// root. A parent of `"."` or `""` means the same thing: CPIO entries are
/// conventionally `./`-prefixed, so a top-level entry like `"./a"` has no
/// tracked parent task either, even though it does contain a `/`.
fn parent_of(name: &str) -> Option<&str> {
    match name.rfind('/').map(|i| &name[..i]) {
        Some("") | Some(".") | None => None,
        Some(parent) => Some(parent),
    }
}

/// Run the extraction scheduler over `files`, dispatching jobs against
/// `sink` rooted at `root`. Blocks until every file has been scheduled and
/// every dispatched job has completed.
///
/// Fatal errors from `files` itself (CPIO/PBZX/XAR failures) propagate
/// immediately; per-file `sink` errors are logged and swallowed (§7).
pub fn run<S, I>(root: &Path, sink: Arc<S>, files: I) -> Result<StatsSnapshot>
where
    S: Sink + 'static,
    I: Iterator<Item = Result<File>>,
{
    let root: Arc<PathBuf> = Arc::new(root.to_path_buf());
    let pool = WorkPool::new(SCHEDULER_BATCH_SIZE);
    let stats = Arc::new(Stats::default());

    let mut dir_tasks: HashMap<String, Flag> = HashMap::new();
    let mut link_origin: HashMap<Identifier, (String, Flag)> = HashMap::new();

    for file in files {
        let file = file?;
        if file.name == "." {
            continue;
        }

        let parent_task: Option<Flag> = match parent_of(&file.name) {
            Some(parent) => {
                let task = dir_tasks.get(parent).cloned();
                debug_assert!(
                    task.is_some(),
                    "CPIO stream materialized '{}' before its parent directory '{}'",
                    file.name,
                    parent
                );
                task
            }
            None => None,
        };

        if let Some((original_name, origin_task)) = link_origin.get(&file.id).cloned() {
            spawn_hardlink(&pool, &root, &sink, &stats, parent_task, original_name, origin_task, file);
            continue;
        }

        match file.mode.file_type() {
            FileType::Symlink => {
                spawn_symlink(&pool, &root, &sink, &stats, parent_task, file);
            }
            FileType::Directory => {
                let flag = Flag::new();
                dir_tasks.insert(file.name.clone(), flag.clone());
                spawn_directory(&pool, &root, &sink, &stats, parent_task, flag, file);
            }
            FileType::Regular => {
                let flag = Flag::new();
                link_origin.insert(file.id, (file.name.clone(), flag.clone()));
                spawn_regular(&pool, &root, &sink, &stats, parent_task, flag, file);
            }
            FileType::Other => {
                return Err(crate::error::UnxipError::malformed(format!(
                    "CPIO entry '{}' has unsupported file type (mode {:o})",
                    file.name, file.mode.0
                )));
            }
        }
    }

    pool.drain();
    Ok(stats.snapshot())
}

fn spawn_directory<S: Sink + 'static>(
    pool: &WorkPool,
    root: &Arc<PathBuf>,
    sink: &Arc<S>,
    stats: &Arc<Stats>,
    parent_task: Option<Flag>,
    flag: Flag,
    file: File,
) {
    let root = root.clone();
    let sink = sink.clone();
    let stats = stats.clone();
    pool.spawn(move || {
        if let Some(p) = &parent_task {
            p.wait();
        }
        match sink.create_directory(&root, &file) {
            Ok(()) => {
                if file.mode.is_sticky() {
                    if let Err(e) = sink.chmod(&root, &file, file.mode.full_permission_bits()) {
                        warn!(name = %file.name, error = %e, "sticky chmod failed after create_directory");
                        stats.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
                stats.directories.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(name = %file.name, error = %e, "create_directory failed, continuing");
                stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        flag.signal();
    });
}

fn spawn_regular<S: Sink + 'static>(
    pool: &WorkPool,
    root: &Arc<PathBuf>,
    sink: &Arc<S>,
    stats: &Arc<Stats>,
    parent_task: Option<Flag>,
    flag: Flag,
    file: File,
) {
    let root = root.clone();
    let sink = sink.clone();
    let stats = stats.clone();
    pool.spawn(move || {
        if let Some(p) = &parent_task {
            p.wait();
        }
        match sink.create_file(&root, &file) {
            Ok(()) => {
                stats.files.fetch_add(1, Ordering::Relaxed);
                stats.bytes_written.fetch_add(file.size(), Ordering::Relaxed);
            }
            Err(e) => {
                warn!(name = %file.name, error = %e, "create_file failed, continuing");
                stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        flag.signal();
    });
}

fn spawn_symlink<S: Sink + 'static>(
    pool: &WorkPool,
    root: &Arc<PathBuf>,
    sink: &Arc<S>,
    stats: &Arc<Stats>,
    parent_task: Option<Flag>,
    file: File,
) {
    let root = root.clone();
    let sink = sink.clone();
    let stats = stats.clone();
    pool.spawn(move || {
        if let Some(p) = &parent_task {
            p.wait();
        }
        let target = match String::from_utf8(file.concat_data()) {
            Ok(t) => t,
            Err(e) => {
                warn!(name = %file.name, error = %e, "symlink target is not valid UTF-8, skipping");
                stats.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        match sink.symlink(&root, &target, &file) {
            Ok(()) => {
                if file.mode.is_sticky() {
                    if let Err(e) = sink.chmod(&root, &file, file.mode.full_permission_bits()) {
                        warn!(name = %file.name, error = %e, "sticky chmod failed after symlink");
                        stats.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
                stats.symlinks.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(name = %file.name, error = %e, "symlink failed, continuing");
                stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    });
}

fn spawn_hardlink<S: Sink + 'static>(
    pool: &WorkPool,
    root: &Arc<PathBuf>,
    sink: &Arc<S>,
    stats: &Arc<Stats>,
    parent_task: Option<Flag>,
    original_name: String,
    origin_task: Flag,
    file: File,
) {
    let root = root.clone();
    let sink = sink.clone();
    let stats = stats.clone();
    pool.spawn(move || {
        if let Some(p) = &parent_task {
            p.wait();
        }
        origin_task.wait();
        match sink.hardlink(&root, &original_name, &file) {
            Ok(()) => {
                stats.hardlinks.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(name = %file.name, original = %original_name, error = %e, "hardlink failed, continuing");
                stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    });
}
