//! # Materialization Sink
//!
//! The pluggable filesystem-facing capability set the extraction scheduler
//! drives. The scheduler is generic over `S: Sink`; there's no dynamic
//! dispatch, so each binary monomorphizes to exactly the sink it needs.
//!
//! [`DefaultSink`] is plain POSIX. [`DryRunSink`] performs no filesystem
//! mutation at all, for `--dry-run`. The compressing sink lives in
//! [`crate::decmpfs`] since it depends on [`crate::compress_encoder`].

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cpio::File;
use crate::error::{Result, UnxipError};

/// Filesystem operations the scheduler needs, one call per materialized
/// path. `root` is the extraction root every `file.name` is relative to.
pub trait Sink: Send + Sync {
    fn create_directory(&self, root: &Path, file: &File) -> Result<()>;
    fn create_file(&self, root: &Path, file: &File) -> Result<()>;
    fn hardlink(&self, root: &Path, original_name: &str, file: &File) -> Result<()>;
    fn symlink(&self, root: &Path, target: &str, file: &File) -> Result<()>;
    fn chmod(&self, root: &Path, file: &File, mode: u32) -> Result<()>;
}

fn target_path(root: &Path, name: &str) -> PathBuf {
    root.join(name)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Plain POSIX materialization: `std::fs` directories, files written via a
/// single vectored write of the payload's chunk slices, real hardlinks and
/// symlinks.
pub struct DefaultSink;

impl Sink for DefaultSink {
    fn create_directory(&self, root: &Path, file: &File) -> Result<()> {
        let path = target_path(root, &file.name);
        fs::create_dir_all(&path).map_err(|e| UnxipError::io(&path, e))?;
        set_mode(&path, file.mode.permission_bits()).map_err(|e| UnxipError::io(&path, e))?;
        Ok(())
    }

    fn create_file(&self, root: &Path, file: &File) -> Result<()> {
        let path = target_path(root, &file.name);
        let mut out = fs::File::create(&path).map_err(|e| UnxipError::io(&path, e))?;
        write_vectored_all(&mut out, file).map_err(|e| UnxipError::io(&path, e))?;
        set_mode(&path, file.mode.full_permission_bits()).map_err(|e| UnxipError::io(&path, e))?;
        Ok(())
    }

    fn hardlink(&self, root: &Path, original_name: &str, file: &File) -> Result<()> {
        let original = target_path(root, original_name);
        let path = target_path(root, &file.name);
        fs::hard_link(&original, &path).map_err(|e| UnxipError::io(&path, e))
    }

    fn symlink(&self, root: &Path, target: &str, file: &File) -> Result<()> {
        let path = target_path(root, &file.name);
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(target, &path).map_err(|e| UnxipError::io(&path, e))
        }
        #[cfg(not(unix))]
        {
            let _ = target;
            Err(UnxipError::io(&path, std::io::Error::new(std::io::ErrorKind::Unsupported, "symlinks require unix")))
        }
    }

    fn chmod(&self, root: &Path, file: &File, mode: u32) -> Result<()> {
        let path = target_path(root, &file.name);
        set_mode(&path, mode).map_err(|e| UnxipError::io(&path, e))
    }
}

/// Writes `file.data`'s chunk slices to `out`, preserving slice order
/// exactly. Attempts a single vectored write first (the common case where
/// the kernel accepts the whole payload in one syscall); any slices left
/// over after a short write are copied into one buffer and flushed with a
/// plain `write_all`, rather than re-slicing `IoSlice`s by hand.
fn write_vectored_all(out: &mut fs::File, file: &File) -> std::io::Result<()> {
    use std::io::IoSlice;
    let owned: Vec<&[u8]> = file.data.iter().map(|s| s.as_slice()).collect();
    let io_slices: Vec<IoSlice> = owned.iter().map(|s| IoSlice::new(s)).collect();
    let total: usize = owned.iter().map(|s| s.len()).sum();

    let mut written = out.write_vectored(&io_slices)?;
    if written == total {
        return Ok(());
    }

    // Short write: fall back to writing the unwritten remainder as one
    // contiguous buffer.
    let mut remainder = Vec::with_capacity(total - written);
    for slice in &owned {
        if written >= slice.len() {
            written -= slice.len();
        } else {
            remainder.extend_from_slice(&slice[written..]);
            written = 0;
        }
    }
    out.write_all(&remainder)
}

/// No-op sink for `--dry-run`: logs every call it would have made, touches
/// nothing on disk.
pub struct DryRunSink;

impl Sink for DryRunSink {
    fn create_directory(&self, root: &Path, file: &File) -> Result<()> {
        debug!(path = %target_path(root, &file.name).display(), "dry-run create_directory");
        Ok(())
    }
    fn create_file(&self, root: &Path, file: &File) -> Result<()> {
        debug!(path = %target_path(root, &file.name).display(), size = file.size(), "dry-run create_file");
        Ok(())
    }
    fn hardlink(&self, root: &Path, original_name: &str, file: &File) -> Result<()> {
        debug!(path = %target_path(root, &file.name).display(), original_name, "dry-run hardlink");
        Ok(())
    }
    fn symlink(&self, root: &Path, target: &str, file: &File) -> Result<()> {
        debug!(path = %target_path(root, &file.name).display(), target, "dry-run symlink");
        Ok(())
    }
    fn chmod(&self, root: &Path, file: &File, mode: u32) -> Result<()> {
        debug!(path = %target_path(root, &file.name).display(), mode = format!("{mode:o}"), "dry-run chmod");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, ChunkSlice};
    use crate::file::{FileMode, Identifier};

    fn file_with(name: &str, mode: u32, data: &[u8]) -> File {
        let chunk = Chunk::owned(data.to_vec());
        File {
            id: Identifier { dev: 1, ino: 1 },
            mode: FileMode(mode),
            name: name.to_string(),
            data: vec![ChunkSlice { chunk: chunk.clone(), start: 0, len: data.len() }],
            chunk_refs: vec![chunk],
        }
    }

    #[test]
    fn default_sink_writes_file_contents_and_mode() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DefaultSink;
        let f = file_with("out.bin", 0o100640, b"payload-bytes");
        sink.create_file(dir.path(), &f).unwrap();

        let written = std::fs::read(dir.path().join("out.bin")).unwrap();
        assert_eq!(written, b"payload-bytes");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = std::fs::metadata(dir.path().join("out.bin")).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o640);
        }
    }

    #[test]
    fn default_sink_creates_directory_with_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DefaultSink;
        let f = file_with("sub", 0o040750, b"");
        sink.create_directory(dir.path(), &f).unwrap();
        assert!(dir.path().join("sub").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn default_sink_symlink_then_chmod_for_sticky() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DefaultSink;
        let f = file_with("link", 0o120000 | 0o1777, b"/target");
        sink.symlink(dir.path(), "/target", &f).unwrap();
        let target = std::fs::read_link(dir.path().join("link")).unwrap();
        assert_eq!(target, std::path::Path::new("/target"));
        sink.chmod(dir.path(), &f, f.mode.full_permission_bits()).unwrap();
    }

    #[test]
    fn dry_run_sink_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DryRunSink;
        let f = file_with("would-exist.txt", 0o100644, b"data");
        sink.create_file(dir.path(), &f).unwrap();
        assert!(!dir.path().join("would-exist.txt").exists());
    }
}
