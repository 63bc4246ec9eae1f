//! # Compressing Materialization Sink
//!
//! Wraps [`DefaultSink`] and, for regular files on macOS, tries to store
//! the payload as a `com.apple.decmpfs`-backed transparently-compressed
//! file instead of writing it to the data fork: an empty data fork, a
//! 16-byte xattr naming the compression scheme, the LZFSE resource-fork
//! blob from [`crate::compress_encoder`] written to the resource fork, and
//! the `UF_COMPRESSED` BSD flag set on the inode.
//!
//! Every other capability (`create_directory`, `hardlink`, `symlink`,
//! `chmod`) and every failure path delegate straight to `DefaultSink` — see
//! §9's open question on why this is `#[cfg(target_os = "macos")]`-only.

use std::path::Path;

use crate::compress_encoder::encode_resource_fork;
use crate::cpio::File;
use crate::error::Result;
use crate::sink::{DefaultSink, Sink};

const DECMPFS_MAGIC: &[u8; 4] = b"fpmc";
const DECMPFS_TYPE_LZFSE_RESOURCE_FORK: u32 = 0x0000000C;

/// A sink that prefers decmpfs (xattr + resource fork + `UF_COMPRESSED`)
/// storage for regular files, falling back to a plain write whenever the
/// payload isn't worth compressing, the platform can't support it, or any
/// step of the compressed path fails.
pub struct CompressedSink {
    default: DefaultSink,
}

impl CompressedSink {
    pub fn new() -> Self {
        Self { default: DefaultSink }
    }
}

impl Default for CompressedSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for CompressedSink {
    fn create_directory(&self, root: &Path, file: &File) -> Result<()> {
        self.default.create_directory(root, file)
    }

    fn create_file(&self, root: &Path, file: &File) -> Result<()> {
        #[cfg(target_os = "macos")]
        {
            if macos::try_write_compressed(root, file) {
                return Ok(());
            }
        }
        self.default.create_file(root, file)
    }

    fn hardlink(&self, root: &Path, original_name: &str, file: &File) -> Result<()> {
        self.default.hardlink(root, original_name, file)
    }

    fn symlink(&self, root: &Path, target: &str, file: &File) -> Result<()> {
        self.default.symlink(root, target, file)
    }

    fn chmod(&self, root: &Path, file: &File, mode: u32) -> Result<()> {
        self.default.chmod(root, file, mode)
    }
}

/// The 16-byte `com.apple.decmpfs` xattr payload for an LZFSE
/// resource-fork-backed file of `decompressed_size` bytes.
fn decmpfs_header(decompressed_size: u64) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0..4].copy_from_slice(DECMPFS_MAGIC);
    out[4..8].copy_from_slice(&DECMPFS_TYPE_LZFSE_RESOURCE_FORK.to_le_bytes());
    out[8..16].copy_from_slice(&decompressed_size.to_le_bytes());
    out
}

#[cfg(target_os = "macos")]
mod macos {
    use super::*;
    use std::ffi::CString;
    use std::fs;
    use std::os::unix::ffi::OsStrExt;
    use tracing::debug;

    // From <sys/stat.h>; not re-exported by the `libc` crate version we pin.
    const UF_COMPRESSED: u32 = 0x0000_0020;

    /// Attempt the full decmpfs write for `file` at `root.join(&file.name)`.
    /// Returns `true` on success; `false` means the caller should fall back
    /// to a plain write (payload empty or incompressible, or any syscall in
    /// this path failed).
    pub(super) fn try_write_compressed(root: &Path, file: &File) -> bool {
        let src = file.concat_data();
        if src.is_empty() {
            return false;
        }
        let Some(blob) = encode_resource_fork(&src) else {
            return false;
        };

        let path = root.join(&file.name);
        match write_compressed(&path, &blob, src.len() as u64, file.mode.full_permission_bits()) {
            Ok(()) => true,
            Err(e) => {
                debug!(name = %file.name, error = %e, "decmpfs write failed, falling back to plain write");
                false
            }
        }
    }

    fn write_compressed(path: &Path, blob: &[u8], decompressed_size: u64, mode: u32) -> std::io::Result<()> {
        // Empty data fork: decmpfs stores the real payload elsewhere.
        fs::File::create(path)?;

        xattr::set(path, "com.apple.decmpfs", &decmpfs_header(decompressed_size))?;

        let rsrc_path = resource_fork_path(path);
        fs::write(&rsrc_path, blob)?;

        set_uf_compressed(path)?;
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn resource_fork_path(path: &Path) -> std::path::PathBuf {
        let mut bytes = path.as_os_str().as_bytes().to_vec();
        bytes.extend_from_slice(b"/..namedfork/rsrc");
        std::path::PathBuf::from(std::ffi::OsStr::from_bytes(&bytes))
    }

    fn set_uf_compressed(path: &Path) -> std::io::Result<()> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let rc = unsafe { libc::chflags(c_path.as_ptr(), UF_COMPRESSED as libc::c_ulong) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decmpfs_header_has_expected_layout() {
        let header = decmpfs_header(12345);
        assert_eq!(&header[0..4], b"fpmc");
        assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 0x0C);
        assert_eq!(u64::from_le_bytes(header[8..16].try_into().unwrap()), 12345);
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn non_macos_always_falls_back_to_plain_write() {
        use crate::chunk::{Chunk, ChunkSlice};
        use crate::file::{FileMode, Identifier};

        let dir = tempfile::tempdir().unwrap();
        let sink = CompressedSink::new();
        let data = vec![b'a'; 256 * 1024];
        let chunk = Chunk::owned(data.clone());
        let file = File {
            id: Identifier { dev: 1, ino: 1 },
            mode: FileMode(0o100644),
            name: "big.bin".to_string(),
            data: vec![ChunkSlice { chunk: chunk.clone(), start: 0, len: data.len() }],
            chunk_refs: vec![chunk],
        };
        sink.create_file(dir.path(), &file).unwrap();
        assert_eq!(std::fs::read(dir.path().join("big.bin")).unwrap(), data);
    }
}
