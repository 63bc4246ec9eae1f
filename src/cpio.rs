//! # CPIO Parser
//!
//! Consumes the ordered chunk stream from [`crate::pbzx`] as a byte source
//! and emits [`File`] records whose `data` is a sequence of zero-copy
//! slices into the chunks that produced it. Parses the classic ASCII "odc"
//! header: fixed-width fields, everything else ASCII octal.

use crate::chunk::{Chunk, ChunkSlice};
use crate::error::{Result, UnxipError};
use crate::file::{FileMode, Identifier};

const CPIO_MAGIC: &[u8; 6] = b"070707";
const TRAILER_NAME: &str = "TRAILER!!!";

/// A single CPIO entry with a zero-copy payload.
pub struct File {
    pub id: Identifier,
    pub mode: FileMode,
    pub name: String,
    pub data: Vec<ChunkSlice>,
    pub chunk_refs: Vec<Chunk>,
}

impl File {
    /// Total payload length across every slice.
    pub fn size(&self) -> u64 {
        self.data.iter().map(|s| s.len as u64).sum()
    }

    /// Concatenate the payload into an owned buffer. Used where a
    /// contiguous view is unavoidable (symlink targets, LZFSE input).
    pub fn concat_data(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size() as usize);
        for slice in &self.data {
            out.extend_from_slice(slice.as_slice());
        }
        out
    }
}

/// Cursor over an ordered stream of chunks, producing exact-size byte
/// buffers that transparently splice across chunk boundaries.
pub struct CpioParser<I> {
    chunks: I,
    current: Option<Chunk>,
    pos: usize,
    done: bool,
}

impl<I> CpioParser<I>
where
    I: Iterator<Item = Result<Chunk>>,
{
    pub fn new(chunks: I) -> Self {
        Self { chunks, current: None, pos: 0, done: false }
    }

    fn fill(&mut self) -> Result<bool> {
        if self.current.as_ref().map_or(false, |c| self.pos < c.len()) {
            return Ok(true);
        }
        match self.chunks.next() {
            Some(Ok(chunk)) => {
                self.current = Some(chunk);
                self.pos = 0;
                Ok(true)
            }
            Some(Err(e)) => Err(e),
            None => Ok(false),
        }
    }

    /// Read exactly `size` bytes, splicing across chunk boundaries as
    /// needed, without copying: returns the ordered list of slices that
    /// together cover `size` bytes.
    fn read_slices(&mut self, mut size: usize) -> Result<Vec<ChunkSlice>> {
        let mut out = Vec::new();
        while size > 0 {
            if !self.fill()? {
                return Err(UnxipError::malformed("CPIO stream ended mid-record"));
            }
            let chunk = self.current.clone().unwrap();
            let avail = chunk.len() - self.pos;
            let take = avail.min(size);
            out.push(ChunkSlice { chunk, start: self.pos, len: take });
            self.pos += take;
            size -= take;
        }
        Ok(out)
    }

    fn read_exact(&mut self, size: usize) -> Result<Vec<u8>> {
        let slices = self.read_slices(size)?;
        let mut out = Vec::with_capacity(size);
        for s in &slices {
            out.extend_from_slice(s.as_slice());
        }
        Ok(out)
    }

    fn parse_octal(field: &[u8], name: &'static str) -> Result<u64> {
        let text = std::str::from_utf8(field)
            .map_err(|_| UnxipError::malformed(format!("CPIO field '{name}' is not ASCII")))?;
        u64::from_str_radix(text.trim(), 8)
            .map_err(|_| UnxipError::malformed(format!("CPIO field '{name}' is not octal")))
    }

    /// Parse and return the next entry, or `None` once the trailer is read
    /// (or the stream is exhausted — treated the same as a well-formed
    /// empty archive rather than a truncation error, since CPIO doesn't
    /// guarantee a trailer for zero-entry streams).
    pub fn next_entry(&mut self) -> Result<Option<File>> {
        if self.done {
            return Ok(None);
        }
        if !self.fill()? {
            self.done = true;
            return Ok(None);
        }

        let magic = self.read_exact(6)?;
        if &magic[..] != CPIO_MAGIC {
            return Err(UnxipError::malformed("CPIO header missing magic '070707'"));
        }
        let dev = Self::parse_octal(&self.read_exact(6)?, "dev")?;
        let ino = Self::parse_octal(&self.read_exact(6)?, "ino")?;
        let mode = Self::parse_octal(&self.read_exact(6)?, "mode")?;
        let _uid = self.read_exact(6)?;
        let _gid = self.read_exact(6)?;
        let _nlink = self.read_exact(6)?;
        let _rdev = self.read_exact(6)?;
        let _mtime = self.read_exact(11)?;
        let namesize = Self::parse_octal(&self.read_exact(6)?, "namesize")? as usize;
        let filesize = Self::parse_octal(&self.read_exact(11)?, "filesize")? as usize;

        let name_bytes = self.read_exact(namesize)?;
        let name = std::ffi::CStr::from_bytes_with_nul(&name_bytes)
            .map_err(|_| UnxipError::malformed("CPIO entry name missing NUL terminator"))?
            .to_str()
            .map_err(|_| UnxipError::malformed("CPIO entry name is not valid UTF-8"))?
            .to_string();

        let data = self.read_slices(filesize)?;

        if name == TRAILER_NAME {
            self.done = true;
            return Ok(None);
        }

        let mut chunk_refs: Vec<Chunk> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for slice in &data {
            if seen.insert(slice.chunk.id()) {
                chunk_refs.push(slice.chunk.clone());
            }
        }

        Ok(Some(File {
            id: Identifier { dev, ino },
            mode: FileMode(mode as u32),
            name,
            data,
            chunk_refs,
        }))
    }
}

impl<I> Iterator for CpioParser<I>
where
    I: Iterator<Item = Result<Chunk>>,
{
    type Item = Result<File>;
    fn next(&mut self) -> Option<Result<File>> {
        self.next_entry().transpose()
    }
}
