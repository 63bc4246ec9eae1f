//! Zero-copy PBZX chunk buffers.
//!
//! A [`Chunk`] is either a borrow into the memory-mapped archive (the PBZX
//! record was stored uncompressed, so releasing it costs nothing) or a
//! heap buffer the LZMA decoder allocated. Both branches share one
//! reference-counted handle so `File` records from `cpio` can retain
//! whichever chunks their payload slices land in without the two cases
//! needing separate code paths downstream.

use std::sync::Arc;

use memmap2::Mmap;

enum Storage {
    /// A sub-range of the memory-mapped archive; the map itself keeps it alive.
    Borrowed { map: Arc<Mmap>, start: usize, len: usize },
    /// A heap buffer produced by LZMA decoding.
    Owned(Vec<u8>),
}

/// A single decoded PBZX chunk, shared by every `File` whose payload falls
/// inside it. Cloning is `Arc`-cheap; the backing bytes are freed once the
/// last clone (and the last `File::chunk_refs` entry referencing it) drops.
#[derive(Clone)]
pub struct Chunk(Arc<Storage>);

impl Chunk {
    /// Wrap a sub-range of the memory map. Costs nothing to release.
    pub fn borrowed(map: Arc<Mmap>, start: usize, len: usize) -> Self {
        assert!(start + len <= map.len(), "chunk range out of bounds");
        Chunk(Arc::new(Storage::Borrowed { map, start, len }))
    }

    /// Wrap a freshly decoded, heap-owned buffer.
    pub fn owned(bytes: Vec<u8>) -> Self {
        Chunk(Arc::new(Storage::Owned(bytes)))
    }

    /// Whether this chunk's bytes were heap-allocated by the decoder
    /// (as opposed to borrowed straight from the memory map).
    pub fn is_owned(&self) -> bool {
        matches!(*self.0, Storage::Owned(_))
    }

    pub fn as_slice(&self) -> &[u8] {
        match &*self.0 {
            Storage::Borrowed { map, start, len } => &map[*start..*start + *len],
            Storage::Owned(v) => v,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identity of the backing allocation, used so `File::chunk_refs` can
    /// dedupe without comparing bytes.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

/// A zero-copy view into one chunk's bytes: `[start, start+len)` of that
/// chunk's slice. A `File`'s payload is an ordered sequence of these.
#[derive(Clone)]
pub struct ChunkSlice {
    pub chunk: Chunk,
    pub start: usize,
    pub len: usize,
}

impl ChunkSlice {
    pub fn as_slice(&self) -> &[u8] {
        &self.chunk.as_slice()[self.start..self.start + self.len]
    }
}
