//! # Chunk Decoder (PBZX)
//!
//! Splits a PBZX byte range into its framed chunks and submits each to an
//! [`OrderedQueue`] for (possibly parallel) LZMA decoding, returning an
//! iterator that yields [`Chunk`]s in archive order. Stored (uncompressed)
//! chunks are returned zero-copy, borrowed straight from the memory map.

use std::io::Read;
use std::sync::Arc;

use memmap2::Mmap;
use tracing::trace;
use xz2::read::XzDecoder;

use crate::chunk::Chunk;
use crate::error::{Result, UnxipError};
use crate::ordered_queue::{OrderedQueue, OrderedQueueIter};
use crate::xar::PbzxRange;

const PBZX_MAGIC: &[u8; 4] = b"pbzx";
const LZMA_ALONE_MAGIC: [u8; 4] = [0xFD, b'7', b'z', b'X'];

fn read_u64_be(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_be_bytes(buf)
}

struct Record {
    flags: u64,
    decompressed_size: u64,
    compressed_size: u64,
    payload_start: usize,
}

/// Walk the PBZX framing and collect every chunk record's bounds. Fatal
/// framing errors (truncated header, size fields running past the end of
/// the range) surface immediately rather than lazily mid-decode, so the
/// driver can fail fast before spinning up worker threads.
fn scan_records(map: &Mmap, range: PbzxRange) -> Result<Vec<Record>> {
    let bytes = &map[range.offset..range.offset + range.length];
    if bytes.len() < 12 || &bytes[0..4] != PBZX_MAGIC {
        return Err(UnxipError::malformed("PBZX stream missing magic"));
    }
    let flags = read_u64_be(bytes, 4);

    let mut records = Vec::new();
    let mut pos = 12usize;
    loop {
        if pos + 16 > bytes.len() {
            return Err(UnxipError::malformed("PBZX chunk header truncated"));
        }
        let decompressed_size = read_u64_be(bytes, pos);
        let compressed_size = read_u64_be(bytes, pos + 8);
        pos += 16;
        if pos + compressed_size as usize > bytes.len() {
            return Err(UnxipError::malformed("PBZX chunk payload exceeds stream length"));
        }
        records.push(Record {
            flags,
            decompressed_size,
            compressed_size,
            payload_start: range.offset + pos,
        });
        pos += compressed_size as usize;
        if decompressed_size != flags {
            break; // short chunk terminates the stream
        }
        if pos >= bytes.len() {
            break;
        }
    }
    Ok(records)
}

fn decode_record(map: &Arc<Mmap>, record: &Record) -> Result<Chunk> {
    let payload = &map[record.payload_start..record.payload_start + record.compressed_size as usize];

    // Stored uncompressed: compressed_size == flags (the reference chunk
    // size). Borrow straight from the memory map, zero-copy.
    if record.compressed_size == record.flags {
        return Ok(Chunk::borrowed(map.clone(), record.payload_start, record.compressed_size as usize));
    }

    if payload.len() < 4 || payload[0..4] != LZMA_ALONE_MAGIC {
        return Err(UnxipError::malformed("LZMA chunk missing 0xFD '7zX' magic"));
    }

    let mut decoder = XzDecoder::new(payload);
    let mut out = Vec::with_capacity(record.decompressed_size as usize);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| UnxipError::decode("lzma", e.to_string()))?;
    if out.len() as u64 != record.decompressed_size {
        return Err(UnxipError::decode(
            "lzma",
            format!("expected {} decompressed bytes, got {}", record.decompressed_size, out.len()),
        ));
    }
    trace!(len = out.len(), "decoded LZMA chunk");
    Ok(Chunk::owned(out))
}

/// Decode every PBZX chunk in `range`, in parallel, yielding them through an
/// order-preserving iterator. `batch_size` bounds how many chunks may be
/// mid-decode at once.
///
/// Submission runs on a dedicated producer thread rather than up front:
/// real archives carry far more chunks than `batch_size`, and `submit`
/// blocks once that many results are outstanding-but-unread. Submitting
/// everything before the caller ever calls `recv` (by draining this
/// function's returned iterator) would block forever past the first
/// `batch_size` chunks, so the submit loop has to run concurrently with —
/// not before — the caller's consumption of the iterator.
pub fn decode_chunks(
    map: Arc<Mmap>,
    range: PbzxRange,
    batch_size: usize,
) -> Result<OrderedQueueIter<Result<Chunk>>> {
    let records = scan_records(&map, range)?;
    let queue: OrderedQueue<Result<Chunk>> = OrderedQueue::new(batch_size);
    let producer = queue.clone();
    std::thread::spawn(move || {
        for record in records {
            let map = map.clone();
            producer.submit(move || decode_record(&map, &record));
        }
        producer.finish();
    });
    Ok(queue.into_iter())
}
