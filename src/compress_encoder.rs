//! # Compression Encoder
//!
//! Splits a file's payload into 64 KiB blocks and LZFSE-encodes each one in
//! parallel through an [`OrderedQueue`], then lays the encoded blocks out
//! the way HFS+/APFS decmpfs resource forks expect: a little-endian offset
//! table followed by the blocks themselves. If any block doesn't compress,
//! or the whole encoding isn't smaller than the input, this signals "not
//! worth compressing" rather than erroring — compression failure here is a
//! normal outcome, not a fault.

use crate::ordered_queue::OrderedQueue;

const BLOCK_SIZE: usize = 64 * 1024;

/// Encode `src` into a decmpfs resource-fork blob, or `None` if compressing
/// it isn't worthwhile (a block didn't compress, or the encoded form isn't
/// smaller than `src`).
pub fn encode_resource_fork(src: &[u8]) -> Option<Vec<u8>> {
    if src.is_empty() {
        return None;
    }

    // Blocks are copied up front so the producer thread below doesn't need
    // to borrow `src` across a non-'static boundary.
    let blocks: Vec<Vec<u8>> = src.chunks(BLOCK_SIZE).map(|b| b.to_vec()).collect();
    let block_count = blocks.len();
    let queue: OrderedQueue<Option<Vec<u8>>> = OrderedQueue::new(num_cpus::get().max(1));
    let producer = queue.clone();
    std::thread::spawn(move || {
        for block in blocks {
            producer.submit(move || encode_block(&block));
        }
        producer.finish();
    });

    // Drain the whole iterator unconditionally (rather than bailing on the
    // first `None`) so the producer thread above always runs to completion
    // instead of blocking forever on a consumer that stopped pulling.
    let mut encoded = Vec::with_capacity(block_count);
    let mut all_compressed = true;
    for result in queue.into_iter() {
        match result {
            Some(bytes) => encoded.push(bytes),
            None => all_compressed = false,
        }
    }
    if !all_compressed {
        return None;
    }

    let table_size = (encoded.len() + 1) * 4;
    let total_size = table_size + encoded.iter().map(Vec::len).sum::<usize>();
    if total_size >= src.len() {
        return None;
    }

    let mut out = Vec::with_capacity(total_size);
    let mut offset = table_size as u32;
    out.extend_from_slice(&offset.to_le_bytes());
    for block in &encoded {
        offset += block.len() as u32;
        out.extend_from_slice(&offset.to_le_bytes());
    }
    for block in &encoded {
        out.extend_from_slice(block);
    }
    Some(out)
}

/// Encode one block; `None` signals LZFSE gave up (encoded size did not
/// beat the `block_len + block_len/16` scratch buffer the spec allots it).
fn encode_block(block: &[u8]) -> Option<Vec<u8>> {
    let budget = block.len() + block.len() / 16;
    let encoded = lzfse::encode_bytes(block);
    if encoded.len() >= budget {
        None
    } else {
        Some(encoded)
    }
}
