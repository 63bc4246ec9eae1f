//! # TOC Locator (XAR container)
//!
//! Parses just enough of the outer XAR container to find the byte range of
//! the `pbzx` "Content" stream: the 28-byte header, the zlib-compressed
//! table-of-contents XML, and one scalar lookup inside that XML. Everything
//! about XAR beyond that single lookup (signatures, multiple content
//! streams, nested directories in the TOC) is out of scope — this is
//! intentionally a narrow, single-purpose scanner, not a general XML
//! library, matching the spec's framing of the TOC parse as a black box.

use std::io::Read;
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use memmap2::Mmap;
use tracing::debug;

use crate::error::{Result, UnxipError};

const XAR_MAGIC: &[u8; 4] = b"xar!";
const PBZX_MAGIC: &[u8; 4] = b"pbzx";
const XAR_HEADER_LEN: usize = 28;

/// A located byte range of the PBZX payload within the mapped archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PbzxRange {
    pub offset: usize,
    pub length: usize,
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_be_bytes(buf)
}

/// Locate the PBZX stream inside a mapped XAR archive.
pub fn locate_pbzx(map: &Arc<Mmap>) -> Result<PbzxRange> {
    let bytes: &[u8] = map;
    if bytes.len() < XAR_HEADER_LEN || &bytes[0..4] != XAR_MAGIC {
        return Err(UnxipError::malformed("missing 'xar!' magic"));
    }

    let header_size = read_u16(bytes, 4) as usize;
    let version = read_u16(bytes, 6);
    if version != 1 {
        return Err(UnxipError::malformed(format!("unsupported XAR version {version}")));
    }
    let toc_compressed_size = read_u64(bytes, 8) as usize;
    let toc_decompressed_size = read_u64(bytes, 16) as usize;
    let _checksum = read_u32(bytes, 24);

    if header_size < XAR_HEADER_LEN || bytes.len() < header_size + toc_compressed_size {
        return Err(UnxipError::malformed("XAR header/TOC size exceeds archive length"));
    }
    if toc_compressed_size < 2 {
        return Err(UnxipError::malformed("TOC compressed size too small for zlib framing"));
    }

    // The TOC is a standard zlib stream (CMF/FLG header, deflate body,
    // Adler-32 trailer); `ZlibDecoder` consumes it whole.
    let toc_start = header_size;
    let toc_zlib = &bytes[toc_start..toc_start + toc_compressed_size];
    let mut decoder = ZlibDecoder::new(toc_zlib);
    let mut toc_xml = Vec::with_capacity(toc_decompressed_size);
    decoder
        .read_to_end(&mut toc_xml)
        .map_err(|e| UnxipError::decode("zlib", e.to_string()))?;
    if toc_xml.len() != toc_decompressed_size {
        return Err(UnxipError::decode(
            "zlib",
            format!("expected {toc_decompressed_size} decompressed bytes, got {}", toc_xml.len()),
        ));
    }

    let toc_str = std::str::from_utf8(&toc_xml)
        .map_err(|_| UnxipError::malformed("TOC XML is not valid UTF-8"))?;
    let (offset, length) = find_content_entry(toc_str)?;
    debug!(offset, length, "located Content entry in XAR TOC");

    let pbzx_offset = header_size + toc_compressed_size + offset;
    let pbzx_end = pbzx_offset
        .checked_add(length)
        .ok_or_else(|| UnxipError::malformed("Content offset/length overflow"))?;
    if pbzx_end > bytes.len() {
        return Err(UnxipError::malformed("Content range exceeds archive length"));
    }
    if &bytes[pbzx_offset..pbzx_offset + 4] != PBZX_MAGIC {
        return Err(UnxipError::malformed("Content stream does not start with 'pbzx'"));
    }

    Ok(PbzxRange { offset: pbzx_offset, length })
}

/// Find `<file>...<name>Content</name>...<data><offset>N</offset><length>M</length>...`
/// inside the TOC XML. This is a hand-written scalar scanner, not a DOM
/// parser: the TOC's `file` elements are siblings under `xar/toc`, and we
/// only need the offset/length of the one named `Content`.
fn find_content_entry(xml: &str) -> Result<(usize, usize)> {
    for file_block in iter_elements(xml, "file") {
        if element_text(file_block, "name").as_deref() != Some("Content") {
            continue;
        }
        let data_block = inner_element(file_block, "data")
            .ok_or_else(|| UnxipError::malformed("Content file element missing <data>"))?;
        let offset = element_text(data_block, "offset")
            .ok_or_else(|| UnxipError::malformed("Content <data> missing <offset>"))?
            .trim()
            .parse::<usize>()
            .map_err(|_| UnxipError::malformed("Content <offset> is not a decimal integer"))?;
        let length = element_text(data_block, "length")
            .ok_or_else(|| UnxipError::malformed("Content <data> missing <length>"))?
            .trim()
            .parse::<usize>()
            .map_err(|_| UnxipError::malformed("Content <length> is not a decimal integer"))?;
        return Ok((offset, length));
    }
    Err(UnxipError::malformed("TOC has no <file> named 'Content'"))
}

/// Yield the inner text of every top-level occurrence of `<tag ...>...</tag>`
/// in `xml`, handling nested same-named elements by depth-tracking so a
/// `file` element that itself contains `file` children is scanned correctly.
fn iter_elements<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(rel_start) = xml[pos..].find(&open) {
        let start = pos + rel_start;
        let Some(rel_gt) = xml[start..].find('>') else { break };
        let content_start = start + rel_gt + 1;

        let mut depth = 1usize;
        let mut cursor = content_start;
        let content_end = loop {
            let next_open = xml[cursor..].find(&open).map(|i| cursor + i);
            let next_close = xml[cursor..].find(&close).map(|i| cursor + i);
            match (next_open, next_close) {
                (Some(o), Some(c)) if o < c => {
                    depth += 1;
                    cursor = o + open.len();
                }
                (_, Some(c)) => {
                    depth -= 1;
                    if depth == 0 {
                        break c;
                    }
                    cursor = c + close.len();
                }
                _ => return out, // unbalanced; stop rather than loop forever
            }
        };
        out.push(&xml[content_start..content_end]);
        pos = content_end + close.len();
    }
    out
}

/// Return the first direct occurrence of `<tag>text</tag>` inside `xml`.
fn element_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(&xml[start..end])
}

/// Return the first `<tag>...</tag>` block's raw inner contents (tags and all).
fn inner_element<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    iter_elements(xml, tag).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zlib_compress(data: &[u8]) -> Vec<u8> {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn build_xar(toc_xml: &str, content: &[u8]) -> Vec<u8> {
        let toc_compressed = zlib_compress(toc_xml.as_bytes());
        let mut out = Vec::new();
        out.extend_from_slice(XAR_MAGIC);
        out.extend_from_slice(&(XAR_HEADER_LEN as u16).to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&(toc_compressed.len() as u64).to_be_bytes());
        out.extend_from_slice(&(toc_xml.len() as u64).to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&toc_compressed);
        out.extend_from_slice(content);
        out
    }

    fn mmap_of(bytes: Vec<u8>) -> Arc<Mmap> {
        let mut f = tempfile::tempfile().unwrap();
        use std::io::Write as _;
        f.write_all(&bytes).unwrap();
        Arc::new(unsafe { Mmap::map(&f).unwrap() })
    }

    #[test]
    fn locates_pbzx_content_stream() {
        let pbzx_payload = b"pbzx-fake-payload";
        let toc = format!(
            "<xar><toc><file><name>Content</name><data><offset>0</offset><length>{}</length></data></file></toc></xar>",
            pbzx_payload.len()
        );
        let archive = build_xar(&toc, pbzx_payload);
        let map = mmap_of(archive);
        let range = locate_pbzx(&map).unwrap();
        assert_eq!(range.length, pbzx_payload.len());
        assert_eq!(&map[range.offset..range.offset + 4], b"pbzx");
    }

    #[test]
    fn rejects_bad_magic() {
        let map = mmap_of(vec![0u8; 32]);
        assert!(locate_pbzx(&map).is_err());
    }

    #[test]
    fn rejects_missing_content_entry() {
        let toc = "<xar><toc><file><name>Other</name><data><offset>0</offset><length>1</length></data></file></toc></xar>";
        let archive = build_xar(toc, b"p");
        let map = mmap_of(archive);
        assert!(locate_pbzx(&map).is_err());
    }

    #[test]
    fn iter_elements_handles_multiple_siblings() {
        let xml = "<toc><file><name>A</name></file><file><name>B</name></file></toc>";
        let files = iter_elements(xml, "file");
        assert_eq!(files.len(), 2);
        assert_eq!(element_text(files[0], "name"), Some("A"));
        assert_eq!(element_text(files[1], "name"), Some("B"));
    }
}
