//! End-to-end CLI tests: build a tiny synthetic `.xip` archive and drive
//! the real binary against it, instead of calling library internals.

use assert_cmd::Command;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;

const XAR_MAGIC: &[u8; 4] = b"xar!";
const PBZX_MAGIC: &[u8; 4] = b"pbzx";
const CPIO_MAGIC: &[u8; 6] = b"070707";

fn octal(value: u64, width: usize) -> Vec<u8> {
    format!("{:0>width$o}", value, width = width).into_bytes()
}

fn cpio_entry(dev: u64, ino: u64, mode: u64, name: &str, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(CPIO_MAGIC);
    out.extend_from_slice(&octal(dev, 6));
    out.extend_from_slice(&octal(ino, 6));
    out.extend_from_slice(&octal(mode, 6));
    out.extend_from_slice(&octal(0, 6)); // uid
    out.extend_from_slice(&octal(0, 6)); // gid
    out.extend_from_slice(&octal(1, 6)); // nlink
    out.extend_from_slice(&octal(0, 6)); // rdev
    out.extend_from_slice(&octal(0, 11)); // mtime
    let name_nul = format!("{name}\0");
    out.extend_from_slice(&octal(name_nul.len() as u64, 6));
    out.extend_from_slice(&octal(data.len() as u64, 11));
    out.extend_from_slice(name_nul.as_bytes());
    out.extend_from_slice(data);
    out
}

fn cpio_stream(entries: &[(u64, u64, u64, &str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (dev, ino, mode, name, data) in entries {
        out.extend(cpio_entry(*dev, *ino, *mode, name, data));
    }
    out.extend(cpio_entry(0, 0, 0, "TRAILER!!!", &[]));
    out
}

fn pbzx_stream(cpio: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(PBZX_MAGIC);
    out.extend_from_slice(&(cpio.len() as u64).to_be_bytes()); // flags
    out.extend_from_slice(&(cpio.len() as u64).to_be_bytes()); // decompressed_size
    out.extend_from_slice(&(cpio.len() as u64).to_be_bytes()); // compressed_size == flags: stored
    out.extend_from_slice(cpio);
    out
}

fn write_xip(path: &Path, cpio: &[u8]) {
    let pbzx = pbzx_stream(cpio);
    let toc = format!(
        "<xar><toc><file><name>Content</name><data><offset>0</offset><length>{}</length></data></file></toc></xar>",
        pbzx.len()
    );
    let mut toc_compressed = Vec::new();
    {
        let mut enc = ZlibEncoder::new(&mut toc_compressed, Compression::default());
        enc.write_all(toc.as_bytes()).unwrap();
        enc.finish().unwrap();
    }

    let mut out = Vec::new();
    out.extend_from_slice(XAR_MAGIC);
    out.extend_from_slice(&28u16.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&(toc_compressed.len() as u64).to_be_bytes());
    out.extend_from_slice(&(toc.len() as u64).to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&toc_compressed);
    out.extend_from_slice(&pbzx);

    std::fs::write(path, out).unwrap();
}

#[test]
fn extracts_into_explicit_output_directory() {
    let dir = tempfile::tempdir().unwrap();
    let archive_path = dir.path().join("sample.xip");
    write_xip(
        &archive_path,
        &cpio_stream(&[
            (0, 0, 0o040755, ".", b""),
            (1, 1, 0o040755, "payload", b""),
            (1, 2, 0o100644, "payload/readme.txt", b"hello from xip"),
        ]),
    );
    let out_dir = dir.path().join("out");

    Command::cargo_bin("unxip")
        .unwrap()
        .arg(&archive_path)
        .arg(&out_dir)
        .arg("--no-compress")
        .assert()
        .success()
        .stderr(predicate::str::contains("1 file(s)"));

    assert_eq!(
        std::fs::read(out_dir.join("payload/readme.txt")).unwrap(),
        b"hello from xip"
    );
}

#[test]
fn default_output_directory_is_archive_stem() {
    let dir = tempfile::tempdir().unwrap();
    let archive_path = dir.path().join("MyApp.xip");
    write_xip(&archive_path, &cpio_stream(&[(0, 0, 0o040755, ".", b"")]));

    let cwd = tempfile::tempdir().unwrap();
    Command::cargo_bin("unxip")
        .unwrap()
        .current_dir(cwd.path())
        .arg(&archive_path)
        .arg("--no-compress")
        .assert()
        .success();

    assert!(cwd.path().join("MyApp").is_dir());
}

#[test]
fn dry_run_reports_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let archive_path = dir.path().join("sample.xip");
    write_xip(
        &archive_path,
        &cpio_stream(&[(0, 0, 0o040755, ".", b""), (1, 1, 0o100644, "file.bin", b"data")]),
    );
    let out_dir = dir.path().join("out");

    Command::cargo_bin("unxip")
        .unwrap()
        .arg(&archive_path)
        .arg(&out_dir)
        .arg("--dry-run")
        .assert()
        .success()
        .stderr(predicate::str::contains("1 file(s)"));

    assert!(!out_dir.exists() || std::fs::read_dir(&out_dir).unwrap().next().is_none());
}

#[test]
fn malformed_archive_exits_nonzero_with_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let archive_path = dir.path().join("bad.xip");
    std::fs::write(&archive_path, b"definitely not a xar archive").unwrap();

    Command::cargo_bin("unxip")
        .unwrap()
        .arg(&archive_path)
        .arg(dir.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("bad.xip"));
}

#[test]
fn hardlink_after_siblings_produces_same_inode() {
    let dir = tempfile::tempdir().unwrap();
    let archive_path = dir.path().join("links.xip");
    write_xip(
        &archive_path,
        &cpio_stream(&[
            (0, 0, 0o040755, ".", b""),
            (1, 1, 0o040755, "a", b""),
            (1, 7, 0o100644, "a/file", b"shared content"),
            (1, 9, 0o100644, "a/x", b"x"),
            (1, 10, 0o100644, "a/y", b"y"),
            (1, 7, 0o100644, "a/link", b"shared content"),
        ]),
    );
    let out_dir = dir.path().join("out");

    Command::cargo_bin("unxip")
        .unwrap()
        .arg(&archive_path)
        .arg(&out_dir)
        .arg("--no-compress")
        .assert()
        .success();

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let a = std::fs::metadata(out_dir.join("a/file")).unwrap();
        let b = std::fs::metadata(out_dir.join("a/link")).unwrap();
        assert_eq!(a.ino(), b.ino());
    }
}
