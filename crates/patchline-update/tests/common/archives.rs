//! Builders for update archives

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Zip archive holding `entries` as (name, content) pairs
pub fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }

    writer.finish().unwrap().into_inner()
}

/// Gzipped tarball holding `entries` as (name, content) pairs
pub fn tar_gz_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, *data).unwrap();
    }

    builder.into_inner().unwrap().finish().unwrap()
}

/// A zip cut in half: the local header survives, the central directory
/// does not
pub fn truncated_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut bytes = zip_archive(entries);
    bytes.truncate(bytes.len() / 2);
    bytes
}

/// The standard new payload: a readme, one plugin and a shipped load order
pub fn new_payload() -> Vec<u8> {
    zip_archive(&[
        ("readme.txt", b"new payload"),
        ("plugins/New.esp", b"plugin bytes"),
        ("load_order.txt", b"New.esp\r\nExtra.esp\r\n"),
    ])
}

/// A payload with `count` small files, used to keep extraction busy
pub fn many_entries_payload(count: usize) -> Vec<u8> {
    let names: Vec<String> = (0..count).map(|i| format!("data/file_{:04}.bin", i)).collect();
    let content = vec![0x5au8; 8 * 1024];
    let entries: Vec<(&str, &[u8])> = names
        .iter()
        .map(|name| (name.as_str(), content.as_slice()))
        .collect();
    zip_archive(&entries)
}

/// A stored (uncompressed) zip whose entry data no longer matches its CRC
pub fn crc_broken_zip() -> Vec<u8> {
    let content = b"payload bytes that will be damaged";
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    writer.start_file("damaged.txt", options).unwrap();
    writer.write_all(content).unwrap();
    let mut bytes = writer.finish().unwrap().into_inner();

    let offset = bytes
        .windows(content.len())
        .position(|window| window == content)
        .unwrap();
    bytes[offset] ^= 0xff;
    bytes
}
