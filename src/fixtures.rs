//! Archive builders shared by unit tests.

use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const GAME_CFG: &[u8] =
    b"// startup\r\nWaypointEnabled = 1\r\nSkipWaypointLogin=true\r\nEnableSkirmish = 1\r\n";

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Outer mod package: one nested `.pkg` holding `game.cfg` plus an unrelated file, and a
/// manifest next to it.
pub fn mod_package(cfg: &[u8]) -> Vec<u8> {
    let pkg = zip_bytes(&[
        ("data/startup/game.cfg", cfg),
        ("data/units/marine.xml", b"<unit name=\"marine\"/>"),
    ]);
    zip_bytes(&[
        ("NuphillionMod.pkg", &pkg[..]),
        ("1_11_2931_2_file_manifest.xml", b"<fileManifest/>"),
    ])
}

pub fn read_entry(archive: &[u8], name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(Cursor::new(archive)).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut out = Vec::new();
    entry.read_to_end(&mut out).unwrap();
    out
}

pub fn entry_names(archive: &[u8]) -> Vec<String> {
    let archive = ZipArchive::new(Cursor::new(archive)).unwrap();
    archive.file_names().map(str::to_owned).collect()
}
