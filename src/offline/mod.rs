use std::io::{Cursor, Read, Write};

use log::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::config::ManagerConfig;
use crate::error::{ManagerError, Result};

pub mod rewrite;

pub use rewrite::{ConfigRewriter, Rewrite, TextEncoding};

/// Local file header signature every zip starts with.
const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// What a patch pass found across every nested archive of a package.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub nested_archives: usize,
    pub targets_found: usize,
    pub files_modified: usize,
}

impl PatchReport {
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.files_modified > 0
    }
}

#[derive(Clone, Debug)]
pub struct PatchedArchive {
    pub bytes: Vec<u8>,
    pub report: PatchReport,
}

struct NestedOutcome {
    bytes: Vec<u8>,
    targets_found: usize,
    files_modified: usize,
}

/// Rewrites configuration files that live inside the zip payloads of an outer package.
#[derive(Clone, Debug)]
pub struct NestedArchivePatcher {
    target_suffix: String,
    nested_extension: String,
    rewriter: ConfigRewriter,
}

impl NestedArchivePatcher {
    pub fn new(target_suffix: &str, nested_extension: &str, rewriter: ConfigRewriter) -> Self {
        Self {
            target_suffix: normalize_path(target_suffix),
            nested_extension: nested_extension.to_lowercase(),
            rewriter,
        }
    }

    pub fn from_config(config: &ManagerConfig) -> Self {
        Self::new(
            &config.config_suffix,
            &config.payload_extension,
            ConfigRewriter::new(&config.offline_keywords),
        )
    }

    /// Patch every nested archive of `outer`. Entries that cannot be processed are kept
    /// as they were; only an outer buffer that is not a zip at all is an error.
    pub fn patch(&self, outer: &[u8]) -> Result<PatchedArchive> {
        let mut archive = ZipArchive::new(Cursor::new(outer))
            .map_err(|e| ManagerError::Parse(format!("package is not a valid zip: {e}")))?;
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let mut report = PatchReport::default();

        for index in 0..archive.len() {
            let replacement = match self.patched_entry(&mut archive, index, &mut report) {
                Ok(replacement) => replacement,
                Err(err) => {
                    warn!("offline: failed to process outer entry #{index}: {err}");
                    None
                }
            };
            let written = match replacement {
                Some((name, options, bytes)) => write_entry(&mut writer, name, options, &bytes),
                None => archive
                    .by_index_raw(index)
                    .and_then(|entry| writer.raw_copy_file(entry))
                    .map_err(ManagerError::from),
            };
            if let Err(err) = written {
                warn!("offline: dropping outer entry #{index}: {err}");
            }
        }

        let bytes = writer.finish()?.into_inner();
        if report.targets_found == 0 {
            warn!(
                "offline: no {} found in any nested archive",
                self.target_suffix
            );
        } else {
            info!(
                "offline: {} config file(s) found, {} modified",
                report.targets_found, report.files_modified
            );
        }
        Ok(PatchedArchive { bytes, report })
    }

    fn patched_entry(
        &self,
        archive: &mut ZipArchive<Cursor<&[u8]>>,
        index: usize,
        report: &mut PatchReport,
    ) -> Result<Option<(String, SimpleFileOptions, Vec<u8>)>> {
        let mut entry = archive.by_index(index)?;
        if !entry.is_file() || !self.is_nested_archive(entry.name()) {
            return Ok(None);
        }
        let name = entry.name().to_owned();
        let options = entry_options(entry.compression(), entry.last_modified(), entry.unix_mode());
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| ManagerError::Parse(format!("failed to read {name}: {e}")))?;

        debug!("offline: processing {name}");
        Ok(self
            .patch_nested(&name, &data, report)
            .map(|bytes| (name, options, bytes)))
    }

    /// New bytes for a nested archive, or `None` to keep the original untouched.
    fn patch_nested(&self, name: &str, data: &[u8], report: &mut PatchReport) -> Option<Vec<u8>> {
        if data.len() <= ZIP_MAGIC.len() || !data.starts_with(ZIP_MAGIC) {
            info!("offline: {name} is not a zip (magic bytes mismatch), keeping as-is");
            return None;
        }
        match self.rebuild_nested(data) {
            Ok(outcome) => {
                report.nested_archives += 1;
                report.targets_found += outcome.targets_found;
                report.files_modified += outcome.files_modified;
                (outcome.files_modified > 0).then_some(outcome.bytes)
            }
            Err(err) => {
                warn!("offline: {name} nested content is not a valid zip: {err}");
                None
            }
        }
    }

    fn rebuild_nested(&self, data: &[u8]) -> Result<NestedOutcome> {
        let mut archive = ZipArchive::new(Cursor::new(data))?;
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let mut targets_found = 0;
        let mut files_modified = 0;

        for index in 0..archive.len() {
            let rewritten = {
                let mut entry = archive.by_index(index)?;
                if entry.is_file() && self.matches_target(entry.name()) {
                    targets_found += 1;
                    let name = entry.name().to_owned();
                    info!("offline: found config at {name}");
                    let mut original = Vec::new();
                    entry
                        .read_to_end(&mut original)
                        .map_err(|e| ManagerError::Parse(format!("failed to read {name}: {e}")))?;
                    let rewrite = self.rewriter.rewrite(&original);
                    if rewrite.is_modified() {
                        files_modified += 1;
                        info!(
                            "offline: modified {name} ({} -> {} bytes, {} line(s))",
                            original.len(),
                            rewrite.bytes.len(),
                            rewrite.changed_lines
                        );
                        let options = entry_options(
                            entry.compression(),
                            entry.last_modified(),
                            entry.unix_mode(),
                        );
                        Some((name, options, rewrite.bytes))
                    } else {
                        None
                    }
                } else {
                    None
                }
            };
            match rewritten {
                Some((name, options, bytes)) => write_entry(&mut writer, name, options, &bytes)?,
                None => writer.raw_copy_file(archive.by_index_raw(index)?)?,
            }
        }

        Ok(NestedOutcome {
            bytes: writer.finish()?.into_inner(),
            targets_found,
            files_modified,
        })
    }

    fn is_nested_archive(&self, name: &str) -> bool {
        name.to_lowercase().ends_with(&self.nested_extension)
    }

    fn matches_target(&self, name: &str) -> bool {
        normalize_path(name).ends_with(&self.target_suffix)
    }
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").to_lowercase()
}

fn entry_options(
    compression: CompressionMethod,
    modified: Option<DateTime>,
    unix_mode: Option<u32>,
) -> SimpleFileOptions {
    let mut options = SimpleFileOptions::default().compression_method(compression);
    if let Some(modified) = modified {
        options = options.last_modified_time(modified);
    }
    if let Some(mode) = unix_mode {
        options = options.unix_permissions(mode);
    }
    options
}

fn write_entry(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    name: String,
    options: SimpleFileOptions,
    bytes: &[u8],
) -> Result<()> {
    writer.start_file(name.as_str(), options)?;
    writer
        .write_all(bytes)
        .map_err(|e| ManagerError::Parse(format!("failed to write {name}: {e}")))
}
