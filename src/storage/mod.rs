use std::collections::BTreeMap;
use std::fs as std_fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::fs;
use zip::ZipArchive;

use crate::engine::models::{CacheRecord, RemoteInfo};
use crate::error::{ManagerError, Result};
use crate::util::{atomic_write, sha256_hex};

const CACHE_FILE: &str = "mod_cache.json";

/// Asset records plus the cached archives they describe, all under one directory.
#[derive(Clone, Debug)]
pub struct CacheStore {
    cache_dir: PathBuf,
    records: BTreeMap<String, CacheRecord>,
}

impl CacheStore {
    pub fn open(cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        // Best-effort directory creation; failures are surfaced on write.
        let _ = std_fs::create_dir_all(&cache_dir);
        let records = load_records(&cache_dir.join(CACHE_FILE));
        debug!(
            "cache: opened {} with {} record(s)",
            cache_dir.display(),
            records.len()
        );
        Self { cache_dir, records }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE)
    }

    pub fn cached_file_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{name}.zip"))
    }

    pub fn offline_file_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{name}_offline.zip"))
    }

    pub fn record(&self, name: &str) -> Option<&CacheRecord> {
        self.records.get(name)
    }

    /// Re-read `mod_cache.json`, discarding in-memory records.
    pub fn reload(&mut self) {
        self.records = load_records(&self.metadata_path());
    }

    pub fn save(&self) -> Result<()> {
        let body = serde_json::to_vec_pretty(&self.records)?;
        atomic_write(&self.metadata_path(), &body)
    }

    /// Decide whether `name` must be downloaded again given what the remote reports.
    pub fn is_update_available(&self, name: &str, remote: Option<&RemoteInfo>) -> bool {
        let Some(record) = self.records.get(name) else {
            debug!("cache: {name} has never been cached");
            return true;
        };
        let Some(remote_sig) = remote.and_then(|r| r.signature.as_ref()) else {
            let present = self.cached_file_path(name).exists();
            debug!("cache: no remote signature for {name}; cached file present={present}");
            return !present;
        };
        match &record.signature {
            None => true,
            Some(cached_sig) if cached_sig != remote_sig => {
                info!(
                    "cache: {name} changed remotely (tag {} -> {})",
                    cached_sig.tag, remote_sig.tag
                );
                true
            }
            Some(_) => false,
        }
    }

    /// Record the remote state `name` was downloaded at. Without a signature there is
    /// nothing to compare against later, so nothing is stored. Returns whether a record
    /// was written.
    pub fn update_cache(
        &mut self,
        name: &str,
        remote: Option<&RemoteInfo>,
        sha256: &str,
    ) -> Result<bool> {
        let Some(remote) = remote.filter(|r| r.signature.is_some()) else {
            debug!("cache: skipping metadata update for {name}; no signature");
            return Ok(false);
        };
        self.records.insert(
            name.to_owned(),
            CacheRecord {
                tag: remote.tag.clone(),
                published_at: remote.published_at.clone(),
                download_url: remote.download_url.clone(),
                signature: remote.signature.clone(),
                sha256: Some(sha256.to_owned()),
                cached_at: Some(Utc::now().to_rfc3339()),
            },
        );
        self.save()?;
        Ok(true)
    }

    /// Forget the remote signature of `name` after it was re-downloaded without one, and
    /// point its digest at the new bytes. The next signed remote forces a refresh. Returns
    /// whether a record existed.
    pub fn drop_signature(&mut self, name: &str, sha256: &str) -> Result<bool> {
        let Some(record) = self.records.get_mut(name) else {
            return Ok(false);
        };
        record.tag = None;
        record.published_at = None;
        record.signature = None;
        record.sha256 = Some(sha256.to_owned());
        record.cached_at = Some(Utc::now().to_rfc3339());
        self.save()?;
        Ok(true)
    }

    pub fn remove_record(&mut self, name: &str) -> Result<bool> {
        if self.records.remove(name).is_none() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Delete every `{name}*.zip` in the cache directory, sparing the current archive when
    /// `keep_current` is set. Returns how many files were removed.
    pub fn cleanup_old_versions(&self, name: &str, keep_current: bool) -> usize {
        let current = self.cached_file_path(name);
        let entries = match std_fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    "cache: cannot list {} for cleanup: {err}",
                    self.cache_dir.display()
                );
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if !file_name.starts_with(name) || !file_name.ends_with(".zip") || !path.is_file() {
                continue;
            }
            if keep_current && path == current {
                continue;
            }
            match std_fs::remove_file(&path) {
                Ok(()) => {
                    info!("cache: removed {}", path.display());
                    removed += 1;
                }
                Err(err) => warn!("cache: failed to remove {}: {err}", path.display()),
            }
        }
        removed
    }

    pub async fn write_cached_file(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.cached_file_path(name);
        write_file_atomically(path.clone(), bytes).await?;
        Ok(path)
    }

    pub async fn read_cached_file(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.cached_file_path(name);
        fs::read(&path).await.map_err(|e| ManagerError::io(&path, e))
    }

    pub async fn write_offline_file(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.offline_file_path(name);
        write_file_atomically(path.clone(), bytes).await?;
        Ok(path)
    }

    /// The offline variant of `name`, if one has been generated and still opens as an
    /// archive. A corrupt variant is deleted so it gets regenerated.
    pub async fn read_offline_file(&self, name: &str) -> Option<Vec<u8>> {
        let path = self.offline_file_path(name);
        let bytes = fs::read(&path).await.ok()?;
        if let Err(err) = ZipArchive::new(Cursor::new(&bytes[..])) {
            warn!("cache: discarding unreadable {}: {err}", path.display());
            if let Err(err) = fs::remove_file(&path).await {
                warn!("cache: failed to remove {}: {err}", path.display());
            }
            return None;
        }
        Some(bytes)
    }

    /// Check cached bytes against the digest recorded when they were stored. Records
    /// without a digest accept any bytes.
    pub fn verify_cached_file(&self, name: &str, bytes: &[u8]) -> bool {
        match self.records.get(name).and_then(|r| r.sha256.as_deref()) {
            Some(expected) => {
                let actual = sha256_hex(bytes);
                if actual != expected {
                    warn!("cache: {name} digest mismatch (expected {expected}, got {actual})");
                    return false;
                }
                true
            }
            None => true,
        }
    }
}

/// Parse `mod_cache.json`, dropping any entry that does not describe a record. A missing or
/// unreadable file is an empty cache.
fn load_records(path: &Path) -> BTreeMap<String, CacheRecord> {
    let bytes = match std_fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(err) => {
            warn!("cache: {}", ManagerError::io(path, err));
            return BTreeMap::new();
        }
    };
    let entries = match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(entries)) => entries,
        Ok(_) => {
            let err = ManagerError::CacheCorruption("top level is not an object".into());
            warn!("cache: {err}; starting empty");
            return BTreeMap::new();
        }
        Err(err) => {
            let err = ManagerError::CacheCorruption(err.to_string());
            warn!("cache: {err}; starting empty");
            return BTreeMap::new();
        }
    };

    entries
        .into_iter()
        .filter_map(
            |(name, value)| match serde_json::from_value::<CacheRecord>(value) {
                Ok(record) => Some((name, record)),
                Err(err) => {
                    warn!("cache: dropping malformed record {name}: {err}");
                    None
                }
            },
        )
        .collect()
}

async fn write_file_atomically(path: PathBuf, data: &[u8]) -> Result<()> {
    let data = data.to_vec();
    tokio::task::spawn_blocking(move || atomic_write(&path, &data)).await?
}
