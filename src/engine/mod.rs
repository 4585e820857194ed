use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::{MOD_ASSET, ManagerConfig, ORIGINAL_FILES_ASSET};
use crate::engine::models::{Asset, CacheRecord};
use crate::engine::state::{Acquired, InstallMode, InstallStatus};
use crate::error::{ManagerError, Result};
use crate::install::InstallTarget;
use crate::networking::{Fetched, Fetcher};
use crate::offline::NestedArchivePatcher;
use crate::releases::ReleaseResolver;
use crate::storage::CacheStore;
use crate::util::{ACQUIRED_PERCENT, ProgressCallback, cancel_requested, sha256_hex};

pub mod models;
pub mod state;

const INSTALL_DONE: &str = "Mod installation complete!";
const RESTORE_DONE: &str = "Original files restored successfully!";
const OFFLINE_QUALIFIER: &str = " (Offline mode)";
const OFFLINE_SKIPPED_QUALIFIER: &str = " (Offline patch not applied)";
const CACHED_QUALIFIER: &str = " (Used cached version)";

/// Archive bytes for an operation and where they came from.
struct Acquisition {
    bytes: Vec<u8>,
    source: Acquired,
}

/// Owns the cache, the fetcher, and the install target; runs one operation at a time.
pub struct ModManager {
    config: ManagerConfig,
    fetcher: Arc<dyn Fetcher>,
    resolver: ReleaseResolver,
    patcher: NestedArchivePatcher,
    cache: Arc<Mutex<CacheStore>>,
    cancel_flag: Arc<AtomicBool>,
}

impl ModManager {
    pub fn new(config: ManagerConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let resolver =
            ReleaseResolver::new(fetcher.clone(), &config.api_base, &config.rolling_tags);
        let patcher = NestedArchivePatcher::from_config(&config);
        let cache = CacheStore::open(&config.cache_dir);
        Self {
            config,
            fetcher,
            resolver,
            patcher,
            cache: Arc::new(Mutex::new(cache)),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Ask the running operation to stop at its next chunk boundary.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
        warn!("manager: cancellation requested");
    }

    pub async fn install_mod(&self, mode: InstallMode, progress: ProgressCallback) -> String {
        let cache = self.begin_operation().await;
        info!("install_mod: starting ({} mode)", mode.label());
        match self.try_install(cache, mode, &progress).await {
            Ok(status) => {
                info!("install_mod: {status}");
                status
            }
            Err(ManagerError::Cancelled) => {
                warn!("install_mod: cancelled");
                "Installation cancelled.".into()
            }
            Err(ManagerError::InvalidPackage(reason)) => {
                error!("install_mod: invalid package: {reason}");
                format!("Invalid mod package: {reason}")
            }
            Err(err) => {
                error!("install_mod: {err}");
                format!("Installation failed: {err}")
            }
        }
    }

    pub async fn restore_original_files(&self, progress: ProgressCallback) -> String {
        let cache = self.begin_operation().await;
        info!("restore: starting");
        match self.try_restore(cache, &progress).await {
            Ok(status) => {
                info!("restore: {status}");
                status
            }
            Err(ManagerError::Cancelled) => {
                warn!("restore: cancelled");
                "Restore cancelled.".into()
            }
            Err(err) => {
                error!("restore: {err}");
                format!("Restore failed: {err}")
            }
        }
    }

    pub fn check_status(&self) -> InstallStatus {
        let target = InstallTarget::from_config(&self.config);
        let status = if !target.is_installed() {
            InstallStatus::NotInstalled
        } else if target.version() == self.config.version {
            InstallStatus::UpToDate
        } else {
            InstallStatus::Outdated
        };
        debug!(
            "check_status: {:?} (target version {})",
            status,
            target.version()
        );
        status
    }

    /// Remove stale archives (offline variants, leftovers). With `all`, cached archives and
    /// their records go too. Returns the number of files removed.
    pub async fn prune_cache(&self, all: bool) -> Result<usize> {
        let mut cache = self.cache.lock().await;
        cache.reload();
        let mut removed = 0;
        for name in [MOD_ASSET, ORIGINAL_FILES_ASSET] {
            removed += cache.cleanup_old_versions(name, !all);
            if all {
                cache.remove_record(name)?;
            }
        }
        info!("prune_cache: removed {removed} file(s)");
        Ok(removed)
    }

    pub async fn cache_record(&self, name: &str) -> Option<CacheRecord> {
        self.cache.lock().await.record(name).cloned()
    }

    /// Stop any in-flight operation, wait for it to release the lock, then start fresh.
    /// The returned guard is held by the extraction task until it finishes.
    async fn begin_operation(&self) -> OwnedMutexGuard<CacheStore> {
        self.cancel_flag.store(true, Ordering::SeqCst);
        let mut cache = self.cache.clone().lock_owned().await;
        self.cancel_flag.store(false, Ordering::SeqCst);
        debug!("cancel flag reset");
        cache.reload();
        cache
    }

    async fn try_install(
        &self,
        mut cache: OwnedMutexGuard<CacheStore>,
        mode: InstallMode,
        progress: &ProgressCallback,
    ) -> Result<String> {
        let mut target = InstallTarget::from_config(&self.config);
        target.ensure_directories()?;
        progress(0);

        let asset = Asset::new(MOD_ASSET, &self.config.mod_url);
        let Some(acquired) = self.acquire(&mut cache, &asset, progress).await? else {
            return Ok("Failed to download mod.".into());
        };
        progress(ACQUIRED_PERCENT);

        let mut status = String::from(INSTALL_DONE);
        let payload = if mode.is_offline() {
            let (payload, patched) = self.offline_payload(&cache, &asset, acquired.bytes).await?;
            status.push_str(if patched {
                OFFLINE_QUALIFIER
            } else {
                OFFLINE_SKIPPED_QUALIFIER
            });
            payload
        } else {
            acquired.bytes
        };
        if cancel_requested(&self.cancel_flag) {
            return Err(ManagerError::Cancelled);
        }

        let progress = progress.clone();
        tokio::task::spawn_blocking(move || {
            let _lock = cache;
            target.extract(&payload, &*progress)
        })
        .await??;

        if acquired.source.used_cache() {
            status.push_str(CACHED_QUALIFIER);
        }
        Ok(status)
    }

    async fn try_restore(
        &self,
        mut cache: OwnedMutexGuard<CacheStore>,
        progress: &ProgressCallback,
    ) -> Result<String> {
        let mut target = InstallTarget::from_config(&self.config);
        target.ensure_directories()?;
        progress(0);

        let asset = Asset::new(ORIGINAL_FILES_ASSET, &self.config.original_files_url);
        let Some(acquired) = self.acquire(&mut cache, &asset, progress).await? else {
            return Ok("Failed to download original files.".into());
        };
        progress(ACQUIRED_PERCENT);
        if cancel_requested(&self.cancel_flag) {
            return Err(ManagerError::Cancelled);
        }

        let progress = progress.clone();
        let bytes = acquired.bytes;
        let written = tokio::task::spawn_blocking(move || {
            let _lock = cache;
            target.restore(&bytes, &*progress)
        })
        .await??;
        debug!("restore: wrote {written} file(s)");

        let mut status = String::from(RESTORE_DONE);
        if acquired.source.used_cache() {
            status.push_str(CACHED_QUALIFIER);
        }
        Ok(status)
    }

    /// Bytes for `asset`: the cached copy when the remote signature is unchanged, a fresh
    /// download otherwise, and the cached copy again if that download fails on the network.
    /// `None` means no bytes could be obtained at all.
    async fn acquire(
        &self,
        cache: &mut CacheStore,
        asset: &Asset,
        progress: &ProgressCallback,
    ) -> Result<Option<Acquisition>> {
        let remote = self.resolver.resolve(&asset.url, &self.cancel_flag).await;
        if cancel_requested(&self.cancel_flag) {
            return Err(ManagerError::Cancelled);
        }

        if !cache.is_update_available(&asset.name, remote.as_ref()) {
            match cache.read_cached_file(&asset.name).await {
                Ok(bytes) if cache.verify_cached_file(&asset.name, &bytes) => {
                    info!("acquire: {} is current, using cache", asset.name);
                    return Ok(Some(Acquisition {
                        bytes,
                        source: Acquired::Cached,
                    }));
                }
                Ok(_) => warn!("acquire: cached {} is corrupt; downloading", asset.name),
                Err(err) => warn!("acquire: cached {} unreadable ({err}); downloading", asset.name),
            }
        }

        info!("acquire: downloading {} from {}", asset.name, asset.url);
        let mut last_reported = 0u8;
        let mut on_chunk = |downloaded: u64, total: Option<u64>| {
            if let Some(total) = total.filter(|t| *t > 0) {
                let pct = (downloaded.min(total) * u64::from(ACQUIRED_PERCENT - 1) / total) as u8;
                if pct != last_reported {
                    last_reported = pct;
                    progress(pct);
                }
            }
        };
        match self
            .fetcher
            .fetch(&asset.url, &self.cancel_flag, &mut on_chunk)
            .await
        {
            Ok(Fetched::Complete(bytes)) => {
                let digest = sha256_hex(&bytes);
                let path = cache.write_cached_file(&asset.name, &bytes).await?;
                let removed = cache.cleanup_old_versions(&asset.name, true);
                if removed > 0 {
                    debug!("acquire: dropped {removed} stale file(s) for {}", asset.name);
                }
                if !cache.update_cache(&asset.name, remote.as_ref(), &digest)? {
                    warn!(
                        "acquire: no remote signature for {}; it will be checked again next time",
                        asset.name
                    );
                    cache.drop_signature(&asset.name, &digest)?;
                }
                info!(
                    "acquire: cached {} ({} bytes) at {}",
                    asset.name,
                    bytes.len(),
                    path.display()
                );
                Ok(Some(Acquisition {
                    bytes,
                    source: Acquired::Downloaded,
                }))
            }
            Ok(Fetched::Cancelled) => Err(ManagerError::Cancelled),
            Err(err) if err.is_network() => {
                warn!("acquire: download of {} failed: {err}", asset.name);
                match cache.read_cached_file(&asset.name).await {
                    Ok(bytes) if cache.verify_cached_file(&asset.name, &bytes) => {
                        info!("acquire: falling back to cached {}", asset.name);
                        Ok(Some(Acquisition {
                            bytes,
                            source: Acquired::CachedFallback,
                        }))
                    }
                    _ => Ok(None),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// The offline variant of `asset`, generating and caching it on first use. Returns the
    /// bytes to install and whether the configuration patch is in them.
    async fn offline_payload(
        &self,
        cache: &CacheStore,
        asset: &Asset,
        base: Vec<u8>,
    ) -> Result<(Vec<u8>, bool)> {
        if let Some(variant) = cache.read_offline_file(&asset.name).await {
            info!("offline: reusing cached variant of {}", asset.name);
            return Ok((variant, true));
        }

        let patcher = self.patcher.clone();
        let (base, patched) = tokio::task::spawn_blocking(move || {
            let patched = patcher.patch(&base);
            (base, patched)
        })
        .await?;
        let patched = patched?;

        if patched.report.targets_found == 0 {
            warn!(
                "offline: {} has no {}; installing it unpatched",
                asset.name, self.config.config_suffix
            );
            return Ok((base, false));
        }
        let path = cache.write_offline_file(&asset.name, &patched.bytes).await?;
        info!("offline: variant written to {}", path.display());
        Ok((patched.bytes, true))
    }
}
