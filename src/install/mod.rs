use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use zip::read::ZipArchive;

use crate::config::ManagerConfig;
use crate::engine::state::InstallPhase;
use crate::error::{ManagerError, Result};
use crate::util::extraction_percent;

const GTS_DIR: &str = "GTS";

/// One archive entry and the path it will be written to.
#[derive(Clone, Debug, PartialEq, Eq)]
struct PlannedFile {
    index: usize,
    source: String,
    dest: PathBuf,
}

/// The versioned `GTS/{version}_active` directory the game loads mod packages from.
#[derive(Clone, Debug)]
pub struct InstallTarget {
    local_state_dir: PathBuf,
    version: String,
    payload_file_name: String,
    payload_extension: String,
    manifest_extension: String,
    phase: InstallPhase,
}

impl InstallTarget {
    pub fn from_config(config: &ManagerConfig) -> Self {
        let version = select_version(
            &config.local_state_dir,
            &config.version,
            &config.version_pointer,
        );
        Self {
            local_state_dir: config.local_state_dir.clone(),
            version,
            payload_file_name: config.payload_file_name.clone(),
            payload_extension: config.payload_extension.to_lowercase(),
            manifest_extension: config.manifest_extension.to_lowercase(),
            phase: InstallPhase::Idle,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn phase(&self) -> InstallPhase {
        self.phase
    }

    pub fn pkg_dir(&self) -> PathBuf {
        active_dir(&self.local_state_dir, &self.version)
    }

    pub fn payload_path(&self) -> PathBuf {
        self.pkg_dir().join(&self.payload_file_name)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.pkg_dir()
            .join(format!("{}_file_manifest.xml", self.version))
    }

    pub fn ensure_directories(&self) -> Result<()> {
        let dir = self.pkg_dir();
        fs::create_dir_all(&dir).map_err(|e| ManagerError::io(&dir, e))
    }

    /// Remove the versioned directory and recreate it empty.
    pub fn clear_target(&self) -> Result<()> {
        let dir = self.pkg_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .or_else(|err| {
                    warn!(
                        "install: bulk remove of {} failed ({err}); removing file by file",
                        dir.display()
                    );
                    for entry in walkdir::WalkDir::new(&dir).into_iter().flatten() {
                        if entry.file_type().is_file()
                            && let Err(err) = fs::remove_file(entry.path())
                        {
                            warn!("install: cannot remove {}: {err}", entry.path().display());
                        }
                    }
                    fs::remove_dir_all(&dir)
                })
                .map_err(|e| ManagerError::io(&dir, e))?;
            debug!("install: cleared {}", dir.display());
        }
        self.ensure_directories()
    }

    pub fn is_installed(&self) -> bool {
        self.payload_path().is_file() && self.manifest_path().is_file()
    }

    pub fn verify(&self) -> Result<()> {
        verify_files(&[self.payload_path(), self.manifest_path()])
    }

    /// Install a mod package: its first payload archive becomes `NuphillionMod.pkg` and its
    /// first manifest becomes `{version}_file_manifest.xml`.
    pub fn extract(&mut self, archive: &[u8], progress: &dyn Fn(u8)) -> Result<()> {
        self.phase = InstallPhase::Idle;
        let mut zip = ZipArchive::new(Cursor::new(archive))?;
        let plan = self.plan_payload(&zip)?;
        self.apply(&mut zip, &plan, progress, |target| target.verify())
    }

    /// Put back the game's original files, keeping each entry's base name. Returns how many
    /// files were written.
    pub fn restore(&mut self, archive: &[u8], progress: &dyn Fn(u8)) -> Result<usize> {
        self.phase = InstallPhase::Idle;
        let mut zip = ZipArchive::new(Cursor::new(archive))?;
        let plan = self.plan_restore(&zip)?;
        let written: Vec<PathBuf> = plan.iter().map(|p| p.dest.clone()).collect();
        self.apply(&mut zip, &plan, progress, |_| verify_files(&written))?;
        Ok(plan.len())
    }

    fn plan_payload(&self, zip: &ZipArchive<Cursor<&[u8]>>) -> Result<Vec<PlannedFile>> {
        let mut payload = None;
        let mut manifest = None;
        for index in 0..zip.len() {
            let Some(name) = zip.name_for_index(index).filter(|n| !n.ends_with('/')) else {
                continue;
            };
            let lowered = name.to_lowercase();
            if payload.is_none() && lowered.ends_with(&self.payload_extension) {
                payload = Some(PlannedFile {
                    index,
                    source: name.to_owned(),
                    dest: self.payload_path(),
                });
            } else if manifest.is_none() && lowered.ends_with(&self.manifest_extension) {
                manifest = Some(PlannedFile {
                    index,
                    source: name.to_owned(),
                    dest: self.manifest_path(),
                });
            }
        }
        let plan: Vec<PlannedFile> = payload.into_iter().chain(manifest).collect();
        if plan.is_empty() {
            return Err(ManagerError::InvalidPackage("No valid files found".into()));
        }
        Ok(plan)
    }

    fn plan_restore(&self, zip: &ZipArchive<Cursor<&[u8]>>) -> Result<Vec<PlannedFile>> {
        let dir = self.pkg_dir();
        let plan: Vec<PlannedFile> = (0..zip.len())
            .filter_map(|index| zip.name_for_index(index).map(|name| (index, name)))
            .filter(|(_, name)| !name.ends_with('/'))
            .filter_map(|(index, name)| {
                let base = Path::new(&name.replace('\\', "/"))
                    .file_name()?
                    .to_owned();
                Some(PlannedFile {
                    index,
                    source: name.to_owned(),
                    dest: dir.join(base),
                })
            })
            .collect();
        if plan.is_empty() {
            return Err(ManagerError::InvalidPackage(
                "No files found in original files archive".into(),
            ));
        }
        Ok(plan)
    }

    fn apply(
        &mut self,
        zip: &mut ZipArchive<Cursor<&[u8]>>,
        plan: &[PlannedFile],
        progress: &dyn Fn(u8),
        verify: impl FnOnce(&Self) -> Result<()>,
    ) -> Result<()> {
        if let Err(err) = self.clear_target() {
            self.phase = InstallPhase::Failed;
            return Err(err);
        }
        self.phase = InstallPhase::DirectoryCleared;

        let result = self
            .write_planned(zip, plan, progress)
            .and_then(|()| verify(self));
        match result {
            Ok(()) => {
                self.phase = InstallPhase::Verified;
                info!(
                    "install: {} file(s) in {}",
                    plan.len(),
                    self.pkg_dir().display()
                );
                Ok(())
            }
            Err(err) => {
                self.phase = InstallPhase::Failed;
                if let Err(cleanup) = self.clear_target() {
                    warn!("install: cleanup after failure also failed: {cleanup}");
                }
                Err(err)
            }
        }
    }

    fn write_planned(
        &mut self,
        zip: &mut ZipArchive<Cursor<&[u8]>>,
        plan: &[PlannedFile],
        progress: &dyn Fn(u8),
    ) -> Result<()> {
        self.phase = InstallPhase::Extracting;
        for (i, planned) in plan.iter().enumerate() {
            let mut entry = zip.by_index(planned.index)?;
            let mut out =
                fs::File::create(&planned.dest).map_err(|e| ManagerError::io(&planned.dest, e))?;
            io::copy(&mut entry, &mut out).map_err(|e| ManagerError::io(&planned.dest, e))?;
            debug!(
                "install: {} -> {}",
                planned.source,
                planned.dest.display()
            );
            progress(extraction_percent(i + 1, plan.len()));
        }
        Ok(())
    }
}

fn active_dir(local_state_dir: &Path, version: &str) -> PathBuf {
    local_state_dir
        .join(GTS_DIR)
        .join(format!("{version}_active"))
}

/// The pointer version wins when the game has already created its directory.
pub fn select_version(local_state_dir: &Path, primary: &str, pointer: &str) -> String {
    if active_dir(local_state_dir, pointer).is_dir() {
        info!("install: using pointer version {pointer}");
        pointer.to_owned()
    } else {
        primary.to_owned()
    }
}

fn verify_files(paths: &[PathBuf]) -> Result<()> {
    match paths.iter().find(|path| !path.is_file()) {
        Some(missing) => Err(ManagerError::IncompleteInstall {
            missing: missing.clone(),
        }),
        None => Ok(()),
    }
}
