use std::path::PathBuf;

use crate::env;

pub const VERSION: &str = "1_11_2931_2";
pub const VERSION_PTR: &str = "1_11_2931_10";
pub const RELEASE_URI: &str =
    "https://github.com/CutesyThrower12/Nuphillion/releases/download/vInDev/nuphillion.zip";
pub const OG_FILES_URL: &str =
    "https://github.com/CutesyThrower12/HW2-Original-Files/releases/download/1.0/hw2ogfiles.zip";
pub const GITHUB_API_BASE: &str = "https://api.github.com";

pub const MOD_ASSET: &str = "mod";
pub const ORIGINAL_FILES_ASSET: &str = "original-files";

/// Everything the manager needs to know about the mod and where things live.
///
/// Defaults are compiled in; the CLI overrides individual fields.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub cache_dir: PathBuf,
    pub local_state_dir: PathBuf,
    pub version: String,
    pub version_pointer: String,
    pub mod_url: String,
    pub original_files_url: String,
    pub api_base: String,
    pub payload_file_name: String,
    pub payload_extension: String,
    pub manifest_extension: String,
    /// Path suffix of the configuration file inside the nested payload archive.
    pub config_suffix: String,
    pub offline_keywords: Vec<String>,
    /// Release tags that always resolve through the "latest" release endpoint.
    pub rolling_tags: Vec<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cache_dir: env::cache_dir(),
            local_state_dir: env::local_state_dir(),
            version: VERSION.into(),
            version_pointer: VERSION_PTR.into(),
            mod_url: RELEASE_URI.into(),
            original_files_url: OG_FILES_URL.into(),
            api_base: GITHUB_API_BASE.into(),
            payload_file_name: "NuphillionMod.pkg".into(),
            payload_extension: ".pkg".into(),
            manifest_extension: ".xml".into(),
            config_suffix: "data/startup/game.cfg".into(),
            offline_keywords: vec!["waypoint".into()],
            rolling_tags: vec!["vInDev".into(), "latest".into()],
        }
    }
}

impl ManagerConfig {
    /// Defaults rooted at explicit directories; handy for tests and portable installs.
    pub fn with_dirs(cache_dir: impl Into<PathBuf>, local_state_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            local_state_dir: local_state_dir.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_release_assets() {
        let config = ManagerConfig::default();
        assert!(config.mod_url.ends_with("/nuphillion.zip"));
        assert!(config.original_files_url.ends_with("/hw2ogfiles.zip"));
        assert_eq!(config.payload_file_name, "NuphillionMod.pkg");
        assert_eq!(config.offline_keywords, vec!["waypoint".to_string()]);
    }

    #[test]
    fn with_dirs_keeps_other_defaults() {
        let config = ManagerConfig::with_dirs("/tmp/cache", "/tmp/state");
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/cache"));
        assert_eq!(config.local_state_dir, PathBuf::from("/tmp/state"));
        assert_eq!(config.version, VERSION);
    }
}
