use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InstallMode {
    #[default]
    Online,
    Offline,
}

impl InstallMode {
    pub fn label(self) -> &'static str {
        match self {
            InstallMode::Online => "Online",
            InstallMode::Offline => "Offline",
        }
    }

    pub fn is_offline(self) -> bool {
        self == InstallMode::Offline
    }
}

/// Where an install or restore got to; `Verified` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InstallPhase {
    #[default]
    Idle,
    DirectoryCleared,
    Extracting,
    Verified,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallStatus {
    UpToDate,
    Outdated,
    NotInstalled,
}

impl InstallStatus {
    pub fn message(self) -> &'static str {
        match self {
            InstallStatus::UpToDate => "Mod is installed and up-to-date!",
            InstallStatus::Outdated => "Mod is outdated. Update available.",
            InstallStatus::NotInstalled => "Mod is not installed.",
        }
    }
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// How the archive bytes for an operation were obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Downloaded,
    /// Cache was current; nothing was fetched.
    Cached,
    /// A download was needed but failed, and the previous copy was used.
    CachedFallback,
}

impl Acquired {
    pub fn used_cache(self) -> bool {
        !matches!(self, Acquired::Downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_messages_match_shell_wording() {
        assert_eq!(
            InstallStatus::UpToDate.to_string(),
            "Mod is installed and up-to-date!"
        );
        assert_eq!(InstallStatus::NotInstalled.message(), "Mod is not installed.");
    }

    #[test]
    fn cache_usage_by_acquisition() {
        assert!(!Acquired::Downloaded.used_cache());
        assert!(Acquired::Cached.used_cache());
        assert!(Acquired::CachedFallback.used_cache());
        assert!(InstallMode::Offline.is_offline());
        assert_eq!(InstallMode::default(), InstallMode::Online);
    }
}
