use std::env;
use std::fs;
use std::path::PathBuf;

/// Game package family whose `LocalState` folder receives mod packages.
const HOGAN_PACKAGE: &str = "Microsoft.HoganThreshold_8wekyb3d8bbwe";

fn local_app_data() -> Option<PathBuf> {
    env::var_os("LOCALAPPDATA").map(PathBuf::from)
}

/// Returns the root directory used by the manager for its own state.
pub fn default_app_dir() -> PathBuf {
    let base = match env::consts::OS {
        "windows" => local_app_data().or_else(|| env::var_os("APPDATA").map(PathBuf::from)),
        "macos" => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join("Library").join("Application Support")),
        _ => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".local").join("share")),
    }
    .unwrap_or_else(|| PathBuf::from("."));

    base.join("nuphillion-manager")
}

pub fn cache_dir() -> PathBuf {
    default_app_dir().join("cache")
}

/// The game's `LocalState` directory. Outside Windows there is no Store install, so this
/// falls back to a folder under the manager's own data dir (useful with Proton prefixes
/// mounted elsewhere via `--local-state-dir`).
pub fn local_state_dir() -> PathBuf {
    match local_app_data() {
        Some(base) => base.join("Packages").join(HOGAN_PACKAGE).join("LocalState"),
        None => default_app_dir().join("LocalState"),
    }
}

/// Create the manager's own folder layout.
pub fn ensure_base_dirs() -> std::io::Result<()> {
    for dir in [default_app_dir(), cache_dir()] {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}
