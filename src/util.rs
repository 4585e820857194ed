use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sha2::{Digest, Sha256};

use crate::error::{ManagerError, Result};

/// Progress sink handed in by the shell; receives whole percentages 0..=100.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Percentage reached once the archive bytes are in hand.
pub const ACQUIRED_PERCENT: u8 = 20;

/// Check whether a cancellation flag has been raised.
#[must_use]
pub fn cancel_requested(cancel: &AtomicBool) -> bool {
    cancel.load(Ordering::SeqCst)
}

/// Render a human-friendly transfer speed string.
#[must_use]
pub fn format_speed(bytes_per_sec: f32) -> String {
    const KIB: f32 = 1024.0;
    const MIB: f32 = KIB * 1024.0;

    if bytes_per_sec < KIB {
        format!("{bytes_per_sec:.0} B/s")
    } else if bytes_per_sec < MIB {
        format!("{:.1} KB/s", bytes_per_sec / KIB)
    } else {
        format!("{:.1} MB/s", bytes_per_sec / MIB)
    }
}

/// Compute download progress as a percentage.
#[must_use]
pub fn progress_percent(downloaded: u64, total: Option<u64>) -> f32 {
    match total {
        Some(total) if total > 0 => (downloaded as f32 / total as f32) * 100.0,
        _ => 0.0,
    }
}

/// Progress after writing `done` of `total` extracted files: 20 rising linearly to 100.
#[must_use]
pub fn extraction_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let span = u64::from(100 - ACQUIRED_PERCENT);
    let step = span * done.min(total) as u64 / total as u64;
    ACQUIRED_PERCENT + step as u8
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Sibling `{file}.tmp` path used while a write is in flight.
#[must_use]
pub fn temp_path(path: &Path) -> PathBuf {
    let mut temp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    temp_name.push(".tmp");
    path.with_file_name(temp_name)
}

/// Write `data` to a sibling temp file and rename it over `path`.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ManagerError::io(parent, e))?;
    }
    let temp = temp_path(path);
    fs::write(&temp, data).map_err(|e| ManagerError::io(&temp, e))?;
    if let Err(err) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(ManagerError::io(path, err));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_speed_human_readable() {
        assert_eq!(format_speed(512.0), "512 B/s");
        assert_eq!(format_speed(2_048.0), "2.0 KB/s");
        assert_eq!(format_speed(5_242_880.0), "5.0 MB/s");
    }

    #[test]
    fn calculates_progress_percent() {
        assert_eq!(progress_percent(0, Some(10)), 0.0);
        assert_eq!(progress_percent(5, Some(10)), 50.0);
        assert_eq!(progress_percent(10, Some(10)), 100.0);
        assert_eq!(progress_percent(5, None), 0.0);
    }

    #[test]
    fn extraction_progress_spans_twenty_to_hundred() {
        assert_eq!(extraction_percent(0, 2), 20);
        assert_eq!(extraction_percent(1, 2), 60);
        assert_eq!(extraction_percent(2, 2), 100);
        assert_eq!(extraction_percent(0, 0), 100);
    }

    #[test]
    fn respects_cancel_flag() {
        let flag = AtomicBool::new(false);
        assert!(!cancel_requested(&flag));
        flag.store(true, Ordering::SeqCst);
        assert!(cancel_requested(&flag));
    }

    #[test]
    fn hashes_known_input() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mod_cache.json");
        atomic_write(&path, b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");
        assert!(!dir.path().join("mod_cache.json.tmp").exists());
    }
}
