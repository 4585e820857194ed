//! Acquisition, caching, offline patching, and installation of the Nuphillion mod package.

pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod install;
pub mod networking;
pub mod offline;
pub mod releases;
pub mod storage;
pub mod util;

#[cfg(test)]
mod fixtures;

pub use config::ManagerConfig;
pub use engine::ModManager;
pub use engine::state::{InstallMode, InstallStatus};
pub use error::{ManagerError, Result};
pub use networking::{Fetched, Fetcher, HttpFetcher};
