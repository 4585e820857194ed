use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, warn};

use nuphillion_manager::config::{MOD_ASSET, ORIGINAL_FILES_ASSET};
use nuphillion_manager::util::ProgressCallback;
use nuphillion_manager::{HttpFetcher, InstallMode, ManagerConfig, ModManager, env};

#[derive(Parser, Debug)]
#[command(
    name = "nuphillion",
    author,
    version,
    about = "Installs, updates, and removes the Nuphillion mod for Halo Wars 2"
)]
struct Cli {
    /// Where downloaded archives and `mod_cache.json` are kept.
    #[arg(long, env = "NUPHILLION_CACHE_DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// The game's `LocalState` folder.
    #[arg(long, env = "NUPHILLION_LOCAL_STATE", global = true)]
    local_state_dir: Option<PathBuf>,

    #[arg(long, env = "NUPHILLION_MOD_URL", global = true)]
    mod_url: Option<String>,

    #[arg(long, env = "NUPHILLION_OG_URL", global = true)]
    original_files_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install or update the mod.
    Install {
        /// Patch the package so it runs without online services.
        #[arg(long)]
        offline: bool,
    },
    /// Put the game's original files back.
    Restore,
    /// Report whether the mod is installed and current.
    Status,
    /// Delete stale cached archives.
    Prune {
        /// Also delete the current archives and their records.
        #[arg(long)]
        all: bool,
    },
}

impl Cli {
    fn config(&self) -> ManagerConfig {
        let mut config = ManagerConfig::default();
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(dir) = &self.local_state_dir {
            config.local_state_dir = dir.clone();
        }
        if let Some(url) = &self.mod_url {
            config.mod_url = url.clone();
        }
        if let Some(url) = &self.original_files_url {
            config.original_files_url = url.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if cli.cache_dir.is_none()
        && let Err(err) = env::ensure_base_dirs()
    {
        warn!("main: unable to create app directories: {err}");
    }

    let manager = Arc::new(ModManager::new(
        cli.config(),
        Arc::new(HttpFetcher::new()),
    ));

    match cli.command {
        Command::Install { offline } => {
            let mode = if offline {
                InstallMode::Offline
            } else {
                InstallMode::Online
            };
            let status =
                run_with_progress(&manager, |progress| manager.install_mod(mode, progress)).await;
            report(&status, "Mod installation complete!")
        }
        Command::Restore => {
            let status =
                run_with_progress(&manager, |progress| manager.restore_original_files(progress))
                    .await;
            report(&status, "Original files restored successfully!")
        }
        Command::Status => {
            println!("{}", manager.check_status());
            for name in [MOD_ASSET, ORIGINAL_FILES_ASSET] {
                if let Some(record) = manager.cache_record(name).await {
                    println!(
                        "  {name}: tag {}, cached {}",
                        record.tag.as_deref().unwrap_or("-"),
                        record.cached_at.as_deref().unwrap_or("-")
                    );
                }
            }
            ExitCode::SUCCESS
        }
        Command::Prune { all } => match manager.prune_cache(all).await {
            Ok(removed) => {
                println!("Removed {removed} cached file(s).");
                ExitCode::SUCCESS
            }
            Err(err) => {
                error!("prune failed: {err}");
                ExitCode::FAILURE
            }
        },
    }
}

/// Drive one manager operation with a progress bar; Ctrl-C cancels it.
async fn run_with_progress<F, Fut>(manager: &Arc<ModManager>, operation: F) -> String
where
    F: FnOnce(ProgressCallback) -> Fut,
    Fut: Future<Output = String>,
{
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let sink = bar.clone();
    let progress: ProgressCallback = Arc::new(move |pct: u8| sink.set_position(u64::from(pct)));

    let canceller = manager.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let status = operation(progress).await;
    ctrl_c.abort();
    bar.finish_and_clear();
    status
}

fn report(status: &str, success_prefix: &str) -> ExitCode {
    println!("{status}");
    if status.starts_with(success_prefix) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
