pub mod error;
pub mod monitor;
pub mod notify;
pub mod renderer;
pub mod settings;
pub mod store;
pub mod utils;
pub mod watch;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};

use monitor::Monitor;
use notify::FanoutNotifier;
use renderer::HttpRenderer;
use settings::SettingsStore;
use store::WatchStore;

pub const WATCHES_FILE: &str = "watches.json";
pub const SETTINGS_FILE: &str = "settings.json";

/// Initialize logging. `RUST_LOG` wins over the default level, which is
/// `info`, or `debug` with `PAGEWATCH_DEBUG=1`.
pub fn init_logging() {
    let default_level = if std::env::var("PAGEWATCH_DEBUG").is_ok_and(|value| value == "1") {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .try_init();
}

/// Everything a front-end needs, wired from one data directory.
pub struct AppState {
    pub monitor: Monitor,
    pub settings: SettingsStore,
    data_dir: PathBuf,
}

impl AppState {
    /// Must be called inside a tokio runtime.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;
        let renderer = HttpRenderer::new(&settings.renderer())?;
        let notifier = FanoutNotifier::from_settings(&settings.notifications());
        let store = WatchStore::open(data_dir.join(WATCHES_FILE));

        let monitor = Monitor::new(store, Arc::new(renderer), Arc::new(notifier))?;

        Ok(Self {
            monitor,
            settings,
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
