pub mod config;
pub mod model;

pub use config::{normalize_url, ValidatedConfig, WatchConfig};
pub use model::{
    AttributeKind, Selector, Watch, WatchStatus, DEFAULT_INTERVAL_SECS, MIN_INTERVAL_SECS,
};
