use serde::Serialize;

use crate::watch::Watch;

/// Pushed to subscribers so a front-end can refresh one row at a time.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WatchEvent {
    /// Status, timestamps, content or configuration changed.
    Updated { watch: Watch },
    Removed { url: String },
    Monitoring { running: bool },
}
