//! Turns one render result into a status transition for a watch.
//!
//! This is the only code that writes `last_content`, `last_changed_at` and
//! the terminal `status` of a watch.

use chrono::{DateTime, Utc};

use crate::error::RenderError;
use crate::renderer::RenderResult;
use crate::watch::{Watch, WatchStatus};

/// Longest failure reason kept on a watch for display.
const MAX_ERROR_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub status: WatchStatus,
    /// A notification is due.
    pub changed: bool,
    /// New snapshot, when the snapshot changes.
    pub content: Option<String>,
}

/// Pure decision over the prior snapshot and the render result.
pub fn detect(prior_content: &str, result: &RenderResult) -> Detection {
    let unchanged = |status| Detection {
        status,
        changed: false,
        content: None,
    };

    match result {
        Err(RenderError::Load(_)) => unchanged(WatchStatus::LoadFailed),
        Err(RenderError::Extraction(_)) => unchanged(WatchStatus::ExtractionError),
        Ok(extraction) if !extraction.found => {
            if prior_content.is_empty() {
                unchanged(WatchStatus::ElementNotFound)
            } else {
                // The element disappeared.
                Detection {
                    status: WatchStatus::ChangeDetected,
                    changed: true,
                    content: Some(String::new()),
                }
            }
        }
        Ok(extraction) if extraction.content != prior_content => Detection {
            status: WatchStatus::ChangeDetected,
            changed: true,
            content: Some(extraction.content.clone()),
        },
        Ok(_) => unchanged(WatchStatus::Ok),
    }
}

/// Applies `detect` to the watch, stamping `last_checked_at` on every branch
/// and `last_changed_at` only when the snapshot changed.
pub fn apply(watch: &mut Watch, result: &RenderResult, now: DateTime<Utc>) -> Detection {
    let detection = detect(&watch.last_content, result);

    watch.last_checked_at = Some(now);
    watch.status = detection.status;
    watch.last_error = result.as_ref().err().map(|err| truncate(err.message()));

    if let Some(content) = &detection.content {
        watch.last_content = content.clone();
    }
    if detection.changed {
        watch.last_changed_at = Some(now);
    }

    detection
}

/// Title and message for the alert raised on a detected change.
pub fn change_notification(watch: &Watch) -> (String, String) {
    let title = format!("Change Detected on {}", watch.url);
    let message = if watch.last_content.is_empty() {
        format!("The monitored element on {} disappeared.", watch.url)
    } else {
        format!("The monitored content on {} has changed.", watch.url)
    };
    (title, message)
}

fn truncate(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_CHARS {
        message.to_string()
    } else {
        let mut short: String = message.chars().take(MAX_ERROR_CHARS).collect();
        short.push_str("...");
        short
    }
}
