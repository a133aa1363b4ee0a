use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const MIN_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_INTERVAL_SECS: u64 = 3600;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AttributeKind {
    Id,
    Class,
}

impl AttributeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeKind::Id => "id",
            AttributeKind::Class => "class",
        }
    }
}

impl FromStr for AttributeKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "id" => Ok(AttributeKind::Id),
            "class" => Ok(AttributeKind::Class),
            _ => Err(ConfigError::UnknownAttributeKind(value.to_string())),
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `tag[attribute='value']`, e.g. `div[id='price']`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    pub tag: String,
    pub attribute: AttributeKind,
    pub value: String,
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} ({})", self.attribute, self.value, self.tag)
    }
}

/// Display classification of a watch. Only the change detector and the
/// worker's queue bookkeeping write it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum WatchStatus {
    #[default]
    Idle,
    Queued,
    Loading,
    Processing,
    Ok,
    ElementNotFound,
    ChangeDetected,
    LoadFailed,
    ExtractionError,
}

impl WatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchStatus::Idle => "Idle",
            WatchStatus::Queued => "Queued",
            WatchStatus::Loading => "Loading...",
            WatchStatus::Processing => "Processing...",
            WatchStatus::Ok => "Ok",
            WatchStatus::ElementNotFound => "Element not found",
            WatchStatus::ChangeDetected => "Change Detected!",
            WatchStatus::LoadFailed => "Load Failed",
            WatchStatus::ExtractionError => "Extraction Error",
        }
    }

    /// Statuses that only make sense while a check is underway.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WatchStatus::Queued | WatchStatus::Loading | WatchStatus::Processing
        )
    }
}

impl fmt::Display for WatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_enabled() -> bool {
    true
}

/// One monitored URL. The URL is the identity key inside the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Watch {
    pub url: String,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub selector: Option<Selector>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_changed_at: Option<DateTime<Utc>>,
    /// Last observed text. Empty means "nothing observed yet" or "element gone".
    #[serde(default)]
    pub last_content: String,
    #[serde(default)]
    pub status: WatchStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub checks_scheduled: u64,
    #[serde(default)]
    pub checks_skipped: u64,
    #[serde(default)]
    pub checks_dispatched: u64,
}

impl Watch {
    pub fn new(url: impl Into<String>, interval_secs: u64, selector: Option<Selector>) -> Self {
        Self {
            url: url.into(),
            interval_secs,
            enabled: true,
            selector,
            last_checked_at: None,
            last_changed_at: None,
            last_content: String::new(),
            status: WatchStatus::Idle,
            last_error: None,
            checks_scheduled: 0,
            checks_skipped: 0,
            checks_dispatched: 0,
        }
    }

    pub fn element_description(&self) -> String {
        match &self.selector {
            Some(selector) => selector.to_string(),
            None => "Entire Page".to_string(),
        }
    }

    pub fn last_checked_label(&self) -> String {
        format_timestamp(self.last_checked_at, "Never")
    }

    pub fn last_changed_label(&self) -> String {
        format_timestamp(self.last_changed_at, "None")
    }

    /// Status text as shown in a display row, including the failure reason.
    pub fn status_label(&self) -> String {
        match (&self.status, &self.last_error) {
            (WatchStatus::LoadFailed | WatchStatus::ExtractionError, Some(reason)) => {
                format!("{}: {}", self.status, reason)
            }
            _ => self.status.to_string(),
        }
    }
}

fn format_timestamp(value: Option<DateTime<Utc>>, placeholder: &str) -> String {
    value
        .map(|ts| ts.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| placeholder.to_string())
}
