use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::model::{AttributeKind, Selector, Watch, DEFAULT_INTERVAL_SECS, MIN_INTERVAL_SECS};

/// Raw add/update input as it comes from a front-end. Selector parts are
/// free text; empty strings mean "not set".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    pub url: String,
    pub interval_secs: u64,
    pub enabled: bool,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub attribute: String,
    #[serde(default)]
    pub value: String,
}

impl WatchConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            enabled: true,
            tag: String::new(),
            attribute: String::new(),
            value: String::new(),
        }
    }

    pub fn interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn selector(
        mut self,
        tag: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.tag = tag.into();
        self.attribute = attribute.into();
        self.value = value.into();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let url = normalize_url(&self.url)?;

        if self.interval_secs < MIN_INTERVAL_SECS {
            return Err(ConfigError::IntervalTooShort {
                min: MIN_INTERVAL_SECS,
                got: self.interval_secs,
            });
        }

        Ok(ValidatedConfig {
            url,
            interval_secs: self.interval_secs,
            enabled: self.enabled,
            selector: self.parse_selector()?,
        })
    }

    fn parse_selector(&self) -> Result<Option<Selector>, ConfigError> {
        let tag = self.tag.trim();
        let attribute = self.attribute.trim();
        let value = self.value.trim();

        if tag.is_empty() && attribute.is_empty() && value.is_empty() {
            return Ok(None);
        }

        let missing = if tag.is_empty() {
            Some("tag")
        } else if attribute.is_empty() {
            Some("selector type")
        } else if value.is_empty() {
            Some("selector value")
        } else {
            None
        };
        if let Some(missing) = missing {
            return Err(ConfigError::IncompleteSelector { missing });
        }

        Ok(Some(Selector {
            tag: tag.to_string(),
            attribute: attribute.parse::<AttributeKind>()?,
            value: value.to_string(),
        }))
    }
}

/// Input that passed validation; the URL is normalized to carry a scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    pub url: String,
    pub interval_secs: u64,
    pub enabled: bool,
    pub selector: Option<Selector>,
}

impl Watch {
    pub fn from_config(config: ValidatedConfig) -> Self {
        let mut watch = Watch::new(config.url, config.interval_secs, config.selector);
        watch.enabled = config.enabled;
        watch
    }

    /// Replaces the configuration fields and keeps everything observed so far.
    pub fn apply_config(&mut self, config: ValidatedConfig) {
        self.interval_secs = config.interval_secs;
        self.enabled = config.enabled;
        self.selector = config.selector;
    }
}

/// Prefixes `http://` when no scheme is given, then checks the result parses.
pub fn normalize_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyUrl);
    }

    let url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    reqwest::Url::parse(&url).map_err(|err| ConfigError::InvalidUrl {
        url: url.clone(),
        reason: err.to_string(),
    })?;

    Ok(url)
}
