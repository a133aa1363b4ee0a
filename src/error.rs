//! Error types shared across the monitor.
//!
//! Per-watch failures (`RenderError`) never leave the worker: they are folded
//! into the watch's status. `ConfigError` and `PersistenceError` surface to
//! callers of the `Monitor` handle.

use std::path::PathBuf;

use thiserror::Error;

/// Rejected add/update input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("URL must not be empty")]
    EmptyUrl,

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("check interval must be at least {min} seconds (got {got})")]
    IntervalTooShort { min: u64, got: u64 },

    #[error("a selector needs a tag, a selector type (id/class) and a selector value; missing {missing}")]
    IncompleteSelector { missing: &'static str },

    #[error("unknown selector type '{0}', expected 'id' or 'class'")]
    UnknownAttributeKind(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode watch store: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Failure reported by a `Renderer`. Kept distinct from "element not found".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The page could not be loaded.
    #[error("load failed: {0}")]
    Load(String),

    /// The page loaded but querying it failed.
    #[error("extraction failed: {0}")]
    Extraction(String),
}

impl RenderError {
    pub fn message(&self) -> &str {
        match self {
            RenderError::Load(message) | RenderError::Extraction(message) => message,
        }
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("no watch registered for {0}")]
    UnknownWatch(String),

    #[error("monitor worker is no longer running")]
    WorkerGone,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
