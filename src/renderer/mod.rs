//! Page loading and DOM querying, consumed by the monitor worker.

pub mod extract;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RenderError;
use crate::watch::Selector;

pub use http::HttpRenderer;

/// What a selector query produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    pub found: bool,
    pub content: String,
}

impl Extraction {
    pub fn found(content: impl Into<String>) -> Self {
        Self {
            found: true,
            content: content.into(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            found: false,
            content: String::new(),
        }
    }
}

pub type RenderResult = Result<Extraction, RenderError>;

/// Loads a page and evaluates a selector against it.
///
/// The worker never issues a second call before the previous one resolved,
/// so implementations may hold single-instance resources.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// `selector = None` targets the text of the whole page.
    async fn load_and_extract(&self, url: &str, selector: Option<&Selector>) -> RenderResult;
}
