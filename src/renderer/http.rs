use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::error::RenderError;
use crate::settings::RendererSettings;
use crate::watch::Selector;

use super::{extract::extract, RenderResult, Renderer};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Headless renderer: a plain HTTP GET followed by an HTML query.
pub struct HttpRenderer {
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new(settings: &RendererSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client })
    }

    async fn fetch(&self, url: &str) -> Result<String, RenderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| RenderError::Load(format!("http: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::Load(format!("HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|err| RenderError::Load(format!("read body: {err}")))
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn load_and_extract(&self, url: &str, selector: Option<&Selector>) -> RenderResult {
        let html = match self.fetch(url).await {
            Ok(html) => html,
            Err(err) => {
                log_warn!("failed to load {url}: {err}");
                return Err(err);
            }
        };
        log_debug!("loaded {} bytes from {url}", html.len());

        // Parsing is CPU-bound; keep it off the async workers for large pages.
        let selector = selector.cloned();
        tokio::task::spawn_blocking(move || extract(&html, selector.as_ref()))
            .await
            .map_err(|err| RenderError::Extraction(format!("extraction worker failed: {err}")))?
    }
}
