//! Decision oracle seam and the per-stage adapter over it.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::info_pool::InfoPool;
use super::prompts::PromptRenderer;
use super::stages::StageKind;
use crate::device::Screenshot;

/// Oracle errors.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("Failed to parse response: {0}")]
    Parse(String),
    #[error("Image error: {0}")]
    Image(String),
    #[error("Max retries exceeded after {attempts} attempts: {last}")]
    MaxRetriesExceeded { attempts: u32, last: String },
}

/// One call into the oracle.
#[derive(Debug, Clone, Copy)]
pub struct OracleRequest<'a> {
    pub stage: StageKind,
    pub prompt: &'a str,
    pub images: &'a [Screenshot],
}

/// Opaque decision maker: rendered context in, free-form text out.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn invoke(&self, request: &OracleRequest<'_>) -> Result<String, OracleError>;
}

/// Renders a stage prompt from the pool and forwards it to the oracle.
#[derive(Clone)]
pub struct StageOracleClient {
    oracle: Arc<dyn DecisionOracle>,
    renderer: PromptRenderer,
}

impl StageOracleClient {
    pub fn new(oracle: Arc<dyn DecisionOracle>) -> Self {
        Self {
            oracle,
            renderer: PromptRenderer::default(),
        }
    }

    pub fn with_renderer(mut self, renderer: PromptRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn renderer(&self) -> &PromptRenderer {
        &self.renderer
    }

    /// Render the prompt for `stage` and return the oracle's raw text.
    ///
    /// `width`/`height` are the oracle image-space dimensions.
    pub async fn run(
        &self,
        stage: StageKind,
        pool: &InfoPool,
        (width, height): (u32, u32),
        images: &[Screenshot],
    ) -> Result<String, OracleError> {
        let prompt = self.renderer.render(stage, pool, width, height);
        tracing::debug!(%stage, prompt_len = prompt.len(), images = images.len(), "invoking oracle");
        let request = OracleRequest {
            stage,
            prompt: &prompt,
            images,
        };
        self.oracle.invoke(&request).await
    }
}
