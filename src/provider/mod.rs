//! Layer C18 — pluggable provider call boundary.
//!
//! The distilled spec describes "a callable that performs the actual LLM/PDF work"
//! without pinning it to a transport; this trait is that seam. The default
//! implementation talks to an OpenRouter-shaped chat completions endpoint, grounded
//! on the original `call_openrouter` request/response shape in `tasks.py`.

mod http;
mod mock;

pub use http::HttpProviderHandler;
pub use mock::MockProviderHandler;

use crate::types::TaskKind;
use async_trait::async_trait;

/// Raw outcome of a single provider call, before error classification.
pub struct ProviderResponse {
    pub status_code: u16,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait ProviderHandler: Send + Sync {
    /// Performs the unit of work for `kind` against `content`, returning the raw
    /// response for the Executor to classify and persist. Implementations should
    /// not retry internally — retry policy lives entirely in the Executor/Backoff
    /// layers so it stays observable and testable in one place.
    async fn call(&self, kind: TaskKind, content: &str) -> Result<ProviderResponse, ProviderError>;
}
