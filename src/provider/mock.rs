//! Test double used by the crate's own integration tests (not shipped to production
//! callers — construct an `HttpProviderHandler` there).

use super::{ProviderError, ProviderHandler, ProviderResponse};
use crate::types::TaskKind;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

pub struct MockProviderHandler {
    responses: Mutex<Vec<(u16, String)>>,
    calls: AtomicUsize,
}

impl MockProviderHandler {
    /// `responses` is consumed front-to-back, one per call; the last entry
    /// repeats once exhausted so a test can assert "eventually succeeds".
    pub fn new(responses: Vec<(u16, String)>) -> Self {
        MockProviderHandler {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderHandler for MockProviderHandler {
    async fn call(&self, _kind: TaskKind, _content: &str) -> Result<ProviderResponse, ProviderError> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        let responses = self.responses.lock().await;
        if responses.is_empty() {
            return Err(ProviderError::Transport("no mock responses configured".to_string()));
        }
        let (status_code, body) = responses[idx.min(responses.len() - 1)].clone();
        Ok(ProviderResponse { status_code, body })
    }
}
