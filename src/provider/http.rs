//! Default `ProviderHandler`: an OpenRouter-shaped chat completions client.

use super::{ProviderError, ProviderHandler, ProviderResponse};
use crate::config::ProviderConfig;
use crate::types::TaskKind;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

pub struct HttpProviderHandler {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl HttpProviderHandler {
    pub fn new(config: ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("reqwest client builder never fails for this configuration");
        HttpProviderHandler { client, config }
    }

    fn prompt_for(kind: TaskKind, content: &str) -> String {
        match kind {
            TaskKind::Summarize => format!("Summarize the following text:\n\n{content}"),
            TaskKind::PdfExtract => format!("Extract structured text from this PDF content:\n\n{content}"),
        }
    }
}

#[async_trait]
impl ProviderHandler for HttpProviderHandler {
    async fn call(&self, kind: TaskKind, content: &str) -> Result<ProviderResponse, ProviderError> {
        let body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": Self::prompt_for(kind, content)}],
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status_code = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(ProviderResponse { status_code, body: text })
    }
}
