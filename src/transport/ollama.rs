use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::types::{
    ChatRequest, ChatResponseWire, Completion, GenerateRequest, GenerateResponseWire,
    ModelDescriptor, ModelInfo, PsResponseWire, RunningModel, TagsResponseWire, VersionWire,
};
use super::{Transport, TransportError};
use crate::config::ServerConfig;

/// Default Ollama server URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// HTTP client for a local Ollama server.
pub struct OllamaClient {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    load_timeout: Duration,
    probe_timeout: Duration,
}

impl OllamaClient {
    /// Builds a client from the `[server]` settings.
    pub fn new(config: &ServerConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.probe_timeout_ms.max(500)))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            load_timeout: Duration::from_secs(config.load_timeout_secs),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<R: DeserializeOwned>(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<R, TransportError> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, &url))?;
        Self::decode(response, &url).await
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<R, TransportError> {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, &url))?;
        Self::decode(response, &url).await
    }

    /// Turns non-2xx answers into `HttpStatus` and parses the body otherwise.
    async fn decode<R: DeserializeOwned>(
        response: reqwest::Response,
        url: &str,
    ) -> Result<R, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(url, status = status.as_u16(), body = %body, "Server returned error status");
            return Err(TransportError::HttpStatus {
                code: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(e, url))?;
        serde_json::from_str::<R>(&text)
            .map_err(|e| TransportError::InvalidResponse(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl Transport for OllamaClient {
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, TransportError> {
        let tags: TagsResponseWire = self.get_json("/api/tags", self.request_timeout).await?;
        Ok(tags.models.into_iter().map(ModelDescriptor::from).collect())
    }

    async fn show_model(&self, model: &str) -> Result<ModelInfo, TransportError> {
        self.post_json("/api/show", &json!({ "model": model }), self.request_timeout)
            .await
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<Completion, TransportError> {
        let wire: GenerateResponseWire = self
            .post_json("/api/generate", request, self.request_timeout)
            .await?;

        // Ollama occasionally reports model failures inside a 200 body
        if let Some(error) = wire.error {
            return Err(TransportError::InvalidResponse(error));
        }

        Ok(Completion {
            text: wire.response,
            done: wire.done,
            done_reason: wire.done_reason,
            total_duration: wire.total_duration,
            load_duration: wire.load_duration,
            eval_count: wire.eval_count,
            eval_duration: wire.eval_duration,
        })
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Completion, TransportError> {
        let wire: ChatResponseWire = self
            .post_json("/api/chat", request, self.request_timeout)
            .await?;

        if let Some(error) = wire.error {
            return Err(TransportError::InvalidResponse(error));
        }

        Ok(Completion {
            text: wire.message.map(|m| m.content).unwrap_or_default(),
            done: wire.done,
            done_reason: wire.done_reason,
            total_duration: wire.total_duration,
            load_duration: wire.load_duration,
            eval_count: wire.eval_count,
            eval_duration: wire.eval_duration,
        })
    }

    async fn load(&self, model: &str, keep_alive: &str) -> Result<(), TransportError> {
        // An empty prompt makes the server load the weights without generating
        let body = json!({ "model": model, "prompt": "", "keep_alive": keep_alive, "stream": false });
        let wire: GenerateResponseWire =
            self.post_json("/api/generate", &body, self.load_timeout).await?;
        match wire.error {
            Some(error) => Err(TransportError::InvalidResponse(error)),
            None => Ok(()),
        }
    }

    async fn unload(&self, model: &str) -> Result<(), TransportError> {
        let body = json!({ "model": model, "keep_alive": 0, "stream": false });
        let result: Result<GenerateResponseWire, _> = self
            .post_json("/api/generate", &body, self.request_timeout)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(TransportError::HttpStatus { code: 404, .. }) => {
                debug!(model, "Model was not loaded, nothing to unload");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn running_models(&self) -> Result<Vec<RunningModel>, TransportError> {
        let ps: PsResponseWire = self.get_json("/api/ps", self.probe_timeout).await?;
        Ok(ps.models)
    }

    async fn probe(&self) -> Result<(), TransportError> {
        let _: TagsResponseWire = self.get_json("/api/tags", self.probe_timeout).await?;
        Ok(())
    }

    async fn version(&self) -> Result<String, TransportError> {
        let version: VersionWire = self.get_json("/api/version", self.probe_timeout).await?;
        Ok(version.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_config(url: &str) -> ServerConfig {
        ServerConfig {
            url: url.to_string(),
            request_timeout_secs: 120,
            load_timeout_secs: 300,
            probe_timeout_ms: 2000,
            keep_alive: "30m".to_string(),
        }
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = OllamaClient::new(&server_config("http://localhost:11434/")).unwrap();
        assert_eq!(client.base_url(), DEFAULT_OLLAMA_URL);
        assert_eq!(client.url("/api/tags"), "http://localhost:11434/api/tags");
    }

    #[tokio::test]
    async fn test_unreachable_server_maps_to_connection_refused() {
        // Port 9 (discard) is essentially never served locally
        let client = OllamaClient::new(&server_config("http://127.0.0.1:9")).unwrap();
        match client.probe().await {
            Err(TransportError::ConnectionRefused(_)) | Err(TransportError::Timeout(_)) => {}
            other => panic!("expected connection failure, got {:?}", other),
        }
    }
}
