//! # Transport Client
//!
//! Thin request/response layer over the inference server's HTTP API. Every call
//! either returns a structured result or a typed [`TransportError`]; nothing in
//! here retries. Recovery lives one layer up, in [`crate::lifecycle`].

mod error;
mod ollama;
mod types;

use async_trait::async_trait;

pub use error::TransportError;
pub use ollama::{OllamaClient, DEFAULT_OLLAMA_URL};
pub use types::{
    ChatMessage, ChatRequest, Completion, GenerateRequest, ModelDescriptor, ModelInfo, Role,
    RunningModel,
};

/// Operations the orchestration layer needs from an inference server.
///
/// Implemented by [`OllamaClient`] for real servers and by in-memory fakes in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Lists every locally available model.
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, TransportError>;

    /// Fetches detailed metadata for one model.
    async fn show_model(&self, model: &str) -> Result<ModelInfo, TransportError>;

    /// Single-prompt completion.
    async fn generate(&self, request: &GenerateRequest) -> Result<Completion, TransportError>;

    /// Multi-turn chat completion.
    async fn chat(&self, request: &ChatRequest) -> Result<Completion, TransportError>;

    /// Loads a model into server memory and keeps it resident for `keep_alive`.
    async fn load(&self, model: &str, keep_alive: &str) -> Result<(), TransportError>;

    /// Evicts a model from server memory. A 404 means it was not loaded.
    async fn unload(&self, model: &str) -> Result<(), TransportError>;

    /// Models currently resident in memory.
    async fn running_models(&self) -> Result<Vec<RunningModel>, TransportError>;

    /// Cheap liveness check with a short timeout.
    async fn probe(&self) -> Result<(), TransportError>;

    /// Server version string.
    async fn version(&self) -> Result<String, TransportError>;
}
