use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A model as reported by the server's model list.
///
/// Descriptors are immutable snapshots; the lifecycle manager refreshes them by
/// re-querying the list rather than mutating them in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Identifier in `name:tag` form
    pub name: String,
    /// On-disk size in bytes
    #[serde(default)]
    pub size_bytes: u64,
    /// Declared parameter count as the server formats it, e.g. "7.6B"
    #[serde(default)]
    pub parameter_size: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub families: Vec<String>,
    /// Quantization level (e.g. "Q4_K_M")
    #[serde(default)]
    pub quantization: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub modified_at: Option<String>,
    /// Capabilities reported by `/api/show` ("vision", "thinking", ...), when fetched
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ModelDescriptor {
    /// Descriptor carrying only a name. Used when the server list is unavailable
    /// and for tests.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size_bytes: 0,
            parameter_size: None,
            family: None,
            families: Vec::new(),
            quantization: None,
            format: None,
            modified_at: None,
            capabilities: Vec::new(),
        }
    }

    pub fn with_parameter_size(mut self, size: impl Into<String>) -> Self {
        self.parameter_size = Some(size.into());
        self
    }

    /// Size on disk in GiB, rounded to two decimals for display.
    pub fn size_gb(&self) -> f64 {
        (self.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

// --- Wire types for the Ollama HTTP API ---

#[derive(Debug, Default, Clone, Deserialize)]
pub(crate) struct ModelDetailsWire {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub families: Option<Vec<String>>,
    #[serde(default)]
    pub parameter_size: Option<String>,
    #[serde(default)]
    pub quantization_level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TagModelWire {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub details: ModelDetailsWire,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TagsResponseWire {
    #[serde(default)]
    pub models: Vec<TagModelWire>,
}

impl From<TagModelWire> for ModelDescriptor {
    fn from(wire: TagModelWire) -> Self {
        let details = wire.details;
        ModelDescriptor {
            name: wire.name,
            size_bytes: wire.size,
            parameter_size: details.parameter_size.filter(|s| !s.trim().is_empty()),
            family: details.family,
            families: details.families.unwrap_or_default(),
            quantization: details.quantization_level,
            format: details.format,
            modified_at: wire.modified_at,
            capabilities: Vec::new(),
        }
    }
}

/// Metadata returned by `/api/show`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub parameters: Option<String>,
    /// Raw `model_info` block (architecture keys, `general.parameter_count`, ...)
    #[serde(default)]
    pub model_info: Map<String, Value>,
}

impl ModelInfo {
    /// Exact parameter count from `general.parameter_count`, if the server reported one.
    pub fn parameter_count(&self) -> Option<u64> {
        self.model_info
            .get("general.parameter_count")
            .and_then(|v| v.as_u64())
    }
}

/// A model currently resident in server memory (`/api/ps`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunningModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub size_vram: u64,
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PsResponseWire {
    #[serde(default)]
    pub models: Vec<RunningModel>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VersionWire {
    pub version: String,
}

/// A single-shot generation request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Base64-encoded images for vision models
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    /// Flat generation options
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub raw: bool,
    pub stream: bool,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

/// Chat roles understood by `/api/chat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), images: Vec::new() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), images: Vec::new() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), images: Vec::new() }
    }
}

/// A multi-turn chat request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<Value>,
    pub stream: bool,
}

/// Normalized completion result for both generate and chat calls.
///
/// Durations are reported by the server in nanoseconds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Completion {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub load_duration: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub eval_duration: Option<u64>,
}

impl Completion {
    /// Tokens per second computed from the server's timing metadata.
    pub fn tokens_per_second(&self) -> Option<f64> {
        match (self.eval_count, self.eval_duration) {
            (Some(count), Some(duration)) if duration > 0 => {
                Some(count as f64 / (duration as f64 / 1_000_000_000.0))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct GenerateResponseWire {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub load_duration: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub eval_duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponseMessageWire {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponseWire {
    #[serde(default)]
    pub message: Option<ChatResponseMessageWire>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub load_duration: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub eval_duration: Option<u64>,
}
