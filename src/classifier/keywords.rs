use serde::Deserialize;

/// Keyword tables for name-based capability detection.
///
/// Matching is a case-insensitive substring test, so entries should be lowercase.
/// Both tables come from configuration and can be tuned without touching the
/// classification algorithm.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KeywordTables {
    #[serde(default = "default_vision_keywords")]
    pub vision: Vec<String>,
    #[serde(default = "default_thinking_keywords")]
    pub thinking: Vec<String>,
}

impl Default for KeywordTables {
    fn default() -> Self {
        Self {
            vision: default_vision_keywords(),
            thinking: default_thinking_keywords(),
        }
    }
}

impl KeywordTables {
    pub fn is_vision_name(&self, name: &str) -> bool {
        contains_any(name, self.vision.as_slice())
    }

    pub fn is_thinking_name(&self, name: &str) -> bool {
        contains_any(name, self.thinking.as_slice())
    }
}

fn default_vision_keywords() -> Vec<String> {
    [
        "vision", "visual", "vl", "image", "multimodal", "llava", "bakllava", "moondream",
        "cogvlm", "qwen2.5vl", "llama4",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_thinking_keywords() -> Vec<String> {
    [
        "reasoning", "think", "thought", "o1", "qwq", "deepseek-r1", "phi4-reasoning",
        "marco-o1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub(crate) const CODING_KEYWORDS: &[&str] = &[
    "code", "coder", "codellama", "starcoder", "wizard-coder", "deepseek-coder", "devstral",
];

pub(crate) const MATH_KEYWORDS: &[&str] = &["math", "mathstral", "wizard-math"];

pub(crate) const LONG_CONTEXT_KEYWORDS: &[&str] = &["long", "longcontext", "128k", "256k"];

pub(crate) const MOE_KEYWORDS: &[&str] = &["moe", "mixtral", "expert"];

/// Case-insensitive substring test against a keyword list.
pub(crate) fn contains_any<S: AsRef<str>>(name: &str, keywords: &[S]) -> bool {
    let lowered = name.to_lowercase();
    keywords
        .iter()
        .any(|k| !k.as_ref().is_empty() && lowered.contains(&k.as_ref().to_lowercase()))
}
