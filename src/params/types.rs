use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// A loosely typed parameter value as it appears in presets and configuration.
///
/// Values are coerced to the key's expected type during resolution; anything
/// that cannot be coerced is dropped rather than rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// One layer of the parameter merge (preset, config overrides, call-time overrides).
pub type ParameterSet = BTreeMap<String, ParamValue>;

impl ParamValue {
    /// Parses user input such as `0.5`, `40`, `true` or `auto`.
    pub fn parse_str(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(b) = trimmed.parse::<bool>() {
            ParamValue::Bool(b)
        } else if let Ok(i) = trimmed.parse::<i64>() {
            ParamValue::Int(i)
        } else if let Ok(f) = trimmed.parse::<f64>() {
            ParamValue::Float(f)
        } else {
            ParamValue::Text(trimmed.to_string())
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            ParamValue::Text(s) => s.trim().parse().ok(),
            ParamValue::Bool(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            ParamValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            ParamValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            ParamValue::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            ParamValue::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// `-1` means "leave it to the server" and removes the key from the merge.
    pub fn is_default_marker(&self) -> bool {
        match self {
            ParamValue::Int(i) => *i == -1,
            ParamValue::Float(f) => *f == -1.0,
            ParamValue::Text(s) => s.trim() == "-1",
            ParamValue::Bool(_) => false,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::Int(i) => Value::Number((*i).into()),
            ParamValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            ParamValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Tri-state switch for model-dependent behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flag {
    True,
    False,
    #[default]
    Auto,
}

impl Flag {
    /// Accepts booleans and the strings "true", "false" and "auto".
    pub fn from_value(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Bool(true) => Some(Flag::True),
            ParamValue::Bool(false) => Some(Flag::False),
            ParamValue::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" => Some(Flag::True),
                "false" => Some(Flag::False),
                "auto" => Some(Flag::Auto),
                _ => None,
            },
            _ => None,
        }
    }

    /// Collapses `Auto` onto what the model supports.
    pub fn resolve(self, supported: bool) -> bool {
        match self {
            Flag::True => true,
            Flag::False => false,
            Flag::Auto => supported,
        }
    }
}

/// Expected type of a generation option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Float,
    Int,
    Bool,
}

/// Generation options forwarded to the server, with their types.
pub const KNOWN_OPTIONS: &[(&str, ParamKind)] = &[
    ("temperature", ParamKind::Float),
    ("top_k", ParamKind::Int),
    ("top_p", ParamKind::Float),
    ("min_p", ParamKind::Float),
    ("typical_p", ParamKind::Float),
    ("repeat_penalty", ParamKind::Float),
    ("repeat_last_n", ParamKind::Int),
    ("presence_penalty", ParamKind::Float),
    ("frequency_penalty", ParamKind::Float),
    ("seed", ParamKind::Int),
    ("num_predict", ParamKind::Int),
    ("num_ctx", ParamKind::Int),
    ("num_batch", ParamKind::Int),
    ("num_keep", ParamKind::Int),
    ("num_gqa", ParamKind::Int),
    ("num_gpu", ParamKind::Int),
    ("main_gpu", ParamKind::Int),
    ("num_thread", ParamKind::Int),
    ("low_vram", ParamKind::Bool),
    ("f16_kv", ParamKind::Bool),
    ("logits_all", ParamKind::Bool),
    ("vocab_only", ParamKind::Bool),
    ("use_mmap", ParamKind::Bool),
    ("use_mlock", ParamKind::Bool),
    ("mirostat", ParamKind::Int),
    ("mirostat_eta", ParamKind::Float),
    ("mirostat_tau", ParamKind::Float),
    ("tfs_z", ParamKind::Float),
];

pub fn option_kind(key: &str) -> Option<ParamKind> {
    KNOWN_OPTIONS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, kind)| *kind)
}

/// Fully resolved parameters for one request. Flags are concrete booleans here.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationParameters {
    /// Typed generation options, keyed by option name
    pub options: BTreeMap<String, ParamValue>,
    pub enable_thinking: bool,
    pub enable_vision: bool,
    pub image_quality: Option<String>,
    /// Largest accepted image payload in KiB
    pub max_image_size: Option<u32>,
    /// How reasoning should be delimited ("xml" asks for `<think>` tags)
    pub thinking_format: Option<String>,
}

impl GenerationParameters {
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.options.get(key)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.get("temperature").and_then(ParamValue::as_f64)
    }

    /// Flat key/value map sent as the request's `options` object.
    pub fn options_json(&self) -> Map<String, Value> {
        self.options
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }

    /// Adds the `<think>` instruction when thinking is on and the format asks for tags.
    pub fn apply_thinking_instruction(&self, prompt: &str) -> String {
        let wants_tags = self
            .thinking_format
            .as_deref()
            .map(|f| f.eq_ignore_ascii_case("xml"))
            .unwrap_or(false);
        if self.enable_thinking && wants_tags && !prompt.contains("<think>") {
            format!("{}\n\nPlease use <think> tags to show your reasoning process.", prompt)
        } else {
            prompt.to_string()
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    #[error("unknown preset '{name}'. Available presets: {available}")]
    UnknownPreset { name: String, available: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_str_picks_narrowest_type() {
        assert_eq!(ParamValue::parse_str("true"), ParamValue::Bool(true));
        assert_eq!(ParamValue::parse_str("40"), ParamValue::Int(40));
        assert_eq!(ParamValue::parse_str("0.5"), ParamValue::Float(0.5));
        assert_eq!(ParamValue::parse_str(" auto "), ParamValue::Text("auto".into()));
    }

    #[test]
    fn test_flag_accepts_strings_and_booleans() {
        assert_eq!(Flag::from_value(&ParamValue::Bool(true)), Some(Flag::True));
        assert_eq!(Flag::from_value(&ParamValue::Text("FALSE".into())), Some(Flag::False));
        assert_eq!(Flag::from_value(&ParamValue::Text("auto".into())), Some(Flag::Auto));
        assert_eq!(Flag::from_value(&ParamValue::Int(1)), None);
        assert!(Flag::Auto.resolve(true));
        assert!(!Flag::Auto.resolve(false));
        assert!(Flag::True.resolve(false));
    }

    #[test]
    fn test_default_marker() {
        assert!(ParamValue::Int(-1).is_default_marker());
        assert!(ParamValue::Text("-1".into()).is_default_marker());
        assert!(!ParamValue::Int(0).is_default_marker());
    }

    #[test]
    fn test_thinking_instruction_only_when_enabled() {
        let mut params = GenerationParameters {
            thinking_format: Some("xml".into()),
            ..Default::default()
        };
        assert_eq!(params.apply_thinking_instruction("hi"), "hi");
        params.enable_thinking = true;
        assert!(params.apply_thinking_instruction("hi").contains("<think>"));
        assert_eq!(params.apply_thinking_instruction("<think>x</think>"), "<think>x</think>");
    }
}
