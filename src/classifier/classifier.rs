use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::keywords::{
    contains_any, KeywordTables, CODING_KEYWORDS, LONG_CONTEXT_KEYWORDS, MATH_KEYWORDS,
    MOE_KEYWORDS,
};
use crate::transport::ModelDescriptor;

/// Upper bound (inclusive, billions) of the small category.
pub const SMALL_MAX_B: f64 = 16.0;
/// Upper bound (inclusive, billions) of the medium category.
pub const MEDIUM_MAX_B: f64 = 100.0;

static MOE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+)x(\d+(?:\.\d+)?)\s*([bmkt])\b").expect("valid MoE regex")
});

static BARE_COUNT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*([bmkt])\b").expect("valid parameter regex")
});

static SERVER_SIZE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*([bmkt])?").expect("valid size regex")
});

/// Coarse size bucket used to partition benchmark output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeCategory {
    Small,
    Medium,
    Large,
    Unknown,
}

impl SizeCategory {
    pub const ALL: [SizeCategory; 4] = [
        SizeCategory::Small,
        SizeCategory::Medium,
        SizeCategory::Large,
        SizeCategory::Unknown,
    ];

    /// Buckets a parameter count given in billions.
    pub fn from_billions(params_b: f64) -> Self {
        if !params_b.is_finite() || params_b <= 0.0 {
            SizeCategory::Unknown
        } else if params_b <= SMALL_MAX_B {
            SizeCategory::Small
        } else if params_b <= MEDIUM_MAX_B {
            SizeCategory::Medium
        } else {
            SizeCategory::Large
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeCategory::Small => "small",
            SizeCategory::Medium => "medium",
            SizeCategory::Large => "large",
            SizeCategory::Unknown => "unknown",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SizeCategory::Small => "Small models (<=16B parameters)",
            SizeCategory::Medium => "Medium models (16B-100B parameters)",
            SizeCategory::Large => "Large models (>100B parameters)",
            SizeCategory::Unknown => "Models with undetectable parameter count",
        }
    }
}

impl fmt::Display for SizeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SizeCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "small" => Ok(SizeCategory::Small),
            "medium" => Ok(SizeCategory::Medium),
            "large" => Ok(SizeCategory::Large),
            "unknown" => Ok(SizeCategory::Unknown),
            other => Err(format!(
                "invalid category '{}', expected one of: small, medium, large, unknown",
                other
            )),
        }
    }
}

/// Where the parameter estimate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterSource {
    Server,
    MixtureOfExperts,
    Name,
    None,
}

/// Task specialties inferred from the model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    Coding,
    Math,
    LongContext,
}

/// Derived, session-scoped view of what a model can do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub supports_vision: bool,
    pub supports_thinking: bool,
    pub size_category: SizeCategory,
    /// Best available parameter estimate in billions
    pub estimated_parameters_b: Option<f64>,
    pub parameter_source: ParameterSource,
    pub is_moe: bool,
    pub specialties: BTreeSet<Specialty>,
}

impl ModelCapabilities {
    /// Capabilities of a model nothing is known about.
    pub fn unknown() -> Self {
        Self {
            supports_vision: false,
            supports_thinking: false,
            size_category: SizeCategory::Unknown,
            estimated_parameters_b: None,
            parameter_source: ParameterSource::None,
            is_moe: false,
            specialties: BTreeSet::new(),
        }
    }

    /// Human-readable estimate such as "28.0B" or "1.2T".
    pub fn estimate_label(&self) -> Option<String> {
        self.estimated_parameters_b.map(format_billions)
    }
}

/// Tunable heuristic for the effective size of Mixture-of-Experts models.
///
/// Only a few experts are active per token and the experts share attention and
/// embedding weights, so `experts x expert_size` overstates the model. The factors
/// below shrink the naive product; the result is clamped to
/// `[expert_size, experts x expert_size]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MoeScaling {
    /// Expert count at which the "very large" multiplier applies
    #[serde(default = "default_large_expert_threshold")]
    pub large_expert_threshold: u32,
    #[serde(default = "default_large_multiplier")]
    pub large_multiplier: f64,
    #[serde(default = "default_medium_expert_threshold")]
    pub medium_expert_threshold: u32,
    #[serde(default = "default_medium_multiplier")]
    pub medium_multiplier: f64,
    /// Fraction of the naive product kept for small expert counts
    #[serde(default = "default_small_factor")]
    pub small_factor: f64,
}

fn default_large_expert_threshold() -> u32 {
    100
}
fn default_large_multiplier() -> f64 {
    15.0
}
fn default_medium_expert_threshold() -> u32 {
    20
}
fn default_medium_multiplier() -> f64 {
    6.0
}
fn default_small_factor() -> f64 {
    0.5
}

impl Default for MoeScaling {
    fn default() -> Self {
        Self {
            large_expert_threshold: default_large_expert_threshold(),
            large_multiplier: default_large_multiplier(),
            medium_expert_threshold: default_medium_expert_threshold(),
            medium_multiplier: default_medium_multiplier(),
            small_factor: default_small_factor(),
        }
    }
}

impl MoeScaling {
    /// Effective parameter estimate (billions) for `experts` experts of `expert_size_b` each.
    pub fn estimate(&self, experts: u32, expert_size_b: f64) -> f64 {
        let naive = experts as f64 * expert_size_b;
        let scaled = if experts >= self.large_expert_threshold {
            expert_size_b * self.large_multiplier
        } else if experts >= self.medium_expert_threshold {
            expert_size_b * self.medium_multiplier
        } else {
            naive * self.small_factor
        };
        scaled.clamp(expert_size_b.min(naive), naive.max(expert_size_b))
    }
}

/// Internal parse failures. Never leaves this module; callers fall back to the
/// next estimate source and ultimately to `Unknown`.
#[derive(Debug, Error, PartialEq)]
pub enum ClassificationError {
    #[error("no parameter count in '{0}'")]
    NoMatch(String),
    #[error("unparseable number '{0}'")]
    BadNumber(String),
}

/// Classifies models by name and server metadata.
#[derive(Debug, Clone, Default)]
pub struct ModelClassifier {
    keywords: KeywordTables,
    moe: MoeScaling,
}

impl ModelClassifier {
    pub fn new(keywords: KeywordTables, moe: MoeScaling) -> Self {
        Self { keywords, moe }
    }

    pub fn keywords(&self) -> &KeywordTables {
        &self.keywords
    }

    /// Derives capabilities for a descriptor. Pure: same input, same output.
    pub fn classify(&self, descriptor: &ModelDescriptor) -> ModelCapabilities {
        let name = descriptor.name.as_str();
        let server_caps: Vec<String> =
            descriptor.capabilities.iter().map(|c| c.to_lowercase()).collect();
        let families_hint = descriptor
            .families
            .iter()
            .any(|f| contains_any(f, &["llava", "vision", "clip", "mllama"][..]));

        let supports_vision = self.keywords.is_vision_name(name)
            || server_caps.iter().any(|c| c == "vision")
            || families_hint;
        let supports_thinking = self.keywords.is_thinking_name(name)
            || server_caps.iter().any(|c| c == "thinking" || c == "reasoning");

        let moe_match = parse_moe_pattern(name);
        let (estimate, source) = self.estimate_parameters(descriptor, moe_match);

        let mut specialties = BTreeSet::new();
        if contains_any(name, CODING_KEYWORDS) {
            specialties.insert(Specialty::Coding);
        }
        if contains_any(name, MATH_KEYWORDS) {
            specialties.insert(Specialty::Math);
        }
        if contains_any(name, LONG_CONTEXT_KEYWORDS) {
            specialties.insert(Specialty::LongContext);
        }

        ModelCapabilities {
            supports_vision,
            supports_thinking,
            size_category: estimate.map(SizeCategory::from_billions).unwrap_or(SizeCategory::Unknown),
            estimated_parameters_b: estimate,
            parameter_source: source,
            is_moe: moe_match.is_some() || contains_any(name, MOE_KEYWORDS),
            specialties,
        }
    }

    /// Priority chain: server-reported size, MoE name pattern, bare count in name.
    fn estimate_parameters(
        &self,
        descriptor: &ModelDescriptor,
        moe_match: Option<(u32, f64)>,
    ) -> (Option<f64>, ParameterSource) {
        if let Some(reported) = descriptor.parameter_size.as_deref() {
            match parse_parameter_size(reported) {
                Ok(value) if value > 0.0 => return (Some(value), ParameterSource::Server),
                Ok(_) => {}
                Err(e) => debug!(model = %descriptor.name, error = %e, "Ignoring server parameter size"),
            }
        }

        if let Some((experts, expert_size)) = moe_match {
            return (Some(self.moe.estimate(experts, expert_size)), ParameterSource::MixtureOfExperts);
        }

        match parse_name_count(&descriptor.name) {
            Ok(value) => (Some(value), ParameterSource::Name),
            Err(e) => {
                debug!(model = %descriptor.name, error = %e, "No parameter count in model name");
                (None, ParameterSource::None)
            }
        }
    }
}

/// Per-session memo of classification results keyed by model identifier.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    entries: HashMap<String, ModelCapabilities>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_classify(
        &mut self,
        classifier: &ModelClassifier,
        descriptor: &ModelDescriptor,
    ) -> ModelCapabilities {
        self.entries
            .entry(descriptor.name.clone())
            .or_insert_with(|| classifier.classify(descriptor))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Converts a number with a magnitude suffix into billions.
fn to_billions(value: f64, suffix: Option<&str>) -> f64 {
    match suffix.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("t") => value * 1000.0,
        Some("m") => value / 1000.0,
        Some("k") => value / 1_000_000.0,
        _ => value,
    }
}

fn parse_number(raw: &str) -> Result<f64, ClassificationError> {
    raw.parse::<f64>()
        .map_err(|_| ClassificationError::BadNumber(raw.to_string()))
}

/// Parses a server-formatted size such as "8.0B", "137M" or "1.2T" into billions.
pub fn parse_parameter_size(raw: &str) -> Result<f64, ClassificationError> {
    let caps = SERVER_SIZE_PATTERN
        .captures(raw)
        .ok_or_else(|| ClassificationError::NoMatch(raw.to_string()))?;
    let value = parse_number(&caps[1])?;
    Ok(to_billions(value, caps.get(2).map(|m| m.as_str())))
}

/// Extracts `(experts, expert_size_b)` from names like "mixtral:8x7b".
pub fn parse_moe_pattern(name: &str) -> Option<(u32, f64)> {
    let caps = MOE_PATTERN.captures(name)?;
    let experts = caps[1].parse::<u32>().ok()?;
    let size = caps[2].parse::<f64>().ok()?;
    if experts == 0 {
        return None;
    }
    Some((experts, to_billions(size, Some(&caps[3]))))
}

/// Extracts a bare parameter count such as "70b" or "335m" from a model name.
fn parse_name_count(name: &str) -> Result<f64, ClassificationError> {
    let caps = BARE_COUNT_PATTERN
        .captures(name)
        .ok_or_else(|| ClassificationError::NoMatch(name.to_string()))?;
    let value = parse_number(&caps[1])?;
    Ok(to_billions(value, Some(&caps[2])))
}

/// Formats billions as "7.0B" or "1.2T".
pub fn format_billions(params_b: f64) -> String {
    if params_b >= 1000.0 {
        format!("{:.1}T", params_b / 1000.0)
    } else if params_b < 1.0 {
        format!("{:.0}M", params_b * 1000.0)
    } else {
        format!("{:.1}B", params_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ModelClassifier {
        ModelClassifier::default()
    }

    #[test]
    fn test_moe_estimate_is_between_expert_and_naive_product() {
        let caps = classifier().classify(&ModelDescriptor::named("mixtral:8x7b"));
        let estimate = caps.estimated_parameters_b.unwrap();
        assert!(estimate < 56.0, "estimate {} should be below 8x7=56", estimate);
        assert!(estimate > 7.0, "estimate {} should exceed one expert", estimate);
        assert_eq!(caps.parameter_source, ParameterSource::MixtureOfExperts);
        assert!(caps.is_moe);
        assert_eq!(caps.size_category, SizeCategory::Medium);
    }

    #[test]
    fn test_moe_scaling_tiers() {
        let moe = MoeScaling::default();
        assert_eq!(moe.estimate(8, 22.0), 88.0);
        assert_eq!(moe.estimate(32, 3.0), 18.0);
        assert_eq!(moe.estimate(128, 17.0), 255.0);
        // Never below a single expert
        assert_eq!(moe.estimate(1, 7.0), 7.0);
    }

    #[test]
    fn test_server_parameter_size_takes_priority() {
        let descriptor = ModelDescriptor::named("mixtral:8x7b").with_parameter_size("46.7B");
        let caps = classifier().classify(&descriptor);
        assert_eq!(caps.estimated_parameters_b, Some(46.7));
        assert_eq!(caps.parameter_source, ParameterSource::Server);
    }

    #[test]
    fn test_bare_counts_from_name() {
        let c = classifier();
        assert_eq!(c.classify(&ModelDescriptor::named("llama3.1:70b")).estimated_parameters_b, Some(70.0));
        assert_eq!(c.classify(&ModelDescriptor::named("llama3.2:3B")).estimated_parameters_b, Some(3.0));
        assert_eq!(c.classify(&ModelDescriptor::named("deepseek-r1:1.5b")).estimated_parameters_b, Some(1.5));
        assert_eq!(c.classify(&ModelDescriptor::named("llama3.2-vision:11b")).estimated_parameters_b, Some(11.0));
        let tiny = c.classify(&ModelDescriptor::named("smollm2:135m"));
        assert!((tiny.estimated_parameters_b.unwrap() - 0.135).abs() < 1e-9);
    }

    #[test]
    fn test_category_thresholds() {
        assert_eq!(SizeCategory::from_billions(16.0), SizeCategory::Small);
        assert_eq!(SizeCategory::from_billions(16.1), SizeCategory::Medium);
        assert_eq!(SizeCategory::from_billions(100.0), SizeCategory::Medium);
        assert_eq!(SizeCategory::from_billions(100.5), SizeCategory::Large);
        assert_eq!(SizeCategory::from_billions(0.0), SizeCategory::Unknown);
    }

    #[test]
    fn test_unknown_when_nothing_applies() {
        let caps = classifier().classify(&ModelDescriptor::named("mistral:latest"));
        assert_eq!(caps.size_category, SizeCategory::Unknown);
        assert_eq!(caps.estimated_parameters_b, None);
        assert_eq!(caps.parameter_source, ParameterSource::None);
    }

    #[test]
    fn test_unparseable_server_size_falls_back_to_name() {
        let descriptor = ModelDescriptor::named("qwen2.5:14b").with_parameter_size("n/a");
        let caps = classifier().classify(&descriptor);
        assert_eq!(caps.estimated_parameters_b, Some(14.0));
        assert_eq!(caps.parameter_source, ParameterSource::Name);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let c = classifier();
        let descriptor = ModelDescriptor::named("deepseek-r1:671b");
        assert_eq!(c.classify(&descriptor), c.classify(&descriptor));
    }

    #[test]
    fn test_server_capabilities_enable_flags() {
        let mut descriptor = ModelDescriptor::named("gemma3:12b");
        descriptor.capabilities = vec!["completion".into(), "vision".into()];
        let caps = classifier().classify(&descriptor);
        assert!(caps.supports_vision);
        assert!(!caps.supports_thinking);
    }

    #[test]
    fn test_specialties() {
        let caps = classifier().classify(&ModelDescriptor::named("qwen2.5-coder:7b"));
        assert!(caps.specialties.contains(&Specialty::Coding));
        let caps = classifier().classify(&ModelDescriptor::named("mathstral:7b"));
        assert!(caps.specialties.contains(&Specialty::Math));
    }

    #[test]
    fn test_cache_classifies_once_per_name() {
        let c = classifier();
        let mut cache = CapabilityCache::new();
        let descriptor = ModelDescriptor::named("llava:7b");
        let first = cache.get_or_classify(&c, &descriptor);
        let second = cache.get_or_classify(&c, &descriptor);
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_parse_parameter_size_suffixes() {
        assert_eq!(parse_parameter_size("8.0B").unwrap(), 8.0);
        assert_eq!(parse_parameter_size("1.2T").unwrap(), 1200.0);
        assert!((parse_parameter_size("137M").unwrap() - 0.137).abs() < 1e-9);
        assert!(parse_parameter_size("unknown").is_err());
    }

    #[test]
    fn test_format_billions() {
        assert_eq!(format_billions(28.0), "28.0B");
        assert_eq!(format_billions(1200.0), "1.2T");
        assert_eq!(format_billions(0.335), "335M");
    }
}
