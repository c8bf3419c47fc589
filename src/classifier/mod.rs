//! # Model Classifier
//!
//! Derives vision/thinking capability, size category and an MoE-aware parameter
//! estimate from a model's name and whatever metadata the server reported.

#[allow(clippy::module_inception)]
mod classifier;
mod keywords;

pub use classifier::{
    format_billions, parse_moe_pattern, parse_parameter_size, CapabilityCache,
    ClassificationError, ModelCapabilities, ModelClassifier, MoeScaling, ParameterSource,
    SizeCategory, Specialty, MEDIUM_MAX_B, SMALL_MAX_B,
};
pub use keywords::KeywordTables;
