use std::collections::BTreeMap;

use super::types::{ParamValue, ParameterSet};
use crate::classifier::{ModelCapabilities, Specialty};

/// Name of the preset every resolution starts from.
pub const DEFAULT_PRESET: &str = "default";

fn set(entries: &[(&str, ParamValue)]) -> ParameterSet {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn f(v: f64) -> ParamValue {
    ParamValue::Float(v)
}

fn i(v: i64) -> ParamValue {
    ParamValue::Int(v)
}

fn t(v: &str) -> ParamValue {
    ParamValue::Text(v.to_string())
}

/// Presets shipped with the tool. Configuration may replace any of them.
pub fn builtin_presets() -> BTreeMap<String, ParameterSet> {
    let mut presets = BTreeMap::new();
    presets.insert(
        DEFAULT_PRESET.to_string(),
        set(&[
            ("temperature", f(0.7)),
            ("top_k", i(40)),
            ("top_p", f(0.9)),
            ("repeat_penalty", f(1.1)),
            ("num_ctx", i(4096)),
            ("enable_thinking", t("auto")),
            ("enable_vision", t("auto")),
            ("thinking_format", t("xml")),
        ]),
    );
    presets.insert(
        "coding".to_string(),
        set(&[
            ("temperature", f(0.1)),
            ("top_k", i(20)),
            ("top_p", f(0.9)),
            ("repeat_penalty", f(1.05)),
            ("num_ctx", i(8192)),
            ("num_predict", i(2048)),
        ]),
    );
    presets.insert(
        "creative_writing".to_string(),
        set(&[
            ("temperature", f(0.9)),
            ("top_k", i(80)),
            ("top_p", f(0.95)),
            ("repeat_penalty", f(1.15)),
            ("num_predict", i(2048)),
        ]),
    );
    presets.insert(
        "reasoning_mode".to_string(),
        set(&[
            ("temperature", f(0.3)),
            ("top_k", i(30)),
            ("top_p", f(0.9)),
            ("num_ctx", i(8192)),
            ("num_predict", i(4096)),
            ("enable_thinking", ParamValue::Bool(true)),
        ]),
    );
    presets.insert(
        "vision_analysis".to_string(),
        set(&[
            ("temperature", f(0.4)),
            ("top_k", i(40)),
            ("top_p", f(0.9)),
            ("num_ctx", i(4096)),
            ("enable_vision", ParamValue::Bool(true)),
            ("image_quality", t("high")),
        ]),
    );
    presets.insert(
        "mathematical".to_string(),
        set(&[
            ("temperature", f(0.05)),
            ("top_k", i(10)),
            ("top_p", f(0.8)),
            ("repeat_penalty", f(1.0)),
            ("num_predict", i(1024)),
        ]),
    );
    presets.insert(
        "translation".to_string(),
        set(&[
            ("temperature", f(0.3)),
            ("top_k", i(40)),
            ("top_p", f(0.9)),
            ("repeat_penalty", f(1.05)),
        ]),
    );
    presets.insert(
        "summarization".to_string(),
        set(&[
            ("temperature", f(0.3)),
            ("top_k", i(30)),
            ("top_p", f(0.85)),
            ("num_ctx", i(8192)),
            ("num_predict", i(512)),
        ]),
    );
    presets.insert(
        "text_analysis".to_string(),
        set(&[
            ("temperature", f(0.4)),
            ("top_k", i(40)),
            ("top_p", f(0.9)),
            ("num_ctx", i(8192)),
        ]),
    );
    presets.insert(
        "moe_optimized".to_string(),
        set(&[
            ("temperature", f(0.6)),
            ("top_k", i(40)),
            ("top_p", f(0.9)),
            ("num_batch", i(256)),
            ("num_ctx", i(4096)),
        ]),
    );
    presets
}

const MATH_INDICATORS: &[&str] = &[
    "calculate", "solve", "equation", "formula", "math", "algebra", "geometry", "statistics",
    "probability", "derivative", "integral",
];
const CODE_INDICATORS: &[&str] = &[
    "code", "program", "function", "debug", "error", "bug", "algorithm", "syntax",
    "programming", "script", "refactor",
];
const TRANSLATION_INDICATORS: &[&str] = &[
    "translate", "translation", "language", "español", "français", "deutsch", "italiano",
    "português", "中文", "日本語",
];
const CREATIVE_INDICATORS: &[&str] = &[
    "write", "story", "poem", "creative", "fiction", "novel", "character", "plot", "narrative",
    "dialogue", "screenplay",
];
const SUMMARY_INDICATORS: &[&str] = &[
    "summary", "summarize", "summarise", "brief", "overview", "key points", "main ideas",
    "extract", "condense",
];
const ANALYSIS_INDICATORS: &[&str] = &[
    "analyze", "analyse", "analysis", "examine", "evaluate", "assess", "review", "interpret",
    "explain",
];

/// Picks the preset that best fits a request.
///
/// Attached images win, then what the model is (vision, reasoning, MoE, math),
/// then keywords in the prompt. Falls back to [`DEFAULT_PRESET`].
pub fn suggest_preset(
    capabilities: &ModelCapabilities,
    prompt: Option<&str>,
    has_image: bool,
) -> &'static str {
    if has_image || capabilities.supports_vision {
        return "vision_analysis";
    }
    if capabilities.supports_thinking {
        return "reasoning_mode";
    }
    if capabilities.is_moe {
        return "moe_optimized";
    }
    if capabilities.specialties.contains(&Specialty::Math) {
        return "mathematical";
    }

    if let Some(prompt) = prompt {
        let lowered = prompt.to_lowercase();
        let hit = |words: &[&str]| words.iter().any(|w| lowered.contains(w));
        let by_prompt = [
            (MATH_INDICATORS, "mathematical"),
            (CODE_INDICATORS, "coding"),
            (TRANSLATION_INDICATORS, "translation"),
            (CREATIVE_INDICATORS, "creative_writing"),
            (SUMMARY_INDICATORS, "summarization"),
            (ANALYSIS_INDICATORS, "text_analysis"),
        ];
        for (words, preset) in by_prompt {
            if hit(words) {
                return preset;
            }
        }
    }

    DEFAULT_PRESET
}
