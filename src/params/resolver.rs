use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::presets::{builtin_presets, DEFAULT_PRESET};
use super::types::{
    option_kind, Flag, GenerationParameters, ParamError, ParamKind, ParamValue, ParameterSet,
};
use crate::classifier::ModelCapabilities;

/// Merges preset, persisted and call-time parameters into one typed set.
///
/// Later layers win key by key: base, then the named preset, then the persisted
/// configuration overrides, then call-time overrides.
#[derive(Debug, Clone)]
pub struct ParameterResolver {
    presets: BTreeMap<String, ParameterSet>,
    persisted: ParameterSet,
}

impl Default for ParameterResolver {
    fn default() -> Self {
        Self::new(BTreeMap::new(), ParameterSet::new())
    }
}

impl ParameterResolver {
    /// Configured presets replace built-ins of the same name.
    pub fn new(configured: BTreeMap<String, ParameterSet>, persisted: ParameterSet) -> Self {
        let mut presets = builtin_presets();
        for (name, set) in configured {
            presets.insert(name.trim().to_lowercase(), set);
        }
        Self { presets, persisted }
    }

    pub fn preset_names(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }

    pub fn preset(&self, name: &str) -> Result<&ParameterSet, ParamError> {
        self.presets
            .get(&name.trim().to_lowercase())
            .ok_or_else(|| ParamError::UnknownPreset {
                name: name.to_string(),
                available: self.preset_names().join(", "),
            })
    }

    /// The base layer every resolution starts from.
    pub fn base(&self) -> ParameterSet {
        self.presets.get(DEFAULT_PRESET).cloned().unwrap_or_default()
    }

    /// Resolves against the default base layer.
    pub fn resolve_for(
        &self,
        preset: Option<&str>,
        overrides: Option<&ParameterSet>,
        capabilities: &ModelCapabilities,
    ) -> Result<GenerationParameters, ParamError> {
        self.resolve(&self.base(), preset, overrides, capabilities)
    }

    pub fn resolve(
        &self,
        base: &ParameterSet,
        preset: Option<&str>,
        overrides: Option<&ParameterSet>,
        capabilities: &ModelCapabilities,
    ) -> Result<GenerationParameters, ParamError> {
        let preset_layer = preset.map(|name| self.preset(name)).transpose()?;

        let mut merged: ParameterSet = BTreeMap::new();
        let layers = [Some(base), preset_layer, Some(&self.persisted), overrides];
        for layer in layers.into_iter().flatten() {
            for (key, value) in layer {
                let key = key.trim().to_lowercase();
                if value.is_default_marker() {
                    merged.remove(&key);
                } else {
                    merged.insert(key, value.clone());
                }
            }
        }

        let params = build_parameters(merged, capabilities);
        debug!(
            preset = preset.unwrap_or(DEFAULT_PRESET),
            options = params.options.len(),
            thinking = params.enable_thinking,
            vision = params.enable_vision,
            "Resolved generation parameters"
        );
        Ok(params)
    }
}

fn build_parameters(merged: ParameterSet, capabilities: &ModelCapabilities) -> GenerationParameters {
    let mut params = GenerationParameters::default();
    let mut thinking = Flag::Auto;
    let mut vision = Flag::Auto;

    for (key, value) in merged {
        match key.as_str() {
            "enable_thinking" => thinking = flag_or_auto(&key, &value),
            "enable_vision" => vision = flag_or_auto(&key, &value),
            "image_quality" => params.image_quality = Some(value.as_text()),
            "thinking_format" => params.thinking_format = Some(value.as_text()),
            "max_image_size" => {
                params.max_image_size = value.as_i64().and_then(|v| u32::try_from(v).ok())
            }
            _ => match option_kind(&key) {
                Some(kind) => {
                    if let Some(coerced) = coerce(&value, kind) {
                        params.options.insert(key, coerced);
                    } else {
                        warn!(key = %key, value = %value, "Dropping parameter with unusable value");
                    }
                }
                None => debug!(key = %key, "Ignoring unknown parameter"),
            },
        }
    }

    params.enable_thinking = thinking.resolve(capabilities.supports_thinking);
    params.enable_vision = vision.resolve(capabilities.supports_vision);
    params
}

fn flag_or_auto(key: &str, value: &ParamValue) -> Flag {
    Flag::from_value(value).unwrap_or_else(|| {
        warn!(key = %key, value = %value, "Treating unrecognized flag value as auto");
        Flag::Auto
    })
}

fn coerce(value: &ParamValue, kind: ParamKind) -> Option<ParamValue> {
    match kind {
        ParamKind::Float => value.as_f64().map(ParamValue::Float),
        ParamKind::Int => value.as_i64().map(ParamValue::Int),
        ParamKind::Bool => value.as_bool().map(ParamValue::Bool),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ModelClassifier;
    use crate::transport::ModelDescriptor;

    fn caps(name: &str) -> ModelCapabilities {
        ModelClassifier::default().classify(&ModelDescriptor::named(name))
    }

    fn overrides(entries: &[(&str, ParamValue)]) -> ParameterSet {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_override_wins_over_preset() {
        let resolver = ParameterResolver::default();
        let extra = overrides(&[("temperature", ParamValue::Float(0.5))]);
        let params = resolver
            .resolve_for(Some("coding"), Some(&extra), &caps("llama3.1:8b"))
            .unwrap();

        assert_eq!(params.temperature(), Some(0.5));
        let coding = resolver.preset("coding").unwrap();
        for (key, value) in coding.iter().filter(|(k, _)| k.as_str() != "temperature") {
            let kind = option_kind(key).unwrap();
            assert_eq!(params.get(key), coerce(value, kind).as_ref(), "key {}", key);
        }
    }

    #[test]
    fn test_preset_beats_base() {
        let resolver = ParameterResolver::default();
        let params = resolver.resolve_for(Some("coding"), None, &caps("llama3.1:8b")).unwrap();
        assert_eq!(params.temperature(), Some(0.1));
        assert_eq!(params.get("num_ctx"), Some(&ParamValue::Int(8192)));
        assert_eq!(params.get("num_predict"), Some(&ParamValue::Int(2048)));
        assert_eq!(params.thinking_format.as_deref(), Some("xml"));
    }

    #[test]
    fn test_auto_flags_follow_capabilities() {
        let resolver = ParameterResolver::default();
        let plain = resolver.resolve_for(None, None, &caps("llama3.1:8b")).unwrap();
        assert!(!plain.enable_thinking);
        assert!(!plain.enable_vision);

        let reasoning = resolver.resolve_for(None, None, &caps("deepseek-r1:8b")).unwrap();
        assert!(reasoning.enable_thinking);

        let vision = resolver.resolve_for(None, None, &caps("llava:7b")).unwrap();
        assert!(vision.enable_vision);
    }

    #[test]
    fn test_explicit_flag_overrides_capability() {
        let resolver = ParameterResolver::default();
        let extra = overrides(&[("enable_thinking", ParamValue::Text("false".into()))]);
        let params = resolver
            .resolve_for(None, Some(&extra), &caps("deepseek-r1:8b"))
            .unwrap();
        assert!(!params.enable_thinking);
    }

    #[test]
    fn test_unknown_preset_is_an_error() {
        let resolver = ParameterResolver::default();
        let err = resolver.resolve_for(Some("nope"), None, &caps("llama3.1:8b")).unwrap_err();
        match err {
            ParamError::UnknownPreset { name, available } => {
                assert_eq!(name, "nope");
                assert!(available.contains("coding"));
            }
        }
    }

    #[test]
    fn test_unknown_keys_and_bad_values_are_dropped() {
        let resolver = ParameterResolver::default();
        let extra = overrides(&[
            ("bogus_option", ParamValue::Int(3)),
            ("top_k", ParamValue::Text("many".into())),
            ("num_predict", ParamValue::Text("256".into())),
        ]);
        let params = resolver.resolve_for(None, Some(&extra), &caps("llama3.1:8b")).unwrap();
        assert!(params.get("bogus_option").is_none());
        assert!(params.get("top_k").is_none());
        assert_eq!(params.get("num_predict"), Some(&ParamValue::Int(256)));
        assert!(!params.options_json().contains_key("bogus_option"));
    }

    #[test]
    fn test_default_marker_removes_key() {
        let resolver = ParameterResolver::default();
        let extra = overrides(&[("num_ctx", ParamValue::Int(-1))]);
        let params = resolver.resolve_for(None, Some(&extra), &caps("llama3.1:8b")).unwrap();
        assert!(params.get("num_ctx").is_none());
    }

    #[test]
    fn test_persisted_layer_sits_between_preset_and_overrides() {
        let persisted = overrides(&[("top_k", ParamValue::Int(5)), ("seed", ParamValue::Int(42))]);
        let resolver = ParameterResolver::new(BTreeMap::new(), persisted);
        let extra = overrides(&[("seed", ParamValue::Int(7))]);
        let params = resolver
            .resolve_for(Some("coding"), Some(&extra), &caps("llama3.1:8b"))
            .unwrap();
        assert_eq!(params.get("top_k"), Some(&ParamValue::Int(5)));
        assert_eq!(params.get("seed"), Some(&ParamValue::Int(7)));
    }

    #[test]
    fn test_configured_preset_replaces_builtin() {
        let mut configured = BTreeMap::new();
        configured.insert("Coding".to_string(), overrides(&[("temperature", ParamValue::Float(0.2))]));
        let resolver = ParameterResolver::new(configured, ParameterSet::new());
        let params = resolver.resolve_for(Some("coding"), None, &caps("llama3.1:8b")).unwrap();
        assert_eq!(params.temperature(), Some(0.2));
        // Base layer still applies
        assert_eq!(params.get("top_k"), Some(&ParamValue::Int(40)));
    }
}
