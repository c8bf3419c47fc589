use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Local;
use colored::*;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use super::documents::{clean_title, fallback_title, save_markdown, Exchange, TextAttachment, TITLE_SYSTEM_PROMPT};
use crate::benchmark::strip_thinking;
use crate::chat::display::{
    display_models_table, display_parameters, display_running_models, display_service_status,
};
use crate::classifier::{CapabilityCache, ModelCapabilities, ModelClassifier};
use crate::config::{BlacklistConfig, ChatSettings};
use crate::lifecycle::{LifecycleError, LifecycleManager, LoadOutcome};
use crate::params::{
    option_kind, suggest_preset, GenerationParameters, ParamValue, ParameterResolver, ParameterSet,
    DEFAULT_PRESET,
};
use crate::transport::{ChatMessage, ChatRequest, GenerateRequest, ModelDescriptor};

/// Characters of prompt and answer shown to the model when it titles an exchange.
const TITLE_SAMPLE_CHARS: usize = 800;

/// Keys accepted by `set` besides the generation options.
const CONTROL_KEYS: &[&str] = &[
    "enable_thinking",
    "enable_vision",
    "image_quality",
    "max_image_size",
    "thinking_format",
];

/// Per-session chat state: the active model, its conversation and the
/// session's parameter choices.
#[derive(Debug, Default)]
pub struct ChatSession {
    pub model: Option<String>,
    pub capabilities: Option<ModelCapabilities>,
    /// Fixed preset; `None` picks one per prompt
    pub preset: Option<String>,
    pub overrides: ParameterSet,
    pub history: Vec<ChatMessage>,
    pub pending_images: Vec<String>,
    pub pending_text: Option<TextAttachment>,
    /// Most recent answered prompt, for `save`
    pub last_exchange: Option<Exchange>,
    pub system_prompt: Option<String>,
    pub show_thinking: bool,
}

impl ChatSession {
    pub fn new(preset: Option<String>, system_prompt: Option<String>) -> Self {
        Self {
            preset,
            system_prompt,
            ..Default::default()
        }
    }

    /// Preset used for the next prompt.
    pub fn preset_for(&self, prompt: Option<&str>) -> String {
        match (&self.preset, &self.capabilities) {
            (Some(preset), _) => preset.clone(),
            (None, Some(caps)) => {
                suggest_preset(caps, prompt, !self.pending_images.is_empty()).to_string()
            }
            (None, None) => DEFAULT_PRESET.to_string(),
        }
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities.clone().unwrap_or_else(ModelCapabilities::unknown)
    }

    /// Forgets everything tied to the conversation with the current model.
    pub fn clear_conversation(&mut self) {
        self.history.clear();
        self.pending_images.clear();
        self.pending_text = None;
        self.last_exchange = None;
    }
}

/// Shared resources and state references for command handlers.
///
/// # Fields
///
/// * `manager` - Lifecycle manager owning the loaded model and recovery state
/// * `classifier` - Derives capabilities for models as they are selected
/// * `resolver` - Merges presets and overrides into request parameters
/// * `session` - Mutable chat session
/// * `blacklist` - Models hidden from listing and selection
/// * `settings` - Attachment lookup and answer output directories
/// * `interrupt` - Set by the Ctrl-C handler while a request is in flight
pub(super) struct ChatContext<'a> {
    pub manager: &'a mut LifecycleManager,
    pub classifier: &'a ModelClassifier,
    pub resolver: &'a ParameterResolver,
    pub cache: &'a mut CapabilityCache,
    pub session: &'a mut ChatSession,
    pub blacklist: &'a BlacklistConfig,
    pub settings: &'a ChatSettings,
    pub interrupt: Arc<AtomicBool>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ImageError {
    #[error("cannot read image {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("image is {size_kib} KiB, larger than the {limit_kib} KiB limit")]
    TooLarge { size_kib: u64, limit_kib: u32 },
    #[error("data URL has no base64 payload")]
    MalformedDataUrl,
}

/// Base64 payload for an image given as a file path or a `data:` URL.
pub fn encode_image(source: &str, max_kib: Option<u32>) -> Result<String, ImageError> {
    let (payload, size_bytes) = if source.starts_with("data:") {
        let (_, encoded) = source
            .split_once(";base64,")
            .ok_or(ImageError::MalformedDataUrl)?;
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(ImageError::MalformedDataUrl);
        }
        (encoded.to_string(), encoded.len() as u64 * 3 / 4)
    } else {
        let bytes = std::fs::read(Path::new(source)).map_err(|e| ImageError::Read {
            path: source.to_string(),
            reason: e.to_string(),
        })?;
        let size = bytes.len() as u64;
        (STANDARD.encode(bytes), size)
    };

    if let Some(limit_kib) = max_kib {
        let size_kib = size_bytes.div_ceil(1024);
        if size_kib > u64::from(limit_kib) {
            return Err(ImageError::TooLarge { size_kib, limit_kib });
        }
    }
    Ok(payload)
}

/// Splits `key=value` pairs. Returns the offending token on a malformed pair.
pub fn parse_assignments(args: &str) -> Result<Vec<(String, ParamValue)>, String> {
    args.split_whitespace()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {
                Ok((key.trim().to_lowercase(), ParamValue::parse_str(value)))
            }
            _ => Err(pair.to_string()),
        })
        .collect()
}

fn resolve(context: &ChatContext<'_>, prompt: Option<&str>) -> Option<(String, GenerationParameters)> {
    let preset = context.session.preset_for(prompt);
    match context.resolver.resolve_for(
        Some(&preset),
        Some(&context.session.overrides),
        &context.session.capabilities(),
    ) {
        Ok(params) => Some((preset, params)),
        Err(e) => {
            println!("{}", e.to_string().red());
            None
        }
    }
}

fn report_error(context: &ChatContext<'_>, err: &LifecycleError) {
    println!("{} {}", "Error:".red().bold(), err);
    if let LifecycleError::GiveUp { .. } = err {
        let unit = context.manager.service().unit();
        println!(
            "{}",
            format!("Check the service manually: systemctl status {}", unit).yellow()
        );
        println!(
            "{}",
            format!("Restart it by hand if needed: {}", context.manager.service().manual_restart_hint()).yellow()
        );
    }
}

pub(super) async fn handle_list_models(context: &mut ChatContext<'_>) {
    match context.manager.list_models_detailed(false).await {
        Ok(mut models) => {
            let hidden = context.blacklist.remove_blocked(&mut models);
            let rows: Vec<(ModelDescriptor, ModelCapabilities)> = models
                .into_iter()
                .map(|m| {
                    let caps = context.cache.get_or_classify(context.classifier, &m);
                    (m, caps)
                })
                .collect();
            display_models_table(&rows, context.session.model.as_deref());
            if !hidden.is_empty() {
                println!(
                    "{}",
                    format!("{} blacklisted model(s) hidden: {}", hidden.len(), hidden.join(", "))
                        .bright_black()
                );
            }
        }
        Err(e) => report_error(context, &e),
    }
}

pub(super) async fn handle_use_model(context: &mut ChatContext<'_>, model: &str) {
    if context.blacklist.blocks(model) {
        println!("{}", format!("{} is blacklisted and cannot be selected", model).red());
        return;
    }
    println!("Loading {}...", model.yellow());
    match context.manager.ensure_loaded(model).await {
        Ok(outcome) => {
            let Some(descriptor) = context.manager.state().current_model().cloned() else {
                println!("{}", "Model loaded but the server did not report it as current".yellow());
                return;
            };
            let caps = context.cache.get_or_classify(context.classifier, &descriptor);
            let switched = context.session.model.as_deref() != Some(descriptor.name.as_str());

            match outcome {
                LoadOutcome::AlreadyLoaded => println!("{} is already loaded", descriptor.name.yellow()),
                LoadOutcome::Loaded { load_duration, replaced, .. } => {
                    if let Some(previous) = replaced {
                        println!("Unloaded {}", previous.bright_black());
                    }
                    println!(
                        "Loaded {} in {:.1}s",
                        descriptor.name.yellow(),
                        load_duration.as_secs_f64()
                    );
                }
            }

            let mut traits = Vec::new();
            if let Some(label) = caps.estimate_label() {
                traits.push(label);
            }
            traits.push(caps.size_category.as_str().to_string());
            if caps.supports_vision {
                traits.push("vision".to_string());
            }
            if caps.supports_thinking {
                traits.push("thinking".to_string());
            }
            if caps.is_moe {
                traits.push("MoE".to_string());
            }
            println!("{}", traits.join(" | ").bright_black());

            if switched {
                context.session.clear_conversation();
            }
            info!(model = %descriptor.name, "Chat model selected");
            context.session.model = Some(descriptor.name);
            context.session.capabilities = Some(caps);
        }
        Err(e) => report_error(context, &e),
    }
}

pub(super) fn handle_preset(context: &mut ChatContext<'_>, name: &str) {
    if name.eq_ignore_ascii_case("auto") {
        context.session.preset = None;
        println!("Preset chosen per prompt from the model and the prompt text");
        return;
    }
    match context.resolver.preset(name) {
        Ok(_) => {
            context.session.preset = Some(name.trim().to_lowercase());
            if let Some((preset, params)) = resolve(context, None) {
                display_parameters(&preset, &params);
            }
        }
        Err(e) => println!("{}", e.to_string().red()),
    }
}

pub(super) fn handle_list_presets(context: &ChatContext<'_>) {
    let current = context.session.preset.as_deref();
    for name in context.resolver.preset_names() {
        if Some(name) == current {
            println!("  {} {}", name.yellow().bold(), "(active)".bright_black());
        } else {
            println!("  {}", name);
        }
    }
    if current.is_none() {
        println!("{}", "Preset mode: auto".bright_black());
    }
}

pub(super) fn handle_set(context: &mut ChatContext<'_>, args: &str) {
    let pairs = match parse_assignments(args) {
        Ok(pairs) if !pairs.is_empty() => pairs,
        Ok(_) => {
            println!("Usage: set <key>=<value> [<key>=<value> ...]");
            return;
        }
        Err(bad) => {
            println!("{}", format!("Expected key=value, got '{}'", bad).red());
            return;
        }
    };
    for (key, value) in pairs {
        if option_kind(&key).is_none() && !CONTROL_KEYS.contains(&key.as_str()) {
            println!("{}", format!("Unknown parameter '{}' ignored", key).yellow());
            continue;
        }
        if value.is_default_marker() {
            println!("{} reset to preset value", key.green());
        } else {
            println!("{} = {}", key.green(), value);
        }
        context.session.overrides.insert(key, value);
    }
}

pub(super) fn handle_show_parameters(context: &ChatContext<'_>) {
    if let Some((preset, params)) = resolve(context, None) {
        display_parameters(&preset, &params);
    }
}

pub(super) async fn handle_status(context: &mut ChatContext<'_>) {
    let status = context.manager.service().status().await;
    display_service_status(&status, Some(context.manager.state()));
    match context.manager.running_models().await {
        Ok(models) => display_running_models(&models),
        Err(e) => report_error(context, &e),
    }
}

pub(super) async fn handle_unload(context: &mut ChatContext<'_>) {
    let Some(model) = context.session.model.clone() else {
        println!("No model selected");
        return;
    };
    match context.manager.unload(&model).await {
        Ok(()) => {
            println!("Unloaded {}", model.yellow());
            context.session.model = None;
            context.session.capabilities = None;
            context.session.clear_conversation();
        }
        Err(e) => report_error(context, &e),
    }
}

pub(super) fn handle_image(context: &mut ChatContext<'_>, source: &str) {
    let Some((_, params)) = resolve(context, None) else {
        return;
    };
    match encode_image(source, params.max_image_size) {
        Ok(encoded) => {
            if !params.enable_vision {
                warn!(source, "Image attached while vision is disabled");
                println!(
                    "{}",
                    "Vision is not enabled for this model; the image is sent anyway".yellow()
                );
            }
            context.session.pending_images.push(encoded);
            println!(
                "Image attached ({} pending for the next message)",
                context.session.pending_images.len()
            );
        }
        Err(e) => println!("{}", e.to_string().red()),
    }
}

/// Loads a text file for the next prompt. With a prompt after the path,
/// sends it right away.
pub(super) async fn handle_text(context: &mut ChatContext<'_>, args: &str) {
    let (source, prompt) = match args.split_once(char::is_whitespace) {
        Some((source, prompt)) => (source, prompt.trim()),
        None => (args, ""),
    };
    match TextAttachment::load(source, &context.settings.texts_dir) {
        Ok(text) => {
            println!(
                "Text loaded: {} ({}, {} lines)",
                text.name.cyan(),
                text.content_type,
                text.content.lines().count()
            );
            context.session.pending_text = Some(text);
            if prompt.is_empty() {
                println!("It will be sent with your next message");
            } else {
                handle_chat(context, prompt).await;
            }
        }
        Err(e) => println!("{}", e.to_string().red()),
    }
}

pub(super) async fn handle_chat(context: &mut ChatContext<'_>, prompt: &str) {
    let Some(model) = context.session.model.clone() else {
        println!("No model selected. Use 'use <model>' first.");
        return;
    };
    let Some((preset, params)) = resolve(context, Some(prompt)) else {
        return;
    };

    let text = context.session.pending_text.take();
    let content = match &text {
        Some(text) => text.frame_prompt(prompt),
        None => prompt.to_string(),
    };

    let mut messages = Vec::with_capacity(context.session.history.len() + 2);
    if let Some(system) = &context.session.system_prompt {
        messages.push(ChatMessage::system(system.clone()));
    }
    messages.extend(context.session.history.iter().cloned());
    let mut user = ChatMessage::user(params.apply_thinking_instruction(&content));
    user.images = std::mem::take(&mut context.session.pending_images);
    let had_images = !user.images.is_empty();
    messages.push(user);

    let request = ChatRequest {
        model: model.clone(),
        messages,
        options: params.options_json(),
        keep_alive: Some(Value::String(context.manager.options().keep_alive.clone())),
        stream: false,
    };

    context.interrupt.store(false, Ordering::SeqCst);
    let started = Instant::now();
    let result = context.manager.chat(&model, &request).await;
    let elapsed = started.elapsed();

    if context.interrupt.swap(false, Ordering::SeqCst) {
        println!("\n{}", "[Generation Interrupted]".yellow());
        context.session.pending_text = text;
        return;
    }

    match result {
        Ok(completion) => {
            let answer = strip_thinking(&completion.text);
            if context.session.show_thinking && answer != completion.text.trim() {
                println!("\n{}", completion.text.trim().bright_black());
            }
            println!("\n{} {}", format!("[{}]", model).yellow().bold(), answer.bright_cyan());
            let speed = completion
                .tokens_per_second()
                .map(|tps| format!(", {:.1} tok/s", tps))
                .unwrap_or_default();
            println!(
                "{}",
                format!("({}, {:.1}s{})", preset, elapsed.as_secs_f64(), speed).bright_black()
            );

            context.session.history.push(ChatMessage::user(content));
            context.session.history.push(ChatMessage::assistant(answer));
            context.session.last_exchange = Some(Exchange {
                model,
                prompt: prompt.to_string(),
                raw_response: completion.text,
                preset,
                parameters: request.options,
                system_prompt: context.session.system_prompt.clone(),
                attachment: text.map(|t| (t.name, t.content_type)),
                had_images,
            });
        }
        Err(e) => {
            context.session.pending_text = text;
            report_error(context, &e);
        }
    }
}

/// Saves the last answer as markdown. Without a title the model suggests one.
pub(super) async fn handle_save(context: &mut ChatContext<'_>, title: Option<&str>) {
    let Some(exchange) = context.session.last_exchange.clone() else {
        println!("Nothing to save yet");
        return;
    };
    let title = match title {
        Some(title) => clean_title(title, &exchange.prompt),
        None => suggest_title(context, &exchange).await,
    };
    match save_markdown(&context.settings.answers_dir, &exchange, &title, &Local::now()) {
        Ok(path) => {
            info!(path = %path.display(), "Answer saved");
            println!("Saved to {}", path.display().to_string().green());
        }
        Err(e) => println!("{}", e.to_string().red()),
    }
}

async fn suggest_title(context: &mut ChatContext<'_>, exchange: &Exchange) -> String {
    let sample = |text: &str| text.chars().take(TITLE_SAMPLE_CHARS).collect::<String>();
    let request = GenerateRequest {
        system: Some(TITLE_SYSTEM_PROMPT.to_string()),
        keep_alive: Some(Value::String(context.manager.options().keep_alive.clone())),
        ..GenerateRequest::new(
            exchange.model.clone(),
            format!(
                "Create a title for this exchange. Query: {} Response: {}",
                sample(&exchange.prompt),
                sample(&strip_thinking(&exchange.raw_response))
            ),
        )
    };
    match context.manager.generate(&exchange.model, &request).await {
        Ok(completion) => clean_title(&completion.text, &exchange.prompt),
        Err(e) => {
            warn!(error = %e, "Title generation failed, using the prompt");
            fallback_title(&exchange.prompt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_image_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.png");
        std::fs::write(&path, b"not really a png").unwrap();
        let encoded = encode_image(path.to_str().unwrap(), None).unwrap();
        assert_eq!(STANDARD.decode(encoded).unwrap(), b"not really a png");
    }

    #[test]
    fn test_encode_image_enforces_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.jpg");
        std::fs::write(&path, vec![0u8; 3 * 1024]).unwrap();
        let err = encode_image(path.to_str().unwrap(), Some(2)).unwrap_err();
        assert_eq!(err, ImageError::TooLarge { size_kib: 3, limit_kib: 2 });
        assert!(encode_image(path.to_str().unwrap(), Some(3)).is_ok());
    }

    #[test]
    fn test_encode_image_accepts_data_url() {
        let url = "data:image/png;base64,aGVsbG8=";
        assert_eq!(encode_image(url, None).unwrap(), "aGVsbG8=");
        assert_eq!(encode_image("data:image/png,raw", None), Err(ImageError::MalformedDataUrl));
    }

    #[test]
    fn test_missing_image_is_a_read_error() {
        assert!(matches!(
            encode_image("/definitely/not/here.png", None),
            Err(ImageError::Read { .. })
        ));
    }

    #[test]
    fn test_parse_assignments() {
        let pairs = parse_assignments("temperature=0.5 TOP_K=40 enable_thinking=auto").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("temperature".to_string(), ParamValue::Float(0.5)),
                ("top_k".to_string(), ParamValue::Int(40)),
                ("enable_thinking".to_string(), ParamValue::Text("auto".to_string())),
            ]
        );
        assert_eq!(parse_assignments("temperature"), Err("temperature".to_string()));
        assert_eq!(parse_assignments("=1"), Err("=1".to_string()));
    }

    #[test]
    fn test_session_preset_selection() {
        let mut session = ChatSession::new(None, None);
        assert_eq!(session.preset_for(Some("hello")), DEFAULT_PRESET);

        let mut caps = ModelCapabilities::unknown();
        caps.supports_thinking = true;
        session.capabilities = Some(caps);
        assert_eq!(session.preset_for(Some("hello")), "reasoning_mode");

        session.preset = Some("coding".to_string());
        assert_eq!(session.preset_for(Some("hello")), "coding");
    }
}
