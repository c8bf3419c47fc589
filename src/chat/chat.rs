use std::error::Error;
use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::info;

use super::command_handlers::{
    handle_chat, handle_image, handle_list_models, handle_list_presets, handle_preset, handle_save,
    handle_set, handle_show_parameters, handle_status, handle_text, handle_unload,
    handle_use_model, ChatContext, ChatSession,
};
use crate::classifier::{CapabilityCache, ModelClassifier};
use crate::config::{BlacklistConfig, ChatSettings};
use crate::lifecycle::LifecycleManager;
use crate::params::ParameterResolver;

/// Commands are bare words until a model is active, then need this prefix.
const COMMAND_PREFIX: char = '/';

/// Startup choices for a chat session.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub model: Option<String>,
    pub preset: Option<String>,
    pub system_prompt: Option<String>,
    pub blacklist: BlacklistConfig,
    pub settings: ChatSettings,
}

#[derive(Debug, PartialEq)]
pub(super) enum Command<'a> {
    Exit,
    Help,
    Clear,
    Models,
    Presets,
    Params,
    Status,
    Unload,
    Reset,
    Use(&'a str),
    Preset(&'a str),
    Set(&'a str),
    Image(&'a str),
    Text(&'a str),
    Save(Option<&'a str>),
    Thinking(bool),
    System(Option<&'a str>),
    Usage(&'static str),
    Prompt(&'a str),
}

pub(super) fn parse_command(input: &str, model_active: bool) -> Command<'_> {
    let input = input.trim();
    let (body, prefixed) = match input.strip_prefix(COMMAND_PREFIX) {
        Some(rest) => (rest.trim_start(), true),
        None => (input, false),
    };
    if model_active && !prefixed {
        return Command::Prompt(input);
    }

    let (word, rest) = match body.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (body, ""),
    };
    match (word.to_lowercase().as_str(), rest.is_empty()) {
        ("exit" | "quit" | "bye", _) => Command::Exit,
        ("help", _) => Command::Help,
        ("clear", _) => Command::Clear,
        ("models", _) => Command::Models,
        ("presets", _) => Command::Presets,
        ("params", _) => Command::Params,
        ("status", _) => Command::Status,
        ("unload", _) => Command::Unload,
        ("reset", _) => Command::Reset,
        ("use" | "switch", false) => Command::Use(rest),
        ("use" | "switch", true) => Command::Usage("use <model>"),
        ("preset", false) => Command::Preset(rest),
        ("preset", true) => Command::Usage("preset <name|auto>"),
        ("set", false) => Command::Set(rest),
        ("set", true) => Command::Usage("set <key>=<value> [...]"),
        ("image", false) => Command::Image(rest),
        ("image", true) => Command::Usage("image <path|data URL>"),
        ("text", false) => Command::Text(rest),
        ("text", true) => Command::Usage("text <path> [prompt]"),
        ("save", true) => Command::Save(None),
        ("save", false) => Command::Save(Some(rest)),
        ("thinking", false) if rest.eq_ignore_ascii_case("on") => Command::Thinking(true),
        ("thinking", false) if rest.eq_ignore_ascii_case("off") => Command::Thinking(false),
        ("thinking", _) => Command::Usage("thinking on|off"),
        ("system", true) => Command::System(None),
        ("system", false) => Command::System(Some(rest)),
        _ if prefixed => Command::Usage("unknown command, type /help"),
        _ => Command::Prompt(input),
    }
}

fn print_help(model_active: bool) {
    let p = if model_active { "/" } else { "" };
    println!("\n{}", "Ollama Pilot Chat Commands".cyan());
    println!("{}", "=".repeat(60).bright_cyan());
    let rows = [
        ("exit, bye, quit", "Exit the chat"),
        ("help", "Show this help message"),
        ("clear", "Clear the screen"),
        ("models", "List models on the server with their capabilities"),
        ("use <model>", "Load a model and chat with it (unloads the previous one)"),
        ("presets", "List parameter presets"),
        ("preset <name|auto>", "Fix a preset, or pick one per prompt"),
        ("set <key>=<value>", "Override a parameter for this session (-1 resets it)"),
        ("params", "Show the parameters the next prompt would use"),
        ("image <path>", "Attach an image to the next message"),
        ("text <path> [prompt]", "Send a text or code file with a prompt"),
        ("save [title]", "Save the last answer as markdown"),
        ("thinking on|off", "Show the model's reasoning next to the answer"),
        ("system [prompt]", "Set or clear the system prompt"),
        ("status", "Service, server and loaded model status"),
        ("unload", "Unload the current model"),
        ("reset", "Forget the conversation and session overrides"),
    ];
    for (command, description) in rows {
        let label = format!("{:<28}", format!("{}{}", p, command));
        println!("{} - {}", label.green(), description);
    }
    if model_active {
        println!("{}", "Anything without the / prefix is sent to the model.".bright_black());
    }
    println!();
}

/// Interactive chat over the lifecycle manager.
pub async fn chat_loop(
    manager: &mut LifecycleManager,
    classifier: &ModelClassifier,
    resolver: &ParameterResolver,
    options: ChatOptions,
    interrupt: Arc<AtomicBool>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    println!("Starting chat session");
    let mut session = ChatSession::new(options.preset.clone(), options.system_prompt.clone());
    let mut cache = CapabilityCache::new();

    if let Some(model) = options.model.as_deref() {
        let mut context = ChatContext {
            manager: &mut *manager,
            classifier,
            resolver,
            cache: &mut cache,
            session: &mut session,
            blacklist: &options.blacklist,
            settings: &options.settings,
            interrupt: interrupt.clone(),
        };
        handle_use_model(&mut context, model).await;
    }
    print_help(session.model.is_some());

    let mut rl = DefaultEditor::new()?;

    loop {
        let prompt_prefix = match session.model.as_deref() {
            Some(model) => format!("[{}] > ", model),
            None => "> ".to_string(),
        };

        let input = match rl.readline(&prompt_prefix) {
            Ok(input) => input,
            Err(ReadlineError::Interrupted) => continue,
            Err(_) => {
                println!("Goodbye!");
                break;
            }
        };
        let input_trimmed = input.trim();
        if input_trimmed.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input_trimmed);

        let mut context = ChatContext {
            manager: &mut *manager,
            classifier,
            resolver,
            cache: &mut cache,
            session: &mut session,
            blacklist: &options.blacklist,
            settings: &options.settings,
            interrupt: interrupt.clone(),
        };

        match parse_command(input_trimmed, context.session.model.is_some()) {
            Command::Exit => {
                println!("Goodbye!");
                break;
            }
            Command::Help => print_help(context.session.model.is_some()),
            Command::Clear => {
                print!("\x1B[2J\x1B[1;1H");
                let _ = std::io::stdout().flush();
            }
            Command::Models => handle_list_models(&mut context).await,
            Command::Presets => handle_list_presets(&context),
            Command::Params => handle_show_parameters(&context),
            Command::Status => handle_status(&mut context).await,
            Command::Unload => handle_unload(&mut context).await,
            Command::Reset => {
                context.session.history.clear();
                context.session.overrides.clear();
                context.session.pending_images.clear();
                context.session.pending_text = None;
                println!("Conversation and session overrides cleared");
            }
            Command::Use(model) => handle_use_model(&mut context, model).await,
            Command::Preset(name) => handle_preset(&mut context, name),
            Command::Set(args) => handle_set(&mut context, args),
            Command::Image(source) => handle_image(&mut context, source),
            Command::Text(args) => handle_text(&mut context, args).await,
            Command::Save(title) => handle_save(&mut context, title).await,
            Command::Thinking(on) => {
                context.session.show_thinking = on;
                println!("Reasoning display {}", if on { "on" } else { "off" });
            }
            Command::System(prompt) => {
                context.session.system_prompt = prompt.map(str::to_string);
                match prompt {
                    Some(_) => println!("System prompt set"),
                    None => println!("System prompt cleared"),
                }
            }
            Command::Usage(usage) => println!("Usage: {}", usage),
            Command::Prompt(prompt) => handle_chat(&mut context, prompt).await,
        }
    }

    info!(turns = session.history.len() / 2, "Chat session ended");
    Ok(())
}
