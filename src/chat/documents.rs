//! Text files sent along with a prompt, and exchanges saved as markdown.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::benchmark::strip_thinking;

const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "vtt", "ass", "ssa", "sub"];

const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "java", "c", "cpp", "h", "hpp", "cs", "go", "rb", "php", "html", "htm",
    "css", "scss", "less", "sh", "bat", "ps1", "pl", "lua", "swift", "kt", "dart", "scala", "sql",
    "r", "jl", "m", "vb", "asm", "s", "vue", "jsx", "tsx", "json", "xml", "yaml", "yml", "rs",
    "toml",
];

static SUBTITLE_TIMING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{2}:\d{2}:\d{2}[,.]\d{3}\s*-->\s*\d{2}:\d{2}:\d{2}[,.]\d{3}")
        .expect("valid subtitle regex")
});

static CODE_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^\s*(def\s+\w+\s*\(|function\s+\w+\s*\(|class\s+\w+|import\s+\w+|#include\s*<|fn\s+\w+\s*\(|<\?xml\s+version|<!DOCTYPE\s+html)",
    )
    .expect("valid code regex")
});

static THINKING_SPANS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<think[^>]*>(.*?)</think[^>]*>|<thinking[^>]*>(.*?)</thinking[^>]*>")
        .expect("valid regex")
});

static UNSAFE_FILENAME: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").expect("valid regex"));
static TITLE_NOISE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").expect("valid regex"));
static WORDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("valid regex"));

const TAG_STOP_WORDS: &[&str] = &[
    "the", "is", "at", "which", "on", "a", "an", "and", "or", "but", "in", "with", "to", "for",
    "of", "as", "by", "what", "this", "that", "how", "does",
];

/// Title length cap, in words.
const MAX_TITLE_WORDS: usize = 10;
const MAX_FILENAME_CHARS: usize = 100;

/// Instructions used when the model is asked to title an exchange.
pub const TITLE_SYSTEM_PROMPT: &str = "You are a title generator. Reply with ONLY a concise, \
specific title of at most 10 words for the exchange you are given. Name the topic, not the \
question. No quotes, no punctuation except hyphens.";

/// What kind of text a file holds. Decides how it is framed in the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Code,
    Subtitles,
    Text,
}

impl ContentType {
    /// Detects by extension first, then by content.
    pub fn detect(path: &Path, content: &str) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if SUBTITLE_EXTENSIONS.contains(&extension.as_str()) {
            return ContentType::Subtitles;
        }
        if CODE_EXTENSIONS.contains(&extension.as_str()) {
            return ContentType::Code;
        }
        if SUBTITLE_TIMING.is_match(content) {
            ContentType::Subtitles
        } else if CODE_MARKERS.is_match(content) {
            ContentType::Code
        } else {
            ContentType::Text
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Code => "code",
            ContentType::Subtitles => "subtitles",
            ContentType::Text => "text",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("cannot read {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("{path} is empty")]
    Empty { path: String },
    #[error("cannot write {path}: {reason}")]
    Write { path: String, reason: String },
}

/// A text file waiting to be sent with the next prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct TextAttachment {
    pub name: String,
    pub content: String,
    pub content_type: ContentType,
}

impl TextAttachment {
    /// Reads `source`. A bare file name that does not exist in the working
    /// directory is looked up in `texts_dir`.
    pub fn load(source: &str, texts_dir: &Path) -> Result<Self, DocumentError> {
        let direct = PathBuf::from(source);
        let path = if !direct.exists() && direct.components().count() == 1 {
            texts_dir.join(source)
        } else {
            direct
        };
        let content = fs::read_to_string(&path).map_err(|e| DocumentError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if content.trim().is_empty() {
            return Err(DocumentError::Empty {
                path: path.display().to_string(),
            });
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.to_string());
        Ok(Self {
            content_type: ContentType::detect(&path, &content),
            name,
            content,
        })
    }

    /// The prompt with this file's content placed ahead of it.
    pub fn frame_prompt(&self, prompt: &str) -> String {
        let prompt = match prompt.trim() {
            "" => "Analyze this text.",
            p => p,
        };
        let (intro, fence) = match self.content_type {
            ContentType::Code => {
                let language = Path::new(&self.name)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("");
                (format!("Source code from `{}`:", self.name), language.to_string())
            }
            ContentType::Subtitles => (
                format!(
                    "Subtitle file `{}`. Cue numbers and timestamps are not part of the dialogue:",
                    self.name
                ),
                String::new(),
            ),
            ContentType::Text => (format!("Contents of `{}`:", self.name), String::new()),
        };
        format!(
            "{}\n```{}\n{}\n```\n\n{}",
            intro,
            fence,
            self.content.trim_end(),
            prompt
        )
    }
}

/// One prompt and answer, with what is needed to save it.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub model: String,
    pub prompt: String,
    pub raw_response: String,
    pub preset: String,
    pub parameters: Map<String, Value>,
    pub system_prompt: Option<String>,
    pub attachment: Option<(String, ContentType)>,
    pub had_images: bool,
}

/// Reasoning spans of a raw answer, joined, or `None` when there are none.
pub fn extract_thinking(raw: &str) -> Option<String> {
    let parts: Vec<&str> = THINKING_SPANS
        .captures_iter(raw)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

/// Cleans a model-suggested title. Falls back to the prompt's first words.
pub fn clean_title(suggested: &str, prompt: &str) -> String {
    let stripped = strip_thinking(suggested);
    let trimmed = stripped.trim().trim_matches(|c| c == '"' || c == '\'');
    let cleaned = TITLE_NOISE.replace_all(trimmed, "");
    let words: Vec<&str> = cleaned.split_whitespace().take(MAX_TITLE_WORDS).collect();
    if words.is_empty() {
        fallback_title(prompt)
    } else {
        words.join(" ")
    }
}

pub fn fallback_title(prompt: &str) -> String {
    let words: Vec<&str> = prompt.split_whitespace().take(4).collect();
    if words.is_empty() {
        "Untitled Query".to_string()
    } else {
        words.join(" ")
    }
}

/// Up to five keywords from the prompt, `;`-separated.
pub fn keyword_tags(prompt: &str) -> String {
    let lowered = prompt.to_lowercase();
    let mut tags: Vec<&str> = Vec::new();
    for word in WORDS.find_iter(&lowered).map(|m| m.as_str()) {
        if word.chars().count() > 3 && !TAG_STOP_WORDS.contains(&word) && !tags.contains(&word) {
            tags.push(word);
        }
        if tags.len() == 5 {
            break;
        }
    }
    if tags.is_empty() {
        "general; query".to_string()
    } else {
        tags.join("; ")
    }
}

/// File stem for a title: unsafe characters replaced, spaces to underscores.
pub fn safe_file_stem(title: &str, at: &DateTime<Local>) -> String {
    let stamp = at.format("%Y%m%d_%H%M").to_string();
    let name = UNSAFE_FILENAME.replace_all(title, "-");
    let name = WHITESPACE.replace_all(&name, "_");
    let name = UNDERSCORES.replace_all(&name, "_");
    let name = name.trim_matches(|c| c == '_' || c == '-');

    if name.chars().count() > MAX_FILENAME_CHARS {
        let cut: String = name.chars().take(MAX_FILENAME_CHARS).collect();
        format!("{}_{}", cut, stamp)
    } else if name.chars().count() < 3 {
        format!("query_{}", stamp)
    } else {
        name.to_string()
    }
}

pub fn render_markdown(exchange: &Exchange, title: &str, tags: &str, at: &DateTime<Local>) -> String {
    let mut md = format!(
        "# {}\n\n**Timestamp: {}**\n\n**Tags: {}**\n\n## User question:\n\n{}\n\n* * *\n\n## Model response:\n\n{}\n\n* * *\n",
        title,
        at.format("%d %B %Y, %I:%M %p"),
        tags,
        exchange.prompt.trim(),
        strip_thinking(&exchange.raw_response),
    );

    if let Some(thinking) = extract_thinking(&exchange.raw_response) {
        md.push_str(&format!("\n## Reasoning Process:\n\n{}\n\n* * *\n", thinking));
    }

    md.push_str(&format!(
        "\n## Session Metadata:\n\n**Model:** {}\n\n**Preset:** {}\n\n",
        exchange.model, exchange.preset
    ));
    if !exchange.parameters.is_empty() {
        md.push_str("**Parameters Used:**\n");
        for (key, value) in &exchange.parameters {
            md.push_str(&format!("- {}: {}\n", key, value));
        }
        md.push('\n');
    }
    if let Some((name, content_type)) = &exchange.attachment {
        md.push_str(&format!("**Attached File:** {} ({})\n\n", name, content_type));
    }
    if exchange.had_images {
        md.push_str("**Image Input:** Yes\n\n");
    }
    if let Some(system) = &exchange.system_prompt {
        md.push_str(&format!("**System Prompt Used:**\n```\n{}\n```\n\n", system));
    }
    md
}

/// Writes the exchange under `dir`, never overwriting an earlier answer.
pub fn save_markdown(
    dir: &Path,
    exchange: &Exchange,
    title: &str,
    at: &DateTime<Local>,
) -> Result<PathBuf, DocumentError> {
    let write_err = |path: &Path, e: std::io::Error| DocumentError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    fs::create_dir_all(dir).map_err(|e| write_err(dir, e))?;

    let stem = safe_file_stem(title, at);
    let mut path = dir.join(format!("{}.md", stem));
    let mut counter = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}.md", stem, counter));
        counter += 1;
    }

    let content = render_markdown(exchange, title, &keyword_tags(&exchange.prompt), at);
    fs::write(&path, content).map_err(|e| write_err(&path, e))?;
    Ok(path)
}
