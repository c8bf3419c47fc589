//! Interactive chat REPL on top of the lifecycle manager.

pub mod display;

#[allow(clippy::module_inception)]
mod chat;

mod command_handlers;
mod documents;

pub use chat::{chat_loop, ChatOptions};
pub use command_handlers::{encode_image, parse_assignments, ChatSession, ImageError};
pub use documents::{
    clean_title, extract_thinking, keyword_tags, save_markdown, ContentType, DocumentError,
    Exchange, TextAttachment,
};
