//! Markup conversion for page and post bodies.

use crate::config::MarkupConfig;
use pulldown_cmark::{html, Options, Parser};
use thiserror::Error;

/// Name under which Markdown conversion is registered.
pub const MARKDOWN: &str = "markdown";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MarkupError {
    #[error("unknown markup \"{0}\"")]
    Unknown(String),
    #[error("{name}: input is not valid UTF-8")]
    Utf8 { name: String },
}

/// Converts a body written in some markup language to HTML.
pub trait Markup: Send + Sync {
    fn process(&self, name: &str, input: &[u8]) -> Result<Vec<u8>, MarkupError>;
}

/// Built-in markup converter.
#[derive(Debug, Clone)]
pub struct MarkupProcessor {
    options: Options,
}

impl Default for MarkupProcessor {
    fn default() -> Self {
        Self::new(&MarkupConfig::default())
    }
}

impl MarkupProcessor {
    pub fn new(config: &MarkupConfig) -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        if config.smart_punctuation {
            options.insert(Options::ENABLE_SMART_PUNCTUATION);
        }
        Self { options }
    }

    fn markdown(&self, input: &str) -> String {
        let parser = Parser::new_ext(input, self.options);
        let mut out = String::with_capacity(input.len() * 3 / 2);
        html::push_html(&mut out, parser);
        out
    }
}

impl Markup for MarkupProcessor {
    fn process(&self, name: &str, input: &[u8]) -> Result<Vec<u8>, MarkupError> {
        match name {
            MARKDOWN => {
                let text = std::str::from_utf8(input)
                    .map_err(|_| MarkupError::Utf8 { name: name.to_string() })?;
                Ok(self.markdown(text).into_bytes())
            }
            other => Err(MarkupError::Unknown(other.to_string())),
        }
    }
}

/// Markup implied by a source file extension, if any.
pub fn markup_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "md" | "markdown" => Some(MARKDOWN),
        _ => None,
    }
}
