//! Input validation run by callers before admission.
//!
//! The batcher trusts its inputs; transports run [`TextValidator`] first so
//! that only well-formed texts with at least one requested output reach the
//! queue.

use crate::embeddings::OutputFlags;
use crate::{Error, ErrorContext, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Model limit on input tokens.
pub const MAX_TOKEN_LENGTH: usize = 8192;
/// Character ceiling (about four characters per token).
pub const MAX_CHAR_LENGTH: usize = 32768;
pub const MIN_CHAR_LENGTH: usize = 1;
pub const CHARS_PER_TOKEN_ESTIMATE: usize = 4;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TextStats {
    pub count: usize,
    pub total_chars: usize,
    pub avg_chars: f64,
    pub min_chars: usize,
    pub max_chars: usize,
    pub total_estimated_tokens: usize,
    pub avg_estimated_tokens: f64,
}

#[derive(Debug, Clone)]
pub struct TextValidator {
    pub max_tokens: usize,
    pub max_chars: usize,
    pub min_chars: usize,
}

impl Default for TextValidator {
    fn default() -> Self {
        Self {
            max_tokens: MAX_TOKEN_LENGTH,
            max_chars: MAX_CHAR_LENGTH,
            min_chars: MIN_CHAR_LENGTH,
        }
    }
}

impl TextValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn with_max_chars(mut self, n: usize) -> Self {
        self.max_chars = n;
        self
    }

    /// Whitespace-collapsed character count divided by four, at least 1.
    pub fn estimate_tokens(&self, text: &str) -> usize {
        let cleaned = WHITESPACE.replace_all(text.trim(), " ");
        (cleaned.chars().count() / CHARS_PER_TOKEN_ESTIMATE).max(1)
    }

    pub fn validate_text(&self, text: &str, index: usize) -> Result<()> {
        let field = format!("input[{}]", index);
        let chars = text.chars().count();

        if text.trim().chars().count() < self.min_chars {
            tracing::warn!(text_index = index, text_length = chars, "Text too short");
            return Err(Error::validation_with_context(
                format!("text is too short (minimum {} characters)", self.min_chars),
                ErrorContext::new()
                    .with_field_path(field)
                    .with_source("text_validator"),
            ));
        }

        if chars > self.max_chars {
            tracing::warn!(
                text_index = index,
                text_length = chars,
                max_chars = self.max_chars,
                "Text too long"
            );
            return Err(Error::validation_with_context(
                format!("text is too long ({} chars, maximum {})", chars, self.max_chars),
                ErrorContext::new()
                    .with_field_path(field)
                    .with_source("text_validator"),
            ));
        }

        let tokens = self.estimate_tokens(text);
        if tokens > self.max_tokens {
            tracing::warn!(
                text_index = index,
                estimated_tokens = tokens,
                max_tokens = self.max_tokens,
                "Text exceeds token estimate"
            );
            return Err(Error::validation_with_context(
                format!(
                    "text is too long (~{} tokens, maximum {}); consider splitting into smaller chunks",
                    tokens, self.max_tokens
                ),
                ErrorContext::new()
                    .with_field_path(field)
                    .with_details(format!("{} chars", chars))
                    .with_source("text_validator"),
            ));
        }

        tracing::debug!(
            text_index = index,
            text_length = chars,
            estimated_tokens = tokens,
            "Text validation passed"
        );
        Ok(())
    }

    pub fn validate_flags(&self, flags: OutputFlags) -> Result<()> {
        if flags.any() {
            return Ok(());
        }
        Err(Error::validation_with_context(
            "at least one vector type must be requested (dense, sparse or colbert)",
            ErrorContext::new()
                .with_field_path("return_dense|return_sparse|return_colbert")
                .with_source("text_validator"),
        ))
    }

    /// Full pre-admission check for one submission.
    pub fn validate(&self, text: &str, flags: OutputFlags) -> Result<()> {
        self.validate_flags(flags)?;
        self.validate_text(text, 0)
    }

    pub fn text_stats(&self, texts: &[impl AsRef<str>]) -> TextStats {
        if texts.is_empty() {
            return TextStats {
                count: 0,
                total_chars: 0,
                avg_chars: 0.0,
                min_chars: 0,
                max_chars: 0,
                total_estimated_tokens: 0,
                avg_estimated_tokens: 0.0,
            };
        }
        let lengths: Vec<usize> = texts.iter().map(|t| t.as_ref().chars().count()).collect();
        let total_chars: usize = lengths.iter().sum();
        let total_tokens: usize = texts.iter().map(|t| self.estimate_tokens(t.as_ref())).sum();
        let n = texts.len() as f64;
        TextStats {
            count: texts.len(),
            total_chars,
            avg_chars: round1(total_chars as f64 / n),
            min_chars: lengths.iter().copied().min().unwrap_or(0),
            max_chars: lengths.iter().copied().max().unwrap_or(0),
            total_estimated_tokens: total_tokens,
            avg_estimated_tokens: round1(total_tokens as f64 / n),
        }
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
