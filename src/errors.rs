//! Typed errors and the exit-code taxonomy.
//!
//! Every abnormal condition surfaced to the caller is a [`GlmError`] carrying
//! a [`Category`]. The category fixes both the supervisor's exit code and the
//! `err:<category>` prefix used on stderr, so the shell contract stays at
//! exactly five exit codes: 0, 1, 3, 124, 127.

use thiserror::Error;

/// Flat error categories, each with a stable exit code and message prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    User,
    Validation,
    Internal,
    NotFound,
    Timeout,
    Dependency,
}

impl Category {
    /// Exit code reported by the supervisor process for this category.
    pub fn exit_code(self) -> i32 {
        match self {
            Category::User | Category::Validation | Category::Internal => 1,
            Category::NotFound => 3,
            Category::Timeout => 124,
            Category::Dependency => 127,
        }
    }

    /// Prefix used on every stderr message of this category.
    pub fn prefix(self) -> &'static str {
        match self {
            Category::User => "err:user",
            Category::Validation => "err:validation",
            Category::Internal => "err:internal",
            Category::NotFound => "err:not_found",
            Category::Timeout => "err:timeout",
            Category::Dependency => "err:dependency",
        }
    }
}

/// A categorized error with an optional actionable suggestion.
///
/// `Display` renders only the message; [`GlmError::render`] produces the full
/// caller-facing line `<prefix> <message>. <suggestion>`.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct GlmError {
    pub category: Category,
    pub message: String,
    pub suggestion: Option<String>,
}

impl GlmError {
    pub fn new(category: Category, message: impl Into<String>) -> Self {
        GlmError {
            category,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self::new(Category::User, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(Category::Validation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Category::Internal, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Category::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(Category::Timeout, message)
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        Self::new(Category::Dependency, message)
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// The full stderr line shown to the caller.
    pub fn render(&self) -> String {
        match &self.suggestion {
            Some(s) => format!("{} {}. {}", self.category.prefix(), self.message, s),
            None => format!("{} {}", self.category.prefix(), self.message),
        }
    }
}
