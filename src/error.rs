//! Error types for the Turnstile engine.

use thiserror::Error;

/// Boxed error raised by a caller-supplied collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Raised by a custom identification strategy
    #[error("Identification strategy error: {0}")]
    Strategy(#[source] BoxError),

    /// Raised by a custom hashing function
    #[error("Hash function error: {0}")]
    Hash(#[source] BoxError),

    /// Raised by a custom counter store
    #[error("Counter store error: {0}")]
    Store(#[source] BoxError),

    /// YAML parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Layered configuration loading errors
    #[error("Configuration source error: {0}")]
    Source(#[from] ::config::ConfigError),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
