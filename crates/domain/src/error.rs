//! Shared error taxonomy used across all `relay-*` crates.
//!
//! Mirrors the kinds in spec §7, not a per-crate enum: `relay-stores`,
//! `relay-tracker`, `relay-llm`, `relay-planner` and friends all convert
//! their boundary errors into this one type.

/// Whether a failure should be retried by the caller.
///
/// `ProviderTransient` maps to `true`; `ValidationFailure`, `ProviderFatal`
/// and `Corruption` map to `false`. `Conflict` and `Budget` are recovered
/// locally and never reach this far, but are included for completeness.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("validation: {0}")]
    Validation(String),

    #[error("provider {provider} transient: {message}")]
    ProviderTransient { provider: String, message: String },

    #[error("provider {provider} fatal: {message}")]
    ProviderFatal { provider: String, message: String },

    #[error("integration {0} not found")]
    IntegrationNotFound(i64),

    #[error("integration {0} disabled")]
    IntegrationDisabled(i64),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("budget exhausted: {0}")]
    Budget(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("store: {0}")]
    Store(String),

    #[error("{0}")]
    Other(String),
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ProviderTransient { .. } | Error::Io(_) | Error::Store(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
