// src/error.rs

//! Unified error handling for the sitemap monitor.

use std::fmt;

use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Message shown to site owners when a run fails for any internal reason.
pub const PROCESSING_FAILED: &str = "processing failed, please retry";

/// Message shown to site owners who register a second time.
pub const ALREADY_REQUESTED: &str = "Sorry you have already requested a report.";

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// robots.txt unreachable or without a `Sitemap:` directive
    #[error("Discovery error for {root}: {message}")]
    Discovery { root: String, message: String },

    /// HTTP or network failure on a sitemap document
    #[error("Fetch error for {url}: {message}")]
    Fetch { url: String, message: String },

    /// Malformed sitemap XML
    #[error("Parse error for {url}: {message}")]
    Parse { url: String, message: String },

    /// Sitemap index nesting deeper than allowed
    #[error("Sitemap index nesting exceeds {limit} levels at {url}")]
    RecursionLimit { url: String, limit: usize },

    /// Snapshot store read/write failure
    #[error("Store error for {key}: {message}")]
    Store { key: String, message: String },

    /// Report send failure
    #[error("Delivery error for owner {owner}: {message}")]
    Delivery { owner: String, message: String },

    /// Report delivery failed on every allowed attempt
    #[error("Report delivery for owner {owner} failed after {attempts} attempts")]
    DeliveryExhausted { owner: String, attempts: u32 },

    /// Owner already has sites under tracking
    #[error("Owner {0} already has sites under tracking")]
    AlreadyRegistered(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client setup failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a discovery error for a site root.
    pub fn discovery(root: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Discovery {
            root: root.into(),
            message: message.to_string(),
        }
    }

    /// Create a fetch error for a document URL.
    pub fn fetch(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a parse error for a document URL.
    pub fn parse(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Parse {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a store error for a record key.
    pub fn store(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Store {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Create a delivery error for an owner.
    pub fn delivery(owner: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Delivery {
            owner: owner.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Short, stable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Discovery { .. } => "discovery",
            Self::Fetch { .. } => "fetch",
            Self::Parse { .. } => "parse",
            Self::RecursionLimit { .. } => "recursion_limit",
            Self::Store { .. } => "store",
            Self::Delivery { .. } => "delivery",
            Self::DeliveryExhausted { .. } => "delivery_exhausted",
            Self::AlreadyRegistered(_) => "already_registered",
            Self::Io(_) => "io",
            Self::Http(_) => "http",
            Self::Json(_) => "json",
            Self::Toml(_) => "toml",
            Self::Url(_) => "url",
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
        }
    }

    /// Text that is safe to show to a site owner.
    ///
    /// Internal detail (URLs, status codes, paths) never leaks through here.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AlreadyRegistered(_) => ALREADY_REQUESTED,
            Self::Validation(_) | Self::Url(_) => "The submitted website address is not valid.",
            Self::Delivery { .. } | Self::DeliveryExhausted { .. } => {
                "Error occurred while trying to send the report."
            }
            _ => PROCESSING_FAILED,
        }
    }
}
