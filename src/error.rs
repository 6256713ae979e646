//! Unified error handling for the slotwatch crate
//!
//! This module consolidates the domain-specific errors into a single `Error`
//! enum while keeping the domain types available for explicit matching.
//!
//! # Architecture
//!
//! - [`SlotwatchErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use slotwatch::error::{Error, SlotwatchErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Backing off: {}", err.category());
//!     } else {
//!         eprintln!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

pub use crate::notifications::ChannelError;
pub use crate::utils::error::{
    AuthFailure, CheckError, ConfigError, DriverError, StorageError,
};

/// Common trait for all slotwatch error types
pub trait SlotwatchErrorTrait: std::error::Error {
    /// Check if this error is recoverable (a later cycle may succeed)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Browser transport and HTTP errors
    Network,
    /// Page navigation and missing controls
    Navigation,
    /// Sign-in rejected or throttled
    Auth,
    /// Human-verification challenge
    Blocked,
    /// Storage and I/O errors
    Storage,
    /// Notification delivery errors
    Notification,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Navigation => "navigation",
            Self::Auth => "auth",
            Self::Blocked => "blocked",
            Self::Storage => "storage",
            Self::Notification => "notification",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the slotwatch crate
#[derive(Error, Debug)]
pub enum Error {
    /// A check cycle failed
    #[error("Check failed: {0}")]
    Check(#[from] CheckError),

    /// Browser driver errors outside a cycle (session creation, quit)
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Notification channel errors
    #[error("Notification error: {0}")]
    Channel(#[from] ChannelError),

    /// Artifact, heartbeat and pattern log errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SlotwatchErrorTrait for CheckError {
    fn is_recoverable(&self) -> bool {
        CheckError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Blocked { .. } => ErrorCategory::Blocked,
            Self::Navigation { .. } | Self::ElementMissing { .. } => ErrorCategory::Navigation,
            Self::Auth(_) => ErrorCategory::Auth,
            Self::Transport(_) => ErrorCategory::Network,
        }
    }
}

impl SlotwatchErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Check(e) => e.is_recoverable(),
            Self::Driver(e) => e.is_recoverable(),
            Self::Config(_) => false,
            Self::Channel(e) => e.is_recoverable(),
            Self::Storage(_) => true,
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Check(e) => e.category(),
            Self::Driver(_) => ErrorCategory::Network,
            Self::Config(_) => ErrorCategory::Config,
            Self::Channel(_) => ErrorCategory::Notification,
            Self::Storage(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Other,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error from a single message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Invalid(vec![msg.into()]))
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Terminal check failures end the run loop
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Check(e) if e.is_terminal())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
