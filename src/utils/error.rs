//! Error types for the availability checker
//!
//! Domain errors live here and are folded into [`crate::error::Error`] at
//! module boundaries. [`CheckError`] is the per-cycle control-flow taxonomy the
//! orchestrator matches on; [`DriverError`] is the browser transport layer.

use std::path::PathBuf;
use thiserror::Error;

/// Phrases on the sign-in page that mean the account is being throttled
pub const RATE_LIMIT_PHRASES: &[&str] = &["rate limiting", "sign in or sign up", "login blocked"];

/// Returns true if `text` contains any of the rate-limit phrases
pub fn mentions_rate_limit(text: &str) -> bool {
    let lower = text.to_lowercase();
    RATE_LIMIT_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Errors raised by a browser driver
#[derive(Error, Debug)]
pub enum DriverError {
    /// The element handle no longer refers to a live node
    #[error("Stale element reference")]
    StaleElement,

    /// No element matched the locator
    #[error("No such element: {0}")]
    NoSuchElement(String),

    /// The element exists but cannot receive input
    #[error("Element not interactable: {0}")]
    NotInteractable(String),

    /// Another element would receive the click
    #[error("Click intercepted: {0}")]
    ClickIntercepted(String),

    /// The requested frame does not exist
    #[error("No such frame")]
    NoSuchFrame,

    /// An operation did not finish in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A page load failed
    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    /// The browser session is gone (crashed, closed or never created)
    #[error("Browser session lost: {0}")]
    SessionLost(String),

    /// HTTP transport to the driver server failed
    #[error("Driver transport failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The driver answered with an unexpected protocol error
    #[error("WebDriver error {error}: {message}")]
    Protocol { error: String, message: String },
}

impl DriverError {
    /// Fatal errors mean the session cannot be used any more
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionLost(_) | Self::Http(_))
    }

    /// Element-level failures that resolution treats as "not usable right now"
    pub fn is_element_miss(&self) -> bool {
        matches!(
            self,
            Self::StaleElement
                | Self::NoSuchElement(_)
                | Self::NotInteractable(_)
                | Self::ClickIntercepted(_)
                | Self::NoSuchFrame
        )
    }

    /// Is this error recoverable (retrying may help)?
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }
}

/// Why a login attempt did not reach the dashboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// Ordinary rejection: wrong credentials, missing policy tick, ...
    Credentials { alerts: String },
    /// The site is throttling this account
    RateLimited { alerts: String },
}

impl AuthFailure {
    /// Classify the alert text shown after a failed sign-in
    pub fn from_alerts(alerts: impl Into<String>) -> Self {
        let alerts = alerts.into();
        if mentions_rate_limit(&alerts) {
            Self::RateLimited { alerts }
        } else {
            Self::Credentials { alerts }
        }
    }
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Credentials { alerts } if alerts.is_empty() => {
                write!(f, "Login failed - check credentials and privacy policy acceptance")
            }
            Self::Credentials { alerts } => {
                write!(f, "Login failed - check credentials and privacy policy acceptance ({alerts})")
            }
            Self::RateLimited { alerts } => write!(f, "Login blocked by rate limiting: {alerts}"),
        }
    }
}

/// Failures that end a single check cycle
#[derive(Error, Debug)]
pub enum CheckError {
    /// A human-verification challenge was detected
    #[error("CAPTCHA detected: {reason}")]
    Blocked {
        reason: String,
        /// Set when the process should stop instead of backing off
        terminal: bool,
    },

    /// Page navigation failed after retries
    #[error("Navigation failed during {phase} at {url}: {message}")]
    Navigation {
        phase: String,
        url: String,
        message: String,
    },

    /// Sign-in did not succeed
    #[error("{0}")]
    Auth(AuthFailure),

    /// A required control never appeared
    #[error("Could not locate {element} on {url}")]
    ElementMissing { element: String, url: String },

    /// The browser transport failed
    #[error("Browser error: {0}")]
    Transport(#[from] DriverError),
}

impl CheckError {
    pub fn navigation(
        phase: impl Into<String>,
        url: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Navigation {
            phase: phase.into(),
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn element_missing(element: impl Into<String>, url: impl Into<String>) -> Self {
        Self::ElementMissing {
            element: element.into(),
            url: url.into(),
        }
    }

    /// Short type tag used in dedup signatures and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Blocked { .. } => "Blocked",
            Self::Navigation { .. } => "NavigationError",
            Self::Auth(AuthFailure::Credentials { .. }) => "LoginFailed",
            Self::Auth(AuthFailure::RateLimited { .. }) => "LoginBlocked",
            Self::ElementMissing { .. } => "ElementMissing",
            Self::Transport(_) => "DriverError",
        }
    }

    /// `{Kind}:{message}`; identical signatures are treated as the same incident
    pub fn signature(&self) -> String {
        format!("{}:{}", self.kind(), self)
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Terminal failures stop the run loop
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Blocked { terminal: true, .. })
    }

    /// Rate-limit phrasing anywhere in the failure forces the long backoff
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Auth(AuthFailure::RateLimited { .. }) => true,
            other => mentions_rate_limit(&other.to_string()),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !self.is_terminal()
    }
}

/// Configuration problems detected before any navigation
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading the file failed
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML/JSON for the expected shape
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// One or more values are out of range or malformed
    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Failures writing diagnostic and state files
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Browser capture failed: {0}")]
    Capture(#[from] DriverError),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
