//! slotwatch - adaptive appointment-availability watcher
//!
//! Drives a browser through a booking site's login, dashboard and schedule
//! pages, reads the appointment calendar and tells the user when a date
//! earlier than the one they hold shows up. Booking itself is never automated.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`selectors`] - Ordered fallback selectors per logical control, with overrides
//! - [`resolver`] - Finds live elements across the document and its frames
//! - [`navigation`] - Session state machine from sign-in to the appointment form
//! - [`captcha`] - Human-verification challenge detection
//! - [`probe`] - Busy detection and calendar reading on the appointment form
//! - [`scheduler`] - Adaptive frequency, busy backoff and sleep computation
//! - [`orchestrator`] - One check cycle end to end, plus run statistics
//! - [`driver`] - Browser automation seam (WebDriver client; an in-memory fake
//!   behind the `test-support` feature)
//! - [`notifications`] - Webhook and log channels with dedup gates
//! - [`storage`] - Diagnostic artifacts, heartbeat file and pattern log
//! - [`config`] - TOML configuration with environment overrides
//! - [`metrics`] - Prometheus counters and gauges
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use slotwatch::config::Config;
//! use slotwatch::driver::WebDriverFactory;
//! use slotwatch::notifications::Notifier;
//! use slotwatch::orchestrator::CheckOrchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Config::load(Some("slotwatch.toml".as_ref()))?.validate()?;
//!     let factory = Arc::new(WebDriverFactory::new(settings.driver.clone()));
//!     let mut checker = CheckOrchestrator::new(&settings, factory, Notifier::new())?;
//!     let result = checker.run_one_cycle().await?;
//!     println!("{}", result.outcome.label());
//!     checker.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod captcha;
pub mod config;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod navigation;
pub mod notifications;
pub mod orchestrator;
pub mod probe;
pub mod resolver;
pub mod scheduler;
pub mod selectors;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, Settings};
    pub use crate::driver::{BrowserDriver, DriverFactory, WebDriverFactory};
    pub use crate::error::{Error, ErrorCategory, Result, SlotwatchErrorTrait};
    pub use crate::notifications::{Notification, Notifier};
    pub use crate::orchestrator::{CheckOrchestrator, CheckResult, CycleOutcome};
    pub use crate::probe::{AvailabilityProbe, ProbeOutcome};
    pub use crate::scheduler::{AdaptiveScheduler, SleepPlan};
    pub use crate::selectors::{ElementKey, SelectorRegistry, SelectorSet};
}
