//! Configuration management for slotwatch
//!
//! Settings come from a TOML file, then `SLOTWATCH_*` environment variables
//! override individual values (secrets and paths mostly), then command-line
//! flags. [`Config::validate`] turns the raw values into an immutable
//! [`Settings`] record or reports every problem at once.
//!
//! ```toml
//! [account]
//! email = "me@example.com"
//! password = "..."
//!
//! [search]
//! current_appointment = "2026-12-15"
//! location = "Toronto"
//! start_date = "2026-10-01"
//! end_date = "2026-12-31"
//!
//! [schedule]
//! frequency_minutes = 5
//! prime_time_hours = [[7, 9], [22, 2]]
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::driver::webdriver::DriverConfig;
use crate::navigation::{Credentials, NavigationConfig, SiteUrls, Waits};
use crate::notifications::{EmailConfig, WebhookConfig};
use crate::probe::{DateWindow, ProbeConfig};
use crate::scheduler::{HourWindow, PrimeTime, SchedulerConfig};
use crate::utils::error::ConfigError;
use crate::utils::mask;

/// Calendar dates in the config file
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Main configuration structure, as read from disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub account: AccountConfig,
    pub search: SearchConfig,
    pub schedule: ScheduleConfig,
    pub retry: RetrySettings,
    pub browser: BrowserConfig,
    pub notify: NotifyConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub site: SiteConfig,
}

/// Login for the booking site
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("email", &mask(&self.email))
            .field("password", &mask(&self.password))
            .finish()
    }
}

/// What counts as a better appointment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Currently held appointment, `YYYY-MM-DD`
    pub current_appointment: String,
    /// Consulate name as shown in the location dropdown
    pub location: String,
    pub start_date: String,
    pub end_date: String,
    pub max_calendar_months: u32,
    /// Seconds before the busy banner is looked at a second time
    pub busy_recheck_secs: u64,
    /// Reported at startup; booking is never attempted
    pub auto_book: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            current_appointment: String::new(),
            location: String::new(),
            start_date: String::new(),
            end_date: String::new(),
            max_calendar_months: 3,
            busy_recheck_secs: 2,
            auto_book: false,
        }
    }
}

/// Check cadence and backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub frequency_minutes: u32,
    pub jitter_seconds: u64,
    /// Local-hour windows `[start, end)`, wrapping past midnight when `start > end`
    pub prime_time_hours: Vec<HourWindow>,
    pub prime_time_factor: f64,
    pub weekend_multiplier: f64,
    pub busy_backoff_min_minutes: u64,
    pub busy_backoff_max_minutes: u64,
    /// Browser session is recreated after this many cycles
    pub driver_restart_checks: u32,
    pub pattern_learning: bool,
    /// Seconds between status summaries; 0 disables the reporter
    pub report_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        let prime_time = PrimeTime::default();
        Self {
            frequency_minutes: 5,
            jitter_seconds: 60,
            prime_time_hours: prime_time.windows,
            prime_time_factor: prime_time.factor,
            weekend_multiplier: prime_time.weekend_multiplier,
            busy_backoff_min_minutes: 10,
            busy_backoff_max_minutes: 15,
            driver_restart_checks: 50,
            pattern_learning: false,
            report_interval_secs: 0,
        }
    }
}

/// Page-load retries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    /// Linear backoff base: attempt `n` waits `n × backoff_seconds`
    pub backoff_seconds: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub webdriver_url: String,
    pub headless: bool,
    pub user_agent: Option<String>,
    pub page_load_timeout_secs: u64,
    /// Stop the process on a challenge page instead of backing off
    pub abort_on_captcha: bool,
    /// TOML or JSON file with selector overrides
    pub selectors_path: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        let driver = DriverConfig::default();
        Self {
            webdriver_url: driver.webdriver_url,
            headless: driver.headless,
            user_agent: None,
            page_load_timeout_secs: driver.page_load_timeout.as_secs(),
            abort_on_captcha: false,
            selectors_path: None,
        }
    }
}

/// Notification transports; without a webhook or email section, notifications
/// go to the log
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub webhook_token: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// `[notify.email]`
    pub email: Option<EmailConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_token: None,
            timeout_secs: 10,
            max_retries: 3,
            email: None,
        }
    }
}

impl std::fmt::Debug for NotifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyConfig")
            .field("webhook_url", &self.webhook_url)
            .field("webhook_token", &self.webhook_token.as_deref().map(mask))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("email", &self.email)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub artifacts_dir: PathBuf,
    /// Snapshots kept after pruning
    pub artifact_retention: usize,
    pub heartbeat_path: Option<PathBuf>,
    pub pattern_log_path: PathBuf,
    pub pattern_max_events: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("artifacts"),
            artifact_retention: 20,
            heartbeat_path: None,
            pattern_log_path: PathBuf::from("data/patterns.jsonl"),
            pattern_max_events: 1000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

/// Prometheus scrape endpoint; disabled unless `listen_addr` is set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// e.g. `127.0.0.1:9184`
    pub listen_addr: Option<String>,
}

/// Booking site location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    pub locale: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://ais.usvisa-info.com"),
            locale: String::from("en-ca"),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(name: &str, errors: &mut Vec<String>) -> Option<T> {
    let raw = env_value(name)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            errors.push(format!("{name} has an invalid value: {raw:?}"));
            None
        }
    }
}

fn env_bool(name: &str, errors: &mut Vec<String>) -> Option<bool> {
    let raw = env_value(name)?;
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            errors.push(format!("{name} must be a boolean, got {raw:?}"));
            None
        }
    }
}

impl Config {
    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// File (when given) followed by environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `SLOTWATCH_*` overrides on top of the current values
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if let Some(v) = env_value("SLOTWATCH_EMAIL") {
            self.account.email = v;
        }
        if let Some(v) = env_value("SLOTWATCH_PASSWORD") {
            self.account.password = v;
        }
        if let Some(v) = env_value("SLOTWATCH_CURRENT_APPOINTMENT") {
            self.search.current_appointment = v;
        }
        if let Some(v) = env_value("SLOTWATCH_LOCATION") {
            self.search.location = v;
        }
        if let Some(v) = env_value("SLOTWATCH_START_DATE") {
            self.search.start_date = v;
        }
        if let Some(v) = env_value("SLOTWATCH_END_DATE") {
            self.search.end_date = v;
        }
        if let Some(v) = env_parse("SLOTWATCH_FREQUENCY", &mut errors) {
            self.schedule.frequency_minutes = v;
        }
        if let Some(v) = env_parse("SLOTWATCH_JITTER_SECONDS", &mut errors) {
            self.schedule.jitter_seconds = v;
        }
        if let Some(v) = env_parse("SLOTWATCH_DRIVER_RESTART_CHECKS", &mut errors) {
            self.schedule.driver_restart_checks = v;
        }
        if let Some(v) = env_bool("SLOTWATCH_AUTO_BOOK", &mut errors) {
            self.search.auto_book = v;
        }
        if let Some(v) = env_value("SLOTWATCH_WEBDRIVER_URL") {
            self.browser.webdriver_url = v;
        }
        if let Some(v) = env_bool("SLOTWATCH_HEADLESS", &mut errors) {
            self.browser.headless = v;
        }
        if let Some(v) = env_bool("SLOTWATCH_ABORT_ON_CAPTCHA", &mut errors) {
            self.browser.abort_on_captcha = v;
        }
        if let Some(v) = env_value("SLOTWATCH_SELECTORS_PATH") {
            self.browser.selectors_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_value("SLOTWATCH_WEBHOOK_URL") {
            self.notify.webhook_url = Some(v);
        }
        if let Some(v) = env_value("SLOTWATCH_WEBHOOK_TOKEN") {
            self.notify.webhook_token = Some(v);
        }
        if let Some(v) = env_value("SLOTWATCH_SMTP_HOST") {
            self.notify.email.get_or_insert_with(EmailConfig::default).host = v;
        }
        if let Some(v) = env_value("SLOTWATCH_SMTP_USERNAME") {
            self.notify.email.get_or_insert_with(EmailConfig::default).username = Some(v);
        }
        if let Some(v) = env_value("SLOTWATCH_SMTP_PASSWORD") {
            self.notify.email.get_or_insert_with(EmailConfig::default).password = Some(v);
        }
        if let Some(v) = env_value("SLOTWATCH_SMTP_TO") {
            self.notify.email.get_or_insert_with(EmailConfig::default).to =
                v.split(',').map(|to| to.trim().to_string()).filter(|to| !to.is_empty()).collect();
        }
        if let Some(v) = env_value("SLOTWATCH_METRICS_ADDR") {
            self.metrics.listen_addr = Some(v);
        }
        if let Some(v) = env_value("SLOTWATCH_ARTIFACTS_DIR") {
            self.storage.artifacts_dir = PathBuf::from(v);
        }
        if let Some(v) = env_value("SLOTWATCH_HEARTBEAT_PATH") {
            self.storage.heartbeat_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_value("SLOTWATCH_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env_value("SLOTWATCH_LOG_FORMAT") {
            self.logging.format = v;
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Check every value and build the settings used at runtime
    ///
    /// All problems are collected so a broken file can be fixed in one pass.
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let mut errors = Vec::new();

        let mut require = |value: &str, name: &str| {
            if value.trim().is_empty() {
                errors.push(format!("{name} is required"));
            }
        };
        require(&self.account.email, "account.email");
        require(&self.account.password, "account.password");
        require(&self.search.location, "search.location");

        let current_appointment =
            parse_date(&self.search.current_appointment, "search.current_appointment", &mut errors);
        let start = parse_date(&self.search.start_date, "search.start_date", &mut errors);
        let end = parse_date(&self.search.end_date, "search.end_date", &mut errors);
        let window = match (start, end) {
            (Some(start), Some(end)) => {
                let window = DateWindow::new(start, end);
                if window.is_none() {
                    errors.push(format!(
                        "search.start_date ({start}) must be earlier than or equal to search.end_date ({end})"
                    ));
                }
                window
            }
            _ => None,
        };

        let mut positive = |value: u64, name: &str| {
            if value == 0 {
                errors.push(format!("{name} must be greater than 0"));
            }
        };
        positive(u64::from(self.schedule.frequency_minutes), "schedule.frequency_minutes");
        positive(
            u64::from(self.schedule.driver_restart_checks),
            "schedule.driver_restart_checks",
        );
        positive(self.schedule.busy_backoff_min_minutes, "schedule.busy_backoff_min_minutes");
        positive(self.schedule.busy_backoff_max_minutes, "schedule.busy_backoff_max_minutes");
        positive(u64::from(self.retry.max_attempts), "retry.max_attempts");
        positive(self.retry.backoff_seconds, "retry.backoff_seconds");
        positive(u64::from(self.search.max_calendar_months), "search.max_calendar_months");
        positive(self.browser.page_load_timeout_secs, "browser.page_load_timeout_secs");
        positive(self.storage.artifact_retention as u64, "storage.artifact_retention");
        positive(self.storage.pattern_max_events as u64, "storage.pattern_max_events");

        if self.schedule.busy_backoff_min_minutes > self.schedule.busy_backoff_max_minutes {
            errors.push(format!(
                "schedule.busy_backoff_min_minutes ({}) exceeds schedule.busy_backoff_max_minutes ({})",
                self.schedule.busy_backoff_min_minutes, self.schedule.busy_backoff_max_minutes
            ));
        }
        if !(self.schedule.prime_time_factor > 0.0) {
            errors.push("schedule.prime_time_factor must be positive".to_string());
        }
        if !(self.schedule.weekend_multiplier > 0.0) {
            errors.push("schedule.weekend_multiplier must be positive".to_string());
        }

        if Url::parse(&self.browser.webdriver_url).is_err() {
            errors.push(format!(
                "browser.webdriver_url is not a valid URL: {}",
                self.browser.webdriver_url
            ));
        }
        if Url::parse(&self.site.base_url).is_err() {
            errors.push(format!("site.base_url is not a valid URL: {}", self.site.base_url));
        }
        if self.site.locale.trim_matches('/').is_empty() {
            errors.push("site.locale is required".to_string());
        }

        let webhook = self.webhook_config();
        if let Some(webhook) = &webhook {
            if let Err(e) = webhook.validate() {
                errors.push(format!("notify.webhook_url: {e}"));
            }
        }
        if let Some(email) = &self.notify.email {
            if let Err(e) = email.validate() {
                errors.push(format!("notify.email: {e}"));
            }
        }

        let metrics_addr = match self.metrics.listen_addr.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(addr) => match addr.parse::<SocketAddr>() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    errors.push(format!("metrics.listen_addr must be host:port, got {addr:?}"));
                    None
                }
            },
        };

        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => errors.push(format!("logging.format must be \"text\" or \"json\", got {other:?}")),
        }

        let (Some(current_appointment), Some(window)) = (current_appointment, window) else {
            return Err(ConfigError::Invalid(errors));
        };
        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        let mut driver = DriverConfig::default()
            .endpoint(self.browser.webdriver_url.clone())
            .headless(self.browser.headless);
        driver.page_load_timeout = Duration::from_secs(self.browser.page_load_timeout_secs);
        if let Some(user_agent) = &self.browser.user_agent {
            driver.user_agent = user_agent.clone();
        }

        Ok(Settings {
            credentials: Credentials {
                email: self.account.email.trim().to_string(),
                password: self.account.password.clone(),
            },
            location: self.search.location.trim().to_string(),
            current_appointment,
            window,
            max_calendar_months: self.search.max_calendar_months,
            busy_recheck: Duration::from_secs(self.search.busy_recheck_secs),
            auto_book: self.search.auto_book,
            frequency_minutes: self.schedule.frequency_minutes,
            jitter_seconds: self.schedule.jitter_seconds,
            prime_time: PrimeTime {
                windows: self.schedule.prime_time_hours.clone(),
                factor: self.schedule.prime_time_factor,
                weekend_multiplier: self.schedule.weekend_multiplier,
            },
            busy_backoff_minutes: (
                self.schedule.busy_backoff_min_minutes,
                self.schedule.busy_backoff_max_minutes,
            ),
            driver_restart_checks: self.schedule.driver_restart_checks,
            pattern_learning: self.schedule.pattern_learning,
            report_interval: (self.schedule.report_interval_secs > 0)
                .then(|| Duration::from_secs(self.schedule.report_interval_secs)),
            max_retry_attempts: self.retry.max_attempts,
            retry_backoff: Duration::from_secs(self.retry.backoff_seconds),
            abort_on_captcha: self.browser.abort_on_captcha,
            selectors_path: self.browser.selectors_path.clone(),
            driver,
            webhook,
            email: self.notify.email.clone(),
            metrics_addr,
            artifacts_dir: self.storage.artifacts_dir.clone(),
            artifact_retention: self.storage.artifact_retention,
            heartbeat_path: self.storage.heartbeat_path.clone(),
            pattern_log_path: self.storage.pattern_log_path.clone(),
            pattern_max_events: self.storage.pattern_max_events,
            urls: SiteUrls::for_locale(&self.site.base_url, &self.site.locale),
            logging: self.logging.clone(),
        })
    }

    fn webhook_config(&self) -> Option<WebhookConfig> {
        let url = self.notify.webhook_url.as_deref()?.trim();
        if url.is_empty() {
            return None;
        }
        let mut config = WebhookConfig::new(url)
            .with_timeout(self.notify.timeout_secs)
            .with_max_retries(self.notify.max_retries);
        if let Some(token) = &self.notify.webhook_token {
            config = config.with_auth_token(token.clone());
        }
        Some(config)
    }
}

fn parse_date(value: &str, name: &str, errors: &mut Vec<String>) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        errors.push(format!("{name} is required"));
        return None;
    }
    match NaiveDate::parse_from_str(value, DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(_) => {
            errors.push(format!("{name} must be formatted as YYYY-MM-DD, got {value:?}"));
            None
        }
    }
}

// ============================================================================
// Validated settings
// ============================================================================

/// Immutable runtime settings produced by [`Config::validate`]
#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials: Credentials,
    pub location: String,
    pub current_appointment: NaiveDate,
    pub window: DateWindow,
    pub max_calendar_months: u32,
    pub busy_recheck: Duration,
    pub auto_book: bool,
    pub frequency_minutes: u32,
    pub jitter_seconds: u64,
    pub prime_time: PrimeTime,
    /// Configured (min, max) busy backoff in minutes
    pub busy_backoff_minutes: (u64, u64),
    pub driver_restart_checks: u32,
    pub pattern_learning: bool,
    pub report_interval: Option<Duration>,
    pub max_retry_attempts: u32,
    pub retry_backoff: Duration,
    pub abort_on_captcha: bool,
    pub selectors_path: Option<PathBuf>,
    pub driver: DriverConfig,
    pub webhook: Option<WebhookConfig>,
    pub email: Option<EmailConfig>,
    /// Where `/metrics` is served, if anywhere
    pub metrics_addr: Option<SocketAddr>,
    pub artifacts_dir: PathBuf,
    pub artifact_retention: usize,
    pub heartbeat_path: Option<PathBuf>,
    pub pattern_log_path: PathBuf,
    pub pattern_max_events: usize,
    pub urls: SiteUrls,
    pub logging: LoggingConfig,
}

impl Settings {
    pub fn navigation_config(&self) -> NavigationConfig {
        NavigationConfig {
            urls: self.urls.clone(),
            credentials: self.credentials.clone(),
            location: self.location.clone(),
            retry: NavigationConfig::page_load_retry(self.max_retry_attempts, self.retry_backoff),
            waits: Waits::default(),
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        let mut config = ProbeConfig::new(self.current_appointment, self.window);
        config.max_calendar_months = self.max_calendar_months;
        config.busy_recheck = self.busy_recheck;
        config
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let mut config = SchedulerConfig::new(f64::from(self.frequency_minutes));
        config.jitter_seconds = self.jitter_seconds;
        config.prime_time = self.prime_time.clone();
        config.busy_backoff_floor = self.busy_backoff_minutes;
        config
    }

    /// One-line summary safe for logs
    pub fn masked_summary(&self) -> String {
        let mut transports: Vec<String> = Vec::new();
        if let Some(host) = self
            .webhook
            .as_ref()
            .and_then(|w| Url::parse(&w.url).ok())
            .and_then(|u| u.host_str().map(str::to_string))
        {
            transports.push(format!("webhook({host})"));
        }
        if let Some(email) = &self.email {
            transports.push(format!("email({})", email.host));
        }
        let notify = if transports.is_empty() {
            "log".to_string()
        } else {
            transports.join("+")
        };
        format!(
            "email={} | location={} | notify={} | auto_book={} | abort_on_captcha={}",
            mask(&self.credentials.email),
            self.location,
            notify,
            self.auto_book,
            self.abort_on_captcha
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SAMPLE: &str = r#"
[account]
email = "someone@example.com"
password = "hunter22"

[search]
current_appointment = "2026-12-15"
location = "Toronto"
start_date = "2026-10-01"
end_date = "2026-12-31"

[schedule]
frequency_minutes = 7
prime_time_hours = [[6, 8]]

[notify]
webhook_url = "https://hooks.example.com/visa"
webhook_token = "tok"
"#;

    fn sample() -> Config {
        toml::from_str(SAMPLE).unwrap()
    }

    fn clear_env() {
        for name in [
            "SLOTWATCH_EMAIL",
            "SLOTWATCH_PASSWORD",
            "SLOTWATCH_FREQUENCY",
            "SLOTWATCH_HEADLESS",
            "SLOTWATCH_HEARTBEAT_PATH",
            "SLOTWATCH_WEBDRIVER_URL",
            "SLOTWATCH_SMTP_HOST",
            "SLOTWATCH_SMTP_USERNAME",
            "SLOTWATCH_SMTP_PASSWORD",
            "SLOTWATCH_SMTP_TO",
            "SLOTWATCH_METRICS_ADDR",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn test_default_config_needs_account_and_dates() {
        let Err(ConfigError::Invalid(errors)) = Config::default().validate() else {
            panic!("default config must not validate");
        };
        assert!(errors.iter().any(|e| e.contains("account.email")));
        assert!(errors.iter().any(|e| e.contains("search.start_date")));
        assert!(errors.iter().any(|e| e.contains("search.location")));
    }

    #[test]
    fn test_sample_validates() {
        let settings = sample().validate().unwrap();
        assert_eq!(settings.frequency_minutes, 7);
        assert_eq!(settings.current_appointment.to_string(), "2026-12-15");
        assert_eq!(settings.window.start.to_string(), "2026-10-01");
        assert_eq!(settings.prime_time.windows, vec![HourWindow::new(6, 8).unwrap()]);
        assert_eq!(settings.busy_backoff_minutes, (10, 15));
        assert_eq!(settings.urls.sign_in, "https://ais.usvisa-info.com/en-ca/niv/users/sign_in");
        let webhook = settings.webhook.as_ref().unwrap();
        assert_eq!(webhook.auth_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_start_after_end_rejected() {
        let mut config = sample();
        config.search.start_date = "2027-01-01".into();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("earlier than or equal"), "{err}");
    }

    #[test]
    fn test_malformed_values_reported_together() {
        let mut config = sample();
        config.search.current_appointment = "15/12/2026".into();
        config.schedule.frequency_minutes = 0;
        config.retry.backoff_seconds = 0;
        config.logging.format = "xml".into();

        let Err(ConfigError::Invalid(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 4, "{errors:?}");
    }

    #[test]
    fn test_busy_backoff_bounds_ordered() {
        let mut config = sample();
        config.schedule.busy_backoff_min_minutes = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_component_configs() {
        let settings = sample().validate().unwrap();

        let scheduler = settings.scheduler_config();
        assert_eq!(scheduler.base_frequency, 7.0);
        assert_eq!(scheduler.jitter_seconds, 60);
        assert_eq!(scheduler.busy_backoff_floor, (10, 15));

        let navigation = settings.navigation_config();
        assert_eq!(navigation.retry.max_retries, 1);
        assert_eq!(navigation.retry.base_delay, Duration::from_secs(5));
        assert_eq!(navigation.location, "Toronto");

        let probe = settings.probe_config();
        assert_eq!(probe.max_calendar_months, 3);
        assert_eq!(probe.busy_recheck, Duration::from_secs(2));
    }

    #[test]
    fn test_masked_summary_hides_email() {
        let summary = sample().validate().unwrap().masked_summary();
        assert!(summary.contains("email=so***om"), "{summary}");
        assert!(summary.contains("notify=webhook(hooks.example.com)"));
        assert!(!summary.contains("hunter22"));
        assert!(!format!("{:?}", sample().account).contains("hunter22"));
    }

    #[test]
    fn test_from_file_round_trip_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slotwatch.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.search.location, "Toronto");

        assert!(matches!(
            Config::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[schedule]\nprime_time_hours = [[25, 2]]\n").unwrap();
        assert!(matches!(Config::from_file(&broken), Err(ConfigError::Parse { .. })));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file_values() {
        clear_env();
        std::env::set_var("SLOTWATCH_PASSWORD", "from-env");
        std::env::set_var("SLOTWATCH_FREQUENCY", "12");
        std::env::set_var("SLOTWATCH_HEADLESS", "no");
        std::env::set_var("SLOTWATCH_HEARTBEAT_PATH", "/tmp/slotwatch-heartbeat.json");

        let mut config = sample();
        config.apply_env().unwrap();
        clear_env();

        assert_eq!(config.account.password, "from-env");
        assert_eq!(config.account.email, "someone@example.com");
        assert_eq!(config.schedule.frequency_minutes, 12);
        assert!(!config.browser.headless);
        assert_eq!(
            config.storage.heartbeat_path.as_deref(),
            Some(Path::new("/tmp/slotwatch-heartbeat.json"))
        );
    }

    #[test]
    #[serial]
    fn test_env_rejects_garbage_numbers() {
        clear_env();
        std::env::set_var("SLOTWATCH_FREQUENCY", "often");
        let result = Config::from_env();
        clear_env();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_email_section_parses_and_validates() {
        let toml = format!(
            "{SAMPLE}\n[notify.email]\nhost = \"smtp.example.com\"\nusername = \"bot@example.com\"\npassword = \"app-pass\"\nfrom = \"slotwatch <bot@example.com>\"\nto = [\"me@example.com\"]\n"
        );
        let config: Config = toml::from_str(&toml).unwrap();
        let settings = config.validate().unwrap();

        let email = settings.email.as_ref().unwrap();
        assert_eq!(email.port, 587);
        assert_eq!(email.security, crate::notifications::SmtpSecurity::Starttls);
        assert_eq!(email.to, vec!["me@example.com".to_string()]);

        let summary = settings.masked_summary();
        assert!(summary.contains("notify=webhook(hooks.example.com)+email(smtp.example.com)"), "{summary}");
        assert!(!format!("{:?}", config.notify).contains("app-pass"));
    }

    #[test]
    fn test_invalid_email_addresses_rejected() {
        let mut config = sample();
        config.notify.email = Some(EmailConfig::new("smtp.example.com", "nobody", "me@example.com"));
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("notify.email: from:"), "{err}");

        let mut config = sample();
        let mut email = EmailConfig::new("smtp.example.com", "bot@example.com", "me@example.com");
        email.to.clear();
        config.notify.email = Some(email);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("notify.email"), "{err}");
    }

    #[test]
    #[serial]
    fn test_env_configures_email_and_metrics() {
        clear_env();
        std::env::set_var("SLOTWATCH_SMTP_HOST", "smtp.example.org");
        std::env::set_var("SLOTWATCH_SMTP_PASSWORD", "from-env");
        std::env::set_var("SLOTWATCH_SMTP_TO", "a@example.org, b@example.org");
        std::env::set_var("SLOTWATCH_METRICS_ADDR", "127.0.0.1:9184");

        let mut config = sample();
        config.apply_env().unwrap();
        clear_env();

        let email = config.notify.email.as_ref().unwrap();
        assert_eq!(email.host, "smtp.example.org");
        assert_eq!(email.password.as_deref(), Some("from-env"));
        assert_eq!(email.to, vec!["a@example.org".to_string(), "b@example.org".to_string()]);
        assert_eq!(config.metrics.listen_addr.as_deref(), Some("127.0.0.1:9184"));
    }

    #[test]
    fn test_metrics_addr_validated() {
        let mut config = sample();
        assert!(config.validate().unwrap().metrics_addr.is_none());

        config.metrics.listen_addr = Some("127.0.0.1:9184".into());
        assert_eq!(
            config.validate().unwrap().metrics_addr,
            Some("127.0.0.1:9184".parse().unwrap())
        );

        config.metrics.listen_addr = Some("localhost".into());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("metrics.listen_addr"), "{err}");
    }
}
