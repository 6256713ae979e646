//! Run statistics and the periodic status reporter
//!
//! The main loop updates [`CheckerStats`] after every cycle. The reporter runs
//! as the only background task: it reads a snapshot under the lock on each
//! tick, logs a summary and never touches the browser session.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome lines kept for the summary
pub const RECENT_OUTCOMES: usize = 10;

/// Counters shared between the main loop and the reporter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerStats {
    pub started_at: DateTime<Utc>,
    pub checks: u64,
    pub successes: u64,
    pub failures: u64,
    pub busy: u64,
    pub captcha_blocks: u64,
    pub availability_notifications: u64,
    pub error_notifications: u64,
    pub session_restarts: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub recent: VecDeque<String>,
}

impl Default for CheckerStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            checks: 0,
            successes: 0,
            failures: 0,
            busy: 0,
            captcha_blocks: 0,
            availability_notifications: 0,
            error_notifications: 0,
            session_restarts: 0,
            last_check: None,
            recent: VecDeque::with_capacity(RECENT_OUTCOMES),
        }
    }
}

impl CheckerStats {
    pub fn success_rate(&self) -> f64 {
        if self.checks == 0 {
            1.0
        } else {
            self.successes as f64 / self.checks as f64
        }
    }

    /// Remember one outcome line, dropping the oldest beyond [`RECENT_OUTCOMES`]
    pub fn push_recent(&mut self, line: String) {
        if self.recent.len() == RECENT_OUTCOMES {
            self.recent.pop_front();
        }
        self.recent.push_back(line);
    }

    pub fn summary(&self) -> String {
        let uptime = Utc::now() - self.started_at;
        format!(
            "checks={} success_rate={:.0}% busy={} captcha={} notified={}/{} restarts={} uptime={}m",
            self.checks,
            self.success_rate() * 100.0,
            self.busy,
            self.captcha_blocks,
            self.availability_notifications,
            self.error_notifications,
            self.session_restarts,
            uptime.num_minutes()
        )
    }
}

pub type SharedStats = Arc<RwLock<CheckerStats>>;

/// Background task logging [`CheckerStats`] on a fixed interval
pub struct StatusReporter {
    handle: JoinHandle<()>,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl StatusReporter {
    /// Start reporting every `interval`
    pub fn spawn(stats: SharedStats, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = tokio::sync::watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = stats.read().await.clone();
                        info!(summary = %snapshot.summary(), "Status report");
                        for line in &snapshot.recent {
                            debug!("  {line}");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Status reporter shutting down");
                        break;
                    }
                }
            }
        });

        Self { handle, shutdown }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal shutdown and wait up to `timeout` for the task to finish
    pub async fn stop(self, timeout: Duration) {
        let _ = self.shutdown.send(true);
        let abort = self.handle.abort_handle();
        if tokio::time::timeout(timeout, self.handle).await.is_err() {
            warn!("Status reporter did not stop in time; aborting");
            abort.abort();
        }
    }
}
