//! Ownership of the single browser session

use std::sync::Arc;
use tracing::{debug, info};

use crate::driver::{BrowserDriver, DriverFactory, DriverResult};
use crate::metrics;

/// The one browser session the checker drives
///
/// Created lazily by [`ensure`](Self::ensure) and torn down by
/// [`reset`](Self::reset); the next `ensure` starts a fresh one.
pub struct SessionHandle {
    factory: Arc<dyn DriverFactory>,
    driver: Option<Arc<dyn BrowserDriver>>,
    checks_since_restart: u32,
}

impl SessionHandle {
    pub fn new(factory: Arc<dyn DriverFactory>) -> Self {
        Self {
            factory,
            driver: None,
            checks_since_restart: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.driver.is_some()
    }

    pub fn driver(&self) -> Option<&Arc<dyn BrowserDriver>> {
        self.driver.as_ref()
    }

    /// Live session, plus whether it was created by this call
    pub async fn ensure(&mut self) -> DriverResult<(Arc<dyn BrowserDriver>, bool)> {
        if let Some(driver) = &self.driver {
            return Ok((driver.clone(), false));
        }
        let driver = self.factory.create().await?;
        info!("Browser session started");
        self.driver = Some(driver.clone());
        Ok((driver, true))
    }

    pub fn record_check(&mut self) -> u32 {
        self.checks_since_restart += 1;
        self.checks_since_restart
    }

    pub fn checks_since_restart(&self) -> u32 {
        self.checks_since_restart
    }

    /// End the session without touching the restart counter
    pub async fn quit(&mut self) {
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.quit().await {
                debug!(error = %e, "Driver quit failed; continuing cleanup");
            }
        }
    }

    /// Quit and start counting from zero again
    pub async fn reset(&mut self, reason: &str) {
        if self.driver.is_some() {
            info!(reason = reason, "Resetting browser session");
            metrics::record_session_restart(reason);
        }
        self.quit().await;
        self.checks_since_restart = 0;
    }
}
