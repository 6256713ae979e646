//! Multi-strategy element resolution
//!
//! [`ElementResolver::resolve`] walks a [`SelectorSet`] in priority order,
//! first in the top-level document and then inside each `<iframe>`. For every
//! strategy it polls until a visible (optionally clickable) element shows up
//! or the per-strategy wait runs out. "Not found" is `Ok(None)`; only
//! transport faults surface as errors.
//!
//! Hot controls can go through [`ElementResolver::resolve_cached`], which keeps
//! a bounded map of handles and re-validates each one before reuse.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::driver::{BrowserDriver, DriverError, DriverResult, ElementRef};
use crate::selectors::{ElementKey, Selector, SelectorSet};

/// Default delay between polls of a single strategy
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const DEFAULT_CACHE_CAPACITY: usize = 8;

/// Bounded, explicitly keyed handle cache
#[derive(Debug)]
pub struct ElementCache {
    capacity: usize,
    entries: VecDeque<(ElementKey, ElementRef)>,
}

impl ElementCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn get(&self, key: ElementKey) -> Option<&ElementRef> {
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, e)| e)
    }

    /// Insert or replace; the oldest entry is dropped when full
    pub fn insert(&mut self, key: ElementKey, element: ElementRef) {
        self.evict(key);
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((key, element));
    }

    pub fn evict(&mut self, key: ElementKey) {
        self.entries.retain(|(k, _)| *k != key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves selector sets against one browser session
pub struct ElementResolver {
    driver: Arc<dyn BrowserDriver>,
    poll_interval: Duration,
    cache: Mutex<ElementCache>,
}

impl ElementResolver {
    pub fn new(driver: Arc<dyn BrowserDriver>) -> Self {
        Self {
            driver,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cache: Mutex::new(ElementCache::new(DEFAULT_CACHE_CAPACITY)),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(10));
        self
    }

    pub fn driver(&self) -> &Arc<dyn BrowserDriver> {
        &self.driver
    }

    /// Find the first usable element for `set`
    ///
    /// Searches the default document, then each frame in document order. On a
    /// hit inside a frame the driver stays switched into that frame.
    pub async fn resolve(
        &self,
        set: &SelectorSet,
        wait: Duration,
        require_clickable: bool,
    ) -> DriverResult<Option<ElementRef>> {
        self.driver.switch_to_default().await?;
        if let Some(found) = self.search_context(set, wait, require_clickable).await? {
            return Ok(Some(found));
        }

        let frames = self.driver.find_elements(&Selector::tag("iframe")).await?;
        for (index, frame) in frames.iter().enumerate() {
            self.driver.switch_to_default().await?;
            match self.driver.switch_to_frame(frame).await {
                Ok(()) => {}
                Err(e) if e.is_element_miss() => {
                    trace!(frame = index, error = %e, "Frame unavailable");
                    continue;
                }
                Err(e) => return Err(e),
            }
            if let Some(found) = self.search_context(set, wait, require_clickable).await? {
                debug!(frame = index, "Element resolved inside frame");
                return Ok(Some(found));
            }
        }

        self.driver.switch_to_default().await?;
        Ok(None)
    }

    /// Like [`resolve`](Self::resolve), reusing a cached handle when it is still live
    pub async fn resolve_cached(
        &self,
        key: ElementKey,
        set: &SelectorSet,
        wait: Duration,
        require_clickable: bool,
    ) -> DriverResult<Option<ElementRef>> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(key).cloned() {
            match self.still_usable(&cached, require_clickable).await {
                Ok(true) => {
                    trace!(element = %key, "Using cached element");
                    return Ok(Some(cached));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Ok(false) | Err(_) => {
                    debug!(element = %key, "Cached element went stale; evicting");
                    cache.evict(key);
                }
            }
        }

        let found = self.resolve(set, wait, require_clickable).await?;
        if let Some(element) = &found {
            cache.insert(key, element.clone());
        }
        Ok(found)
    }

    /// A cached handle must still be displayed, and enabled when clicks are needed
    async fn still_usable(&self, element: &ElementRef, require_clickable: bool) -> DriverResult<bool> {
        if !self.driver.is_displayed(element).await? {
            return Ok(false);
        }
        if require_clickable {
            return self.driver.is_enabled(element).await;
        }
        Ok(true)
    }

    pub async fn invalidate(&self, key: ElementKey) {
        self.cache.lock().await.evict(key);
    }

    pub async fn cached_count(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// First displayed element in the top-level document, without waiting
    pub async fn first_visible(&self, set: &SelectorSet) -> DriverResult<Option<ElementRef>> {
        self.driver.switch_to_default().await?;
        for selector in set {
            if let Some(found) = self.try_selector(selector, false).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Poll until any of `sets` has a visible element; returns its index
    pub async fn wait_for_any(
        &self,
        sets: &[&SelectorSet],
        wait: Duration,
    ) -> DriverResult<Option<usize>> {
        let deadline = Instant::now() + wait;
        loop {
            for (index, set) in sets.iter().enumerate() {
                if self.first_visible(set).await?.is_some() {
                    return Ok(Some(index));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Children of `parent` matching the first selector of `set` that yields any
    pub async fn children(
        &self,
        parent: &ElementRef,
        set: &SelectorSet,
    ) -> DriverResult<Vec<ElementRef>> {
        for selector in set {
            match self.driver.find_child_elements(parent, selector).await {
                Ok(found) if !found.is_empty() => return Ok(found),
                Ok(_) => continue,
                Err(e) if e.is_element_miss() => return Ok(Vec::new()),
                Err(e) => return Err(e),
            }
        }
        Ok(Vec::new())
    }

    async fn search_context(
        &self,
        set: &SelectorSet,
        wait: Duration,
        require_clickable: bool,
    ) -> DriverResult<Option<ElementRef>> {
        for selector in set {
            let deadline = Instant::now() + wait;
            loop {
                if let Some(found) = self.try_selector(selector, require_clickable).await? {
                    trace!(selector = %selector, "Selector matched");
                    return Ok(Some(found));
                }
                if Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        Ok(None)
    }

    async fn try_selector(
        &self,
        selector: &Selector,
        require_clickable: bool,
    ) -> DriverResult<Option<ElementRef>> {
        let candidates = match self.driver.find_elements(selector).await {
            Ok(found) => found,
            Err(e) if is_miss(&e) => return Ok(None),
            Err(e) => return Err(e),
        };

        for candidate in candidates {
            match self.usable(&candidate, require_clickable).await {
                Ok(true) => return Ok(Some(candidate)),
                Ok(false) => continue,
                Err(e) if is_miss(&e) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn usable(&self, element: &ElementRef, require_clickable: bool) -> DriverResult<bool> {
        if !self.driver.is_displayed(element).await? {
            return Ok(false);
        }
        if require_clickable {
            return self.driver.is_enabled(element).await;
        }
        Ok(true)
    }
}

/// Protocol errors from a bad locator are treated like "no match"
fn is_miss(error: &DriverError) -> bool {
    error.is_element_miss() || matches!(error, DriverError::Protocol { .. })
}
