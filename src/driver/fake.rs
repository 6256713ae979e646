//! In-memory browser for tests
//!
//! A [`FakeBrowser`] holds a small site model: pages keyed by URL, each with a
//! tree of [`FakeElement`]s. Elements match selectors either through explicit
//! matchers or through their `id`/`name`/tag. Clicks run a [`ClickAction`]
//! (navigate, sign in, show or hide another element, swap a subtree), which is
//! enough to script login flows, interstitials and datepicker paging.
//!
//! Handles embed a page generation counter, so any handle taken before a
//! navigation reports [`DriverError::StaleElement`] afterwards.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{BrowserDriver, DriverError, DriverFactory, DriverResult, ElementRef};
use crate::selectors::{Selector, Strategy};

/// What happens when an element is clicked
#[derive(Debug, Clone, Default)]
pub enum ClickAction {
    #[default]
    None,
    /// Load another URL
    Navigate(String),
    /// Mark the session as signed in, then load the URL
    SignIn(String),
    /// Make the element with this key visible
    Show(String),
    /// Hide the element with this key
    Hide(String),
    /// Replace the children of the element with this key
    ReplaceChildren {
        target: String,
        children: Vec<FakeElement>,
    },
    Sequence(Vec<ClickAction>),
}

/// A node in a fake page
#[derive(Debug, Clone)]
pub struct FakeElement {
    pub key: String,
    pub tag: String,
    pub text: String,
    pub attributes: HashMap<String, String>,
    pub css: HashMap<String, String>,
    pub displayed: bool,
    pub enabled: bool,
    pub selected: bool,
    /// Extra selectors this element answers to
    pub matchers: Vec<Selector>,
    pub children: Vec<FakeElement>,
    /// Document inside an `<iframe>`
    pub frame_content: Vec<FakeElement>,
    pub on_click: ClickAction,
    /// Number of upcoming direct clicks that fail as intercepted
    pub intercept_clicks: u32,
}

impl FakeElement {
    pub fn new(key: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            tag: tag.into(),
            text: String::new(),
            attributes: HashMap::new(),
            css: HashMap::new(),
            displayed: true,
            enabled: true,
            selected: false,
            matchers: Vec::new(),
            children: Vec::new(),
            frame_content: Vec::new(),
            on_click: ClickAction::None,
            intercept_clicks: 0,
        }
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn css(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.css.insert(property.into(), value.into());
        self
    }

    #[must_use]
    pub fn matches(mut self, selector: Selector) -> Self {
        self.matchers.push(selector);
        self
    }

    #[must_use]
    pub fn child(mut self, child: FakeElement) -> Self {
        self.children.push(child);
        self
    }

    #[must_use]
    pub fn children(mut self, children: impl IntoIterator<Item = FakeElement>) -> Self {
        self.children.extend(children);
        self
    }

    #[must_use]
    pub fn frame(mut self, content: impl IntoIterator<Item = FakeElement>) -> Self {
        self.frame_content.extend(content);
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.displayed = false;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    #[must_use]
    pub fn selected(mut self) -> Self {
        self.selected = true;
        self
    }

    #[must_use]
    pub fn on_click(mut self, action: ClickAction) -> Self {
        self.on_click = action;
        self
    }

    #[must_use]
    pub fn intercept_clicks(mut self, count: u32) -> Self {
        self.intercept_clicks = count;
        self
    }

    fn matches_selector(&self, selector: &Selector) -> bool {
        if self.matchers.contains(selector) {
            return true;
        }
        match selector.by {
            Strategy::Id => self.attributes.get("id") == Some(&selector.target),
            Strategy::Name => self.attributes.get("name") == Some(&selector.target),
            Strategy::TagName => self.tag.eq_ignore_ascii_case(&selector.target),
            Strategy::ClassName => self
                .attributes
                .get("class")
                .is_some_and(|c| c.split_whitespace().any(|c| c == selector.target)),
            _ => false,
        }
    }

    fn render(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.tag);
        let mut attrs: Vec<_> = self.attributes.iter().collect();
        attrs.sort();
        for (name, value) in attrs {
            out.push_str(&format!(" {name}=\"{value}\""));
        }
        out.push('>');
        out.push_str(&self.text);
        for child in &self.children {
            child.render(out);
        }
        out.push_str(&format!("</{}>", self.tag));
    }
}

/// A page in the fake site
#[derive(Debug, Clone)]
pub struct FakePage {
    pub url: String,
    pub title: String,
    /// Extra raw markup appended to the rendered source
    pub raw_source: String,
    pub elements: Vec<FakeElement>,
    /// Unauthenticated sessions are sent to the login URL instead
    pub requires_auth: bool,
    /// Signed-in sessions are sent here instead (e.g. login → dashboard)
    pub redirect_when_signed_in: Option<String>,
}

impl FakePage {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            raw_source: String::new(),
            elements: Vec::new(),
            requires_auth: false,
            redirect_when_signed_in: None,
        }
    }

    #[must_use]
    pub fn element(mut self, element: FakeElement) -> Self {
        self.elements.push(element);
        self
    }

    #[must_use]
    pub fn raw(mut self, markup: impl Into<String>) -> Self {
        self.raw_source.push_str(&markup.into());
        self
    }

    #[must_use]
    pub fn requires_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    #[must_use]
    pub fn redirect_when_signed_in(mut self, url: impl Into<String>) -> Self {
        self.redirect_when_signed_in = Some(url.into());
        self
    }
}

#[derive(Debug, Default)]
struct FakeState {
    pages: HashMap<String, FakePage>,
    login_url: Option<String>,
    current_url: String,
    /// Working copy of the current page; mutations do not leak into `pages`
    current: Option<FakePage>,
    frame: Option<String>,
    generation: u64,
    authenticated: bool,
    session_alive: bool,
    sessions_created: usize,
    quits: usize,
    navigations: Vec<String>,
    clicks: Vec<String>,
    typed: HashMap<String, String>,
    failing_loads: HashMap<String, u32>,
    scripts: Vec<String>,
    ready_state: String,
}

fn normalize(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn find<'a>(elements: &'a [FakeElement], key: &str) -> Option<&'a FakeElement> {
    for element in elements {
        if element.key == key {
            return Some(element);
        }
        if let Some(found) = find(&element.children, key).or_else(|| find(&element.frame_content, key)) {
            return Some(found);
        }
    }
    None
}

fn find_mut<'a>(elements: &'a mut [FakeElement], key: &str) -> Option<&'a mut FakeElement> {
    for element in elements.iter_mut() {
        if element.key == key {
            return Some(element);
        }
        if let Some(found) = find_mut(&mut element.children, key) {
            return Some(found);
        }
        if let Some(found) = find_mut(&mut element.frame_content, key) {
            return Some(found);
        }
    }
    None
}

/// Pre-order walk that does not descend into frames
fn collect_matching(elements: &[FakeElement], selector: &Selector, out: &mut Vec<String>) {
    for element in elements {
        if element.matches_selector(selector) {
            out.push(element.key.clone());
        }
        collect_matching(&element.children, selector, out);
    }
}

fn parent_of<'a>(elements: &'a [FakeElement], key: &str) -> Option<&'a FakeElement> {
    for element in elements {
        if element.children.iter().any(|c| c.key == key) {
            return Some(element);
        }
        if let Some(found) =
            parent_of(&element.children, key).or_else(|| parent_of(&element.frame_content, key))
        {
            return Some(found);
        }
    }
    None
}

impl FakeState {
    fn handle(&self, key: &str) -> ElementRef {
        ElementRef::new(format!("{}:{key}", self.generation))
    }

    fn alive(&self) -> DriverResult<()> {
        if self.session_alive {
            Ok(())
        } else {
            Err(DriverError::SessionLost("fake session is closed".into()))
        }
    }

    fn key_of(&self, element: &ElementRef) -> DriverResult<String> {
        self.alive()?;
        let (generation, key) = element
            .id()
            .split_once(':')
            .ok_or(DriverError::StaleElement)?;
        if generation != self.generation.to_string() {
            return Err(DriverError::StaleElement);
        }
        let page = self.current.as_ref().ok_or(DriverError::StaleElement)?;
        find(&page.elements, key)
            .map(|_| key.to_string())
            .ok_or(DriverError::StaleElement)
    }

    fn element(&self, handle: &ElementRef) -> DriverResult<&FakeElement> {
        let key = self.key_of(handle)?;
        let page = self.current.as_ref().ok_or(DriverError::StaleElement)?;
        find(&page.elements, &key).ok_or(DriverError::StaleElement)
    }

    fn element_mut(&mut self, key: &str) -> Option<&mut FakeElement> {
        self.current
            .as_mut()
            .and_then(|page| find_mut(&mut page.elements, key))
    }

    fn load(&mut self, url: &str) -> DriverResult<()> {
        self.alive()?;
        let requested = normalize(url);
        self.navigations.push(url.to_string());

        if let Some(remaining) = self.failing_loads.get_mut(&requested) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DriverError::Navigation {
                    url: url.to_string(),
                    message: "simulated page load timeout".into(),
                });
            }
        }

        let mut target = requested;
        for _ in 0..4 {
            let Some(page) = self.pages.get(&target) else {
                break;
            };
            if page.requires_auth && !self.authenticated {
                match &self.login_url {
                    Some(login) if normalize(login) != target => target = normalize(login),
                    _ => break,
                }
            } else if let (true, Some(next)) = (self.authenticated, &page.redirect_when_signed_in) {
                target = normalize(next);
            } else {
                break;
            }
        }

        self.generation += 1;
        self.frame = None;
        self.current = Some(
            self.pages
                .get(&target)
                .cloned()
                .unwrap_or_else(|| FakePage::new(target.clone())),
        );
        self.current_url = target;
        Ok(())
    }

    fn apply(&mut self, action: ClickAction) -> DriverResult<()> {
        match action {
            ClickAction::None => Ok(()),
            ClickAction::Navigate(url) => self.load(&url),
            ClickAction::SignIn(url) => {
                self.authenticated = true;
                self.load(&url)
            }
            ClickAction::Show(key) => {
                if let Some(element) = self.element_mut(&key) {
                    element.displayed = true;
                }
                Ok(())
            }
            ClickAction::Hide(key) => {
                if let Some(element) = self.element_mut(&key) {
                    element.displayed = false;
                }
                Ok(())
            }
            ClickAction::ReplaceChildren { target, children } => {
                if let Some(element) = self.element_mut(&target) {
                    element.children = children;
                }
                Ok(())
            }
            ClickAction::Sequence(actions) => {
                for action in actions {
                    self.apply(action)?;
                }
                Ok(())
            }
        }
    }

    fn activate(&mut self, key: &str) -> DriverResult<()> {
        self.clicks.push(key.to_string());
        let (is_option, is_checkbox, action) = {
            let page = self.current.as_ref().ok_or(DriverError::StaleElement)?;
            let element = find(&page.elements, key).ok_or(DriverError::StaleElement)?;
            (
                element.tag == "option"
                    || element.attributes.get("role").map(String::as_str) == Some("option"),
                element.attributes.get("type").map(String::as_str) == Some("checkbox"),
                element.on_click.clone(),
            )
        };

        if is_option || is_checkbox {
            self.toggle_selection(key, is_option);
        }
        self.apply(action)
    }

    fn toggle_selection(&mut self, key: &str, exclusive: bool) {
        let siblings: Vec<String> = if exclusive {
            self.current
                .as_ref()
                .and_then(|page| parent_of(&page.elements, key))
                .map(|parent| parent.children.iter().map(|c| c.key.clone()).collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        for sibling in siblings {
            if let Some(element) = self.element_mut(&sibling) {
                element.selected = false;
                if element.attributes.contains_key("aria-selected") {
                    element.attributes.insert("aria-selected".into(), "false".into());
                }
            }
        }
        if let Some(element) = self.element_mut(key) {
            element.selected = if exclusive { true } else { !element.selected };
            if exclusive {
                element.attributes.insert("aria-selected".into(), "true".into());
            }
        }
    }

    fn scope(&self) -> &[FakeElement] {
        let Some(page) = self.current.as_ref() else {
            return &[];
        };
        match &self.frame {
            Some(frame) => find(&page.elements, frame)
                .map(|f| f.frame_content.as_slice())
                .unwrap_or(&[]),
            None => &page.elements,
        }
    }
}

/// Scriptable in-memory browser; clones share state
#[derive(Debug, Clone, Default)]
pub struct FakeBrowser {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        let browser = Self::default();
        {
            let mut state = browser.lock();
            state.session_alive = true;
            state.ready_state = "complete".into();
            state.current_url = "about:blank".into();
        }
        browser
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        // A panic inside a test holding the lock leaves the data usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register (or replace) a page
    pub fn add_page(&self, page: FakePage) -> &Self {
        let mut state = self.lock();
        state.pages.insert(normalize(&page.url), page);
        self
    }

    /// Where unauthenticated requests for protected pages end up
    pub fn set_login_url(&self, url: impl Into<String>) -> &Self {
        self.lock().login_url = Some(url.into());
        self
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.lock().authenticated = authenticated;
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().authenticated
    }

    /// Make the next `count` loads of `url` fail
    pub fn fail_loads(&self, url: &str, count: u32) {
        self.lock().failing_loads.insert(normalize(url), count);
    }

    /// Value reported for `document.readyState`
    pub fn set_ready_state(&self, value: impl Into<String>) {
        self.lock().ready_state = value.into();
    }

    /// Simulate a crashed browser
    pub fn kill_session(&self) {
        self.lock().session_alive = false;
    }

    /// Mutate an element on the current page
    pub fn update_element(&self, key: &str, update: impl FnOnce(&mut FakeElement)) {
        let mut state = self.lock();
        if let Some(element) = state.element_mut(key) {
            update(element);
        }
    }

    pub fn navigations(&self) -> Vec<String> {
        self.lock().navigations.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.lock().clicks.clone()
    }

    pub fn typed(&self, key: &str) -> Option<String> {
        self.lock().typed.get(key).cloned()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.lock().scripts.clone()
    }

    pub fn sessions_created(&self) -> usize {
        self.lock().sessions_created
    }

    pub fn quits(&self) -> usize {
        self.lock().quits
    }

    pub fn current_url_now(&self) -> String {
        self.lock().current_url.clone()
    }

    pub fn is_selected_now(&self, key: &str) -> bool {
        let state = self.lock();
        state
            .current
            .as_ref()
            .and_then(|page| find(&page.elements, key))
            .is_some_and(|e| e.selected)
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.lock().load(url)
    }

    async fn current_url(&self) -> DriverResult<String> {
        let state = self.lock();
        state.alive()?;
        Ok(state.current_url.clone())
    }

    async fn page_source(&self) -> DriverResult<String> {
        let state = self.lock();
        state.alive()?;
        let mut out = String::from("<html><body>");
        if let Some(page) = &state.current {
            for element in &page.elements {
                element.render(&mut out);
            }
            out.push_str(&page.raw_source);
        }
        out.push_str("</body></html>");
        Ok(out)
    }

    async fn find_elements(&self, selector: &Selector) -> DriverResult<Vec<ElementRef>> {
        let state = self.lock();
        state.alive()?;
        let mut keys = Vec::new();
        collect_matching(state.scope(), selector, &mut keys);
        Ok(keys.iter().map(|k| state.handle(k)).collect())
    }

    async fn find_child_elements(
        &self,
        parent: &ElementRef,
        selector: &Selector,
    ) -> DriverResult<Vec<ElementRef>> {
        let state = self.lock();
        let element = state.element(parent)?;
        let mut keys = Vec::new();
        collect_matching(&element.children, selector, &mut keys);
        Ok(keys.iter().map(|k| state.handle(k)).collect())
    }

    async fn switch_to_frame(&self, frame: &ElementRef) -> DriverResult<()> {
        let mut state = self.lock();
        let element = state.element(frame)?;
        if element.tag != "iframe" {
            return Err(DriverError::NoSuchFrame);
        }
        let key = element.key.clone();
        state.frame = Some(key);
        Ok(())
    }

    async fn switch_to_default(&self) -> DriverResult<()> {
        let mut state = self.lock();
        state.alive()?;
        state.frame = None;
        Ok(())
    }

    async fn is_displayed(&self, element: &ElementRef) -> DriverResult<bool> {
        Ok(self.lock().element(element)?.displayed)
    }

    async fn is_enabled(&self, element: &ElementRef) -> DriverResult<bool> {
        Ok(self.lock().element(element)?.enabled)
    }

    async fn is_selected(&self, element: &ElementRef) -> DriverResult<bool> {
        Ok(self.lock().element(element)?.selected)
    }

    async fn text(&self, element: &ElementRef) -> DriverResult<String> {
        let state = self.lock();
        let element = state.element(element)?;
        Ok(if element.displayed {
            element.text.clone()
        } else {
            String::new()
        })
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> DriverResult<Option<String>> {
        let state = self.lock();
        let key = state.key_of(element)?;
        let found = state.element(element)?;
        if name == "value" {
            if let Some(typed) = state.typed.get(&key) {
                return Ok(Some(typed.clone()));
            }
        }
        Ok(found.attributes.get(name).cloned())
    }

    async fn tag_name(&self, element: &ElementRef) -> DriverResult<String> {
        Ok(self.lock().element(element)?.tag.clone())
    }

    async fn css_value(&self, element: &ElementRef, property: &str) -> DriverResult<String> {
        let state = self.lock();
        let element = state.element(element)?;
        if let Some(value) = element.css.get(property) {
            return Ok(value.clone());
        }
        Ok(match property {
            "display" if element.displayed => "block".into(),
            "display" => "none".into(),
            _ => String::new(),
        })
    }

    async fn click(&self, element: &ElementRef) -> DriverResult<()> {
        let mut state = self.lock();
        let key = state.key_of(element)?;
        let target = state.element(element)?;
        if !target.displayed || !target.enabled {
            return Err(DriverError::NotInteractable(key));
        }
        if target.intercept_clicks > 0 {
            if let Some(target) = state.element_mut(&key) {
                target.intercept_clicks -= 1;
            }
            return Err(DriverError::ClickIntercepted(key));
        }
        state.activate(&key)
    }

    async fn clear(&self, element: &ElementRef) -> DriverResult<()> {
        let mut state = self.lock();
        let key = state.key_of(element)?;
        state.typed.insert(key, String::new());
        Ok(())
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> DriverResult<()> {
        let mut state = self.lock();
        let key = state.key_of(element)?;
        if !state.element(element)?.displayed {
            return Err(DriverError::NotInteractable(key));
        }
        state.typed.entry(key).or_default().push_str(text);
        Ok(())
    }

    async fn execute_script(&self, script: &str, args: &[ElementRef]) -> DriverResult<Value> {
        let mut state = self.lock();
        state.alive()?;
        state.scripts.push(script.to_string());

        if script.contains("document.readyState") {
            return Ok(Value::String(state.ready_state.clone()));
        }
        if script.contains(".click()") {
            let handle = args.first().ok_or_else(|| DriverError::Protocol {
                error: "javascript error".into(),
                message: "arguments[0] is undefined".into(),
            })?;
            let key = state.key_of(handle)?;
            state.activate(&key)?;
        }
        Ok(Value::Null)
    }

    async fn screenshot_png(&self) -> DriverResult<Vec<u8>> {
        self.lock().alive()?;
        Ok(b"\x89PNG\r\n\x1a\nfake".to_vec())
    }

    async fn quit(&self) -> DriverResult<()> {
        let mut state = self.lock();
        state.quits += 1;
        state.session_alive = false;
        Ok(())
    }
}

#[async_trait]
impl DriverFactory for FakeBrowser {
    /// Every new session starts signed out on a blank page
    async fn create(&self) -> DriverResult<Arc<dyn BrowserDriver>> {
        {
            let mut state = self.lock();
            state.sessions_created += 1;
            state.session_alive = true;
            state.authenticated = false;
            state.generation += 1;
            state.frame = None;
            state.current = None;
            state.current_url = "about:blank".into();
        }
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> FakeBrowser {
        let browser = FakeBrowser::new();
        browser.set_login_url("https://site.test/sign_in");
        browser.add_page(
            FakePage::new("https://site.test/sign_in").element(
                FakeElement::new("submit", "input")
                    .attr("name", "commit")
                    .on_click(ClickAction::SignIn("https://site.test/groups".into())),
            ),
        );
        browser.add_page(
            FakePage::new("https://site.test/groups")
                .requires_auth()
                .element(FakeElement::new("hello", "p").text("Welcome")),
        );
        browser
    }

    #[tokio::test]
    async fn test_protected_page_redirects_to_login() {
        let browser = site();
        browser.navigate("https://site.test/groups").await.unwrap();
        assert_eq!(browser.current_url().await.unwrap(), "https://site.test/sign_in");

        let submit = browser.find_elements(&Selector::name("commit")).await.unwrap();
        browser.click(&submit[0]).await.unwrap();
        assert_eq!(browser.current_url().await.unwrap(), "https://site.test/groups");
        assert!(browser.is_authenticated());
    }

    #[tokio::test]
    async fn test_handles_go_stale_after_navigation() {
        let browser = site();
        browser.navigate("https://site.test/sign_in").await.unwrap();
        let submit = browser.find_elements(&Selector::name("commit")).await.unwrap();
        browser.navigate("https://site.test/sign_in").await.unwrap();
        assert!(matches!(
            browser.is_displayed(&submit[0]).await,
            Err(DriverError::StaleElement)
        ));
    }

    #[tokio::test]
    async fn test_option_click_is_exclusive() {
        let browser = FakeBrowser::new();
        browser.add_page(
            FakePage::new("https://site.test/form").element(
                FakeElement::new("loc", "select")
                    .child(FakeElement::new("opt-a", "option").text("Ottawa").selected())
                    .child(FakeElement::new("opt-b", "option").text("Toronto")),
            ),
        );
        browser.navigate("https://site.test/form").await.unwrap();
        let options = browser.find_elements(&Selector::tag("option")).await.unwrap();
        browser.click(&options[1]).await.unwrap();
        assert!(!browser.is_selected_now("opt-a"));
        assert!(browser.is_selected_now("opt-b"));
    }

    #[tokio::test]
    async fn test_intercepted_click_and_scripted_fallback() {
        let browser = FakeBrowser::new();
        browser.add_page(
            FakePage::new("https://site.test/a").element(
                FakeElement::new("go", "a")
                    .intercept_clicks(1)
                    .on_click(ClickAction::Navigate("https://site.test/b".into())),
            ),
        );
        browser.navigate("https://site.test/a").await.unwrap();
        let link = browser.find_elements(&Selector::tag("a")).await.unwrap();
        assert!(matches!(
            browser.click(&link[0]).await,
            Err(DriverError::ClickIntercepted(_))
        ));
        browser.scripted_click(&link[0]).await.unwrap();
        assert_eq!(browser.current_url_now(), "https://site.test/b");
    }

    #[tokio::test]
    async fn test_frames_scope_searches() {
        let browser = FakeBrowser::new();
        browser.add_page(
            FakePage::new("https://site.test/f").element(
                FakeElement::new("frame", "iframe")
                    .frame([FakeElement::new("inner", "input").attr("id", "user_email")]),
            ),
        );
        browser.navigate("https://site.test/f").await.unwrap();
        assert!(browser.find_elements(&Selector::id("user_email")).await.unwrap().is_empty());

        let frames = browser.find_elements(&Selector::tag("iframe")).await.unwrap();
        browser.switch_to_frame(&frames[0]).await.unwrap();
        assert_eq!(browser.find_elements(&Selector::id("user_email")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_factory_resets_session() {
        let browser = site();
        browser.set_authenticated(true);
        browser.quit().await.unwrap();
        assert!(browser.current_url().await.is_err());

        let session = browser.create().await.unwrap();
        assert_eq!(session.current_url().await.unwrap(), "about:blank");
        assert!(!browser.is_authenticated());
        assert_eq!(browser.sessions_created(), 1);
    }
}
