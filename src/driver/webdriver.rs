//! W3C WebDriver client
//!
//! Talks to a chromedriver (or Selenium) endpoint over plain HTTP. Only the
//! commands the checker needs are implemented.

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{BrowserDriver, DriverError, DriverFactory, DriverResult, ElementRef};
use crate::selectors::{Selector, Strategy};

/// W3C element identifier key
const ELEMENT_KEY: &str = "element-6066-11e4-a832-4f27d5c3e1a0";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Browser session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// WebDriver server endpoint, e.g. `http://localhost:9515`
    pub webdriver_url: String,
    pub headless: bool,
    pub user_agent: String,
    /// Skip images and background work to keep the session light
    pub minimal: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Page load timeout sent to the browser
    pub page_load_timeout: Duration,
    /// HTTP timeout for a single driver command
    pub command_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            minimal: true,
            window_width: 1920,
            window_height: 1080,
            page_load_timeout: Duration::from_secs(60),
            command_timeout: Duration::from_secs(90),
        }
    }
}

impl DriverConfig {
    /// Set headless mode
    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set the WebDriver endpoint
    #[must_use]
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.webdriver_url = url.into();
        self
    }

    /// Chrome command-line flags for a hardened, quiet session
    pub fn chrome_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.headless {
            args.push("--headless=new".to_string());
        }
        args.extend(
            [
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--disable-gpu",
                "--disable-extensions",
                "--disable-blink-features=AutomationControlled",
                "--log-level=3",
            ]
            .map(String::from),
        );
        args.push(format!(
            "--window-size={},{}",
            self.window_width, self.window_height
        ));
        if self.minimal {
            args.extend(
                [
                    "--disable-images",
                    "--disable-plugins",
                    "--no-proxy-server",
                    "--disable-background-timer-throttling",
                    "--disable-renderer-backgrounding",
                    "--disable-backgrounding-occluded-windows",
                ]
                .map(String::from),
            );
        }
        args.push("--memory-pressure-off".to_string());
        args.push(format!("--user-agent={}", self.user_agent));
        args
    }

    /// New-session capabilities payload
    pub fn capabilities(&self) -> Value {
        let images = if self.minimal { 2 } else { 0 };
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "pageLoadStrategy": "normal",
                    "timeouts": {
                        "pageLoad": self.page_load_timeout.as_millis() as u64,
                        "implicit": 0
                    },
                    "goog:chromeOptions": {
                        "args": self.chrome_args(),
                        "excludeSwitches": ["enable-automation"],
                        "useAutomationExtension": false,
                        "prefs": {
                            "profile.default_content_setting_values": {
                                "images": images,
                                "plugins": 2,
                                "popups": 2,
                                "geolocation": 2,
                                "notifications": 2,
                                "media_stream": 2
                            }
                        }
                    }
                }
            }
        })
    }
}

/// Map a selector onto a W3C locator strategy
fn locator(selector: &Selector) -> Value {
    fn attr(name: &str, value: &str) -> String {
        format!("[{name}=\"{}\"]", value.replace('\\', "\\\\").replace('"', "\\\""))
    }

    let (using, value) = match selector.by {
        Strategy::Id => ("css selector", attr("id", &selector.target)),
        Strategy::Name => ("css selector", attr("name", &selector.target)),
        Strategy::ClassName => ("css selector", format!(".{}", selector.target)),
        Strategy::CssSelector => ("css selector", selector.target.clone()),
        Strategy::Xpath => ("xpath", selector.target.clone()),
        Strategy::TagName => ("tag name", selector.target.clone()),
        Strategy::LinkText => ("link text", selector.target.clone()),
        Strategy::PartialLinkText => ("partial link text", selector.target.clone()),
    };
    json!({ "using": using, "value": value })
}

fn element_json(element: &ElementRef) -> Value {
    json!({ ELEMENT_KEY: element.id() })
}

fn parse_element(value: &Value) -> Option<ElementRef> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(ElementRef::new)
}

/// Translate a W3C error code into a driver error
fn protocol_error(error: &str, message: &str) -> DriverError {
    match error {
        "stale element reference" => DriverError::StaleElement,
        "no such element" => DriverError::NoSuchElement(message.to_string()),
        "element not interactable" | "invalid element state" => {
            DriverError::NotInteractable(message.to_string())
        }
        "element click intercepted" => DriverError::ClickIntercepted(message.to_string()),
        "no such frame" => DriverError::NoSuchFrame,
        "timeout" | "script timeout" => DriverError::Timeout(message.to_string()),
        "invalid session id" | "no such window" | "session not created" => {
            DriverError::SessionLost(message.to_string())
        }
        _ => DriverError::Protocol {
            error: error.to_string(),
            message: message.to_string(),
        },
    }
}

/// A live W3C WebDriver session
pub struct WebDriverClient {
    client: Client,
    base_url: String,
    session_id: String,
}

impl WebDriverClient {
    /// Start a new browser session
    pub async fn connect(config: &DriverConfig) -> DriverResult<Self> {
        let client = Client::builder().timeout(config.command_timeout).build()?;
        let base_url = config.webdriver_url.trim_end_matches('/').to_string();

        let response = client
            .post(format!("{base_url}/session"))
            .json(&config.capabilities())
            .send()
            .await?;
        let body: Value = response.json().await?;
        let value = unwrap_value(body)?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::SessionLost("new session response had no sessionId".into()))?
            .to_string();

        tracing::info!(
            session_id = %session_id,
            headless = config.headless,
            endpoint = %base_url,
            "WebDriver session created"
        );

        Ok(Self {
            client,
            base_url,
            session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> DriverResult<Value> {
        let url = format!("{}/session/{}{}", self.base_url, self.session_id, path);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let body: Value = response.json().await?;
        unwrap_value(body)
    }

    async fn get(&self, path: &str) -> DriverResult<Value> {
        self.command(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> DriverResult<Value> {
        self.command(Method::POST, path, Some(body)).await
    }

    async fn element_get(&self, element: &ElementRef, suffix: &str) -> DriverResult<Value> {
        self.get(&format!("/element/{}/{suffix}", element.id())).await
    }

    fn elements_from(value: Value) -> Vec<ElementRef> {
        value
            .as_array()
            .map(|items| items.iter().filter_map(parse_element).collect())
            .unwrap_or_default()
    }
}

/// Extract `value` from a response, mapping protocol errors
fn unwrap_value(body: Value) -> DriverResult<Value> {
    let value = body.get("value").cloned().unwrap_or(Value::Null);
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(protocol_error(error, message));
    }
    Ok(value)
}

fn as_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl BrowserDriver for WebDriverClient {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        match self.post("/url", json!({ "url": url })).await {
            Ok(_) => Ok(()),
            Err(DriverError::Timeout(message)) => Err(DriverError::Navigation {
                url: url.to_string(),
                message: format!("page load timed out: {message}"),
            }),
            Err(e) => Err(e),
        }
    }

    async fn current_url(&self) -> DriverResult<String> {
        self.get("/url").await.map(as_string)
    }

    async fn page_source(&self) -> DriverResult<String> {
        self.get("/source").await.map(as_string)
    }

    async fn find_elements(&self, selector: &Selector) -> DriverResult<Vec<ElementRef>> {
        let value = self.post("/elements", locator(selector)).await?;
        Ok(Self::elements_from(value))
    }

    async fn find_child_elements(
        &self,
        parent: &ElementRef,
        selector: &Selector,
    ) -> DriverResult<Vec<ElementRef>> {
        let path = format!("/element/{}/elements", parent.id());
        let value = self.post(&path, locator(selector)).await?;
        Ok(Self::elements_from(value))
    }

    async fn switch_to_frame(&self, frame: &ElementRef) -> DriverResult<()> {
        self.post("/frame", json!({ "id": element_json(frame) }))
            .await
            .map(|_| ())
    }

    async fn switch_to_default(&self) -> DriverResult<()> {
        self.post("/frame", json!({ "id": Value::Null }))
            .await
            .map(|_| ())
    }

    async fn is_displayed(&self, element: &ElementRef) -> DriverResult<bool> {
        let value = self.element_get(element, "displayed").await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn is_enabled(&self, element: &ElementRef) -> DriverResult<bool> {
        let value = self.element_get(element, "enabled").await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn is_selected(&self, element: &ElementRef) -> DriverResult<bool> {
        let value = self.element_get(element, "selected").await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn text(&self, element: &ElementRef) -> DriverResult<String> {
        self.element_get(element, "text").await.map(as_string)
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> DriverResult<Option<String>> {
        let value = self
            .element_get(element, &format!("attribute/{name}"))
            .await?;
        Ok(match value {
            Value::Null => None,
            other => Some(as_string(other)),
        })
    }

    async fn tag_name(&self, element: &ElementRef) -> DriverResult<String> {
        self.element_get(element, "name")
            .await
            .map(|v| as_string(v).to_lowercase())
    }

    async fn css_value(&self, element: &ElementRef, property: &str) -> DriverResult<String> {
        self.element_get(element, &format!("css/{property}"))
            .await
            .map(as_string)
    }

    async fn click(&self, element: &ElementRef) -> DriverResult<()> {
        self.post(&format!("/element/{}/click", element.id()), json!({}))
            .await
            .map(|_| ())
    }

    async fn clear(&self, element: &ElementRef) -> DriverResult<()> {
        self.post(&format!("/element/{}/clear", element.id()), json!({}))
            .await
            .map(|_| ())
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> DriverResult<()> {
        self.post(
            &format!("/element/{}/value", element.id()),
            json!({ "text": text }),
        )
        .await
        .map(|_| ())
    }

    async fn execute_script(
        &self,
        script: &str,
        args: &[ElementRef],
    ) -> DriverResult<Value> {
        let args: Vec<Value> = args.iter().map(element_json).collect();
        self.post("/execute/sync", json!({ "script": script, "args": args }))
            .await
    }

    async fn screenshot_png(&self) -> DriverResult<Vec<u8>> {
        let encoded = as_string(self.get("/screenshot").await?);
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| DriverError::Protocol {
                error: "invalid screenshot".to_string(),
                message: e.to_string(),
            })
    }

    async fn quit(&self) -> DriverResult<()> {
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        let response = self.client.delete(&url).send().await?;
        let body: Value = response.json().await.unwrap_or(Value::Null);
        unwrap_value(body).map(|_| ())
    }
}

/// Creates sessions against a WebDriver endpoint
pub struct WebDriverFactory {
    config: DriverConfig,
}

impl WebDriverFactory {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DriverFactory for WebDriverFactory {
    async fn create(&self) -> DriverResult<Arc<dyn BrowserDriver>> {
        let client = WebDriverClient::connect(&self.config).await?;
        Ok(Arc::new(client))
    }
}
