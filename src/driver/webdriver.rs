//! W3C WebDriver client
//!
//! Talks the WebDriver JSON wire protocol to a chromedriver (or any
//! compatible remote end) over `reqwest`. One browser session is opened per
//! UI case and deleted when the case finishes.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{DriverError, ElementRef, UiDriver, UiSession};
use crate::models::{Locator, LocatorStrategy, UiAction, UiStep};

/// Key under which W3C remote ends return element references
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const ENTER_KEY: &str = "\u{E007}";

const SUBMIT_SCRIPT: &str = "var e = arguments[0]; var f = e.form || e; \
     if (f.requestSubmit) { f.requestSubmit(); } else { f.submit(); }";

/// Settings for a [`WebDriverClient`]
#[derive(Clone, Debug)]
pub struct WebDriverSettings {
    pub base_url: String,
    pub headless: bool,
    pub browser_args: Vec<String>,
    pub element_timeout: Duration,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for WebDriverSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9515".to_string(),
            headless: true,
            browser_args: vec![
                "--no-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
            ],
            element_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(250),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// [`UiDriver`] backed by a WebDriver remote end
#[derive(Clone)]
pub struct WebDriverClient {
    client: Client,
    settings: WebDriverSettings,
}

impl WebDriverClient {
    pub fn new(settings: WebDriverSettings) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to create WebDriver HTTP client")?;

        Ok(Self { client, settings })
    }

    fn capabilities(&self) -> Value {
        let mut args = self.settings.browser_args.clone();
        if self.settings.headless {
            args.insert(0, "--headless=new".to_string());
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }
}

#[async_trait]
impl UiDriver for WebDriverClient {
    async fn open_session(&self) -> Result<Box<dyn UiSession>, DriverError> {
        let url = format!("{}/session", self.settings.base_url.trim_end_matches('/'));
        let value = call(&self.client, Method::POST, &url, Some(self.capabilities()))
            .await
            .map_err(|e| DriverError::Session(e.to_string()))?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Session("response carried no sessionId".to_string()))?
            .to_string();

        debug!("Opened WebDriver session {}", session_id);

        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            session_url: format!(
                "{}/session/{}",
                self.settings.base_url.trim_end_matches('/'),
                session_id
            ),
            element_timeout: self.settings.element_timeout,
            poll_interval: self.settings.poll_interval,
        }))
    }
}

struct WebDriverSession {
    client: Client,
    session_url: String,
    element_timeout: Duration,
    poll_interval: Duration,
}

impl WebDriverSession {
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, DriverError> {
        let url = format!("{}{}", self.session_url, path);
        call(&self.client, method, &url, body).await
    }

    fn element_path(element: &ElementRef, action: &str) -> String {
        format!("/element/{}/{}", element.0, action)
    }

    /// Run a single-pointer action sequence against an element
    async fn pointer(&self, element: &ElementRef, actions: Vec<Value>) -> Result<(), DriverError> {
        let mut sequence = vec![json!({
            "type": "pointerMove",
            "duration": 0,
            "origin": { ELEMENT_KEY: element.0 },
            "x": 0,
            "y": 0
        })];
        sequence.extend(actions);

        let body = json!({
            "actions": [{
                "type": "pointer",
                "id": "mouse",
                "parameters": { "pointerType": "mouse" },
                "actions": sequence
            }]
        });
        self.command(Method::POST, "/actions", Some(body)).await?;
        self.command(Method::DELETE, "/actions", None).await?;
        Ok(())
    }

    async fn clear(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.command(Method::POST, &Self::element_path(element, "clear"), Some(json!({})))
            .await?;
        Ok(())
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), DriverError> {
        self.command(
            Method::POST,
            &Self::element_path(element, "value"),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }
}

fn press(button: u8) -> [Value; 2] {
    [
        json!({ "type": "pointerDown", "button": button }),
        json!({ "type": "pointerUp", "button": button }),
    ]
}

/// Map a locator onto a W3C location strategy
fn location(locator: &Locator) -> (&'static str, String) {
    let quoted = locator.value.replace('\\', "\\\\").replace('"', "\\\"");
    match locator.strategy {
        LocatorStrategy::Id => ("css selector", format!("[id=\"{quoted}\"]")),
        LocatorStrategy::Name => ("css selector", format!("[name=\"{quoted}\"]")),
        LocatorStrategy::ClassName => ("css selector", format!(".{}", locator.value)),
        LocatorStrategy::Css => ("css selector", locator.value.clone()),
        LocatorStrategy::TagName => ("tag name", locator.value.clone()),
        LocatorStrategy::XPath => ("xpath", locator.value.clone()),
    }
}

#[async_trait]
impl UiSession for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        debug!("Navigating to: {}", url);
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn find_element(&self, locator: &Locator) -> Result<ElementRef, DriverError> {
        let (using, value) = location(locator);
        let body = json!({ "using": using, "value": value });
        let start = Instant::now();

        loop {
            match self.command(Method::POST, "/element", Some(body.clone())).await {
                Ok(found) => {
                    return found
                        .get(ELEMENT_KEY)
                        .and_then(Value::as_str)
                        .map(|id| ElementRef(id.to_string()))
                        .ok_or_else(|| {
                            DriverError::Protocol(format!("element reference missing in {found}"))
                        });
                }
                Err(DriverError::Protocol(message)) if message.starts_with("no such element") => {
                    if start.elapsed() >= self.element_timeout {
                        return Err(DriverError::ElementNotFound {
                            locator: locator.to_string(),
                            waited_ms: start.elapsed().as_millis() as u64,
                        });
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn perform(&self, element: &ElementRef, step: &UiStep) -> Result<(), DriverError> {
        let result = match step.action {
            UiAction::Click => self
                .command(Method::POST, &Self::element_path(element, "click"), Some(json!({})))
                .await
                .map(|_| ()),
            UiAction::DoubleClick => {
                let [down, up] = press(0);
                let [down2, up2] = press(0);
                self.pointer(element, vec![down, up, down2, up2]).await
            }
            UiAction::RightClick => self.pointer(element, press(2).to_vec()).await,
            UiAction::Hover => self.pointer(element, Vec::new()).await,
            UiAction::Type => {
                self.clear(element).await?;
                self.send_keys(element, &step.value).await
            }
            UiAction::Clear => self.clear(element).await,
            UiAction::Submit => {
                let args = json!({ "script": SUBMIT_SCRIPT, "args": [{ ELEMENT_KEY: element.0 }] });
                match self.command(Method::POST, "/execute/sync", Some(args)).await {
                    Ok(_) => Ok(()),
                    // fall back to pressing Enter inside the element
                    Err(_) => self.send_keys(element, ENTER_KEY).await,
                }
            }
        };

        result.map_err(|e| DriverError::Action {
            action: format!("{:?}", step.action),
            message: e.to_string(),
        })?;
        debug!("Performed action: {:?}", step.action);
        Ok(())
    }

    async fn title(&self) -> Result<String, DriverError> {
        let value = self.command(Method::GET, "/title", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        let value = self.command(Method::GET, "/source", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        if let Err(e) = self.command(Method::DELETE, "", None).await {
            warn!("Failed to close WebDriver session: {}", e);
            return Err(e);
        }
        debug!("Closed WebDriver session {}", self.session_url);
        Ok(())
    }
}

/// Send one WebDriver command and unwrap its `value`
async fn call(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, DriverError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_connect() {
            DriverError::ConnectionRefused(url.to_string())
        } else {
            DriverError::RequestFailed(e.to_string())
        }
    })?;

    let status = response.status();
    let payload: Value = response
        .json()
        .await
        .map_err(|e| DriverError::Protocol(format!("invalid JSON from {url}: {e}")))?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }

    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let message = value.get("message").and_then(Value::as_str).unwrap_or("");
    Err(DriverError::Protocol(format!("{error}: {message}")))
}
