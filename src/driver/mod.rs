//! Browser and HTTP driver capabilities
//!
//! The case runner only talks to [`UiDriver`] and [`ApiDriver`]. The bundled
//! implementations are a W3C WebDriver client and a `reqwest` HTTP client.

mod http;
mod webdriver;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::models::{HttpMethod, Locator, UiStep};

pub use http::HttpApiDriver;
pub use webdriver::{WebDriverClient, WebDriverSettings};

/// Driver errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Failed to open browser session: {0}")]
    Session(String),

    #[error("Element {locator} not found after {waited_ms}ms")]
    ElementNotFound { locator: String, waited_ms: u64 },

    #[error("Action {action} failed: {message}")]
    Action { action: String, message: String },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Connection refused to {0}")]
    ConnectionRefused(String),

    #[error("Unexpected driver response: {0}")]
    Protocol(String),
}

/// Opaque handle to an element inside a browser session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementRef(pub String);

/// Starts browser sessions
#[async_trait]
pub trait UiDriver: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn UiSession>, DriverError>;
}

/// One live browser session; closed explicitly after each case
#[async_trait]
pub trait UiSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Wait for an element to be present and return it
    async fn find_element(&self, locator: &Locator) -> Result<ElementRef, DriverError>;

    async fn perform(&self, element: &ElementRef, step: &UiStep) -> Result<(), DriverError>;

    async fn title(&self) -> Result<String, DriverError>;

    async fn page_source(&self) -> Result<String, DriverError>;

    async fn close(self: Box<Self>) -> Result<(), DriverError>;
}

/// Sends one HTTP request
#[async_trait]
pub trait ApiDriver: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, DriverError>;
}

/// HTTP request builder
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// JSON body with the matching content type
    pub fn json_body(self, body: impl Into<String>) -> Self {
        self.header("Content-Type", "application/json").body(body)
    }
}

/// HTTP response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub duration_ms: u64,
}

impl ApiResponse {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            headers: HashMap::new(),
            body: body.into(),
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }

    pub fn body_contains(&self, text: &str) -> bool {
        self.body.contains(text)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted drivers for engine and dispatcher tests

    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// API driver answering from a per-URL script; unscripted URLs get 200
    #[derive(Default)]
    pub struct FakeApiDriver {
        scripts: Mutex<HashMap<String, VecDeque<Result<ApiResponse, DriverError>>>>,
        pub calls: AtomicUsize,
        pub delay: Option<Duration>,
        pub panic_on: Option<String>,
    }

    impl FakeApiDriver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn panicking_on(mut self, url: impl Into<String>) -> Self {
            self.panic_on = Some(url.into());
            self
        }

        pub fn script(&self, url: &str, outcome: Result<ApiResponse, DriverError>) {
            self.scripts
                .lock()
                .entry(url.to_string())
                .or_default()
                .push_back(outcome);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ApiDriver for FakeApiDriver {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, DriverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.panic_on.as_deref() == Some(request.url.as_str()) {
                panic!("driver crashed on {}", request.url);
            }
            let scripted = self
                .scripts
                .lock()
                .get_mut(&request.url)
                .and_then(|queue| queue.pop_front());
            scripted.unwrap_or_else(|| Ok(ApiResponse::new(200, "ok")))
        }
    }

    /// UI driver whose sessions fail when the locator value is listed as missing
    #[derive(Default)]
    pub struct FakeUiDriver {
        pub missing: Mutex<Vec<String>>,
        pub page: String,
        pub sessions: Arc<AtomicUsize>,
        pub active: Arc<AtomicUsize>,
        pub peak: Arc<AtomicUsize>,
        pub step_delay: Option<Duration>,
        /// Fail every session open until this many attempts have been made
        pub failing_opens: AtomicUsize,
    }

    impl FakeUiDriver {
        pub fn new() -> Self {
            Self {
                page: "<html><title>Home</title><body>Welcome</body></html>".to_string(),
                ..Default::default()
            }
        }

        pub fn with_missing(self, value: &str) -> Self {
            self.missing.lock().push(value.to_string());
            self
        }

        pub fn with_step_delay(mut self, delay: Duration) -> Self {
            self.step_delay = Some(delay);
            self
        }

        pub fn failing_first(self, opens: usize) -> Self {
            self.failing_opens.store(opens, Ordering::SeqCst);
            self
        }

        pub fn sessions(&self) -> usize {
            self.sessions.load(Ordering::SeqCst)
        }

        pub fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UiDriver for FakeUiDriver {
        async fn open_session(&self) -> Result<Box<dyn UiSession>, DriverError> {
            let remaining = self.failing_opens.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_opens.store(remaining - 1, Ordering::SeqCst);
                return Err(DriverError::Session("browser unavailable".to_string()));
            }

            self.sessions.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            Ok(Box::new(FakeSession {
                missing: self.missing.lock().clone(),
                page: self.page.clone(),
                active: Arc::clone(&self.active),
                step_delay: self.step_delay,
            }))
        }
    }

    struct FakeSession {
        missing: Vec<String>,
        page: String,
        active: Arc<AtomicUsize>,
        step_delay: Option<Duration>,
    }

    #[async_trait]
    impl UiSession for FakeSession {
        async fn navigate(&self, _url: &str) -> Result<(), DriverError> {
            Ok(())
        }

        async fn find_element(&self, locator: &Locator) -> Result<ElementRef, DriverError> {
            if self.missing.contains(&locator.value) {
                return Err(DriverError::ElementNotFound {
                    locator: locator.to_string(),
                    waited_ms: 0,
                });
            }
            Ok(ElementRef(locator.value.clone()))
        }

        async fn perform(&self, _element: &ElementRef, _step: &UiStep) -> Result<(), DriverError> {
            if let Some(delay) = self.step_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(())
        }

        async fn title(&self) -> Result<String, DriverError> {
            Ok("Home".to_string())
        }

        async fn page_source(&self) -> Result<String, DriverError> {
            Ok(self.page.clone())
        }

        async fn close(self: Box<Self>) -> Result<(), DriverError> {
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
