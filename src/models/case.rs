//! Test case models
//!
//! A test case is built once from a flat [`CaseDescriptor`] (the shape suite
//! definition files use) into a [`TestCase`] whose kind-specific fields are
//! carried by the closed [`CaseKind`] variant.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::SuiteId;

/// Errors raised while building a test case from its descriptor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaseError {
    #[error("Test case id is empty")]
    EmptyId,

    #[error("Unknown test type '{0}' (expected UI or API)")]
    UnknownTestType(String),

    #[error("Test case {0} has no target URL")]
    MissingUrl(String),

    #[error("Test case {0} needs a locator type and value")]
    MissingLocator(String),

    #[error("Unsupported locator type: {0}")]
    UnsupportedLocator(String),

    #[error("Unsupported UI action: {0}")]
    UnsupportedAction(String),

    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    #[error("Test case {0} has no UI action")]
    MissingAction(String),
}

/// Test kind, used to pick a worker pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestKind {
    Ui,
    Api,
}

impl TestKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ui" => Some(TestKind::Ui),
            "api" => Some(TestKind::Api),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TestKind::Ui => "UI",
            TestKind::Api => "API",
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Element locator strategies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocatorStrategy {
    Id,
    Name,
    XPath,
    Css,
    ClassName,
    TagName,
}

impl LocatorStrategy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "id" => Some(LocatorStrategy::Id),
            "name" => Some(LocatorStrategy::Name),
            "xpath" => Some(LocatorStrategy::XPath),
            "css" | "cssselector" => Some(LocatorStrategy::Css),
            "classname" => Some(LocatorStrategy::ClassName),
            "tagname" => Some(LocatorStrategy::TagName),
            _ => None,
        }
    }
}

/// How to find the element a UI case acts on
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub strategy: LocatorStrategy,
    pub value: String,
}

impl Locator {
    pub fn new(strategy: LocatorStrategy, value: impl Into<String>) -> Self {
        Self {
            strategy,
            value: value.into(),
        }
    }

    pub fn id(value: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::Id, value)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}={}", self.strategy, self.value)
    }
}

/// Interactions a UI step can perform on an element
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiAction {
    Click,
    DoubleClick,
    RightClick,
    Type,
    Clear,
    Submit,
    Hover,
}

impl UiAction {
    /// Parse an action name; `double-click`, `double_click` and `doubleclick` are equivalent
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| *c != '_' && *c != '-' && *c != ' ')
            .collect();

        match normalized.as_str() {
            "click" => Some(UiAction::Click),
            "doubleclick" => Some(UiAction::DoubleClick),
            "rightclick" => Some(UiAction::RightClick),
            "type" => Some(UiAction::Type),
            "clear" => Some(UiAction::Clear),
            "submit" => Some(UiAction::Submit),
            "hover" => Some(UiAction::Hover),
            _ => None,
        }
    }
}

/// One UI interaction; `value` is the text typed by [`UiAction::Type`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiStep {
    pub action: UiAction,
    #[serde(default)]
    pub value: String,
}

impl UiStep {
    pub fn new(action: UiAction, value: impl Into<String>) -> Self {
        Self {
            action,
            value: value.into(),
        }
    }
}

/// HTTP methods an API case may use
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Whether requests with this method carry a JSON body
    pub fn has_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind-specific part of a test case
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CaseKind {
    Ui { locator: Locator, steps: Vec<UiStep> },
    Api { method: HttpMethod, body: Option<String> },
}

impl CaseKind {
    pub fn test_kind(&self) -> TestKind {
        match self {
            CaseKind::Ui { .. } => TestKind::Ui,
            CaseKind::Api { .. } => TestKind::Api,
        }
    }
}

/// Expected-result descriptor, parsed once from its text form
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "match", content = "value", rename_all = "snake_case")]
pub enum Expectation {
    /// No descriptor: success means no error (and status < 400 for API cases)
    #[default]
    Succeeds,
    /// Leading three digits, compared with the response status
    Status(u16),
    /// Text that must appear in the response body or page source
    Contains(String),
}

impl Expectation {
    pub fn parse(descriptor: &str) -> Self {
        let descriptor = descriptor.trim();
        if descriptor.is_empty() {
            return Expectation::Succeeds;
        }

        // any descriptor opening with three digits is a status check ("200", "201 Created", "404NotFound")
        let prefix = descriptor.get(..3).unwrap_or_default();
        if prefix.len() == 3 && prefix.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(code) = prefix.parse() {
                return Expectation::Status(code);
            }
        }

        Expectation::Contains(descriptor.to_string())
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Succeeds => write!(f, "(success)"),
            Expectation::Status(code) => write!(f, "status {code}"),
            Expectation::Contains(text) => write!(f, "contains '{text}'"),
        }
    }
}

/// Case priority
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Medium,
        }
    }
}

/// A test case owned by a suite
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub name: String,
    pub url: String,
    pub kind: CaseKind,
    #[serde(default)]
    pub expected: Expectation,
    #[serde(default)]
    pub priority: Priority,
    /// Only enabled cases are executed
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    pub suite_id: Option<SuiteId>,
}

impl TestCase {
    pub fn test_kind(&self) -> TestKind {
        self.kind.test_kind()
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.id, self.test_kind(), self.name)
    }
}

/// A single step of a descriptor's action list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescriptor {
    #[serde(rename = "type")]
    pub action: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Flat, loosely typed form of a test case as written in suite definitions
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseDescriptor {
    pub id: String,
    pub name: String,
    pub test_type: String,
    #[serde(default)]
    pub url: String,
    /// HTTP method for API cases, action name for UI cases
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub locator_type: String,
    #[serde(default)]
    pub locator_value: String,
    #[serde(default)]
    pub input_data: String,
    #[serde(default)]
    pub expected_result: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default = "default_run")]
    pub run: bool,
    #[serde(default)]
    pub description: String,
    /// Multi-step UI action list; replaces `action` when non-empty
    #[serde(default)]
    pub actions: Vec<StepDescriptor>,
}

fn default_run() -> bool {
    true
}

impl TryFrom<CaseDescriptor> for TestCase {
    type Error = CaseError;

    fn try_from(desc: CaseDescriptor) -> Result<Self, Self::Error> {
        let id = desc.id.trim().to_string();
        if id.is_empty() {
            return Err(CaseError::EmptyId);
        }

        let test_kind = TestKind::from_str(&desc.test_type)
            .ok_or_else(|| CaseError::UnknownTestType(desc.test_type.clone()))?;

        let url = desc.url.trim().to_string();
        if url.is_empty() {
            return Err(CaseError::MissingUrl(id));
        }

        let kind = match test_kind {
            TestKind::Ui => {
                if desc.locator_type.trim().is_empty() || desc.locator_value.trim().is_empty() {
                    return Err(CaseError::MissingLocator(id));
                }
                let strategy = LocatorStrategy::from_str(&desc.locator_type)
                    .ok_or_else(|| CaseError::UnsupportedLocator(desc.locator_type.clone()))?;
                let locator = Locator::new(strategy, desc.locator_value.trim());

                let steps = if desc.actions.is_empty() {
                    if desc.action.trim().is_empty() {
                        return Err(CaseError::MissingAction(id));
                    }
                    let action = UiAction::from_str(&desc.action)
                        .ok_or_else(|| CaseError::UnsupportedAction(desc.action.clone()))?;
                    vec![UiStep::new(action, desc.input_data.clone())]
                } else {
                    desc.actions
                        .iter()
                        .map(|step| {
                            UiAction::from_str(&step.action)
                                .map(|action| {
                                    UiStep::new(action, step.value.clone().unwrap_or_default())
                                })
                                .ok_or_else(|| CaseError::UnsupportedAction(step.action.clone()))
                        })
                        .collect::<Result<Vec<_>, _>>()?
                };

                CaseKind::Ui { locator, steps }
            }
            TestKind::Api => {
                let method = HttpMethod::from_str(&desc.action)
                    .ok_or_else(|| CaseError::UnsupportedMethod(desc.action.clone()))?;
                let body = if method.has_body() {
                    let input = desc.input_data.trim();
                    Some(if input.is_empty() { "{}" } else { input }.to_string())
                } else {
                    None
                };
                CaseKind::Api { method, body }
            }
        };

        Ok(TestCase {
            id,
            name: desc.name,
            url,
            kind,
            expected: Expectation::parse(&desc.expected_result),
            priority: Priority::from_str(&desc.priority),
            enabled: desc.run,
            description: desc.description,
            suite_id: None,
        })
    }
}
