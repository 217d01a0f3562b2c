//! Inbound request and dead-letter messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::case::{CaseError, Expectation, StepDescriptor, UiAction, UiStep};
use super::{RunId, SuiteId};

/// Execute a single run, optionally against one case
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub run_id: RunId,
    #[serde(default)]
    pub case_id: Option<String>,
}

/// Execute every enabled case of a suite
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteExecutionRequest {
    pub suite_id: SuiteId,
    pub run_id: RunId,
    /// Clamped to 1..=8 by the engine; kept wide so bad values survive decoding
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: i64,
}

fn default_parallel_threads() -> i64 {
    1
}

/// Ad-hoc UI check against an element located by id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementTestRequest {
    pub url: String,
    pub element_id: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub actions: Vec<StepDescriptor>,
    #[serde(default)]
    pub expected_result: String,
    pub run_id: RunId,
}

impl ElementTestRequest {
    /// Steps to perform; the action list wins over the single action
    pub fn steps(&self) -> Result<Vec<UiStep>, CaseError> {
        if !self.actions.is_empty() {
            return self
                .actions
                .iter()
                .map(|step| {
                    UiAction::from_str(&step.action)
                        .map(|action| UiStep::new(action, step.value.clone().unwrap_or_default()))
                        .ok_or_else(|| CaseError::UnsupportedAction(step.action.clone()))
                })
                .collect();
        }

        match self.action.as_deref().map(str::trim) {
            Some(action) if !action.is_empty() => UiAction::from_str(action)
                .map(|a| vec![UiStep::new(a, "")])
                .ok_or_else(|| CaseError::UnsupportedAction(action.to_string())),
            _ => Err(CaseError::MissingAction(self.element_id.clone())),
        }
    }

    pub fn expectation(&self) -> Expectation {
        Expectation::parse(&self.expected_result)
    }
}

/// Any message the dispatcher consumes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundRequest {
    Run(RunRequest),
    Suite(SuiteExecutionRequest),
    Element(ElementTestRequest),
}

impl InboundRequest {
    pub fn run_id(&self) -> RunId {
        match self {
            InboundRequest::Run(r) => r.run_id,
            InboundRequest::Suite(r) => r.run_id,
            InboundRequest::Element(r) => r.run_id,
        }
    }
}

/// A request that could not be processed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub payload: serde_json::Value,
    pub reason: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(payload: serde_json::Value, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            payload,
            reason: reason.into(),
            attempts,
            failed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_request_decoding() {
        let json = r#"{"kind":"suite","suite_id":3,"run_id":9,"parallel_threads":12}"#;
        let request: InboundRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            request,
            InboundRequest::Suite(SuiteExecutionRequest {
                suite_id: 3,
                run_id: 9,
                parallel_threads: 12,
            })
        );

        let json = r#"{"kind":"run","run_id":4}"#;
        let request: InboundRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.run_id(), 4);
    }

    #[test]
    fn test_element_request_steps() {
        let mut request = ElementTestRequest {
            url: "https://example.com/form".to_string(),
            element_id: "username".to_string(),
            action: Some("click".to_string()),
            actions: Vec::new(),
            expected_result: String::new(),
            run_id: 1,
        };
        assert_eq!(request.steps().unwrap(), vec![UiStep::new(UiAction::Click, "")]);

        request.actions = vec![
            StepDescriptor {
                action: "clear".to_string(),
                value: None,
            },
            StepDescriptor {
                action: "type".to_string(),
                value: Some("testuser".to_string()),
            },
        ];
        assert_eq!(request.steps().unwrap().len(), 2);

        request.actions.clear();
        request.action = None;
        assert_eq!(
            request.steps(),
            Err(CaseError::MissingAction("username".to_string()))
        );
    }
}
