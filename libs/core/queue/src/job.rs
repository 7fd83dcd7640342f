//! The Job entity and the handler outcome contract.

use serde::{Deserialize, Serialize};

/// A unit of work. Opaque to the dispatcher beyond these fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    /// Opaque payload, base64-encoded over the wire by serde_json's default
    /// `Vec<u8>` handling.
    pub payload: Vec<u8>,
    pub priority: String,
    pub created_at: i64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    /// Reason attached by the most recent non-success outcome, carried
    /// forward onto retry re-enqueue and dead-letter so it is observable
    /// via `peek`.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(id: impl Into<String>, priority: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            payload,
            priority: priority.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
            retry_count: 0,
            trace_id: None,
            span_id: None,
            last_error: None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// The result of handler execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Retryable(String),
    Terminal(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let job = Job::new("j1", "high", b"hello".to_vec());
        let raw = job.to_json().unwrap();
        let back = Job::from_json(&raw).unwrap();
        assert_eq!(job, back);
    }

    #[test]
    fn missing_optional_fields_default() {
        let raw = r#"{"id":"j1","payload":[1,2,3],"priority":"high","created_at":0}"#;
        let job = Job::from_json(raw).unwrap();
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.trace_id, None);
    }
}
