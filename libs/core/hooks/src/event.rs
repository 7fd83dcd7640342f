//! The lifecycle Event and its JSON wire envelope.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The kind of lifecycle transition an [`Event`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Enqueued,
    Started,
    Succeeded,
    Failed,
    #[serde(rename = "dead-lettered")]
    DeadLettered,
    Retried,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Enqueued => "enqueued",
            EventKind::Started => "started",
            EventKind::Succeeded => "succeeded",
            EventKind::Failed => "failed",
            EventKind::DeadLettered => "dead-lettered",
            EventKind::Retried => "retried",
        }
    }
}

/// A single lifecycle transition, appended to the durable fan-out log on
/// every worker-runtime state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub kind: EventKind,
    pub job_id: String,
    pub timestamp: i64,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl Event {
    pub fn new(kind: EventKind, job_id: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            kind,
            job_id: job_id.into(),
            timestamp: Utc::now().timestamp_millis(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let event = Event::new(EventKind::Succeeded, "j1").with_attribute("priority", "high");
        let raw = event.to_json().unwrap();
        let back = Event::from_json(&raw).unwrap();
        assert_eq!(back.job_id, "j1");
        assert_eq!(back.kind, EventKind::Succeeded);
        assert_eq!(back.attributes.get("priority").unwrap(), "high");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let event = Event::new(EventKind::DeadLettered, "j2");
        let raw = event.to_json().unwrap();
        assert!(raw.contains("\"dead-lettered\""));
    }
}
