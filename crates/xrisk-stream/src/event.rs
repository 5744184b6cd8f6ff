//! Workflow event payloads and raw frame classification.
//!
//! The backend sends JSON objects over the stream. Most are workflow
//! events, which are forwarded to subscribers exactly as decoded. A few are
//! control messages (`connected`, `stream_closed`) and heartbeats, which the
//! connector consumes itself.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::status::WorkflowStatus;

// ── WorkflowEvent ────────────────────────────────────────────────────

/// A decoded workflow event.
///
/// Wraps the full JSON object so nothing the backend sends is dropped or
/// rewritten. Accessors only read from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowEvent {
    raw: Map<String, Value>,
}

impl WorkflowEvent {
    pub fn from_map(raw: Map<String, Value>) -> Self {
        Self { raw }
    }

    /// The full payload.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.raw
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.raw)
    }

    /// Look up a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    pub fn task_id(&self) -> Option<&str> {
        self.raw.get("task_id").and_then(Value::as_str)
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.raw
            .get("meta")
            .and_then(|meta| meta.get(key))
            .and_then(non_empty_str)
    }

    /// Status from `meta.status`, falling back to the top-level `status`.
    pub fn declared_status(&self) -> Option<&str> {
        self.meta_str("status")
            .or_else(|| self.raw.get("status").and_then(non_empty_str))
    }

    /// Status from `meta.status`, then `status`, then the legacy `state` field.
    pub fn status(&self) -> Option<&str> {
        self.declared_status()
            .or_else(|| self.raw.get("state").and_then(non_empty_str))
    }

    /// [`status`](Self::status) parsed into the known vocabulary.
    pub fn workflow_status(&self) -> Option<WorkflowStatus> {
        self.status().and_then(WorkflowStatus::parse)
    }

    pub fn step(&self) -> Option<&str> {
        self.meta_str("step")
    }

    pub fn message(&self) -> Option<&str> {
        self.meta_str("message")
            .or_else(|| self.raw.get("message").and_then(non_empty_str))
    }

    /// Progress percentage reported in `meta.progress`.
    pub fn progress(&self) -> Option<f64> {
        self.raw
            .get("meta")
            .and_then(|meta| meta.get("progress"))
            .and_then(Value::as_f64)
    }

    /// `true` only when `stream_closed` is literally `true`.
    pub fn stream_closed(&self) -> bool {
        self.raw.get("stream_closed") == Some(&Value::Bool(true))
    }

    /// Whether this event should tear the stream down without reconnecting.
    pub fn closes_stream(&self) -> bool {
        self.workflow_status().is_some_and(WorkflowStatus::closes_stream) || self.stream_closed()
    }

    /// Whether a `stream_closed` message following this event may reconnect.
    ///
    /// Looks at `meta.status` / `status` only; the legacy `state` field is
    /// ignored here.
    pub fn allows_resume(&self) -> bool {
        !self
            .declared_status()
            .and_then(WorkflowStatus::parse)
            .is_some_and(WorkflowStatus::is_finished)
    }
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}

/// JavaScript-style truthiness, which is what the backend's flags assume.
fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}

// ── Frame classification ─────────────────────────────────────────────

/// What a raw stream message turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Keep-alive with no payload.
    Heartbeat,
    /// Not a JSON object. Carries the parse failure for logging.
    Malformed(String),
    /// Server acknowledged the stream is ready.
    Connected { task_id: Option<String> },
    /// Server ended the stream gracefully.
    StreamClosed,
    /// A workflow event for subscribers.
    Event(WorkflowEvent),
}

impl Frame {
    /// Classify a raw message payload.
    pub fn classify(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == "ping" || trimmed == ": ping" {
            return Self::Heartbeat;
        }

        let map = match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Self::Malformed(format!("expected a JSON object, got {}", kind(&other)));
            }
            Err(e) => return Self::Malformed(e.to_string()),
        };

        if truthy(map.get("connected")) {
            return Self::Connected {
                task_id: map.get("task_id").and_then(Value::as_str).map(String::from),
            };
        }

        if truthy(map.get("stream_closed")) {
            return Self::StreamClosed;
        }

        Self::Event(WorkflowEvent::from_map(map))
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(value: Value) -> WorkflowEvent {
        match value {
            Value::Object(map) => WorkflowEvent::from_map(map),
            _ => panic!("test payload must be an object"),
        }
    }

    #[test]
    fn heartbeats_are_recognised_with_whitespace() {
        assert_eq!(Frame::classify("ping"), Frame::Heartbeat);
        assert_eq!(Frame::classify(": ping"), Frame::Heartbeat);
        assert_eq!(Frame::classify("  ping  \n"), Frame::Heartbeat);
    }

    #[test]
    fn malformed_payloads_are_flagged() {
        assert!(matches!(Frame::classify("not json"), Frame::Malformed(_)));
        assert!(matches!(Frame::classify("{\"open\": "), Frame::Malformed(_)));
        assert!(matches!(Frame::classify("42"), Frame::Malformed(_)));
        assert!(matches!(Frame::classify("[1, 2]"), Frame::Malformed(_)));
    }

    #[test]
    fn connected_acknowledgement_is_control() {
        let frame = Frame::classify(r#"{"connected": true, "task_id": "task-1"}"#);
        assert_eq!(
            frame,
            Frame::Connected {
                task_id: Some("task-1".into())
            }
        );
    }

    #[test]
    fn falsy_connected_flag_is_an_ordinary_event() {
        let frame = Frame::classify(r#"{"connected": false, "status": "pending"}"#);
        assert!(matches!(frame, Frame::Event(_)));
    }

    #[test]
    fn stream_closed_is_control_when_truthy() {
        assert_eq!(Frame::classify(r#"{"stream_closed": true}"#), Frame::StreamClosed);
        assert_eq!(Frame::classify(r#"{"stream_closed": 1}"#), Frame::StreamClosed);
        assert!(matches!(
            Frame::classify(r#"{"stream_closed": 0, "status": "pending"}"#),
            Frame::Event(_)
        ));
    }

    #[test]
    fn events_keep_every_field() {
        let raw = r#"{"meta":{"status":"processing","progress":40},"value":1,"task_id":"t"}"#;
        let Frame::Event(evt) = Frame::classify(raw) else {
            panic!("expected an event");
        };
        assert_eq!(evt.get("value"), Some(&json!(1)));
        assert_eq!(evt.task_id(), Some("t"));
        assert_eq!(evt.progress(), Some(40.0));
        assert_eq!(
            evt.into_value(),
            json!({"meta":{"status":"processing","progress":40},"value":1,"task_id":"t"})
        );
    }

    #[test]
    fn status_prefers_meta_then_status_then_state() {
        let evt = event(json!({"meta": {"status": "classified"}, "status": "x", "state": "y"}));
        assert_eq!(evt.status(), Some("classified"));

        let evt = event(json!({"status": "researched", "state": "y"}));
        assert_eq!(evt.status(), Some("researched"));

        let evt = event(json!({"state": "completed"}));
        assert_eq!(evt.status(), Some("completed"));
        assert_eq!(evt.declared_status(), None);

        let evt = event(json!({"meta": {"status": ""}, "status": "analyzed"}));
        assert_eq!(evt.status(), Some("analyzed"));

        let evt = event(json!({"value": 1}));
        assert_eq!(evt.status(), None);
    }

    #[test]
    fn closing_predicate() {
        for status in [
            "completed",
            "failed",
            "inquiry_awaiting_response",
            "inquiry_required",
            "login_required",
        ] {
            assert!(event(json!({ "status": status })).closes_stream(), "{status}");
        }
        assert!(event(json!({"state": "failed"})).closes_stream());
        assert!(event(json!({"stream_closed": true})).closes_stream());
        assert!(!event(json!({"meta": {"status": "processing"}})).closes_stream());
        assert!(!event(json!({"status": "error"})).closes_stream());
    }

    #[test]
    fn resume_ignores_legacy_state() {
        assert!(!event(json!({"meta": {"status": "completed"}})).allows_resume());
        assert!(!event(json!({"status": "failed"})).allows_resume());
        assert!(event(json!({"status": "login_required"})).allows_resume());
        assert!(event(json!({"state": "completed"})).allows_resume());
        assert!(event(json!({})).allows_resume());
    }

    #[test]
    fn message_falls_back_to_top_level() {
        let evt = event(json!({"meta": {"message": "Analysing"}, "message": "x"}));
        assert_eq!(evt.message(), Some("Analysing"));
        let evt = event(json!({"error": true, "message": "boom"}));
        assert_eq!(evt.message(), Some("boom"));
    }
}
