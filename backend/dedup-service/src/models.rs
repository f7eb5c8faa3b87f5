/// Intake data model
use idempotent_consumer::ProcessedRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

/// One inbound unit of work, identified by `(topic, event_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub event_id: String,
    /// ISO-8601, stored as supplied
    pub timestamp: String,
    pub source: String,
    /// Opaque structured document (must be a JSON object)
    pub payload: Value,
}

impl Event {
    /// Parse and validate a single event document.
    pub fn from_value(value: Value) -> Result<Self> {
        let event: Event = serde_json::from_value(value)
            .map_err(|e| AppError::Validation(format!("invalid event: {}", e)))?;
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<()> {
        // Stricter than the wire format, which allows empty strings here.
        if self.topic.is_empty() {
            return Err(AppError::Validation("topic cannot be empty".to_string()));
        }

        if self.event_id.is_empty() {
            return Err(AppError::Validation("event_id cannot be empty".to_string()));
        }

        if !self.payload.is_object() {
            return Err(AppError::Validation(format!(
                "payload must be an object, got {}",
                json_kind(&self.payload)
            )));
        }

        Ok(())
    }

    pub fn into_record(self) -> ProcessedRecord {
        ProcessedRecord {
            topic: self.topic,
            event_id: self.event_id,
            timestamp: self.timestamp,
            source: self.source,
            payload: self.payload,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `events` is either a single event or a list of events.
///
/// Entries stay raw JSON until intake validates them one by one, so a bad
/// entry does not prevent earlier ones from being enqueued.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EventBatch {
    Many(Vec<Value>),
    One(Value),
}

impl EventBatch {
    pub fn into_vec(self) -> Vec<Value> {
        match self {
            EventBatch::Many(events) => events,
            EventBatch::One(event) => vec![event],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishRequest {
    pub events: EventBatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishResponse {
    pub status: String,
    pub count: usize,
}

impl PublishResponse {
    pub fn accepted(count: usize) -> Self {
        Self {
            status: "accepted".to_string(),
            count,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsQuery {
    pub topic: String,
}
