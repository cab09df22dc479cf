//! The append-only event schema shared by C4 (event buffer) and C5 (batch applier).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One invocation or conversion event, as emitted by the assignment service
/// and consumed by the metrics store's `fold`. The enum tag on `kind`
/// statically rules out the "unknown event type" case the original dict-shaped
/// event allowed — `UnsupportedEventType` can only occur if a *wire* payload
/// fails to deserialize into this type, which is handled as a per-line parse
/// failure in the batch applier (C5), not as a fold-time error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: EventKind,
    pub endpoint_name: String,
    pub endpoint_variant: String,
    pub user_id: String,
    pub inference_id: Uuid,
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Invocation,
    Conversion { reward: f64 },
}

impl Event {
    pub fn invocation(
        timestamp: i64,
        endpoint_name: impl Into<String>,
        endpoint_variant: impl Into<String>,
        user_id: impl Into<String>,
        inference_id: Uuid,
    ) -> Self {
        Self {
            timestamp,
            kind: EventKind::Invocation,
            endpoint_name: endpoint_name.into(),
            endpoint_variant: endpoint_variant.into(),
            user_id: user_id.into(),
            inference_id,
            source_ip: None,
            user_agent: None,
        }
    }

    pub fn conversion(
        timestamp: i64,
        endpoint_name: impl Into<String>,
        endpoint_variant: impl Into<String>,
        user_id: impl Into<String>,
        inference_id: Uuid,
        reward: f64,
    ) -> Self {
        Self {
            timestamp,
            kind: EventKind::Conversion { reward },
            endpoint_name: endpoint_name.into(),
            endpoint_variant: endpoint_variant.into(),
            user_id: user_id.into(),
            inference_id,
            source_ip: None,
            user_agent: None,
        }
    }

    /// Attaches the caller's network identity, mirroring the request
    /// identity the original Lambda handlers merge into every logged metric.
    pub fn with_request_identity(
        mut self,
        source_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        self.source_ip = source_ip;
        self.user_agent = user_agent;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_serializes_without_reward() {
        let event = Event::invocation(1, "e1", "ev1", "u1", Uuid::nil());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "invocation");
        assert!(value.get("reward").is_none());
    }

    #[test]
    fn conversion_round_trips_with_reward() {
        let event = Event::conversion(1, "e1", "ev1", "u1", Uuid::nil(), 1.0);
        let line = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn request_identity_round_trips_and_defaults_to_none() {
        let bare = Event::invocation(1, "e1", "ev1", "u1", Uuid::nil());
        assert_eq!(bare.source_ip, None);
        assert_eq!(bare.user_agent, None);

        let tagged = bare
            .clone()
            .with_request_identity(Some("203.0.113.9".to_string()), Some("curl/8.0".to_string()));
        let line = serde_json::to_string(&tagged).unwrap();
        let parsed: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.source_ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(parsed.user_agent.as_deref(), Some("curl/8.0"));

        // Old-shaped lines without these fields still parse (batch backfill compatibility).
        let legacy_line = r#"{"timestamp":1,"type":"invocation","endpoint_name":"e1","endpoint_variant":"ev1","user_id":"u1","inference_id":"00000000-0000-0000-0000-000000000000"}"#;
        let legacy: Event = serde_json::from_str(legacy_line).unwrap();
        assert_eq!(legacy.source_ip, None);
    }
}
