//! Frame Codec
//!
//! Decodes Tradovate frames and classifies array items; encodes client
//! commands.
//!
//! # Item Precedence
//!
//! 1. Object with both `s` and `i`: command acknowledgment
//! 2. `e == "props"` with an object `d`: entity event
//! 3. `d` is an array and there is no `e`: initial list, each element sniffed
//!    (`netPos` ⇒ position, else `ordStatus` ⇒ order, else `amount` ⇒
//!    cashBalance)
//! 4. Anything else: unrecognized
//!
//! Decode failures are returned as `CodecError`; callers log and skip them.

use serde_json::{Map, Value};

use super::messages::{
    AUTHORIZE_REQUEST_ID, Command, CommandAck, Frame, HEARTBEAT_ACK, ServerItem,
};
use crate::domain::reconciler::{EntityType, EventType, SyncEvent};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Zero-length message.
    #[error("empty frame")]
    EmptyFrame,

    /// Unknown frame type character.
    #[error("unknown frame type: {0:?}")]
    UnknownFrameType(char),

    /// Entity event with an `entityType` outside the known set.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Entity event with an `eventType` outside the known set.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

impl CodecError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::EmptyFrame => "empty_frame",
            Self::UnknownFrameType(_) => "unknown_frame",
            Self::UnknownEntityType(_) => "unknown_entity_type",
            Self::UnknownEventType(_) => "unknown_event_type",
            Self::InvalidFormat(_) => "invalid_format",
        }
    }
}

/// Tradovate frame codec.
#[derive(Debug, Default, Clone)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one raw server message.
    ///
    /// # Errors
    ///
    /// Returns an error for empty input, an unknown frame type, or an `a`
    /// or `c` frame whose payload is not a JSON array.
    pub fn decode(&self, text: &str) -> Result<Frame, CodecError> {
        let mut chars = text.chars();
        let Some(frame_type) = chars.next() else {
            return Err(CodecError::EmptyFrame);
        };

        match frame_type {
            'o' => Ok(Frame::Open),
            'h' => Ok(Frame::Heartbeat),
            'a' => {
                let items: Vec<Value> = serde_json::from_str(chars.as_str())?;
                Ok(Frame::Array(items))
            }
            'c' => {
                let payload: Vec<Value> = serde_json::from_str(chars.as_str())?;
                let code = payload
                    .first()
                    .and_then(Value::as_u64)
                    .and_then(|code| u16::try_from(code).ok());
                let reason = payload
                    .get(1)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(Frame::Close { code, reason })
            }
            other => Err(CodecError::UnknownFrameType(other)),
        }
    }

    /// Classify one array item.
    ///
    /// # Errors
    ///
    /// Returns an error for acknowledgments with non-numeric `s`/`i`, entity
    /// events without an entity object, and unknown entity or event types.
    pub fn classify(&self, item: Value) -> Result<ServerItem, CodecError> {
        let Value::Object(mut object) = item else {
            return Ok(ServerItem::Unrecognized(item));
        };

        if object.contains_key("s") && object.contains_key("i") {
            return Self::decode_ack(object).map(ServerItem::Ack);
        }

        let is_props = object.get("e").and_then(Value::as_str) == Some("props");
        if is_props
            && object.get("d").is_some_and(Value::is_object)
            && let Some(Value::Object(payload)) = object.remove("d")
        {
            return Self::decode_event(payload).map(ServerItem::Event);
        }

        if !object.contains_key("e")
            && object.get("d").is_some_and(Value::is_array)
            && let Some(Value::Array(elements)) = object.remove("d")
        {
            return Ok(ServerItem::InitialList(self.sniff_list(elements)));
        }

        Ok(ServerItem::Unrecognized(Value::Object(object)))
    }

    fn decode_ack(mut object: Map<String, Value>) -> Result<CommandAck, CodecError> {
        let status = object
            .get("s")
            .and_then(Value::as_i64)
            .ok_or_else(|| CodecError::InvalidFormat("ack status is not an integer".to_string()))?;
        let id = object
            .get("i")
            .and_then(Value::as_u64)
            .ok_or_else(|| CodecError::InvalidFormat("ack id is not an integer".to_string()))?;

        Ok(CommandAck {
            status,
            id,
            body: object.remove("d"),
        })
    }

    fn decode_event(mut payload: Map<String, Value>) -> Result<SyncEvent, CodecError> {
        let entity_type = match payload.get("entityType").and_then(Value::as_str) {
            Some(name) => EntityType::from_wire(name)
                .ok_or_else(|| CodecError::UnknownEntityType(name.to_string()))?,
            None => {
                return Err(CodecError::InvalidFormat(
                    "props event without entityType".to_string(),
                ));
            }
        };
        let event_type = match payload.get("eventType").and_then(Value::as_str) {
            Some(name) => EventType::from_wire(name)
                .ok_or_else(|| CodecError::UnknownEventType(name.to_string()))?,
            None => {
                return Err(CodecError::InvalidFormat(
                    "props event without eventType".to_string(),
                ));
            }
        };
        let Some(Value::Object(entity)) = payload.remove("entity") else {
            return Err(CodecError::InvalidFormat(format!(
                "{entity_type} event without entity object"
            )));
        };

        Ok(SyncEvent::new(entity_type, event_type, entity))
    }

    fn sniff_list(&self, elements: Vec<Value>) -> Vec<SyncEvent> {
        elements
            .into_iter()
            .filter_map(|element| match element {
                Value::Object(entity) => match self.sniff(&entity) {
                    Some(entity_type) => Some(SyncEvent::created(entity_type, entity)),
                    None => {
                        tracing::debug!("Skipping unclassifiable initial list element");
                        None
                    }
                },
                _ => None,
            })
            .collect()
    }

    /// Guess the entity type of an initial list element from its fields.
    #[must_use]
    pub fn sniff(&self, entity: &Map<String, Value>) -> Option<EntityType> {
        if entity.contains_key("netPos") {
            Some(EntityType::Position)
        } else if entity.contains_key("ordStatus") {
            Some(EntityType::Order)
        } else if entity.contains_key("amount") {
            Some(EntityType::CashBalance)
        } else {
            None
        }
    }

    /// Events for the initial entity set carried by a sync request
    /// acknowledgment body.
    #[must_use]
    pub fn sync_ack_events(&self, body: &Value) -> Vec<SyncEvent> {
        const SECTIONS: [(&str, EntityType); 4] = [
            ("accounts", EntityType::Account),
            ("cashBalances", EntityType::CashBalance),
            ("positions", EntityType::Position),
            ("orders", EntityType::Order),
        ];

        let Some(body) = body.as_object() else {
            return Vec::new();
        };

        SECTIONS
            .iter()
            .filter_map(|(key, entity_type)| {
                body.get(*key)
                    .and_then(Value::as_array)
                    .map(|items| (items, *entity_type))
            })
            .flat_map(|(items, entity_type)| {
                items.iter().filter_map(move |item| {
                    item.as_object()
                        .map(|entity| SyncEvent::created(entity_type, entity.clone()))
                })
            })
            .collect()
    }

    /// Encode a command as wire text.
    #[must_use]
    pub fn encode(&self, command: &Command) -> String {
        match command {
            Command::Authorize { token } => format!("authorize\n{AUTHORIZE_REQUEST_ID}\n\n{token}"),
            Command::Request { topic, id, body } => {
                let body = body.as_ref().map(Value::to_string).unwrap_or_default();
                format!("{topic}\n{id}\n\n{body}")
            }
            Command::HeartbeatAck => HEARTBEAT_ACK.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn codec() -> FrameCodec {
        FrameCodec::new()
    }

    #[test]
    fn decode_frame_types() {
        assert_eq!(codec().decode("o").unwrap(), Frame::Open);
        assert_eq!(codec().decode("h").unwrap(), Frame::Heartbeat);
        assert_eq!(
            codec().decode(r#"c[1000,"Normal closure"]"#).unwrap(),
            Frame::Close {
                code: Some(1000),
                reason: "Normal closure".to_string()
            }
        );
        assert_eq!(
            codec().decode("c[]").unwrap(),
            Frame::Close {
                code: None,
                reason: String::new()
            }
        );
        assert_eq!(
            codec().decode(r#"a[{"s":200,"i":1}]"#).unwrap(),
            Frame::Array(vec![json!({"s": 200, "i": 1})])
        );
    }

    #[test]
    fn decode_rejects_bad_frames() {
        assert!(matches!(codec().decode(""), Err(CodecError::EmptyFrame)));
        assert!(matches!(
            codec().decode("x[]"),
            Err(CodecError::UnknownFrameType('x'))
        ));
        assert!(matches!(codec().decode("a{not json"), Err(CodecError::Json(_))));
        assert!(matches!(codec().decode(r#"a{"s":1}"#), Err(CodecError::Json(_))));
    }

    #[test]
    fn classify_ack() {
        let item = codec()
            .classify(json!({"s": 200, "i": 1}))
            .unwrap();
        assert_eq!(
            item,
            ServerItem::Ack(CommandAck {
                status: 200,
                id: 1,
                body: None
            })
        );
    }

    #[test]
    fn classify_ack_takes_precedence_over_props() {
        let item = codec()
            .classify(json!({"s": 200, "i": 12, "e": "props", "d": {"entityType": "order"}}))
            .unwrap();
        assert!(matches!(item, ServerItem::Ack(CommandAck { id: 12, .. })));
    }

    #[test]
    fn classify_ack_with_non_integer_status_fails() {
        let result = codec().classify(json!({"s": "ok", "i": 1}));
        assert!(matches!(result, Err(CodecError::InvalidFormat(_))));
    }

    #[test]
    fn classify_props_event() {
        let item = codec()
            .classify(json!({
                "e": "props",
                "d": {
                    "entityType": "position",
                    "eventType": "Updated",
                    "entity": {"id": 1, "netPos": 2}
                }
            }))
            .unwrap();
        let ServerItem::Event(event) = item else {
            panic!("expected event");
        };
        assert_eq!(event.entity_type, EntityType::Position);
        assert_eq!(event.event_type, EventType::Updated);
        assert_eq!(event.entity["netPos"], json!(2));
    }

    #[test]
    fn classify_props_with_unknown_types_fails() {
        let result = codec().classify(json!({
            "e": "props",
            "d": {"entityType": "fillPair", "eventType": "Created", "entity": {}}
        }));
        assert!(matches!(result, Err(CodecError::UnknownEntityType(name)) if name == "fillPair"));

        let result = codec().classify(json!({
            "e": "props",
            "d": {"entityType": "order", "eventType": "Moved", "entity": {}}
        }));
        assert!(matches!(result, Err(CodecError::UnknownEventType(name)) if name == "Moved"));
    }

    #[test]
    fn classify_props_without_entity_fails() {
        let result = codec().classify(json!({
            "e": "props",
            "d": {"entityType": "order", "eventType": "Created"}
        }));
        assert!(matches!(result, Err(CodecError::InvalidFormat(_))));
    }

    #[test]
    fn classify_initial_list_sniffs_elements() {
        let item = codec()
            .classify(json!({
                "d": [
                    {"id": 1, "netPos": 1, "accountId": 100, "contractId": 55},
                    {"id": 2, "ordStatus": "Working"},
                    {"accountId": 100, "amount": 5000},
                    {"id": 3, "ordStatus": "Working", "netPos": 0},
                    {"mystery": true},
                    42
                ]
            }))
            .unwrap();
        let ServerItem::InitialList(events) = item else {
            panic!("expected initial list");
        };
        let types: Vec<_> = events.iter().map(|e| e.entity_type).collect();
        assert_eq!(
            types,
            vec![
                EntityType::Position,
                EntityType::Order,
                EntityType::CashBalance,
                EntityType::Position
            ]
        );
        assert!(events.iter().all(|e| e.event_type == EventType::Created));
    }

    #[test]
    fn classify_other_items_unrecognized() {
        let item = codec().classify(json!({"e": "md", "d": []})).unwrap();
        assert!(matches!(item, ServerItem::Unrecognized(_)));

        let item = codec().classify(json!("text")).unwrap();
        assert!(matches!(item, ServerItem::Unrecognized(_)));

        let item = codec().classify(json!({"e": "props", "d": []})).unwrap();
        assert!(matches!(item, ServerItem::Unrecognized(_)));
    }

    #[test]
    fn sync_ack_body_yields_created_events() {
        let body = json!({
            "accounts": [{"id": 100, "name": "DEMO100"}],
            "cashBalances": [{"accountId": 100, "amount": 5000}],
            "positions": [{"id": 1, "accountId": 100, "contractId": 55, "netPos": 1}],
            "orders": [{"id": 7, "ordStatus": "Working"}, "skip"],
            "contracts": [{"id": 55}]
        });
        let events = codec().sync_ack_events(&body);
        let types: Vec<_> = events.iter().map(|e| e.entity_type).collect();
        assert_eq!(
            types,
            vec![
                EntityType::Account,
                EntityType::CashBalance,
                EntityType::Position,
                EntityType::Order
            ]
        );
        assert!(codec().sync_ack_events(&json!("no body")).is_empty());
    }

    #[test]
    fn encode_commands() {
        assert_eq!(
            codec().encode(&Command::Authorize {
                token: "jwt".to_string()
            }),
            "authorize\n1\n\njwt"
        );
        assert_eq!(
            codec().encode(&Command::sync_request(10, 42)),
            "user/syncrequest\n10\n\n{\"users\":[42]}"
        );
        assert_eq!(
            codec().encode(&Command::Request {
                topic: "user/list".to_string(),
                id: 11,
                body: None
            }),
            "user/list\n11\n\n"
        );
        assert_eq!(codec().encode(&Command::HeartbeatAck), "[]");
    }
}
