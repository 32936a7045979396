use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A class of update flowing through the pipeline.
///
/// Extending the pipeline with a new kind means adding a variant here (with
/// its channel name and identifier policy) and registering a route for it
/// when the pipeline starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Instrument readings keyed by measurement name.
    Measurement,
    /// Alarm state transitions keyed by identifier (with fallbacks).
    Alarm,
    /// Machine property changes, delivered as per-machine partial maps.
    MachineProperty,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [Self::Measurement, Self::Alarm, Self::MachineProperty];

    /// Determine the entity kind from a channel name.
    pub fn from_channel(channel: &str) -> Option<Self> {
        match channel.to_lowercase().as_str() {
            "measurement" => Some(Self::Measurement),
            "alarm" => Some(Self::Alarm),
            "machine" => Some(Self::MachineProperty),
            _ => None,
        }
    }

    /// Channel name this kind arrives on.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Measurement => "measurement",
            Self::Alarm => "alarm",
            Self::MachineProperty => "machine",
        }
    }

    /// Ordered candidate identifier fields within a payload of this kind.
    /// The first present, usable field wins.
    pub fn id_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Measurement => &["name"],
            Self::Alarm => &["identifier", "id", "name"],
            Self::MachineProperty => &["name"],
        }
    }

    /// Machine-property updates arrive as partial maps and merge
    /// property-by-property instead of replacing the whole snapshot.
    pub fn merges_properties(&self) -> bool {
        matches!(self, Self::MachineProperty)
    }

    /// Extract the entity id from a payload using this kind's field policy.
    pub fn extract_id(&self, payload: &Value) -> Option<String> {
        first_present_id(payload, self.id_fields())
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inbound frame envelope: a channel name plus a kind-specific payload.
///
/// The server wraps every push in this shape; the pipeline only reads the
/// channel and passes `data` through opaquely.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamMessage {
    pub channel: String,
    #[serde(default)]
    pub data: Value,
}

impl StreamMessage {
    /// Parse a raw JSON frame into the envelope.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// The entity kind this frame carries, if the channel is known.
    pub fn kind(&self) -> Option<EntityKind> {
        EntityKind::from_channel(&self.channel)
    }
}

/// Walk the candidate fields in order and return the first usable id.
/// String fields must be non-empty; numeric ids are stringified.
pub(crate) fn first_present_id(payload: &Value, fields: &[&str]) -> Option<String> {
    for field in fields {
        match payload.get(field) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_from_channel() {
        assert_eq!(EntityKind::from_channel("measurement"), Some(EntityKind::Measurement));
        assert_eq!(EntityKind::from_channel("ALARM"), Some(EntityKind::Alarm));
        assert_eq!(EntityKind::from_channel("machine"), Some(EntityKind::MachineProperty));
        assert_eq!(EntityKind::from_channel("heartbeat"), None);
    }

    #[test]
    fn test_parse_envelope() {
        let raw = r#"{"channel":"measurement","data":{"name":"T1","value":3}}"#;
        let message = StreamMessage::parse(raw).unwrap();

        assert_eq!(message.kind(), Some(EntityKind::Measurement));
        assert_eq!(message.data["name"], "T1");
    }

    #[test]
    fn test_envelope_without_data() {
        let message = StreamMessage::parse(r#"{"channel":"alarm"}"#).unwrap();
        assert!(message.data.is_null());
    }

    #[test]
    fn test_alarm_id_fallback_chain() {
        let kind = EntityKind::Alarm;

        let payload = json!({"identifier": "AL-7", "id": "x", "name": "n"});
        assert_eq!(kind.extract_id(&payload), Some("AL-7".to_string()));

        let payload = json!({"identifier": null, "id": null, "name": "A1"});
        assert_eq!(kind.extract_id(&payload), Some("A1".to_string()));

        let payload = json!({"id": 42});
        assert_eq!(kind.extract_id(&payload), Some("42".to_string()));

        let payload = json!({"severity": "high"});
        assert_eq!(kind.extract_id(&payload), None);
    }

    #[test]
    fn test_empty_string_id_is_not_usable() {
        let payload = json!({"name": ""});
        assert_eq!(EntityKind::Measurement.extract_id(&payload), None);
    }
}
