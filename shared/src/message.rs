use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Sequence number assigned by the sending channel. The peer echoes the
/// originating id so replies can be correlated with pending requests.
pub type MessageId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Start,
    Resume,
    Data,
    Generation,
    Ack,
    Error,
}

/// One frame of the control protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Message {
    pub fn new(kind: MessageType, data: Option<Value>) -> Self {
        Self {
            message_id: None,
            kind,
            data,
        }
    }

    /// Deserialize the payload into a typed struct. Returns `None` for a
    /// missing or mismatched payload; malformed data is never an error here,
    /// recipients just ignore what they cannot read.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.data
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

/// Per-snake state sent to the predictor in outbound DATA messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnakeState {
    pub energy_level: f32,
    pub energy_intake: f32,
    /// Coarse rasterization of the world as object-type codes, with this
    /// snake's own bodies marked distinctly.
    pub matrix: Vec<u8>,
    pub velocity_x: f32,
    pub velocity_y: f32,
}

/// Inbound DATA payload: steering vectors keyed by snake id, plus the
/// predictor's estimate of how far through the generation we are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub prediction: HashMap<String, [f32; 2]>,
    #[serde(default)]
    pub progress: Option<f32>,
}

/// Roster sent with START/RESUME so the predictor knows the population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnakeRoster {
    pub snakes: Vec<SnakeSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnakeSummary {
    pub id: u64,
    pub color: [u8; 3],
}

/// Outbound GENERATION payload: fitness report for the round that ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport {
    pub snake_ids: Vec<u64>,
    pub champions: Vec<ReportedSnake>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedSnake {
    pub id: u64,
    pub energy_intake: f32,
}

/// Inbound START/GENERATION payload announcing the next round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationAnnounce {
    pub generation: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_serializes_with_wire_field_names() {
        let msg = Message {
            message_id: Some(7),
            kind: MessageType::Data,
            data: Some(json!({ "progress": 0.5 })),
        };
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["messageId"], 7);
        assert_eq!(wire["type"], "data");
        assert_eq!(wire["data"]["progress"], 0.5);
    }

    #[test]
    fn message_id_omitted_when_absent() {
        let msg = Message::new(MessageType::Ack, None);
        let wire = serde_json::to_string(&msg).unwrap();
        assert!(!wire.contains("messageId"));
        assert!(!wire.contains("data"));
    }

    #[test]
    fn prediction_tolerates_missing_fields() {
        let msg = Message {
            message_id: Some(1),
            kind: MessageType::Data,
            data: Some(json!({})),
        };
        let prediction: Prediction = msg.data_as().unwrap();
        assert!(prediction.prediction.is_empty());
        assert!(prediction.progress.is_none());
    }

    #[test]
    fn data_as_returns_none_for_mismatched_payload() {
        let msg = Message {
            message_id: Some(1),
            kind: MessageType::Data,
            data: Some(json!("free-form error text")),
        };
        assert!(msg.data_as::<Prediction>().is_none());
    }
}
