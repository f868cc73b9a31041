use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::IpcError;
use crate::payload::Payload;

/// Conventional application events carried over the bus.
/// The transport never requires these shapes; collaborators that want typed
/// access convert to and from [`Payload`]. Tag strings and field casing
/// match the deployed wire format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AppEvent {
    /// A person was enrolled through the HTTP API.
    #[serde(rename = "enrollment", rename_all = "camelCase")]
    Enrollment {
        status: String,
        name: Option<String>,
        person_id: String,
    },

    /// Attendance was recorded for a recognized person.
    #[serde(rename = "attendance", rename_all = "camelCase")]
    Attendance {
        person_id: String,
        name: Option<String>,
        synced_at: Option<DateTime<Utc>>,
    },

    /// The recognizer saw a person for the first time in a session.
    #[serde(rename = "person-recognized", rename_all = "camelCase")]
    PersonRecognized {
        session_id: String,
        person_id: String,
        attendance_time_stamp: DateTime<Utc>,
    },

    /// A UI-originated action request.
    #[serde(rename = "user-action")]
    UserAction { action: String },

    /// Free-form text typed by a UI user.
    #[serde(rename = "user_message")]
    UserMessage {
        message: String,
        timestamp: Option<DateTime<Utc>>,
    },
}

impl AppEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Enrollment { .. } => "enrollment",
            Self::Attendance { .. } => "attendance",
            Self::PersonRecognized { .. } => "person-recognized",
            Self::UserAction { .. } => "user-action",
            Self::UserMessage { .. } => "user_message",
        }
    }

    pub fn to_payload(&self) -> Result<Payload, IpcError> {
        Payload::from_value(serde_json::to_value(self)?)
    }

    pub fn from_payload(payload: &Payload) -> Result<Self, IpcError> {
        Ok(serde_json::from_value(payload.clone().into_value())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap()
    }

    #[test]
    fn person_recognized_wire_format() {
        let event = AppEvent::PersonRecognized {
            session_id: "sess-42".into(),
            person_id: "p-007".into(),
            attendance_time_stamp: ts(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"person-recognized\""), "got: {json}");
        assert!(json.contains("\"sessionId\":\"sess-42\""));
        assert!(json.contains("\"personId\":\"p-007\""));
        assert!(json.contains("\"attendanceTimeStamp\""));
    }

    #[test]
    fn enrollment_wire_format() {
        let event = AppEvent::Enrollment {
            status: "completed".into(),
            name: Some("Ada".into()),
            person_id: "p-001".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"enrollment\""));
        assert!(json.contains("\"personId\":\"p-001\""));
        assert!(json.contains("\"name\":\"Ada\""));
    }

    #[test]
    fn payload_roundtrip() {
        let event = AppEvent::Attendance {
            person_id: "p-003".into(),
            name: None,
            synced_at: Some(ts()),
        };
        let payload = event.to_payload().unwrap();
        assert_eq!(payload.msg_type(), Some("attendance"));
        let parsed = AppEvent::from_payload(&payload).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn event_type_matches_tag() {
        let event = AppEvent::UserMessage {
            message: "hello".into(),
            timestamp: None,
        };
        let payload = event.to_payload().unwrap();
        assert_eq!(payload.msg_type(), Some(event.event_type()));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let payload =
            Payload::from_value(serde_json::json!({"type": "no-such-event", "x": 1})).unwrap();
        assert!(AppEvent::from_payload(&payload).is_err());
    }
}
