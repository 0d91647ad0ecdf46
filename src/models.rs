use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A chat message as relayed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub username: String,
    pub room: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default = "Utc::now", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Ownership is keyed on the durable `uid` when the server echoed one,
    /// otherwise on the display name.
    pub fn is_own(&self, user_id: &str, username: &str) -> bool {
        match self.uid.as_deref() {
            Some(uid) if !uid.is_empty() => uid == user_id,
            _ => self.username == username,
        }
    }
}

/// A room member. `id` is the transport session and changes on reconnect,
/// `uid` is the durable identity chosen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub room: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl User {
    pub fn identity_key(&self) -> &str {
        match self.uid.as_deref() {
            Some(uid) if !uid.is_empty() => uid,
            _ => &self.id,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Millis(i64),
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom),
        RawTimestamp::Millis(millis) => Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {millis}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_accepts_iso_timestamp() {
        let message: Message = serde_json::from_value(json!({
            "id": "42",
            "text": "hello",
            "username": "alice",
            "room": "lobby",
            "timestamp": "2024-03-01T10:15:00.000Z"
        }))
        .unwrap();
        assert_eq!(message.uid, None);
        assert_eq!(message.timestamp.to_rfc3339(), "2024-03-01T10:15:00+00:00");
    }

    #[test]
    fn message_accepts_epoch_millis() {
        let message: Message = serde_json::from_value(json!({
            "id": "1",
            "text": "hi",
            "username": "bob",
            "room": "lobby",
            "uid": "user-1",
            "timestamp": 1_700_000_000_000_i64
        }))
        .unwrap();
        assert_eq!(message.timestamp.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(message.uid.as_deref(), Some("user-1"));
    }

    #[test]
    fn missing_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let message: Message = serde_json::from_value(json!({
            "id": "1", "text": "hi", "username": "bob", "room": "lobby"
        }))
        .unwrap();
        assert!(message.timestamp >= before);
    }

    #[test]
    fn ownership_prefers_uid_over_username() {
        let mut message: Message = serde_json::from_value(json!({
            "id": "1", "text": "hi", "username": "alice", "room": "lobby", "uid": "user-9"
        }))
        .unwrap();
        assert!(message.is_own("user-9", "someone-else"));
        assert!(!message.is_own("user-1", "alice"));

        message.uid = None;
        assert!(message.is_own("user-1", "alice"));
        assert!(!message.is_own("user-1", "bob"));
    }

    #[test]
    fn user_identity_falls_back_to_session_id() {
        let mut user = User {
            id: "sock-1".to_string(),
            username: "alice".to_string(),
            room: "lobby".to_string(),
            uid: Some("user-1".to_string()),
        };
        assert_eq!(user.identity_key(), "user-1");
        user.uid = None;
        assert_eq!(user.identity_key(), "sock-1");
    }

    #[test]
    fn absent_uid_is_not_serialized() {
        let user = User {
            id: "sock-1".to_string(),
            username: "alice".to_string(),
            room: "lobby".to_string(),
            uid: None,
        };
        let value = serde_json::to_value(&user).unwrap();
        assert!(value.get("uid").is_none());
    }
}
