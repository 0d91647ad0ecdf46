use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ProtocolError;
use crate::models::{Message, User};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "joinRoom")]
    JoinRoom {
        username: String,
        room: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uid: Option<String>,
    },
    #[serde(rename = "leaveRoom")]
    LeaveRoom {},
    #[serde(rename = "sendMessage")]
    SendMessage {
        text: String,
        username: String,
        room: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uid: Option<String>,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "message")]
    Message(Message),
    #[serde(rename = "userJoined")]
    UserJoined(User),
    #[serde(rename = "userLeft")]
    UserLeft(User),
    #[serde(rename = "roomUsers")]
    RoomUsers(Vec<User>),
    #[serde(rename = "roomMessages")]
    RoomMessages(Vec<Message>),
}

impl ClientMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom { .. } => "joinRoom",
            ClientMessage::LeaveRoom {} => "leaveRoom",
            ClientMessage::SendMessage { .. } => "sendMessage",
        }
    }

    /// Socket.IO event arguments: the event name followed by its payload.
    pub fn to_event_args(&self) -> Result<Vec<Value>, ProtocolError> {
        let mut tagged = serde_json::to_value(self)?;
        let data = tagged
            .get_mut("data")
            .map_or_else(|| json!({}), Value::take);
        Ok(vec![Value::from(self.event_name()), data])
    }
}

impl ServerMessage {
    pub const EVENTS: [&'static str; 5] =
        ["message", "userJoined", "userLeft", "roomUsers", "roomMessages"];

    /// Decodes a named server event. Events this client does not handle
    /// yield `Ok(None)`.
    pub fn from_event(name: &str, data: Value) -> Result<Option<Self>, ProtocolError> {
        if !Self::EVENTS.contains(&name) {
            return Ok(None);
        }
        let message = serde_json::from_value(json!({ "event": name, "data": data }))?;
        Ok(Some(message))
    }
}
