//! Engine.IO v4 and Socket.IO v5 packet codec for the default namespace.
//!
//! An Engine.IO packet is a single type digit followed by its data. Over
//! long-polling several packets share one HTTP body, separated by the ASCII
//! record separator. Socket.IO packets ride inside Engine.IO `message` packets.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

pub const RECORD_SEPARATOR: char = '\u{1e}';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(match self {
            EnginePacket::Open(info) => format!("0{}", serde_json::to_string(info)?),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{data}"),
            EnginePacket::Pong(data) => format!("3{data}"),
            EnginePacket::Message(data) => format!("4{data}"),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        })
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let mut chars = raw.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let data = chars.as_str();
        Ok(match kind {
            '0' => EnginePacket::Open(serde_json::from_str(data)?),
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping(data.to_string()),
            '3' => EnginePacket::Pong(data.to_string()),
            '4' => EnginePacket::Message(data.to_string()),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            'b' => {
                return Err(ProtocolError::InvalidPayload(
                    "binary packets are not supported".to_string(),
                ))
            }
            other => return Err(ProtocolError::UnknownPacketType(other)),
        })
    }
}

pub fn encode_payload(packets: &[EnginePacket]) -> Result<String, ProtocolError> {
    let encoded = packets
        .iter()
        .map(EnginePacket::encode)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(encoded.join(&RECORD_SEPARATOR.to_string()))
}

pub fn decode_payload(body: &str) -> Result<Vec<EnginePacket>, ProtocolError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    body.split(RECORD_SEPARATOR).map(EnginePacket::decode).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { args: Vec<Value>, ack: Option<u64> },
    Ack { args: Vec<Value>, id: u64 },
    ConnectError(Value),
}

impl SocketPacket {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(auth)) => format!("0{}", serde_json::to_string(auth)?),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { args, ack } => format!(
                "2{}{}",
                ack.map(|id| id.to_string()).unwrap_or_default(),
                serde_json::to_string(args)?
            ),
            SocketPacket::Ack { args, id } => format!("3{id}{}", serde_json::to_string(args)?),
            SocketPacket::ConnectError(data) => format!("4{}", serde_json::to_string(data)?),
        })
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let mut chars = raw.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(ProtocolError::InvalidPayload(
                "binary events are not supported".to_string(),
            ));
        }

        // Namespaced packets look like `2/chat,["event"]`; the client only
        // joins the default namespace, so the name is dropped.
        if rest.starts_with('/') {
            rest = match rest.find(',') {
                Some(idx) => &rest[idx + 1..],
                None => "",
            };
        }

        let digits = rest.chars().take_while(char::is_ascii_digit).count();
        let ack = if digits > 0 {
            Some(
                rest[..digits]
                    .parse::<u64>()
                    .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?,
            )
        } else {
            None
        };
        let json = &rest[digits..];

        Ok(match kind {
            '0' => SocketPacket::Connect(parse_optional(json)?),
            '1' => SocketPacket::Disconnect,
            '2' => SocketPacket::Event {
                args: serde_json::from_str(json)?,
                ack,
            },
            '3' => SocketPacket::Ack {
                args: serde_json::from_str(json)?,
                id: ack.ok_or_else(|| {
                    ProtocolError::InvalidPayload("ack packet without id".to_string())
                })?,
            },
            '4' => SocketPacket::ConnectError(parse_optional(json)?.unwrap_or(Value::Null)),
            other => return Err(ProtocolError::UnknownPacketType(other)),
        })
    }

    /// Splits an event into its name and first argument.
    pub fn into_named_event(self) -> Option<(String, Value)> {
        let SocketPacket::Event { args, .. } = self else {
            return None;
        };
        let mut args = args.into_iter();
        let name = match args.next()? {
            Value::String(name) => name,
            _ => return None,
        };
        Some((name, args.next().unwrap_or(Value::Null)))
    }
}

fn parse_optional(json: &str) -> Result<Option<Value>, ProtocolError> {
    if json.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::from_str(json)?))
    }
}
