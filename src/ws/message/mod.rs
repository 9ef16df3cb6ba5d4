//! Gateway packets, inbound messages and outbound commands.

mod decoder;
mod types;

pub use decoder::FrameDecoder;
pub use types::{Dispatch, Hello, Identify, RequestGuildMembers, Resume, UpdateVoiceState};

use enum_as_inner::EnumAsInner;
use serde_json::Value;
use snafu::prelude::*;

use crate::config::Presence;

/// Error when decode received data as a packet
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum DecodeError {
    /// decompress data failed
    #[snafu(display("decompress packet failed: {status:?}"))]
    Inflate {
        /// inflate error status
        status: miniz_oxide::MZError,
    },

    /// data is invalid json
    #[snafu(display("parse json failed: {source}"))]
    ParseJSONFailed {
        /// source error
        source: serde_json::Error,
    },

    /// data json is not an object
    #[snafu(display("parsed packet is not object: {json}"))]
    PacketNotObject {
        /// json string
        json: String,
    },

    /// data json has no numeric op field
    #[snafu(display("packet has no numeric op field: {json}"))]
    NoOpCode {
        /// json string
        json: String,
    },

    /// data json is not a valid typed message
    #[snafu(display("parse op {op} packet failed: {reason}"))]
    InvalidMessage {
        /// opcode
        op: u64,
        /// what is wrong
        reason: String,
    },
}

/// Gateway opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// event dispatch, server -> client
    Dispatch = 0,
    /// heartbeat, both directions
    Heartbeat = 1,
    /// identify, client -> server
    Identify = 2,
    /// presence update, client -> server
    PresenceUpdate = 3,
    /// voice state update, client -> server
    VoiceStateUpdate = 4,
    /// resume, client -> server
    Resume = 6,
    /// reconnect request, server -> client
    Reconnect = 7,
    /// guild member request, client -> server
    RequestGuildMembers = 8,
    /// invalid session, server -> client
    InvalidSession = 9,
    /// hello, server -> client
    Hello = 10,
    /// heartbeat acknowledge, server -> client
    HeartbeatAck = 11,
}

impl OpCode {
    /// Opcode from its wire number
    pub fn from_u64(op: u64) -> Option<Self> {
        match op {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            3 => Some(Self::PresenceUpdate),
            4 => Some(Self::VoiceStateUpdate),
            6 => Some(Self::Resume),
            7 => Some(Self::Reconnect),
            8 => Some(Self::RequestGuildMembers),
            9 => Some(Self::InvalidSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }
}

/// Message received from gateway
#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Message {
    /// Dispatch, op 0
    Dispatch(Dispatch),
    /// Heartbeat request, op 1
    Heartbeat,
    /// Reconnect request, op 7
    Reconnect,
    /// Invalid session, op 9, carries whether the session is resumable
    InvalidSession(bool),
    /// Hello, op 10
    Hello(Hello),
    /// Heartbeat acknowledge, op 11
    HeartbeatAck,
    /// Any other opcode
    Unknown(u64),
}

/// A decoded packet
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// sequence number, the `s` field
    pub seq: Option<u64>,
    /// typed message
    pub message: Message,
}

impl Packet {
    /// Decode a json packet
    pub fn decode(buff: &[u8]) -> Result<Self, DecodeError> {
        let mut value: Value = serde_json::from_slice(buff).context(error::ParseJSONFailed)?;

        let obj = value
            .as_object_mut()
            .with_context(|| error::PacketNotObject {
                json: String::from_utf8_lossy(buff),
            })?;

        let op = obj
            .get("op")
            .and_then(Value::as_u64)
            .with_context(|| error::NoOpCode {
                json: String::from_utf8_lossy(buff),
            })?;

        let seq = obj.get("s").and_then(Value::as_u64);
        let data = obj.remove("d").unwrap_or(Value::Null);

        let message = match OpCode::from_u64(op) {
            Some(OpCode::Dispatch) => {
                let name = obj
                    .get("t")
                    .and_then(Value::as_str)
                    .with_context(|| error::InvalidMessage {
                        op,
                        reason: "dispatch without event name",
                    })?
                    .to_string();
                Message::Dispatch(Dispatch { name, data })
            }
            Some(OpCode::Heartbeat) => Message::Heartbeat,
            Some(OpCode::Reconnect) => Message::Reconnect,
            Some(OpCode::InvalidSession) => {
                Message::InvalidSession(data.as_bool().unwrap_or_default())
            }
            Some(OpCode::Hello) => {
                let hello = serde_json::from_value(data).map_err(|e| DecodeError::InvalidMessage {
                    op,
                    reason: e.to_string(),
                })?;
                Message::Hello(hello)
            }
            Some(OpCode::HeartbeatAck) => Message::HeartbeatAck,
            _ => Message::Unknown(op),
        };

        Ok(Self { seq, message })
    }
}

/// Command sent to gateway
#[derive(Debug, Clone, EnumAsInner)]
pub enum Command {
    /// Heartbeat, op 1, carries the last sequence
    Heartbeat(Option<u64>),
    /// Identify, op 2
    Identify(Identify),
    /// Presence update, op 3
    PresenceUpdate(Presence),
    /// Voice state update, op 4
    VoiceStateUpdate(UpdateVoiceState),
    /// Resume, op 6
    Resume(Resume),
    /// Guild member request, op 8
    RequestGuildMembers(RequestGuildMembers),
}

impl Command {
    /// get opcode
    pub fn op(&self) -> OpCode {
        match self {
            Self::Heartbeat(_) => OpCode::Heartbeat,
            Self::Identify(_) => OpCode::Identify,
            Self::PresenceUpdate(_) => OpCode::PresenceUpdate,
            Self::VoiceStateUpdate(_) => OpCode::VoiceStateUpdate,
            Self::Resume(_) => OpCode::Resume,
            Self::RequestGuildMembers(_) => OpCode::RequestGuildMembers,
        }
    }

    fn data(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Heartbeat(seq) => Ok(seq.map(Value::from).unwrap_or(Value::Null)),
            Self::Identify(data) => serde_json::to_value(data),
            Self::PresenceUpdate(data) => serde_json::to_value(data),
            Self::VoiceStateUpdate(data) => serde_json::to_value(data),
            Self::Resume(data) => serde_json::to_value(data),
            Self::RequestGuildMembers(data) => serde_json::to_value(data),
        }
    }

    /// `{op, d}` json value
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        Ok(serde_json::json!({
            "op": self.op() as u8,
            "d": self.data()?,
        }))
    }

    /// encode to a json text frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_value()?)
    }

    /// json text for logging, with the token removed
    pub fn redacted(&self) -> String {
        let mut value = match self.to_value() {
            Ok(value) => value,
            Err(err) => return format!("<unserializable op {}: {}>", self.op() as u8, err),
        };
        if let Some(token) = value.pointer_mut("/d/token") {
            *token = Value::String("[REMOVED]".to_string());
        }
        value.to_string()
    }
}
