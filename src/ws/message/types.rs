use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ConnectionProperties, Intents, Presence};

/// Hello message data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Dispatch message data
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    /// event name, the `t` field
    pub name: String,
    /// event body, the `d` field
    pub data: Value,
}

/// Identify command data
#[derive(Debug, Clone, Serialize)]
pub struct Identify {
    /// bot token
    pub token: String,
    /// client properties
    pub properties: ConnectionProperties,
    /// whether the server may send compressed packets
    pub compress: bool,
    /// member count above which offline members are not sent
    pub large_threshold: u32,
    /// `[shard index, shard count]`
    pub shard: [u32; 2],
    /// initial presence
    pub presence: Presence,
    /// subscribed intents
    pub intents: Intents,
}

/// Resume command data
#[derive(Debug, Clone, Serialize)]
pub struct Resume {
    /// bot token
    pub token: String,
    /// session to resume
    pub session_id: String,
    /// last seen sequence
    pub seq: u64,
}

/// Voice state update command data
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateVoiceState {
    /// voice channel to join, `None` to leave
    pub channel_id: Option<String>,
    /// guild of the voice channel
    pub guild_id: String,
    /// self deafen
    pub self_deaf: bool,
    /// self mute
    pub self_mute: bool,
}

/// Guild member request command data
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestGuildMembers {
    /// guild to request
    pub guild_id: String,
    /// max members to send, 0 for no limit
    pub limit: u32,
    /// specific users to request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<String>>,
    /// username prefix, empty for all members
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// correlation id echoed in every chunk
    pub nonce: String,
    /// whether to include presences
    pub presences: bool,
}
