//! Shard configuration.

use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::cache::CacheLimits;

bitflags! {
    /// Gateway intents, selecting which events the gateway sends.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u64 {
        /// guild, channel, thread and stage instance lifecycle
        const GUILDS = 1 << 0;
        /// member add/update/remove, privileged
        const GUILD_MEMBERS = 1 << 1;
        /// bans and audit log entries
        const GUILD_MODERATION = 1 << 2;
        /// emoji and sticker updates
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        /// integration updates
        const GUILD_INTEGRATIONS = 1 << 4;
        /// webhook updates
        const GUILD_WEBHOOKS = 1 << 5;
        /// invite create/delete
        const GUILD_INVITES = 1 << 6;
        /// voice state updates
        const GUILD_VOICE_STATES = 1 << 7;
        /// presence updates, privileged
        const GUILD_PRESENCES = 1 << 8;
        /// guild messages
        const GUILD_MESSAGES = 1 << 9;
        /// guild message reactions
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        /// guild typing
        const GUILD_MESSAGE_TYPING = 1 << 11;
        /// direct messages
        const DIRECT_MESSAGES = 1 << 12;
        /// direct message reactions
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        /// direct message typing
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        /// message content, privileged
        const MESSAGE_CONTENT = 1 << 15;
        /// scheduled events
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
        /// auto moderation rule changes
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        /// auto moderation actions
        const AUTO_MODERATION_EXECUTION = 1 << 21;
    }
}

impl Intents {
    /// Intents that need approval
    pub const PRIVILEGED: Self = Self::GUILD_MEMBERS
        .union(Self::GUILD_PRESENCES)
        .union(Self::MESSAGE_CONTENT);

    /// Every intent that needs no approval
    pub fn non_privileged() -> Self {
        Self::all().difference(Self::PRIVILEGED)
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::non_privileged()
    }
}

// the gateway wants the raw number, not flag names
impl Serialize for Intents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(Self::from_bits_truncate)
    }
}

/// Client properties sent with identify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    /// operating system
    pub os: String,
    /// library name
    pub browser: String,
    /// library name
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// Online status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// online
    #[default]
    Online,
    /// do not disturb
    Dnd,
    /// away
    Idle,
    /// shown as offline
    Invisible,
    /// offline
    Offline,
}

/// Bot activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// activity name
    pub name: String,
    /// activity type, 0 playing, 1 streaming, 2 listening, 3 watching, 4 custom, 5 competing
    #[serde(rename = "type")]
    pub kind: u8,
    /// stream url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// custom status text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Presence of the bot user
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Presence {
    /// activities
    pub activities: Vec<Activity>,
    /// whether the client is afk
    pub afk: bool,
    /// unix time in milliseconds since the client went idle
    pub since: Option<u64>,
    /// status
    pub status: Status,
}

impl Presence {
    /// Copy to send at `now_ms`, `since` is set only while idle.
    pub fn at(&self, now_ms: u64) -> Self {
        Self {
            since: (self.status == Status::Idle).then_some(now_ms),
            ..self.clone()
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Options of every shard
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShardOptions {
    /// bot token, without the `Bot ` prefix
    pub token: String,
    /// subscribed intents
    pub intents: Intents,
    /// request zlib stream compression
    pub compress: bool,
    /// member count above which offline members are not sent, 50 to 250
    pub large_threshold: u32,
    /// total shard count
    pub max_shards: u32,
    /// client properties sent with identify
    pub connection_properties: ConnectionProperties,
    /// initial presence
    pub presence: Presence,
    /// reconnect after disconnects that do not forbid it
    pub auto_reconnect: bool,
    /// connect attempts after which a session is no longer resumed
    pub max_reconnect_attempts: u32,
    /// forget the session after `max_reconnect_attempts`
    pub invalidate_on_excess_attempts: bool,
    /// time allowed between socket creation and hello, in milliseconds
    #[serde(deserialize_with = "millis::deserialize")]
    pub connection_timeout: Duration,
    /// time to wait for the next guild create during startup, in milliseconds
    #[serde(deserialize_with = "millis::deserialize")]
    pub guild_create_timeout: Duration,
    /// default member request timeout, in milliseconds
    #[serde(deserialize_with = "millis::deserialize")]
    pub request_timeout: Duration,
    /// request every member of every guild during startup
    pub get_all_users: bool,
    /// gateway url, discovered with the bot token when absent
    pub gateway_url: Option<String>,
    /// close codes reported as debug notices instead of errors
    pub quiet_close_codes: Vec<u16>,
    /// cache store limits
    pub cache: CacheLimits,
}

impl Default for ShardOptions {
    fn default() -> Self {
        Self {
            token: String::new(),
            intents: Intents::default(),
            compress: false,
            large_threshold: 250,
            max_shards: 1,
            connection_properties: ConnectionProperties::default(),
            presence: Presence::default(),
            auto_reconnect: true,
            max_reconnect_attempts: u32::MAX,
            invalidate_on_excess_attempts: true,
            connection_timeout: Duration::from_secs(30),
            guild_create_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(15),
            get_all_users: false,
            gateway_url: None,
            quiet_close_codes: vec![1001, 1006],
            cache: CacheLimits::default(),
        }
    }
}

impl ShardOptions {
    /// Default options with a token
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }
}
