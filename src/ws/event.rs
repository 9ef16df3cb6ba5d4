//! Notifications raised by shards.
//!
//! Entity payloads are json snapshots taken from the cache right after the change. A value
//! that is not cached is reported as whatever the packet carried, or as an `{"id": ...}` stub
//! when the packet only referenced it. `old` snapshots are `None` when nothing was cached.

use std::{sync::Arc, task::Poll};

use futures_util::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{error::ShardError, message::Dispatch};

/// Event with the id of the shard which raised it
#[derive(Debug, Clone)]
pub struct Event {
    /// shard id
    pub shard_id: u32,
    /// event body
    pub kind: EventKind,
}

/// Event body
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub enum EventKind {
    // ===== lifecycle =====
    /// socket opened
    Connect,
    /// hello received
    Hello { heartbeat_interval: u64 },
    /// READY received, guilds are still loading
    PreReady,
    /// every guild is loaded
    Ready,
    /// session resumed
    Resumed,
    /// socket closed, with the error that caused it
    Disconnect { error: Option<Arc<ShardError>> },
    /// diagnostic message
    Debug(String),
    /// non fatal protocol violation
    Warn(String),
    /// error, the connection may or may not survive it
    Error(Arc<ShardError>),
    /// every dispatch packet before it is handled
    Packet(Dispatch),

    // ===== dispatch =====
    ApplicationCommandPermissionsUpdate { guild: Value, permissions: Value },
    AutoModerationActionExecution {
        guild: Value,
        channel: Option<Value>,
        user: Value,
        rule: Option<Value>,
        execution: Value,
    },
    AutoModerationRuleCreate { rule: Value },
    AutoModerationRuleUpdate { rule: Value, old: Option<Value> },
    AutoModerationRuleDelete { rule: Value },
    ChannelCreate { channel: Value },
    ChannelUpdate { channel: Value, old: Option<Value> },
    ChannelDelete { channel: Value },
    ChannelPinsUpdate { channel: Value, last_pin_timestamp: Option<String> },
    GuildBanAdd { guild: Value, user: Value },
    GuildBanRemove { guild: Value, user: Value },
    /// a guild joined after startup
    GuildCreate { guild: Value },
    /// a previously unavailable guild became available after startup
    GuildAvailable { guild: Value },
    UnavailableGuildCreate { guild: Value },
    GuildDelete { guild: Value },
    GuildUnavailable { guild: Value },
    GuildUpdate { guild: Value, old: Option<Value> },
    GuildEmojisUpdate { guild: Value, emojis: Value, old: Option<Value> },
    GuildStickersUpdate { guild: Value, stickers: Value, old: Option<Value> },
    GuildIntegrationsUpdate { guild: Value },
    GuildMemberAdd { member: Value },
    GuildMemberUpdate { member: Value, old: Option<Value> },
    /// `member` is the cached member when known, the user otherwise
    GuildMemberRemove { member: Value, guild: Value },
    GuildMemberChunk { guild_id: String, members: Vec<Value> },
    GuildRoleCreate { role: Value },
    GuildRoleUpdate { role: Value, old: Option<Value> },
    GuildRoleDelete { role: Value },
    GuildScheduledEventCreate { event: Value },
    GuildScheduledEventUpdate { event: Value, old: Option<Value> },
    GuildScheduledEventDelete { event: Value },
    GuildScheduledEventUserAdd { event: Value, user: Value },
    GuildScheduledEventUserRemove { event: Value, user: Value },
    IntegrationCreate { guild: Value, integration: Value },
    IntegrationUpdate { guild: Value, integration: Value, old: Option<Value> },
    IntegrationDelete { guild: Value, integration: Value },
    InteractionCreate { interaction: Value },
    InviteCreate { guild: Option<Value>, channel: Value, invite: Value },
    InviteDelete { guild: Option<Value>, channel: Value, code: String },
    MessageCreate { message: Value },
    MessageUpdate { message: Value, old: Option<Value> },
    MessageDelete { message: Value },
    MessageDeleteBulk { messages: Vec<Value> },
    MessageReactionAdd { message: Value, reactor: Value, emoji: Value },
    MessageReactionRemove { message: Value, reactor: Value, emoji: Value },
    MessageReactionRemoveAll { message: Value },
    MessageReactionRemoveEmoji { message: Value, emoji: Value },
    PresenceUpdate {
        guild: Value,
        member: Value,
        presence: Value,
        old: Option<Value>,
    },
    StageInstanceCreate { instance: Value },
    StageInstanceUpdate { instance: Value, old: Option<Value> },
    StageInstanceDelete { instance: Value },
    ThreadCreate { thread: Value },
    ThreadUpdate { thread: Value, old: Option<Value> },
    ThreadDelete { thread: Value },
    ThreadListSync { guild: Value, threads: Vec<Value> },
    ThreadMemberUpdate { thread: Value, member: Value, old: Option<Value> },
    ThreadMembersUpdate {
        thread: Value,
        added: Vec<Value>,
        removed: Vec<Value>,
    },
    /// `member` is set for guild channels
    TypingStart {
        channel: Value,
        user: Value,
        member: Option<Value>,
        timestamp: u64,
    },
    UserUpdate { user: Value, old: Option<Value> },
    VoiceChannelJoin { member: Value, channel: Value },
    VoiceChannelLeave { member: Value, channel: Value },
    VoiceChannelSwitch {
        member: Value,
        channel: Value,
        old_channel: Value,
    },
    VoiceStateUpdate { member: Value, old: Option<Value> },
    VoiceServerUpdate { data: Value },
    WebhooksUpdate { guild: Value, channel: Value },
}

/// Sending side of the event channel, bound to one shard
#[derive(Debug, Clone)]
pub struct EventSender {
    shard_id: u32,
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    /// Sender tagging every event with `shard_id`
    pub fn new(shard_id: u32, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { shard_id, tx }
    }

    /// Emit an event, returns false if every receiver is gone
    pub fn emit(&self, kind: EventKind) -> bool {
        let sent = self
            .tx
            .send(Event {
                shard_id: self.shard_id,
                kind,
            })
            .is_ok();
        if !sent {
            log::trace!("Event receiver of shard {} dropped", self.shard_id);
        }
        sent
    }
}

/// Stream of events of every shard
#[derive(Debug)]
pub struct EventStream {
    pub(crate) rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Create a channel pair
    pub fn channel() -> (mpsc::UnboundedSender<Event>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
