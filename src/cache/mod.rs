//! Entity cache shared by every shard.

mod collection;
mod entity;

pub use collection::{Collection, Scoped};
pub use entity::{
    reaction_key, Channel, Entity, Member, Message, Reaction, Record, Thread, ThreadMember,
    CHANNEL_TYPE_GUILD_FORUM,
};

use std::collections::HashMap;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Size limits of the bounded stores, `None` for unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheLimits {
    /// messages kept per channel
    pub messages: Option<usize>,
    /// members kept per guild
    pub members: Option<usize>,
    /// users kept in total
    pub users: Option<usize>,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            messages: Some(100),
            members: None,
            users: None,
        }
    }
}

/// Every cached store and derived index.
///
/// Guild scoped stores are keyed by guild id, messages are keyed by channel id.
#[derive(Debug, Default)]
pub struct CacheState {
    /// available guilds
    pub guilds: Collection<Record>,
    /// guilds announced by READY or outages but not (yet) available
    pub unavailable_guilds: Collection<Record>,
    /// guild channels, threads excluded
    pub channels: Collection<Channel>,
    /// thread channels
    pub threads: Collection<Thread>,
    /// users
    pub users: Collection<Record>,
    /// members by guild
    pub members: Scoped<Member>,
    /// roles by guild
    pub roles: Scoped<Record>,
    /// voice states by guild, keyed by user id
    pub voice_states: Scoped<Record>,
    /// stage instances by guild
    pub stage_instances: Scoped<Record>,
    /// scheduled events by guild
    pub scheduled_events: Scoped<Record>,
    /// auto moderation rules by guild
    pub auto_moderation_rules: Scoped<Record>,
    /// integrations by guild
    pub integrations: Scoped<Record>,
    /// messages by channel
    pub messages: Scoped<Message>,
    /// channel id -> guild id
    pub channel_guild: HashMap<String, String>,
    /// thread id -> guild id
    pub thread_guild: HashMap<String, String>,
    /// guild id -> shard id
    pub guild_shard: HashMap<String, u32>,
    /// current user id, known after READY
    pub user_id: Option<String>,
    /// application id, known after READY
    pub application_id: Option<String>,
}

/// Shared entity cache.
#[derive(Debug, Default)]
pub struct Cache {
    state: RwLock<CacheState>,
}

impl Cache {
    /// Create an unbounded cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache with bounded stores.
    pub fn with_limits(limits: CacheLimits) -> Self {
        let state = CacheState {
            users: Collection::new(limits.users),
            members: Scoped::new(limits.members),
            messages: Scoped::new(limits.messages),
            ..Default::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }

    /// Lock for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read()
    }

    /// Lock for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write()
    }
}

const GUILD_CHILD_FIELDS: &[&str] = &[
    "channels",
    "threads",
    "members",
    "roles",
    "voice_states",
    "presences",
    "stage_instances",
    "guild_scheduled_events",
];

fn objects(value: Option<Value>) -> Vec<Map<String, Value>> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(obj) => Some(obj),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn with_guild_id(mut data: Map<String, Value>, guild_id: &str) -> Map<String, Value> {
    data.insert("guild_id".to_string(), Value::String(guild_id.to_string()));
    data
}

impl CacheState {
    /// Guild id owning a channel or thread.
    pub fn guild_of(&self, channel_id: &str) -> Option<&str> {
        self.channel_guild
            .get(channel_id)
            .or_else(|| self.thread_guild.get(channel_id))
            .map(String::as_str)
    }

    /// Snapshot of a channel or thread, `None` if neither is cached.
    pub fn channel_json(&self, id: &str) -> Option<Value> {
        self.channels
            .get(id)
            .map(Entity::to_json)
            .or_else(|| self.threads.get(id).map(Entity::to_json))
    }

    /// Snapshot of a channel or thread, an id stub if uncached.
    pub fn channel_or_stub(&self, id: &str) -> Value {
        self.channel_json(id)
            .unwrap_or_else(|| Record::stub(id).to_json())
    }

    /// Snapshot of a guild, an id stub if uncached.
    pub fn guild_or_stub(&self, id: &str) -> Value {
        self.guilds
            .get(id)
            .map(Entity::to_json)
            .unwrap_or_else(|| Record::stub(id).to_json())
    }

    /// Snapshot of a user, an id stub if uncached.
    pub fn user_or_stub(&self, id: &str) -> Value {
        self.users
            .get(id)
            .map(Entity::to_json)
            .unwrap_or_else(|| Record::stub(id).to_json())
    }

    /// Whether a user id is the current user.
    pub fn is_self(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }

    /// Insert or merge a guild member.
    ///
    /// The member is stored only when its guild is cached, the embedded user object (if any)
    /// always updates the user store.
    pub fn update_member(
        &mut self,
        guild_id: &str,
        user_id: &str,
        data: &Map<String, Value>,
    ) -> Member {
        if let Some(Value::Object(user)) = data.get("user") {
            self.users.update(user);
        }

        let mut data = with_guild_id(data.clone(), guild_id);
        data.insert("id".to_string(), Value::String(user_id.to_string()));

        if self.guilds.has(guild_id) {
            self.members.scope_mut(guild_id).update(&data)
        } else {
            Member::from_data(data)
        }
    }

    /// Store a full guild object and split its children into their own stores.
    pub fn create_guild(&mut self, mut data: Map<String, Value>, shard_id: u32) -> Record {
        let guild_id = data
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut children = HashMap::new();
        for field in GUILD_CHILD_FIELDS {
            children.insert(*field, objects(data.remove(*field)));
        }

        self.guild_shard.insert(guild_id.clone(), shard_id);
        self.unavailable_guilds.delete(&guild_id);
        let guild = self.guilds.update(&data);

        for channel in children.remove("channels").unwrap_or_default() {
            let channel = with_guild_id(channel, &guild_id);
            if let Some(id) = channel.get("id").and_then(Value::as_str) {
                self.channel_guild.insert(id.to_string(), guild_id.clone());
            }
            self.channels.update(&channel);
        }

        for thread in children.remove("threads").unwrap_or_default() {
            let thread = with_guild_id(thread, &guild_id);
            self.add_thread(&thread);
        }

        for role in children.remove("roles").unwrap_or_default() {
            self.roles
                .scope_mut(&guild_id)
                .update(&with_guild_id(role, &guild_id));
        }

        for member in children.remove("members").unwrap_or_default() {
            let user_id = member
                .get("user")
                .and_then(|user| user.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(user_id) = user_id {
                self.update_member(&guild_id, &user_id, &member);
            }
        }

        for presence in children.remove("presences").unwrap_or_default() {
            let user_id = presence
                .get("user")
                .and_then(|user| user.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(member) = user_id.and_then(|id| self.members.get_mut(&guild_id, &id)) {
                member.presence = Some(Value::Object(presence));
            }
        }

        for state in children.remove("voice_states").unwrap_or_default() {
            let state = with_guild_id(state, &guild_id);
            let user_id = state.get("user_id").and_then(Value::as_str);
            let channel_id = state.get("channel_id").and_then(Value::as_str);
            if let (Some(user_id), Some(channel_id)) = (user_id, channel_id) {
                if let Some(channel) = self.channels.get_mut(channel_id) {
                    channel.voice_members.insert(user_id.to_string());
                }
                let mut state = state.clone();
                state.insert("id".to_string(), Value::String(user_id.to_string()));
                self.voice_states.scope_mut(&guild_id).update(&state);
            }
        }

        for instance in children.remove("stage_instances").unwrap_or_default() {
            self.stage_instances
                .scope_mut(&guild_id)
                .update(&with_guild_id(instance, &guild_id));
        }

        for event in children.remove("guild_scheduled_events").unwrap_or_default() {
            self.scheduled_events
                .scope_mut(&guild_id)
                .update(&with_guild_id(event, &guild_id));
        }

        guild
    }

    /// Store a thread and link it to its parent channel.
    pub fn add_thread(&mut self, data: &Map<String, Value>) -> Thread {
        let thread = self.threads.update(data);
        if let Some(guild_id) = thread.guild_id() {
            self.thread_guild
                .insert(thread.id().to_string(), guild_id.to_string());
        }
        if let Some(parent) = thread
            .parent_id()
            .and_then(|parent_id| self.channels.get_mut(parent_id))
        {
            parent.threads.insert(thread.id().to_string());
        }
        thread
    }

    /// Remove a guild with everything it owns, returning the removed guild.
    pub fn delete_guild(&mut self, guild_id: &str) -> Option<Record> {
        self.guild_shard.remove(guild_id);
        let guild = self.guilds.delete(guild_id);

        let channels = self
            .channel_guild
            .iter()
            .filter(|(_, owner)| owner.as_str() == guild_id)
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        for id in channels {
            self.channel_guild.remove(&id);
            self.channels.delete(&id);
            self.messages.remove_scope(&id);
        }

        let threads = self
            .thread_guild
            .iter()
            .filter(|(_, owner)| owner.as_str() == guild_id)
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        for id in threads {
            self.thread_guild.remove(&id);
            self.threads.delete(&id);
            self.messages.remove_scope(&id);
        }

        self.members.remove_scope(guild_id);
        self.roles.remove_scope(guild_id);
        self.voice_states.remove_scope(guild_id);
        self.stage_instances.remove_scope(guild_id);
        self.scheduled_events.remove_scope(guild_id);
        self.auto_moderation_rules.remove_scope(guild_id);
        self.integrations.remove_scope(guild_id);

        guild
    }
}
