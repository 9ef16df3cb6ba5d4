//! Cached entity types.
//!
//! Every entity is backed by the raw wire object ([`Record`]), partial updates merge only the
//! fields they carry. Entities the gateway engine keeps extra bookkeeping for wrap a record.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Channel type of a forum channel.
pub const CHANNEL_TYPE_GUILD_FORUM: u64 = 15;

/// Common behavior of cached entities.
pub trait Entity: Clone {
    /// Construct from a raw wire object.
    fn from_data(data: Map<String, Value>) -> Self;

    /// Raw wire fields.
    fn record(&self) -> &Record;

    /// Mutable raw wire fields.
    fn record_mut(&mut self) -> &mut Record;

    /// Entity id.
    fn id(&self) -> &str {
        self.record().id()
    }

    /// Merge a partial wire object into this entity.
    fn update(&mut self, patch: &Map<String, Value>) {
        self.record_mut().update(patch)
    }

    /// Shallow serialized copy.
    fn to_json(&self) -> Value {
        self.record().to_json()
    }
}

/// A raw wire object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    data: Map<String, Value>,
}

impl Record {
    /// Wrap a wire object.
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data }
    }

    /// A stub carrying only an id, used for entities that were never seen.
    pub fn stub(id: &str) -> Self {
        let mut data = Map::new();
        data.insert("id".to_string(), Value::String(id.to_string()));
        Self { data }
    }

    /// `id` field, empty if absent.
    pub fn id(&self) -> &str {
        self.str("id").unwrap_or_default()
    }

    /// Raw field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// String field.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Unsigned number field.
    pub fn u64(&self, key: &str) -> Option<u64> {
        self.data.get(key).and_then(Value::as_u64)
    }

    /// Overwrite a single field.
    pub fn set<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.data.insert(key.to_string(), value.into());
    }

    /// Remove a single field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Merge fields present in `patch`, fields absent from it are kept.
    pub fn update(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            self.data.insert(key.clone(), value.clone());
        }
    }

    /// Shallow serialized copy.
    pub fn to_json(&self) -> Value {
        Value::Object(self.data.clone())
    }
}

impl Entity for Record {
    fn from_data(data: Map<String, Value>) -> Self {
        Self::new(data)
    }

    fn record(&self) -> &Record {
        self
    }

    fn record_mut(&mut self) -> &mut Record {
        self
    }
}

/// Guild channel (threads excluded).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Channel {
    record: Record,
    /// ids of threads whose parent is this channel
    pub threads: BTreeSet<String>,
    /// ids of members connected to this voice/stage channel
    pub voice_members: BTreeSet<String>,
    /// newest thread of a forum channel
    pub last_thread_id: Option<String>,
}

impl Channel {
    /// Channel type number.
    pub fn kind(&self) -> Option<u64> {
        self.record.u64("type")
    }

    /// Owning guild id.
    pub fn guild_id(&self) -> Option<&str> {
        self.record.str("guild_id")
    }

    /// Whether this is a forum channel.
    pub fn is_forum(&self) -> bool {
        self.kind() == Some(CHANNEL_TYPE_GUILD_FORUM)
    }
}

impl Entity for Channel {
    fn from_data(data: Map<String, Value>) -> Self {
        Self {
            record: Record::new(data),
            ..Default::default()
        }
    }

    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    fn to_json(&self) -> Value {
        let mut value = self.record.to_json();
        if let (Some(obj), Some(last)) = (value.as_object_mut(), &self.last_thread_id) {
            obj.insert("last_thread_id".to_string(), Value::String(last.clone()));
        }
        value
    }
}

/// Member of a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMember {
    /// thread id
    #[serde(default)]
    pub id: Option<String>,
    /// member user id
    #[serde(default)]
    pub user_id: Option<String>,
    /// join time, ISO8601
    #[serde(default)]
    pub join_timestamp: Option<String>,
    /// member flags
    #[serde(default)]
    pub flags: u64,
}

/// Thread channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Thread {
    record: Record,
    /// known thread members
    pub members: Vec<ThreadMember>,
}

impl Thread {
    /// Parent channel id.
    pub fn parent_id(&self) -> Option<&str> {
        self.record.str("parent_id")
    }

    /// Owning guild id.
    pub fn guild_id(&self) -> Option<&str> {
        self.record.str("guild_id")
    }
}

impl Entity for Thread {
    fn from_data(data: Map<String, Value>) -> Self {
        Self {
            record: Record::new(data),
            members: Vec::new(),
        }
    }

    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }
}

/// Reaction counter of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    /// how many users reacted
    pub count: u64,
    /// whether the current user reacted
    pub me: bool,
}

/// Key used for reactions: `name:id` for custom emojis, the name itself for unicode ones.
pub fn reaction_key(emoji: &Value) -> String {
    let name = emoji.get("name").and_then(Value::as_str).unwrap_or_default();
    match emoji.get("id").and_then(Value::as_str) {
        Some(id) => format!("{}:{}", name, id),
        None => name.to_string(),
    }
}

/// Channel message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    record: Record,
    /// reactions by [`reaction_key`]
    pub reactions: HashMap<String, Reaction>,
}

impl Message {
    /// Count one reaction, creating the entry on first use.
    pub fn add_reaction(&mut self, key: String, me: bool) {
        let reaction = self
            .reactions
            .entry(key)
            .or_insert(Reaction { count: 0, me: false });
        reaction.count += 1;
        reaction.me |= me;
    }

    /// Uncount one reaction, removing the entry once it reaches zero.
    pub fn remove_reaction(&mut self, key: &str, me: bool) {
        if let Some(reaction) = self.reactions.get_mut(key) {
            reaction.count = reaction.count.saturating_sub(1);
            if me {
                reaction.me = false;
            }
            if reaction.count == 0 {
                self.reactions.remove(key);
            }
        }
    }
}

impl Entity for Message {
    fn from_data(mut data: Map<String, Value>) -> Self {
        let mut reactions = HashMap::new();
        if let Some(Value::Array(list)) = data.remove("reactions") {
            for item in list {
                let key = reaction_key(item.get("emoji").unwrap_or(&Value::Null));
                let count = item.get("count").and_then(Value::as_u64).unwrap_or_default();
                let me = item.get("me").and_then(Value::as_bool).unwrap_or_default();
                if count > 0 {
                    reactions.insert(key, Reaction { count, me });
                }
            }
        }
        Self {
            record: Record::new(data),
            reactions,
        }
    }

    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    fn update(&mut self, patch: &Map<String, Value>) {
        let mut patch = patch.clone();
        if patch.contains_key("reactions") {
            let parsed = Message::from_data(patch.clone());
            self.reactions = parsed.reactions;
            patch.remove("reactions");
        }
        self.record.update(&patch);
    }

    fn to_json(&self) -> Value {
        let mut value = self.record.to_json();
        if let Some(obj) = value.as_object_mut() {
            let reactions = self
                .reactions
                .iter()
                .map(|(key, reaction)| {
                    (
                        key.clone(),
                        serde_json::to_value(reaction).unwrap_or(Value::Null),
                    )
                })
                .collect::<Map<_, _>>();
            obj.insert("reactions".to_string(), Value::Object(reactions));
        }
        value
    }
}

/// Guild member, keyed by user id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Member {
    record: Record,
    /// last received presence
    pub presence: Option<Value>,
}

impl Member {
    /// Owning guild id.
    pub fn guild_id(&self) -> Option<&str> {
        self.record.str("guild_id")
    }
}

impl Entity for Member {
    fn from_data(mut data: Map<String, Value>) -> Self {
        if !data.contains_key("id") {
            if let Some(id) = data
                .get("user")
                .and_then(|user| user.get("id"))
                .cloned()
            {
                data.insert("id".to_string(), id);
            }
        }
        Self {
            record: Record::new(data),
            presence: None,
        }
    }

    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    fn to_json(&self) -> Value {
        let mut value = self.record.to_json();
        if let (Some(obj), Some(presence)) = (value.as_object_mut(), &self.presence) {
            obj.insert("presence".to_string(), presence.clone());
        }
        value
    }
}
