//! Dispatch translator: turns dispatch packets into cache mutations and events.
//!
//! Every dispatch first raises [`EventKind::Packet`], then runs exactly one handler picked by
//! [`DispatchKind`]. Handlers lock the cache once for the whole event and never hold the lock
//! while calling back into the shard state machine.

mod channel;
mod guild;
mod member;
mod message;
mod misc;
mod session;
mod thread;
mod voice;

use std::sync::Arc;

use serde_json::{Map, Value};
use snafu::prelude::*;

use super::{
    error::ShardError,
    event::EventKind,
    message::Dispatch,
    shard::Shard,
};

/// A dispatch handler failed
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum DispatchError {
    /// the event body is not an object
    #[snafu(display("{event} body is not an object"))]
    NotObject {
        /// event name
        event: &'static str,
    },

    /// a required field is missing or has the wrong type
    #[snafu(display("{event} is missing field {field}"))]
    MissingField {
        /// event name
        event: &'static str,
        /// field path
        field: &'static str,
    },
}

macro_rules! dispatch_kinds {
    ($($variant:ident => $name:literal,)+) => {
        /// Every dispatch event name the translator handles
        #[allow(missing_docs)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum DispatchKind {
            $($variant,)+
        }

        impl DispatchKind {
            /// Kind of a wire event name, `None` if unknown.
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Wire event name.
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }
    };
}

dispatch_kinds! {
    ApplicationCommandPermissionsUpdate => "APPLICATION_COMMAND_PERMISSIONS_UPDATE",
    AutoModerationActionExecution => "AUTO_MODERATION_ACTION_EXECUTION",
    AutoModerationRuleCreate => "AUTO_MODERATION_RULE_CREATE",
    AutoModerationRuleUpdate => "AUTO_MODERATION_RULE_UPDATE",
    AutoModerationRuleDelete => "AUTO_MODERATION_RULE_DELETE",
    ChannelCreate => "CHANNEL_CREATE",
    ChannelUpdate => "CHANNEL_UPDATE",
    ChannelDelete => "CHANNEL_DELETE",
    ChannelPinsUpdate => "CHANNEL_PINS_UPDATE",
    GuildBanAdd => "GUILD_BAN_ADD",
    GuildBanRemove => "GUILD_BAN_REMOVE",
    GuildCreate => "GUILD_CREATE",
    GuildDelete => "GUILD_DELETE",
    GuildUpdate => "GUILD_UPDATE",
    GuildEmojisUpdate => "GUILD_EMOJIS_UPDATE",
    GuildStickersUpdate => "GUILD_STICKERS_UPDATE",
    GuildIntegrationsUpdate => "GUILD_INTEGRATIONS_UPDATE",
    GuildMemberAdd => "GUILD_MEMBER_ADD",
    GuildMemberUpdate => "GUILD_MEMBER_UPDATE",
    GuildMemberRemove => "GUILD_MEMBER_REMOVE",
    GuildMembersChunk => "GUILD_MEMBERS_CHUNK",
    GuildRoleCreate => "GUILD_ROLE_CREATE",
    GuildRoleUpdate => "GUILD_ROLE_UPDATE",
    GuildRoleDelete => "GUILD_ROLE_DELETE",
    GuildScheduledEventCreate => "GUILD_SCHEDULED_EVENT_CREATE",
    GuildScheduledEventUpdate => "GUILD_SCHEDULED_EVENT_UPDATE",
    GuildScheduledEventDelete => "GUILD_SCHEDULED_EVENT_DELETE",
    GuildScheduledEventUserAdd => "GUILD_SCHEDULED_EVENT_USER_ADD",
    GuildScheduledEventUserRemove => "GUILD_SCHEDULED_EVENT_USER_REMOVE",
    IntegrationCreate => "INTEGRATION_CREATE",
    IntegrationUpdate => "INTEGRATION_UPDATE",
    IntegrationDelete => "INTEGRATION_DELETE",
    InteractionCreate => "INTERACTION_CREATE",
    InviteCreate => "INVITE_CREATE",
    InviteDelete => "INVITE_DELETE",
    MessageCreate => "MESSAGE_CREATE",
    MessageUpdate => "MESSAGE_UPDATE",
    MessageDelete => "MESSAGE_DELETE",
    MessageDeleteBulk => "MESSAGE_DELETE_BULK",
    MessageReactionAdd => "MESSAGE_REACTION_ADD",
    MessageReactionRemove => "MESSAGE_REACTION_REMOVE",
    MessageReactionRemoveAll => "MESSAGE_REACTION_REMOVE_ALL",
    MessageReactionRemoveEmoji => "MESSAGE_REACTION_REMOVE_EMOJI",
    PresenceUpdate => "PRESENCE_UPDATE",
    Ready => "READY",
    Resumed => "RESUMED",
    StageInstanceCreate => "STAGE_INSTANCE_CREATE",
    StageInstanceUpdate => "STAGE_INSTANCE_UPDATE",
    StageInstanceDelete => "STAGE_INSTANCE_DELETE",
    ThreadCreate => "THREAD_CREATE",
    ThreadUpdate => "THREAD_UPDATE",
    ThreadDelete => "THREAD_DELETE",
    ThreadListSync => "THREAD_LIST_SYNC",
    ThreadMemberUpdate => "THREAD_MEMBER_UPDATE",
    ThreadMembersUpdate => "THREAD_MEMBERS_UPDATE",
    TypingStart => "TYPING_START",
    UserUpdate => "USER_UPDATE",
    VoiceStateUpdate => "VOICE_STATE_UPDATE",
    VoiceServerUpdate => "VOICE_SERVER_UPDATE",
    WebhooksUpdate => "WEBHOOKS_UPDATE",
}

/// Body of one dispatch with typed field access.
#[derive(Debug)]
pub(crate) struct Payload {
    event: &'static str,
    data: Map<String, Value>,
}

impl Payload {
    fn new(kind: DispatchKind, data: Value) -> Result<Self, DispatchError> {
        let event = kind.name();
        match data {
            Value::Object(data) => Ok(Self { event, data }),
            _ => error::NotObject { event }.fail(),
        }
    }

    /// Required string field.
    pub fn str(&self, field: &'static str) -> Result<&str, DispatchError> {
        self.opt_str(field).context(error::MissingField {
            event: self.event,
            field,
        })
    }

    /// Optional string field, `null` counts as absent.
    pub fn opt_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    /// Required object field.
    pub fn object(&self, field: &'static str) -> Result<&Map<String, Value>, DispatchError> {
        self.opt_object(field).context(error::MissingField {
            event: self.event,
            field,
        })
    }

    /// Optional object field.
    pub fn opt_object(&self, field: &str) -> Option<&Map<String, Value>> {
        self.data.get(field).and_then(Value::as_object)
    }

    /// Required `id` of a nested object field, such as `user.id`.
    pub fn nested_id(
        &self,
        field: &'static str,
        path: &'static str,
    ) -> Result<&str, DispatchError> {
        self.opt_object(field)
            .and_then(|obj| obj.get("id"))
            .and_then(Value::as_str)
            .context(error::MissingField {
                event: self.event,
                field: path,
            })
    }

    /// Raw field, `Value::Null` if absent.
    pub fn value(&self, field: &str) -> Value {
        self.data.get(field).cloned().unwrap_or(Value::Null)
    }

    /// Array field as objects, empty if absent.
    pub fn objects(&self, field: &str) -> Vec<Map<String, Value>> {
        self.data
            .get(field)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_object().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Array field as strings, empty if absent.
    pub fn strings(&self, field: &str) -> Vec<String> {
        self.data
            .get(field)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whole body.
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Whole body as a json value.
    pub fn to_json(&self) -> Value {
        Value::Object(self.data.clone())
    }
}

/// `{"id": ...}` reference to an entity that is not cached.
pub(crate) fn stub(id: &str) -> Value {
    serde_json::json!({ "id": id })
}

type HandlerResult = Result<(), DispatchError>;

impl Shard {
    pub(crate) fn on_dispatch(&mut self, dispatch: Dispatch) {
        let Dispatch { name, data } = dispatch;
        self.emit(EventKind::Packet(Dispatch {
            name: name.clone(),
            data: data.clone(),
        }));

        let kind = match DispatchKind::from_name(&name) {
            Some(kind) => kind,
            None => {
                self.debug(format!("Unknown dispatch event {}", name));
                return;
            }
        };

        log::trace!("[shard {}] Handle {}", self.id, name);

        let result = Payload::new(kind, data).and_then(|payload| self.handle(kind, payload));
        if let Err(source) = result {
            self.report(Arc::new(ShardError::Dispatch { source }));
        }
    }

    fn handle(&mut self, kind: DispatchKind, payload: Payload) -> HandlerResult {
        use DispatchKind::*;

        match kind {
            ApplicationCommandPermissionsUpdate => {
                self.on_application_command_permissions_update(payload)
            }
            AutoModerationActionExecution => self.on_auto_moderation_action_execution(payload),
            AutoModerationRuleCreate => self.on_auto_moderation_rule_create(payload),
            AutoModerationRuleUpdate => self.on_auto_moderation_rule_update(payload),
            AutoModerationRuleDelete => self.on_auto_moderation_rule_delete(payload),
            ChannelCreate => self.on_channel_create(payload),
            ChannelUpdate => self.on_channel_update(payload),
            ChannelDelete => self.on_channel_delete(payload),
            ChannelPinsUpdate => self.on_channel_pins_update(payload),
            GuildBanAdd => self.on_guild_ban(payload, true),
            GuildBanRemove => self.on_guild_ban(payload, false),
            GuildCreate => self.on_guild_create(payload),
            GuildDelete => self.on_guild_delete(payload),
            GuildUpdate => self.on_guild_update(payload),
            GuildEmojisUpdate => self.on_guild_emojis_update(payload),
            GuildStickersUpdate => self.on_guild_stickers_update(payload),
            GuildIntegrationsUpdate => self.on_guild_integrations_update(payload),
            GuildMemberAdd => self.on_guild_member_add(payload),
            GuildMemberUpdate => self.on_guild_member_update(payload),
            GuildMemberRemove => self.on_guild_member_remove(payload),
            GuildMembersChunk => self.on_guild_members_chunk(payload),
            GuildRoleCreate => self.on_guild_role_create(payload),
            GuildRoleUpdate => self.on_guild_role_update(payload),
            GuildRoleDelete => self.on_guild_role_delete(payload),
            GuildScheduledEventCreate => self.on_scheduled_event_create(payload),
            GuildScheduledEventUpdate => self.on_scheduled_event_update(payload),
            GuildScheduledEventDelete => self.on_scheduled_event_delete(payload),
            GuildScheduledEventUserAdd => self.on_scheduled_event_user(payload, true),
            GuildScheduledEventUserRemove => self.on_scheduled_event_user(payload, false),
            IntegrationCreate => self.on_integration_create(payload),
            IntegrationUpdate => self.on_integration_update(payload),
            IntegrationDelete => self.on_integration_delete(payload),
            InteractionCreate => self.on_interaction_create(payload),
            InviteCreate => self.on_invite_create(payload),
            InviteDelete => self.on_invite_delete(payload),
            MessageCreate => self.on_message_create(payload),
            MessageUpdate => self.on_message_update(payload),
            MessageDelete => self.on_message_delete(payload),
            MessageDeleteBulk => self.on_message_delete_bulk(payload),
            MessageReactionAdd => self.on_message_reaction_add(payload),
            MessageReactionRemove => self.on_message_reaction_remove(payload),
            MessageReactionRemoveAll => self.on_message_reaction_remove_all(payload),
            MessageReactionRemoveEmoji => self.on_message_reaction_remove_emoji(payload),
            PresenceUpdate => self.on_presence_update(payload),
            Ready => self.on_ready(payload),
            Resumed => self.on_resumed(payload),
            StageInstanceCreate => self.on_stage_instance_create(payload),
            StageInstanceUpdate => self.on_stage_instance_update(payload),
            StageInstanceDelete => self.on_stage_instance_delete(payload),
            ThreadCreate => self.on_thread_create(payload),
            ThreadUpdate => self.on_thread_update(payload),
            ThreadDelete => self.on_thread_delete(payload),
            ThreadListSync => self.on_thread_list_sync(payload),
            ThreadMemberUpdate => self.on_thread_member_update(payload),
            ThreadMembersUpdate => self.on_thread_members_update(payload),
            TypingStart => self.on_typing_start(payload),
            UserUpdate => self.on_user_update(payload),
            VoiceStateUpdate => self.on_voice_state_update(payload),
            VoiceServerUpdate => self.on_voice_server_update(payload),
            WebhooksUpdate => self.on_webhooks_update(payload),
        }
    }
}
