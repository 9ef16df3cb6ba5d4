use serde_json::Value;

use super::{DispatchError, HandlerResult, Payload};
use crate::{
    cache::Entity,
    ws::{event::EventKind, shard::Shard},
};

impl Shard {
    pub(super) fn on_channel_create(&mut self, payload: Payload) -> HandlerResult {
        let channel = self.upsert_channel(&payload)?.0;
        self.emit(EventKind::ChannelCreate { channel });
        Ok(())
    }

    pub(super) fn on_channel_update(&mut self, payload: Payload) -> HandlerResult {
        let (channel, old) = self.upsert_channel(&payload)?;
        self.emit(EventKind::ChannelUpdate { channel, old });
        Ok(())
    }

    /// Store a channel of a guild channel event, returns `(channel, old)`.
    fn upsert_channel(
        &self,
        payload: &Payload,
    ) -> Result<(Value, Option<Value>), DispatchError> {
        let channel_id = payload.str("id")?;
        let guild_id = payload.opt_str("guild_id");

        let mut state = self.cache.write();
        match guild_id.filter(|guild_id| state.guilds.has(guild_id)) {
            Some(guild_id) => {
                let old = state.channels.get(channel_id).map(Entity::to_json);
                state
                    .channel_guild
                    .insert(channel_id.to_string(), guild_id.to_string());
                let channel = state.channels.update(payload.data()).to_json();
                Ok((channel, old))
            }
            None => Ok((payload.to_json(), None)),
        }
    }

    pub(super) fn on_channel_delete(&mut self, payload: Payload) -> HandlerResult {
        let channel_id = payload.str("id")?;
        let guild_id = payload.opt_str("guild_id").unwrap_or_default();

        let (channel, leaves) = {
            let mut state = self.cache.write();
            state.channel_guild.remove(channel_id);
            state.messages.remove_scope(channel_id);
            match state.channels.delete(channel_id) {
                Some(removed) => {
                    let channel = removed.to_json();
                    let leaves = removed
                        .voice_members
                        .iter()
                        .map(|user_id| {
                            let member = state
                                .members
                                .get(guild_id, user_id)
                                .map(Entity::to_json)
                                .unwrap_or_else(|| state.user_or_stub(user_id));
                            EventKind::VoiceChannelLeave {
                                member,
                                channel: channel.clone(),
                            }
                        })
                        .collect::<Vec<_>>();
                    (channel, leaves)
                }
                None => (payload.to_json(), Vec::new()),
            }
        };

        for leave in leaves {
            self.emit(leave);
        }
        self.emit(EventKind::ChannelDelete { channel });
        Ok(())
    }

    pub(super) fn on_channel_pins_update(&mut self, payload: Payload) -> HandlerResult {
        let channel = self.cache.read().channel_or_stub(payload.str("channel_id")?);
        self.emit(EventKind::ChannelPinsUpdate {
            channel,
            last_pin_timestamp: payload.opt_str("last_pin_timestamp").map(str::to_string),
        });
        Ok(())
    }

    pub(super) fn on_typing_start(&mut self, payload: Payload) -> HandlerResult {
        let channel_id = payload.str("channel_id")?;
        let user_id = payload.str("user_id")?;
        let timestamp = payload
            .data()
            .get("timestamp")
            .and_then(Value::as_u64)
            .unwrap_or_default();

        let (channel, user, member) = {
            let mut state = self.cache.write();
            let member = match (payload.opt_str("guild_id"), payload.opt_object("member")) {
                (Some(guild_id), Some(member)) => {
                    Some(state.update_member(guild_id, user_id, member).to_json())
                }
                _ => None,
            };
            (
                state.channel_or_stub(channel_id),
                state.user_or_stub(user_id),
                member,
            )
        };

        self.emit(EventKind::TypingStart {
            channel,
            user,
            member,
            timestamp,
        });
        Ok(())
    }

    pub(super) fn on_webhooks_update(&mut self, payload: Payload) -> HandlerResult {
        let guild_id = payload.str("guild_id")?;
        let channel_id = payload.str("channel_id")?;
        let (guild, channel) = {
            let state = self.cache.read();
            (state.guild_or_stub(guild_id), state.channel_or_stub(channel_id))
        };
        self.emit(EventKind::WebhooksUpdate { guild, channel });
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use crate::{
        cache::Entity,
        ws::{event::EventKind, shard::test::TestShard},
    };

    #[test]
    fn test_channel_update_reports_old_snapshot() {
        let mut t = TestShard::with_guild();
        t.dispatch(
            "CHANNEL_UPDATE",
            json!({"id": "c1", "guild_id": "g", "type": 0, "name": "renamed"}),
        );

        let (channel, old) = t
            .find(|kind| match kind {
                EventKind::ChannelUpdate { channel, old } => Some((channel, old)),
                _ => None,
            })
            .unwrap();
        assert_eq!(channel["name"], "renamed");
        assert_eq!(old.unwrap()["name"], "general");
        assert_eq!(
            t.shard.cache.read().channels.get("c1").unwrap().record().get("name"),
            Some(&json!("renamed"))
        );
    }

    #[test]
    fn test_channel_update_of_uncached_guild_has_no_old() {
        let mut t = TestShard::new();
        t.dispatch("CHANNEL_UPDATE", json!({"id": "c9", "guild_id": "nope", "name": "x"}));

        let (channel, old) = t
            .find(|kind| match kind {
                EventKind::ChannelUpdate { channel, old } => Some((channel, old)),
                _ => None,
            })
            .unwrap();
        assert_eq!(channel["id"], "c9");
        assert!(old.is_none());
        assert!(!t.shard.cache.read().channels.has("c9"));
    }

    #[test]
    fn test_channel_delete_empties_voice_roster() {
        let mut t = TestShard::with_guild();
        t.dispatch("CHANNEL_DELETE", json!({"id": "v1", "guild_id": "g", "type": 2}));

        let leaves = t
            .events()
            .into_iter()
            .filter(|kind| matches!(kind, EventKind::VoiceChannelLeave { .. }))
            .count();
        assert_eq!(leaves, 1);
        let state = t.shard.cache.read();
        assert!(!state.channels.has("v1"));
        assert_eq!(state.guild_of("v1"), None);
    }
}
