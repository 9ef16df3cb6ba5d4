use serde_json::{json, Value};

use super::{HandlerResult, Payload};
use crate::{
    cache::{reaction_key, CacheState, Entity},
    ws::{event::EventKind, shard::Shard},
};

/// Reference to an uncached message.
fn message_stub(state: &CacheState, channel_id: &str, message_id: &str) -> Value {
    json!({
        "id": message_id,
        "channel": state.channel_or_stub(channel_id),
    })
}

impl Shard {
    pub(super) fn on_message_create(&mut self, payload: Payload) -> HandlerResult {
        let channel_id = payload.str("channel_id")?;
        let message_id = payload.str("id")?;

        let message = {
            let mut state = self.cache.write();
            if let Some(author) = payload.opt_object("author") {
                state.users.update(author);
            }

            if state.channel_json(channel_id).is_some() {
                let message = state.messages.scope_mut(channel_id).update(payload.data());
                if let Some(channel) = state.channels.get_mut(channel_id) {
                    channel.record_mut().set("last_message_id", message_id);
                } else if let Some(thread) = state.threads.get_mut(channel_id) {
                    thread.record_mut().set("last_message_id", message_id);
                }
                message.to_json()
            } else {
                payload.to_json()
            }
        };

        self.emit(EventKind::MessageCreate { message });
        Ok(())
    }

    pub(super) fn on_message_update(&mut self, payload: Payload) -> HandlerResult {
        let channel_id = payload.str("channel_id")?;
        let message_id = payload.str("id")?;

        let update = {
            let mut state = self.cache.write();
            let cached_channel = state.channel_json(channel_id).is_some();
            let old = state
                .messages
                .get(channel_id, message_id)
                .map(Entity::to_json);

            if old.is_none() && payload.opt_object("author").is_none() {
                None
            } else if cached_channel {
                let message = state.messages.scope_mut(channel_id).update(payload.data());
                Some((message.to_json(), old))
            } else {
                Some((payload.to_json(), old))
            }
        };

        match update {
            Some((message, old)) => self.emit(EventKind::MessageUpdate { message, old }),
            None => self.debug(format!(
                "Got partial MESSAGE_UPDATE for uncached message {} for channel {}, discarding..",
                message_id, channel_id
            )),
        }
        Ok(())
    }

    pub(super) fn on_message_delete(&mut self, payload: Payload) -> HandlerResult {
        let channel_id = payload.str("channel_id")?;
        let message_id = payload.str("id")?;

        let message = {
            let mut state = self.cache.write();
            match state.messages.delete(channel_id, message_id) {
                Some(message) => message.to_json(),
                None => message_stub(&state, channel_id, message_id),
            }
        };
        self.emit(EventKind::MessageDelete { message });
        Ok(())
    }

    pub(super) fn on_message_delete_bulk(&mut self, payload: Payload) -> HandlerResult {
        let channel_id = payload.str("channel_id")?;

        let messages = {
            let mut state = self.cache.write();
            payload
                .strings("ids")
                .iter()
                .map(|id| match state.messages.delete(channel_id, id) {
                    Some(message) => message.to_json(),
                    None => message_stub(&state, channel_id, id),
                })
                .collect()
        };
        self.emit(EventKind::MessageDeleteBulk { messages });
        Ok(())
    }

    pub(super) fn on_message_reaction_add(&mut self, payload: Payload) -> HandlerResult {
        let channel_id = payload.str("channel_id")?;
        let message_id = payload.str("message_id")?;
        let user_id = payload.str("user_id")?;
        let emoji = payload.value("emoji");
        let key = reaction_key(&emoji);

        let (message, reactor) = {
            let mut state = self.cache.write();
            let reactor = match (payload.opt_str("guild_id"), payload.opt_object("member")) {
                (Some(guild_id), Some(member)) => {
                    state.update_member(guild_id, user_id, member).to_json()
                }
                _ => state.user_or_stub(user_id),
            };

            let me = state.is_self(user_id);
            let message = state
                .messages
                .get_mut(channel_id, message_id)
                .map(|message| {
                    message.add_reaction(key, me);
                    message.to_json()
                })
                .unwrap_or_else(|| message_stub(&state, channel_id, message_id));
            (message, reactor)
        };

        self.emit(EventKind::MessageReactionAdd {
            message,
            reactor,
            emoji,
        });
        Ok(())
    }

    pub(super) fn on_message_reaction_remove(&mut self, payload: Payload) -> HandlerResult {
        let channel_id = payload.str("channel_id")?;
        let message_id = payload.str("message_id")?;
        let user_id = payload.str("user_id")?;
        let emoji = payload.value("emoji");
        let key = reaction_key(&emoji);

        let (message, reactor) = {
            let mut state = self.cache.write();
            let me = state.is_self(user_id);
            let message = state
                .messages
                .get_mut(channel_id, message_id)
                .map(|message| {
                    message.remove_reaction(&key, me);
                    message.to_json()
                })
                .unwrap_or_else(|| message_stub(&state, channel_id, message_id));
            (message, state.user_or_stub(user_id))
        };

        self.emit(EventKind::MessageReactionRemove {
            message,
            reactor,
            emoji,
        });
        Ok(())
    }

    pub(super) fn on_message_reaction_remove_all(&mut self, payload: Payload) -> HandlerResult {
        let channel_id = payload.str("channel_id")?;
        let message_id = payload.str("message_id")?;

        let message = {
            let mut state = self.cache.write();
            state
                .messages
                .get_mut(channel_id, message_id)
                .map(|message| {
                    message.reactions.clear();
                    message.to_json()
                })
                .unwrap_or_else(|| message_stub(&state, channel_id, message_id))
        };
        self.emit(EventKind::MessageReactionRemoveAll { message });
        Ok(())
    }

    pub(super) fn on_message_reaction_remove_emoji(&mut self, payload: Payload) -> HandlerResult {
        let channel_id = payload.str("channel_id")?;
        let message_id = payload.str("message_id")?;
        let emoji = payload.value("emoji");
        let key = reaction_key(&emoji);

        let message = {
            let mut state = self.cache.write();
            state
                .messages
                .get_mut(channel_id, message_id)
                .map(|message| {
                    message.reactions.remove(&key);
                    message.to_json()
                })
                .unwrap_or_else(|| message_stub(&state, channel_id, message_id))
        };
        self.emit(EventKind::MessageReactionRemoveEmoji { message, emoji });
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use crate::{
        cache::{Entity, Reaction},
        ws::{event::EventKind, shard::test::TestShard},
    };

    fn reaction(t: &TestShard, key: &str) -> Option<Reaction> {
        t.shard
            .cache
            .read()
            .messages
            .get("c1", "m1")
            .and_then(|message| message.reactions.get(key).copied())
    }

    fn react(t: &mut TestShard, event: &str, user_id: &str) {
        t.dispatch(
            event,
            json!({
                "channel_id": "c1",
                "message_id": "m1",
                "guild_id": "g",
                "user_id": user_id,
                "emoji": {"name": "blob", "id": "42"},
            }),
        );
    }

    #[test]
    fn test_reaction_counts() {
        let mut t = TestShard::with_guild();
        t.dispatch(
            "MESSAGE_CREATE",
            json!({"id": "m1", "channel_id": "c1", "author": {"id": "u1"}, "content": "hi"}),
        );
        assert_eq!(
            t.shard.cache.read().channels.get("c1").unwrap().record().str("last_message_id"),
            Some("m1")
        );

        react(&mut t, "MESSAGE_REACTION_ADD", "u1");
        assert_eq!(reaction(&t, "blob:42"), Some(Reaction { count: 1, me: false }));

        react(&mut t, "MESSAGE_REACTION_ADD", "me");
        assert_eq!(reaction(&t, "blob:42"), Some(Reaction { count: 2, me: true }));

        react(&mut t, "MESSAGE_REACTION_REMOVE", "u1");
        assert_eq!(reaction(&t, "blob:42"), Some(Reaction { count: 1, me: true }));

        react(&mut t, "MESSAGE_REACTION_REMOVE", "me");
        assert_eq!(reaction(&t, "blob:42"), None);
    }

    #[test]
    fn test_reaction_on_uncached_message_reports_stub() {
        let mut t = TestShard::with_guild();
        react(&mut t, "MESSAGE_REACTION_ADD", "u1");

        let message = t
            .find(|kind| match kind {
                EventKind::MessageReactionAdd { message, .. } => Some(message),
                _ => None,
            })
            .unwrap();
        assert_eq!(message["id"], "m1");
        assert_eq!(message["channel"]["name"], "general");
    }

    #[test]
    fn test_partial_update_of_uncached_message_is_discarded() {
        let mut t = TestShard::with_guild();
        t.dispatch(
            "MESSAGE_UPDATE",
            json!({"id": "m404", "channel_id": "c1", "content": "edited"}),
        );

        let events = t.events();
        assert!(!events
            .iter()
            .any(|kind| matches!(kind, EventKind::MessageUpdate { .. })));
        assert!(events.iter().any(
            |kind| matches!(kind, EventKind::Debug(message) if message.contains("m404"))
        ));
    }
}
