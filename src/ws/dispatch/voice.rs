use serde_json::Value;

use super::{stub, HandlerResult, Payload};
use crate::{
    cache::{Entity, Record},
    ws::{event::EventKind, shard::Shard},
};

impl Shard {
    pub(super) fn on_voice_state_update(&mut self, payload: Payload) -> HandlerResult {
        let guild_id = match payload.opt_str("guild_id") {
            Some(guild_id) => guild_id,
            None => {
                log::trace!("[shard {}] Ignore voice state without guild", self.id);
                return Ok(());
            }
        };
        let user_id = payload.str("user_id")?;
        let channel_id = payload.opt_str("channel_id");

        let mut data = payload.data().clone();
        data.insert("id".to_string(), Value::String(user_id.to_string()));
        data.entry("self_stream").or_insert(Value::Bool(false));
        data.remove("member");

        let events = {
            let mut state = self.cache.write();

            if let Some(member) = payload.opt_object("member") {
                state.update_member(guild_id, user_id, member);
            }

            let old = state.voice_states.get(guild_id, user_id).map(Entity::to_json);
            let current = if state.guilds.has(guild_id) {
                state.voice_states.scope_mut(guild_id).update(&data)
            } else {
                Record::new(data)
            };

            if let Some(member) = state.members.get_mut(guild_id, user_id) {
                let record = member.record_mut();
                record.set("deaf", current.get("deaf").cloned().unwrap_or(Value::Bool(false)));
                record.set("mute", current.get("mute").cloned().unwrap_or(Value::Bool(false)));
            }
            let member = state
                .members
                .get(guild_id, user_id)
                .map(Entity::to_json)
                .unwrap_or_else(|| stub(user_id));

            let old_channel = old
                .as_ref()
                .and_then(|old| old.get("channel_id"))
                .and_then(Value::as_str)
                .map(str::to_string);

            let mut events = Vec::new();
            if old_channel.as_deref() != channel_id {
                if let Some(channel) = old_channel
                    .as_deref()
                    .and_then(|id| state.channels.get_mut(id))
                {
                    channel.voice_members.remove(user_id);
                }
                if let Some(channel) = channel_id.and_then(|id| state.channels.get_mut(id)) {
                    channel.voice_members.insert(user_id.to_string());
                }

                let old_channel = old_channel.map(|id| state.channel_or_stub(&id));
                let new_channel = channel_id.map(|id| state.channel_or_stub(id));
                match (new_channel, old_channel) {
                    (Some(channel), Some(old_channel)) => {
                        events.push(EventKind::VoiceChannelSwitch {
                            member: member.clone(),
                            channel,
                            old_channel,
                        })
                    }
                    (Some(channel), None) => events.push(EventKind::VoiceChannelJoin {
                        member: member.clone(),
                        channel,
                    }),
                    (None, Some(channel)) => events.push(EventKind::VoiceChannelLeave {
                        member: member.clone(),
                        channel,
                    }),
                    (None, None) => {}
                }
            }

            if old.as_ref() != Some(&current.to_json()) {
                events.push(EventKind::VoiceStateUpdate { member, old });
            }
            events
        };

        for event in events {
            self.emit(event);
        }
        Ok(())
    }

    pub(super) fn on_voice_server_update(&mut self, payload: Payload) -> HandlerResult {
        self.emit(EventKind::VoiceServerUpdate {
            data: payload.to_json(),
        });
        Ok(())
    }
}
