use serde_json::{Map, Value};

use super::{stub, HandlerResult, Payload};
use crate::{
    cache::{CacheState, Entity},
    ws::{event::EventKind, shard::Shard},
};

/// Apply `delta` to the cached guild member count.
fn adjust_member_count(state: &mut CacheState, guild_id: &str, delta: i64) {
    if let Some(guild) = state.guilds.get_mut(guild_id) {
        let count = guild.u64("member_count").unwrap_or_default() as i64;
        guild.set("member_count", (count + delta).max(0));
    }
}

fn user_id_of(object: &Map<String, Value>) -> Option<&str> {
    object
        .get("user")
        .and_then(|user| user.get("id"))
        .and_then(Value::as_str)
}

impl Shard {
    pub(super) fn on_guild_member_add(&mut self, payload: Payload) -> HandlerResult {
        let guild_id = payload.str("guild_id")?;
        let user_id = payload.nested_id("user", "user.id")?;

        let member = {
            let mut state = self.cache.write();
            let member = state.update_member(guild_id, user_id, payload.data());
            adjust_member_count(&mut state, guild_id, 1);
            member.to_json()
        };
        self.emit(EventKind::GuildMemberAdd { member });
        Ok(())
    }

    pub(super) fn on_guild_member_update(&mut self, payload: Payload) -> HandlerResult {
        let guild_id = payload.str("guild_id")?;
        let user_id = payload.nested_id("user", "user.id")?;

        let mut data = payload.data().clone();
        data.entry("deaf").or_insert(Value::Bool(false));
        data.entry("mute").or_insert(Value::Bool(false));

        let (member, old) = {
            let mut state = self.cache.write();
            let old = state.members.get(guild_id, user_id).map(Entity::to_json);
            (state.update_member(guild_id, user_id, &data).to_json(), old)
        };
        self.emit(EventKind::GuildMemberUpdate { member, old });
        Ok(())
    }

    pub(super) fn on_guild_member_remove(&mut self, payload: Payload) -> HandlerResult {
        let guild_id = payload.str("guild_id")?;
        let user_id = payload.nested_id("user", "user.id")?;
        let user = payload.object("user")?;

        let removed = {
            let mut state = self.cache.write();
            if state.is_self(user_id) {
                None
            } else {
                adjust_member_count(&mut state, guild_id, -1);
                let member = match state.members.delete(guild_id, user_id) {
                    Some(mut member) => {
                        let mut patch = Map::new();
                        patch.insert("user".to_string(), Value::Object(user.clone()));
                        member.update(&patch);
                        state.users.update(user);
                        member.to_json()
                    }
                    None => state.users.update(user).to_json(),
                };
                Some((member, state.guild_or_stub(guild_id)))
            }
        };

        if let Some((member, guild)) = removed {
            self.emit(EventKind::GuildMemberRemove { member, guild });
        }
        Ok(())
    }

    pub(super) fn on_guild_members_chunk(&mut self, payload: Payload) -> HandlerResult {
        let guild_id = payload.str("guild_id")?.to_string();

        let members = {
            let mut state = self.cache.write();
            let mut members = payload
                .objects("members")
                .into_iter()
                .filter_map(|member| {
                    let user_id = user_id_of(&member)?.to_string();
                    Some(state.update_member(&guild_id, &user_id, &member))
                })
                .collect::<Vec<_>>();

            for presence in payload.objects("presences") {
                let user_id = match user_id_of(&presence) {
                    Some(user_id) => user_id.to_string(),
                    None => continue,
                };
                let presence = Value::Object(presence);
                if let Some(member) = members.iter_mut().find(|member| member.id() == user_id) {
                    member.presence = Some(presence.clone());
                }
                if let Some(member) = state.members.get_mut(&guild_id, &user_id) {
                    member.presence = Some(presence);
                }
            }

            members.iter().map(Entity::to_json).collect::<Vec<_>>()
        };

        let nonce = match payload.opt_str("nonce") {
            Some(nonce) => nonce,
            None => {
                self.warn("Received GUILD_MEMBERS_CHUNK without a nonce.");
                return Ok(());
            }
        };

        self.pending_members.append(nonce, &members);

        let index = payload.data().get("chunk_index").and_then(Value::as_u64).unwrap_or_default();
        let count = payload.data().get("chunk_count").and_then(Value::as_u64).unwrap_or_default();
        if index + 1 >= count {
            if self.pending_members.complete(nonce).is_some() {
                log::debug!("[shard {}] Member request {} complete", self.id, nonce);
            }
            if self.member_sync_pending.remove(&guild_id) {
                self.check_ready();
            }
        }

        self.emit(EventKind::GuildMemberChunk { guild_id, members });
        self.heartbeat.set_acked();
        Ok(())
    }

    pub(super) fn on_presence_update(&mut self, payload: Payload) -> HandlerResult {
        let guild_id = payload.str("guild_id")?;
        let user_id = payload.nested_id("user", "user.id")?;
        let user = payload.object("user")?;
        let presence = payload.to_json();

        let (user_update, guild, member, old) = {
            let mut state = self.cache.write();

            let user_update = match state.users.get(user_id).map(Entity::to_json) {
                Some(old) => {
                    let current = state.users.update(user).to_json();
                    (current != old).then(|| (current, old))
                }
                None => None,
            };

            let (member, old) = match state.members.get_mut(guild_id, user_id) {
                Some(member) => {
                    let mut stored = payload.data().clone();
                    stored.remove("user");
                    let old = member.presence.replace(Value::Object(stored));
                    (member.to_json(), old)
                }
                None => (stub(user_id), None),
            };

            (user_update, state.guild_or_stub(guild_id), member, old)
        };

        if let Some((user, old)) = user_update {
            self.emit(EventKind::UserUpdate {
                user,
                old: Some(old),
            });
        }
        self.emit(EventKind::PresenceUpdate {
            guild,
            member,
            presence,
            old,
        });
        Ok(())
    }

    pub(super) fn on_user_update(&mut self, payload: Payload) -> HandlerResult {
        let user_id = payload.str("id")?;
        let (user, old) = {
            let mut state = self.cache.write();
            let old = state.users.get(user_id).map(Entity::to_json);
            (state.users.update(payload.data()).to_json(), old)
        };
        self.emit(EventKind::UserUpdate { user, old });
        Ok(())
    }
}
