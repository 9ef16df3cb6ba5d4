use serde_json::Value;

use super::{DispatchError, HandlerResult, Payload};
use crate::{
    cache::{Entity, Record},
    ws::{event::EventKind, shard::Shard},
};

impl Shard {
    pub(super) fn on_guild_create(&mut self, payload: Payload) -> HandlerResult {
        let guild_id = payload.str("id")?.to_string();
        let cache = self.cache.clone();

        if payload.data().get("unavailable").and_then(Value::as_bool) == Some(true) {
            let guild = {
                let mut state = cache.write();
                state.guilds.delete(&guild_id);
                state.unavailable_guilds.update(payload.data()).to_json()
            };
            self.emit(EventKind::UnavailableGuildCreate { guild });
            return Ok(());
        }

        let (guild, was_unavailable, needs_sync) = {
            let mut state = cache.write();
            let was_unavailable = state.unavailable_guilds.has(&guild_id);
            let guild = state.create_guild(payload.data().clone(), self.id);
            let cached = state.members.scope(&guild_id).map_or(0, |members| members.len());
            let needs_sync = self.options.get_all_users
                && guild
                    .u64("member_count")
                    .map_or(false, |count| (cached as u64) < count);
            (guild.to_json(), was_unavailable, needs_sync)
        };

        if needs_sync {
            self.debug(format!("Queueing member sync of guild {}", guild_id));
            self.queue_member_sync(&guild_id);
        }

        if self.ready {
            if was_unavailable {
                self.emit(EventKind::GuildAvailable { guild });
            } else {
                self.emit(EventKind::GuildCreate { guild });
            }
        } else {
            self.restart_guild_create_timeout();
        }
        Ok(())
    }

    pub(super) fn on_guild_delete(&mut self, payload: Payload) -> HandlerResult {
        let guild_id = payload.str("id")?;
        let unavailable = payload.data().get("unavailable").and_then(Value::as_bool) == Some(true);

        let event = {
            let mut state = self.cache.write();
            let removed = state.delete_guild(guild_id);
            if unavailable {
                EventKind::GuildUnavailable {
                    guild: state.unavailable_guilds.update(payload.data()).to_json(),
                }
            } else {
                EventKind::GuildDelete {
                    guild: removed
                        .unwrap_or_else(|| Record::stub(guild_id))
                        .to_json(),
                }
            }
        };
        self.emit(event);
        Ok(())
    }

    pub(super) fn on_guild_update(&mut self, payload: Payload) -> HandlerResult {
        let guild_id = payload.str("id")?;
        let (guild, old) = {
            let mut state = self.cache.write();
            let old = state.guilds.get(guild_id).map(Entity::to_json);
            (state.guilds.update(payload.data()).to_json(), old)
        };
        self.emit(EventKind::GuildUpdate { guild, old });
        Ok(())
    }

    pub(super) fn on_guild_emojis_update(&mut self, payload: Payload) -> HandlerResult {
        let guild_id = payload.str("guild_id")?;
        let emojis = payload.value("emojis");

        let (guild, old) = {
            let mut state = self.cache.write();
            for user in emoji_users(&emojis) {
                state.users.update(user);
            }
            let old = match state.guilds.get_mut(guild_id) {
                Some(guild) => {
                    let old = guild.get("emojis").cloned();
                    guild.set("emojis", emojis.clone());
                    old
                }
                None => None,
            };
            (state.guild_or_stub(guild_id), old)
        };
        self.emit(EventKind::GuildEmojisUpdate { guild, emojis, old });
        Ok(())
    }

    pub(super) fn on_guild_stickers_update(&mut self, payload: Payload) -> HandlerResult {
        let guild_id = payload.str("guild_id")?;
        let stickers = payload.value("stickers");

        let (guild, old) = {
            let mut state = self.cache.write();
            let old = match state.guilds.get_mut(guild_id) {
                Some(guild) => {
                    let old = guild.get("stickers").cloned();
                    guild.set("stickers", stickers.clone());
                    old
                }
                None => None,
            };
            (state.guild_or_stub(guild_id), old)
        };
        self.emit(EventKind::GuildStickersUpdate {
            guild,
            stickers,
            old,
        });
        Ok(())
    }

    pub(super) fn on_guild_integrations_update(&mut self, payload: Payload) -> HandlerResult {
        let guild = self.cache.read().guild_or_stub(payload.str("guild_id")?);
        self.emit(EventKind::GuildIntegrationsUpdate { guild });
        Ok(())
    }

    pub(super) fn on_guild_ban(&mut self, payload: Payload, added: bool) -> HandlerResult {
        let guild_id = payload.str("guild_id")?;
        let user = payload.object("user")?;

        let (guild, user) = {
            let mut state = self.cache.write();
            let user = state.users.update(user).to_json();
            (state.guild_or_stub(guild_id), user)
        };

        self.emit(if added {
            EventKind::GuildBanAdd { guild, user }
        } else {
            EventKind::GuildBanRemove { guild, user }
        });
        Ok(())
    }

    pub(super) fn on_guild_role_create(&mut self, payload: Payload) -> HandlerResult {
        let role = self.upsert_role(&payload)?.0;
        self.emit(EventKind::GuildRoleCreate { role });
        Ok(())
    }

    pub(super) fn on_guild_role_update(&mut self, payload: Payload) -> HandlerResult {
        let (role, old) = self.upsert_role(&payload)?;
        self.emit(EventKind::GuildRoleUpdate { role, old });
        Ok(())
    }

    pub(super) fn on_guild_role_delete(&mut self, payload: Payload) -> HandlerResult {
        let guild_id = payload.str("guild_id")?;
        let role_id = payload.str("role_id")?;

        let role = {
            let mut state = self.cache.write();
            if !state.guilds.has(guild_id) {
                None
            } else {
                Some(
                    state
                        .roles
                        .delete(guild_id, role_id)
                        .unwrap_or_else(|| Record::stub(role_id))
                        .to_json(),
                )
            }
        };

        match role {
            Some(role) => self.emit(EventKind::GuildRoleDelete { role }),
            None => self.debug(format!("Missing guild in GUILD_ROLE_DELETE: {}", guild_id)),
        }
        Ok(())
    }

    /// Store the role of a role create/update, returns `(role, old)`.
    fn upsert_role(&self, payload: &Payload) -> Result<(Value, Option<Value>), DispatchError> {
        let guild_id = payload.str("guild_id")?;
        let role_id = payload.nested_id("role", "role.id")?;
        let mut role = payload.object("role")?.clone();
        role.insert("guild_id".to_string(), Value::String(guild_id.to_string()));

        let mut state = self.cache.write();
        if !state.guilds.has(guild_id) {
            return Ok((Record::new(role).to_json(), None));
        }
        let old = state.roles.get(guild_id, role_id).map(Entity::to_json);
        let role = state.roles.scope_mut(guild_id).update(&role).to_json();
        Ok((role, old))
    }
}

fn emoji_users(emojis: &Value) -> impl Iterator<Item = &serde_json::Map<String, Value>> {
    emojis
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|emoji| emoji.get("user").and_then(Value::as_object))
}
