use serde_json::{json, Value};

use super::{stub, DispatchError, HandlerResult, Payload};
use crate::{
    cache::{CacheState, Entity, Record, Scoped},
    ws::{event::EventKind, shard::Shard},
};

type Store = fn(&mut CacheState) -> &mut Scoped<Record>;

fn auto_moderation_rules(state: &mut CacheState) -> &mut Scoped<Record> {
    &mut state.auto_moderation_rules
}

fn scheduled_events(state: &mut CacheState) -> &mut Scoped<Record> {
    &mut state.scheduled_events
}

fn integrations(state: &mut CacheState) -> &mut Scoped<Record> {
    &mut state.integrations
}

fn stage_instances(state: &mut CacheState) -> &mut Scoped<Record> {
    &mut state.stage_instances
}

impl Shard {
    /// Store a guild scoped entity if its guild is cached, returns `(entity, old)`.
    fn upsert_scoped(
        &self,
        payload: &Payload,
        store: Store,
    ) -> Result<(Value, Option<Value>), DispatchError> {
        let id = payload.str("id")?;
        let guild_id = payload.str("guild_id")?;

        let mut state = self.cache.write();
        if !state.guilds.has(guild_id) {
            return Ok((payload.to_json(), None));
        }
        let store = store(&mut *state);
        let old = store.get(guild_id, id).map(Entity::to_json);
        Ok((store.scope_mut(guild_id).update(payload.data()).to_json(), old))
    }

    /// Remove a guild scoped entity, returns it merged with the payload.
    fn remove_scoped(&self, payload: &Payload, store: Store) -> Result<Value, DispatchError> {
        let id = payload.str("id")?;
        let guild_id = payload.str("guild_id")?;

        let mut state = self.cache.write();
        let mut removed = store(&mut *state)
            .delete(guild_id, id)
            .unwrap_or_else(|| Record::new(payload.data().clone()));
        removed.update(payload.data());
        Ok(removed.to_json())
    }

    pub(super) fn on_application_command_permissions_update(
        &mut self,
        payload: Payload,
    ) -> HandlerResult {
        let guild = self.cache.read().guild_or_stub(payload.str("guild_id")?);
        self.emit(EventKind::ApplicationCommandPermissionsUpdate {
            guild,
            permissions: payload.to_json(),
        });
        Ok(())
    }

    pub(super) fn on_auto_moderation_action_execution(
        &mut self,
        payload: Payload,
    ) -> HandlerResult {
        let guild_id = payload.str("guild_id")?;
        let user_id = payload.str("user_id")?;
        let rule_id = payload.str("rule_id")?;

        let event = {
            let state = self.cache.read();
            EventKind::AutoModerationActionExecution {
                guild: state.guild_or_stub(guild_id),
                channel: payload
                    .opt_str("channel_id")
                    .map(|channel_id| state.channel_or_stub(channel_id)),
                user: state.user_or_stub(user_id),
                rule: state
                    .auto_moderation_rules
                    .get(guild_id, rule_id)
                    .map(Entity::to_json),
                execution: payload.to_json(),
            }
        };
        self.emit(event);
        Ok(())
    }

    pub(super) fn on_auto_moderation_rule_create(&mut self, payload: Payload) -> HandlerResult {
        let rule = self.upsert_scoped(&payload, auto_moderation_rules)?.0;
        self.emit(EventKind::AutoModerationRuleCreate { rule });
        Ok(())
    }

    pub(super) fn on_auto_moderation_rule_update(&mut self, payload: Payload) -> HandlerResult {
        let (rule, old) = self.upsert_scoped(&payload, auto_moderation_rules)?;
        self.emit(EventKind::AutoModerationRuleUpdate { rule, old });
        Ok(())
    }

    pub(super) fn on_auto_moderation_rule_delete(&mut self, payload: Payload) -> HandlerResult {
        let rule = self.remove_scoped(&payload, auto_moderation_rules)?;
        self.emit(EventKind::AutoModerationRuleDelete { rule });
        Ok(())
    }

    pub(super) fn on_scheduled_event_create(&mut self, payload: Payload) -> HandlerResult {
        let event = self.upsert_scoped(&payload, scheduled_events)?.0;
        self.emit(EventKind::GuildScheduledEventCreate { event });
        Ok(())
    }

    pub(super) fn on_scheduled_event_update(&mut self, payload: Payload) -> HandlerResult {
        let (event, old) = self.upsert_scoped(&payload, scheduled_events)?;
        self.emit(EventKind::GuildScheduledEventUpdate { event, old });
        Ok(())
    }

    pub(super) fn on_scheduled_event_delete(&mut self, payload: Payload) -> HandlerResult {
        let event = self.remove_scoped(&payload, scheduled_events)?;
        self.emit(EventKind::GuildScheduledEventDelete { event });
        Ok(())
    }

    pub(super) fn on_scheduled_event_user(&mut self, payload: Payload, added: bool) -> HandlerResult {
        let guild_id = payload.str("guild_id")?;
        let event_id = payload.str("guild_scheduled_event_id")?;
        let user_id = payload.str("user_id")?;

        let (event, user) = {
            let mut state = self.cache.write();
            let event = match state.scheduled_events.get_mut(guild_id, event_id) {
                Some(event) => {
                    if let Some(count) = event.u64("user_count") {
                        let count = if added {
                            count + 1
                        } else {
                            count.saturating_sub(1)
                        };
                        event.set("user_count", count);
                    }
                    event.to_json()
                }
                None => stub(event_id),
            };
            (event, state.user_or_stub(user_id))
        };

        self.emit(if added {
            EventKind::GuildScheduledEventUserAdd { event, user }
        } else {
            EventKind::GuildScheduledEventUserRemove { event, user }
        });
        Ok(())
    }

    pub(super) fn on_integration_create(&mut self, payload: Payload) -> HandlerResult {
        let integration = self.upsert_scoped(&payload, integrations)?.0;
        let guild = self.cache.read().guild_or_stub(payload.str("guild_id")?);
        self.emit(EventKind::IntegrationCreate { guild, integration });
        Ok(())
    }

    pub(super) fn on_integration_update(&mut self, payload: Payload) -> HandlerResult {
        let (integration, old) = self.upsert_scoped(&payload, integrations)?;
        let guild = self.cache.read().guild_or_stub(payload.str("guild_id")?);
        self.emit(EventKind::IntegrationUpdate {
            guild,
            integration,
            old,
        });
        Ok(())
    }

    pub(super) fn on_integration_delete(&mut self, payload: Payload) -> HandlerResult {
        let guild_id = payload.str("guild_id")?;
        let id = payload.str("id")?;

        let (guild, integration) = {
            let mut state = self.cache.write();
            let integration = match state.integrations.delete(guild_id, id) {
                Some(integration) => integration.to_json(),
                None => json!({
                    "id": id,
                    "application_id": payload.value("application_id"),
                }),
            };
            (state.guild_or_stub(guild_id), integration)
        };
        self.emit(EventKind::IntegrationDelete { guild, integration });
        Ok(())
    }

    pub(super) fn on_interaction_create(&mut self, payload: Payload) -> HandlerResult {
        payload.str("id")?;
        {
            let mut state = self.cache.write();
            if let Some(user) = payload.opt_object("user") {
                state.users.update(user);
            }
            if let (Some(guild_id), Some(member)) =
                (payload.opt_str("guild_id"), payload.opt_object("member"))
            {
                let user_id = member
                    .get("user")
                    .and_then(|user| user.get("id"))
                    .and_then(Value::as_str);
                if let Some(user_id) = user_id {
                    state.update_member(guild_id, user_id, member);
                }
            }
        }
        self.emit(EventKind::InteractionCreate {
            interaction: payload.to_json(),
        });
        Ok(())
    }

    pub(super) fn on_invite_create(&mut self, payload: Payload) -> HandlerResult {
        let channel_id = payload.str("channel_id")?;
        let (guild, channel) = {
            let state = self.cache.read();
            (
                payload.opt_str("guild_id").map(|id| state.guild_or_stub(id)),
                state.channel_or_stub(channel_id),
            )
        };
        self.emit(EventKind::InviteCreate {
            guild,
            channel,
            invite: payload.to_json(),
        });
        Ok(())
    }

    pub(super) fn on_invite_delete(&mut self, payload: Payload) -> HandlerResult {
        let channel_id = payload.str("channel_id")?;
        let code = payload.str("code")?.to_string();
        let (guild, channel) = {
            let state = self.cache.read();
            (
                payload.opt_str("guild_id").map(|id| state.guild_or_stub(id)),
                state.channel_or_stub(channel_id),
            )
        };
        self.emit(EventKind::InviteDelete {
            guild,
            channel,
            code,
        });
        Ok(())
    }

    pub(super) fn on_stage_instance_create(&mut self, payload: Payload) -> HandlerResult {
        let instance = self.upsert_scoped(&payload, stage_instances)?.0;
        self.emit(EventKind::StageInstanceCreate { instance });
        Ok(())
    }

    pub(super) fn on_stage_instance_update(&mut self, payload: Payload) -> HandlerResult {
        let (instance, old) = self.upsert_scoped(&payload, stage_instances)?;
        self.emit(EventKind::StageInstanceUpdate { instance, old });
        Ok(())
    }

    pub(super) fn on_stage_instance_delete(&mut self, payload: Payload) -> HandlerResult {
        let instance = self.remove_scoped(&payload, stage_instances)?;
        self.emit(EventKind::StageInstanceDelete { instance });
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use crate::ws::{event::EventKind, shard::test::TestShard};

    #[test]
    fn test_rule_update_keeps_rule() {
        let mut t = TestShard::with_guild();
        t.dispatch(
            "AUTO_MODERATION_RULE_CREATE",
            json!({"id": "r", "guild_id": "g", "name": "no spam", "enabled": true}),
        );
        t.dispatch(
            "AUTO_MODERATION_RULE_UPDATE",
            json!({"id": "r", "guild_id": "g", "enabled": false}),
        );

        let (rule, old) = t
            .find(|kind| match kind {
                EventKind::AutoModerationRuleUpdate { rule, old } => Some((rule, old)),
                _ => None,
            })
            .unwrap();
        assert_eq!(rule["name"], "no spam");
        assert_eq!(rule["enabled"], false);
        assert_eq!(old.unwrap()["enabled"], true);
        assert!(t.shard.cache.read().auto_moderation_rules.has("g", "r"));
    }

    #[test]
    fn test_scheduled_event_user_count() {
        let mut t = TestShard::with_guild();
        t.dispatch(
            "GUILD_SCHEDULED_EVENT_CREATE",
            json!({"id": "e", "guild_id": "g", "user_count": 1}),
        );
        t.dispatch(
            "GUILD_SCHEDULED_EVENT_USER_ADD",
            json!({"guild_scheduled_event_id": "e", "guild_id": "g", "user_id": "u1"}),
        );

        let (event, user) = t
            .find_last(|kind| match kind {
                EventKind::GuildScheduledEventUserAdd { event, user } => Some((event, user)),
                _ => None,
            })
            .unwrap();
        assert_eq!(event["user_count"], 2);
        assert_eq!(user["id"], "u1");

        t.dispatch(
            "GUILD_SCHEDULED_EVENT_USER_REMOVE",
            json!({"guild_scheduled_event_id": "nope", "guild_id": "g", "user_id": "u1"}),
        );
        let event = t
            .find_last(|kind| match kind {
                EventKind::GuildScheduledEventUserRemove { event, .. } => Some(event),
                _ => None,
            })
            .unwrap();
        assert_eq!(event, json!({"id": "nope"}));
    }
}
