use serde_json::{json, Map, Value};

use super::{stub, DispatchError, HandlerResult, Payload};
use crate::{
    cache::{CacheState, Entity, ThreadMember},
    ws::{event::EventKind, shard::Shard},
};

fn thread_member(data: &Map<String, Value>) -> ThreadMember {
    let str_field = |field: &str| data.get(field).and_then(Value::as_str).map(str::to_string);
    ThreadMember {
        id: str_field("id"),
        user_id: str_field("user_id"),
        join_timestamp: str_field("join_timestamp"),
        flags: data.get("flags").and_then(Value::as_u64).unwrap_or_default(),
    }
}

fn member_json(member: &ThreadMember) -> Value {
    serde_json::to_value(member).unwrap_or(Value::Null)
}

/// Store a thread and point its forum parent at it.
fn store_thread(state: &mut CacheState, data: &Map<String, Value>) -> Value {
    let thread = state.add_thread(data);
    if let Some(parent) = thread
        .parent_id()
        .and_then(|parent_id| state.channels.get_mut(parent_id))
    {
        if parent.is_forum() {
            parent.last_thread_id = Some(thread.id().to_string());
        }
    }
    thread.to_json()
}

impl Shard {
    pub(super) fn on_thread_create(&mut self, payload: Payload) -> HandlerResult {
        let thread = self.upsert_thread(&payload)?.0;
        self.emit(EventKind::ThreadCreate { thread });
        Ok(())
    }

    pub(super) fn on_thread_update(&mut self, payload: Payload) -> HandlerResult {
        let (thread, old) = self.upsert_thread(&payload)?;
        self.emit(EventKind::ThreadUpdate { thread, old });
        Ok(())
    }

    /// Store the thread of a thread create/update, returns `(thread, old)`.
    fn upsert_thread(&self, payload: &Payload) -> Result<(Value, Option<Value>), DispatchError> {
        let thread_id = payload.str("id")?;
        let guild_id = payload.opt_str("guild_id");

        let mut state = self.cache.write();
        if !guild_id.map_or(false, |guild_id| state.guilds.has(guild_id)) {
            return Ok((payload.to_json(), None));
        }
        let old = state.threads.get(thread_id).map(Entity::to_json);
        Ok((store_thread(&mut state, payload.data()), old))
    }

    pub(super) fn on_thread_delete(&mut self, payload: Payload) -> HandlerResult {
        let thread_id = payload.str("id")?;

        let thread = {
            let mut state = self.cache.write();
            match state.threads.delete(thread_id) {
                Some(thread) => {
                    state.thread_guild.remove(thread_id);
                    state.messages.remove_scope(thread_id);
                    if let Some(parent) = thread
                        .parent_id()
                        .and_then(|parent_id| state.channels.get_mut(parent_id))
                    {
                        parent.threads.remove(thread_id);
                        if parent.last_thread_id.as_deref() == Some(thread_id) {
                            parent.last_thread_id = None;
                        }
                    }
                    thread.to_json()
                }
                None => json!({
                    "id": thread_id,
                    "type": payload.value("type"),
                    "parent_id": payload.value("parent_id"),
                }),
            }
        };
        self.emit(EventKind::ThreadDelete { thread });
        Ok(())
    }

    pub(super) fn on_thread_list_sync(&mut self, payload: Payload) -> HandlerResult {
        let guild_id = payload.str("guild_id")?;

        let synced = {
            let mut state = self.cache.write();
            if state.guilds.has(guild_id) {
                let threads = payload
                    .objects("threads")
                    .into_iter()
                    .map(|mut thread| {
                        thread
                            .entry("guild_id")
                            .or_insert_with(|| Value::String(guild_id.to_string()));
                        store_thread(&mut state, &thread)
                    })
                    .collect::<Vec<_>>();
                Some((state.guild_or_stub(guild_id), threads))
            } else {
                None
            }
        };

        match synced {
            Some((guild, threads)) => self.emit(EventKind::ThreadListSync { guild, threads }),
            None => self.debug(format!("Missing guild in THREAD_LIST_SYNC: {}", guild_id)),
        }
        Ok(())
    }

    pub(super) fn on_thread_member_update(&mut self, payload: Payload) -> HandlerResult {
        let thread_id = payload.str("id")?;
        let member = thread_member(payload.data());

        let (thread, old) = {
            let mut state = self.cache.write();
            match state.threads.get_mut(thread_id) {
                Some(thread) => {
                    let old = match thread
                        .members
                        .iter_mut()
                        .find(|known| known.user_id == member.user_id)
                    {
                        Some(known) => Some(std::mem::replace(known, member.clone())),
                        None => {
                            thread.members.push(member.clone());
                            None
                        }
                    };
                    (thread.to_json(), old.as_ref().map(member_json))
                }
                None => (stub(thread_id), None),
            }
        };

        self.emit(EventKind::ThreadMemberUpdate {
            thread,
            member: member_json(&member),
            old,
        });
        Ok(())
    }

    pub(super) fn on_thread_members_update(&mut self, payload: Payload) -> HandlerResult {
        let thread_id = payload.str("id")?;
        let added = payload
            .objects("added_members")
            .iter()
            .map(thread_member)
            .collect::<Vec<_>>();
        let removed_ids = payload.strings("removed_member_ids");

        let (thread, removed) = {
            let mut state = self.cache.write();
            match state.threads.get_mut(thread_id) {
                Some(thread) => {
                    if let Some(count) = payload.data().get("member_count") {
                        thread.record_mut().set("member_count", count.clone());
                    }
                    for member in &added {
                        match thread
                            .members
                            .iter_mut()
                            .find(|known| known.user_id == member.user_id)
                        {
                            Some(known) => *known = member.clone(),
                            None => thread.members.push(member.clone()),
                        }
                    }
                    let removed = removed_ids
                        .iter()
                        .map(|user_id| {
                            match thread
                                .members
                                .iter()
                                .position(|known| known.user_id.as_deref() == Some(user_id.as_str()))
                            {
                                Some(index) => member_json(&thread.members.remove(index)),
                                None => stub(user_id),
                            }
                        })
                        .collect::<Vec<_>>();
                    (thread.to_json(), removed)
                }
                None => (
                    stub(thread_id),
                    removed_ids.iter().map(|id| stub(id)).collect(),
                ),
            }
        };

        self.emit(EventKind::ThreadMembersUpdate {
            thread,
            added: added.iter().map(member_json).collect(),
            removed,
        });
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use crate::ws::{event::EventKind, shard::test::TestShard};

    #[test]
    fn test_thread_create_links_forum_parent() {
        let mut t = TestShard::with_guild();
        t.dispatch(
            "THREAD_CREATE",
            json!({"id": "t2", "guild_id": "g", "parent_id": "f1", "type": 11}),
        );

        let state = t.shard.cache.read();
        let forum = state.channels.get("f1").unwrap();
        assert!(forum.threads.contains("t2"));
        assert_eq!(forum.last_thread_id.as_deref(), Some("t2"));
        assert_eq!(state.guild_of("t2"), Some("g"));
    }

    #[test]
    fn test_thread_delete_unlinks_parent() {
        let mut t = TestShard::with_guild();
        t.dispatch(
            "THREAD_CREATE",
            json!({"id": "t2", "guild_id": "g", "parent_id": "f1", "type": 11}),
        );
        t.dispatch(
            "THREAD_DELETE",
            json!({"id": "t2", "guild_id": "g", "parent_id": "f1", "type": 11}),
        );

        let state = t.shard.cache.read();
        let forum = state.channels.get("f1").unwrap();
        assert!(!forum.threads.contains("t2"));
        assert!(forum.last_thread_id.is_none());
        assert!(!state.threads.has("t2"));
    }

    #[test]
    fn test_thread_members_update() {
        let mut t = TestShard::with_guild();
        t.dispatch(
            "THREAD_MEMBERS_UPDATE",
            json!({
                "id": "t1",
                "guild_id": "g",
                "member_count": 2,
                "added_members": [
                    {"id": "t1", "user_id": "u1", "join_timestamp": "2022-01-01T00:00:00Z", "flags": 0},
                    {"id": "t1", "user_id": "me", "join_timestamp": "2022-01-01T00:00:00Z", "flags": 0},
                ],
            }),
        );
        t.dispatch(
            "THREAD_MEMBERS_UPDATE",
            json!({"id": "t1", "guild_id": "g", "member_count": 1, "removed_member_ids": ["u1", "ghost"]}),
        );

        let removed = t
            .find_last(|kind| match kind {
                EventKind::ThreadMembersUpdate { removed, .. } => Some(removed),
                _ => None,
            })
            .unwrap();
        assert_eq!(removed[0]["user_id"], "u1");
        assert_eq!(removed[1], json!({"id": "ghost"}));

        let state = t.shard.cache.read();
        let thread = state.threads.get("t1").unwrap();
        assert_eq!(thread.members.len(), 1);
        assert_eq!(thread.members[0].user_id.as_deref(), Some("me"));
    }
}
