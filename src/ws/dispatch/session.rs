use serde_json::Value;

use super::{HandlerResult, Payload};
use crate::ws::{
    event::EventKind,
    shard::{resume_url, Shard},
};

impl Shard {
    pub(super) fn on_ready(&mut self, payload: Payload) -> HandlerResult {
        let session_id = payload.str("session_id")?.to_string();
        let user_id = payload.nested_id("user", "user.id")?.to_string();

        self.on_session_established();

        match payload.opt_str("resume_gateway_url").map(resume_url) {
            Some(Ok(url)) => self.resume_url = Some(url),
            Some(Err(err)) => self.warn(format!("Invalid resume url in READY: {}", err)),
            None => self.warn("READY without resume url"),
        }
        self.session_id = Some(session_id);

        let guilds = payload.objects("guilds");
        let pending = {
            let cache = self.cache.clone();
            let mut state = cache.write();

            if let Some(user) = payload.opt_object("user") {
                state.users.update(user);
            }
            state.user_id = Some(user_id);
            state.application_id = payload
                .opt_object("application")
                .and_then(|app| app.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string);

            for guild in &guilds {
                if let Some(id) = guild.get("id").and_then(Value::as_str) {
                    state.guilds.delete(id);
                    state.unavailable_guilds.update(guild);
                }
            }

            !state.unavailable_guilds.is_empty()
        };

        log::info!(
            "[shard {}] Session established, {} guild(s) to load",
            self.id,
            guilds.len()
        );

        self.pre_ready = true;
        self.emit(EventKind::PreReady);

        if pending && !guilds.is_empty() {
            self.restart_guild_create_timeout();
        } else {
            self.check_ready();
        }
        Ok(())
    }

    pub(super) fn on_resumed(&mut self, _payload: Payload) -> HandlerResult {
        self.on_session_established();
        self.ready = true;
        log::info!("[shard {}] Session resumed at sequence {}", self.id, self.sequence);
        self.emit(EventKind::Resumed);
        Ok(())
    }
}
