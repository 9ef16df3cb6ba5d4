use std::time::Duration;

use serde_json::Value;
use snafu::prelude::*;
use tokio::sync::{mpsc, oneshot, watch};

use super::{RequestMembersError, RequestMembersOptions, ShardStatus, VoiceStateOptions};
use crate::config::{Activity, Status};

/// The shard task is gone
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("shard {id} is not running"))]
pub struct ShardStoppedError {
    /// shard id
    pub id: u32,
}

/// Shard state published to handles
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShardInfo {
    /// shard id
    pub id: u32,
    /// lifecycle status
    pub status: ShardStatus,
    /// every guild is loaded
    pub ready: bool,
    /// last heartbeat round trip, `None` when unknown
    pub latency: Option<Duration>,
    /// current session id
    pub session_id: Option<String>,
    /// last seen sequence
    pub sequence: u64,
}

type MembersReply = Result<oneshot::Receiver<Vec<Value>>, RequestMembersError>;

#[derive(Debug)]
pub(crate) enum ShardCommand {
    Connect,
    Disconnect {
        reconnect: bool,
    },
    EditStatus {
        status: Status,
        activities: Vec<Activity>,
    },
    UpdateVoiceState {
        guild_id: String,
        channel_id: Option<String>,
        options: VoiceStateOptions,
    },
    RequestGuildMembers {
        guild_id: String,
        options: RequestMembersOptions,
        reply: oneshot::Sender<MembersReply>,
    },
}

/// Cloneable remote control of a running shard
#[derive(Debug, Clone)]
pub struct ShardHandle {
    id: u32,
    commands: mpsc::UnboundedSender<ShardCommand>,
    info: watch::Receiver<ShardInfo>,
}

impl ShardHandle {
    pub(crate) fn new(
        id: u32,
        commands: mpsc::UnboundedSender<ShardCommand>,
        info: watch::Receiver<ShardInfo>,
    ) -> Self {
        Self { id, commands, info }
    }

    fn send(&self, command: ShardCommand) -> Result<(), ShardStoppedError> {
        self.commands
            .send(command)
            .map_err(|_| ShardStoppedError { id: self.id })
    }

    /// shard id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Open the connection.
    pub fn connect(&self) -> Result<(), ShardStoppedError> {
        self.send(ShardCommand::Connect)
    }

    /// Close the connection, `reconnect` keeps the session for a resume.
    pub fn disconnect(&self, reconnect: bool) -> Result<(), ShardStoppedError> {
        self.send(ShardCommand::Disconnect { reconnect })
    }

    /// Change the bot status and activities.
    pub fn edit_status(
        &self,
        status: Status,
        activities: Vec<Activity>,
    ) -> Result<(), ShardStoppedError> {
        self.send(ShardCommand::EditStatus { status, activities })
    }

    /// Join, move between or leave (`channel_id` = `None`) voice channels.
    pub fn update_voice_state<G: Into<String>>(
        &self,
        guild_id: G,
        channel_id: Option<String>,
        options: VoiceStateOptions,
    ) -> Result<(), ShardStoppedError> {
        self.send(ShardCommand::UpdateVoiceState {
            guild_id: guild_id.into(),
            channel_id,
            options,
        })
    }

    /// Request guild members.
    ///
    /// Resolves with every received member when the last chunk arrives, or with what was
    /// received so far on timeout or disconnect.
    pub async fn request_guild_members<G: Into<String>>(
        &self,
        guild_id: G,
        options: RequestMembersOptions,
    ) -> Result<Vec<Value>, RequestMembersError> {
        let (reply, accepted) = oneshot::channel();
        self.send(ShardCommand::RequestGuildMembers {
            guild_id: guild_id.into(),
            options,
            reply,
        })
        .map_err(|_| RequestMembersError::ShardStopped)?;

        let members = accepted
            .await
            .map_err(|_| RequestMembersError::ShardStopped)??;

        members
            .await
            .map_err(|_| RequestMembersError::ShardStopped)
    }

    /// Latest published state.
    pub fn info(&self) -> ShardInfo {
        self.info.borrow().clone()
    }

    /// lifecycle status
    pub fn status(&self) -> ShardStatus {
        self.info.borrow().status
    }

    /// last heartbeat round trip
    pub fn latency(&self) -> Option<Duration> {
        self.info.borrow().latency
    }

    /// Wait until the shard state changes, returns false once the shard task is gone.
    pub async fn changed(&mut self) -> bool {
        self.info.changed().await.is_ok()
    }
}
