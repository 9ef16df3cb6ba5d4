use futures_util::{future, future::BoxFuture, FutureExt, SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};

use super::{Action, Shard, ShardCommand, ShardHandle};
use crate::ws::socket::{self, ConnectError, Frame, Socket, SocketError};

type Connecting = BoxFuture<'static, Result<Socket, ConnectError>>;

enum Wake {
    Command(Option<ShardCommand>),
    Connected(Result<Socket, ConnectError>),
    Frame(Option<Result<Frame, SocketError>>),
    Timer,
}

async fn connecting(pending: &mut Option<Connecting>) -> Result<Socket, ConnectError> {
    match pending {
        Some(fut) => fut.await,
        None => future::pending().await,
    }
}

async fn next_frame(socket: &mut Option<Socket>) -> Option<Result<Frame, SocketError>> {
    match socket {
        Some(socket) => socket.next().await,
        None => future::pending().await,
    }
}

/// Drives one [`Shard`]: owns its socket, executes its actions and fires its timers.
///
/// Stops when every [`ShardHandle`] is dropped.
pub struct ShardRunner {
    shard: Shard,
    socket: Option<Socket>,
    connecting: Option<Connecting>,
    commands: mpsc::UnboundedReceiver<ShardCommand>,
    info: watch::Sender<super::ShardInfo>,
}

impl std::fmt::Debug for ShardRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardRunner")
            .field("shard", &self.shard)
            .field("connected", &self.socket.is_some())
            .field("connecting", &self.connecting.is_some())
            .finish()
    }
}

impl std::fmt::Debug for Wake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command(_) => f.write_str("Command"),
            Self::Connected(result) => write!(f, "Connected(ok: {})", result.is_ok()),
            Self::Frame(_) => f.write_str("Frame"),
            Self::Timer => f.write_str("Timer"),
        }
    }
}

impl ShardRunner {
    /// Wrap a shard, returning the runner and a handle to control it.
    pub fn new(shard: Shard) -> (Self, ShardHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (info, info_rx) = watch::channel(shard.info());
        let handle = ShardHandle::new(shard.id(), commands_tx, info_rx);

        let runner = Self {
            shard,
            socket: None,
            connecting: None,
            commands,
            info,
        };

        (runner, handle)
    }

    /// Run until every handle is dropped.
    pub async fn run(mut self) {
        log::debug!("Shard {} runner start", self.shard.id());

        loop {
            self.execute_actions().await;
            self.publish();

            let deadline = match self.shard.next_deadline() {
                Some(tick) => tokio::time::sleep_until(tick).boxed(),
                None => future::pending().boxed(),
            };

            let wake = tokio::select! {
                biased;

                command = self.commands.recv() => Wake::Command(command),
                result = connecting(&mut self.connecting) => Wake::Connected(result),
                frame = next_frame(&mut self.socket) => Wake::Frame(frame),
                _ = deadline => Wake::Timer,
            };

            log::trace!("Shard {} woke by {:?}", self.shard.id(), wake);

            match wake {
                Wake::Command(Some(command)) => self.on_command(command),
                Wake::Command(None) => {
                    log::debug!("Every handle of shard {} dropped, stop", self.shard.id());
                    self.shard.disconnect(Some(false), None);
                    self.execute_actions().await;
                    break;
                }
                Wake::Connected(result) => {
                    self.connecting = None;
                    match result {
                        Ok(socket) => {
                            self.socket = Some(socket);
                            self.shard.on_open();
                        }
                        Err(err) => self.shard.on_connect_failed(err),
                    }
                }
                Wake::Frame(Some(Ok(frame))) => self.shard.on_frame(frame),
                Wake::Frame(Some(Err(err))) => {
                    self.socket = None;
                    self.shard.on_socket_error(err);
                    self.shard.on_close(1006, "");
                }
                Wake::Frame(None) => {
                    self.socket = None;
                    self.shard.on_close(1006, "");
                }
                Wake::Timer => self.shard.poll_timers(),
            }
        }

        self.publish();
        log::debug!("Shard {} runner stop", self.shard.id());
    }

    fn on_command(&mut self, command: ShardCommand) {
        match command {
            ShardCommand::Connect => self.shard.connect(),
            ShardCommand::Disconnect { reconnect } => {
                self.shard.disconnect(Some(reconnect), None)
            }
            ShardCommand::EditStatus { status, activities } => {
                self.shard.edit_status(status, activities)
            }
            ShardCommand::UpdateVoiceState {
                guild_id,
                channel_id,
                options,
            } => self
                .shard
                .update_voice_state(&guild_id, channel_id.as_deref(), options),
            ShardCommand::RequestGuildMembers {
                guild_id,
                options,
                reply,
            } => {
                let (members_tx, members_rx) = oneshot::channel();
                let accepted = self
                    .shard
                    .request_guild_members(&guild_id, options, Some(members_tx))
                    .map(|_| members_rx);
                if reply.send(accepted).is_err() {
                    log::trace!("Member request caller of shard {} gone", self.shard.id());
                }
            }
        }
    }

    async fn execute_actions(&mut self) {
        while let Some(action) = self.shard.poll_action() {
            match action {
                Action::Connect { url } => {
                    self.socket = None;
                    self.connecting = Some(async move { socket::connect(&url).await }.boxed());
                }
                Action::Send(text) => {
                    let socket = match self.socket.as_mut() {
                        Some(socket) => socket,
                        None => continue,
                    };
                    if let Err(err) = socket.send(Frame::Text(text)).await {
                        log::warn!("Shard {} write failed: {}", self.shard.id(), err);
                        self.socket = None;
                        self.shard.on_socket_error(err);
                        self.shard.on_close(1006, "");
                    }
                }
                Action::Close { code, reason } => {
                    self.connecting = None;
                    if let Some(mut socket) = self.socket.take() {
                        if let Err(err) = socket.send(Frame::Close { code, reason }).await {
                            log::debug!(
                                "Shard {} close frame not sent: {}",
                                self.shard.id(),
                                err
                            );
                        }
                    }
                }
                Action::Terminate => {
                    self.connecting = None;
                    self.socket = None;
                }
            }
        }
    }

    fn publish(&self) {
        let current = self.shard.info();
        self.info.send_if_modified(|info| {
            if *info == current {
                false
            } else {
                *info = current;
                true
            }
        });
    }
}
