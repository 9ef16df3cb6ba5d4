//! Gateway session state machine.
//!
//! [`Shard`] is synchronous: every input (frame, socket lifecycle, timer tick, caller command)
//! is a method call which mutates state and queues [`Action`]s. The [`ShardRunner`] owns the
//! real socket, executes those actions and sleeps until [`Shard::next_deadline`].

mod handle;
mod heartbeat;
mod members;
mod runner;

pub use handle::{ShardHandle, ShardInfo, ShardStoppedError};
pub use members::{RequestMembersError, RequestMembersOptions};
pub use runner::ShardRunner;

pub(crate) use handle::ShardCommand;

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde_json::Value;
use snafu::prelude::*;
use tokio::{sync::oneshot, time::Instant};
use url::Url;

use self::{heartbeat::HeartbeatMonitor, members::PendingMembers};
use super::{
    close::CloseCode,
    error::ShardError,
    event::{EventKind, EventSender},
    message::{
        Command, FrameDecoder, Identify, Message, Packet, RequestGuildMembers, Resume,
        UpdateVoiceState,
    },
    socket::{ConnectError, Frame, SocketError},
};
use crate::{
    bucket::Bucket,
    cache::Cache,
    config::{Activity, Intents, Presence, ShardOptions, Status},
};

const INITIAL_RECONNECT_INTERVAL: u64 = 1000;
const MAX_RECONNECT_INTERVAL: u64 = 30000;
const RESUME_QUERY: &str = "v=10&encoding=json";
const MAX_REQUESTED_USER_IDS: usize = 100;

/// Shard lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShardStatus {
    /// no socket
    #[default]
    Disconnected,
    /// socket is being opened
    Connecting,
    /// socket open, waiting for hello
    Handshaking,
    /// identify sent, waiting for READY
    Identifying,
    /// resume sent, waiting for RESUMED
    Resuming,
    /// session established
    Ready,
}

/// Socket state as seen by the shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SocketState {
    /// no socket
    #[default]
    None,
    /// connect requested, not open yet
    Connecting,
    /// open
    Open,
}

/// IO requested by the shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// open a socket, replacing any previous one
    Connect {
        /// target url
        url: Url,
    },
    /// write a text frame
    Send(String),
    /// close the socket with a close frame
    Close {
        /// close code
        code: u16,
        /// close reason
        reason: String,
    },
    /// drop the socket without a close frame
    Terminate,
}

/// Voice state update options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoiceStateOptions {
    /// self deafen
    pub self_deaf: bool,
    /// self mute
    pub self_mute: bool,
}

/// Unix time in milliseconds
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Next reconnect delay, grows by a random factor in [1, 3) up to the cap.
pub(crate) fn next_backoff(interval: u64) -> u64 {
    let grown = (interval as f64 * (fastrand::f64() * 2.0 + 1.0)).round() as u64;
    grown.min(MAX_RECONNECT_INTERVAL)
}

/// Resume url from the READY `resume_gateway_url` field.
pub(crate) fn resume_url(raw: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(raw)?;
    url.set_query(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(Some(RESUME_QUERY));
    Ok(url)
}

/// Ask for a zlib stream over the whole connection when the shard inflates frames.
pub(crate) fn transport_url(mut url: Url, compress: bool) -> Url {
    if compress && !url.query_pairs().any(|(key, _)| key == "compress") {
        url.query_pairs_mut().append_pair("compress", "zlib-stream");
    }
    url
}

fn global_bucket() -> Bucket<Command> {
    Bucket::with_reserved(120, Duration::from_secs(60), 5)
}

fn presence_bucket() -> Bucket<Command> {
    Bucket::new(5, Duration::from_secs(20))
}

/// One gateway connection
#[derive(Debug)]
pub struct Shard {
    pub(crate) id: u32,
    pub(crate) options: Arc<ShardOptions>,
    gateway_url: Url,
    pub(crate) cache: Arc<Cache>,
    events: EventSender,

    socket: SocketState,
    decoder: FrameDecoder,
    pub(crate) status: ShardStatus,
    pub(crate) sequence: u64,
    pub(crate) session_id: Option<String>,
    pub(crate) resume_url: Option<Url>,
    pub(crate) ready: bool,
    pub(crate) pre_ready: bool,
    pub(crate) connect_attempts: u32,
    pub(crate) reconnect_interval: u64,

    pub(crate) heartbeat: HeartbeatMonitor,
    reconnect_at: Option<Instant>,
    guild_create_deadline: Option<Instant>,

    global_bucket: Bucket<Command>,
    presence_bucket: Bucket<Command>,
    presence: Presence,

    pub(crate) pending_members: PendingMembers,
    pub(crate) member_sync_queue: VecDeque<String>,
    pub(crate) member_sync_pending: HashSet<String>,

    actions: VecDeque<Action>,
}

impl Shard {
    /// Create a disconnected shard.
    pub fn new(
        id: u32,
        options: Arc<ShardOptions>,
        gateway_url: Url,
        cache: Arc<Cache>,
        events: EventSender,
    ) -> Self {
        let presence = options.presence.clone();
        Self {
            id,
            decoder: FrameDecoder::new(options.compress),
            options,
            gateway_url,
            cache,
            events,
            socket: SocketState::None,
            status: ShardStatus::Disconnected,
            sequence: 0,
            session_id: None,
            resume_url: None,
            ready: false,
            pre_ready: false,
            connect_attempts: 0,
            reconnect_interval: INITIAL_RECONNECT_INTERVAL,
            heartbeat: HeartbeatMonitor::default(),
            reconnect_at: None,
            guild_create_deadline: None,
            global_bucket: global_bucket(),
            presence_bucket: presence_bucket(),
            presence,
            pending_members: PendingMembers::default(),
            member_sync_queue: VecDeque::new(),
            member_sync_pending: HashSet::new(),
            actions: VecDeque::new(),
        }
    }

    /// shard id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// lifecycle status
    pub fn status(&self) -> ShardStatus {
        self.status
    }

    /// socket state
    pub fn socket_state(&self) -> SocketState {
        self.socket
    }

    /// last seen sequence
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// current session id
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// url used to resume the session
    pub fn resume_url(&self) -> Option<&Url> {
        self.resume_url.as_ref()
    }

    /// whether every guild is loaded
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// last heartbeat round trip, `None` when unknown
    pub fn latency(&self) -> Option<Duration> {
        self.heartbeat.latency()
    }

    /// delay before the next queued reconnect
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval)
    }

    /// connect attempts since the last established session
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    /// current presence
    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Snapshot published to handles.
    pub fn info(&self) -> ShardInfo {
        ShardInfo {
            id: self.id,
            status: self.status,
            ready: self.ready,
            latency: self.heartbeat.latency(),
            session_id: self.session_id.clone(),
            sequence: self.sequence,
        }
    }

    /// Take the next IO action to execute.
    pub fn poll_action(&mut self) -> Option<Action> {
        self.actions.pop_front()
    }

    /// Earliest instant at which [`Shard::poll_timers`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.heartbeat.next_deadline(),
            self.reconnect_at,
            self.guild_create_deadline,
            self.global_bucket.refill_at(),
            self.presence_bucket.refill_at(),
            self.pending_members.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    // ===== notifications =====

    pub(crate) fn emit(&self, kind: EventKind) {
        self.events.emit(kind);
    }

    pub(crate) fn debug<S: Into<String>>(&self, message: S) {
        let message = message.into();
        log::debug!("[shard {}] {}", self.id, message);
        self.emit(EventKind::Debug(message));
    }

    pub(crate) fn warn<S: Into<String>>(&self, message: S) {
        let message = message.into();
        log::warn!("[shard {}] {}", self.id, message);
        self.emit(EventKind::Warn(message));
    }

    pub(crate) fn report(&self, error: Arc<ShardError>) {
        log::error!("[shard {}] {}", self.id, error);
        self.emit(EventKind::Error(error));
    }

    // ===== socket lifecycle =====

    /// Open a new connection, resuming the session if there is one.
    pub fn connect(&mut self) {
        if self.socket != SocketState::None {
            self.report(Arc::new(ShardError::AlreadyConnected));
            return;
        }

        self.reconnect_at = None;
        self.connect_attempts += 1;
        self.status = ShardStatus::Connecting;

        if self.options.token.is_empty() {
            let error = Arc::new(ShardError::InvalidToken);
            self.report(error.clone());
            self.emit(EventKind::Disconnect { error: Some(error) });
            self.hard_reset();
            return;
        }

        self.heartbeat.disarm();
        self.heartbeat.clear_connect_timeout();
        if self.options.compress {
            self.debug("Initializing zlib stream decompression");
        }
        self.decoder = FrameDecoder::new(self.options.compress);

        let url = match (&self.session_id, &self.resume_url) {
            (Some(_), Some(url)) => url.clone(),
            (Some(_), None) => {
                self.warn("Resume url is not currently present, the gateway may disconnect sooner");
                self.gateway_url.clone()
            }
            (None, _) => self.gateway_url.clone(),
        };
        let url = transport_url(url, self.options.compress);

        log::info!(
            "[shard {}] Connecting to {} | Attempt {}",
            self.id,
            url,
            self.connect_attempts
        );

        self.heartbeat
            .start_connect_timeout(self.options.connection_timeout, Instant::now());
        self.socket = SocketState::Connecting;
        self.actions.push_back(Action::Connect { url });
    }

    /// The socket requested by [`Action::Connect`] is open.
    pub fn on_open(&mut self) {
        if self.socket != SocketState::Connecting {
            log::trace!("[shard {}] Ignore open of a stale socket", self.id);
            return;
        }
        self.socket = SocketState::Open;
        self.status = ShardStatus::Handshaking;
        self.heartbeat.set_acked();
        self.emit(EventKind::Connect);
    }

    /// The socket requested by [`Action::Connect`] could not be opened.
    pub fn on_connect_failed(&mut self, source: ConnectError) {
        if self.socket != SocketState::Connecting {
            return;
        }
        self.report(Arc::new(ShardError::Connect { source }));
        self.on_close(CloseCode::Abnormal.code(), "");
    }

    /// Reading or writing the socket failed.
    pub fn on_socket_error(&mut self, source: SocketError) {
        self.report(Arc::new(ShardError::Socket { source }));
    }

    /// A frame arrived on the open socket.
    pub fn on_frame(&mut self, frame: Frame) {
        if self.socket != SocketState::Open {
            log::trace!("[shard {}] Ignore frame without open socket", self.id);
            return;
        }

        if let Frame::Close { code, reason } = frame {
            return self.on_close(code, &reason);
        }

        match self.decoder.push(frame) {
            Ok(Some(packet)) => self.on_packet(packet),
            Ok(None) => {}
            Err(source) => self.report(Arc::new(ShardError::Decode { source })),
        }
    }

    /// The socket closed, `code` 0 means no close frame was received.
    pub fn on_close(&mut self, code: u16, reason: &str) {
        if self.socket == SocketState::None {
            return;
        }

        if code == 0 {
            self.debug("WS closed without close frame");
            return self.disconnect(None, None);
        }

        self.debug(format!(
            "{} WS close: {}: {}",
            if code == 1000 { "Clean" } else { "Unclean" },
            code,
            reason
        ));

        let close = CloseCode::from(code);
        let effect = close.classify();

        if effect.invalidate_session {
            self.session_id = None;
        }
        if effect.reset_sequence {
            self.sequence = 0;
        }
        if effect.invalid_token {
            self.report(Arc::new(ShardError::InvalidToken));
        }

        let error = close.is_error().then(|| ShardError::Gateway {
            source: close.error(reason),
        });
        self.disconnect(effect.reconnect, error);
    }

    fn on_packet(&mut self, packet: Packet) {
        if let Some(seq) = packet.seq.filter(|seq| *seq > 0) {
            if seq > self.sequence + 1
                && self.socket != SocketState::None
                && self.status != ShardStatus::Resuming
            {
                self.warn(format!(
                    "Non-consecutive sequence ({} -> {})",
                    self.sequence, seq
                ));
            }
            self.sequence = seq;
        }

        match packet.message {
            Message::Dispatch(dispatch) => self.on_dispatch(dispatch),
            Message::Heartbeat => self.heartbeat(true),
            Message::InvalidSession(true) => {
                self.warn("Session invalidated, session may be resumable, attempting to resume");
                self.resume();
            }
            Message::InvalidSession(false) => {
                self.sequence = 0;
                self.session_id = None;
                self.warn("Session invalidated, session is not resumable, requesting a new session");
                self.identify();
            }
            Message::Reconnect => {
                self.debug("Reconnect requested by gateway");
                self.disconnect(Some(true), None);
            }
            Message::Hello(hello) => {
                self.emit(EventKind::Hello {
                    heartbeat_interval: hello.heartbeat_interval,
                });

                self.heartbeat.clear_connect_timeout();
                self.heartbeat.arm(
                    Duration::from_millis(hello.heartbeat_interval),
                    Instant::now(),
                );

                if self.session_id.is_some() {
                    self.resume();
                } else {
                    let identify = self.identify_command();
                    self.send(identify, false);
                    self.heartbeat(false);
                    self.status = ShardStatus::Identifying;
                }
            }
            Message::HeartbeatAck => self.heartbeat.on_ack(Instant::now()),
            Message::Unknown(op) => self.warn(format!("Unrecognized gateway packet: op {}", op)),
        }
    }

    /// Close the connection.
    ///
    /// `reconnect` falls back to the configured policy when `None`.
    pub fn disconnect(&mut self, reconnect: Option<bool>, error: Option<ShardError>) {
        let reconnect = reconnect.unwrap_or(self.options.auto_reconnect);

        if self.socket == SocketState::None {
            if !reconnect && self.reconnect_at.take().is_some() {
                self.debug("Cancelled queued reconnect");
                self.hard_reset();
            }
            return;
        }

        self.heartbeat.disarm();

        let action = if reconnect && self.session_id.is_some() {
            if self.socket == SocketState::Open {
                self.debug(format!("Closing websocket (state: {:?})", self.socket));
                Action::Terminate
            } else {
                Action::Close {
                    code: 4999,
                    reason: "Reconnect".to_string(),
                }
            }
        } else {
            Action::Close {
                code: 1000,
                reason: "Normal Close".to_string(),
            }
        };
        self.actions.push_back(action);

        self.socket = SocketState::None;
        self.reset();

        let error = error.map(Arc::new);
        if let Some(error) = &error {
            match error.close_code() {
                Some(code) if self.options.quiet_close_codes.contains(&code) => {
                    self.debug(error.to_string())
                }
                _ => self.report(error.clone()),
            }
        }
        self.emit(EventKind::Disconnect { error });

        if self.session_id.is_some()
            && self.options.invalidate_on_excess_attempts
            && self.connect_attempts >= self.options.max_reconnect_attempts
        {
            self.debug(format!(
                "Automatically invalidating session due to excessive resume attempts | Attempt {}",
                self.connect_attempts
            ));
            self.session_id = None;
        }

        if reconnect {
            if self.session_id.is_some() {
                self.debug(format!(
                    "Immediately reconnecting for potential resume | Attempt {}",
                    self.connect_attempts
                ));
                self.connect();
            } else {
                self.debug(format!(
                    "Queueing reconnect in {}ms | Attempt {}",
                    self.reconnect_interval, self.connect_attempts
                ));
                self.reconnect_at =
                    Some(Instant::now() + Duration::from_millis(self.reconnect_interval));
                self.reconnect_interval = next_backoff(self.reconnect_interval);
            }
        } else {
            self.hard_reset();
        }
    }

    /// Soft reset, run on every disconnect. Session id and sequence survive.
    pub fn reset(&mut self) {
        self.ready = false;
        self.pre_ready = false;
        self.pending_members.resolve_all();
        self.member_sync_queue.clear();
        self.member_sync_pending.clear();
        self.heartbeat.reset();
        self.guild_create_deadline = None;
        self.status = ShardStatus::Disconnected;
    }

    /// Forget the session and everything derived from it.
    pub fn hard_reset(&mut self) {
        self.reset();
        self.sequence = 0;
        self.session_id = None;
        self.resume_url = None;
        self.reconnect_interval = INITIAL_RECONNECT_INTERVAL;
        self.connect_attempts = 0;
        self.global_bucket.reset();
        self.presence_bucket.reset();
        self.presence = self.options.presence.clone();
    }

    /// READY or RESUMED arrived.
    pub(crate) fn on_session_established(&mut self) {
        self.connect_attempts = 0;
        self.reconnect_interval = INITIAL_RECONNECT_INTERVAL;
        self.heartbeat.clear_connect_timeout();
        self.status = ShardStatus::Ready;
    }

    // ===== timers =====

    /// Run every timer whose deadline passed.
    pub fn poll_timers(&mut self) {
        let now = Instant::now();

        if self.heartbeat.connect_expired(now)
            && matches!(
                self.status,
                ShardStatus::Connecting | ShardStatus::Handshaking
            )
        {
            self.disconnect(None, Some(ShardError::ConnectionTimeout));
        }

        if self.heartbeat.beat_due(now) {
            self.heartbeat(false);
        }

        if self.reconnect_at.map_or(false, |at| at <= now) {
            self.reconnect_at = None;
            self.connect();
        }

        if self.guild_create_deadline.map_or(false, |at| at <= now) {
            self.guild_create_deadline = None;
            self.check_ready();
        }

        if self.presence_bucket.refill_at().map_or(false, |at| at <= now) {
            for command in self.presence_bucket.drain(now) {
                self.submit(command, false, now);
            }
        }

        if self.global_bucket.refill_at().map_or(false, |at| at <= now) {
            for command in self.global_bucket.drain(now) {
                self.write(command);
            }
        }

        for (guild_id, received) in self.pending_members.expire(now) {
            self.debug(format!(
                "Member request for guild {} timed out with {} member(s)",
                guild_id, received
            ));
            if self.member_sync_pending.remove(&guild_id) {
                self.check_ready();
            }
        }
    }

    // ===== startup =====

    /// Emit `Ready` once no guild and no member sync is outstanding.
    pub(crate) fn check_ready(&mut self) {
        if self.ready {
            return;
        }

        while let Some(guild_id) = self.member_sync_queue.pop_front() {
            let options = RequestMembersOptions {
                presences: self.options.intents.contains(Intents::GUILD_PRESENCES),
                ..Default::default()
            };
            match self.request_guild_members(&guild_id, options, None) {
                Ok(_) => return,
                Err(err) => {
                    self.member_sync_pending.remove(&guild_id);
                    self.warn(format!(
                        "Cannot request members of guild {}: {}",
                        guild_id, err
                    ));
                }
            }
        }

        if self.member_sync_pending.is_empty() {
            self.ready = true;
            log::info!("[shard {}] Ready", self.id);
            self.emit(EventKind::Ready);
        }
    }

    /// Wait for the next GUILD_CREATE, or check readiness if nothing is pending.
    pub(crate) fn restart_guild_create_timeout(&mut self) {
        self.guild_create_deadline = None;
        if self.ready {
            return;
        }

        if self.cache.read().unavailable_guilds.is_empty() {
            self.check_ready();
        } else {
            self.guild_create_deadline = Some(Instant::now() + self.options.guild_create_timeout);
        }
    }

    /// Request every member of a guild, deferred until the startup sync reaches it.
    pub(crate) fn queue_member_sync(&mut self, guild_id: &str) {
        if self.ready {
            let options = RequestMembersOptions {
                presences: self.options.intents.contains(Intents::GUILD_PRESENCES),
                ..Default::default()
            };
            if let Err(err) = self.request_guild_members(guild_id, options, None) {
                self.warn(format!(
                    "Cannot request members of guild {}: {}",
                    guild_id, err
                ));
            }
        } else if self.member_sync_pending.insert(guild_id.to_string()) {
            self.member_sync_queue.push_back(guild_id.to_string());
        }
    }

    // ===== outbound =====

    /// Send a heartbeat, `requested` is true when the gateway asked for it.
    pub(crate) fn heartbeat(&mut self, requested: bool) {
        if matches!(
            self.status,
            ShardStatus::Resuming | ShardStatus::Identifying
        ) {
            return;
        }

        let now = Instant::now();
        if !requested {
            if !self.heartbeat.acked() {
                self.debug(format!(
                    "Heartbeat timeout; last sent {:?} ago, last ack {:?} ago, interval {:?}, status {:?}",
                    self.heartbeat.last_sent().map(|at| now - at),
                    self.heartbeat.last_ack().map(|at| now - at),
                    self.heartbeat.interval(),
                    self.status,
                ));
                return self.disconnect(None, Some(ShardError::MissedHeartbeatAck));
            }
            self.heartbeat.expect_ack();
        }

        self.heartbeat.on_sent(now);
        let seq = (self.sequence > 0).then_some(self.sequence);
        self.send(Command::Heartbeat(seq), true);
    }

    fn identify_command(&self) -> Command {
        Command::Identify(Identify {
            token: self.options.token.clone(),
            properties: self.options.connection_properties.clone(),
            compress: self.options.compress,
            large_threshold: self.options.large_threshold,
            shard: [self.id, self.options.max_shards],
            presence: self.presence.at(now_ms()),
            intents: self.options.intents,
        })
    }

    /// Start a new session.
    pub(crate) fn identify(&mut self) {
        let identify = self.identify_command();
        self.send(identify, false);
        self.status = ShardStatus::Identifying;
    }

    /// Resume the current session, identifying if there is none.
    pub(crate) fn resume(&mut self) {
        let session_id = match &self.session_id {
            Some(session_id) => session_id.clone(),
            None => {
                self.warn("No session to resume, identifying");
                return self.identify();
            }
        };

        self.status = ShardStatus::Resuming;
        let resume = Command::Resume(Resume {
            token: self.options.token.clone(),
            session_id,
            seq: self.sequence,
        });
        self.send(resume, false);
    }

    /// Queue a command through the rate limit buckets.
    ///
    /// Dropped when the socket is not open.
    pub(crate) fn send(&mut self, command: Command, high_priority: bool) {
        if self.socket != SocketState::Open {
            log::trace!(
                "[shard {}] Drop op {} without open socket",
                self.id,
                command.op() as u8
            );
            return;
        }

        let now = Instant::now();
        if matches!(command, Command::PresenceUpdate(_)) {
            for command in self.presence_bucket.queue(command, high_priority, now) {
                self.submit(command, high_priority, now);
            }
        } else {
            self.submit(command, high_priority, now);
        }
    }

    fn submit(&mut self, command: Command, high_priority: bool, now: Instant) {
        for command in self.global_bucket.queue(command, high_priority, now) {
            self.write(command);
        }
    }

    fn write(&mut self, command: Command) {
        if self.socket != SocketState::Open {
            log::trace!(
                "[shard {}] Drop queued op {}, socket closed meanwhile",
                self.id,
                command.op() as u8
            );
            return;
        }

        match command.encode() {
            Ok(text) => {
                self.debug(command.redacted());
                self.actions.push_back(Action::Send(text));
            }
            Err(err) => log::error!(
                "[shard {}] Encode op {} failed: {}",
                self.id,
                command.op() as u8,
                err
            ),
        }
    }

    /// Change the bot status and activities.
    pub fn edit_status(&mut self, status: Status, activities: Vec<Activity>) {
        self.presence.status = status;
        self.presence.activities = activities;
        let presence = self.presence.at(now_ms());
        self.send(Command::PresenceUpdate(presence), false);
    }

    /// Join, move between or leave (`channel_id` = `None`) voice channels.
    pub fn update_voice_state(
        &mut self,
        guild_id: &str,
        channel_id: Option<&str>,
        options: VoiceStateOptions,
    ) {
        self.send(
            Command::VoiceStateUpdate(UpdateVoiceState {
                channel_id: channel_id.map(str::to_string),
                guild_id: guild_id.to_string(),
                self_deaf: options.self_deaf,
                self_mute: options.self_mute,
            }),
            false,
        );
    }

    /// Request guild members, the received members are sent to `reply`.
    ///
    /// Returns the request nonce.
    pub fn request_guild_members(
        &mut self,
        guild_id: &str,
        options: RequestMembersOptions,
        reply: Option<oneshot::Sender<Vec<Value>>>,
    ) -> Result<String, RequestMembersError> {
        let intents = self.options.intents;

        ensure!(
            !options.is_all_members() || intents.contains(Intents::GUILD_MEMBERS),
            members::request_error::MissingMembersIntent
        );
        ensure!(
            !options.presences || intents.contains(Intents::GUILD_PRESENCES),
            members::request_error::MissingPresencesIntent
        );
        if let Some(user_ids) = &options.user_ids {
            ensure!(
                user_ids.len() <= MAX_REQUESTED_USER_IDS,
                members::request_error::TooManyUserIds {
                    count: user_ids.len()
                }
            );
        }

        let nonce = members::nonce();
        let query = match (&options.user_ids, options.query) {
            (None, None) => Some(String::new()),
            (_, query) => query,
        };
        let timeout = options.timeout.unwrap_or(self.options.request_timeout);

        self.pending_members.insert(
            nonce.clone(),
            guild_id.to_string(),
            Instant::now() + timeout,
            reply,
        );
        self.send(
            Command::RequestGuildMembers(RequestGuildMembers {
                guild_id: guild_id.to_string(),
                limit: options.limit,
                user_ids: options.user_ids,
                query,
                nonce: nonce.clone(),
                presences: options.presences,
            }),
            false,
        );

        Ok(nonce)
    }
}

#[cfg(test)]
pub(crate) mod test;
