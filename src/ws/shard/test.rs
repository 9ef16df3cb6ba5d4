use std::{sync::Arc, time::Duration};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;

use super::*;
use crate::{
    cache::Cache,
    config::{Intents, ShardOptions, Status},
    ws::{
        event::{Event, EventKind, EventSender},
        inflate::test::compress_messages,
        message::Dispatch,
        socket::Frame,
    },
};

const GATEWAY: &str = "wss://gateway.test/?v=10&encoding=json";

/// A shard wired to an in-memory event channel.
pub(crate) struct TestShard {
    pub shard: Shard,
    events: mpsc::UnboundedReceiver<Event>,
}

pub(crate) fn options() -> ShardOptions {
    ShardOptions {
        intents: Intents::all(),
        ..ShardOptions::new("token")
    }
}

pub(crate) fn guild_fixture() -> Value {
    json!({
        "id": "g",
        "name": "guild",
        "member_count": 2,
        "channels": [
            {"id": "c1", "type": 0, "name": "general"},
            {"id": "v1", "type": 2, "name": "voice"},
            {"id": "v2", "type": 2, "name": "stage"},
            {"id": "f1", "type": 15, "name": "forum"},
        ],
        "threads": [{"id": "t1", "parent_id": "c1", "type": 11, "name": "thread"}],
        "members": [
            {"user": {"id": "u1", "username": "someone"}, "roles": []},
            {"user": {"id": "me", "username": "bot"}, "roles": []},
        ],
        "voice_states": [{"user_id": "u1", "channel_id": "v1"}],
        "roles": [{"id": "g", "name": "@everyone"}],
    })
}

impl TestShard {
    pub fn with_options(options: ShardOptions) -> Self {
        let _ = pretty_env_logger::try_init();
        let (tx, events) = mpsc::unbounded_channel();
        let shard = Shard::new(
            0,
            Arc::new(options),
            Url::parse(GATEWAY).unwrap(),
            Arc::new(Cache::new()),
            EventSender::new(0, tx),
        );
        Self { shard, events }
    }

    pub fn new() -> Self {
        Self::with_options(options())
    }

    /// A shard which went through hello, READY and the startup GUILD_CREATE of [`guild_fixture`].
    pub fn with_guild() -> Self {
        let mut t = Self::new();
        t.open();
        t.hello(41250);
        t.packet(
            1,
            "READY",
            json!({
                "session_id": "session",
                "resume_gateway_url": "wss://resume.test",
                "user": {"id": "me", "username": "bot"},
                "application": {"id": "app"},
                "guilds": [{"id": "g", "unavailable": true}],
            }),
        );
        t.packet(2, "GUILD_CREATE", guild_fixture());
        assert!(t.shard.is_ready());
        t.actions();
        t.events();
        t
    }

    /// Connect and open the socket.
    pub fn open(&mut self) {
        self.shard.connect();
        self.shard.on_open();
    }

    pub fn frame(&mut self, value: Value) {
        self.shard.on_frame(Frame::Text(value.to_string()));
    }

    pub fn hello(&mut self, interval: u64) {
        self.frame(json!({"op": 10, "d": {"heartbeat_interval": interval}}));
    }

    pub fn packet(&mut self, seq: u64, name: &str, data: Value) {
        self.frame(json!({"op": 0, "s": seq, "t": name, "d": data}));
    }

    pub fn close(&mut self, code: u16) {
        self.shard.on_frame(Frame::Close {
            code,
            reason: String::new(),
        });
    }

    pub fn dispatch(&mut self, name: &str, data: Value) {
        self.shard.on_dispatch(Dispatch {
            name: name.to_string(),
            data,
        });
    }

    pub fn actions(&mut self) -> Vec<Action> {
        std::iter::from_fn(|| self.shard.poll_action()).collect()
    }

    /// Payloads written since the last call.
    pub fn sent(&mut self) -> Vec<Value> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::Send(text) => Some(serde_json::from_str(&text).unwrap()),
                _ => None,
            })
            .collect()
    }

    /// Events raised since the last call.
    pub fn events(&mut self) -> Vec<EventKind> {
        std::iter::from_fn(|| self.events.try_recv().ok())
            .map(|event| event.kind)
            .collect()
    }

    pub fn find<T>(&mut self, f: impl FnMut(EventKind) -> Option<T>) -> Option<T> {
        self.events().into_iter().find_map(f)
    }

    pub fn find_last<T>(&mut self, f: impl FnMut(EventKind) -> Option<T>) -> Option<T> {
        self.events().into_iter().filter_map(f).last()
    }
}

fn ops(sent: &[Value]) -> Vec<u64> {
    sent.iter().filter_map(|value| value["op"].as_u64()).collect()
}

fn has_error(events: &[EventKind], check: impl Fn(&ShardError) -> bool) -> bool {
    events.iter().any(|kind| match kind {
        EventKind::Error(err) => check(err),
        _ => false,
    })
}

fn disconnect_error(events: &[EventKind]) -> Option<Option<Arc<ShardError>>> {
    events.iter().find_map(|kind| match kind {
        EventKind::Disconnect { error } => Some(error.clone()),
        _ => None,
    })
}

#[tokio::test(start_paused = true)]
async fn test_hello_identify_ready() {
    let mut t = TestShard::new();
    t.shard.connect();
    assert_eq!(t.shard.status(), ShardStatus::Connecting);
    assert_eq!(
        t.actions(),
        vec![Action::Connect {
            url: Url::parse(GATEWAY).unwrap()
        }]
    );

    t.shard.on_open();
    assert_eq!(t.shard.status(), ShardStatus::Handshaking);

    t.hello(41250);
    let sent = t.sent();
    assert_eq!(ops(&sent), vec![2, 1]);
    assert_eq!(sent[0]["d"]["token"], "token");
    assert_eq!(sent[0]["d"]["shard"], json!([0, 1]));
    assert_eq!(sent[0]["d"]["intents"], json!(Intents::all().bits()));
    assert_eq!(sent[1]["d"], Value::Null);
    assert_eq!(t.shard.status(), ShardStatus::Identifying);

    t.packet(
        1,
        "READY",
        json!({
            "session_id": "session",
            "resume_gateway_url": "wss://resume.test/?v=9",
            "user": {"id": "me"},
            "application": {"id": "app"},
            "guilds": [],
        }),
    );

    assert_eq!(t.shard.status(), ShardStatus::Ready);
    assert_eq!(t.shard.session_id(), Some("session"));
    assert_eq!(t.shard.sequence(), 1);
    assert_eq!(
        t.shard.resume_url().map(Url::as_str),
        Some("wss://resume.test/?v=10&encoding=json")
    );
    assert!(t.shard.is_ready());
    assert_eq!(t.shard.cache.read().user_id.as_deref(), Some("me"));
    assert_eq!(t.shard.cache.read().application_id.as_deref(), Some("app"));

    // one timer, one beat per interval
    assert!(t.shard.heartbeat.is_armed());
    assert_eq!(t.shard.heartbeat.interval(), Some(Duration::from_millis(41250)));
    t.frame(json!({"op": 11}));
    for _ in 0..2 {
        tokio::time::advance(Duration::from_millis(41250)).await;
        t.shard.poll_timers();
        let sent = t.sent();
        assert_eq!(ops(&sent), vec![1]);
        assert_eq!(sent[0]["d"], 1);
        t.frame(json!({"op": 11}));
    }

    let events = t.events();
    let pre_ready = events
        .iter()
        .position(|kind| matches!(kind, EventKind::PreReady))
        .unwrap();
    let ready = events
        .iter()
        .position(|kind| matches!(kind, EventKind::Ready))
        .unwrap();
    assert!(pre_ready < ready);
}

#[tokio::test(start_paused = true)]
async fn test_compressed_connection_decodes_hello() {
    let mut t = TestShard::with_options(ShardOptions {
        compress: true,
        ..options()
    });
    t.shard.connect();
    assert_eq!(
        t.actions(),
        vec![Action::Connect {
            url: Url::parse(&format!("{}&compress=zlib-stream", GATEWAY)).unwrap()
        }]
    );

    t.shard.on_open();
    let hello = br#"{"op":10,"d":{"heartbeat_interval":41250}}"#;
    let frame = compress_messages(&[hello]).remove(0);
    t.shard.on_frame(Frame::Binary(frame));

    assert_eq!(ops(&t.sent()), vec![2, 1]);
    assert_eq!(t.shard.status(), ShardStatus::Identifying);
}

#[test]
fn test_transport_url_adds_compression_once() {
    let resume = resume_url("wss://resume.test").unwrap();
    assert_eq!(
        transport_url(resume.clone(), false).as_str(),
        "wss://resume.test/?v=10&encoding=json"
    );

    let compressed = transport_url(resume, true);
    assert_eq!(
        compressed.as_str(),
        "wss://resume.test/?v=10&encoding=json&compress=zlib-stream"
    );
    assert_eq!(transport_url(compressed.clone(), true), compressed);
}

#[tokio::test(start_paused = true)]
async fn test_ready_waits_for_guilds() {
    let mut t = TestShard::new();
    t.open();
    t.hello(41250);
    t.packet(
        1,
        "READY",
        json!({
            "session_id": "session",
            "resume_gateway_url": "wss://resume.test",
            "user": {"id": "me"},
            "guilds": [{"id": "g", "unavailable": true}, {"id": "h", "unavailable": true}],
        }),
    );
    assert!(!t.shard.is_ready());

    t.packet(2, "GUILD_CREATE", guild_fixture());
    assert!(!t.shard.is_ready());
    assert!(t.shard.cache.read().guilds.has("g"));

    tokio::time::advance(Duration::from_secs(2)).await;
    t.shard.poll_timers();
    assert!(t.shard.is_ready());
    assert!(t
        .events()
        .iter()
        .all(|kind| !matches!(kind, EventKind::GuildCreate { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_get_all_users_holds_ready_until_chunk() {
    let mut t = TestShard::with_options(ShardOptions {
        get_all_users: true,
        ..options()
    });
    t.open();
    t.hello(41250);
    t.packet(
        1,
        "READY",
        json!({
            "session_id": "session",
            "resume_gateway_url": "wss://resume.test",
            "user": {"id": "me"},
            "guilds": [{"id": "g", "unavailable": true}],
        }),
    );
    let mut guild = guild_fixture();
    guild["member_count"] = json!(10);
    t.packet(2, "GUILD_CREATE", guild);
    assert!(!t.shard.is_ready());

    let request = t
        .sent()
        .into_iter()
        .find(|value| value["op"] == 8)
        .unwrap();
    assert_eq!(request["d"]["guild_id"], "g");
    assert_eq!(request["d"]["query"], "");
    assert_eq!(request["d"]["presences"], true);

    let nonce = request["d"]["nonce"].as_str().unwrap().to_string();
    t.packet(
        3,
        "GUILD_MEMBERS_CHUNK",
        json!({
            "guild_id": "g",
            "nonce": nonce,
            "chunk_index": 0,
            "chunk_count": 1,
            "members": [{"user": {"id": "u3"}, "roles": []}],
        }),
    );
    assert!(t.shard.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_opcode_resumes() {
    let mut t = TestShard::with_guild();

    t.frame(json!({"op": 7, "d": null}));
    let actions = t.actions();
    assert_eq!(actions[0], Action::Terminate);
    assert_eq!(
        actions[1],
        Action::Connect {
            url: Url::parse("wss://resume.test/?v=10&encoding=json").unwrap()
        }
    );
    assert!(matches!(disconnect_error(&t.events()), Some(None)));

    t.shard.on_open();
    t.hello(41250);
    let sent = t.sent();
    assert_eq!(ops(&sent), vec![6]);
    assert_eq!(
        sent[0]["d"],
        json!({"token": "token", "session_id": "session", "seq": 2})
    );
    assert_eq!(t.shard.status(), ShardStatus::Resuming);

    t.packet(3, "RESUMED", json!({}));
    assert_eq!(t.shard.status(), ShardStatus::Ready);
    assert_eq!(t.shard.connect_attempts(), 0);
    assert!(t
        .events()
        .iter()
        .any(|kind| matches!(kind, EventKind::Resumed)));
}

#[tokio::test(start_paused = true)]
async fn test_missed_heartbeat_ack_disconnects() {
    let mut t = TestShard::with_guild();
    t.frame(json!({"op": 11}));
    assert_eq!(t.shard.latency(), Some(Duration::ZERO));

    tokio::time::advance(Duration::from_millis(41250)).await;
    t.shard.poll_timers();
    assert_eq!(ops(&t.sent()), vec![1]);

    tokio::time::advance(Duration::from_millis(41250)).await;
    t.shard.poll_timers();
    let actions = t.actions();
    assert!(!actions.iter().any(|action| matches!(action, Action::Send(_))));
    assert_eq!(actions[0], Action::Terminate);

    let error = disconnect_error(&t.events()).flatten().unwrap();
    assert!(matches!(*error, ShardError::MissedHeartbeatAck));
}

#[tokio::test(start_paused = true)]
async fn test_gateway_heartbeat_request_is_answered() {
    let mut t = TestShard::with_guild();
    t.frame(json!({"op": 1, "d": null}));
    let sent = t.sent();
    assert_eq!(ops(&sent), vec![1]);
    assert_eq!(sent[0]["d"], 2);
}

#[test]
fn test_backoff_bounds() {
    for _ in 0..100 {
        let next = next_backoff(1000);
        assert!((1000..=3000).contains(&next), "{}", next);
    }
    for _ in 0..100 {
        assert!(next_backoff(20000) <= 30000);
    }
    assert_eq!(next_backoff(30000), 30000);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_then_resets() {
    let mut t = TestShard::new();
    t.open();
    t.actions();
    t.close(1006);

    assert_eq!(
        t.actions(),
        vec![Action::Close {
            code: 1000,
            reason: "Normal Close".to_string()
        }]
    );
    let interval = t.shard.reconnect_interval();
    assert!(interval >= Duration::from_millis(1000) && interval <= Duration::from_millis(3000));

    // quiet code: debug notice, no error
    let events = t.events();
    assert!(!has_error(&events, |_| true));
    assert_eq!(
        disconnect_error(&events).flatten().and_then(|err| err.close_code()),
        Some(1006)
    );

    tokio::time::advance(Duration::from_millis(1000)).await;
    t.shard.poll_timers();
    assert!(matches!(t.actions().as_slice(), [Action::Connect { .. }]));
    assert_eq!(t.shard.connect_attempts(), 2);

    t.shard.on_open();
    t.hello(41250);
    t.packet(
        1,
        "READY",
        json!({"session_id": "s", "resume_gateway_url": "wss://r.test", "user": {"id": "me"}, "guilds": []}),
    );
    assert_eq!(t.shard.reconnect_interval(), Duration::from_millis(1000));
    assert_eq!(t.shard.connect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_global_bucket_defers_beyond_capacity() {
    let mut t = TestShard::new();
    t.open();
    t.hello(100_000);
    assert_eq!(t.sent().len(), 2);
    t.packet(
        1,
        "READY",
        json!({"session_id": "s", "resume_gateway_url": "wss://r.test", "user": {"id": "me"}, "guilds": []}),
    );

    for _ in 0..120 {
        t.shard
            .update_voice_state("g", Some("v1"), VoiceStateOptions::default());
    }
    assert_eq!(t.sent().len(), 113);

    // reserved tokens still let heartbeats through
    t.frame(json!({"op": 1}));
    assert_eq!(ops(&t.sent()), vec![1]);

    tokio::time::advance(Duration::from_secs(60)).await;
    t.shard.poll_timers();
    let sent = t.sent();
    assert_eq!(sent.len(), 7);
    assert!(sent.iter().all(|value| value["op"] == 4));
}

#[tokio::test(start_paused = true)]
async fn test_presence_updates_are_paced() {
    let mut t = TestShard::new();
    t.open();
    t.hello(100_000);
    t.sent();

    for _ in 0..6 {
        t.shard.edit_status(Status::Idle, Vec::new());
    }
    let sent = t.sent();
    assert_eq!(sent.len(), 5);
    assert_eq!(sent[0]["d"]["status"], "idle");
    assert!(sent[0]["d"]["since"].is_u64());

    tokio::time::advance(Duration::from_secs(20)).await;
    t.shard.poll_timers();
    assert_eq!(ops(&t.sent()), vec![3]);
}

#[tokio::test(start_paused = true)]
async fn test_member_request_validation() {
    let mut t = TestShard::with_options(ShardOptions::new("token"));
    t.open();
    t.hello(41250);

    assert_eq!(
        t.shard
            .request_guild_members("g", RequestMembersOptions::default(), None),
        Err(RequestMembersError::MissingMembersIntent)
    );
    assert_eq!(
        t.shard.request_guild_members(
            "g",
            RequestMembersOptions {
                user_ids: Some(vec!["1".to_string()]),
                presences: true,
                ..Default::default()
            },
            None
        ),
        Err(RequestMembersError::MissingPresencesIntent)
    );
    assert_eq!(
        t.shard.request_guild_members(
            "g",
            RequestMembersOptions {
                user_ids: Some((0..101).map(|id| id.to_string()).collect()),
                ..Default::default()
            },
            None
        ),
        Err(RequestMembersError::TooManyUserIds { count: 101 })
    );

    t.sent();
    let nonce = t
        .shard
        .request_guild_members(
            "g",
            RequestMembersOptions {
                query: Some("ab".to_string()),
                limit: 10,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    assert_eq!(nonce.len(), 32);
    let sent = t.sent();
    assert_eq!(
        sent[0]["d"],
        json!({"guild_id": "g", "limit": 10, "query": "ab", "nonce": nonce, "presences": false})
    );
}

#[tokio::test(start_paused = true)]
async fn test_authentication_failed_close() {
    let mut t = TestShard::with_guild();
    t.close(4004);

    let events = t.events();
    assert!(has_error(&events, |err| matches!(err, ShardError::InvalidToken)));
    assert!(has_error(&events, |err| err.close_code() == Some(4004)));
    assert!(disconnect_error(&events).is_some());

    assert!(!t
        .actions()
        .iter()
        .any(|action| matches!(action, Action::Connect { .. })));
    assert_eq!(t.shard.status(), ShardStatus::Disconnected);
    assert_eq!(t.shard.socket_state(), SocketState::None);
    assert_eq!(t.shard.session_id(), None);
    assert_eq!(t.shard.sequence(), 0);
    assert_eq!(t.shard.next_deadline(), None);
}

#[tokio::test(start_paused = true)]
async fn test_clean_close_does_not_reconnect() {
    let mut t = TestShard::with_guild();
    t.close(1000);

    let events = t.events();
    assert!(!has_error(&events, |_| true));
    assert!(matches!(disconnect_error(&events), Some(None)));
    assert!(!t
        .actions()
        .iter()
        .any(|action| matches!(action, Action::Connect { .. })));
    assert_eq!(t.shard.session_id(), None);
    assert_eq!(t.shard.next_deadline(), None);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_sequence_close_resets_sequence() {
    let mut t = TestShard::with_guild();
    t.close(4007);

    assert_eq!(t.shard.sequence(), 0);
    assert_eq!(t.shard.session_id(), Some("session"));
    assert!(t
        .actions()
        .iter()
        .any(|action| matches!(action, Action::Connect { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let mut t = TestShard::new();
    t.shard.connect();
    t.actions();

    tokio::time::advance(Duration::from_secs(30)).await;
    t.shard.poll_timers();

    let events = t.events();
    assert!(has_error(&events, |err| matches!(err, ShardError::ConnectionTimeout)));
    assert_eq!(t.shard.socket_state(), SocketState::None);
    assert!(t.shard.next_deadline().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_session() {
    let mut t = TestShard::with_guild();

    t.frame(json!({"op": 9, "d": true}));
    assert_eq!(ops(&t.sent()), vec![6]);
    assert_eq!(t.shard.status(), ShardStatus::Resuming);

    t.frame(json!({"op": 9, "d": false}));
    let sent = t.sent();
    assert_eq!(ops(&sent), vec![2]);
    assert_eq!(t.shard.session_id(), None);
    assert_eq!(t.shard.sequence(), 0);
    assert_eq!(t.shard.status(), ShardStatus::Identifying);
}

#[test]
fn test_empty_token_is_refused() {
    let mut t = TestShard::with_options(ShardOptions::new(""));
    t.shard.connect();

    let events = t.events();
    assert!(has_error(&events, |err| matches!(err, ShardError::InvalidToken)));
    assert!(disconnect_error(&events).is_some());
    assert!(t.actions().is_empty());
    assert_eq!(t.shard.status(), ShardStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_twice_is_rejected() {
    let mut t = TestShard::new();
    t.shard.connect();
    t.shard.connect();

    assert_eq!(t.actions().len(), 1);
    assert!(has_error(&t.events(), |err| matches!(
        err,
        ShardError::AlreadyConnected
    )));
}

#[tokio::test(start_paused = true)]
async fn test_sequence_gap_warns() {
    let mut t = TestShard::with_guild();
    t.packet(9, "TYPING_START", json!({"channel_id": "c1", "user_id": "u1", "timestamp": 1}));

    assert_eq!(t.shard.sequence(), 9);
    assert!(t
        .events()
        .iter()
        .any(|kind| matches!(kind, EventKind::Warn(message) if message.contains("2 -> 9"))));
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_error_is_reported() {
    let mut t = TestShard::with_guild();
    t.packet(3, "GUILD_MEMBER_ADD", json!({"guild_id": "g"}));

    let events = t.events();
    assert!(matches!(events[0], EventKind::Packet(_)));
    assert!(has_error(&events, |err| matches!(err, ShardError::Dispatch { .. })));
    assert_eq!(t.shard.status(), ShardStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_ready_without_session_keeps_identifying() {
    let mut t = TestShard::new();
    t.open();
    t.hello(41250);
    t.actions();

    t.packet(1, "READY", json!({"user": {"id": "me"}, "guilds": []}));

    assert_eq!(t.shard.status(), ShardStatus::Identifying);
    assert_eq!(t.shard.session_id(), None);
    assert!(!t.shard.is_ready());
    assert!(has_error(&t.events(), |err| matches!(err, ShardError::Dispatch { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_hard_reset_drops_queued_commands() {
    let mut t = TestShard::new();
    t.open();
    t.hello(100_000);
    t.sent();

    for _ in 0..6 {
        t.shard.edit_status(Status::Idle, Vec::new());
    }
    assert_eq!(t.sent().len(), 5);
    assert_eq!(t.shard.presence_bucket.queued(), 1);

    t.shard.hard_reset();
    assert_eq!(t.shard.presence_bucket.queued(), 0);
    assert_eq!(t.shard.presence_bucket.remaining(), 5);
    assert_eq!(t.shard.global_bucket.queued(), 0);

    tokio::time::advance(Duration::from_secs(20)).await;
    t.shard.poll_timers();
    assert!(t.sent().is_empty());
}
