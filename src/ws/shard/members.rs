use std::{collections::HashMap, time::Duration};

use serde_json::Value;
use snafu::prelude::*;
use tokio::{sync::oneshot, time::Instant};

/// Invalid guild member request
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)), module(request_error), context(suffix(false)))]
pub enum RequestMembersError {
    /// requesting every member needs the guild members intent
    #[snafu(display("requesting all members requires the GUILD_MEMBERS intent"))]
    MissingMembersIntent,

    /// presences need the guild presences intent
    #[snafu(display("requesting presences requires the GUILD_PRESENCES intent"))]
    MissingPresencesIntent,

    /// too many user ids in one request
    #[snafu(display("cannot request more than 100 user ids, got {count}"))]
    TooManyUserIds {
        /// number of ids requested
        count: usize,
    },

    /// the shard task has stopped
    #[snafu(display("shard is not running"))]
    ShardStopped,
}

/// Guild member request options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMembersOptions {
    /// max members to receive, 0 for no limit
    pub limit: u32,
    /// request these users only
    pub user_ids: Option<Vec<String>>,
    /// username prefix
    pub query: Option<String>,
    /// include presences
    pub presences: bool,
    /// give up after this long, the shard default when `None`
    pub timeout: Option<Duration>,
}

impl RequestMembersOptions {
    /// Whether this request asks for every member of the guild.
    pub fn is_all_members(&self) -> bool {
        self.user_ids.is_none() && self.query.as_deref().unwrap_or_default().is_empty()
    }
}

#[derive(Debug)]
struct Pending {
    guild_id: String,
    members: Vec<Value>,
    deadline: Instant,
    reply: Option<oneshot::Sender<Vec<Value>>>,
}

impl Pending {
    fn resolve(self) -> (String, usize) {
        let count = self.members.len();
        if let Some(reply) = self.reply {
            // receiver may have given up already
            let _ = reply.send(self.members);
        }
        (self.guild_id, count)
    }
}

/// Member requests waiting for their chunks, keyed by nonce.
#[derive(Debug, Default)]
pub(crate) struct PendingMembers {
    requests: HashMap<String, Pending>,
}

impl PendingMembers {
    pub fn insert(
        &mut self,
        nonce: String,
        guild_id: String,
        deadline: Instant,
        reply: Option<oneshot::Sender<Vec<Value>>>,
    ) {
        self.requests.insert(
            nonce,
            Pending {
                guild_id,
                members: Vec::new(),
                deadline,
                reply,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Buffer a chunk, returns false if the nonce is unknown.
    pub fn append(&mut self, nonce: &str, members: &[Value]) -> bool {
        match self.requests.get_mut(nonce) {
            Some(pending) => {
                pending.members.extend_from_slice(members);
                true
            }
            None => false,
        }
    }

    /// Resolve a request with everything received, returns its guild id.
    pub fn complete(&mut self, nonce: &str) -> Option<String> {
        self.requests
            .remove(nonce)
            .map(|pending| pending.resolve().0)
    }

    /// Resolve every request whose deadline passed, returns `(guild id, members received)`.
    pub fn expire(&mut self, now: Instant) -> Vec<(String, usize)> {
        let expired = self
            .requests
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(nonce, _)| nonce.clone())
            .collect::<Vec<_>>();

        expired
            .into_iter()
            .filter_map(|nonce| self.requests.remove(&nonce))
            .map(Pending::resolve)
            .collect()
    }

    /// Resolve every request with partial results.
    pub fn resolve_all(&mut self) {
        for (_, pending) in self.requests.drain() {
            pending.resolve();
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.requests.values().map(|pending| pending.deadline).min()
    }
}

/// Random 32 hex chars request nonce
pub(crate) fn nonce() -> String {
    format!("{:032x}", fastrand::u128(..))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nonce_shape() {
        let a = nonce();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, nonce());
    }

    #[test]
    fn test_all_members_detection() {
        assert!(RequestMembersOptions::default().is_all_members());
        assert!(RequestMembersOptions {
            query: Some(String::new()),
            ..Default::default()
        }
        .is_all_members());
        assert!(!RequestMembersOptions {
            query: Some("ab".to_string()),
            ..Default::default()
        }
        .is_all_members());
        assert!(!RequestMembersOptions {
            user_ids: Some(vec!["1".to_string()]),
            ..Default::default()
        }
        .is_all_members());
    }

    #[tokio::test]
    async fn test_complete_sends_buffered_members() {
        let now = Instant::now();
        let (tx, rx) = oneshot::channel();
        let mut pending = PendingMembers::default();
        pending.insert("n".to_string(), "g".to_string(), now, Some(tx));

        assert!(pending.append("n", &[json!({"id": "1"})]));
        assert!(pending.append("n", &[json!({"id": "2"})]));
        assert!(!pending.append("other", &[json!({"id": "3"})]));

        assert_eq!(pending.complete("n").as_deref(), Some("g"));
        assert_eq!(rx.await.unwrap().len(), 2);
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_expire_resolves_partial() {
        let now = Instant::now();
        let (tx, rx) = oneshot::channel();
        let mut pending = PendingMembers::default();
        pending.insert(
            "late".to_string(),
            "g".to_string(),
            now + Duration::from_secs(1),
            Some(tx),
        );
        pending.insert(
            "later".to_string(),
            "h".to_string(),
            now + Duration::from_secs(5),
            None,
        );
        pending.append("late", &[json!({"id": "1"})]);

        assert_eq!(pending.next_deadline(), Some(now + Duration::from_secs(1)));
        assert!(pending.expire(now).is_empty());

        let expired = pending.expire(now + Duration::from_secs(1));
        assert_eq!(expired, vec![("g".to_string(), 1)]);
        assert_eq!(rx.await.unwrap(), vec![json!({"id": "1"})]);
        assert_eq!(pending.next_deadline(), Some(now + Duration::from_secs(5)));
    }
}
