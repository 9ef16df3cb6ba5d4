//! Event subscribers.

use std::{borrow::Cow, future::Future, sync::Arc};

use crate::{api, cache::Cache, ws::Event, ws::ShardHandle};

/// What a subscriber gets when it is loaded.
#[derive(Debug, Clone)]
pub struct Context {
    /// http api client
    pub api: api::Client,
    /// cache shared by every shard
    pub cache: Arc<Cache>,
    /// handles of every running shard, indexed by shard id
    pub shards: Vec<ShardHandle>,
}

/// Subscriber can be register to client and process event.
#[async_trait::async_trait]
pub trait Subscriber {
    /// subscriber name
    fn name(&self) -> Cow<'static, str>;
    /// callback will be execute when a client load this subscriber
    async fn on_loaded(&mut self, context: Context);
    /// callback will be execute for every event of every shard
    async fn on_event(self: Arc<Self>, event: Arc<Event>);
}

#[async_trait::async_trait]
impl<F, Fut> Subscriber for F
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    fn name(&self) -> Cow<'static, str> {
        "Anonymous Fn Subscriber".into()
    }

    async fn on_loaded(&mut self, _context: Context) {}

    async fn on_event(self: Arc<Self>, event: Arc<Event>) {
        self(event).await
    }
}
