use std::sync::Arc;

use futures_util::StreamExt;
use snafu::prelude::*;
use url::Url;

use crate::{
    api::{self, types::gateway_url},
    cache::Cache,
    config::ShardOptions,
    error,
    subscriber::{Context, Subscriber},
    ws::{EventSender, EventStream, Shard, ShardHandle, ShardRunner},
    Result,
};

type BoxedSubscriber = Box<dyn Subscriber + Send + Sync>;

/// Shardline instance: every shard of one bot plus the cache they share
pub struct Client {
    options: Arc<ShardOptions>,
    api_client: api::Client,
    cache: Arc<Cache>,
    subscribers: Vec<BoxedSubscriber>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.options)
            .field("cache", &self.cache)
            .field(
                "subscribers",
                &self
                    .subscribers
                    .iter()
                    .map(|subscriber| subscriber.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Client {
    /// Create new framework instance
    pub fn new(options: ShardOptions) -> Result<Self> {
        ensure!(options.max_shards > 0, error::NoShards);

        let api_client =
            api::Client::new_from_bot_token(&options.token).context(error::CallAPIFailed)?;
        let cache = Arc::new(Cache::with_limits(options.cache));

        log::info!("Create api client and cache success");

        Ok(Self {
            options: Arc::new(options),
            api_client,
            cache,
            subscribers: Vec::new(),
        })
    }

    /// The cache every shard writes to
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Register a subscriber, it receives every event once [`Client::run`] starts
    pub fn subscribe<S>(&mut self, subscriber: S)
    where
        S: Subscriber + Send + Sync + 'static,
    {
        log::debug!("Subscriber {} registered", subscriber.name());
        self.subscribers.push(Box::new(subscriber));
    }

    /// Configured gateway url, or the one discovered with the bot token
    pub async fn gateway_url(&self) -> Result<Url> {
        match &self.options.gateway_url {
            Some(url) => gateway_url(url).with_context(|_| error::InvalidGatewayURL { url }),
            None => {
                log::info!("Getting gateway url ...");
                self.api_client
                    .gateway_url()
                    .await
                    .context(error::CallAPIFailed)
            }
        }
    }

    /// Spawn one runner task per shard and ask every shard to connect.
    ///
    /// Returns the handles, indexed by shard id, and the merged event stream of all shards.
    pub async fn spawn_shards(&self) -> Result<(Vec<ShardHandle>, EventStream)> {
        let url = self.gateway_url().await?;
        log::debug!("Got gateway url: {}", url);

        let (tx, stream) = EventStream::channel();
        let mut handles = Vec::with_capacity(self.options.max_shards as usize);

        for id in 0..self.options.max_shards {
            let shard = Shard::new(
                id,
                self.options.clone(),
                url.clone(),
                self.cache.clone(),
                EventSender::new(id, tx.clone()),
            );
            let (runner, handle) = ShardRunner::new(shard);
            tokio::spawn(runner.run());

            if handle.connect().is_err() {
                log::warn!("Shard {} stopped before connecting", id);
            }
            handles.push(handle);
        }

        log::info!("Spawned {} shard(s)", handles.len());
        Ok((handles, stream))
    }

    /// Run every shard and feed their events to the subscribers.
    ///
    /// Returns once the event stream of every shard has ended.
    pub async fn run(self) -> Result<()> {
        let (shards, mut stream) = self.spawn_shards().await?;

        let context = Context {
            api: self.api_client.clone(),
            cache: self.cache.clone(),
            shards,
        };

        let mut subscribers = Vec::with_capacity(self.subscribers.len());
        for mut subscriber in self.subscribers {
            subscriber.on_loaded(context.clone()).await;
            log::debug!("Subscriber {} loaded", subscriber.name());
            subscribers.push(Arc::<dyn Subscriber + Send + Sync>::from(subscriber));
        }

        log::info!("Start receiving events");

        while let Some(event) = stream.next().await {
            log::trace!("Shard {} event: {:?}", event.shard_id, event.kind);
            let event = Arc::new(event);
            for subscriber in &subscribers {
                tokio::spawn(subscriber.clone().on_event(event.clone()));
            }
        }

        log::info!("Every shard stopped");
        Ok(())
    }
}
