use std::sync::Arc;

use shardline::{
    config::{Intents, ShardOptions},
    ws::{Event, EventKind},
    Client,
};

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let token = match std::env::var("BOT_TOKEN") {
        Ok(token) => token,
        Err(_) => {
            println!("No BOT_TOKEN env var or invalid");
            std::process::exit(1);
        }
    };

    let options = ShardOptions {
        intents: Intents::default() | Intents::GUILD_MEMBERS,
        compress: true,
        ..ShardOptions::new(token)
    };

    let mut client = Client::new(options).unwrap();
    let cache = client.cache().clone();

    client.subscribe(move |event: Arc<Event>| {
        let cache = cache.clone();
        async move {
            match &event.kind {
                EventKind::Ready => {
                    let state = cache.read();
                    log::info!(
                        "Shard {} ready, {} guild(s) cached",
                        event.shard_id,
                        state.guilds.len()
                    );
                }
                EventKind::MessageCreate { message } => {
                    log::info!("Message: {}", message["content"]);
                }
                EventKind::Error(err) => log::error!("Shard {}: {}", event.shard_id, err),
                _ => {}
            }
        }
    });

    client.run().await.unwrap();
}
