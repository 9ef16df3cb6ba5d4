//! # Shardline
//!
//! A Discord gateway shard engine.
//!
//! Each [`ws::Shard`] is a synchronous state machine for one gateway connection: it decodes
//! frames, keeps the session alive, paces outbound commands and turns dispatch events into
//! [`cache`] mutations plus [`ws::Event`]s. A [`ws::ShardRunner`] task drives it over a real
//! websocket, and [`Client`] wires shards, cache and [`subscriber::Subscriber`]s together.

#![warn(missing_debug_implementations, missing_docs)]
#![forbid(unsafe_code)]

pub mod api;
pub mod bucket;
pub mod cache;
pub mod config;
pub mod subscriber;
pub mod ws;

mod client;
mod error;

pub use client::Client;
pub use error::Error;

/// framework result type
pub type Result<T> = std::result::Result<T, Error>;
