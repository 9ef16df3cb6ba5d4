//! framework error types

use snafu::prelude::*;

use super::api::{types::ParseGatewayURLError, Error as APIError};

/// framework error type
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    /// Call discord api failed
    #[snafu(display("call discord api failed: {source}"))]
    CallAPIFailed {
        /// source error
        source: APIError,
    },

    /// Configured websocket gateway url is invalid
    #[snafu(display("invalid gateway url {url}: {source}"))]
    InvalidGatewayURL {
        /// configured url
        url: String,
        /// source error
        source: ParseGatewayURLError,
    },

    /// Options ask for no shard at all
    #[snafu(display("max_shards must be at least 1"))]
    NoShards,
}
