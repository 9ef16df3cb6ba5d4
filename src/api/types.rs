//! Discord HTTP API response types

use serde::Deserialize;
use snafu::prelude::*;
use url::Url;

/// Gateway version and encoding every connection uses.
pub const GATEWAY_QUERY: &str = "v=10&encoding=json";

/// Error body returned with non 2xx responses.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    /// discord json error code
    #[serde(default)]
    pub code: i64,
    /// error message
    pub message: String,
}

/// data type for api /gateway/bot
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayBot {
    /// gateway url, without query
    pub url: String,
    /// recommended shard count
    pub shards: u32,
    /// identify limits of the bot
    pub session_start_limit: SessionStartLimit,
}

/// Identify budget, see [`GatewayBot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SessionStartLimit {
    /// identify calls allowed per reset period
    pub total: u32,
    /// identify calls left
    pub remaining: u32,
    /// milliseconds until the limit resets
    pub reset_after: u64,
    /// identify calls allowed per 5 seconds
    pub max_concurrency: u32,
}

/// Parse string as gateway url error
#[derive(Debug, Snafu)]
#[snafu(
    visibility(pub(crate)),
    module(parse_gateway_url_error_variant),
    context(suffix(false))
)]
pub enum ParseGatewayURLError {
    #[snafu(display("{s} is an invalid url: {source}"))]
    /// the str is not a valid url
    InvalidURL {
        /// string be parsed
        s: String,
        /// source error
        source: url::ParseError,
    },

    /// the parsed url schema is not websocket
    #[snafu(display("the url {s} has invalid schema {schema}, only ws or wss is ok"))]
    InvalidSchema {
        /// the url
        s: String,
        /// invalid schema
        schema: String,
    },

    /// the parsed url has no host
    #[snafu(display("the gateway url {s} has no host"))]
    NoHost {
        /// the url
        s: String,
    },
}

/// Websocket url to connect to, with the gateway version and encoding set.
///
/// Any query of `s` is replaced.
pub fn gateway_url(s: &str) -> Result<Url, ParseGatewayURLError> {
    let mut url =
        Url::parse(s).with_context(|_| parse_gateway_url_error_variant::InvalidURL { s })?;

    ensure!(
        url.scheme() == "wss" || url.scheme() == "ws",
        parse_gateway_url_error_variant::InvalidSchema {
            s,
            schema: url.scheme(),
        }
    );

    ensure!(
        url.host().is_some(),
        parse_gateway_url_error_variant::NoHost { s }
    );

    url.set_query(Some(GATEWAY_QUERY));
    Ok(url)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_gateway_url_sets_query() {
        let url = gateway_url("wss://gateway.discord.gg").unwrap();
        assert_eq!(url.as_str(), "wss://gateway.discord.gg/?v=10&encoding=json");

        let url = gateway_url("wss://gateway.discord.gg/?v=6&encoding=etf").unwrap();
        assert_eq!(url.as_str(), "wss://gateway.discord.gg/?v=10&encoding=json");
    }

    #[test]
    fn test_gateway_url_rejects_non_websocket() {
        assert!(matches!(
            gateway_url("https://discord.com"),
            Err(ParseGatewayURLError::InvalidSchema { .. })
        ));
        assert!(matches!(
            gateway_url("not a url"),
            Err(ParseGatewayURLError::InvalidURL { .. })
        ));
    }

    #[test]
    fn test_gateway_bot_deserialize() {
        let data: GatewayBot = serde_json::from_str(
            r#"{
                "url": "wss://gateway.discord.gg",
                "shards": 2,
                "session_start_limit": {
                    "total": 1000,
                    "remaining": 999,
                    "reset_after": 14400000,
                    "max_concurrency": 1
                }
            }"#,
        )
        .unwrap();

        assert_eq!(data.shards, 2);
        assert_eq!(data.session_start_limit.remaining, 999);
    }
}
