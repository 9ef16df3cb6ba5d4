use snafu::prelude::*;

use super::types::ParseGatewayURLError;

/// API Error
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(variant), context(suffix(false)))]
pub enum Error {
    /// bot token is invalid(contains invalid character that cant be send in HTTP header)
    #[snafu(display("bot token is invalid"))]
    TokenInvalid,

    /// create HTTP client failed
    #[snafu(display("create api client failed: {source}"))]
    ClientCreateFailed {
        /// source error
        source: reqwest::Error,
    },

    /// build api request failed
    #[snafu(display("build request failed: {source}"))]
    BuildRequestFailed {
        /// source error
        source: reqwest::Error,
    },

    /// send api request failed
    #[snafu(display("{} url {url} failed: {source}", method.as_str()))]
    RequestFailed {
        /// http method
        method: reqwest::Method,
        /// target url
        url: String,
        /// source http error
        source: reqwest::Error,
    },

    /// http response of api request is not OK(200)
    #[snafu(display("{} url {url} got http status code {status_code}: {message}", method.as_str()))]
    HTTPStatusNotOK {
        /// http method
        method: reqwest::Method,
        /// request url
        url: String,
        /// received http status code
        status_code: reqwest::StatusCode,
        /// error message of the response body, if any
        message: String,
    },

    /// parse response body of api request as target json type failed
    #[snafu(display("parse response body {body:?} failed: {source}"))]
    ParseBodyFailed {
        /// http response body
        body: bytes::Bytes,
        /// source parse error
        source: serde_json::Error,
    },

    /// returned gateway url is unusable
    #[snafu(display("invalid gateway url: {source}"))]
    InvalidGatewayURL {
        /// source error
        source: ParseGatewayURLError,
    },
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::types::gateway_url;

    #[test]
    fn test_invalid_gateway_url_keeps_source() {
        let err = gateway_url("https://discord.com")
            .context(variant::InvalidGatewayURL)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::InvalidGatewayURL {
                source: ParseGatewayURLError::InvalidSchema { .. }
            }
        ));
        assert!(err.to_string().starts_with("invalid gateway url: "));
    }
}
