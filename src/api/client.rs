use reqwest::{Method, StatusCode};
use snafu::prelude::*;
use url::Url;

use super::error::variant::*;
use super::types::*;
use super::Result;

static BASE_URL: &str = "https://discord.com/api/v10";

static APP_USER_AGENT: &str = concat!(
    "DiscordBot (",
    env!("CARGO_PKG_NAME"),
    ", ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Discord HTTP API Client
#[derive(Debug, Clone)]
pub struct Client {
    client: reqwest::Client,
}

impl Client {
    fn new<S: AsRef<str> + ?Sized>(auth_type: &'static str, token: &S) -> Result<Self> {
        let auth_header_value = format!("{} {}", auth_type, token.as_ref())
            .parse()
            .map_err(|_| TokenInvalid.build())?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::AUTHORIZATION, auth_header_value);

        let client = reqwest::Client::builder()
            .gzip(true)
            .deflate(true)
            .user_agent(APP_USER_AGENT)
            .default_headers(headers)
            .build()
            .context(ClientCreateFailed)?;

        Ok(Self { client })
    }

    /// create a new api client using bot token
    pub fn new_from_bot_token<S: AsRef<str> + ?Sized>(token: &S) -> Result<Self> {
        Self::new("Bot", token)
    }

    /// create a new api client using oauth2 token
    pub fn new_from_oauth2_token<S: AsRef<str> + ?Sized>(token: &S) -> Result<Self> {
        Self::new("Bearer", token)
    }

    async fn get<R>(&self, path: &str) -> Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", BASE_URL, path);
        let req = self
            .client
            .get(&url)
            .build()
            .context(BuildRequestFailed)?;

        let resp = self
            .client
            .execute(req)
            .await
            .with_context(|_| RequestFailed {
                method: Method::GET,
                url: &url,
            })?;

        let status_code = resp.status();

        let body = resp.bytes().await.with_context(|_| RequestFailed {
            method: Method::GET,
            url: &url,
        })?;

        if status_code != StatusCode::OK {
            let message = serde_json::from_slice::<ErrorResponse>(&body)
                .map(|err| format!("{} (code {})", err.message, err.code))
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            return HTTPStatusNotOK {
                method: Method::GET,
                url: &url,
                status_code,
                message,
            }
            .fail();
        }

        serde_json::from_slice(&body).with_context(|_| ParseBodyFailed { body })
    }

    /// Call /gateway/bot
    pub async fn gateway_bot(&self) -> Result<GatewayBot> {
        self.get("/gateway/bot").await
    }

    /// Call /gateway/bot, get the websocket url with version and encoding set
    pub async fn gateway_url(&self) -> Result<Url> {
        let data = self.gateway_bot().await?;
        log::debug!(
            "Gateway {} recommends {} shard(s), {} identify(s) remaining",
            data.url,
            data.shards,
            data.session_start_limit.remaining
        );
        gateway_url(&data.url).context(InvalidGatewayURL)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_client_rejects_unprintable_token() {
        assert!(matches!(
            Client::new_from_bot_token("bad\ntoken"),
            Err(crate::api::Error::TokenInvalid)
        ));
        assert!(Client::new_from_bot_token("token").is_ok());
    }
}
