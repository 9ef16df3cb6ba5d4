//! Websocket transport of one shard connection.

use std::{pin::Pin, task::Poll};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use snafu::prelude::*;
use tokio_tungstenite as websocket;
use websocket::tungstenite::{
    self,
    protocol::{frame::coding::CloseCode as WsCloseCode, CloseFrame},
};

pub(crate) type WebsocketClient =
    websocket::WebSocketStream<websocket::MaybeTlsStream<tokio::net::TcpStream>>;

/// Error when connect to websocket gateway
#[derive(Debug, Snafu)]
#[snafu(
    display("connect ws gateway {url} failed: {source}"),
    visibility(pub(crate)),
    module(connect_error),
    context(suffix(false))
)]
pub struct ConnectError {
    /// connected url
    pub url: String,
    /// source error
    pub source: tungstenite::Error,
}

/// Error when read/write the socket
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum SocketError {
    /// underlying websocket stream broken
    #[snafu(display("underlying websocket stream broken: {source}"))]
    Websocket {
        /// source error
        source: tungstenite::Error,
    },
}

/// A data or close frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// text frame
    Text(String),
    /// binary frame
    Binary(Vec<u8>),
    /// buffers of one message delivered in pieces, decoded as their concatenation
    Fragments(Vec<Vec<u8>>),
    /// close frame, code 0 when the peer sent no code
    Close {
        /// close code
        code: u16,
        /// close reason
        reason: String,
    },
}

impl Frame {
    fn into_websocket(self) -> tungstenite::Message {
        match self {
            Self::Text(text) => tungstenite::Message::Text(text),
            Self::Binary(data) => tungstenite::Message::Binary(data),
            Self::Fragments(parts) => tungstenite::Message::Binary(parts.concat()),
            Self::Close { code, reason } => tungstenite::Message::Close(Some(CloseFrame {
                code: WsCloseCode::from(code),
                reason: reason.into(),
            })),
        }
    }
}

/// Open a websocket connection
pub async fn connect(url: &url::Url) -> Result<Socket, ConnectError> {
    log::debug!("Connecting gateway: {}", url);

    let (ws, _) = websocket::connect_async(url)
        .await
        .with_context(|_| connect_error::Connect { url: url.as_str() })?;

    Ok(Socket { ws })
}

/// Gateway websocket stream/sink
///
/// Ping and pong frames are answered by the websocket layer and never surface.
#[derive(Debug)]
pub struct Socket {
    ws: WebsocketClient,
}

impl Stream for Socket {
    type Item = Result<Frame, SocketError>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        loop {
            let frame = match self.ws.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(SocketError::Websocket { source: e })))
                }
                Poll::Ready(Some(Ok(frame))) => frame,
            };

            let frame = match frame {
                tungstenite::Message::Text(text) => Frame::Text(text),
                tungstenite::Message::Binary(data) => Frame::Binary(data),
                tungstenite::Message::Close(close) => match close {
                    Some(close) => Frame::Close {
                        code: close.code.into(),
                        reason: close.reason.into_owned(),
                    },
                    None => Frame::Close {
                        code: 0,
                        reason: String::new(),
                    },
                },
                other => {
                    log::trace!("Skip control frame {:?}", other);
                    continue;
                }
            };

            return Poll::Ready(Some(Ok(frame)));
        }
    }
}

impl Sink<Frame> for Socket {
    type Error = SocketError;

    fn poll_ready(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws
            .poll_ready_unpin(cx)
            .map_err(|e| Self::Error::Websocket { source: e })
    }

    fn start_send(mut self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        self.ws
            .start_send_unpin(item.into_websocket())
            .map_err(|e| Self::Error::Websocket { source: e })
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws
            .poll_flush_unpin(cx)
            .map_err(|e| Self::Error::Websocket { source: e })
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws
            .poll_close_unpin(cx)
            .map_err(|e| Self::Error::Websocket { source: e })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_close_frame_conversion() {
        let message = Frame::Close {
            code: 4999,
            reason: "Reconnect".to_string(),
        }
        .into_websocket();

        match message {
            tungstenite::Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 4999);
                assert_eq!(frame.reason, "Reconnect");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_fragments_sent_concatenated() {
        let message = Frame::Fragments(vec![vec![1, 2], vec![3]]).into_websocket();
        assert_eq!(message, tungstenite::Message::Binary(vec![1, 2, 3]));
    }
}
