use snafu::prelude::*;

use super::{
    close::GatewayError, dispatch::DispatchError, message::DecodeError, socket::ConnectError,
    socket::SocketError,
};

/// Error reported by a shard through [`EventKind::Error`](super::EventKind::Error) and
/// [`EventKind::Disconnect`](super::EventKind::Disconnect)
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ShardError {
    /// connect called while a socket exists
    #[snafu(display("connect called while an existing connection is established"))]
    AlreadyConnected,

    /// token is empty or was refused
    #[snafu(display("invalid token"))]
    InvalidToken,

    /// no hello received in time
    #[snafu(display("connection timeout"))]
    ConnectionTimeout,

    /// last heartbeat never acknowledged
    #[snafu(display("server didn't acknowledge previous heartbeat, possible lost connection"))]
    MissedHeartbeatAck,

    /// socket closed by gateway
    #[snafu(display("{source}"))]
    Gateway {
        /// source error
        source: GatewayError,
    },

    /// open socket failed
    #[snafu(display("{source}"))]
    Connect {
        /// source error
        source: ConnectError,
    },

    /// socket read/write failed
    #[snafu(display("{source}"))]
    Socket {
        /// source error
        source: SocketError,
    },

    /// received data could not be decoded
    #[snafu(display("{source}"))]
    Decode {
        /// source error
        source: DecodeError,
    },

    /// a dispatch handler failed
    #[snafu(display("{source}"))]
    Dispatch {
        /// source error
        source: DispatchError,
    },
}

impl ShardError {
    /// close code if the gateway closed the socket
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Gateway { source } => Some(source.code),
            _ => None,
        }
    }
}
