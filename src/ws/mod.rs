//! Discord gateway protocol client implement

pub mod close;
mod dispatch;
mod error;
mod event;
mod inflate;
pub(crate) mod message;
mod shard;
pub mod socket;

pub use close::{CloseCode, GatewayError};
pub use dispatch::{DispatchError, DispatchKind};
pub use error::ShardError;
pub use event::{Event, EventKind, EventSender, EventStream};
pub use message::{DecodeError, Dispatch};
pub use shard::{
    Action, RequestMembersError, RequestMembersOptions, Shard, ShardHandle, ShardInfo,
    ShardRunner, ShardStatus, ShardStoppedError, SocketState, VoiceStateOptions,
};
