//! Discord http api, only what the gateway bootstrap needs

mod client;
mod error;
pub mod types;

pub use client::Client;
pub use error::Error;

/// Result type for api module
pub type Result<T> = std::result::Result<T, Error>;
