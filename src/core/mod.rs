//! Connections, pipelining, and pub/sub on top of the RESP layer.
//!
//! ## Modules
//!
//! - [`connection`] - One duplex RESP connection with a background reader
//! - [`connector`] - Opens and authenticates connections
//! - [`executor`] - FIFO command pipelining over one connection
//! - [`subscriber`] - Pub/sub listeners multiplexed onto one connection
//! - [`client`] - Convenience methods for common commands
//!

pub use crate::proto::error::{Error, Result};

/// High-level client facade.
pub mod client;
/// Command construction helpers.
pub mod command;
/// Connection parameters.
pub mod config;
pub mod connection;
pub mod connector;
pub mod executor;
pub mod subscriber;
pub mod transform;

pub use client::Client;
pub use command::Cmd;
pub use config::{Address, ConnectionConfig, ConnectionConfigBuilder};
pub use connection::{Connection, Transport};
pub use connector::{Connector, SocketConnector};
pub use executor::QueryExecutor;
pub use subscriber::{Message, Subscriber, SubscriberConfig, Subscription};
