//! # Plexis
//!
//! Asynchronous Redis client built on tokio: a resumable RESP decoder,
//! strictly ordered pipelining of concurrent commands over one connection,
//! and pub/sub listeners multiplexed onto a single connection that
//! reconnects and resubscribes on its own.
//!
//! ## Example
//!
//! ```no_run
//! use plexis::{Client, ConnectionConfig, Subscriber};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::tcp("127.0.0.1", 6379);
//!
//!     let subscriber = Subscriber::new(config.clone());
//!     let mut news = subscriber.subscribe("news").await?;
//!
//!     let client = Client::new(config);
//!     client.publish("news", "hello").await?;
//!
//!     if let Some(payload) = news.recv().await {
//!         println!("received {:?}", payload?);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod core;
pub mod proto;

pub use crate::core::command::{self, Cmd};
pub use crate::core::{
    Client, Connection, ConnectionConfig, Connector, Message, QueryExecutor, SocketConnector,
    Subscriber, SubscriberConfig, Subscription,
};
pub use crate::proto::error::{DecodeError, Error, Result};
pub use crate::proto::value::RespValue;
