//! # paws-client
//!
//! Client library for the PAWS streaming interface.
//!
//! This crate provides:
//! - Token-correlated requests and subscriptions over one connection
//! - Automatic reconnection with exponential backoff
//! - Resubscription of live subscriptions after a reconnect
//! - Per-request timeouts

pub mod backoff;
pub mod client;
pub mod completion;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod record;
pub mod table;

pub use backoff::{Backoff, BackoffConfig};
pub use client::Client;
pub use completion::Completion;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, FrameHandler};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use error::{ClientError, DispatchError};
pub use record::{Record, RecordError};
pub use table::{CorrelationTable, Resolution, SubscriptionHandler, Update};
