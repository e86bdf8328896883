//! # paws-protocol
//!
//! Wire protocol for the PAWS streaming interface.
//!
//! This crate provides:
//! - Newline-delimited JSON framing
//! - Outbound request and inbound response envelopes
//! - Resource paths with their decode kind resolved up front
//! - Protocol error types

pub mod codec;
pub mod error;
pub mod message;
pub mod resource;

pub use codec::{Encoder, LineDecoder};
pub use error::ProtocolError;
pub use message::{Method, Request, Response};
pub use resource::{Resource, ResourceKind};

/// Default host of the PAWS service.
pub const DEFAULT_HOST: &str = "beta.pachube.com";

/// Default port of the PAWS service.
pub const DEFAULT_PORT: u16 = 8081;

/// Byte terminating every frame on the wire.
pub const DELIMITER: u8 = b'\n';

/// Maximum size of a single frame (4 MiB).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Header carrying the API key on every outbound frame.
pub const API_KEY_HEADER: &str = "X-PachubeApiKey";

/// Header carrying the path of a newly created resource.
pub const LOCATION_HEADER: &str = "LOCATION";
