//! Async WebSocket client for rosbridge-compatible servers, extended with
//! a native action RPC protocol.
//!
//! The crate brokers four logical surfaces over a single bidirectional
//! connection that carries either JSON text frames or CBOR binary frames:
//! topic pub/sub, request/response service calls, long-running actions
//! with streamed feedback, and CLI execution. [`Client`] is a cheap handle
//! around a single background task ([`client::ClientCore`]) that owns the
//! connection state machine, the exponential-backoff reconnect scheduler,
//! and every correlation table.
//!
//! ```no_run
//! use bridge_client::{Client, ClientBuilder};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), bridge_client::BridgeError> {
//! let client: Client = ClientBuilder::new().build();
//! client.connect("ws://localhost:9090").await?;
//! client.publish("/demo", json!({"data": "hello"})).await?;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod cbor;
pub mod cli;
pub mod client;
pub mod codec;
pub mod error;
pub mod message;
pub mod pending;
pub mod reconnect;
pub mod subscription;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use cbor::CborValue;
pub use cli::CliOutput;
pub use client::{ActionGoal, ActionGoalOptions, CallOptions, Client, ClientBuilder, ClientConfig};
pub use codec::{Codec, CodecSelector, WireFrame};
pub use error::{BridgeError, CborError, CodecError, TransportError};
pub use message::{FallbackBuilder, MessageBuilder};
pub use pending::ActionEvent;
pub use reconnect::{ReconnectConfig, ReconnectReason, ReconnectScheduled};
pub use subscription::Callback;
pub use transport::{ReadyState, Transport, TransportEvent, TransportFactory};
