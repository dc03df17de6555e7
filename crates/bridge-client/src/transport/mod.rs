//! Transport abstraction: the capability set the client core depends on,
//! independent of whether the underlying socket is a native OS socket or a
//! browser `WebSocket` reached through `wasm-bindgen`.

#[cfg(not(target_arch = "wasm32"))]
pub mod native;

#[cfg(target_arch = "wasm32")]
pub mod wasm;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::codec::WireFrame;
use crate::error::TransportError;

/// Mirrors the standard WebSocket ready states; only `Open` matters for the
/// "may I send" check, the rest exist so observers can report state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Events a transport may emit, delivered over an unbounded channel rather
/// than as assignable `onopen`/`onmessage`/`onerror`/`onclose` hooks (Rust
/// has no ergonomic equivalent of reassigning a closure field at runtime).
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Open,
    Message(WireFrame),
    Error(String),
    Close { code: Option<u16>, reason: String },
}

/// A single open (or opening) connection. The client core is the sole
/// owner of any value behind this trait; application code never touches it
/// directly.
pub trait Transport: Send + Sync {
    fn ready_state(&self) -> ReadyState;
    fn send(&self, frame: WireFrame) -> Result<(), TransportError>;
    fn close(&self);
}

/// Produces a `(transport, event stream)` pair for a given URL. Two
/// concrete factories are provided as part of the ambient runtime-adapter
/// stack: [`native::connect`] (non-wasm, via `tokio-tungstenite`) and
/// [`wasm::connect`] (wasm32, via `web-sys`).
pub type TransportFactory = Arc<
    dyn Fn(&str) -> Result<(Arc<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>), TransportError>
        + Send
        + Sync,
>;
