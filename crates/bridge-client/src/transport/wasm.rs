//! Browser runtime adapter: wraps `web_sys::WebSocket`. Only compiled for
//! `wasm32` targets; the event hooks `web-sys` exposes as assignable
//! closures are adapted into the same [`TransportEvent`] channel the native
//! adapter uses, so the client core never needs to know which runtime it is
//! hosted in.

use std::sync::Arc;

use js_sys::Uint8Array;
use tokio::sync::mpsc;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{BinaryType, CloseEvent, ErrorEvent, MessageEvent, WebSocket};

use crate::codec::WireFrame;
use crate::error::TransportError;

use super::{ReadyState, Transport, TransportEvent};

struct WasmTransport {
    socket: WebSocket,
    // Keeps the closures alive for the lifetime of the socket; dropping
    // them would detach the event hooks.
    _onopen: Closure<dyn FnMut(JsValue)>,
    _onmessage: Closure<dyn FnMut(MessageEvent)>,
    _onerror: Closure<dyn FnMut(ErrorEvent)>,
    _onclose: Closure<dyn FnMut(CloseEvent)>,
}

impl Transport for WasmTransport {
    fn ready_state(&self) -> ReadyState {
        match self.socket.ready_state() {
            WebSocket::CONNECTING => ReadyState::Connecting,
            WebSocket::OPEN => ReadyState::Open,
            WebSocket::CLOSING => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }

    fn send(&self, frame: WireFrame) -> Result<(), TransportError> {
        if self.socket.ready_state() != WebSocket::OPEN {
            return Err(TransportError::NotConnected);
        }
        let result = match frame {
            WireFrame::Text(text) => self.socket.send_with_str(&text),
            WireFrame::Binary(bytes) => {
                let array = Uint8Array::from(bytes.as_slice());
                self.socket.send_with_array_buffer(&array.buffer())
            }
        };
        result.map_err(|err| TransportError::SendFailed(format!("{err:?}")))
    }

    fn close(&self) {
        let _ = self.socket.close();
    }
}

// Safety note: `web_sys` handles are single-threaded (wasm32 has no
// threads in the browser execution model this adapter targets), so these
// manual impls just satisfy `Transport: Send + Sync`.
unsafe impl Send for WasmTransport {}
unsafe impl Sync for WasmTransport {}

/// Opens a browser `WebSocket` connection to `url`.
pub fn connect(
    url: &str,
) -> Result<(Arc<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
    let socket = WebSocket::new(url).map_err(|err| TransportError::OpenFailed {
        url: url.to_string(),
        reason: format!("{err:?}"),
    })?;
    socket.set_binary_type(BinaryType::Arraybuffer);

    let (tx, rx) = mpsc::unbounded_channel();

    let open_tx = tx.clone();
    let onopen = Closure::wrap(Box::new(move |_event: JsValue| {
        let _ = open_tx.send(TransportEvent::Open);
    }) as Box<dyn FnMut(JsValue)>);
    socket.set_onopen(Some(onopen.as_ref().unchecked_ref()));

    let message_tx = tx.clone();
    let onmessage = Closure::wrap(Box::new(move |event: MessageEvent| {
        let frame = if let Some(text) = event.data().as_string() {
            Some(WireFrame::Text(text))
        } else if let Ok(array_buffer) = event.data().dyn_into::<js_sys::ArrayBuffer>() {
            let array = Uint8Array::new(&array_buffer);
            Some(WireFrame::Binary(array.to_vec()))
        } else {
            None
        };
        if let Some(frame) = frame {
            let _ = message_tx.send(TransportEvent::Message(frame));
        }
    }) as Box<dyn FnMut(MessageEvent)>);
    socket.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));

    let error_tx = tx.clone();
    let onerror = Closure::wrap(Box::new(move |event: ErrorEvent| {
        let _ = error_tx.send(TransportEvent::Error(event.message()));
    }) as Box<dyn FnMut(ErrorEvent)>);
    socket.set_onerror(Some(onerror.as_ref().unchecked_ref()));

    let close_tx = tx.clone();
    let onclose = Closure::wrap(Box::new(move |event: CloseEvent| {
        let _ = close_tx.send(TransportEvent::Close {
            code: Some(event.code()),
            reason: event.reason(),
        });
    }) as Box<dyn FnMut(CloseEvent)>);
    socket.set_onclose(Some(onclose.as_ref().unchecked_ref()));

    let transport = WasmTransport {
        socket,
        _onopen: onopen,
        _onmessage: onmessage,
        _onerror: onerror,
        _onclose: onclose,
    };

    Ok((Arc::new(transport), rx))
}
