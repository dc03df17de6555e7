//! Native runtime adapter: wraps `tokio-tungstenite` behind the
//! [`super::Transport`] trait. Connection establishment is spawned onto the
//! current tokio runtime; a reader task and a writer task are split apart
//! exactly like the stdio reader/writer task pair used elsewhere in this
//! workspace for a long-lived duplex channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::codec::WireFrame;
use crate::error::TransportError;

use super::{ReadyState, Transport, TransportEvent};

struct NativeTransport {
    outbound: mpsc::UnboundedSender<WsMessage>,
    open: Arc<AtomicBool>,
}

impl Transport for NativeTransport {
    fn ready_state(&self) -> ReadyState {
        if self.open.load(Ordering::SeqCst) {
            ReadyState::Open
        } else {
            ReadyState::Connecting
        }
    }

    fn send(&self, frame: WireFrame) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let message = match frame {
            WireFrame::Text(text) => WsMessage::Text(text),
            WireFrame::Binary(bytes) => WsMessage::Binary(bytes),
        };
        self.outbound
            .send(message)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.outbound.send(WsMessage::Close(None));
    }
}

/// Opens a connection to `url` and returns a transport handle plus its
/// event stream. Connection establishment happens on a spawned task so the
/// caller is never blocked waiting on the handshake; the `Open` event on
/// the returned receiver is the signal a caller should await before
/// sending.
pub fn connect(
    url: &str,
) -> Result<(Arc<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WsMessage>();
    let open = Arc::new(AtomicBool::new(false));
    let open_for_task = Arc::clone(&open);
    let url = url.to_string();

    tokio::spawn(async move {
        let stream = match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _response)) => stream,
            Err(err) => {
                let _ = event_tx.send(TransportEvent::Error(err.to_string()));
                let _ = event_tx.send(TransportEvent::Close {
                    code: None,
                    reason: err.to_string(),
                });
                return;
            }
        };

        open_for_task.store(true, Ordering::SeqCst);
        let _ = event_tx.send(TransportEvent::Open);

        let (mut write, mut read) = stream.split();

        let writer_event_tx = event_tx.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let is_close = matches!(message, WsMessage::Close(_));
                if let Err(err) = write.send(message).await {
                    let _ = writer_event_tx.send(TransportEvent::Error(err.to_string()));
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        while let Some(item) = read.next().await {
            match item {
                Ok(WsMessage::Text(text)) => {
                    let _ = event_tx.send(TransportEvent::Message(WireFrame::Text(text)));
                }
                Ok(WsMessage::Binary(bytes)) => {
                    let _ = event_tx.send(TransportEvent::Message(WireFrame::Binary(bytes)));
                }
                Ok(WsMessage::Close(frame)) => {
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                        .unwrap_or((None, String::new()));
                    open_for_task.store(false, Ordering::SeqCst);
                    let _ = event_tx.send(TransportEvent::Close { code, reason });
                    break;
                }
                Ok(_) => {} // ping/pong handled by tungstenite internally
                Err(err) => {
                    let _ = event_tx.send(TransportEvent::Error(err.to_string()));
                    open_for_task.store(false, Ordering::SeqCst);
                    let _ = event_tx.send(TransportEvent::Close {
                        code: None,
                        reason: err.to_string(),
                    });
                    break;
                }
            }
        }

        open_for_task.store(false, Ordering::SeqCst);
        writer.abort();
    });

    let transport = NativeTransport {
        outbound: outbound_tx,
        open,
    };
    Ok((Arc::new(transport), event_rx))
}
