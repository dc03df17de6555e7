//! In-process mock transport used only by this crate's own tests. Mirrors
//! the channel-backed transport double pattern used for testing long-lived
//! connections elsewhere in this workspace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::codec::WireFrame;
use crate::error::TransportError;
use crate::transport::{ReadyState, Transport, TransportEvent, TransportFactory};

/// A handle a test can use to feed frames into the client as if a server
/// had sent them, and to inspect frames the client sent outward.
pub struct MockServer {
    pub event_tx: mpsc::UnboundedSender<TransportEvent>,
    pub sent: Arc<Mutex<Vec<WireFrame>>>,
    pub open: Arc<AtomicBool>,
}

impl MockServer {
    pub fn send_frame(&self, frame: WireFrame) {
        let _ = self.event_tx.send(TransportEvent::Message(frame));
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        let _ = self.event_tx.send(TransportEvent::Open);
    }

    pub fn close(&self, reason: impl Into<String>) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.event_tx.send(TransportEvent::Close { code: None, reason: reason.into() });
    }

    pub fn sent_frames(&self) -> Vec<WireFrame> {
        self.sent.lock().expect("mock server mutex poisoned").clone()
    }
}

struct MockTransport {
    open: Arc<AtomicBool>,
    sent: Arc<Mutex<Vec<WireFrame>>>,
    fail_sends: Arc<AtomicBool>,
}

impl Transport for MockTransport {
    fn ready_state(&self) -> ReadyState {
        if self.open.load(Ordering::SeqCst) {
            ReadyState::Open
        } else {
            ReadyState::Connecting
        }
    }

    fn send(&self, frame: WireFrame) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("mock send failure".into()));
        }
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().expect("mock server mutex poisoned").push(frame);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Builds a [`TransportFactory`] whose every produced connection is backed
/// by an in-process channel, plus a [`MockServer`] handle to drive it from
/// tests. `auto_open`, when true, makes every produced connection emit an
/// `Open` event immediately (simulating an instantaneous handshake).
pub fn mock_transport(auto_open: bool) -> (TransportFactory, Arc<Mutex<Option<MockServer>>>) {
    let last_server = Arc::new(Mutex::new(None));
    let factory_server = Arc::clone(&last_server);

    let factory: TransportFactory = Arc::new(move |_url: &str| {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let fail_sends = Arc::new(AtomicBool::new(false));

        let transport = MockTransport {
            open: Arc::clone(&open),
            sent: Arc::clone(&sent),
            fail_sends,
        };

        let server = MockServer { event_tx: event_tx.clone(), sent, open: Arc::clone(&open) };
        if auto_open {
            server.open();
        }
        *factory_server.lock().expect("mock server mutex poisoned") = Some(server);

        Ok((Arc::new(transport) as Arc<dyn Transport>, event_rx))
    });

    (factory, last_server)
}
