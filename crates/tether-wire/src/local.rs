//! In-process connection pairs.
//!
//! Two [`LocalConnection`]s created by [`LocalConnection::pair`] deliver to
//! each other's inbox directly. Used to run a multiplexer without a relay.

use crate::connection::{Connection, ConnectionState};
use crate::error::WireError;
use async_trait::async_trait;
use std::sync::Arc;
use tether_types::envelope::Envelope;
use tokio::sync::{mpsc, watch, Mutex};

pub struct LocalConnection {
    address: String,
    state: watch::Sender<ConnectionState>,
    outbox: mpsc::UnboundedSender<Envelope>,
    inbox: Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

impl LocalConnection {
    /// Create two connected endpoints bound to `a` and `b`.
    pub fn pair(a: impl Into<String>, b: impl Into<String>) -> (Arc<Self>, Arc<Self>) {
        let (to_b, b_inbox) = mpsc::unbounded_channel();
        let (to_a, a_inbox) = mpsc::unbounded_channel();
        let end = |address: String,
                   outbox: mpsc::UnboundedSender<Envelope>,
                   inbox: mpsc::UnboundedReceiver<Envelope>| {
            Arc::new(Self {
                address,
                state: watch::channel(ConnectionState::Disconnected).0,
                outbox,
                inbox: Mutex::new(inbox),
            })
        };
        (end(a.into(), to_b, a_inbox), end(b.into(), to_a, b_inbox))
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn address(&self) -> &str {
        &self.address
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn connect(&self) -> Result<(), WireError> {
        self.state.send_replace(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) {
        self.state.send_replace(ConnectionState::Disconnected);
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), WireError> {
        if !self.is_connected() {
            return Err(WireError::NotConnected);
        }
        self.outbox
            .send(envelope.clone())
            .map_err(|_| WireError::ConnectionClosed)
    }

    async fn receive(&self) -> Result<Envelope, WireError> {
        let mut state = self.state.subscribe();
        if *state.borrow() != ConnectionState::Connected {
            return Err(WireError::NotConnected);
        }
        let mut inbox = self.inbox.lock().await;
        tokio::select! {
            biased;
            _ = state.wait_for(|s| *s != ConnectionState::Connected) => Err(WireError::NotConnected),
            next = inbox.recv() => next.ok_or(WireError::ConnectionClosed),
        }
    }
}
