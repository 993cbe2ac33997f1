//! A single authenticated link to a relay node.
//!
//! [`NodeClient`] owns one [`Channel`] and drives it through the connection
//! state machine. When a read or write fails on a live link the client runs
//! one reconnection cycle (bounded by [`ReconnectPolicy`]) and then repeats
//! the failed operation once.
//!
//! Concurrency model:
//! - `lifecycle` serialises connect, disconnect and reconnection cycles.
//! - `io_gate` is held shared by reads and writes and exclusively while the
//!   channel is reopened, so no reader can consume the registration reply.
//! - `generation` increments on every successful (re)connect. A worker that
//!   saw a failure on generation `g` only triggers a reconnect if the link is
//!   still on `g`; otherwise someone else already repaired it.
//! - `epoch` increments on `disconnect`, so an in-flight reconnect that
//!   finishes afterwards does not resurrect the link.
//!
//! [`ReconnectPolicy`]: tether_types::config::ReconnectPolicy

use crate::channel::{Channel, TcpChannel};
use crate::codec::{EnvelopeCodec, MAX_FRAME_SIZE};
use crate::connection::{Connection, ConnectionState};
use crate::error::WireError;
use crate::handshake;
use crate::retry::retry_async;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tether_types::config::ClientConfig;
use tether_types::envelope::Envelope;
use tether_types::identity::Identity;
use tokio::sync::{watch, Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, error, info, warn};

enum IoFailure {
    NotConnected,
    Broken { generation: u64, error: WireError },
}

/// Relay client bound to one agent identity.
pub struct NodeClient {
    config: ClientConfig,
    identity: Identity,
    address: String,
    channel: Box<dyn Channel>,
    codec: EnvelopeCodec,
    state: watch::Sender<ConnectionState>,
    lifecycle: Mutex<()>,
    io_gate: RwLock<()>,
    generation: AtomicU64,
    epoch: AtomicU64,
    reconnects: AtomicU64,
}

impl NodeClient {
    /// A client that reaches `config.relay_addr` over TCP.
    pub fn new(config: ClientConfig, identity: Identity) -> Self {
        let channel = TcpChannel::new(config.relay_addr.clone(), config.connect_timeout());
        Self::with_channel(config, identity, Box::new(channel))
    }

    /// A client over a caller-supplied channel.
    pub fn with_channel(config: ClientConfig, identity: Identity, channel: Box<dyn Channel>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            address: identity.address(),
            config,
            identity,
            channel,
            codec: EnvelopeCodec::default(),
            state,
            lifecycle: Mutex::new(()),
            io_gate: RwLock::new(()),
            generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    /// Replace the envelope codec (for protocol-id validation).
    pub fn with_codec(mut self, codec: EnvelopeCodec) -> Self {
        self.codec = codec;
        self
    }

    /// The agent address registered with the relay.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn relay_addr(&self) -> &str {
        self.channel.remote()
    }

    /// Number of reconnection cycles started since construction.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!("client: {} {} -> {}", self.address, prev, next);
        }
    }

    /// Open the link and register. Idempotent while connected.
    ///
    /// On failure the client is left `Disconnected`.
    pub async fn connect(&self) -> Result<(), WireError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let _life = self.lifecycle.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        let _io = self.io_gate.write().await;
        match self.establish().await {
            Ok(()) => self.finish(epoch).await,
            Err(e) => {
                error!("client: {} failed to connect to {}: {}", self.address, self.relay_addr(), e);
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Close the link. Safe to call in any state.
    pub async fn disconnect(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        // Unblock pending I/O and any handshake in flight before waiting.
        self.channel.close().await;

        let _life = self.lifecycle.lock().await;
        self.channel.close().await;
        self.set_state(ConnectionState::Disconnected);
        info!("client: {} disconnected from {}", self.address, self.relay_addr());
    }

    /// Encode and write one envelope, reconnecting and retrying once on failure.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), WireError> {
        let payload = self.codec.encode(envelope);
        if payload.len() > MAX_FRAME_SIZE as usize {
            return Err(WireError::MessageTooLarge {
                size: u32::try_from(payload.len()).unwrap_or(u32::MAX),
                max: MAX_FRAME_SIZE,
            });
        }

        let generation = match self.write_payload(&payload).await {
            Ok(()) => return Ok(()),
            Err(IoFailure::NotConnected) => return Err(WireError::NotConnected),
            Err(IoFailure::Broken { generation, error }) => {
                error!(
                    "client: send to {} failed: {}; reconnecting and sending again",
                    self.relay_addr(),
                    error
                );
                generation
            }
        };

        self.recover(generation)
            .await
            .map_err(|e| WireError::Send(format!("reconnection failed: {e}")))?;

        match self.write_payload(&payload).await {
            Ok(()) => Ok(()),
            Err(IoFailure::NotConnected) => {
                Err(WireError::Send("link lost again before retry".to_string()))
            }
            Err(IoFailure::Broken { error, .. }) => Err(WireError::Send(error.to_string())),
        }
    }

    /// Wait for the next envelope, reconnecting and reading again on failure.
    ///
    /// Keep-alive frames are consumed silently. A frame that does not decode
    /// is returned as [`WireError::MalformedEnvelope`] without touching the
    /// link.
    pub async fn receive(&self) -> Result<Envelope, WireError> {
        loop {
            match self.read_payload().await {
                Ok(payload) => return self.codec.decode(&payload),
                Err(IoFailure::NotConnected) => return Err(WireError::NotConnected),
                Err(IoFailure::Broken { generation, error }) => {
                    if generation == self.generation.load(Ordering::SeqCst)
                        && self.state() == ConnectionState::Connected
                    {
                        error!(
                            "client: receive from {} failed: {}; reconnecting and reading again",
                            self.relay_addr(),
                            error
                        );
                    } else {
                        debug!("client: read on stale link ended: {}", error);
                    }
                    self.recover(generation).await?;
                }
            }
        }
    }

    /// Write a zero-length keep-alive frame.
    pub async fn keepalive(&self) -> Result<(), WireError> {
        match self.write_payload(&[]).await {
            Ok(()) => Ok(()),
            Err(IoFailure::NotConnected) => Err(WireError::NotConnected),
            Err(IoFailure::Broken { generation, error }) => {
                warn!("client: keep-alive to {} failed: {}", self.relay_addr(), error);
                self.recover(generation).await
            }
        }
    }

    async fn io_guard(&self) -> Result<(RwLockReadGuard<'_, ()>, u64), IoFailure> {
        loop {
            let guard = self.io_gate.read().await;
            match self.state() {
                ConnectionState::Connected => {
                    return Ok((guard, self.generation.load(Ordering::SeqCst)));
                }
                state if state.is_transitional() => {
                    drop(guard);
                    let mut rx = self.state.subscribe();
                    let _ = rx.wait_for(|s| !s.is_transitional()).await;
                }
                _ => return Err(IoFailure::NotConnected),
            }
        }
    }

    async fn write_payload(&self, payload: &[u8]) -> Result<(), IoFailure> {
        let (_io, generation) = self.io_guard().await?;
        self.channel
            .write_frame(payload)
            .await
            .map_err(|error| IoFailure::Broken { generation, error })
    }

    async fn read_payload(&self) -> Result<Vec<u8>, IoFailure> {
        let (_io, generation) = self.io_guard().await?;
        self.channel
            .read_frame()
            .await
            .map_err(|error| IoFailure::Broken { generation, error })
    }

    /// Repair the link after a failure observed on `generation`.
    async fn recover(&self, generation: u64) -> Result<(), WireError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let _life = self.lifecycle.lock().await;
        match self.state() {
            ConnectionState::Connected => {
                if self.generation.load(Ordering::SeqCst) != generation {
                    return Ok(());
                }
            }
            _ => return Err(WireError::NotConnected),
        }

        self.set_state(ConnectionState::Reconnecting);
        let count = self.reconnects.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(
            "client: link {} -> {} broken, reconnecting (cycle {})",
            self.address,
            self.relay_addr(),
            count
        );
        self.channel.close().await;
        let _io = self.io_gate.write().await;

        let this = self;
        let outcome = retry_async(
            &self.config.reconnect,
            move || this.establish(),
            WireError::is_transient,
        )
        .await;

        match outcome.into_result() {
            Ok(()) => self.finish(epoch).await,
            Err(e) => {
                if self.epoch.load(Ordering::SeqCst) == epoch {
                    error!("client: reconnection to {} failed: {}", self.relay_addr(), e);
                    self.set_state(ConnectionState::Failed);
                } else {
                    self.set_state(ConnectionState::Disconnected);
                }
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<(), WireError> {
        self.channel.open().await?;
        let registered = handshake::register(
            self.channel.as_ref(),
            &self.identity,
            &self.config.relay_public_key,
            self.config.handshake_timeout(),
        )
        .await;
        if let Err(e) = registered {
            self.channel.close().await;
            return Err(e);
        }
        Ok(())
    }

    async fn finish(&self, epoch: u64) -> Result<(), WireError> {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            self.channel.close().await;
            self.set_state(ConnectionState::Disconnected);
            return Err(WireError::NotConnected);
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        info!("client: {} connected to relay {}", self.address, self.relay_addr());
        Ok(())
    }
}

#[async_trait]
impl Connection for NodeClient {
    fn address(&self) -> &str {
        &self.address
    }

    fn state(&self) -> ConnectionState {
        NodeClient::state(self)
    }

    async fn connect(&self) -> Result<(), WireError> {
        NodeClient::connect(self).await
    }

    async fn disconnect(&self) {
        NodeClient::disconnect(self).await
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), WireError> {
        NodeClient::send(self, envelope).await
    }

    async fn receive(&self) -> Result<Envelope, WireError> {
        NodeClient::receive(self).await
    }

    async fn keepalive(&self) -> Result<(), WireError> {
        NodeClient::keepalive(self).await
    }
}
