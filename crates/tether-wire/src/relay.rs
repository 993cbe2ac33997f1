//! Reference relay node.
//!
//! Accepts two kinds of inbound links, told apart by the first record:
//!
//! - `register`: an agent client. The signed record is validated, the agent's
//!   address is bound to this session, and envelopes read from the session are
//!   routed.
//! - `peer_hello`: another relay, authenticated by HMAC over a shared secret.
//!   Peers exchange the agent addresses they serve and forward envelopes for
//!   them.
//!
//! Routing is one hop: an envelope from a local client goes to the local
//! client bound to `to`, or else to the connected peer that advertises `to`.
//! Envelopes arriving from a peer are only delivered locally. Unroutable
//! envelopes are logged and dropped.

use crate::channel::raised;
use crate::codec::{read_frame, write_frame, EnvelopeCodec};
use crate::error::WireError;
use crate::message::{AgentRecord, HandshakeRecord, PeerHello, PeerMessage, StatusCode, PROTOCOL_VERSION};
use crate::registry::{PeerEntry, PeerRegistry};
use crate::retry::{compute_backoff, retry_async};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_types::config::RelayConfig;
use tether_types::envelope::Envelope;
use tether_types::identity::{Identity, DEFAULT_LEDGER_ID};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long an inbound link may stay silent before its first record.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

struct ClientRoute {
    session: u64,
    tx: mpsc::Sender<Vec<u8>>,
}

struct PeerLink {
    session: u64,
    tx: mpsc::Sender<PeerMessage>,
}

struct PeerSession {
    node_id: String,
    session: u64,
    rx: mpsc::Receiver<PeerMessage>,
}

type PeerStream = (OwnedReadHalf, OwnedWriteHalf, PeerSession);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Client,
    Peer,
}

/// A running relay.
pub struct RelayNode {
    config: RelayConfig,
    public_key: String,
    local_addr: SocketAddr,
    registry: PeerRegistry,
    codec: EnvelopeCodec,
    clients: DashMap<String, ClientRoute>,
    peers: DashMap<String, PeerLink>,
    next_session: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

impl RelayNode {
    /// Bind the listener, start accepting and dial the configured entry peers.
    ///
    /// Links to entry peers are kept up until shutdown: a peer that cannot be
    /// reached now, or whose link drops later, is redialled in the background
    /// following `peer_reconnect`.
    pub async fn start(config: RelayConfig) -> Result<(Arc<Self>, JoinHandle<()>), WireError> {
        let identity = match &config.private_key_hex {
            Some(secret) => Identity::from_secret_hex(DEFAULT_LEDGER_ID, secret)?,
            None => Identity::generate(DEFAULT_LEDGER_ID),
        };

        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            "relay: listening on {} (node_id={}, public_key={})",
            local_addr,
            config.node_id,
            identity.public_key_hex()
        );

        let (shutdown_tx, _) = watch::channel(false);
        let node = Arc::new(Self {
            public_key: identity.public_key_hex(),
            config,
            local_addr,
            registry: PeerRegistry::new(),
            codec: EnvelopeCodec::default(),
            clients: DashMap::new(),
            peers: DashMap::new(),
            next_session: AtomicU64::new(1),
            shutdown_tx,
        });

        let accept_handle = tokio::spawn(Self::accept_loop(listener, Arc::clone(&node)));

        for peer in node.config.entry_peers.clone() {
            let link = match node.dial_peer(peer).await {
                Ok(link) => Some(link),
                Err(e) => {
                    warn!("relay: could not peer with {}: {}; retrying in background", peer, e);
                    None
                }
            };
            tokio::spawn(Arc::clone(&node).maintain_peer(peer, link));
        }

        Ok((node, accept_handle))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Hex public key clients must sign during registration.
    pub fn public_key_hex(&self) -> &str {
        &self.public_key
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Whether a client is currently registered under `address`.
    pub fn has_client(&self, address: &str) -> bool {
        self.clients.contains_key(address)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn local_agents(&self) -> Vec<String> {
        self.clients.iter().map(|e| e.key().clone()).collect()
    }

    /// Stop accepting and close every session.
    pub fn shutdown(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("relay: {} shutting down", self.config.node_name);
        }
    }

    /// Dial another relay once and run the link in the background.
    ///
    /// Unlike entry peers, a link opened this way is not redialled when it ends.
    pub async fn connect_to_peer(self: &Arc<Self>, addr: SocketAddr) -> Result<(), WireError> {
        let (reader, writer, session) = self.dial_peer(addr).await?;
        let node = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = node.run_peer_link(reader, writer, session).await {
                debug!("relay: peer link to {} ended: {}", addr, e);
            }
        });
        Ok(())
    }

    /// Keep the link to `addr` up until shutdown, redialling whenever it ends.
    async fn maintain_peer(self: Arc<Self>, addr: SocketAddr, mut link: Option<PeerStream>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let policy = self.config.peer_reconnect.clone();
        loop {
            if let Some((reader, writer, session)) = link.take() {
                if let Err(e) = self.run_peer_link(reader, writer, session).await {
                    debug!("relay: peer link to {} ended: {}", addr, e);
                }
            }
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            let node = &self;
            let pause = compute_backoff(&policy, 0);
            let dialled = tokio::select! {
                biased;
                _ = raised(&mut shutdown) => break,
                outcome = async {
                    tokio::time::sleep(pause).await;
                    retry_async(&policy, move || node.dial_peer(addr), |_: &WireError| true).await
                } => outcome.into_result(),
            };
            match dialled {
                Ok(stream) => {
                    info!("relay: link to peer at {} re-established", addr);
                    link = Some(stream);
                }
                Err(e) => {
                    warn!("relay: peer at {} still unreachable: {}", addr, e);
                    tokio::select! {
                        biased;
                        _ = raised(&mut shutdown) => break,
                        _ = tokio::time::sleep(Duration::from_millis(policy.max_delay_ms)) => {}
                    }
                }
            }
        }
        debug!("relay: stopped maintaining link to peer at {}", addr);
    }

    async fn dial_peer(self: &Arc<Self>, addr: SocketAddr) -> Result<PeerStream, WireError> {
        info!("relay: connecting to peer at {}", addr);
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        let hello = PeerHello::new(
            self.config.node_id.clone(),
            self.config.node_name.clone(),
            self.local_agents(),
            &self.config.shared_secret,
        );
        write_frame(&mut writer, &HandshakeRecord::PeerHello(hello).to_bytes()?).await?;

        let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(&mut reader))
            .await
            .map_err(|_| WireError::Handshake {
                code: StatusCode::Generic,
                reason: format!("no peer_ack from {addr} within {HANDSHAKE_TIMEOUT:?}"),
            })??;
        let ack = match HandshakeRecord::from_bytes(&reply)? {
            HandshakeRecord::PeerAck(ack) => ack,
            HandshakeRecord::Status { code, msgs } => {
                return Err(WireError::Handshake {
                    code,
                    reason: msgs.join("; "),
                });
            }
            _ => {
                return Err(WireError::Handshake {
                    code: StatusCode::UnexpectedPayload,
                    reason: "Unexpected response to peer_hello".to_string(),
                });
            }
        };
        if ack.protocol_version != PROTOCOL_VERSION {
            return Err(WireError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: ack.protocol_version,
            });
        }
        ack.verify(&self.config.shared_secret)
            .map_err(|(code, reason)| WireError::Handshake { code, reason })?;

        info!(
            "relay: peered with {} ({}) at {}, {} agents",
            ack.node_name,
            ack.node_id,
            addr,
            ack.agents.len()
        );
        let session = self.open_peer_link(&ack, addr);
        Ok((reader, writer, session))
    }

    async fn accept_loop(listener: TcpListener, node: Arc<Self>) {
        let mut shutdown = node.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = raised(&mut shutdown) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("relay: accepted connection from {}", addr);
                        let node = Arc::clone(&node);
                        tokio::spawn(async move {
                            if let Err(e) = node.handle_inbound(stream, addr).await {
                                debug!("relay: connection from {} ended: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("relay: accept error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
            }
        }
        info!("relay: {} stopped accepting", node.config.node_name);
    }

    async fn handle_inbound(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Result<(), WireError> {
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(&mut reader))
            .await
            .map_err(|_| WireError::Handshake {
                code: StatusCode::Generic,
                reason: format!("no handshake from {addr} within {HANDSHAKE_TIMEOUT:?}"),
            })??;

        match HandshakeRecord::from_bytes(&first) {
            Ok(HandshakeRecord::Register { record }) => {
                self.serve_client(reader, writer, addr, record).await
            }
            Ok(HandshakeRecord::PeerHello(hello)) => {
                if let Err((code, reason)) = hello.verify(&self.config.shared_secret) {
                    warn!("relay: rejected peer {} from {}: {}", hello.node_id, addr, reason);
                    return reject(&mut writer, code, reason).await;
                }
                let session = self.open_peer_link(&hello, addr);
                let ack = PeerHello::new(
                    self.config.node_id.clone(),
                    self.config.node_name.clone(),
                    self.local_agents(),
                    &self.config.shared_secret,
                );
                write_frame(&mut writer, &HandshakeRecord::PeerAck(ack).to_bytes()?).await?;
                info!(
                    "relay: peered with {} ({}) from {}, {} agents",
                    hello.node_name,
                    hello.node_id,
                    addr,
                    hello.agents.len()
                );
                self.run_peer_link(reader, writer, session).await
            }
            Ok(_) => {
                warn!("relay: rejected unexpected first record from {}", addr);
                reject(
                    &mut writer,
                    StatusCode::UnexpectedPayload,
                    "Expected register or peer_hello".to_string(),
                )
                .await
            }
            Err(e) => reject(&mut writer, StatusCode::Decode, e.to_string()).await,
        }
    }

    async fn serve_client(
        self: &Arc<Self>,
        mut reader: OwnedReadHalf,
        mut writer: OwnedWriteHalf,
        addr: SocketAddr,
        record: AgentRecord,
    ) -> Result<(), WireError> {
        if let Err((code, reason)) = record.validate(&self.public_key, &self.config.supported_ledgers) {
            warn!("relay: rejected registration of {} from {}: {} ({})", record.address, addr, reason, code);
            return reject(&mut writer, code, reason).await;
        }

        let address = record.address;
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(self.config.session_queue_capacity.max(1));
        // Bind the route before acknowledging so nothing sent to the agent
        // right after registration is dropped.
        let replaced = self
            .clients
            .insert(address.clone(), ClientRoute { session, tx })
            .is_some();
        let ack = HandshakeRecord::status(StatusCode::Success, "registered").to_bytes()?;
        if let Err(e) = write_frame(&mut writer, &ack).await {
            self.clients.remove_if(&address, |_, route| route.session == session);
            return Err(e);
        }
        if replaced {
            info!("relay: {} re-registered from {}, replacing previous session", address, addr);
        } else {
            info!("relay: {} registered from {}", address, addr);
        }
        self.announce(PeerMessage::AgentRegistered {
            address: address.clone(),
        })
        .await;

        let writer_task = tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                match write_frame(&mut writer, &payload).await {
                    Ok(()) => {}
                    Err(e @ WireError::MessageTooLarge { .. }) => {
                        warn!("relay: dropping envelope for client at {}: {}", addr, e);
                    }
                    Err(e) => {
                        debug!("relay: write to client at {} failed: {}", addr, e);
                        break;
                    }
                }
            }
        });

        let mut shutdown = self.shutdown_tx.subscribe();
        let result = loop {
            let frame = tokio::select! {
                _ = raised(&mut shutdown) => break Ok(()),
                frame = read_frame(&mut reader) => frame,
            };
            let payload = match frame {
                Ok(p) => p,
                Err(WireError::ConnectionClosed) => break Ok(()),
                Err(e) => break Err(e),
            };
            match self.codec.decode(&payload) {
                Ok(envelope) => self.route(envelope, Origin::Client).await,
                Err(e) => warn!("relay: dropping malformed envelope from {}: {}", address, e),
            }
        };

        writer_task.abort();
        if self
            .clients
            .remove_if(&address, |_, route| route.session == session)
            .is_some()
        {
            info!("relay: {} disconnected", address);
            self.announce(PeerMessage::AgentUnregistered {
                address: address.clone(),
            })
            .await;
        }
        result
    }

    fn open_peer_link(&self, hello: &PeerHello, addr: SocketAddr) -> PeerSession {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.session_queue_capacity.max(1));
        self.registry.add_peer(PeerEntry::new(
            hello.node_id.clone(),
            hello.node_name.clone(),
            addr,
            hello.agents.iter().cloned(),
            hello.protocol_version,
        ));
        // Agents that registered while the handshake was in flight.
        for address in self.local_agents() {
            if tx.try_send(PeerMessage::AgentRegistered { address }).is_err() {
                break;
            }
        }
        self.peers.insert(hello.node_id.clone(), PeerLink { session, tx });
        PeerSession {
            node_id: hello.node_id.clone(),
            session,
            rx,
        }
    }

    async fn run_peer_link(
        &self,
        mut reader: OwnedReadHalf,
        mut writer: OwnedWriteHalf,
        session: PeerSession,
    ) -> Result<(), WireError> {
        let PeerSession {
            node_id,
            session,
            mut rx,
        } = session;

        let peer = node_id.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let bytes = match msg.to_bytes() {
                    Ok(b) => b,
                    Err(e) => {
                        warn!("relay: could not encode message for peer {}: {}", peer, e);
                        continue;
                    }
                };
                match write_frame(&mut writer, &bytes).await {
                    Ok(()) => {}
                    Err(e @ WireError::MessageTooLarge { .. }) => {
                        warn!("relay: dropping message for peer {}: {}", peer, e);
                    }
                    Err(e) => {
                        debug!("relay: write to peer {} failed: {}", peer, e);
                        break;
                    }
                }
            }
        });

        let mut shutdown = self.shutdown_tx.subscribe();
        let result = loop {
            let frame = tokio::select! {
                _ = raised(&mut shutdown) => break Ok(()),
                frame = read_frame(&mut reader) => frame,
            };
            let payload = match frame {
                Ok(p) => p,
                Err(WireError::ConnectionClosed) => break Ok(()),
                Err(e) => break Err(e),
            };
            match PeerMessage::from_bytes(&payload) {
                Ok(PeerMessage::Forward { envelope }) => self.route(envelope, Origin::Peer).await,
                Ok(PeerMessage::AgentRegistered { address }) => {
                    debug!("relay: peer {} serves {}", node_id, address);
                    self.registry.add_agent(&node_id, address);
                }
                Ok(PeerMessage::AgentUnregistered { address }) => {
                    debug!("relay: peer {} no longer serves {}", node_id, address);
                    self.registry.remove_agent(&node_id, &address);
                }
                Err(e) => warn!("relay: undecodable message from peer {}: {}", node_id, e),
            }
        };

        writer_task.abort();
        if self
            .peers
            .remove_if(&node_id, |_, link| link.session == session)
            .is_some()
        {
            self.registry.mark_disconnected(&node_id);
            info!("relay: link to peer {} closed", node_id);
        }
        result
    }

    async fn route(&self, envelope: Envelope, origin: Origin) {
        let local = self.clients.get(&envelope.to).map(|r| r.tx.clone());
        if let Some(tx) = local {
            let to = envelope.to.clone();
            if tx.send(self.codec.encode(&envelope)).await.is_err() {
                debug!("relay: session for {} closed, dropping envelope", to);
            }
            return;
        }

        if origin == Origin::Peer {
            warn!("relay: no local client {} for forwarded envelope, dropping", envelope.to);
            return;
        }

        let link = self
            .registry
            .find_peer_for(&envelope.to)
            .and_then(|node_id| self.peers.get(&node_id).map(|l| l.tx.clone()));
        match link {
            Some(tx) => {
                let to = envelope.to.clone();
                if tx.send(PeerMessage::Forward { envelope }).await.is_err() {
                    debug!("relay: peer link for {} closed, dropping envelope", to);
                }
            }
            None => warn!("relay: unknown destination {}, dropping envelope", envelope.to),
        }
    }

    async fn announce(&self, msg: PeerMessage) {
        let links: Vec<_> = self.peers.iter().map(|l| l.tx.clone()).collect();
        for tx in links {
            let _ = tx.send(msg.clone()).await;
        }
    }
}

async fn reject(writer: &mut OwnedWriteHalf, code: StatusCode, reason: String) -> Result<(), WireError> {
    write_frame(writer, &HandshakeRecord::status(code, reason.clone()).to_bytes()?).await?;
    Err(WireError::Handshake { code, reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-for-unit-tests";

    async fn relay(name: &str, secret: &str) -> Arc<RelayNode> {
        let config = RelayConfig {
            node_id: format!("node-{name}"),
            node_name: name.to_string(),
            shared_secret: secret.to_string(),
            ..RelayConfig::default()
        };
        RelayNode::start(config).await.unwrap().0
    }

    async fn exchange(addr: SocketAddr, record: &HandshakeRecord) -> (TcpStream, HandshakeRecord) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, &record.to_bytes().unwrap())
            .await
            .unwrap();
        let reply = read_frame(&mut stream).await.unwrap();
        (stream, HandshakeRecord::from_bytes(&reply).unwrap())
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_register_and_echo_to_self() {
        let node = relay("solo", SECRET).await;
        let agent = Identity::generate(DEFAULT_LEDGER_ID);
        let record = AgentRecord::sign(&agent, node.public_key_hex());
        let (mut stream, reply) =
            exchange(node.local_addr(), &HandshakeRecord::Register { record }).await;
        assert!(matches!(
            reply,
            HandshakeRecord::Status {
                code: StatusCode::Success,
                ..
            }
        ));
        assert!(node.has_client(&agent.address()));

        let env = Envelope::new(agent.address(), agent.address(), "p", b"loop".to_vec());
        write_frame(&mut stream, &crate::codec::encode_envelope(&env))
            .await
            .unwrap();
        let back = read_frame(&mut stream).await.unwrap();
        assert_eq!(crate::codec::decode_envelope(&back).unwrap(), env);

        drop(stream);
        let address = agent.address();
        wait_until(|| !node.has_client(&address)).await;
        node.shutdown();
    }

    #[tokio::test]
    async fn test_registration_for_other_relay_rejected() {
        let node = relay("strict", SECRET).await;
        let other = Identity::generate(DEFAULT_LEDGER_ID);
        let agent = Identity::generate(DEFAULT_LEDGER_ID);
        let record = AgentRecord::sign(&agent, &other.public_key_hex());
        let (_stream, reply) =
            exchange(node.local_addr(), &HandshakeRecord::Register { record }).await;
        match reply {
            HandshakeRecord::Status { code, .. } => assert_eq!(code, StatusCode::WrongPublicKey),
            other => panic!("Expected Status, got {other:?}"),
        }
        assert_eq!(node.client_count(), 0);
    }

    #[tokio::test]
    async fn test_unexpected_first_record_rejected() {
        let node = relay("guard", SECRET).await;
        let (_stream, reply) = exchange(
            node.local_addr(),
            &HandshakeRecord::status(StatusCode::Success, "hi"),
        )
        .await;
        match reply {
            HandshakeRecord::Status { code, .. } => {
                assert_eq!(code, StatusCode::UnexpectedPayload)
            }
            other => panic!("Expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_garbage_first_frame_is_decode_error() {
        let node = relay("garbage", SECRET).await;
        let mut stream = TcpStream::connect(node.local_addr()).await.unwrap();
        write_frame(&mut stream, b"not json").await.unwrap();
        let reply = HandshakeRecord::from_bytes(&read_frame(&mut stream).await.unwrap()).unwrap();
        assert!(matches!(
            reply,
            HandshakeRecord::Status {
                code: StatusCode::Decode,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_peering_and_agent_announcements() {
        let a = relay("a", SECRET).await;
        let b = relay("b", SECRET).await;
        b.connect_to_peer(a.local_addr()).await.unwrap();

        assert_eq!(b.registry().connected_count(), 1);
        assert_eq!(b.registry().get_peer("node-a").unwrap().node_name, "a");
        wait_until(|| a.registry().connected_count() == 1).await;

        let agent = Identity::generate(DEFAULT_LEDGER_ID);
        let record = AgentRecord::sign(&agent, a.public_key_hex());
        let (stream, _) = exchange(a.local_addr(), &HandshakeRecord::Register { record }).await;
        let address = agent.address();
        wait_until(|| b.registry().find_peer_for(&address).as_deref() == Some("node-a")).await;

        drop(stream);
        wait_until(|| b.registry().find_peer_for(&address).is_none()).await;
    }

    #[tokio::test]
    async fn test_peer_with_wrong_secret_rejected() {
        let a = relay("a", SECRET).await;
        let b = relay("b", "a-different-secret").await;
        let err = b.connect_to_peer(a.local_addr()).await.unwrap_err();
        assert!(matches!(
            err,
            WireError::Handshake {
                code: StatusCode::InvalidProof,
                ..
            }
        ));
        assert_eq!(a.registry().connected_count(), 0);
        assert_eq!(b.registry().connected_count(), 0);
    }

    #[tokio::test]
    async fn test_relay_without_secret_refuses_peering() {
        let a = relay("open", "").await;
        let b = relay("b", "").await;
        let err = b.connect_to_peer(a.local_addr()).await.unwrap_err();
        assert!(matches!(
            err,
            WireError::Handshake {
                code: StatusCode::Generic,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_background_futures_are_send() {
        fn assert_send<T: Send>(_: T) {}
        let node = relay("send", SECRET).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        assert_send(RelayNode::accept_loop(listener, Arc::clone(&node)));
        assert_send(Arc::clone(&node).maintain_peer(node.local_addr(), None));
        node.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let (node, handle) = RelayNode::start(RelayConfig::default()).await.unwrap();
        node.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_fixed_private_key() {
        let secret = "33".repeat(32);
        let expected = Identity::from_secret_hex(DEFAULT_LEDGER_ID, &secret).unwrap();
        let config = RelayConfig {
            private_key_hex: Some(secret),
            ..RelayConfig::default()
        };
        let (node, _) = RelayNode::start(config).await.unwrap();
        assert_eq!(node.public_key_hex(), expected.public_key_hex());
    }
}
