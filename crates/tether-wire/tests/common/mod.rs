//! Shared harness for relay integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_types::config::{ClientConfig, MultiplexerConfig, ReconnectPolicy, RelayConfig};
use tether_types::envelope::Envelope;
use tether_types::identity::{Identity, DEFAULT_LEDGER_ID};
use tether_wire::{Channel, Connection, Multiplexer, NodeClient, RelayNode, TcpChannel, WireError};

pub const SECRET: &str = "integration-test-secret";
pub const PROTOCOL: &str = "fipa/0.1";

pub fn relay_config(name: &str, entry_peers: Vec<SocketAddr>) -> RelayConfig {
    RelayConfig {
        node_id: format!("node-{name}"),
        node_name: name.to_string(),
        shared_secret: SECRET.to_string(),
        entry_peers,
        peer_reconnect: ReconnectPolicy {
            max_attempts: 3,
            min_delay_ms: 20,
            max_delay_ms: 100,
            jitter: 0.0,
        },
        ..RelayConfig::default()
    }
}

pub async fn start_relay(name: &str, entry_peers: Vec<SocketAddr>) -> Arc<RelayNode> {
    let (node, _accept) = RelayNode::start(relay_config(name, entry_peers))
        .await
        .expect("relay start");
    node
}

pub fn client_config(relay: &RelayNode) -> ClientConfig {
    let mut config = ClientConfig::new(relay.local_addr().to_string(), relay.public_key_hex());
    config.connect_timeout_ms = 2_000;
    config.handshake_timeout_ms = 2_000;
    config
}

pub fn client(relay: &RelayNode) -> Arc<NodeClient> {
    Arc::new(NodeClient::new(
        client_config(relay),
        Identity::generate(DEFAULT_LEDGER_ID),
    ))
}

/// A client whose channel can be told to fail or corrupt its traffic.
pub fn faulty_client(relay: &RelayNode) -> (Arc<NodeClient>, Arc<FaultSwitch>) {
    let config = client_config(relay);
    let switch = Arc::new(FaultSwitch::default());
    let channel = FaultyChannel {
        inner: TcpChannel::new(config.relay_addr.clone(), config.connect_timeout()),
        switch: Arc::clone(&switch),
    };
    let client = NodeClient::with_channel(
        config,
        Identity::generate(DEFAULT_LEDGER_ID),
        Box::new(channel),
    );
    (Arc::new(client), switch)
}

pub fn mux_over(client: &Arc<NodeClient>) -> Multiplexer {
    mux_with(client, MultiplexerConfig::default())
}

pub fn mux_with(client: &Arc<NodeClient>, config: MultiplexerConfig) -> Multiplexer {
    let conns: Vec<Arc<dyn Connection>> = vec![Arc::clone(client) as Arc<dyn Connection>];
    Multiplexer::new(conns, config)
}

pub fn envelope(from: &NodeClient, to: &NodeClient, body: &[u8]) -> Envelope {
    Envelope::new(
        to.identity().address(),
        from.identity().address(),
        PROTOCOL,
        body.to_vec(),
    )
}

/// Poll `cond` every 10 ms for up to 5 s.
pub async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[derive(Default)]
pub struct FaultSwitch {
    fail_next_read: AtomicBool,
    corrupt_next_read: AtomicBool,
    failing_writes: AtomicUsize,
    registering: AtomicBool,
    opens: AtomicUsize,
    writes: AtomicUsize,
}

impl FaultSwitch {
    /// The next frame read is consumed and then reported as a reset.
    pub fn fail_next_read(&self) {
        self.fail_next_read.store(true, Ordering::SeqCst);
    }

    /// The next frame read is replaced by bytes that do not decode.
    pub fn corrupt_next_read(&self) {
        self.corrupt_next_read.store(true, Ordering::SeqCst);
    }

    /// The next write fails without touching the socket.
    pub fn fail_next_write(&self) {
        self.fail_writes(1);
    }

    /// The next `count` envelope writes fail. The registration record sent
    /// after each open is never failed.
    pub fn fail_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Frames handed to the socket, keep-alives and registrations included.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

struct FaultyChannel {
    inner: TcpChannel,
    switch: Arc<FaultSwitch>,
}

fn injected() -> WireError {
    WireError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "injected fault",
    ))
}

#[async_trait]
impl Channel for FaultyChannel {
    async fn open(&self) -> Result<(), WireError> {
        self.inner.open().await?;
        self.switch.opens.fetch_add(1, Ordering::SeqCst);
        self.switch.registering.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.inner.close().await
    }

    async fn read_frame(&self) -> Result<Vec<u8>, WireError> {
        let frame = self.inner.read_frame().await?;
        if self.switch.fail_next_read.swap(false, Ordering::SeqCst) {
            return Err(injected());
        }
        if self.switch.corrupt_next_read.swap(false, Ordering::SeqCst) {
            return Ok(vec![0xff; 3]);
        }
        Ok(frame)
    }

    async fn write_frame(&self, payload: &[u8]) -> Result<(), WireError> {
        if !self.switch.registering.swap(false, Ordering::SeqCst) {
            let armed = self
                .switch
                .failing_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if armed {
                return Err(injected());
            }
        }
        self.inner.write_frame(payload).await?;
        self.switch.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remote(&self) -> &str {
        self.inner.remote()
    }
}
