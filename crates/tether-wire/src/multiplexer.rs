//! Many connections behind one inbound and one outbound queue.
//!
//! `start` connects every link and spawns one receive worker per connection
//! plus a single send dispatcher. Receive workers push decoded envelopes onto
//! the shared inbound queue in arrival order; the dispatcher drains the
//! outbound queue in FIFO order and picks a connection per envelope:
//!
//! 1. an explicit route registered with [`Multiplexer::add_route`],
//! 2. the connection whose local address equals `envelope.sender`,
//! 3. the first connection.
//!
//! Per-envelope send failures are logged and dropped; they never stop the
//! dispatcher.

use crate::channel::raised;
use crate::connection::{Connection, ConnectionState};
use crate::error::{ConnectionFailure, WireError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_types::config::MultiplexerConfig;
use tether_types::envelope::Envelope;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct Dispatch {
    connections: Vec<Arc<dyn Connection>>,
    routes: DashMap<String, usize>,
}

impl Dispatch {
    fn resolve(&self, envelope: &Envelope) -> Option<&Arc<dyn Connection>> {
        if let Some(index) = self.routes.get(&envelope.to).map(|r| *r) {
            return self.connections.get(index);
        }
        self.connections
            .iter()
            .find(|c| c.address() == envelope.sender)
            .or_else(|| self.connections.first())
    }

    async fn deliver(&self, envelope: Envelope) {
        let Some(conn) = self.resolve(&envelope) else {
            warn!("mux: no connection for envelope to {}, dropping", envelope.to);
            return;
        };
        if let Err(e) = conn.send(&envelope).await {
            error!(
                "mux: dropped envelope to {} via {}: {}",
                envelope.to,
                conn.address(),
                e
            );
        }
    }

    async fn keepalive_all(&self) {
        for conn in self.connections.iter().filter(|c| c.is_connected()) {
            if let Err(e) = conn.keepalive().await {
                warn!("mux: keep-alive on {} failed: {}", conn.address(), e);
            }
        }
    }
}

/// Multiplexes envelopes over a fixed set of connections.
pub struct Multiplexer {
    config: MultiplexerConfig,
    dispatch: Arc<Dispatch>,
    outbound_tx: mpsc::Sender<Envelope>,
    outbound_rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    inbound_tx: mpsc::UnboundedSender<Envelope>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    shutdown_tx: watch::Sender<bool>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Multiplexer {
    pub fn new(connections: Vec<Arc<dyn Connection>>, config: MultiplexerConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            dispatch: Arc::new(Dispatch {
                connections,
                routes: DashMap::new(),
            }),
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            shutdown_tx,
            workers: std::sync::Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn connections(&self) -> &[Arc<dyn Connection>] {
        &self.dispatch.connections
    }

    /// State of every connection, keyed by local address.
    pub fn connection_states(&self) -> Vec<(String, ConnectionState)> {
        self.dispatch
            .connections
            .iter()
            .map(|c| (c.address().to_string(), c.state()))
            .collect()
    }

    /// True when every connection is connected.
    pub fn is_connected(&self) -> bool {
        !self.dispatch.connections.is_empty()
            && self.dispatch.connections.iter().all(|c| c.is_connected())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Send envelopes for `to` through the connection at `index`.
    pub fn add_route(&self, to: impl Into<String>, index: usize) -> Result<(), WireError> {
        if index >= self.dispatch.connections.len() {
            return Err(WireError::UnknownConnection(index));
        }
        self.dispatch.routes.insert(to.into(), index);
        Ok(())
    }

    pub fn remove_route(&self, to: &str) {
        self.dispatch.routes.remove(to);
    }

    /// Connect every link and start the workers. Idempotent while running.
    ///
    /// Fails with [`WireError::Start`] listing every connection that could not
    /// be established, after disconnecting the ones that could. With
    /// `allow_partial_start` the multiplexer runs as long as one link is up.
    pub async fn start(&self) -> Result<(), WireError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let connections = &self.dispatch.connections;
        let mut failures = Vec::new();
        for (index, conn) in connections.iter().enumerate() {
            if let Err(e) = conn.connect().await {
                warn!("mux: connection #{} ({}) failed: {}", index, conn.address(), e);
                failures.push(ConnectionFailure {
                    index,
                    address: conn.address().to_string(),
                    reason: e.to_string(),
                });
            }
        }

        let all_failed = !connections.is_empty() && failures.len() == connections.len();
        if !failures.is_empty() && (!self.config.allow_partial_start || all_failed) {
            for conn in connections {
                conn.disconnect().await;
            }
            self.running.store(false, Ordering::SeqCst);
            return Err(WireError::Start(failures));
        }
        if !failures.is_empty() {
            warn!(
                "mux: started with {}/{} connections up",
                connections.len() - failures.len(),
                connections.len()
            );
        }

        self.shutdown_tx.send_replace(false);
        let idle = self.config.idle_poll();
        let mut workers = Vec::with_capacity(connections.len() + 1);
        for conn in connections {
            workers.push(tokio::spawn(receive_loop(
                Arc::clone(conn),
                self.inbound_tx.clone(),
                self.shutdown_tx.subscribe(),
                idle,
            )));
        }
        workers.push(tokio::spawn(send_loop(
            Arc::clone(&self.dispatch),
            Arc::clone(&self.outbound_rx),
            self.shutdown_tx.subscribe(),
            self.config.keepalive_interval(),
        )));
        *self.workers.lock().unwrap_or_else(|e| e.into_inner()) = workers;

        info!("mux: started with {} connections", connections.len());
        Ok(())
    }

    /// Stop the workers and disconnect every link.
    ///
    /// Envelopes still queued are kept and sent after the next `start`.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        for conn in &self.dispatch.connections {
            conn.disconnect().await;
        }

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for worker in workers {
            if let Err(e) = worker.await {
                if e.is_panic() {
                    error!("mux: worker panicked: {}", e);
                }
            }
        }
        if self.running.swap(false, Ordering::SeqCst) {
            info!("mux: stopped");
        }
    }

    /// Queue an envelope for sending, waiting while the queue is full.
    ///
    /// Envelopes queued before the first `start` are sent once it runs. After
    /// `stop` this fails with [`WireError::ShuttingDown`], and a `put` blocked
    /// on a full queue is released with the same error.
    pub async fn put(&self, envelope: Envelope) -> Result<(), WireError> {
        let mut stopped = self.shutdown_tx.subscribe();
        tokio::select! {
            biased;
            _ = raised(&mut stopped) => Err(WireError::ShuttingDown),
            sent = self.outbound_tx.send(envelope) => sent.map_err(|_| WireError::ShuttingDown),
        }
    }

    /// Queue an envelope, failing with `QueueFull` after `timeout`.
    pub async fn put_timeout(&self, envelope: Envelope, timeout: Duration) -> Result<(), WireError> {
        let mut stopped = self.shutdown_tx.subscribe();
        let sent = tokio::select! {
            biased;
            _ = raised(&mut stopped) => return Err(WireError::ShuttingDown),
            sent = self.outbound_tx.send_timeout(envelope, timeout) => sent,
        };
        match sent {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(WireError::QueueFull),
            Err(SendTimeoutError::Closed(_)) => Err(WireError::ShuttingDown),
        }
    }

    /// Wait up to `timeout` for the next inbound envelope.
    pub async fn get(&self, timeout: Duration) -> Result<Envelope, WireError> {
        let mut inbound = self.inbound_rx.lock().await;
        match tokio::time::timeout(timeout, inbound.recv()).await {
            Ok(Some(envelope)) => Ok(envelope),
            Ok(None) => Err(WireError::ShuttingDown),
            Err(_) => Err(WireError::Empty),
        }
    }

    /// Take the next inbound envelope without waiting.
    pub async fn try_get(&self) -> Result<Envelope, WireError> {
        self.inbound_rx
            .lock()
            .await
            .try_recv()
            .map_err(|_| WireError::Empty)
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for worker in workers {
            worker.abort();
        }
    }
}

async fn receive_loop(
    conn: Arc<dyn Connection>,
    inbound: mpsc::UnboundedSender<Envelope>,
    mut shutdown: watch::Receiver<bool>,
    idle: Duration,
) {
    loop {
        let result = tokio::select! {
            biased;
            _ = raised(&mut shutdown) => break,
            result = conn.receive() => result,
        };
        match result {
            Ok(envelope) => {
                if inbound.send(envelope).is_err() {
                    break;
                }
            }
            Err(WireError::MalformedEnvelope(reason)) => {
                warn!("mux: dropped malformed envelope on {}: {}", conn.address(), reason);
            }
            Err(e) => {
                if !matches!(e, WireError::NotConnected) {
                    error!("mux: receive on {} failed: {}", conn.address(), e);
                }
                tokio::select! {
                    biased;
                    _ = raised(&mut shutdown) => break,
                    _ = tokio::time::sleep(idle) => {}
                }
            }
        }
    }
    debug!("mux: receive loop for {} stopped", conn.address());
}

async fn send_loop(
    dispatch: Arc<Dispatch>,
    outbound: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    mut shutdown: watch::Receiver<bool>,
    keepalive: Option<Duration>,
) {
    let mut outbound = outbound.lock().await;
    loop {
        let idle = async {
            match keepalive {
                Some(interval) => tokio::time::sleep(interval).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = raised(&mut shutdown) => break,
            next = outbound.recv() => match next {
                Some(envelope) => dispatch.deliver(envelope).await,
                None => break,
            },
            _ = idle => dispatch.keepalive_all().await,
        }
    }
    debug!("mux: send loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalConnection;

    fn pair_muxes() -> (Multiplexer, Multiplexer) {
        let (a, b) = LocalConnection::pair("agent-a", "agent-b");
        let a: Vec<Arc<dyn Connection>> = vec![a];
        let b: Vec<Arc<dyn Connection>> = vec![b];
        (
            Multiplexer::new(a, MultiplexerConfig::default()),
            Multiplexer::new(b, MultiplexerConfig::default()),
        )
    }

    fn env(i: usize) -> Envelope {
        Envelope::new("agent-b", "agent-a", "p", i.to_be_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_fifo_then_empty() {
        let (mux_a, mux_b) = pair_muxes();
        mux_a.start().await.unwrap();
        mux_b.start().await.unwrap();

        for i in 0..1000 {
            mux_a.put(env(i)).await.unwrap();
        }
        for i in 0..1000 {
            let got = mux_b.get(Duration::from_secs(5)).await.unwrap();
            assert_eq!(got, env(i));
        }
        assert!(matches!(
            mux_b.get(Duration::from_millis(50)).await,
            Err(WireError::Empty)
        ));
        assert!(matches!(mux_b.try_get().await, Err(WireError::Empty)));

        mux_a.stop().await;
        mux_b.stop().await;
        assert!(!mux_a.is_running());
    }

    #[tokio::test]
    async fn test_put_timeout_reports_full_queue() {
        let (a, _b) = LocalConnection::pair("agent-a", "agent-b");
        let conns: Vec<Arc<dyn Connection>> = vec![a];
        let config = MultiplexerConfig {
            outbound_capacity: 1,
            ..MultiplexerConfig::default()
        };
        let mux = Multiplexer::new(conns, config);
        mux.put(env(0)).await.unwrap();
        assert!(matches!(
            mux.put_timeout(env(1), Duration::from_millis(20)).await,
            Err(WireError::QueueFull)
        ));
    }

    #[tokio::test]
    async fn test_put_after_stop_is_refused() {
        let (a, _b) = LocalConnection::pair("agent-a", "agent-b");
        let conns: Vec<Arc<dyn Connection>> = vec![a];
        let config = MultiplexerConfig {
            outbound_capacity: 1,
            ..MultiplexerConfig::default()
        };
        let mux = Arc::new(Multiplexer::new(conns, config));
        mux.put(env(0)).await.unwrap();

        let blocked = {
            let mux = Arc::clone(&mux);
            tokio::spawn(async move { mux.put(env(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        mux.stop().await;
        let released = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("blocked put was not released by stop")
            .unwrap();
        assert!(matches!(released, Err(WireError::ShuttingDown)));
        assert!(matches!(mux.put(env(2)).await, Err(WireError::ShuttingDown)));
        assert!(matches!(
            mux.put_timeout(env(3), Duration::from_millis(20)).await,
            Err(WireError::ShuttingDown)
        ));
    }

    #[test]
    fn test_worker_futures_are_send() {
        fn assert_send<T: Send>(_: T) {}
        let (a, _b) = LocalConnection::pair("agent-a", "agent-b");
        let conns: Vec<Arc<dyn Connection>> = vec![a];
        let mux = Multiplexer::new(conns, MultiplexerConfig::default());
        let (inbound, _rx) = mpsc::unbounded_channel();

        assert_send(receive_loop(
            Arc::clone(&mux.dispatch.connections[0]),
            inbound,
            mux.shutdown_tx.subscribe(),
            Duration::from_millis(1),
        ));
        assert_send(send_loop(
            Arc::clone(&mux.dispatch),
            Arc::clone(&mux.outbound_rx),
            mux.shutdown_tx.subscribe(),
            Some(Duration::from_millis(1)),
        ));
        assert_send(mux.put(env(0)));
    }

    #[tokio::test]
    async fn test_routing_precedence() {
        let (a1, _) = LocalConnection::pair("agent-a1", "x");
        let (a2, _) = LocalConnection::pair("agent-a2", "y");
        let conns: Vec<Arc<dyn Connection>> = vec![a1, a2];
        let mux = Multiplexer::new(conns, MultiplexerConfig::default());
        let dispatch = Arc::clone(&mux.dispatch);

        let by_sender = Envelope::new("dest", "agent-a2", "p", Vec::new());
        assert_eq!(dispatch.resolve(&by_sender).unwrap().address(), "agent-a2");

        let unknown = Envelope::new("dest", "stranger", "p", Vec::new());
        assert_eq!(dispatch.resolve(&unknown).unwrap().address(), "agent-a1");

        mux.add_route("dest", 1).unwrap();
        assert_eq!(dispatch.resolve(&unknown).unwrap().address(), "agent-a2");
        assert!(matches!(
            mux.add_route("dest", 5),
            Err(WireError::UnknownConnection(5))
        ));
        mux.remove_route("dest");
        assert_eq!(dispatch.resolve(&unknown).unwrap().address(), "agent-a1");
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let (mux_a, mux_b) = pair_muxes();
        mux_a.start().await.unwrap();
        mux_b.start().await.unwrap();
        mux_a.stop().await;
        assert_eq!(
            mux_a.connection_states(),
            vec![("agent-a".to_string(), ConnectionState::Disconnected)]
        );

        mux_a.start().await.unwrap();
        assert!(mux_a.is_connected());
        mux_a.put(env(7)).await.unwrap();
        assert_eq!(mux_b.get(Duration::from_secs(2)).await.unwrap(), env(7));
        mux_a.stop().await;
        mux_b.stop().await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (mux_a, _mux_b) = pair_muxes();
        mux_a.start().await.unwrap();
        mux_a.start().await.unwrap();
        assert!(mux_a.is_running());
        mux_a.stop().await;
    }
}
