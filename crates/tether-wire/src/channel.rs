//! Reopenable framed byte streams.
//!
//! A [`Channel`] carries frame payloads and can be closed and reopened in
//! place, which is what lets a [`crate::NodeClient`] repair its link without
//! being rebuilt. `close` must unblock any read or write in progress.

use crate::codec;
use crate::error::WireError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// A bidirectional stream of frame payloads.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Open (or reopen) the underlying stream, dropping any previous one.
    async fn open(&self) -> Result<(), WireError>;

    /// Close the stream. Pending reads and writes fail with `ConnectionClosed`.
    async fn close(&self);

    /// Read the next non-empty frame payload.
    async fn read_frame(&self) -> Result<Vec<u8>, WireError>;

    /// Write one frame. An empty payload is a keep-alive.
    async fn write_frame(&self, payload: &[u8]) -> Result<(), WireError>;

    /// Remote endpoint, for logs.
    fn remote(&self) -> &str;
}

/// TCP implementation of [`Channel`].
pub struct TcpChannel {
    addr: String,
    connect_timeout: Duration,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: watch::Sender<bool>,
}

impl TcpChannel {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        let (closed, _) = watch::channel(true);
        Self {
            addr: addr.into(),
            connect_timeout,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            closed,
        }
    }
}

#[async_trait]
impl Channel for TcpChannel {
    async fn open(&self) -> Result<(), WireError> {
        self.close().await;

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| WireError::Connect {
                addr: self.addr.clone(),
                reason: format!("timed out after {:?}", self.connect_timeout),
            })?
            .map_err(|e| WireError::Connect {
                addr: self.addr.clone(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        self.closed.send_replace(false);
        debug!("client: opened stream to {}", self.addr);
        Ok(())
    }

    async fn close(&self) {
        self.closed.send_replace(true);
        let reader = self.reader.lock().await.take();
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
        drop(reader);
    }

    async fn read_frame(&self) -> Result<Vec<u8>, WireError> {
        let mut closed = self.closed.subscribe();
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(WireError::ConnectionClosed)?;
        tokio::select! {
            biased;
            _ = raised(&mut closed) => Err(WireError::ConnectionClosed),
            result = codec::read_frame(reader) => result,
        }
    }

    async fn write_frame(&self, payload: &[u8]) -> Result<(), WireError> {
        let mut closed = self.closed.subscribe();
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(WireError::ConnectionClosed)?;
        tokio::select! {
            biased;
            _ = raised(&mut closed) => Err(WireError::ConnectionClosed),
            result = codec::write_frame(writer, payload) => result,
        }
    }

    fn remote(&self) -> &str {
        &self.addr
    }
}

/// Resolve once `flag` is set to `true`, or its sender is gone.
///
/// The `watch::Ref` is dropped before returning, so callers can use this as a
/// `select!` branch in tasks that must stay `Send`.
pub(crate) async fn raised(flag: &mut watch::Receiver<bool>) {
    let _ = flag.wait_for(|set| *set).await;
}
