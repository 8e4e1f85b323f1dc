//! Byte-in/byte-out transport layer.
//!
//! The protocol engine only needs a synchronous request/reply exchange:
//! write one encapsulation frame, read the matching reply. [`Transport`]
//! captures that contract; [`TcpTransport`] is the production
//! implementation over a single long-lived TCP connection to port 44818.
//!
//! The returned reply is the complete frame, 24-byte encapsulation header
//! included — the engine's reply parsers index absolute offsets into it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::error::{EtherNetIpError, Result};

/// Well-known EtherNet/IP TCP port, appended when the address lacks one.
pub const DEFAULT_PORT: u16 = 44818;
/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Default idle period after which the socket is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

const ENCAP_HEADER_LEN: usize = 24;

/// A duplex channel that exchanges one request frame for one reply frame.
///
/// Implementations must return the entire reply including the
/// encapsulation header. A failed exchange leaves the transport closed;
/// the session layer treats any transport error as fatal.
#[async_trait]
pub trait Transport: Send {
    /// Sends `request` and waits for the matching reply.
    async fn send(&mut self, request: &[u8]) -> Result<Vec<u8>>;

    /// Closes the underlying channel. Must be idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// Appends the well-known port when `address` does not name one.
pub(crate) fn normalize_address(address: &str) -> String {
    if address.contains(':') {
        address.to_string()
    } else {
        format!("{}:{}", address, DEFAULT_PORT)
    }
}

/// TCP transport with a per-request deadline and an idle-close watchdog.
///
/// Expiry of the idle timer closes the socket but does not rewind the
/// session state machine; the next call fails with
/// [`EtherNetIpError::Closed`] and the caller reconnects.
pub struct TcpTransport {
    stream: Arc<Mutex<Option<TcpStream>>>,
    last_activity: Arc<Mutex<Instant>>,
    request_timeout: Duration,
    watchdog: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Connects to `address` (`host` or `host:port`).
    pub async fn connect(
        address: &str,
        request_timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Self> {
        let address = normalize_address(address);
        let stream = timeout(request_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| EtherNetIpError::Timeout(request_timeout))??;
        debug!(%address, "TCP connection established");

        let stream = Arc::new(Mutex::new(Some(stream)));
        let last_activity = Arc::new(Mutex::new(Instant::now()));
        let watchdog = if idle_timeout > Duration::ZERO {
            Some(spawn_idle_watchdog(
                Arc::clone(&stream),
                Arc::clone(&last_activity),
                idle_timeout,
            ))
        } else {
            None
        };

        Ok(Self {
            stream,
            last_activity,
            request_timeout,
            watchdog,
        })
    }

    async fn exchange(stream: &mut TcpStream, request: &[u8], deadline: Duration) -> Result<Vec<u8>> {
        match timeout(deadline, stream.write_all(request)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(EtherNetIpError::Timeout(deadline)),
        }

        let mut header = [0u8; ENCAP_HEADER_LEN];
        match timeout(deadline, stream.read_exact(&mut header)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(EtherNetIpError::Timeout(deadline)),
        }

        let length = u16::from_le_bytes([header[2], header[3]]) as usize;
        let mut frame = Vec::with_capacity(ENCAP_HEADER_LEN + length);
        frame.extend_from_slice(&header);
        if length > 0 {
            let mut body = vec![0u8; length];
            match timeout(deadline, stream.read_exact(&mut body)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(EtherNetIpError::Timeout(deadline)),
            }
            frame.extend_from_slice(&body);
        }
        Ok(frame)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(EtherNetIpError::Closed)?;
        *self.last_activity.lock().await = Instant::now();

        let result = Self::exchange(stream, request, self.request_timeout).await;
        match &result {
            Ok(reply) => {
                debug!(request_len = request.len(), reply_len = reply.len(), "frame exchanged");
                *self.last_activity.lock().await = Instant::now();
            }
            Err(e) => {
                warn!(error = %e, "transport exchange failed, closing socket");
                *guard = None;
            }
        }
        result
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
    }
}

fn spawn_idle_watchdog(
    stream: Arc<Mutex<Option<TcpStream>>>,
    last_activity: Arc<Mutex<Instant>>,
    idle_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let idle = last_activity.lock().await.elapsed();
            if idle >= idle_timeout {
                if stream.lock().await.take().is_some() {
                    warn!(?idle, "closing connection due to idle timeout");
                }
                return;
            }
            tokio::time::sleep(idle_timeout - idle).await;
        }
    })
}
