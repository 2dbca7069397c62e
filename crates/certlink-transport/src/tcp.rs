//! TCP transport for the manager and DUT control links.
//!
//! Two roles live here:
//!
//! - [`TcpServer`] -- the persistent listening socket. The CA binds one
//!   for the manager-facing control link; the DUT agent binds one for the
//!   CA-facing link. Each accepted peer becomes a [`TcpTransport`]
//!   configured with keepalive and linger so an abrupt peer loss still
//!   drains cleanly.
//! - [`TcpTransport`] -- one connected stream, used for accepted peers
//!   and for the CA's per-command client connection to the DUT.

use async_trait::async_trait;
use certlink_core::error::{Error, Result};
use certlink_core::transport::Transport;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Default connection timeout for the client role (5 seconds).
///
/// Generous for a LAN test bed, short enough that a dead DUT surfaces as
/// a status line instead of a hung relay cycle.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Keepalive idle time before the first probe on accepted peers.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(5);

/// Interval between keepalive probes on accepted peers.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Keepalive probe count on accepted peers. Effectively "probe forever":
/// the test manager decides when a link is dead, not the agent.
const KEEPALIVE_RETRIES: u32 = 9999;

/// Linger grace on accepted peers: 500 deciseconds.
const LINGER_GRACE: Duration = Duration::from_secs(50);

/// One connected TCP stream carrying control frames or status lines.
#[derive(Debug)]
pub struct TcpTransport {
    /// The underlying TCP stream, `None` after `close()` is called.
    stream: Option<TcpStream>,
    /// The address string for logging.
    addr: String,
}

impl TcpTransport {
    /// Connect to a TCP endpoint using the default timeout.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect to a TCP endpoint with a specified timeout.
    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        tracing::debug!(addr = %addr, timeout_ms = timeout.as_millis(), "connecting to TCP endpoint");

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::error!(addr = %addr, "TCP connection timed out");
                Error::Timeout
            })?
            .map_err(|e| {
                tracing::error!(addr = %addr, error = %e, "TCP connection failed");
                map_connect_error(e, addr)
            })?;

        // Control exchanges are small and latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(addr = %addr, error = %e, "failed to set TCP_NODELAY (continuing anyway)");
        }

        tracing::info!(addr = %addr, "TCP connection established");

        Ok(Self {
            stream: Some(stream),
            addr: addr.to_string(),
        })
    }

    /// Wrap an already-connected `TcpStream` as a `TcpTransport`.
    pub fn from_stream(stream: TcpStream, addr: String) -> Self {
        tracing::debug!(addr = %addr, "wrapping existing TCP stream");
        Self {
            stream: Some(stream),
            addr,
        }
    }

    /// The address string this transport was connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(addr = %self.addr, bytes = data.len(), "sending data");

        stream.write_all(data).await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "failed to send data");
            map_io_error(e)
        })?;

        stream.flush().await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "failed to flush TCP stream");
            map_io_error(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(
            addr = %self.addr,
            buf_len = buf.len(),
            timeout_ms = timeout.as_millis(),
            "waiting for data"
        );

        match tokio::time::timeout(timeout, stream.read(buf)).await {
            Ok(Ok(0)) => {
                // 0 bytes read means the peer closed the connection.
                tracing::warn!(addr = %self.addr, "peer closed connection (0 bytes read)");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                tracing::trace!(addr = %self.addr, bytes = n, "received data");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(addr = %self.addr, error = %e, "failed to receive data");
                Err(map_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!(addr = %self.addr, "closing TCP connection");

            if let Err(e) = stream.flush().await {
                tracing::warn!(
                    addr = %self.addr,
                    error = %e,
                    "failed to flush before closing (continuing anyway)"
                );
            }

            if let Err(e) = stream.shutdown().await {
                tracing::warn!(
                    addr = %self.addr,
                    error = %e,
                    "failed to shutdown TCP stream (continuing anyway)"
                );
            }

            tracing::info!(addr = %self.addr, "TCP connection closed");
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if self.stream.is_some() {
            tracing::debug!(addr = %self.addr, "TcpTransport dropped, closing connection");
        }
    }
}

/// The persistent listening socket for a server-role control link.
///
/// One per process; it lives for the process lifetime while accepted
/// peers come and go.
#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpServer {
    /// Bind the listening socket.
    ///
    /// `addr` is a `host:port` string; use port 0 to let the OS pick.
    pub async fn bind(addr: &str) -> Result<Self> {
        tracing::debug!(addr = %addr, "binding TCP listener");

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "failed to bind TCP listener");
            Error::Transport(format!("failed to bind {addr}: {e}"))
        })?;

        let local_addr = listener.local_addr().map_err(Error::Io)?;
        tracing::info!(local_addr = %local_addr, "TCP listener bound");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait up to `timeout` for an incoming peer.
    ///
    /// The accepted stream is configured with keepalive and linger so a
    /// peer that vanishes mid-test is detected and its final bytes still
    /// drain. A timeout returns [`Error::Timeout`]; callers loop.
    pub async fn accept(&self, timeout: Duration) -> Result<TcpTransport> {
        let (stream, peer) = match tokio::time::timeout(timeout, self.listener.accept()).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "accept failed");
                return Err(Error::Io(e));
            }
            Err(_) => return Err(Error::Timeout),
        };

        configure_accepted(&stream, peer);

        tracing::info!(peer = %peer, "accepted control connection");
        Ok(TcpTransport::from_stream(stream, peer.to_string()))
    }
}

/// Apply keepalive and linger to an accepted peer socket.
///
/// Failures are logged and ignored: a peer without keepalive still
/// works, it just takes longer to notice it dying.
fn configure_accepted(stream: &TcpStream, peer: SocketAddr) {
    let sock = socket2::SockRef::from(stream);

    let keepalive = socket2::TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL)
        .with_retries(KEEPALIVE_RETRIES);
    if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
        tracing::warn!(peer = %peer, error = %e, "failed to set keepalive (continuing anyway)");
    }

    if let Err(e) = sock.set_linger(Some(LINGER_GRACE)) {
        tracing::warn!(peer = %peer, error = %e, "failed to set linger (continuing anyway)");
    }

    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!(peer = %peer, error = %e, "failed to set TCP_NODELAY (continuing anyway)");
    }
}

/// Map a connection-time I/O error to the appropriate [`Error`] variant.
fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {addr}"))
        }
        _ => Error::Io(e),
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}
