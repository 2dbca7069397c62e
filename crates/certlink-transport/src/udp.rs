//! UDP transport for the control link and traffic streams.
//!
//! The control protocol is one TLV frame per datagram, so a connected
//! UDP socket satisfies the [`Transport`] contract directly: `send`
//! targets the fixed peer set by [`UdpTransport::connect`], `receive`
//! waits for the next datagram with a timeout.
//!
//! Note that a UDP "connect" performs no handshake. It fixes the default
//! destination and lets the OS filter most foreign sources, but it is
//! not a delivery or peering guarantee.
//!
//! Traffic-generation workers use the unconnected [`send_to`] /
//! [`recv_from`] surface with their own private sockets.
//!
//! [`send_to`]: UdpTransport::send_to
//! [`recv_from`]: UdpTransport::recv_from

use async_trait::async_trait;
use certlink_core::error::{Error, Result};
use certlink_core::transport::Transport;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// UDP transport for datagram-based control and traffic links.
#[derive(Debug)]
pub struct UdpTransport {
    /// The underlying UDP socket, `None` after `close()`.
    socket: Option<UdpSocket>,
    /// The local address the socket is bound to.
    local_addr: SocketAddr,
    /// The connected peer, if any.
    peer: Option<SocketAddr>,
}

impl UdpTransport {
    /// Bind to a local address.
    ///
    /// Use `"0.0.0.0:0"` for any port, or a fixed port for a well-known
    /// agent endpoint.
    pub async fn bind(addr: &str) -> Result<Self> {
        tracing::debug!(addr = %addr, "binding UDP socket");

        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "failed to bind UDP socket");
            Error::Io(e)
        })?;

        let local_addr = socket.local_addr().map_err(Error::Io)?;
        tracing::debug!(local_addr = %local_addr, "UDP socket bound");

        Ok(Self {
            socket: Some(socket),
            local_addr,
            peer: None,
        })
    }

    /// Bind to a specific port on all interfaces.
    pub async fn bind_port(port: u16) -> Result<Self> {
        Self::bind(&format!("0.0.0.0:{port}")).await
    }

    /// The local address this socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Fix the default peer for subsequent `send`/`receive`.
    pub async fn connect(&mut self, addr: SocketAddr) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;

        tracing::debug!(local = %self.local_addr, remote = %addr, "connecting UDP socket");

        socket.connect(addr).await.map_err(|e| {
            tracing::error!(local = %self.local_addr, remote = %addr, error = %e, "UDP connect failed");
            Error::Io(e)
        })?;

        self.peer = Some(addr);
        Ok(())
    }

    /// Send a datagram to an explicit destination.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;

        tracing::trace!(local = %self.local_addr, remote = %addr, bytes = data.len(), "sending datagram");

        socket.send_to(data, addr).await.map_err(|e| {
            tracing::error!(local = %self.local_addr, remote = %addr, error = %e, "failed to send datagram");
            Error::Io(e)
        })?;

        Ok(())
    }

    /// Receive a datagram with timeout. Returns `(bytes_read, source)`.
    pub async fn recv_from(&self, buf: &mut [u8], timeout: Duration) -> Result<(usize, SocketAddr)> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, socket.recv_from(buf)).await {
            Ok(Ok((n, src))) => {
                tracing::trace!(local = %self.local_addr, remote = %src, bytes = n, "received datagram");
                Ok((n, src))
            }
            Ok(Err(e)) => {
                tracing::error!(local = %self.local_addr, error = %e, "failed to receive datagram");
                Err(Error::Io(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;
        let peer = self.peer.ok_or(Error::NotConnected)?;

        tracing::trace!(local = %self.local_addr, remote = %peer, bytes = data.len(), "sending datagram");

        socket.send(data).await.map_err(|e| {
            tracing::error!(local = %self.local_addr, remote = %peer, error = %e, "failed to send datagram");
            Error::Io(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, socket.recv(buf)).await {
            Ok(Ok(n)) => {
                tracing::trace!(local = %self.local_addr, bytes = n, "received datagram");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(local = %self.local_addr, error = %e, "failed to receive datagram");
                Err(Error::Io(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            tracing::debug!(local = %self.local_addr, "UDP socket closed");
        }
        self.peer = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_and_local_addr() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr();
        assert_eq!(addr.ip(), std::net::Ipv4Addr::LOCALHOST);
        assert_ne!(addr.port(), 0, "OS should assign a nonzero port");
    }

    #[tokio::test]
    async fn connected_send_recv_loopback() {
        let mut a = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let mut b = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        a.connect(b.local_addr()).await.unwrap();
        b.connect(a.local_addr()).await.unwrap();

        a.send(&[0xAA, 0xAA, 0x01, 0x00, 0x00, 0x00]).await.unwrap();

        let mut buf = [0u8; 64];
        let n = b.receive(&mut buf, Duration::from_secs(2)).await.unwrap();
        assert_eq!(&buf[..n], &[0xAA, 0xAA, 0x01, 0x00, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn send_without_peer_is_not_connected() {
        let mut transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let result = transport.send(b"data").await;
        assert!(matches!(result.unwrap_err(), Error::NotConnected));
    }

    #[tokio::test]
    async fn recv_timeout() {
        let mut transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 64];
        let result = transport.receive(&mut buf, Duration::from_millis(50)).await;
        assert!(matches!(result.unwrap_err(), Error::Timeout));
    }

    #[tokio::test]
    async fn recv_from_returns_source() {
        let a = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        a.send_to(b"stream data", b.local_addr()).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, src) = b.recv_from(&mut buf, Duration::from_secs(2)).await.unwrap();
        assert_eq!(&buf[..n], b"stream data");
        assert_eq!(src, a.local_addr());
    }

    #[tokio::test]
    async fn close_disconnects() {
        let mut transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_connected());

        let mut buf = [0u8; 4];
        assert!(matches!(
            transport.receive(&mut buf, Duration::from_millis(10)).await.unwrap_err(),
            Error::NotConnected
        ));
    }

    #[tokio::test]
    async fn multiple_datagrams_in_order() {
        let mut a = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let mut b = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        a.connect(b.local_addr()).await.unwrap();
        b.connect(a.local_addr()).await.unwrap();

        let messages: &[&[u8]] = &[b"first", b"second", b"third"];
        for msg in messages {
            a.send(msg).await.unwrap();
        }

        // Small delay to let all datagrams arrive.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut buf = [0u8; 64];
        for expected in messages {
            let n = b.receive(&mut buf, Duration::from_secs(2)).await.unwrap();
            assert_eq!(&buf[..n], *expected);
        }
    }
}
