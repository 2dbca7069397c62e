//! Serial port transport for the CA-DUT control link.
//!
//! This module provides [`SerialTransport`], which implements the
//! [`Transport`] trait for the serial flavor of the control link: the CA
//! drives the DUT over a console or debug UART when the device has no
//! usable network path during a test.
//!
//! The port is opened in raw 8N1 mode with no flow control, so canonical
//! line processing, echo, and signal generation never touch the binary
//! frames. Frame boundaries are recovered by the synchronization layer in
//! `certlink-proto`, not here.

use async_trait::async_trait;
use certlink_core::error::{Error, Result};
use certlink_core::transport::Transport;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// The enumerated baud rates the link supports.
///
/// An unrecognized rate falls back to [`FALLBACK_BAUD`] with a warning
/// rather than failing the open, so a typo in a launch script degrades
/// instead of killing a test run.
pub const SUPPORTED_BAUDS: &[u32] = &[
    2_400, 4_800, 9_600, 19_200, 38_400, 57_600, 115_200, 230_400, 460_800, 921_600, 1_000_000,
    1_152_000, 1_500_000, 2_000_000, 2_500_000, 3_000_000, 3_500_000, 4_000_000,
];

/// Baud rate used when the requested rate is not in [`SUPPORTED_BAUDS`].
pub const FALLBACK_BAUD: u32 = 115_200;

/// Clamp a requested baud rate to the supported set.
pub fn validate_baud(requested: u32) -> u32 {
    if SUPPORTED_BAUDS.contains(&requested) {
        requested
    } else {
        tracing::warn!(
            requested,
            fallback = FALLBACK_BAUD,
            "baud rate not in supported set, falling back"
        );
        FALLBACK_BAUD
    }
}

/// Serial port transport for control-link frames.
///
/// The port handle is `Option`-guarded: the transport is open iff the
/// inner stream is present, and dropping the transport releases the port
/// on every exit path.
#[derive(Debug)]
pub struct SerialTransport {
    /// The underlying serial port stream.
    port: Option<SerialStream>,
    /// Port path for logging.
    port_name: String,
    /// Effective baud rate after validation.
    baud: u32,
}

impl SerialTransport {
    /// Open a serial device in raw 8N1 mode at the given baud rate.
    ///
    /// The rate is validated against [`SUPPORTED_BAUDS`] first; an
    /// unknown rate opens at [`FALLBACK_BAUD`].
    ///
    /// # Arguments
    ///
    /// * `device` - Serial device path (e.g. "/dev/ttyUSB0")
    /// * `baud` - Requested baud rate
    pub async fn open(device: &str, baud: u32) -> Result<Self> {
        let baud = validate_baud(baud);

        tracing::debug!(device = %device, baud, "opening serial port");

        let port = tokio_serial::new(device, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                tracing::error!(device = %device, error = %e, "failed to open serial port");
                Error::Transport(format!("failed to open serial port {device}: {e}"))
            })?;

        tracing::info!(device = %device, baud, "serial port opened");

        Ok(Self {
            port: Some(port),
            port_name: device.to_string(),
            baud,
        })
    }

    /// The device path this transport was opened on.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// The effective baud rate (after fallback, if any).
    pub fn baud(&self) -> u32 {
        self.baud
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(port = %self.port_name, bytes = data.len(), "sending data");

        port.write_all(data).await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "failed to send data");
            if e.kind() == std::io::ErrorKind::BrokenPipe
                || e.kind() == std::io::ErrorKind::NotConnected
            {
                Error::ConnectionLost
            } else {
                Error::Io(e)
            }
        })?;

        port.flush().await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "failed to flush serial port");
            Error::Io(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(
            port = %self.port_name,
            buf_len = buf.len(),
            timeout_ms = timeout.as_millis(),
            "waiting for data"
        );

        match tokio::time::timeout(timeout, port.read(buf)).await {
            Ok(Ok(n)) => {
                tracing::trace!(port = %self.port_name, bytes = n, "received data");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(port = %self.port_name, error = %e, "failed to receive data");
                if e.kind() == std::io::ErrorKind::BrokenPipe
                    || e.kind() == std::io::ErrorKind::NotConnected
                {
                    Err(Error::ConnectionLost)
                } else {
                    Err(Error::Io(e))
                }
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            tracing::debug!(port = %self.port_name, "closing serial port");

            if let Err(e) = port.flush().await {
                tracing::warn!(
                    port = %self.port_name,
                    error = %e,
                    "failed to flush before closing (continuing anyway)"
                );
            }

            // Dropping the stream restores and releases the port.
            tracing::info!(port = %self.port_name, "serial port closed");
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.port.is_some() {
            tracing::debug!(port = %self.port_name, "SerialTransport dropped, releasing port");
        }
    }
}
