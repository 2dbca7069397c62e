//! Error types for certlink.
//!
//! All fallible operations across the harness return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer, and
//! agent-layer errors are all captured here.

/// The error type for all certlink operations.
///
/// Variants cover the failure modes of a control-agent/DUT deployment:
/// socket and serial-port failures, malformed frames, timeouts, bad command
/// parameters, and worker-pool contention.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port, TCP socket, UDP socket).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed TLV frame, bad separator).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for data.
    ///
    /// On a control receive this is the benign no-data case; on a serial
    /// frame read it means the 120-second frame deadline expired mid-frame.
    /// The calling loop decides which.
    #[error("timeout waiting for data")]
    Timeout,

    /// A command carried malformed or missing parameters.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Startup configuration is incomplete or inconsistent for the
    /// selected connection kind. Always fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// No connection has been established on this handle.
    #[error("not connected")]
    NotConnected,

    /// The peer closed or the connection dropped unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// A traffic worker already has an active stream and cannot accept
    /// another activation.
    #[error("traffic worker {0} busy")]
    WorkerBusy(usize),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("port busy".into());
        assert_eq!(e.to_string(), "transport error: port busy");
    }

    #[test]
    fn error_display_protocol() {
        let e = Error::Protocol("bad separator".into());
        assert_eq!(e.to_string(), "protocol error: bad separator");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for data");
    }

    #[test]
    fn error_display_invalid_parameter() {
        let e = Error::InvalidParameter("missing ssid".into());
        assert_eq!(e.to_string(), "invalid parameter: missing ssid");
    }

    #[test]
    fn error_display_config() {
        let e = Error::Config("serial requires --baud".into());
        assert_eq!(e.to_string(), "configuration error: serial requires --baud");
    }

    #[test]
    fn error_display_worker_busy() {
        assert_eq!(Error::WorkerBusy(3).to_string(), "traffic worker 3 busy");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn error_implements_std_error() {
        fn assert_std_error<T: std::error::Error>() {}
        assert_std_error::<Error>();
    }
}
