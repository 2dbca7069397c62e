//! Scripted byte-stream transport for framing tests.
//!
//! The serial synchronization layer reads a raw stream one byte at a
//! time, so expectation pairing (send X, get Y) is the wrong shape for
//! testing it. [`ByteStreamTransport`] instead hands out a pre-loaded
//! byte queue across as many `receive()` calls as the reader makes, with
//! an optional per-call chunk limit to simulate a dribbling serial line.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

use certlink_core::error::{Error, Result};
use certlink_core::transport::Transport;

/// A [`Transport`] that replays a scripted byte stream.
///
/// `receive()` drains the queue (up to the chunk limit) and returns
/// [`Error::Timeout`] once the queue is empty, the same shape a quiet
/// serial line presents. Sent data is recorded for assertions.
#[derive(Debug)]
pub struct ByteStreamTransport {
    /// Bytes still to be handed out by `receive()`.
    queue: VecDeque<u8>,
    /// Upper bound on bytes returned per `receive()` call.
    max_chunk: usize,
    /// Whether the transport is "connected".
    connected: bool,
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
}

impl ByteStreamTransport {
    /// Create an empty, connected stream.
    pub fn new() -> Self {
        ByteStreamTransport {
            queue: VecDeque::new(),
            max_chunk: usize::MAX,
            connected: true,
            sent_log: Vec::new(),
        }
    }

    /// Append bytes to the receive queue.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.queue.extend(bytes.iter().copied());
    }

    /// Cap how many bytes one `receive()` call may return.
    pub fn set_max_chunk(&mut self, max: usize) {
        self.max_chunk = max.max(1);
    }

    /// Bytes still queued and never read.
    pub fn unread(&self) -> usize {
        self.queue.len()
    }

    /// All data sent through this transport, one element per `send()`.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent_log
    }
}

impl Default for ByteStreamTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ByteStreamTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.sent_log.push(data.to_vec());
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if self.queue.is_empty() {
            return Err(Error::Timeout);
        }
        let n = buf.len().min(self.max_chunk).min(self.queue.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.queue.pop_front().expect("queue length checked");
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.queue.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_queue_across_calls() {
        let mut stream = ByteStreamTransport::new();
        stream.push_bytes(&[1, 2, 3, 4, 5]);

        let mut buf = [0u8; 2];
        assert_eq!(
            stream.receive(&mut buf, Duration::from_millis(1)).await.unwrap(),
            2
        );
        assert_eq!(buf, [1, 2]);
        assert_eq!(stream.unread(), 3);

        let mut buf = [0u8; 8];
        assert_eq!(
            stream.receive(&mut buf, Duration::from_millis(1)).await.unwrap(),
            3
        );
        assert_eq!(&buf[..3], &[3, 4, 5]);
    }

    #[tokio::test]
    async fn empty_queue_times_out() {
        let mut stream = ByteStreamTransport::new();
        let mut buf = [0u8; 4];
        let err = stream
            .receive(&mut buf, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test]
    async fn chunk_limit_dribbles_bytes() {
        let mut stream = ByteStreamTransport::new();
        stream.push_bytes(&[9, 8, 7]);
        stream.set_max_chunk(1);

        let mut buf = [0u8; 8];
        for expected in [9u8, 8, 7] {
            let n = stream.receive(&mut buf, Duration::from_millis(1)).await.unwrap();
            assert_eq!(n, 1);
            assert_eq!(buf[0], expected);
        }
    }

    #[tokio::test]
    async fn records_sent_data() {
        let mut stream = ByteStreamTransport::new();
        stream.send(&[0xAA, 0xAA]).await.unwrap();
        stream.send(&[0x01]).await.unwrap();
        assert_eq!(stream.sent(), &[vec![0xAA, 0xAA], vec![0x01]]);
    }

    #[tokio::test]
    async fn close_disconnects() {
        let mut stream = ByteStreamTransport::new();
        stream.push_bytes(&[1]);
        stream.close().await.unwrap();
        assert!(!stream.is_connected());
        let mut buf = [0u8; 1];
        assert!(matches!(
            stream.receive(&mut buf, Duration::from_millis(1)).await.unwrap_err(),
            Error::NotConnected
        ));
    }
}
