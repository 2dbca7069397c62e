//! Scripted DUT endpoint for command-cycle tests.
//!
//! [`MockTransport`] plays the DUT's side of the control link: a script
//! of request/reply exchanges, consumed in order. Sending the expected
//! TLV frame unlocks the scripted reply, which subsequent `receive()`
//! calls drain; sending anything else is a test failure surfaced as a
//! protocol error. On top of the script, the link can be made to fail
//! on demand so the relay's send-failed and response-timeout paths are
//! reachable without real sockets.
//!
//! # Example
//!
//! ```
//! use certlink_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // One exchange: a GetVersion frame in, a COMPLETE reply out.
//! mock.exchange(&[0xAA, 0xAA, 0x01, 0x00, 0x00, 0x00],
//!               &[0xAA, 0xAA, 0x81, 0x00, 0x04, 0x00, 0x04, 0x00, 0x00, 0x00]);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

use certlink_core::error::{Error, Result};
use certlink_core::transport::Transport;

/// One scripted request/reply step.
#[derive(Debug, Clone)]
struct Exchange {
    request: Vec<u8>,
    reply: Vec<u8>,
}

/// A [`Transport`] that replays a script of control-link exchanges.
///
/// The script is strict: each `send()` must carry exactly the next
/// scripted request, and replies come back only after their request
/// arrived. Reads drain the reply byte queue, so a caller with a small
/// buffer sees the same partial reads a socket would give it. An
/// exhausted reply queue times out, the shape of a DUT that has said
/// everything it is going to say.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: VecDeque<Exchange>,
    /// Reply bytes unlocked by the last matched request.
    reply_queue: VecDeque<u8>,
    /// When set, every `send()` fails as a lost connection.
    fail_sends: bool,
    connected: bool,
    sent_log: Vec<Vec<u8>>,
}

impl MockTransport {
    /// A connected mock with an empty script.
    pub fn new() -> Self {
        MockTransport {
            connected: true,
            ..Default::default()
        }
    }

    /// Append one exchange to the script.
    pub fn exchange(&mut self, request: &[u8], reply: &[u8]) {
        self.script.push_back(Exchange {
            request: request.to_vec(),
            reply: reply.to_vec(),
        });
    }

    /// Make every subsequent `send()` fail as a lost connection.
    pub fn fail_sends(&mut self) {
        self.fail_sends = true;
    }

    /// All data sent through this transport, one element per `send()`.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent_log
    }

    /// Scripted exchanges not yet consumed.
    pub fn pending_exchanges(&self) -> usize {
        self.script.len()
    }

    /// Force the connected state.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if self.fail_sends {
            return Err(Error::ConnectionLost);
        }

        self.sent_log.push(data.to_vec());

        let Some(step) = self.script.pop_front() else {
            return Err(Error::Protocol("send beyond the end of the script".into()));
        };
        if data != step.request.as_slice() {
            return Err(Error::Protocol(format!(
                "request does not match the script: expected {:02X?}, got {:02X?}",
                step.request, data
            )));
        }
        self.reply_queue.extend(step.reply);
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if self.reply_queue.is_empty() {
            return Err(Error::Timeout);
        }
        let n = buf.len().min(self.reply_queue.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.reply_queue.pop_front().expect("queue length checked");
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.reply_queue.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
