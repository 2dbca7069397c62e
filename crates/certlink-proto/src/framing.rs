//! Serial stream synchronization and frame assembly.
//!
//! A serial link is a raw byte stream with no message boundaries, so the
//! receiver must find frames by hunting for two consecutive [`SYNC_BYTE`]s
//! (the frame's own separator). Line noise between frames is discarded;
//! an isolated sync byte followed by anything else resets the hunt.
//!
//! One [`read_frame`] call makes at most one frame. Two timeouts apply:
//! the initial readability wait ([`FramerConfig::poll_timeout`]), whose
//! expiry is the benign no-data result `Ok(None)`, and a single wall-clock
//! deadline ([`FramerConfig::deadline`]) set once at call entry that bounds
//! the sync hunt, header read, and payload read together. The deadline is
//! deliberately not reset on partial progress.

use std::time::Duration;

use certlink_core::error::{Error, Result};
use certlink_core::transport::Transport;
use tokio::time::Instant;

use crate::codec::{HDR_LEN, SYNC_BYTE};

/// Configuration for serial frame reads.
#[derive(Debug, Clone)]
pub struct FramerConfig {
    /// Bound on the initial wait for the first byte. Expiry is NoData.
    pub poll_timeout: Duration,
    /// Wall-clock bound on assembling one frame once bytes start flowing.
    pub deadline: Duration,
    /// Link baud rate; sets the pacing delay between short payload reads.
    pub baud: u32,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(120),
            deadline: Duration::from_secs(120),
            baud: 115_200,
        }
    }
}

/// Delay between short payload reads, derived from the baud rate.
///
/// `(10,000,000 x 200) / baud + 1000` microseconds, so a slow link is
/// polled less aggressively than a fast one.
pub fn pacing_delay(baud: u32) -> Duration {
    let micros = (10_000_000u64 * 200) / u64::from(baud.max(1)) + 1000;
    Duration::from_micros(micros)
}

/// Time left until `deadline`, or the frame-assembly timeout failure.
fn remaining(deadline: Instant) -> Result<Duration> {
    let now = Instant::now();
    if now >= deadline {
        return Err(Error::Timeout);
    }
    Ok(deadline - now)
}

/// Read one TLV frame from a raw byte stream.
///
/// Returns `Ok(None)` when nothing became readable within the poll
/// timeout (NoData), `Ok(Some(frame))` with the complete header+payload
/// bytes on success, and `Err(Error::Timeout)` when the frame deadline
/// expired mid-assembly.
///
/// If the declared payload length exceeds `value_cap`, only the fitting
/// portion is read and returned; the remainder is left undrained, which
/// can desynchronize the next frame. Known limitation, preserved for
/// compatibility with deployed peers.
pub async fn read_frame(
    transport: &mut dyn Transport,
    config: &FramerConfig,
    value_cap: usize,
) -> Result<Option<Vec<u8>>> {
    let mut byte = [0u8; 1];

    // Initial readability wait. Nothing arriving is not an error.
    let first = match transport.receive(&mut byte, config.poll_timeout).await {
        Ok(0) | Err(Error::Timeout) => return Ok(None),
        Ok(_) => byte[0],
        Err(e) => return Err(e),
    };

    let deadline = Instant::now() + config.deadline;

    // Hunt for two consecutive sync bytes; anything else is line garbage.
    let mut run = usize::from(first == SYNC_BYTE);
    let mut garbage = usize::from(first != SYNC_BYTE);
    while run < 2 {
        let timeout = remaining(deadline)?;
        let b = match transport.receive(&mut byte, timeout).await {
            Ok(0) | Err(Error::Timeout) => continue,
            Ok(_) => byte[0],
            Err(e) => return Err(e),
        };
        if b == SYNC_BYTE {
            run += 1;
        } else {
            run = 0;
            garbage += 1;
            tracing::trace!(byte = b, "discarding byte before sync");
        }
    }
    if garbage > 0 {
        tracing::debug!(garbage, "resynchronized after discarding bytes");
    }

    // The sync bytes are the frame separator; read the rest of the
    // header one byte at a time.
    let mut frame = vec![SYNC_BYTE, SYNC_BYTE];
    while frame.len() < HDR_LEN {
        let timeout = remaining(deadline)?;
        match transport.receive(&mut byte, timeout).await {
            Ok(0) | Err(Error::Timeout) => continue,
            Ok(_) => frame.push(byte[0]),
            Err(e) => return Err(e),
        }
    }

    let declared = u16::from_le_bytes([frame[4], frame[5]]) as usize;
    let to_read = declared.min(value_cap);
    if to_read < declared {
        tracing::warn!(
            declared,
            value_cap,
            "payload exceeds buffer capacity, excess left undrained"
        );
    }

    // Payload, paced so a slow link is not busy-polled.
    let pace = pacing_delay(config.baud);
    let mut chunk = vec![0u8; to_read.max(1)];
    let mut left = to_read;
    while left > 0 {
        tokio::time::sleep(pace).await;
        let timeout = remaining(deadline)?;
        match transport.receive(&mut chunk[..left], timeout).await {
            Ok(0) | Err(Error::Timeout) => continue,
            Ok(n) => {
                frame.extend_from_slice(&chunk[..n]);
                left -= n;
            }
            Err(e) => return Err(e),
        }
    }

    tracing::debug!(len = frame.len(), "assembled serial frame");
    Ok(Some(frame))
}

/// Send one encoded frame down the stream, then let the line settle.
///
/// The settle delay matches the legacy sender: 200 microseconds per
/// frame byte plus a fixed 25-byte allowance.
pub async fn write_frame(transport: &mut dyn Transport, frame: &[u8]) -> Result<()> {
    transport.send(frame).await?;
    tokio::time::sleep(Duration::from_micros((frame.len() as u64 + 25) * 200)).await;
    Ok(())
}
