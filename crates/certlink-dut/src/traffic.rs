//! Traffic-generation worker pool and stream table.
//!
//! A fixed pool of workers is created at startup, one per potential
//! concurrent stream. Each worker blocks on its own capacity-1 task
//! channel; the dispatch loop activates a worker with a non-blocking
//! `try_send` carrying a pre-populated stream descriptor. A busy worker
//! is an error surfaced to the handler, never a blocked control loop,
//! and one worker's stream never blocks another's.
//!
//! Stream payload semantics are owned by the profile; the pool only
//! honors the activation contract: run until the per-activation cancel
//! token fires or the profile's frame budget is spent.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use certlink_core::error::{Error, Result};
use certlink_transport::UdpTransport;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pool size and stream-table capacity: one worker per potential stream.
pub const MAX_STREAMS: usize = 8;

/// Identifier handed back to the manager by stream configuration.
pub type StreamId = u32;

/// What a stream does on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// One configured traffic stream.
#[derive(Debug, Clone)]
pub struct StreamProfile {
    /// Destination address for send streams.
    pub dest: String,
    /// Destination (send) or local (receive) port.
    pub port: u16,
    /// Frames per second; zero means as fast as the pacing floor allows.
    pub rate: u32,
    /// Frame budget for send streams; zero means until stopped.
    pub frame_count: u32,
    /// Payload bytes per frame.
    pub payload_len: usize,
}

impl Default for StreamProfile {
    fn default() -> Self {
        Self {
            dest: String::new(),
            port: 0,
            rate: 0,
            frame_count: 0,
            payload_len: 64,
        }
    }
}

/// Frame counters shared between one worker and its stream slot.
///
/// The worker writes, the control loop reads; nothing else touches them.
#[derive(Debug, Default)]
pub struct StreamStats {
    pub tx_frames: AtomicU32,
    pub rx_frames: AtomicU32,
    pub tx_bytes: AtomicU64,
    pub rx_bytes: AtomicU64,
}

/// One slot in the stream table.
#[derive(Debug)]
pub struct StreamSlot {
    pub id: StreamId,
    pub profile: StreamProfile,
    pub stats: Arc<StreamStats>,
    /// Cancel token of the running activation, if any.
    pub active: Option<CancellationToken>,
}

/// Fixed-capacity table of configured streams.
///
/// Slot index doubles as the worker index: stream N runs on worker N.
#[derive(Debug)]
pub struct StreamTable {
    slots: Vec<Option<StreamSlot>>,
    next_id: StreamId,
}

impl StreamTable {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_STREAMS).map(|_| None).collect(),
            next_id: 1,
        }
    }

    /// Claim a free slot for a new profile; returns the stream id.
    pub fn configure(&mut self, profile: StreamProfile) -> Result<StreamId> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or_else(|| Error::Transport("stream table full".into()))?;

        let id = self.next_id;
        self.next_id += 1;
        self.slots[index] = Some(StreamSlot {
            id,
            profile,
            stats: Arc::new(StreamStats::default()),
            active: None,
        });
        tracing::debug!(stream = id, slot = index, "stream configured");
        Ok(id)
    }

    /// Slot index for a stream id.
    pub fn index_of(&self, id: StreamId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.id == id))
    }

    pub fn get(&self, id: StreamId) -> Option<&StreamSlot> {
        self.slots.iter().flatten().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut StreamSlot> {
        self.slots.iter_mut().flatten().find(|s| s.id == id)
    }

    /// Cancel every active stream and clear the table.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            if let Some(cancel) = slot.active.take() {
                cancel.cancel();
            }
        }
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        tracing::debug!("stream table reset");
    }

    pub fn configured(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

/// One activation handed to a worker.
pub struct StreamJob {
    pub stream_id: StreamId,
    pub direction: Direction,
    pub profile: StreamProfile,
    pub stats: Arc<StreamStats>,
    pub cancel: CancellationToken,
}

struct Worker {
    tx: mpsc::Sender<StreamJob>,
    task: JoinHandle<()>,
}

/// The fixed worker pool.
pub struct TrafficPool {
    workers: Vec<Worker>,
    shutdown: CancellationToken,
}

impl TrafficPool {
    /// Spawn `size` workers, each parked on its private task channel.
    pub fn spawn(size: usize) -> Self {
        let shutdown = CancellationToken::new();
        let workers = (0..size)
            .map(|index| {
                let (tx, rx) = mpsc::channel::<StreamJob>(1);
                let task = tokio::spawn(worker_loop(index, rx, shutdown.clone()));
                Worker { tx, task }
            })
            .collect();
        tracing::info!(size, "traffic worker pool started");
        Self { workers, shutdown }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Activate a worker with a stream job. Never blocks: a worker
    /// already running a stream yields [`Error::WorkerBusy`].
    pub fn activate(&self, worker: usize, job: StreamJob) -> Result<()> {
        let slot = self
            .workers
            .get(worker)
            .ok_or_else(|| Error::Transport(format!("no worker {worker}")))?;
        match slot.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(Error::WorkerBusy(worker)),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(Error::Transport(format!("worker {worker} is gone")))
            }
        }
    }

    /// Stop every worker after its current activation finishes.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for worker in self.workers {
            let _ = worker.task.await;
        }
        tracing::info!("traffic worker pool stopped");
    }
}

/// One worker: park on the task channel, run one stream at a time.
async fn worker_loop(index: usize, mut rx: mpsc::Receiver<StreamJob>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!(worker = index, "worker shutting down");
                break;
            }
            job = rx.recv() => {
                let Some(job) = job else { break };
                tracing::debug!(worker = index, stream = job.stream_id, "stream activated");
                run_stream(index, job).await;
            }
        }
    }
}

/// Drive one stream until cancellation or budget exhaustion.
async fn run_stream(worker: usize, job: StreamJob) {
    let result = match job.direction {
        Direction::Send => run_send_stream(&job).await,
        Direction::Receive => run_receive_stream(&job).await,
    };
    if let Err(e) = result {
        tracing::warn!(worker, stream = job.stream_id, error = %e, "stream ended with error");
    } else {
        tracing::debug!(worker, stream = job.stream_id, "stream finished");
    }
}

/// Inter-frame gap for a target rate, floored so a zero or huge rate
/// still yields to the scheduler.
fn frame_gap(rate: u32) -> Duration {
    if rate == 0 {
        return Duration::from_micros(100);
    }
    Duration::from_micros((1_000_000u64 / u64::from(rate)).max(100))
}

async fn run_send_stream(job: &StreamJob) -> Result<()> {
    let dest: SocketAddr = format!("{}:{}", job.profile.dest, job.profile.port)
        .parse()
        .map_err(|_| {
            Error::InvalidParameter(format!(
                "bad stream destination {}:{}",
                job.profile.dest, job.profile.port
            ))
        })?;

    // Each worker owns its private socket for the life of one stream.
    let socket = UdpTransport::bind("0.0.0.0:0").await?;
    let payload = vec![0u8; job.profile.payload_len];
    let gap = frame_gap(job.profile.rate);
    let mut sent: u32 = 0;

    loop {
        if job.cancel.is_cancelled() {
            break;
        }
        if job.profile.frame_count != 0 && sent >= job.profile.frame_count {
            break;
        }
        socket.send_to(&payload, dest).await?;
        sent += 1;
        job.stats.tx_frames.fetch_add(1, Ordering::Relaxed);
        job.stats
            .tx_bytes
            .fetch_add(payload.len() as u64, Ordering::Relaxed);

        tokio::select! {
            _ = job.cancel.cancelled() => break,
            _ = tokio::time::sleep(gap) => {}
        }
    }
    Ok(())
}

async fn run_receive_stream(job: &StreamJob) -> Result<()> {
    let socket = UdpTransport::bind_port(job.profile.port).await?;
    let mut buf = vec![0u8; 9000];

    loop {
        tokio::select! {
            _ = job.cancel.cancelled() => break,
            received = socket.recv_from(&mut buf, Duration::from_millis(250)) => {
                match received {
                    Ok((n, _src)) => {
                        job.stats.rx_frames.fetch_add(1, Ordering::Relaxed);
                        job.stats.rx_bytes.fetch_add(n as u64, Ordering::Relaxed);
                    }
                    Err(Error::Timeout) => {}
                    Err(e) => return Err(e),
                }
            }
        }
    }
    Ok(())
}
