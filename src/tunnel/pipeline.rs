//! Data-plane pipeline
//!
//! Four pumps move traffic once the login succeeded:
//!
//! ```text
//!  interface ──read──▶ [InterfaceRead] ──┐
//!                                        ├──▶ write queue ──▶ [TunnelWrite] ──▶ tunnel
//!                        [KeepAlive] ────┘
//!  interface ◀──write── [TunnelRead] ◀────────────────────────────────────────── tunnel
//! ```
//!
//! The write queue is the only synchronization point: two producers, one
//! consumer, FIFO. Every pump holds a teardown guard; when any pump exits
//! for any reason the guard cancels the shared token and closes the
//! interface, so the siblings unblock and exit too.

use super::frame::{self, Frame, TunnelBlock};
use super::{TunnelError, INTERFACE_READ_SIZE, KEEPALIVE_INTERVAL, WRITE_QUEUE_DEPTH};
use crate::device::{DeviceError, VirtualInterface};
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// How long `shutdown` waits for the pumps before aborting them
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Spare capacity reserved before each tunnel read
const TUNNEL_READ_CHUNK: usize = 16 * 1024;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Period between keep-alive frames
    pub keepalive_interval: Duration,
    /// Capacity of the write queue in frames
    pub queue_depth: usize,
    /// Largest frame read from the interface
    pub read_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(KEEPALIVE_INTERVAL),
            queue_depth: WRITE_QUEUE_DEPTH,
            read_size: INTERFACE_READ_SIZE,
        }
    }
}

/// Identifies a pump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    InterfaceRead,
    TunnelWrite,
    TunnelRead,
    KeepAlive,
}

impl fmt::Display for Pump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Pump::InterfaceRead => "interface-read",
            Pump::TunnelWrite => "tunnel-write",
            Pump::TunnelRead => "tunnel-read",
            Pump::KeepAlive => "keep-alive",
        };
        f.write_str(name)
    }
}

/// How a pump ended
#[derive(Debug)]
pub struct PumpExit {
    pub pump: Pump,
    /// `Ok` when the pump stopped because of cancellation
    pub result: Result<(), TunnelError>,
}

/// Cancels the pipeline and closes the interface when dropped
struct Teardown {
    shutdown: CancellationToken,
    iface: Arc<dyn VirtualInterface>,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.iface.close();
    }
}

/// Running set of pumps bridging one interface and one tunnel stream
pub struct Pipeline {
    shutdown: CancellationToken,
    tasks: JoinSet<PumpExit>,
    iface: Arc<dyn VirtualInterface>,
}

impl Pipeline {
    /// Spawn the four pumps
    ///
    /// `reader` and `writer` are the two halves of the tunnel stream; any
    /// bytes already buffered in `reader` are decoded first.
    pub fn start<R, W>(
        reader: R,
        writer: W,
        iface: Arc<dyn VirtualInterface>,
        config: PipelineConfig,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let mut pipeline = Self {
            shutdown: CancellationToken::new(),
            tasks: JoinSet::new(),
            iface,
        };

        let token = pipeline.shutdown.clone();
        let source = Arc::clone(&pipeline.iface);
        let queue = tx.clone();
        pipeline.spawn(
            Pump::InterfaceRead,
            interface_read(source, queue, token, config.read_size),
        );

        let token = pipeline.shutdown.clone();
        pipeline.spawn(Pump::TunnelWrite, tunnel_write(writer, rx, token));

        let token = pipeline.shutdown.clone();
        let sink = Arc::clone(&pipeline.iface);
        pipeline.spawn(Pump::TunnelRead, tunnel_read(reader, sink, token));

        let token = pipeline.shutdown.clone();
        pipeline.spawn(
            Pump::KeepAlive,
            keepalive(tx, token, config.keepalive_interval),
        );

        debug!(interface = %pipeline.iface.name(), "Data plane started");
        pipeline
    }

    fn spawn<F>(&mut self, pump: Pump, work: F)
    where
        F: Future<Output = Result<(), TunnelError>> + Send + 'static,
    {
        let teardown = Teardown {
            shutdown: self.shutdown.clone(),
            iface: Arc::clone(&self.iface),
        };
        self.tasks.spawn(async move {
            let result = work.await;
            match &result {
                Ok(()) => debug!(%pump, "Pump stopped"),
                Err(e) => warn!(%pump, "Pump failed: {}", e),
            }
            drop(teardown);
            PumpExit { pump, result }
        });
    }

    /// Token cancelled once any pump exits or `shutdown` is called
    pub fn cancellation(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wait for the next pump to exit; `None` once all have been collected
    pub async fn wait(&mut self) -> Option<PumpExit> {
        loop {
            match self.tasks.join_next().await? {
                Ok(exit) => return Some(exit),
                Err(e) => warn!("Pump task ended abnormally: {}", e),
            }
        }
    }

    /// Stop every pump and release the interface
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        self.iface.close();

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Pumps did not stop in time, aborting");
            self.tasks.abort_all();
        }
        debug!(interface = %self.iface.name(), "Data plane stopped");
    }
}

async fn interface_read(
    iface: Arc<dyn VirtualInterface>,
    queue: mpsc::Sender<Bytes>,
    shutdown: CancellationToken,
    read_size: usize,
) -> Result<(), TunnelError> {
    let mut buf = vec![0u8; read_size];
    loop {
        let n = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = iface.read(&mut buf) => read?,
        };
        if n == 0 {
            return Err(DeviceError::Closed.into());
        }

        let block = TunnelBlock::data(Bytes::copy_from_slice(&buf[..n])).encode();
        trace!(len = n, "Interface frame queued");
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            sent = queue.send(block) => sent.map_err(|_| TunnelError::Closed)?,
        }
    }
}

async fn tunnel_write<W>(
    writer: W,
    mut queue: mpsc::Receiver<Bytes>,
    shutdown: CancellationToken,
) -> Result<(), TunnelError>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut writer = BufWriter::new(writer);
    loop {
        let first = tokio::select! {
            _ = shutdown.cancelled() => break,
            block = queue.recv() => match block {
                Some(block) => block,
                None => break,
            },
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            written = write_batch(&mut writer, first, &mut queue) => written?,
        }
    }

    let _ = tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await;
    Ok(())
}

/// Write `first` plus whatever is already queued, then flush once
async fn write_batch<W>(
    writer: &mut BufWriter<W>,
    first: Bytes,
    queue: &mut mpsc::Receiver<Bytes>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&first).await?;
    while let Ok(block) = queue.try_recv() {
        writer.write_all(&block).await?;
    }
    writer.flush().await
}

async fn tunnel_read<R>(
    mut reader: R,
    iface: Arc<dyn VirtualInterface>,
    shutdown: CancellationToken,
) -> Result<(), TunnelError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut buf = BytesMut::with_capacity(TUNNEL_READ_CHUNK);
    loop {
        while let Some(frame) = frame::decode(&mut buf)? {
            match frame {
                Frame::Data(blocks) => {
                    for block in blocks.iter().filter(|b| !b.is_empty()) {
                        iface.write(block).await?;
                    }
                }
                Frame::Control { block_count, .. } => {
                    trace!(block_count, "Control frame dropped");
                }
            }
        }

        buf.reserve(TUNNEL_READ_CHUNK);
        let n = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = reader.read_buf(&mut buf) => read?,
        };
        if n == 0 {
            return Err(TunnelError::Closed);
        }
    }
}

async fn keepalive(
    queue: mpsc::Sender<Bytes>,
    shutdown: CancellationToken,
    period: Duration,
) -> Result<(), TunnelError> {
    let block = TunnelBlock::keepalive().encode();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        trace!("Keep-alive queued");
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            sent = queue.send(block.clone()) => sent.map_err(|_| TunnelError::Closed)?,
        }
    }
}
