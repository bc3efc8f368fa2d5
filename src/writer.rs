//! Dedicated writer task: the single writer per connection.
//!
//! Every outbound frame (SUBSCRIBE, UNSUBSCRIBE, ACK, NACK, DISCONNECT)
//! goes through one mpsc channel to one task, so frames reach the socket
//! in exactly the order they were submitted.
//!
//! # Architecture
//!
//! ```text
//! Subscription A ─┐
//! Subscription B ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Socket
//! Connection     ─┘                                    │
//!                                  idle for heart-beat ┘─► "\n"
//! ```
//!
//! Frames that are ready together are written with one vectored write.

use std::io::IoSlice;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, StompError};
use crate::protocol::{encode_frame, Frame, Version};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A heart-beat is a lone EOL.
const HEARTBEAT: &[u8] = b"\n";

/// A frame already encoded for the wire.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    bytes: Bytes,
}

impl OutboundFrame {
    /// Encode `frame` for the negotiated version.
    #[inline]
    pub fn new(frame: &Frame, version: Version) -> Self {
        Self {
            bytes: encode_frame(frame, version),
        }
    }

    /// Wire bytes.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encoded size.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// How long `send` waits for room in a full queue.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable and shared by the connection and its
/// subscriptions.
#[derive(Clone)]
pub struct WriterHandle {
    /// Channel sender for frames.
    tx: mpsc::Sender<OutboundFrame>,
    /// Backpressure timeout.
    timeout: Duration,
}

impl WriterHandle {
    fn new(tx: mpsc::Sender<OutboundFrame>, timeout: Duration) -> Self {
        Self { tx, timeout }
    }

    /// Queue a frame for writing.
    ///
    /// Waits while the queue is full, up to the configured timeout.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        match tokio::time::timeout(self.timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(StompError::ConnectionClosed),
            Err(_) => Err(StompError::BackpressureTimeout),
        }
    }

    /// Whether the writer task has stopped.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The running writer task.
pub struct WriterTask {
    join: JoinHandle<Result<()>>,
    shutdown: oneshot::Sender<()>,
}

impl WriterTask {
    /// Write whatever is already queued, shut the stream down, and wait
    /// for the task to finish.
    pub async fn close(self) -> Result<()> {
        let _ = self.shutdown.send(());
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(StompError::TaskPanicked(e.to_string())),
        }
    }

    /// Stop the task without flushing.
    pub fn abort(&self) {
        self.join.abort();
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// `heartbeat` is the negotiated outgoing interval; zero disables
/// heart-beats.
pub fn spawn_writer_task<W>(
    writer: W,
    config: &WriterConfig,
    heartbeat: Duration,
) -> (WriterHandle, WriterTask)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let handle = WriterHandle::new(tx, config.backpressure_timeout);
    let join = tokio::spawn(writer_loop(rx, writer, heartbeat, shutdown_rx));

    (
        handle,
        WriterTask {
            join,
            shutdown: shutdown_tx,
        },
    )
}

/// Main writer loop - receives frames and writes them to the socket.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    heartbeat: Duration,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let result = loop {
        let first = tokio::select! {
            biased;
            _ = &mut shutdown => break drain(&mut rx, &mut writer).await,
            received = recv_or_idle(&mut rx, heartbeat) => match received {
                Some(Some(frame)) => frame,
                Some(None) => {
                    if let Err(e) = write_heartbeat(&mut writer).await {
                        break Err(e);
                    }
                    continue;
                }
                // Channel closed, clean shutdown
                None => break Ok(()),
            },
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            break Err(e);
        }
    };

    if let Err(e) = &result {
        tracing::debug!(error = %e, "writer task stopped");
    }
    let _ = writer.shutdown().await;
    result
}

/// Next frame, or `Some(None)` when the heart-beat interval passed
/// without one. `None` when the channel is closed.
async fn recv_or_idle(
    rx: &mut mpsc::Receiver<OutboundFrame>,
    heartbeat: Duration,
) -> Option<Option<OutboundFrame>> {
    if heartbeat.is_zero() {
        return rx.recv().await.map(Some);
    }
    match tokio::time::timeout(heartbeat, rx.recv()).await {
        Ok(received) => received.map(Some),
        Err(_) => Some(None),
    }
}

/// Write frames queued before shutdown was requested.
async fn drain<W>(rx: &mut mpsc::Receiver<OutboundFrame>, writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    rx.close();
    let mut batch = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        batch.push(frame);
    }
    write_batch(writer, &batch).await
}

async fn write_heartbeat<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(HEARTBEAT).await?;
    writer.flush().await?;
    tracing::trace!("heart-beat sent");
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(StompError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after partial write.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for frame in batch {
        let end = offset + frame.size();
        if skip_bytes < end {
            let start_in_frame = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.bytes()[start_in_frame..]));
        }
        offset = end;
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    fn ack(id: &str) -> OutboundFrame {
        OutboundFrame::new(&Frame::new(Command::Ack).header("id", id), Version::V1_2)
    }

    #[test]
    fn test_outbound_frame_encoding() {
        let frame = ack("7");
        assert_eq!(frame.bytes(), b"ACK\nid:7\n\n\0");
        assert_eq!(frame.size(), 11);
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.backpressure_timeout, DEFAULT_BACKPRESSURE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_writer_preserves_order() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, &WriterConfig::default(), Duration::ZERO);

        for i in 0..10 {
            handle.send(ack(&i.to_string())).await.unwrap();
        }

        let expected: Vec<u8> = (0..10)
            .flat_map(|i| ack(&i.to_string()).bytes().to_vec())
            .collect();
        let mut received = vec![0u8; expected.len()];
        server.read_exact(&mut received).await.unwrap();

        assert_eq!(received, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_sends_heartbeats_when_idle() {
        let (client, mut server) = duplex(4096);
        let (_handle, _task) =
            spawn_writer_task(client, &WriterConfig::default(), Duration::from_secs(10));

        let mut buf = [0u8; 1];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"\n");
    }

    #[tokio::test]
    async fn test_close_flushes_queued_frames() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, &WriterConfig::default(), Duration::ZERO);

        handle.send(ack("last")).await.unwrap();
        task.close().await.unwrap();

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, ack("last").bytes());
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, &WriterConfig::default(), Duration::ZERO);

        task.close().await.unwrap();

        let result = handle.send(ack("1")).await;
        assert!(matches!(result, Err(StompError::ConnectionClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_times_out_when_full() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(1);
        let handle = WriterHandle::new(tx, Duration::from_secs(1));

        handle.send(ack("1")).await.unwrap();
        let result = handle.send(ack("2")).await;

        assert!(matches!(result, Err(StompError::BackpressureTimeout)));
    }

    #[test]
    fn test_build_remaining_slices() {
        let batch = vec![ack("1"), ack("2")];
        let size = batch[0].size();

        assert_eq!(build_remaining_slices(&batch, 0).len(), 2);

        let slices = build_remaining_slices(&batch, 3);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), size - 3);

        let slices = build_remaining_slices(&batch, size);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), size);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5).map(|i| ack(&i.to_string())).collect();
        let total: usize = batch.iter().map(OutboundFrame::size).sum();

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner().len(), total);
    }
}
