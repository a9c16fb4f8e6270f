//! Dedicated writer task for outbound frames.
//!
//! The session loop never awaits a transport write. Frames are queued on a
//! bounded channel and written in order by a task that owns the write half,
//! so a peer that is slow to read cannot stall inbound processing or the
//! timers.
//!
//! ```text
//! select loop ─► mpsc::Sender<Bytes> ─► writer task ─► WriteHalf
//! ```
//!
//! Every frame the protocol writes is repeated by the retry timer or the
//! heartbeat, so a frame refused by a full queue is dropped rather than
//! waited on.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Default depth of the outbound frame queue
pub const DEFAULT_WRITE_QUEUE_DEPTH: usize = 32;

/// Result of queueing a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queued {
    /// The frame will be written
    Accepted,
    /// The queue is full; the frame was dropped
    Full,
    /// The writer task has stopped
    Closed,
}

/// Handle for queueing frames to the writer task
///
/// Dropping the handle lets the writer drain what is already queued and
/// exit. Dropping the [`WriterTask`] aborts it instead.
#[derive(Debug, Clone)]
pub struct FrameWriter {
    tx: mpsc::Sender<Bytes>,
}

impl FrameWriter {
    /// Queue a frame without waiting
    pub fn queue(&self, frame: Bytes) -> Queued {
        match self.tx.try_send(frame) {
            Ok(()) => Queued::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => Queued::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Queued::Closed,
        }
    }
}

/// Running writer task; aborted when dropped
#[derive(Debug)]
pub struct WriterTask {
    handle: JoinHandle<()>,
    failed: oneshot::Receiver<std::io::Error>,
}

impl WriterTask {
    /// Wait until the writer fails
    ///
    /// Resolves with `None` if the writer exits without an error.
    pub async fn failure(&mut self) -> Option<std::io::Error> {
        (&mut self.failed).await.ok()
    }
}

impl Drop for WriterTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn a writer task owning `writer`
///
/// `on_written` runs after each frame is fully written, with its length.
pub fn spawn_writer<W, F>(writer: W, depth: usize, on_written: F) -> (FrameWriter, WriterTask)
where
    W: AsyncWrite + Unpin + Send + 'static,
    F: Fn(usize) + Send + 'static,
{
    let (tx, rx) = mpsc::channel(depth.max(1));
    let (failed_tx, failed_rx) = oneshot::channel();
    let handle = tokio::spawn(write_frames(writer, rx, failed_tx, on_written));

    (
        FrameWriter { tx },
        WriterTask {
            handle,
            failed: failed_rx,
        },
    )
}

async fn write_frames<W, F>(
    mut writer: W,
    mut frames: mpsc::Receiver<Bytes>,
    failed: oneshot::Sender<std::io::Error>,
    on_written: F,
) where
    W: AsyncWrite + Unpin,
    F: Fn(usize),
{
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            let _ = failed.send(e);
            return;
        }
        on_written(frame.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_frames_written_in_order() {
        let (a, mut b) = tokio::io::duplex(1024);
        let written = Arc::new(AtomicUsize::new(0));
        let counter = written.clone();
        let (writer, _task) = spawn_writer(a, 4, move |n| {
            counter.fetch_add(n, Ordering::SeqCst);
        });

        assert_eq!(writer.queue(Bytes::from_static(b"abc")), Queued::Accepted);
        assert_eq!(writer.queue(Bytes::from_static(b"de")), Queued::Accepted);

        let mut buf = [0u8; 5];
        timeout(Duration::from_secs(5), b.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"abcde");

        timeout(Duration::from_secs(5), async {
            while written.load(Ordering::SeqCst) < 5 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_waiting() {
        // The peer never reads, so the writer stalls on the first frame
        let (a, _b) = tokio::io::duplex(8);
        let (writer, _task) = spawn_writer(a, 1, |_| {});

        let mut results = Vec::new();
        for _ in 0..4 {
            results.push(writer.queue(Bytes::from(vec![0u8; 64])));
            tokio::task::yield_now().await;
        }
        assert!(results.contains(&Queued::Full));
    }

    #[tokio::test]
    async fn test_failure_reported() {
        let (a, b) = tokio::io::duplex(64);
        let (writer, mut task) = spawn_writer(a, 4, |_| {});
        drop(b);

        writer.queue(Bytes::from_static(b"lost"));
        let error = timeout(Duration::from_secs(5), task.failure()).await.unwrap();
        assert!(error.is_some());
        assert_eq!(writer.queue(Bytes::from_static(b"x")), Queued::Closed);
    }

    #[tokio::test]
    async fn test_dropped_handle_ends_writer() {
        let (a, _b) = tokio::io::duplex(64);
        let (writer, mut task) = spawn_writer(a, 4, |_| {});
        drop(writer);

        let error = timeout(Duration::from_secs(5), task.failure()).await.unwrap();
        assert!(error.is_none());
    }
}
