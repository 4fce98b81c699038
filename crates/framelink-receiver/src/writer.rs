use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use framelink_protocol::{FrameHeader, FRAME_HEADER_SIZE};
use framelink_reassembly::{FrameResult, FrameSink, FrameState, FrameStreamStats, OwnedFrame};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Sink installed on the reassembly thread.
///
/// Accounts every result in the shared stats, then copies the frame into a
/// bounded channel for the writer task. A full channel drops the frame rather
/// than stalling reassembly.
pub struct ChannelSink {
    tx: Option<mpsc::Sender<OwnedFrame>>,
    stats: Arc<FrameStreamStats>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    pub fn new(
        tx: Option<mpsc::Sender<OwnedFrame>>,
        stats: Arc<FrameStreamStats>,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self { tx, stats, dropped }
    }
}

impl FrameSink for ChannelSink {
    fn frame_done(&mut self, result: &FrameResult<'_>) {
        self.stats.update(result);

        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(result.to_owned_frame()) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(frame_id = frame.frame_id, "writer backlog full, frame not written");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(frame_id = result.frame_id, "writer gone, frame not written");
            }
        }
    }
}

/// Output files of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePaths {
    pub frame: PathBuf,
    pub header: PathBuf,
    pub raw: PathBuf,
}

pub struct FrameWriter {
    dir: PathBuf,
}

impl FrameWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output dir: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn paths(&self, frame: &OwnedFrame) -> FramePaths {
        let kind = if frame.state == FrameState::Complete {
            "full"
        } else {
            "partial"
        };
        let base = format!("{}_frame_{:08}", kind, frame.frame_id);
        FramePaths {
            frame: self.dir.join(format!("{base}.bin")),
            header: self.dir.join(format!("{base}_header.bin")),
            raw: self.dir.join(format!("{base}_raw.bin")),
        }
    }

    /// Write the whole frame plus its header and pixel data as separate files.
    pub async fn write(&self, frame: &OwnedFrame) -> Result<FramePaths> {
        if frame.data.len() < FRAME_HEADER_SIZE {
            bail!(
                "frame {} has {} bytes, shorter than the {}-byte frame header",
                frame.frame_id,
                frame.data.len(),
                FRAME_HEADER_SIZE
            );
        }

        if let Err(e) = FrameHeader::from_bytes(&frame.data).and_then(|h| h.validate()) {
            warn!(frame_id = frame.frame_id, "unexpected frame header: {}", e);
        }

        let paths = self.paths(frame);
        let (header, raw) = frame.data.split_at(FRAME_HEADER_SIZE);
        tokio::fs::write(&paths.frame, &frame.data)
            .await
            .with_context(|| format!("failed to write {}", paths.frame.display()))?;
        tokio::fs::write(&paths.header, header)
            .await
            .with_context(|| format!("failed to write {}", paths.header.display()))?;
        tokio::fs::write(&paths.raw, raw)
            .await
            .with_context(|| format!("failed to write {}", paths.raw.display()))?;
        Ok(paths)
    }
}

/// Drain the channel until every sender is gone. Returns frames written.
pub async fn run_frame_writer(mut rx: mpsc::Receiver<OwnedFrame>, writer: FrameWriter) -> u64 {
    let mut written = 0u64;
    while let Some(frame) = rx.recv().await {
        match writer.write(&frame).await {
            Ok(paths) => {
                written += 1;
                debug!(
                    frame_id = frame.frame_id,
                    size = frame.data.len(),
                    path = %paths.frame.display(),
                    "frame written"
                );
            }
            Err(e) => warn!(frame_id = frame.frame_id, "frame not written: {:#}", e),
        }
    }
    info!(written, dir = %writer.dir().display(), "frame writer finished");
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use framelink_protocol::StubEncoder;

    fn owned(frame_id: u32, state: FrameState, data: Bytes) -> OwnedFrame {
        OwnedFrame {
            frame_id,
            state,
            complete: state == FrameState::Complete,
            corrupted: state == FrameState::Partial,
            queue_pressure: false,
            expected_packets: 1,
            received_packets: 1,
            data,
        }
    }

    #[test]
    fn file_names() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FrameWriter::new(dir.path()).unwrap();
        let paths = writer.paths(&owned(42, FrameState::Partial, Bytes::new()));
        assert_eq!(paths.frame, dir.path().join("partial_frame_00000042.bin"));
        assert_eq!(paths.header, dir.path().join("partial_frame_00000042_header.bin"));
        assert_eq!(paths.raw, dir.path().join("partial_frame_00000042_raw.bin"));
    }

    #[tokio::test]
    async fn writes_frame_header_and_raw() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FrameWriter::new(dir.path().join("out")).unwrap();
        let data = StubEncoder::new(4, 2, 16).encode(&[9u8; 16]).unwrap();

        let paths = writer
            .write(&owned(1, FrameState::Complete, data.clone()))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&paths.frame).unwrap(), data.to_vec());
        assert_eq!(
            std::fs::read(&paths.header).unwrap(),
            data[..FRAME_HEADER_SIZE].to_vec()
        );
        assert_eq!(std::fs::read(&paths.raw).unwrap(), vec![9u8; 16]);
    }

    #[tokio::test]
    async fn rejects_frame_shorter_than_header() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FrameWriter::new(dir.path()).unwrap();
        let frame = owned(3, FrameState::Partial, Bytes::from_static(&[1, 2, 3]));
        assert!(writer.write(&frame).await.is_err());
        assert!(!writer.paths(&frame).frame.exists());
    }

    #[tokio::test]
    async fn full_channel_drops_and_counts() {
        let (tx, mut rx) = mpsc::channel(1);
        let stats = Arc::new(FrameStreamStats::new());
        let dropped = Arc::new(AtomicU64::new(0));
        let mut sink = ChannelSink::new(Some(tx), stats.clone(), dropped.clone());

        let frame = owned(1, FrameState::Complete, Bytes::from_static(&[0; 20]));
        sink.frame_done(&frame.as_result());
        sink.frame_done(&frame.as_result());

        assert_eq!(stats.snapshot().frames_total, 2);
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
        assert_eq!(rx.recv().await.unwrap().frame_id, 1);
    }

    #[tokio::test]
    async fn writer_task_stops_when_senders_close() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FrameWriter::new(dir.path()).unwrap();
        let (tx, rx) = mpsc::channel(4);
        let data = StubEncoder::new(1, 1, 8).encode(&[1]).unwrap();
        tx.send(owned(5, FrameState::Complete, data)).await.unwrap();
        tx.send(owned(6, FrameState::Partial, Bytes::new())).await.unwrap();
        drop(tx);

        assert_eq!(run_frame_writer(rx, writer).await, 1);
        assert!(dir.path().join("full_frame_00000005.bin").exists());
    }
}
