use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::Serialize;
use tracing::info;

/// Terminal state of a retired frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameState {
    /// Every packet arrived and nothing was flagged corrupted.
    Complete,
    /// Retired with a gap or with corruption.
    Partial,
}

/// Outcome of one frame, handed to the sink at retirement.
///
/// `frame_data` borrows the reassembly buffer, which is recycled as soon as
/// the sink returns. Use [`FrameResult::to_owned_frame`] to keep the bytes.
#[derive(Debug, Clone, Copy)]
pub struct FrameResult<'a> {
    pub frame_id: u32,
    pub state: FrameState,
    /// `received_packets == expected_packets`.
    pub complete: bool,
    /// A gap or a corrupted packet is present.
    pub corrupted: bool,
    /// The packet queue dropped packets while this frame was in flight.
    pub queue_pressure: bool,
    pub expected_packets: u16,
    pub received_packets: u16,
    /// High-water mark of bytes written, `frame_data.len()`.
    pub frame_size: usize,
    pub frame_data: &'a [u8],
}

impl FrameResult<'_> {
    pub fn is_partial(&self) -> bool {
        self.state == FrameState::Partial
    }

    pub fn missing_packets(&self) -> u16 {
        self.expected_packets.saturating_sub(self.received_packets)
    }

    pub fn to_owned_frame(&self) -> OwnedFrame {
        OwnedFrame {
            frame_id: self.frame_id,
            state: self.state,
            complete: self.complete,
            corrupted: self.corrupted,
            queue_pressure: self.queue_pressure,
            expected_packets: self.expected_packets,
            received_packets: self.received_packets,
            data: Bytes::copy_from_slice(self.frame_data),
        }
    }
}

/// A [`FrameResult`] that owns its bytes, for handing off to another task.
#[derive(Debug, Clone)]
pub struct OwnedFrame {
    pub frame_id: u32,
    pub state: FrameState,
    pub complete: bool,
    pub corrupted: bool,
    pub queue_pressure: bool,
    pub expected_packets: u16,
    pub received_packets: u16,
    pub data: Bytes,
}

impl OwnedFrame {
    pub fn as_result(&self) -> FrameResult<'_> {
        FrameResult {
            frame_id: self.frame_id,
            state: self.state,
            complete: self.complete,
            corrupted: self.corrupted,
            queue_pressure: self.queue_pressure,
            expected_packets: self.expected_packets,
            received_packets: self.received_packets,
            frame_size: self.data.len(),
            frame_data: &self.data,
        }
    }
}

/// Running totals over a stream of frame results.
///
/// Counters are atomic so a monitoring thread can read them while the
/// owner keeps calling [`update`](Self::update).
#[derive(Debug, Default)]
pub struct FrameStreamStats {
    frames_total: AtomicU64,
    frames_complete: AtomicU64,
    frames_partial: AtomicU64,
    partial_due_to_queue: AtomicU64,
    partial_due_to_gap: AtomicU64,
    packets_expected: AtomicU64,
    packets_received: AtomicU64,
}

/// Point-in-time copy of [`FrameStreamStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_total: u64,
    pub frames_complete: u64,
    pub frames_partial: u64,
    pub partial_due_to_queue: u64,
    pub partial_due_to_gap: u64,
    pub packets_expected: u64,
    pub packets_received: u64,
}

impl StatsSnapshot {
    /// Percentage of frames that retired complete.
    pub fn success_rate(&self) -> f64 {
        if self.frames_total == 0 {
            return 0.0;
        }
        100.0 * self.frames_complete as f64 / self.frames_total as f64
    }
}

impl FrameStreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one result. Call exactly once per emitted frame.
    pub fn update(&self, result: &FrameResult<'_>) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        self.packets_expected
            .fetch_add(u64::from(result.expected_packets), Ordering::Relaxed);
        self.packets_received
            .fetch_add(u64::from(result.received_packets), Ordering::Relaxed);

        match result.state {
            FrameState::Complete => {
                self.frames_complete.fetch_add(1, Ordering::Relaxed);
            }
            FrameState::Partial => {
                self.frames_partial.fetch_add(1, Ordering::Relaxed);
                if result.queue_pressure {
                    self.partial_due_to_queue.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.partial_due_to_gap.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_total: self.frames_total.load(Ordering::Relaxed),
            frames_complete: self.frames_complete.load(Ordering::Relaxed),
            frames_partial: self.frames_partial.load(Ordering::Relaxed),
            partial_due_to_queue: self.partial_due_to_queue.load(Ordering::Relaxed),
            partial_due_to_gap: self.partial_due_to_gap.load(Ordering::Relaxed),
            packets_expected: self.packets_expected.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
        }
    }

    /// Emit one summary line. Silent until the first frame is counted.
    pub fn log(&self) {
        let s = self.snapshot();
        if s.frames_total == 0 {
            return;
        }
        info!(
            frames = s.frames_total,
            complete = s.frames_complete,
            partial = s.frames_partial,
            queue = s.partial_due_to_queue,
            gap = s.partial_due_to_gap,
            packets_received = s.packets_received,
            packets_expected = s.packets_expected,
            "frame stream stats (success {:.2}%)",
            s.success_rate()
        );
    }
}
