//! Injectable observability for the reassembly engine.
//!
//! The manager reports what it does through a [`ReassemblyObserver`] handed in
//! at construction instead of touching process-wide state. Production code
//! uses [`TracingObserver`]; tests use [`RecordingObserver`] and assert on the
//! captured events.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, trace, warn};

use crate::result::FrameState;

/// Why a packet was not copied into its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// `packet_id >= packet_count` of the frame.
    OutOfRange,
    /// The slot was already filled.
    Duplicate,
    /// Payload longer than the per-packet stride.
    Oversize,
    /// `packet_id * stride + payload_size` runs past the frame buffer.
    Overflow,
    /// Packet belongs to a different frame than the reassembler holds.
    WrongFrame,
    /// Reassembler has no frame started.
    NotStarted,
    /// Frame was already evicted; late packets are not allowed to reopen it.
    Evicted,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutOfRange => "out_of_range",
            Self::Duplicate => "duplicate",
            Self::Oversize => "oversize",
            Self::Overflow => "overflow",
            Self::WrongFrame => "wrong_frame",
            Self::NotStarted => "not_started",
            Self::Evicted => "evicted",
        }
    }
}

/// What retired a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    /// All expected packets arrived.
    Completed,
    /// No packet accepted within the idle timeout.
    IdleTimeout,
    /// Older than the maximum frame lifetime.
    LifetimeExpired,
    /// Pushed out to make room for a newer frame.
    Evicted,
    /// Drained at shutdown.
    Shutdown,
}

impl RetireReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::IdleTimeout => "idle_timeout",
            Self::LifetimeExpired => "lifetime_expired",
            Self::Evicted => "evicted",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyEvent {
    FrameStarted {
        frame_id: u32,
        packet_count: u16,
        queue_drops: u64,
    },
    PacketAccepted {
        frame_id: u32,
        packet_id: u16,
        packet_count: u16,
        payload_size: u32,
        gap_hint: bool,
    },
    PacketRejected {
        frame_id: u32,
        packet_id: u16,
        reason: RejectReason,
    },
    /// One per absent slot of a partial frame; only sent to observers that
    /// return true from [`ReassemblyObserver::traces_missing`].
    PacketMissing {
        frame_id: u32,
        packet_id: u16,
        packet_count: u16,
    },
    FrameRetired {
        frame_id: u32,
        state: FrameState,
        reason: RetireReason,
        received: u16,
        expected: u16,
        frame_size: usize,
        queue_pressure: bool,
        /// Accepted packets the producer flagged as out of sequence.
        gap_hints: u32,
    },
}

pub trait ReassemblyObserver: Send + Sync {
    fn on_event(&self, event: &ReassemblyEvent);

    /// Opt in to per-packet [`ReassemblyEvent::PacketMissing`] events.
    fn traces_missing(&self) -> bool {
        false
    }
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ReassemblyObserver for TracingObserver {
    fn on_event(&self, event: &ReassemblyEvent) {
        match *event {
            ReassemblyEvent::FrameStarted {
                frame_id,
                packet_count,
                queue_drops,
            } => {
                debug!(frame_id, packet_count, queue_drops, "frame started");
            }
            ReassemblyEvent::PacketAccepted {
                frame_id,
                packet_id,
                packet_count,
                payload_size,
                gap_hint,
            } => {
                trace!(frame_id, packet_id, packet_count, payload_size, gap_hint, "packet accepted");
            }
            ReassemblyEvent::PacketRejected {
                frame_id,
                packet_id,
                reason,
            } => {
                warn!(frame_id, packet_id, reason = reason.as_str(), "packet rejected");
            }
            ReassemblyEvent::PacketMissing { .. } => {}
            ReassemblyEvent::FrameRetired {
                frame_id,
                state: FrameState::Complete,
                received,
                frame_size,
                ..
            } => {
                info!(frame_id, packets = received, frame_size, "frame complete");
            }
            ReassemblyEvent::FrameRetired {
                frame_id,
                state: FrameState::Partial,
                reason,
                received,
                expected,
                frame_size,
                queue_pressure,
                gap_hints,
            } => {
                warn!(
                    frame_id,
                    reason = reason.as_str(),
                    missing = expected.saturating_sub(received),
                    expected,
                    frame_size,
                    queue_pressure,
                    gap_hints,
                    "frame partial"
                );
            }
        }
    }
}

/// Fans events out to several observers.
#[derive(Default, Clone)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn ReassemblyObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn ReassemblyObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl ReassemblyObserver for ObserverSet {
    fn on_event(&self, event: &ReassemblyEvent) {
        for observer in &self.observers {
            if matches!(event, ReassemblyEvent::PacketMissing { .. }) && !observer.traces_missing()
            {
                continue;
            }
            observer.on_event(event);
        }
    }

    fn traces_missing(&self) -> bool {
        self.observers.iter().any(|o| o.traces_missing())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ReassemblyEvent>>,
    trace_missing: bool,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also record [`ReassemblyEvent::PacketMissing`].
    pub fn with_missing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            trace_missing: true,
        }
    }

    pub fn events(&self) -> Vec<ReassemblyEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn rejections(&self, reason: RejectReason) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ReassemblyEvent::PacketRejected { reason: r, .. } if *r == reason))
            .count()
    }

    pub fn retirements(&self) -> Vec<(u32, FrameState, RetireReason)> {
        self.events()
            .iter()
            .filter_map(|e| match *e {
                ReassemblyEvent::FrameRetired {
                    frame_id,
                    state,
                    reason,
                    ..
                } => Some((frame_id, state, reason)),
                _ => None,
            })
            .collect()
    }
}

impl ReassemblyObserver for RecordingObserver {
    fn on_event(&self, event: &ReassemblyEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(*event);
    }

    fn traces_missing(&self) -> bool {
        self.trace_missing
    }
}
