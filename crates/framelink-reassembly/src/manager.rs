use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::config::ReassemblyConfig;
use crate::error::ConfigError;
use crate::observer::{ReassemblyEvent, ReassemblyObserver, RejectReason, RetireReason};
use crate::packet::RxPacket;
use crate::reassembler::{FrameReassembler, PushOutcome};
use crate::result::{FrameResult, FrameState};

/// Receives every retired frame, synchronously, on the reassembly thread.
///
/// The borrowed buffer is reused right after `frame_done` returns; copy it
/// (e.g. [`FrameResult::to_owned_frame`]) to keep it.
pub trait FrameSink {
    fn frame_done(&mut self, result: &FrameResult<'_>);
}

impl<F> FrameSink for F
where
    F: FnMut(&FrameResult<'_>),
{
    fn frame_done(&mut self, result: &FrameResult<'_>) {
        self(result)
    }
}

/// Emission and packet totals of one manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerCounters {
    pub frames_started: u64,
    pub frames_emitted: u64,
    pub frames_complete: u64,
    pub frames_partial: u64,
    pub frames_evicted: u64,
    pub packets_accepted: u64,
    pub packets_rejected: u64,
}

struct FrameEntry {
    reassembler: FrameReassembler,
    first_packet_time: Instant,
    last_update: Instant,
    queue_drop_at_start: u64,
}

/// Tracks every in-flight frame and decides when each one retires.
///
/// Single-threaded: owned by the reassembly worker. Frames are keyed by id in
/// a `BTreeMap` so sweeps and the shutdown drain run in a stable order.
pub struct FrameManager<S: FrameSink> {
    config: ReassemblyConfig,
    frames: BTreeMap<u32, FrameEntry>,
    pool: Vec<FrameReassembler>,
    sink: S,
    observer: Arc<dyn ReassemblyObserver>,
    counters: ManagerCounters,
    expired: Vec<(u32, RetireReason)>,
    /// Ids of recently evicted frames, oldest first.
    evicted: VecDeque<u32>,
}

impl<S: FrameSink> FrameManager<S> {
    pub fn new(
        config: ReassemblyConfig,
        sink: S,
        observer: Arc<dyn ReassemblyObserver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            frames: BTreeMap::new(),
            pool: Vec::with_capacity(config.buffer_pool_size),
            sink,
            observer,
            counters: ManagerCounters::default(),
            expired: Vec::new(),
            evicted: VecDeque::new(),
        })
    }

    pub fn config(&self) -> &ReassemblyConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn counters(&self) -> ManagerCounters {
        self.counters
    }

    pub fn contains_frame(&self, frame_id: u32) -> bool {
        self.frames.contains_key(&frame_id)
    }

    pub fn push_packet(&mut self, packet: RxPacket, queue_drops: u64) -> PushOutcome {
        self.push_packet_at(packet, queue_drops, Instant::now())
    }

    /// Route one packet to its frame, creating the frame on first sight.
    pub fn push_packet_at(&mut self, packet: RxPacket, queue_drops: u64, now: Instant) -> PushOutcome {
        let header = *packet.header();
        let frame_id = header.frame_id;

        if !self.frames.contains_key(&frame_id) {
            if self.evicted.contains(&frame_id) {
                let reason = RejectReason::Evicted;
                self.counters.packets_rejected += 1;
                self.observer.on_event(&ReassemblyEvent::PacketRejected {
                    frame_id,
                    packet_id: header.packet_id,
                    reason,
                });
                return PushOutcome::Rejected(reason);
            }
            if let Some(limit) = self.config.max_in_flight_frames {
                while self.frames.len() >= limit {
                    self.evict_oldest(limit, queue_drops);
                }
            }
            let mut reassembler = self.take_reassembler();
            reassembler.start_new_frame(frame_id, header.packet_count);
            self.frames.insert(
                frame_id,
                FrameEntry {
                    reassembler,
                    first_packet_time: now,
                    last_update: now,
                    queue_drop_at_start: queue_drops,
                },
            );
            self.counters.frames_started += 1;
            self.observer.on_event(&ReassemblyEvent::FrameStarted {
                frame_id,
                packet_count: header.packet_count,
                queue_drops,
            });
        }

        let Some(entry) = self.frames.get_mut(&frame_id) else {
            return PushOutcome::Rejected(RejectReason::NotStarted);
        };
        let outcome = entry
            .reassembler
            .push_packet(&header, packet.payload(), packet.gap_before);

        match outcome {
            PushOutcome::Accepted => {
                entry.last_update = now;
                self.counters.packets_accepted += 1;
                self.observer.on_event(&ReassemblyEvent::PacketAccepted {
                    frame_id,
                    packet_id: header.packet_id,
                    packet_count: entry.reassembler.expected_packets(),
                    payload_size: header.payload_size,
                    gap_hint: packet.gap_before,
                });
            }
            PushOutcome::Rejected(reason) => {
                self.counters.packets_rejected += 1;
                self.observer.on_event(&ReassemblyEvent::PacketRejected {
                    frame_id,
                    packet_id: header.packet_id,
                    reason,
                });
            }
        }
        outcome
    }

    pub fn poll_timers(&mut self, queue_drops: u64) -> usize {
        self.poll_timers_at(queue_drops, Instant::now())
    }

    /// Retire every frame that is complete or has timed out. Returns how many
    /// frames were retired.
    pub fn poll_timers_at(&mut self, queue_drops: u64, now: Instant) -> usize {
        let mut expired = std::mem::take(&mut self.expired);
        expired.clear();

        for (&frame_id, entry) in &self.frames {
            let r = &entry.reassembler;
            if r.received_packets() == r.expected_packets() {
                expired.push((frame_id, RetireReason::Completed));
            } else if now.saturating_duration_since(entry.first_packet_time)
                > self.config.max_frame_lifetime
            {
                expired.push((frame_id, RetireReason::LifetimeExpired));
            } else if now.saturating_duration_since(entry.last_update)
                > self.config.frame_idle_timeout
            {
                expired.push((frame_id, RetireReason::IdleTimeout));
            }
        }

        let retired = expired.len();
        for &(frame_id, reason) in &expired {
            if let Some(entry) = self.frames.remove(&frame_id) {
                self.retire(entry, reason, queue_drops);
            }
        }
        self.expired = expired;
        retired
    }

    /// Retire every remaining frame. Used once at shutdown.
    pub fn force_emit_all(&mut self, queue_drops: u64) -> usize {
        let frames = std::mem::take(&mut self.frames);
        let drained = frames.len();
        for entry in frames.into_values() {
            self.retire(entry, RetireReason::Shutdown, queue_drops);
        }
        if drained > 0 {
            debug!(drained, "drained in-flight frames");
        }
        drained
    }

    /// Retire the frame with the earliest first packet and remember its id, so
    /// its stragglers are rejected instead of starting a second copy.
    fn evict_oldest(&mut self, limit: usize, queue_drops: u64) {
        let oldest = self
            .frames
            .iter()
            .min_by_key(|(_, e)| e.first_packet_time)
            .map(|(&id, _)| id);
        let Some(frame_id) = oldest else {
            return;
        };
        if let Some(entry) = self.frames.remove(&frame_id) {
            self.counters.frames_evicted += 1;
            if self.evicted.len() >= limit {
                self.evicted.pop_front();
            }
            self.evicted.push_back(frame_id);
            self.retire(entry, RetireReason::Evicted, queue_drops);
        }
    }

    fn take_reassembler(&mut self) -> FrameReassembler {
        self.pool.pop().unwrap_or_else(|| {
            FrameReassembler::new(self.config.max_frame_size, self.config.payload_stride)
        })
    }

    /// Emit the frame, then return its buffer to the pool.
    fn retire(&mut self, entry: FrameEntry, reason: RetireReason, queue_drops: u64) {
        let mut reassembler = entry.reassembler;
        let state = if reassembler.is_frame_complete() {
            FrameState::Complete
        } else {
            FrameState::Partial
        };

        let mut result = reassembler.make_result(state);
        result.queue_pressure = queue_drops > entry.queue_drop_at_start;

        self.counters.frames_emitted += 1;
        match state {
            FrameState::Complete => self.counters.frames_complete += 1,
            FrameState::Partial => self.counters.frames_partial += 1,
        }

        if state == FrameState::Partial && self.observer.traces_missing() {
            for packet_id in reassembler.missing_packets() {
                self.observer.on_event(&ReassemblyEvent::PacketMissing {
                    frame_id: result.frame_id,
                    packet_id,
                    packet_count: result.expected_packets,
                });
            }
        }
        self.observer.on_event(&ReassemblyEvent::FrameRetired {
            frame_id: result.frame_id,
            state,
            reason,
            received: result.received_packets,
            expected: result.expected_packets,
            frame_size: result.frame_size,
            queue_pressure: result.queue_pressure,
            gap_hints: reassembler.gap_hints(),
        });
        self.sink.frame_done(&result);

        if self.pool.len() < self.config.buffer_pool_size {
            reassembler.reset();
            self.pool.push(reassembler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;
    use crate::result::OwnedFrame;
    use bytes::Bytes;
    use framelink_protocol::PacketHeader;
    use std::time::Duration;

    #[derive(Default)]
    struct Collect(Vec<OwnedFrame>);

    impl FrameSink for Collect {
        fn frame_done(&mut self, result: &FrameResult<'_>) {
            self.0.push(result.to_owned_frame());
        }
    }

    fn config() -> ReassemblyConfig {
        ReassemblyConfig {
            max_frame_size: 4000,
            payload_stride: 1000,
            max_payload_size: 1000,
            ..Default::default()
        }
    }

    fn manager(config: ReassemblyConfig) -> (FrameManager<Collect>, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::with_missing());
        let m = FrameManager::new(config, Collect::default(), observer.clone()).unwrap();
        (m, observer)
    }

    fn packet(frame_id: u32, packet_id: u16, packet_count: u16, size: usize) -> RxPacket {
        let header = PacketHeader {
            frame_id,
            packet_id,
            packet_count,
            payload_size: size as u32,
        };
        RxPacket::new(header, Bytes::from(vec![packet_id as u8 + 1; size])).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let bad = ReassemblyConfig {
            payload_stride: 10,
            ..config()
        };
        let err = FrameManager::new(bad, Collect::default(), Arc::new(RecordingObserver::new()))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::StrideTooSmall { .. }));
    }

    #[test]
    fn complete_frame_retires_on_next_sweep() {
        let (mut m, observer) = manager(config());
        let t0 = Instant::now();
        for pid in [2u16, 0, 1] {
            m.push_packet_at(packet(5, pid, 3, 1000), 0, t0);
        }
        assert_eq!(m.len(), 1);

        assert_eq!(m.poll_timers_at(0, t0), 1);
        assert!(m.is_empty());

        let frames = &m.sink().0;
        assert_eq!(frames.len(), 1);
        let f = &frames[0];
        assert_eq!(f.state, FrameState::Complete);
        assert!(f.complete);
        assert!(!f.corrupted);
        assert!(!f.queue_pressure);
        assert_eq!(f.data.len(), 3000);
        assert_eq!(
            observer.retirements(),
            vec![(5, FrameState::Complete, RetireReason::Completed)]
        );
    }

    #[test]
    fn idle_frame_retires_partial() {
        let (mut m, observer) = manager(config());
        let t0 = Instant::now();
        for pid in [0u16, 1, 3] {
            m.push_packet_at(packet(1, pid, 4, 1000), 0, t0);
        }

        assert_eq!(m.poll_timers_at(0, t0 + Duration::from_millis(10)), 0);
        assert_eq!(m.poll_timers_at(0, t0 + Duration::from_millis(31)), 1);

        let f = &m.sink().0[0];
        assert_eq!(f.state, FrameState::Partial);
        assert_eq!(f.received_packets, 3);
        assert_eq!(f.expected_packets, 4);
        assert!(f.corrupted);
        assert!(!f.complete);
        assert_eq!(f.data.len(), 4000);

        let missing: Vec<_> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ReassemblyEvent::PacketMissing { packet_id, .. } => Some(packet_id),
                _ => None,
            })
            .collect();
        assert_eq!(missing, vec![2]);
        assert_eq!(
            observer.retirements(),
            vec![(1, FrameState::Partial, RetireReason::IdleTimeout)]
        );
    }

    #[test]
    fn queue_pressure_only_after_frame_start() {
        let (mut m, _) = manager(config());
        let t0 = Instant::now();
        m.push_packet_at(packet(1, 0, 2, 10), 5, t0);
        m.push_packet_at(packet(2, 0, 2, 10), 5, t0);
        m.push_packet_at(packet(3, 0, 2, 10), 7, t0);

        m.poll_timers_at(7, t0 + Duration::from_millis(100));
        let pressure: Vec<(u32, bool)> =
            m.sink().0.iter().map(|f| (f.frame_id, f.queue_pressure)).collect();
        assert_eq!(pressure, vec![(1, true), (2, true), (3, false)]);

        let (mut m, _) = manager(config());
        m.push_packet_at(packet(9, 0, 2, 10), 4, t0);
        m.poll_timers_at(4, t0 + Duration::from_millis(100));
        assert!(!m.sink().0[0].queue_pressure);
    }

    #[test]
    fn lifetime_cap_retires_slow_frame() {
        let cfg = ReassemblyConfig {
            frame_idle_timeout: Duration::from_millis(30),
            max_frame_lifetime: Duration::from_millis(100),
            ..config()
        };
        let (mut m, observer) = manager(cfg);
        let t0 = Instant::now();
        // Trickle packets often enough to never go idle.
        for step in 0..4u16 {
            let now = t0 + Duration::from_millis(25 * u64::from(step));
            m.push_packet_at(packet(1, step, 10, 10), 0, now);
            assert_eq!(m.poll_timers_at(0, now), 0);
        }
        m.push_packet_at(packet(1, 4, 10, 10), 0, t0 + Duration::from_millis(95));
        assert_eq!(m.poll_timers_at(0, t0 + Duration::from_millis(101)), 1);
        assert_eq!(
            observer.retirements(),
            vec![(1, FrameState::Partial, RetireReason::LifetimeExpired)]
        );
    }

    #[test]
    fn frame_with_no_accepted_packets_retires_partial() {
        let (mut m, _) = manager(config());
        let t0 = Instant::now();
        let outcome = m.push_packet_at(packet(1, 7, 2, 10), 0, t0);
        assert_eq!(outcome, PushOutcome::Rejected(RejectReason::OutOfRange));
        assert_eq!(m.len(), 1);

        m.poll_timers_at(0, t0 + Duration::from_secs(9));
        let f = &m.sink().0[0];
        assert_eq!(f.state, FrameState::Partial);
        assert_eq!(f.received_packets, 0);
        assert_eq!(f.data.len(), 0);
    }

    #[test]
    fn rejected_packet_does_not_refresh_idle_timer() {
        let (mut m, _) = manager(config());
        let t0 = Instant::now();
        m.push_packet_at(packet(1, 0, 3, 10), 0, t0);
        m.push_packet_at(packet(1, 0, 3, 10), 0, t0 + Duration::from_millis(25));
        assert_eq!(m.poll_timers_at(0, t0 + Duration::from_millis(31)), 1);
        assert_eq!(m.counters().packets_rejected, 1);
    }

    #[test]
    fn all_packets_with_corruption_retires_partial() {
        let (mut m, observer) = manager(config());
        let t0 = Instant::now();
        m.push_packet_at(packet(1, 0, 2, 10), 0, t0);
        m.push_packet_at(packet(1, 9, 2, 10), 0, t0);
        m.push_packet_at(packet(1, 1, 2, 10), 0, t0);
        m.poll_timers_at(0, t0);

        let f = &m.sink().0[0];
        assert_eq!(f.state, FrameState::Partial);
        assert!(f.complete);
        assert!(f.corrupted);
        assert_eq!(observer.rejections(RejectReason::OutOfRange), 1);
    }

    #[test]
    fn evicts_oldest_when_capped() {
        let cfg = ReassemblyConfig {
            max_in_flight_frames: Some(2),
            ..config()
        };
        let (mut m, observer) = manager(cfg);
        let t0 = Instant::now();
        m.push_packet_at(packet(10, 0, 2, 10), 0, t0);
        m.push_packet_at(packet(11, 0, 2, 10), 0, t0 + Duration::from_millis(1));
        m.push_packet_at(packet(12, 0, 2, 10), 0, t0 + Duration::from_millis(2));

        assert_eq!(m.len(), 2);
        assert!(!m.contains_frame(10));
        assert_eq!(m.counters().frames_evicted, 1);
        assert_eq!(
            observer.retirements(),
            vec![(10, FrameState::Partial, RetireReason::Evicted)]
        );
    }

    #[test]
    fn late_packet_for_evicted_frame_is_rejected() {
        let cfg = ReassemblyConfig {
            max_in_flight_frames: Some(32),
            ..config()
        };
        let (mut m, observer) = manager(cfg);
        let t0 = Instant::now();
        for frame_id in 0..33u32 {
            let now = t0 + Duration::from_micros(20 * u64::from(frame_id));
            m.push_packet_at(packet(frame_id, 0, 2, 10), 0, now);
        }
        assert!(!m.contains_frame(0));

        let late = m.push_packet_at(packet(0, 1, 2, 10), 0, t0 + Duration::from_millis(1));
        assert_eq!(late, PushOutcome::Rejected(RejectReason::Evicted));
        assert!(!m.contains_frame(0));
        assert!(m.contains_frame(1));
        assert_eq!(m.len(), 32);

        // Frame 0 went out once; nobody else was pushed out by its straggler.
        assert_eq!(
            observer.retirements(),
            vec![(0, FrameState::Partial, RetireReason::Evicted)]
        );
        assert_eq!(m.sink().0.len(), 1);
        assert_eq!(m.counters().frames_started, 33);
        assert_eq!(observer.rejections(RejectReason::Evicted), 1);
    }

    #[test]
    fn uncapped_by_default_keeps_every_frame_until_its_timer() {
        let (mut m, observer) = manager(config());
        let t0 = Instant::now();
        for frame_id in 0..100u32 {
            let now = t0 + Duration::from_micros(20 * u64::from(frame_id));
            m.push_packet_at(packet(frame_id, 0, 2, 10), 0, now);
        }
        assert_eq!(m.len(), 100);

        let late = m.push_packet_at(packet(0, 1, 2, 10), 0, t0 + Duration::from_millis(3));
        assert_eq!(late, PushOutcome::Accepted);
        assert_eq!(m.poll_timers_at(0, t0 + Duration::from_millis(3)), 1);

        let f = &m.sink().0[0];
        assert_eq!((f.frame_id, f.state), (0, FrameState::Complete));
        assert_eq!(m.counters().frames_evicted, 0);
        assert!(observer.retirements().iter().all(|&(_, _, r)| r != RetireReason::Evicted));
    }

    #[test]
    fn retire_event_reports_gap_hints() {
        let (mut m, observer) = manager(config());
        let t0 = Instant::now();
        m.push_packet_at(packet(4, 1, 2, 10).with_gap_before(true), 0, t0);
        m.push_packet_at(packet(4, 0, 2, 10).with_gap_before(true), 0, t0);
        m.poll_timers_at(0, t0);

        let hints: Vec<u32> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ReassemblyEvent::FrameRetired { gap_hints, .. } => Some(gap_hints),
                _ => None,
            })
            .collect();
        assert_eq!(hints, vec![2]);
    }

    #[test]
    fn force_emit_all_drains_everything() {
        let (mut m, observer) = manager(config());
        let t0 = Instant::now();
        m.push_packet_at(packet(1, 0, 1, 10), 0, t0);
        m.push_packet_at(packet(2, 0, 2, 10), 0, t0);

        assert_eq!(m.force_emit_all(0), 2);
        assert!(m.is_empty());
        let states: Vec<_> = m.sink().0.iter().map(|f| (f.frame_id, f.state)).collect();
        assert_eq!(
            states,
            vec![(1, FrameState::Complete), (2, FrameState::Partial)]
        );
        assert!(observer
            .retirements()
            .iter()
            .all(|&(_, _, reason)| reason == RetireReason::Shutdown));

        let c = m.counters();
        assert_eq!(c.frames_emitted, 2);
        assert_eq!(c.frames_complete, 1);
        assert_eq!(c.frames_partial, 1);
    }

    #[test]
    fn recycled_buffer_starts_clean() {
        let cfg = ReassemblyConfig {
            buffer_pool_size: 1,
            ..config()
        };
        let (mut m, _) = manager(cfg);
        let t0 = Instant::now();
        m.push_packet_at(packet(1, 0, 2, 1000), 0, t0);
        m.push_packet_at(packet(1, 1, 2, 1000), 0, t0);
        m.poll_timers_at(0, t0);

        m.push_packet_at(packet(2, 1, 2, 1000), 0, t0);
        m.force_emit_all(0);

        let f = &m.sink().0[1];
        assert_eq!(f.frame_id, 2);
        assert!(f.data[..1000].iter().all(|&b| b == 0));
        assert!(f.data[1000..].iter().all(|&b| b == 2));
    }

    #[test]
    fn closure_sink() {
        let mut seen = Vec::new();
        {
            let sink = |r: &FrameResult<'_>| seen.push(r.frame_id);
            let mut m =
                FrameManager::new(config(), sink, Arc::new(RecordingObserver::new())).unwrap();
            m.push_packet(packet(3, 0, 1, 10), 0);
            m.poll_timers(0);
        }
        assert_eq!(seen, vec![3]);
    }
}
