use framelink_protocol::PacketHeader;

use crate::observer::RejectReason;
use crate::result::{FrameResult, FrameState};

/// Stored lifecycle of a [`FrameReassembler`].
///
/// "Complete" is not a phase; it is derived from the counters by
/// [`FrameReassembler::is_frame_complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyPhase {
    Empty,
    Receiving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    Rejected(RejectReason),
}

impl PushOutcome {
    pub fn is_accepted(self) -> bool {
        self == PushOutcome::Accepted
    }
}

/// Reassembles one frame at a time into a buffer reused across frames.
///
/// Packet `i` is copied to offset `i * payload_stride`, so arrival order
/// never changes the final buffer. The buffer is allocated once at
/// `max_frame_size` and never grows.
pub struct FrameReassembler {
    max_frame_size: usize,
    payload_stride: usize,
    buffer: Vec<u8>,
    /// Bytes written since the buffer was last zeroed.
    dirty_len: usize,

    phase: AssemblyPhase,
    frame_id: u32,
    expected_packets: u16,
    received_packets: u16,
    frame_size: usize,
    present: Vec<bool>,
    slot_corrupted: Vec<bool>,
    corrupted: bool,
    gap_hints: u32,
}

impl FrameReassembler {
    pub fn new(max_frame_size: usize, payload_stride: usize) -> Self {
        Self {
            max_frame_size,
            payload_stride,
            buffer: vec![0; max_frame_size],
            dirty_len: 0,
            phase: AssemblyPhase::Empty,
            frame_id: 0,
            expected_packets: 0,
            received_packets: 0,
            frame_size: 0,
            present: Vec::new(),
            slot_corrupted: Vec::new(),
            corrupted: false,
            gap_hints: 0,
        }
    }

    /// Back to [`AssemblyPhase::Empty`]. Buffer contents are left alone until
    /// the next [`start_new_frame`](Self::start_new_frame).
    pub fn reset(&mut self) {
        self.phase = AssemblyPhase::Empty;
        self.frame_id = 0;
        self.expected_packets = 0;
        self.received_packets = 0;
        self.frame_size = 0;
        self.present.clear();
        self.slot_corrupted.clear();
        self.corrupted = false;
        self.gap_hints = 0;
    }

    pub fn start_new_frame(&mut self, frame_id: u32, packet_count: u16) {
        // Unreceived regions of a partial frame must not show the previous frame.
        self.buffer[..self.dirty_len].fill(0);
        self.dirty_len = 0;

        self.phase = AssemblyPhase::Receiving;
        self.frame_id = frame_id;
        self.expected_packets = packet_count;
        self.received_packets = 0;
        self.frame_size = 0;
        self.present.clear();
        self.present.resize(packet_count as usize, false);
        self.slot_corrupted.clear();
        self.slot_corrupted.resize(packet_count as usize, false);
        self.corrupted = false;
        self.gap_hints = 0;
    }

    /// Copy one packet into the frame buffer.
    ///
    /// `payload.len()` is trusted as the packet's size; `RxPacket` guarantees
    /// it equals `header.payload_size`.
    pub fn push_packet(
        &mut self,
        header: &PacketHeader,
        payload: &[u8],
        gap_hint: bool,
    ) -> PushOutcome {
        if self.phase == AssemblyPhase::Empty {
            return PushOutcome::Rejected(RejectReason::NotStarted);
        }
        if header.frame_id != self.frame_id {
            return PushOutcome::Rejected(RejectReason::WrongFrame);
        }

        let pid = header.packet_id as usize;
        if pid >= self.present.len() {
            self.corrupted = true;
            return PushOutcome::Rejected(RejectReason::OutOfRange);
        }
        if self.present[pid] {
            return PushOutcome::Rejected(RejectReason::Duplicate);
        }
        if payload.len() > self.payload_stride {
            self.mark_corrupted(pid);
            return PushOutcome::Rejected(RejectReason::Oversize);
        }

        let offset = pid * self.payload_stride;
        let end = offset + payload.len();
        if end > self.max_frame_size {
            self.mark_corrupted(pid);
            return PushOutcome::Rejected(RejectReason::Overflow);
        }

        self.buffer[offset..end].copy_from_slice(payload);
        self.present[pid] = true;
        self.received_packets += 1;
        self.frame_size = self.frame_size.max(end);
        self.dirty_len = self.dirty_len.max(end);
        if gap_hint {
            self.gap_hints += 1;
        }
        PushOutcome::Accepted
    }

    fn mark_corrupted(&mut self, pid: usize) {
        self.slot_corrupted[pid] = true;
        self.corrupted = true;
    }

    pub fn phase(&self) -> AssemblyPhase {
        self.phase
    }

    pub fn has_any_packet(&self) -> bool {
        self.received_packets > 0
    }

    pub fn is_frame_complete(&self) -> bool {
        self.phase == AssemblyPhase::Receiving
            && self.received_packets == self.expected_packets
            && !self.corrupted
    }

    pub fn has_gap(&self) -> bool {
        self.received_packets < self.expected_packets
    }

    /// Sticky until the next frame starts.
    pub fn has_corruption(&self) -> bool {
        self.corrupted
    }

    pub fn has_packet(&self, packet_id: u16) -> bool {
        self.present
            .get(packet_id as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn is_slot_corrupted(&self, packet_id: u16) -> bool {
        self.slot_corrupted
            .get(packet_id as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Packet ids not yet received, ascending.
    pub fn missing_packets(&self) -> impl Iterator<Item = u16> + '_ {
        self.present
            .iter()
            .enumerate()
            .filter(|(_, present)| !**present)
            .map(|(id, _)| id as u16)
    }

    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    pub fn expected_packets(&self) -> u16 {
        self.expected_packets
    }

    pub fn received_packets(&self) -> u16 {
        self.received_packets
    }

    /// Accepted packets the producer flagged as arriving after a discontinuity.
    pub fn gap_hints(&self) -> u32 {
        self.gap_hints
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn frame_data(&self) -> &[u8] {
        &self.buffer[..self.frame_size]
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn payload_stride(&self) -> usize {
        self.payload_stride
    }

    /// Snapshot the current frame. `queue_pressure` is left false.
    pub fn make_result(&self, state: FrameState) -> FrameResult<'_> {
        FrameResult {
            frame_id: self.frame_id,
            state,
            complete: self.received_packets == self.expected_packets,
            corrupted: self.has_gap() || self.has_corruption(),
            queue_pressure: false,
            expected_packets: self.expected_packets,
            received_packets: self.received_packets,
            frame_size: self.frame_size,
            frame_data: self.frame_data(),
        }
    }
}

impl std::fmt::Debug for FrameReassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReassembler")
            .field("phase", &self.phase)
            .field("frame_id", &self.frame_id)
            .field("expected_packets", &self.expected_packets)
            .field("received_packets", &self.received_packets)
            .field("frame_size", &self.frame_size)
            .field("corrupted", &self.corrupted)
            .finish_non_exhaustive()
    }
}
