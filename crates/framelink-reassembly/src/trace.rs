//! Fixed-size ring of recent packet events for post-mortem loss analysis.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use framelink_protocol::PacketHeader;

use crate::observer::{ReassemblyEvent, ReassemblyObserver};

pub const DEFAULT_TRACE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    /// Seen by the network producer.
    Received,
    /// Copied into a frame buffer.
    Accepted,
    /// Absent when its frame retired.
    Missing,
}

impl TraceKind {
    fn tag(self) -> &'static str {
        match self {
            Self::Received => "RX",
            Self::Accepted => "OK",
            Self::Missing => "MISS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    pub seq: u64,
    pub kind: TraceKind,
    pub frame_id: u32,
    pub packet_id: u16,
    pub packet_count: u16,
    pub payload_size: u32,
    pub gap: bool,
}

/// Keeps the last `capacity` entries; older ones are overwritten.
///
/// Shared between the producer task (`record_received`) and the reassembly
/// thread (as an observer), so writes go through a mutex.
pub struct PacketTraceRing {
    capacity: usize,
    next_seq: AtomicU64,
    slots: Mutex<Vec<Option<TraceEntry>>>,
}

impl PacketTraceRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            next_seq: AtomicU64::new(0),
            slots: Mutex::new(vec![None; capacity]),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries recorded since creation, including overwritten ones.
    pub fn recorded(&self) -> u64 {
        self.next_seq.load(Ordering::Relaxed)
    }

    pub fn record(
        &self,
        kind: TraceKind,
        frame_id: u32,
        packet_id: u16,
        packet_count: u16,
        payload_size: u32,
        gap: bool,
    ) {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        slots[(seq % self.capacity as u64) as usize] = Some(TraceEntry {
            seq,
            kind,
            frame_id,
            packet_id,
            packet_count,
            payload_size,
            gap,
        });
    }

    pub fn record_received(&self, header: &PacketHeader, gap: bool) {
        self.record(
            TraceKind::Received,
            header.frame_id,
            header.packet_id,
            header.packet_count,
            header.payload_size,
            gap,
        );
    }

    /// Retained entries, oldest first.
    pub fn snapshot(&self) -> Vec<TraceEntry> {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        let mut entries: Vec<TraceEntry> = slots.iter().flatten().copied().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    pub fn write_to(&self, mut out: impl Write) -> io::Result<()> {
        writeln!(out, "# seq kind frame_id packet_id/packet_count payload gap")?;
        for e in self.snapshot() {
            writeln!(
                out,
                "{} {} {} {}/{} {} {}",
                e.seq,
                e.kind.tag(),
                e.frame_id,
                e.packet_id,
                e.packet_count,
                e.payload_size,
                if e.gap { "GAP" } else { "-" }
            )?;
        }
        Ok(())
    }

    pub fn dump(&self, path: &Path) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out)?;
        out.flush()
    }
}

impl Default for PacketTraceRing {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY)
    }
}

impl ReassemblyObserver for PacketTraceRing {
    fn on_event(&self, event: &ReassemblyEvent) {
        match *event {
            ReassemblyEvent::PacketAccepted {
                frame_id,
                packet_id,
                packet_count,
                payload_size,
                gap_hint,
            } => self.record(
                TraceKind::Accepted,
                frame_id,
                packet_id,
                packet_count,
                payload_size,
                gap_hint,
            ),
            ReassemblyEvent::PacketMissing {
                frame_id,
                packet_id,
                packet_count,
            } => self.record(TraceKind::Missing, frame_id, packet_id, packet_count, 0, false),
            _ => {}
        }
    }

    fn traces_missing(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(packet_id: u16) -> PacketHeader {
        PacketHeader {
            frame_id: 1,
            packet_id,
            packet_count: 10,
            payload_size: 100,
        }
    }

    #[test]
    fn keeps_only_latest_entries() {
        let ring = PacketTraceRing::new(4);
        for pid in 0..6 {
            ring.record_received(&header(pid), false);
        }
        let entries = ring.snapshot();
        assert_eq!(ring.recorded(), 6);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].seq, 2);
        assert_eq!(entries[3].packet_id, 5);
    }

    #[test]
    fn records_observer_events() {
        let ring = PacketTraceRing::new(16);
        ring.on_event(&ReassemblyEvent::PacketMissing {
            frame_id: 4,
            packet_id: 2,
            packet_count: 3,
        });
        ring.on_event(&ReassemblyEvent::FrameStarted {
            frame_id: 4,
            packet_count: 3,
            queue_drops: 0,
        });
        let entries = ring.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, TraceKind::Missing);
        assert!(ring.traces_missing());
    }

    #[test]
    fn text_dump_format() {
        let ring = PacketTraceRing::new(8);
        ring.record_received(&header(3), true);
        let mut out = Vec::new();
        ring.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "0 RX 1 3/10 100 GAP");
    }
}
