use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use framelink_protocol::PacketHeader;
use framelink_reassembly::{PacketQueue, PacketTraceRing, RxPacket};
use serde::Serialize;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, trace};

/// Larger than any datagram the sender emits; oversized ones are truncated
/// by the kernel and then fail the length check.
const MAX_UDP_PACKET_SIZE: usize = 2048;

/// Upper bound on one receive wait, so the shutdown flag is seen promptly.
const RECV_POLL: Duration = Duration::from_millis(100);

/// Producer-side totals.
#[derive(Debug, Default)]
pub struct RxCounters {
    packets: AtomicU64,
    bytes: AtomicU64,
    malformed: AtomicU64,
    gap_hints: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RxSnapshot {
    pub packets: u64,
    pub bytes: u64,
    pub malformed: u64,
    pub gap_hints: u64,
}

impl RxCounters {
    pub fn snapshot(&self) -> RxSnapshot {
        RxSnapshot {
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            gap_hints: self.gap_hints.load(Ordering::Relaxed),
        }
    }
}

/// Flags packets that do not follow their predecessor in arrival order.
///
/// Only a hint: reordering in the network also trips it.
#[derive(Debug, Default)]
pub struct GapDetector {
    last: Option<(u32, u16)>,
}

impl GapDetector {
    pub fn observe(&mut self, header: &PacketHeader) -> bool {
        let gap = match self.last {
            Some((frame_id, packet_id)) if frame_id == header.frame_id => {
                header.packet_id != packet_id.wrapping_add(1)
            }
            _ => header.packet_id != 0,
        };
        self.last = Some((header.frame_id, header.packet_id));
        gap
    }
}

pub struct UdpProducer {
    pub socket: Arc<UdpSocket>,
    pub queue: Arc<PacketQueue>,
    pub shutdown: Arc<AtomicBool>,
    pub counters: Arc<RxCounters>,
    pub trace: Option<Arc<PacketTraceRing>>,
    /// Datagrams with a larger payload are counted as malformed and dropped.
    pub max_payload: usize,
}

/// Receive datagrams and hand them to the reassembly queue until shutdown.
pub async fn run_udp_loop(producer: UdpProducer) {
    let UdpProducer {
        socket,
        queue,
        shutdown,
        counters,
        trace,
        max_payload,
    } = producer;

    let mut buf = vec![0u8; MAX_UDP_PACKET_SIZE];
    let mut gaps = GapDetector::default();

    while !shutdown.load(Ordering::Acquire) {
        let (len, src_addr) = match tokio::time::timeout(RECV_POLL, socket.recv_from(&mut buf)).await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("UDP recv error: {}", e);
                continue;
            }
            Err(_) => continue,
        };

        let data = &buf[..len];
        let packet = match RxPacket::from_datagram(data, max_payload) {
            Ok(p) => p,
            Err(e) => {
                counters.malformed.fetch_add(1, Ordering::Relaxed);
                debug!(src = %src_addr, len, "dropping datagram: {}", e);
                continue;
            }
        };

        counters.packets.fetch_add(1, Ordering::Relaxed);
        counters.bytes.fetch_add(len as u64, Ordering::Relaxed);

        let gap = gaps.observe(packet.header());
        if gap {
            counters.gap_hints.fetch_add(1, Ordering::Relaxed);
            trace!(
                frame_id = packet.frame_id(),
                packet_id = packet.header().packet_id,
                "out-of-sequence packet"
            );
        }
        if let Some(ring) = &trace {
            ring.record_received(packet.header(), gap);
        }

        // A full queue counts the drop itself.
        queue.push(packet.with_gap_before(gap));
    }

    let s = counters.snapshot();
    info!(
        packets = s.packets,
        bytes = s.bytes,
        malformed = s.malformed,
        queue_drops = queue.dropped(),
        "UDP receive loop exiting"
    );
}
