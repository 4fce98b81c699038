use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::packet::RxPacket;

/// How often a blocking `pop` re-checks the shutdown flag when nobody wakes it.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Bounded FIFO between the network producer and the reassembly consumer.
///
/// `push` never blocks: when the queue is full the newest packet is dropped
/// and counted. The drop counter only grows and is the backpressure signal
/// the frame manager uses to flag `queue_pressure` on frames.
pub struct PacketQueue {
    capacity: usize,
    packets: Mutex<VecDeque<RxPacket>>,
    available: Condvar,
    dropped: AtomicU64,
}

impl PacketQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            packets: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            available: Condvar::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RxPacket>> {
        self.packets.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Enqueue a packet. Returns false (and counts a drop) if the queue is full.
    pub fn push(&self, packet: RxPacket) -> bool {
        {
            let mut packets = self.lock();
            if packets.len() >= self.capacity {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            packets.push_back(packet);
        }
        self.available.notify_one();
        true
    }

    pub fn try_pop(&self) -> Option<RxPacket> {
        self.lock().pop_front()
    }

    /// Block until a packet is available or `shutdown` is set.
    ///
    /// Returns `None` only when shutdown was requested and the queue is empty;
    /// queued packets are still handed out after shutdown so they can drain.
    pub fn pop(&self, shutdown: &AtomicBool) -> Option<RxPacket> {
        let mut packets = self.lock();
        loop {
            if let Some(packet) = packets.pop_front() {
                return Some(packet);
            }
            if shutdown.load(Ordering::Acquire) {
                return None;
            }
            packets = self
                .available
                .wait_timeout(packets, SHUTDOWN_POLL)
                .unwrap_or_else(|p| p.into_inner())
                .0;
        }
    }

    /// Wait at most `timeout` for a packet.
    ///
    /// Returns `None` on timeout, or immediately when shutdown is set and the
    /// queue is empty.
    pub fn pop_until(&self, timeout: Duration, shutdown: &AtomicBool) -> Option<RxPacket> {
        let deadline = Instant::now() + timeout;
        let mut packets = self.lock();
        loop {
            if let Some(packet) = packets.pop_front() {
                return Some(packet);
            }
            if shutdown.load(Ordering::Acquire) {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            packets = self
                .available
                .wait_timeout(packets, deadline - now)
                .unwrap_or_else(|p| p.into_inner())
                .0;
        }
    }

    /// Wake every waiting consumer, e.g. right after setting the shutdown flag.
    pub fn wake_all(&self) {
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Packets rejected because the queue was full, since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
