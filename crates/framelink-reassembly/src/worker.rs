use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use tracing::info;

use crate::manager::{FrameManager, FrameSink};
use crate::queue::PacketQueue;

/// Consumer loop of the reassembly thread.
///
/// Pops packets into `manager` and runs the timer sweep every
/// `sweep_interval`, even when no packets arrive. Once `shutdown` is set the
/// loop keeps draining until the queue has stayed empty for `shutdown_grace`,
/// then retires every remaining frame. Returns the number of frames drained
/// at shutdown.
pub fn run_reassembly_worker<S: FrameSink>(
    queue: &PacketQueue,
    manager: &mut FrameManager<S>,
    shutdown: &AtomicBool,
) -> usize {
    let config = *manager.config();
    let mut last_sweep = Instant::now();
    let mut empty_since: Option<Instant> = None;

    loop {
        match queue.pop_until(config.pop_timeout, shutdown) {
            Some(packet) => {
                manager.push_packet(packet, queue.dropped());
                empty_since = None;
            }
            None if shutdown.load(Ordering::Acquire) => {
                let since = *empty_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= config.shutdown_grace {
                    break;
                }
                // pop_until returns at once after shutdown; don't spin.
                thread::sleep(config.pop_timeout);
            }
            None => {}
        }

        if last_sweep.elapsed() >= config.sweep_interval {
            manager.poll_timers(queue.dropped());
            last_sweep = Instant::now();
        }
    }

    let drained = manager.force_emit_all(queue.dropped());
    let counters = manager.counters();
    info!(
        drained,
        frames = counters.frames_emitted,
        complete = counters.frames_complete,
        partial = counters.frames_partial,
        queue_drops = queue.dropped(),
        "reassembly worker stopped"
    );
    drained
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReassemblyConfig;
    use crate::observer::{RecordingObserver, RetireReason};
    use crate::packet::RxPacket;
    use crate::result::{FrameResult, FrameState};
    use bytes::Bytes;
    use framelink_protocol::PacketHeader;
    use std::sync::Arc;
    use std::time::Duration;

    fn packet(frame_id: u32, packet_id: u16, packet_count: u16) -> RxPacket {
        let header = PacketHeader {
            frame_id,
            packet_id,
            packet_count,
            payload_size: 4,
        };
        RxPacket::new(header, Bytes::from_static(b"abcd")).unwrap()
    }

    #[test]
    fn drains_queue_and_partial_frames_on_shutdown() {
        let config = ReassemblyConfig {
            max_frame_size: 64 * 1024,
            payload_stride: 1024,
            max_payload_size: 1024,
            frame_idle_timeout: Duration::from_secs(5),
            max_frame_lifetime: Duration::from_secs(10),
            shutdown_grace: Duration::from_millis(20),
            ..Default::default()
        };
        let queue = PacketQueue::new(64);
        for pid in 0..3 {
            queue.push(packet(1, pid, 3));
        }
        queue.push(packet(2, 0, 2));

        let mut results = Vec::new();
        let sink = |r: &FrameResult<'_>| results.push((r.frame_id, r.state));
        let mut manager =
            FrameManager::new(config, sink, Arc::new(RecordingObserver::new())).unwrap();

        let shutdown = AtomicBool::new(true);
        let drained = run_reassembly_worker(&queue, &mut manager, &shutdown);
        drop(manager);

        assert!(queue.is_empty());
        assert!((1..=2).contains(&drained));
        results.sort_by_key(|&(id, _)| id);
        assert_eq!(
            results,
            vec![(1, FrameState::Complete), (2, FrameState::Partial)]
        );
    }

    #[test]
    fn sweeps_without_new_packets() {
        let config = ReassemblyConfig {
            frame_idle_timeout: Duration::from_millis(10),
            shutdown_grace: Duration::from_millis(10),
            ..Default::default()
        };
        let queue = Arc::new(PacketQueue::new(16));
        let shutdown = Arc::new(AtomicBool::new(false));
        let observer = Arc::new(RecordingObserver::new());
        queue.push(packet(7, 0, 2));

        let worker = {
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            let observer = observer.clone();
            thread::spawn(move || {
                let mut manager =
                    FrameManager::new(config, |_: &FrameResult<'_>| {}, observer).unwrap();
                run_reassembly_worker(&queue, &mut manager, &shutdown)
            })
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while observer.retirements().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        shutdown.store(true, Ordering::Release);
        queue.wake_all();
        let drained = worker.join().unwrap();

        assert_eq!(drained, 0);
        assert_eq!(
            observer.retirements(),
            vec![(7, FrameState::Partial, RetireReason::IdleTimeout)]
        );
    }
}
