use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use framelink_protocol::{fragment_frame, FramePacket, MAX_UDP_PAYLOAD};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, warn};

const RETRY_BACKOFF: Duration = Duration::from_millis(1);

/// Linux ENOBUFS: the socket send queue is momentarily full.
const ENOBUFS: i32 = 105;

#[derive(Debug, Clone, Copy)]
pub struct SendOptions {
    /// Spacing between datagrams; zero sends as fast as the socket allows.
    pub packet_gap: Duration,
    /// Attempts per datagram after the first on a transient error.
    pub max_retries: u32,
    /// Fraction of packets deliberately not sent, for loss testing.
    pub drop_rate: f64,
    /// Send each frame's packets in random order.
    pub shuffle: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            packet_gap: Duration::ZERO,
            max_retries: 5,
            drop_rate: 0.0,
            shuffle: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSendReport {
    pub frame_id: u32,
    pub packets: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes: usize,
}

/// Packets to put on the wire, after simulated loss and reordering.
pub fn plan_packets<R: Rng>(
    mut packets: Vec<FramePacket>,
    options: &SendOptions,
    rng: &mut R,
) -> Vec<FramePacket> {
    if options.drop_rate > 0.0 {
        let rate = options.drop_rate.min(1.0);
        packets.retain(|_| !rng.gen_bool(rate));
    }
    if options.shuffle {
        packets.shuffle(rng);
    }
    packets
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) || e.raw_os_error() == Some(ENOBUFS)
}

pub struct FrameSender<R> {
    socket: UdpSocket,
    target: SocketAddr,
    options: SendOptions,
    rng: R,
    next_frame_id: u32,
}

impl<R: Rng> FrameSender<R> {
    pub fn new(socket: UdpSocket, target: SocketAddr, options: SendOptions, rng: R) -> Self {
        Self {
            socket,
            target,
            options,
            rng,
            next_frame_id: 1,
        }
    }

    /// Fragment one encoded frame and send its packets.
    pub async fn send_frame(&mut self, frame: &Bytes) -> Result<FrameSendReport> {
        let frame_id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1);

        let packets = fragment_frame(frame_id, frame, MAX_UDP_PAYLOAD)
            .with_context(|| format!("cannot fragment frame {}", frame_id))?;
        let total = packets.len();
        let planned = plan_packets(packets, &self.options, &mut self.rng);

        let mut report = FrameSendReport {
            frame_id,
            packets: total,
            skipped: total - planned.len(),
            ..Default::default()
        };

        let start = Instant::now();
        for (i, packet) in planned.iter().enumerate() {
            if !self.options.packet_gap.is_zero() && i > 0 {
                tokio::time::sleep_until(start + self.options.packet_gap * i as u32).await;
            }
            let datagram = packet.to_bytes();
            match self.send_with_retry(&datagram).await {
                Ok(n) => {
                    report.sent += 1;
                    report.bytes += n;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        frame_id,
                        packet_id = packet.header.packet_id,
                        "send failed: {}",
                        e
                    );
                }
            }
        }

        debug!(
            frame_id,
            packets = total,
            sent = report.sent,
            skipped = report.skipped,
            "frame sent"
        );
        Ok(report)
    }

    async fn send_with_retry(&self, datagram: &[u8]) -> io::Result<usize> {
        let mut attempt = 0;
        loop {
            match self.socket.send_to(datagram, self.target).await {
                Ok(n) => return Ok(n),
                Err(e) if is_transient(&e) && attempt < self.options.max_retries => {
                    attempt += 1;
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn packets(n: usize) -> Vec<FramePacket> {
        let frame = Bytes::from(vec![0u8; n * MAX_UDP_PAYLOAD]);
        fragment_frame(1, &frame, MAX_UDP_PAYLOAD).unwrap()
    }

    fn ids(packets: &[FramePacket]) -> Vec<u16> {
        packets.iter().map(|p| p.header.packet_id).collect()
    }

    #[test]
    fn plan_keeps_order_by_default() {
        let mut rng = StdRng::seed_from_u64(1);
        let planned = plan_packets(packets(5), &SendOptions::default(), &mut rng);
        assert_eq!(ids(&planned), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn shuffle_keeps_every_packet() {
        let mut rng = StdRng::seed_from_u64(7);
        let options = SendOptions {
            shuffle: true,
            ..Default::default()
        };
        let mut planned = ids(&plan_packets(packets(50), &options, &mut rng));
        planned.sort_unstable();
        assert_eq!(planned, (0..50).collect::<Vec<u16>>());
    }

    #[test]
    fn full_drop_rate_sends_nothing() {
        let mut rng = StdRng::seed_from_u64(3);
        let options = SendOptions {
            drop_rate: 1.0,
            ..Default::default()
        };
        assert!(plan_packets(packets(10), &options, &mut rng).is_empty());
    }

    #[test]
    fn transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_transient(&io::Error::from_raw_os_error(ENOBUFS)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[tokio::test]
    async fn sends_every_packet_with_increasing_frame_ids() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut sender = FrameSender::new(
            socket,
            target,
            SendOptions::default(),
            StdRng::seed_from_u64(0),
        );

        let frame = Bytes::from(vec![5u8; 2 * MAX_UDP_PAYLOAD + 10]);
        let first = sender.send_frame(&frame).await.unwrap();
        assert_eq!(first.frame_id, 1);
        assert_eq!(first.packets, 3);
        assert_eq!(first.sent, 3);
        assert_eq!(first.skipped, 0);

        let mut buf = [0u8; 2048];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        let packet = FramePacket::from_bytes(&buf[..len]).unwrap();
        assert_eq!(packet.header.frame_id, 1);
        assert_eq!(packet.header.packet_count, 3);

        let second = sender.send_frame(&frame).await.unwrap();
        assert_eq!(second.frame_id, 2);
    }
}
