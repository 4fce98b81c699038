use bytes::Bytes;

use crate::error::ProtocolError;

/// Header size: 4 (frame_id) + 2 (packet_id) + 2 (packet_count) + 4 (payload_size) = 12 bytes.
pub const PACKET_HEADER_SIZE: usize = 12;

/// Maximum payload bytes carried by one datagram. Keeps header + payload
/// under a 1500-byte Ethernet MTU with room for IP/UDP headers.
pub const MAX_UDP_PAYLOAD: usize = 1400;

/// Largest datagram the sender emits.
pub const MAX_DATAGRAM_SIZE: usize = PACKET_HEADER_SIZE + MAX_UDP_PAYLOAD;

/// `packet_count` is a u16 on the wire.
pub const MAX_PACKETS_PER_FRAME: usize = u16::MAX as usize;

/// Position of one datagram within one frame.
///
/// Wire format (little-endian, no padding):
/// ```text
/// [frame_id: u32] [packet_id: u16] [packet_count: u16] [payload_size: u32] [payload: payload_size]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub frame_id: u32,
    pub packet_id: u16,
    pub packet_count: u16,
    pub payload_size: u32,
}

impl PacketHeader {
    pub fn to_bytes(&self) -> [u8; PACKET_HEADER_SIZE] {
        let mut out = [0u8; PACKET_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.frame_id.to_le_bytes());
        out[4..6].copy_from_slice(&self.packet_id.to_le_bytes());
        out[6..8].copy_from_slice(&self.packet_count.to_le_bytes());
        out[8..12].copy_from_slice(&self.payload_size.to_le_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::PacketTooShort {
                expected: PACKET_HEADER_SIZE,
                got: data.len(),
            });
        }

        Ok(Self {
            frame_id: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            packet_id: u16::from_le_bytes([data[4], data[5]]),
            packet_count: u16::from_le_bytes([data[6], data[7]]),
            payload_size: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
        })
    }
}

/// Split a raw datagram into its header and the `payload_size` bytes it declares.
///
/// Trailing bytes beyond `payload_size` are ignored. A datagram that carries
/// fewer bytes than declared is rejected.
pub fn split_datagram(data: &[u8]) -> Result<(PacketHeader, &[u8]), ProtocolError> {
    let header = PacketHeader::from_bytes(data)?;
    let available = data.len() - PACKET_HEADER_SIZE;
    let declared = header.payload_size as usize;
    if declared > available {
        return Err(ProtocolError::PayloadTruncated {
            declared: header.payload_size,
            available,
        });
    }
    Ok((header, &data[PACKET_HEADER_SIZE..PACKET_HEADER_SIZE + declared]))
}

/// One datagram's worth of a frame, as produced by the sender.
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl FramePacket {
    /// Serialize to bytes for UDP transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PACKET_HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Deserialize from raw UDP bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        let (header, payload) = split_datagram(data)?;
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

/// Split an encoded frame into datagram-sized packets.
///
/// Packet `i` carries bytes `[i * max_payload, (i + 1) * max_payload)`, so the
/// receiver can place it with `packet_id * payload_stride` when the stride
/// equals `max_payload`. Payloads are zero-copy slices of `frame`.
pub fn fragment_frame(
    frame_id: u32,
    frame: &Bytes,
    max_payload: usize,
) -> Result<Vec<FramePacket>, ProtocolError> {
    if max_payload == 0 {
        return Err(ProtocolError::ZeroPayloadBudget);
    }

    let packet_count = frame.len().div_ceil(max_payload);
    if packet_count > MAX_PACKETS_PER_FRAME {
        return Err(ProtocolError::FrameTooLarge {
            size: frame.len(),
            max_packets: MAX_PACKETS_PER_FRAME,
        });
    }

    Ok((0..packet_count)
        .map(|i| {
            let start = i * max_payload;
            let end = (start + max_payload).min(frame.len());
            FramePacket {
                header: PacketHeader {
                    frame_id,
                    packet_id: i as u16,
                    packet_count: packet_count as u16,
                    payload_size: (end - start) as u32,
                },
                payload: frame.slice(start..end),
            }
        })
        .collect())
}
