use bytes::Bytes;
use framelink_protocol::{split_datagram, PacketHeader};

use crate::error::PacketError;

/// Largest payload a queued packet may carry (one Ethernet MTU).
pub const RX_PAYLOAD_CAPACITY: usize = 1500;

/// A received datagram on its way from the producer to the reassembly thread.
///
/// The payload length always equals `header.payload_size` and never exceeds
/// [`RX_PAYLOAD_CAPACITY`]; both are checked once here so the copy into the
/// frame buffer can trust them.
#[derive(Debug, Clone)]
pub struct RxPacket {
    header: PacketHeader,
    payload: Bytes,
    /// Producer saw a discontinuity in packet order right before this packet.
    pub gap_before: bool,
}

impl RxPacket {
    pub fn new(header: PacketHeader, payload: Bytes) -> Result<Self, PacketError> {
        if payload.len() > RX_PAYLOAD_CAPACITY {
            return Err(PacketError::PayloadTooLarge {
                size: payload.len(),
                capacity: RX_PAYLOAD_CAPACITY,
            });
        }
        if payload.len() != header.payload_size as usize {
            return Err(PacketError::LengthMismatch {
                declared: header.payload_size,
                actual: payload.len(),
            });
        }
        Ok(Self {
            header,
            payload,
            gap_before: false,
        })
    }

    /// Parse a raw datagram, copying out exactly the declared payload.
    ///
    /// Payloads above `max_payload` (or [`RX_PAYLOAD_CAPACITY`], whichever is
    /// smaller) are refused, so everything queued fits one stride slot.
    pub fn from_datagram(data: &[u8], max_payload: usize) -> Result<Self, PacketError> {
        let (header, payload) = split_datagram(data)?;
        let limit = max_payload.min(RX_PAYLOAD_CAPACITY);
        if payload.len() > limit {
            return Err(PacketError::PayloadTooLarge {
                size: payload.len(),
                capacity: limit,
            });
        }
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(payload),
            gap_before: false,
        })
    }

    pub fn with_gap_before(mut self, gap_before: bool) -> Self {
        self.gap_before = gap_before;
        self
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn frame_id(&self) -> u32 {
        self.header.frame_id
    }
}
