use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Frame magic (CCSDS 121.0-B-2 stub marker).
pub const FRAME_MAGIC: u32 = 0xCC12_10B2;

/// Current frame header version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Header size: 4 (magic) + 2 (version) + 2 (width) + 2 (height)
///            + 1 (bitdepth) + 1 (reserved) + 4 (frame_size) = 16 bytes.
pub const FRAME_HEADER_SIZE: usize = 16;

/// Header prefixed to every encoded frame before it is split into packets.
///
/// The reassembly engine never looks at it; only the sender and the frame
/// writer do.
///
/// Wire format (little-endian, no padding):
/// ```text
/// [magic: u32] [version: u16] [width: u16] [height: u16] [bitdepth: u8] [reserved: u8] [frame_size: u32]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub version: u16,
    pub width: u16,
    pub height: u16,
    /// RAW bit depth (10/12/16).
    pub bitdepth: u8,
    pub reserved: u8,
    /// Payload size after the header.
    pub frame_size: u32,
}

impl FrameHeader {
    pub fn new(width: u16, height: u16, bitdepth: u8, frame_size: u32) -> Self {
        Self {
            magic: FRAME_MAGIC,
            version: PROTOCOL_VERSION,
            width,
            height,
            bitdepth,
            reserved: 0,
            frame_size,
        }
    }

    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.magic);
        buf.put_u16_le(self.version);
        buf.put_u16_le(self.width);
        buf.put_u16_le(self.height);
        buf.put_u8(self.bitdepth);
        buf.put_u8(self.reserved);
        buf.put_u32_le(self.frame_size);
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::PacketTooShort {
                expected: FRAME_HEADER_SIZE,
                got: data.len(),
            });
        }

        Ok(Self {
            magic: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            version: u16::from_le_bytes([data[4], data[5]]),
            width: u16::from_le_bytes([data[6], data[7]]),
            height: u16::from_le_bytes([data[8], data[9]]),
            bitdepth: data[10],
            reserved: data[11],
            frame_size: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
        })
    }

    /// Check magic and version.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.magic != FRAME_MAGIC {
            return Err(ProtocolError::BadMagic(self.magic));
        }
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

/// Stand-in for a CCSDS 121.0 encoder: prefixes the raw image with a
/// [`FrameHeader`] and passes the pixels through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct StubEncoder {
    pub width: u16,
    pub height: u16,
    pub bitdepth: u8,
}

impl StubEncoder {
    pub fn new(width: u16, height: u16, bitdepth: u8) -> Self {
        Self {
            width,
            height,
            bitdepth,
        }
    }

    pub fn encode(&self, raw: &[u8]) -> Result<Bytes, ProtocolError> {
        let frame_size =
            u32::try_from(raw.len()).map_err(|_| ProtocolError::FrameSizeOverflow(raw.len()))?;

        let mut out = BytesMut::with_capacity(FRAME_HEADER_SIZE + raw.len());
        FrameHeader::new(self.width, self.height, self.bitdepth, frame_size).put(&mut out);
        out.extend_from_slice(raw);
        Ok(out.freeze())
    }
}
