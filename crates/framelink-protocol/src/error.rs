use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("packet too short: expected at least {expected} bytes, got {got}")]
    PacketTooShort { expected: usize, got: usize },

    #[error("payload truncated: header declares {declared} bytes, datagram carries {available}")]
    PayloadTruncated { declared: u32, available: usize },

    #[error("frame too large: {size} bytes needs more than {max_packets} packets")]
    FrameTooLarge { size: usize, max_packets: usize },

    #[error("frame of {0} bytes does not fit the u32 size field")]
    FrameSizeOverflow(usize),

    #[error("payload budget must be non-zero")]
    ZeroPayloadBudget,

    #[error("bad frame magic: 0x{0:08x}")]
    BadMagic(u32),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_too_short_display() {
        let e = ProtocolError::PacketTooShort { expected: 12, got: 5 };
        let msg = e.to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains("5"));
    }

    #[test]
    fn payload_truncated_display() {
        let e = ProtocolError::PayloadTruncated { declared: 1400, available: 20 };
        let msg = e.to_string();
        assert!(msg.contains("1400"));
        assert!(msg.contains("20"));
    }

    #[test]
    fn bad_magic_display() {
        let e = ProtocolError::BadMagic(0xDEADBEEF);
        assert!(e.to_string().contains("0xdeadbeef"));
    }
}
