use std::time::Duration;

use framelink_protocol::ProtocolError;
use thiserror::Error;

/// Misconfiguration detected at startup. Never raised per packet.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be non-zero")]
    Zero(&'static str),

    #[error("payload stride {stride} is smaller than the maximum payload size {max_payload}")]
    StrideTooSmall { stride: usize, max_payload: usize },

    #[error("maximum payload size {max_payload} exceeds the packet buffer capacity {capacity}")]
    PayloadExceedsCapacity { max_payload: usize, capacity: usize },

    #[error("max frame size {max_frame_size} cannot hold a single {stride}-byte packet slot")]
    FrameSmallerThanStride { max_frame_size: usize, stride: usize },

    #[error("idle timeout {idle:?} exceeds max frame lifetime {lifetime:?}")]
    IdleExceedsLifetime { idle: Duration, lifetime: Duration },
}

/// A datagram that cannot become a queued packet.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("malformed datagram: {0}")]
    Malformed(#[from] ProtocolError),

    #[error("payload length {actual} does not match declared payload_size {declared}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("payload of {size} bytes exceeds packet buffer capacity {capacity}")]
    PayloadTooLarge { size: usize, capacity: usize },
}
