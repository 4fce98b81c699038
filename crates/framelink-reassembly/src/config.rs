use std::time::Duration;

use framelink_protocol::MAX_UDP_PAYLOAD;

use crate::error::ConfigError;
use crate::packet::RX_PAYLOAD_CAPACITY;

/// One 4K RAW frame at 16 bits per pixel.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4096 * 2160 * 2;

/// Queue capacity; roughly 23 MB of 1400-byte payloads.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096 * 4;

/// Sizing and timing for the reassembly engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblyConfig {
    /// Buffer capacity of each in-flight frame.
    pub max_frame_size: usize,
    /// Bytes reserved per packet slot; packet `i` lands at `i * payload_stride`.
    pub payload_stride: usize,
    /// Largest payload the producer will enqueue.
    pub max_payload_size: usize,
    /// Packet queue capacity.
    pub queue_capacity: usize,
    /// Retire a frame that has not accepted a packet for this long.
    pub frame_idle_timeout: Duration,
    /// Retire a frame this long after its first packet, no matter what.
    pub max_frame_lifetime: Duration,
    /// How often the consumer runs the timer sweep.
    pub sweep_interval: Duration,
    /// Upper bound on a single consumer wait for a packet.
    pub pop_timeout: Duration,
    /// After shutdown, how long the queue must stay empty before the final drain.
    pub shutdown_grace: Duration,
    /// Optional cap on frames tracked at once. When set, the oldest frame is
    /// retired early to make room. `None` leaves retirement to the timers.
    pub max_in_flight_frames: Option<usize>,
    /// Idle frame buffers kept for reuse.
    pub buffer_pool_size: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            payload_stride: MAX_UDP_PAYLOAD,
            max_payload_size: MAX_UDP_PAYLOAD,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            frame_idle_timeout: Duration::from_millis(30),
            max_frame_lifetime: Duration::from_secs(8),
            sweep_interval: Duration::from_millis(5),
            pop_timeout: Duration::from_millis(1),
            shutdown_grace: Duration::from_millis(100),
            max_in_flight_frames: None,
            buffer_pool_size: 4,
        }
    }
}

impl ReassemblyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("max_frame_size", self.max_frame_size),
            ("payload_stride", self.payload_stride),
            ("max_payload_size", self.max_payload_size),
            ("queue_capacity", self.queue_capacity),
            (
                "max_in_flight_frames",
                self.max_in_flight_frames.unwrap_or(usize::MAX),
            ),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }

        let timings = [
            ("frame_idle_timeout", self.frame_idle_timeout),
            ("max_frame_lifetime", self.max_frame_lifetime),
            ("sweep_interval", self.sweep_interval),
            ("pop_timeout", self.pop_timeout),
        ];
        for (name, value) in timings {
            if value.is_zero() {
                return Err(ConfigError::Zero(name));
            }
        }

        if self.max_payload_size > RX_PAYLOAD_CAPACITY {
            return Err(ConfigError::PayloadExceedsCapacity {
                max_payload: self.max_payload_size,
                capacity: RX_PAYLOAD_CAPACITY,
            });
        }
        if self.payload_stride < self.max_payload_size {
            return Err(ConfigError::StrideTooSmall {
                stride: self.payload_stride,
                max_payload: self.max_payload_size,
            });
        }
        if self.max_frame_size < self.payload_stride {
            return Err(ConfigError::FrameSmallerThanStride {
                max_frame_size: self.max_frame_size,
                stride: self.payload_stride,
            });
        }
        if self.frame_idle_timeout > self.max_frame_lifetime {
            return Err(ConfigError::IdleExceedsLifetime {
                idle: self.frame_idle_timeout,
                lifetime: self.max_frame_lifetime,
            });
        }
        Ok(())
    }
}
