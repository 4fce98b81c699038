use std::path::PathBuf;
use std::time::Duration;

use framelink_reassembly::config::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_QUEUE_CAPACITY};
use framelink_reassembly::ReassemblyConfig;
use serde::Deserialize;

/// Receiver configuration, loaded from a TOML file.
#[derive(Debug, Deserialize)]
pub struct ReceiverConfig {
    /// IP address to bind on (default "0.0.0.0").
    #[serde(default = "default_host")]
    pub host: String,

    /// UDP port frames arrive on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory retired frames are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Write frames to disk at all. Off for pure throughput measurements.
    #[serde(default = "default_write_frames")]
    pub write_frames: bool,

    /// Kernel receive buffer (SO_RCVBUF) in bytes.
    #[serde(default = "default_recv_buffer_bytes")]
    pub recv_buffer_bytes: usize,

    /// Frames buffered between the reassembly thread and the writer task.
    #[serde(default = "default_writer_queue")]
    pub writer_queue: usize,

    /// Seconds between stats log lines; 0 disables them.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,

    #[serde(default)]
    pub reassembly: ReassemblySettings,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    5000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("frames")
}

fn default_write_frames() -> bool {
    true
}

fn default_recv_buffer_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_writer_queue() -> usize {
    8
}

fn default_stats_interval_secs() -> u64 {
    5
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            output_dir: default_output_dir(),
            write_frames: default_write_frames(),
            recv_buffer_bytes: default_recv_buffer_bytes(),
            writer_queue: default_writer_queue(),
            stats_interval_secs: default_stats_interval_secs(),
            reassembly: ReassemblySettings::default(),
        }
    }
}

/// `[reassembly]` section. Durations are in milliseconds.
#[derive(Debug, Deserialize)]
pub struct ReassemblySettings {
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    #[serde(default = "default_payload")]
    pub payload_stride: usize,

    #[serde(default = "default_payload")]
    pub max_payload_size: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_idle_timeout_ms")]
    pub frame_idle_timeout_ms: u64,

    #[serde(default = "default_max_lifetime_ms")]
    pub max_frame_lifetime_ms: u64,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    #[serde(default = "default_pop_timeout_ms")]
    pub pop_timeout_ms: u64,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Unset means frames leave only through completion or their timers.
    #[serde(default)]
    pub max_in_flight_frames: Option<usize>,

    #[serde(default = "default_buffer_pool_size")]
    pub buffer_pool_size: usize,
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_payload() -> usize {
    framelink_protocol::MAX_UDP_PAYLOAD
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_idle_timeout_ms() -> u64 {
    30
}

fn default_max_lifetime_ms() -> u64 {
    8_000
}

fn default_sweep_interval_ms() -> u64 {
    5
}

fn default_pop_timeout_ms() -> u64 {
    1
}

fn default_shutdown_grace_ms() -> u64 {
    100
}

fn default_buffer_pool_size() -> usize {
    4
}

impl Default for ReassemblySettings {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            payload_stride: default_payload(),
            max_payload_size: default_payload(),
            queue_capacity: default_queue_capacity(),
            frame_idle_timeout_ms: default_idle_timeout_ms(),
            max_frame_lifetime_ms: default_max_lifetime_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            pop_timeout_ms: default_pop_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            max_in_flight_frames: None,
            buffer_pool_size: default_buffer_pool_size(),
        }
    }
}

impl ReassemblySettings {
    /// Convert to the engine's config. Validation happens when the frame
    /// manager is built.
    pub fn to_config(&self) -> ReassemblyConfig {
        ReassemblyConfig {
            max_frame_size: self.max_frame_size,
            payload_stride: self.payload_stride,
            max_payload_size: self.max_payload_size,
            queue_capacity: self.queue_capacity,
            frame_idle_timeout: Duration::from_millis(self.frame_idle_timeout_ms),
            max_frame_lifetime: Duration::from_millis(self.max_frame_lifetime_ms),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            pop_timeout: Duration::from_millis(self.pop_timeout_ms),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
            max_in_flight_frames: self.max_in_flight_frames,
            buffer_pool_size: self.buffer_pool_size,
        }
    }
}
