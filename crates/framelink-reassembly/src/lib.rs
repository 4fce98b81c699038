//! Frame reassembly engine.
//!
//! Packets flow from a network producer through the bounded [`PacketQueue`]
//! into a single consumer thread that owns the [`FrameManager`]. The manager
//! keeps one [`FrameReassembler`] per in-flight frame and retires frames to a
//! [`FrameSink`] on completion or timeout.

pub mod config;
pub mod error;
pub mod manager;
pub mod observer;
pub mod packet;
pub mod queue;
pub mod reassembler;
pub mod result;
pub mod trace;
pub mod worker;

pub use config::ReassemblyConfig;
pub use error::{ConfigError, PacketError};
pub use manager::{FrameManager, FrameSink, ManagerCounters};
pub use observer::{
    ObserverSet, ReassemblyEvent, ReassemblyObserver, RecordingObserver, RejectReason,
    RetireReason, TracingObserver,
};
pub use packet::{RxPacket, RX_PAYLOAD_CAPACITY};
pub use queue::PacketQueue;
pub use reassembler::{AssemblyPhase, FrameReassembler, PushOutcome};
pub use result::{FrameResult, FrameState, FrameStreamStats, OwnedFrame, StatsSnapshot};
pub use trace::{PacketTraceRing, TraceEntry, TraceKind};
pub use worker::run_reassembly_worker;
