pub mod error;
pub mod frame;
pub mod packet;

pub use error::ProtocolError;
pub use frame::{FrameHeader, StubEncoder, FRAME_HEADER_SIZE, FRAME_MAGIC, PROTOCOL_VERSION};
pub use packet::{
    fragment_frame, split_datagram, FramePacket, PacketHeader, MAX_DATAGRAM_SIZE,
    MAX_UDP_PAYLOAD, PACKET_HEADER_SIZE,
};
