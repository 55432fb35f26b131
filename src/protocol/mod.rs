pub mod at;
pub mod checksum;
pub mod commands;
pub mod packet;
pub mod sdp;

pub use packet::{AmbientSettings, ControlPacket, PACKET_LEN};
