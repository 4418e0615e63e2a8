//! RTMP wire protocol: handshake, chunk stream and message layer

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;

pub use chunk::{ChunkCodec, ChunkHeader, ChunkMessage, ReadOutcome};
pub use handshake::{Handshake, HandshakeFormat, HandshakePhase};
pub use message::{Command, RtmpMessage, UserControlEvent};
