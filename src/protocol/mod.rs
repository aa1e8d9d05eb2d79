//! Wire protocol: binary envelope and JSON messages

pub mod frame;
pub mod message;

pub use frame::{Frame, FrameKind, STREAM_SUBHEADER_LEN, decode, encode};
pub use message::{DeviceCommand, HandshakeMessage, IdentityResponse, ServerCommand};
