//! Socket ownership, handshake and the session loop

mod session;
mod state;

pub use session::{AUDIO_QUEUE_DEPTH, Session, SessionCommand, SessionHandle, SocketEvent};
pub use state::{ConnectionMachine, ConnectionState, HandshakeStep};
