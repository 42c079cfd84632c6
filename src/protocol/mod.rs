//! WebSocket protocol types used by the negotiator and extension transforms.

pub mod frame;
pub mod handshake;
pub mod opcode;

pub use frame::Frame;
pub use handshake::{
    HandshakeRequest, HandshakeResponse, SEC_WEBSOCKET_EXTENSIONS, WS_GUID, compute_accept_key,
};
pub use opcode::OpCode;
