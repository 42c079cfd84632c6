//! # wsext - Server-side WebSocket extension negotiation
//!
//! `wsext` negotiates the `Sec-WebSocket-Extensions` header of a WebSocket
//! upgrade (RFC 6455 Section 9) and rewires the connection's processing chain
//! for the extensions that were agreed on.
//!
//! ## Features
//!
//! - **Ordered negotiation** over a priority list of handshakers, with fallbacks
//! - **Reserved-bit arbitration** so no two active extensions share RSV1-3
//! - **Chain rewiring** that installs transforms in negotiated order for both directions
//! - **Self-removal** of the negotiator only once the response is on the wire
//! - **permessage-deflate** and **deflate-frame** handshakers (feature `compression`)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wsext::{Handshakers, HandshakeRequest, HandshakeResponse, Pipeline, ServerExtensionNegotiator};
//! use wsext::extensions::deflate::{DeflateFrameHandshaker, PerMessageDeflateHandshaker};
//!
//! let handshakers = Handshakers::new(vec![
//!     Box::new(PerMessageDeflateHandshaker::default()),
//!     Box::new(DeflateFrameHandshaker::default()),
//! ]);
//!
//! let request = HandshakeRequest::parse(&raw)?;
//! let mut pipeline = Pipeline::new();
//! let mut negotiator = ServerExtensionNegotiator::new(handshakers);
//! negotiator.install(&mut pipeline)?;
//! negotiator.handle_upgrade_request(&mut pipeline, &request)?;
//!
//! let mut response = HandshakeResponse::from_request(&request);
//! wsext::upgrade::respond(&mut negotiator, &mut pipeline, &mut response, &mut stream).await?;
//! ```

pub mod config;
pub mod error;
pub mod extensions;
pub mod pipeline;
pub mod protocol;

#[cfg(feature = "async-tokio")]
pub mod upgrade;

pub use config::{Config, Limits};
pub use error::{Error, Result};
pub use extensions::{
    ExtensionDecoder, ExtensionEncoder, ExtensionOffer, ExtensionParam, Handshakers,
    NegotiationPhase, RsvAllocator, RsvBits, ServerExtension, ServerExtensionHandshaker,
    ServerExtensionNegotiator,
};
pub use pipeline::{Pipeline, Stage};
pub use protocol::{Frame, HandshakeRequest, HandshakeResponse, OpCode, WS_GUID, compute_accept_key};
