pub mod handshake;
pub mod message;

pub use handshake::{Handshake, HandshakeCodec};
pub use message::{Message, MessageCodec, MessageId};
