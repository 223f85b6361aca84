//! Signaling channel to the rendezvous service
pub mod channel;
pub mod memory;
pub mod message;
pub mod websocket;

pub use channel::{ChannelEvent, ChannelEventSender, ChannelEvents, SignalingChannel};
pub use memory::{MemoryChannel, MemoryHub};
pub use message::{Envelope, Recipient, SignalingMessage, BROADCAST_ADDRESS};
pub use websocket::WebSocketChannel;
