//! Signaling channel contract
//!
//! Outbound traffic goes through [`SignalingChannel::send`]. Inbound traffic
//! is handed to exactly one dispatcher: the receiver half returned when the
//! transport is started. Delivery is at-most-once and ordered per
//! sender/recipient pair only.

use crate::domain::shared::error::Result;
use crate::domain::shared::value_objects::PeerId;
use crate::infrastructure::signaling::message::{Envelope, Recipient, SignalingMessage};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Something the transport wants the dispatcher to know
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// An inbound frame
    Message(Envelope),
    /// The link came back after a loss; remote session state is unknowable
    Reconnected,
    /// The link dropped
    Disconnected,
}

pub type ChannelEvents = mpsc::UnboundedReceiver<ChannelEvent>;
pub type ChannelEventSender = mpsc::UnboundedSender<ChannelEvent>;

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// The id the rendezvous service knows us by
    fn local_id(&self) -> &PeerId;

    /// Fire one message; fails with `SignalingDelivery` if it cannot be handed
    /// to the transport. Never retried.
    async fn send(&self, to: Recipient, message: SignalingMessage) -> Result<()>;
}
