//! Protocol trait definitions at the overlay's outer seams.
//!
//! | Seam | Trait | Purpose |
//! |------|-------|---------|
//! | Inbound dispatch | [`Router`] | Deliver, forward or apply each received message |
//!
//! The overlay depends only on this trait, never on a concrete router, so the
//! routing policy can hold an `Overlay` handle of its own without a cycle.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::messages::Message;
use crate::peer::Peer;

/// Decides what happens to a message received from a directly connected peer.
#[async_trait]
pub trait Router: Send + Sync + 'static {
    /// Handle one inbound message from `peer`.
    ///
    /// State-exchange messages are recognisable by `msg.head.state`. An error
    /// is logged by the receive worker; the connection stays up.
    async fn route(&self, peer: &Arc<Peer>, msg: Message) -> Result<()>;
}
