//! Per-peer connection bookkeeping.
//!
//! A connection is split in two halves. [`Peer`] is the shared half: it lives
//! in the overlay's pool, hands out the outbound application queue and owns the
//! per-peer shutdown signal. [`PeerLink`] is the half consumed by the worker
//! pair: the queue receiver and the session endpoints.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::identity::NodeId;
use crate::messages::Message;
use crate::session::Session;

pub struct Peer {
    node_id: NodeId,
    addrs: Vec<String>,
    out: mpsc::Sender<Message>,
    quit: watch::Sender<bool>,
}

pub struct PeerLink {
    pub(crate) out: mpsc::Receiver<Message>,
    pub(crate) session: Session,
}

impl Peer {
    /// Build the bookkeeping for a freshly established connection. The caller
    /// hands the link to `Overlay::spawn_peer` and stores the peer in the pool.
    pub fn new(
        node_id: NodeId,
        addrs: Vec<String>,
        session: Session,
        app_buffer: usize,
    ) -> (Arc<Peer>, PeerLink) {
        let (out_tx, out_rx) = mpsc::channel(app_buffer);
        let (quit, _) = watch::channel(false);
        let peer = Arc::new(Peer {
            node_id,
            addrs,
            out: out_tx,
            quit,
        });
        (peer, PeerLink { out: out_rx, session })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn addrs(&self) -> &[String] {
        &self.addrs
    }

    /// Tear down this peer's worker pair. Level-triggered: workers that start
    /// waiting after the call still observe it.
    pub fn close(&self) {
        self.quit.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.quit.borrow()
    }

    pub(crate) fn outbound(&self) -> &mpsc::Sender<Message> {
        &self.out
    }

    pub(crate) fn quit_signal(&self) -> watch::Receiver<bool> {
        self.quit.subscribe()
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("node_id", &self.node_id)
            .field("addrs", &self.addrs)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Resolves once `signal` is raised or its sender is gone.
pub(crate) async fn raised(mut signal: watch::Receiver<bool>) {
    let _ = signal.wait_for(|quit| *quit).await;
}
