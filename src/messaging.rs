//! # Inter-node Messaging
//!
//! Every connection runs two tasks. The receiver pulls messages off the
//! session and hands them to the [`Router`]; the sender moves messages from
//! the peer's application queue onto the session. Network failure is detected
//! by the receiver (the session's inbound queue closes) and reported on the
//! overlay's drop queue.
//!
//! Routing-table maintenance traffic is built here too: join, state and beat
//! messages, all delivered through the timeout-bounded [`Overlay::send`].
//! Delivery is best effort; convergence comes from periodic re-sending by the
//! maintenance policy, not from acknowledgements.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::identity::NodeId;
use crate::messages::{Header, Message, StateMessage};
use crate::node::Overlay;
use crate::peer::{raised, Peer};
use crate::protocols::Router;
use crate::routing::OverlayState;

impl<R: Router> Overlay<R> {
    /// Receive loop for one peer. Stops on overlay shutdown, peer shutdown or
    /// session termination; only the last one reports the peer as dropped.
    pub(crate) async fn receiver(self, peer: Arc<Peer>, mut inbound: mpsc::Receiver<Message>) {
        loop {
            tokio::select! {
                _ = raised(self.quit_signal()) => return,
                _ = raised(peer.quit_signal()) => return,
                msg = inbound.recv() => {
                    let Some(msg) = msg else {
                        debug!(peer = ?peer.node_id(), "session closed");
                        self.report_drop(&peer);
                        return;
                    };
                    // A routing call may block; it must not outlive either signal.
                    tokio::select! {
                        _ = raised(self.quit_signal()) => return,
                        _ = raised(peer.quit_signal()) => return,
                        routed = self.router().route(&peer, msg) => {
                            if let Err(e) = routed {
                                warn!(peer = ?peer.node_id(), error = %e, "failed to route inbound message");
                            }
                        }
                    }
                }
            }
        }
    }

    /// Enqueue `msg` for `peer`, giving up after the configured send timeout.
    ///
    /// A peer that cannot accept a message in time is reported as dropped.
    /// Nothing is returned to the caller either way: a dead peer simply leaves
    /// the pool once the drop is processed.
    pub async fn send(&self, msg: Message, peer: &Arc<Peer>) {
        let timeout = self.config().send_timeout;
        tokio::select! {
            _ = raised(self.quit_signal()) => {}
            _ = raised(peer.quit_signal()) => {}
            _ = tokio::time::sleep(timeout) => {
                warn!(peer = ?peer.node_id(), ?timeout, "peer queue full, dropping");
                self.report_drop(peer);
            }
            sent = peer.outbound().send(msg) => {
                if sent.is_err() {
                    debug!(peer = ?peer.node_id(), "peer sender gone, message discarded");
                }
            }
        }
    }

    /// Announce the local node to a new connection: only our own address entry,
    /// stamped with the join timestamp so it carries no routing authority.
    pub async fn send_join(&self, peer: &Arc<Peer>) {
        let addrs = self.state().read().await.addrs.clone();
        let state = StateMessage::join(self.node_id(), addrs);
        self.send_wrap(state, peer).await;
    }

    /// Send our leaf set, the routing row relevant to `peer` and our neighbors.
    /// `repair` asks the peer to answer with its own state.
    pub async fn send_state(&self, peer: &Arc<Peer>, repair: bool) {
        let state = {
            let guard = self.state().read().await;
            self.state_snapshot(&guard, peer.node_id(), repair)
        };
        self.send_wrap(state, peer).await;
    }

    /// Liveness probe. `passive` marks a connection that is not an active
    /// routing entry.
    pub async fn send_beat(&self, peer: &Arc<Peer>, passive: bool) {
        let updated = self.state().read().await.time;
        self.send_wrap(StateMessage::beat(updated, passive), peer).await;
    }

    async fn send_wrap(&self, state: StateMessage, peer: &Arc<Peer>) {
        let msg = Message::new(Header::state(self.node_id().clone(), state), Vec::new());
        self.send(msg, peer).await;
    }

    /// Collect the state message for `remote` from one consistent view of the
    /// table. Ids that no longer resolve in the pool are left out.
    pub(crate) fn state_snapshot(
        &self,
        state: &OverlayState,
        remote: &NodeId,
        repair: bool,
    ) -> StateMessage {
        let local = self.node_id();
        let mut msg = StateMessage {
            updated: state.time,
            repair,
            ..Default::default()
        };
        msg.addrs.insert(local.to_string(), state.addrs.clone());

        let mut include = |id: &NodeId| {
            if let Some(addrs) = state.lookup(id) {
                msg.addrs.insert(id.to_string(), addrs.to_vec());
            } else {
                trace!(id = ?id, "skipping stale table entry");
            }
        };

        for id in state.routes.leaves.iter().filter(|id| *id != local) {
            include(id);
        }
        let config = self.config();
        let (row, _) = local.prefix(remote, config.space_bits, config.base_bits);
        if let Some(row) = state.routes.row(row) {
            for id in row.iter().flatten() {
                include(id);
            }
        }
        for id in &state.routes.nears {
            include(id);
        }
        msg
    }
}

/// Send loop for one peer. Owns the session's outbound half, so the transport
/// queue closes when this returns. Every forward also races both shutdown
/// signals so a stalled transport cannot hold the task.
pub(crate) async fn sender(
    quit: watch::Receiver<bool>,
    peer_quit: watch::Receiver<bool>,
    mut out: mpsc::Receiver<Message>,
    net_out: mpsc::Sender<Message>,
) {
    loop {
        let msg = tokio::select! {
            _ = raised(quit.clone()) => return,
            _ = raised(peer_quit.clone()) => return,
            msg = out.recv() => match msg {
                Some(msg) => msg,
                None => return,
            },
        };
        tokio::select! {
            _ = raised(quit.clone()) => return,
            _ = raised(peer_quit.clone()) => return,
            sent = net_out.send(msg) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}
