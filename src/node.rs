//! # Overlay Node
//!
//! [`Overlay`] is the handle the rest of a node talks to. It ties together:
//!
//! - the local id and the validated [`OverlayConfig`]
//! - the lock-guarded [`OverlayState`] (addresses, clock, table, pool)
//! - the [`Router`] that inbound messages are handed to
//! - the node-wide shutdown signal and the drop-report queue
//! - the set of per-peer worker tasks
//!
//! ## Quick Start
//!
//! ```ignore
//! let (overlay, mut drops) = Overlay::new(id, addrs, OverlayConfig::default(), router)?;
//!
//! // A connection was established elsewhere:
//! let (peer, link) = overlay.new_peer(remote_id, remote_addrs, session);
//! overlay.state().write().await.insert_peer(peer.clone());
//! overlay.spawn_peer(&peer, link).await?;
//! overlay.send_join(&peer).await;
//!
//! // Dead or slow peers show up here; removing them is the caller's job.
//! while let Some(peer) = drops.recv().await {
//!     overlay.state().write().await.remove_peer(peer.node_id());
//!     peer.close();
//! }
//! ```
//!
//! Handles are cheap to clone; all clones share the same state and workers.

use std::mem;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::OverlayConfig;
use crate::identity::NodeId;
use crate::peer::{Peer, PeerLink};
use crate::protocols::Router;
use crate::routing::{OverlayState, RoutingTable};
use crate::session::Session;

/// Receiving end of the drop-report queue. Every peer pushed here has either
/// lost its session or failed to accept a message within the send timeout.
pub type DropReceiver = mpsc::UnboundedReceiver<Arc<Peer>>;

pub struct Overlay<R: Router> {
    node_id: NodeId,
    config: OverlayConfig,
    state: Arc<RwLock<OverlayState>>,
    router: Arc<R>,
    quit: Arc<watch::Sender<bool>>,
    drops: mpsc::UnboundedSender<Arc<Peer>>,
    workers: Arc<Mutex<JoinSet<()>>>,
}

impl<R: Router> Clone for Overlay<R> {
    fn clone(&self) -> Self {
        Self {
            node_id: self.node_id.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
            router: self.router.clone(),
            quit: self.quit.clone(),
            drops: self.drops.clone(),
            workers: self.workers.clone(),
        }
    }
}

impl<R: Router> Overlay<R> {
    /// Create the overlay with an empty routing table and pool.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the id does not fit
    /// the configured identifier space.
    pub fn new(
        node_id: NodeId,
        addrs: Vec<String>,
        config: OverlayConfig,
        router: R,
    ) -> Result<(Self, DropReceiver)> {
        config.validate().context("invalid overlay configuration")?;
        if node_id.as_biguint().bits() as usize > config.space_bits {
            bail!(
                "node id {:?} does not fit a {}-bit identifier space",
                node_id,
                config.space_bits
            );
        }

        let routes = RoutingTable::new(config.digits(), config.row_width());
        let state = OverlayState::new(addrs, routes);
        let (quit, _) = watch::channel(false);
        let (drops, drop_rx) = mpsc::unbounded_channel();

        info!(node = ?node_id, space = config.space_bits, base = config.base_bits, "overlay created");

        let overlay = Self {
            node_id,
            config,
            state: Arc::new(RwLock::new(state)),
            router: Arc::new(router),
            quit: Arc::new(quit),
            drops,
            workers: Arc::new(Mutex::new(JoinSet::new())),
        };
        Ok((overlay, drop_rx))
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// Shared routing state. The protocol engine only reads it; table and pool
    /// maintenance take the write lock through this handle.
    pub fn state(&self) -> &Arc<RwLock<OverlayState>> {
        &self.state
    }

    pub fn router(&self) -> &Arc<R> {
        &self.router
    }

    /// Bookkeeping for a new connection, sized by this overlay's config.
    pub fn new_peer(
        &self,
        node_id: NodeId,
        addrs: Vec<String>,
        session: Session,
    ) -> (Arc<Peer>, PeerLink) {
        Peer::new(node_id, addrs, session, self.config.app_buffer)
    }

    /// [`Overlay::new_peer`] over a raw byte stream, framed with the
    /// configured session buffer.
    pub fn stream_peer<S>(
        &self,
        node_id: NodeId,
        addrs: Vec<String>,
        stream: S,
    ) -> (Arc<Peer>, PeerLink)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.new_peer(node_id, addrs, Session::framed(stream, self.config.net_buffer))
    }

    /// Start the receive and send workers for `peer`.
    ///
    /// # Errors
    /// Fails once the overlay has been shut down; the link is dropped, which
    /// closes the session.
    pub async fn spawn_peer(&self, peer: &Arc<Peer>, link: PeerLink) -> Result<()> {
        let PeerLink { out, session } = link;
        let (net_in, net_out) = session.split();

        let mut workers = self.workers.lock().await;
        // Checked under the lock: shutdown raises the signal before taking the set.
        if self.is_shutdown() {
            bail!("overlay is shut down, not starting workers for {:?}", peer.node_id());
        }
        while let Some(finished) = workers.try_join_next() {
            if let Err(e) = finished {
                warn!(error = %e, "peer worker panicked");
            }
        }
        workers.spawn(self.clone().receiver(peer.clone(), net_in));
        workers.spawn(crate::messaging::sender(
            self.quit_signal(),
            peer.quit_signal(),
            out,
            net_out,
        ));
        debug!(peer = ?peer.node_id(), "peer workers started");
        Ok(())
    }

    pub fn is_shutdown(&self) -> bool {
        *self.quit.borrow()
    }

    /// Signal every worker to stop and wait until all of them have.
    pub async fn shutdown(&self) {
        self.quit.send_replace(true);

        // Joined outside the lock so a worker calling back into spawn_peer
        // cannot deadlock against us.
        let mut workers = mem::take(&mut *self.workers.lock().await);
        while let Some(finished) = workers.join_next().await {
            if let Err(e) = finished {
                warn!(error = %e, "peer worker panicked");
            }
        }
        info!(node = ?self.node_id, "overlay shut down");
    }

    pub(crate) fn quit_signal(&self) -> watch::Receiver<bool> {
        self.quit.subscribe()
    }

    /// Queue `peer` for removal. Never blocks; a closed queue means nobody is
    /// tracking drops any more.
    pub(crate) fn report_drop(&self, peer: &Arc<Peer>) {
        if self.drops.send(peer.clone()).is_err() {
            debug!(peer = ?peer.node_id(), "drop queue closed, report discarded");
        }
    }
}
