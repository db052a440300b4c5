//! # Routing State
//!
//! The routing table proper (leaf set, prefix matrix, neighborhood set) and
//! the connection pool it points into. Both live in [`OverlayState`] behind a
//! single `RwLock` owned by the overlay.
//!
//! The protocol engine in this crate only ever reads this state. Insertion,
//! eviction and clock advancement belong to the maintenance policy built on
//! top; the helpers here are what that policy calls while holding the write
//! lock.
//!
//! Table entries and pool entries are updated independently, so a table id may
//! not resolve in the pool at any given moment. Readers treat that as a stale
//! entry and skip it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::identity::NodeId;
use crate::peer::Peer;

#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
    /// Ids adjacent to the local id on the ring.
    pub leaves: Vec<NodeId>,
    /// Row `i` holds ids sharing exactly `i` leading digits with the local id,
    /// one slot per value of the next digit.
    pub routes: Vec<Vec<Option<NodeId>>>,
    /// Ids close under the proximity metric.
    pub nears: Vec<NodeId>,
}

impl RoutingTable {
    pub fn new(rows: usize, width: usize) -> Self {
        Self {
            leaves: Vec::new(),
            routes: vec![vec![None; width]; rows],
            nears: Vec::new(),
        }
    }

    pub fn row(&self, index: usize) -> Option<&[Option<NodeId>]> {
        self.routes.get(index).map(Vec::as_slice)
    }

    /// True if `id` is referenced anywhere in the table.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.leaves.contains(id)
            || self.nears.contains(id)
            || self
                .routes
                .iter()
                .any(|row| row.iter().any(|slot| slot.as_ref() == Some(id)))
    }
}

#[derive(Debug)]
pub struct OverlayState {
    /// Addresses the local node is reachable on.
    pub addrs: Vec<String>,
    /// Logical clock stamped on state and beat messages.
    pub time: u64,
    pub routes: RoutingTable,
    /// Live connections keyed by stringified node id.
    pub pool: HashMap<String, Arc<Peer>>,
}

impl OverlayState {
    pub fn new(addrs: Vec<String>, routes: RoutingTable) -> Self {
        Self {
            addrs,
            time: 0,
            routes,
            pool: HashMap::new(),
        }
    }

    /// Address list of a pooled peer, if the id still resolves.
    pub fn lookup(&self, id: &NodeId) -> Option<&[String]> {
        self.pool.get(&id.to_string()).map(|peer| peer.addrs())
    }

    /// Add a peer to the pool, returning any connection it replaced.
    pub fn insert_peer(&mut self, peer: Arc<Peer>) -> Option<Arc<Peer>> {
        self.pool.insert(peer.node_id().to_string(), peer)
    }

    pub fn remove_peer(&mut self, id: &NodeId) -> Option<Arc<Peer>> {
        self.pool.remove(&id.to_string())
    }

    /// Advance the logical clock. Never moves it backwards.
    pub fn advance_time(&mut self, to: u64) {
        self.time = self.time.max(to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    fn peer(id: u64) -> Arc<Peer> {
        let (session, _remote) = Session::pair(1);
        Peer::new(NodeId::from(id), vec![format!("10.0.0.{}:4000", id)], session, 1).0
    }

    #[test]
    fn new_table_has_empty_rows() {
        let table = RoutingTable::new(32, 16);
        assert_eq!(table.routes.len(), 32);
        assert!(table.routes.iter().all(|row| row.len() == 16));
        assert!(table.row(31).unwrap().iter().all(Option::is_none));
        assert!(table.row(32).is_none());
    }

    #[test]
    fn contains_checks_every_section() {
        let mut table = RoutingTable::new(4, 16);
        table.leaves.push(NodeId::from(1));
        table.routes[2][5] = Some(NodeId::from(2));
        table.nears.push(NodeId::from(3));

        assert!(table.contains(&NodeId::from(1)));
        assert!(table.contains(&NodeId::from(2)));
        assert!(table.contains(&NodeId::from(3)));
        assert!(!table.contains(&NodeId::from(4)));
    }

    #[tokio::test]
    async fn pool_lookup_skips_missing_ids() {
        let mut state = OverlayState::new(vec![], RoutingTable::new(4, 16));
        state.insert_peer(peer(7));

        assert_eq!(state.lookup(&NodeId::from(7)).unwrap(), ["10.0.0.7:4000"]);
        assert!(state.lookup(&NodeId::from(8)).is_none());

        assert!(state.remove_peer(&NodeId::from(7)).is_some());
        assert!(state.lookup(&NodeId::from(7)).is_none());
    }

    #[test]
    fn clock_never_moves_backwards() {
        let mut state = OverlayState::new(vec![], RoutingTable::default());
        state.advance_time(10);
        state.advance_time(4);
        assert_eq!(state.time, 10);
    }
}
