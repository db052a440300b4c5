//! # ringmesh - Overlay Maintenance Core
//!
//! ringmesh keeps a node's view of a Pastry-style ring overlay current:
//!
//! - **Workers**: one receive and one send task per connected peer
//! - **Delivery**: timeout-bounded sends; slow or dead peers are reported, never
//!   waited on
//! - **State exchange**: join, state and heartbeat messages carrying the leaf
//!   set, one routing row and the neighborhood set
//! - **Bootstrap**: uniform random probing of the local subnet when no directory
//!   service is available
//!
//! ## Architecture
//!
//! [`Overlay`] is a cheap-to-clone handle. Routing state sits behind a single
//! `RwLock` that this crate only reads; table and pool maintenance are left to
//! the policy layer, which learns about dead peers from the drop queue returned
//! by [`Overlay::new`]. Shutdown is two-tier: a node-wide signal and one signal
//! per peer, both level-triggered.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|--------|
//! | `node` | Overlay handle, worker spawning, shutdown |
//! | `messaging` | Worker loops, bounded send, join/state/beat |
//! | `peer` | Per-connection bookkeeping and cancellation |
//! | `routing` | Routing table and pool snapshot types |
//! | `session` | Typed message pipes, framed stream adapter |
//! | `messages` | Wire types and bounded bincode codec |
//! | `identity` | Arbitrary-precision node ids and prefix math |
//! | `bootstrap` | Subnet sampling and the probing seeder |
//! | `protocols` | Router trait |
//! | `config` | Tunables and validation |

mod bootstrap;
mod config;
mod identity;
mod messages;
mod messaging;
mod node;
mod peer;
mod protocols;
mod routing;
mod session;

pub use bootstrap::{seed_channel, ProbeSeeder, Seed, SeedReceiver, SeedSink, Subnet};
pub use config::{OverlayConfig, SeederConfig};
pub use identity::NodeId;
pub use messages::{decode, encode, Header, Message, StateMessage, JOIN_TIMESTAMP, MAX_FRAME_SIZE};
pub use node::{DropReceiver, Overlay};
pub use peer::{Peer, PeerLink};
pub use protocols::Router;
pub use routing::{OverlayState, RoutingTable};
pub use session::Session;
