//! # Wire Messages
//!
//! Every message moving through a session is a [`Message`]: an overlay
//! [`Header`] plus an opaque body. The header carries the routing destination
//! and, for routing-table maintenance traffic, a [`StateMessage`].
//!
//! | Message | `addrs` | `updated` | Flags |
//! |---------|---------|-----------|-------|
//! | join    | local entry only | [`JOIN_TIMESTAMP`] | clear |
//! | state   | local, leaves, one row, nears | logical clock | `repair` |
//! | beat    | empty | logical clock | `passive` |
//!
//! Messages are encoded with bincode. Decoding is always size-limited so a
//! hostile length prefix cannot force a large allocation.

use std::collections::HashMap;

use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::identity::NodeId;

/// Largest encoded message accepted off the wire (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Timestamp carried by join messages. Lower than any real clock value, so a
/// join never wins a freshness comparison against table state.
pub const JOIN_TIMESTAMP: u64 = 0;

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_FRAME_SIZE as u64)
        .with_fixint_encoding()
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode_options().serialize(value)
}

/// Deserialize with the frame size bound enforced.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, bincode::Error> {
    bincode_options().deserialize(bytes)
}

/// Routing state exchange payload: address book for the leaves, one routing
/// row and the neighbors, stamped with the sender's logical clock.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMessage {
    /// Stringified node id to its known addresses.
    pub addrs: HashMap<String, Vec<String>>,
    pub updated: u64,
    /// Sender asks for an authoritative state update in return.
    pub repair: bool,
    /// Heartbeat over a connection that is not an active route entry.
    pub passive: bool,
}

impl StateMessage {
    pub fn join(id: &NodeId, addrs: Vec<String>) -> Self {
        let mut state = Self {
            updated: JOIN_TIMESTAMP,
            ..Default::default()
        };
        state.addrs.insert(id.to_string(), addrs);
        state
    }

    pub fn beat(updated: u64, passive: bool) -> Self {
        Self {
            updated,
            passive,
            ..Default::default()
        }
    }
}

/// Overlay envelope attached to every session message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Upper layer payload. Never inspected by the overlay.
    pub meta: Option<Vec<u8>>,
    pub dest: NodeId,
    pub state: Option<StateMessage>,
}

impl Header {
    pub fn application(dest: NodeId, meta: Vec<u8>) -> Self {
        Self {
            meta: Some(meta),
            dest,
            state: None,
        }
    }

    pub fn state(dest: NodeId, state: StateMessage) -> Self {
        Self {
            meta: None,
            dest,
            state: Some(state),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub head: Header,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(head: Header, data: Vec<u8>) -> Self {
        Self { head, data }
    }

    /// True if the message carries routing state rather than application data.
    pub fn is_state(&self) -> bool {
        self.head.state.is_some()
    }
}
