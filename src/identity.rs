//! # Node Identifiers
//!
//! A [`NodeId`] is an arbitrary-precision unsigned integer locating a node on
//! the identifier ring. The ring is `space_bits` wide and read as a string of
//! `base_bits`-wide digits, most significant first; the number of leading
//! digits two ids share picks the routing matrix row that relates them.
//!
//! The canonical text form is decimal. It is used as the peer pool key and as
//! the key of state-exchange address maps, so it must stay stable.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use num_bigint::{BigUint, RandBigInt};
use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(BigUint);

impl NodeId {
    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    /// Draw a uniformly random id from a `space_bits` wide ring.
    pub fn random(space_bits: usize) -> Self {
        let mut rng = rand::thread_rng();
        Self(rng.gen_biguint(space_bits as u64))
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    /// Digit `index` (0 = most significant) of this id.
    pub fn digit(&self, index: usize, space_bits: usize, base_bits: usize) -> usize {
        let shift = space_bits.saturating_sub((index + 1) * base_bits);
        let mask = BigUint::from((1u32 << base_bits) - 1);
        let digit = (&self.0 >> shift) & mask;
        digit.to_u32_digits().first().copied().unwrap_or(0) as usize
    }

    /// Length of the digit prefix shared with `other`, plus `other`'s digit at
    /// the first position where they differ.
    ///
    /// Equal ids share every digit; the returned index is then the digit count
    /// and the digit is 0.
    pub fn prefix(&self, other: &NodeId, space_bits: usize, base_bits: usize) -> (usize, usize) {
        let digits = space_bits / base_bits;
        let diff = &self.0 ^ &other.0;
        let differing = diff.bits() as usize;
        let shared_bits = space_bits.saturating_sub(differing);
        let index = (shared_bits / base_bits).min(digits);
        if index == digits {
            return (index, 0);
        }
        (index, other.digit(index, space_bits, base_bits))
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl From<BigUint> for NodeId {
    fn from(value: BigUint) -> Self {
        Self(value)
    }
}

impl FromStr for NodeId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let value: BigUint = s
            .parse()
            .with_context(|| format!("invalid node id {:?}", s))?;
        Ok(Self(value))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.0.to_str_radix(16);
        if text.len() > 12 {
            write!(f, "NodeId({}..)", &text[..12])
        } else {
            write!(f, "NodeId({})", text)
        }
    }
}
