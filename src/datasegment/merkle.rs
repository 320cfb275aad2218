// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Size of a tree node in bytes.
pub const NODE_SIZE: usize = 32;

/// A 32-byte node of the piece commitment tree.
pub type Node = [u8; NODE_SIZE];

/// Hash two child nodes into their parent.
///
/// The network's commitment trees use sha2-256 truncated to 254 bits: the
/// two high bits of the final byte are cleared so the digest fits the
/// proof system's field element.
pub fn truncated_hash(left: &Node, right: &Node) -> Node {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut out: Node = hasher.finalize().into();
    out[NODE_SIZE - 1] &= 0b0011_1111;
    out
}

/// Commitment of an all-zero region whose tree is `level` hashes tall.
///
/// Level 0 is the 32-byte zero leaf; each level above hashes two copies of
/// the level below.
pub fn zero_comm(level: u32) -> Node {
    let mut node: Node = [0u8; NODE_SIZE];
    for _ in 0..level {
        node = truncated_hash(&node, &node);
    }
    node
}

/// Tree level of a region of `size` padded bytes (a power of two >= 32).
pub fn level_for_size(size: u64) -> u32 {
    debug_assert!(size.is_power_of_two() && size >= NODE_SIZE as u64);
    size.trailing_zeros() - (NODE_SIZE as u64).trailing_zeros()
}

/// A Merkle path from a subtree root up to the tree root.
///
/// `path[0]` is the sibling at the subtree's own level, `index` is the
/// subtree's ordinal among same-sized subtrees. This mirrors the tuple
/// posted on chain alongside each offer id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofData {
    pub path: Vec<Node>,
    pub index: u64,
}

/// Recompute the root commitment from a subtree root and its proof.
pub fn compute_root(subtree: &Node, proof: &ProofData) -> Node {
    let mut node = *subtree;
    let mut index = proof.index;
    for sibling in &proof.path {
        node = if index & 1 == 0 {
            truncated_hash(&node, sibling)
        } else {
            truncated_hash(sibling, &node)
        };
        index >>= 1;
    }
    node
}
