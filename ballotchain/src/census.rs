use crate::hash::keccak256;
use crate::serde_hex::Hex as _;
use serde::{Deserialize, Serialize};

/// A census membership proof: the voter's census key together with the
/// sibling path up to the census root. Pairs are hashed in sorted order so
/// the proof carries no direction bits.
///
/// The census tree itself is produced and gossiped outside the node; this
/// is the verification contract the transaction validator consumes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CensusProof {
    #[serde(with = "crate::serde_hex::HexForm")]
    pub key: Vec<u8>,
    pub siblings: Vec<[u8; 32]>,
}

impl CensusProof {
    /// Verify the proof against a census root
    pub fn verify(&self, root: &[u8; 32]) -> bool {
        let mut acc = keccak256(&self.key);
        for sibling in &self.siblings {
            acc = hash_pair(&acc, sibling);
        }
        acc == *root
    }
}

fn hash_pair(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    if a <= b {
        buf[..32].copy_from_slice(a);
        buf[32..].copy_from_slice(b);
    } else {
        buf[..32].copy_from_slice(b);
        buf[32..].copy_from_slice(a);
    }
    keccak256(&buf)
}

/// An in-memory census tree over member keys. Builds the same sorted-pair
/// keccak256 structure the proofs verify against.
#[derive(Default, Clone)]
pub struct CensusTree {
    leaves: Vec<(Vec<u8>, [u8; 32])>,
}

impl CensusTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_members<I, K>(members: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let mut tree = Self::new();
        for member in members {
            tree.add_member(member.as_ref());
        }
        tree
    }

    pub fn add_member(&mut self, key: &[u8]) {
        let leaf = keccak256(key);
        self.leaves.push((key.to_vec(), leaf));
        self.leaves.sort_by(|a, b| a.1.cmp(&b.1));
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn root(&self) -> [u8; 32] {
        if self.leaves.is_empty() {
            return [0u8; 32];
        }
        let mut level: Vec<[u8; 32]> = self.leaves.iter().map(|(_, h)| *h).collect();
        while level.len() > 1 {
            level = fold_level(&level);
        }
        level[0]
    }

    /// Produce a membership proof for `key`, or None if it is not a member
    pub fn prove(&self, key: &[u8]) -> Option<CensusProof> {
        let mut index = self.leaves.iter().position(|(k, _)| k == key)?;
        let mut level: Vec<[u8; 32]> = self.leaves.iter().map(|(_, h)| *h).collect();
        let mut siblings = Vec::new();
        while level.len() > 1 {
            let sibling = if index % 2 == 0 {
                // last node of an odd level pairs with itself
                *level.get(index + 1).unwrap_or(&level[index])
            } else {
                level[index - 1]
            };
            siblings.push(sibling);
            level = fold_level(&level);
            index /= 2;
        }
        Some(CensusProof {
            key: key.to_vec(),
            siblings,
        })
    }
}

fn fold_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    let mut next = Vec::with_capacity(level.len().div_ceil(2));
    let mut i = 0;
    while i < level.len() {
        let a = &level[i];
        let b = level.get(i + 1).unwrap_or(a);
        next.push(hash_pair(a, b));
        i += 2;
    }
    next
}
