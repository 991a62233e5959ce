use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display};

use crate::ExecutionId;

/// Inclusion proof for one execution's content in the transparency log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MerkleProof {
    #[serde(alias = "root_hash", alias = "root")]
    pub merkle_root: String,
    #[serde(default)]
    pub leaf_hash: Option<String>,
    #[serde(default)]
    pub leaf_index: Option<u64>,
    #[serde(default)]
    pub siblings: Vec<String>,
    /// `true` when the sibling at the same position sits to the right.
    #[serde(default)]
    pub directions: Vec<bool>,
}

pub fn hash_leaf(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn hash_pair(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hex::encode(hasher.finalize())
}

impl MerkleProof {
    pub fn has_path(&self) -> bool {
        self.leaf_hash.is_some()
    }

    /// Walks the sibling path from the leaf. Returns `None` when the proof
    /// carries no leaf or the path is malformed.
    pub fn recompute_root(&self) -> Option<String> {
        let leaf = self.leaf_hash.as_ref()?;
        if self.siblings.len() != self.directions.len() {
            return None;
        }
        let root = self
            .siblings
            .iter()
            .zip(&self.directions)
            .fold(leaf.clone(), |current, (sibling, sibling_on_right)| {
                if *sibling_on_right {
                    hash_pair(&current, sibling)
                } else {
                    hash_pair(sibling, &current)
                }
            });
        Some(root)
    }

    /// A proof without a leaf can only be compared against the published
    /// root; one with a leaf must also reproduce its own root.
    pub fn path_is_consistent(&self) -> bool {
        if !self.has_path() {
            return true;
        }
        self.recompute_root()
            .is_some_and(|root| root.eq_ignore_ascii_case(&self.merkle_root))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransparencyRoot {
    #[serde(alias = "merkle_root", alias = "root_hash")]
    pub root: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProofStatus {
    Verified,
    Mismatched,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProofCheck {
    pub execution_id: ExecutionId,
    pub status: ProofStatus,
    pub proof_root: Option<String>,
    pub published_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
