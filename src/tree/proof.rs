//! Proof material exchanged with verifiers

use serde::{Deserialize, Serialize};

/// A committed tree head: the trust anchor clients hold on to.
///
/// A root at size N is a pure function of leaves [0, N) and never changes
/// once N is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    /// Number of leaves committed
    pub size: u64,

    /// Root hash over leaves [0, size)
    #[serde(with = "hex_hash")]
    pub hash: [u8; 32],
}

/// Merkle audit path for one leaf, valid only for the exact
/// (leaf_index, tree_size) pair it was generated for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    /// Leaf index being proved
    pub leaf_index: u64,

    /// Tree size the proof is valid for
    pub tree_size: u64,

    /// Sibling hashes, leaf level first
    #[serde(with = "hex_path")]
    pub path: Vec<[u8; 32]>,
}

/// Proof that the tree at `old_size` is a prefix of the tree at `new_size`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyProof {
    /// Older tree size
    pub old_size: u64,

    /// Newer tree size
    pub new_size: u64,

    /// Minimal shared-node hash set
    #[serde(with = "hex_path")]
    pub path: Vec<[u8; 32]>,
}

mod hex_hash {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&hex::encode(hash))
        } else {
            s.serialize_bytes(hash)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let bytes = if d.is_human_readable() {
            let s = String::deserialize(d)?;
            hex::decode(&s).map_err(serde::de::Error::custom)?
        } else {
            Vec::<u8>::deserialize(d)?
        };
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32-byte hash"))
    }
}

mod hex_path {
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(path: &[[u8; 32]], s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(path.len()))?;
        for hash in path {
            seq.serialize_element(&hex::encode(hash))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<[u8; 32]>, D::Error> {
        let strings = Vec::<String>::deserialize(d)?;
        strings
            .into_iter()
            .map(|s| {
                hex::decode(&s)
                    .map_err(serde::de::Error::custom)
                    .and_then(|b| {
                        b.try_into()
                            .map_err(|_| serde::de::Error::custom("expected 32-byte hash"))
                    })
            })
            .collect()
    }
}
