//! Log entries and their canonical binary encodings
//!
//! The leaf encoding is what gets hashed into the tree, so it is fixed:
//! big-endian, length-prefixed, no optional fields. Secondary-structure
//! payloads (references, sorted-set members) ride inside the value bytes
//! with the same discipline.

use crate::error::{CoreError, CoreResult};
use crate::tree::hash;

/// Entry type tag, first byte of the leaf encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    /// Ordinary key-value write
    Put = 0x00,

    /// Named pointer to another entry
    Reference = 0x01,

    /// Sorted-set membership record
    ZAdd = 0x02,
}

impl EntryKind {
    /// Decode from the stored tag byte
    pub fn from_tag(tag: u8) -> CoreResult<Self> {
        match tag {
            0x00 => Ok(EntryKind::Put),
            0x01 => Ok(EntryKind::Reference),
            0x02 => Ok(EntryKind::ZAdd),
            other => Err(CoreError::MalformedEntry(format!(
                "unknown entry kind tag {other:#04x}"
            ))),
        }
    }
}

/// One immutable log entry. Created only by append; never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// 0-based log position, assigned once, never reused
    pub index: u64,

    /// Entry type tag
    pub kind: EntryKind,

    /// Key bytes
    pub key: Vec<u8>,

    /// Value bytes (payload encoding for Reference/ZAdd kinds)
    pub value: Vec<u8>,

    /// Assignment time, Unix nanoseconds
    pub timestamp: i64,
}

impl Entry {
    /// Canonical leaf encoding:
    /// `index ∥ kind ∥ timestamp ∥ key_len ∥ key ∥ value_len ∥ value`
    ///
    /// The index is part of the hashed bytes, binding each entry to its
    /// log position.
    #[must_use]
    pub fn leaf_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 1 + 8 + 4 + self.key.len() + 4 + self.value.len());
        buf.extend_from_slice(&self.index.to_be_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&(self.key.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.value);
        buf
    }

    /// Domain-separated hash of the leaf encoding
    #[must_use]
    pub fn leaf_hash(&self) -> [u8; 32] {
        hash::leaf_hash(&self.leaf_bytes())
    }
}

/// Value payload of a `Reference` entry: a provable pointer to another entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePayload {
    /// Log index of the target entry
    pub target_index: u64,

    /// Key of the target entry at append time
    pub target_key: Vec<u8>,
}

impl ReferencePayload {
    /// Encode as `target_index ∥ key_len ∥ key`
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 4 + self.target_key.len());
        buf.extend_from_slice(&self.target_index.to_be_bytes());
        buf.extend_from_slice(&(self.target_key.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.target_key);
        buf
    }

    /// Decode, rejecting truncated or oversized payloads
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < 12 {
            return Err(CoreError::MalformedEntry(
                "reference payload too short".into(),
            ));
        }
        let target_index = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let key_len = u32::from_be_bytes(bytes[8..12].try_into().unwrap()) as usize;
        if bytes.len() != 12 + key_len {
            return Err(CoreError::MalformedEntry(format!(
                "reference payload length {} does not match key length {key_len}",
                bytes.len()
            )));
        }
        Ok(Self {
            target_index,
            target_key: bytes[12..].to_vec(),
        })
    }
}

/// Value payload of a `ZAdd` entry: sorted-set membership for a target entry
#[derive(Debug, Clone, PartialEq)]
pub struct ZAddPayload {
    /// Sorted-set name
    pub set: Vec<u8>,

    /// Member score
    pub score: f64,

    /// Log index of the member entry
    pub target_index: u64,
}

impl ZAddPayload {
    /// Encode as `score_bits ∥ target_index ∥ set_len ∥ set`
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 8 + 4 + self.set.len());
        buf.extend_from_slice(&self.score.to_bits().to_be_bytes());
        buf.extend_from_slice(&self.target_index.to_be_bytes());
        buf.extend_from_slice(&(self.set.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.set);
        buf
    }

    /// Decode, rejecting truncated or oversized payloads
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < 20 {
            return Err(CoreError::MalformedEntry("zadd payload too short".into()));
        }
        let score = f64::from_bits(u64::from_be_bytes(bytes[0..8].try_into().unwrap()));
        let target_index = u64::from_be_bytes(bytes[8..16].try_into().unwrap());
        let set_len = u32::from_be_bytes(bytes[16..20].try_into().unwrap()) as usize;
        if bytes.len() != 20 + set_len {
            return Err(CoreError::MalformedEntry(format!(
                "zadd payload length {} does not match set length {set_len}",
                bytes.len()
            )));
        }
        Ok(Self {
            set: bytes[20..].to_vec(),
            score,
            target_index,
        })
    }
}

/// Map an f64 score to a u64 whose unsigned order matches numeric order,
/// negatives included. Used for the derived sorted-set index.
#[must_use]
pub fn score_to_ordered(score: f64) -> u64 {
    let bits = score.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

/// Inverse of [`score_to_ordered`]
#[must_use]
pub fn ordered_to_score(ordered: u64) -> f64 {
    if ordered & (1 << 63) != 0 {
        f64::from_bits(ordered & !(1 << 63))
    } else {
        f64::from_bits(!ordered)
    }
}
