//! BLAKE3-based 128-bit hashing for group keys
//!
//! Group column values of any type are folded to a collision-resistant
//! 128-bit key used by the content cache, the sequence caches, the FIFO
//! insert cache and the per-group advisory lock id. The hash is keyed by
//! a fixed derivation context so group keys never collide with other
//! blake3 uses in the host process. The birthday bound on 128 bits
//! (~2^64) makes collisions negligible for any realistic table.

use crate::types::value::Value;
use serde::{Deserialize, Serialize};

/// 128-bit group hash stored as two 64-bit halves.
///
/// Equality is bit-for-bit on the halves. The all-zero hash is reserved
/// for a NULL group value or a table without a group-by column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupHash {
    /// First 64 bits of the BLAKE3 output
    pub h1: u64,
    /// Second 64 bits of the BLAKE3 output
    pub h2: u64,
}

impl GroupHash {
    /// The fixed hash for a NULL / absent group.
    pub const ZERO: GroupHash = GroupHash { h1: 0, h2: 0 };

    /// Compute the 128-bit hash of a group value.
    ///
    /// Pass-by-value types are hashed over the raw bits of their canonical
    /// representation; variable-length types over their flat byte content.
    /// NULL yields the fixed all-zero hash.
    pub fn of(value: &Value) -> GroupHash {
        let mut hasher = blake3::Hasher::new_derive_key("patchstore group hash v1");
        match value {
            Value::Null => return GroupHash::ZERO,
            Value::Bool(b) => {
                hasher.update(&[u8::from(*b)]);
            }
            Value::Int(i) => {
                hasher.update(&i.to_le_bytes());
            }
            Value::Float(f) => {
                hasher.update(&f.to_bits().to_le_bytes());
            }
            Value::Text(s) => {
                hasher.update(s.as_bytes());
            }
            Value::Bytes(b) => {
                hasher.update(b);
            }
        }
        let mut output = [0u8; 16];
        hasher.finalize_xof().fill(&mut output);
        GroupHash {
            h1: u64::from_le_bytes(output[0..8].try_into().unwrap()),
            h2: u64::from_le_bytes(output[8..16].try_into().unwrap()),
        }
    }

    /// Fold the hash to a 32-bit probe start index via FNV-1a.
    ///
    /// The halves already carry 128 bits of BLAKE3 output, so FNV-1a
    /// mixing gives excellent distribution for open-addressed tables.
    pub fn fold32(&self) -> u32 {
        let mut h: u32 = 2166136261;
        for part in [
            self.h1 as u32,
            (self.h1 >> 32) as u32,
            self.h2 as u32,
            (self.h2 >> 32) as u32,
        ] {
            h ^= part;
            h = h.wrapping_mul(16777619);
        }
        h
    }

    /// Render as lowercase hex (introspection output).
    pub fn to_hex(&self) -> String {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&self.h1.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.h2.to_le_bytes());
        hex::encode(bytes)
    }
}

/// Compute a 64-bit advisory lock id for a (table, group) pair.
///
/// Combines the table id with both hash halves so each group gets a
/// stable lock token; collisions within 2^63 events are negligible.
pub fn group_lock_id(table_id: u32, hash: GroupHash) -> u64 {
    let mut h = hash.h1;
    h ^= u64::from(table_id);
    h ^= hash.h2;
    h
}
