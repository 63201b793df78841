use fnv::FnvHasher;

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::data::Value;

/// The hash family used to assign tuples their stable lineage identity.
///
/// A tuple's identity is a hash of its value contents, not a generational id:
/// the same row always hashes the same way on every node.
pub trait RowHash {
    fn hash_row(&self, row: &[Value]) -> u64;
}

pub type SharedRowHash = Arc<dyn RowHash + Send + Sync>;

/// The default row hash, built on fnv.
#[derive(Debug, Default)]
pub struct FnvRowHash;

impl RowHash for FnvRowHash {
    fn hash_row(&self, row: &[Value]) -> u64 {
        let mut hasher = FnvHasher::default();
        for v in row {
            v.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// The 64-bit identity of a node, derived from its name.
pub fn node_id(name: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    hasher.finish()
}
