//! The hashing primitive behind the map: canonical key bytes in, 32-bit
//! digest out.
//!
//! Any [`BuildHasher`] can be used. The builder is configuration that is
//! handed to a map once, with [`Map::with_hasher`](crate::Map::with_hasher),
//! and then travels with every version derived from that map, so all of them
//! agree on where a key lives. Digests are only guaranteed to be stable for a
//! given builder within one process.
//!
//! [`DefaultDigest`] picks the builder used by [`Map::new`](crate::Map::new):
//! by default it's the standard library's randomly seeded SipHash, which
//! resists hash flooding. With the `cheaphash` feature it's FNV, which is
//! faster and deterministic.

use std::hash::{BuildHasher, Hasher};

use serde::Serialize;

use crate::encode::{encode_into, KeyTypeError};

#[cfg(not(feature = "cheaphash"))]
pub type DefaultDigest = std::collections::hash_map::RandomState;

#[cfg(feature = "cheaphash")]
pub type DefaultDigest = fnv::FnvBuildHasher;

/// Computes the digest of `key` with a hasher built by `builder`.
///
/// Fails if the key can't be encoded, in which case nothing was hashed.
pub fn digest<K, S>(builder: &S, key: &K) -> Result<u32, KeyTypeError>
where
    K: Serialize + ?Sized,
    S: BuildHasher,
{
    let mut hasher = builder.build_hasher();
    encode_into(key, &mut hasher)?;
    // Truncating keeps the low bits, which are the ones the trie consumes
    // first.
    Ok(hasher.finish() as u32)
}
