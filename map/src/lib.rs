//! A persistent hash map.
//!
//! [`Map`] is a fixed-depth hash trie: four levels of 8-way branches, then
//! leaves holding 8 collision lists each. Updates copy the path from the root
//! to the modified list and share everything else with the previous version:
//!
//! ```rust
//! # use immutable_map::Map;
//! let m = Map::new().insert("kawonka".to_owned(), 124);
//! let d = m.remove("kawonka");
//!
//! assert_eq!(m.get("kawonka"), Some(&124));
//! assert_eq!(d.get("kawonka"), None);
//! ```
//!
//! Keys only need [`serde::Serialize`] and [`PartialEq`]. They are encoded
//! into canonical bytes (see [`encode`]) and hashed with a pluggable
//! [`std::hash::BuildHasher`] (see [`digest`]). Keys that contain a
//! sequence, a map or a byte buffer are rejected with a [`KeyTypeError`].
//!
//! Like the vector, nodes are shared through [`std::sync::Arc`] and never
//! modified once reachable from more than one version, so maps can be read
//! from any number of threads without locking.

pub mod digest;
pub mod encode;
pub mod map;

pub use digest::DefaultDigest;
pub use encode::KeyTypeError;
pub use map::{Iter, Map, BUCKET_COUNT, CAPACITY, LEAF_COUNT, LEVELS};
