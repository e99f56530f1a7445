//! A sparse persistent vector.
//!
//! [`Vector`] is a bit-partitioned vector trie with cheap clones and
//! copy-on-write updates: [`Vector::set`], [`Vector::append`],
//! [`Vector::resize`] and [`Vector::slice`] return a new vector and leave the
//! original untouched. The new version shares every subtree it didn't modify
//! with the old one, so an update costs `O(log n)` allocations rather than a
//! full copy.
//!
//! Unlike most vectors, the addressable size is decoupled from what has been
//! written. Growing a vector with [`Vector::resize`] allocates nothing; slots
//! that were never written read as `None`:
//!
//! ```rust
//! # use immutable_vector::Vector;
//! let a: Vector<&str> = Vector::new().resize(4711);
//! let b = a.set(1000, "hallå!");
//!
//! assert_eq!(a.get(1000), None);
//! assert_eq!(b.get(1000), Some(&"hallå!"));
//! assert_eq!(b.get(999), None);
//! ```
//!
//! Nodes are shared through [`std::sync::Arc`], and a node that is reachable
//! from another version is never modified. Any number of threads can
//! therefore read any number of versions without locking. Replacing "the
//! current version" in a location that other threads read is not atomic,
//! though: use a `Mutex`, an `RwLock` or a channel for that.

pub mod error;
pub mod vector;

pub use error::BoundsError;
pub use vector::{Iter, Vector};

/// Number of index bits consumed by each level of the trie.
pub const BUCKET_BITS: u32 = 5;
/// Branching factor of the trie.
pub const BUCKET_SIZE: usize = 1 << BUCKET_BITS;
