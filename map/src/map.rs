use std::{borrow::Borrow, fmt, hash::BuildHasher, iter::FusedIterator, sync::Arc};

use imbl_sized_chunks::SparseChunk;
use serde::Serialize;

use crate::{
    digest::{digest, DefaultDigest},
    encode::KeyTypeError,
};

/// Fan-out of the branch nodes.
pub const BUCKET_COUNT: usize = 8;
/// Number of branch levels between the root and the leaves.
pub const LEVELS: u32 = 4;
/// Number of collision lists held by a leaf.
pub const LEAF_COUNT: usize = 8;
/// Number of distinct collision lists a map can address. Keys beyond that
/// share lists; the trie never grows deeper.
pub const CAPACITY: usize = BUCKET_COUNT.pow(LEVELS) * LEAF_COUNT;

// A list this long means the digest is doing a poor job of spreading keys.
const LONG_LIST: usize = 16;

type Entries<K, V> = Vec<(K, V)>;

// The trie has a fixed shape: `LEVELS` levels of branches, then leaves. A
// node's level is therefore known from the path, and the two variants are
// never mixed at the same level.
//
// Slots are sparse, and empty nodes and lists are pruned, so every node that
// exists has at least one entry below it.
#[derive(Clone)]
enum Node<K, V> {
    Branch {
        children: SparseChunk<Arc<Node<K, V>>, BUCKET_COUNT>,
    },
    Leaf {
        lists: SparseChunk<Arc<Entries<K, V>>, LEAF_COUNT>,
    },
}

/// The base-8 digits of a digest, least significant first. Each level of the
/// trie consumes one.
#[derive(Clone, Copy)]
struct Digits(u32);

impl Digits {
    fn next(&mut self) -> usize {
        let digit = self.0 % BUCKET_COUNT as u32;
        self.0 /= BUCKET_COUNT as u32;
        digit as usize
    }
}

fn same_key<K, Q>(k: &K, key: &Q) -> bool
where
    K: Borrow<Q>,
    Q: PartialEq + ?Sized,
{
    k.borrow() == key
}

impl<K, V> Node<K, V> {
    /// An empty node for level `level`, where the root is at level zero.
    fn empty(level: u32) -> Self {
        if level < LEVELS {
            Node::Branch {
                children: SparseChunk::new(),
            }
        } else {
            Node::Leaf {
                lists: SparseChunk::new(),
            }
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Node::Branch { children } => children.is_empty(),
            Node::Leaf { lists } => lists.is_empty(),
        }
    }

    fn get<Q>(&self, mut digits: Digits, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        match self {
            Node::Branch { children } => children
                .get(digits.next())
                .and_then(|child| child.get(digits, key)),
            Node::Leaf { lists } => lists
                .get(digits.next())?
                .iter()
                .find(|(k, _)| same_key(k, key))
                .map(|(_, v)| v),
        }
    }
}

impl<K: Clone + PartialEq, V: Clone> Node<K, V> {
    /// Inserts `key` below this node, which sits at `level`. Returns the
    /// value `key` had before, if any.
    ///
    /// Nodes and lists on the path that are shared with another version are
    /// copied by `Arc::make_mut` before being modified.
    fn insert(&mut self, level: u32, mut digits: Digits, key: K, value: V) -> Option<V> {
        let idx = digits.next();
        match self {
            Node::Branch { children } => {
                if children.get(idx).is_none() {
                    children.insert(idx, Arc::new(Node::empty(level + 1)));
                }
                Arc::make_mut(&mut children[idx]).insert(level + 1, digits, key, value)
            }
            Node::Leaf { lists } => {
                if lists.get(idx).is_none() {
                    lists.insert(idx, Arc::new(Vec::new()));
                }
                let list = Arc::make_mut(&mut lists[idx]);
                if let Some(pos) = list.iter().position(|(k, _)| *k == key) {
                    return Some(std::mem::replace(&mut list[pos].1, value));
                }

                list.push((key, value));
                if list.len() == LONG_LIST {
                    log::debug!(
                        "a map leaf list reached {LONG_LIST} entries, keys are poorly spread by the digest"
                    );
                }
                None
            }
        }
    }

    /// Removes `key` from below this node, pruning nodes and lists that
    /// become empty. Returns the removed entry.
    fn remove<Q>(&mut self, mut digits: Digits, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        let idx = digits.next();
        match self {
            Node::Branch { children } => {
                let child = children.get_mut(idx)?;
                let removed = Arc::make_mut(child).remove(digits, key);
                if child.is_empty() {
                    children.remove(idx);
                }
                removed
            }
            Node::Leaf { lists } => {
                let list = lists.get_mut(idx)?;
                let pos = list.iter().position(|(k, _)| same_key(k, key))?;
                let removed = Arc::make_mut(list).remove(pos);
                if list.is_empty() {
                    lists.remove(idx);
                }
                Some(removed)
            }
        }
    }
}

/// A persistent hash map.
///
/// Inserting into or removing from the map returns a new map and leaves the
/// original unchanged; the two share every part of the trie that the update
/// didn't touch. Cloning a map is `O(1)`.
///
/// Keys are located by the digest of their canonical byte encoding (see
/// [`encode`](crate::encode)), computed with the hasher builder `S` (see
/// [`digest`](crate::digest)), and compared with `PartialEq`. A key whose
/// type can't be encoded is a programming error: the operations taking a key
/// panic with a [`KeyTypeError`], and their `try_*` variants return it.
pub struct Map<K, V, S = DefaultDigest> {
    root: Option<Arc<Node<K, V>>>,
    size: usize,
    hasher: S,
}

impl<K, V> Map<K, V, DefaultDigest> {
    pub fn new() -> Self {
        Self::with_hasher(DefaultDigest::default())
    }
}

impl<K, V, S> Map<K, V, S> {
    /// Creates an empty map that will digest its keys with hashers built by
    /// `hasher`. Every map derived from this one uses the same builder.
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            root: None,
            size: 0,
            hasher,
        }
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    /// The number of entries in the map.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns an iterator over the entries of the map.
    ///
    /// The order is determined by the layout of the trie: it's the same every
    /// time a given map is traversed, but two maps with the same entries may
    /// order them differently.
    pub fn iter(&self) -> Iter<'_, K, V> {
        self.into_iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    /// Calls `visitor` on each entry of the map, in the order of
    /// [`Map::iter`], until it returns `false`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use immutable_map::Map;
    /// let m: Map<_, _> = (0..10).map(|i| (i, 2 * i)).collect();
    ///
    /// let mut visited = 0;
    /// m.range(|_, _| {
    ///     visited += 1;
    ///     visited < 3
    /// });
    /// assert_eq!(visited, 3);
    /// ```
    pub fn range<F>(&self, mut visitor: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        for (k, v) in self {
            if !visitor(k, v) {
                break;
            }
        }
    }
}

#[track_caller]
fn fatal<T>(result: Result<T, KeyTypeError>) -> T {
    match result {
        Ok(x) => x,
        Err(e) => panic!("{e}"),
    }
}

impl<K, V, S> Map<K, V, S>
where
    K: Serialize + PartialEq,
    S: BuildHasher,
{
    /// Gets the value associated with `key`.
    ///
    /// # Panics
    ///
    /// Panics if `key` can't be encoded.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use immutable_map::Map;
    /// let m = Map::new().insert("kawonka".to_owned(), 124);
    /// assert_eq!(m.get("kawonka"), Some(&124));
    /// assert_eq!(m.get("something"), None);
    /// ```
    #[track_caller]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Serialize + PartialEq + ?Sized,
    {
        fatal(self.try_get(key))
    }

    pub fn try_get<Q>(&self, key: &Q) -> Result<Option<&V>, KeyTypeError>
    where
        K: Borrow<Q>,
        Q: Serialize + PartialEq + ?Sized,
    {
        let digest = digest(&self.hasher, key)?;
        Ok(self
            .root
            .as_deref()
            .and_then(|root| root.get(Digits(digest), key)))
    }

    #[track_caller]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Serialize + PartialEq + ?Sized,
    {
        self.get(key).is_some()
    }
}

impl<K, V, S> Map<K, V, S>
where
    K: Serialize + PartialEq + Clone,
    V: Clone,
    S: BuildHasher,
{
    /// Inserts an entry in place, returning the value `key` had before.
    ///
    /// # Panics
    ///
    /// Panics if `key` can't be encoded.
    #[track_caller]
    pub fn insert_mut(&mut self, key: K, value: V) -> Option<V> {
        fatal(self.try_insert_mut(key, value))
    }

    pub fn try_insert_mut(&mut self, key: K, value: V) -> Result<Option<V>, KeyTypeError> {
        let digest = digest(&self.hasher, &key)?;
        let root = self
            .root
            .get_or_insert_with(|| Arc::new(Node::empty(0)));
        let old = Arc::make_mut(root).insert(0, Digits(digest), key, value);
        if old.is_none() {
            self.size += 1;
        }
        Ok(old)
    }

    /// Removes an entry in place, returning its value.
    ///
    /// # Panics
    ///
    /// Panics if `key` can't be encoded.
    #[track_caller]
    pub fn remove_mut<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Serialize + PartialEq + ?Sized,
    {
        fatal(self.try_remove_mut(key))
    }

    pub fn try_remove_mut<Q>(&mut self, key: &Q) -> Result<Option<V>, KeyTypeError>
    where
        K: Borrow<Q>,
        Q: Serialize + PartialEq + ?Sized,
    {
        let digest = digest(&self.hasher, key)?;
        let Some(root) = self.root.as_mut() else {
            return Ok(None);
        };
        // Look before copying anything, so that removing a missing key leaves
        // the trie exactly as it was.
        if root.get(Digits(digest), key).is_none() {
            return Ok(None);
        }

        let removed = Arc::make_mut(root).remove(Digits(digest), key);
        if root.is_empty() {
            self.root = None;
        }
        if removed.is_some() {
            self.size -= 1;
        }
        Ok(removed.map(|(_, v)| v))
    }
}

impl<K, V, S> Map<K, V, S>
where
    K: Serialize + PartialEq + Clone,
    V: Clone,
    S: BuildHasher + Clone,
{
    /// Returns a map with `key` associated to `value`, replacing any previous
    /// value for `key`.
    ///
    /// # Panics
    ///
    /// Panics if `key` can't be encoded.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use immutable_map::Map;
    /// let m = Map::new().insert("x", 1);
    /// let m2 = m.insert("x", 2);
    /// assert_eq!(m.get("x"), Some(&1));
    /// assert_eq!(m2.get("x"), Some(&2));
    /// ```
    #[track_caller]
    pub fn insert(&self, key: K, value: V) -> Self {
        fatal(self.try_insert(key, value))
    }

    pub fn try_insert(&self, key: K, value: V) -> Result<Self, KeyTypeError> {
        let mut ret = self.clone();
        ret.try_insert_mut(key, value)?;
        Ok(ret)
    }

    /// Returns a map without the entry for `key`. If there is no such entry,
    /// returns a copy of this map that shares all of its trie.
    ///
    /// # Panics
    ///
    /// Panics if `key` can't be encoded.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use immutable_map::Map;
    /// let m = Map::new().insert(9876, 1234).insert(42, 0);
    /// let d = m.remove(&42);
    /// assert_eq!(d.get(&42), None);
    /// assert_eq!(m.get(&42), Some(&0));
    /// assert_eq!(d.len(), 1);
    /// ```
    #[track_caller]
    pub fn remove<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Serialize + PartialEq + ?Sized,
    {
        fatal(self.try_remove(key))
    }

    pub fn try_remove<Q>(&self, key: &Q) -> Result<Self, KeyTypeError>
    where
        K: Borrow<Q>,
        Q: Serialize + PartialEq + ?Sized,
    {
        let mut ret = self.clone();
        ret.try_remove_mut(key)?;
        Ok(ret)
    }
}

/// An iterator over the entries of a [`Map`].
pub struct Iter<'a, K, V> {
    // The nodes on the path to the current list, each with the next slot to
    // visit.
    stack: Vec<(&'a Node<K, V>, usize)>,
    entries: std::slice::Iter<'a, (K, V)>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((k, v)) = self.entries.next() {
                self.remaining -= 1;
                return Some((k, v));
            }

            let (node, next_slot) = self.stack.last_mut()?;
            let node: &'a Node<K, V> = *node;
            match node {
                Node::Branch { children } => {
                    let found = (*next_slot..BUCKET_COUNT)
                        .find_map(|idx| children.get(idx).map(|child| (idx, child)));
                    match found {
                        Some((idx, child)) => {
                            *next_slot = idx + 1;
                            self.stack.push((&**child, 0));
                        }
                        None => {
                            self.stack.pop();
                        }
                    }
                }
                Node::Leaf { lists } => {
                    let found = (*next_slot..LEAF_COUNT)
                        .find_map(|idx| lists.get(idx).map(|list| (idx, list)));
                    match found {
                        Some((idx, list)) => {
                            *next_slot = idx + 1;
                            self.entries = list.iter();
                        }
                        None => {
                            self.stack.pop();
                        }
                    }
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> FusedIterator for Iter<'_, K, V> {}

impl<'a, K, V, S> IntoIterator for &'a Map<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        Iter {
            stack: self.root.iter().map(|root| (&**root, 0)).collect(),
            entries: [].iter(),
            remaining: self.size,
        }
    }
}

impl<K, V, S> Extend<(K, V)> for Map<K, V, S>
where
    K: Serialize + PartialEq + Clone,
    V: Clone,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert_mut(k, v);
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for Map<K, V, S>
where
    K: Serialize + PartialEq + Clone,
    V: Clone,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ret = Map::with_hasher(S::default());
        ret.extend(iter);
        ret
    }
}

// Cloning only bumps the root's reference count.
impl<K, V, S: Clone> Clone for Map<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            size: self.size,
            hasher: self.hasher.clone(),
        }
    }
}

impl<K, V, S: Default> Default for Map<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for Map<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::hash::{BuildHasherDefault, Hasher};

    use super::*;

    // Uses the key's encoding as its digest, so that tests can place keys in
    // the trie on purpose. Only meant for integer keys of at most 8 bytes.
    #[derive(Default)]
    struct Identity(u64);

    impl Hasher for Identity {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            for (i, &b) in bytes.iter().enumerate() {
                self.0 |= u64::from(b) << (8 * i);
            }
        }
    }

    type IdentityMap<V> = Map<u32, V, BuildHasherDefault<Identity>>;

    fn root_child<K, V, S>(m: &Map<K, V, S>, idx: usize) -> Option<&Arc<Node<K, V>>> {
        match m.root.as_deref()? {
            Node::Branch { children } => children.get(idx),
            Node::Leaf { .. } => unreachable!(),
        }
    }

    #[test]
    fn capacity() {
        assert_eq!(CAPACITY, 32768);
    }

    #[test]
    fn digits() {
        let mut digits = Digits(0o54321);
        assert_eq!(digits.next(), 1);
        assert_eq!(digits.next(), 2);
        assert_eq!(digits.next(), 3);
        assert_eq!(digits.next(), 4);
        assert_eq!(digits.next(), 5);
        assert_eq!(digits.next(), 0);
    }

    #[test]
    fn insert_shares_untouched_subtrees() {
        let m = IdentityMap::default().insert(0, "a");
        // 1 differs from 0 in the first digit, so it lands in another child of
        // the root.
        let m2 = m.insert(1, "b");

        assert!(Arc::ptr_eq(
            root_child(&m, 0).unwrap(),
            root_child(&m2, 0).unwrap()
        ));
        assert!(root_child(&m, 1).is_none());
        assert!(root_child(&m2, 1).is_some());

        // 8 shares its first digit with 0, so the root's first child is copied.
        let m3 = m2.insert(8, "c");
        assert!(!Arc::ptr_eq(
            root_child(&m2, 0).unwrap(),
            root_child(&m3, 0).unwrap()
        ));
        assert!(Arc::ptr_eq(
            root_child(&m2, 1).unwrap(),
            root_child(&m3, 1).unwrap()
        ));
    }

    #[test]
    fn removing_missing_key_shares_everything() {
        let m = IdentityMap::default().insert(0, "a").insert(1, "b");
        let same = m.remove(&2);
        assert!(Arc::ptr_eq(m.root.as_ref().unwrap(), same.root.as_ref().unwrap()));
        assert_eq!(same.len(), 2);

        // 8 follows the same path as 0 until the last digit.
        let same = m.remove(&8);
        assert!(Arc::ptr_eq(m.root.as_ref().unwrap(), same.root.as_ref().unwrap()));
    }

    #[test]
    fn collisions() {
        // Digests that agree on the low 15 bits share a list.
        let keys = [0, CAPACITY as u32, 2 * CAPACITY as u32, 3 * CAPACITY as u32];
        let mut m = IdentityMap::default();
        for (i, k) in keys.iter().enumerate() {
            m.insert_mut(*k, i);
        }
        assert_eq!(m.len(), 4);
        assert_eq!(m.iter().map(|(k, _)| *k).collect::<Vec<_>>(), keys);

        // Overwriting keeps the entry in place.
        let m2 = m.insert(keys[1], 10);
        assert_eq!(m2.len(), 4);
        assert_eq!(
            m2.iter().map(|(k, v)| (*k, *v)).collect::<Vec<_>>(),
            vec![(keys[0], 0), (keys[1], 10), (keys[2], 2), (keys[3], 3)]
        );
        assert_eq!(m.get(&keys[1]), Some(&1));

        // Removing keeps the others in order.
        let m3 = m2.remove(&keys[1]);
        assert_eq!(
            m3.iter().map(|(k, _)| *k).collect::<Vec<_>>(),
            vec![keys[0], keys[2], keys[3]]
        );
        assert_eq!(m3.get(&keys[1]), None);
        assert_eq!(m2.get(&keys[1]), Some(&10));
    }

    #[test]
    fn empty_nodes_are_pruned() {
        let m = IdentityMap::default().insert(0, ()).insert(1, ());
        let m2 = m.remove(&1);
        assert!(root_child(&m2, 1).is_none());
        assert!(root_child(&m2, 0).is_some());

        let empty = m2.remove(&0);
        assert!(empty.root.is_none());
        assert!(empty.is_empty());
        assert_eq!(empty.iter().count(), 0);
    }

    #[test]
    fn iteration_order_follows_digits() {
        let m: IdentityMap<()> = [9, 1, 0, 8, 2].into_iter().map(|k| (k, ())).collect();
        // Ordered by first digit, then second digit, and so on.
        assert_eq!(
            m.keys().copied().collect::<Vec<_>>(),
            vec![0, 8, 1, 9, 2]
        );
    }

    #[test]
    fn iter_len() {
        let m: Map<u32, u32> = (0..100).map(|i| (i, i)).collect();
        let mut iter = m.iter();
        assert_eq!(iter.len(), 100);
        iter.next();
        assert_eq!(iter.len(), 99);
        assert_eq!(iter.count(), 99);
    }
}
