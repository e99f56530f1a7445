use std::{fmt, iter::FusedIterator, sync::Arc};

use imbl_sized_chunks::SparseChunk;

use crate::{
    error::{fatal, BoundsError, Result},
    BUCKET_BITS, BUCKET_SIZE,
};

const BUCKET_MASK: usize = BUCKET_SIZE - 1;

type Values<T> = SparseChunk<T, BUCKET_SIZE>;
type Children<T> = SparseChunk<Arc<Node<T>>, BUCKET_SIZE>;

// Since we always know (based on the tree height) which kind of node we
// expect, the two variants are never mixed at the same level: nodes at height
// zero hold values and every other node holds children.
//
// Both arrays are sparse. A missing child is a subtree that was never
// written, and a missing value is a slot that was never written; both read as
// `None`. This is what makes growing the vector free.
#[derive(Clone)]
enum Node<T> {
    Leaf { values: Values<T> },
    Interior { children: Children<T> },
}

/// `pos` is the absolute position into the root node, and we are some
/// possibly-intermediate node at height `height` (where the leaf is at height
/// zero). Which of our children does the position belong to?
fn extract_index(pos: usize, height: u8) -> usize {
    (pos >> (BUCKET_BITS * u32::from(height))) & BUCKET_MASK
}

impl<T> Node<T> {
    fn empty(height: u8) -> Self {
        if height == 0 {
            Node::Leaf {
                values: SparseChunk::new(),
            }
        } else {
            Node::Interior {
                children: SparseChunk::new(),
            }
        }
    }

    /// If this node is at height `height`, find the leaf that holds `pos`.
    /// Returns `None` if that part of the tree was never allocated.
    fn leaf(&self, height: u8, pos: usize) -> Option<&Values<T>> {
        match self {
            Node::Leaf { values } => {
                debug_assert_eq!(height, 0);
                Some(values)
            }
            Node::Interior { children } => children
                .get(extract_index(pos, height))
                .and_then(|child| child.leaf(height - 1, pos)),
        }
    }

    fn check_height(&self, height: u8) {
        match self {
            Node::Leaf { .. } => assert_eq!(height, 0),
            Node::Interior { children } => {
                assert!(height > 0);
                for idx in 0..BUCKET_SIZE {
                    if let Some(child) = children.get(idx) {
                        child.check_height(height - 1);
                    }
                }
            }
        }
    }
}

impl<T: Clone> Node<T> {
    /// Write `elt` at position `pos`, allocating missing nodes on the way down.
    ///
    /// Every node on the path that is shared with another version gets copied
    /// (by `Arc::make_mut`) before being modified; the siblings of the path
    /// are shared by the copy.
    fn set(&mut self, height: u8, pos: usize, elt: T) {
        match self {
            Node::Leaf { values } => {
                debug_assert_eq!(height, 0);
                values.insert(pos & BUCKET_MASK, elt);
            }
            Node::Interior { children } => {
                assert!(height >= 1);
                let bucket_idx = extract_index(pos, height);
                if children.get(bucket_idx).is_none() {
                    children.insert(bucket_idx, Arc::new(Node::empty(height - 1)));
                }
                Arc::make_mut(&mut children[bucket_idx]).set(height - 1, pos, elt);
            }
        }
    }
}

/// A sparse persistent vector.
///
/// The addressable part of the vector is the range `0..size()`. Positions in
/// that range that were never written read as `None`. Accessing a position
/// outside of it is a programming error: [`Vector::get`] and
/// [`Vector::set`] panic, and [`Vector::try_get`] and [`Vector::try_set`]
/// return a [`BoundsError`].
pub struct Vector<T> {
    root: Option<Arc<Node<T>>>,
    // Number of addressable elements.
    size: usize,
    // Position in the trie of our first element. Slicing just moves this.
    offset: usize,
    // The trie holds BUCKET_SIZE^depth positions. Zero for a vector that
    // never had any capacity.
    depth: u8,
}

impl<T> Vector<T> {
    pub fn new() -> Self {
        Self {
            root: None,
            size: 0,
            offset: 0,
            depth: 0,
        }
    }

    /// The number of addressable elements.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use immutable_vector::Vector;
    /// let v: Vector<u8> = Vector::new().resize(40);
    /// assert_eq!(v.size(), 40);
    /// ```
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The number of positions the underlying trie can address without
    /// growing. Always at least `size()`.
    pub fn capacity(&self) -> usize {
        if self.depth == 0 {
            0
        } else {
            BUCKET_SIZE
                .checked_pow(u32::from(self.depth))
                .unwrap_or(usize::MAX)
        }
    }

    /// The number of levels in the underlying trie.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    fn leaf(&self, pos: usize) -> Option<&Values<T>> {
        // A vector with a root always has a depth of at least one.
        self.root.as_deref()?.leaf(self.depth - 1, pos)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.size {
            Ok(())
        } else {
            Err(BoundsError::Index {
                index,
                size: self.size,
            })
        }
    }

    /// Gets the element at `index`, or `None` if that position was never
    /// written.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.size()`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use immutable_vector::Vector;
    /// let v: Vector<_> = ["a", "b"].into_iter().collect();
    /// assert_eq!(v.get(1), Some(&"b"));
    /// assert_eq!(v.resize(3).get(2), None);
    /// ```
    #[track_caller]
    pub fn get(&self, index: usize) -> Option<&T> {
        fatal(self.try_get(index))
    }

    /// Like [`Vector::get`], but returns an error instead of panicking when
    /// `index` is out of bounds.
    pub fn try_get(&self, index: usize) -> Result<Option<&T>> {
        self.check_index(index)?;
        let pos = self.offset + index;
        Ok(self
            .leaf(pos)
            .and_then(|values| values.get(pos & BUCKET_MASK)))
    }

    // Wraps the current root as the first child of a new root. The positions
    // addressed by the old trie keep their low-order bits, and their new
    // top-level digit is zero, so nothing needs to move.
    fn add_level(&mut self) {
        log::trace!(
            "growing vector trie from depth {} to {}",
            self.depth,
            self.depth + 1
        );
        if let Some(old_root) = self.root.take() {
            let mut children = SparseChunk::new();
            children.insert(0, old_root);
            self.root = Some(Arc::new(Node::Interior { children }));
        }
        self.depth += 1;
    }

    /// Changes the number of addressable elements in place. See
    /// [`Vector::resize`].
    #[track_caller]
    pub fn resize_mut(&mut self, size: usize) {
        fatal(self.try_resize_mut(size))
    }

    pub fn try_resize_mut(&mut self, size: usize) -> Result<()> {
        if size == 0 {
            self.offset = 0;
        }
        let needed = self
            .offset
            .checked_add(size)
            .ok_or(BoundsError::CapacityOverflow {
                offset: self.offset,
                size,
            })?;
        while self.capacity() < needed {
            self.add_level();
        }
        self.size = size;
        Ok(())
    }

    /// Returns a vector with `size` addressable elements.
    ///
    /// Growing never allocates elements: the new positions read as whatever
    /// the backing trie holds there, which is `None` for positions that were
    /// never written. Shrinking only hides elements, it doesn't drop them, so
    /// growing again makes them visible again. Resizing to zero also forgets
    /// the offset left behind by [`Vector::slice`].
    ///
    /// Runs in `O(log size)` time.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use immutable_vector::Vector;
    /// let v: Vector<u32> = (0..10).collect();
    /// let short = v.resize(2);
    /// assert_eq!(short.size(), 2);
    /// assert_eq!(short.resize(10).get(9), Some(&9));
    /// ```
    #[track_caller]
    pub fn resize(&self, size: usize) -> Self {
        fatal(self.try_resize(size))
    }

    pub fn try_resize(&self, size: usize) -> Result<Self> {
        let mut ret = self.clone();
        ret.try_resize_mut(size)?;
        Ok(ret)
    }

    /// Returns the elements from index `start` (inclusive) to index `end`
    /// (exclusive), sharing this vector's storage.
    ///
    /// `end` is clamped to `self.size()`. If the resulting range is empty,
    /// returns an empty vector.
    ///
    /// Runs in `O(1)` time.
    ///
    /// # Panics
    ///
    /// Panics if `end < start`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use immutable_vector::Vector;
    /// let v: Vector<u32> = (0..6).collect();
    /// let s = v.slice(1, 5);
    /// assert_eq!(s.get(0), Some(&1));
    /// assert_eq!(s.size(), 4);
    /// assert_eq!(v.slice(4, 100).size(), 2);
    /// assert!(v.slice(7, 9).is_empty());
    /// ```
    #[track_caller]
    pub fn slice(&self, start: usize, end: usize) -> Self {
        fatal(self.try_slice(start, end))
    }

    pub fn try_slice(&self, start: usize, end: usize) -> Result<Self> {
        if end < start {
            return Err(BoundsError::Range { start, end });
        }
        if end == start || start >= self.size {
            return Ok(Self::new());
        }

        let end = end.min(self.size);
        Ok(Self {
            root: self.root.clone(),
            size: end - start,
            offset: self.offset + start,
            depth: self.depth,
        })
    }

    /// Returns an iterator over all addressable positions, yielding `None`
    /// for the ones that were never written.
    pub fn iter(&self) -> Iter<'_, T> {
        self.into_iter()
    }

    /// Panics if the shape of the trie disagrees with the recorded depth, or
    /// if the addressable range doesn't fit in the trie.
    pub fn check_invariants(&self) {
        assert!(self.offset + self.size <= self.capacity());
        if self.size == 0 {
            assert_eq!(self.offset, 0);
        }
        if let Some(root) = &self.root {
            assert!(self.depth >= 1);
            root.check_height(self.depth - 1);
        }
    }
}

impl<T: Clone> Vector<T> {
    /// Overwrites the element at `index` in place. See [`Vector::set`].
    #[track_caller]
    pub fn set_mut(&mut self, index: usize, elt: T) {
        fatal(self.try_set_mut(index, elt))
    }

    pub fn try_set_mut(&mut self, index: usize, elt: T) -> Result<()> {
        self.check_index(index)?;
        // A non-empty vector has a depth of at least one.
        let height = self.depth - 1;
        let pos = self.offset + index;
        let root = self
            .root
            .get_or_insert_with(|| Arc::new(Node::empty(height)));
        Arc::make_mut(root).set(height, pos, elt);
        Ok(())
    }

    /// Returns a vector with the element at `index` replaced by `elt`.
    ///
    /// Only the nodes on the path to `index` are copied; the rest of the trie
    /// is shared with `self`, which is left unchanged.
    ///
    /// Runs in `O(log size)` time.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.size()`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use immutable_vector::Vector;
    /// let v: Vector<&str> = Vector::new().resize(40);
    /// let w = v.set(35, "z");
    /// assert_eq!(v.get(35), None);
    /// assert_eq!(w.get(35), Some(&"z"));
    /// ```
    #[track_caller]
    pub fn set(&self, index: usize, elt: T) -> Self {
        fatal(self.try_set(index, elt))
    }

    pub fn try_set(&self, index: usize, elt: T) -> Result<Self> {
        let mut ret = self.clone();
        ret.try_set_mut(index, elt)?;
        Ok(ret)
    }

    /// Adds an element to the end of this vector, in place.
    pub fn append_mut(&mut self, elt: T) {
        let index = self.size;
        self.resize_mut(index + 1);
        self.set_mut(index, elt);
    }

    /// Returns a vector with `elt` added to the end.
    ///
    /// Runs in time complexity `O(log n)` where `n` is the vector size.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use immutable_vector::Vector;
    /// let v = Vector::new().append(1).append(2);
    /// assert_eq!(v.size(), 2);
    /// assert_eq!(v.get(1), Some(&2));
    /// ```
    pub fn append(&self, elt: T) -> Self {
        let mut ret = self.clone();
        ret.append_mut(elt);
        ret
    }
}

/// An iterator over the addressable positions of a [`Vector`].
pub struct Iter<'a, T> {
    vector: &'a Vector<T>,
    next: usize,
    end: usize,
    // The leaf holding the last position we looked at, and the position of
    // its first slot. Caching it means we only descend the trie once per leaf.
    leaf: Option<&'a Values<T>>,
    leaf_start: Option<usize>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = Option<&'a T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }

        let pos = self.vector.offset + self.next;
        self.next += 1;

        let leaf_start = pos & !BUCKET_MASK;
        if self.leaf_start != Some(leaf_start) {
            self.leaf = self.vector.leaf(pos);
            self.leaf_start = Some(leaf_start);
        }
        Some(self.leaf.and_then(|values| values.get(pos & BUCKET_MASK)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        (remaining, Some(remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<T> FusedIterator for Iter<'_, T> {}

impl<'a, T> IntoIterator for &'a Vector<T> {
    type Item = Option<&'a T>;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        Iter {
            vector: self,
            next: 0,
            end: self.size,
            leaf: None,
            leaf_start: None,
        }
    }
}

impl<T: Clone> Extend<T> for Vector<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();
        if lower > 0 {
            // Grow once up front instead of once per level crossed.
            let size = self.size;
            self.resize_mut(size + lower);
            self.resize_mut(size);
        }
        for elt in iter {
            self.append_mut(elt);
        }
    }
}

impl<T: Clone> FromIterator<T> for Vector<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut ret = Vector::new();
        ret.extend(iter);
        ret
    }
}

// Cloning only bumps the root's reference count.
impl<T> Clone for Vector<T> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            size: self.size,
            offset: self.offset,
            depth: self.depth,
        }
    }
}

impl<T> Default for Vector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Vector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Vectors are equal if they have the same size and the same elements at the
/// same positions, regardless of how their tries are laid out.
impl<T: PartialEq> PartialEq for Vector<T> {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size && self.iter().eq(other.iter())
    }
}

impl<T: Eq> Eq for Vector<T> {}
