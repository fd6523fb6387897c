use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer::{BufferPoolManager, Frame};
use crate::common::{Result, INVALID_PAGE_ID};

use super::btree_leaf_page::BTreeLeafPageRef;
use super::key::{IndexKey, IndexValue, KeyComparator};

/// Forward-only iterator over the leaf chain of a B+ tree.
///
/// The current leaf stays pinned while the iterator sits on it and is
/// released (clean) as the iterator advances past it or is dropped.
/// Invariant: whenever a leaf is held, the slot index is in range.
pub struct IndexIterator<K, V, C> {
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf: Option<Arc<Frame>>,
    index: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C> IndexIterator<K, V, C>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K>,
{
    /// Builds an iterator over a pinned leaf. A slot past the last entry
    /// is normalized forward onto the next leaf (or the end).
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf: Option<Arc<Frame>>,
        index: usize,
    ) -> Result<Self> {
        let mut iterator = Self {
            bpm,
            comparator,
            leaf,
            index,
            _marker: PhantomData,
        };
        iterator.normalize()?;
        Ok(iterator)
    }

    /// The past-the-end iterator: holds no page.
    pub(crate) fn end(bpm: Arc<BufferPoolManager>, comparator: C) -> Self {
        Self {
            bpm,
            comparator,
            leaf: None,
            index: 0,
            _marker: PhantomData,
        }
    }

    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }

    /// The entry under the cursor, without advancing.
    pub fn current(&self) -> Option<(K, V)> {
        let frame = self.leaf.as_ref()?;
        let data = frame.read_data();
        let leaf = BTreeLeafPageRef::<K, V>::new(&data[..]);
        Some(leaf.item_at(self.index))
    }

    /// Returns the entry under the cursor and moves past it, hopping to
    /// the next leaf (and releasing the finished one) at a leaf boundary.
    pub fn next(&mut self) -> Result<Option<(K, V)>> {
        let Some(item) = self.current() else {
            return Ok(None);
        };
        self.index += 1;
        self.normalize()?;
        Ok(Some(item))
    }

    /// Two iterators are equal when both are at the end or both sit on
    /// entries with equal keys.
    pub fn same_position(&self, other: &Self) -> bool {
        match (self.current(), other.current()) {
            (None, None) => true,
            (Some((a, _)), Some((b, _))) => self.comparator.compare(&a, &b) == Ordering::Equal,
            _ => false,
        }
    }

    /// Restores the index-in-range invariant, walking the sibling chain
    /// while the cursor sits past the current leaf's last entry. The next
    /// leaf is pinned before the finished one is released.
    fn normalize(&mut self) -> Result<()> {
        loop {
            let Some(frame) = self.leaf.as_ref() else {
                break;
            };

            let (size, next_page_id) = {
                let data = frame.read_data();
                let leaf = BTreeLeafPageRef::<K, V>::new(&data[..]);
                (leaf.size(), leaf.next_page_id())
            };
            if self.index < size {
                break;
            }

            let next_frame = if next_page_id == INVALID_PAGE_ID {
                None
            } else {
                Some(self.bpm.fetch_page(next_page_id)?)
            };

            let finished = frame.page_id();
            self.bpm.unpin_page(finished, false);
            self.leaf = next_frame;
            self.index = 0;
        }
        Ok(())
    }
}

impl<K, V, C> Iterator for IndexIterator<K, V, C>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K>,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match IndexIterator::next(self) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl<K, V, C> Drop for IndexIterator<K, V, C> {
    fn drop(&mut self) {
        if let Some(frame) = self.leaf.take() {
            self.bpm.unpin_page(frame.page_id(), false);
        }
    }
}
