use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::buffer::{BufferPoolManager, Frame};
use crate::common::{PageId, Result, Transaction, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::btree_internal_page::{BTreeInternalPage, BTreeInternalPageRef};
use super::btree_leaf_page::{BTreeLeafPage, BTreeLeafPageRef};
use super::btree_page::{self, BTreePage};
use super::index_iterator::IndexIterator;
use super::key::{IndexKey, IndexValue, KeyComparator};

/// Disk-resident B+ tree index over the buffer pool.
///
/// Keys are unique. Leaves hold `(K, V)` entries and chain forward for
/// range scans; internal pages hold separator keys and child pointers.
/// The root page ID is persisted under the index name in the header page
/// after every mutation that moves the root.
///
/// The tree assumes a single writer at a time; the buffer pool underneath
/// is thread-safe. Every fetched page is unpinned exactly once per
/// acquisition, dirty iff its bytes were changed.
pub struct BPlusTree<K, V, C> {
    name: String,
    root_page_id: PageId,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K> + Clone,
{
    /// Creates an empty index. The root is materialized lazily by the
    /// first insert.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            root_page_id: INVALID_PAGE_ID,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        }
    }

    /// Reattaches to an index previously registered in the header page.
    /// An unregistered name yields an empty tree.
    pub fn open(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let name = name.into();

        let frame = bpm.fetch_page(HEADER_PAGE_ID)?;
        let root_page_id = {
            let data = frame.read_data();
            HeaderPageRef::new(&data[..]).get_record(&name)?
        };
        bpm.unpin_page(HEADER_PAGE_ID, false);

        Ok(Self {
            name,
            root_page_id: root_page_id.unwrap_or(INVALID_PAGE_ID),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id == INVALID_PAGE_ID
    }

    /// Point lookup. On a hit the value is appended to `result`.
    pub fn get_value(&self, key: &K, result: &mut Vec<V>, _txn: &Transaction) -> Result<bool> {
        if self.is_empty() {
            return Ok(false);
        }

        let frame = self.find_leaf_page(Some(key))?;
        let found = {
            let data = frame.read_data();
            let leaf = BTreeLeafPageRef::<K, V>::new(&data[..]);
            leaf.lookup(key, &self.comparator)
        };
        self.bpm.unpin_page(frame.page_id(), false);

        if let Some(value) = found {
            result.push(value);
            return Ok(true);
        }
        Ok(false)
    }

    /// Inserts a key/value pair. Returns false if the key already exists.
    pub fn insert(&mut self, key: &K, value: &V, _txn: &Transaction) -> Result<bool> {
        if self.is_empty() {
            self.start_new_tree(key, value)?;
            return Ok(true);
        }
        self.insert_into_leaf(key, value)
    }

    /// Removes the key if present; no-op otherwise.
    pub fn remove(&mut self, key: &K, _txn: &Transaction) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let frame = self.find_leaf_page(Some(key))?;
        let leaf_page_id = frame.page_id();

        let (old_size, new_size, min_size) = {
            let mut data = frame.write_data();
            let mut leaf = BTreeLeafPage::<K, V>::new(&mut data[..]);
            let old_size = leaf.size();
            let new_size = leaf.remove_and_delete_record(key, &self.comparator);
            (old_size, new_size, leaf.min_size())
        };
        let removed = new_size < old_size;

        if removed && new_size < min_size {
            self.coalesce_or_redistribute(frame)?;
        } else {
            self.bpm.unpin_page(leaf_page_id, removed);
        }
        Ok(())
    }

    /// Iterator positioned at the first entry of the leftmost leaf.
    pub fn begin(&self) -> Result<IndexIterator<K, V, C>> {
        if self.is_empty() {
            return Ok(self.end());
        }
        let frame = self.find_leaf_page(None)?;
        IndexIterator::new(
            Arc::clone(&self.bpm),
            self.comparator.clone(),
            Some(frame),
            0,
        )
    }

    /// Iterator positioned at the first entry whose key is >= `key`.
    pub fn begin_at(&self, key: &K) -> Result<IndexIterator<K, V, C>> {
        if self.is_empty() {
            return Ok(self.end());
        }
        let frame = self.find_leaf_page(Some(key))?;
        let index = {
            let data = frame.read_data();
            BTreeLeafPageRef::<K, V>::new(&data[..]).key_index(key, &self.comparator)
        };
        IndexIterator::new(
            Arc::clone(&self.bpm),
            self.comparator.clone(),
            Some(frame),
            index,
        )
    }

    /// The past-the-end iterator.
    pub fn end(&self) -> IndexIterator<K, V, C> {
        IndexIterator::end(Arc::clone(&self.bpm), self.comparator.clone())
    }

    /// Allocates the first leaf, registers the root, and stores the entry.
    fn start_new_tree(&mut self, key: &K, value: &V) -> Result<()> {
        let frame = self.bpm.new_page()?;
        let page_id = frame.page_id();

        self.root_page_id = page_id;
        self.update_root_page_id(true)?;

        {
            let mut data = frame.write_data();
            let mut leaf = BTreeLeafPage::<K, V>::new(&mut data[..]);
            leaf.init(page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert(key, value, &self.comparator);
        }
        self.bpm.unpin_page(page_id, true);

        debug!(root = page_id.as_u32(), "started new tree");
        Ok(())
    }

    /// Inserts into the owning leaf, splitting on overflow.
    fn insert_into_leaf(&mut self, key: &K, value: &V) -> Result<bool> {
        let frame = self.find_leaf_page(Some(key))?;
        let leaf_page_id = frame.page_id();

        let new_size = {
            let mut data = frame.write_data();
            let mut leaf = BTreeLeafPage::<K, V>::new(&mut data[..]);
            if leaf.lookup(key, &self.comparator).is_some() {
                drop(data);
                self.bpm.unpin_page(leaf_page_id, false);
                return Ok(false);
            }
            leaf.insert(key, value, &self.comparator)
        };

        if new_size == self.leaf_max_size {
            if let Err(e) = self.split_leaf_and_propagate(&frame) {
                self.bpm.unpin_page(leaf_page_id, true);
                return Err(e);
            }
        }

        self.bpm.unpin_page(leaf_page_id, true);
        Ok(true)
    }

    /// Splits a full leaf, then pushes the new sibling's first key into
    /// the parent.
    fn split_leaf_and_propagate(&mut self, frame: &Arc<Frame>) -> Result<()> {
        let leaf_page_id = frame.page_id();
        let new_frame = self.bpm.new_page()?;
        let new_page_id = new_frame.page_id();

        let (parent_id, separator) = {
            let mut old_data = frame.write_data();
            let mut new_data = new_frame.write_data();
            let mut leaf = BTreeLeafPage::<K, V>::new(&mut old_data[..]);
            let mut sibling = BTreeLeafPage::<K, V>::new(&mut new_data[..]);

            let parent_id = leaf.parent_page_id();
            sibling.init(new_page_id, parent_id, self.leaf_max_size);
            leaf.move_half_to(&mut sibling);
            (parent_id, sibling.key_at(0))
        };

        trace!(
            page = leaf_page_id.as_u32(),
            sibling = new_page_id.as_u32(),
            "leaf split"
        );

        let result = self.insert_into_parent(leaf_page_id, parent_id, &separator, new_page_id);
        self.bpm.unpin_page(new_page_id, true);
        result
    }

    /// Hooks a freshly split sibling into the parent, splitting upward as
    /// needed. `old_page_id` stays pinned by the caller; the new root (if
    /// any) and every fetched parent are released here.
    fn insert_into_parent(
        &mut self,
        old_page_id: PageId,
        old_parent_id: PageId,
        key: &K,
        new_page_id: PageId,
    ) -> Result<()> {
        if old_parent_id == INVALID_PAGE_ID {
            // The split reached the root: grow the tree by one level.
            let root_frame = self.bpm.new_page()?;
            let root_id = root_frame.page_id();
            {
                let mut data = root_frame.write_data();
                let mut root = BTreeInternalPage::<K>::new(&mut data[..]);
                root.init(root_id, INVALID_PAGE_ID, self.internal_max_size);
                root.populate_new_root(old_page_id, key, new_page_id, &self.bpm)?;
            }
            self.root_page_id = root_id;
            self.update_root_page_id(false)?;
            self.bpm.unpin_page(root_id, true);

            debug!(root = root_id.as_u32(), "root split, tree grew");
            return Ok(());
        }

        let parent_frame = self.bpm.fetch_page(old_parent_id)?;
        let parent_id = old_parent_id;

        let (size, max_size, min_size, index, old_value, grandparent_id) = {
            let data = parent_frame.read_data();
            let parent = BTreeInternalPageRef::<K>::new(&data[..]);
            let old_value = parent.lookup(key, &self.comparator, false);
            let index = parent
                .value_index(old_value)
                .expect("split child not found in parent");
            (
                parent.size(),
                parent.max_size(),
                parent.min_size(),
                index,
                old_value,
                parent.parent_page_id(),
            )
        };

        if size + 1 > max_size {
            // Parent overflows too: split it, biased so the pending entry
            // lands on the side with room, then recurse.
            let new_parent_frame = self.split_internal(&parent_frame, index)?;
            let new_parent_id = new_parent_frame.page_id();

            if index < min_size {
                let mut data = parent_frame.write_data();
                let mut parent = BTreeInternalPage::<K>::new(&mut data[..]);
                parent.insert_node_after(old_value, key, new_page_id, &self.bpm)?;
            } else {
                let mut data = new_parent_frame.write_data();
                let mut new_parent = BTreeInternalPage::<K>::new(&mut data[..]);
                let after = new_parent.lookup(key, &self.comparator, true);
                new_parent.insert_node_after(after, key, new_page_id, &self.bpm)?;
            }

            let push_key = {
                let data = new_parent_frame.read_data();
                BTreeInternalPageRef::<K>::new(&data[..]).key_at(0)
            };
            let result =
                self.insert_into_parent(parent_id, grandparent_id, &push_key, new_parent_id);
            self.bpm.unpin_page(parent_id, true);
            self.bpm.unpin_page(new_parent_id, true);
            result
        } else {
            {
                let mut data = parent_frame.write_data();
                let mut parent = BTreeInternalPage::<K>::new(&mut data[..]);
                parent.insert_node_after(old_value, key, new_page_id, &self.bpm)?;
            }
            self.bpm.unpin_page(parent_id, true);
            Ok(())
        }
    }

    /// Splits a full internal page around the pending insertion slot.
    fn split_internal(&mut self, frame: &Arc<Frame>, insertion_index: usize) -> Result<Arc<Frame>> {
        let new_frame = self.bpm.new_page()?;
        let new_page_id = new_frame.page_id();

        {
            let mut old_data = frame.write_data();
            let mut new_data = new_frame.write_data();
            let mut page = BTreeInternalPage::<K>::new(&mut old_data[..]);
            let mut sibling = BTreeInternalPage::<K>::new(&mut new_data[..]);

            sibling.init(new_page_id, page.parent_page_id(), self.internal_max_size);
            page.move_half_to(&mut sibling, insertion_index, &self.bpm)?;
        }

        trace!(
            page = frame.page_id().as_u32(),
            sibling = new_page_id.as_u32(),
            "internal split"
        );
        Ok(new_frame)
    }

    /// Restores the minimum-occupancy invariant for an underflowing page,
    /// borrowing from or merging with a sibling. Consumes the caller's pin
    /// on `frame` along every path.
    fn coalesce_or_redistribute(&mut self, frame: Arc<Frame>) -> Result<()> {
        let node_id = frame.page_id();
        let (is_leaf, node_size, node_max, parent_id) = {
            let data = frame.read_data();
            let page = BTreePage::new(&data[..]);
            (page.is_leaf(), page.size(), page.max_size(), page.parent_page_id())
        };

        if parent_id == INVALID_PAGE_ID {
            return self.adjust_root(frame);
        }

        let parent_frame = self.bpm.fetch_page(parent_id)?;
        let (index, neighbor_id) = {
            let data = parent_frame.read_data();
            let parent = BTreeInternalPageRef::<K>::new(&data[..]);
            let index = parent
                .value_index(node_id)
                .expect("underflowing child not found in parent");
            let neighbor_id = if index == 0 {
                parent.value_at(index + 1)
            } else {
                parent.value_at(index - 1)
            };
            (index, neighbor_id)
        };

        let neighbor_frame = self.bpm.fetch_page(neighbor_id)?;
        let neighbor_size = {
            let data = neighbor_frame.read_data();
            BTreePage::new(&data[..]).size()
        };

        // Leaves can host one more entry than the split threshold allows,
        // hence the asymmetric fullness test.
        let leaf_correction = usize::from(is_leaf);

        let parent_underflow = if node_size + neighbor_size + leaf_correction > node_max {
            self.redistribute(&neighbor_frame, &frame, &parent_frame, index)?;
            false
        } else {
            self.coalesce(&neighbor_frame, &frame, &parent_frame, index)?
        };

        if parent_underflow {
            self.coalesce_or_redistribute(parent_frame)
        } else {
            self.bpm.unpin_page(parent_id, true);
            Ok(())
        }
    }

    /// Merges the higher-index sibling into the lower-index one, drops the
    /// emptied page, and removes its separator from the parent. Returns
    /// whether the parent now underflows.
    fn coalesce(
        &mut self,
        neighbor_frame: &Arc<Frame>,
        node_frame: &Arc<Frame>,
        parent_frame: &Arc<Frame>,
        index: usize,
    ) -> Result<bool> {
        let node_id = node_frame.page_id();
        let neighbor_id = neighbor_frame.page_id();

        let is_leaf = {
            let data = node_frame.read_data();
            BTreePage::new(&data[..]).is_leaf()
        };

        let (parent_size, parent_min) = {
            let mut node_data = node_frame.write_data();
            let mut neighbor_data = neighbor_frame.write_data();
            let mut parent_data = parent_frame.write_data();
            let mut parent = BTreeInternalPage::<K>::new(&mut parent_data[..]);

            if is_leaf {
                let mut node = BTreeLeafPage::<K, V>::new(&mut node_data[..]);
                let mut neighbor = BTreeLeafPage::<K, V>::new(&mut neighbor_data[..]);
                if index == 0 {
                    neighbor.move_all_to(&mut node);
                } else {
                    node.move_all_to(&mut neighbor);
                }
            } else {
                let mut node = BTreeInternalPage::<K>::new(&mut node_data[..]);
                let mut neighbor = BTreeInternalPage::<K>::new(&mut neighbor_data[..]);
                if index == 0 {
                    let middle_key = parent.key_at(1);
                    neighbor.move_all_to(&mut node, &middle_key, &self.bpm)?;
                } else {
                    let middle_key = parent.key_at(index);
                    node.move_all_to(&mut neighbor, &middle_key, &self.bpm)?;
                }
            }

            if index == 0 {
                parent.remove(1);
            } else {
                parent.remove(index);
            }
            (parent.size(), parent.min_size())
        };

        self.bpm.unpin_page(node_id, true);
        self.bpm.unpin_page(neighbor_id, true);

        let (survivor, emptied) = if index == 0 {
            (node_id, neighbor_id)
        } else {
            (neighbor_id, node_id)
        };
        assert!(
            self.bpm.delete_page(emptied)?,
            "merged page still pinned"
        );

        trace!(
            survivor = survivor.as_u32(),
            merged = emptied.as_u32(),
            "coalesced siblings"
        );
        Ok(parent_size < parent_min)
    }

    /// Moves one entry between siblings and refreshes the parent separator.
    fn redistribute(
        &mut self,
        neighbor_frame: &Arc<Frame>,
        node_frame: &Arc<Frame>,
        parent_frame: &Arc<Frame>,
        index: usize,
    ) -> Result<()> {
        let node_id = node_frame.page_id();
        let neighbor_id = neighbor_frame.page_id();

        let is_leaf = {
            let data = node_frame.read_data();
            BTreePage::new(&data[..]).is_leaf()
        };

        {
            let mut node_data = node_frame.write_data();
            let mut neighbor_data = neighbor_frame.write_data();
            let mut parent_data = parent_frame.write_data();
            let mut parent = BTreeInternalPage::<K>::new(&mut parent_data[..]);

            if is_leaf {
                let mut node = BTreeLeafPage::<K, V>::new(&mut node_data[..]);
                let mut neighbor = BTreeLeafPage::<K, V>::new(&mut neighbor_data[..]);
                if index == 0 {
                    neighbor.move_first_to_end_of(&mut node);
                    let new_separator = neighbor.key_at(0);
                    parent.set_key_at(1, &new_separator);
                } else {
                    neighbor.move_last_to_front_of(&mut node);
                    let new_separator = node.key_at(0);
                    parent.set_key_at(index, &new_separator);
                }
            } else {
                let mut node = BTreeInternalPage::<K>::new(&mut node_data[..]);
                let mut neighbor = BTreeInternalPage::<K>::new(&mut neighbor_data[..]);
                if index == 0 {
                    let middle_key = parent.key_at(1);
                    neighbor.move_first_to_end_of(&mut node, &middle_key, &self.bpm)?;
                    let new_separator = neighbor.key_at(0);
                    parent.set_key_at(1, &new_separator);
                } else {
                    let middle_key = parent.key_at(index);
                    neighbor.move_last_to_front_of(&mut node, &middle_key, &self.bpm)?;
                    let new_separator = node.key_at(0);
                    parent.set_key_at(index, &new_separator);
                }
            }
        }

        self.bpm.unpin_page(node_id, true);
        self.bpm.unpin_page(neighbor_id, true);

        trace!(
            node = node_id.as_u32(),
            neighbor = neighbor_id.as_u32(),
            "redistributed one entry"
        );
        Ok(())
    }

    /// Shrinks or empties the tree when the root itself underflows:
    /// an internal root with one child hands the tree to that child, an
    /// empty root leaf empties the tree. Otherwise the root is left alone
    /// (it is exempt from the minimum-occupancy bound).
    fn adjust_root(&mut self, frame: Arc<Frame>) -> Result<()> {
        let root_id = frame.page_id();
        let (is_leaf, size) = {
            let data = frame.read_data();
            let page = BTreePage::new(&data[..]);
            (page.is_leaf(), page.size())
        };

        if !is_leaf && size == 1 {
            let new_root_id = {
                let mut data = frame.write_data();
                let mut root = BTreeInternalPage::<K>::new(&mut data[..]);
                root.remove_and_return_only_child()
            };

            self.root_page_id = new_root_id;
            self.update_root_page_id(false)?;

            let new_root_frame = self.bpm.fetch_page(new_root_id)?;
            {
                let mut data = new_root_frame.write_data();
                btree_page::set_parent_page_id(&mut data[..], INVALID_PAGE_ID);
            }
            self.bpm.unpin_page(new_root_id, true);

            self.bpm.unpin_page(root_id, true);
            self.bpm.delete_page(root_id)?;

            debug!(
                old_root = root_id.as_u32(),
                root = new_root_id.as_u32(),
                "root collapsed"
            );
            return Ok(());
        }

        if is_leaf && size == 0 {
            self.root_page_id = INVALID_PAGE_ID;
            self.update_root_page_id(false)?;

            self.bpm.unpin_page(root_id, true);
            self.bpm.delete_page(root_id)?;

            debug!(old_root = root_id.as_u32(), "tree emptied");
            return Ok(());
        }

        self.bpm.unpin_page(root_id, true);
        Ok(())
    }

    /// Descends from the root to the leaf owning `key` (or the leftmost
    /// leaf when `key` is None). Interior pages are released on the way
    /// down; the returned leaf stays pinned.
    fn find_leaf_page(&self, key: Option<&K>) -> Result<Arc<Frame>> {
        debug_assert!(!self.is_empty());

        let mut frame = self.bpm.fetch_page(self.root_page_id)?;
        loop {
            let child = {
                let data = frame.read_data();
                let page = BTreePage::new(&data[..]);
                if page.is_leaf() {
                    break;
                }
                let internal = BTreeInternalPageRef::<K>::new(&data[..]);
                match key {
                    Some(key) => internal.lookup(key, &self.comparator, false),
                    None => internal.value_at(0),
                }
            };

            self.bpm.unpin_page(frame.page_id(), false);
            frame = self.bpm.fetch_page(child)?;
        }
        Ok(frame)
    }

    /// Persists `root_page_id` under the index name in the header page.
    /// `insert` registers the name on first use; either way the record
    /// ends up holding the current root.
    fn update_root_page_id(&self, insert: bool) -> Result<()> {
        let frame = self.bpm.fetch_page(HEADER_PAGE_ID)?;
        let result = {
            let mut data = frame.write_data();
            let mut header = HeaderPage::new(&mut data[..]);
            if insert {
                match header.insert_record(&self.name, self.root_page_id) {
                    Ok(true) => Ok(()),
                    Ok(false) => header.update_record(&self.name, self.root_page_id).map(|_| ()),
                    Err(e) => Err(e),
                }
            } else {
                match header.update_record(&self.name, self.root_page_id) {
                    Ok(true) => Ok(()),
                    Ok(false) => header.insert_record(&self.name, self.root_page_id).map(|_| ()),
                    Err(e) => Err(e),
                }
            }
        };
        self.bpm.unpin_page(HEADER_PAGE_ID, true);
        result
    }
}
