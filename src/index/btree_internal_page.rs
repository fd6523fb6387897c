use std::cmp::Ordering;
use std::marker::PhantomData;

use crate::buffer::BufferPoolManager;
use crate::common::{PageId, Result, INVALID_PAGE_ID, PAGE_SIZE};

use super::btree_page::{self, adopt_child, BTreePageType, BTREE_HEADER_SIZE};
use super::key::{IndexKey, KeyComparator};

pub(crate) const INTERNAL_HEADER_SIZE: usize = BTREE_HEADER_SIZE;

/// Number of `(K, PageId)` entries an internal page can physically hold.
pub fn internal_page_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - INTERNAL_HEADER_SIZE) / (K::ENCODED_LEN + 4)
}

fn entry_offset<K: IndexKey>(index: usize) -> usize {
    INTERNAL_HEADER_SIZE + index * (K::ENCODED_LEN + 4)
}

fn read_key<K: IndexKey>(data: &[u8], index: usize) -> K {
    let offset = entry_offset::<K>(index);
    K::decode(&data[offset..offset + K::ENCODED_LEN])
}

fn read_child<K: IndexKey>(data: &[u8], index: usize) -> PageId {
    let offset = entry_offset::<K>(index) + K::ENCODED_LEN;
    PageId::new(u32::from_le_bytes(
        data[offset..offset + 4].try_into().unwrap(),
    ))
}

fn find_value_index<K: IndexKey>(data: &[u8], value: PageId) -> Option<usize> {
    (0..btree_page::page_size(data)).find(|&i| read_child::<K>(data, i) == value)
}

/// Child lookup over slots `1..size`; slot 0 holds the leftmost child
/// behind a dummy key. With `from_insert` set, a probe key below the
/// (normally unused) slot-0 key reports `INVALID_PAGE_ID` so the caller
/// can rotate the new entry into slot 0.
fn lookup_child<K: IndexKey, C: KeyComparator<K>>(
    data: &[u8],
    key: &K,
    comparator: &C,
    from_insert: bool,
) -> PageId {
    let size = btree_page::page_size(data);
    if size == 0 {
        return INVALID_PAGE_ID;
    }

    for i in 1..size {
        match comparator.compare(&read_key::<K>(data, i), key) {
            Ordering::Equal => return read_child::<K>(data, i),
            Ordering::Greater => {
                if from_insert
                    && comparator.compare(&read_key::<K>(data, 0), key) == Ordering::Greater
                {
                    return INVALID_PAGE_ID;
                }
                return read_child::<K>(data, i - 1);
            }
            Ordering::Less => {}
        }
    }

    read_child::<K>(data, size - 1)
}

/// Mutable view of a B+ tree internal page: a sorted `(separator, child)`
/// array whose slot-0 key is a dummy covering the leftmost child.
pub struct BTreeInternalPage<'a, K> {
    data: &'a mut [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> BTreeInternalPage<'a, K> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn init(&mut self, page_id: PageId, parent_id: PageId, max_size: usize) {
        debug_assert!(max_size >= 3 && max_size <= internal_page_capacity::<K>());
        btree_page::set_page_type(self.data, BTreePageType::Internal);
        btree_page::set_page_size(self.data, 0);
        btree_page::set_max_size(self.data, max_size);
        btree_page::set_parent_page_id(self.data, parent_id);
        btree_page::set_page_id(self.data, page_id);
    }

    pub fn size(&self) -> usize {
        btree_page::page_size(self.data)
    }

    pub fn max_size(&self) -> usize {
        btree_page::max_size(self.data)
    }

    pub fn min_size(&self) -> usize {
        btree_page::min_size_for(BTreePageType::Internal, self.max_size())
    }

    pub fn parent_page_id(&self) -> PageId {
        btree_page::parent_page_id(self.data)
    }

    pub fn page_id(&self) -> PageId {
        btree_page::page_id(self.data)
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index < self.size());
        read_key::<K>(self.data, index)
    }

    pub fn set_key_at(&mut self, index: usize, key: &K) {
        let offset = entry_offset::<K>(index);
        key.encode(&mut self.data[offset..offset + K::ENCODED_LEN]);
    }

    pub fn value_at(&self, index: usize) -> PageId {
        debug_assert!(index < self.size());
        read_child::<K>(self.data, index)
    }

    /// Slot of the child pointer equal to `value`, if present.
    pub fn value_index(&self, value: PageId) -> Option<usize> {
        find_value_index::<K>(self.data, value)
    }

    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C, from_insert: bool) -> PageId {
        lookup_child::<K, C>(self.data, key, comparator, from_insert)
    }

    /// Turns an empty page into a two-child root and adopts both children.
    pub fn populate_new_root(
        &mut self,
        old_child: PageId,
        new_key: &K,
        new_child: PageId,
        bpm: &BufferPoolManager,
    ) -> Result<()> {
        self.write_entry(0, new_key, old_child); // slot-0 key is a dummy
        self.write_entry(1, new_key, new_child);
        btree_page::set_page_size(self.data, 2);

        let page_id = self.page_id();
        adopt_child(bpm, old_child, page_id)?;
        adopt_child(bpm, new_child, page_id)?;
        Ok(())
    }

    /// Inserts `(new_key, new_value)` immediately after the slot holding
    /// `old_value`, adopting the new child.
    ///
    /// `old_value == INVALID_PAGE_ID` prepends by rotating slot 0 into
    /// slot 1; that self-referential step is only sound right after a
    /// split has seeded this page, when slot 0 still carries a real key.
    pub fn insert_node_after(
        &mut self,
        old_value: PageId,
        new_key: &K,
        new_value: PageId,
        bpm: &BufferPoolManager,
    ) -> Result<usize> {
        adopt_child(bpm, new_value, self.page_id())?;

        if old_value == INVALID_PAGE_ID {
            let rotated_key = self.key_at(0);
            let rotated_value = self.value_at(0);
            self.write_entry(0, new_key, new_value);
            return self.insert_node_after(new_value, &rotated_key, rotated_value, bpm);
        }

        let index = self
            .value_index(old_value)
            .expect("old child not present in internal page");
        let size = self.size();

        self.data.copy_within(
            Self::offset(index + 1)..Self::offset(size),
            Self::offset(index + 2),
        );
        self.write_entry(index + 1, new_key, new_value);
        btree_page::set_page_size(self.data, size + 1);
        Ok(size + 1)
    }

    /// Moves a suffix of entries to `recipient` so the pending insertion
    /// lands on the side with room: the split point is ⌈(size+1)/2⌉,
    /// pulled down by one when the insertion slot falls in the left half.
    pub fn move_half_to(
        &mut self,
        recipient: &mut BTreeInternalPage<'_, K>,
        insertion_index: usize,
        bpm: &BufferPoolManager,
    ) -> Result<()> {
        let size = self.size();
        let mut split_at = (size + 2) / 2;
        if insertion_index < self.min_size() {
            split_at -= 1;
        }

        let moved = size - split_at;
        recipient.copy_n_from(
            &self.data[Self::offset(split_at)..Self::offset(size)],
            moved,
            bpm,
        )?;
        btree_page::set_page_size(self.data, split_at);
        Ok(())
    }

    /// Appends every entry to `recipient`, restoring this page's dummy
    /// slot-0 key from the parent's separator first. Used when this page
    /// is merged away.
    pub fn move_all_to(
        &mut self,
        recipient: &mut BTreeInternalPage<'_, K>,
        middle_key: &K,
        bpm: &BufferPoolManager,
    ) -> Result<()> {
        self.set_key_at(0, middle_key);
        let size = self.size();
        recipient.copy_n_from(&self.data[Self::offset(0)..Self::offset(size)], size, bpm)?;
        btree_page::set_page_size(self.data, 0);
        Ok(())
    }

    /// Moves this page's first entry to the end of `recipient`, keyed by
    /// the parent separator.
    pub fn move_first_to_end_of(
        &mut self,
        recipient: &mut BTreeInternalPage<'_, K>,
        middle_key: &K,
        bpm: &BufferPoolManager,
    ) -> Result<()> {
        self.set_key_at(0, middle_key);
        let moved_key = self.key_at(0);
        let moved_child = self.value_at(0);
        recipient.copy_last_from(&moved_key, moved_child, bpm)?;

        let size = self.size();
        self.data
            .copy_within(Self::offset(1)..Self::offset(size), Self::offset(0));
        btree_page::set_page_size(self.data, size - 1);
        Ok(())
    }

    /// Moves this page's last entry to the front of `recipient`; the
    /// parent separator becomes the key over `recipient`'s old first child.
    pub fn move_last_to_front_of(
        &mut self,
        recipient: &mut BTreeInternalPage<'_, K>,
        middle_key: &K,
        bpm: &BufferPoolManager,
    ) -> Result<()> {
        let size = self.size();
        let moved_key = self.key_at(size - 1);
        let moved_child = self.value_at(size - 1);
        recipient.copy_first_from(&moved_key, moved_child, middle_key, bpm)?;
        btree_page::set_page_size(self.data, size - 1);
        Ok(())
    }

    /// Deletes the entry at `index`, shifting the tail left.
    pub fn remove(&mut self, index: usize) {
        let size = self.size();
        debug_assert!(index < size);
        self.data.copy_within(
            Self::offset(index + 1)..Self::offset(size),
            Self::offset(index),
        );
        btree_page::set_page_size(self.data, size - 1);
    }

    /// Drops the only remaining entry and returns its child pointer.
    /// Used when collapsing a one-child root.
    pub fn remove_and_return_only_child(&mut self) -> PageId {
        debug_assert_eq!(self.size(), 1);
        let child = self.value_at(0);
        btree_page::set_page_size(self.data, 0);
        child
    }

    fn copy_n_from(&mut self, src: &[u8], count: usize, bpm: &BufferPoolManager) -> Result<()> {
        let size = self.size();
        let start = Self::offset(size);
        self.data[start..start + src.len()].copy_from_slice(src);
        btree_page::set_page_size(self.data, size + count);

        let page_id = self.page_id();
        for i in size..size + count {
            adopt_child(bpm, self.value_at(i), page_id)?;
        }
        Ok(())
    }

    fn copy_last_from(&mut self, key: &K, child: PageId, bpm: &BufferPoolManager) -> Result<()> {
        adopt_child(bpm, child, self.page_id())?;
        let size = self.size();
        self.write_entry(size, key, child);
        btree_page::set_page_size(self.data, size + 1);
        Ok(())
    }

    fn copy_first_from(
        &mut self,
        key: &K,
        child: PageId,
        middle_key: &K,
        bpm: &BufferPoolManager,
    ) -> Result<()> {
        self.set_key_at(0, middle_key);
        adopt_child(bpm, child, self.page_id())?;

        let size = self.size();
        self.data
            .copy_within(Self::offset(0)..Self::offset(size), Self::offset(1));
        self.write_entry(0, key, child);
        btree_page::set_page_size(self.data, size + 1);
        Ok(())
    }

    fn offset(index: usize) -> usize {
        entry_offset::<K>(index)
    }

    fn write_entry(&mut self, index: usize, key: &K, child: PageId) {
        let offset = Self::offset(index);
        key.encode(&mut self.data[offset..offset + K::ENCODED_LEN]);
        self.data[offset + K::ENCODED_LEN..offset + K::ENCODED_LEN + 4]
            .copy_from_slice(&child.as_u32().to_le_bytes());
    }
}

/// Read-only view of an internal page, used while descending.
pub struct BTreeInternalPageRef<'a, K> {
    data: &'a [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> BTreeInternalPageRef<'a, K> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn size(&self) -> usize {
        btree_page::page_size(self.data)
    }

    pub fn max_size(&self) -> usize {
        btree_page::max_size(self.data)
    }

    pub fn min_size(&self) -> usize {
        btree_page::min_size_for(BTreePageType::Internal, self.max_size())
    }

    pub fn parent_page_id(&self) -> PageId {
        btree_page::parent_page_id(self.data)
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index < self.size());
        read_key::<K>(self.data, index)
    }

    pub fn value_at(&self, index: usize) -> PageId {
        debug_assert!(index < self.size());
        read_child::<K>(self.data, index)
    }

    pub fn value_index(&self, value: PageId) -> Option<usize> {
        find_value_index::<K>(self.data, value)
    }

    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C, from_insert: bool) -> PageId {
        lookup_child::<K, C>(self.data, key, comparator, from_insert)
    }
}
