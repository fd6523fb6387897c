pub mod btree;
pub mod btree_internal_page;
pub mod btree_leaf_page;
pub mod btree_page;
pub mod index_iterator;
pub mod key;

pub use btree::BPlusTree;
pub use btree_internal_page::{internal_page_capacity, BTreeInternalPage, BTreeInternalPageRef};
pub use btree_leaf_page::{leaf_page_capacity, BTreeLeafPage, BTreeLeafPageRef};
pub use btree_page::{BTreePage, BTreePageType};
pub use index_iterator::IndexIterator;
pub use key::{IndexKey, IndexValue, KeyComparator, OrdComparator};
