//! Oxbow - an instructional disk-oriented storage engine in Rust
//!
//! This crate provides the storage core of a relational database: pages
//! live on disk, a fixed-size buffer pool caches them in memory, and a
//! disk-resident B+ tree index is built on top of the pool.
//!
//! # Architecture
//!
//! The system is organized into several layers:
//!
//! - **Storage Layer** (`storage`): Handles disk I/O and page registries
//!   - `DiskManager`: Reads and writes pages to/from the database file
//!   - `DiskScheduler`: Funnels page I/O through a worker thread
//!   - `HeaderPage`: Named root-pointer records at the well-known page 0
//!
//! - **Buffer Pool** (`buffer`): Memory management for database pages
//!   - `BufferPoolManager`: Caches pages in frames behind one coarse latch
//!   - `LruReplacer`: LRU eviction policy over unpinned frames
//!   - `Frame`: Per-frame metadata (pin count, dirty flag) and page bytes
//!
//! - **Index** (`index`): The B+ tree
//!   - `BPlusTree`: Point lookup, insertion with split propagation,
//!     deletion with coalesce/redistribute propagation
//!   - `IndexIterator`: Forward scan over the leaf chain
//!   - Leaf and internal page layouts as typed views over page bytes
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use oxbow::buffer::BufferPoolManager;
//! use oxbow::common::{Transaction, DEFAULT_BUFFER_POOL_SIZE};
//! use oxbow::index::{BPlusTree, OrdComparator};
//! use oxbow::storage::disk::DiskManager;
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(DEFAULT_BUFFER_POOL_SIZE, disk_manager));
//!
//! let mut index: BPlusTree<u32, u64, _> =
//!     BPlusTree::new("demo_index", bpm, OrdComparator, 64, 64);
//!
//! let txn = Transaction::new();
//! index.insert(&42, &4200, &txn).unwrap();
//!
//! let mut values = Vec::new();
//! assert!(index.get_value(&42, &mut values, &txn).unwrap());
//! assert_eq!(values, vec![4200]);
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{FrameId, OxbowError, PageId, RecordId, Result, Transaction};
