//! Stratum - the storage-engine core of a disk-oriented RDBMS
//!
//! This crate implements the buffer and index layer of a disk-oriented
//! database: pages live on disk, a buffer pool caches them in fixed-size
//! frames, and a concurrent B+ tree index is built on top of the pool.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): disk I/O and page views
//!   - `DiskManager`: reads and writes 4 KiB pages in the database file
//!   - `DiskScheduler`: background worker queue for disk requests
//!   - `HeaderPage`: the index name -> root page id registry on page 0
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: fetches pages from disk and caches them,
//!     tracking pin counts and dirty flags under one coarse latch
//!   - `LruKReplacer`: LRU-K eviction by backward k-distance
//!   - `PageTable`: page id -> frame id mapping for resident pages
//!   - `ReadPageGuard`/`WritePageGuard`: RAII latch-and-pin guards
//!
//! - **Index** (`index`): the on-disk B+ tree
//!   - `BPlusTree`: insert/remove/point-lookup under latch crabbing
//!   - `IndexIterator`: read-latched forward scan over the leaf chain
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stratum::buffer::BufferPoolManager;
//! use stratum::index::{BPlusTree, IntegerComparator};
//! use stratum::storage::disk::DiskManager;
//! use stratum::common::RecordId;
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(100, 2, disk_manager));
//!
//! let tree = BPlusTree::new("orders_pk", Arc::clone(&bpm), IntegerComparator, 32, 32);
//! tree.insert(42, RecordId::from_key(42)).unwrap();
//! assert!(tree.get_value(&42).unwrap().is_some());
//!
//! for (key, rid) in tree.begin().unwrap() {
//!     println!("{key} -> {rid}");
//! }
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{KeyType, PageId, RecordId, Result, StratumError};
