mod btree;
mod iterator;
mod key_comparator;
mod node_page;

pub use btree::BPlusTree;
pub use iterator::IndexIterator;
pub use key_comparator::{IntegerComparator, KeyComparator, ReverseComparator};
pub use node_page::{NodeMut, NodeRef, INTERNAL_SLOT_CAPACITY, LEAF_SLOT_CAPACITY};
