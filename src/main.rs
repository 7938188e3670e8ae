use std::sync::Arc;

use stratum::buffer::BufferPoolManager;
use stratum::common::RecordId;
use stratum::index::{BPlusTree, IntegerComparator};
use stratum::storage::disk::DiskManager;

fn main() {
    println!("Stratum - a disk-oriented storage engine core in Rust");
    println!("=====================================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("Failed to create disk manager"));
    println!("Created disk manager for: {}", db_path);

    // Buffer pool with 16 frames and LRU-2 replacement
    let bpm = Arc::new(BufferPoolManager::new(16, 2, disk_manager));
    println!("Created buffer pool manager with 16 frames\n");

    // Small fanouts so the demo actually exercises splits
    let tree = BPlusTree::new("demo_index", Arc::clone(&bpm), IntegerComparator, 4, 5);

    for key in 1..=25i64 {
        tree.insert(key, RecordId::from_key(key))
            .expect("Failed to insert");
    }
    println!("Inserted keys 1..=25, root page: {}", tree.root_page_id());

    let value = tree.get_value(&17).expect("Lookup failed");
    println!("get_value(17) = {:?}", value);

    for key in [5i64, 10, 15] {
        tree.remove(&key).expect("Remove failed");
    }
    println!("Removed keys 5, 10, 15");

    print!("Full scan:");
    for (key, _rid) in tree.begin().expect("Failed to build iterator") {
        print!(" {}", key);
    }
    println!();

    print!("Scan from 18:");
    for (key, _rid) in tree.begin_at(&18).expect("Failed to build iterator") {
        print!(" {}", key);
    }
    println!();

    bpm.flush_all_pages().expect("Failed to flush");
    println!("\nFlushed all pages to disk");

    std::fs::remove_file(db_path).ok();
    println!("Demo completed successfully!");
}
