mod config;
mod error;
mod types;

pub use config::{
    DEFAULT_BUFFER_POOL_SIZE, DEFAULT_INTERNAL_MAX_SIZE, DEFAULT_LEAF_MAX_SIZE, DEFAULT_LRUK_K,
    HEADER_PAGE_ID, INVALID_FRAME_ID, INVALID_PAGE_ID, PAGE_SIZE,
};
pub use error::{Result, StratumError};
pub use types::{FrameId, KeyType, PageId, RecordId, Timestamp};
