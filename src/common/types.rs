use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = i32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = -1;

/// Page id 0 is reserved for the database header page
pub const HEADER_PAGE_ID: PageId = 0;

/// Buffer pool frame ID type, an index into the frame array
pub type FrameId = usize;

/// Transaction ID type
pub type TxnId = u32;

/// Table object ID type
pub type TableId = u32;

/// How often the background deadlock detector sweeps by default
pub const DEADLOCK_DETECTION_INTERVAL: Duration = Duration::from_millis(50);

/// Record ID: the physical address of a tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot_num)
    }
}
