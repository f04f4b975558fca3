//! Memory budget for resident blocks.
//!
//! The available-memory figure comes from `sysinfo` (or an explicit limit)
//! and is turned into the maximum number of blocks the pipeline may hold in
//! memory at once.

use sysinfo::System;

use crate::error::{BlockzipError, Result};

/// Used when the platform reports no available memory at all.
pub const FALLBACK_AVAILABLE_MEMORY: u64 = 1024 * 1024 * 1024; // 1 GiB

/// Share of the reported available memory the pipeline allows itself.
const USABLE_FRACTION: f64 = 0.8;

/// Each resident block may coexist with a transformed copy plus the buffers
/// either side of a hand-off.
const COPIES_PER_BLOCK: u64 = 4;

/// Queries the OS for currently available memory, in bytes.
pub fn available_memory() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    match system.available_memory() {
        0 => FALLBACK_AVAILABLE_MEMORY,
        bytes => (bytes as f64 * USABLE_FRACTION) as u64,
    }
}

/// Maximum number of blocks resident between pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
    available: u64,
    block_size: u64,
    cap: usize,
}

impl MemoryBudget {
    /// `cap = available / (block_size * 4)`, never below one block.
    pub fn new(available: u64, block_size: u64) -> Result<Self> {
        if block_size == 0 {
            return Err(BlockzipError::Config(
                "block size must be greater than 0".to_string(),
            ));
        }
        if block_size > available {
            return Err(BlockzipError::Budget {
                block_size,
                available,
            });
        }
        let per_block = block_size.saturating_mul(COPIES_PER_BLOCK);
        let cap = usize::try_from(available / per_block)
            .unwrap_or(usize::MAX)
            .max(1);
        Ok(Self {
            available,
            block_size,
            cap,
        })
    }

    /// Resident block limit.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Pending-output level the reader waits for after it has been throttled.
    pub fn resume_threshold(&self) -> usize {
        self.cap / 2
    }

    pub fn available(&self) -> u64 {
        self.available
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }
}
