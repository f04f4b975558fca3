//! Block descriptors and the planner that splits a source file into them.

use crate::error::{BlockzipError, Result};
use crate::header::RECORD_SIZE;

/// Most blocks one archive directory can describe: its byte length is an i32.
pub const MAX_BLOCKS: u64 = i32::MAX as u64 / RECORD_SIZE as u64;

/// Location of one block, either in the source file (planning) or in the
/// archive payload region (decoded directory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockDescriptor {
    /// Position of the block in original file order.
    pub id: u32,
    /// Absolute byte offset of the block.
    pub offset: i64,
    /// Number of bytes in the block.
    pub length: i32,
}

impl BlockDescriptor {
    pub fn new(id: u32, offset: i64, length: i32) -> Self {
        Self { id, offset, length }
    }

    /// Offset one past the last byte of the block, or `None` if it does
    /// not fit in an i64.
    pub fn end(&self) -> Option<i64> {
        self.offset.checked_add(i64::from(self.length))
    }
}

/// Splits `[0, source_len)` into blocks of `block_size` bytes.
///
/// Every block except the last has exactly `block_size` bytes; an empty
/// source produces an empty plan.
pub fn plan_blocks(source_len: u64, block_size: u32) -> Result<Vec<BlockDescriptor>> {
    if block_size == 0 || block_size > i32::MAX as u32 {
        return Err(BlockzipError::Config(format!(
            "block size must be between 1 and {} bytes, got {}",
            i32::MAX,
            block_size
        )));
    }
    if source_len > i64::MAX as u64 {
        return Err(BlockzipError::Config(format!(
            "source length {} exceeds the addressable range",
            source_len
        )));
    }

    let block = u64::from(block_size);
    let count = source_len.div_ceil(block);
    if count > MAX_BLOCKS {
        return Err(BlockzipError::Config(format!(
            "{} blocks needed for {} bytes but an archive holds at most {}; raise the block size",
            count, source_len, MAX_BLOCKS
        )));
    }

    let mut blocks = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    let mut id = 0u32;
    while offset < source_len {
        let length = block.min(source_len - offset);
        blocks.push(BlockDescriptor::new(id, offset as i64, length as i32));
        offset += length;
        id += 1;
    }
    Ok(blocks)
}
