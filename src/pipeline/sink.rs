//! The single ordered consumer.
//!
//! Workers finish blocks in any order; the sink drains pending-output by
//! ascending id so the destination is always the id-ordered concatenation
//! of the transformed payloads.

use std::io::Write;

use tracing::trace;

use super::handoff::Handoff;
use crate::block::BlockDescriptor;
use crate::error::{BlockzipError, Result};
use crate::progress::ProgressTracker;

/// What the sink appended.
#[derive(Debug, Default)]
pub struct SinkSummary {
    /// Placement of every payload, in completion order. Empty unless the
    /// sink was asked to record.
    pub directory: Vec<BlockDescriptor>,
    /// Bytes appended after `start_offset`.
    pub bytes: u64,
}

/// Writes blocks `0..handoff.total()` to `out` in id order.
///
/// `start_offset` is the absolute position of the first appended byte (the
/// end of the reserved directory when compressing). `map_err` attaches the
/// destination path to write failures.
pub fn run_sink<W: Write>(
    handoff: &Handoff,
    out: &mut W,
    start_offset: u64,
    record: bool,
    mut progress: ProgressTracker,
    map_err: impl Fn(std::io::Error) -> BlockzipError,
) -> Result<SinkSummary> {
    let total = handoff.total();
    let mut summary = SinkSummary {
        directory: Vec::with_capacity(if record { total } else { 0 }),
        bytes: 0,
    };
    let mut position = start_offset;

    for next_expected in 0..total {
        let id = u32::try_from(next_expected)
            .map_err(|_| BlockzipError::Config(format!("block id {} out of range", next_expected)))?;
        let bytes = handoff.take_output(id)?;
        out.write_all(&bytes).map_err(&map_err)?;

        if record {
            let offset = i64::try_from(position)
                .map_err(|_| BlockzipError::Config("archive offset overflow".to_string()))?;
            let length = i32::try_from(bytes.len()).map_err(|_| {
                BlockzipError::Config(format!("block {} payload exceeds i32", id))
            })?;
            summary.directory.push(BlockDescriptor::new(id, offset, length));
        }
        trace!(id, offset = position, len = bytes.len(), "block written");
        position += bytes.len() as u64;
        summary.bytes += bytes.len() as u64;
        progress.record_block(bytes.len() as u64);
    }

    out.flush().map_err(&map_err)?;
    Ok(summary)
}
