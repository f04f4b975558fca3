//! Progress tracking for compression and decompression runs.
//!
//! The sink is the only role that knows how much of the destination is
//! final, so it owns the tracker and reports after every written block.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Progress snapshot handed to the callback.
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub total_blocks: u64,
    pub written_blocks: u64,
    /// Bytes appended to the destination so far.
    pub written_bytes: u64,
    pub elapsed_time: Duration,
    pub speed_mbps: f32,
    pub progress_percent: f32,
}

impl ProgressState {
    /// Calculate estimated time remaining based on blocks written so far.
    pub fn estimated_time_remaining(&self) -> Duration {
        if self.written_blocks == 0 || self.written_blocks >= self.total_blocks {
            return Duration::from_secs(0);
        }
        let per_block = self.elapsed_time.as_secs_f64() / self.written_blocks as f64;
        let remaining = (self.total_blocks - self.written_blocks) as f64 * per_block;
        Duration::from_secs_f64(remaining.max(0.0))
    }
}

/// Progress callback function type
pub type ProgressCallback = dyn Fn(ProgressState) + Send + Sync;

/// Sink-local progress counter.
pub struct ProgressTracker {
    total_blocks: u64,
    written_blocks: u64,
    written_bytes: u64,
    start_time: Instant,
    callback: Option<Arc<ProgressCallback>>,
}

impl ProgressTracker {
    pub fn new(total_blocks: usize, callback: Option<Arc<ProgressCallback>>) -> Self {
        Self {
            total_blocks: total_blocks as u64,
            written_blocks: 0,
            written_bytes: 0,
            start_time: Instant::now(),
            callback,
        }
    }

    /// Record one block appended to the destination.
    pub fn record_block(&mut self, bytes: u64) {
        self.written_blocks += 1;
        self.written_bytes += bytes;
        if let Some(cb) = &self.callback {
            cb(self.snapshot());
        }
    }

    pub fn written_bytes(&self) -> u64 {
        self.written_bytes
    }

    pub fn snapshot(&self) -> ProgressState {
        let elapsed_time = self.start_time.elapsed();
        let secs = elapsed_time.as_secs_f32();
        let speed_mbps = if secs > 0.0 {
            (self.written_bytes as f32 / (1024.0 * 1024.0)) / secs
        } else {
            0.0
        };
        let progress_percent = if self.total_blocks == 0 {
            100.0
        } else {
            self.written_blocks as f32 * 100.0 / self.total_blocks as f32
        };
        ProgressState {
            total_blocks: self.total_blocks,
            written_blocks: self.written_blocks,
            written_bytes: self.written_bytes,
            elapsed_time,
            speed_mbps,
            progress_percent,
        }
    }
}
