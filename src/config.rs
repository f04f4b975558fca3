//! Run configuration.
//!
//! Defaults can be overridden from the environment (`BLOCKZIP_MEMORY_MB`,
//! `BLOCKZIP_THREADS`) and then from command-line flags.

use std::time::Duration;

use crate::codec::CodecKind;
use crate::error::{BlockzipError, Result};
use crate::memory;

/// Default maximum block size.
pub const DEFAULT_BLOCK_SIZE: u32 = 50 * 1024 * 1024; // 50 MiB

/// Largest block size a directory record can describe.
pub const MAX_BLOCK_SIZE: u32 = i32::MAX as u32;

pub const MEMORY_ENV: &str = "BLOCKZIP_MEMORY_MB";
pub const THREADS_ENV: &str = "BLOCKZIP_THREADS";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum bytes per block.
    pub block_size: u32,
    /// Worker thread count. `None` = `max(cpu count, 2)`.
    pub workers: Option<usize>,
    /// Memory the pipeline may use, in bytes. `None` = ask the OS.
    pub memory_limit: Option<u64>,
    /// Abort the run if it has not finished after this long.
    pub timeout: Option<Duration>,
    /// Codec used when compressing. Decompression detects it per block.
    pub codec: CodecKind,
    /// Codec level; `None` uses the codec's default.
    pub level: Option<i32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            workers: None,
            memory_limit: None,
            timeout: None,
            codec: CodecKind::Zstd,
            level: None,
        }
    }
}

impl PipelineConfig {
    /// Applies `BLOCKZIP_MEMORY_MB` / `BLOCKZIP_THREADS` when set and valid.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(mb) = read_env_number(MEMORY_ENV) {
            self.memory_limit = Some(mb.saturating_mul(1024 * 1024));
        }
        if let Some(threads) = read_env_number(THREADS_ENV) {
            self.workers = Some(threads as usize);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(BlockzipError::Config(format!(
                "archive block size must be between 1 and {} bytes, got {}",
                MAX_BLOCK_SIZE, self.block_size
            )));
        }
        if self.workers == Some(0) {
            return Err(BlockzipError::Config(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.memory_limit == Some(0) {
            return Err(BlockzipError::Config(
                "memory limit must be greater than 0".to_string(),
            ));
        }
        self.codec.build(self.level).map(|_| ())
    }

    /// Number of transform workers for this run.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) => n.max(1),
            None => num_cpus::get().max(2),
        }
    }

    /// Memory available to the pipeline, in bytes.
    pub fn available_memory(&self) -> u64 {
        self.memory_limit.unwrap_or_else(memory::available_memory)
    }
}

fn read_env_number(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring invalid override");
            None
        }
        Ok(value) => Some(value),
    }
}
