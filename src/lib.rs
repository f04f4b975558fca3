//! # blockzip Core Library
//!
//! This crate compresses and decompresses arbitrarily large files by
//! splitting them into fixed-size blocks, transforming the blocks in
//! parallel and writing a self-describing archive.
//!
//! It is used by the `blockzip` command-line application, but the
//! [`Pipeline`] API can also be driven programmatically.
//!
//! ## Key Modules
//!
//! - [`block`]: block descriptors and the planner that splits a source file.
//! - [`header`]: the archive's binary block directory.
//! - [`memory`]: the resident-block budget.
//! - [`codec`]: pluggable per-block codecs (zstd, xz, gzip).
//! - [`pipeline`]: the reader / worker pool / ordered sink and their orchestrator.
//!
//! ## Archive layout
//!
//! ```text
//! [dir_len: i32 LE][dir_len / 16 records: id i32, offset i64, length i32][payloads]
//! ```
//!
//! Records are sorted by id; payloads appear in file order and every offset is
//! an absolute archive position.
//!
//! ## Examples
//!
//! ```no_run
//! use blockzip::{Pipeline, PipelineConfig};
//! use std::path::Path;
//!
//! let pipeline = Pipeline::new(PipelineConfig::default())?;
//! pipeline.compress(Path::new("data.bin"), Path::new("data.bz"))?;
//! pipeline.decompress(Path::new("data.bz"), Path::new("data.out"))?;
//! # Ok::<(), blockzip::BlockzipError>(())
//! ```

pub mod block;
pub mod cli;
pub mod cli_runner;
pub mod codec;
pub mod config;
pub mod error;
pub mod header;
pub mod memory;
pub mod pipeline;
pub mod progress;
pub mod report;

pub use block::{plan_blocks, BlockDescriptor};
pub use codec::{AutoCodec, BlockCodec, CodecKind};
pub use config::PipelineConfig;
pub use error::{BlockzipError, Result};
pub use pipeline::{Direction, Pipeline};
pub use progress::ProgressState;
pub use report::RunReport;
