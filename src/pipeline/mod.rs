//! The concurrent block pipeline.
//!
//! One run wires a single [`reader`], `N` symmetric [`worker`]s and a single
//! ordered [`sink`] around a shared [`handoff::Handoff`]. Every role runs on
//! its own named thread inside `std::thread::scope` and reports a result
//! value back over a channel; the orchestrator cancels the run on the first
//! failure (or on timeout), waits for every role to unwind and returns the
//! root cause.

pub mod handoff;
pub mod reader;
pub mod sink;
pub mod worker;

pub use handoff::{Handoff, ResidentPeaks};
pub use worker::Direction;

use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{RecvTimeoutError, Sender};
use tempfile::NamedTempFile;
use tracing::{debug, error, info};

use crate::block::{self, BlockDescriptor};
use crate::codec::{AutoCodec, BlockCodec};
use crate::config::PipelineConfig;
use crate::error::{BlockzipError, Result};
use crate::header;
use crate::memory::MemoryBudget;
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::report::RunReport;
use sink::SinkSummary;

const WRITE_BUFFER: usize = 1 << 20;

/// Lifecycle of a single run, logged at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Planning,
    Running,
    Joining,
    Finalizing,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Init => "init",
            RunPhase::Planning => "planning",
            RunPhase::Running => "running",
            RunPhase::Joining => "joining",
            RunPhase::Finalizing => "finalizing",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn enter(direction: Direction, phase: RunPhase) {
    debug!(%direction, %phase, "run phase");
}

enum RoleValue {
    Reader,
    Worker(usize),
    Sink(SinkSummary),
}

struct RoleOutcome {
    role: String,
    result: Result<RoleValue>,
}

/// Everything the roles of one run share.
struct RunPlan<'a> {
    direction: Direction,
    input: &'a Path,
    destination: &'a Path,
    blocks: &'a [BlockDescriptor],
    start_offset: u64,
}

/// Compresses and decompresses files with a fixed configuration.
pub struct Pipeline {
    config: PipelineConfig,
    codec: Arc<dyn BlockCodec>,
    progress: Option<Arc<ProgressCallback>>,
}

impl Pipeline {
    /// Pipeline using the configured built-in codec.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let codec = AutoCodec::new(config.codec, config.level)?;
        Ok(Self {
            config,
            codec: Arc::new(codec),
            progress: None,
        })
    }

    /// Pipeline using a caller-supplied codec for both directions.
    pub fn with_codec(config: PipelineConfig, codec: Arc<dyn BlockCodec>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            codec,
            progress: None,
        })
    }

    /// Invoke `callback` after every block the sink writes.
    pub fn with_progress(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Splits `source` into blocks, compresses them in parallel and writes
    /// the archive to `destination`.
    pub fn compress(&self, source: &Path, destination: &Path) -> Result<RunReport> {
        finish(Direction::Compress, self.compress_inner(source, destination))
    }

    /// Restores the original file from the archive at `source`.
    pub fn decompress(&self, source: &Path, destination: &Path) -> Result<RunReport> {
        finish(Direction::Decompress, self.decompress_inner(source, destination))
    }

    fn compress_inner(&self, source: &Path, destination: &Path) -> Result<RunReport> {
        let direction = Direction::Compress;
        let started = Instant::now();
        enter(direction, RunPhase::Init);
        let source_len = check_paths(source, destination)?;

        enter(direction, RunPhase::Planning);
        let blocks = block::plan_blocks(source_len, self.config.block_size)?;
        let budget = MemoryBudget::new(
            self.config.available_memory(),
            u64::from(self.config.block_size),
        )?;
        let handoff = Handoff::new(blocks.len(), &budget);
        debug!(
            blocks = blocks.len(),
            cap = budget.cap(),
            available = budget.available(),
            "compression planned"
        );

        let mut tmp = temp_beside(destination)?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER, tmp.as_file_mut());
        let start_offset = header::reserve(&mut writer, blocks.len())
            .map_err(|e| BlockzipError::io(e, destination))?;

        let plan = RunPlan {
            direction,
            input: source,
            destination,
            blocks: &blocks,
            start_offset,
        };
        let summary = self.run_roles(&plan, &handoff, &mut writer)?;
        let file = writer
            .into_inner()
            .map_err(|e| BlockzipError::io(e.into_error(), destination))?;

        enter(direction, RunPhase::Finalizing);
        let completed = handoff.completed();
        if completed != blocks.len() || summary.directory.len() != blocks.len() {
            return Err(BlockzipError::BlockCountMismatch {
                planned: blocks.len(),
                completed: completed.min(summary.directory.len()),
            });
        }
        header::write_directory(file, &summary.directory, blocks.len())
            .map_err(|e| BlockzipError::io(e, destination))?;

        let destination_bytes = start_offset + summary.bytes;
        publish(tmp, destination)?;
        Ok(self.report(
            direction,
            self.codec.name().to_string(),
            &handoff,
            &budget,
            source_len,
            destination_bytes,
            started,
        ))
    }

    fn decompress_inner(&self, source: &Path, destination: &Path) -> Result<RunReport> {
        let direction = Direction::Decompress;
        let started = Instant::now();
        enter(direction, RunPhase::Init);
        let source_len = check_paths(source, destination)?;

        enter(direction, RunPhase::Planning);
        let directory = header::read_directory(source)?;
        // Decompressed sizes are not recorded, so the configured block size
        // stands in for them. A compressed record may still be larger.
        let largest = directory
            .iter()
            .map(|b| b.length as u64)
            .max()
            .unwrap_or(0);
        let budget = MemoryBudget::new(
            self.config.available_memory(),
            largest.max(u64::from(self.config.block_size)),
        )?;
        let handoff = Handoff::new(directory.len(), &budget);
        debug!(
            blocks = directory.len(),
            cap = budget.cap(),
            available = budget.available(),
            "decompression planned"
        );

        let mut tmp = temp_beside(destination)?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER, tmp.as_file_mut());
        let plan = RunPlan {
            direction,
            input: source,
            destination,
            blocks: &directory,
            start_offset: 0,
        };
        let summary = self.run_roles(&plan, &handoff, &mut writer)?;
        writer
            .into_inner()
            .map_err(|e| BlockzipError::io(e.into_error(), destination))?;

        if handoff.completed() != directory.len() {
            return Err(BlockzipError::BlockCountMismatch {
                planned: directory.len(),
                completed: handoff.completed(),
            });
        }
        publish(tmp, destination)?;
        Ok(self.report(
            direction,
            "auto".to_string(),
            &handoff,
            &budget,
            source_len,
            summary.bytes,
            started,
        ))
    }

    /// Runs reader, workers and sink to completion and returns the sink's
    /// summary, or the first root-cause error.
    fn run_roles<W: Write + Send>(
        &self,
        plan: &RunPlan<'_>,
        handoff: &Handoff,
        writer: &mut W,
    ) -> Result<SinkSummary> {
        let workers = self.config.worker_count();
        let (tx, rx) = crossbeam_channel::unbounded::<RoleOutcome>();
        let codec: &dyn BlockCodec = &*self.codec;
        let record = plan.direction == Direction::Compress;

        enter(plan.direction, RunPhase::Running);
        thread::scope(|s| {
            let mut spawned = Vec::with_capacity(workers + 2);
            spawned.push(spawn_role(s, "blockzip-reader".to_string(), &tx, move || {
                reader::run_reader(plan.input, plan.blocks, handoff).map(|_| RoleValue::Reader)
            }));
            for i in 0..workers {
                spawned.push(spawn_role(s, format!("blockzip-worker-{}", i), &tx, move || {
                    worker::run_worker(handoff, codec, plan.direction).map(RoleValue::Worker)
                }));
            }
            let progress = ProgressTracker::new(plan.blocks.len(), self.progress.clone());
            let destination = plan.destination;
            spawned.push(spawn_role(s, "blockzip-sink".to_string(), &tx, move || {
                sink::run_sink(handoff, writer, plan.start_offset, record, progress, |e| {
                    BlockzipError::io(e, destination)
                })
                .map(RoleValue::Sink)
            }));
            drop(tx);

            let running = spawned.iter().filter(|r| r.is_ok()).count();
            let spawn_error = spawned.into_iter().find_map(|r| r.err());
            if spawn_error.is_some() {
                // Roles that did start must not wait for ones that never will.
                handoff.cancel();
            }

            enter(plan.direction, RunPhase::Joining);
            let collected = self.collect(plan.direction, handoff, &rx, running);
            match spawn_error {
                Some(e) => Err(BlockzipError::Config(format!(
                    "failed to spawn pipeline thread: {}",
                    e
                ))),
                None => collected,
            }
        })
    }

    /// Receives one outcome per spawned role, enforcing the run timeout.
    fn collect(
        &self,
        direction: Direction,
        handoff: &Handoff,
        rx: &crossbeam_channel::Receiver<RoleOutcome>,
        expected: usize,
    ) -> Result<SinkSummary> {
        let mut deadline = self.config.timeout.map(|t| Instant::now() + t);
        let mut root_cause: Option<BlockzipError> = None;
        let mut summary = None;
        let mut received = 0;

        while received < expected {
            let outcome = match deadline {
                Some(at) => match rx.recv_deadline(at) {
                    Ok(outcome) => outcome,
                    Err(RecvTimeoutError::Timeout) => {
                        let limit = self.config.timeout.unwrap_or_default();
                        error!(%direction, ?limit, "run timed out, cancelling");
                        handoff.cancel();
                        root_cause.get_or_insert(BlockzipError::Timeout(limit));
                        deadline = None;
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match rx.recv() {
                    Ok(outcome) => outcome,
                    Err(_) => break,
                },
            };
            received += 1;

            match outcome.result {
                Ok(RoleValue::Sink(s)) => summary = Some(s),
                Ok(RoleValue::Worker(n)) => debug!(role = %outcome.role, blocks = n, "worker finished"),
                Ok(RoleValue::Reader) => debug!("reader finished"),
                Err(e) if e.is_cancellation() => {
                    debug!(role = %outcome.role, "role observed cancellation");
                    root_cause.get_or_insert(e);
                }
                Err(e) => {
                    error!(role = %outcome.role, error = %e, "role failed");
                    handoff.cancel();
                    if root_cause.as_ref().map_or(true, BlockzipError::is_cancellation) {
                        root_cause = Some(e);
                    }
                }
            }
        }

        if let Some(e) = root_cause {
            return Err(e);
        }
        summary.ok_or_else(|| BlockzipError::RolePanicked {
            role: "blockzip-sink".to_string(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        direction: Direction,
        codec: String,
        handoff: &Handoff,
        budget: &MemoryBudget,
        source_bytes: u64,
        destination_bytes: u64,
        started: Instant,
    ) -> RunReport {
        let peaks = handoff.peaks();
        RunReport {
            direction,
            codec,
            blocks: handoff.total(),
            block_size: budget.block_size(),
            source_bytes,
            destination_bytes,
            workers: self.config.worker_count(),
            resident_cap: budget.cap(),
            peak_resident_input: peaks.input,
            peak_resident_output: peaks.output,
            elapsed: started.elapsed(),
        }
    }
}

fn spawn_role<'scope, 'env: 'scope>(
    s: &'scope thread::Scope<'scope, 'env>,
    name: String,
    tx: &Sender<RoleOutcome>,
    body: impl FnOnce() -> Result<RoleValue> + Send + 'scope,
) -> std::io::Result<()> {
    let tx = tx.clone();
    let role = name.clone();
    thread::Builder::new()
        .name(name)
        .spawn_scoped(s, move || run_role(role, body, &tx))?;
    Ok(())
}

/// Runs one role body, converting a panic into an error value, and reports
/// the outcome.
fn run_role(role: String, body: impl FnOnce() -> Result<RoleValue>, tx: &Sender<RoleOutcome>) {
    let result = panic::catch_unwind(AssertUnwindSafe(body))
        .unwrap_or_else(|_| Err(BlockzipError::RolePanicked { role: role.clone() }));
    // The orchestrator only stops listening after every role has reported.
    let _ = tx.send(RoleOutcome { role, result });
}

fn finish(direction: Direction, result: Result<RunReport>) -> Result<RunReport> {
    match &result {
        Ok(report) => {
            enter(direction, RunPhase::Done);
            info!(
                %direction,
                blocks = report.blocks,
                source_bytes = report.source_bytes,
                destination_bytes = report.destination_bytes,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "run complete"
            );
        }
        Err(e) => {
            enter(direction, RunPhase::Failed);
            error!(%direction, error = %e, "run failed");
        }
    }
    result
}

/// Validates the path pair and returns the source length.
fn check_paths(source: &Path, destination: &Path) -> Result<u64> {
    let meta = fs::metadata(source).map_err(|e| BlockzipError::io(e, source))?;
    if !meta.is_file() {
        return Err(BlockzipError::Config(format!(
            "source '{}' is not a regular file",
            source.display()
        )));
    }
    if destination.as_os_str().is_empty() {
        return Err(BlockzipError::Config("destination path is empty".to_string()));
    }
    let same = match (fs::canonicalize(source), fs::canonicalize(destination)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if same {
        return Err(BlockzipError::Config(format!(
            "source and destination are the same file: '{}'",
            source.display()
        )));
    }
    Ok(meta.len())
}

/// Temporary file in the destination's directory so the final rename stays
/// on one filesystem.
fn temp_beside(destination: &Path) -> Result<NamedTempFile> {
    let dir = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tempfile::Builder::new()
        .prefix(".blockzip-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| BlockzipError::io(e, dir))
}

fn publish(tmp: NamedTempFile, destination: &Path) -> Result<()> {
    tmp.as_file()
        .sync_all()
        .map_err(|e| BlockzipError::io(e, destination))?;
    tmp.persist(destination)
        .map_err(|e| BlockzipError::io(e.error, destination))?;
    Ok(())
}
