use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::codec::CodecKind;
use crate::config::PipelineConfig;

#[derive(Parser, Debug)]
#[command(name = "blockzip", author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Compress a file into a block archive.
    #[command(alias = "c")]
    Compress {
        /// File to compress.
        source: PathBuf,

        /// Path of the archive to create. Replaced only if the run succeeds.
        destination: PathBuf,

        /// Maximum bytes per block. [default: 52428800]
        block_size: Option<u32>,

        #[command(flatten)]
        run: RunOptions,
    },

    /// Restore the original file from a block archive.
    #[command(alias = "d")]
    Decompress {
        /// Archive to read.
        source: PathBuf,

        /// Path of the restored file. Replaced only if the run succeeds.
        destination: PathBuf,

        /// Block size the archive was written with, for the memory budget.
        ///
        /// Decompressed block sizes are not stored in the archive, so pass at
        /// least the block size used to compress it. Larger archive records win.
        block_size: Option<u32>,

        #[command(flatten)]
        run: RunOptions,
    },

    /// Print the block directory of an archive.
    #[command(alias = "l")]
    List {
        /// The archive file to inspect.
        #[arg(required = true)]
        archive: PathBuf,
    },
}

/// Options shared by `compress` and `decompress`.
#[derive(ClapArgs, Clone, Debug)]
pub struct RunOptions {
    /// Payload codec used when compressing. Decompression detects it per block.
    #[arg(long, value_enum, default_value_t = CodecKind::Zstd)]
    pub codec: CodecKind,

    /// Codec level (zstd 1-22, xz and gzip 0-9). [default: codec's own]
    #[arg(long, allow_negative_numbers = true)]
    pub level: Option<i32>,

    /// Number of transform workers. [default: CPU count, at least 2; env: BLOCKZIP_THREADS]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub threads: Option<u64>,

    /// Memory the pipeline may use, in MiB. [default: 80% of available; env: BLOCKZIP_MEMORY_MB]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub memory_mb: Option<u64>,

    /// Abort the run if it takes longer than this many seconds.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_secs: Option<u64>,

    /// Show a progress bar on stderr.
    #[arg(long)]
    pub progress: bool,

    /// Write a JSON run report to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl RunOptions {
    /// Builds the run configuration: defaults, then environment, then flags.
    pub fn to_config(&self, block_size: Option<u32>) -> PipelineConfig {
        let mut config = PipelineConfig::default().with_env_overrides();
        if let Some(size) = block_size {
            config.block_size = size;
        }
        if let Some(threads) = self.threads {
            config.workers = Some(usize::try_from(threads).unwrap_or(usize::MAX));
        }
        if let Some(mb) = self.memory_mb {
            config.memory_limit = Some(mb.saturating_mul(1024 * 1024));
        }
        config.timeout = self.timeout_secs.map(Duration::from_secs);
        config.codec = self.codec;
        config.level = self.level;
        config
    }
}
