//! Runs a parsed command line against the library.

use crate::block::BlockDescriptor;
use crate::cli::{Args, Commands, RunOptions};
use crate::header;
use crate::pipeline::Pipeline;
use crate::progress::ProgressState;
use crate::report::RunReport;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

pub fn run_cli_app(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    match &args.command {
        Commands::Compress {
            source,
            destination,
            block_size,
            run,
        } => {
            let pipeline = build_pipeline(run, *block_size, "compress")?;
            let report = pipeline.compress(source, destination)?;
            finish_run(&report, run)?;
        }
        Commands::Decompress {
            source,
            destination,
            block_size,
            run,
        } => {
            let pipeline = build_pipeline(run, *block_size, "decompress")?;
            let report = pipeline.decompress(source, destination)?;
            finish_run(&report, run)?;
        }
        Commands::List { archive } => {
            let directory = header::read_directory(archive)?;
            print_directory(&directory, &mut io::stdout().lock())?;
        }
    }

    Ok(())
}

fn build_pipeline(
    run: &RunOptions,
    block_size: Option<u32>,
    operation: &str,
) -> Result<Pipeline, Box<dyn std::error::Error>> {
    let config = run.to_config(block_size);
    let mut pipeline = Pipeline::new(config)?;
    if run.progress {
        pipeline = pipeline.with_progress(Arc::new(create_cli_progress_callback(operation)));
    }
    Ok(pipeline)
}

fn finish_run(report: &RunReport, run: &RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = &run.report {
        write_report(report, path)?;
    }
    println!("{}", report);
    Ok(())
}

fn write_report(report: &RunReport, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let json = report.to_json()?;
    fs::write(path, json + "\n")
        .map_err(|e| crate::error::BlockzipError::io(e, path))?;
    Ok(())
}

fn print_directory<W: Write>(directory: &[BlockDescriptor], out: &mut W) -> io::Result<()> {
    writeln!(out, "Archive directory ({} blocks):", directory.len())?;
    for block in directory {
        writeln!(
            out,
            "- block {} at offset {} ({} bytes)",
            block.id, block.offset, block.length
        )?;
    }
    Ok(())
}

// --- utils for CLI progress -------------------------------------------------

fn create_cli_progress_callback(operation: &str) -> impl Fn(ProgressState) + Send + Sync + 'static {
    let operation = operation.to_uppercase();
    let last_update = Mutex::new(None::<Instant>);
    let prev_len = Mutex::new(0usize);
    let done = AtomicBool::new(false);

    move |state: ProgressState| {
        if done.load(Ordering::Relaxed) {
            return;
        }
        let finished = state.progress_percent >= 100.0;
        // Redraw at most every 100ms, but always show completion.
        let should_update = finished || {
            let mut last = last_update.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            match *last {
                Some(prev) if now.duration_since(prev).as_millis() < 100 => false,
                _ => {
                    *last = Some(now);
                    true
                }
            }
        };
        if !should_update {
            return;
        }

        let term_width = term_size::dimensions().map(|(w, _)| w).unwrap_or(80);
        let eta = state.estimated_time_remaining().as_secs_f32();
        let eta_str = if finished || state.written_blocks == 0 {
            "--".to_string()
        } else if eta > 60.0 {
            format!("{:.1}m", eta / 60.0)
        } else {
            format!("{:.1}s", eta)
        };

        // Shrink the bar until the line fits the terminal.
        let mut bar_width: usize = 40;
        let mut line = loop {
            let filled = (((state.progress_percent / 100.0) * bar_width as f32) as usize).min(bar_width);
            let line = format!(
                "[{}] [{}{}] {:.1}% | {}/{} blocks | {:.1} MB/s | ETA: {}",
                operation,
                "█".repeat(filled),
                "░".repeat(bar_width - filled),
                state.progress_percent,
                state.written_blocks,
                state.total_blocks,
                state.speed_mbps,
                eta_str
            );
            if line.chars().count() <= term_width || bar_width <= 10 {
                break line;
            }
            bar_width -= 4;
        };

        {
            let mut prev = prev_len.lock().unwrap_or_else(PoisonError::into_inner);
            let len = line.chars().count();
            if *prev > len {
                line.push_str(&" ".repeat(*prev - len));
            }
            *prev = len;
        }
        eprint!("\r\x1B[2K{}", line);
        io::stderr().flush().ok();

        if finished {
            eprintln!();
            done.store(true, Ordering::Relaxed);
        }
    }
}
