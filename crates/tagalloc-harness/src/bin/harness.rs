//! CLI entrypoint for the tagalloc trace harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tagalloc_core::{
    FreeListKind, HeapConfig, HeapLogLevel, PlacementPolicy, ValidationMode, to_jsonl,
};
use tagalloc_harness::{ReplayOptions, ReplayReport, parse_trace, replay};

/// Trace tooling for tagalloc.
#[derive(Debug, Parser)]
#[command(name = "tagalloc-harness")]
#[command(about = "Replay allocation traces against the tagalloc heap")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay one trace under a single configuration.
    Replay {
        /// Trace file path.
        trace: PathBuf,
        /// Placement policy (`first-fit`, `next-fit`, `best-fit`); defaults to the environment.
        #[arg(long)]
        policy: Option<String>,
        /// Free-list strategy (`implicit` or `explicit`); defaults to the environment.
        #[arg(long)]
        free_list: Option<String>,
        /// Validation mode (`strict` or `hardened`).
        #[arg(long)]
        mode: Option<String>,
        /// Heap growth chunk in bytes.
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Run the consistency checker after every step.
        #[arg(long)]
        check: bool,
        /// Write lifecycle records as JSONL to this path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Minimum lifecycle log level when `--log` is set.
        #[arg(long, default_value = "debug")]
        log_level: String,
        /// Output JSON report path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Replay one trace under every policy and free-list combination.
    Compare {
        /// Trace file path.
        trace: PathBuf,
        /// Output JSON report path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the heap configuration resolved from `TAGALLOC_*` variables.
    Config,
}

fn emit(json: &str, output: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        Some(path) => {
            std::fs::write(&path, format!("{json}\n"))?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            trace,
            policy,
            free_list,
            mode,
            chunk_size,
            check,
            log,
            log_level,
            output,
        } => {
            let text = std::fs::read_to_string(&trace)?;
            let parsed = parse_trace(&text)?;

            let mut config = HeapConfig::from_env();
            if let Some(policy) = policy {
                config = config.with_policy(PlacementPolicy::from_str_loose(&policy));
            }
            if let Some(free_list) = free_list {
                config = config.with_free_list(FreeListKind::from_str_loose(&free_list));
            }
            if let Some(mode) = mode {
                config = config.with_mode(ValidationMode::from_str_loose(&mode));
            }
            if let Some(chunk_size) = chunk_size {
                config = config.with_chunk_size(chunk_size);
            }
            let level = log
                .as_ref()
                .and_then(|_| HeapLogLevel::from_str_loose(&log_level));
            config = config.with_log_level(level);

            eprintln!(
                "Replaying {} ({} steps, {} / {})",
                trace.display(),
                parsed.steps.len(),
                config.policy.as_str(),
                config.free_list.as_str()
            );
            let report = replay(
                &parsed,
                ReplayOptions {
                    config,
                    check_each_step: check,
                },
            )?;
            if let Some(path) = log {
                std::fs::write(&path, to_jsonl(&report.logs)?)?;
                eprintln!("Wrote {} lifecycle records to {}", report.logs.len(), path.display());
            }
            emit(&serde_json::to_string_pretty(&report)?, output)?;
        }
        Command::Compare { trace, output } => {
            let text = std::fs::read_to_string(&trace)?;
            let parsed = parse_trace(&text)?;
            let mut reports: Vec<ReplayReport> = Vec::new();
            for policy in PlacementPolicy::ALL {
                for free_list in FreeListKind::ALL {
                    let config = HeapConfig::from_env()
                        .with_policy(policy)
                        .with_free_list(free_list)
                        .with_log_level(None);
                    let report = replay(
                        &parsed,
                        ReplayOptions {
                            config,
                            check_each_step: false,
                        },
                    )?;
                    eprintln!(
                        "{:>9} / {:<8} utilization={:>4}‰ heap={} failed={}",
                        report.policy,
                        report.free_list,
                        report.stats.utilization_permille,
                        report.peak_heap_size,
                        report.failed_requests
                    );
                    reports.push(report);
                }
            }
            emit(&serde_json::to_string_pretty(&reports)?, output)?;
        }
        Command::Config => {
            emit(&serde_json::to_string_pretty(&HeapConfig::from_env())?, None)?;
        }
    }

    Ok(())
}
