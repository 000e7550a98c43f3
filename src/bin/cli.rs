// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Polyframe bridge CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use polyframe_bridge::host::serve_lines;
use polyframe_bridge::kernels::ManifoldKernel;
use polyframe_bridge::{AdminOp, Bridge, BridgeConfig, CallRequest, CallResponse, KernelFactory};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "polyframe-bridge")]
#[command(about = "Compute offload bridge for stateful geometry kernels", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to bridge.toml when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-lines requests on stdin, writing emissions to stdout
    Serve,

    /// List the operations exposed by the kernel
    Ops,

    /// Replay a JSON-lines request file through a bridge
    Replay {
        /// Request file, one request per line
        input: PathBuf,

        /// Write responses as JSON lines
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Per-call timeout in milliseconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries protocol output
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => serve_command(),
        Commands::Ops => ops_command(config),
        Commands::Replay {
            input,
            output,
            timeout,
        } => replay_command(
            config,
            &input,
            output.as_deref(),
            timeout.map(Duration::from_millis),
        ),
    }
}

fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    match path {
        Some(path) => {
            let mut config = BridgeConfig::from_file(path)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            Ok(config)
        }
        None => BridgeConfig::load(),
    }
}

fn serve_command() -> Result<()> {
    let factory: KernelFactory<ManifoldKernel> = Arc::new(ManifoldKernel::load);
    let stdin = std::io::stdin();
    let summary = serve_lines(factory, stdin.lock(), std::io::stdout())?;

    tracing::info!(
        requests = summary.requests,
        failed = summary.failed,
        malformed = summary.malformed,
        "input exhausted"
    );
    Ok(())
}

fn ops_command(config: BridgeConfig) -> Result<()> {
    let bridge = Bridge::spawn(config, ManifoldKernel::load)?;
    let operations = bridge.operations()?;

    println!("{}", format!("{} operations", bridge.name()).bold());
    for name in &operations {
        println!("  {}", name.green());
    }
    println!("{}", "administrative".bold());
    for op in AdminOp::ALL {
        println!("  {}", op.name().cyan());
    }
    Ok(())
}

fn replay_command(
    config: BridgeConfig,
    input: &Path,
    output: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<()> {
    let file = File::open(input).with_context(|| format!("Failed to open {:?}", input))?;
    let mut requests = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: CallRequest = serde_json::from_str(&line)
            .with_context(|| format!("Invalid request on line {}", number + 1))?;
        requests.push(request);
    }

    let bridge = Bridge::spawn(config, ManifoldKernel::load)?;
    if !bridge.wait_ready(Duration::from_secs(30)) {
        anyhow::bail!("kernel did not become ready");
    }
    let mut sink = match output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
        )),
        None => None,
    };

    let pb = ProgressBar::new(requests.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let pending: Vec<_> = requests
        .iter()
        .map(|request| bridge.call(request.function_name(), request.inputs().clone()))
        .collect();

    let mut failed = 0;
    for (request, pending) in requests.iter().zip(pending) {
        pb.set_message(request.function_name().to_string());
        let outcome = pending.and_then(|pending| match timeout {
            Some(timeout) => pending.wait_timeout(timeout),
            None => pending.wait(),
        });
        if outcome.is_err() {
            failed += 1;
        }
        if let Some(sink) = sink.as_mut() {
            let response = CallResponse {
                uid: request.uid.clone(),
                outcome,
            };
            serde_json::to_writer(&mut *sink, &response)?;
            sink.write_all(b"\n")?;
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    if let Some(mut sink) = sink {
        sink.flush()?;
    }

    let stats = bridge.cache_stats()?;
    let elapsed = start.elapsed();
    let succeeded = requests.len() - failed;

    println!("{}", "Replay complete".bold());
    println!("  {} {}", "succeeded:".green(), succeeded);
    if failed > 0 {
        println!("  {} {}", "failed:".red(), failed);
    }
    println!("  cache: {}", stats);
    println!("  elapsed: {:.2?}", elapsed);
    Ok(())
}
