// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! JSON-lines host: caller requests in, executor emissions out
//!
//! Each input line is a `CallRequest`; every request produces a busy status line
//! followed by a result or error line, with the caller's own `uid`.

use crate::error::BridgeError;
use crate::executor::{self, Command, KernelFactory};
use crate::kernel::Kernel;
use crate::lifecycle::Lifecycle;
use crate::protocol::{CallRequest, CallResponse, WorkerMessage};
use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use serde_json::Value;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::thread;

/// Counters reported when the input is exhausted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostSummary {
    pub requests: usize,
    pub malformed: usize,
    pub failed: usize,
}

/// Parse one input line; malformed lines are answered with a serialization error
fn parse_line(line: &str) -> Result<CallRequest, CallResponse> {
    serde_json::from_str(line).map_err(|e| {
        let uid = serde_json::from_str::<Value>(line)
            .ok()
            .and_then(|v| v.get("uid").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        CallResponse::failure(uid, BridgeError::from(e))
    })
}

/// Serve requests read from `input` until end of input, writing emissions to `output`
pub fn serve_lines<K, R, W>(factory: KernelFactory<K>, input: R, output: W) -> Result<HostSummary>
where
    K: Kernel,
    R: BufRead,
    W: Write + Send + 'static,
{
    let (request_tx, request_rx) = unbounded();
    let (event_tx, event_rx) = unbounded();
    let lifecycle = Arc::new(Lifecycle::new());

    let executor_events = event_tx.clone();
    let executor = thread::Builder::new()
        .name(format!("{}-executor", K::FAMILY))
        .spawn(move || executor::run(factory, lifecycle, request_rx, executor_events))
        .context("Failed to spawn executor thread")?;

    let writer = thread::Builder::new()
        .name(format!("{}-writer", K::FAMILY))
        .spawn(move || -> Result<usize> {
            let mut output = output;
            let mut failed = 0;
            for message in event_rx.iter() {
                if let WorkerMessage::Response(response) = &message {
                    if !response.is_success() {
                        failed += 1;
                    }
                }
                serde_json::to_writer(&mut output, &message)?;
                output.write_all(b"\n")?;
                output.flush()?;
            }
            Ok(failed)
        })
        .context("Failed to spawn writer thread")?;

    let mut summary = HostSummary::default();
    for line in input.lines() {
        let line = line.context("Failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Ok(request) => {
                summary.requests += 1;
                if request_tx.send(Command::Call(request)).is_err() {
                    tracing::warn!("executor stopped before end of input");
                    break;
                }
            }
            Err(response) => {
                summary.malformed += 1;
                tracing::warn!(uid = %response.uid, "malformed request line");
                if event_tx.send(WorkerMessage::Response(response)).is_err() {
                    break;
                }
            }
        }
    }

    let _ = request_tx.send(Command::Shutdown);
    drop(request_tx);
    drop(event_tx);

    if executor.join().is_err() {
        tracing::warn!(family = K::FAMILY, "executor thread panicked");
    }
    let failed = writer
        .join()
        .map_err(|_| anyhow::anyhow!("writer thread panicked"))??;
    // Malformed lines are written as failures too
    summary.failed = failed.saturating_sub(summary.malformed);
    Ok(summary)
}
