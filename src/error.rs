// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Error taxonomy for bridge calls

use crate::handle::Handle;
use thiserror::Error;

/// Failure of a single bridge call.
///
/// The first four variants are produced by the executor and travel back to the
/// caller as the `error` field of a response. The remaining ones are raised on the
/// caller side of the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("function not found: {0}")]
    FunctionNotFound(String),

    #[error("handle not found: {hash} ({kind_tag})")]
    HandleNotFound { hash: u64, kind_tag: String },

    #[error("kernel execution failed in {function}: {message}")]
    KernelExecution { function: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("kernel initialization failed: {0}")]
    Initialization(String),

    #[error("executor is not ready")]
    NotReady,

    #[error("request queue is full")]
    QueueFull,

    #[error("executor terminated")]
    ExecutorTerminated,

    #[error("timed out waiting for {uid}")]
    Timeout { uid: String },

    /// An error string received from a foreign executor that could not be mapped.
    #[error("{0}")]
    Remote(String),
}

impl BridgeError {
    pub fn handle_not_found(handle: &Handle) -> Self {
        Self::HandleNotFound {
            hash: handle.hash,
            kind_tag: handle.kind_tag.clone(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Errors that leave the executor usable for subsequent calls
    pub fn is_per_call(&self) -> bool {
        matches!(
            self,
            Self::FunctionNotFound(_)
                | Self::HandleNotFound { .. }
                | Self::KernelExecution { .. }
                | Self::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
