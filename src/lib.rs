// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Polyframe Bridge
//!
//! Drives a stateful, single-threaded geometry kernel on its own thread. Calls are
//! dispatched by operation name, deterministic results are memoized in a
//! content-addressed cache, and kernel objects stay behind opaque handles.

pub mod bridge;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod geometry;
pub mod handle;
pub mod host;
pub mod kernel;
pub mod kernels;
pub mod lifecycle;
pub mod protocol;
pub mod registry;

#[cfg(feature = "wasm")]
pub mod ffi;

pub use bridge::Bridge;
pub use cache::{cache_key, CacheStats, HandleStore};
pub use config::{BridgeConfig, StartupPolicy};
pub use dispatcher::{CallEvent, Dispatcher, Pending};
pub use error::BridgeError;
pub use executor::{AdminOp, Command, Executor, KernelFactory};
pub use handle::{Handle, MAX_HASH};
pub use kernel::{Decomposition, Kernel, KernelObject};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use protocol::{CallRequest, CallResponse, WorkerMessage};
pub use registry::{FunctionRegistry, Inputs, Memo, Output};
