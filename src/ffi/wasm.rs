// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! WASM bindings using wasm-bindgen
//!
//! The JavaScript worker owns the event loop, so the executor runs inline: each
//! `handle` call processes one request and returns both emissions.

use crate::executor::{Executor, KernelFactory};
use crate::kernels::ManifoldKernel;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::protocol::{CallRequest, WorkerMessage};
use std::sync::Arc;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmExecutor {
    inner: Executor<ManifoldKernel>,
}

#[wasm_bindgen]
impl WasmExecutor {
    /// Load the manifold kernel
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<WasmExecutor, JsValue> {
        let factory: KernelFactory<ManifoldKernel> = Arc::new(ManifoldKernel::load);
        let inner = Executor::initialize(&factory, Arc::new(Lifecycle::new()))
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(Self { inner })
    }

    /// Process one request; returns `[status, response]` as a JSON array string
    pub fn handle(&mut self, request: &str) -> Result<String, JsValue> {
        let request: CallRequest = serde_json::from_str(request)
            .map_err(|e| JsValue::from_str(&format!("Malformed request: {}", e)))?;

        let lifecycle = Arc::clone(self.inner.lifecycle());
        lifecycle.transition(LifecycleState::Busy);
        let busy = WorkerMessage::busy(request.uid.clone());
        let response = WorkerMessage::Response(self.inner.handle(&request));
        lifecycle.transition(LifecycleState::Ready);

        serde_json::to_string(&[busy, response])
            .map_err(|e| JsValue::from_str(&format!("JSON serialization error: {}", e)))
    }

    /// Current lifecycle broadcast value
    pub fn state(&self) -> String {
        self.inner.lifecycle().state().to_string()
    }
}

/// Get version information
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
