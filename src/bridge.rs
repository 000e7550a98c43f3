// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! One executor thread plus the caller-side machinery that talks to it
//!
//! A [`Bridge`] owns the executor and router threads of one kernel. Separate
//! bridges share nothing: each has its own kernel, cache and handle space.

use crate::cache::CacheStats;
use crate::config::BridgeConfig;
use crate::dispatcher::{self, Dispatcher, Pending, PendingTable};
use crate::error::BridgeError;
use crate::executor::{self, AdminOp, KernelFactory};
use crate::handle::Handle;
use crate::kernel::{Decomposition, Kernel};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crossbeam_channel::{bounded, unbounded, Receiver};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Threads backing one executor generation
struct Workers {
    dispatcher: Dispatcher,
    executor: JoinHandle<()>,
    router: JoinHandle<()>,
}

/// Owner of one kernel executor
pub struct Bridge<K: Kernel> {
    name: String,
    config: BridgeConfig,
    factory: KernelFactory<K>,
    lifecycle: Arc<Lifecycle>,
    workers: Option<Workers>,
    generation: u64,
}

impl<K: Kernel> Bridge<K> {
    /// Start an executor thread; the kernel is built inside it by `factory`.
    ///
    /// Returns immediately. Calls issued before the kernel is loaded follow
    /// the configured startup policy.
    pub fn spawn<F>(config: BridgeConfig, factory: F) -> Result<Self, BridgeError>
    where
        F: Fn() -> anyhow::Result<K> + Send + Sync + 'static,
    {
        config
            .validate()
            .map_err(|e| BridgeError::Initialization(format!("{:#}", e)))?;
        let name = config.name_or(K::FAMILY).to_string();
        let mut bridge = Self {
            name,
            config,
            factory: Arc::new(factory),
            lifecycle: Arc::new(Lifecycle::new()),
            workers: None,
            generation: 0,
        };
        bridge.start()?;
        Ok(bridge)
    }

    fn start(&mut self) -> Result<(), BridgeError> {
        let (request_tx, request_rx) = match self.config.queue_capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };
        let (event_tx, event_rx) = unbounded();
        let table = Arc::new(PendingTable::new());

        let mut builder = thread::Builder::new().name(format!("{}-executor", self.name));
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }
        let factory = Arc::clone(&self.factory);
        let lifecycle = Arc::clone(&self.lifecycle);
        let executor = builder
            .spawn(move || executor::run(factory, lifecycle, request_rx, event_tx))
            .map_err(|e| BridgeError::Initialization(format!("spawn executor: {}", e)))?;

        let router_table = Arc::clone(&table);
        let router = thread::Builder::new()
            .name(format!("{}-router", self.name))
            .spawn(move || dispatcher::route(event_rx, router_table))
            .map_err(|e| BridgeError::Initialization(format!("spawn router: {}", e)))?;

        let dispatcher = Dispatcher::new(
            &self.name,
            request_tx,
            table,
            Arc::clone(&self.lifecycle),
            self.config.startup,
        );

        self.generation += 1;
        tracing::info!(
            bridge = %self.name,
            family = K::FAMILY,
            generation = self.generation,
            "executor spawned"
        );
        self.workers = Some(Workers {
            dispatcher,
            executor,
            router,
        });
        Ok(())
    }

    /// Stop the current executor after the calls already queued, and wait for it
    fn stop(&mut self) {
        let Some(workers) = self.workers.take() else {
            return;
        };
        workers.dispatcher.shutdown();
        drop(workers.dispatcher);

        if workers.executor.join().is_err() {
            tracing::warn!(bridge = %self.name, "executor thread panicked");
        }
        if workers.router.join().is_err() {
            tracing::warn!(bridge = %self.name, "router thread panicked");
        }
    }

    /// Tear down the executor and start a fresh one.
    ///
    /// The cache starts empty; handles from earlier generations no longer resolve.
    pub fn restart(&mut self) -> Result<(), BridgeError> {
        tracing::info!(bridge = %self.name, generation = self.generation, "restarting executor");
        self.stop();
        self.start()
    }

    /// Stop the executor, answering queued calls first
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn workers(&self) -> Result<&Workers, BridgeError> {
        self.workers.as_ref().ok_or(BridgeError::ExecutorTerminated)
    }

    /// Cloneable caller-side handle to the current executor
    pub fn dispatcher(&self) -> Result<Dispatcher, BridgeError> {
        Ok(self.workers()?.dispatcher.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Number of executors started so far, including restarts
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Stream of lifecycle transitions
    pub fn subscribe(&self) -> Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Block until the kernel is loaded, or the timeout elapses
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        self.lifecycle.wait_until(
            |state| matches!(state, LifecycleState::Ready | LifecycleState::Busy),
            timeout,
        )
    }

    /// Issue a call without waiting for it
    pub fn call(&self, function: &str, inputs: Value) -> Result<Pending, BridgeError> {
        self.workers()?.dispatcher.call(function, inputs)
    }

    /// Issue a call and block until its outcome
    pub fn invoke(&self, function: &str, inputs: Value) -> Result<Value, BridgeError> {
        self.call(function, inputs)?.wait()
    }

    /// Invoke an operation that produces a native object
    pub fn invoke_handle(&self, function: &str, inputs: Value) -> Result<Handle, BridgeError> {
        let value = self.invoke(function, inputs)?;
        Handle::from_value(&value).ok_or_else(|| {
            BridgeError::serialization(format!("{} did not return a handle: {}", function, value))
        })
    }

    fn invoke_admin<T: DeserializeOwned>(
        &self,
        op: AdminOp,
        inputs: Value,
    ) -> Result<T, BridgeError> {
        let value = self.invoke(op.name(), inputs)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Renderable data of the object behind a handle
    pub fn decompose(&self, handle: &Handle) -> Result<Decomposition, BridgeError> {
        self.invoke_admin(AdminOp::Decompose, json!({ "shape": handle }))
    }

    pub fn decompose_many(&self, handles: &[Handle]) -> Result<Vec<Decomposition>, BridgeError> {
        self.invoke_admin(AdminOp::DecomposeMany, json!({ "shapes": handles }))
    }

    /// Release one object. Returns whether it was still cached.
    pub fn delete(&self, handle: &Handle) -> Result<bool, BridgeError> {
        let reply: Value = self.invoke_admin(AdminOp::DeleteHandle, json!({ "shape": handle }))?;
        Ok(reply["deleted"].as_bool().unwrap_or(false))
    }

    /// Release several objects. Returns how many were still cached.
    pub fn delete_many(&self, handles: &[Handle]) -> Result<usize, BridgeError> {
        let reply: Value = self.invoke_admin(AdminOp::DeleteHandles, json!({ "shapes": handles }))?;
        Ok(reply["deleted"].as_u64().unwrap_or(0) as usize)
    }

    /// Drop every cached object; all outstanding handles become stale
    pub fn clear_cache(&self) -> Result<(), BridgeError> {
        self.invoke(AdminOp::ClearCache.name(), Value::Null).map(|_| ())
    }

    /// Round trip through the executor queue
    pub fn ping(&self) -> Result<(), BridgeError> {
        self.invoke(AdminOp::Ping.name(), Value::Null).map(|_| ())
    }

    pub fn cache_stats(&self) -> Result<CacheStats, BridgeError> {
        self.invoke_admin(AdminOp::CacheStats, Value::Null)
    }

    /// Names of every registered kernel operation, sorted
    pub fn operations(&self) -> Result<Vec<String>, BridgeError> {
        self.invoke_admin(AdminOp::Operations, Value::Null)
    }
}

impl<K: Kernel> Drop for Bridge<K> {
    fn drop(&mut self) {
        self.stop();
    }
}
