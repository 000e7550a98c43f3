// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Compute-side runtime: one kernel, one registry, one store, one request at a time

use crate::cache::{cache_key, CacheStats, HandleStore};
use crate::error::BridgeError;
use crate::handle::Handle;
use crate::kernel::{Kernel, KernelObject};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::protocol::{CallRequest, CallResponse, WorkerMessage};
use crate::registry::{FunctionRegistry, Inputs, Memo, Output};
use crossbeam_channel::{Receiver, Sender};
use serde_json::{json, Value};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Distinguishes executors in this process so uncached keys never repeat
static INSTANCES: AtomicU64 = AtomicU64::new(0);

/// Builds a fresh kernel inside the executor thread
pub type KernelFactory<K> = Arc<dyn Fn() -> anyhow::Result<K> + Send + Sync>;

/// What travels down the request channel
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Call(CallRequest),
    /// Stop after the calls queued ahead of this command
    Shutdown,
}

/// Operations handled by the executor itself, outside the function registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminOp {
    ClearCache,
    Ping,
    Decompose,
    DecomposeMany,
    DeleteHandle,
    DeleteHandles,
    CacheStats,
    Operations,
}

impl AdminOp {
    pub const ALL: [AdminOp; 8] = [
        AdminOp::ClearCache,
        AdminOp::Ping,
        AdminOp::Decompose,
        AdminOp::DecomposeMany,
        AdminOp::DeleteHandle,
        AdminOp::DeleteHandles,
        AdminOp::CacheStats,
        AdminOp::Operations,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ClearCache => "bridge.clearCache",
            Self::Ping => "bridge.ping",
            Self::Decompose => "bridge.decompose",
            Self::DecomposeMany => "bridge.decomposeMany",
            Self::DeleteHandle => "bridge.deleteHandle",
            Self::DeleteHandles => "bridge.deleteHandles",
            Self::CacheStats => "bridge.cacheStats",
            Self::Operations => "bridge.operations",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

/// Single sequential processor hosting one kernel
pub struct Executor<K: Kernel> {
    kernel: K,
    registry: FunctionRegistry<K>,
    store: HandleStore<K::Object>,
    lifecycle: Arc<Lifecycle>,
    instance: u64,
    sequence: u64,
}

impl<K: Kernel> Executor<K> {
    /// Construct the kernel and its registry, driving the lifecycle to `Ready`
    pub fn initialize(
        factory: &KernelFactory<K>,
        lifecycle: Arc<Lifecycle>,
    ) -> Result<Self, BridgeError> {
        lifecycle.transition(LifecycleState::Initializing);
        let start = Instant::now();

        let kernel = factory().map_err(|e| BridgeError::Initialization(format!("{:#}", e)))?;
        let registry = FunctionRegistry::build()?;

        tracing::info!(
            family = K::FAMILY,
            operations = registry.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "kernel loaded"
        );
        lifecycle.transition(LifecycleState::Ready);

        Ok(Self {
            kernel,
            registry,
            store: HandleStore::new(),
            lifecycle,
            instance: INSTANCES.fetch_add(1, Ordering::Relaxed),
            sequence: 0,
        })
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn registry(&self) -> &FunctionRegistry<K> {
        &self.registry
    }

    /// Process requests in arrival order until shutdown or until every sender is gone
    pub fn serve(&mut self, requests: &Receiver<Command>, events: &Sender<WorkerMessage>) {
        for command in requests.iter() {
            let request = match command {
                Command::Call(request) => request,
                Command::Shutdown => break,
            };
            self.lifecycle.transition(LifecycleState::Busy);
            if events.send(WorkerMessage::busy(request.uid.clone())).is_err() {
                break;
            }

            let response = self.handle(&request);
            if events.send(WorkerMessage::Response(response)).is_err() {
                break;
            }

            if requests.is_empty() {
                self.lifecycle.transition(LifecycleState::Ready);
            }
        }
        self.lifecycle.transition(LifecycleState::Ready);
    }

    /// Answer one request. Per-call failures never leave the executor unusable.
    pub fn handle(&mut self, request: &CallRequest) -> CallResponse {
        let start = Instant::now();
        let outcome = self.execute(request.function_name(), request.inputs());

        match &outcome {
            Ok(_) => tracing::debug!(
                uid = %request.uid,
                function = request.function_name(),
                elapsed_us = start.elapsed().as_micros() as u64,
                "call completed"
            ),
            Err(error) => tracing::debug!(
                uid = %request.uid,
                function = request.function_name(),
                %error,
                "call failed"
            ),
        }

        CallResponse {
            uid: request.uid.clone(),
            outcome,
        }
    }

    /// Resolve, memoize and invoke one operation
    pub fn execute(&mut self, function: &str, inputs: &Value) -> Result<Value, BridgeError> {
        if let Some(admin) = AdminOp::parse(function) {
            return self.execute_admin(admin, inputs);
        }

        let operation = self.registry.resolve(function)?;
        self.check_handles(inputs)?;

        let key = match operation.memo() {
            Memo::Cached => {
                let key = cache_key(function, inputs);
                if let Some(handle) = self.store.lookup(key) {
                    return Ok(handle.to_value());
                }
                key
            }
            Memo::Uncached => {
                self.sequence += 1;
                cache_key(function, &json!([inputs, self.instance, self.sequence]))
            }
        };

        let output = {
            let resolved = Inputs::new(inputs, &self.store);
            let kernel = &mut self.kernel;
            panic::catch_unwind(AssertUnwindSafe(|| operation.invoke(kernel, &resolved)))
                .unwrap_or_else(|payload| Err(anyhow::anyhow!(panic_message(payload.as_ref()))))
        }
        .map_err(|error| kernel_error(function, error))?;

        match output {
            Output::Value(value) => Ok(value),
            Output::Object(object) => {
                let kind_tag = object.kind_tag();
                Ok(self.store.insert(key, kind_tag, object).to_value())
            }
        }
    }

    /// Every handle embedded in the inputs must name a live object
    fn check_handles(&self, inputs: &Value) -> Result<(), BridgeError> {
        let mut handles = Vec::new();
        Handle::collect(inputs, &mut handles);
        match handles.iter().find(|handle| !self.store.contains(handle)) {
            Some(missing) => Err(BridgeError::handle_not_found(missing)),
            None => Ok(()),
        }
    }

    fn execute_admin(&mut self, op: AdminOp, inputs: &Value) -> Result<Value, BridgeError> {
        match op {
            AdminOp::ClearCache => {
                let dropped = self.store.len();
                self.store.clear();
                tracing::info!(family = K::FAMILY, dropped, "cache cleared");
                Ok(json!({}))
            }
            AdminOp::Ping => Ok(json!({})),
            AdminOp::Decompose => {
                self.check_handles(inputs)?;
                let object = Inputs::new(inputs, &self.store).object("shape")?;
                Ok(serde_json::to_value(object.decompose())?)
            }
            AdminOp::DecomposeMany => {
                self.check_handles(inputs)?;
                let objects = Inputs::new(inputs, &self.store).objects("shapes")?;
                let decomposed: Vec<_> = objects.iter().map(|object| object.decompose()).collect();
                Ok(serde_json::to_value(decomposed)?)
            }
            AdminOp::DeleteHandle => {
                let handle = Inputs::new(inputs, &self.store).handle("shape")?;
                let deleted = self.store.remove(&handle);
                Ok(json!({ "deleted": deleted }))
            }
            AdminOp::DeleteHandles => {
                let handles: Vec<Handle> = Inputs::new(inputs, &self.store).get("shapes")?;
                let deleted = self.store.remove_many(&handles);
                Ok(json!({ "deleted": deleted }))
            }
            AdminOp::CacheStats => Ok(serde_json::to_value(self.store.stats())?),
            AdminOp::Operations => Ok(json!(self.registry.names())),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("kernel panicked: {}", detail)
}

fn kernel_error(function: &str, error: anyhow::Error) -> BridgeError {
    match error.downcast::<BridgeError>() {
        Ok(error) => error,
        Err(error) => BridgeError::KernelExecution {
            function: function.to_string(),
            message: format!("{:#}", error),
        },
    }
}

/// Resets the lifecycle when the executor thread exits, including by panic
struct Teardown(Arc<Lifecycle>);

impl Drop for Teardown {
    fn drop(&mut self) {
        self.0.transition(LifecycleState::Uninitialized);
    }
}

/// Body of an executor thread
pub(crate) fn run<K: Kernel>(
    factory: KernelFactory<K>,
    lifecycle: Arc<Lifecycle>,
    requests: Receiver<Command>,
    events: Sender<WorkerMessage>,
) {
    let _teardown = Teardown(Arc::clone(&lifecycle));

    match Executor::initialize(&factory, Arc::clone(&lifecycle)) {
        Ok(mut executor) => {
            executor.serve(&requests, &events);
            tracing::info!(family = K::FAMILY, "executor stopped");
        }
        Err(error) => {
            tracing::warn!(family = K::FAMILY, %error, "kernel failed to initialize");
            lifecycle.transition(LifecycleState::Uninitialized);
            for command in requests.iter() {
                let request = match command {
                    Command::Call(request) => request,
                    Command::Shutdown => break,
                };
                let busy = events.send(WorkerMessage::busy(request.uid.clone()));
                let response = CallResponse::failure(request.uid, error.clone());
                if busy.is_err() || events.send(WorkerMessage::Response(response)).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Decomposition;
    use crossbeam_channel::unbounded;

    /// Kernel that counts handler invocations
    #[derive(Default)]
    struct Tally {
        invocations: u32,
    }

    struct Marker(i64);

    impl KernelObject for Marker {
        fn kind_tag(&self) -> &'static str {
            "marker"
        }

        fn decompose(&self) -> Decomposition {
            Decomposition::Polygons {
                polygons: vec![vec![[self.0 as f64, 0.0, 0.0]]],
            }
        }
    }

    impl Kernel for Tally {
        type Object = Marker;
        const FAMILY: &'static str = "tally";

        fn register(registry: &mut FunctionRegistry<Self>) -> Result<(), BridgeError> {
            registry.register("tally.mark", |kernel, inputs| {
                kernel.invocations += 1;
                Ok(Output::object(Marker(inputs.get("value")?)))
            })?;
            registry.register("tally.shift", |kernel, inputs| {
                kernel.invocations += 1;
                let marker = inputs.object("marker")?;
                Ok(Output::object(Marker(marker.0 + inputs.get::<i64>("by")?)))
            })?;
            registry.register("tally.count", |kernel, _| Ok(Output::value(kernel.invocations)?))?;
            registry.register("tally.fail", |kernel, _| {
                kernel.invocations += 1;
                anyhow::bail!("degenerate geometry")
            })?;
            registry.register("tally.crash", |_, _| panic!("marker overflow"))?;
            registry.register_uncached("tally.fresh", |kernel, _| {
                kernel.invocations += 1;
                Ok(Output::object(Marker(0)))
            })
        }
    }

    fn executor() -> Executor<Tally> {
        let factory: KernelFactory<Tally> =
            Arc::new(|| -> anyhow::Result<Tally> { Ok(Tally::default()) });
        Executor::initialize(&factory, Arc::new(Lifecycle::new())).unwrap()
    }

    fn invocations(executor: &mut Executor<Tally>) -> u64 {
        executor.execute("tally.count", &json!({})).unwrap().as_u64().unwrap()
    }

    #[test]
    fn test_initialize_reaches_ready() {
        let executor = executor();
        assert_eq!(executor.lifecycle().state(), LifecycleState::Ready);
        assert_eq!(executor.registry().len(), 6);
    }

    #[test]
    fn test_failed_factory() {
        let factory: KernelFactory<Tally> =
            Arc::new(|| -> anyhow::Result<Tally> { anyhow::bail!("wasm module missing") });
        let result = Executor::initialize(&factory, Arc::new(Lifecycle::new()));
        match result {
            Err(BridgeError::Initialization(message)) => {
                assert!(message.contains("wasm module missing"))
            }
            _ => panic!("expected an initialization error"),
        }
    }

    #[test]
    fn test_memoized_call_skips_handler() {
        let mut executor = executor();
        let first = executor.execute("tally.mark", &json!({"value": 4})).unwrap();
        let second = executor.execute("tally.mark", &json!({"value": 4.0})).unwrap();

        assert_eq!(first, second);
        assert_eq!(invocations(&mut executor), 1);
        assert_eq!(executor.cache_stats().hits, 1);
    }

    #[test]
    fn test_distinct_inputs_distinct_handles() {
        let mut executor = executor();
        let a = executor.execute("tally.mark", &json!({"value": 1})).unwrap();
        let b = executor.execute("tally.mark", &json!({"value": 2})).unwrap();
        assert_ne!(Handle::from_value(&a).unwrap().hash, Handle::from_value(&b).unwrap().hash);
    }

    #[test]
    fn test_handles_resolve_to_objects() {
        let mut executor = executor();
        let marker = executor.execute("tally.mark", &json!({"value": 10})).unwrap();
        let shifted = executor
            .execute("tally.shift", &json!({"marker": marker, "by": 5}))
            .unwrap();

        let decomposed = executor
            .execute("bridge.decompose", &json!({"shape": shifted}))
            .unwrap();
        assert_eq!(decomposed["polygons"][0][0][0], json!(15.0));
    }

    #[test]
    fn test_missing_handle_aborts_before_invocation() {
        let mut executor = executor();
        let result = executor.execute(
            "tally.shift",
            &json!({"marker": {"hash": 999_999, "kindTag": "marker"}, "by": 1}),
        );
        assert_eq!(
            result,
            Err(BridgeError::HandleNotFound {
                hash: 999_999,
                kind_tag: "marker".into()
            })
        );
        assert_eq!(invocations(&mut executor), 0);
    }

    #[test]
    fn test_kernel_failure_leaves_cache_untouched() {
        let mut executor = executor();
        let result = executor.execute("tally.fail", &json!({}));
        match result {
            Err(BridgeError::KernelExecution { function, message }) => {
                assert_eq!(function, "tally.fail");
                assert!(message.contains("degenerate geometry"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(executor.cache_stats().entries, 0);

        // A failed call is not memoized
        let _ = executor.execute("tally.fail", &json!({}));
        assert_eq!(invocations(&mut executor), 2);
    }

    #[test]
    fn test_panicking_handler_is_a_kernel_error() {
        let mut executor = executor();
        let result = executor.execute("tally.crash", &json!({}));
        match result {
            Err(BridgeError::KernelExecution { function, message }) => {
                assert_eq!(function, "tally.crash");
                assert_eq!(message, "kernel panicked: marker overflow");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(executor.cache_stats().entries, 0);
        assert!(executor.execute("tally.mark", &json!({"value": 1})).is_ok());
    }

    #[test]
    fn test_input_shape_errors_are_serialization_errors() {
        let mut executor = executor();
        let result = executor.execute("tally.mark", &json!({"value": "four"}));
        assert!(matches!(result, Err(BridgeError::Serialization(_))));
    }

    #[test]
    fn test_uncached_operation_always_runs() {
        let mut executor = executor();
        let a = executor.execute("tally.fresh", &json!({})).unwrap();
        let b = executor.execute("tally.fresh", &json!({})).unwrap();
        assert_ne!(a, b);
        assert_eq!(invocations(&mut executor), 2);
        assert_eq!(executor.cache_stats().entries, 2);
    }

    #[test]
    fn test_uncached_handles_differ_between_executors() {
        let mut first = executor();
        let mut second = executor();
        let a = first.execute("tally.fresh", &json!({})).unwrap();
        let b = second.execute("tally.fresh", &json!({})).unwrap();
        assert_ne!(a, b);

        let result = second.execute("bridge.decompose", &json!({ "shape": a }));
        assert!(matches!(result, Err(BridgeError::HandleNotFound { .. })));
    }

    #[test]
    fn test_unknown_function_then_valid_call() {
        let mut executor = executor();
        assert_eq!(
            executor.execute("tally.nothing", &json!({})),
            Err(BridgeError::FunctionNotFound("tally.nothing".into()))
        );
        assert_eq!(
            executor.execute("bridge.nothing", &json!({})),
            Err(BridgeError::FunctionNotFound("bridge.nothing".into()))
        );
        assert!(executor.execute("tally.mark", &json!({"value": 1})).is_ok());
    }

    #[test]
    fn test_clear_cache_invalidates_handles() {
        let mut executor = executor();
        let marker = executor.execute("tally.mark", &json!({"value": 1})).unwrap();
        assert_eq!(executor.execute("bridge.clearCache", &Value::Null).unwrap(), json!({}));

        let result = executor.execute("tally.shift", &json!({"marker": marker, "by": 1}));
        assert!(matches!(result, Err(BridgeError::HandleNotFound { .. })));
    }

    #[test]
    fn test_delete_handles() {
        let mut executor = executor();
        let a = executor.execute("tally.mark", &json!({"value": 1})).unwrap();
        let b = executor.execute("tally.mark", &json!({"value": 2})).unwrap();
        let c = executor.execute("tally.mark", &json!({"value": 3})).unwrap();

        let single = executor.execute("bridge.deleteHandle", &json!({"shape": a})).unwrap();
        assert_eq!(single, json!({"deleted": true}));

        let batch = executor
            .execute("bridge.deleteHandles", &json!({"shapes": [a, b]}))
            .unwrap();
        assert_eq!(batch, json!({"deleted": 1}));

        let stats = executor.execute("bridge.cacheStats", &Value::Null).unwrap();
        assert_eq!(stats["entries"], json!(1));

        let many = executor
            .execute("bridge.decomposeMany", &json!({"shapes": [c]}))
            .unwrap();
        assert_eq!(many.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_admin_listing() {
        let mut executor = executor();
        assert_eq!(executor.execute("bridge.ping", &Value::Null).unwrap(), json!({}));
        let names = executor.execute("bridge.operations", &Value::Null).unwrap();
        assert_eq!(names[0], json!("tally.count"));
        for op in AdminOp::ALL {
            assert_eq!(AdminOp::parse(op.name()), Some(op));
        }
    }

    #[test]
    fn test_serve_emits_busy_before_result() {
        let (request_tx, request_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();

        let calls = [
            CallRequest::new("1", "tally.mark", json!({"value": 1})),
            CallRequest::new("2", "tally.missing", json!({})),
            CallRequest::new("3", "bridge.ping", Value::Null),
        ];
        for call in calls {
            request_tx.send(Command::Call(call)).unwrap();
        }
        request_tx.send(Command::Shutdown).unwrap();
        request_tx
            .send(Command::Call(CallRequest::new("4", "bridge.ping", Value::Null)))
            .unwrap();

        let mut executor = executor();
        executor.serve(&request_rx, &event_tx);
        drop(event_tx);

        let events: Vec<WorkerMessage> = event_rx.iter().collect();
        assert_eq!(events.len(), 6);
        for (i, pair) in events.chunks(2).enumerate() {
            let uid = (i + 1).to_string();
            assert!(!pair[0].is_terminal());
            assert!(pair[1].is_terminal());
            assert_eq!(pair[0].uid(), uid);
            assert_eq!(pair[1].uid(), uid);
        }
        assert_eq!(executor.lifecycle().state(), LifecycleState::Ready);
    }

    #[test]
    fn test_failed_initialization_answers_every_request() {
        let (request_tx, request_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        request_tx
            .send(Command::Call(CallRequest::new("a", "tally.mark", json!({"value": 1}))))
            .unwrap();
        drop(request_tx);

        let factory: KernelFactory<Tally> =
            Arc::new(|| -> anyhow::Result<Tally> { anyhow::bail!("no kernel") });
        let lifecycle = Arc::new(Lifecycle::new());
        run(factory, Arc::clone(&lifecycle), request_rx, event_tx);

        let events: Vec<WorkerMessage> = event_rx.iter().collect();
        assert_eq!(events.len(), 2);
        match &events[1] {
            WorkerMessage::Response(response) => {
                assert!(matches!(response.outcome, Err(BridgeError::Initialization(_))))
            }
            WorkerMessage::Status(_) => panic!("expected a response"),
        }
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
    }
}
