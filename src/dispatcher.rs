// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Caller-side transport: correlated, non-blocking calls into an executor

use crate::config::StartupPolicy;
use crate::error::BridgeError;
use crate::executor::Command;
use crate::lifecycle::Lifecycle;
use crate::protocol::{CallRequest, WorkerMessage};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Progress of one call as seen by its caller
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// The executor began processing the call
    Started,
    Finished(Result<Value, BridgeError>),
}

/// In-flight calls keyed by correlation id
pub(crate) struct PendingTable {
    sinks: DashMap<String, Sender<CallEvent>>,
    closed: AtomicBool,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            sinks: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn len(&self) -> usize {
        self.sinks.len()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn deliver(&self, message: WorkerMessage) {
        match message {
            WorkerMessage::Status(token) => {
                if let Some(sink) = self.sinks.get(&token.uid) {
                    let _ = sink.send(CallEvent::Started);
                }
            }
            WorkerMessage::Response(response) => match self.sinks.remove(&response.uid) {
                // The caller may have stopped listening; a late outcome is discarded
                Some((_, sink)) => {
                    let _ = sink.send(CallEvent::Finished(response.outcome));
                }
                None => tracing::warn!(uid = %response.uid, "response for unknown call"),
            },
        }
    }

    /// Reject everything still pending and refuse new entries
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let uids: Vec<String> = self.sinks.iter().map(|entry| entry.key().clone()).collect();
        if !uids.is_empty() {
            tracing::warn!(pending = uids.len(), "executor terminated with calls in flight");
        }
        for uid in uids {
            if let Some((_, sink)) = self.sinks.remove(&uid) {
                let _ = sink.send(CallEvent::Finished(Err(BridgeError::ExecutorTerminated)));
            }
        }
    }
}

/// Body of the router thread: forward executor messages to pending calls
pub(crate) fn route(events: Receiver<WorkerMessage>, table: Arc<PendingTable>) {
    for message in events.iter() {
        table.deliver(message);
    }
    table.close();
}

/// Caller-side handle for issuing calls. Cheap to clone; clones share one pending table.
#[derive(Clone)]
pub struct Dispatcher {
    name: Arc<str>,
    requests: Sender<Command>,
    table: Arc<PendingTable>,
    next_uid: Arc<AtomicU64>,
    lifecycle: Arc<Lifecycle>,
    startup: StartupPolicy,
}

impl Dispatcher {
    pub(crate) fn new(
        name: &str,
        requests: Sender<Command>,
        table: Arc<PendingTable>,
        lifecycle: Arc<Lifecycle>,
        startup: StartupPolicy,
    ) -> Self {
        Self {
            name: Arc::from(name),
            requests,
            table,
            next_uid: Arc::new(AtomicU64::new(0)),
            lifecycle,
            startup,
        }
    }

    /// Issue a call without waiting for it.
    ///
    /// Inputs are forwarded untouched; handles inside them are resolved by the executor.
    pub fn call(&self, function: &str, inputs: Value) -> Result<Pending, BridgeError> {
        if self.startup == StartupPolicy::Reject && !self.lifecycle.is_ready() {
            tracing::warn!(bridge = %self.name, function, "call rejected before kernel is ready");
            return Err(BridgeError::NotReady);
        }

        let uid = format!("{}-{}", self.name, self.next_uid.fetch_add(1, Ordering::Relaxed));
        let (sink, events) = bounded(2);
        self.table.sinks.insert(uid.clone(), sink);

        if self.table.is_closed() && self.table.sinks.remove(&uid).is_some() {
            return Err(BridgeError::ExecutorTerminated);
        }

        tracing::debug!(bridge = %self.name, %uid, function, "dispatching");
        let request = CallRequest::new(uid.clone(), function, inputs);
        match self.requests.try_send(Command::Call(request)) {
            Ok(()) => Ok(Pending::new(uid, events)),
            Err(error) => {
                self.table.sinks.remove(&uid);
                match error {
                    TrySendError::Full(_) => Err(BridgeError::QueueFull),
                    TrySendError::Disconnected(_) => Err(BridgeError::ExecutorTerminated),
                }
            }
        }
    }

    /// Issue a call and block until its outcome
    pub fn invoke(&self, function: &str, inputs: Value) -> Result<Value, BridgeError> {
        self.call(function, inputs)?.wait()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of calls awaiting a response
    pub fn in_flight(&self) -> usize {
        self.table.len()
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.requests.send(Command::Shutdown);
    }
}

/// Outcome sink of one call
pub struct Pending {
    uid: String,
    events: Receiver<CallEvent>,
    started: bool,
    outcome: Option<Result<Value, BridgeError>>,
}

impl Pending {
    fn new(uid: String, events: Receiver<CallEvent>) -> Self {
        Self {
            uid,
            events,
            started: false,
            outcome: None,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    fn absorb(&mut self, event: CallEvent) {
        match event {
            CallEvent::Started => self.started = true,
            CallEvent::Finished(outcome) => self.outcome = Some(outcome),
        }
    }

    fn poll(&mut self) {
        while self.outcome.is_none() {
            match self.events.try_recv() {
                Ok(event) => self.absorb(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.outcome = Some(Err(BridgeError::ExecutorTerminated));
                }
            }
        }
    }

    /// Whether the executor has begun processing this call
    pub fn has_started(&mut self) -> bool {
        self.poll();
        self.started
    }

    /// Take the outcome if it has arrived
    pub fn try_wait(&mut self) -> Option<Result<Value, BridgeError>> {
        self.poll();
        self.outcome.take()
    }

    /// Block until the outcome arrives
    pub fn wait(mut self) -> Result<Value, BridgeError> {
        loop {
            if let Some(outcome) = self.outcome.take() {
                return outcome;
            }
            match self.events.recv() {
                Ok(event) => self.absorb(event),
                Err(_) => return Err(BridgeError::ExecutorTerminated),
            }
        }
    }

    /// Block until the outcome arrives or the deadline passes.
    ///
    /// The call itself keeps running on a timeout; its outcome is discarded.
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<Value, BridgeError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(outcome) = self.outcome.take() {
                return outcome;
            }
            match self.events.recv_deadline(deadline) {
                Ok(event) => self.absorb(event),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(BridgeError::Timeout { uid: self.uid });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(BridgeError::ExecutorTerminated);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleState;
    use crate::protocol::CallResponse;
    use crossbeam_channel::unbounded;
    use serde_json::json;

    fn dispatcher(startup: StartupPolicy) -> (Dispatcher, Receiver<Command>, Arc<PendingTable>) {
        let (tx, rx) = unbounded();
        let table = Arc::new(PendingTable::new());
        let lifecycle = Arc::new(Lifecycle::new());
        let dispatcher = Dispatcher::new("test", tx, Arc::clone(&table), lifecycle, startup);
        (dispatcher, rx, table)
    }

    fn sent_uid(rx: &Receiver<Command>) -> String {
        match rx.try_recv().unwrap() {
            Command::Call(request) => request.uid,
            Command::Shutdown => panic!("expected a call"),
        }
    }

    #[test]
    fn test_fresh_uids() {
        let (dispatcher, rx, _) = dispatcher(StartupPolicy::Buffer);
        let a = dispatcher.call("op", json!({})).unwrap();
        let b = dispatcher.call("op", json!({})).unwrap();
        assert_ne!(a.uid(), b.uid());
        assert_eq!(sent_uid(&rx), a.uid());
        assert_eq!(sent_uid(&rx), b.uid());
        assert_eq!(dispatcher.in_flight(), 2);
    }

    #[test]
    fn test_responses_resolve_matching_entry() {
        let (dispatcher, rx, table) = dispatcher(StartupPolicy::Buffer);
        let mut first = dispatcher.call("op", json!(1)).unwrap();
        let second = dispatcher.call("op", json!(2)).unwrap();
        let (uid1, uid2) = (sent_uid(&rx), sent_uid(&rx));

        table.deliver(WorkerMessage::busy(uid2.clone()));
        table.deliver(WorkerMessage::Response(CallResponse::failure(
            uid2,
            BridgeError::FunctionNotFound("op".into()),
        )));
        assert!(!first.has_started());
        assert!(first.try_wait().is_none());
        assert_eq!(second.wait(), Err(BridgeError::FunctionNotFound("op".into())));

        table.deliver(WorkerMessage::busy(uid1.clone()));
        assert!(first.has_started());
        table.deliver(WorkerMessage::Response(CallResponse::success(uid1, json!("ok"))));
        assert_eq!(first.try_wait(), Some(Ok(json!("ok"))));
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn test_close_rejects_pending_and_new_calls() {
        let (dispatcher, _rx, table) = dispatcher(StartupPolicy::Buffer);
        let pending = dispatcher.call("op", json!({})).unwrap();
        table.close();
        assert_eq!(pending.wait(), Err(BridgeError::ExecutorTerminated));
        assert_eq!(
            dispatcher.call("op", json!({})).err(),
            Some(BridgeError::ExecutorTerminated)
        );
    }

    #[test]
    fn test_disconnected_executor() {
        let (dispatcher, rx, _) = dispatcher(StartupPolicy::Buffer);
        drop(rx);
        assert_eq!(
            dispatcher.call("op", json!({})).err(),
            Some(BridgeError::ExecutorTerminated)
        );
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn test_queue_full() {
        let (tx, _rx) = bounded(1);
        let table = Arc::new(PendingTable::new());
        let dispatcher = Dispatcher::new(
            "small",
            tx,
            table,
            Arc::new(Lifecycle::new()),
            StartupPolicy::Buffer,
        );
        assert!(dispatcher.call("op", json!({})).is_ok());
        assert_eq!(dispatcher.call("op", json!({})).err(), Some(BridgeError::QueueFull));
        assert_eq!(dispatcher.in_flight(), 1);
    }

    #[test]
    fn test_reject_before_ready() {
        let (dispatcher, _rx, _) = dispatcher(StartupPolicy::Reject);
        assert_eq!(dispatcher.call("op", json!({})).err(), Some(BridgeError::NotReady));

        dispatcher.lifecycle().transition(LifecycleState::Initializing);
        dispatcher.lifecycle().transition(LifecycleState::Ready);
        assert!(dispatcher.call("op", json!({})).is_ok());
    }

    #[test]
    fn test_wait_timeout_discards_late_outcome() {
        let (dispatcher, rx, table) = dispatcher(StartupPolicy::Buffer);
        let pending = dispatcher.call("op", json!({})).unwrap();
        let uid = sent_uid(&rx);

        let result = pending.wait_timeout(Duration::from_millis(10));
        assert_eq!(result, Err(BridgeError::Timeout { uid: uid.clone() }));

        // The late response finds a dropped sink and is ignored
        table.deliver(WorkerMessage::Response(CallResponse::success(uid, json!(1))));
        assert_eq!(dispatcher.in_flight(), 0);
    }
}
