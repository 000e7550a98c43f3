// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Executor lifecycle tracking
//!
//! ```text
//! Uninitialized -> Initializing -> Ready <-> Busy
//!        ^______________|____________|_______|   (executor torn down)
//! ```
//!
//! Only the executor writes the state. Observers read it, subscribe to transitions
//! or block until a state is reached.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Current status of one executor; serialized as the broadcast value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    #[serde(rename = "uninitialised")]
    Uninitialized,
    #[serde(rename = "initialised")]
    Initializing,
    #[serde(rename = "loaded")]
    Ready,
    #[serde(rename = "computing")]
    Busy,
}

impl LifecycleState {
    /// Whether the executor may move from `self` to `next`
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Uninitialized, Initializing)
                | (Initializing, Ready)
                | (Ready, Busy)
                | (Busy, Ready)
                | (_, Uninitialized)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialised",
            Self::Initializing => "initialised",
            Self::Ready => "loaded",
            Self::Busy => "computing",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state machine shared between an executor and its observers
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
    changed: Condvar,
    listeners: Mutex<Vec<Sender<LifecycleState>>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState::Uninitialized),
            changed: Condvar::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), LifecycleState::Ready | LifecycleState::Busy)
    }

    /// Stream of every subsequent transition
    pub fn subscribe(&self) -> Receiver<LifecycleState> {
        let (tx, rx) = unbounded();
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    /// Block until the state equals `target`, or the timeout elapses
    pub fn wait_for(&self, target: LifecycleState, timeout: Duration) -> bool {
        self.wait_until(|state| state == target, timeout)
    }

    /// Block until `reached` holds for the current state, or the timeout elapses
    pub fn wait_until(&self, reached: impl Fn(LifecycleState) -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock_state();
        while !reached(*state) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Move to `next`. Repeated states are not re-broadcast.
    pub(crate) fn transition(&self, next: LifecycleState) {
        let mut state = self.lock_state();
        let current = *state;
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            tracing::warn!(from = %current, to = %next, "unexpected lifecycle transition");
        }
        *state = next;
        drop(state);

        tracing::debug!(from = %current, to = %next, "lifecycle transition");
        self.changed.notify_all();
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|listener| listener.send(next).is_ok());
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_transition_table() {
        use LifecycleState::*;
        assert!(Uninitialized.can_transition_to(Initializing));
        assert!(Initializing.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Busy));
        assert!(Busy.can_transition_to(Ready));
        assert!(Busy.can_transition_to(Uninitialized));
        assert!(!Uninitialized.can_transition_to(Busy));
        assert!(!Initializing.can_transition_to(Busy));
    }

    #[test]
    fn test_broadcast_values() {
        assert_eq!(
            serde_json::to_value(LifecycleState::Initializing).unwrap(),
            serde_json::json!("initialised")
        );
        assert_eq!(LifecycleState::Busy.to_string(), "computing");
        assert_eq!(LifecycleState::Ready.to_string(), "loaded");
    }

    #[test]
    fn test_subscribers_see_transitions_once() {
        let lifecycle = Lifecycle::new();
        let events = lifecycle.subscribe();

        lifecycle.transition(LifecycleState::Initializing);
        lifecycle.transition(LifecycleState::Ready);
        lifecycle.transition(LifecycleState::Busy);
        lifecycle.transition(LifecycleState::Busy);
        lifecycle.transition(LifecycleState::Ready);

        let seen: Vec<_> = events.try_iter().collect();
        assert_eq!(
            seen,
            vec![
                LifecycleState::Initializing,
                LifecycleState::Ready,
                LifecycleState::Busy,
                LifecycleState::Ready,
            ]
        );
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let lifecycle = Lifecycle::new();
        drop(lifecycle.subscribe());
        lifecycle.transition(LifecycleState::Initializing);
        assert!(lifecycle.listeners.lock().unwrap().is_empty());
    }

    #[test]
    fn test_wait_for() {
        let lifecycle = Arc::new(Lifecycle::new());
        assert!(!lifecycle.wait_for(LifecycleState::Ready, Duration::from_millis(10)));

        let writer = Arc::clone(&lifecycle);
        let handle = thread::spawn(move || {
            writer.transition(LifecycleState::Initializing);
            writer.transition(LifecycleState::Ready);
        });

        assert!(lifecycle.wait_for(LifecycleState::Ready, Duration::from_secs(5)));
        handle.join().unwrap();
        assert!(lifecycle.is_ready());
    }
}
