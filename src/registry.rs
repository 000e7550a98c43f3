// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Function registry: canonical operation names bound to typed handlers

use crate::cache::HandleStore;
use crate::error::BridgeError;
use crate::handle::Handle;
use crate::kernel::Kernel;
use ahash::AHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Prefix reserved for operations the executor handles itself
pub const ADMIN_PREFIX: &str = "bridge.";

/// Handler bound to a live kernel
pub type Handler<K> = Box<
    dyn Fn(&mut K, &Inputs<'_, <K as Kernel>::Object>) -> anyhow::Result<Output<<K as Kernel>::Object>>,
>;

/// Whether results of an operation may be memoized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Memo {
    /// Deterministic: identical inputs always produce an equivalent object
    Cached,
    /// Always invoke the handler
    Uncached,
}

/// A registered operation
pub struct Operation<K: Kernel> {
    handler: Handler<K>,
    memo: Memo,
}

impl<K: Kernel> Operation<K> {
    pub fn memo(&self) -> Memo {
        self.memo
    }

    pub fn invoke(
        &self,
        kernel: &mut K,
        inputs: &Inputs<'_, K::Object>,
    ) -> anyhow::Result<Output<K::Object>> {
        (self.handler)(kernel, inputs)
    }
}

/// Flat mapping from operation name to handler, built once per executor
pub struct FunctionRegistry<K: Kernel> {
    operations: AHashMap<String, Operation<K>>,
}

impl<K: Kernel> FunctionRegistry<K> {
    pub fn new() -> Self {
        Self {
            operations: AHashMap::new(),
        }
    }

    /// Build the registry for kernel `K`
    pub fn build() -> Result<Self, BridgeError> {
        let mut registry = Self::new();
        K::register(&mut registry)?;
        Ok(registry)
    }

    /// Register a memoized operation
    pub fn register<F>(&mut self, name: &str, handler: F) -> Result<(), BridgeError>
    where
        F: Fn(&mut K, &Inputs<'_, K::Object>) -> anyhow::Result<Output<K::Object>> + 'static,
    {
        self.insert(name, Box::new(handler), Memo::Cached)
    }

    /// Register an operation whose results are never memoized
    pub fn register_uncached<F>(&mut self, name: &str, handler: F) -> Result<(), BridgeError>
    where
        F: Fn(&mut K, &Inputs<'_, K::Object>) -> anyhow::Result<Output<K::Object>> + 'static,
    {
        self.insert(name, Box::new(handler), Memo::Uncached)
    }

    fn insert(&mut self, name: &str, handler: Handler<K>, memo: Memo) -> Result<(), BridgeError> {
        validate_name(name)?;
        if self.operations.contains_key(name) {
            return Err(BridgeError::Initialization(format!(
                "operation registered twice: {}",
                name
            )));
        }
        self.operations
            .insert(name.to_string(), Operation { handler, memo });
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&Operation<K>, BridgeError> {
        self.operations
            .get(name)
            .ok_or_else(|| BridgeError::FunctionNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl<K: Kernel> Default for FunctionRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_name(name: &str) -> Result<(), BridgeError> {
    if name.starts_with(ADMIN_PREFIX) {
        return Err(BridgeError::Initialization(format!(
            "operation name uses reserved prefix: {}",
            name
        )));
    }
    if name.is_empty() || name.split('.').any(str::is_empty) {
        return Err(BridgeError::Initialization(format!(
            "invalid operation name: {:?}",
            name
        )));
    }
    Ok(())
}

/// Inputs of one call, with every embedded handle already validated against the store
pub struct Inputs<'a, O> {
    value: &'a Value,
    store: &'a HandleStore<O>,
}

impl<'a, O> Inputs<'a, O> {
    pub(crate) fn new(value: &'a Value, store: &'a HandleStore<O>) -> Self {
        Self { value, store }
    }

    pub fn raw(&self) -> &'a Value {
        self.value
    }

    fn field(&self, name: &str) -> Option<&'a Value> {
        self.value.get(name).filter(|value| !value.is_null())
    }

    fn require(&self, name: &str) -> Result<&'a Value, BridgeError> {
        self.field(name)
            .ok_or_else(|| BridgeError::serialization(format!("missing input `{}`", name)))
    }

    /// Deserialize a required field
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, BridgeError> {
        let value = self.require(name)?;
        T::deserialize(value)
            .map_err(|e| BridgeError::serialization(format!("input `{}`: {}", name, e)))
    }

    /// Deserialize an optional field, falling back to `default` when absent or null
    pub fn get_or<T: DeserializeOwned>(&self, name: &str, default: T) -> Result<T, BridgeError> {
        match self.field(name) {
            Some(_) => self.get(name),
            None => Ok(default),
        }
    }

    /// The handle stored in a field
    pub fn handle(&self, name: &str) -> Result<Handle, BridgeError> {
        let value = self.require(name)?;
        Handle::from_value(value)
            .ok_or_else(|| BridgeError::serialization(format!("input `{}` is not a handle", name)))
    }

    /// The native object named by the handle in a field
    pub fn object(&self, name: &str) -> Result<&'a O, BridgeError> {
        let handle = self.handle(name)?;
        self.resolve(&handle)
    }

    /// The native objects named by an array of handles
    pub fn objects(&self, name: &str) -> Result<Vec<&'a O>, BridgeError> {
        let items = self.require(name)?.as_array().ok_or_else(|| {
            BridgeError::serialization(format!("input `{}` is not an array", name))
        })?;
        items
            .iter()
            .map(|item| {
                let handle = Handle::from_value(item).ok_or_else(|| {
                    BridgeError::serialization(format!("input `{}` holds a non-handle", name))
                })?;
                self.resolve(&handle)
            })
            .collect()
    }

    fn resolve(&self, handle: &Handle) -> Result<&'a O, BridgeError> {
        self.store
            .resolve(handle)
            .ok_or_else(|| BridgeError::handle_not_found(handle))
    }
}

/// What a handler hands back to the executor
pub enum Output<O> {
    /// Primitive or structured data returned to the caller as-is
    Value(Value),
    /// Native object to be stored and returned as a handle
    Object(O),
}

impl<O> Output<O> {
    pub fn value<T: Serialize>(value: T) -> Result<Self, BridgeError> {
        Ok(Self::Value(serde_json::to_value(value)?))
    }

    pub fn object(object: O) -> Self {
        Self::Object(object)
    }
}
