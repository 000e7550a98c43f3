// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Messages exchanged between the dispatcher and the executor
//!
//! Caller to executor:
//! `{"action": {"functionName": "...", "inputs": ...}, "uid": "..."}`
//!
//! Executor to caller, in this order for every request:
//! `{"uid": "...", "status": "busy"}` then `{"uid": "...", "result": ...}` or
//! `{"uid": "...", "error": "..."}`.

use crate::error::BridgeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// One logical call, correlated by `uid`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub action: Action,
    pub uid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub function_name: String,
    #[serde(default)]
    pub inputs: Value,
}

impl CallRequest {
    pub fn new(uid: impl Into<String>, function_name: impl Into<String>, inputs: Value) -> Self {
        Self {
            action: Action {
                function_name: function_name.into(),
                inputs,
            },
            uid: uid.into(),
        }
    }

    pub fn function_name(&self) -> &str {
        &self.action.function_name
    }

    pub fn inputs(&self) -> &Value {
        &self.action.inputs
    }
}

/// Terminal answer to a request; exactly one of result or error
#[derive(Debug, Clone, PartialEq)]
pub struct CallResponse {
    pub uid: String,
    pub outcome: Result<Value, BridgeError>,
}

impl CallResponse {
    pub fn success(uid: impl Into<String>, result: Value) -> Self {
        Self {
            uid: uid.into(),
            outcome: Ok(result),
        }
    }

    pub fn failure(uid: impl Into<String>, error: BridgeError) -> Self {
        Self {
            uid: uid.into(),
            outcome: Err(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Serialize, Deserialize)]
struct WireResponse {
    uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Serialize for CallResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match &self.outcome {
            Ok(result) => WireResponse {
                uid: self.uid.clone(),
                result: Some(result.clone()),
                error: None,
            },
            Err(error) => WireResponse {
                uid: self.uid.clone(),
                result: None,
                error: Some(error.to_string()),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CallResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireResponse::deserialize(deserializer)?;
        let outcome = match wire.error {
            Some(message) => Err(BridgeError::Remote(message)),
            None => Ok(wire.result.unwrap_or(Value::Null)),
        };
        Ok(Self {
            uid: wire.uid,
            outcome,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Busy,
}

/// Emitted when the executor starts processing a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusToken {
    pub uid: String,
    pub status: CallStatus,
}

/// Everything the executor sends back to the caller side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerMessage {
    Status(StatusToken),
    Response(CallResponse),
}

impl WorkerMessage {
    pub fn busy(uid: impl Into<String>) -> Self {
        Self::Status(StatusToken {
            uid: uid.into(),
            status: CallStatus::Busy,
        })
    }

    pub fn uid(&self) -> &str {
        match self {
            Self::Status(token) => &token.uid,
            Self::Response(response) => &response.uid,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Response(_))
    }
}
