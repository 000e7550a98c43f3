// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! FFI bindings for WASM workers

#[cfg(feature = "wasm")]
pub mod wasm;
