// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Content-addressable cache and handle registry

mod key;
mod store;

pub use key::cache_key;
pub use store::{CacheStats, HandleStore};
