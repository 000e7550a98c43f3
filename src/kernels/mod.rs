// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Kernels shipped with the crate

pub mod manifold;

pub use manifold::{ManifoldKernel, Shape};
