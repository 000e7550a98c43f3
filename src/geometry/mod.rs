// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Geometry module - mesh representation and operations

mod bbox;
mod mesh;
mod primitives;
mod section;

pub use bbox::BoundingBox;
pub use mesh::{Mesh, Triangle, Vertex};
pub use primitives::{Primitive, DEFAULT_SEGMENTS, MAX_SEGMENTS};
pub use section::Outline;
