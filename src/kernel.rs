// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Collaborator interface for geometry kernels hosted behind a bridge

use crate::error::BridgeError;
use crate::registry::FunctionRegistry;
use serde::{Deserialize, Serialize};

/// A stateful geometry engine hosted by one executor.
///
/// The kernel is constructed inside the executor thread and never leaves it, so
/// neither the kernel nor its objects need to be `Send`.
pub trait Kernel: Sized + 'static {
    /// Native object type produced by the kernel's handlers
    type Object: KernelObject;

    /// Family name, used for thread names and log fields
    const FAMILY: &'static str;

    /// Register every operation this kernel exposes
    fn register(registry: &mut FunctionRegistry<Self>) -> Result<(), BridgeError>;
}

/// Native object stored behind a handle
pub trait KernelObject: 'static {
    /// Tag carried by handles naming this object, e.g. `"manifold-shape"`
    fn kind_tag(&self) -> &'static str;

    /// Extract renderable primitive data without kernel-specific dispatch
    fn decompose(&self) -> Decomposition;
}

/// Renderable data extracted from a kernel object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Decomposition {
    /// Flat vertex/normal buffers and triangle indices
    Mesh {
        positions: Vec<f32>,
        normals: Vec<f32>,
        indices: Vec<u32>,
    },
    /// Closed polygon point lists
    Polygons { polygons: Vec<Vec<[f64; 3]>> },
}

impl Decomposition {
    pub fn vertex_count(&self) -> usize {
        match self {
            Self::Mesh { positions, .. } => positions.len() / 3,
            Self::Polygons { polygons } => polygons.iter().map(Vec::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decomposition_wire_shape() {
        let mesh = Decomposition::Mesh {
            positions: vec![0.0, 0.0, 0.0],
            normals: vec![0.0, 0.0, 1.0],
            indices: vec![0, 0, 0],
        };
        let value = serde_json::to_value(&mesh).unwrap();
        assert_eq!(value["kind"], json!("mesh"));
        assert_eq!(mesh.vertex_count(), 1);

        let polygons = Decomposition::Polygons {
            polygons: vec![vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]],
        };
        let value = serde_json::to_value(&polygons).unwrap();
        assert_eq!(value["kind"], json!("polygons"));
        assert_eq!(polygons.vertex_count(), 3);
    }
}
