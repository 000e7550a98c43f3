// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Mesh representation and utilities

use super::BoundingBox;
use nalgebra::{Matrix4, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Vertex with position and normal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub position: Point3<f64>,
    pub normal: Vector3<f64>,
}

impl Vertex {
    pub fn new(position: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self { position, normal }
    }

    pub fn transform(&mut self, matrix: &Matrix4<f64>, normal_matrix: &Matrix4<f64>) {
        self.position = matrix.transform_point(&self.position);
        self.normal = normal_matrix
            .transform_vector(&self.normal)
            .try_normalize(f64::EPSILON)
            .unwrap_or(self.normal);
    }
}

/// Triangle defined by three vertex indices, counter-clockwise seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triangle {
    pub indices: [usize; 3],
}

impl Triangle {
    pub fn new(indices: [usize; 3]) -> Self {
        Self { indices }
    }

    pub fn flipped(self) -> Self {
        let [a, b, c] = self.indices;
        Self::new([a, c, b])
    }
}

/// Triangular mesh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub triangles: Vec<Triangle>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(vertex_count: usize, triangle_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            triangles: Vec::with_capacity(triangle_count),
        }
    }

    /// Add a vertex and return its index
    pub fn add_vertex(&mut self, vertex: Vertex) -> usize {
        let index = self.vertices.len();
        self.vertices.push(vertex);
        index
    }

    pub fn add_triangle(&mut self, triangle: Triangle) {
        self.triangles.push(triangle);
    }

    /// Transform all vertices by an affine matrix.
    ///
    /// Orientation-reversing matrices flip the winding so faces keep pointing outward.
    pub fn transform(&mut self, matrix: &Matrix4<f64>) {
        let normal_matrix = matrix
            .try_inverse()
            .map(|m| m.transpose())
            .unwrap_or(*matrix);
        for vertex in &mut self.vertices {
            vertex.transform(matrix, &normal_matrix);
        }

        if matrix.fixed_view::<3, 3>(0, 0).determinant() < 0.0 {
            for triangle in &mut self.triangles {
                *triangle = triangle.flipped();
            }
        }
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_points(self.vertices.iter().map(|v| &v.position))
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Append another mesh without any boolean resolution
    pub fn merge(&mut self, other: &Mesh) {
        let offset = self.vertices.len();
        self.vertices.extend_from_slice(&other.vertices);

        for triangle in &other.triangles {
            let [a, b, c] = triangle.indices;
            self.triangles
                .push(Triangle::new([a + offset, b + offset, c + offset]));
        }
    }

    fn corners(&self, triangle: &Triangle) -> [Point3<f64>; 3] {
        triangle.indices.map(|i| self.vertices[i].position)
    }

    /// Enclosed volume by the divergence theorem; positive for outward-facing meshes
    pub fn volume(&self) -> f64 {
        self.triangles
            .iter()
            .map(|triangle| {
                let [a, b, c] = self.corners(triangle);
                a.coords.dot(&b.coords.cross(&c.coords))
            })
            .sum::<f64>()
            / 6.0
    }

    pub fn surface_area(&self) -> f64 {
        self.triangles
            .iter()
            .map(|triangle| {
                let [a, b, c] = self.corners(triangle);
                (b - a).cross(&(c - a)).norm() / 2.0
            })
            .sum()
    }

    /// Recompute vertex normals as area-weighted averages of adjacent face normals
    pub fn recompute_normals(&mut self) {
        let mut normals = vec![Vector3::zeros(); self.vertices.len()];
        for triangle in &self.triangles {
            let [a, b, c] = self.corners(triangle);
            let face = (b - a).cross(&(c - a));
            for &i in &triangle.indices {
                normals[i] += face;
            }
        }

        for (vertex, normal) in self.vertices.iter_mut().zip(normals) {
            if let Some(normal) = normal.try_normalize(f64::EPSILON) {
                vertex.normal = normal;
            }
        }
    }

    /// Flat position, normal and index buffers for rendering
    pub fn to_buffers(&self) -> (Vec<f32>, Vec<f32>, Vec<u32>) {
        let mut positions = Vec::with_capacity(self.vertices.len() * 3);
        let mut normals = Vec::with_capacity(self.vertices.len() * 3);
        for vertex in &self.vertices {
            positions.extend(vertex.position.iter().map(|&x| x as f32));
            normals.extend(vertex.normal.iter().map(|&x| x as f32));
        }

        let indices = self
            .triangles
            .iter()
            .flat_map(|triangle| triangle.indices.map(|i| i as u32))
            .collect();

        (positions, normals, indices)
    }
}
