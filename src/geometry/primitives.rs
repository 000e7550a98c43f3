// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Geometric primitives generator

use super::{Mesh, Triangle, Vertex};
use nalgebra::{Point3, Vector3};
use std::f64::consts::PI;

/// Default tessellation for curved primitives
pub const DEFAULT_SEGMENTS: u32 = 32;

/// Finest tessellation accepted for curved primitives
pub const MAX_SEGMENTS: u32 = 1024;

/// Geometric primitives
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Cube { size: Vector3<f64>, center: bool },
    Sphere { r: f64, segments: u32 },
    Cylinder { h: f64, r: f64, segments: u32 },
}

fn segments_or_default(segments: u32) -> u32 {
    if segments > 0 {
        segments.clamp(3, MAX_SEGMENTS)
    } else {
        DEFAULT_SEGMENTS
    }
}

impl Primitive {
    pub fn cube(size: Vector3<f64>, center: bool) -> Self {
        Self::Cube { size, center }
    }

    pub fn sphere(r: f64, segments: u32) -> Self {
        Self::Sphere {
            r,
            segments: segments_or_default(segments),
        }
    }

    pub fn cylinder(h: f64, r: f64, segments: u32) -> Self {
        Self::Cylinder {
            h,
            r,
            segments: segments_or_default(segments),
        }
    }

    pub fn to_mesh(&self) -> Mesh {
        match self {
            Self::Cube { size, center } => generate_cube_mesh(*size, *center),
            Self::Sphere { r, segments } => generate_sphere_mesh(*r, *segments),
            Self::Cylinder { h, r, segments } => generate_cylinder_mesh(*h, *r, *segments),
        }
    }
}

fn generate_cube_mesh(size: Vector3<f64>, center: bool) -> Mesh {
    let mut mesh = Mesh::with_capacity(36, 12);

    let min = if center { -size / 2.0 } else { Vector3::zeros() };
    let max = min + size;

    let positions = [
        Point3::new(min.x, min.y, min.z),
        Point3::new(max.x, min.y, min.z),
        Point3::new(max.x, max.y, min.z),
        Point3::new(min.x, max.y, min.z),
        Point3::new(min.x, min.y, max.z),
        Point3::new(max.x, min.y, max.z),
        Point3::new(max.x, max.y, max.z),
        Point3::new(min.x, max.y, max.z),
    ];

    // Two triangles per face; each face has its own vertices for flat normals
    let faces = [
        ([4, 5, 6], Vector3::z()),
        ([4, 6, 7], Vector3::z()),
        ([1, 0, 3], -Vector3::z()),
        ([1, 3, 2], -Vector3::z()),
        ([5, 1, 2], Vector3::x()),
        ([5, 2, 6], Vector3::x()),
        ([0, 4, 7], -Vector3::x()),
        ([0, 7, 3], -Vector3::x()),
        ([7, 6, 2], Vector3::y()),
        ([7, 2, 3], Vector3::y()),
        ([0, 1, 5], -Vector3::y()),
        ([0, 5, 4], -Vector3::y()),
    ];

    for (indices, normal) in faces {
        let triangle = indices.map(|i| mesh.add_vertex(Vertex::new(positions[i], normal)));
        mesh.add_triangle(Triangle::new(triangle));
    }

    mesh
}

fn generate_sphere_mesh(radius: f64, segments: u32) -> Mesh {
    let stacks = segments as usize;
    let slices = segments as usize;
    let mut mesh = Mesh::with_capacity((stacks + 1) * (slices + 1), 2 * stacks * slices);

    for i in 0..=stacks {
        let phi = PI * i as f64 / stacks as f64;
        let y = radius * phi.cos();
        let r = radius * phi.sin();

        for j in 0..=slices {
            let theta = 2.0 * PI * j as f64 / slices as f64;
            let normal = Vector3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
            let position = Point3::new(r * theta.cos(), y, r * theta.sin());
            mesh.add_vertex(Vertex::new(position, normal));
        }
    }

    for i in 0..stacks {
        for j in 0..slices {
            let first = i * (slices + 1) + j;
            let second = first + slices + 1;

            mesh.add_triangle(Triangle::new([first, first + 1, second]));
            mesh.add_triangle(Triangle::new([second, first + 1, second + 1]));
        }
    }

    mesh
}

fn generate_cylinder_mesh(height: f64, radius: f64, segments: u32) -> Mesh {
    let segments = segments as usize;
    let mut mesh = Mesh::with_capacity(2 + 2 * segments, 4 * segments);

    // Base at z=0, top at z=height
    let bottom_center = mesh.add_vertex(Vertex::new(Point3::origin(), -Vector3::z()));
    let top_center = mesh.add_vertex(Vertex::new(Point3::new(0.0, 0.0, height), Vector3::z()));

    let mut bottom = Vec::with_capacity(segments);
    let mut top = Vec::with_capacity(segments);
    for i in 0..segments {
        let angle = 2.0 * PI * i as f64 / segments as f64;
        let (sin, cos) = angle.sin_cos();
        let radial = Vector3::new(cos, sin, 0.0);

        bottom.push(mesh.add_vertex(Vertex::new(
            Point3::new(radius * cos, radius * sin, 0.0),
            radial,
        )));
        top.push(mesh.add_vertex(Vertex::new(
            Point3::new(radius * cos, radius * sin, height),
            radial,
        )));
    }

    for i in 0..segments {
        let next = (i + 1) % segments;
        mesh.add_triangle(Triangle::new([bottom_center, bottom[next], bottom[i]]));
        mesh.add_triangle(Triangle::new([top_center, top[i], top[next]]));

        // Rim vertices are shared so the mesh stays closed
        mesh.add_triangle(Triangle::new([bottom[i], bottom[next], top[i]]));
        mesh.add_triangle(Triangle::new([top[i], bottom[next], top[next]]));
    }

    mesh.recompute_normals();
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cube_generation() {
        let mesh = generate_cube_mesh(Vector3::new(10.0, 10.0, 10.0), false);
        assert_eq!(mesh.vertex_count(), 36);
        assert_eq!(mesh.triangle_count(), 12);
        assert_relative_eq!(mesh.volume(), 1000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_centered_cube() {
        let mesh = Primitive::cube(Vector3::new(2.0, 4.0, 6.0), true).to_mesh();
        let bbox = mesh.bounding_box();
        assert_eq!(bbox.min, Point3::new(-1.0, -2.0, -3.0));
        assert_eq!(bbox.max, Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_segments_are_bounded() {
        assert_eq!(
            Primitive::sphere(1.0, u32::MAX),
            Primitive::Sphere {
                r: 1.0,
                segments: MAX_SEGMENTS
            }
        );
        assert_eq!(
            Primitive::cylinder(1.0, 1.0, 1),
            Primitive::Cylinder {
                h: 1.0,
                r: 1.0,
                segments: 3
            }
        );
        assert_eq!(
            Primitive::sphere(1.0, 0),
            Primitive::Sphere {
                r: 1.0,
                segments: DEFAULT_SEGMENTS
            }
        );
    }

    #[test]
    fn test_sphere_faces_outward() {
        let mesh = Primitive::sphere(1.0, 48).to_mesh();
        let exact = 4.0 / 3.0 * PI;
        assert!(mesh.volume() > 0.0);
        assert_relative_eq!(mesh.volume(), exact, max_relative = 0.02);
    }

    #[test]
    fn test_cylinder_vertex_reuse() {
        let mesh = generate_cylinder_mesh(10.0, 5.0, 16);
        // Two centers plus two rims
        assert_eq!(mesh.vertex_count(), 2 + 16 * 2);
        assert_eq!(mesh.triangle_count(), 16 * 4);
    }

    #[test]
    fn test_cylinder_volume() {
        let mesh = Primitive::cylinder(2.0, 1.0, 256).to_mesh();
        assert_relative_eq!(mesh.volume(), 2.0 * PI, max_relative = 1e-3);
    }

    #[test]
    fn test_segments_clamped() {
        assert_eq!(
            Primitive::cylinder(1.0, 1.0, 1),
            Primitive::Cylinder {
                h: 1.0,
                r: 1.0,
                segments: 3
            }
        );
        assert_eq!(
            Primitive::sphere(1.0, 0),
            Primitive::Sphere {
                r: 1.0,
                segments: DEFAULT_SEGMENTS
            }
        );
    }
}
