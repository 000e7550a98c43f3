// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Planar cross sections in the XY plane

use super::{BoundingBox, Mesh, Triangle, Vertex};
use anyhow::{bail, Result};
use nalgebra::{Matrix4, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

const PLANE_TOLERANCE: f64 = 1e-9;

/// Simple polygon, stored counter-clockwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    points: Vec<Point2<f64>>,
}

fn signed_area(points: &[Point2<f64>]) -> f64 {
    let n = points.len();
    (0..n)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum::<f64>()
        / 2.0
}

impl Outline {
    /// Build an outline, normalizing to counter-clockwise order
    pub fn new(mut points: Vec<Point2<f64>>) -> Result<Self> {
        if points.len() < 3 {
            bail!("polygon needs at least 3 points, got {}", points.len());
        }
        if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            bail!("polygon points must be finite");
        }
        let area = signed_area(&points);
        if area.abs() < PLANE_TOLERANCE {
            bail!("polygon is degenerate");
        }
        if area < 0.0 {
            points.reverse();
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point2<f64>] {
        &self.points
    }

    pub fn area(&self) -> f64 {
        signed_area(&self.points)
    }

    pub fn is_convex(&self) -> bool {
        let n = self.points.len();
        (0..n).all(|i| {
            let a = self.points[i];
            let b = self.points[(i + 1) % n];
            let c = self.points[(i + 2) % n];
            (b - a).perp(&(c - b)) >= -PLANE_TOLERANCE
        })
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let points: Vec<Point3<f64>> = self
            .points
            .iter()
            .map(|p| Point3::new(p.x, p.y, 0.0))
            .collect();
        BoundingBox::from_points(&points)
    }

    /// Apply a transform that keeps the XY plane in place
    pub fn transform(&self, matrix: &Matrix4<f64>) -> Result<Self> {
        let leaves_plane = [matrix[(2, 0)], matrix[(2, 1)], matrix[(2, 3)]]
            .iter()
            .any(|v| v.abs() > PLANE_TOLERANCE);
        if leaves_plane {
            bail!("transform moves the cross section out of the XY plane");
        }

        let points = self
            .points
            .iter()
            .map(|p| {
                let moved = matrix.transform_point(&Point3::new(p.x, p.y, 0.0));
                Point2::new(moved.x, moved.y)
            })
            .collect();
        Self::new(points)
    }

    /// Polygon loop lifted to z = 0
    pub fn to_polygon(&self) -> Vec<[f64; 3]> {
        self.points.iter().map(|p| [p.x, p.y, 0.0]).collect()
    }

    /// Linear extrusion along +Z. Only convex outlines are supported.
    pub fn extrude(&self, height: f64) -> Result<Mesh> {
        if !(height.is_finite() && height > 0.0) {
            bail!("extrusion height must be positive, got {}", height);
        }
        if !self.is_convex() {
            bail!("extrusion requires a convex cross section");
        }

        let n = self.points.len();
        let mut mesh = Mesh::with_capacity(4 * n, 4 * n - 4);
        let lift = |p: &Point2<f64>, z: f64| Point3::new(p.x, p.y, z);

        // Caps as fans over their own vertices
        let bottom: Vec<usize> = self
            .points
            .iter()
            .map(|p| mesh.add_vertex(Vertex::new(lift(p, 0.0), -Vector3::z())))
            .collect();
        let top: Vec<usize> = self
            .points
            .iter()
            .map(|p| mesh.add_vertex(Vertex::new(lift(p, height), Vector3::z())))
            .collect();
        for i in 1..n - 1 {
            mesh.add_triangle(Triangle::new([bottom[0], bottom[i + 1], bottom[i]]));
            mesh.add_triangle(Triangle::new([top[0], top[i], top[i + 1]]));
        }

        for i in 0..n {
            let (a, b) = (&self.points[i], &self.points[(i + 1) % n]);
            let edge = b - a;
            let normal = Vector3::new(edge.y, -edge.x, 0.0).normalize();
            let quad = [lift(a, 0.0), lift(b, 0.0), lift(b, height), lift(a, height)]
                .map(|p| mesh.add_vertex(Vertex::new(p, normal)));
            mesh.add_triangle(Triangle::new([quad[0], quad[1], quad[2]]));
            mesh.add_triangle(Triangle::new([quad[0], quad[2], quad[3]]));
        }

        Ok(mesh)
    }
}
