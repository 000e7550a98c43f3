// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Manifold-style mesh kernel
//!
//! Solids are closed triangle meshes tagged `manifold-shape`; planar outlines are
//! tagged `manifold-cross-section` and become solids through extrusion.

use crate::error::BridgeError;
use crate::geometry::{Mesh, Outline, Primitive, DEFAULT_SEGMENTS, MAX_SEGMENTS};
use crate::kernel::{Decomposition, Kernel, KernelObject};
use crate::registry::{FunctionRegistry, Inputs, Output};
use anyhow::{bail, ensure, Result};
use nalgebra::{Matrix3, Matrix4, Point2, Rotation3, Vector3};
use serde::Deserialize;
use serde_json::json;

pub const SOLID_TAG: &str = "manifold-shape";
pub const SECTION_TAG: &str = "manifold-cross-section";

/// Native object of the manifold kernel
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Solid(Mesh),
    Section(Outline),
}

impl Shape {
    pub fn transform(&self, matrix: &Matrix4<f64>) -> Result<Shape> {
        match self {
            Shape::Solid(mesh) => {
                let mut mesh = mesh.clone();
                mesh.transform(matrix);
                Ok(Shape::Solid(mesh))
            }
            Shape::Section(outline) => Ok(Shape::Section(outline.transform(matrix)?)),
        }
    }

    fn solid(&self) -> Result<&Mesh> {
        match self {
            Shape::Solid(mesh) => Ok(mesh),
            Shape::Section(_) => bail!("expected a solid, got a cross section"),
        }
    }

    fn section(&self) -> Result<&Outline> {
        match self {
            Shape::Section(outline) => Ok(outline),
            Shape::Solid(_) => bail!("expected a cross section, got a solid"),
        }
    }
}

impl KernelObject for Shape {
    fn kind_tag(&self) -> &'static str {
        match self {
            Shape::Solid(_) => SOLID_TAG,
            Shape::Section(_) => SECTION_TAG,
        }
    }

    fn decompose(&self) -> Decomposition {
        match self {
            Shape::Solid(mesh) => {
                let (positions, normals, indices) = mesh.to_buffers();
                Decomposition::Mesh {
                    positions,
                    normals,
                    indices,
                }
            }
            Shape::Section(outline) => Decomposition::Polygons {
                polygons: vec![outline.to_polygon()],
            },
        }
    }
}

/// A scalar applied to every axis, or one value per axis
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum Extent {
    Uniform(f64),
    Axes([f64; 3]),
}

impl Extent {
    fn vector(self) -> Vector3<f64> {
        match self {
            Extent::Uniform(v) => Vector3::repeat(v),
            Extent::Axes([x, y, z]) => Vector3::new(x, y, z),
        }
    }
}

fn positive(name: &str, value: f64) -> Result<f64> {
    ensure!(value.is_finite() && value > 0.0, "{} must be positive, got {}", name, value);
    Ok(value)
}

/// Reference geometry kernel hosted behind a bridge
#[derive(Debug, Clone)]
pub struct ManifoldKernel {
    segments: u32,
}

impl ManifoldKernel {
    pub fn new() -> Self {
        Self {
            segments: DEFAULT_SEGMENTS,
        }
    }

    /// Kernel whose curved primitives default to `segments` subdivisions
    pub fn with_segments(segments: u32) -> Self {
        Self {
            segments: segments.clamp(3, MAX_SEGMENTS),
        }
    }

    /// Factory used by hosts
    pub fn load() -> Result<Self> {
        Ok(Self::new())
    }
}

impl Default for ManifoldKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for ManifoldKernel {
    type Object = Shape;
    const FAMILY: &'static str = "manifold";

    fn register(registry: &mut FunctionRegistry<Self>) -> Result<(), BridgeError> {
        registry.register("kernel.shapes.cube", cube)?;
        registry.register("kernel.shapes.sphere", sphere)?;
        registry.register("kernel.shapes.cylinder", cylinder)?;
        registry.register("kernel.shapes.polygon", polygon)?;
        registry.register("kernel.shapes.compound", compound)?;

        registry.register("kernel.transforms.translate", translate)?;
        registry.register("kernel.transforms.rotate", rotate)?;
        registry.register("kernel.transforms.scale", scale)?;
        registry.register("kernel.transforms.mirror", mirror)?;

        registry.register("kernel.operations.extrude", extrude)?;

        registry.register("kernel.measure.volume", volume)?;
        registry.register("kernel.measure.boundingBox", bounding_box)?;
        registry.register("kernel.measure.triangleCount", triangle_count)
    }
}

fn cube(_: &mut ManifoldKernel, inputs: &Inputs<'_, Shape>) -> Result<Output<Shape>> {
    let size = inputs.get::<Extent>("size")?.vector();
    for v in size.iter() {
        positive("cube size", *v)?;
    }
    let center = inputs.get_or("center", false)?;
    Ok(Output::object(Shape::Solid(Primitive::cube(size, center).to_mesh())))
}

fn segment_count(kernel: &ManifoldKernel, inputs: &Inputs<'_, Shape>) -> Result<u32> {
    let segments: u32 = inputs.get_or("segments", kernel.segments)?;
    ensure!(
        (3..=MAX_SEGMENTS).contains(&segments),
        "segments must be between 3 and {}, got {}",
        MAX_SEGMENTS,
        segments
    );
    Ok(segments)
}

fn sphere(kernel: &mut ManifoldKernel, inputs: &Inputs<'_, Shape>) -> Result<Output<Shape>> {
    let radius = positive("radius", inputs.get("radius")?)?;
    let segments = segment_count(kernel, inputs)?;
    Ok(Output::object(Shape::Solid(Primitive::sphere(radius, segments).to_mesh())))
}

fn cylinder(kernel: &mut ManifoldKernel, inputs: &Inputs<'_, Shape>) -> Result<Output<Shape>> {
    let height = positive("height", inputs.get("height")?)?;
    let radius = positive("radius", inputs.get("radius")?)?;
    let segments = segment_count(kernel, inputs)?;
    let mesh = Primitive::cylinder(height, radius, segments).to_mesh();
    Ok(Output::object(Shape::Solid(mesh)))
}

fn polygon(_: &mut ManifoldKernel, inputs: &Inputs<'_, Shape>) -> Result<Output<Shape>> {
    let points: Vec<[f64; 2]> = inputs.get("points")?;
    let outline = Outline::new(points.into_iter().map(|[x, y]| Point2::new(x, y)).collect())?;
    Ok(Output::object(Shape::Section(outline)))
}

fn compound(_: &mut ManifoldKernel, inputs: &Inputs<'_, Shape>) -> Result<Output<Shape>> {
    let shapes = inputs.objects("shapes")?;
    ensure!(!shapes.is_empty(), "compound needs at least one shape");

    let mut merged = Mesh::new();
    for shape in shapes {
        merged.merge(shape.solid()?);
    }
    Ok(Output::object(Shape::Solid(merged)))
}

fn transformed(inputs: &Inputs<'_, Shape>, matrix: Matrix4<f64>) -> Result<Output<Shape>> {
    let shape = inputs.object("shape")?;
    Ok(Output::object(shape.transform(&matrix)?))
}

fn translate(_: &mut ManifoldKernel, inputs: &Inputs<'_, Shape>) -> Result<Output<Shape>> {
    let [x, y, z]: [f64; 3] = inputs.get("offset")?;
    transformed(inputs, Matrix4::new_translation(&Vector3::new(x, y, z)))
}

fn rotate(_: &mut ManifoldKernel, inputs: &Inputs<'_, Shape>) -> Result<Output<Shape>> {
    let [x, y, z]: [f64; 3] = inputs.get("angles")?;
    let rotation = Rotation3::from_euler_angles(x.to_radians(), y.to_radians(), z.to_radians());
    transformed(inputs, rotation.to_homogeneous())
}

fn scale(_: &mut ManifoldKernel, inputs: &Inputs<'_, Shape>) -> Result<Output<Shape>> {
    let factor = inputs.get::<Extent>("factor")?.vector();
    ensure!(
        factor.iter().all(|v| v.is_finite() && *v != 0.0),
        "scale factors must be finite and non-zero"
    );
    transformed(inputs, Matrix4::new_nonuniform_scaling(&factor))
}

fn mirror(_: &mut ManifoldKernel, inputs: &Inputs<'_, Shape>) -> Result<Output<Shape>> {
    let [x, y, z]: [f64; 3] = inputs.get("normal")?;
    let Some(normal) = Vector3::new(x, y, z).try_normalize(f64::EPSILON) else {
        bail!("mirror normal must be non-zero");
    };
    let reflection = Matrix3::identity() - 2.0 * normal * normal.transpose();
    transformed(inputs, reflection.to_homogeneous())
}

fn extrude(_: &mut ManifoldKernel, inputs: &Inputs<'_, Shape>) -> Result<Output<Shape>> {
    let section = inputs.object("section")?.section()?;
    let mesh = section.extrude(inputs.get("height")?)?;
    Ok(Output::object(Shape::Solid(mesh)))
}

fn volume(_: &mut ManifoldKernel, inputs: &Inputs<'_, Shape>) -> Result<Output<Shape>> {
    let mesh = inputs.object("shape")?.solid()?;
    Ok(Output::value(mesh.volume())?)
}

fn bounding_box(_: &mut ManifoldKernel, inputs: &Inputs<'_, Shape>) -> Result<Output<Shape>> {
    let bbox = match inputs.object("shape")? {
        Shape::Solid(mesh) => mesh.bounding_box(),
        Shape::Section(outline) => outline.bounding_box(),
    };
    let size = bbox.size();
    Ok(Output::Value(json!({
        "min": [bbox.min.x, bbox.min.y, bbox.min.z],
        "max": [bbox.max.x, bbox.max.y, bbox.max.z],
        "size": [size.x, size.y, size.z],
    })))
}

fn triangle_count(_: &mut ManifoldKernel, inputs: &Inputs<'_, Shape>) -> Result<Output<Shape>> {
    let count = match inputs.object("shape")? {
        Shape::Solid(mesh) => mesh.triangle_count(),
        Shape::Section(outline) => outline.points().len() - 2,
    };
    Ok(Output::value(count)?)
}
