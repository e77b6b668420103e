//! Reconstruction of annotation polygons drawn on 360° images.
//!
//! Annotation vertices are stored as spherical `(phi, theta)` pairs relative
//! to the image they were drawn on. The payload layout and the rotation used to
//! bring vertices into the image's frame both depend on the format version the
//! annotation was written with, and old annotations must keep reconstructing
//! exactly as before.

use glam::{DQuat, DVec3};
use serde::Serialize;

use crate::error::Image360Error;
use crate::version::FormatVersion;

/// Smallest payload accepted by the vertex-counted layout: one count and a
/// triangle's three pairs.
const MIN_VERTEX_COUNTED_LEN: usize = 7;
const MIN_POLYGON_VERTICES: usize = 3;

/// How the raw numbers of an annotation payload are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonEncoding {
    /// The whole payload is one polygon of interleaved `(phi, theta)` pairs.
    SinglePolygon,
    /// Repeated `[n, phi_1, theta_1, ..., phi_n, theta_n]` groups.
    VertexCounted,
}

/// One closed outline as unit vectors in the image's frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AnnotationPolygon(pub Vec<DVec3>);

impl AnnotationPolygon {
    pub fn vertices(&self) -> &[DVec3] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Rebuilds the polygons of one annotation.
///
/// `image_rotation` holds the image's raw Euler angles (x, y, z). A missing or
/// malformed `format_version` is read as `1.0.0`.
pub fn reconstruct(
    format_version: Option<&str>,
    image_rotation: DVec3,
    raw: &[f64],
) -> Result<Vec<AnnotationPolygon>, Image360Error> {
    let version = FormatVersion::parse_or_default(format_version);
    let rotation = version.rotation_order().quat(image_rotation);

    let groups = match version.polygon_encoding() {
        PolygonEncoding::SinglePolygon => vec![single_polygon(raw)?],
        PolygonEncoding::VertexCounted => vertex_counted(raw)?,
    };

    Ok(groups
        .into_iter()
        .map(|pairs| polygon_from_pairs(pairs, rotation))
        .collect())
}

fn single_polygon(raw: &[f64]) -> Result<&[f64], Image360Error> {
    if raw.len() % 2 != 0 {
        return Err(Image360Error::annotation(format!(
            "expected an even number of values, got {}",
            raw.len()
        )));
    }
    Ok(raw)
}

fn vertex_counted(raw: &[f64]) -> Result<Vec<&[f64]>, Image360Error> {
    if raw.len() < MIN_VERTEX_COUNTED_LEN {
        return Err(Image360Error::annotation(format!(
            "format version {} requires at least {MIN_VERTEX_COUNTED_LEN} numbers",
            FormatVersion::MULTI_POLYGON
        )));
    }

    let mut groups = Vec::new();
    let mut rest = raw;
    while let Some((&count, tail)) = rest.split_first() {
        let vertices = vertex_count(count)?;
        if vertices > tail.len() / 2 {
            return Err(Image360Error::annotation(format!(
                "polygon of {vertices} vertices is out of bounds: {} values remain",
                tail.len()
            )));
        }
        let (pairs, next) = tail.split_at(vertices * 2);
        groups.push(pairs);
        rest = next;
    }
    Ok(groups)
}

fn vertex_count(value: f64) -> Result<usize, Image360Error> {
    if value.fract() != 0.0 || !value.is_finite() {
        return Err(Image360Error::annotation(format!(
            "vertex count must be a whole number, got {value}"
        )));
    }
    if value < MIN_POLYGON_VERTICES as f64 {
        return Err(Image360Error::annotation(format!(
            "number of vertices must be at least {MIN_POLYGON_VERTICES}, got {value}"
        )));
    }
    Ok(value as usize)
}

fn polygon_from_pairs(pairs: &[f64], rotation: DQuat) -> AnnotationPolygon {
    AnnotationPolygon(
        pairs
            .chunks_exact(2)
            .map(|pair| rotation * unit_from_spherical(pair[0], pair[1]))
            .collect(),
    )
}

/// Unit vector for polar angle `phi` (from +Y) and azimuth `theta` (from +Z
/// towards +X).
pub fn unit_from_spherical(phi: f64, theta: f64) -> DVec3 {
    let (sin_phi, cos_phi) = phi.sin_cos();
    let (sin_theta, cos_theta) = theta.sin_cos();
    DVec3::new(sin_phi * sin_theta, cos_phi, sin_phi * cos_theta)
}
