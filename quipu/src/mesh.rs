//! Vertex and index buffers extracted from elevation surfaces.

use std::f32::consts::{FRAC_PI_2, PI};
use std::io::{Read, Write};

use glam::{DVec3, Vec3};

use crate::codec::{read_typed_value, read_vec, write_typed_value, write_vec};
use crate::error::Result;
use crate::raster::Resolution;

/// Triangle list, three indices per triangle.
pub type IndexBuffer = Vec<u32>;

/// One vertex per raster sample, stored as parallel arrays.
///
/// Positions are relative to `offset`. Vertices over invalid samples have
/// infinite positions and are never referenced by an index buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexBuffer {
    pub resolution: Resolution,
    pub offset: DVec3,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    /// Albedo values per vertex.
    pub albedo_bands: usize,
    /// `albedo_bands` values for each vertex, vertex-major.
    pub albedos: Vec<f32>,
}

impl VertexBuffer {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    #[inline]
    pub fn is_valid(&self, index: usize) -> bool {
        self.positions[index].is_finite()
    }

    pub fn valid_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_finite()).count()
    }

    pub fn albedo(&self, index: usize) -> &[f32] {
        let start = index * self.albedo_bands;
        &self.albedos[start..start + self.albedo_bands]
    }

    /// Absolute position of a vertex.
    pub fn world_position(&self, index: usize) -> DVec3 {
        self.offset + self.positions[index].as_dvec3()
    }
}

/// Two triangles per 2×2 neighbourhood, skipping any that touch an invalid
/// vertex.
///
/// With `v(i, j) = j·W + i`, each cell yields `(v00, v01, v10)` and
/// `(v10, v01, v11)`.
pub fn triangulate(vertices: &VertexBuffer) -> IndexBuffer {
    let Resolution { width, height } = vertices.resolution;
    let mut indices = Vec::new();
    if width < 2 || height < 2 {
        return indices;
    }
    indices.reserve((width - 1) * (height - 1) * 6);
    for j in 0..height - 1 {
        for i in 0..width - 1 {
            let v00 = j * width + i;
            let v10 = v00 + 1;
            let v01 = v00 + width;
            let v11 = v01 + 1;
            for tri in [[v00, v01, v10], [v10, v01, v11]] {
                if tri.iter().all(|&v| vertices.is_valid(v)) {
                    indices.extend(tri.iter().map(|&v| v as u32));
                }
            }
        }
    }
    indices
}

/// Area-weighted vertex normals accumulated from `indices`.
///
/// Vertices touched by no triangle get a zero normal.
pub fn compute_normals(vertices: &mut VertexBuffer, indices: &[u32]) {
    let mut normals = vec![Vec3::ZERO; vertices.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let (pa, pb, pc) = (
            vertices.positions[a],
            vertices.positions[b],
            vertices.positions[c],
        );
        let face = (pb - pa).cross(pc - pa);
        normals[a] += face;
        normals[b] += face;
        normals[c] += face;
    }
    for n in normals.iter_mut() {
        *n = n.normalize_or_zero();
    }
    vertices.normals = normals;
}

/// Axis and half-angle bounding every vertex normal of a mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibilityCone {
    pub normal: Vec3,
    pub half_angle: f32,
}

impl Default for VisibilityCone {
    /// A cone that culls nothing.
    fn default() -> Self {
        Self {
            normal: Vec3::Z,
            half_angle: PI,
        }
    }
}

impl VisibilityCone {
    /// Cone around the normalized mean of the non-zero normals.
    pub fn from_normals(normals: &[Vec3]) -> Self {
        let used = normals.iter().filter(|n| n.is_finite() && **n != Vec3::ZERO);
        let sum: Vec3 = used.clone().copied().sum();
        let Some(axis) = sum.try_normalize() else {
            return Self::default();
        };
        let half_angle = used
            .map(|n| axis.dot(n.normalize()).clamp(-1.0, 1.0).acos())
            .fold(0.0f32, f32::max);
        Self {
            normal: axis,
            half_angle,
        }
    }

    /// False only when every normal in the cone faces away from a viewer
    /// looking along `view_direction`.
    pub fn may_face(&self, view_direction: Vec3) -> bool {
        let Some(to_viewer) = (-view_direction).try_normalize() else {
            return true;
        };
        let angle = self.normal.dot(to_viewer).clamp(-1.0, 1.0).acos();
        angle < self.half_angle + FRAC_PI_2
    }

    /// Tagged vec3 `f32` normal, then typed `f32` half-angle in radians.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize> {
        Ok(write_vec(writer, &self.normal.to_array())? + write_typed_value(writer, self.half_angle)?)
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let normal = Vec3::from_array(read_vec(reader)?);
        let half_angle = read_typed_value(reader)?;
        Ok(Self { normal, half_angle })
    }
}

/// Write a Wavefront OBJ with positions (relative to the buffer offset),
/// normals and 1-based faces. Invalid vertices are left out.
pub fn write_obj<W: Write>(
    writer: &mut W,
    vertices: &VertexBuffer,
    indices: &[u32],
) -> Result<usize> {
    let mut remap = vec![0u32; vertices.len()];
    let mut next = 1u32;
    writeln!(
        writer,
        "# quipu mesh {} offset {} {} {}",
        vertices.resolution, vertices.offset.x, vertices.offset.y, vertices.offset.z
    )?;
    for (i, p) in vertices.positions.iter().enumerate() {
        if !p.is_finite() {
            continue;
        }
        writeln!(writer, "v {} {} {}", p.x, p.y, p.z)?;
        let n = vertices.normals.get(i).copied().unwrap_or(Vec3::ZERO);
        writeln!(writer, "vn {} {} {}", n.x, n.y, n.z)?;
        remap[i] = next;
        next += 1;
    }
    let mut faces = 0;
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [
            remap[tri[0] as usize],
            remap[tri[1] as usize],
            remap[tri[2] as usize],
        ];
        writeln!(writer, "f {a}//{a} {b}//{b} {c}//{c}")?;
        faces += 1;
    }
    Ok(faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid(width: usize, height: usize) -> VertexBuffer {
        let mut positions = Vec::new();
        for j in 0..height {
            for i in 0..width {
                positions.push(Vec3::new(i as f32, -(j as f32), 0.0));
            }
        }
        VertexBuffer {
            resolution: Resolution::new(width, height),
            positions,
            ..Default::default()
        }
    }

    #[test]
    fn test_triangulate_full_grid() {
        let v = grid(3, 3);
        let indices = triangulate(&v);
        assert_eq!(indices.len(), 4 * 2 * 3);
        assert_eq!(&indices[..6], &[0, 3, 1, 1, 3, 4]);
    }

    #[test]
    fn test_triangulate_skips_invalid() {
        let mut v = grid(3, 3);
        v.positions[4] = Vec3::INFINITY;
        // Only the top-left cell's first triangle and the bottom-right
        // cell's second avoid the centre vertex.
        let indices = triangulate(&v);
        assert!(!indices.contains(&4));
        assert_eq!(indices, vec![0, 3, 1, 5, 7, 8]);
    }

    #[test]
    fn test_normals_point_up() {
        let mut v = grid(4, 4);
        let indices = triangulate(&v);
        compute_normals(&mut v, &indices);
        for n in &v.normals {
            assert_relative_eq!(n.z, 1.0);
        }
        let cone = VisibilityCone::from_normals(&v.normals);
        assert_relative_eq!(cone.normal.z, 1.0);
        assert_relative_eq!(cone.half_angle, 0.0);
    }

    #[test]
    fn test_cone_culling() {
        let cone = VisibilityCone {
            normal: Vec3::Z,
            half_angle: 0.2,
        };
        assert!(cone.may_face(Vec3::NEG_Z));
        assert!(cone.may_face(Vec3::X));
        assert!(!cone.may_face(Vec3::Z));
        assert!(VisibilityCone::default().may_face(Vec3::Z));
    }

    #[test]
    fn test_cone_spread() {
        let normals = [
            Vec3::new(1.0, 0.0, 1.0).normalize(),
            Vec3::new(-1.0, 0.0, 1.0).normalize(),
            Vec3::ZERO,
        ];
        let cone = VisibilityCone::from_normals(&normals);
        assert_relative_eq!(cone.normal.z, 1.0);
        assert_relative_eq!(cone.half_angle, std::f32::consts::FRAC_PI_4, epsilon = 1e-5);
    }

    #[test]
    fn test_write_obj() {
        let mut v = grid(2, 2);
        v.positions[3] = Vec3::INFINITY;
        let indices = triangulate(&v);
        compute_normals(&mut v, &indices);
        let mut out = Vec::new();
        assert_eq!(write_obj(&mut out, &v, &indices).unwrap(), 1);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("v ")).count(), 3);
        assert!(text.contains("f 1//1 3//3 2//2"));
    }
}
