//! Rigid placement of a pyramid in its parent frame.

use std::io::{Read, Write};

use glam::{DMat3, DMat4, DVec3};

use crate::codec::{read_mat, read_vec, write_mat, write_vec};
use crate::error::Result;

/// Position, rotation and scale, applied as `T · R · S`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    pub position: DVec3,
    pub rotation: DMat3,
    pub scale: DVec3,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RigidTransform {
    pub const IDENTITY: Self = Self {
        position: DVec3::ZERO,
        rotation: DMat3::IDENTITY,
        scale: DVec3::ONE,
    };

    pub fn from_position(position: DVec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    pub fn to_matrix(&self) -> DMat4 {
        DMat4::from_translation(self.position)
            * DMat4::from_mat3(self.rotation)
            * DMat4::from_scale(self.scale)
    }

    /// Map a point from the pyramid frame into the parent frame.
    pub fn apply(&self, point: DVec3) -> DVec3 {
        self.position + self.rotation * (self.scale * point)
    }

    /// Write as tagged vec3 position, tagged mat3 rotation, tagged vec3
    /// scale, all `f64`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let r = self.rotation;
        Ok(write_vec(writer, &self.position.to_array())?
            + write_mat(writer, &[r.x_axis.to_array(), r.y_axis.to_array(), r.z_axis.to_array()])?
            + write_vec(writer, &self.scale.to_array())?)
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let position = DVec3::from_array(read_vec(reader)?);
        let columns: [[f64; 3]; 3] = read_mat(reader)?;
        let scale = DVec3::from_array(read_vec(reader)?);
        Ok(Self {
            position,
            rotation: DMat3::from_cols_array_2d(&columns),
            scale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Cursor;

    #[test]
    fn test_matrix_matches_apply() {
        let t = RigidTransform {
            position: DVec3::new(10.0, -4.0, 2.5),
            rotation: DMat3::from_rotation_z(0.3),
            scale: DVec3::new(2.0, 2.0, 1.0),
        };
        let p = DVec3::new(1.0, 2.0, 3.0);
        let a = t.apply(p);
        let b = t.to_matrix().transform_point3(p);
        assert_relative_eq!(a.x, b.x, epsilon = 1e-12);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-12);
        assert_relative_eq!(a.z, b.z, epsilon = 1e-12);
    }

    #[test]
    fn test_encoded_size() {
        let t = RigidTransform::from_position(DVec3::new(1.0, 2.0, 3.0));
        let mut buf = Vec::new();
        let n = t.write_to(&mut buf).unwrap();
        // vec3: 2 + 1 + 24, mat3: 2 + 2 + 72, vec3 again.
        assert_eq!(n, 27 + 76 + 27);
        assert_eq!(RigidTransform::read_from(&mut Cursor::new(buf)).unwrap(), t);
    }
}
