//! Extensions over glam's vector, quaternion and matrix types.

use glam::{Mat3, Quat, Vec3};

use crate::error::{PhysicsError, Result};

/// Extra vector operations used throughout contact generation.
pub trait Vec3Ext {
    /// Returns two unit vectors orthogonal to `self` and to each other.
    ///
    /// The reference axis is `X` unless the normalized vector is already close
    /// to it (`|x| >= 0.9`), in which case `Y` is used. A zero vector yields
    /// `(X, Y)`.
    fn tangents(self) -> (Vec3, Vec3);

    /// Component-wise comparison within `precision`.
    fn almost_equals(self, other: Vec3, precision: f32) -> bool;

    /// True if every component is within `precision` of zero.
    fn almost_zero(self, precision: f32) -> bool;
}

impl Vec3Ext for Vec3 {
    fn tangents(self) -> (Vec3, Vec3) {
        let norm = self.length();
        if norm <= 0.0 {
            return (Vec3::X, Vec3::Y);
        }
        let n = self / norm;
        let reference = if n.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
        let t1 = n.cross(reference).normalize();
        let t2 = n.cross(t1);
        (t1, t2)
    }

    fn almost_equals(self, other: Vec3, precision: f32) -> bool {
        (self - other).abs().max_element() <= precision
    }

    fn almost_zero(self, precision: f32) -> bool {
        self.abs().max_element() <= precision
    }
}

/// Quaternion integration and renormalization helpers.
pub trait QuatExt {
    /// Advances the rotation by angular velocity `omega` over `dt`.
    ///
    /// Semi-implicit: `q += 0.5·dt·(ω∘factor as pure quaternion)·q`. The
    /// result is not normalized.
    fn integrate(self, omega: Vec3, dt: f32, angular_factor: Vec3) -> Quat;

    /// Approximate normalization using a single Newton step.
    ///
    /// Accurate only when the quaternion is already close to unit length.
    fn normalize_fast(self) -> Quat;

    /// Spherical interpolation along the shortest arc.
    fn slerp_shortest(self, to: Quat, t: f32) -> Quat;
}

impl QuatExt for Quat {
    fn integrate(self, omega: Vec3, dt: f32, angular_factor: Vec3) -> Quat {
        let f = omega * angular_factor;
        let (ax, ay, az, aw) = (self.x, self.y, self.z, self.w);
        let h = dt * 0.5;
        Quat::from_xyzw(
            ax + h * (f.x * aw + f.y * az - f.z * ay),
            ay + h * (f.y * aw + f.z * ax - f.x * az),
            az + h * (f.z * aw + f.x * ay - f.y * ax),
            aw + h * (-f.x * ax - f.y * ay - f.z * az),
        )
    }

    fn normalize_fast(self) -> Quat {
        let f = (3.0 - self.length_squared()) * 0.5;
        if f == 0.0 {
            Quat::IDENTITY
        } else {
            Quat::from_xyzw(self.x * f, self.y * f, self.z * f, self.w * f)
        }
    }

    fn slerp_shortest(self, to: Quat, t: f32) -> Quat {
        let to = if self.dot(to) < 0.0 { -to } else { to };
        self.slerp(to, t)
    }
}

// ============================================================================
// Frame conversion
// ============================================================================

/// Transforms a world-space point into the frame at `(position, orientation)`.
pub fn point_to_local_frame(position: Vec3, orientation: Quat, world_point: Vec3) -> Vec3 {
    orientation.conjugate() * (world_point - position)
}

/// Transforms a point expressed in the frame at `(position, orientation)` into world space.
pub fn point_to_world_frame(position: Vec3, orientation: Quat, local_point: Vec3) -> Vec3 {
    orientation * local_point + position
}

/// Rotates a world-space direction into a local frame.
pub fn vector_to_local_frame(orientation: Quat, world_vector: Vec3) -> Vec3 {
    orientation.conjugate() * world_vector
}

/// Rotates a local direction into world space.
pub fn vector_to_world_frame(orientation: Quat, local_vector: Vec3) -> Vec3 {
    orientation * local_vector
}

// ============================================================================
// 3×3 Gaussian elimination
// ============================================================================

pub mod mat3 {
    //! Small dense solves with row-swap pivoting.

    use super::*;

    const PIVOT_EPSILON: f32 = 1e-12;

    /// Solves `m · x = b` for `x`.
    pub fn solve(m: Mat3, b: Vec3) -> Result<Vec3> {
        let mut rows = [[0.0f32; 4]; 3];
        for (r, row) in rows.iter_mut().enumerate() {
            let mr = m.row(r);
            *row = [mr.x, mr.y, mr.z, b[r]];
        }
        eliminate(&mut rows).map_err(|_| PhysicsError::SingularMatrix {
            matrix: m,
            rhs: Some(b),
        })?;
        Ok(Vec3::new(rows[0][3], rows[1][3], rows[2][3]))
    }

    /// Inverts `m`.
    pub fn invert(m: Mat3) -> Result<Mat3> {
        let mut rows = [[0.0f32; 6]; 3];
        for (r, row) in rows.iter_mut().enumerate() {
            let mr = m.row(r);
            *row = [mr.x, mr.y, mr.z, 0.0, 0.0, 0.0];
            row[3 + r] = 1.0;
        }
        eliminate(&mut rows).map_err(|_| PhysicsError::SingularMatrix {
            matrix: m,
            rhs: None,
        })?;
        // Columns 3..6 now hold the inverse, row by row.
        Ok(Mat3::from_cols(
            Vec3::new(rows[0][3], rows[1][3], rows[2][3]),
            Vec3::new(rows[0][4], rows[1][4], rows[2][4]),
            Vec3::new(rows[0][5], rows[1][5], rows[2][5]),
        ))
    }

    /// Gauss–Jordan elimination of an augmented 3×N system in place.
    fn eliminate<const N: usize>(rows: &mut [[f32; N]; 3]) -> std::result::Result<(), ()> {
        for col in 0..3 {
            let pivot = (col..3)
                .max_by(|&a, &b| rows[a][col].abs().total_cmp(&rows[b][col].abs()))
                .unwrap_or(col);
            if rows[pivot][col].abs() < PIVOT_EPSILON {
                return Err(());
            }
            rows.swap(col, pivot);

            let inv = 1.0 / rows[col][col];
            for v in rows[col].iter_mut() {
                *v *= inv;
            }
            for r in 0..3 {
                if r == col {
                    continue;
                }
                let factor = rows[r][col];
                if factor != 0.0 {
                    for c in 0..N {
                        rows[r][c] -= factor * rows[col][c];
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tangents_are_orthonormal() {
        for n in [Vec3::X, Vec3::Y, Vec3::new(1.0, 2.0, -3.0), Vec3::new(0.95, 0.1, 0.0)] {
            let (t1, t2) = n.tangents();
            assert!(t1.dot(n).abs() < 1e-5);
            assert!(t2.dot(n).abs() < 1e-5);
            assert!(t1.dot(t2).abs() < 1e-5);
            assert!((t1.length() - 1.0).abs() < 1e-5);
            assert!((t2.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_tangents_of_zero() {
        assert_eq!(Vec3::ZERO.tangents(), (Vec3::X, Vec3::Y));
    }

    #[test]
    fn test_integrate_stays_unit_after_normalize() {
        let mut q = Quat::IDENTITY;
        let omega = Vec3::new(3.0, -1.5, 7.0);
        for i in 0..1000 {
            q = q.integrate(omega, 1.0 / 60.0, Vec3::ONE);
            q = if i % 2 == 0 { q.normalize() } else { q.normalize_fast() };
            assert!((q.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_integrate_matches_axis_angle() {
        let dt = 1e-3;
        let mut q = Quat::IDENTITY;
        for _ in 0..1000 {
            q = q.integrate(Vec3::Z, dt, Vec3::ONE).normalize();
        }
        let expected = Quat::from_rotation_z(1.0);
        assert!(q.dot(expected).abs() > 0.9999);
    }

    #[test]
    fn test_angular_factor_locks_axis() {
        let q = Quat::IDENTITY.integrate(Vec3::new(1.0, 1.0, 1.0), 0.1, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(q.x, 0.0);
        assert_eq!(q.z, 0.0);
        assert!(q.y > 0.0);
    }

    #[test]
    fn test_slerp_takes_short_path() {
        let a = Quat::from_rotation_y(0.1);
        let b = -Quat::from_rotation_y(0.3);
        let mid = a.slerp_shortest(b, 0.5);
        assert!(mid.dot(Quat::from_rotation_y(0.2)).abs() > 0.9999);
    }

    #[test]
    fn test_solve() {
        let m = Mat3::from_cols(
            Vec3::new(0.0, 2.0, 1.0),
            Vec3::new(1.0, 0.0, 3.0),
            Vec3::new(4.0, 1.0, 0.0),
        );
        let x = Vec3::new(1.0, -2.0, 0.5);
        let b = m * x;
        let solved = mat3::solve(m, b).unwrap();
        assert!(solved.almost_equals(x, 1e-5));
    }

    #[test]
    fn test_invert() {
        let m = Mat3::from_cols(
            Vec3::new(2.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, 3.0),
            Vec3::new(1.0, 5.0, 0.0),
        );
        let inv = mat3::invert(m).unwrap();
        let id = m * inv;
        for c in 0..3 {
            assert!(id.col(c).almost_equals(Mat3::IDENTITY.col(c), 1e-5));
        }
    }

    #[test]
    fn test_singular_matrix_errors() {
        let m = Mat3::from_cols(Vec3::X, Vec3::X * 2.0, Vec3::Z);
        let err = mat3::solve(m, Vec3::ONE).unwrap_err();
        assert!(matches!(err, PhysicsError::SingularMatrix { rhs: Some(_), .. }));
        assert!(mat3::invert(m).is_err());
    }

    #[test]
    fn test_frame_roundtrip() {
        let pos = Vec3::new(1.0, 2.0, 3.0);
        let rot = Quat::from_rotation_x(0.7);
        let p = Vec3::new(-4.0, 0.5, 9.0);
        let local = point_to_local_frame(pos, rot, p);
        assert!(point_to_world_frame(pos, rot, local).almost_equals(p, 1e-5));
    }
}
