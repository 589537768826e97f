use std::f32::consts::{PI, TAU};

use glam::Vec3;

use super::convex::ConvexPolyhedron;
use crate::error::{PhysicsError, Result};

/// A (possibly tapered) cylinder along local Y, approximated by a prism.
#[derive(Debug, Clone)]
pub struct Cylinder {
    /// Radius of the top cap (`+Y`).
    pub radius_top: f32,
    /// Radius of the bottom cap (`-Y`).
    pub radius_bottom: f32,
    /// Distance between the caps.
    pub height: f32,
    /// Number of side faces.
    pub segments: usize,
    pub(crate) hull: ConvexPolyhedron,
}

impl Cylinder {
    /// Creates a cylinder with `segments` side faces.
    pub fn new(radius_top: f32, radius_bottom: f32, height: f32, segments: usize) -> Result<Self> {
        for r in [radius_top, radius_bottom] {
            if r < 0.0 {
                return Err(PhysicsError::NegativeRadius(r));
            }
        }
        if height <= 0.0 {
            return Err(PhysicsError::InvalidDimension {
                name: "height",
                value: height,
            });
        }
        if segments < 3 {
            return Err(PhysicsError::InvalidDimension {
                name: "segments",
                value: segments as f32,
            });
        }

        let n = segments;
        let half = height * 0.5;
        let ring = |r: f32, theta: f32, y: f32| Vec3::new(-r * theta.sin(), y, r * theta.cos());

        let mut vertices = vec![ring(radius_bottom, 0.0, -half), ring(radius_top, 0.0, half)];
        let mut bottom = vec![0];
        let mut top = vec![1];
        let mut faces = Vec::with_capacity(n + 2);
        let mut axes = Vec::with_capacity(n / 2 + 2);

        for i in 0..n {
            let theta = TAU / n as f32 * (i + 1) as f32;
            let theta_mid = TAU / n as f32 * (i as f32 + 0.5);
            if i < n - 1 {
                vertices.push(ring(radius_bottom, theta, -half));
                bottom.push(2 * i + 2);
                vertices.push(ring(radius_top, theta, half));
                top.push(2 * i + 3);
                faces.push(vec![2 * i, 2 * i + 1, 2 * i + 3, 2 * i + 2]);
            } else {
                faces.push(vec![2 * i, 2 * i + 1, 1, 0]);
            }
            // Opposite side faces share an axis when the count is even.
            if n % 2 == 1 || i < n / 2 {
                axes.push(Vec3::new(-theta_mid.sin(), 0.0, theta_mid.cos()));
            }
        }
        faces.push(bottom);
        axes.push(Vec3::Y);
        top.reverse();
        faces.push(top);

        let hull = ConvexPolyhedron::with_unique_axes(vertices, faces, axes)?;
        Ok(Self {
            radius_top,
            radius_bottom,
            height,
            segments,
            hull,
        })
    }

    /// The prism used for collision.
    pub fn hull(&self) -> &ConvexPolyhedron {
        &self.hull
    }

    /// Volume of the exact frustum.
    pub fn volume(&self) -> f32 {
        let (a, b) = (self.radius_top, self.radius_bottom);
        PI * self.height / 3.0 * (a * a + a * b + b * b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cylinder_faces_point_outward() {
        let c = Cylinder::new(1.0, 1.0, 2.0, 8).unwrap();
        let hull = c.hull();
        assert_eq!(hull.vertices().len(), 16);
        assert_eq!(hull.faces().len(), 10);
        let centroid = hull.centroid();
        for (face, n) in hull.faces().iter().zip(hull.face_normals()) {
            assert!(n.dot(hull.vertices()[face[0]] - centroid) > 0.0);
        }
        // Four side axes plus the cap axis.
        assert_eq!(hull.unique_axes().map(<[Vec3]>::len), Some(5));
    }

    #[test]
    fn test_cylinder_volume_approaches_exact() {
        let c = Cylinder::new(1.0, 1.0, 1.0, 64).unwrap();
        assert!((c.volume() - PI).abs() < 1e-5);
        assert!((c.hull().volume() - PI).abs() < 0.01);
    }

    #[test]
    fn test_invalid_cylinder() {
        assert!(Cylinder::new(-1.0, 1.0, 1.0, 8).is_err());
        assert!(Cylinder::new(1.0, 1.0, 0.0, 8).is_err());
        assert!(Cylinder::new(1.0, 1.0, 1.0, 2).is_err());
    }
}
