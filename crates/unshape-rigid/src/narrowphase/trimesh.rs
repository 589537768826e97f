//! Triangle mesh handlers.

use glam::{Quat, Vec3};

use super::PairContext;
use crate::aabb::Aabb;
use crate::shape::{ConvexPolyhedron, Trimesh};

/// Contacts closer than this on one mesh are merged (shared edges and vertices).
const MERGE_DISTANCE_SQ: f32 = 1e-10;

impl PairContext<'_, '_> {
    /// One contact per distinct closest point on the triangles the sphere touches.
    pub(super) fn sphere_trimesh(&mut self, radius: f32, pa: Vec3, mesh: &Trimesh, pb: Vec3, qb: Quat) -> bool {
        let local = qb.conjugate() * (pa - pb);
        let query = Aabb::from_center_half_extents(local, Vec3::splat(radius));
        let mut triangles = Vec::new();
        mesh.triangles_in_aabb(&query, &mut triangles);

        let mut seen: Vec<Vec3> = Vec::new();
        let mut hit = false;
        for &t in &triangles {
            let [a, b, c] = mesh.triangle(t as usize);
            let closest = closest_point_on_triangle(local, a, b, c);
            let offset = local - closest;
            if offset.length_squared() >= radius * radius {
                continue;
            }
            if self.just_test {
                return true;
            }
            if seen.iter().any(|s| s.distance_squared(closest) < MERGE_DISTANCE_SQ) {
                continue;
            }
            seen.push(closest);
            hit = true;

            let local_normal = offset
                .try_normalize()
                .unwrap_or_else(|| mesh.normal(t as usize));
            let ni = -(qb * local_normal);
            self.emit(ni, pa + ni * radius, pb + qb * closest);
        }
        hit
    }

    /// Runs hull–hull contact against every triangle near the hull.
    pub(super) fn convex_trimesh(
        &mut self,
        hull: &ConvexPolyhedron,
        pa: Vec3,
        qa: Quat,
        mesh: &Trimesh,
        pb: Vec3,
        qb: Quat,
    ) -> bool {
        let query = hull.world_aabb(pa, qa).to_local_frame(pb, qb);
        let mut triangles = Vec::new();
        mesh.triangles_in_aabb(&query, &mut triangles);

        let mut hit = false;
        for &t in &triangles {
            let Ok((triangle, centroid)) = mesh.triangle_hull(t as usize) else {
                continue;
            };
            if self.convex_convex(hull, pa, qa, &triangle, pb + qb * centroid, qb) {
                if self.just_test {
                    return true;
                }
                hit = true;
            }
        }
        hit
    }
}

/// Closest point to `p` on triangle `abc`.
pub(crate) fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return a + ab * (d1 / (d1 - d3));
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return a + ac * (d2 / (d2 - d6));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        return b + (c - b) * ((d4 - d3) / ((d4 - d3) + (d5 - d6)));
    }

    let denom = 1.0 / (va + vb + vc);
    a + ab * (vb * denom) + ac * (vc * denom)
}

#[cfg(test)]
mod tests {
    use super::super::tests::{Fixture, body_with, gap};
    use super::*;
    use crate::body::Body;
    use crate::shape::Shape;

    /// A 4×4 square in the XY plane, facing +Z.
    fn floor() -> Shape {
        Shape::trimesh(
            vec![
                Vec3::new(-2.0, -2.0, 0.0),
                Vec3::new(2.0, -2.0, 0.0),
                Vec3::new(2.0, 2.0, 0.0),
                Vec3::new(-2.0, 2.0, 0.0),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
        .unwrap()
    }

    #[test]
    fn test_closest_point_regions() {
        let (a, b, c) = (Vec3::ZERO, Vec3::X, Vec3::Y);
        assert_eq!(closest_point_on_triangle(Vec3::new(-1.0, -1.0, 0.0), a, b, c), a);
        assert_eq!(closest_point_on_triangle(Vec3::new(0.2, 0.2, 5.0), a, b, c), Vec3::new(0.2, 0.2, 0.0));
        let on_edge = closest_point_on_triangle(Vec3::new(0.5, -1.0, 0.0), a, b, c);
        assert!(on_edge.abs_diff_eq(Vec3::new(0.5, 0.0, 0.0), 1e-6));
        let hyp = closest_point_on_triangle(Vec3::new(1.0, 1.0, 0.0), a, b, c);
        assert!(hyp.abs_diff_eq(Vec3::new(0.5, 0.5, 0.0), 1e-6));
    }

    #[test]
    fn test_sphere_on_shared_edge_makes_one_contact() {
        // The centre sits above the diagonal shared by both triangles.
        let fx = Fixture::new(vec![
            body_with(Shape::sphere(0.5).unwrap(), Vec3::new(0.3, 0.3, 0.4)),
            Body::new_static().with_shape(floor()),
        ]);
        let contacts = fx.contacts();
        assert_eq!(contacts.len(), 1);
        assert!(contacts[0].contact_normal().unwrap().abs_diff_eq(-Vec3::Z, 1e-5));
        assert!((gap(&contacts[0], &fx.bodies) + 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_sphere_above_mesh_misses() {
        let fx = Fixture::new(vec![
            body_with(Shape::sphere(0.5).unwrap(), Vec3::new(0.3, -0.7, 0.6)),
            Body::new_static().with_shape(floor()),
        ]);
        assert!(fx.contacts().is_empty());
    }

    #[test]
    fn test_box_on_trimesh() {
        let fx = Fixture::new(vec![
            body_with(Shape::cuboid(Vec3::splat(0.5)).unwrap(), Vec3::new(0.7, -0.4, 0.45)),
            Body::new_static().with_shape(floor()),
        ]);
        let contacts = fx.contacts();
        assert!(!contacts.is_empty());
        for eq in &contacts {
            assert!(eq.contact_normal().unwrap().z < -0.99);
            assert!((gap(eq, &fx.bodies) + 0.05).abs() < 1e-4);
        }
    }
}
