//! Plane, convex hull, heightfield and particle handlers.

use glam::{Quat, Vec3};
use tracing::warn;

use super::PairContext;
use crate::shape::{ClipPoint, ConvexPolyhedron, Heightfield, Trimesh};

/// Clip depth window for hull manifolds.
const CLIP_MIN_DIST: f32 = -100.0;
const CLIP_MAX_DIST: f32 = 100.0;

impl PairContext<'_, '_> {
    /// One contact per hull vertex below the plane.
    pub(super) fn plane_convex(&mut self, pa: Vec3, qa: Quat, hull: &ConvexPolyhedron, pb: Vec3, qb: Quat) -> bool {
        let normal = qa * Vec3::Z;
        let start = self.begin_manifold();
        let mut hit = false;
        for vertex in hull.world_vertices(pb, qb) {
            let depth = normal.dot(vertex - pa);
            if depth > 0.0 {
                continue;
            }
            if self.just_test {
                return true;
            }
            hit = true;
            self.emit_manifold(normal, vertex - normal * depth, vertex);
        }
        self.end_manifold(start);
        hit
    }

    pub(super) fn plane_particle(&mut self, pa: Vec3, qa: Quat, pb: Vec3) -> bool {
        let normal = qa * Vec3::Z;
        let depth = normal.dot(pb - pa);
        if depth > 0.0 {
            return false;
        }
        if self.just_test {
            return true;
        }
        self.emit(normal, pb - normal * depth, pb);
        true
    }

    /// One contact per mesh vertex below the plane.
    pub(super) fn plane_trimesh(&mut self, pa: Vec3, qa: Quat, mesh: &Trimesh, pb: Vec3, qb: Quat) -> bool {
        let normal = qa * Vec3::Z;
        let start = self.begin_manifold();
        let mut hit = false;
        for &local in mesh.vertices() {
            let vertex = qb * local + pb;
            let depth = normal.dot(vertex - pa);
            if depth > 0.0 {
                continue;
            }
            if self.just_test {
                return true;
            }
            hit = true;
            self.emit_manifold(normal, vertex - normal * depth, vertex);
        }
        self.end_manifold(start);
        hit
    }

    /// SAT for the axis of least penetration, then clips a face of B against
    /// A to build the manifold.
    pub(super) fn convex_convex(
        &mut self,
        hull_a: &ConvexPolyhedron,
        pa: Vec3,
        qa: Quat,
        hull_b: &ConvexPolyhedron,
        pb: Vec3,
        qb: Quat,
    ) -> bool {
        if pa.distance(pb) > hull_a.bounding_sphere_radius() + hull_b.bounding_sphere_radius() {
            return false;
        }
        let Some((sep_axis, _)) = hull_a.find_separating_axis(hull_b, pa, qa, pb, qb) else {
            return false;
        };

        let mut manifold: Vec<ClipPoint> = Vec::new();
        hull_a.clip_against_hull(pa, qa, hull_b, pb, qb, sep_axis, CLIP_MIN_DIST, CLIP_MAX_DIST, &mut manifold);
        if manifold.is_empty() {
            return false;
        }
        if self.just_test {
            return true;
        }

        let start = self.begin_manifold();
        let ni = -sep_axis;
        for point in &manifold {
            self.emit_manifold(ni, point.point - point.normal * point.depth, point.point);
        }
        self.end_manifold(start);
        true
    }

    /// Runs [`Self::convex_convex`] against the triangle pillars under the hull.
    pub(super) fn convex_heightfield(
        &mut self,
        hull: &ConvexPolyhedron,
        pa: Vec3,
        qa: Quat,
        hf: &Heightfield,
        pb: Vec3,
        qb: Quat,
    ) -> bool {
        let local = qb.conjugate() * (pa - pb);
        let radius = hull.bounding_sphere_radius();
        let Some((min_x, min_y, max_x, max_y)) = hf.cell_range(local.x, local.y, radius) else {
            return false;
        };
        let (lo, hi) = hf.rect_min_max(min_x, min_y, max_x, max_y);
        if local.z - radius > hi || local.z + radius < lo {
            return false;
        }

        let mut hit = false;
        for xi in min_x..max_x {
            for yi in min_y..max_y {
                for upper in [false, true] {
                    let Ok(pillar) = hf.convex_triangle_pillar(xi, yi, upper) else {
                        continue;
                    };
                    let offset = pb + qb * pillar.offset;
                    if pa.distance(offset) >= pillar.hull.bounding_sphere_radius() + radius {
                        continue;
                    }
                    if self.convex_convex(hull, pa, qa, &pillar.hull, offset, qb) {
                        if self.just_test {
                            return true;
                        }
                        hit = true;
                    }
                }
            }
        }
        hit
    }

    /// A particle inside the hull is pushed out through the nearest face.
    pub(super) fn convex_particle(&mut self, hull: &ConvexPolyhedron, pa: Vec3, qa: Quat, pb: Vec3) -> bool {
        if !hull.point_is_inside(pb, pa, qa) {
            return false;
        }
        if self.just_test {
            return true;
        }

        let mut best: Option<(f32, Vec3)> = None;
        for (face, &normal) in hull.faces().iter().zip(hull.face_normals()) {
            let world_normal = qa * normal;
            let world_vertex = qa * hull.vertices()[face[0]] + pa;
            let penetration = -world_normal.dot(pb - world_vertex);
            if best.is_none_or(|(d, _)| penetration.abs() < d.abs()) {
                best = Some((penetration, world_normal));
            }
        }
        let Some((depth, normal)) = best else {
            warn!("particle inside convex hull but no penetrated face found");
            return false;
        };
        self.emit(normal, pb + normal * depth, pb);
        true
    }

    /// A particle below the surface of its cell's triangle.
    pub(super) fn heightfield_particle(&mut self, hf: &Heightfield, pa: Vec3, qa: Quat, pb: Vec3) -> bool {
        let local = qa.conjugate() * (pb - pa);
        let Some((xi, yi)) = hf.index_of_position(local.x, local.y, false) else {
            return false;
        };
        let Ok(height) = hf.height_at(local.x, local.y) else {
            return false;
        };
        if local.z > height {
            return false;
        }
        if self.just_test {
            return true;
        }

        let s = hf.element_size();
        let upper = (local.x / s - xi as f32) + (local.y / s - yi as f32) > 1.0;
        let [a, b, c] = hf.triangle_at(xi, yi, upper);
        let local_normal = (b - a).cross(c - a).try_normalize().unwrap_or(Vec3::Z);
        let surface = Vec3::new(local.x, local.y, height);
        self.emit(qa * local_normal, qa * surface + pa, pb);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{Fixture, body_with, gap};
    use super::super::Narrowphase;
    use crate::body::Body;
    use crate::shape::Shape;
    use glam::{Quat, Vec3};

    fn cube(h: f32) -> Shape {
        Shape::cuboid(Vec3::splat(h)).unwrap()
    }

    #[test]
    fn test_plane_box_corners() {
        let fx = Fixture::new(vec![
            Body::new_static().with_shape(Shape::plane()),
            body_with(cube(0.5), Vec3::new(0.0, 0.0, 0.45)),
        ]);
        let contacts = fx.contacts();
        assert_eq!(contacts.len(), 4);
        for eq in &contacts {
            assert_eq!(eq.contact_normal(), Some(Vec3::Z));
            assert!((gap(eq, &fx.bodies) + 0.05).abs() < 1e-5);
        }
    }

    #[test]
    fn test_plane_particle() {
        let fx = Fixture::new(vec![
            Body::new_static().with_shape(Shape::plane()),
            body_with(Shape::particle(), Vec3::new(1.0, 1.0, -0.1)),
        ]);
        let contacts = fx.contacts();
        assert_eq!(contacts.len(), 1);
        assert!((gap(&contacts[0], &fx.bodies) + 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_box_box_face_contact() {
        let fx = Fixture::new(vec![
            body_with(cube(1.0), Vec3::ZERO),
            body_with(cube(1.0), Vec3::new(0.0, 1.9, 0.0)),
        ]);
        let contacts = fx.contacts();
        assert_eq!(contacts.len(), 4);
        for eq in &contacts {
            let n = eq.contact_normal().unwrap();
            assert!(n.abs_diff_eq(Vec3::Y, 1e-5), "normal {n}");
            assert!((gap(eq, &fx.bodies) + 0.1).abs() < 1e-4);
        }
    }

    #[test]
    fn test_box_box_separated() {
        let fx = Fixture::new(vec![
            body_with(cube(1.0), Vec3::ZERO),
            body_with(cube(1.0), Vec3::new(2.1, 0.5, 0.0)),
        ]);
        assert!(fx.contacts().is_empty());
    }

    #[test]
    fn test_box_on_rotated_box() {
        let fx = Fixture::new(vec![
            body_with(cube(1.0), Vec3::ZERO),
            body_with(cube(0.5), Vec3::new(0.0, 1.45, 0.0)).with_orientation(Quat::from_rotation_y(0.3)),
        ]);
        let contacts = fx.contacts();
        assert!(!contacts.is_empty());
        for eq in &contacts {
            assert!(eq.contact_normal().unwrap().abs_diff_eq(Vec3::Y, 1e-4));
            assert!(gap(eq, &fx.bodies) < 0.0);
        }
    }

    #[test]
    fn test_convex_heightfield() {
        let ground = Body::new_static().with_shape(Shape::heightfield(vec![vec![0.0; 6]; 6], 1.0).unwrap());
        let fx = Fixture::new(vec![body_with(cube(0.3), Vec3::new(2.5, 2.5, 0.25)), ground]);
        let contacts = fx.contacts();
        assert!(!contacts.is_empty());
        for eq in &contacts {
            assert!(gap(eq, &fx.bodies) < 0.0);
        }
        // Box is A and the ground B; the normal points down into the ground.
        assert!(contacts.iter().all(|eq| eq.contact_normal().unwrap().z < -0.9));
    }

    #[test]
    fn test_cylinder_heightfield_is_flipped() {
        let ground = Body::new_static().with_shape(Shape::heightfield(vec![vec![0.0; 6]; 6], 1.0).unwrap());
        let cylinder = Shape::cylinder(0.3, 0.3, 0.6, 8).unwrap();
        let fx = Fixture::new(vec![
            body_with(cylinder, Vec3::new(2.5, 2.5, 0.25))
                .with_orientation(Quat::from_rotation_x(std::f32::consts::FRAC_PI_2)),
            ground,
        ]);
        let contacts = fx.contacts();
        assert!(!contacts.is_empty());
        for eq in &contacts {
            // Heightfield is A (lower tag): the normal points up at the cylinder.
            assert_eq!(eq.body_a, 1);
            assert!(eq.contact_normal().unwrap().z > 0.9);
            assert!(gap(eq, &fx.bodies) < 0.0);
        }
    }

    #[test]
    fn test_convex_particle() {
        let fx = Fixture::new(vec![
            body_with(cube(1.0), Vec3::ZERO),
            body_with(Shape::particle(), Vec3::new(0.2, 0.9, 0.0)),
        ]);
        let contacts = fx.contacts();
        assert_eq!(contacts.len(), 1);
        assert!(contacts[0].contact_normal().unwrap().abs_diff_eq(Vec3::Y, 1e-5));
        assert!((gap(&contacts[0], &fx.bodies) + 0.1).abs() < 1e-5);

        let fx = Fixture::new(vec![
            body_with(cube(1.0), Vec3::ZERO),
            body_with(Shape::particle(), Vec3::new(0.2, 1.1, 0.0)),
        ]);
        assert!(fx.contacts().is_empty());
    }

    #[test]
    fn test_particle_cylinder_is_flipped() {
        let fx = Fixture::new(vec![
            body_with(Shape::cylinder(1.0, 1.0, 2.0, 12).unwrap(), Vec3::ZERO),
            body_with(Shape::particle(), Vec3::new(0.0, 0.95, 0.0)),
        ]);
        let contacts = fx.contacts();
        assert_eq!(contacts.len(), 1);
        // Particle is A: the normal points from the particle into the cylinder.
        assert_eq!(contacts[0].body_a, 1);
        assert!(contacts[0].contact_normal().unwrap().abs_diff_eq(-Vec3::Y, 1e-5));
        assert!((gap(&contacts[0], &fx.bodies) + 0.05).abs() < 1e-5);
    }

    #[test]
    fn test_heightfield_particle() {
        let data = vec![vec![0.0, 0.0, 0.0], vec![1.0, 1.0, 1.0], vec![2.0, 2.0, 2.0]];
        let ground = Body::new_static().with_shape(Shape::heightfield(data, 1.0).unwrap());
        let fx = Fixture::new(vec![ground, body_with(Shape::particle(), Vec3::new(0.5, 0.5, 0.3))]);
        let contacts = fx.contacts();
        assert_eq!(contacts.len(), 1);
        let n = contacts[0].contact_normal().unwrap();
        assert!(n.abs_diff_eq(Vec3::new(-1.0, 0.0, 1.0).normalize(), 1e-5));
        assert!(gap(&contacts[0], &fx.bodies) < 0.0);
    }

    #[test]
    fn test_box_box_just_test() {
        let fx = Fixture::new(vec![
            body_with(cube(1.0), Vec3::ZERO).with_type(crate::body::BodyType::Kinematic),
            body_with(cube(1.0), Vec3::new(0.0, 1.9, 0.0)).with_type(crate::body::BodyType::Kinematic),
        ]);
        let (contacts, _, overlaps) = fx.run(&Narrowphase::new());
        assert!(contacts.is_empty());
        assert_eq!(overlaps.len(), 1);
    }
}
