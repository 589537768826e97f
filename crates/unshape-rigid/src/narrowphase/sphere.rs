//! Sphere handlers.

use glam::{Quat, Vec3};

use super::{PairContext, point_in_polygon};
use crate::shape::{ConvexPolyhedron, Heightfield};

impl PairContext<'_, '_> {
    pub(super) fn sphere_sphere(&mut self, ra: f32, pa: Vec3, rb: f32, pb: Vec3) -> bool {
        if self.just_test {
            return pa.distance_squared(pb) < (ra + rb) * (ra + rb);
        }
        let ni = (pb - pa).try_normalize().unwrap_or(Vec3::X);
        self.emit(ni, pa + ni * ra, pb - ni * rb);
        true
    }

    pub(super) fn sphere_plane(&mut self, radius: f32, pa: Vec3, pb: Vec3, qb: Quat) -> bool {
        // Plane normal points away from the solid side; the contact normal
        // runs from the sphere into the plane.
        let plane_normal = qb * Vec3::Z;
        let height = plane_normal.dot(pa - pb);
        if height > radius {
            return false;
        }
        if self.just_test {
            return true;
        }
        let ni = -plane_normal;
        self.emit(ni, pa + ni * radius, pa - plane_normal * height);
        true
    }

    /// Closest point on the box to the sphere centre; a centre inside the box
    /// is pushed out through the nearest face.
    pub(super) fn sphere_box(&mut self, radius: f32, pa: Vec3, half_extents: Vec3, pb: Vec3, qb: Quat) -> bool {
        let local = qb.conjugate() * (pa - pb);
        let clamped = local.clamp(-half_extents, half_extents);

        let (outward, surface) = if clamped != local {
            let d = local - clamped;
            let dist_sq = d.length_squared();
            if dist_sq > radius * radius {
                return false;
            }
            (d / dist_sq.sqrt(), clamped)
        } else {
            let slack = half_extents - local.abs();
            let axis = if slack.x <= slack.y && slack.x <= slack.z {
                0
            } else if slack.y <= slack.z {
                1
            } else {
                2
            };
            let sign = if local[axis] < 0.0 { -1.0 } else { 1.0 };
            let mut outward = Vec3::ZERO;
            outward[axis] = sign;
            let mut surface = local;
            surface[axis] = sign * half_extents[axis];
            (outward, surface)
        };

        if self.just_test {
            return true;
        }
        let ni = -(qb * outward);
        self.emit(ni, pa + ni * radius, pb + qb * surface);
        true
    }

    /// Tests vertices, then faces, then face edges of the hull; emits at most
    /// one contact.
    pub(super) fn sphere_convex(&mut self, radius: f32, pa: Vec3, hull: &ConvexPolyhedron, pb: Vec3, qb: Quat) -> bool {
        let r2 = radius * radius;
        let world = |v: Vec3| qb * v + pb;

        for &v in hull.vertices() {
            let corner = world(v);
            let to_corner = corner - pa;
            if to_corner.length_squared() < r2 {
                if self.just_test {
                    return true;
                }
                let ni = to_corner.try_normalize().unwrap_or(Vec3::X);
                self.emit(ni, pa + ni * radius, corner);
                return true;
            }
        }

        let mut face_vertices = Vec::new();
        for (face, &normal) in hull.faces().iter().zip(hull.face_normals()) {
            let world_normal = qb * normal;
            let world_point = world(hull.vertices()[face[0]]);
            let deepest = pa - world_normal * radius;
            let penetration = (deepest - world_point).dot(world_normal);
            if penetration >= 0.0 || (pa - world_point).dot(world_normal) <= 0.0 {
                continue;
            }

            face_vertices.clear();
            face_vertices.extend(face.iter().map(|&k| world(hull.vertices()[k])));
            if point_in_polygon(&face_vertices, world_normal, pa) {
                if self.just_test {
                    return true;
                }
                let ni = -world_normal;
                self.emit(ni, deepest, deepest - world_normal * penetration);
                return true;
            }

            for k in 0..face_vertices.len() {
                let v1 = face_vertices[k];
                let v2 = face_vertices[(k + 1) % face_vertices.len()];
                let edge = v2 - v1;
                let Some(edge_unit) = edge.try_normalize() else {
                    continue;
                };
                let along = (pa - v1).dot(edge_unit);
                let on_edge = v1 + edge_unit * along;
                if along > 0.0 && along * along < edge.length_squared() && on_edge.distance_squared(pa) < r2 {
                    if self.just_test {
                        return true;
                    }
                    let ni = (on_edge - pa).try_normalize().unwrap_or(-world_normal);
                    self.emit(ni, pa + ni * radius, on_edge);
                    return true;
                }
            }
        }
        false
    }

    pub(super) fn sphere_heightfield(&mut self, radius: f32, pa: Vec3, hf: &Heightfield, pb: Vec3, qb: Quat) -> bool {
        let local = qb.conjugate() * (pa - pb);
        let Some((min_x, min_y, max_x, max_y)) = hf.cell_range(local.x, local.y, radius) else {
            return false;
        };
        let (lo, hi) = hf.rect_min_max(min_x, min_y, max_x, max_y);
        if local.z - radius > hi || local.z + radius < lo {
            return false;
        }

        let first = self.contacts.len();
        for xi in min_x..max_x {
            for yi in min_y..max_y {
                let before = self.contacts.len();
                for upper in [false, true] {
                    let Ok(pillar) = hf.convex_triangle_pillar(xi, yi, upper) else {
                        continue;
                    };
                    let offset = pb + qb * pillar.offset;
                    if pa.distance(offset) < pillar.hull.bounding_sphere_radius() + radius
                        && self.sphere_convex(radius, pa, &pillar.hull, offset, qb)
                        && self.just_test
                    {
                        return true;
                    }
                }
                if self.contacts.len() - before > 2 {
                    return true;
                }
            }
        }
        self.contacts.len() > first
    }

    pub(super) fn sphere_particle(&mut self, radius: f32, pa: Vec3, pb: Vec3) -> bool {
        let offset = pb - pa;
        if offset.length_squared() > radius * radius {
            return false;
        }
        if self.just_test {
            return true;
        }
        let ni = offset.try_normalize().unwrap_or(Vec3::Z);
        self.emit(ni, pa + ni * radius, pb);
        true
    }
}
