//! Convex polyhedra and separating-axis contact generation.

use glam::{Quat, Vec3};
use tracing::warn;

use crate::aabb::Aabb;
use crate::error::{PhysicsError, Result};
use crate::math::Vec3Ext;

/// Points closer than this to the reference face are kept by clipping.
const CLIP_KEEP_DEPTH: f32 = 1e-6;

/// One point of a clipped contact manifold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipPoint {
    /// World-space point on the incident face.
    pub point: Vec3,
    /// World normal of the reference face.
    pub normal: Vec3,
    /// Signed distance to the reference face (negative when penetrating).
    pub depth: f32,
}

/// A convex polyhedron given by vertices and outward-wound faces.
#[derive(Debug, Clone)]
pub struct ConvexPolyhedron {
    vertices: Vec<Vec3>,
    faces: Vec<Vec<usize>>,
    face_normals: Vec<Vec3>,
    unique_edges: Vec<Vec3>,
    unique_axes: Option<Vec<Vec3>>,
    bounding_sphere_radius: f32,
}

impl ConvexPolyhedron {
    /// Builds a polyhedron from vertices and counter-clockwise faces.
    ///
    /// Fails if a face has fewer than three vertices or references a
    /// vertex that does not exist.
    pub fn new(vertices: Vec<Vec3>, faces: Vec<Vec<usize>>) -> Result<Self> {
        Self::build(vertices, faces, None, true)
    }

    /// Like [`ConvexPolyhedron::new`], but restricts face-normal SAT tests to `axes`.
    ///
    /// Useful for shapes with many parallel faces, such as boxes.
    pub fn with_unique_axes(
        vertices: Vec<Vec3>,
        faces: Vec<Vec<usize>>,
        axes: Vec<Vec3>,
    ) -> Result<Self> {
        Self::build(vertices, faces, Some(axes), true)
    }

    pub(crate) fn build(
        vertices: Vec<Vec3>,
        faces: Vec<Vec<usize>>,
        unique_axes: Option<Vec<Vec3>>,
        check_orientation: bool,
    ) -> Result<Self> {
        for (fi, face) in faces.iter().enumerate() {
            if face.len() < 3 {
                return Err(PhysicsError::DegenerateFace {
                    face: fi,
                    len: face.len(),
                });
            }
            if let Some(&vertex) = face.iter().find(|&&v| v >= vertices.len()) {
                return Err(PhysicsError::MissingVertex {
                    face: fi,
                    vertex,
                    vertex_count: vertices.len(),
                });
            }
        }

        let mut hull = Self {
            vertices,
            faces,
            face_normals: Vec::new(),
            unique_edges: Vec::new(),
            unique_axes,
            bounding_sphere_radius: 0.0,
        };
        hull.compute_normals(check_orientation);
        hull.compute_edges();
        hull.update_bounding_sphere_radius();
        Ok(hull)
    }

    fn compute_normals(&mut self, check_orientation: bool) {
        self.face_normals = self
            .faces
            .iter()
            .enumerate()
            .map(|(fi, face)| {
                let v = |i: usize| self.vertices[face[i]];
                let n = face_normal(v(0), v(1), v(2));
                if check_orientation && n.dot(v(0)) < 0.0 {
                    warn!(
                        face = fi,
                        ?n,
                        "face normal points into the shape; check the face winding"
                    );
                }
                n
            })
            .collect();
    }

    fn compute_edges(&mut self) {
        self.unique_edges.clear();
        for face in &self.faces {
            for j in 0..face.len() {
                let a = self.vertices[face[j]];
                let b = self.vertices[face[(j + 1) % face.len()]];
                let edge = (b - a).normalize_or_zero();
                let known = self
                    .unique_edges
                    .iter()
                    .any(|e| e.almost_equals(edge, 1e-6) || e.almost_equals(-edge, 1e-6));
                if !known {
                    self.unique_edges.push(edge);
                }
            }
        }
    }

    /// Local vertices.
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    /// Faces as vertex-index loops.
    pub fn faces(&self) -> &[Vec<usize>] {
        &self.faces
    }

    /// Outward unit normal per face, in local space.
    pub fn face_normals(&self) -> &[Vec3] {
        &self.face_normals
    }

    /// Deduplicated edge directions.
    pub fn unique_edges(&self) -> &[Vec3] {
        &self.unique_edges
    }

    /// Explicit SAT axes, if any.
    pub fn unique_axes(&self) -> Option<&[Vec3]> {
        self.unique_axes.as_deref()
    }

    /// Plane constant `c` such that `n·p + c = 0` on the face.
    pub fn plane_constant(&self, face: usize) -> f32 {
        -self.face_normals[face].dot(self.vertices[self.faces[face][0]])
    }

    /// Radius of the smallest origin-centred sphere containing every vertex.
    pub fn bounding_sphere_radius(&self) -> f32 {
        self.bounding_sphere_radius
    }

    /// Recomputes the bounding-sphere radius from the vertices.
    pub fn update_bounding_sphere_radius(&mut self) {
        self.bounding_sphere_radius = self
            .vertices
            .iter()
            .map(|v| v.length_squared())
            .fold(0.0f32, f32::max)
            .sqrt();
    }

    /// Mean of the vertices.
    pub fn centroid(&self) -> Vec3 {
        if self.vertices.is_empty() {
            return Vec3::ZERO;
        }
        self.vertices.iter().copied().sum::<Vec3>() / self.vertices.len() as f32
    }

    /// Bounds in the shape's own frame.
    pub fn local_aabb(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter().copied())
    }

    /// Bounds after placing the shape at `(position, orientation)`.
    pub fn world_aabb(&self, position: Vec3, orientation: Quat) -> Aabb {
        Aabb::from_points(self.world_vertices(position, orientation))
    }

    /// Vertices placed at `(position, orientation)`.
    pub fn world_vertices(&self, position: Vec3, orientation: Quat) -> impl Iterator<Item = Vec3> + '_ {
        self.vertices.iter().map(move |&v| orientation * v + position)
    }

    /// Inertia of the local bounding box with the given mass.
    pub fn local_inertia(&self, mass: f32) -> Vec3 {
        let e = self.local_aabb().size();
        let (x2, y2, z2) = (e.x * e.x, e.y * e.y, e.z * e.z);
        Vec3::new(y2 + z2, x2 + z2, x2 + y2) * (mass / 12.0)
    }

    /// Enclosed volume, from a fan of tetrahedra over each face.
    pub fn volume(&self) -> f32 {
        let mut six_volume = 0.0;
        for face in &self.faces {
            let p0 = self.vertices[face[0]];
            for k in 1..face.len() - 1 {
                let p1 = self.vertices[face[k]];
                let p2 = self.vertices[face[k + 1]];
                six_volume += p0.dot(p1.cross(p2));
            }
        }
        (six_volume / 6.0).abs()
    }

    /// True if `point` (world space) lies strictly inside the hull placed at
    /// `(position, orientation)`: on the inner side of every face plane.
    pub fn point_is_inside(&self, point: Vec3, position: Vec3, orientation: Quat) -> bool {
        let local = orientation.conjugate() * (point - position);
        let centroid = self.centroid();
        self.faces.iter().zip(&self.face_normals).all(|(face, &n)| {
            let v0 = self.vertices[face[0]];
            let point_side = n.dot(local - v0);
            let centroid_side = n.dot(centroid - v0);
            point_side * centroid_side > 0.0
        })
    }

    // ========================================================================
    // Separating axis test
    // ========================================================================

    /// Projects the placed hull onto `axis`, returning `(max, min)`.
    pub fn project(&self, axis: Vec3, position: Vec3, orientation: Quat) -> (f32, f32) {
        let local_axis = orientation.conjugate() * axis;
        let offset = position.dot(axis);
        let (mut max, mut min) = (f32::MIN, f32::MAX);
        for v in &self.vertices {
            let d = v.dot(local_axis);
            max = max.max(d);
            min = min.min(d);
        }
        (max + offset, min + offset)
    }

    /// Overlap depth of two placed hulls along `axis`, or `None` if it separates them.
    pub fn test_sep_axis(
        &self,
        axis: Vec3,
        other: &ConvexPolyhedron,
        pos_a: Vec3,
        quat_a: Quat,
        pos_b: Vec3,
        quat_b: Quat,
    ) -> Option<f32> {
        let (max_a, min_a) = self.project(axis, pos_a, quat_a);
        let (max_b, min_b) = other.project(axis, pos_b, quat_b);
        if max_a < min_b || max_b < min_a {
            return None;
        }
        Some((max_a - min_b).min(max_b - min_a))
    }

    /// Finds the axis of minimum penetration between two placed hulls.
    ///
    /// Tests the face normals (or unique axes) of both hulls, then the cross
    /// product of every pair of unique edges. Returns `None` as soon as one
    /// axis separates. The returned axis points from `other` towards `self`;
    /// the depth is non-negative.
    pub fn find_separating_axis(
        &self,
        other: &ConvexPolyhedron,
        pos_a: Vec3,
        quat_a: Quat,
        pos_b: Vec3,
        quat_b: Quat,
    ) -> Option<(Vec3, f32)> {
        let mut best = Vec3::ZERO;
        let mut dmin = f32::MAX;

        let mut consider = |axis: Vec3| -> Option<()> {
            let d = self.test_sep_axis(axis, other, pos_a, quat_a, pos_b, quat_b)?;
            if d < dmin {
                dmin = d;
                best = axis;
            }
            Some(())
        };

        for (hull, quat) in [(self, quat_a), (other, quat_b)] {
            let axes = hull.unique_axes().unwrap_or(hull.face_normals.as_slice());
            for &axis in axes {
                consider(quat * axis)?;
            }
        }

        for &ea in &self.unique_edges {
            let world_a = quat_a * ea;
            for &eb in &other.unique_edges {
                let cross = world_a.cross(quat_b * eb);
                if !cross.almost_zero(1e-6) {
                    consider(cross.normalize())?;
                }
            }
        }

        if (pos_b - pos_a).dot(best) > 0.0 {
            best = -best;
        }
        Some((best, dmin))
    }

    // ========================================================================
    // Clipping
    // ========================================================================

    /// Builds a contact manifold by clipping the face of `other` most aligned
    /// with `sep_normal` against this hull.
    ///
    /// `sep_normal` is the axis from [`ConvexPolyhedron::find_separating_axis`].
    #[allow(clippy::too_many_arguments)]
    pub fn clip_against_hull(
        &self,
        pos_a: Vec3,
        quat_a: Quat,
        other: &ConvexPolyhedron,
        pos_b: Vec3,
        quat_b: Quat,
        sep_normal: Vec3,
        min_dist: f32,
        max_dist: f32,
        out: &mut Vec<ClipPoint>,
    ) {
        let closest_b = other
            .face_normals
            .iter()
            .enumerate()
            .map(|(i, &n)| (i, (quat_b * n).dot(sep_normal)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i);
        let Some(face_b) = closest_b else {
            return;
        };

        let world_face_b: Vec<Vec3> = other.faces[face_b]
            .iter()
            .map(|&v| quat_b * other.vertices[v] + pos_b)
            .collect();
        self.clip_face_against_hull(sep_normal, pos_a, quat_a, &world_face_b, min_dist, max_dist, out);
    }

    /// Clips a world-space polygon against the side planes of the face of
    /// this hull most opposed to `sep_normal`, keeping points behind that face.
    #[allow(clippy::too_many_arguments)]
    pub fn clip_face_against_hull(
        &self,
        sep_normal: Vec3,
        pos_a: Vec3,
        quat_a: Quat,
        world_face_b: &[Vec3],
        min_dist: f32,
        max_dist: f32,
        out: &mut Vec<ClipPoint>,
    ) {
        let closest_a = self
            .face_normals
            .iter()
            .enumerate()
            .map(|(i, &n)| (i, (quat_a * n).dot(sep_normal)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i);
        let Some(face_a) = closest_a else {
            return;
        };

        let poly_a = &self.faces[face_a];
        let mut input = world_face_b.to_vec();
        let mut output = Vec::with_capacity(input.len() + poly_a.len());

        for i in 0..poly_a.len() {
            let ia = poly_a[i];
            let ib = poly_a[(i + 1) % poly_a.len()];
            let (plane_normal, plane_constant) = match self.adjacent_face(face_a, ia, ib) {
                Some(adj) => {
                    let n = quat_a * self.face_normals[adj];
                    (n, self.plane_constant(adj) - n.dot(pos_a))
                }
                None => {
                    // No neighbour across this edge: clip against the plane
                    // through the edge, perpendicular to the face.
                    let a = self.vertices[ia];
                    let edge = self.vertices[ib] - a;
                    let n = quat_a * edge.cross(self.face_normals[face_a]).normalize_or_zero();
                    let world_a = quat_a * a + pos_a;
                    (n, -n.dot(world_a))
                }
            };
            clip_face_against_plane(&input, &mut output, plane_normal, plane_constant);
            std::mem::swap(&mut input, &mut output);
            output.clear();
        }

        let normal = quat_a * self.face_normals[face_a];
        let constant = self.plane_constant(face_a) - normal.dot(pos_a);
        for &point in &input {
            let mut depth = normal.dot(point) + constant;
            if depth <= min_dist {
                depth = min_dist;
            }
            if depth <= max_dist && depth <= CLIP_KEEP_DEPTH {
                out.push(ClipPoint {
                    point,
                    normal,
                    depth,
                });
            }
        }
    }

    /// The other face sharing the edge `a–b` with `face`.
    fn adjacent_face(&self, face: usize, a: usize, b: usize) -> Option<usize> {
        self.faces.iter().enumerate().position(|(i, f)| {
            i != face && f.contains(&a) && f.contains(&b)
        })
    }
}

/// Outward normal of a counter-clockwise triangle.
pub(crate) fn face_normal(va: Vec3, vb: Vec3, vc: Vec3) -> Vec3 {
    (vb - va).cross(vc - vb).normalize_or_zero()
}

/// Sutherland–Hodgman step: keeps the part of `input` with `n·p + c < 0`.
pub fn clip_face_against_plane(input: &[Vec3], output: &mut Vec<Vec3>, normal: Vec3, constant: f32) {
    let Some(&last) = input.last() else {
        return;
    };
    let mut first = last;
    let mut d_first = normal.dot(first) + constant;
    for &current in input {
        let d_current = normal.dot(current) + constant;
        if d_first < 0.0 {
            if d_current < 0.0 {
                output.push(current);
            } else {
                output.push(first.lerp(current, d_first / (d_first - d_current)));
            }
        } else if d_current < 0.0 {
            output.push(first.lerp(current, d_first / (d_first - d_current)));
            output.push(current);
        }
        first = current;
        d_first = d_current;
    }
}

/// Eight-vertex hull of a box with the given half extents.
pub(crate) fn cuboid(half_extents: Vec3) -> ConvexPolyhedron {
    let (x, y, z) = (half_extents.x, half_extents.y, half_extents.z);
    let vertices = vec![
        Vec3::new(-x, -y, -z),
        Vec3::new(x, -y, -z),
        Vec3::new(x, y, -z),
        Vec3::new(-x, y, -z),
        Vec3::new(-x, -y, z),
        Vec3::new(x, -y, z),
        Vec3::new(x, y, z),
        Vec3::new(-x, y, z),
    ];
    let faces = vec![
        vec![3, 2, 1, 0],
        vec![4, 5, 6, 7],
        vec![5, 4, 0, 1],
        vec![2, 3, 7, 6],
        vec![0, 4, 7, 3],
        vec![1, 2, 6, 5],
    ];
    let face_normals = faces
        .iter()
        .map(|f: &Vec<usize>| face_normal(vertices[f[0]], vertices[f[1]], vertices[f[2]]))
        .collect();
    let bounding_sphere_radius = half_extents.length();
    ConvexPolyhedron {
        vertices,
        faces,
        face_normals,
        unique_edges: vec![Vec3::X, Vec3::Y, Vec3::Z],
        unique_axes: Some(vec![Vec3::Z, Vec3::Y, Vec3::X]),
        bounding_sphere_radius,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> ConvexPolyhedron {
        cuboid(Vec3::splat(0.5))
    }

    #[test]
    fn test_missing_vertex_is_rejected() {
        let err = ConvexPolyhedron::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![vec![0, 1, 3]])
            .unwrap_err();
        assert!(matches!(
            err,
            PhysicsError::MissingVertex { face: 0, vertex: 3, .. }
        ));
    }

    #[test]
    fn test_degenerate_face_is_rejected() {
        let err = ConvexPolyhedron::new(vec![Vec3::ZERO, Vec3::X], vec![vec![0, 1]]).unwrap_err();
        assert!(matches!(err, PhysicsError::DegenerateFace { .. }));
    }

    #[test]
    fn test_box_normals_point_outward() {
        let hull = unit_box();
        for (face, n) in hull.faces().iter().zip(hull.face_normals()) {
            assert!(n.dot(hull.vertices()[face[0]]) > 0.0);
            assert!((n.length() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_generic_hull_matches_box() {
        let b = unit_box();
        let generic = ConvexPolyhedron::new(b.vertices().to_vec(), b.faces().to_vec()).unwrap();
        assert_eq!(generic.unique_edges().len(), 3);
        assert_eq!(generic.face_normals(), b.face_normals());
        assert!((generic.volume() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_tetrahedron_volume() {
        let hull = ConvexPolyhedron::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z],
            vec![vec![0, 2, 1], vec![0, 1, 3], vec![0, 3, 2], vec![1, 2, 3]],
        )
        .unwrap();
        assert!((hull.volume() - 1.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_point_is_inside() {
        let hull = unit_box();
        let pos = Vec3::new(10.0, 0.0, 0.0);
        assert!(hull.point_is_inside(Vec3::new(10.2, 0.1, -0.3), pos, Quat::IDENTITY));
        assert!(!hull.point_is_inside(Vec3::new(10.6, 0.0, 0.0), pos, Quat::IDENTITY));
        assert!(!hull.point_is_inside(Vec3::ZERO, pos, Quat::IDENTITY));
    }

    #[test]
    fn test_separated_boxes() {
        let hull = unit_box();
        let sep = hull.find_separating_axis(
            &hull,
            Vec3::ZERO,
            Quat::IDENTITY,
            Vec3::new(1.5, 0.0, 0.0),
            Quat::from_rotation_y(0.3),
        );
        assert!(sep.is_none());
    }

    #[test]
    fn test_overlapping_boxes() {
        let hull = unit_box();
        let (axis, depth) = hull
            .find_separating_axis(
                &hull,
                Vec3::ZERO,
                Quat::IDENTITY,
                Vec3::new(0.0, 0.9, 0.0),
                Quat::IDENTITY,
            )
            .unwrap();
        assert!(depth >= 0.0);
        assert!((depth - 0.1).abs() < 1e-5);
        // Points from B towards A.
        assert!(axis.dot(Vec3::NEG_Y) > 0.99);
    }

    #[test]
    fn test_clip_stacked_boxes_gives_four_points() {
        let hull = unit_box();
        let pos_b = Vec3::new(0.0, 0.9, 0.0);
        let (axis, _) = hull
            .find_separating_axis(&hull, Vec3::ZERO, Quat::IDENTITY, pos_b, Quat::IDENTITY)
            .unwrap();
        let mut points = Vec::new();
        hull.clip_against_hull(
            Vec3::ZERO,
            Quat::IDENTITY,
            &hull,
            pos_b,
            Quat::IDENTITY,
            axis,
            -100.0,
            100.0,
            &mut points,
        );
        assert_eq!(points.len(), 4);
        for p in &points {
            assert!((p.depth + 0.1).abs() < 1e-5);
        }
    }

    #[test]
    fn test_clip_face_against_plane_halves_square() {
        let square = [
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
        ];
        let mut out = Vec::new();
        clip_face_against_plane(&square, &mut out, Vec3::X, 0.0);
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|p| p.x <= 1e-6));
    }
}
