//! Triangle-mesh shape with a BVH over its triangles.

use glam::{Quat, Vec3};

use super::convex::{ConvexPolyhedron, face_normal};
use crate::aabb::Aabb;
use crate::bvh::Bvh;
use crate::error::{PhysicsError, Result};

/// An arbitrary triangle mesh. Collides with spheres, planes and convex shapes.
#[derive(Debug, Clone)]
pub struct Trimesh {
    source: Vec<Vec3>,
    indices: Vec<u32>,
    scale: Vec3,
    vertices: Vec<Vec3>,
    normals: Vec<Vec3>,
    edges: Vec<(u32, u32)>,
    aabb: Aabb,
    tree: Bvh,
    bounding_sphere_radius: f32,
}

impl Trimesh {
    /// Creates a mesh from vertices and counter-clockwise triangle indices.
    pub fn new(vertices: Vec<Vec3>, indices: Vec<u32>) -> Result<Self> {
        if indices.len() % 3 != 0 {
            return Err(PhysicsError::InvalidDimension {
                name: "index count",
                value: indices.len() as f32,
            });
        }
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(PhysicsError::TrimeshIndexOutOfRange {
                index,
                vertex_count: vertices.len(),
            });
        }
        let mut mesh = Self {
            vertices: vertices.clone(),
            source: vertices,
            indices,
            scale: Vec3::ONE,
            normals: Vec::new(),
            edges: Vec::new(),
            aabb: Aabb::default(),
            tree: Bvh::default(),
            bounding_sphere_radius: 0.0,
        };
        mesh.update_edges();
        mesh.update_tree();
        Ok(mesh)
    }

    /// Applies a per-axis scale to the source vertices and rebuilds derived data.
    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.vertices = self.source.iter().map(|&v| v * scale).collect();
        self.update_tree();
    }

    /// Current scale.
    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    fn update_edges(&mut self) {
        let mut edges: Vec<(u32, u32)> = self
            .indices
            .chunks_exact(3)
            .flat_map(|t| [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])])
            .map(|(a, b)| if a < b { (a, b) } else { (b, a) })
            .collect();
        edges.sort_unstable();
        edges.dedup();
        self.edges = edges;
    }

    fn update_tree(&mut self) {
        self.normals = (0..self.triangle_count())
            .map(|t| {
                let [a, b, c] = self.triangle(t);
                face_normal(a, b, c)
            })
            .collect();
        self.aabb = Aabb::from_points(self.vertices.iter().copied());
        self.bounding_sphere_radius = self
            .vertices
            .iter()
            .map(|v| v.length_squared())
            .fold(0.0f32, f32::max)
            .sqrt();
        let primitives = (0..self.triangle_count())
            .map(|t| (Aabb::from_points(self.triangle(t)), t as u32))
            .collect();
        self.tree = Bvh::build(primitives);
    }

    /// Scaled vertices.
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    /// Triangle indices, three per triangle.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Unique undirected edges as vertex-index pairs.
    pub fn edges(&self) -> &[(u32, u32)] {
        &self.edges
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Scaled corners of triangle `t`.
    pub fn triangle(&self, t: usize) -> [Vec3; 3] {
        let i = &self.indices[t * 3..t * 3 + 3];
        [
            self.vertices[i[0] as usize],
            self.vertices[i[1] as usize],
            self.vertices[i[2] as usize],
        ]
    }

    /// Vertex indices of triangle `t`.
    pub fn triangle_indices(&self, t: usize) -> [u32; 3] {
        let i = &self.indices[t * 3..t * 3 + 3];
        [i[0], i[1], i[2]]
    }

    /// Unit normal of triangle `t`.
    pub fn normal(&self, t: usize) -> Vec3 {
        self.normals[t]
    }

    /// Appends triangles whose bounds overlap `aabb` (local space).
    pub fn triangles_in_aabb(&self, aabb: &Aabb, out: &mut Vec<u32>) {
        self.tree.query_aabb(aabb, out);
    }

    /// Appends triangles whose bounds the local segment touches.
    pub fn triangles_on_segment(&self, from: Vec3, to: Vec3, out: &mut Vec<u32>) {
        self.tree.query_segment(from, to, out);
    }

    pub fn local_aabb(&self) -> Aabb {
        self.aabb
    }

    pub fn world_aabb(&self, position: Vec3, orientation: Quat) -> Aabb {
        self.aabb.transformed(position, orientation)
    }

    pub fn bounding_sphere_radius(&self) -> f32 {
        self.bounding_sphere_radius
    }

    /// Inertia of the local bounding box with the given mass.
    pub fn local_inertia(&self, mass: f32) -> Vec3 {
        let e = self.aabb.size();
        let (x2, y2, z2) = (e.x * e.x, e.y * e.y, e.z * e.z);
        Vec3::new(y2 + z2, x2 + z2, x2 + y2) * (mass / 12.0)
    }

    /// Enclosed volume; meaningful only for closed meshes.
    pub fn volume(&self) -> f32 {
        let six: f32 = (0..self.triangle_count())
            .map(|t| {
                let [a, b, c] = self.triangle(t);
                a.dot(b.cross(c))
            })
            .sum();
        (six / 6.0).abs()
    }

    /// A thin double-sided hull around triangle `t`, with its origin at the centroid.
    pub(crate) fn triangle_hull(&self, t: usize) -> Result<(ConvexPolyhedron, Vec3)> {
        let [a, b, c] = self.triangle(t);
        let centroid = (a + b + c) / 3.0;
        let hull = ConvexPolyhedron::build(
            vec![a - centroid, b - centroid, c - centroid],
            vec![vec![0, 1, 2], vec![2, 1, 0]],
            None,
            false,
        )?;
        Ok((hull, centroid))
    }
}

/// Barycentric point-in-triangle test for a point on the triangle's plane.
pub fn point_in_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> bool {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;
    let dot00 = v0.dot(v0);
    let dot01 = v0.dot(v1);
    let dot02 = v0.dot(v2);
    let dot11 = v1.dot(v1);
    let dot12 = v1.dot(v2);
    let denom = dot00 * dot11 - dot01 * dot01;
    if denom == 0.0 {
        return false;
    }
    let u = dot11 * dot02 - dot01 * dot12;
    let v = dot00 * dot12 - dot01 * dot02;
    // u, v scaled by denom
    u >= 0.0 && v >= 0.0 && u + v < denom
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unit-ish tetrahedron.
    fn tetra() -> Trimesh {
        Trimesh::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z],
            vec![0, 2, 1, 0, 1, 3, 0, 3, 2, 1, 2, 3],
        )
        .unwrap()
    }

    #[test]
    fn test_index_validation() {
        let err = Trimesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![0, 1, 3]).unwrap_err();
        assert!(matches!(err, PhysicsError::TrimeshIndexOutOfRange { index: 3, .. }));
        assert!(Trimesh::new(vec![Vec3::ZERO], vec![0, 0]).is_err());
    }

    #[test]
    fn test_edges_and_volume() {
        let mesh = tetra();
        assert_eq!(mesh.edges().len(), 6);
        assert!((mesh.volume() - 1.0 / 6.0).abs() < 1e-6);
        assert!((mesh.normal(3) - Vec3::ONE.normalize()).length() < 1e-6);
    }

    #[test]
    fn test_scale_rebuilds() {
        let mut mesh = tetra();
        mesh.set_scale(Vec3::splat(2.0));
        assert!((mesh.volume() - 8.0 / 6.0).abs() < 1e-5);
        assert_eq!(mesh.local_aabb().max, Vec3::splat(2.0));
    }

    #[test]
    fn test_triangles_in_aabb() {
        let mesh = tetra();
        let mut out = Vec::new();
        mesh.triangles_in_aabb(&Aabb::new(Vec3::new(0.4, 0.4, -0.1), Vec3::new(0.5, 0.5, 0.05)), &mut out);
        out.sort();
        // Bottom face and the slanted face both reach this box.
        assert_eq!(out, vec![0, 3]);
    }

    #[test]
    fn test_point_in_triangle() {
        let (a, b, c) = (Vec3::ZERO, Vec3::X, Vec3::Y);
        assert!(point_in_triangle(Vec3::new(0.2, 0.2, 0.0), a, b, c));
        assert!(!point_in_triangle(Vec3::new(0.8, 0.8, 0.0), a, b, c));
    }
}
