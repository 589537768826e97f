//! Collision shapes.
//!
//! A [`Shape`] wraps one [`ShapeGeometry`] variant together with the
//! per-shape collision filter and optional material. Shapes are attached to
//! bodies with a local offset and orientation.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicU32, Ordering};

use glam::{Quat, Vec3};

use crate::aabb::Aabb;
use crate::error::{PhysicsError, Result};
use crate::material::Material;

mod convex;
mod cylinder;
mod heightfield;
mod trimesh;

pub use convex::{ClipPoint, ConvexPolyhedron, clip_face_against_plane};
pub use cylinder::Cylinder;
pub use heightfield::{Heightfield, Pillar};
pub use trimesh::{Trimesh, point_in_triangle};

static NEXT_SHAPE_ID: AtomicU32 = AtomicU32::new(0);

/// Identifier of a [`Shape`], unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(pub u32);

/// One-bit type tag per shape kind.
///
/// Tags of two shapes are OR-ed together to select a narrowphase routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum ShapeKind {
    Sphere = 1,
    Plane = 2,
    Box = 4,
    ConvexPolyhedron = 16,
    Heightfield = 32,
    Particle = 64,
    Cylinder = 128,
    Trimesh = 256,
}

impl ShapeKind {
    /// The tag as a bit.
    pub const fn bits(self) -> u16 {
        self as u16
    }
}

/// A box, kept alongside its eight-vertex hull.
#[derive(Debug, Clone)]
pub struct BoxShape {
    half_extents: Vec3,
    hull: ConvexPolyhedron,
}

impl BoxShape {
    /// Creates a box; every half extent must be positive.
    pub fn new(half_extents: Vec3) -> Result<Self> {
        for (name, value) in [
            ("half_extents.x", half_extents.x),
            ("half_extents.y", half_extents.y),
            ("half_extents.z", half_extents.z),
        ] {
            if value <= 0.0 {
                return Err(PhysicsError::InvalidDimension { name, value });
            }
        }
        Ok(Self {
            half_extents,
            hull: convex::cuboid(half_extents),
        })
    }

    pub fn half_extents(&self) -> Vec3 {
        self.half_extents
    }

    /// The hull used for SAT and raycasts.
    pub fn hull(&self) -> &ConvexPolyhedron {
        &self.hull
    }

    /// World directions of the `+X`, `+Y`, `+Z` faces scaled by the half extents.
    pub fn side_normals(&self, orientation: Quat) -> [Vec3; 3] {
        let e = self.half_extents;
        [
            orientation * Vec3::new(e.x, 0.0, 0.0),
            orientation * Vec3::new(0.0, e.y, 0.0),
            orientation * Vec3::new(0.0, 0.0, e.z),
        ]
    }
}

/// Geometry of a shape.
#[derive(Debug, Clone)]
pub enum ShapeGeometry {
    /// Sphere centred at the shape origin.
    Sphere {
        /// Radius; never negative.
        radius: f32,
    },
    /// Infinite plane through the origin with normal local `+Z`.
    Plane,
    /// Box centred at the origin.
    Box(BoxShape),
    /// General convex hull.
    ConvexPolyhedron(ConvexPolyhedron),
    /// Terrain grid.
    Heightfield(Heightfield),
    /// A single point.
    Particle,
    /// Cylinder along local Y.
    Cylinder(Cylinder),
    /// Triangle mesh.
    Trimesh(Trimesh),
}

/// A collision shape with filtering and material settings.
#[derive(Debug, Clone)]
pub struct Shape {
    /// Unique id.
    pub id: ShapeId,
    /// The geometry.
    pub geometry: ShapeGeometry,
    /// Group bits this shape belongs to.
    pub collision_filter_group: u32,
    /// Group bits this shape collides with.
    pub collision_filter_mask: u32,
    /// When false, contacts are detected and reported but produce no response.
    pub collision_response: bool,
    /// Overrides the body's material when set.
    pub material: Option<Material>,
    bounding_sphere_radius: f32,
}

impl Shape {
    /// Wraps a geometry with default filtering.
    pub fn new(geometry: ShapeGeometry) -> Self {
        let mut shape = Self {
            id: ShapeId(NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed)),
            geometry,
            collision_filter_group: 1,
            collision_filter_mask: u32::MAX,
            collision_response: true,
            material: None,
            bounding_sphere_radius: 0.0,
        };
        shape.update_bounding_sphere_radius();
        shape
    }

    /// A sphere; the radius must not be negative.
    pub fn sphere(radius: f32) -> Result<Self> {
        if radius < 0.0 {
            return Err(PhysicsError::NegativeRadius(radius));
        }
        Ok(Self::new(ShapeGeometry::Sphere { radius }))
    }

    /// A box with the given half extents.
    pub fn cuboid(half_extents: Vec3) -> Result<Self> {
        Ok(Self::new(ShapeGeometry::Box(BoxShape::new(half_extents)?)))
    }

    /// An infinite plane facing local `+Z`.
    pub fn plane() -> Self {
        Self::new(ShapeGeometry::Plane)
    }

    /// A point.
    pub fn particle() -> Self {
        Self::new(ShapeGeometry::Particle)
    }

    /// A convex hull from vertices and counter-clockwise faces.
    pub fn convex(vertices: Vec<Vec3>, faces: Vec<Vec<usize>>) -> Result<Self> {
        Ok(Self::new(ShapeGeometry::ConvexPolyhedron(
            ConvexPolyhedron::new(vertices, faces)?,
        )))
    }

    /// A cylinder along local Y.
    pub fn cylinder(radius_top: f32, radius_bottom: f32, height: f32, segments: usize) -> Result<Self> {
        Ok(Self::new(ShapeGeometry::Cylinder(Cylinder::new(
            radius_top,
            radius_bottom,
            height,
            segments,
        )?)))
    }

    /// A heightfield from `data[x][y]`.
    pub fn heightfield(data: Vec<Vec<f32>>, element_size: f32) -> Result<Self> {
        Ok(Self::new(ShapeGeometry::Heightfield(Heightfield::new(
            data,
            element_size,
        )?)))
    }

    /// A triangle mesh.
    pub fn trimesh(vertices: Vec<Vec3>, indices: Vec<u32>) -> Result<Self> {
        Ok(Self::new(ShapeGeometry::Trimesh(Trimesh::new(vertices, indices)?)))
    }

    /// Sets the collision filter.
    pub fn with_filter(mut self, group: u32, mask: u32) -> Self {
        self.collision_filter_group = group;
        self.collision_filter_mask = mask;
        self
    }

    /// Sets the material.
    pub fn with_material(mut self, material: Material) -> Self {
        self.material = Some(material);
        self
    }

    /// Disables or enables the collision response.
    pub fn with_collision_response(mut self, response: bool) -> Self {
        self.collision_response = response;
        self
    }

    /// The kind tag.
    pub fn kind(&self) -> ShapeKind {
        match &self.geometry {
            ShapeGeometry::Sphere { .. } => ShapeKind::Sphere,
            ShapeGeometry::Plane => ShapeKind::Plane,
            ShapeGeometry::Box(_) => ShapeKind::Box,
            ShapeGeometry::ConvexPolyhedron(_) => ShapeKind::ConvexPolyhedron,
            ShapeGeometry::Heightfield(_) => ShapeKind::Heightfield,
            ShapeGeometry::Particle => ShapeKind::Particle,
            ShapeGeometry::Cylinder(_) => ShapeKind::Cylinder,
            ShapeGeometry::Trimesh(_) => ShapeKind::Trimesh,
        }
    }

    /// The hull for kinds handled as convex polyhedra.
    pub fn hull(&self) -> Option<&ConvexPolyhedron> {
        match &self.geometry {
            ShapeGeometry::Box(b) => Some(b.hull()),
            ShapeGeometry::ConvexPolyhedron(c) => Some(c),
            ShapeGeometry::Cylinder(c) => Some(c.hull()),
            _ => None,
        }
    }

    /// Radius of the origin-centred sphere enclosing the shape.
    pub fn bounding_sphere_radius(&self) -> f32 {
        self.bounding_sphere_radius
    }

    /// Recomputes the bounding-sphere radius from the geometry.
    pub fn update_bounding_sphere_radius(&mut self) {
        self.bounding_sphere_radius = match &mut self.geometry {
            ShapeGeometry::Sphere { radius } => *radius,
            ShapeGeometry::Plane => f32::MAX,
            ShapeGeometry::Box(b) => b.half_extents.length(),
            ShapeGeometry::ConvexPolyhedron(c) => {
                c.update_bounding_sphere_radius();
                c.bounding_sphere_radius()
            }
            ShapeGeometry::Heightfield(h) => {
                h.update_bounding_sphere_radius();
                h.bounding_sphere_radius()
            }
            ShapeGeometry::Particle => 0.0,
            ShapeGeometry::Cylinder(c) => c.hull().bounding_sphere_radius(),
            ShapeGeometry::Trimesh(t) => t.bounding_sphere_radius(),
        };
    }

    /// Principal moments of inertia for a body of `mass` made of this shape.
    pub fn local_inertia(&self, mass: f32) -> Vec3 {
        match &self.geometry {
            ShapeGeometry::Sphere { radius } => Vec3::splat(2.0 * mass * radius * radius / 5.0),
            ShapeGeometry::Box(b) => {
                let e = b.half_extents * 2.0;
                let (x2, y2, z2) = (e.x * e.x, e.y * e.y, e.z * e.z);
                Vec3::new(y2 + z2, x2 + z2, x2 + y2) * (mass / 12.0)
            }
            ShapeGeometry::ConvexPolyhedron(c) => c.local_inertia(mass),
            ShapeGeometry::Cylinder(c) => c.hull().local_inertia(mass),
            ShapeGeometry::Trimesh(t) => t.local_inertia(mass),
            ShapeGeometry::Plane | ShapeGeometry::Heightfield(_) | ShapeGeometry::Particle => {
                Vec3::ZERO
            }
        }
    }

    /// Bounds of the shape placed at `(position, orientation)`.
    pub fn world_aabb(&self, position: Vec3, orientation: Quat) -> Aabb {
        match &self.geometry {
            ShapeGeometry::Sphere { radius } => {
                Aabb::from_center_half_extents(position, Vec3::splat(*radius))
            }
            ShapeGeometry::Plane => plane_aabb(position, orientation),
            ShapeGeometry::Box(b) => b.hull().world_aabb(position, orientation),
            ShapeGeometry::ConvexPolyhedron(c) => c.world_aabb(position, orientation),
            ShapeGeometry::Heightfield(h) => h.world_aabb(position, orientation),
            ShapeGeometry::Particle => Aabb::new(position, position),
            ShapeGeometry::Cylinder(c) => c.hull().world_aabb(position, orientation),
            ShapeGeometry::Trimesh(t) => t.world_aabb(position, orientation),
        }
    }

    /// Volume of the shape. Planes and heightfields are unbounded.
    pub fn volume(&self) -> f32 {
        match &self.geometry {
            ShapeGeometry::Sphere { radius } => 4.0 / 3.0 * PI * radius.powi(3),
            ShapeGeometry::Box(b) => {
                let e = b.half_extents;
                8.0 * e.x * e.y * e.z
            }
            ShapeGeometry::ConvexPolyhedron(c) => c.volume(),
            ShapeGeometry::Cylinder(c) => c.volume(),
            ShapeGeometry::Trimesh(t) => t.volume(),
            ShapeGeometry::Plane | ShapeGeometry::Heightfield(_) => f32::MAX,
            ShapeGeometry::Particle => 0.0,
        }
    }
}

/// Unbounded except along an axis-aligned normal, where it stops at the plane.
fn plane_aabb(position: Vec3, orientation: Quat) -> Aabb {
    let normal = orientation * Vec3::Z;
    let mut min = Vec3::splat(f32::MIN);
    let mut max = Vec3::splat(f32::MAX);
    for axis in 0..3 {
        if normal[axis] == 1.0 {
            max[axis] = position[axis];
        } else if normal[axis] == -1.0 {
            min[axis] = position[axis];
        }
    }
    Aabb::new(min, max)
}
