//! Rigid body simulation for unshape.
//!
//! A complete pipeline for simulating rigid bodies made of convex and
//! non-convex shapes:
//! - [`Body`] - mass, pose, velocity and attached [`Shape`]s
//! - [`Broadphase`] - candidate pairs ([`NaiveBroadphase`], [`SapBroadphase`])
//! - [`Narrowphase`] - contact and friction equations per shape pair
//! - [`Solver`] - SPOOK Gauss–Seidel ([`GsSolver`], [`SplitSolver`])
//! - [`Constraint`], [`Spring`] - joints and force elements
//! - [`World`] - stepping, sleeping, events and ray casts
//!
//! ```
//! use glam::Vec3;
//! use unshape_rigid::{Body, Shape, World, WorldConfig};
//!
//! let mut world = World::new(WorldConfig::default().with_gravity(Vec3::new(0.0, 0.0, -9.82)));
//! world.add_body(Body::new_static().with_shape(Shape::plane()));
//! let ball = world.add_body(
//!     Body::new(1.0)
//!         .with_shape(Shape::sphere(0.5).unwrap())
//!         .with_position(Vec3::new(0.0, 0.0, 2.0)),
//! );
//! for _ in 0..120 {
//!     world.step(1.0 / 60.0);
//! }
//! assert!(world.body(ball).unwrap().position.z < 2.0);
//! ```

pub mod aabb;
pub mod body;
pub mod broadphase;
pub mod bvh;
pub mod collision_matrix;
pub mod constraint;
pub mod equation;
pub mod error;
pub mod events;
pub mod material;
pub mod math;
pub mod narrowphase;
pub mod raycast;
pub mod shape;
pub mod solver;
pub mod spring;
pub mod world;

pub use aabb::Aabb;
pub use body::{Body, BodyId, BodyType, ShapeAttachment, SleepState, SleepTransition};
pub use broadphase::{Broadphase, NaiveBroadphase, SapBroadphase};
pub use bvh::Bvh;
pub use collision_matrix::{ArrayCollisionMatrix, OverlapKeeper};
pub use constraint::{Constraint, ConstraintKind};
pub use equation::{Equation, EquationKind, JacobianElement};
pub use error::{PhysicsError, Result};
pub use events::WorldEvent;
pub use material::{ContactMaterial, ContactMaterialTable, Material, MaterialId};
pub use math::{QuatExt, Vec3Ext};
pub use narrowphase::{Narrowphase, NarrowphaseContext, ShapeOverlap};
pub use raycast::{Ray, RaycastMode, RaycastOptions, RaycastResult};
pub use shape::{
    BoxShape, ConvexPolyhedron, Cylinder, Heightfield, Shape, ShapeGeometry, ShapeId, ShapeKind,
    Trimesh,
};
pub use solver::{GsSolver, Solver, SplitSolver};
pub use spring::{Spring, Subsystem};
pub use world::{ConstraintId, SpringId, World, WorldConfig};
