//! Error types for rigid body construction and numeric failures.

use glam::{Mat3, Vec3};
use thiserror::Error;

/// Errors raised while building shapes or solving small linear systems.
#[derive(Debug, Error)]
pub enum PhysicsError {
    /// A 3×3 system had no unique solution.
    #[error("singular matrix {matrix:?} (rhs {rhs:?})")]
    SingularMatrix {
        /// The matrix that could not be eliminated.
        matrix: Mat3,
        /// Right-hand side of the system, if solving rather than inverting.
        rhs: Option<Vec3>,
    },

    /// A polyhedron face references a vertex that does not exist.
    #[error("face {face} references vertex {vertex}, but only {vertex_count} vertices exist")]
    MissingVertex {
        /// Index of the offending face.
        face: usize,
        /// The out-of-range vertex index.
        vertex: usize,
        /// Number of vertices in the polyhedron.
        vertex_count: usize,
    },

    /// A polyhedron face has fewer than three vertices.
    #[error("face {face} has {len} vertices, at least 3 required")]
    DegenerateFace {
        /// Index of the offending face.
        face: usize,
        /// Number of vertices in the face.
        len: usize,
    },

    /// A sphere (or cylinder) was given a negative radius.
    #[error("radius must be non-negative, got {0}")]
    NegativeRadius(f32),

    /// A dimension that must be strictly positive was not.
    #[error("{name} must be positive, got {value}")]
    InvalidDimension {
        /// Which dimension was rejected.
        name: &'static str,
        /// The rejected value.
        value: f32,
    },

    /// Heightfield data is too small or ragged.
    #[error("invalid heightfield: {0}")]
    InvalidHeightfield(String),

    /// A trimesh index points past the end of the vertex array.
    #[error("trimesh index {index} out of range for {vertex_count} vertices")]
    TrimeshIndexOutOfRange {
        /// The out-of-range index.
        index: u32,
        /// Number of vertices in the mesh.
        vertex_count: usize,
    },
}

/// Result type for rigid body operations.
pub type Result<T> = std::result::Result<T, PhysicsError>;
