//! Events emitted by [`crate::World`] during a step.

use glam::Vec3;

use crate::body::BodyId;
use crate::shape::ShapeId;

/// Something that happened in the world. Read them with
/// [`crate::World::events`] after a step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorldEvent {
    /// Before integration, after the solver.
    PreStep,
    /// After integration and the time advance.
    PostStep,
    AddBody(BodyId),
    RemoveBody(BodyId),
    /// Two bodies started touching.
    BeginContact { body_a: BodyId, body_b: BodyId },
    /// Two bodies stopped touching.
    EndContact { body_a: BodyId, body_b: BodyId },
    BeginShapeContact {
        body_a: BodyId,
        body_b: BodyId,
        shape_a: ShapeId,
        shape_b: ShapeId,
    },
    EndShapeContact {
        body_a: BodyId,
        body_b: BodyId,
        shape_a: ShapeId,
        shape_b: ShapeId,
    },
    /// First contact of `body` with `other` since the previous step.
    Collide {
        body: BodyId,
        other: BodyId,
        /// Contact normal pointing away from `body`.
        normal: Vec3,
    },
    Wakeup(BodyId),
    Sleepy(BodyId),
    Sleep(BodyId),
}

impl WorldEvent {
    /// The body this event concerns, for per-body events.
    pub fn body(&self) -> Option<BodyId> {
        match *self {
            WorldEvent::AddBody(b)
            | WorldEvent::RemoveBody(b)
            | WorldEvent::Wakeup(b)
            | WorldEvent::Sleepy(b)
            | WorldEvent::Sleep(b) => Some(b),
            WorldEvent::Collide { body, .. } => Some(body),
            _ => None,
        }
    }
}
