//! Damped springs and user force subsystems run before collision detection.

use glam::Vec3;

use crate::body::{Body, BodyId};

/// A Hooke spring between anchor points on two bodies.
#[derive(Debug, Clone, PartialEq)]
pub struct Spring {
    pub body_a: BodyId,
    pub body_b: BodyId,
    /// Length at which the spring exerts no force.
    pub rest_length: f32,
    pub stiffness: f32,
    pub damping: f32,
    /// Anchor on A in A's frame.
    pub local_anchor_a: Vec3,
    /// Anchor on B in B's frame.
    pub local_anchor_b: Vec3,
}

impl Spring {
    /// A spring between the centres of `a` and `b` with rest length 1.
    pub fn new(a: &Body, b: &Body) -> Self {
        Self {
            body_a: a.id,
            body_b: b.id,
            rest_length: 1.0,
            stiffness: 100.0,
            damping: 1.0,
            local_anchor_a: Vec3::ZERO,
            local_anchor_b: Vec3::ZERO,
        }
    }

    pub fn with_rest_length(mut self, rest_length: f32) -> Self {
        self.rest_length = rest_length;
        self
    }

    pub fn with_stiffness(mut self, stiffness: f32) -> Self {
        self.stiffness = stiffness;
        self
    }

    pub fn with_damping(mut self, damping: f32) -> Self {
        self.damping = damping;
        self
    }

    /// Sets both anchors in body-local coordinates.
    pub fn with_local_anchors(mut self, anchor_a: Vec3, anchor_b: Vec3) -> Self {
        self.local_anchor_a = anchor_a;
        self.local_anchor_b = anchor_b;
        self
    }

    /// Sets both anchors from world points at the bodies' current poses.
    pub fn with_world_anchors(mut self, a: &Body, anchor_a: Vec3, b: &Body, anchor_b: Vec3) -> Self {
        self.local_anchor_a = a.point_to_local_frame(anchor_a);
        self.local_anchor_b = b.point_to_local_frame(anchor_b);
        self
    }

    pub fn world_anchor_a(&self, a: &Body) -> Vec3 {
        a.point_to_world_frame(self.local_anchor_a)
    }

    pub fn world_anchor_b(&self, b: &Body) -> Vec3 {
        b.point_to_world_frame(self.local_anchor_b)
    }

    /// Adds the spring force and torque to both bodies.
    pub fn apply_force(&self, a: &mut Body, b: &mut Body) {
        let anchor_a = self.world_anchor_a(a);
        let anchor_b = self.world_anchor_b(b);
        let ri = anchor_a - a.position;
        let rj = anchor_b - b.position;

        let r = anchor_b - anchor_a;
        let length = r.length();
        let Some(u) = r.try_normalize() else {
            return;
        };

        let relative_velocity =
            (b.velocity + b.angular_velocity.cross(rj)) - (a.velocity + a.angular_velocity.cross(ri));
        let f = -u * (self.stiffness * (length - self.rest_length) + self.damping * u.dot(relative_velocity));

        a.force -= f;
        b.force += f;
        a.torque -= ri.cross(f);
        b.torque += rj.cross(f);
    }
}

/// A force generator run at the start of every step, after gravity.
pub trait Subsystem {
    fn update(&mut self, bodies: &mut [Body], dt: f32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stretched_spring_pulls_together() {
        let mut a = Body::new(1.0);
        let mut b = Body::new(1.0).with_position(Vec3::new(3.0, 0.0, 0.0));
        let spring = Spring::new(&a, &b).with_rest_length(1.0).with_stiffness(10.0).with_damping(0.0);
        spring.apply_force(&mut a, &mut b);
        assert_eq!(a.force, Vec3::new(20.0, 0.0, 0.0));
        assert_eq!(b.force, Vec3::new(-20.0, 0.0, 0.0));
        assert_eq!(a.torque, Vec3::ZERO);
    }

    #[test]
    fn test_damping_opposes_separation() {
        let mut a = Body::new(1.0);
        let mut b = Body::new(1.0)
            .with_position(Vec3::new(1.0, 0.0, 0.0))
            .with_velocity(Vec3::new(2.0, 0.0, 0.0));
        let spring = Spring::new(&a, &b).with_damping(0.5);
        spring.apply_force(&mut a, &mut b);
        assert_eq!(b.force, Vec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn test_offset_anchor_produces_torque() {
        let mut a = Body::new(1.0);
        let mut b = Body::new(1.0).with_position(Vec3::new(0.0, 3.0, 0.0));
        let spring = Spring::new(&a, &b)
            .with_local_anchors(Vec3::X, Vec3::X)
            .with_rest_length(1.0);
        spring.apply_force(&mut a, &mut b);
        assert!(a.torque.length() > 0.0);
        assert!((a.torque + b.torque).length() < 1e-4);
    }

    #[test]
    fn test_coincident_anchors_apply_nothing() {
        let mut a = Body::new(1.0);
        let mut b = Body::new(1.0);
        Spring::new(&a, &b).apply_force(&mut a, &mut b);
        assert_eq!(a.force, Vec3::ZERO);
    }
}
