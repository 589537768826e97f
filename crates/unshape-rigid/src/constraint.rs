//! Joints between pairs of bodies, each expanded into solver equations.

use glam::{Quat, Vec3};

use crate::body::{Body, BodyId};
use crate::equation::{Equation, EquationKind};
use crate::math::Vec3Ext;

/// Default bound on constraint impulses.
pub const DEFAULT_MAX_FORCE: f32 = 1e6;

/// Geometry of a constraint. Pivots and axes are in each body's local frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintKind {
    /// Ball joint: the two pivots coincide.
    PointToPoint { pivot_a: Vec3, pivot_b: Vec3 },
    /// Keeps the centres of mass a fixed distance apart.
    Distance { distance: f32 },
    /// Removes all relative motion.
    Lock {
        pivot_a: Vec3,
        pivot_b: Vec3,
        /// World X, Y and Z in each body's frame at creation.
        axes_a: [Vec3; 3],
        axes_b: [Vec3; 3],
    },
    /// Rotation about a single shared axis, optionally motorized.
    Hinge {
        pivot_a: Vec3,
        pivot_b: Vec3,
        axis_a: Vec3,
        axis_b: Vec3,
    },
    /// Ball joint limited to a cone, with a twist limit.
    ConeTwist {
        pivot_a: Vec3,
        pivot_b: Vec3,
        axis_a: Vec3,
        axis_b: Vec3,
        /// Cone half-angle.
        angle: f32,
        /// Twist limit about the axis.
        twist_angle: f32,
    },
}

/// A constraint between two bodies.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub body_a: BodyId,
    pub body_b: BodyId,
    /// Whether the two bodies still collide with each other.
    pub collide_connected: bool,
    pub kind: ConstraintKind,
    equations: Vec<Equation>,
}

/// Equation indices inside a hinge.
const HINGE_MOTOR: usize = 5;

fn point_equations(max_force: f32) -> Vec<Equation> {
    [Vec3::X, Vec3::Y, Vec3::Z]
        .into_iter()
        .map(|ni| {
            let mut eq = Equation::contact(0, 0, max_force);
            eq.min_force = -max_force;
            eq.kind = EquationKind::Contact {
                ri: Vec3::ZERO,
                rj: Vec3::ZERO,
                ni,
                restitution: 0.0,
            };
            eq
        })
        .collect()
}

impl Constraint {
    fn with_equations(a: &Body, b: &Body, kind: ConstraintKind, equations: Vec<Equation>) -> Self {
        Self {
            body_a: a.id,
            body_b: b.id,
            collide_connected: true,
            kind,
            equations,
        }
    }

    /// Connects `pivot_a` on `a` to `pivot_b` on `b`.
    pub fn point_to_point(a: &Body, pivot_a: Vec3, b: &Body, pivot_b: Vec3, max_force: f32) -> Self {
        Self::with_equations(
            a,
            b,
            ConstraintKind::PointToPoint { pivot_a, pivot_b },
            point_equations(max_force),
        )
    }

    /// Keeps `a` and `b` at `distance`, or their current separation if `None`.
    pub fn distance(a: &Body, b: &Body, distance: Option<f32>, max_force: f32) -> Self {
        let distance = distance.unwrap_or_else(|| a.position.distance(b.position));
        let mut eq = Equation::contact(0, 0, max_force);
        eq.min_force = -max_force;
        Self::with_equations(a, b, ConstraintKind::Distance { distance }, vec![eq])
    }

    /// Locks the current relative pose of `a` and `b`.
    pub fn lock(a: &Body, b: &Body, max_force: f32) -> Self {
        let half_way = (a.position + b.position) * 0.5;
        let axes = |body: &Body| {
            [Vec3::X, Vec3::Y, Vec3::Z].map(|axis| body.vector_to_local_frame(axis))
        };
        let mut equations = point_equations(max_force);
        equations.extend((0..3).map(|_| Equation::rotational(0, 0, max_force)));
        Self::with_equations(
            a,
            b,
            ConstraintKind::Lock {
                pivot_a: a.point_to_local_frame(half_way),
                pivot_b: b.point_to_local_frame(half_way),
                axes_a: axes(a),
                axes_b: axes(b),
            },
            equations,
        )
    }

    /// Hinge about `axis_a` on `a` / `axis_b` on `b`. The motor starts disabled.
    #[allow(clippy::too_many_arguments)]
    pub fn hinge(
        a: &Body,
        pivot_a: Vec3,
        axis_a: Vec3,
        b: &Body,
        pivot_b: Vec3,
        axis_b: Vec3,
        max_force: f32,
    ) -> Self {
        let mut equations = point_equations(max_force);
        equations.push(Equation::rotational(0, 0, max_force));
        equations.push(Equation::rotational(0, 0, max_force));
        let mut motor = Equation::rotational_motor(0, 0, max_force);
        motor.enabled = false;
        equations.push(motor);
        Self::with_equations(
            a,
            b,
            ConstraintKind::Hinge {
                pivot_a,
                pivot_b,
                axis_a: axis_a.normalize_or_zero(),
                axis_b: axis_b.normalize_or_zero(),
            },
            equations,
        )
    }

    /// Cone-twist joint.
    #[allow(clippy::too_many_arguments)]
    pub fn cone_twist(
        a: &Body,
        pivot_a: Vec3,
        axis_a: Vec3,
        b: &Body,
        pivot_b: Vec3,
        axis_b: Vec3,
        angle: f32,
        twist_angle: f32,
        max_force: f32,
    ) -> Self {
        let mut equations = point_equations(max_force);
        equations.push(Equation::cone(0, 0, max_force, angle));
        equations.push(Equation::rotational(0, 0, max_force));
        Self::with_equations(
            a,
            b,
            ConstraintKind::ConeTwist {
                pivot_a,
                pivot_b,
                axis_a: axis_a.normalize_or_zero(),
                axis_b: axis_b.normalize_or_zero(),
                angle,
                twist_angle,
            },
            equations,
        )
    }

    /// Sets whether the connected bodies collide.
    pub fn with_collide_connected(mut self, collide: bool) -> Self {
        self.collide_connected = collide;
        self
    }

    /// The constraint's equations as of the last update.
    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    pub fn equations_mut(&mut self) -> &mut [Equation] {
        &mut self.equations
    }

    /// Enables every equation (the hinge motor keeps its own state).
    pub fn enable(&mut self) {
        self.set_enabled(true);
    }

    /// Disables every equation.
    pub fn disable(&mut self) {
        self.set_enabled(false);
    }

    fn set_enabled(&mut self, enabled: bool) {
        let motor = self.motor_index();
        for (i, eq) in self.equations.iter_mut().enumerate() {
            if Some(i) != motor {
                eq.enabled = enabled;
            }
        }
    }

    fn motor_index(&self) -> Option<usize> {
        matches!(self.kind, ConstraintKind::Hinge { .. }).then_some(HINGE_MOTOR)
    }

    fn motor(&mut self) -> Option<&mut Equation> {
        let i = self.motor_index()?;
        self.equations.get_mut(i)
    }

    /// Turns the hinge motor on. No effect on other kinds.
    pub fn enable_motor(&mut self) {
        if let Some(m) = self.motor() {
            m.enabled = true;
        }
    }

    pub fn disable_motor(&mut self) {
        if let Some(m) = self.motor() {
            m.enabled = false;
        }
    }

    /// Target relative angular speed of the hinge motor.
    pub fn set_motor_speed(&mut self, speed: f32) {
        if let Some(EquationKind::RotationalMotor { target_velocity, .. }) =
            self.motor().map(|m| &mut m.kind)
        {
            *target_velocity = speed;
        }
    }

    /// Torque limit of the hinge motor.
    pub fn set_motor_max_force(&mut self, max_force: f32) {
        if let Some(m) = self.motor() {
            m.min_force = -max_force;
            m.max_force = max_force;
        }
    }

    /// Re-derives equation data from the bodies at indices `ia` and `ib`.
    pub fn update(&mut self, bodies: &[Body], ia: usize, ib: usize) {
        for eq in &mut self.equations {
            eq.body_a = ia;
            eq.body_b = ib;
        }
        let a = &bodies[ia];
        let b = &bodies[ib];

        match self.kind.clone() {
            ConstraintKind::PointToPoint { pivot_a, pivot_b } => {
                self.update_pivots(a.orientation * pivot_a, b.orientation * pivot_b);
            }
            ConstraintKind::Distance { distance } => {
                let normal = (b.position - a.position).normalize_or_zero();
                let half = distance * 0.5;
                set_contact(&mut self.equations[0], normal * half, -normal * half, normal);
            }
            ConstraintKind::Lock {
                pivot_a,
                pivot_b,
                axes_a,
                axes_b,
            } => {
                self.update_pivots(a.orientation * pivot_a, b.orientation * pivot_b);
                // X⊥Y, Y⊥Z, Z⊥X across the two bodies.
                let pairs = [(axes_a[0], axes_b[1]), (axes_a[1], axes_b[2]), (axes_a[2], axes_b[0])];
                for (eq, (la, lb)) in self.equations[3..6].iter_mut().zip(pairs) {
                    set_axes(eq, a.orientation * la, b.orientation * lb);
                }
            }
            ConstraintKind::Hinge {
                pivot_a,
                pivot_b,
                axis_a,
                axis_b,
            } => {
                self.update_pivots(a.orientation * pivot_a, b.orientation * pivot_b);
                let world_a = a.orientation * axis_a;
                let world_b = b.orientation * axis_b;
                let (t1, t2) = world_a.tangents();
                set_axes(&mut self.equations[3], t1, world_b);
                set_axes(&mut self.equations[4], t2, world_b);
                if let EquationKind::RotationalMotor {
                    axis_a: ma,
                    axis_b: mb,
                    ..
                } = &mut self.equations[HINGE_MOTOR].kind
                {
                    *ma = world_a;
                    *mb = world_b;
                }
            }
            ConstraintKind::ConeTwist {
                pivot_a,
                pivot_b,
                axis_a,
                axis_b,
                angle,
                twist_angle,
            } => {
                self.update_pivots(a.orientation * pivot_a, b.orientation * pivot_b);
                if let EquationKind::Cone {
                    axis_a: ca,
                    axis_b: cb,
                    angle: cone_angle,
                } = &mut self.equations[3].kind
                {
                    *ca = a.orientation * axis_a;
                    *cb = b.orientation * axis_b;
                    *cone_angle = angle;
                }
                let twist_a = a.orientation * axis_a.tangents().0;
                let twist_b = b.orientation * axis_b.tangents().0;
                if let EquationKind::Rotational {
                    axis_a: ta,
                    axis_b: tb,
                    max_angle,
                } = &mut self.equations[4].kind
                {
                    *ta = twist_a;
                    *tb = twist_b;
                    *max_angle = twist_angle;
                }
            }
        }
    }

    fn update_pivots(&mut self, ri: Vec3, rj: Vec3) {
        for eq in &mut self.equations[0..3] {
            if let EquationKind::Contact { ni, .. } = eq.kind {
                set_contact(eq, ri, rj, ni);
            }
        }
    }
}

fn set_contact(eq: &mut Equation, ri: Vec3, rj: Vec3, ni: Vec3) {
    eq.kind = EquationKind::Contact {
        ri,
        rj,
        ni,
        restitution: 0.0,
    };
}

fn set_axes(eq: &mut Equation, axis_a: Vec3, axis_b: Vec3) {
    if let EquationKind::Rotational {
        axis_a: a,
        axis_b: b,
        ..
    } = &mut eq.kind
    {
        *a = axis_a;
        *b = axis_b;
    }
}

/// Relative rotation of `b` with respect to `a`.
pub fn relative_orientation(a: &Body, b: &Body) -> Quat {
    a.orientation.conjugate() * b.orientation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    fn ball_at(p: Vec3) -> Body {
        Body::new(1.0)
            .with_shape(Shape::sphere(0.5).unwrap())
            .with_position(p)
    }

    #[test]
    fn test_point_to_point_violation() {
        let bodies = vec![ball_at(Vec3::ZERO), ball_at(Vec3::new(2.0, 0.0, 0.0))];
        let mut c = Constraint::point_to_point(&bodies[0], Vec3::X, &bodies[1], -Vec3::X * 0.5, 1e6);
        c.update(&bodies, 0, 1);
        let mut eq = c.equations()[0].clone();
        // Pivots at x = 1 and x = 1.5: B must come closer along X.
        let b = eq.compute_b(1.0 / 60.0, &bodies);
        assert!(b < 0.0);
        assert_eq!(eq.min_force, -1e6);
    }

    #[test]
    fn test_distance_defaults_to_current() {
        let bodies = vec![ball_at(Vec3::ZERO), ball_at(Vec3::new(0.0, 3.0, 4.0))];
        let mut c = Constraint::distance(&bodies[0], &bodies[1], None, DEFAULT_MAX_FORCE);
        assert_eq!(c.kind, ConstraintKind::Distance { distance: 5.0 });
        c.update(&bodies, 0, 1);
        let mut eq = c.equations()[0].clone();
        assert!(eq.compute_b(1.0 / 60.0, &bodies).abs() < 1e-4);
    }

    #[test]
    fn test_lock_is_satisfied_at_creation() {
        let bodies = vec![
            ball_at(Vec3::ZERO),
            ball_at(Vec3::new(1.0, 0.0, 0.0)).with_orientation(Quat::from_rotation_y(0.4)),
        ];
        let mut c = Constraint::lock(&bodies[0], &bodies[1], DEFAULT_MAX_FORCE);
        c.update(&bodies, 0, 1);
        assert_eq!(c.equations().len(), 6);
        for eq in c.equations() {
            let mut eq = eq.clone();
            assert!(eq.compute_b(1.0 / 60.0, &bodies).abs() < 1e-2);
        }
    }

    #[test]
    fn test_hinge_motor_toggle() {
        let bodies = vec![ball_at(Vec3::ZERO), ball_at(Vec3::X)];
        let mut c = Constraint::hinge(
            &bodies[0],
            Vec3::X * 0.5,
            Vec3::Z,
            &bodies[1],
            -Vec3::X * 0.5,
            Vec3::Z,
            DEFAULT_MAX_FORCE,
        );
        assert!(!c.equations()[HINGE_MOTOR].enabled);
        c.enable_motor();
        c.set_motor_speed(2.0);
        c.set_motor_max_force(10.0);
        c.update(&bodies, 0, 1);
        let motor = &c.equations()[HINGE_MOTOR];
        assert!(motor.enabled);
        assert_eq!(motor.max_force, 10.0);
        assert!(matches!(
            motor.kind,
            EquationKind::RotationalMotor { target_velocity, axis_a, .. }
                if target_velocity == 2.0 && axis_a == Vec3::Z
        ));

        c.disable();
        assert!(c.equations()[..HINGE_MOTOR].iter().all(|e| !e.enabled));
        assert!(c.equations()[HINGE_MOTOR].enabled);
    }

    #[test]
    fn test_cone_twist_layout() {
        let bodies = vec![ball_at(Vec3::ZERO), ball_at(Vec3::Y)];
        let mut c = Constraint::cone_twist(
            &bodies[0],
            Vec3::Y * 0.5,
            Vec3::Y,
            &bodies[1],
            -Vec3::Y * 0.5,
            Vec3::Y,
            0.3,
            0.1,
            DEFAULT_MAX_FORCE,
        );
        c.update(&bodies, 0, 1);
        assert_eq!(c.equations().len(), 5);
        assert_eq!(c.equations()[3].max_force, 0.0);
        assert!(relative_orientation(&bodies[0], &bodies[1]).is_near_identity());
    }
}
