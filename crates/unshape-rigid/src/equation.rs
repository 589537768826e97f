//! Velocity-level constraint equations with SPOOK stabilization.
//!
//! Each equation constrains the relative motion of two bodies through a
//! Jacobian row `G = [GA.spatial GA.rotational GB.spatial GB.rotational]`.
//! Bodies are referenced by their index in the world's body list.

use glam::Vec3;

use crate::body::Body;
use crate::shape::ShapeId;

/// One body's half of a Jacobian row.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JacobianElement {
    /// Linear direction.
    pub spatial: Vec3,
    /// Angular direction.
    pub rotational: Vec3,
}

impl JacobianElement {
    /// `spatial·v + rotational·w`.
    pub fn multiply_vectors(&self, spatial: Vec3, rotational: Vec3) -> f32 {
        self.spatial.dot(spatial) + self.rotational.dot(rotational)
    }
}

/// Kind-specific data of an [`Equation`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EquationKind {
    /// Non-penetration along `ni`, which points from body A to body B.
    Contact {
        /// Contact point on A, relative to A's centre of mass.
        ri: Vec3,
        /// Contact point on B, relative to B's centre of mass.
        rj: Vec3,
        /// Contact normal in world space.
        ni: Vec3,
        /// Bounce factor applied to the approach velocity.
        restitution: f32,
    },
    /// Tangential friction along `t`.
    Friction {
        ri: Vec3,
        rj: Vec3,
        /// Unit tangent in world space.
        t: Vec3,
    },
    /// Keeps two world axes at `max_angle` (perpendicular by default).
    Rotational {
        axis_a: Vec3,
        axis_b: Vec3,
        max_angle: f32,
    },
    /// Drives the relative angular velocity about the axes.
    RotationalMotor {
        axis_a: Vec3,
        axis_b: Vec3,
        target_velocity: f32,
    },
    /// Keeps the angle between two world axes below `angle`.
    Cone {
        axis_a: Vec3,
        axis_b: Vec3,
        angle: f32,
    },
}

/// A constraint row solved by the Gauss–Seidel solver.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    /// Index of the first body.
    pub body_a: usize,
    /// Index of the second body.
    pub body_b: usize,
    /// Shape on body A that produced a contact or friction row.
    pub shape_a: Option<ShapeId>,
    /// Shape on body B that produced a contact or friction row.
    pub shape_b: Option<ShapeId>,
    /// Lower bound on the accumulated impulse.
    pub min_force: f32,
    /// Upper bound on the accumulated impulse.
    pub max_force: f32,
    /// SPOOK position correction factor.
    pub a: f32,
    /// SPOOK velocity factor.
    pub b: f32,
    /// SPOOK regularization.
    pub eps: f32,
    /// Stiffness used for the last SPOOK update.
    pub stiffness: f32,
    /// Relaxation used for the last SPOOK update.
    pub relaxation: f32,
    pub jacobian_a: JacobianElement,
    pub jacobian_b: JacobianElement,
    /// Disabled equations are skipped by the solver.
    pub enabled: bool,
    /// Force applied during the last solve (impulse over `dt`).
    pub multiplier: f32,
    pub kind: EquationKind,
}

impl Equation {
    /// A new equation with default SPOOK parameters for a 60 Hz step.
    pub fn new(kind: EquationKind, body_a: usize, body_b: usize, min_force: f32, max_force: f32) -> Self {
        let mut eq = Self {
            body_a,
            body_b,
            shape_a: None,
            shape_b: None,
            min_force,
            max_force,
            a: 0.0,
            b: 0.0,
            eps: 0.0,
            stiffness: 1e7,
            relaxation: 4.0,
            jacobian_a: JacobianElement::default(),
            jacobian_b: JacobianElement::default(),
            enabled: true,
            multiplier: 0.0,
            kind,
        };
        eq.set_spook_params(1e7, 4.0, 1.0 / 60.0);
        eq
    }

    /// A unilateral contact row with zero offsets and restitution.
    pub fn contact(body_a: usize, body_b: usize, max_force: f32) -> Self {
        Self::new(
            EquationKind::Contact {
                ri: Vec3::ZERO,
                rj: Vec3::ZERO,
                ni: Vec3::ZERO,
                restitution: 0.0,
            },
            body_a,
            body_b,
            0.0,
            max_force,
        )
    }

    /// A friction row bounded by `±slip_force`.
    pub fn friction(body_a: usize, body_b: usize, slip_force: f32) -> Self {
        Self::new(
            EquationKind::Friction {
                ri: Vec3::ZERO,
                rj: Vec3::ZERO,
                t: Vec3::ZERO,
            },
            body_a,
            body_b,
            -slip_force,
            slip_force,
        )
    }

    /// A rotational row keeping the axes perpendicular.
    pub fn rotational(body_a: usize, body_b: usize, max_force: f32) -> Self {
        Self::new(
            EquationKind::Rotational {
                axis_a: Vec3::X,
                axis_b: Vec3::Y,
                max_angle: std::f32::consts::FRAC_PI_2,
            },
            body_a,
            body_b,
            -max_force,
            max_force,
        )
    }

    /// A rotational motor row.
    pub fn rotational_motor(body_a: usize, body_b: usize, max_force: f32) -> Self {
        Self::new(
            EquationKind::RotationalMotor {
                axis_a: Vec3::X,
                axis_b: Vec3::X,
                target_velocity: 0.0,
            },
            body_a,
            body_b,
            -max_force,
            max_force,
        )
    }

    /// A cone row; it only ever pulls the axes together.
    pub fn cone(body_a: usize, body_b: usize, max_force: f32, angle: f32) -> Self {
        Self::new(
            EquationKind::Cone {
                axis_a: Vec3::X,
                axis_b: Vec3::Y,
                angle,
            },
            body_a,
            body_b,
            -max_force,
            0.0,
        )
    }

    /// Recomputes `a`, `b` and `eps` from stiffness `k`, relaxation `d` and timestep `h`:
    /// `a = 4/(h(1+4d))`, `b = 4d/(1+4d)`, `eps = 4/(h²k(1+4d))`.
    pub fn set_spook_params(&mut self, stiffness: f32, relaxation: f32, timestep: f32) {
        let (k, d, h) = (stiffness, relaxation, timestep);
        self.stiffness = k;
        self.relaxation = d;
        self.a = 4.0 / (h * (1.0 + 4.0 * d));
        self.b = (4.0 * d) / (1.0 + 4.0 * d);
        self.eps = 4.0 / (h * h * k * (1.0 + 4.0 * d));
    }

    /// Contact normal, if this is a contact row.
    pub fn contact_normal(&self) -> Option<Vec3> {
        match self.kind {
            EquationKind::Contact { ni, .. } => Some(ni),
            _ => None,
        }
    }

    /// Fills the Jacobian from the kind data; returns the constraint violation
    /// `g` and whether the position term contributes to `B`.
    fn update_jacobians(&mut self, bi: &Body, bj: &Body) -> Option<f32> {
        let (ga, gb, g) = match self.kind {
            EquationKind::Contact { ri, rj, ni, .. } => {
                let g = ni.dot(bj.position + rj - bi.position - ri);
                (
                    JacobianElement { spatial: -ni, rotational: -ri.cross(ni) },
                    JacobianElement { spatial: ni, rotational: rj.cross(ni) },
                    Some(g),
                )
            }
            EquationKind::Friction { ri, rj, t } => (
                JacobianElement { spatial: -t, rotational: -ri.cross(t) },
                JacobianElement { spatial: t, rotational: rj.cross(t) },
                None,
            ),
            EquationKind::Rotational { axis_a, axis_b, max_angle } => (
                JacobianElement { spatial: Vec3::ZERO, rotational: axis_b.cross(axis_a) },
                JacobianElement { spatial: Vec3::ZERO, rotational: axis_a.cross(axis_b) },
                Some(max_angle.cos() - axis_a.dot(axis_b)),
            ),
            EquationKind::RotationalMotor { axis_a, axis_b, .. } => (
                JacobianElement { spatial: Vec3::ZERO, rotational: axis_a },
                JacobianElement { spatial: Vec3::ZERO, rotational: -axis_b },
                None,
            ),
            EquationKind::Cone { axis_a, axis_b, angle } => (
                JacobianElement { spatial: Vec3::ZERO, rotational: axis_b.cross(axis_a) },
                JacobianElement { spatial: Vec3::ZERO, rotational: axis_a.cross(axis_b) },
                Some(angle.cos() - axis_a.dot(axis_b)),
            ),
        };
        self.jacobian_a = ga;
        self.jacobian_b = gb;
        g
    }

    /// SPOOK right-hand side `B = −g·a − GW·b − h·GiMf`.
    pub fn compute_b(&mut self, h: f32, bodies: &[Body]) -> f32 {
        let bi = &bodies[self.body_a];
        let bj = &bodies[self.body_b];
        let g = self.update_jacobians(bi, bj);

        let gw = match self.kind {
            EquationKind::Contact { ni, restitution, .. } => {
                let e1 = restitution + 1.0;
                e1 * bj.velocity.dot(ni) - e1 * bi.velocity.dot(ni)
                    + bj.angular_velocity.dot(self.jacobian_b.rotational)
                    + bi.angular_velocity.dot(self.jacobian_a.rotational)
            }
            EquationKind::RotationalMotor { target_velocity, .. } => {
                self.compute_gw(bi, bj) - target_velocity
            }
            _ => self.compute_gw(bi, bj),
        };
        let gimf = self.compute_gimf(bi, bj);
        -g.unwrap_or(0.0) * self.a - gw * self.b - h * gimf
    }

    /// `G·W`: relative velocity along the row.
    pub fn compute_gw(&self, bi: &Body, bj: &Body) -> f32 {
        self.jacobian_a.multiply_vectors(bi.velocity, bi.angular_velocity)
            + self.jacobian_b.multiply_vectors(bj.velocity, bj.angular_velocity)
    }

    /// `G·Wλ`: relative velocity from the solver's scratch accumulators.
    pub fn compute_gw_lambda(&self, bodies: &[Body]) -> f32 {
        let bi = &bodies[self.body_a];
        let bj = &bodies[self.body_b];
        self.jacobian_a.multiply_vectors(bi.vlambda, bi.wlambda)
            + self.jacobian_b.multiply_vectors(bj.vlambda, bj.wlambda)
    }

    /// `G·M⁻¹·f`: acceleration along the row from external forces.
    pub fn compute_gimf(&self, bi: &Body, bj: &Body) -> f32 {
        self.jacobian_a.spatial.dot(bi.force * bi.inv_mass_solve)
            + self.jacobian_a.rotational.dot(bi.inv_inertia_world_solve * bi.torque)
            + self.jacobian_b.spatial.dot(bj.force * bj.inv_mass_solve)
            + self.jacobian_b.rotational.dot(bj.inv_inertia_world_solve * bj.torque)
    }

    /// Effective inverse mass `G·M⁻¹·Gᵀ + eps`.
    pub fn compute_c(&self, bodies: &[Body]) -> f32 {
        let bi = &bodies[self.body_a];
        let bj = &bodies[self.body_b];
        let ra = self.jacobian_a.rotational;
        let rb = self.jacobian_b.rotational;
        bi.inv_mass_solve
            + bj.inv_mass_solve
            + self.eps
            + ra.dot(bi.inv_inertia_world_solve * ra)
            + rb.dot(bj.inv_inertia_world_solve * rb)
    }

    /// Applies an impulse increment to the bodies' scratch accumulators.
    pub fn add_to_wlambda(&self, bodies: &mut [Body], delta_lambda: f32) {
        let ga = self.jacobian_a;
        let gb = self.jacobian_b;

        let bi = &mut bodies[self.body_a];
        bi.vlambda += ga.spatial * (bi.inv_mass_solve * delta_lambda);
        bi.wlambda += bi.inv_inertia_world_solve * ga.rotational * delta_lambda;

        let bj = &mut bodies[self.body_b];
        bj.vlambda += gb.spatial * (bj.inv_mass_solve * delta_lambda);
        bj.wlambda += bj.inv_inertia_world_solve * gb.rotational * delta_lambda;
    }
}
