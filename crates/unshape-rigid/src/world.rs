//! Simulation world.
//!
//! [`World`] owns the bodies, constraints, springs and subsystems and runs the
//! step pipeline: forces, broadphase, narrowphase, solver, integration and
//! the sleep state machine. Everything observable that happens during a step
//! is queued as a [`WorldEvent`].

use std::collections::HashMap;

use glam::Vec3;
use tracing::{debug, trace, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::body::{Body, BodyId, BodyType, SleepState, SleepTransition, pair_mut};
use crate::broadphase::{Broadphase, NaiveBroadphase};
use crate::collision_matrix::{ArrayCollisionMatrix, OverlapKeeper};
use crate::constraint::Constraint;
use crate::equation::Equation;
use crate::events::WorldEvent;
use crate::material::{ContactMaterial, ContactMaterialTable};
use crate::math::QuatExt;
use crate::narrowphase::{Narrowphase, NarrowphaseContext, ShapeOverlap};
use crate::raycast::{Ray, RaycastMode, RaycastOptions, RaycastResult};
use crate::shape::ShapeId;
use crate::solver::{GsSolver, Solver};
use crate::spring::{Spring, Subsystem};

/// World settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WorldConfig {
    /// Gravitational acceleration applied to dynamic bodies.
    pub gravity: Vec3,
    /// Gravity used to scale friction bounds. Defaults to `gravity`.
    pub friction_gravity: Option<Vec3>,
    /// Run the sleep state machine.
    pub allow_sleep: bool,
    /// Normalize orientations every `quat_normalize_skip + 1` steps.
    pub quat_normalize_skip: u32,
    /// Use the one-step Newton normalization.
    pub quat_normalize_fast: bool,
    /// Solver passes per step, pushed to the solver before every step.
    pub solver_iterations: usize,
    /// Solver convergence tolerance, pushed to the solver before every step.
    pub solver_tolerance: f32,
    /// Contact material for pairs without a table entry.
    pub default_contact_material: ContactMaterial,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::ZERO,
            friction_gravity: None,
            allow_sleep: false,
            quat_normalize_skip: 0,
            quat_normalize_fast: false,
            solver_iterations: 10,
            solver_tolerance: 1e-7,
            default_contact_material: ContactMaterial::default(),
        }
    }
}

impl WorldConfig {
    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_allow_sleep(mut self, allow: bool) -> Self {
        self.allow_sleep = allow;
        self
    }

    pub fn with_default_contact_material(mut self, material: ContactMaterial) -> Self {
        self.default_contact_material = material;
        self
    }
}

/// Handle of a constraint added to a [`World`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstraintId(pub u32);

/// Handle of a spring added to a [`World`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpringId(pub u32);

/// The simulation world.
pub struct World {
    config: WorldConfig,
    bodies: Vec<Body>,
    index: HashMap<BodyId, usize>,
    constraints: Vec<(ConstraintId, Constraint)>,
    springs: Vec<(SpringId, Spring)>,
    subsystems: Vec<Box<dyn Subsystem>>,
    next_handle: u32,

    contact_materials: ContactMaterialTable,
    broadphase: Box<dyn Broadphase>,
    narrowphase: Narrowphase,
    solver: Box<dyn Solver>,
    shape_owners: HashMap<ShapeId, BodyId>,

    collision_matrix: ArrayCollisionMatrix,
    collision_matrix_previous: ArrayCollisionMatrix,
    body_overlaps: OverlapKeeper,
    shape_overlaps: OverlapKeeper,

    pairs: Vec<(usize, usize)>,
    contacts: Vec<Equation>,
    friction: Vec<Equation>,
    overlaps: Vec<ShapeOverlap>,
    events: Vec<WorldEvent>,

    time: f32,
    step_number: u64,
    accumulator: f32,
}

impl Default for World {
    fn default() -> Self {
        Self::new(WorldConfig::default())
    }
}

impl World {
    /// An empty world with a naive broadphase and a Gauss–Seidel solver.
    pub fn new(config: WorldConfig) -> Self {
        let solver = GsSolver::new(config.solver_iterations, config.solver_tolerance);
        Self {
            config,
            bodies: Vec::new(),
            index: HashMap::new(),
            constraints: Vec::new(),
            springs: Vec::new(),
            subsystems: Vec::new(),
            next_handle: 0,
            contact_materials: ContactMaterialTable::default(),
            broadphase: Box::new(NaiveBroadphase::new()),
            narrowphase: Narrowphase::new(),
            solver: Box::new(solver),
            shape_owners: HashMap::new(),
            collision_matrix: ArrayCollisionMatrix::new(0),
            collision_matrix_previous: ArrayCollisionMatrix::new(0),
            body_overlaps: OverlapKeeper::new(),
            shape_overlaps: OverlapKeeper::new(),
            pairs: Vec::new(),
            contacts: Vec::new(),
            friction: Vec::new(),
            overlaps: Vec::new(),
            events: Vec::new(),
            time: 0.0,
            step_number: 0,
            accumulator: 0.0,
        }
    }

    pub fn with_broadphase(mut self, broadphase: impl Broadphase + 'static) -> Self {
        self.broadphase = Box::new(broadphase);
        self.broadphase.set_dirty();
        self
    }

    /// Replaces the solver. Its iterations and tolerance are taken from the
    /// config on every step.
    pub fn with_solver(mut self, solver: impl Solver + 'static) -> Self {
        self.solver = Box::new(solver);
        self
    }

    pub fn with_narrowphase(mut self, narrowphase: Narrowphase) -> Self {
        self.narrowphase = narrowphase;
        self
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut WorldConfig {
        &mut self.config
    }

    /// Simulated time in seconds.
    pub fn time(&self) -> f32 {
        self.time
    }

    /// Fixed steps taken so far.
    pub fn step_number(&self) -> u64 {
        self.step_number
    }

    /// Leftover time of the last [`World::step_with_elapsed`].
    pub fn accumulator(&self) -> f32 {
        self.accumulator
    }

    fn next_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    // ========================================================================
    // Bodies
    // ========================================================================

    /// Adds a body and snapshots its initial state. Adding a body whose id
    /// is already present does nothing.
    pub fn add_body(&mut self, mut body: Body) -> BodyId {
        let id = body.id;
        if self.index.contains_key(&id) {
            warn!(?id, "body already in world");
            return id;
        }
        body.snapshot_initial();
        for attachment in body.shapes() {
            self.shape_owners.insert(attachment.shape.id, id);
        }
        let index = self.bodies.len();
        self.bodies.push(body);
        self.index.insert(id, index);
        self.collision_matrix.set_num_objects(self.bodies.len());
        self.collision_matrix_previous.set_num_objects(self.bodies.len());
        self.broadphase.set_dirty();
        self.events.push(WorldEvent::AddBody(id));
        debug!(?id, index, "added body");
        id
    }

    /// Removes a body. Later bodies move down one index.
    pub fn remove_body(&mut self, id: BodyId) -> Option<Body> {
        let index = self.index.remove(&id)?;
        let body = self.bodies.remove(index);
        for (k, b) in self.bodies.iter().enumerate().skip(index) {
            self.index.insert(b.id, k);
        }

        self.collision_matrix.remove_index(index);
        self.collision_matrix_previous.remove_index(index);
        self.body_overlaps.remove_id(id.0);
        for attachment in body.shapes() {
            self.shape_overlaps.remove_id(attachment.shape.id.0);
            self.shape_owners.remove(&attachment.shape.id);
        }
        // Equations from the last step refer to stale indices.
        self.contacts.clear();
        self.friction.clear();
        self.broadphase.set_dirty();

        self.events.push(WorldEvent::RemoveBody(id));
        debug!(?id, index, "removed body");
        Some(body)
    }

    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.body_index(id).map(|i| &self.bodies[i])
    }

    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut Body> {
        self.body_index(id).map(|i| &mut self.bodies[i])
    }

    /// Current index of a body in [`World::bodies`].
    pub fn body_index(&self, id: BodyId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn bodies_mut(&mut self) -> &mut [Body] {
        &mut self.bodies
    }

    // ========================================================================
    // Constraints, springs and subsystems
    // ========================================================================

    pub fn add_constraint(&mut self, constraint: Constraint) -> ConstraintId {
        let id = ConstraintId(self.next_handle());
        self.constraints.push((id, constraint));
        id
    }

    pub fn remove_constraint(&mut self, id: ConstraintId) -> Option<Constraint> {
        let pos = self.constraints.iter().position(|(c, _)| *c == id)?;
        Some(self.constraints.remove(pos).1)
    }

    pub fn constraint(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraints.iter().find(|(c, _)| *c == id).map(|(_, c)| c)
    }

    pub fn constraint_mut(&mut self, id: ConstraintId) -> Option<&mut Constraint> {
        self.constraints
            .iter_mut()
            .find(|(c, _)| *c == id)
            .map(|(_, c)| c)
    }

    pub fn add_spring(&mut self, spring: Spring) -> SpringId {
        let id = SpringId(self.next_handle());
        self.springs.push((id, spring));
        id
    }

    pub fn remove_spring(&mut self, id: SpringId) -> Option<Spring> {
        let pos = self.springs.iter().position(|(s, _)| *s == id)?;
        Some(self.springs.remove(pos).1)
    }

    /// Registers a subsystem updated at the start of every step.
    pub fn add_subsystem(&mut self, subsystem: impl Subsystem + 'static) {
        self.subsystems.push(Box::new(subsystem));
    }

    pub fn add_contact_material(&mut self, material: ContactMaterial) {
        self.contact_materials.insert(material);
    }

    pub fn contact_materials(&self) -> &ContactMaterialTable {
        &self.contact_materials
    }

    // ========================================================================
    // Results
    // ========================================================================

    /// Contact equations of the last step, with solved multipliers.
    pub fn contacts(&self) -> &[Equation] {
        &self.contacts
    }

    /// Friction equations of the last step.
    pub fn friction_equations(&self) -> &[Equation] {
        &self.friction
    }

    /// Events queued since the start of the last `step*` call.
    pub fn events(&self) -> &[WorldEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> std::vec::Drain<'_, WorldEvent> {
        self.events.drain(..)
    }

    // ========================================================================
    // Stepping
    // ========================================================================

    /// Advances the world by one fixed step of `dt` seconds.
    pub fn step(&mut self, dt: f32) {
        self.events.clear();
        self.internal_step(dt);
        for body in &mut self.bodies {
            body.interpolated_position = body.position;
            body.interpolated_orientation = body.orientation;
        }
    }

    /// Accumulates `elapsed` seconds and takes as many fixed steps as fit,
    /// up to `max_sub_steps`. Poses are then interpolated by the leftover
    /// fraction of a step. Returns the number of steps taken.
    pub fn step_with_elapsed(&mut self, dt: f32, elapsed: f32, max_sub_steps: usize) -> usize {
        self.events.clear();
        if dt <= 0.0 {
            return 0;
        }
        self.accumulator += elapsed;
        let mut sub_steps = 0;
        while self.accumulator >= dt && sub_steps < max_sub_steps {
            self.internal_step(dt);
            self.accumulator -= dt;
            sub_steps += 1;
        }
        // Drop what could not be caught up.
        self.accumulator %= dt;

        let t = self.accumulator / dt;
        for body in &mut self.bodies {
            body.interpolated_position = body.previous_position.lerp(body.position, t);
            body.interpolated_orientation = body
                .previous_orientation
                .slerp_shortest(body.orientation, t)
                .normalize();
        }
        sub_steps
    }

    fn friction_gravity(&self) -> f32 {
        self.config
            .friction_gravity
            .unwrap_or(self.config.gravity)
            .length()
    }

    fn internal_step(&mut self, dt: f32) {
        self.solver.set_iterations(self.config.solver_iterations);
        self.solver.set_tolerance(self.config.solver_tolerance);

        let gravity = self.config.gravity;
        for body in &mut self.bodies {
            if body.body_type == BodyType::Dynamic {
                body.force += gravity * body.mass();
            }
        }

        for subsystem in &mut self.subsystems {
            subsystem.update(&mut self.bodies, dt);
        }
        self.apply_springs();

        self.broadphase.collision_pairs(&mut self.bodies, &mut self.pairs);
        self.remove_constrained_pairs();
        self.collision_matrix_tick();

        self.contacts.clear();
        self.friction.clear();
        self.overlaps.clear();
        let ctx = NarrowphaseContext {
            bodies: &self.bodies,
            contact_materials: &self.contact_materials,
            default_material: &self.config.default_contact_material,
            friction_gravity: self.friction_gravity(),
            dt,
        };
        self.narrowphase.get_contacts(
            &self.pairs,
            &ctx,
            &mut self.contacts,
            &mut self.friction,
            &mut self.overlaps,
        );

        for eq in &self.friction {
            self.solver.add_equation(eq.clone());
        }
        self.register_contacts();
        self.emit_contact_events();

        for body in &mut self.bodies {
            if body.wake_up_after_narrowphase && body.wake_up() {
                self.events.push(WorldEvent::Wakeup(body.id));
            }
        }

        self.add_constraint_equations();
        let iterations = self.solver.solve(dt, &mut self.bodies);
        self.write_back_multipliers();
        self.solver.remove_all_equations();

        for body in &mut self.bodies {
            if body.body_type == BodyType::Dynamic {
                body.velocity *= (1.0 - body.linear_damping).powf(dt);
                body.angular_velocity *= (1.0 - body.angular_damping).powf(dt);
            }
        }

        self.events.push(WorldEvent::PreStep);

        let quat_normalize = self.step_number % (u64::from(self.config.quat_normalize_skip) + 1) == 0;
        let fast = self.config.quat_normalize_fast;
        for body in &mut self.bodies {
            body.integrate(dt, quat_normalize, fast);
            body.force = Vec3::ZERO;
            body.torque = Vec3::ZERO;
        }

        self.time += dt;
        self.step_number += 1;
        self.events.push(WorldEvent::PostStep);

        if self.config.allow_sleep {
            self.sleep_ticks();
        }

        trace!(
            step = self.step_number,
            pairs = self.pairs.len(),
            contacts = self.contacts.len(),
            friction = self.friction.len(),
            iterations,
            "world step"
        );
    }

    fn apply_springs(&mut self) {
        for (_, spring) in &self.springs {
            let (Some(&ia), Some(&ib)) = (self.index.get(&spring.body_a), self.index.get(&spring.body_b)) else {
                warn!(body_a = ?spring.body_a, body_b = ?spring.body_b, "spring references a body not in the world");
                continue;
            };
            if ia == ib {
                continue;
            }
            let (a, b) = pair_mut(&mut self.bodies, ia, ib);
            spring.apply_force(a, b);
        }
    }

    /// Drops pairs joined by a constraint that disables collisions.
    fn remove_constrained_pairs(&mut self) {
        let vetoes: Vec<(BodyId, BodyId)> = self
            .constraints
            .iter()
            .filter(|(_, c)| !c.collide_connected)
            .map(|(_, c)| (c.body_a, c.body_b))
            .collect();
        if vetoes.is_empty() {
            return;
        }
        let bodies = &self.bodies;
        self.pairs.retain(|&(i, j)| {
            let (a, b) = (bodies[i].id, bodies[j].id);
            !vetoes
                .iter()
                .any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
        });
    }

    fn collision_matrix_tick(&mut self) {
        std::mem::swap(&mut self.collision_matrix, &mut self.collision_matrix_previous);
        self.collision_matrix.reset();
        self.body_overlaps.tick();
        self.shape_overlaps.tick();
    }

    /// Queues contacts with the solver and records who touches whom.
    fn register_contacts(&mut self) {
        for eq in &self.contacts {
            let (i, j) = (eq.body_a, eq.body_b);
            if wakes(&self.bodies[i], &self.bodies[j]) {
                self.bodies[i].wake_up_after_narrowphase = true;
            }
            if wakes(&self.bodies[j], &self.bodies[i]) {
                self.bodies[j].wake_up_after_narrowphase = true;
            }

            let (id_i, id_j) = (self.bodies[i].id, self.bodies[j].id);
            if !self.collision_matrix_previous.get(i, j) && !self.collision_matrix.get(i, j) {
                let normal = eq.contact_normal().unwrap_or(Vec3::ZERO);
                self.events.push(WorldEvent::Collide {
                    body: id_i,
                    other: id_j,
                    normal,
                });
                self.events.push(WorldEvent::Collide {
                    body: id_j,
                    other: id_i,
                    normal: -normal,
                });
            }
            self.collision_matrix.set(i, j, true);

            self.body_overlaps.set(id_i.0, id_j.0);
            if let (Some(sa), Some(sb)) = (eq.shape_a, eq.shape_b) {
                self.shape_overlaps.set(sa.0, sb.0);
            }
            self.solver.add_equation(eq.clone());
        }

        for overlap in &self.overlaps {
            let (a, b) = (&self.bodies[overlap.body_a], &self.bodies[overlap.body_b]);
            self.body_overlaps.set(a.id.0, b.id.0);
            self.shape_overlaps.set(overlap.shape_a.0, overlap.shape_b.0);
        }
    }

    fn emit_contact_events(&mut self) {
        let mut additions = Vec::new();
        let mut removals = Vec::new();

        self.body_overlaps.diff(&mut additions, &mut removals);
        for &(a, b) in &additions {
            self.events.push(WorldEvent::BeginContact {
                body_a: BodyId(a),
                body_b: BodyId(b),
            });
        }
        for &(a, b) in &removals {
            self.events.push(WorldEvent::EndContact {
                body_a: BodyId(a),
                body_b: BodyId(b),
            });
        }

        self.shape_overlaps.diff(&mut additions, &mut removals);
        if additions.is_empty() && removals.is_empty() {
            return;
        }
        // Shapes attached after `add_body` are not in the cache yet.
        let missing = additions
            .iter()
            .chain(&removals)
            .any(|&(a, b)| !self.shape_owners.contains_key(&ShapeId(a)) || !self.shape_owners.contains_key(&ShapeId(b)));
        if missing {
            self.shape_owners = self
                .bodies
                .iter()
                .flat_map(|b| b.shapes().iter().map(move |s| (s.shape.id, b.id)))
                .collect();
        }
        let owners = &self.shape_owners;
        let lookup = |a: u32, b: u32| {
            let (sa, sb) = (ShapeId(a), ShapeId(b));
            Some((*owners.get(&sa)?, *owners.get(&sb)?, sa, sb))
        };
        for (body_a, body_b, shape_a, shape_b) in additions.iter().filter_map(|&(a, b)| lookup(a, b)) {
            self.events.push(WorldEvent::BeginShapeContact {
                body_a,
                body_b,
                shape_a,
                shape_b,
            });
        }
        for (body_a, body_b, shape_a, shape_b) in removals.iter().filter_map(|&(a, b)| lookup(a, b)) {
            self.events.push(WorldEvent::EndShapeContact {
                body_a,
                body_b,
                shape_a,
                shape_b,
            });
        }
    }

    fn add_constraint_equations(&mut self) {
        for (_, constraint) in &mut self.constraints {
            let (Some(&ia), Some(&ib)) = (self.index.get(&constraint.body_a), self.index.get(&constraint.body_b))
            else {
                warn!(
                    body_a = ?constraint.body_a,
                    body_b = ?constraint.body_b,
                    "constraint references a body not in the world"
                );
                continue;
            };
            constraint.update(&self.bodies, ia, ib);
            for eq in constraint.equations() {
                self.solver.add_equation(eq.clone());
            }
        }
    }

    /// Copies solved multipliers back, in the order equations were queued.
    fn write_back_multipliers(&mut self) {
        let mut solved = self.solver.equations().iter();
        let queued = self
            .friction
            .iter_mut()
            .chain(self.contacts.iter_mut())
            .chain(
                self.constraints
                    .iter_mut()
                    .flat_map(|(_, c)| c.equations_mut().iter_mut()),
            )
            .filter(|eq| eq.enabled);
        for eq in queued {
            let Some(s) = solved.next() else { break };
            eq.multiplier = s.multiplier;
        }
    }

    fn sleep_ticks(&mut self) {
        let time = self.time;
        for body in &mut self.bodies {
            let Some(transition) = body.sleep_tick(time) else {
                continue;
            };
            let event = match transition {
                SleepTransition::BecameSleepy => WorldEvent::Sleepy(body.id),
                SleepTransition::FellAsleep => WorldEvent::Sleep(body.id),
                SleepTransition::WokeUp => WorldEvent::Wakeup(body.id),
            };
            debug!(id = ?body.id, ?transition, "sleep transition");
            self.events.push(event);
        }
    }

    // ========================================================================
    // Ray casting
    // ========================================================================

    fn raycast(
        &mut self,
        from: Vec3,
        to: Vec3,
        mode: RaycastMode,
        options: RaycastOptions,
        on_hit: &mut dyn FnMut(&mut RaycastResult),
    ) -> Ray {
        let mut ray = Ray::new(from, to).with_mode(mode).with_options(options);
        ray.intersect_world(&mut self.bodies, &mut *self.broadphase, on_hit);
        ray
    }

    /// The nearest hit along the segment.
    pub fn raycast_closest(&mut self, from: Vec3, to: Vec3, options: RaycastOptions) -> Option<RaycastResult> {
        let ray = self.raycast(from, to, RaycastMode::Closest, options, &mut |_| {});
        ray.has_hit().then(|| ray.result().clone())
    }

    /// Some hit along the segment; stops at the first one found.
    pub fn raycast_any(&mut self, from: Vec3, to: Vec3, options: RaycastOptions) -> Option<RaycastResult> {
        let ray = self.raycast(from, to, RaycastMode::Any, options, &mut |_| {});
        ray.has_hit().then(|| ray.result().clone())
    }

    /// Calls `on_hit` for every hit. Call [`RaycastResult::abort`] to stop.
    pub fn raycast_all(
        &mut self,
        from: Vec3,
        to: Vec3,
        options: RaycastOptions,
        mut on_hit: impl FnMut(&mut RaycastResult),
    ) -> bool {
        self.raycast(from, to, RaycastMode::All, options, &mut on_hit)
            .has_hit()
    }
}

/// Whether a contact with `other` should wake the sleeping body `sleeper`.
fn wakes(sleeper: &Body, other: &Body) -> bool {
    if !(sleeper.allow_sleep
        && sleeper.body_type == BodyType::Dynamic
        && sleeper.sleep_state == SleepState::Sleeping)
    {
        return false;
    }
    if other.sleep_state != SleepState::Awake || other.body_type == BodyType::Static {
        return false;
    }
    let speed_sq = other.velocity.length_squared() + other.angular_velocity.length_squared();
    speed_sq >= 2.0 * other.sleep_speed_limit * other.sleep_speed_limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadphase::SapBroadphase;
    use crate::equation::EquationKind;
    use crate::shape::Shape;
    use crate::solver::SplitSolver;
    use glam::Quat;

    const DT: f32 = 1.0 / 60.0;

    fn gravity_world() -> World {
        World::new(WorldConfig::default().with_gravity(Vec3::new(0.0, 0.0, -9.82)))
    }

    fn ball(radius: f32, position: Vec3) -> Body {
        Body::new(1.0)
            .with_shape(Shape::sphere(radius).unwrap())
            .with_position(position)
    }

    #[test]
    fn test_free_flight() {
        let mut world = World::default();
        let v = Vec3::new(1.0, -2.0, 0.5);
        let start = Vec3::new(3.0, 1.0, -4.0);
        let id = world.add_body(ball(0.5, start).with_velocity(v).with_damping(0.0, 0.0));
        for _ in 0..30 {
            world.step(DT);
        }
        let expected = start + v * DT * 30.0;
        assert!(world.body(id).unwrap().position.abs_diff_eq(expected, 1e-4));
    }

    #[test]
    fn test_quaternion_stays_unit() {
        let mut world = World::default();
        let id = world.add_body(ball(0.5, Vec3::ZERO).with_angular_velocity(Vec3::new(3.0, -7.0, 11.0)));
        for _ in 0..1000 {
            world.step(DT);
            let q = world.body(id).unwrap().orientation;
            assert!((q.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_fast_normalize_stays_unit() {
        let mut config = WorldConfig::default();
        config.quat_normalize_fast = true;
        config.quat_normalize_skip = 1;
        let mut world = World::new(config);
        let id = world.add_body(ball(0.5, Vec3::ZERO).with_angular_velocity(Vec3::new(1.0, 2.0, 3.0)));
        for _ in 0..500 {
            world.step(DT);
        }
        let q = world.body(id).unwrap().orientation;
        assert!((q.length() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_touching_spheres_make_one_contact() {
        let mut world = World::default();
        world.add_body(ball(0.5, Vec3::ZERO));
        world.add_body(ball(0.5, Vec3::new(1.0, 0.0, 0.0)));
        world.step(DT);

        let contacts = world.contacts();
        assert_eq!(contacts.len(), 1);
        let EquationKind::Contact { ri, rj, ni, .. } = contacts[0].kind else {
            panic!("expected a contact");
        };
        assert!(ni.abs_diff_eq(Vec3::X, 1e-6));
        let gap = (Vec3::new(1.0, 0.0, 0.0) + rj - ri).dot(ni);
        assert!(gap.abs() < 1e-6);
    }

    #[test]
    fn test_separated_spheres_make_no_contact() {
        let mut world = World::default();
        world.add_body(ball(0.5, Vec3::ZERO));
        world.add_body(ball(0.5, Vec3::new(1.001, 0.0, 0.0)));
        world.step(DT);
        assert!(world.contacts().is_empty());
    }

    #[test]
    fn test_box_on_plane_falls_asleep() {
        let config = WorldConfig::default()
            .with_gravity(Vec3::new(0.0, 0.0, -9.82))
            .with_allow_sleep(true)
            .with_default_contact_material(ContactMaterial::default().with_restitution(0.0));
        let mut world = World::new(config);
        world.add_body(Body::new_static().with_shape(Shape::plane()));
        let id = world.add_body(
            Body::new(1.0)
                .with_shape(Shape::cuboid(Vec3::splat(0.5)).unwrap())
                .with_position(Vec3::new(0.0, 0.0, 0.5)),
        );

        let limit = world.body(id).unwrap().sleep_time_limit;
        let allowed = (limit / DT).ceil() as usize + 1;
        let mut last_sleepy = None;
        let mut fell_asleep = false;
        for step in 0..600 {
            world.step(DT);
            if world.events().contains(&WorldEvent::Sleepy(id)) {
                last_sleepy = Some(step);
            }
            if world.events().contains(&WorldEvent::Sleep(id)) {
                let sleepy = last_sleepy.expect("sleepy before sleeping");
                assert!(step - sleepy <= allowed, "slept {} steps after becoming sleepy", step - sleepy);
                fell_asleep = true;
                break;
            }
        }
        let body = world.body(id).unwrap();
        assert!(fell_asleep);
        assert_eq!(body.sleep_state, SleepState::Sleeping);
        assert_eq!(body.velocity, Vec3::ZERO);
        assert!((body.position.z - 0.5).abs() < 0.01);
    }

    fn resting_ball_world() -> (World, BodyId) {
        let config = WorldConfig::default()
            .with_gravity(Vec3::new(0.0, 0.0, -9.82))
            .with_default_contact_material(ContactMaterial::default().with_restitution(0.0));
        let mut world = World::new(config);
        world.add_body(Body::new_static().with_shape(Shape::plane()));
        let id = world.add_body(ball(0.5, Vec3::new(0.0, 0.0, 0.49)));
        (world, id)
    }

    fn collides(world: &World, id: BodyId) -> usize {
        world
            .events()
            .iter()
            .filter(|e| matches!(e, WorldEvent::Collide { body, .. } if *body == id))
            .count()
    }

    #[test]
    fn test_adding_body_keeps_collision_history() {
        let (mut world, id) = resting_ball_world();
        world.step(DT);
        assert_eq!(collides(&world, id), 1);
        world.step(DT);
        assert_eq!(collides(&world, id), 0);

        world.add_body(ball(0.5, Vec3::new(100.0, 0.0, 5.0)));
        world.step(DT);
        assert!(!world.contacts().is_empty());
        assert_eq!(collides(&world, id), 0);
    }

    #[test]
    fn test_solver_iterations_follow_config() {
        let mut world = World::default();
        world.add_body(Body::new_static().with_shape(Shape::plane()));
        let id = world.add_body(
            ball(0.5, Vec3::new(0.0, 0.0, 0.5))
                .with_velocity(Vec3::new(0.0, 0.0, -1.0))
                .with_damping(0.0, 0.0),
        );

        world.config_mut().solver_iterations = 0;
        world.step(DT);
        assert!(!world.contacts().is_empty());
        assert_eq!(world.body(id).unwrap().velocity.z, -1.0);

        world.config_mut().solver_iterations = 10;
        world.step(DT);
        assert!(world.body(id).unwrap().velocity.z > -0.2);
    }

    /// Drops a box onto a plane; returns the final contact count and height.
    fn settle_box(mut world: World) -> (usize, f32) {
        world.add_body(Body::new_static().with_shape(Shape::plane()));
        let id = world.add_body(
            Body::new(1.0)
                .with_shape(Shape::cuboid(Vec3::splat(0.5)).unwrap())
                .with_position(Vec3::new(0.0, 0.0, 0.6)),
        );
        for _ in 0..120 {
            world.step(DT);
        }
        (world.contacts().len(), world.body(id).unwrap().position.z)
    }

    #[test]
    fn test_sap_and_split_solver_match_defaults() {
        let (ref_contacts, ref_height) = settle_box(gravity_world());
        let (contacts, height) = settle_box(
            gravity_world()
                .with_broadphase(SapBroadphase::new())
                .with_solver(SplitSolver::default()),
        );
        assert!(ref_contacts > 0);
        assert_eq!(contacts, ref_contacts);
        assert!((height - ref_height).abs() < 1e-3, "{height} vs {ref_height}");
        assert!((height - 0.5).abs() < 0.01);
    }

    fn anchor() -> Body {
        Body::new_static().with_shape(Shape::sphere(0.1).unwrap())
    }

    fn crate_box(position: Vec3) -> Body {
        Body::new(1.0)
            .with_shape(Shape::cuboid(Vec3::splat(0.2)).unwrap())
            .with_position(position)
    }

    #[test]
    fn test_hinge_keeps_rotation_on_axis() {
        let mut world = World::new(WorldConfig::default().with_gravity(Vec3::new(0.0, -9.82, 0.0)));
        let pin = anchor();
        let arm = crate_box(Vec3::X).with_angular_velocity(Vec3::new(3.0, 0.0, 0.0));
        let (pin_id, arm_id) = (pin.id, arm.id);
        world.add_constraint(Constraint::hinge(&pin, Vec3::ZERO, Vec3::Z, &arm, -Vec3::X, Vec3::Z, 1e6));
        world.add_body(pin);
        world.add_body(arm);

        let mut lowest = 0.0f32;
        for _ in 0..120 {
            world.step(DT);
            let arm = world.body(arm_id).unwrap();
            assert!((arm.orientation * Vec3::Z).dot(Vec3::Z) > 0.99);
            lowest = lowest.min(arm.position.y);
        }
        let arm = world.body(arm_id).unwrap();
        let reach = arm.position.distance(world.body(pin_id).unwrap().position);
        assert!((reach - 1.0).abs() < 0.05, "arm length drifted to {reach}");
        assert!(lowest < -0.5, "arm did not swing");
    }

    #[test]
    fn test_hinge_motor_spins_about_axis() {
        let mut world = World::default();
        let pin = anchor();
        let wheel = crate_box(Vec3::X);
        let wheel_id = wheel.id;
        let id = world.add_constraint(Constraint::hinge(&pin, Vec3::ZERO, Vec3::Z, &wheel, -Vec3::X, Vec3::Z, 1e6));
        world.add_body(pin);
        world.add_body(wheel);
        let hinge = world.constraint_mut(id).unwrap();
        hinge.enable_motor();
        hinge.set_motor_speed(2.0);

        for _ in 0..60 {
            world.step(DT);
        }
        let w = world.body(wheel_id).unwrap().angular_velocity;
        assert!((w.z.abs() - 2.0).abs() < 0.1, "angular velocity {w}");
        assert!(w.x.abs() < 0.05 && w.y.abs() < 0.05);
    }

    #[test]
    fn test_lock_holds_relative_pose() {
        let mut world = gravity_world();
        let base = anchor();
        let block = crate_box(Vec3::X).with_angular_velocity(Vec3::new(0.0, 2.0, 0.0));
        let block_id = block.id;
        world.add_constraint(Constraint::lock(&base, &block, 1e6));
        world.add_body(base);
        world.add_body(block);

        for _ in 0..120 {
            world.step(DT);
        }
        let block = world.body(block_id).unwrap();
        assert!(block.position.abs_diff_eq(Vec3::X, 0.05), "block moved to {}", block.position);
        assert!(block.orientation.angle_between(Quat::IDENTITY) < 0.05);
    }

    #[test]
    fn test_cone_twist_limits_swing() {
        let mut world = gravity_world();
        let pin = anchor();
        let bob = crate_box(Vec3::new(0.0, 0.0, -1.0)).with_velocity(Vec3::new(3.0, 0.0, 0.0));
        let bob_id = bob.id;
        let cone = 0.3;
        world.add_constraint(Constraint::cone_twist(
            &pin,
            Vec3::ZERO,
            -Vec3::Z,
            &bob,
            Vec3::Z,
            -Vec3::Z,
            cone,
            0.0,
            1e6,
        ));
        world.add_body(pin);
        world.add_body(bob);

        let mut widest = 0.0f32;
        for _ in 0..120 {
            world.step(DT);
            let axis = world.body(bob_id).unwrap().orientation * -Vec3::Z;
            widest = widest.max(axis.angle_between(-Vec3::Z));
        }
        assert!(widest > 0.1, "bob never swung");
        assert!(widest < cone + 0.15, "swing reached {widest} rad");
    }

    #[test]
    fn test_moving_body_wakes_sleeper() {
        let mut world = World::new(WorldConfig::default().with_allow_sleep(true));
        let sleeper = world.add_body(ball(0.5, Vec3::ZERO));
        world.body_mut(sleeper).unwrap().sleep();
        world.add_body(ball(0.5, Vec3::new(0.95, 0.0, 0.0)).with_velocity(Vec3::new(-2.0, 0.0, 0.0)));
        world.step(DT);
        assert!(!world.body(sleeper).unwrap().is_sleeping());
        assert!(world.events().contains(&WorldEvent::Wakeup(sleeper)));
    }

    #[test]
    fn test_raycast_through_stacked_boxes() {
        let mut world = World::default();
        let near = world.add_body(
            Body::new_static()
                .with_shape(Shape::cuboid(Vec3::splat(0.5)).unwrap())
                .with_position(Vec3::new(0.0, 0.0, 0.5)),
        );
        world.add_body(
            Body::new_static()
                .with_shape(Shape::cuboid(Vec3::splat(0.5)).unwrap())
                .with_position(Vec3::new(0.0, 0.0, 1.5)),
        );

        let hit = world
            .raycast_closest(Vec3::new(0.1, 0.2, -3.0), Vec3::new(0.1, 0.2, 5.0), RaycastOptions::default())
            .unwrap();
        assert_eq!(hit.body, Some(near));
        assert!((hit.distance - 3.0).abs() < 1e-5);
        assert!(hit.hit_point.abs_diff_eq(Vec3::new(0.1, 0.2, 0.0), 1e-5));
        assert!(hit.hit_normal.abs_diff_eq(-Vec3::Z, 1e-5));

        let mut hits = 0;
        assert!(world.raycast_all(Vec3::new(0.1, 0.2, -3.0), Vec3::new(0.1, 0.2, 5.0), RaycastOptions::default(), |_| {
            hits += 1
        }));
        assert_eq!(hits, 4);
        assert!(world
            .raycast_any(Vec3::new(5.0, 5.0, -3.0), Vec3::new(5.0, 5.0, 5.0), RaycastOptions::default())
            .is_none());
    }

    #[test]
    fn test_begin_and_end_contact_fire_once() {
        let mut world = World::default();
        let a = world.add_body(ball(0.5, Vec3::ZERO));
        let b = world.add_body(ball(0.5, Vec3::new(3.0, 0.0, 0.0)));
        let place = |world: &mut World, x: f32| {
            let body = world.body_mut(b).unwrap();
            body.set_position(Vec3::new(x, 0.0, 0.0));
            body.velocity = Vec3::ZERO;
            let body = world.body_mut(a).unwrap();
            body.set_position(Vec3::ZERO);
            body.velocity = Vec3::ZERO;
        };

        let mut events = Vec::new();
        for x in [3.0, 0.9, 0.9, 3.0, 3.0] {
            place(&mut world, x);
            world.step(DT);
            events.extend(world.drain_events());
        }

        let begins = events
            .iter()
            .filter(|e| matches!(e, WorldEvent::BeginContact { .. }))
            .count();
        let ends = events
            .iter()
            .filter(|e| matches!(e, WorldEvent::EndContact { .. }))
            .count();
        let collides = events
            .iter()
            .filter(|e| matches!(e, WorldEvent::Collide { body, .. } if *body == a))
            .count();
        assert_eq!((begins, ends, collides), (1, 1, 1));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, WorldEvent::BeginShapeContact { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn test_shape_contact_names_owner_of_late_shape() {
        let mut world = World::default();
        let a = world.add_body(ball(0.5, Vec3::ZERO));
        let b = world.add_body(Body::new(1.0).with_position(Vec3::new(0.9, 0.0, 0.0)));
        let late = Shape::sphere(0.5).unwrap();
        let late_id = late.id;
        world.body_mut(b).unwrap().add_shape(late, Vec3::ZERO, Quat::IDENTITY);
        world.step(DT);

        let owners: Vec<_> = world
            .events()
            .iter()
            .filter_map(|e| match *e {
                WorldEvent::BeginShapeContact {
                    body_a,
                    body_b,
                    shape_a,
                    ..
                } => Some(if shape_a == late_id { (body_a, body_b) } else { (body_b, body_a) }),
                _ => None,
            })
            .collect();
        assert_eq!(owners, vec![(b, a)]);

        world.remove_body(b);
        world.step(DT);
        assert!(!world.events().iter().any(|e| matches!(e, WorldEvent::EndShapeContact { .. })));
    }

    #[test]
    fn test_trigger_reports_overlap_without_response() {
        let mut world = World::default();
        let sensor = world.add_body(
            Body::new_static()
                .with_shape(Shape::cuboid(Vec3::splat(1.0)).unwrap())
                .with_trigger(true),
        );
        let visitor = world.add_body(ball(0.5, Vec3::new(0.5, 0.0, 0.0)).with_velocity(Vec3::X));
        world.step(DT);
        assert!(world.contacts().is_empty());
        assert!(world.events().contains(&WorldEvent::BeginContact {
            body_a: sensor.min(visitor),
            body_b: sensor.max(visitor),
        }));
        assert!(world.body(visitor).unwrap().velocity.abs_diff_eq(Vec3::X, 1e-3));
    }

    #[test]
    fn test_constraint_vetoes_collision() {
        let mut world = World::default();
        let a = ball(0.5, Vec3::ZERO);
        let b = ball(0.5, Vec3::new(0.8, 0.0, 0.0));
        let constraint = Constraint::distance(&a, &b, None, 1e6).with_collide_connected(false);
        world.add_body(a);
        world.add_body(b);
        world.add_constraint(constraint);
        world.step(DT);
        assert!(world.contacts().is_empty());
    }

    #[test]
    fn test_distance_constraint_holds() {
        let mut world = gravity_world();
        let anchor = Body::new_static()
            .with_shape(Shape::sphere(0.1).unwrap())
            .with_position(Vec3::new(0.0, 0.0, 5.0));
        let bob = ball(0.2, Vec3::new(2.0, 0.0, 5.0));
        let (anchor_id, bob_id) = (anchor.id, bob.id);
        world.add_constraint(Constraint::distance(&anchor, &bob, Some(2.0), 1e6));
        world.add_body(anchor);
        world.add_body(bob);
        for _ in 0..120 {
            world.step(DT);
        }
        let d = world
            .body(anchor_id)
            .unwrap()
            .position
            .distance(world.body(bob_id).unwrap().position);
        assert!((d - 2.0).abs() < 0.05, "distance drifted to {d}");
    }

    #[test]
    fn test_spring_pulls_bodies_together() {
        let mut world = World::default();
        let a = ball(0.1, Vec3::ZERO).with_damping(0.0, 0.0);
        let b = ball(0.1, Vec3::new(3.0, 0.0, 0.0)).with_damping(0.0, 0.0);
        let (ia, ib) = (a.id, b.id);
        world.add_spring(Spring::new(&a, &b).with_rest_length(1.0).with_stiffness(10.0));
        world.add_body(a);
        world.add_body(b);
        world.step(DT);
        assert!(world.body(ia).unwrap().velocity.x > 0.0);
        assert!(world.body(ib).unwrap().velocity.x < 0.0);
    }

    #[test]
    fn test_remove_body_renumbers() {
        let mut world = World::default();
        let a = world.add_body(ball(0.5, Vec3::ZERO));
        let b = world.add_body(ball(0.5, Vec3::new(5.0, 0.0, 0.0)));
        let c = world.add_body(ball(0.5, Vec3::new(10.0, 0.0, 0.0)));
        assert!(world.remove_body(a).is_some());
        assert_eq!(world.body_index(b), Some(0));
        assert_eq!(world.body_index(c), Some(1));
        assert!(world.body(a).is_none());
        assert!(world.remove_body(a).is_none());
        assert!(world.events().contains(&WorldEvent::RemoveBody(a)));
        world.step(DT);
    }

    #[test]
    fn test_subsystem_runs_each_step() {
        struct Wind(Vec3);
        impl Subsystem for Wind {
            fn update(&mut self, bodies: &mut [Body], _dt: f32) {
                for b in bodies {
                    b.force += self.0;
                }
            }
        }
        let mut world = World::default();
        let id = world.add_body(ball(0.5, Vec3::ZERO).with_damping(0.0, 0.0));
        world.add_subsystem(Wind(Vec3::new(6.0, 0.0, 0.0)));
        world.step(0.5);
        assert!((world.body(id).unwrap().velocity.x - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_step_with_elapsed_interpolates() {
        let mut world = World::default();
        let id = world.add_body(ball(0.5, Vec3::ZERO).with_velocity(Vec3::X).with_damping(0.0, 0.0));
        let steps = world.step_with_elapsed(0.1, 0.25, 10);
        assert_eq!(steps, 2);
        assert!((world.accumulator() - 0.05).abs() < 1e-5);
        let body = world.body(id).unwrap();
        assert!((body.position.x - 0.2).abs() < 1e-5);
        assert!((body.interpolated_position.x - 0.15).abs() < 1e-5);
        assert!(body.interpolated_orientation.abs_diff_eq(Quat::IDENTITY, 1e-6));

        // Capped catch-up drops the backlog.
        assert_eq!(world.step_with_elapsed(0.1, 5.0, 3), 3);
        assert!(world.accumulator() < 0.1);
    }

    #[test]
    fn test_step_events_bracket_integration() {
        let mut world = World::default();
        world.add_body(ball(0.5, Vec3::ZERO));
        world.step(DT);
        assert_eq!(world.events(), &[WorldEvent::PreStep, WorldEvent::PostStep]);
        assert_eq!(world.step_number(), 1);
        assert!((world.time() - DT).abs() < 1e-7);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_from_partial_json() {
        let config: WorldConfig = serde_json::from_str(r#"{"allow_sleep": true, "solver_iterations": 20}"#).unwrap();
        assert!(config.allow_sleep);
        assert_eq!(config.solver_iterations, 20);
        assert_eq!(config.gravity, Vec3::ZERO);
    }
}
