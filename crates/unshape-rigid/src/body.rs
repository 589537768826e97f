//! Rigid bodies: mass properties, pose, velocity and sleep state.

use std::sync::atomic::{AtomicU32, Ordering};

use glam::{Mat3, Quat, Vec3};
use tracing::warn;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::aabb::Aabb;
use crate::material::Material;
use crate::math::{self, QuatExt};
use crate::shape::{Shape, ShapeId};

static NEXT_BODY_ID: AtomicU32 = AtomicU32::new(0);

/// Identifier of a [`Body`], unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub u32);

/// How a body takes part in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum BodyType {
    /// Moved by forces and contacts.
    Dynamic = 1,
    /// Never moves; infinite mass.
    Static = 2,
    /// Moved only by its velocity; infinite mass.
    Kinematic = 4,
}

/// Sleep state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SleepState {
    #[default]
    Awake,
    /// Slow enough to start the sleep timer.
    Sleepy,
    /// Frozen until woken.
    Sleeping,
}

/// Outcome of [`Body::sleep_tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTransition {
    /// Awake → Sleepy.
    BecameSleepy,
    /// Sleepy → Sleeping.
    FellAsleep,
    /// Sleepy → Awake.
    WokeUp,
}

/// A shape attached to a body with a local pose.
#[derive(Debug, Clone)]
pub struct ShapeAttachment {
    /// The shape.
    pub shape: Shape,
    /// Position relative to the body origin.
    pub offset: Vec3,
    /// Orientation relative to the body.
    pub orientation: Quat,
}

impl ShapeAttachment {
    /// World position and orientation of the shape for a body pose.
    pub fn world_pose(&self, position: Vec3, orientation: Quat) -> (Vec3, Quat) {
        (
            orientation * self.offset + position,
            orientation * self.orientation,
        )
    }
}

/// A rigid body.
#[derive(Debug, Clone)]
pub struct Body {
    /// Unique id.
    pub id: BodyId,
    /// Dynamic, static or kinematic.
    pub body_type: BodyType,

    /// World position of the centre of mass.
    pub position: Vec3,
    /// Position before the last integration.
    pub previous_position: Vec3,
    /// Position blended between steps for rendering.
    pub interpolated_position: Vec3,
    /// Position when added to the world.
    pub initial_position: Vec3,
    /// World orientation.
    pub orientation: Quat,
    /// Orientation before the last integration.
    pub previous_orientation: Quat,
    /// Orientation blended between steps for rendering.
    pub interpolated_orientation: Quat,
    /// Orientation when added to the world.
    pub initial_orientation: Quat,

    /// Linear velocity.
    pub velocity: Vec3,
    /// Linear velocity when added to the world.
    pub initial_velocity: Vec3,
    /// Angular velocity.
    pub angular_velocity: Vec3,
    /// Angular velocity when added to the world.
    pub initial_angular_velocity: Vec3,
    /// Accumulated force, cleared after each step.
    pub force: Vec3,
    /// Accumulated torque, cleared after each step.
    pub torque: Vec3,

    /// Per-axis multiplier on linear motion.
    pub linear_factor: Vec3,
    /// Per-axis multiplier on angular motion.
    pub angular_factor: Vec3,
    /// Fraction of linear velocity lost per second.
    pub linear_damping: f32,
    /// Fraction of angular velocity lost per second.
    pub angular_damping: f32,

    /// Group bits this body belongs to.
    pub collision_filter_group: u32,
    /// Group bits this body collides with.
    pub collision_filter_mask: u32,
    /// When false, contacts are reported but not resolved.
    pub collision_response: bool,
    /// Triggers report overlaps and never produce contact forces.
    pub is_trigger: bool,
    /// Material used when shapes carry none.
    pub material: Option<Material>,

    /// Whether this body may fall asleep.
    pub allow_sleep: bool,
    /// Current sleep state.
    pub sleep_state: SleepState,
    /// Speed under which the body counts as resting.
    pub sleep_speed_limit: f32,
    /// Seconds of rest before falling asleep.
    pub sleep_time_limit: f32,
    pub(crate) time_last_sleepy: f32,
    pub(crate) wake_up_after_narrowphase: bool,

    mass: f32,
    inv_mass: f32,
    inertia: Vec3,
    inv_inertia: Vec3,
    inv_inertia_world: Mat3,
    fixed_rotation: bool,

    pub(crate) inv_mass_solve: f32,
    pub(crate) inv_inertia_world_solve: Mat3,
    pub(crate) vlambda: Vec3,
    pub(crate) wlambda: Vec3,

    shapes: Vec<ShapeAttachment>,
    aabb: Aabb,
    aabb_needs_update: bool,
    bounding_radius: f32,
}

impl Body {
    /// A body of the given mass. Zero mass makes it static.
    pub fn new(mass: f32) -> Self {
        let mass = mass.max(0.0);
        let mut body = Self {
            id: BodyId(NEXT_BODY_ID.fetch_add(1, Ordering::Relaxed)),
            body_type: if mass > 0.0 {
                BodyType::Dynamic
            } else {
                BodyType::Static
            },
            position: Vec3::ZERO,
            previous_position: Vec3::ZERO,
            interpolated_position: Vec3::ZERO,
            initial_position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            previous_orientation: Quat::IDENTITY,
            interpolated_orientation: Quat::IDENTITY,
            initial_orientation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            initial_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            initial_angular_velocity: Vec3::ZERO,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            linear_factor: Vec3::ONE,
            angular_factor: Vec3::ONE,
            linear_damping: 0.01,
            angular_damping: 0.01,
            collision_filter_group: 1,
            collision_filter_mask: u32::MAX,
            collision_response: true,
            is_trigger: false,
            material: None,
            allow_sleep: true,
            sleep_state: SleepState::Awake,
            sleep_speed_limit: 0.1,
            sleep_time_limit: 1.0,
            time_last_sleepy: 0.0,
            wake_up_after_narrowphase: false,
            mass,
            inv_mass: 0.0,
            inertia: Vec3::ZERO,
            inv_inertia: Vec3::ZERO,
            inv_inertia_world: Mat3::ZERO,
            fixed_rotation: false,
            inv_mass_solve: 0.0,
            inv_inertia_world_solve: Mat3::ZERO,
            vlambda: Vec3::ZERO,
            wlambda: Vec3::ZERO,
            shapes: Vec::new(),
            aabb: Aabb::default(),
            aabb_needs_update: true,
            bounding_radius: 0.0,
        };
        body.update_mass_properties();
        body
    }

    /// A static body with no mass.
    pub fn new_static() -> Self {
        Self::new(0.0)
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_type(mut self, body_type: BodyType) -> Self {
        self.body_type = body_type;
        self.update_mass_properties();
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.set_position(position);
        self
    }

    pub fn with_orientation(mut self, orientation: Quat) -> Self {
        self.set_orientation(orientation);
        self
    }

    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_angular_velocity(mut self, angular_velocity: Vec3) -> Self {
        self.angular_velocity = angular_velocity;
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = Some(material);
        self
    }

    pub fn with_damping(mut self, linear: f32, angular: f32) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    pub fn with_filter(mut self, group: u32, mask: u32) -> Self {
        self.collision_filter_group = group;
        self.collision_filter_mask = mask;
        self
    }

    pub fn with_fixed_rotation(mut self, fixed: bool) -> Self {
        self.fixed_rotation = fixed;
        self.update_mass_properties();
        self
    }

    pub fn with_linear_factor(mut self, factor: Vec3) -> Self {
        self.linear_factor = factor;
        self
    }

    pub fn with_angular_factor(mut self, factor: Vec3) -> Self {
        self.angular_factor = factor;
        self
    }

    /// Sets the sleep speed and time limits.
    pub fn with_sleep_limits(mut self, speed_limit: f32, time_limit: f32) -> Self {
        self.sleep_speed_limit = speed_limit;
        self.sleep_time_limit = time_limit;
        self
    }

    pub fn with_allow_sleep(mut self, allow: bool) -> Self {
        self.allow_sleep = allow;
        self
    }

    pub fn with_trigger(mut self, is_trigger: bool) -> Self {
        self.is_trigger = is_trigger;
        self
    }

    pub fn with_collision_response(mut self, response: bool) -> Self {
        self.collision_response = response;
        self
    }

    /// Attaches a shape at the body origin.
    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.add_shape(shape, Vec3::ZERO, Quat::IDENTITY);
        self
    }

    /// Attaches a shape with a local pose.
    pub fn with_shape_at(mut self, shape: Shape, offset: Vec3, orientation: Quat) -> Self {
        self.add_shape(shape, offset, orientation);
        self
    }

    // ========================================================================
    // Pose and shapes
    // ========================================================================

    /// Teleports the body; the interpolation history is reset.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.previous_position = position;
        self.interpolated_position = position;
        self.aabb_needs_update = true;
    }

    /// Sets the orientation; the interpolation history is reset.
    pub fn set_orientation(&mut self, orientation: Quat) {
        self.orientation = orientation;
        self.previous_orientation = orientation;
        self.interpolated_orientation = orientation;
        self.aabb_needs_update = true;
        self.update_inertia_world(true);
    }

    /// Attaches a shape and recomputes mass properties and bounds.
    pub fn add_shape(&mut self, shape: Shape, offset: Vec3, orientation: Quat) -> usize {
        self.shapes.push(ShapeAttachment {
            shape,
            offset,
            orientation,
        });
        self.update_mass_properties();
        self.update_bounding_radius();
        self.aabb_needs_update = true;
        self.shapes.len() - 1
    }

    /// Detaches a shape. Warns and returns `None` if the body does not own it.
    pub fn remove_shape(&mut self, id: ShapeId) -> Option<ShapeAttachment> {
        let Some(index) = self.shapes.iter().position(|s| s.shape.id == id) else {
            warn!(body = self.id.0, shape = id.0, "shape does not belong to the body");
            return None;
        };
        let removed = self.shapes.remove(index);
        self.update_mass_properties();
        self.update_bounding_radius();
        self.aabb_needs_update = true;
        Some(removed)
    }

    /// Attached shapes.
    pub fn shapes(&self) -> &[ShapeAttachment] {
        &self.shapes
    }

    /// Mutable access to shapes. Call [`Body::update_mass_properties`] and
    /// [`Body::update_bounding_radius`] after changing geometry.
    pub fn shapes_mut(&mut self) -> &mut [ShapeAttachment] {
        self.aabb_needs_update = true;
        &mut self.shapes
    }

    pub fn shape(&self, id: ShapeId) -> Option<&ShapeAttachment> {
        self.shapes.iter().find(|s| s.shape.id == id)
    }

    /// Radius around the body origin enclosing every shape.
    pub fn bounding_radius(&self) -> f32 {
        self.bounding_radius
    }

    pub fn update_bounding_radius(&mut self) {
        self.bounding_radius = self
            .shapes
            .iter()
            .map(|s| s.offset.length() + s.shape.bounding_sphere_radius())
            .fold(0.0, f32::max);
    }

    /// Bounds of every shape, refreshed if the pose changed.
    pub fn aabb(&mut self) -> Aabb {
        if self.aabb_needs_update {
            self.update_aabb();
        }
        self.aabb
    }

    /// The cached bounds without refreshing; check [`Body::aabb_needs_update`].
    pub fn cached_aabb(&self) -> Aabb {
        self.aabb
    }

    pub fn aabb_needs_update(&self) -> bool {
        self.aabb_needs_update
    }

    /// Marks the cached bounds stale.
    pub fn invalidate_aabb(&mut self) {
        self.aabb_needs_update = true;
    }

    /// Recomputes the union of shape bounds at the current pose.
    pub fn update_aabb(&mut self) {
        let mut aabb = Aabb::empty();
        for s in &self.shapes {
            let (pos, rot) = s.world_pose(self.position, self.orientation);
            aabb.extend(&s.shape.world_aabb(pos, rot));
        }
        self.aabb = if self.shapes.is_empty() {
            Aabb::new(self.position, self.position)
        } else {
            aabb
        };
        self.aabb_needs_update = false;
    }

    // ========================================================================
    // Mass properties
    // ========================================================================

    pub fn mass(&self) -> f32 {
        self.mass
    }

    /// Inverse mass; zero for static and kinematic bodies.
    pub fn inv_mass(&self) -> f32 {
        self.inv_mass
    }

    pub fn inertia(&self) -> Vec3 {
        self.inertia
    }

    pub fn inv_inertia(&self) -> Vec3 {
        self.inv_inertia
    }

    pub fn inv_inertia_world(&self) -> Mat3 {
        self.inv_inertia_world
    }

    pub fn fixed_rotation(&self) -> bool {
        self.fixed_rotation
    }

    /// Changes the mass. Bodies made massless become static.
    pub fn set_mass(&mut self, mass: f32) {
        self.mass = mass.max(0.0);
        if self.mass == 0.0 && self.body_type == BodyType::Dynamic {
            self.body_type = BodyType::Static;
        }
        self.update_mass_properties();
    }

    /// Recomputes inverse mass and inertia from the shapes.
    ///
    /// A single shape at the origin contributes its own inertia; otherwise
    /// the box inertia of the combined local bounds is used.
    pub fn update_mass_properties(&mut self) {
        let dynamic = self.body_type == BodyType::Dynamic;
        self.inv_mass = if dynamic && self.mass > 0.0 {
            1.0 / self.mass
        } else {
            0.0
        };

        self.inertia = match self.shapes.as_slice() {
            [] => Vec3::ZERO,
            [single] if single.offset == Vec3::ZERO && single.orientation == Quat::IDENTITY => {
                single.shape.local_inertia(self.mass)
            }
            shapes => {
                let mut local = Aabb::empty();
                for s in shapes {
                    local.extend(&s.shape.world_aabb(s.offset, s.orientation));
                }
                let e = local.size();
                let (x2, y2, z2) = (e.x * e.x, e.y * e.y, e.z * e.z);
                Vec3::new(y2 + z2, x2 + z2, x2 + y2) * (self.mass / 12.0)
            }
        };
        if !self.inertia.is_finite() {
            self.inertia = Vec3::ZERO;
        }

        let invert = |i: f32| {
            if i > 0.0 && dynamic && !self.fixed_rotation {
                1.0 / i
            } else {
                0.0
            }
        };
        self.inv_inertia = Vec3::new(
            invert(self.inertia.x),
            invert(self.inertia.y),
            invert(self.inertia.z),
        );
        self.update_inertia_world(true);
    }

    /// Rotates the inverse inertia into world space: `R·I⁻¹·Rᵀ`.
    ///
    /// Skipped for isotropic inertia unless `force` is set.
    pub fn update_inertia_world(&mut self, force: bool) {
        let i = self.inv_inertia;
        if i.x == i.y && i.y == i.z && !force {
            return;
        }
        let r = Mat3::from_quat(self.orientation);
        self.inv_inertia_world = r * Mat3::from_diagonal(i) * r.transpose();
    }

    /// Loads the inverse mass terms the solver uses.
    pub(crate) fn update_solve_mass_properties(&mut self) {
        if self.sleep_state == SleepState::Sleeping || self.body_type == BodyType::Kinematic {
            self.inv_mass_solve = 0.0;
            self.inv_inertia_world_solve = Mat3::ZERO;
        } else {
            self.inv_mass_solve = self.inv_mass;
            self.inv_inertia_world_solve = self.inv_inertia_world;
        }
    }

    // ========================================================================
    // Forces
    // ========================================================================

    /// Applies a world force at a point relative to the centre of mass.
    pub fn apply_force(&mut self, force: Vec3, relative_point: Vec3) {
        if self.body_type != BodyType::Dynamic {
            return;
        }
        self.wake_if_sleeping();
        self.force += force;
        self.torque += relative_point.cross(force);
    }

    /// Applies a body-frame force at a body-frame point.
    pub fn apply_local_force(&mut self, local_force: Vec3, local_point: Vec3) {
        let force = self.orientation * local_force;
        let point = self.orientation * local_point;
        self.apply_force(force, point);
    }

    /// Applies a world torque.
    pub fn apply_torque(&mut self, torque: Vec3) {
        if self.body_type != BodyType::Dynamic {
            return;
        }
        self.wake_if_sleeping();
        self.torque += torque;
    }

    /// Applies a world impulse at a point relative to the centre of mass.
    pub fn apply_impulse(&mut self, impulse: Vec3, relative_point: Vec3) {
        if self.body_type != BodyType::Dynamic {
            return;
        }
        self.wake_if_sleeping();
        self.velocity += impulse * self.inv_mass;
        self.angular_velocity += self.inv_inertia_world * relative_point.cross(impulse);
    }

    /// Applies a body-frame impulse at a body-frame point.
    pub fn apply_local_impulse(&mut self, local_impulse: Vec3, local_point: Vec3) {
        let impulse = self.orientation * local_impulse;
        let point = self.orientation * local_point;
        self.apply_impulse(impulse, point);
    }

    fn wake_if_sleeping(&mut self) {
        if self.sleep_state == SleepState::Sleeping {
            self.wake_up();
        }
    }

    /// Velocity of a world point rigidly attached to the body.
    pub fn velocity_at_world_point(&self, world_point: Vec3) -> Vec3 {
        self.velocity + self.angular_velocity.cross(world_point - self.position)
    }

    pub fn point_to_local_frame(&self, world_point: Vec3) -> Vec3 {
        math::point_to_local_frame(self.position, self.orientation, world_point)
    }

    pub fn point_to_world_frame(&self, local_point: Vec3) -> Vec3 {
        math::point_to_world_frame(self.position, self.orientation, local_point)
    }

    pub fn vector_to_local_frame(&self, world_vector: Vec3) -> Vec3 {
        math::vector_to_local_frame(self.orientation, world_vector)
    }

    pub fn vector_to_world_frame(&self, local_vector: Vec3) -> Vec3 {
        math::vector_to_world_frame(self.orientation, local_vector)
    }

    // ========================================================================
    // Sleep
    // ========================================================================

    pub fn is_sleeping(&self) -> bool {
        self.sleep_state == SleepState::Sleeping
    }

    /// Wakes the body. Returns true if it was asleep.
    pub fn wake_up(&mut self) -> bool {
        let was_sleeping = self.sleep_state == SleepState::Sleeping;
        self.sleep_state = SleepState::Awake;
        self.wake_up_after_narrowphase = false;
        was_sleeping
    }

    /// Puts the body to sleep and zeroes its velocities.
    pub fn sleep(&mut self) {
        self.sleep_state = SleepState::Sleeping;
        self.velocity = Vec3::ZERO;
        self.angular_velocity = Vec3::ZERO;
        self.wake_up_after_narrowphase = false;
    }

    /// Advances the sleep state machine at world time `time`.
    pub fn sleep_tick(&mut self, time: f32) -> Option<SleepTransition> {
        if !self.allow_sleep {
            return None;
        }
        let speed_sq = self.velocity.length_squared() + self.angular_velocity.length_squared();
        let limit_sq = self.sleep_speed_limit * self.sleep_speed_limit;
        match self.sleep_state {
            SleepState::Awake if speed_sq < limit_sq => {
                self.sleep_state = SleepState::Sleepy;
                self.time_last_sleepy = time;
                Some(SleepTransition::BecameSleepy)
            }
            SleepState::Sleepy if speed_sq > limit_sq => {
                self.wake_up();
                Some(SleepTransition::WokeUp)
            }
            SleepState::Sleepy if time - self.time_last_sleepy > self.sleep_time_limit => {
                self.sleep();
                Some(SleepTransition::FellAsleep)
            }
            _ => None,
        }
    }

    // ========================================================================
    // Integration
    // ========================================================================

    /// Semi-implicit Euler step of velocity, position and orientation.
    pub fn integrate(&mut self, dt: f32, quat_normalize: bool, quat_normalize_fast: bool) {
        self.previous_position = self.position;
        self.previous_orientation = self.orientation;

        if self.body_type == BodyType::Static || self.sleep_state == SleepState::Sleeping {
            return;
        }

        self.velocity += self.force * (self.inv_mass * dt) * self.linear_factor;
        self.angular_velocity += (self.inv_inertia_world * self.torque) * dt * self.angular_factor;

        self.position += self.velocity * dt;
        self.orientation = self
            .orientation
            .integrate(self.angular_velocity, dt, self.angular_factor);
        if quat_normalize {
            self.orientation = if quat_normalize_fast {
                self.orientation.normalize_fast()
            } else {
                self.orientation.normalize()
            };
        }

        self.aabb_needs_update = true;
        self.update_inertia_world(false);
    }

    /// Resets pose and velocity to the snapshot taken when added to the world.
    pub fn reset_to_initial(&mut self) {
        self.set_position(self.initial_position);
        self.set_orientation(self.initial_orientation);
        self.velocity = self.initial_velocity;
        self.angular_velocity = self.initial_angular_velocity;
        self.force = Vec3::ZERO;
        self.torque = Vec3::ZERO;
    }

    pub(crate) fn snapshot_initial(&mut self) {
        self.initial_position = self.position;
        self.initial_orientation = self.orientation;
        self.initial_velocity = self.velocity;
        self.initial_angular_velocity = self.angular_velocity;
        self.previous_position = self.position;
        self.previous_orientation = self.orientation;
        self.interpolated_position = self.position;
        self.interpolated_orientation = self.orientation;
    }
}

/// Mutable references to two distinct bodies.
pub(crate) fn pair_mut(bodies: &mut [Body], a: usize, b: usize) -> (&mut Body, &mut Body) {
    debug_assert_ne!(a, b);
    if a < b {
        let (lo, hi) = bodies.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = bodies.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}
