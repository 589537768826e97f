//! Ray casting against bodies and their shapes.

use glam::{Quat, Vec3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::aabb::Aabb;
use crate::body::{Body, BodyId};
use crate::broadphase::Broadphase;
use crate::shape::{ConvexPolyhedron, Heightfield, Shape, ShapeGeometry, ShapeId, Trimesh, point_in_triangle};

/// How many hits a ray reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RaycastMode {
    /// The nearest hit.
    #[default]
    Closest,
    /// The first hit found, in no particular order.
    Any,
    /// Every hit, passed to a callback.
    All,
}

/// Filtering for a ray query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastOptions {
    pub collision_filter_group: u32,
    pub collision_filter_mask: u32,
    /// Ignore faces whose normal points along the ray.
    pub skip_backfaces: bool,
    /// Ignore bodies and shapes with collision response turned off.
    pub check_collision_response: bool,
}

impl Default for RaycastOptions {
    fn default() -> Self {
        Self {
            collision_filter_group: u32::MAX,
            collision_filter_mask: u32::MAX,
            skip_backfaces: false,
            check_collision_response: true,
        }
    }
}

/// A ray hit.
#[derive(Debug, Clone, PartialEq)]
pub struct RaycastResult {
    pub ray_from: Vec3,
    pub ray_to: Vec3,
    pub hit_normal: Vec3,
    pub hit_point: Vec3,
    pub has_hit: bool,
    pub body: Option<BodyId>,
    /// Index of the body in the world at the time of the query.
    pub body_index: Option<usize>,
    pub shape: Option<ShapeId>,
    /// Face or triangle index for hulls, heightfield pillars and meshes.
    pub hit_face_index: Option<usize>,
    /// Distance from `ray_from`; -1 without a hit.
    pub distance: f32,
    /// Set to end the query early.
    pub should_stop: bool,
}

impl Default for RaycastResult {
    fn default() -> Self {
        Self {
            ray_from: Vec3::ZERO,
            ray_to: Vec3::ZERO,
            hit_normal: Vec3::ZERO,
            hit_point: Vec3::ZERO,
            has_hit: false,
            body: None,
            body_index: None,
            shape: None,
            hit_face_index: None,
            distance: -1.0,
            should_stop: false,
        }
    }
}

impl RaycastResult {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Stops an [`RaycastMode::All`] query after the current hit.
    pub fn abort(&mut self) {
        self.should_stop = true;
    }
}

/// A segment query from `from` to `to`.
#[derive(Debug, Clone)]
pub struct Ray {
    pub from: Vec3,
    pub to: Vec3,
    pub mode: RaycastMode,
    pub options: RaycastOptions,
    /// Dot products below this count as parallel.
    pub precision: f32,
    direction: Vec3,
    result: RaycastResult,
    has_hit: bool,
}

/// Hit callback for [`RaycastMode::All`].
pub type HitCallback<'a> = dyn FnMut(&mut RaycastResult) + 'a;

impl Ray {
    pub fn new(from: Vec3, to: Vec3) -> Self {
        Self {
            from,
            to,
            mode: RaycastMode::Closest,
            options: RaycastOptions::default(),
            precision: 1e-4,
            direction: (to - from).normalize_or_zero(),
            result: RaycastResult::default(),
            has_hit: false,
        }
    }

    pub fn with_mode(mut self, mode: RaycastMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_options(mut self, options: RaycastOptions) -> Self {
        self.options = options;
        self
    }

    /// The result of the last query.
    pub fn result(&self) -> &RaycastResult {
        &self.result
    }

    pub fn has_hit(&self) -> bool {
        self.has_hit
    }

    fn reset(&mut self) {
        self.direction = (self.to - self.from).normalize_or_zero();
        self.result.reset();
        self.result.ray_from = self.from;
        self.result.ray_to = self.to;
        self.has_hit = false;
    }

    /// Bounds of the segment.
    pub fn aabb(&self) -> Aabb {
        Aabb::new(self.from.min(self.to), self.from.max(self.to))
    }

    /// Tests every body whose bounds the segment's bounds overlap.
    pub fn intersect_world(
        &mut self,
        bodies: &mut [Body],
        broadphase: &mut dyn Broadphase,
        on_hit: &mut HitCallback<'_>,
    ) -> bool {
        self.reset();
        let mut candidates = Vec::new();
        broadphase.aabb_query(bodies, &self.aabb(), &mut candidates);
        for index in candidates {
            self.intersect_body_at(&bodies[index], index, on_hit);
            if self.result.should_stop {
                break;
            }
        }
        self.has_hit
    }

    /// Tests a single body, keeping earlier results of this query.
    pub fn intersect_body(&mut self, body: &Body, on_hit: &mut HitCallback<'_>) -> bool {
        self.reset();
        self.intersect_body_at(body, 0, on_hit);
        self.has_hit
    }

    fn intersect_body_at(&mut self, body: &Body, index: usize, on_hit: &mut HitCallback<'_>) {
        let opts = self.options;
        if opts.check_collision_response && !body.collision_response {
            return;
        }
        if opts.collision_filter_group & body.collision_filter_mask == 0
            || body.collision_filter_group & opts.collision_filter_mask == 0
        {
            return;
        }
        for attachment in body.shapes() {
            let shape = &attachment.shape;
            if opts.check_collision_response && !shape.collision_response {
                continue;
            }
            if opts.collision_filter_group & shape.collision_filter_mask == 0
                || shape.collision_filter_group & opts.collision_filter_mask == 0
            {
                continue;
            }
            let (position, orientation) = attachment.world_pose(body.position, body.orientation);
            let hit = HitTarget {
                body: body.id,
                index,
                shape: shape.id,
            };
            self.intersect_shape(shape, position, orientation, hit, on_hit);
            if self.result.should_stop {
                break;
            }
        }
    }

    /// Distance from `point` to the ray's supporting line.
    fn distance_from_line(&self, point: Vec3) -> f32 {
        let along = (point - self.from).dot(self.direction);
        point.distance(self.from + self.direction * along)
    }

    fn intersect_shape(
        &mut self,
        shape: &Shape,
        position: Vec3,
        orientation: Quat,
        hit: HitTarget,
        on_hit: &mut HitCallback<'_>,
    ) {
        if self.distance_from_line(position) > shape.bounding_sphere_radius() {
            return;
        }
        match &shape.geometry {
            ShapeGeometry::Sphere { radius } => self.intersect_sphere(*radius, position, hit, on_hit),
            ShapeGeometry::Plane => self.intersect_plane(position, orientation, hit, on_hit),
            ShapeGeometry::Box(b) => self.intersect_convex(b.hull(), position, orientation, None, hit, on_hit),
            ShapeGeometry::ConvexPolyhedron(c) => self.intersect_convex(c, position, orientation, None, hit, on_hit),
            ShapeGeometry::Cylinder(c) => {
                self.intersect_convex(c.hull(), position, orientation, None, hit, on_hit)
            }
            ShapeGeometry::Heightfield(h) => self.intersect_heightfield(h, position, orientation, hit, on_hit),
            ShapeGeometry::Trimesh(t) => self.intersect_trimesh(t, position, orientation, hit, on_hit),
            ShapeGeometry::Particle => {}
        }
    }

    fn intersect_sphere(&mut self, radius: f32, center: Vec3, hit: HitTarget, on_hit: &mut HitCallback<'_>) {
        let d = self.to - self.from;
        let a = d.length_squared();
        let b = 2.0 * d.dot(self.from - center);
        let c = (self.from - center).length_squared() - radius * radius;
        let delta = b * b - 4.0 * a * c;
        if delta < 0.0 || a == 0.0 {
            return;
        }
        let root = delta.sqrt();
        let (t1, t2) = ((-b - root) / (2.0 * a), (-b + root) / (2.0 * a));
        for t in [t1, t2] {
            if (0.0..=1.0).contains(&t) {
                let point = self.from + d * t;
                let normal = (point - center).normalize_or_zero();
                self.report(normal, point, hit, None, on_hit);
                if self.result.should_stop || delta == 0.0 {
                    return;
                }
            }
        }
    }

    fn intersect_plane(
        &mut self,
        position: Vec3,
        orientation: Quat,
        hit: HitTarget,
        on_hit: &mut HitCallback<'_>,
    ) {
        let normal = orientation * Vec3::Z;
        let from_side = normal.dot(self.from - position);
        let to_side = normal.dot(self.to - position);
        if from_side * to_side > 0.0 {
            return;
        }
        if self.from.distance(self.to) < from_side {
            return;
        }
        let n_dot_dir = normal.dot(self.direction);
        if n_dot_dir.abs() < self.precision {
            return;
        }
        let t = -from_side / n_dot_dir;
        let point = self.from + self.direction * t;
        self.report(normal, point, hit, None, on_hit);
    }

    /// Per-face plane test plus a triangle-fan containment test. `faces`
    /// restricts the faces tested.
    #[allow(clippy::too_many_arguments)]
    fn intersect_convex(
        &mut self,
        hull: &ConvexPolyhedron,
        position: Vec3,
        orientation: Quat,
        faces: Option<&[usize]>,
        hit: HitTarget,
        on_hit: &mut HitCallback<'_>,
    ) {
        let from_to_distance = self.from.distance(self.to);
        let world = |v: Vec3| orientation * v + position;
        let all: Vec<usize>;
        let face_list = match faces {
            Some(list) => list,
            None => {
                all = (0..hull.faces().len()).collect();
                &all
            }
        };

        for &fi in face_list {
            let face = &hull.faces()[fi];
            let normal = orientation * hull.face_normals()[fi];
            let a = world(hull.vertices()[face[0]]);
            let dot = self.direction.dot(normal);
            if dot.abs() < self.precision {
                continue;
            }
            let scalar = normal.dot(a - self.from) / dot;
            if scalar < 0.0 {
                continue;
            }
            let point = self.from + self.direction * scalar;
            let distance = point.distance(self.from);
            if distance > from_to_distance {
                continue;
            }
            for k in 1..face.len() - 1 {
                if self.result.should_stop {
                    return;
                }
                let b = world(hull.vertices()[face[k]]);
                let c = world(hull.vertices()[face[k + 1]]);
                if point_in_triangle(point, a, b, c) || point_in_triangle(point, b, a, c) {
                    self.report(normal, point, hit, Some(fi), on_hit);
                    break;
                }
            }
        }
    }

    /// Tests the top face of the pillars in the cells under the ray.
    fn intersect_heightfield(
        &mut self,
        hf: &Heightfield,
        position: Vec3,
        orientation: Quat,
        hit: HitTarget,
        on_hit: &mut HitCallback<'_>,
    ) {
        let inv = orientation.conjugate();
        let local_from = inv * (self.from - position);
        let local_to = inv * (self.to - position);
        let (Some((fx, fy)), Some((tx, ty))) = (
            hf.index_of_position(local_from.x, local_from.y, true),
            hf.index_of_position(local_to.x, local_to.y, true),
        ) else {
            return;
        };

        const TOP_FACE: [usize; 1] = [0];
        for xi in fx.min(tx)..=fx.max(tx) {
            for yi in fy.min(ty)..=fy.max(ty) {
                if self.result.should_stop {
                    return;
                }
                if !hf.aabb_at_index(xi, yi).overlaps_segment(local_from, local_to) {
                    continue;
                }
                for upper in [false, true] {
                    let Ok(pillar) = hf.convex_triangle_pillar(xi, yi, upper) else {
                        continue;
                    };
                    let offset = position + orientation * pillar.offset;
                    self.intersect_convex(&pillar.hull, offset, orientation, Some(&TOP_FACE), hit, on_hit);
                    if self.result.should_stop {
                        return;
                    }
                }
            }
        }
    }

    fn intersect_trimesh(
        &mut self,
        mesh: &Trimesh,
        position: Vec3,
        orientation: Quat,
        hit: HitTarget,
        on_hit: &mut HitCallback<'_>,
    ) {
        let inv = orientation.conjugate();
        let local_from = inv * (self.from - position);
        let local_to = inv * (self.to - position);
        let local_dir = (local_to - local_from).normalize_or_zero();
        let max_distance_sq = local_from.distance_squared(local_to);

        let mut triangles = Vec::new();
        mesh.triangles_on_segment(local_from, local_to, &mut triangles);
        for t in triangles {
            if self.result.should_stop {
                return;
            }
            let t = t as usize;
            let normal = mesh.normal(t);
            let [a, b, c] = mesh.triangle(t);
            let dot = local_dir.dot(normal);
            if dot.abs() < self.precision {
                continue;
            }
            let scalar = normal.dot(a - local_from) / dot;
            if scalar < 0.0 {
                continue;
            }
            let point = local_from + local_dir * scalar;
            if point.distance_squared(local_from) > max_distance_sq {
                continue;
            }
            if !(point_in_triangle(point, b, a, c) || point_in_triangle(point, a, b, c)) {
                continue;
            }
            self.report(orientation * normal, orientation * point + position, hit, Some(t), on_hit);
        }
    }

    fn report(
        &mut self,
        normal: Vec3,
        point: Vec3,
        hit: HitTarget,
        face: Option<usize>,
        on_hit: &mut HitCallback<'_>,
    ) {
        if self.options.skip_backfaces && normal.dot(self.direction) > 0.0 {
            return;
        }
        let distance = self.from.distance(point);
        let result = &mut self.result;
        match self.mode {
            RaycastMode::All => {
                self.has_hit = true;
                result.set(normal, point, hit, face, distance);
                on_hit(result);
            }
            RaycastMode::Closest => {
                if !result.has_hit || distance < result.distance {
                    self.has_hit = true;
                    result.set(normal, point, hit, face, distance);
                }
            }
            RaycastMode::Any => {
                self.has_hit = true;
                result.set(normal, point, hit, face, distance);
                result.should_stop = true;
            }
        }
    }
}

/// What a reported hit belongs to.
#[derive(Debug, Clone, Copy)]
struct HitTarget {
    body: BodyId,
    index: usize,
    shape: ShapeId,
}

impl RaycastResult {
    fn set(&mut self, normal: Vec3, point: Vec3, hit: HitTarget, face: Option<usize>, distance: f32) {
        self.hit_normal = normal;
        self.hit_point = point;
        self.body = Some(hit.body);
        self.body_index = Some(hit.index);
        self.shape = Some(hit.shape);
        self.hit_face_index = face;
        self.distance = distance;
        self.has_hit = true;
    }
}
