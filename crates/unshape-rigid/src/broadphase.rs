//! Candidate pair generation.
//!
//! A broadphase returns body index pairs whose bounds overlap. Pairs are
//! ordered `(low, high)` and unique.

use crate::aabb::Aabb;
use crate::body::{Body, BodyType, SleepState};

/// Produces candidate pairs for the narrowphase.
pub trait Broadphase {
    /// Fills `pairs` (cleared first) with candidate body index pairs.
    fn collision_pairs(&mut self, bodies: &mut [Body], pairs: &mut Vec<(usize, usize)>);

    /// Fills `out` (cleared first) with the indices of bodies whose bounds overlap `aabb`.
    fn aabb_query(&mut self, bodies: &mut [Body], aabb: &Aabb, out: &mut Vec<usize>);

    /// The body list changed; cached orderings must be rebuilt.
    fn set_dirty(&mut self);
}

/// Whether two bodies should be tested at all: their filters must accept each
/// other and at least one must be able to move.
pub fn need_broadphase_collision(a: &Body, b: &Body) -> bool {
    if a.collision_filter_group & b.collision_filter_mask == 0
        || b.collision_filter_group & a.collision_filter_mask == 0
    {
        return false;
    }
    let inert = |body: &Body| body.body_type == BodyType::Static || body.sleep_state == SleepState::Sleeping;
    !(inert(a) && inert(b))
}

/// Bounding-sphere overlap of two bodies. Touching spheres count.
pub fn bounding_spheres_overlap(a: &Body, b: &Body) -> bool {
    let r = a.bounding_radius() + b.bounding_radius();
    a.position.distance_squared(b.position) <= r * r
}

/// Overlap test used after filtering: bounding boxes or bounding spheres.
fn intersection_test(bodies: &mut [Body], i: usize, j: usize, use_bounding_boxes: bool) -> bool {
    if use_bounding_boxes {
        let a = bodies[i].aabb();
        let b = bodies[j].aabb();
        a.overlaps(&b)
    } else {
        bounding_spheres_overlap(&bodies[i], &bodies[j])
    }
}

fn make_pairs_unique(pairs: &mut Vec<(usize, usize)>) {
    for p in pairs.iter_mut() {
        if p.0 > p.1 {
            *p = (p.1, p.0);
        }
    }
    pairs.sort_unstable();
    pairs.dedup();
}

fn naive_aabb_query(bodies: &mut [Body], aabb: &Aabb, out: &mut Vec<usize>) {
    out.clear();
    for (i, body) in bodies.iter_mut().enumerate() {
        if body.aabb().overlaps(aabb) {
            out.push(i);
        }
    }
}

// ============================================================================
// Naive
// ============================================================================

/// Tests every pair of bodies.
#[derive(Debug, Clone, Default)]
pub struct NaiveBroadphase {
    /// Compare AABBs instead of bounding spheres.
    pub use_bounding_boxes: bool,
}

impl NaiveBroadphase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Broadphase for NaiveBroadphase {
    fn collision_pairs(&mut self, bodies: &mut [Body], pairs: &mut Vec<(usize, usize)>) {
        pairs.clear();
        let n = bodies.len();
        for i in 0..n {
            for j in 0..i {
                if !need_broadphase_collision(&bodies[i], &bodies[j]) {
                    continue;
                }
                if intersection_test(bodies, i, j, self.use_bounding_boxes) {
                    pairs.push((j, i));
                }
            }
        }
        make_pairs_unique(pairs);
    }

    fn aabb_query(&mut self, bodies: &mut [Body], aabb: &Aabb, out: &mut Vec<usize>) {
        naive_aabb_query(bodies, aabb, out);
    }

    fn set_dirty(&mut self) {}
}

// ============================================================================
// Sweep and prune
// ============================================================================

/// Sorts bodies along one axis and only tests neighbours whose extents overlap
/// on it.
#[derive(Debug, Clone, Default)]
pub struct SapBroadphase {
    /// Sweep axis: 0 = X, 1 = Y, 2 = Z.
    pub axis_index: usize,
    /// Re-pick the axis of largest position variance every step.
    pub auto_detect_axis: bool,
    pub use_bounding_boxes: bool,
    axis_list: Vec<usize>,
    dirty: bool,
}

impl SapBroadphase {
    pub fn new() -> Self {
        Self {
            dirty: true,
            ..Self::default()
        }
    }

    pub fn with_axis(mut self, axis_index: usize) -> Self {
        self.axis_index = axis_index.min(2);
        self
    }

    pub fn with_auto_detect_axis(mut self, auto: bool) -> Self {
        self.auto_detect_axis = auto;
        self
    }

    /// Picks the axis along which body positions vary most.
    pub fn detect_axis(&mut self, bodies: &[Body]) {
        let n = bodies.len();
        if n == 0 {
            return;
        }
        let mut sum = glam::Vec3::ZERO;
        let mut sum_sq = glam::Vec3::ZERO;
        for b in bodies {
            sum += b.position;
            sum_sq += b.position * b.position;
        }
        let inv_n = 1.0 / n as f32;
        let variance = sum_sq * inv_n - (sum * inv_n) * (sum * inv_n);
        self.axis_index = if variance.x >= variance.y && variance.x >= variance.z {
            0
        } else if variance.y >= variance.z {
            1
        } else {
            2
        };
    }

    fn lower(body: &Body, axis: usize) -> f32 {
        body.position[axis] - body.bounding_radius()
    }

    fn upper(body: &Body, axis: usize) -> f32 {
        body.position[axis] + body.bounding_radius()
    }

    fn refresh_list(&mut self, bodies: &[Body]) {
        if self.dirty || self.axis_list.len() != bodies.len() {
            self.axis_list.clear();
            self.axis_list.extend(0..bodies.len());
            self.dirty = false;
        }
        let axis = self.axis_index;
        // Insertion sort: the order barely changes between steps.
        for i in 1..self.axis_list.len() {
            let mut j = i;
            while j > 0
                && Self::lower(&bodies[self.axis_list[j - 1]], axis)
                    > Self::lower(&bodies[self.axis_list[j]], axis)
            {
                self.axis_list.swap(j - 1, j);
                j -= 1;
            }
        }
    }
}

impl Broadphase for SapBroadphase {
    fn collision_pairs(&mut self, bodies: &mut [Body], pairs: &mut Vec<(usize, usize)>) {
        pairs.clear();
        if self.auto_detect_axis {
            self.detect_axis(bodies);
        }
        self.refresh_list(bodies);

        let axis = self.axis_index;
        for a in 0..self.axis_list.len() {
            let i = self.axis_list[a];
            let upper = Self::upper(&bodies[i], axis);
            for &j in &self.axis_list[a + 1..] {
                if Self::lower(&bodies[j], axis) > upper {
                    break;
                }
                if !need_broadphase_collision(&bodies[i], &bodies[j]) {
                    continue;
                }
                if intersection_test(bodies, i, j, self.use_bounding_boxes) {
                    pairs.push((i, j));
                }
            }
        }
        make_pairs_unique(pairs);
    }

    fn aabb_query(&mut self, bodies: &mut [Body], aabb: &Aabb, out: &mut Vec<usize>) {
        naive_aabb_query(bodies, aabb, out);
    }

    fn set_dirty(&mut self) {
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;
    use glam::Vec3;

    fn ball(mass: f32, x: f32) -> Body {
        Body::new(mass)
            .with_shape(Shape::sphere(1.0).unwrap())
            .with_position(Vec3::new(x, 0.0, 0.0))
    }

    #[test]
    fn test_filter_mask_rejects() {
        let a = ball(1.0, 0.0).with_filter(2, !4);
        let b = ball(1.0, 0.5).with_filter(4, u32::MAX);
        assert!(!need_broadphase_collision(&a, &b));
        let c = ball(1.0, 0.5).with_filter(8, u32::MAX);
        assert!(need_broadphase_collision(&a, &c));
    }

    #[test]
    fn test_two_inert_bodies_skip() {
        let a = ball(0.0, 0.0);
        let mut b = ball(1.0, 0.5);
        b.sleep();
        assert!(!need_broadphase_collision(&a, &b));
        b.wake_up();
        assert!(need_broadphase_collision(&a, &b));
    }

    #[test]
    fn test_naive_pairs() {
        let mut bodies = vec![ball(1.0, 0.0), ball(1.0, 1.5), ball(1.0, 10.0)];
        let mut pairs = Vec::new();
        NaiveBroadphase::new().collision_pairs(&mut bodies, &mut pairs);
        assert_eq!(pairs, vec![(0, 1)]);

        let mut bb = NaiveBroadphase {
            use_bounding_boxes: true,
        };
        bb.collision_pairs(&mut bodies, &mut pairs);
        assert_eq!(pairs, vec![(0, 1)]);
    }

    #[test]
    fn test_sap_matches_naive() {
        let xs = [4.0, -3.0, 0.0, 1.2, 9.0, 2.5, -1.9];
        let mut bodies: Vec<Body> = xs.iter().map(|&x| ball(1.0, x)).collect();
        let mut naive = Vec::new();
        let mut sap = Vec::new();
        NaiveBroadphase::new().collision_pairs(&mut bodies, &mut naive);
        let mut broadphase = SapBroadphase::new().with_auto_detect_axis(true);
        broadphase.collision_pairs(&mut bodies, &mut sap);
        assert_eq!(broadphase.axis_index, 0);
        assert_eq!(naive, sap);
        assert!(!sap.is_empty());

        bodies[0].position.x = -2.5;
        broadphase.collision_pairs(&mut bodies, &mut sap);
        NaiveBroadphase::new().collision_pairs(&mut bodies, &mut naive);
        assert_eq!(naive, sap);
    }

    #[test]
    fn test_aabb_query() {
        let mut bodies = vec![ball(1.0, 0.0), ball(1.0, 5.0)];
        let mut out = Vec::new();
        let query = Aabb::new(Vec3::new(3.5, -1.0, -1.0), Vec3::new(6.0, 1.0, 1.0));
        SapBroadphase::new().aabb_query(&mut bodies, &query, &mut out);
        assert_eq!(out, vec![1]);
    }
}
