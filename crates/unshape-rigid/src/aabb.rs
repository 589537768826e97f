//! Axis-aligned bounding boxes.

use glam::{Quat, Vec3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Vec3::ZERO)
    }
}

impl Aabb {
    /// Creates a new AABB from min and max corners.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// An inverted box that any `extend` or `union` replaces.
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }

    /// Creates an AABB from center and half-extents.
    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Smallest box containing every point.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points.into_iter().fold(Self::empty(), |mut acc, p| {
            acc.extend_point(p);
            acc
        })
    }

    /// Returns the center of the AABB.
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Returns the half-extents of the AABB.
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Returns the size of the AABB.
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Grows the box to contain `point`.
    pub fn extend_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Grows the box to contain `other`.
    pub fn extend(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Returns the union of two AABBs.
    pub fn union(&self, other: &Aabb) -> Aabb {
        let mut out = *self;
        out.extend(other);
        out
    }

    /// Checks if this AABB contains a point.
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// True if `other` lies fully inside this box.
    pub fn contains(&self, other: &Aabb) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }

    /// Checks if this AABB overlaps another one (touching counts).
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// The eight corners.
    pub fn corners(&self) -> [Vec3; 8] {
        let (l, u) = (self.min, self.max);
        [
            Vec3::new(l.x, l.y, l.z),
            Vec3::new(u.x, l.y, l.z),
            Vec3::new(u.x, u.y, l.z),
            Vec3::new(l.x, u.y, l.z),
            Vec3::new(l.x, l.y, u.z),
            Vec3::new(u.x, l.y, u.z),
            Vec3::new(u.x, u.y, u.z),
            Vec3::new(l.x, u.y, u.z),
        ]
    }

    /// Bounds of this box after rotating and translating it.
    pub fn transformed(&self, position: Vec3, orientation: Quat) -> Aabb {
        Aabb::from_points(self.corners().map(|c| orientation * c + position))
    }

    /// Bounds of this box after mapping it into the local frame at `(position, orientation)`.
    pub fn to_local_frame(&self, position: Vec3, orientation: Quat) -> Aabb {
        let inv = orientation.conjugate();
        Aabb::from_points(self.corners().map(|c| inv * (c - position)))
    }

    /// Slab test of the segment `from → to` against this box.
    pub fn overlaps_segment(&self, from: Vec3, to: Vec3) -> bool {
        let dir = to - from;
        let inv = Vec3::ONE / dir;
        let t1 = (self.min - from) * inv;
        let t2 = (self.max - from) * inv;
        let t_min = t1.min(t2);
        let t_max = t1.max(t2);

        // Zero direction components produce NaN/inf; fall back to a containment check.
        let mut lo = 0.0f32;
        let mut hi = 1.0f32;
        for i in 0..3 {
            if dir[i] == 0.0 {
                if from[i] < self.min[i] || from[i] > self.max[i] {
                    return false;
                }
                continue;
            }
            lo = lo.max(t_min[i]);
            hi = hi.min(t_max[i]);
        }
        lo <= hi
    }
}
