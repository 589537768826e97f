//! Regular-grid terrain shape.

use glam::{Mat3, Quat, Vec3};

use super::convex::ConvexPolyhedron;
use crate::aabb::Aabb;
use crate::error::{PhysicsError, Result};
use crate::math::mat3;

/// A height grid in the local XY plane with heights along local `+Z`.
///
/// `data[x][y]` is the height at `(x·element_size, y·element_size)`. Each grid
/// cell is split into a lower and an upper triangle along its anti-diagonal.
#[derive(Debug, Clone)]
pub struct Heightfield {
    data: Vec<Vec<f32>>,
    element_size: f32,
    min_value: f32,
    max_value: f32,
    bounding_sphere_radius: f32,
}

/// A triangular prism under one half of a grid cell, in heightfield-local space.
#[derive(Debug, Clone)]
pub struct Pillar {
    /// Hull relative to `offset`.
    pub hull: ConvexPolyhedron,
    /// Position of the hull origin in the heightfield frame.
    pub offset: Vec3,
}

impl Heightfield {
    /// Creates a heightfield from a rectangular grid of at least 2×2 samples.
    pub fn new(data: Vec<Vec<f32>>, element_size: f32) -> Result<Self> {
        if element_size <= 0.0 {
            return Err(PhysicsError::InvalidDimension {
                name: "element_size",
                value: element_size,
            });
        }
        if data.len() < 2 || data[0].len() < 2 {
            return Err(PhysicsError::InvalidHeightfield(format!(
                "need at least 2x2 samples, got {}x{}",
                data.len(),
                data.first().map_or(0, Vec::len)
            )));
        }
        let columns = data[0].len();
        if let Some(x) = data.iter().position(|row| row.len() != columns) {
            return Err(PhysicsError::InvalidHeightfield(format!(
                "row {x} has {} samples, expected {columns}",
                data[x].len()
            )));
        }

        let mut hf = Self {
            data,
            element_size,
            min_value: 0.0,
            max_value: 0.0,
            bounding_sphere_radius: 0.0,
        };
        hf.update();
        Ok(hf)
    }

    /// Recomputes cached extrema after editing heights through [`Heightfield::set_height`].
    pub fn update(&mut self) {
        let (min, max) = self.rect_min_max(0, 0, self.size_x() - 1, self.size_y() - 1);
        self.min_value = min;
        self.max_value = max;
        self.update_bounding_sphere_radius();
    }

    /// Recomputes the bounding-sphere radius.
    pub fn update_bounding_sphere_radius(&mut self) {
        let s = self.element_size;
        let extent = Vec3::new(
            self.size_x() as f32 * s,
            self.size_y() as f32 * s,
            self.max_value.abs().max(self.min_value.abs()),
        );
        self.bounding_sphere_radius = extent.length();
    }

    /// Height samples.
    pub fn data(&self) -> &[Vec<f32>] {
        &self.data
    }

    /// Overwrites one sample. Call [`Heightfield::update`] afterwards.
    pub fn set_height(&mut self, x: usize, y: usize, height: f32) {
        if let Some(h) = self.data.get_mut(x).and_then(|row| row.get_mut(y)) {
            *h = height;
        }
    }

    /// Distance between neighbouring samples.
    pub fn element_size(&self) -> f32 {
        self.element_size
    }

    /// Number of samples along X.
    pub fn size_x(&self) -> usize {
        self.data.len()
    }

    /// Number of samples along Y.
    pub fn size_y(&self) -> usize {
        self.data[0].len()
    }

    /// Lowest sample.
    pub fn min_value(&self) -> f32 {
        self.min_value
    }

    /// Highest sample.
    pub fn max_value(&self) -> f32 {
        self.max_value
    }

    pub fn bounding_sphere_radius(&self) -> f32 {
        self.bounding_sphere_radius
    }

    /// Minimum and maximum height over the inclusive sample rectangle.
    pub fn rect_min_max(&self, min_x: usize, min_y: usize, max_x: usize, max_y: usize) -> (f32, f32) {
        let mut lo = f32::MAX;
        let mut hi = f32::MIN;
        for row in &self.data[min_x..=max_x.min(self.size_x() - 1)] {
            for &h in &row[min_y..=max_y.min(self.size_y() - 1)] {
                lo = lo.min(h);
                hi = hi.max(h);
            }
        }
        (lo, hi)
    }

    /// Cell containing the local point `(x, y)`.
    ///
    /// With `clamp`, points outside the grid map to the nearest border cell;
    /// otherwise they yield `None`.
    pub fn index_of_position(&self, x: f32, y: f32, clamp: bool) -> Option<(usize, usize)> {
        let max_x = (self.size_x() - 2) as f32;
        let max_y = (self.size_y() - 2) as f32;
        let xi = (x / self.element_size).floor();
        let yi = (y / self.element_size).floor();
        if clamp {
            return Some((xi.clamp(0.0, max_x) as usize, yi.clamp(0.0, max_y) as usize));
        }
        if xi < 0.0 || yi < 0.0 || xi > max_x || yi > max_y {
            return None;
        }
        Some((xi as usize, yi as usize))
    }

    /// Corners of the lower or upper triangle of a cell, in local space.
    pub fn triangle_at(&self, xi: usize, yi: usize, upper: bool) -> [Vec3; 3] {
        let s = self.element_size;
        let p = |x: usize, y: usize| Vec3::new(x as f32 * s, y as f32 * s, self.data[x][y]);
        if upper {
            [p(xi + 1, yi + 1), p(xi, yi + 1), p(xi + 1, yi)]
        } else {
            [p(xi, yi), p(xi + 1, yi), p(xi, yi + 1)]
        }
    }

    /// Interpolated surface height at local `(x, y)`, clamped to the grid.
    pub fn height_at(&self, x: f32, y: f32) -> Result<f32> {
        let Some((xi, yi)) = self.index_of_position(x, y, true) else {
            return Ok(self.min_value);
        };
        let s = self.element_size;
        let u = x / s - xi as f32;
        let v = y / s - yi as f32;
        let [a, b, c] = self.triangle_at(xi, yi, u + v > 1.0);

        // Plane z = k·x + l·y + m through the three corners.
        let system = Mat3::from_cols(
            Vec3::new(a.x, b.x, c.x),
            Vec3::new(a.y, b.y, c.y),
            Vec3::ONE,
        );
        let coeffs = mat3::solve(system, Vec3::new(a.z, b.z, c.z))?;
        Ok(coeffs.x * x + coeffs.y * y + coeffs.z)
    }

    /// Local bounds of one cell, including the lowest sample of the field.
    pub fn aabb_at_index(&self, xi: usize, yi: usize) -> Aabb {
        let s = self.element_size;
        let (_, hi) = self.rect_min_max(xi, yi, xi + 1, yi + 1);
        Aabb::new(
            Vec3::new(xi as f32 * s, yi as f32 * s, self.min_value),
            Vec3::new((xi + 1) as f32 * s, (yi + 1) as f32 * s, hi),
        )
    }

    /// Bounds of the whole field in its own frame.
    pub fn local_aabb(&self) -> Aabb {
        let s = self.element_size;
        Aabb::new(
            Vec3::new(0.0, 0.0, self.min_value),
            Vec3::new(
                (self.size_x() - 1) as f32 * s,
                (self.size_y() - 1) as f32 * s,
                self.max_value,
            ),
        )
    }

    pub fn world_aabb(&self, position: Vec3, orientation: Quat) -> Aabb {
        self.local_aabb().transformed(position, orientation)
    }

    /// Builds the prism under the lower or upper triangle of cell `(xi, yi)`.
    ///
    /// The prism reaches one unit below the midpoint between the cell's
    /// lowest corner and the field minimum.
    pub fn convex_triangle_pillar(&self, xi: usize, yi: usize, upper: bool) -> Result<Pillar> {
        let d = &self.data;
        let s = self.element_size;
        let cell_min = d[xi][yi]
            .min(d[xi + 1][yi])
            .min(d[xi][yi + 1])
            .min(d[xi + 1][yi + 1]);
        let h = (cell_min - self.min_value) / 2.0 + self.min_value;
        let bottom = -h.abs() - 1.0;

        let (offset, vertices, faces) = if upper {
            (
                Vec3::new((xi as f32 + 0.75) * s, (yi as f32 + 0.75) * s, h),
                vec![
                    Vec3::new(0.25 * s, 0.25 * s, d[xi + 1][yi + 1] - h),
                    Vec3::new(-0.75 * s, 0.25 * s, d[xi][yi + 1] - h),
                    Vec3::new(0.25 * s, -0.75 * s, d[xi + 1][yi] - h),
                    Vec3::new(0.25 * s, 0.25 * s, bottom),
                    Vec3::new(-0.75 * s, 0.25 * s, bottom),
                    Vec3::new(0.25 * s, -0.75 * s, bottom),
                ],
                vec![
                    vec![0, 1, 2],
                    vec![5, 4, 3],
                    vec![2, 5, 3, 0],
                    vec![0, 3, 4, 1],
                    vec![1, 4, 5, 2],
                ],
            )
        } else {
            (
                Vec3::new((xi as f32 + 0.25) * s, (yi as f32 + 0.25) * s, h),
                vec![
                    Vec3::new(-0.25 * s, -0.25 * s, d[xi][yi] - h),
                    Vec3::new(0.75 * s, -0.25 * s, d[xi + 1][yi] - h),
                    Vec3::new(-0.25 * s, 0.75 * s, d[xi][yi + 1] - h),
                    Vec3::new(-0.25 * s, -0.25 * s, bottom),
                    Vec3::new(0.75 * s, -0.25 * s, bottom),
                    Vec3::new(-0.25 * s, 0.75 * s, bottom),
                ],
                vec![
                    vec![0, 1, 2],
                    vec![5, 4, 3],
                    vec![0, 2, 5, 3],
                    vec![1, 0, 3, 4],
                    vec![4, 5, 2, 1],
                ],
            )
        };

        let hull = ConvexPolyhedron::build(vertices, faces, None, false)?;
        Ok(Pillar { hull, offset })
    }

    /// Inclusive cell range overlapping a local circle of `radius` around
    /// `(x, y)`, padded by one cell, or `None` when it misses the grid.
    pub(crate) fn cell_range(&self, x: f32, y: f32, radius: f32) -> Option<(usize, usize, usize, usize)> {
        let s = self.element_size;
        let last_x = self.size_x() as i64 - 1;
        let last_y = self.size_y() as i64 - 1;
        let min_x = ((x - radius) / s).floor() as i64 - 1;
        let max_x = ((x + radius) / s).ceil() as i64 + 1;
        let min_y = ((y - radius) / s).floor() as i64 - 1;
        let max_y = ((y + radius) / s).ceil() as i64 + 1;
        if max_x < 0 || max_y < 0 || min_x > last_x || min_y > last_y {
            return None;
        }
        Some((
            min_x.clamp(0, last_x) as usize,
            min_y.clamp(0, last_y) as usize,
            max_x.clamp(0, last_x) as usize,
            max_y.clamp(0, last_y) as usize,
        ))
    }
}
