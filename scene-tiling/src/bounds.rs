/// Axis-aligned bounds tracking for scene objects and tiles
use glam::DVec3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Create bounds initialised to infinity values, ready for `update`
    pub fn empty() -> Self {
        Self {
            min: DVec3::splat(f64::INFINITY),
            max: DVec3::splat(f64::NEG_INFINITY),
        }
    }

    /// Cube centred on `center` with half-width `half`
    pub fn from_center_half(center: DVec3, half: f64) -> Self {
        Self {
            min: center - DVec3::splat(half),
            max: center + DVec3::splat(half),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Grow bounds to include a point
    pub fn update(&mut self, point: DVec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Grow bounds to include another box
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Get world space dimensions
    pub fn dimensions(&self) -> DVec3 {
        self.max - self.min
    }

    /// True when `other` lies entirely inside (boundaries inclusive)
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
    }

    /// Per-axis largest absolute distance from `center` to either face
    pub fn max_deviation_from(&self, center: DVec3) -> DVec3 {
        (self.min - center).abs().max((self.max - center).abs())
    }
}
