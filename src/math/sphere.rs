//! 包围球

use glam::Vec3;

use super::{Aabb, Transform};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// 包住一组点的近似包围球（包围盒中心 + 最远点距离）
    pub fn from_points(points: &[Vec3]) -> Self {
        if points.is_empty() {
            return Self::default();
        }
        let center = Aabb::from_points(points, 0.0).center();
        let radius = points
            .iter()
            .map(|p| p.distance(center))
            .fold(0.0f32, f32::max);
        Self { center, radius }
    }

    pub fn is_collide(&self, other: &BoundingSphere) -> bool {
        let r = self.radius + other.radius;
        self.center.distance_squared(other.center) <= r * r
    }

    /// 变换到另一个空间，半径随统一缩放变化
    pub fn transformed(&self, t: &Transform) -> Self {
        Self {
            center: t.transform_point(self.center),
            radius: self.radius * t.scale.abs(),
        }
    }

    pub fn aabb(&self, margin: f32) -> Aabb {
        Aabb::from_point(self.center, self.radius + margin)
    }
}
