//! 轴对齐包围盒

use glam::Vec3;

/// 轴对齐包围盒
///
/// 空包围盒的 min 为 +inf、max 为 -inf，与任何包围盒都不相交，
/// 合并时作为单位元。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// 以点为中心、半径为 r 的包围盒
    pub fn from_point(p: Vec3, r: f32) -> Self {
        Self { min: p - Vec3::splat(r), max: p + Vec3::splat(r) }
    }

    /// 包住若干点并向外扩展 margin
    pub fn from_points(points: &[Vec3], margin: f32) -> Self {
        let mut aabb = Self::EMPTY;
        for &p in points {
            aabb.min = aabb.min.min(p);
            aabb.max = aabb.max.max(p);
        }
        aabb.expand(margin)
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// 两个包围盒是否重叠（边界接触也算重叠）
    #[inline]
    pub fn collide_with(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
            && self.min.z <= other.max.z
            && other.min.z <= self.max.z
    }

    #[inline]
    pub fn merge(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn merged(mut self, other: &Aabb) -> Aabb {
        self.merge(other);
        self
    }

    pub fn expand(mut self, margin: f32) -> Aabb {
        if !self.is_empty() {
            self.min -= Vec3::splat(margin);
            self.max += Vec3::splat(margin);
        }
        self
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// 平移包围盒（世界原点重定位时使用）
    pub fn translate(&mut self, offset: Vec3) {
        if !self.is_empty() {
            self.min += offset;
            self.max += offset;
        }
    }
}
