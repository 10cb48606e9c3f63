//! 接触流形
//!
//! 蒙皮网格每一步都会变形，所以流形不跨帧保留：每次碰撞检测前清空重建。

use glam::Vec3;
use smallvec::SmallVec;

#[derive(Clone, Copy, Debug, Default)]
pub struct ManifoldPoint {
    pub position_world_on_a: Vec3,
    pub position_world_on_b: Vec3,
    /// 从 B 指向 A
    pub normal_world_on_b: Vec3,
    /// 负值表示穿透
    pub distance: f32,
    pub combined_friction: f32,
    pub combined_restitution: f32,
    pub combined_rolling_friction: f32,
    /// 求解后写回，便于调试/统计
    pub applied_impulse: f32,
}

/// 两个刚体（骨骼）之间的接触点集合
#[derive(Clone, Debug)]
pub struct PersistentManifold {
    /// 世界刚体索引
    pub body_a: usize,
    pub body_b: usize,
    pub points: SmallVec<[ManifoldPoint; 4]>,
}

impl PersistentManifold {
    pub fn new(body_a: usize, body_b: usize) -> Self {
        Self { body_a, body_b, points: SmallVec::new() }
    }

    pub fn add_point(&mut self, point: ManifoldPoint) {
        self.points.push(point);
    }

    pub fn num_contacts(&self) -> usize {
        self.points.len()
    }
}
