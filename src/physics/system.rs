//! 蒙皮网格物理系统
//!
//! 一个系统 = 一套骨骼 + 若干蒙皮网格碰撞体 + 骨骼之间的约束，
//! 通常对应一件衣服或一束头发。系统内用索引互相引用，不持有指针。

use glam::Vec3;
use log::debug;

use super::SkinnedMeshBone;
use crate::constraint::{BoneScaleConstraint, ConstraintGroup};
use crate::mesh::SkinnedMeshBody;
use crate::skeleton::JointProvider;

#[derive(Clone, Debug)]
pub struct SkinnedMeshSystem {
    pub name: String,
    pub bones: Vec<SkinnedMeshBone>,
    pub bodies: Vec<SkinnedMeshBody>,
    pub constraints: Vec<BoneScaleConstraint>,
    pub constraint_groups: Vec<ConstraintGroup>,
    /// false 时暂停：不读写骨架，不参与碰撞和求解
    pub active: bool,
    /// 写回骨架的顺序，父节点在前
    write_order: Vec<usize>,
}

impl SkinnedMeshSystem {
    pub fn new(
        name: impl Into<String>,
        bones: Vec<SkinnedMeshBone>,
        bodies: Vec<SkinnedMeshBody>,
        constraints: Vec<BoneScaleConstraint>,
        constraint_groups: Vec<ConstraintGroup>,
        joints: &dyn JointProvider,
    ) -> Self {
        let mut write_order: Vec<usize> = (0..bones.len()).collect();
        write_order.sort_by_key(|&i| bones[i].joint.map_or(0, |j| joints.depth(j)));
        Self {
            name: name.into(),
            bones,
            bodies,
            constraints,
            constraint_groups,
            active: true,
            write_order,
        }
    }

    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        for bone in &mut self.bones {
            bone.set_gravity(gravity);
        }
    }

    /// 从骨架读取节点变换，dt 是本次更新要模拟的总时长
    pub fn read_transform(&mut self, joints: &dyn JointProvider, dt: f32) {
        for bone in &mut self.bones {
            bone.read_transform(joints, dt);
        }
        self.update_bodies();
    }

    /// 动态骨骼写回骨架，父节点先写
    pub fn write_transform(&self, joints: &mut dyn JointProvider) {
        for &i in &self.write_order {
            self.bones[i].write_transform(joints);
        }
    }

    /// 骨骼缩放变化时调整约束，返回被调整的约束数
    pub fn scale_constraints(&mut self) -> usize {
        let bones = &self.bones;
        let changed = self.constraints.iter_mut().map(|c| c.scale_constraint(bones)).filter(|&scaled| scaled).count();
        if changed > 0 {
            debug!("[物理系统] {}: {} 个约束随骨骼缩放调整", self.name, changed);
        }
        changed
    }

    /// 积分之后由刚体刷新骨骼与碰撞体
    pub fn internal_update(&mut self) {
        for bone in &mut self.bones {
            bone.internal_update();
        }
        self.update_bodies();
    }

    fn update_bodies(&mut self) {
        for body in &mut self.bodies {
            body.update_bones(&self.bones);
        }
    }

    /// 瞬移到骨架当前姿势，清零速度和历史
    pub fn reset_transforms(&mut self, joints: &dyn JointProvider) {
        for bone in &mut self.bones {
            bone.reset_transform(joints);
        }
        for body in &mut self.bodies {
            body.reset_history();
        }
        for c in &mut self.constraints {
            c.reset_warm_start();
        }
        self.update_bodies();
    }

    /// 被约束连接的骨骼对（系统内索引，小的在前），它们之间不做碰撞
    pub fn linked_pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.constraints.iter().map(|c| (c.bone_a.min(c.bone_b), c.bone_a.max(c.bone_b)))
    }

    /// 骨骼中心（刚体位置）
    pub fn centroid(&self) -> Option<Vec3> {
        if self.bones.is_empty() {
            return None;
        }
        let sum: Vec3 = self.bones.iter().map(|b| b.rig.transform.translation).sum();
        Some(sum / self.bones.len() as f32)
    }

    /// 平移所有刚体和蒙皮顶点（世界重新居中）
    pub fn translate(&mut self, offset: Vec3) {
        for bone in &mut self.bones {
            bone.rig.translate(offset);
        }
        for body in &mut self.bodies {
            body.translate(offset);
        }
    }
}
