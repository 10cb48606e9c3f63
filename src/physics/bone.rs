//! 物理骨骼
//!
//! 一根骨骼 = 一个刚体 + 一个骨架节点。
//! - 运动学骨骼：每步从节点读取变换，刚体跟随
//! - 动态骨骼：刚体由模拟驱动，结果写回节点
//!
//! 节点世界变换带缩放，刚体不带。`rig_to_local` 是刚体相对节点的偏移
//! （节点空间，未缩放），节点缩放变化时偏移随缩放一起变化。

use glam::Vec3;

use super::RigidBody;
use crate::math::Transform;
use crate::skeleton::{JointId, JointProvider};

#[derive(Clone, Debug)]
pub struct SkinnedMeshBone {
    pub name: String,
    pub joint: Option<JointId>,
    pub rig: RigidBody,
    /// 刚体 → 节点局部空间
    pub rig_to_local: Transform,
    pub local_to_rig: Transform,
    /// 节点当前世界变换（含缩放），蒙皮使用
    pub current_transform: Transform,
    pub margin_multiplier: f32,
    pub gravity_factor: f32,
    /// 非空时只与这些骨骼碰撞
    pub can_collide_with_bones: Vec<String>,
    pub no_collide_with_bones: Vec<String>,
    /// 独立碰撞球半径（非蒙皮碰撞对象）
    pub collision_radius: Option<f32>,
}

impl SkinnedMeshBone {
    pub fn new(name: impl Into<String>, joint: Option<JointId>, rig: RigidBody, rig_to_local: Transform) -> Self {
        let rig_to_local = rig_to_local.without_scale();
        Self {
            name: name.into(),
            joint,
            rig,
            rig_to_local,
            local_to_rig: rig_to_local.inverse(),
            current_transform: Transform::IDENTITY,
            margin_multiplier: 1.0,
            gravity_factor: 1.0,
            can_collide_with_bones: Vec::new(),
            no_collide_with_bones: Vec::new(),
            collision_radius: None,
        }
    }

    #[inline]
    pub fn is_kinematic(&self) -> bool {
        self.rig.is_static_or_kinematic()
    }

    /// 节点当前的统一缩放
    #[inline]
    pub fn scale(&self) -> f32 {
        self.current_transform.scale
    }

    /// 节点世界变换 → 刚体世界变换
    ///
    /// 偏移在节点空间里按节点缩放放大，刚体本身不缩放。
    pub fn rig_transform_from(&self, joint_world: &Transform) -> Transform {
        (*joint_world * self.rig_to_local).without_scale()
    }

    /// 刚体世界变换 + 缩放 → 节点世界变换
    pub fn joint_transform_from(&self, rig_world: &Transform, scale: f32) -> Transform {
        let local_to_rig = Transform::new(
            self.local_to_rig.rotation,
            self.local_to_rig.translation * scale,
            1.0,
        );
        (*rig_world * local_to_rig).with_scale(scale)
    }

    /// 从骨架读取节点变换
    ///
    /// 运动学刚体以读到的变换为积分目标；动态刚体只更新缩放。
    pub fn read_transform(&mut self, joints: &dyn JointProvider, dt: f32) {
        let Some(joint) = self.joint else {
            return;
        };
        let world = joints.world_transform(joint);
        if self.is_kinematic() {
            let target = self.rig_transform_from(&world);
            self.rig.set_kinematic_target(target, dt);
            self.current_transform = world;
        } else {
            self.current_transform.scale = world.scale;
        }
    }

    /// 动态骨骼把刚体结果写回节点
    pub fn write_transform(&self, joints: &mut dyn JointProvider) {
        if self.is_kinematic() {
            return;
        }
        if let Some(joint) = self.joint {
            joints.set_world_transform(joint, self.current_transform);
        }
    }

    /// 由刚体变换刷新 current_transform（每个子步积分之后）
    pub fn internal_update(&mut self) {
        let scale = self.scale();
        self.current_transform = self.joint_transform_from(&self.rig.transform, scale);
    }

    /// 瞬移到节点当前位置并清零速度
    pub fn reset_transform(&mut self, joints: &dyn JointProvider) {
        let Some(joint) = self.joint else {
            return;
        };
        let world = joints.world_transform(joint);
        self.rig.teleport(self.rig_transform_from(&world));
        self.current_transform = world;
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.rig.gravity = gravity * self.gravity_factor;
    }

    /// 骨骼级碰撞过滤，双方都要允许
    pub fn can_collide_with(&self, other: &SkinnedMeshBone) -> bool {
        allows(self, &other.name) && allows(other, &self.name)
    }
}

fn allows(bone: &SkinnedMeshBone, other: &str) -> bool {
    if !bone.can_collide_with_bones.is_empty() && !bone.can_collide_with_bones.iter().any(|n| n == other) {
        return false;
    }
    !bone.no_collide_with_bones.iter().any(|n| n == other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::Skeleton;
    use approx::assert_abs_diff_eq;
    use glam::Quat;

    fn bone_on(sk: &Skeleton, name: &str, kinematic: bool) -> SkinnedMeshBone {
        let joint = sk.find_joint(name);
        let rig = RigidBody::new(1.0, Vec3::ONE, Transform::IDENTITY, kinematic);
        SkinnedMeshBone::new(name, joint, rig, Transform::from_translation(Vec3::new(0.0, 0.5, 0.0)))
    }

    #[test]
    fn offset_scales_with_joint() {
        let mut sk = Skeleton::new();
        sk.add_joint("hair", None, Transform::new(Quat::IDENTITY, Vec3::new(1.0, 0.0, 0.0), 2.0));
        let mut bone = bone_on(&sk, "hair", false);
        bone.reset_transform(&sk);
        // 偏移 0.5 按缩放 2 放大
        assert_abs_diff_eq!(bone.rig.transform.translation.y, 1.0, epsilon = 1e-6);
        assert_eq!(bone.rig.transform.scale, 1.0);

        bone.internal_update();
        assert_abs_diff_eq!(bone.current_transform.translation.x, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(bone.current_transform.translation.y, 0.0, epsilon = 1e-6);
        assert_eq!(bone.current_transform.scale, 2.0);
    }

    #[test]
    fn dynamic_bone_writes_back() {
        let mut sk = Skeleton::new();
        let id = sk.add_joint("hair", None, Transform::IDENTITY);
        let mut bone = bone_on(&sk, "hair", false);
        bone.reset_transform(&sk);
        bone.rig.transform.translation += Vec3::new(0.0, 0.0, 3.0);
        bone.internal_update();
        bone.write_transform(&mut sk);
        assert_abs_diff_eq!(sk.world_transform(id).translation.z, 3.0, epsilon = 1e-6);
    }

    #[test]
    fn kinematic_bone_does_not_write() {
        let mut sk = Skeleton::new();
        let id = sk.add_joint("body", None, Transform::IDENTITY);
        let mut bone = bone_on(&sk, "body", true);
        bone.reset_transform(&sk);
        bone.rig.transform.translation = Vec3::splat(9.0);
        bone.internal_update();
        bone.write_transform(&mut sk);
        assert_eq!(sk.world_transform(id).translation, Vec3::ZERO);
    }

    #[test]
    fn bone_filters_are_symmetric() {
        let sk = Skeleton::new();
        let mut a = bone_on(&sk, "a", false);
        let b = bone_on(&sk, "b", false);
        let c = bone_on(&sk, "c", false);
        a.no_collide_with_bones.push("b".into());
        assert!(!a.can_collide_with(&b));
        assert!(!b.can_collide_with(&a));
        assert!(a.can_collide_with(&c));

        a.no_collide_with_bones.clear();
        a.can_collide_with_bones.push("c".into());
        assert!(!a.can_collide_with(&b));
        assert!(a.can_collide_with(&c));
    }
}
