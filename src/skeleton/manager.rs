//! 骨架管理器

use std::collections::HashMap;

use super::{Joint, JointId, JointProvider};
use crate::math::Transform;

/// 名称索引的骨架
#[derive(Clone, Debug, Default)]
pub struct Skeleton {
    joints: Vec<Joint>,
    name_to_index: HashMap<String, usize>,
    /// 按层级排序的索引，父节点在前
    sorted_indices: Vec<usize>,
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加节点，父节点必须先于子节点添加
    pub fn add_joint(&mut self, name: impl Into<String>, parent: Option<usize>, local: Transform) -> JointId {
        let index = self.joints.len();
        let mut joint = Joint::new(name, parent.filter(|&p| p < index), local);
        joint.level = joint.parent.map(|p| self.joints[p].level + 1).unwrap_or(0);
        joint.world_transform = match joint.parent {
            Some(p) => self.joints[p].world_transform * local,
            None => local,
        };
        self.name_to_index.insert(joint.name.clone(), index);
        self.joints.push(joint);

        let level = self.joints[index].level;
        let pos = self.sorted_indices.partition_point(|&i| self.joints[i].level <= level);
        self.sorted_indices.insert(pos, index);
        JointId(index)
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn get_joint(&self, id: JointId) -> Option<&Joint> {
        self.joints.get(id.0)
    }

    /// 设置局部变换（动画），需要随后调用 update_world_transforms
    pub fn set_local_transform(&mut self, id: JointId, local: Transform) {
        if let Some(joint) = self.joints.get_mut(id.0) {
            joint.local_transform = local;
        }
    }

    /// 按层级顺序从局部变换重新计算世界变换
    pub fn update_world_transforms(&mut self) {
        for i in 0..self.sorted_indices.len() {
            let idx = self.sorted_indices[i];
            let world = match self.joints[idx].parent {
                Some(p) => self.joints[p].world_transform * self.joints[idx].local_transform,
                None => self.joints[idx].local_transform,
            };
            self.joints[idx].world_transform = world;
        }
    }

    /// 递归更新子节点的世界变换（不改变局部变换）
    fn update_children_world_transform(&mut self, parent_index: usize) {
        let parent_world = self.joints[parent_index].world_transform;
        let children: Vec<usize> = (0..self.joints.len())
            .filter(|&i| self.joints[i].parent == Some(parent_index))
            .collect();
        for child in children {
            self.joints[child].world_transform = parent_world * self.joints[child].local_transform;
            self.update_children_world_transform(child);
        }
    }
}

impl JointProvider for Skeleton {
    fn find_joint(&self, name: &str) -> Option<JointId> {
        self.name_to_index.get(name).copied().map(JointId)
    }

    fn parent(&self, joint: JointId) -> Option<JointId> {
        self.joints.get(joint.0).and_then(|j| j.parent).map(JointId)
    }

    fn world_transform(&self, joint: JointId) -> Transform {
        self.joints
            .get(joint.0)
            .map(|j| j.world_transform)
            .unwrap_or(Transform::IDENTITY)
    }

    /// 设置世界变换后反推局部变换：local = inverse(parent_world) * world
    fn set_world_transform(&mut self, joint: JointId, transform: Transform) {
        let index = joint.0;
        if index >= self.joints.len() {
            return;
        }
        self.joints[index].world_transform = transform;
        self.joints[index].local_transform = match self.joints[index].parent {
            Some(p) => self.joints[p].world_transform.inverse() * transform,
            None => transform,
        };
        self.update_children_world_transform(index);
    }

    fn depth(&self, joint: JointId) -> usize {
        self.joints.get(joint.0).map(|j| j.level).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use glam::{Quat, Vec3};

    fn chain() -> (Skeleton, JointId, JointId, JointId) {
        let mut sk = Skeleton::new();
        let root = sk.add_joint("root", None, Transform::from_translation(Vec3::new(0.0, 1.0, 0.0)));
        let mid = sk.add_joint("mid", Some(root.0), Transform::from_translation(Vec3::new(0.0, 1.0, 0.0)));
        let tip = sk.add_joint("tip", Some(mid.0), Transform::from_translation(Vec3::new(0.0, 1.0, 0.0)));
        (sk, root, mid, tip)
    }

    #[test]
    fn world_transforms_compose_down_the_chain() {
        let (sk, _, _, tip) = chain();
        assert_eq!(sk.world_transform(tip).translation, Vec3::new(0.0, 3.0, 0.0));
        assert_eq!(sk.depth(tip), 2);
        assert_eq!(sk.find_joint("mid"), Some(JointId(1)));
        assert_eq!(sk.find_joint("missing"), None);
    }

    #[test]
    fn set_world_transform_moves_children() {
        let (mut sk, _, mid, tip) = chain();
        let t = Transform::from_rotation_translation(
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
            Vec3::new(0.0, 2.0, 0.0),
        );
        sk.set_world_transform(mid, t);
        let tip_pos = sk.world_transform(tip).translation;
        // 绕 z 旋转 90°，子节点的 +y 偏移变成 -x
        assert_abs_diff_eq!(tip_pos.x, -1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(tip_pos.y, 2.0, epsilon = 1e-5);

        // 局部变换被反推，重新传播后结果不变
        sk.update_world_transforms();
        let again = sk.world_transform(tip).translation;
        assert_abs_diff_eq!(again.x, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn scale_propagates() {
        let mut sk = Skeleton::new();
        let root = sk.add_joint("root", None, Transform::new(Quat::IDENTITY, Vec3::ZERO, 2.0));
        let child = sk.add_joint("child", Some(root.0), Transform::from_translation(Vec3::X));
        let w = sk.world_transform(child);
        assert_eq!(w.scale, 2.0);
        assert_eq!(w.translation, Vec3::new(2.0, 0.0, 0.0));
    }
}
