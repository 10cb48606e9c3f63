//! 骨架接口
//!
//! 物理核心只通过 `JointProvider` 读写骨架节点的世界变换；
//! `Skeleton` 是 crate 自带的一个简单实现，宿主也可以自行实现该 trait。

mod bone;
mod manager;

pub use bone::Joint;
pub use manager::Skeleton;

use crate::math::Transform;

/// 骨架节点句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JointId(pub usize);

/// 骨架节点提供者
pub trait JointProvider {
    /// 按名称查找节点
    fn find_joint(&self, name: &str) -> Option<JointId>;

    /// 父节点
    fn parent(&self, joint: JointId) -> Option<JointId>;

    /// 世界变换（含统一缩放）
    fn world_transform(&self, joint: JointId) -> Transform;

    /// 写回世界变换，子节点跟随更新
    fn set_world_transform(&mut self, joint: JointId, transform: Transform);

    /// 到根节点的层数，根为 0
    fn depth(&self, joint: JointId) -> usize {
        let mut depth = 0;
        let mut current = joint;
        while let Some(parent) = self.parent(current) {
            depth += 1;
            current = parent;
        }
        depth
    }
}
