//! 骨架节点

use crate::math::Transform;

/// 骨架节点
#[derive(Clone, Debug)]
pub struct Joint {
    pub name: String,
    pub parent: Option<usize>,
    /// 变换层级，父节点一定比子节点小
    pub level: usize,
    /// 相对父节点的变换
    pub local_transform: Transform,
    /// 世界变换
    pub world_transform: Transform,
}

impl Joint {
    pub fn new(name: impl Into<String>, parent: Option<usize>, local_transform: Transform) -> Self {
        Self {
            name: name.into(),
            parent,
            level: 0,
            local_transform,
            world_transform: local_transform,
        }
    }
}
