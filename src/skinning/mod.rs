//! 顶点蒙皮计算

mod skinning;

pub use skinning::{compute_skinning, SkinningContext};

use crate::math::Transform;
use crate::mesh::{Vertex, VertexPos};

/// 蒙皮输入数据
pub struct SkinningInput<'a> {
    /// 蒙皮空间顶点
    pub vertices: &'a [Vertex],
    /// 每根影响骨骼的 蒙皮空间 → 世界 变换
    pub bone_transforms: &'a [Transform],
    /// 每根影响骨骼的碰撞边距倍率
    pub margin_multipliers: &'a [f32],
    /// 每根影响骨骼是否为动态
    pub dynamic: &'a [bool],
}

/// 蒙皮输出数据（写入调用方持有的缓冲）
pub struct SkinningOutput<'a> {
    /// 世界空间位置 + 边距倍率
    pub positions: &'a mut [VertexPos],
    /// 动态骨骼的权重之和
    pub flexible: &'a mut [f32],
}
