//! Skinned Mesh Physics - 蒙皮网格二次动画物理引擎
//!
//! 为挂在骨架上的头发、衣物、饰品计算跟随与碰撞：
//! - 按骨骼分层的碰撞体树，蒙皮顶点/三角形窄相检测
//! - 6 自由度弹簧、锥形扭转、硬弹簧骨骼约束，随骨骼缩放自动调整
//! - 并行顺序冲量求解器（自旋锁 + 任务乱序，支持 AVX）
//! - 固定子步的模拟世界，读写外部骨架

pub mod collision;
pub mod constraint;
pub mod math;
pub mod mesh;
pub mod physics;
pub mod skeleton;
pub mod skinning;
pub mod solver;

pub use physics::{
    RigidBody, SkinnedMeshBone, SkinnedMeshSystem, SkinnedMeshWorld, SystemBuilder, SystemDef, SystemId, WorldConfig,
    WorldStats,
};
pub use skeleton::{JointId, JointProvider, Skeleton};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PhysicsError {
    #[error("system {0} has no bones")]
    EmptySystem(String),

    #[error("joint not found: {0}")]
    MissingJoint(String),

    #[error("bone not found: {0}")]
    MissingBone(String),

    #[error("invalid bone definition: {0}")]
    InvalidBone(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("invalid constraint: {0}")]
    InvalidConstraint(String),

    #[error("unknown system: {0:?}")]
    UnknownSystem(SystemId),
}

pub type Result<T> = std::result::Result<T, PhysicsError>;
