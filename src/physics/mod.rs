//! 物理骨骼、系统与世界
//!
//! - `rigid_body`：刚体状态与积分
//! - `bone`：刚体与骨架节点之间的变换映射
//! - `system`：一套骨骼 + 碰撞体 + 约束
//! - `definition` / `builder`：由宿主提供的定义构建系统
//! - `world`：固定子步的模拟世界

mod bone;
mod builder;
pub mod config;
pub mod definition;
mod rigid_body;
mod system;
mod world;

pub use bone::SkinnedMeshBone;
pub use builder::SystemBuilder;
pub use config::{WorldConfig, DEFAULT_SMOOTHING_FACTOR, DEFAULT_STEP_THRESHOLD};
pub use definition::{
    BoneDef, ConeTwistParams, ConstraintDef, ConstraintGroupDef, ConstraintParams, FrameType, Generic6DofParams,
    GeometryBone, ShapeDef, ShapeKind, SkinnedGeometry, StiffSpringParams, SystemDef,
};
pub use rigid_body::{integrate_transform, RigidBody};
pub use system::SkinnedMeshSystem;
pub use world::{SkinnedMeshWorld, SystemId, WorldStats};
