//! 碰撞检测
//!
//! - `collider` / `collider_tree`：按骨骼分层的碰撞体层次
//! - `narrow_phase`：球-球、球-三角形（含扫掠）
//! - `broadphase`：碰撞对象包围盒的扫描-剪枝
//! - `algorithm`：两个蒙皮网格之间的窄相驱动与接触合并
//! - `dispatcher`：分派宽相碰撞对，生成接触流形

mod algorithm;
mod broadphase;
mod collider;
mod collider_tree;
mod dispatcher;
mod manifold;
mod narrow_phase;

pub use algorithm::{BodyContext, MergeBuffer, SkinnedMeshAlgorithm};
pub use broadphase::Broadphase;
pub use collider::Collider;
pub use collider_tree::{ColliderPair, ColliderTree};
pub use dispatcher::{CollisionDispatcher, CollisionObject, CollisionObjectKind, DispatchInput};
pub use manifold::{ManifoldPoint, PersistentManifold};
pub use narrow_phase::{
    check_sphere_sphere, check_sphere_triangle, check_sphere_triangle_swept, check_triangle_sphere,
    check_triangle_sphere_swept, CheckTriangle, CollisionResult,
};
