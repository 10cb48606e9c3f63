//! 数学基础类型
//!
//! 向量/四元数直接使用 glam，这里补充物理核心需要的：
//! - 带统一缩放的刚体变换 `Transform`
//! - 轴对齐包围盒 `Aabb`
//! - 包围球 `BoundingSphere`

mod aabb;
mod sphere;
mod transform;

pub use aabb::Aabb;
pub use sphere::BoundingSphere;
pub use transform::Transform;

pub use glam::{Mat3, Quat, Vec3, Vec4};

/// 与 C 的 FLT_EPSILON 相同
pub const EPSILON: f32 = f32::EPSILON;

/// 求与 n 垂直的一组正交切向量
///
/// n 必须是单位向量。
pub fn plane_space(n: Vec3) -> (Vec3, Vec3) {
    const SQRT12: f32 = std::f32::consts::FRAC_1_SQRT_2;
    if n.z.abs() > SQRT12 {
        // 选择 y-z 平面
        let a = n.y * n.y + n.z * n.z;
        let k = 1.0 / a.sqrt();
        let p = Vec3::new(0.0, -n.z * k, n.y * k);
        let q = Vec3::new(a * k, -n.x * p.z, n.x * p.y);
        (p, q)
    } else {
        // 选择 x-y 平面
        let a = n.x * n.x + n.y * n.y;
        let k = 1.0 / a.sqrt();
        let p = Vec3::new(-n.y * k, n.x * k, 0.0);
        let q = Vec3::new(-n.z * p.y, n.z * p.x, a * k);
        (p, q)
    }
}
