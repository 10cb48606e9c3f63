//! 带统一缩放的变换
//!
//! 骨骼节点的世界变换包含缩放（骨架重定向/体型 mod），
//! 刚体本身不缩放，缩放只通过约束重新标定体现。

use glam::{Mat4, Quat, Vec3};
use std::ops::Mul;

/// 旋转 + 平移 + 统一缩放
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub rotation: Quat,
    pub translation: Vec3,
    pub scale: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        rotation: Quat::IDENTITY,
        translation: Vec3::ZERO,
        scale: 1.0,
    };

    pub fn new(rotation: Quat, translation: Vec3, scale: f32) -> Self {
        Self { rotation, translation, scale }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self { translation, ..Self::IDENTITY }
    }

    pub fn from_rotation_translation(rotation: Quat, translation: Vec3) -> Self {
        Self { rotation, translation, scale: 1.0 }
    }

    /// 逆变换
    pub fn inverse(&self) -> Self {
        let inv_scale = if self.scale.abs() > f32::EPSILON { 1.0 / self.scale } else { 1.0 };
        let inv_rot = self.rotation.inverse();
        Self {
            rotation: inv_rot,
            translation: inv_rot * (-self.translation) * inv_scale,
            scale: inv_scale,
        }
    }

    #[inline]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.translation + self.rotation * (p * self.scale)
    }

    #[inline]
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        self.rotation * (v * self.scale)
    }

    /// 去掉缩放，得到刚体可用的变换
    pub fn without_scale(&self) -> Self {
        Self { scale: 1.0, ..*self }
    }

    pub fn with_scale(&self, scale: f32) -> Self {
        Self { scale, ..*self }
    }

    /// 旋转矩阵（世界空间基向量为列）
    pub fn basis(&self) -> glam::Mat3 {
        glam::Mat3::from_quat(self.rotation)
    }

    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(Vec3::splat(self.scale), self.rotation, self.translation)
    }

    /// 从 Mat4 中提取，非统一缩放取三个分量的平均值
    pub fn from_mat4(m: Mat4) -> Self {
        let (scale, rotation, translation) = m.to_scale_rotation_translation();
        Self {
            rotation,
            translation,
            scale: (scale.x + scale.y + scale.z) / 3.0,
        }
    }

    /// 两个变换之间的插值（位置线性，旋转 slerp，缩放线性）
    pub fn lerp(&self, other: &Self, t: f32) -> Self {
        Self {
            rotation: self.rotation.slerp(other.rotation, t),
            translation: self.translation.lerp(other.translation, t),
            scale: self.scale + (other.scale - self.scale) * t,
        }
    }
}

impl Mul for Transform {
    type Output = Transform;

    fn mul(self, rhs: Transform) -> Transform {
        Transform {
            rotation: (self.rotation * rhs.rotation).normalize(),
            translation: self.translation + self.rotation * (rhs.translation * self.scale),
            scale: self.scale * rhs.scale,
        }
    }
}

impl Mul<Vec3> for Transform {
    type Output = Vec3;

    fn mul(self, rhs: Vec3) -> Vec3 {
        self.transform_point(rhs)
    }
}
