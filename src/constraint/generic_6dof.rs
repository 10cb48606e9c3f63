//! 6 自由度弹簧约束
//!
//! 线性部分沿 A 坐标系的三个轴，角度部分用 XYZ 欧拉角（R = Rx·Ry·Rz）。
//! 每个自由度：lower == upper 锁定，lower < upper 限位，lower > upper 自由；
//! 刚度或阻尼非零时再加一行隐式弹簧。

use glam::{Mat3, Vec3};

use super::{push_axis_rows, AxisParams, ConstraintRow, RowContext, ScaleChange};
use crate::math::Transform;

/// 欧拉角在 y = ±90° 附近退化
const GIMBAL_EPSILON: f32 = 1e-3;

#[derive(Clone, Debug)]
pub struct Generic6DofSpring {
    pub frame_a: Transform,
    pub frame_b: Transform,
    pub linear_lower: Vec3,
    pub linear_upper: Vec3,
    pub angular_lower: Vec3,
    pub angular_upper: Vec3,
    pub linear_stiffness: Vec3,
    pub linear_damping: Vec3,
    pub linear_equilibrium: Vec3,
    pub angular_stiffness: Vec3,
    pub angular_damping: Vec3,
    pub angular_equilibrium: Vec3,
}

impl Generic6DofSpring {
    /// 默认六个自由度全部锁定
    pub fn new(frame_a: Transform, frame_b: Transform) -> Self {
        Self {
            frame_a: frame_a.without_scale(),
            frame_b: frame_b.without_scale(),
            linear_lower: Vec3::ZERO,
            linear_upper: Vec3::ZERO,
            angular_lower: Vec3::ZERO,
            angular_upper: Vec3::ZERO,
            linear_stiffness: Vec3::ZERO,
            linear_damping: Vec3::ZERO,
            linear_equilibrium: Vec3::ZERO,
            angular_stiffness: Vec3::ZERO,
            angular_damping: Vec3::ZERO,
            angular_equilibrium: Vec3::ZERO,
        }
    }

    pub(super) fn scale(&mut self, c: &ScaleChange) {
        self.frame_a.translation *= c.a;
        self.frame_b.translation *= c.b;
        self.linear_lower *= c.blended;
        self.linear_upper *= c.blended;
        self.linear_equilibrium *= c.blended;
        self.linear_stiffness *= c.cubed();
        self.linear_damping *= c.cubed();
        self.angular_stiffness *= c.fifth();
        self.angular_damping *= c.fifth();
    }

    pub(super) fn get_rows(&self, tr_a: &Transform, tr_b: &Transform, ctx: &RowContext, out: &mut Vec<ConstraintRow>) {
        let fa = *tr_a * self.frame_a;
        let fb = *tr_b * self.frame_b;
        let basis_a = Mat3::from_quat(fa.rotation);
        let basis_b = Mat3::from_quat(fb.rotation);

        let diff = fb.translation - fa.translation;
        let ra = fb.translation - tr_a.translation;
        let rb = fb.translation - tr_b.translation;
        for i in 0..3 {
            let axis = basis_a.col(i);
            let params = AxisParams {
                position: diff.dot(axis),
                lower: self.linear_lower[i],
                upper: self.linear_upper[i],
                stiffness: self.linear_stiffness[i],
                damping: self.linear_damping[i],
                equilibrium: self.linear_equilibrium[i],
            };
            push_axis_rows(ConstraintRow::linear(axis, ra, rb, i), &params, ctx, out);
        }

        let Some((angles, axes)) = angle_info(&basis_a, &basis_b) else {
            return;
        };
        for i in 0..3 {
            let params = AxisParams {
                position: angles[i],
                lower: self.angular_lower[i],
                upper: self.angular_upper[i],
                stiffness: self.angular_stiffness[i],
                damping: self.angular_damping[i],
                equilibrium: self.angular_equilibrium[i],
            };
            push_axis_rows(ConstraintRow::angular(axes[i], 3 + i), &params, ctx, out);
        }
    }
}

/// B 相对 A 的欧拉角和对应的世界空间转轴
fn angle_info(basis_a: &Mat3, basis_b: &Mat3) -> Option<(Vec3, [Vec3; 3])> {
    let rel = basis_a.transpose() * *basis_b;
    let angles = matrix_to_euler_xyz(&rel)?;

    let axis0 = basis_b.col(0);
    let axis2 = basis_a.col(2);
    let a1 = axis2.cross(axis0);
    let a0 = a1.cross(axis2);
    let a2 = axis0.cross(a1);
    let axes = [a0.try_normalize()?, a1.try_normalize()?, a2.try_normalize()?];
    Some((angles, axes))
}

fn matrix_to_euler_xyz(m: &Mat3) -> Option<Vec3> {
    // m[r][c] = m.col(c)[r]
    let m02 = m.col(2).x;
    if 1.0 - m02.abs() < GIMBAL_EPSILON {
        return None;
    }
    let x = (-m.col(2).y).atan2(m.col(2).z);
    let y = m02.clamp(-1.0, 1.0).asin();
    let z = (-m.col(1).x).atan2(m.col(0).x);
    Some(Vec3::new(x, y, z))
}
