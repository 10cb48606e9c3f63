//! 锥形扭转约束
//!
//! 点对点固定锚点，摆动限制为椭圆锥（span1 绕 z，span2 绕 y），
//! 扭转限制绕坐标系 x 轴。角阻尼不生成约束行，由求解器单独施加。

use std::f32::consts::PI;

use glam::{Quat, Vec3};

use super::{push_axis_rows, AxisParams, ConstraintRow, RowContext, ScaleChange};
use crate::math::{Transform, EPSILON};

/// 跨度小于该值时不启用对应限制
const MIN_SPAN: f32 = 0.05;

#[derive(Clone, Debug)]
pub struct ConeTwist {
    pub frame_a: Transform,
    pub frame_b: Transform,
    pub swing_span1: f32,
    pub swing_span2: f32,
    pub twist_span: f32,
    /// 超过 span × softness 后限制开始起作用
    pub softness: f32,
    pub bias_factor: f32,
    pub relaxation: f32,
    pub damping: f32,
}

impl ConeTwist {
    pub fn new(frame_a: Transform, frame_b: Transform) -> Self {
        Self {
            frame_a: frame_a.without_scale(),
            frame_b: frame_b.without_scale(),
            swing_span1: PI,
            swing_span2: PI,
            twist_span: PI,
            softness: 1.0,
            bias_factor: 0.3,
            relaxation: 1.0,
            damping: 0.0,
        }
    }

    pub fn set_limit(&mut self, swing_span1: f32, swing_span2: f32, twist_span: f32) {
        self.swing_span1 = swing_span1;
        self.swing_span2 = swing_span2;
        self.twist_span = twist_span;
    }

    pub(super) fn scale(&mut self, c: &ScaleChange) {
        self.frame_a.translation *= c.a;
        self.frame_b.translation *= c.b;
        self.damping *= c.fifth();
    }

    pub(super) fn get_rows(&self, tr_a: &Transform, tr_b: &Transform, ctx: &RowContext, out: &mut Vec<ConstraintRow>) {
        let fa = *tr_a * self.frame_a;
        let fb = *tr_b * self.frame_b;

        // 点对点
        let ra = fa.translation - tr_a.translation;
        let rb = fb.translation - tr_b.translation;
        let diff = fb.translation - fa.translation;
        for (i, axis) in [Vec3::X, Vec3::Y, Vec3::Z].into_iter().enumerate() {
            let params = AxisParams {
                position: diff.dot(axis),
                lower: 0.0,
                upper: 0.0,
                stiffness: 0.0,
                damping: 0.0,
                equilibrium: 0.0,
            };
            push_axis_rows(ConstraintRow::linear(axis, ra, rb, i), &params, ctx, out);
        }

        let bias = self.bias_factor * self.relaxation * ctx.fps();
        let (swing, twist) = swing_twist(fa.rotation.inverse() * fb.rotation);

        if self.swing_span1 >= MIN_SPAN && self.swing_span2 >= MIN_SPAN {
            if let Some((axis_local, angle)) = axis_angle(swing) {
                let limit = self.swing_limit(axis_local);
                if angle > limit * self.softness {
                    let axis = fa.rotation * axis_local;
                    out.push(ConstraintRow {
                        error: bias * (limit - angle),
                        upper: 0.0,
                        ..ConstraintRow::angular(axis, 6)
                    });
                }
            }
        }

        if self.twist_span >= MIN_SPAN {
            let angle = twist_angle(twist);
            if angle.abs() > self.twist_span * self.softness {
                let twist_axis = (fa.rotation * Vec3::X + fb.rotation * Vec3::X).normalize_or_zero();
                if twist_axis != Vec3::ZERO {
                    out.push(ConstraintRow {
                        error: bias * (self.twist_span - angle.abs()),
                        upper: 0.0,
                        ..ConstraintRow::angular(twist_axis * angle.signum(), 8)
                    });
                }
            }
        }
    }

    /// 给定摆动轴（坐标系 yz 平面内）的椭圆锥限制角
    fn swing_limit(&self, axis_local: Vec3) -> f32 {
        let (y, z) = (axis_local.y, axis_local.z);
        let inv = (y * y) / (self.swing_span2 * self.swing_span2) + (z * z) / (self.swing_span1 * self.swing_span1);
        if inv > EPSILON {
            ((y * y + z * z) / inv).sqrt()
        } else {
            self.swing_span1.max(self.swing_span2)
        }
    }
}

/// q = swing * twist，twist 绕 x 轴
fn swing_twist(q: Quat) -> (Quat, Quat) {
    let len = (q.x * q.x + q.w * q.w).sqrt();
    let twist = if len > EPSILON {
        Quat::from_xyzw(q.x / len, 0.0, 0.0, q.w / len)
    } else {
        Quat::IDENTITY
    };
    (q * twist.inverse(), twist)
}

/// 转角为正的轴角表示，转角接近 0 时返回 None
fn axis_angle(q: Quat) -> Option<(Vec3, f32)> {
    let q = if q.w < 0.0 { -q } else { q };
    let axis = Vec3::new(q.x, q.y, q.z);
    let s = axis.length();
    if s < EPSILON {
        return None;
    }
    Some((axis / s, 2.0 * s.atan2(q.w)))
}

fn twist_angle(twist: Quat) -> f32 {
    let mut angle = 2.0 * twist.x.atan2(twist.w);
    if angle > PI {
        angle -= 2.0 * PI;
    } else if angle < -PI {
        angle += 2.0 * PI;
    }
    angle
}

#[cfg(test)]
mod tests {
    use super::super::tests::bone;
    use super::super::{BoneScaleConstraint, ConstraintKind};
    use super::*;
    use approx::assert_relative_eq;

    const CTX: RowContext = RowContext { dt: 1.0 / 60.0, erp: 0.2 };

    fn rows_for(c: &ConeTwist, rot_b: Quat) -> Vec<ConstraintRow> {
        let mut rows = Vec::new();
        c.get_rows(&Transform::IDENTITY, &Transform::from_rotation_translation(rot_b, Vec3::ZERO), &CTX, &mut rows);
        rows
    }

    #[test]
    fn decomposition_recovers_parts() {
        let q = Quat::from_rotation_z(0.4) * Quat::from_rotation_x(0.3);
        let (swing, twist) = swing_twist(q);
        assert_relative_eq!(twist_angle(twist), 0.3, epsilon = 1e-5);
        let (axis, angle) = axis_angle(swing).unwrap();
        assert_relative_eq!(angle, 0.4, epsilon = 1e-5);
        assert_relative_eq!(axis.z, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn elliptic_limit() {
        let mut c = ConeTwist::new(Transform::IDENTITY, Transform::IDENTITY);
        c.set_limit(0.5, 1.0, 0.3);
        assert_relative_eq!(c.swing_limit(Vec3::Z), 0.5, epsilon = 1e-6);
        assert_relative_eq!(c.swing_limit(Vec3::Y), 1.0, epsilon = 1e-6);
        let diag = c.swing_limit(Vec3::new(0.0, 1.0, 1.0).normalize());
        assert!(diag > 0.5 && diag < 1.0);
    }

    #[test]
    fn limits_activate_past_span() {
        let mut c = ConeTwist::new(Transform::IDENTITY, Transform::IDENTITY);
        c.set_limit(0.5, 0.5, 0.3);
        // 3 行点对点
        assert_eq!(rows_for(&c, Quat::IDENTITY).len(), 3);

        let rows = rows_for(&c, Quat::from_rotation_z(0.8));
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3].slot, 6);
        assert!(rows[3].error < 0.0);

        let rows = rows_for(&c, Quat::from_rotation_x(-0.6));
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3].slot, 8);
        // 负方向扭转：轴取反，正冲量方向仍是远离限制
        assert!(rows[3].ang_b.x < 0.0);
    }

    #[test]
    fn damping_uses_fifth_power() {
        let mut bones = vec![bone(1.0, false), bone(1.0, true)];
        let mut inner = ConeTwist::new(Transform::from_translation(Vec3::X), Transform::IDENTITY);
        inner.damping = 1.0;
        let mut c = BoneScaleConstraint::new("cone", 0, 1, ConstraintKind::ConeTwist(inner), &bones);
        assert_eq!(c.angular_damping(), Some(1.0));
        bones[0].current_transform.scale = 2.0;
        c.scale_constraint(&bones);
        assert_relative_eq!(c.angular_damping().unwrap(), 32.0);
        let ConstraintKind::ConeTwist(ct) = &c.kind else { unreachable!() };
        assert_eq!(ct.frame_a.translation, Vec3::new(2.0, 0.0, 0.0));
    }
}
