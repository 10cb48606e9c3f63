//! 硬弹簧：两点之间的距离限制在 [min, max]，并向平衡长度回弹

use glam::Vec3;

use super::{push_axis_rows, AxisParams, ConstraintRow, RowContext, ScaleChange};
use crate::math::{Transform, EPSILON};

#[derive(Clone, Debug)]
pub struct StiffSpring {
    /// 刚体 A 局部空间中的锚点
    pub pivot_a: Vec3,
    pub pivot_b: Vec3,
    pub min_distance: f32,
    pub max_distance: f32,
    pub stiffness: f32,
    pub damping: f32,
    /// 平衡长度在 [min, max] 中的位置，0..1
    pub equilibrium: f32,
}

impl StiffSpring {
    pub fn new(pivot_a: Vec3, pivot_b: Vec3, min_distance: f32, max_distance: f32) -> Self {
        Self {
            pivot_a,
            pivot_b,
            min_distance,
            max_distance,
            stiffness: 0.0,
            damping: 0.0,
            equilibrium: 0.5,
        }
    }

    pub fn rest_length(&self) -> f32 {
        self.min_distance + (self.max_distance - self.min_distance) * self.equilibrium
    }

    pub(super) fn scale(&mut self, c: &ScaleChange) {
        self.pivot_a *= c.a;
        self.pivot_b *= c.b;
        self.min_distance *= c.blended;
        self.max_distance *= c.blended;
        self.stiffness *= c.cubed();
        self.damping *= c.cubed();
    }

    pub(super) fn get_rows(&self, tr_a: &Transform, tr_b: &Transform, ctx: &RowContext, out: &mut Vec<ConstraintRow>) {
        let pa = tr_a.transform_point(self.pivot_a);
        let pb = tr_b.transform_point(self.pivot_b);
        let d = pb - pa;
        let len = d.length();
        // 两点重合时方向不确定
        if len < EPSILON {
            return;
        }
        let axis = d / len;
        let template = ConstraintRow::linear(axis, pa - tr_a.translation, pb - tr_b.translation, 0);
        let params = AxisParams {
            position: len,
            lower: self.min_distance,
            upper: self.max_distance,
            stiffness: self.stiffness,
            damping: self.damping,
            equilibrium: self.rest_length(),
        };
        push_axis_rows(template, &params, ctx, out);
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::bone;
    use super::super::{BoneScaleConstraint, ConstraintKind};
    use super::*;
    use approx::assert_relative_eq;

    fn spring() -> StiffSpring {
        let mut s = StiffSpring::new(Vec3::new(0.0, 1.0, 0.0), Vec3::ZERO, 1.0, 3.0);
        s.stiffness = 100.0;
        s.damping = 2.0;
        s
    }

    fn inner(c: &BoneScaleConstraint) -> &StiffSpring {
        match &c.kind {
            ConstraintKind::StiffSpring(s) => s,
            _ => unreachable!(),
        }
    }

    #[test]
    fn single_bone_scale_cubes_stiffness() {
        let mut bones = vec![bone(1.0, false), bone(1.0, true)];
        let mut c = BoneScaleConstraint::new("s", 0, 1, ConstraintKind::StiffSpring(spring()), &bones);
        bones[0].current_transform.scale = 2.0;
        assert!(c.scale_constraint(&bones));
        let s = inner(&c);
        assert_relative_eq!(s.stiffness, 800.0);
        assert_relative_eq!(s.damping, 16.0);
        assert_relative_eq!(s.min_distance, 2.0);
        assert_relative_eq!(s.max_distance, 6.0);
        assert_eq!(s.pivot_a, Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(c.scales(), (2.0, 1.0));
        // 基准已更新，再调用不变
        assert!(!c.scale_constraint(&bones));
        assert_relative_eq!(inner(&c).stiffness, 800.0);
    }

    #[test]
    fn uniform_rescale_keeps_dynamics_similar() {
        // 质量按 k³ 变化，弹簧在 k 倍位移下的力除以 k³·k 应与原来相同
        let k = 1.7_f32;
        let mut bones = vec![bone(1.0, false), bone(1.0, false)];
        let mut c = BoneScaleConstraint::new("s", 0, 1, ConstraintKind::StiffSpring(spring()), &bones);
        let before = inner(&c).clone();
        let displacement = 2.6_f32;
        let force = before.stiffness * (displacement - before.rest_length());

        bones[0].current_transform.scale = k;
        bones[1].current_transform.scale = k;
        c.scale_constraint(&bones);
        let after = inner(&c);
        let scaled_force = after.stiffness * (displacement * k - after.rest_length());
        assert_relative_eq!(after.rest_length(), before.rest_length() * k, epsilon = 1e-5);
        assert_relative_eq!(scaled_force / k.powi(4), force, max_relative = 1e-4);
    }

    #[test]
    fn rows_push_back_toward_range() {
        let s = spring();
        let ctx = RowContext { dt: 1.0 / 60.0, erp: 0.2 };
        let tr_a = Transform::IDENTITY;
        let tr_b = Transform::from_translation(Vec3::new(0.0, 5.0, 0.0));
        let mut rows = Vec::new();
        s.get_rows(&tr_a, &tr_b, &ctx, &mut rows);
        // 长度 4 超过上限：限位行 + 弹簧行
        assert_eq!(rows.len(), 2);
        assert!(rows[0].error < 0.0 && rows[0].upper == 0.0);
        assert_eq!(rows[0].lin_b, Vec3::Y);
        assert!(rows[1].cfm > 0.0);

        rows.clear();
        s.get_rows(&tr_a, &Transform::from_translation(Vec3::Y), &ctx, &mut rows);
        assert!(rows.is_empty());
    }
}
