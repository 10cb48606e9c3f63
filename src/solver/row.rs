//! 求解行与标量内核
//!
//! Δλ = rhs - λ·cfm - jacDiagInv·(J·Δv)，λ 钳制到 [lower, upper]。
//! rhs 在准备阶段已经乘过 jacDiagInv，Δv 是求解开始后累计的速度增量。

use glam::Vec3;

use super::simd;
use super::SolverBody;
use crate::constraint::ConstraintRow;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SolverRow {
    pub lin_a: Vec3,
    pub ang_a: Vec3,
    pub lin_b: Vec3,
    pub ang_b: Vec3,
    /// I⁻¹·ang
    pub ang_comp_a: Vec3,
    pub ang_comp_b: Vec3,
    pub jac_diag_inv: f32,
    pub rhs: f32,
    pub cfm: f32,
    pub lower: f32,
    pub upper: f32,
    pub applied_impulse: f32,
}

impl SolverRow {
    /// 由约束行和两侧刚体建立求解行
    ///
    /// rhs 只用求解前的速度，已有的速度增量由内核中的 J·Δv 扣除。
    pub fn new(c: &ConstraintRow, a: &SolverBody, b: &SolverBody) -> Option<Self> {
        let ang_comp_a = a.inv_inertia_world * c.ang_a;
        let ang_comp_b = b.inv_inertia_world * c.ang_b;
        let k = a.inv_mass * c.lin_a.length_squared()
            + c.ang_a.dot(ang_comp_a)
            + b.inv_mass * c.lin_b.length_squared()
            + c.ang_b.dot(ang_comp_b)
            + c.cfm;
        // 双方都不可动
        if !(k > f32::EPSILON) || !k.is_finite() {
            return None;
        }
        let jac_diag_inv = 1.0 / k;
        let mut row = Self {
            lin_a: c.lin_a,
            ang_a: c.ang_a,
            lin_b: c.lin_b,
            ang_b: c.ang_b,
            ang_comp_a,
            ang_comp_b,
            jac_diag_inv,
            rhs: 0.0,
            cfm: c.cfm * jac_diag_inv,
            lower: c.lower,
            upper: c.upper,
            applied_impulse: 0.0,
        };
        let (va, wa) = a.base_velocity();
        let (vb, wb) = b.base_velocity();
        let v0 = row.lin_a.dot(va) + row.ang_a.dot(wa) + row.lin_b.dot(vb) + row.ang_b.dot(wb);
        row.rhs = (c.error - v0) * jac_diag_inv;
        Some(row)
    }

    /// J·v（含外力冲量与已有增量）
    pub fn relative_velocity(&self, a: &SolverBody, b: &SolverBody) -> f32 {
        let (va, wa) = a.velocity();
        let (vb, wb) = b.velocity();
        self.lin_a.dot(va) + self.ang_a.dot(wa) + self.lin_b.dot(vb) + self.ang_b.dot(wb)
    }

    /// 直接施加冲量并累计（热启动）
    pub fn warm_start(&mut self, a: &mut SolverBody, b: &mut SolverBody, impulse: f32) {
        let impulse = impulse.clamp(self.lower, self.upper);
        if impulse == 0.0 || !impulse.is_finite() {
            return;
        }
        self.applied_impulse = impulse;
        a.apply_impulse(self.lin_a, self.ang_comp_a, impulse);
        b.apply_impulse(self.lin_b, self.ang_comp_b, impulse);
    }
}

/// 按配置选择内核
#[inline]
pub fn resolve(row: &mut SolverRow, a: &mut SolverBody, b: &mut SolverBody, lower_only: bool, use_simd: bool) -> f32 {
    if use_simd && simd::available() {
        simd::resolve(row, a, b, lower_only)
    } else if lower_only {
        resolve_lower_limit(row, a, b)
    } else {
        resolve_generic(row, a, b)
    }
}

/// 双边钳制
pub fn resolve_generic(row: &mut SolverRow, a: &mut SolverBody, b: &mut SolverBody) -> f32 {
    let delta = delta_impulse(row, a, b);
    apply(row, a, b, delta, row.lower, row.upper)
}

/// 只有下限（接触法向）
pub fn resolve_lower_limit(row: &mut SolverRow, a: &mut SolverBody, b: &mut SolverBody) -> f32 {
    let delta = delta_impulse(row, a, b);
    apply(row, a, b, delta, row.lower, f32::INFINITY)
}

#[inline]
fn delta_impulse(row: &SolverRow, a: &SolverBody, b: &SolverBody) -> f32 {
    let dv = row.lin_a.dot(a.delta_linear_velocity)
        + row.ang_a.dot(a.delta_angular_velocity)
        + row.lin_b.dot(b.delta_linear_velocity)
        + row.ang_b.dot(b.delta_angular_velocity);
    row.rhs - row.applied_impulse * row.cfm - dv * row.jac_diag_inv
}

#[inline]
fn apply(row: &mut SolverRow, a: &mut SolverBody, b: &mut SolverBody, delta: f32, lower: f32, upper: f32) -> f32 {
    let sum = row.applied_impulse + delta;
    let clamped = sum.clamp(lower, upper);
    let delta = clamped - row.applied_impulse;
    row.applied_impulse = clamped;
    a.apply_impulse(row.lin_a, row.ang_comp_a, delta);
    b.apply_impulse(row.lin_b, row.ang_comp_b, delta);
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use glam::Mat3;

    fn dynamic(v: Vec3) -> SolverBody {
        SolverBody {
            linear_velocity: v,
            inv_mass: 1.0,
            inv_inertia_world: Mat3::IDENTITY,
            dynamic: true,
            ..SolverBody::fixed()
        }
    }

    #[test]
    fn locked_row_removes_relative_velocity() {
        let mut a = dynamic(Vec3::ZERO);
        let mut b = dynamic(Vec3::new(2.0, 0.0, 0.0));
        let c = ConstraintRow::linear(Vec3::X, Vec3::ZERO, Vec3::ZERO, 0);
        let mut row = SolverRow::new(&c, &a, &b).unwrap();
        resolve_generic(&mut row, &mut a, &mut b);
        assert_abs_diff_eq!(row.relative_velocity(&a, &b), 0.0, epsilon = 1e-6);
        // 动量守恒
        let total = a.velocity().0 + b.velocity().0;
        assert_abs_diff_eq!(total.x, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn lower_limit_only_pushes() {
        let mut a = dynamic(Vec3::ZERO);
        let mut b = dynamic(Vec3::new(2.0, 0.0, 0.0));
        let c = ConstraintRow { lower: 0.0, ..ConstraintRow::linear(Vec3::X, Vec3::ZERO, Vec3::ZERO, 0) };
        let mut row = SolverRow::new(&c, &a, &b).unwrap();
        // 已经在分离，不施加拉力
        resolve_lower_limit(&mut row, &mut a, &mut b);
        assert_eq!(row.applied_impulse, 0.0);
        assert_eq!(b.velocity().0.x, 2.0);
    }

    #[test]
    fn fixed_pair_has_no_row() {
        let c = ConstraintRow::linear(Vec3::X, Vec3::ZERO, Vec3::ZERO, 0);
        assert!(SolverRow::new(&c, &SolverBody::fixed(), &SolverBody::fixed()).is_none());
    }

    #[test]
    fn soft_row_converges_to_spring_target() {
        let mut a = SolverBody::fixed();
        let mut b = dynamic(Vec3::ZERO);
        let c = ConstraintRow { error: -1.0, cfm: 0.5, ..ConstraintRow::linear(Vec3::X, Vec3::ZERO, Vec3::ZERO, 0) };
        let mut row = SolverRow::new(&c, &a, &b).unwrap();
        for _ in 0..50 {
            resolve_generic(&mut row, &mut a, &mut b);
        }
        // 收敛到 (J M⁻¹ Jᵀ + cfm)λ = error - J·v0 的解
        assert_abs_diff_eq!(row.applied_impulse, -1.0 / 1.5, epsilon = 1e-4);
    }
}
