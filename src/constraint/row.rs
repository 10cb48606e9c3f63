//! 约束行
//!
//! 一行 = 一个标量速度约束：
//!   lower <= λ <= upper，目标 J·v = error（含 cfm 软化）
//! 雅可比按 (线A, 角A, 线B, 角B) 存放。

use glam::Vec3;

use crate::math::EPSILON;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstraintRow {
    pub lin_a: Vec3,
    pub ang_a: Vec3,
    pub lin_b: Vec3,
    pub ang_b: Vec3,
    /// 期望的 J·v
    pub error: f32,
    pub cfm: f32,
    pub lower: f32,
    pub upper: f32,
    /// 同一约束内的自由度编号，用于热启动
    pub slot: usize,
}

impl ConstraintRow {
    /// 两个锚点沿 axis 的相对线速度：axis·(vB + ωB×rB - vA - ωA×rA)
    pub fn linear(axis: Vec3, ra: Vec3, rb: Vec3, slot: usize) -> Self {
        Self {
            lin_a: -axis,
            ang_a: -ra.cross(axis),
            lin_b: axis,
            ang_b: rb.cross(axis),
            error: 0.0,
            cfm: 0.0,
            lower: f32::NEG_INFINITY,
            upper: f32::INFINITY,
            slot,
        }
    }

    /// 绕 axis 的相对角速度：axis·(ωB - ωA)
    pub fn angular(axis: Vec3, slot: usize) -> Self {
        Self {
            lin_a: Vec3::ZERO,
            ang_a: -axis,
            lin_b: Vec3::ZERO,
            ang_b: axis,
            error: 0.0,
            cfm: 0.0,
            lower: f32::NEG_INFINITY,
            upper: f32::INFINITY,
            slot,
        }
    }
}

/// 生成约束行时的步长信息
#[derive(Clone, Copy, Debug)]
pub struct RowContext {
    pub dt: f32,
    pub erp: f32,
}

impl RowContext {
    #[inline]
    pub fn fps(&self) -> f32 {
        if self.dt > 0.0 {
            1.0 / self.dt
        } else {
            0.0
        }
    }
}

/// 一个自由度的限位与弹簧参数
///
/// lower == upper 锁定，lower > upper 自由，否则限位。
#[derive(Clone, Copy, Debug)]
pub struct AxisParams {
    pub position: f32,
    pub lower: f32,
    pub upper: f32,
    pub stiffness: f32,
    pub damping: f32,
    pub equilibrium: f32,
}

/// 按参数生成限位行和弹簧行，template 提供雅可比，slot 占用 2*axis 和 2*axis+1
pub fn push_axis_rows(template: ConstraintRow, params: &AxisParams, ctx: &RowContext, out: &mut Vec<ConstraintRow>) {
    let limit_slot = template.slot * 2;
    let spring_slot = limit_slot + 1;
    let bias = ctx.erp * ctx.fps();
    let locked = (params.upper - params.lower).abs() <= EPSILON;

    if locked {
        out.push(ConstraintRow {
            error: bias * (params.lower - params.position),
            slot: limit_slot,
            ..template
        });
        return;
    }
    if params.lower < params.upper {
        if params.position < params.lower {
            out.push(ConstraintRow {
                error: bias * (params.lower - params.position),
                lower: 0.0,
                upper: f32::INFINITY,
                slot: limit_slot,
                ..template
            });
        } else if params.position > params.upper {
            out.push(ConstraintRow {
                error: bias * (params.upper - params.position),
                lower: f32::NEG_INFINITY,
                upper: 0.0,
                slot: limit_slot,
                ..template
            });
        }
    }
    if let Some(row) = spring_row(template, params.position - params.equilibrium, params.stiffness, params.damping, ctx) {
        out.push(ConstraintRow { slot: spring_slot, ..row });
    }
}

/// 隐式弹簧：γ = 1/(h(c+hk))，目标速度 -k·x/(c+hk)
pub fn spring_row(template: ConstraintRow, displacement: f32, stiffness: f32, damping: f32, ctx: &RowContext) -> Option<ConstraintRow> {
    if stiffness <= 0.0 && damping <= 0.0 {
        return None;
    }
    let h = ctx.dt;
    let denom = h * stiffness.max(0.0) + damping.max(0.0);
    if h <= 0.0 || denom <= EPSILON {
        return None;
    }
    Some(ConstraintRow {
        error: -stiffness.max(0.0) * displacement / denom,
        cfm: 1.0 / (h * denom),
        lower: f32::NEG_INFINITY,
        upper: f32::INFINITY,
        ..template
    })
}
