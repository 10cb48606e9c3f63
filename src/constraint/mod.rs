//! 骨骼约束
//!
//! 三种约束（6 自由度弹簧、锥形扭转、硬弹簧）共用一个 [`BoneScaleConstraint`]：
//! 两根骨骼的索引、上次的缩放、热启动冲量，加上按种类区分的参数。
//! 每步求解前先 [`BoneScaleConstraint::scale_constraint`]，骨骼缩放变化时
//! 按量纲重新缩放长度、刚度和阻尼。

mod cone_twist;
mod generic_6dof;
mod group;
mod row;
mod stiff_spring;

pub use cone_twist::ConeTwist;
pub use generic_6dof::Generic6DofSpring;
pub use group::{solve_mlcp, ConstraintGroup};
pub use row::{push_axis_rows, spring_row, AxisParams, ConstraintRow, RowContext};
pub use stiff_spring::StiffSpring;

use crate::math::Transform;
use crate::physics::SkinnedMeshBone;

/// 单个约束最多的行槽位（6 个自由度 × 限位/弹簧）
pub const MAX_SLOTS: usize = 12;

#[derive(Clone, Debug)]
pub enum ConstraintKind {
    Generic6DofSpring(Generic6DofSpring),
    ConeTwist(ConeTwist),
    StiffSpring(StiffSpring),
}

/// 缩放变化量
///
/// `a`、`b` 是两根骨骼各自的缩放比，`blended` 按逆质量加权混合，
/// 用于两根骨骼共享的长度和刚度。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleChange {
    pub a: f32,
    pub b: f32,
    pub blended: f32,
}

impl ScaleChange {
    /// 缩放没有变化（或旧值无效）时返回 None
    pub fn compute(old: (f32, f32), new: (f32, f32), inv_mass: (f32, f32)) -> Option<Self> {
        if old.0 <= 0.0 || old.1 <= 0.0 || new.0 <= 0.0 || new.1 <= 0.0 {
            return None;
        }
        if fuzzy_eq(old.0, new.0) && fuzzy_eq(old.1, new.1) {
            return None;
        }
        let a = new.0 / old.0;
        let b = new.1 / old.1;
        let total = inv_mass.0 + inv_mass.1;
        let blended = if total > 0.0 {
            (a * inv_mass.0 + b * inv_mass.1) / total
        } else {
            0.5 * (a + b)
        };
        Some(Self { a, b, blended })
    }

    #[inline]
    pub fn cubed(&self) -> f32 {
        self.blended.powi(3)
    }

    #[inline]
    pub fn fifth(&self) -> f32 {
        self.blended.powi(5)
    }
}

fn fuzzy_eq(x: f32, y: f32) -> bool {
    (x - y).abs() <= f32::EPSILON * x.abs().max(y.abs()).max(1.0)
}

/// 两根骨骼之间的约束
#[derive(Clone, Debug)]
pub struct BoneScaleConstraint {
    pub name: String,
    pub bone_a: usize,
    pub bone_b: usize,
    pub kind: ConstraintKind,
    pub enabled: bool,
    scale_a: f32,
    scale_b: f32,
    /// 上一步每个槽位的累计冲量
    pub warm_start: [f32; MAX_SLOTS],
}

impl BoneScaleConstraint {
    /// 以骨骼当前缩放为基准创建
    pub fn new(name: impl Into<String>, bone_a: usize, bone_b: usize, kind: ConstraintKind, bones: &[SkinnedMeshBone]) -> Self {
        let scale_of = |i: usize| bones.get(i).map_or(1.0, |b| b.scale());
        Self {
            name: name.into(),
            bone_a,
            bone_b,
            kind,
            enabled: true,
            scale_a: scale_of(bone_a),
            scale_b: scale_of(bone_b),
            warm_start: [0.0; MAX_SLOTS],
        }
    }

    /// 上次记录的两根骨骼缩放
    pub fn scales(&self) -> (f32, f32) {
        (self.scale_a, self.scale_b)
    }

    /// 骨骼缩放变化时重新缩放约束参数，返回是否发生了缩放
    pub fn scale_constraint(&mut self, bones: &[SkinnedMeshBone]) -> bool {
        let (Some(a), Some(b)) = (bones.get(self.bone_a), bones.get(self.bone_b)) else {
            return false;
        };
        let new = (a.scale(), b.scale());
        let Some(change) = ScaleChange::compute((self.scale_a, self.scale_b), new, (a.rig.inv_mass, b.rig.inv_mass)) else {
            return false;
        };
        match &mut self.kind {
            ConstraintKind::Generic6DofSpring(c) => c.scale(&change),
            ConstraintKind::ConeTwist(c) => c.scale(&change),
            ConstraintKind::StiffSpring(c) => c.scale(&change),
        }
        self.scale_a = new.0;
        self.scale_b = new.1;
        true
    }

    /// 由两个刚体的世界变换生成本步的约束行
    pub fn get_rows(&self, tr_a: &Transform, tr_b: &Transform, ctx: &RowContext, out: &mut Vec<ConstraintRow>) {
        if !self.enabled {
            return;
        }
        match &self.kind {
            ConstraintKind::Generic6DofSpring(c) => c.get_rows(tr_a, tr_b, ctx, out),
            ConstraintKind::ConeTwist(c) => c.get_rows(tr_a, tr_b, ctx, out),
            ConstraintKind::StiffSpring(c) => c.get_rows(tr_a, tr_b, ctx, out),
        }
    }

    /// 不生成行、按旧接口直接施加冲量的部分（锥形扭转的角阻尼）
    pub fn angular_damping(&self) -> Option<f32> {
        match &self.kind {
            ConstraintKind::ConeTwist(c) if self.enabled && c.damping > 0.0 => Some(c.damping),
            _ => None,
        }
    }

    /// 某个槽位上一步的冲量
    pub fn warm_start_impulse(&self, slot: usize) -> f32 {
        self.warm_start.get(slot).copied().unwrap_or(0.0)
    }

    pub fn reset_warm_start(&mut self) {
        self.warm_start = [0.0; MAX_SLOTS];
    }

    /// 求解结束后记录一行的冲量，下一步热启动
    pub fn record_impulse(&mut self, slot: usize, impulse: f32) {
        if let Some(s) = self.warm_start.get_mut(slot) {
            *s = if impulse.is_finite() { impulse } else { 0.0 };
        }
    }
}
