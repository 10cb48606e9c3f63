//! 求解任务
//!
//! 每个任务只碰两个刚体，执行时按固定顺序锁住这两个刚体：
//! - 约束任务：同一刚体对的所有约束行，行序与生成顺序一致
//! - 接触任务：一个接触点，先法向再摩擦，摩擦上限取刚算出的法向冲量
//! - 阻尼任务：不产生约束行的旧式求解（锥形扭转角阻尼）

use glam::Vec3;
use smallvec::SmallVec;

use super::row::{resolve, SolverRow};
use super::SolverBodyPool;

/// 约束行来自哪个约束的哪个槽位，结束时写回热启动冲量
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowSource {
    pub system: usize,
    pub constraint: usize,
    pub slot: usize,
}

#[derive(Clone, Debug)]
pub struct ConstraintTask {
    pub body_a: usize,
    pub body_b: usize,
    pub rows: Vec<SolverRow>,
    pub sources: Vec<RowSource>,
}

#[derive(Clone, Debug)]
pub struct ContactTask {
    pub body_a: usize,
    pub body_b: usize,
    /// (流形索引, 接触点索引)
    pub source: (usize, usize),
    pub normal: SolverRow,
    pub friction: SmallVec<[SolverRow; 2]>,
    pub rolling: Option<SolverRow>,
    pub friction_coeff: f32,
    pub rolling_coeff: f32,
}

#[derive(Clone, Debug)]
pub struct DampingTask {
    pub body_a: usize,
    pub body_b: usize,
    pub damping: f32,
}

#[derive(Clone, Debug)]
pub enum SolverTask {
    Constraint(ConstraintTask),
    Contact(ContactTask),
    Damping(DampingTask),
}

impl SolverTask {
    pub fn bodies(&self) -> (usize, usize) {
        match self {
            SolverTask::Constraint(t) => (t.body_a, t.body_b),
            SolverTask::Contact(t) => (t.body_a, t.body_b),
            SolverTask::Damping(t) => (t.body_a, t.body_b),
        }
    }

    pub fn is_contact(&self) -> bool {
        matches!(self, SolverTask::Contact(_))
    }

    pub fn solve(&mut self, pool: &SolverBodyPool, simd: bool) {
        let (a, b) = self.bodies();
        match self {
            SolverTask::Constraint(t) => {
                pool.with_pair(a, b, |ba, bb| {
                    for row in &mut t.rows {
                        resolve(row, ba, bb, false, simd);
                    }
                });
            }
            SolverTask::Contact(t) => {
                pool.with_pair(a, b, |ba, bb| t.solve(ba, bb, simd));
            }
            SolverTask::Damping(t) => {
                pool.with_pair(a, b, |ba, bb| t.solve(ba, bb));
            }
        }
    }
}

impl ContactTask {
    fn solve(&mut self, a: &mut super::SolverBody, b: &mut super::SolverBody, simd: bool) {
        resolve(&mut self.normal, a, b, true, simd);
        let total = self.normal.applied_impulse;
        if total <= 0.0 {
            // 没有法向冲量时摩擦冲量也应为零
            for row in self.friction.iter_mut().chain(self.rolling.iter_mut()) {
                row.lower = 0.0;
                row.upper = 0.0;
                resolve(row, a, b, false, simd);
            }
            return;
        }
        let limit = self.friction_coeff * total;
        for row in &mut self.friction {
            row.lower = -limit;
            row.upper = limit;
            resolve(row, a, b, false, simd);
        }
        if let Some(row) = &mut self.rolling {
            let limit = self.rolling_coeff * total;
            row.lower = -limit;
            row.upper = limit;
            resolve(row, a, b, false, simd);
        }
    }
}

impl DampingTask {
    /// 按相对角速度方向施加阻尼冲量
    fn solve(&self, a: &mut super::SolverBody, b: &mut super::SolverBody) {
        let rel = b.velocity().1 - a.velocity().1;
        let speed = rel.length();
        if speed < f32::EPSILON {
            return;
        }
        let axis = rel / speed;
        let comp_a = a.inv_inertia_world * axis;
        let comp_b = b.inv_inertia_world * axis;
        let k = axis.dot(comp_a) + axis.dot(comp_b);
        if k <= f32::EPSILON {
            return;
        }
        // 阻尼超过 1 会把相对转速反向
        let impulse = self.damping.min(1.0) * speed / k;
        a.apply_impulse(Vec3::ZERO, comp_a, impulse);
        b.apply_impulse(Vec3::ZERO, comp_b, -impulse);
    }
}
