//! 约束组任务
//!
//! 组内所有约束行一起求解：锁住组涉及的全部刚体，
//! 稠密模式下建 A = J·M⁻¹·Jᵀ + cfm，用投影 Gauss-Seidel 解一次；
//! 否则对组内的行做若干轮逐行迭代。

use log::debug;

use super::row::{resolve_generic, SolverRow};
use super::{SolverBody, SolverBodyPool};
use crate::constraint::{solve_mlcp, ConstraintRow};

#[derive(Clone, Debug)]
pub struct GroupRow {
    pub row: ConstraintRow,
    pub body_a: usize,
    pub body_b: usize,
}

#[derive(Clone, Debug, Default)]
pub struct GroupTask {
    /// 升序、不重复的刚体索引
    pub bodies: Vec<usize>,
    pub rows: Vec<GroupRow>,
    pub iterations: usize,
    pub use_mlcp: bool,
}

impl GroupTask {
    pub fn new(rows: Vec<GroupRow>, iterations: usize, use_mlcp: bool) -> Self {
        let mut bodies: Vec<usize> = rows.iter().flat_map(|r| [r.body_a, r.body_b]).collect();
        bodies.sort_unstable();
        bodies.dedup();
        Self { bodies, rows, iterations, use_mlcp }
    }

    pub fn solve(&self, pool: &SolverBodyPool) -> bool {
        if self.rows.is_empty() {
            return true;
        }
        let Self { bodies: indices, rows, iterations, use_mlcp } = self;
        let local = |g: usize| indices.binary_search(&g).ok();
        let mapped: Option<Vec<(usize, usize)>> = rows.iter().map(|r| Some((local(r.body_a)?, local(r.body_b)?))).collect();
        let Some(mapped) = mapped else {
            return false;
        };

        pool.with_bodies(indices, |bodies| {
            let solver_rows: Vec<Option<SolverRow>> = rows
                .iter()
                .zip(&mapped)
                .map(|(r, &(la, lb))| SolverRow::new(&r.row, &*bodies[la], &*bodies[lb]))
                .collect();
            if *use_mlcp {
                solve_dense(rows, &mapped, &solver_rows, bodies, *iterations)
            } else {
                solve_iterative(&mapped, solver_rows, bodies, *iterations);
                true
            }
        })
        .unwrap_or(false)
    }
}

fn solve_dense(rows: &[GroupRow], mapped: &[(usize, usize)], solver_rows: &[Option<SolverRow>], bodies: &mut [&mut SolverBody], iterations: usize) -> bool {
    // 只保留有效行
    let active: Vec<usize> = (0..rows.len()).filter(|&i| solver_rows[i].is_some()).collect();
    let n = active.len();
    if n == 0 {
        return true;
    }
    let mut a = vec![0.0f32; n * n];
    let mut b = vec![0.0f32; n];
    let mut lo = vec![0.0f32; n];
    let mut hi = vec![0.0f32; n];
    for (p, &i) in active.iter().enumerate() {
        let Some(ri) = &solver_rows[i] else { continue };
        let (ia, ib) = mapped[i];
        for (q, &j) in active.iter().enumerate() {
            let Some(rj) = &solver_rows[j] else { continue };
            let (ja, jb) = mapped[j];
            let mut v = 0.0;
            for (bi, li, ai) in [(ia, ri.lin_a, ri.ang_a), (ib, ri.lin_b, ri.ang_b)] {
                for (bj, lj, cj) in [(ja, rj.lin_a, rj.ang_comp_a), (jb, rj.lin_b, rj.ang_comp_b)] {
                    if bi == bj {
                        v += bodies[bi].inv_mass * li.dot(lj) + ai.dot(cj);
                    }
                }
            }
            a[p * n + q] = v;
        }
        a[p * n + p] += rows[i].row.cfm;
        b[p] = rows[i].row.error - ri.relative_velocity(&*bodies[ia], &*bodies[ib]);
        lo[p] = rows[i].row.lower;
        hi[p] = rows[i].row.upper;
    }

    let mut x = vec![0.0f32; n];
    let ok = solve_mlcp(&a, &b, &lo, &hi, &mut x, iterations);
    if !ok {
        debug!("[约束组] 稠密求解出现非有限值，{} 行中的异常变量已置零", n);
    }
    for (p, &i) in active.iter().enumerate() {
        let Some(r) = &solver_rows[i] else { continue };
        let (ia, ib) = mapped[i];
        bodies[ia].apply_impulse(r.lin_a, r.ang_comp_a, x[p]);
        bodies[ib].apply_impulse(r.lin_b, r.ang_comp_b, x[p]);
    }
    ok
}

fn solve_iterative(mapped: &[(usize, usize)], solver_rows: Vec<Option<SolverRow>>, bodies: &mut [&mut SolverBody], iterations: usize) {
    let mut rows: Vec<(SolverRow, usize, usize)> =
        solver_rows.into_iter().zip(mapped).filter_map(|(r, &(a, b))| Some((r?, a, b))).collect();
    for _ in 0..iterations {
        for (row, a, b) in &mut rows {
            if let Some((ba, bb)) = pair_mut(bodies, *a, *b) {
                resolve_generic(row, ba, bb);
            }
        }
    }
}

fn pair_mut<'a>(bodies: &'a mut [&mut SolverBody], i: usize, j: usize) -> Option<(&'a mut SolverBody, &'a mut SolverBody)> {
    if i == j || i >= bodies.len() || j >= bodies.len() {
        return None;
    }
    if i < j {
        let (lo, hi) = bodies.split_at_mut(j);
        Some((&mut *lo[i], &mut *hi[0]))
    } else {
        let (lo, hi) = bodies.split_at_mut(i);
        Some((&mut *hi[0], &mut *lo[j]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use glam::{Mat3, Vec3};

    fn dynamic(v: Vec3) -> SolverBody {
        SolverBody {
            linear_velocity: v,
            inv_mass: 1.0,
            inv_inertia_world: Mat3::IDENTITY,
            dynamic: true,
            ..SolverBody::fixed()
        }
    }

    /// 固定点 0 - 刚体 1 - 刚体 2 串成一条链，沿 x 锁定相对速度
    fn chain() -> (SolverBodyPool, Vec<GroupRow>) {
        let pool = SolverBodyPool::new(vec![SolverBody::fixed(), dynamic(Vec3::X), dynamic(Vec3::new(3.0, 0.0, 0.0))]);
        let row = ConstraintRow::linear(Vec3::X, Vec3::ZERO, Vec3::ZERO, 0);
        let rows = vec![
            GroupRow { row, body_a: 0, body_b: 1 },
            GroupRow { row, body_a: 1, body_b: 2 },
        ];
        (pool, rows)
    }

    #[test]
    fn dense_solve_satisfies_coupled_rows() {
        let (pool, rows) = chain();
        let task = GroupTask::new(rows, 100, true);
        assert_eq!(task.bodies, vec![0, 1, 2]);
        assert!(task.solve(&pool));
        let bodies = pool.into_bodies();
        assert_abs_diff_eq!(bodies[1].velocity().0.x, 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(bodies[2].velocity().0.x, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn iterative_mode_converges_too() {
        let (pool, rows) = chain();
        let task = GroupTask::new(rows, 100, false);
        assert!(task.solve(&pool));
        let bodies = pool.into_bodies();
        assert_abs_diff_eq!(bodies[2].velocity().0.x, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn pair_mut_handles_order() {
        let mut a = SolverBody::fixed();
        let mut b = dynamic(Vec3::X);
        let mut refs = vec![&mut a, &mut b];
        let (x, y) = pair_mut(&mut refs, 1, 0).unwrap();
        assert!(x.dynamic && !y.dynamic);
        assert!(pair_mut(&mut refs, 1, 1).is_none());
    }
}
