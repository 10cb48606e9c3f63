//! 约束组
//!
//! 一组紧耦合的约束（例如一串头发骨骼），在求解准备阶段整体用稠密方法
//! 解一次，不再拆成逐行任务。

use log::warn;

/// 约束组定义：成员是系统内的约束索引
#[derive(Clone, Debug, Default)]
pub struct ConstraintGroup {
    pub constraints: Vec<usize>,
    /// 稠密求解的迭代次数
    pub iterations: usize,
    /// false 时只用逐行迭代，不建稠密矩阵
    pub use_mlcp: bool,
}

impl ConstraintGroup {
    pub fn new(constraints: Vec<usize>) -> Self {
        Self { constraints, iterations: 16, use_mlcp: true }
    }

    pub fn contains(&self, constraint: usize) -> bool {
        self.constraints.contains(&constraint)
    }
}

/// 投影 Gauss-Seidel 求解混合线性互补问题
///
/// `a` 为 n×n 行主序矩阵，求 x 使 a·x ≈ b 且 lo <= x <= hi。
/// 出现非有限值的变量置零后继续，最后返回 false。
pub fn solve_mlcp(a: &[f32], b: &[f32], lo: &[f32], hi: &[f32], x: &mut [f32], iterations: usize) -> bool {
    let n = b.len();
    if a.len() != n * n || lo.len() != n || hi.len() != n || x.len() != n {
        warn!("[约束组] 稠密求解尺寸不一致: n={n}, a={}", a.len());
        return false;
    }
    let mut ok = true;
    for _ in 0..iterations {
        for i in 0..n {
            let diag = a[i * n + i];
            if diag <= 0.0 {
                continue;
            }
            let row = &a[i * n..(i + 1) * n];
            let ax: f32 = row.iter().zip(x.iter()).map(|(aij, xj)| aij * xj).sum();
            let next = (x[i] + (b[i] - ax) / diag).clamp(lo[i], hi[i]);
            if next.is_finite() {
                x[i] = next;
            } else {
                x[i] = 0.0;
                ok = false;
            }
        }
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const INF: f32 = f32::INFINITY;

    #[test]
    fn unbounded_system_converges() {
        let a = [4.0, 1.0, 1.0, 3.0];
        let b = [1.0, 2.0];
        let mut x = [0.0; 2];
        assert!(solve_mlcp(&a, &b, &[-INF; 2], &[INF; 2], &mut x, 50));
        assert_abs_diff_eq!(x[0], 1.0 / 11.0, epsilon = 1e-4);
        assert_abs_diff_eq!(x[1], 7.0 / 11.0, epsilon = 1e-4);
    }

    #[test]
    fn bounds_are_respected() {
        let a = [2.0, 0.0, 0.0, 2.0];
        let b = [-4.0, 4.0];
        let mut x = [0.0; 2];
        solve_mlcp(&a, &b, &[0.0, 0.0], &[INF, 1.0], &mut x, 10);
        assert_eq!(x, [0.0, 1.0]);
    }

    #[test]
    fn non_finite_values_fall_back_to_zero() {
        let a = [1.0, 0.0, 0.0, 1.0];
        let b = [f32::NAN, 1.0];
        let mut x = [0.0; 2];
        assert!(!solve_mlcp(&a, &b, &[-INF; 2], &[INF; 2], &mut x, 4));
        assert_eq!(x[0], 0.0);
        assert_abs_diff_eq!(x[1], 1.0, epsilon = 1e-6);
    }
}
