//! 约束求解
//!
//! 顺序冲量法（逐行 Gauss-Seidel），按刚体对拆成任务后并行执行。
//! 每个刚体一把自旋锁，任务按刚体索引从小到大加锁，避免死锁。

mod group_solver;
mod group_task;
mod row;
mod setup;
pub mod simd;
mod solver_body;
mod spin_lock;
mod task;

pub use group_solver::{GroupConstraintSolver, SolveInput, SolverStats};
pub use group_task::{GroupRow, GroupTask};
pub use row::{resolve, resolve_generic, resolve_lower_limit, SolverRow};
pub use setup::pair_key;
pub use solver_body::{SolverBody, SolverBodyPool};
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use task::{ConstraintTask, ContactTask, DampingTask, RowSource, SolverTask};
