//! 物理世界配置
//!
//! 所有参数扁平化，构造 `SkinnedMeshWorld` 时显式传入。

use glam::Vec3;

/// 帧间隔指数平滑系数：avg = avg * 0.875 + interval * 0.125
pub const DEFAULT_SMOOTHING_FACTOR: f32 = 0.875;
/// 累积时间超过 tick 的这个比例才推进模拟
pub const DEFAULT_STEP_THRESHOLD: f32 = 0.25;

/// 物理世界配置（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct WorldConfig {
    // ========== 重力 ==========
    /// 重力加速度，默认 (0, -9.8, 0)
    pub gravity: Vec3,

    // ========== 步进 ==========
    /// 最低物理帧率，tick = 1 / min_fps，默认 60
    pub min_fps: f32,
    /// 每次 step_simulation 的最大子步数，默认 4
    pub max_sub_steps: usize,
    /// 帧间隔平滑系数，默认 0.875
    pub smoothing_factor: f32,
    /// 推进阈值（tick 的比例），默认 0.25
    pub step_threshold: f32,

    // ========== 求解器 ==========
    /// 求解器迭代次数，默认 10
    pub solver_iterations: usize,
    /// 前多少比例的迭代把接触与非接触任务合并执行，默认 0.75
    pub fast_phase_ratio: f32,
    /// 接触穿透修正系数，默认 0.2
    pub contact_erp: f32,
    /// 约束误差修正系数，默认 0.2
    pub constraint_erp: f32,
    /// 穿透修正产生的最大速度，默认 5.0
    pub max_corrective_velocity: f32,
    /// 允许的穿透深度，小于它不做位置修正，默认 0.001
    pub linear_slop: f32,
    /// 低于该相对速度不产生反弹，默认 0.05
    pub restitution_threshold: f32,
    /// 约束行冲量热启动系数，0 关闭，默认 0.85
    pub warm_start_factor: f32,
    /// 任务乱序的随机种子，默认 0x5eed
    pub shuffle_seed: u64,
    /// 任务是否并行执行，默认 true
    pub parallel: bool,
    /// CPU 支持时使用 AVX/FMA 行求解，默认 true
    pub simd_rows: bool,

    // ========== 刚体 ==========
    /// 速度上限，超过或出现 NaN 时钳制，默认 1e9
    pub max_velocity: f32,

    // ========== 碰撞 ==========
    /// 顶点-三角形使用扫掠检测，默认 true
    pub swept_collision: bool,
    /// 叶节点对数量达到该值时并行窄相，0 表示使用线程数，默认 0
    pub parallel_pair_threshold: usize,

    // ========== 调试 ==========
    /// 是否输出逐步调试日志，默认 false
    pub debug_log: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.8, 0.0),

            min_fps: 60.0,
            max_sub_steps: 4,
            smoothing_factor: DEFAULT_SMOOTHING_FACTOR,
            step_threshold: DEFAULT_STEP_THRESHOLD,

            solver_iterations: 10,
            fast_phase_ratio: 0.75,
            contact_erp: 0.2,
            constraint_erp: 0.2,
            max_corrective_velocity: 5.0,
            linear_slop: 0.001,
            restitution_threshold: 0.05,
            warm_start_factor: 0.85,
            shuffle_seed: 0x5eed,
            parallel: true,
            simd_rows: true,

            max_velocity: 1e9,

            swept_collision: true,
            parallel_pair_threshold: 0,

            debug_log: false,
        }
    }
}

impl WorldConfig {
    /// 固定步长
    pub fn time_tick(&self) -> f32 {
        if self.min_fps > 0.0 {
            1.0 / self.min_fps
        } else {
            1.0 / 60.0
        }
    }

    /// 快速阶段的迭代次数
    pub fn fast_iterations(&self) -> usize {
        let n = (self.solver_iterations as f32 * self.fast_phase_ratio.clamp(0.0, 1.0)).round() as usize;
        n.min(self.solver_iterations)
    }

    /// 并行窄相的叶节点对阈值
    pub fn pair_threshold(&self) -> usize {
        if self.parallel_pair_threshold > 0 {
            self.parallel_pair_threshold
        } else {
            rayon::current_num_threads()
        }
    }
}
