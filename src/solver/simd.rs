//! AVX/FMA 求解行内核
//!
//! 一个刚体的 (Δv, Δω) 打包进一个 256 位寄存器的前 6 个通道，
//! J·Δv 用两次乘加加一次水平求和完成。CPU 不支持时退回标量内核。
//! 结果与标量内核只在舍入误差范围内一致。

use once_cell::sync::Lazy;

use super::row::{resolve_generic, resolve_lower_limit, SolverRow};
use super::SolverBody;

static AVX_FMA: Lazy<bool> = Lazy::new(detect);

#[cfg(target_arch = "x86_64")]
fn detect() -> bool {
    is_x86_feature_detected!("avx") && is_x86_feature_detected!("fma") && is_x86_feature_detected!("sse4.1")
}

#[cfg(not(target_arch = "x86_64"))]
fn detect() -> bool {
    false
}

/// 当前 CPU 是否可以使用向量内核
pub fn available() -> bool {
    *AVX_FMA
}

pub fn resolve(row: &mut SolverRow, a: &mut SolverBody, b: &mut SolverBody, lower_only: bool) -> f32 {
    #[cfg(target_arch = "x86_64")]
    if available() {
        // SAFETY: 已检测 avx/fma/sse4.1
        return unsafe { avx::resolve(row, a, b, lower_only) };
    }
    if lower_only {
        resolve_lower_limit(row, a, b)
    } else {
        resolve_generic(row, a, b)
    }
}

#[cfg(target_arch = "x86_64")]
mod avx {
    use std::arch::x86_64::*;

    use glam::Vec3;

    use super::{SolverBody, SolverRow};

    #[inline(always)]
    fn pack(lin: Vec3, ang: Vec3) -> [f32; 8] {
        [lin.x, lin.y, lin.z, ang.x, ang.y, ang.z, 0.0, 0.0]
    }

    #[inline(always)]
    fn unpack(v: &[f32; 8]) -> (Vec3, Vec3) {
        (Vec3::new(v[0], v[1], v[2]), Vec3::new(v[3], v[4], v[5]))
    }

    #[target_feature(enable = "avx,fma,sse4.1")]
    unsafe fn hsum(v: __m256) -> f32 {
        let lo = _mm256_castps256_ps128(v);
        let hi = _mm256_extractf128_ps(v, 1);
        let s = _mm_add_ps(lo, hi);
        let s = _mm_hadd_ps(s, s);
        let s = _mm_hadd_ps(s, s);
        _mm_cvtss_f32(s)
    }

    #[target_feature(enable = "avx,fma,sse4.1")]
    pub unsafe fn resolve(row: &mut SolverRow, a: &mut SolverBody, b: &mut SolverBody, lower_only: bool) -> f32 {
        let ja = pack(row.lin_a, row.ang_a);
        let jb = pack(row.lin_b, row.ang_b);
        let da = pack(a.delta_linear_velocity, a.delta_angular_velocity);
        let db = pack(b.delta_linear_velocity, b.delta_angular_velocity);

        let ja = _mm256_loadu_ps(ja.as_ptr());
        let jb = _mm256_loadu_ps(jb.as_ptr());
        let va = _mm256_loadu_ps(da.as_ptr());
        let vb = _mm256_loadu_ps(db.as_ptr());

        let dot = _mm256_fmadd_ps(jb, vb, _mm256_mul_ps(ja, va));
        let dv = hsum(dot);

        let delta = row.rhs - row.applied_impulse * row.cfm - dv * row.jac_diag_inv;
        let upper = if lower_only { f32::INFINITY } else { row.upper };
        let sum = (row.applied_impulse + delta).clamp(row.lower, upper);
        let delta = sum - row.applied_impulse;
        row.applied_impulse = sum;

        let d = _mm256_set1_ps(delta);
        if a.dynamic {
            let ma = _mm256_loadu_ps(pack(row.lin_a * a.inv_mass, row.ang_comp_a).as_ptr());
            let mut out = [0.0f32; 8];
            _mm256_storeu_ps(out.as_mut_ptr(), _mm256_fmadd_ps(ma, d, va));
            (a.delta_linear_velocity, a.delta_angular_velocity) = unpack(&out);
        }
        if b.dynamic {
            let mb = _mm256_loadu_ps(pack(row.lin_b * b.inv_mass, row.ang_comp_b).as_ptr());
            let mut out = [0.0f32; 8];
            _mm256_storeu_ps(out.as_mut_ptr(), _mm256_fmadd_ps(mb, d, vb));
            (b.delta_linear_velocity, b.delta_angular_velocity) = unpack(&out);
        }
        delta
    }
}
