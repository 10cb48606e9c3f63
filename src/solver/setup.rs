//! 求解准备：由约束和接触流形生成任务

use std::collections::HashSet;

use glam::Vec3;
use log::trace;
use smallvec::SmallVec;

use super::group_task::{GroupRow, GroupTask};
use super::row::SolverRow;
use super::task::{ConstraintTask, ContactTask, DampingTask, RowSource, SolverTask};
use super::SolverBodyPool;
use crate::collision::{ManifoldPoint, PersistentManifold};
use crate::constraint::{ConstraintRow, RowContext};
use crate::math::{plane_space, Transform};
use crate::physics::{SkinnedMeshSystem, WorldConfig};

/// 约束行排序前的暂存
struct PendingRow {
    key: u64,
    body_a: usize,
    body_b: usize,
    row: SolverRow,
    source: RowSource,
}

/// 刚体对打包成 64 位键，A 在高位
#[inline]
pub fn pair_key(a: usize, b: usize) -> u64 {
    ((a as u64) << 32) | (b as u64 & 0xffff_ffff)
}

fn rig_transform(system: &SkinnedMeshSystem, bone: usize) -> Option<Transform> {
    system.bones.get(bone).map(|b| b.rig.transform)
}

/// 约束组任务（每个激活系统的每个组一个）
pub fn group_tasks(systems: &[SkinnedMeshSystem], offsets: &[usize], ctx: &RowContext) -> Vec<GroupTask> {
    let mut tasks = Vec::new();
    let mut scratch = Vec::new();
    for (s, system) in systems.iter().enumerate() {
        if !system.active {
            continue;
        }
        let offset = offsets[s];
        for group in &system.constraint_groups {
            let mut rows = Vec::new();
            for &ci in &group.constraints {
                let Some(c) = system.constraints.get(ci) else { continue };
                let (Some(tr_a), Some(tr_b)) = (rig_transform(system, c.bone_a), rig_transform(system, c.bone_b)) else {
                    continue;
                };
                scratch.clear();
                c.get_rows(&tr_a, &tr_b, ctx, &mut scratch);
                rows.extend(scratch.iter().map(|&row| GroupRow {
                    row,
                    body_a: offset + c.bone_a,
                    body_b: offset + c.bone_b,
                }));
            }
            if !rows.is_empty() {
                tasks.push(GroupTask::new(rows, group.iterations, group.use_mlcp));
            }
        }
    }
    tasks
}

/// 非接触任务：不在约束组里的约束行按刚体对归并，另加阻尼任务
///
/// 热启动冲量在这里直接施加到刚体上。返回 (任务, 行数)。
pub fn constraint_tasks(
    systems: &[SkinnedMeshSystem],
    offsets: &[usize],
    pool: &SolverBodyPool,
    ctx: &RowContext,
    warm_start_factor: f32,
) -> (Vec<SolverTask>, usize) {
    let mut pending = Vec::new();
    let mut tasks = Vec::new();
    let mut scratch = Vec::new();

    for (s, system) in systems.iter().enumerate() {
        if !system.active {
            continue;
        }
        let offset = offsets[s];
        let grouped: HashSet<usize> = system.constraint_groups.iter().flat_map(|g| g.constraints.iter().copied()).collect();

        for (ci, c) in system.constraints.iter().enumerate() {
            if !c.enabled {
                continue;
            }
            let (a, b) = (offset + c.bone_a, offset + c.bone_b);
            if let Some(damping) = c.angular_damping() {
                tasks.push(SolverTask::Damping(DampingTask { body_a: a, body_b: b, damping }));
            }
            if grouped.contains(&ci) {
                continue;
            }
            let (Some(tr_a), Some(tr_b)) = (rig_transform(system, c.bone_a), rig_transform(system, c.bone_b)) else {
                continue;
            };
            scratch.clear();
            c.get_rows(&tr_a, &tr_b, ctx, &mut scratch);
            for r in &scratch {
                let warm = c.warm_start_impulse(r.slot) * warm_start_factor;
                let row = pool.with_pair(a, b, |ba, bb| {
                    let mut row = SolverRow::new(r, ba, bb)?;
                    row.warm_start(ba, bb, warm);
                    Some(row)
                });
                if let Some(Some(row)) = row {
                    pending.push(PendingRow {
                        key: pair_key(a, b),
                        body_a: a,
                        body_b: b,
                        row,
                        source: RowSource { system: s, constraint: ci, slot: r.slot },
                    });
                }
            }
        }
    }

    let rows = pending.len();
    // 稳定排序，同一约束内的行序不变
    pending.sort_by_key(|p| p.key);
    let mut current: Option<ConstraintTask> = None;
    for p in pending {
        match &mut current {
            Some(t) if t.body_a == p.body_a && t.body_b == p.body_b => {
                t.rows.push(p.row);
                t.sources.push(p.source);
            }
            _ => {
                if let Some(t) = current.take() {
                    tasks.push(SolverTask::Constraint(t));
                }
                current = Some(ConstraintTask {
                    body_a: p.body_a,
                    body_b: p.body_b,
                    rows: vec![p.row],
                    sources: vec![p.source],
                });
            }
        }
    }
    if let Some(t) = current {
        tasks.push(SolverTask::Constraint(t));
    }
    (tasks, rows)
}

/// 接触任务：每个接触点一个
pub fn contact_tasks(manifolds: &[PersistentManifold], centers: &[Vec3], pool: &SolverBodyPool, config: &WorldConfig, dt: f32) -> Vec<SolverTask> {
    let mut tasks = Vec::new();
    for (mi, m) in manifolds.iter().enumerate() {
        let (Some(&ca), Some(&cb)) = (centers.get(m.body_a), centers.get(m.body_b)) else {
            trace!("[求解器] 流形引用了不存在的刚体 ({}, {})", m.body_a, m.body_b);
            continue;
        };
        for (pi, p) in m.points.iter().enumerate() {
            let task = pool.with_pair(m.body_a, m.body_b, |a, b| contact_task(p, ca, cb, a, b, config, dt)).flatten();
            if let Some(mut task) = task {
                task.body_a = m.body_a;
                task.body_b = m.body_b;
                task.source = (mi, pi);
                tasks.push(SolverTask::Contact(task));
            }
        }
    }
    tasks
}

fn contact_task(
    p: &ManifoldPoint,
    center_a: Vec3,
    center_b: Vec3,
    a: &super::SolverBody,
    b: &super::SolverBody,
    config: &WorldConfig,
    dt: f32,
) -> Option<ContactTask> {
    let n = p.normal_world_on_b.try_normalize()?;
    let ra = p.position_world_on_a - center_a;
    let rb = p.position_world_on_b - center_b;

    // J·v = n·(vA(ra) - vB(rb))，正值表示分离
    let mut normal = ConstraintRow { lower: 0.0, ..ConstraintRow::linear(-n, ra, rb, 0) };
    let (va, wa) = a.base_velocity();
    let (vb, wb) = b.base_velocity();
    let vel = (va + wa.cross(ra)) - (vb + wb.cross(rb));
    let rel_vel = n.dot(vel);

    let bounce = if rel_vel < -config.restitution_threshold { -rel_vel * p.combined_restitution } else { 0.0 };
    normal.error = if p.distance < 0.0 {
        let depth = (-p.distance - config.linear_slop).max(0.0);
        bounce + (depth * config.contact_erp / dt).min(config.max_corrective_velocity)
    } else {
        // 还没接触：允许本步靠近这段距离
        bounce - p.distance / dt
    };
    let normal = SolverRow::new(&normal, a, b)?;

    let mut friction = SmallVec::new();
    if p.combined_friction > 0.0 {
        let lateral = vel - n * rel_vel;
        let (t1, t2) = match lateral.try_normalize() {
            Some(t1) if lateral.length_squared() > f32::EPSILON => (t1, t1.cross(n).normalize_or_zero()),
            _ => plane_space(n),
        };
        for (slot, t) in [(1, t1), (2, t2)] {
            if t == Vec3::ZERO {
                continue;
            }
            let row = ConstraintRow { lower: 0.0, upper: 0.0, ..ConstraintRow::linear(-t, ra, rb, slot) };
            if let Some(row) = SolverRow::new(&row, a, b) {
                friction.push(row);
            }
        }
    }

    let rolling = if p.combined_rolling_friction > 0.0 {
        (wa - wb).try_normalize().and_then(|axis| {
            let row = ConstraintRow { lower: 0.0, upper: 0.0, ..ConstraintRow::angular(-axis, 3) };
            SolverRow::new(&row, a, b)
        })
    } else {
        None
    };

    Some(ContactTask {
        body_a: 0,
        body_b: 0,
        source: (0, 0),
        normal,
        friction,
        rolling,
        friction_coeff: p.combined_friction,
        rolling_coeff: p.combined_rolling_friction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_keys_sort_by_first_body() {
        assert!(pair_key(1, 100) < pair_key(2, 0));
        assert!(pair_key(3, 1) < pair_key(3, 2));
        assert_ne!(pair_key(1, 2), pair_key(2, 1));
    }
}
