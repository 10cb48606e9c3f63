//! 蒙皮网格物理世界
//!
//! 持有所有系统、宽相、碰撞分派器和求解器。宿主每帧调用一次 [`SkinnedMeshWorld::do_update`]：
//!
//! 1. 帧间隔指数平滑，累积时间超过 tick 的一定比例才推进
//! 2. 读取骨架 → 重新居中 → 若干子步 → 恢复位置 → 写回骨架
//!
//! 每个子步：重力 → 预测 → 碰撞检测 → 约束缩放 → 求解 → 积分 → 刷新骨骼与碰撞体。

use std::collections::HashSet;

use glam::Vec3;
use log::{debug, info};

use super::{SkinnedMeshSystem, WorldConfig};
use crate::collision::{Broadphase, CollisionDispatcher, CollisionObject, CollisionObjectKind, DispatchInput, SkinnedMeshAlgorithm};
use crate::math::{Aabb, EPSILON};
use crate::skeleton::JointProvider;
use crate::solver::{GroupConstraintSolver, SolveInput};
use crate::{PhysicsError, Result};

/// 世界中系统的句柄，移除后不会复用
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId(u64);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WorldStats {
    /// step_simulation 调用次数
    pub simulate_calls: usize,
    /// 累计子步数
    pub substeps: usize,
    /// 累计模拟时间
    pub simulated_time: f32,
    /// 以下为最近一个子步
    pub manifolds: usize,
    pub contacts: usize,
    pub tasks: usize,
}

pub struct SkinnedMeshWorld {
    config: WorldConfig,
    systems: Vec<SkinnedMeshSystem>,
    ids: Vec<SystemId>,
    next_id: u64,
    /// 每个系统第一根骨骼在全局刚体数组中的索引
    body_offsets: Vec<usize>,
    /// 被约束连接的全局刚体对
    linked: HashSet<(usize, usize)>,
    objects: Vec<CollisionObject>,
    aabbs: Vec<Aabb>,
    broadphase: Broadphase,
    dispatcher: CollisionDispatcher,
    solver: GroupConstraintSolver,
    averaged_interval: f32,
    accumulated_interval: f32,
    stats: WorldStats,
}

impl SkinnedMeshWorld {
    pub fn new(config: WorldConfig) -> Self {
        let algorithm = SkinnedMeshAlgorithm {
            swept: config.swept_collision,
            parallel_threshold: config.pair_threshold(),
        };
        info!(
            "[物理世界] tick={:.4}s, 最大子步={}, 迭代={}, 并行={}",
            config.time_tick(),
            config.max_sub_steps,
            config.solver_iterations,
            config.parallel
        );
        Self {
            dispatcher: CollisionDispatcher::new(algorithm, config.parallel),
            solver: GroupConstraintSolver::new(config.shuffle_seed),
            averaged_interval: config.time_tick(),
            accumulated_interval: 0.0,
            config,
            systems: Vec::new(),
            ids: Vec::new(),
            next_id: 0,
            body_offsets: Vec::new(),
            linked: HashSet::new(),
            objects: Vec::new(),
            aabbs: Vec::new(),
            broadphase: Broadphase::new(),
            stats: WorldStats::default(),
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn stats(&self) -> WorldStats {
        self.stats
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.config.gravity = gravity;
        for system in &mut self.systems {
            system.set_gravity(gravity);
        }
    }

    pub fn add_system(&mut self, mut system: SkinnedMeshSystem) -> SystemId {
        let id = SystemId(self.next_id);
        self.next_id += 1;
        system.set_gravity(self.config.gravity);
        info!("[物理世界] 添加系统 {} ({} 骨骼, {} 形状)", system.name, system.bones.len(), system.bodies.len());
        self.systems.push(system);
        self.ids.push(id);
        self.rebuild_layout();
        id
    }

    /// 移除系统并交还所有权，之后可以重新添加
    pub fn remove_system(&mut self, id: SystemId) -> Option<SkinnedMeshSystem> {
        let index = self.index_of(id)?;
        self.ids.remove(index);
        let system = self.systems.remove(index);
        self.rebuild_layout();
        info!("[物理世界] 移除系统 {}", system.name);
        Some(system)
    }

    /// 移除全部系统（引擎关闭）
    pub fn clear(&mut self) {
        self.systems.clear();
        self.ids.clear();
        self.rebuild_layout();
        self.broadphase.clear();
        self.dispatcher.clear_manifolds();
        self.accumulated_interval = 0.0;
        self.averaged_interval = self.config.time_tick();
    }

    pub fn system(&self, id: SystemId) -> Option<&SkinnedMeshSystem> {
        self.index_of(id).map(|i| &self.systems[i])
    }

    pub fn system_mut(&mut self, id: SystemId) -> Option<&mut SkinnedMeshSystem> {
        self.index_of(id).map(|i| &mut self.systems[i])
    }

    pub fn systems(&self) -> impl Iterator<Item = (SystemId, &SkinnedMeshSystem)> {
        self.ids.iter().copied().zip(self.systems.iter())
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn set_active(&mut self, id: SystemId, active: bool) -> Result<()> {
        let system = self.system_mut(id).ok_or(PhysicsError::UnknownSystem(id))?;
        system.active = active;
        Ok(())
    }

    /// 瞬移：骨骼对齐骨架当前姿势，速度清零
    pub fn reset_system(&mut self, id: SystemId, joints: &dyn JointProvider) -> Result<()> {
        let system = self.system_mut(id).ok_or(PhysicsError::UnknownSystem(id))?;
        system.reset_transforms(joints);
        debug!("[物理世界] 重置系统 {}", system.name);
        Ok(())
    }

    fn index_of(&self, id: SystemId) -> Option<usize> {
        self.ids.iter().position(|&i| i == id)
    }

    fn rebuild_layout(&mut self) {
        self.body_offsets.clear();
        self.linked.clear();
        let mut offset = 0;
        for system in &self.systems {
            self.body_offsets.push(offset);
            self.linked.extend(system.linked_pairs().map(|(a, b)| (offset + a, offset + b)));
            offset += system.bones.len();
        }
    }

    /// 每帧调用，返回本次执行的子步数
    pub fn do_update(&mut self, interval: f32, joints: &mut dyn JointProvider) -> usize {
        if !interval.is_finite() || interval < 0.0 {
            return 0;
        }
        let smoothing = self.config.smoothing_factor;
        self.averaged_interval = self.averaged_interval * smoothing + interval * (1.0 - smoothing);
        let tick = self.averaged_interval.min(self.config.time_tick());
        self.accumulated_interval += interval;
        if self.accumulated_interval <= tick * self.config.step_threshold {
            return 0;
        }

        let remaining = self.accumulated_interval;
        self.accumulated_interval = 0.0;

        for system in self.systems.iter_mut().filter(|s| s.active) {
            system.read_transform(&*joints, remaining);
        }

        // 远离原点时先把刚体整体移到原点附近
        let center = self.centroid();
        self.translate_all(-center);

        let substeps = self.step_simulation(remaining, tick);

        self.translate_all(center);
        for system in self.systems.iter_mut().filter(|s| s.active) {
            // 运动学骨骼对齐本帧目标，消除子步截断带来的偏差
            for bone in system.bones.iter_mut().filter(|b| b.is_kinematic()) {
                let target = bone.rig.interpolation_transform;
                bone.rig.proceed_to_transform(target);
            }
            system.internal_update();
            system.write_transform(joints);
        }
        substeps
    }

    fn centroid(&self) -> Vec3 {
        let (sum, count) = self
            .systems
            .iter()
            .filter(|s| s.active)
            .flat_map(|s| s.bones.iter())
            .fold((Vec3::ZERO, 0usize), |(sum, n), b| (sum + b.rig.transform.translation, n + 1));
        if count == 0 {
            Vec3::ZERO
        } else {
            sum / count as f32
        }
    }

    fn translate_all(&mut self, offset: Vec3) {
        for system in self.systems.iter_mut().filter(|s| s.active) {
            system.translate(offset);
            system.internal_update();
        }
    }

    /// 以 tick 为步长推进 time，最多 max_sub_steps 个子步；不足一个 tick 的余量作为最后一个短步
    pub fn step_simulation(&mut self, time: f32, tick: f32) -> usize {
        if time <= 0.0 || tick <= 0.0 {
            return 0;
        }
        let max_steps = self.config.max_sub_steps.max(1);
        let budget = tick * max_steps as f32;
        let mut remaining = if time > budget {
            debug!("[物理世界] 间隔 {time:.4}s 超过 {max_steps} 个子步，截断");
            budget
        } else {
            time
        };

        self.stats.simulate_calls += 1;
        let mut steps = 0;
        while remaining > tick && steps < max_steps {
            self.internal_single_step(tick);
            remaining -= tick;
            steps += 1;
        }
        if remaining > EPSILON && steps < max_steps {
            self.internal_single_step(remaining);
            steps += 1;
        }
        steps
    }

    fn internal_single_step(&mut self, dt: f32) {
        // 重力与预测
        for system in self.systems.iter_mut().filter(|s| s.active) {
            for bone in &mut system.bones {
                bone.rig.apply_gravity();
                if !bone.is_kinematic() {
                    bone.rig.apply_damping(dt);
                    bone.rig.interpolation_transform = bone.rig.predict_integrated_transform(dt);
                }
            }
        }

        self.perform_discrete_collision_detection();

        for system in self.systems.iter_mut().filter(|s| s.active) {
            system.scale_constraints();
        }

        let solver_stats = self.solver.solve_group(
            SolveInput {
                systems: &mut self.systems,
                body_offsets: &self.body_offsets,
                manifolds: self.dispatcher.manifolds_mut(),
                dt,
            },
            &self.config,
        );

        // 积分：运动学刚体也按速度推进到目标
        let max_velocity = self.config.max_velocity;
        for system in self.systems.iter_mut().filter(|s| s.active) {
            for bone in &mut system.bones {
                let next = bone.rig.predict_integrated_transform(dt);
                bone.rig.proceed_to_transform(next);
                if !bone.is_kinematic() {
                    bone.rig.clamp_velocities(max_velocity);
                }
                bone.rig.clear_forces();
            }
            system.internal_update();
        }

        self.stats.substeps += 1;
        self.stats.simulated_time += dt;
        self.stats.manifolds = self.dispatcher.manifolds().len();
        self.stats.contacts = self.dispatcher.num_contacts();
        self.stats.tasks = solver_stats.tasks();
        if self.config.debug_log {
            debug!(
                "[物理世界] 子步 dt={dt:.4}, 流形 {}, 接触 {}, 任务 {}",
                self.stats.manifolds, self.stats.contacts, self.stats.tasks
            );
        }
    }

    fn perform_discrete_collision_detection(&mut self) {
        self.objects.clear();
        for (s, system) in self.systems.iter().enumerate() {
            if !system.active {
                continue;
            }
            for (bone, b) in system.bones.iter().enumerate() {
                if let Some(radius) = b.collision_radius {
                    self.objects.push(CollisionObject {
                        kind: CollisionObjectKind::Generic { system: s, bone, radius },
                        aabb: Aabb::from_point(b.rig.transform.translation, radius),
                    });
                }
            }
            for (body, m) in system.bodies.iter().enumerate() {
                self.objects.push(CollisionObject {
                    kind: CollisionObjectKind::SkinnedMesh { system: s, body },
                    aabb: m.aabb,
                });
            }
        }
        self.aabbs.clear();
        self.aabbs.extend(self.objects.iter().map(|o| o.aabb));

        let pairs = self.broadphase.update(&self.aabbs);
        self.dispatcher.dispatch_all_collision_pairs(DispatchInput {
            systems: &mut self.systems,
            body_offsets: &self.body_offsets,
            objects: &self.objects,
            pairs,
            linked: &self.linked,
        });
    }
}
