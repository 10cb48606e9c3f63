//! 碰撞分派器
//!
//! 接管宽相碰撞对到窄相的分派：
//! - 双方都是普通对象（骨骼碰撞球）：默认近场回调，球-球接触
//! - 双方都是蒙皮网格：并行筛选 → 并行蒙皮与形状刷新 → 并行逐对窄相
//!
//! 流形不跨步保留，每次分派前清空。

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use log::{debug, trace};
use rayon::prelude::*;

use super::algorithm::{BodyContext, SkinnedMeshAlgorithm};
use super::narrow_phase::check_sphere_sphere;
use super::{ManifoldPoint, PersistentManifold};
use crate::math::Aabb;
use crate::mesh::SkinnedMeshBody;
use crate::physics::SkinnedMeshSystem;

/// 碰撞对象的种类
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CollisionObjectKind {
    /// 骨骼自带的碰撞球
    Generic { system: usize, bone: usize, radius: f32 },
    /// 蒙皮网格
    SkinnedMesh { system: usize, body: usize },
}

/// 参与宽相的碰撞对象
#[derive(Clone, Copy, Debug)]
pub struct CollisionObject {
    pub kind: CollisionObjectKind,
    pub aabb: Aabb,
}

/// 一次分派所需的世界状态
pub struct DispatchInput<'a> {
    pub systems: &'a mut [SkinnedMeshSystem],
    /// 每个系统的骨骼在世界刚体数组中的起始索引
    pub body_offsets: &'a [usize],
    pub objects: &'a [CollisionObject],
    /// 宽相重叠对（对象索引）
    pub pairs: &'a [(usize, usize)],
    /// 被约束连接、不参与碰撞的刚体对（小索引在前）
    pub linked: &'a HashSet<(usize, usize)>,
}

/// 筛选阶段并发写入的结果
#[derive(Default)]
struct Triage {
    pairs: Vec<((usize, usize), (usize, usize))>,
    touched: HashSet<(usize, usize)>,
}

impl Triage {
    fn push(&mut self, a: (usize, usize), b: (usize, usize)) {
        self.pairs.push((a, b));
        self.touched.insert(a);
        self.touched.insert(b);
    }
}

#[derive(Default)]
pub struct CollisionDispatcher {
    pub algorithm: SkinnedMeshAlgorithm,
    /// 并行筛选/刷新（关闭时全部顺序执行）
    pub parallel: bool,
    manifolds: Vec<PersistentManifold>,
    /// 分派次数，body 用它判断上一步位置是否连续
    step: u64,
}

impl CollisionDispatcher {
    pub fn new(algorithm: SkinnedMeshAlgorithm, parallel: bool) -> Self {
        Self { algorithm, parallel, manifolds: Vec::new(), step: 0 }
    }

    pub fn manifolds(&self) -> &[PersistentManifold] {
        &self.manifolds
    }

    pub fn manifolds_mut(&mut self) -> &mut Vec<PersistentManifold> {
        &mut self.manifolds
    }

    pub fn clear_manifolds(&mut self) {
        self.manifolds.clear();
    }

    pub fn num_contacts(&self) -> usize {
        self.manifolds.iter().map(|m| m.num_contacts()).sum()
    }

    pub fn dispatch_all_collision_pairs(&mut self, input: DispatchInput) {
        self.clear_manifolds();
        self.step = self.step.wrapping_add(1);
        let step = self.step;
        let DispatchInput { systems, body_offsets, objects, pairs, linked } = input;

        // 1. 分流，蒙皮网格对并行筛选
        let triage = Mutex::new(Triage::default());
        let mut generic_pairs = Vec::new();
        {
            let systems: &[SkinnedMeshSystem] = systems;
            let filter = |&(i, j): &(usize, usize)| {
                let (CollisionObjectKind::SkinnedMesh { system: sa, body: ba }, CollisionObjectKind::SkinnedMesh { system: sb, body: bb }) =
                    (objects[i].kind, objects[j].kind)
                else {
                    return;
                };
                let (Some(a), Some(b)) = (body_ref(systems, sa, ba), body_ref(systems, sb, bb)) else {
                    return;
                };
                if !a.can_collide_with(b) || !a.aabb.collide_with(&b.aabb) || !a.bounding_spheres_collide(b) {
                    return;
                }
                record(&triage, (sa, ba), (sb, bb));
            };
            if self.parallel {
                pairs.par_iter().for_each(filter);
            } else {
                pairs.iter().for_each(filter);
            }

            for &(i, j) in pairs {
                match (objects[i].kind, objects[j].kind) {
                    (CollisionObjectKind::Generic { .. }, CollisionObjectKind::Generic { .. }) => generic_pairs.push((i, j)),
                    (CollisionObjectKind::SkinnedMesh { .. }, CollisionObjectKind::SkinnedMesh { .. }) => {}
                    _ => trace!("[碰撞分派] 忽略普通对象与蒙皮网格的碰撞对 ({i}, {j})"),
                }
            }
        }
        let Triage { pairs: mut mesh_pairs, touched } = into_triage(triage);
        // 并行写入顺序不定，排序后结果与顺序执行一致
        mesh_pairs.sort_unstable();

        // 2. 参与碰撞的 body 先蒙皮，再刷新形状，各自只做一次
        let mut bodies: Vec<&mut SkinnedMeshBody> = Vec::with_capacity(touched.len());
        for (s, system) in systems.iter_mut().enumerate() {
            for (b, body) in system.bodies.iter_mut().enumerate() {
                if touched.contains(&(s, b)) {
                    bodies.push(body);
                }
            }
        }
        if self.parallel {
            bodies.par_iter_mut().for_each(|b| b.skin_vertices(step));
            bodies.par_iter_mut().for_each(|b| b.update_shape());
        } else {
            bodies.iter_mut().for_each(|b| b.skin_vertices(step));
            bodies.iter_mut().for_each(|b| b.update_shape());
        }
        drop(bodies);

        // 3. 逐对窄相
        let systems: &[SkinnedMeshSystem] = systems;
        let algorithm = self.algorithm;
        let process = |&((sa, ba), (sb, bb)): &((usize, usize), (usize, usize))| -> Vec<PersistentManifold> {
            let (Some(a), Some(b)) = (body_ref(systems, sa, ba), body_ref(systems, sb, bb)) else {
                return Vec::new();
            };
            if !a.shape.tree().collapse_collide(b.shape.tree()) {
                return Vec::new();
            }
            let ctx_a = BodyContext { body: a, bones: &systems[sa].bones, body_offset: body_offsets[sa] };
            let ctx_b = BodyContext { body: b, bones: &systems[sb].bones, body_offset: body_offsets[sb] };
            algorithm.process_collision(&ctx_a, &ctx_b, linked)
        };
        let results: Vec<Vec<PersistentManifold>> = if self.parallel {
            mesh_pairs.par_iter().map(process).collect()
        } else {
            mesh_pairs.iter().map(process).collect()
        };
        for manifolds in results {
            self.manifolds.extend(manifolds);
        }

        // 4. 普通对象
        for (i, j) in generic_pairs {
            if let Some(m) = default_near_callback(systems, body_offsets, linked, &objects[i], &objects[j]) {
                self.manifolds.push(m);
            }
        }

        debug!(
            "[碰撞分派] 蒙皮网格对 {}, 刷新 body {}, 流形 {}",
            mesh_pairs.len(),
            touched.len(),
            self.manifolds.len()
        );
    }
}

/// 某个筛选任务 panic 过也继续记录，不丢失碰撞对
fn record(triage: &Mutex<Triage>, a: (usize, usize), b: (usize, usize)) {
    triage.lock().unwrap_or_else(PoisonError::into_inner).push(a, b);
}

fn into_triage(triage: Mutex<Triage>) -> Triage {
    triage.into_inner().unwrap_or_else(PoisonError::into_inner)
}

fn body_ref(systems: &[SkinnedMeshSystem], system: usize, body: usize) -> Option<&SkinnedMeshBody> {
    systems.get(system).and_then(|s| s.bodies.get(body))
}

/// 骨骼碰撞球之间的默认处理
fn default_near_callback(
    systems: &[SkinnedMeshSystem],
    body_offsets: &[usize],
    linked: &HashSet<(usize, usize)>,
    a: &CollisionObject,
    b: &CollisionObject,
) -> Option<PersistentManifold> {
    let CollisionObjectKind::Generic { system: sa, bone: ia, radius: ra } = a.kind else {
        return None;
    };
    let CollisionObjectKind::Generic { system: sb, bone: ib, radius: rb } = b.kind else {
        return None;
    };
    let bone_a = systems.get(sa)?.bones.get(ia)?;
    let bone_b = systems.get(sb)?.bones.get(ib)?;
    let ga = body_offsets[sa] + ia;
    let gb = body_offsets[sb] + ib;
    if ga == gb || (bone_a.is_kinematic() && bone_b.is_kinematic()) {
        return None;
    }
    if linked.contains(&(ga.min(gb), ga.max(gb))) || !bone_a.can_collide_with(bone_b) {
        return None;
    }

    let res = check_sphere_sphere(bone_a.rig.transform.translation, bone_b.rig.transform.translation, ra, rb)?;
    let mut manifold = PersistentManifold::new(ga, gb);
    manifold.add_point(ManifoldPoint {
        position_world_on_a: res.pos_a,
        position_world_on_b: res.pos_b,
        normal_world_on_b: -res.normal,
        distance: res.depth,
        combined_friction: bone_a.rig.friction * bone_b.rig.friction,
        combined_restitution: bone_a.rig.restitution * bone_b.rig.restitution,
        combined_rolling_friction: bone_a.rig.rolling_friction * bone_b.rig.rolling_friction,
        applied_impulse: 0.0,
    });
    Some(manifold)
}
