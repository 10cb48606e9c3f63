//! 蒙皮网格对蒙皮网格的窄相驱动
//!
//! 1. 按形状组合遍历两棵碰撞体树，得到叶节点对
//! 2. 叶节点对内先做包围盒小集合剪枝，再做精确测试，每对只保留最深的接触
//! 3. 接触按（A 骨骼, B 骨骼）加权合并，每个骨骼对只生成一个接触点
//!
//! 三角形之间不直接测试：三角形-三角形拆成两个方向的三角形-顶点。

use std::collections::HashSet;

use glam::Vec3;
use rayon::prelude::*;
use smallvec::SmallVec;

use super::narrow_phase::{
    check_sphere_sphere, check_sphere_triangle, check_sphere_triangle_swept, check_triangle_sphere,
    check_triangle_sphere_swept, CollisionResult,
};
use super::{Collider, ColliderPair, ManifoldPoint, PersistentManifold};
use crate::math::{Aabb, EPSILON};
use crate::mesh::{PerTriangleShape, PerVertexShape, ShapeData, SkinnedMeshBody, SkinnedMeshShape};
use crate::physics::SkinnedMeshBone;

/// (影响骨骼, 权重)
type Weights = SmallVec<[(usize, f32); 12]>;

/// 参与碰撞的 body 及其所在系统的骨骼
pub struct BodyContext<'a> {
    pub body: &'a SkinnedMeshBody,
    pub bones: &'a [SkinnedMeshBone],
    /// 系统骨骼在世界刚体数组中的起始索引
    pub body_offset: usize,
}

impl BodyContext<'_> {
    /// 碰撞体的骨骼权重，三角形取三个顶点的平均；低于阈值的影响丢弃
    fn collider_weights(&self, c: &Collider) -> Weights {
        let mut out = Weights::new();
        let is_point = c.vertices[0] == c.vertices[1] && c.vertices[1] == c.vertices[2];
        let scale = if is_point { 1.0 } else { 1.0 / 3.0 };
        let vertices: &[u32] = if is_point { &c.vertices[..1] } else { &c.vertices };
        for &v in vertices {
            for (b, w) in self.body.vertices[v as usize].influences() {
                let threshold = self.body.skinned_bones.get(b).map(|sb| sb.weight_threshold).unwrap_or(0.0);
                if w < threshold {
                    continue;
                }
                match out.iter_mut().find(|(k, _)| *k == b) {
                    Some((_, sum)) => *sum += w * scale,
                    None => out.push((b, w * scale)),
                }
            }
        }
        out
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct MergeEntry {
    weight: f32,
    normal: Vec3,
    pos_a: Vec3,
    pos_b: Vec3,
}

/// 按（A 影响骨骼, B 影响骨骼）累加的接触
///
/// 每个接触的权重为 (flexible * depth)^2 × 两侧蒙皮权重之积，
/// 位置按权重平均，法线按 权重 × 穿透深度 累加，
/// 合并后的深度取累加法线平均值的长度。
pub struct MergeBuffer {
    size_b: usize,
    entries: Vec<MergeEntry>,
}

impl MergeBuffer {
    pub fn new(size_a: usize, size_b: usize) -> Self {
        Self { size_b, entries: vec![MergeEntry::default(); size_a * size_b] }
    }

    pub fn add_contact(&mut self, res: &CollisionResult, flexible: f32, weights_a: &[(usize, f32)], weights_b: &[(usize, f32)]) {
        let penetration = -res.depth;
        if penetration <= 0.0 {
            return;
        }
        let w = flexible * penetration;
        let w = w * w;
        for &(ia, wa) in weights_a {
            for &(ib, wb) in weights_b {
                let ww = w * wa * wb;
                let Some(e) = self.entries.get_mut(ia * self.size_b + ib) else {
                    continue;
                };
                e.weight += ww;
                e.normal += res.normal * (penetration * ww);
                e.pos_a += res.pos_a * ww;
                e.pos_b += res.pos_b * ww;
            }
        }
    }

    /// 归一化后的合并接触，权重或法线过小时返回 None
    pub fn merged(&self, ia: usize, ib: usize) -> Option<CollisionResult> {
        let e = self.entries.get(ia * self.size_b + ib)?;
        if e.weight < EPSILON {
            return None;
        }
        let inv = 1.0 / e.weight;
        let normal = e.normal * inv;
        let len = normal.length();
        if len < EPSILON {
            return None;
        }
        Some(CollisionResult {
            pos_a: e.pos_a * inv,
            pos_b: e.pos_b * inv,
            normal: normal / len,
            depth: -len,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, CollisionResult)> + '_ {
        let size_b = self.size_b.max(1);
        (0..self.entries.len()).filter_map(move |i| {
            let (ia, ib) = (i / size_b, i % size_b);
            self.merged(ia, ib).map(|res| (ia, ib, res))
        })
    }
}

/// 形状的一种碰撞视图
#[derive(Clone, Copy)]
enum ShapeView<'a> {
    Vertices(&'a PerVertexShape),
    Triangles(&'a PerTriangleShape),
}

impl<'a> ShapeView<'a> {
    fn data(&self) -> &'a ShapeData {
        match self {
            Self::Vertices(s) => &s.data,
            Self::Triangles(s) => &s.data,
        }
    }
}

/// 叶节点对的最深接触
#[derive(Clone, Copy)]
struct LeafContact {
    res: CollisionResult,
    flexible: f32,
    a: Collider,
    b: Collider,
}

#[derive(Clone, Copy, Debug)]
pub struct SkinnedMeshAlgorithm {
    /// 顶点-三角形使用扫掠检测
    pub swept: bool,
    /// 叶节点对数量达到该值时并行
    pub parallel_threshold: usize,
}

impl Default for SkinnedMeshAlgorithm {
    fn default() -> Self {
        Self { swept: true, parallel_threshold: rayon::current_num_threads() }
    }
}

impl SkinnedMeshAlgorithm {
    /// 处理一对 body，返回新生成的接触流形（每个骨骼对一个）
    ///
    /// linked 中的全局刚体对（小索引在前）被约束连接，不生成接触。
    pub fn process_collision(&self, a: &BodyContext, b: &BodyContext, linked: &HashSet<(usize, usize)>) -> Vec<PersistentManifold> {
        let mut merge = MergeBuffer::new(a.body.skinned_bones.len(), b.body.skinned_bones.len());

        match (&a.body.shape, &b.body.shape) {
            (SkinnedMeshShape::PerVertex(sa), SkinnedMeshShape::PerVertex(sb)) => {
                self.check_collide(a, ShapeView::Vertices(sa), b, ShapeView::Vertices(sb), &mut merge);
            }
            (SkinnedMeshShape::PerVertex(sa), SkinnedMeshShape::PerTriangle(sb)) => {
                self.check_collide(a, ShapeView::Vertices(sa), b, ShapeView::Triangles(sb), &mut merge);
            }
            (SkinnedMeshShape::PerTriangle(sa), SkinnedMeshShape::PerVertex(sb)) => {
                self.check_collide(a, ShapeView::Triangles(sa), b, ShapeView::Vertices(sb), &mut merge);
            }
            (SkinnedMeshShape::PerTriangle(sa), SkinnedMeshShape::PerTriangle(sb)) => {
                self.check_collide(a, ShapeView::Triangles(sa), b, ShapeView::Vertices(&sb.vertex_shape), &mut merge);
                self.check_collide(a, ShapeView::Vertices(&sa.vertex_shape), b, ShapeView::Triangles(sb), &mut merge);
            }
        }

        self.apply(a, b, &merge, linked)
    }

    fn check_collide(&self, a: &BodyContext, va: ShapeView, b: &BodyContext, vb: ShapeView, merge: &mut MergeBuffer) {
        let mut pairs: Vec<ColliderPair> = Vec::new();
        va.data().tree.check_collision(&vb.data().tree, &mut pairs);
        if pairs.is_empty() {
            return;
        }

        let contacts: Vec<Option<LeafContact>> = if pairs.len() >= self.parallel_threshold {
            pairs
                .par_iter()
                .map_init(Vec::new, |scratch, pair| self.check_leaf_pair(a, va, b, vb, pair, scratch))
                .collect()
        } else {
            let mut scratch = Vec::new();
            pairs
                .iter()
                .map(|pair| self.check_leaf_pair(a, va, b, vb, pair, &mut scratch))
                .collect()
        };

        for contact in contacts.into_iter().flatten() {
            let wa = a.collider_weights(&contact.a);
            let wb = b.collider_weights(&contact.b);
            merge.add_contact(&contact.res, contact.flexible, &wa, &wb);
        }
    }

    /// 叶节点对：小集合剪枝后逐对精确测试，保留最深接触
    fn check_leaf_pair(
        &self,
        a: &BodyContext,
        va: ShapeView,
        b: &BodyContext,
        vb: ShapeView,
        pair: &ColliderPair,
        scratch: &mut Vec<usize>,
    ) -> Option<LeafContact> {
        let (na, nb) = *pair;
        let (da, db) = (va.data(), vb.data());
        let range_a = na.collider_range();
        let range_b = nb.collider_range();

        // 较小的一侧先筛出与对方节点包围盒相交的碰撞体
        let a_smaller = range_a.len() <= range_b.len();
        let (small_range, small_aabbs, other_mine) = if a_smaller {
            (range_a.clone(), &da.aabbs, &nb.aabb_mine)
        } else {
            (range_b.clone(), &db.aabbs, &na.aabb_mine)
        };
        scratch.clear();
        scratch.extend(small_range.filter(|&i| small_aabbs[i].collide_with(other_mine)));
        if scratch.is_empty() {
            return None;
        }

        let (large_range, large_aabbs, small_mine) = if a_smaller {
            (range_b, &db.aabbs, &na.aabb_mine)
        } else {
            (range_a, &da.aabbs, &nb.aabb_mine)
        };

        let mut best: Option<LeafContact> = None;
        for j in large_range {
            let aabb_j: &Aabb = &large_aabbs[j];
            if !aabb_j.collide_with(small_mine) {
                continue;
            }
            for &i in scratch.iter() {
                if !small_aabbs[i].collide_with(aabb_j) {
                    continue;
                }
                let (ia, ib) = if a_smaller { (i, j) } else { (j, i) };
                let ca = da.colliders[ia];
                let cb = db.colliders[ib];
                if ca.is_kinematic() && cb.is_kinematic() {
                    continue;
                }
                let Some(res) = self.check_colliders(a, va, &ca, b, vb, &cb) else {
                    continue;
                };
                if res.depth >= 0.0 {
                    continue;
                }
                if best.map_or(true, |c| res.depth < c.res.depth) {
                    best = Some(LeafContact { res, flexible: ca.flexible + cb.flexible, a: ca, b: cb });
                }
            }
        }
        best
    }

    fn check_colliders(
        &self,
        a: &BodyContext,
        va: ShapeView,
        ca: &Collider,
        b: &BodyContext,
        vb: ShapeView,
        cb: &Collider,
    ) -> Option<CollisionResult> {
        let (pa, pb) = (&a.body.vpos, &b.body.vpos);
        match (va, vb) {
            (ShapeView::Vertices(sa), ShapeView::Vertices(sb)) => {
                let p = pa[ca.vertex()];
                let q = pb[cb.vertex()];
                check_sphere_sphere(p.pos(), q.pos(), sa.radius(&p), sb.radius(&q))
            }
            (ShapeView::Vertices(sa), ShapeView::Triangles(sb)) => {
                let p = pa[ca.vertex()];
                let tri = sb.check_triangle(cb, pb);
                if self.swept {
                    let old = a.body.prev_vpos[ca.vertex()].pos();
                    check_sphere_triangle_swept(old, p.pos(), sa.radius(&p), &tri)
                } else {
                    check_sphere_triangle(p.pos(), sa.radius(&p), &tri)
                }
            }
            (ShapeView::Triangles(sa), ShapeView::Vertices(sb)) => {
                let tri = sa.check_triangle(ca, pa);
                let q = pb[cb.vertex()];
                if self.swept {
                    let old = b.body.prev_vpos[cb.vertex()].pos();
                    check_triangle_sphere_swept(&tri, old, q.pos(), sb.radius(&q))
                } else {
                    check_triangle_sphere(&tri, q.pos(), sb.radius(&q))
                }
            }
            (ShapeView::Triangles(_), ShapeView::Triangles(_)) => None,
        }
    }

    /// 把合并后的接触写成流形，跳过同一刚体、运动学对运动学、约束连接、骨骼过滤拒绝的骨骼对
    fn apply(&self, a: &BodyContext, b: &BodyContext, merge: &MergeBuffer, linked: &HashSet<(usize, usize)>) -> Vec<PersistentManifold> {
        let mut manifolds = Vec::new();
        for (ia, ib, res) in merge.iter() {
            let sa = &a.body.skinned_bones[ia];
            let sb = &b.body.skinned_bones[ib];
            let ga = a.body_offset + sa.bone;
            let gb = b.body_offset + sb.bone;
            if ga == gb || (sa.is_kinematic && sb.is_kinematic) || linked.contains(&(ga.min(gb), ga.max(gb))) {
                continue;
            }
            let (Some(bone_a), Some(bone_b)) = (a.bones.get(sa.bone), b.bones.get(sb.bone)) else {
                continue;
            };
            if !bone_a.can_collide_with(bone_b) {
                continue;
            }

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
            manifolds.push(manifold);
        }
        manifolds
    }
}
