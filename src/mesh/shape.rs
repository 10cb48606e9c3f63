//! 蒙皮网格碰撞形状
//!
//! 两种形状：
//! - `PerVertexShape`：每个顶点是一个小球
//! - `PerTriangleShape`：每个三角形是一个（可单面的）带厚度三角形，
//!   另外附带一个由同一组顶点派生的 `PerVertexShape`，供三角形-顶点检测使用
//!
//! 形状不持有顶点，每步由所属 body 把蒙皮后的顶点位置和 flexible 传进来。

use smallvec::SmallVec;

use super::{Vertex, VertexPos};
use crate::collision::{CheckTriangle, Collider, ColliderTree};
use crate::math::Aabb;

/// 树的一层 key
type Keys = SmallVec<[u32; 4]>;

/// 两种形状共用的数据：碰撞体树、扁平碰撞体数组、逐碰撞体包围盒
#[derive(Clone, Debug, Default)]
pub struct ShapeData {
    pub tree: ColliderTree,
    pub colliders: Vec<Collider>,
    pub aabbs: Vec<Aabb>,
}

impl ShapeData {
    fn build(entries: Vec<(Keys, Collider)>) -> Self {
        let mut tree = ColliderTree::default();
        for (keys, collider) in entries {
            tree.insert_collider(&keys, collider);
        }
        tree.optimize();
        let mut colliders = Vec::new();
        tree.export_colliders(&mut colliders);
        let aabbs = vec![Aabb::EMPTY; colliders.len()];
        Self { tree, colliders, aabbs }
    }

    fn update_kinematic(&mut self, flexible: &[f32]) {
        self.tree.update_kinematic(&mut self.colliders, &|c: &Collider| {
            c.vertices
                .iter()
                .map(|&v| flexible[v as usize])
                .fold(0.0f32, f32::max)
        });
    }

    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }
}

/// 顶点按权重排序的影响骨骼，低于阈值的忽略
fn vertex_keys(vertex: &Vertex, thresholds: &[f32]) -> Keys {
    vertex
        .influences()
        .filter(|(b, w)| *w >= thresholds.get(*b).copied().unwrap_or(0.0))
        .map(|(b, _)| b as u32)
        .collect()
}

#[derive(Clone, Debug)]
pub struct PerVertexShape {
    pub data: ShapeData,
    /// 球半径基准，实际半径再乘顶点的边距倍率
    pub margin: f32,
}

impl PerVertexShape {
    pub fn new(vertices: &[Vertex], margin: f32, thresholds: &[f32]) -> Self {
        let entries = vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (vertex_keys(v, thresholds), Collider::point(i as u32)))
            .collect();
        Self { data: ShapeData::build(entries), margin }
    }

    #[inline]
    pub fn radius(&self, p: &VertexPos) -> f32 {
        self.margin * p.margin_multiplier()
    }

    pub fn internal_update(&mut self, vpos: &[VertexPos], flexible: &[f32]) {
        self.data.update_kinematic(flexible);
        let margin = self.margin;
        for (c, aabb) in self.data.colliders.iter().zip(self.data.aabbs.iter_mut()) {
            let p = &vpos[c.vertex()];
            *aabb = Aabb::from_point(p.pos(), margin * p.margin_multiplier());
        }
        self.data.tree.update_aabb(&self.data.aabbs);
    }
}

#[derive(Clone, Debug)]
pub struct PerTriangleShape {
    pub data: ShapeData,
    pub margin: f32,
    /// > 0 时三角形单面，背面允许的穿透深度
    pub penetration: f32,
    pub vertex_shape: PerVertexShape,
}

impl PerTriangleShape {
    /// triangles 已经过合法性检查（索引在范围内且互不相同）
    pub fn new(vertices: &[Vertex], triangles: &[[u32; 3]], margin: f32, penetration: f32, thresholds: &[f32]) -> Self {
        let entries = triangles
            .iter()
            .map(|tri| {
                // 三个顶点的影响按骨骼累加，再按总权重排序
                let mut acc: SmallVec<[(u32, f32); 12]> = SmallVec::new();
                for &v in tri {
                    let v = &vertices[v as usize];
                    for (b, w) in v.influences() {
                        if w < thresholds.get(b).copied().unwrap_or(0.0) {
                            continue;
                        }
                        match acc.iter_mut().find(|(k, _)| *k == b as u32) {
                            Some((_, sum)) => *sum += w,
                            None => acc.push((b as u32, w)),
                        }
                    }
                }
                acc.sort_by(|a, b| b.1.total_cmp(&a.1));
                let keys: Keys = acc.iter().take(4).map(|(b, _)| *b).collect();
                (keys, Collider::triangle(tri[0], tri[1], tri[2]))
            })
            .collect();
        Self {
            data: ShapeData::build(entries),
            margin,
            penetration,
            vertex_shape: PerVertexShape::new(vertices, margin, thresholds),
        }
    }

    /// 构造窄相检测用的三角形，边距与穿透深度取三个顶点倍率的最大值
    pub fn check_triangle(&self, collider: &Collider, vpos: &[VertexPos]) -> CheckTriangle {
        let [a, b, c] = collider.vertices.map(|v| vpos[v as usize]);
        let multiplier = a
            .margin_multiplier()
            .max(b.margin_multiplier())
            .max(c.margin_multiplier());
        CheckTriangle::new(
            a.pos(),
            b.pos(),
            c.pos(),
            self.margin * multiplier,
            self.penetration * multiplier,
        )
    }

    pub fn internal_update(&mut self, vpos: &[VertexPos], flexible: &[f32]) {
        self.data.update_kinematic(flexible);
        for i in 0..self.data.colliders.len() {
            let tri = self.check_triangle(&self.data.colliders[i], vpos);
            self.data.aabbs[i] = Aabb::from_points(&[tri.p0, tri.p1, tri.p2], tri.margin.max(tri.penetration));
        }
        self.data.tree.update_aabb(&self.data.aabbs);
        self.vertex_shape.internal_update(vpos, flexible);
    }
}

#[derive(Clone, Debug)]
pub enum SkinnedMeshShape {
    PerVertex(PerVertexShape),
    PerTriangle(PerTriangleShape),
}

impl SkinnedMeshShape {
    pub fn data(&self) -> &ShapeData {
        match self {
            Self::PerVertex(s) => &s.data,
            Self::PerTriangle(s) => &s.data,
        }
    }

    pub fn tree(&self) -> &ColliderTree {
        &self.data().tree
    }

    pub fn margin(&self) -> f32 {
        match self {
            Self::PerVertex(s) => s.margin,
            Self::PerTriangle(s) => s.margin.max(s.penetration),
        }
    }

    /// 用于三角形-顶点检测的顶点形状
    pub fn vertex_shape(&self) -> &PerVertexShape {
        match self {
            Self::PerVertex(s) => s,
            Self::PerTriangle(s) => &s.vertex_shape,
        }
    }

    pub fn internal_update(&mut self, vpos: &[VertexPos], flexible: &[f32]) {
        match self {
            Self::PerVertex(s) => s.internal_update(vpos, flexible),
            Self::PerTriangle(s) => s.internal_update(vpos, flexible),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn quad_vertices() -> Vec<Vertex> {
        vec![
            Vertex::new(Vec3::new(0.0, 0.0, 0.0), &[(0, 1.0)]),
            Vertex::new(Vec3::new(1.0, 0.0, 0.0), &[(0, 0.5), (1, 0.5)]),
            Vertex::new(Vec3::new(1.0, 0.0, 1.0), &[(1, 1.0)]),
            Vertex::new(Vec3::new(0.0, 0.0, 1.0), &[(1, 0.7), (0, 0.3)]),
        ]
    }

    fn skinned(vertices: &[Vertex]) -> Vec<VertexPos> {
        vertices.iter().map(|v| VertexPos::new(v.skin_pos, 1.0)).collect()
    }

    #[test]
    fn per_vertex_aabbs_follow_vertices() {
        let verts = quad_vertices();
        let mut shape = PerVertexShape::new(&verts, 0.1, &[0.0, 0.0]);
        assert_eq!(shape.data.colliders.len(), 4);
        let vpos = skinned(&verts);
        shape.internal_update(&vpos, &[1.0; 4]);
        for (c, aabb) in shape.data.colliders.iter().zip(&shape.data.aabbs) {
            assert!(aabb.center().distance(verts[c.vertex()].skin_pos) < 1e-6);
        }
        let all = shape.data.tree.aabb_all;
        assert!(all.min.x <= -0.1 + 1e-6 && all.max.x >= 1.1 - 1e-6);
    }

    #[test]
    fn weight_threshold_drops_keys() {
        let verts = quad_vertices();
        // 骨骼 0 的阈值高于顶点 3 上的 0.3
        let shape = PerVertexShape::new(&verts, 0.1, &[0.4, 0.0]);
        let mut keys_of_v3 = None;
        fn walk(node: &ColliderTree, colliders: &[Collider], path: &mut Vec<u32>, out: &mut Option<Vec<u32>>) {
            for c in &colliders[node.collider_range()] {
                if c.vertex() == 3 {
                    *out = Some(path.clone());
                }
            }
            for child in &node.children {
                path.push(child.key);
                walk(child, colliders, path, out);
                path.pop();
            }
        }
        walk(&shape.data.tree, &shape.data.colliders, &mut Vec::new(), &mut keys_of_v3);
        let keys = keys_of_v3.unwrap();
        assert!(!keys.contains(&0));
    }

    #[test]
    fn kinematic_vertices_mark_tree_kinematic() {
        let verts = quad_vertices();
        let mut shape = PerTriangleShape::new(&verts, &[[0, 1, 2], [0, 2, 3]], 0.05, 0.0, &[0.0, 0.0]);
        let vpos = skinned(&verts);
        shape.internal_update(&vpos, &[0.0; 4]);
        assert!(shape.data.tree.is_kinematic);
        assert!(shape.vertex_shape.data.tree.is_kinematic);

        shape.internal_update(&vpos, &[0.0, 0.0, 1.0, 0.0]);
        assert!(!shape.data.tree.is_kinematic);
    }

    #[test]
    fn triangle_aabb_includes_margin() {
        let verts = quad_vertices();
        let mut shape = PerTriangleShape::new(&verts, &[[0, 1, 2]], 0.05, 0.2, &[0.0, 0.0]);
        let vpos = skinned(&verts);
        shape.internal_update(&vpos, &[1.0; 4]);
        let aabb = shape.data.aabbs[0];
        // 单面三角形背面延伸 penetration
        assert!(aabb.min.y <= -0.2 + 1e-6);
        assert!(aabb.max.y >= 0.2 - 1e-6);
    }
}
