//! 碰撞体树
//!
//! 按影响骨骼索引分层的浅层空间层次：第 i 层的 key 是成员顶点第 i 个
//! （按权重排序）影响骨骼。同一骨骼组合下的碰撞体落在同一节点，
//! 因而整棵子树的包围盒随骨骼一起移动，剪枝效果很好。
//!
//! 生命周期：
//! 1. 构建期 `insert_collider` → `optimize` → `export_colliders`
//!    （碰撞体搬到形状的扁平数组里，节点只记录区间）
//! 2. 每步 `update_kinematic` → 计算碰撞体包围盒 → `update_aabb`

use std::ops::Range;

use super::Collider;
use crate::math::Aabb;

/// 叶节点对（左树节点, 右树节点）
pub type ColliderPair<'a> = (&'a ColliderTree, &'a ColliderTree);

#[derive(Clone, Debug)]
pub struct ColliderTree {
    /// 本层的骨骼索引，根节点为 u32::MAX
    pub key: u32,
    pub children: Vec<ColliderTree>,
    /// 构建期暂存，导出后清空
    staged: Vec<Collider>,
    /// 本节点碰撞体在扁平数组中的起始位置
    pub begin: usize,
    /// 本节点碰撞体数量
    pub len: usize,
    /// 本节点自身碰撞体的包围盒
    pub aabb_mine: Aabb,
    /// 含子树的包围盒
    pub aabb_all: Aabb,
    /// 整棵子树都是运动学的
    pub is_kinematic: bool,
    /// children[..dyn_child] 为非运动学子节点
    pub dyn_child: usize,
    /// 本节点前 dyn_collider 个碰撞体为动态
    pub dyn_collider: usize,
}

impl Default for ColliderTree {
    fn default() -> Self {
        Self::new(u32::MAX)
    }
}

impl ColliderTree {
    pub fn new(key: u32) -> Self {
        Self {
            key,
            children: Vec::new(),
            staged: Vec::new(),
            begin: 0,
            len: 0,
            aabb_mine: Aabb::EMPTY,
            aabb_all: Aabb::EMPTY,
            is_kinematic: false,
            dyn_child: 0,
            dyn_collider: 0,
        }
    }

    /// 按 key 路径插入碰撞体，缺失的中间节点自动创建
    pub fn insert_collider(&mut self, keys: &[u32], collider: Collider) {
        let mut node = self;
        for &key in keys {
            let index = match node.children.iter().position(|c| c.key == key) {
                Some(i) => i,
                None => {
                    node.children.push(ColliderTree::new(key));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[index];
        }
        node.staged.push(collider);
    }

    /// 去掉空子树，并把“无自身碰撞体且只有一个子节点”的退化链压扁
    pub fn optimize(&mut self) {
        for child in &mut self.children {
            child.optimize();
        }
        self.children.retain(|c| !c.staged.is_empty() || !c.children.is_empty());

        while self.staged.is_empty() && self.children.len() == 1 {
            if let Some(child) = self.children.pop() {
                self.staged = child.staged;
                self.children = child.children;
            }
        }
    }

    /// 把暂存的碰撞体搬到扁平数组，节点改为记录区间
    pub fn export_colliders(&mut self, out: &mut Vec<Collider>) {
        self.begin = out.len();
        self.len = self.staged.len();
        self.dyn_collider = self.len;
        out.append(&mut self.staged);
        for child in &mut self.children {
            child.export_colliders(out);
        }
        self.dyn_child = self.children.len();
    }

    #[inline]
    pub fn collider_range(&self) -> Range<usize> {
        self.begin..self.begin + self.len
    }

    #[inline]
    pub fn dynamic_range(&self) -> Range<usize> {
        self.begin..self.begin + self.dyn_collider
    }

    /// 子树中的碰撞体总数
    pub fn total_colliders(&self) -> usize {
        self.len + self.children.iter().map(|c| c.total_colliders()).sum::<usize>()
    }

    /// 重新计算 flexible，并把动态碰撞体/子节点排到前面
    pub fn update_kinematic<F>(&mut self, colliders: &mut [Collider], flexible: &F)
    where
        F: Fn(&Collider) -> f32,
    {
        for child in &mut self.children {
            child.update_kinematic(colliders, flexible);
        }
        // 稳定排序：false（动态）在前
        self.children.sort_by_key(|c| c.is_kinematic);
        self.dyn_child = self.children.iter().take_while(|c| !c.is_kinematic).count();

        let mine = &mut colliders[self.begin..self.begin + self.len];
        for c in mine.iter_mut() {
            c.flexible = flexible(c);
        }
        mine.sort_by(|a, b| b.flexible.total_cmp(&a.flexible));
        self.dyn_collider = mine.iter().take_while(|c| !c.is_kinematic()).count();

        self.is_kinematic = self.dyn_collider == 0 && self.dyn_child == 0;
    }

    /// 由每个碰撞体的包围盒刷新 aabb_mine / aabb_all
    pub fn update_aabb(&mut self, aabbs: &[Aabb]) {
        let mut mine = Aabb::EMPTY;
        for aabb in &aabbs[self.collider_range()] {
            mine.merge(aabb);
        }
        let mut all = mine;
        for child in &mut self.children {
            child.update_aabb(aabbs);
            all.merge(&child.aabb_all);
        }
        self.aabb_mine = mine;
        self.aabb_all = all;
    }

    /// 收集两棵树之间 aabb_mine 相交的节点对，跳过双方都运动学的组合
    pub fn check_collision<'a>(&'a self, other: &'a ColliderTree, out: &mut Vec<ColliderPair<'a>>) {
        self.check_collision_l(other, out);
    }

    fn check_collision_l<'a>(&'a self, r: &'a ColliderTree, out: &mut Vec<ColliderPair<'a>>) {
        if self.is_kinematic && r.is_kinematic {
            return;
        }
        if !self.aabb_all.collide_with(&r.aabb_all) {
            return;
        }
        if self.len > 0 && self.aabb_mine.collide_with(&r.aabb_all) {
            self.check_collision_r(r, out);
        }
        let end = if r.is_kinematic { self.dyn_child } else { self.children.len() };
        for child in &self.children[..end] {
            child.check_collision_l(r, out);
        }
    }

    fn check_collision_r<'a>(&'a self, r: &'a ColliderTree, out: &mut Vec<ColliderPair<'a>>) {
        if r.len > 0 && self.aabb_mine.collide_with(&r.aabb_mine) {
            out.push((self, r));
        }
        let end = if self.is_kinematic { r.dyn_child } else { r.children.len() };
        for child in &r.children[..end] {
            if self.aabb_mine.collide_with(&child.aabb_all) {
                self.check_collision_r(child, out);
            }
        }
    }

    /// 与 check_collision 相同的遍历，找到第一对就返回
    pub fn collapse_collide(&self, other: &ColliderTree) -> bool {
        self.collapse_collide_l(other)
    }

    fn collapse_collide_l(&self, r: &ColliderTree) -> bool {
        if self.is_kinematic && r.is_kinematic {
            return false;
        }
        if !self.aabb_all.collide_with(&r.aabb_all) {
            return false;
        }
        if self.len > 0 && self.aabb_mine.collide_with(&r.aabb_all) && self.collapse_collide_r(r) {
            return true;
        }
        let end = if r.is_kinematic { self.dyn_child } else { self.children.len() };
        self.children[..end].iter().any(|child| child.collapse_collide_l(r))
    }

    fn collapse_collide_r(&self, r: &ColliderTree) -> bool {
        if r.len > 0 && self.aabb_mine.collide_with(&r.aabb_mine) {
            return true;
        }
        let end = if self.is_kinematic { r.dyn_child } else { r.children.len() };
        r.children[..end]
            .iter()
            .any(|child| self.aabb_mine.collide_with(&child.aabb_all) && self.collapse_collide_r(child))
    }

    /// 深度优先遍历所有节点
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a ColliderTree)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeSet;

    fn build(entries: &[(Vec<u32>, Collider)]) -> (ColliderTree, Vec<Collider>) {
        let mut tree = ColliderTree::default();
        for (keys, c) in entries {
            tree.insert_collider(keys, *c);
        }
        tree.optimize();
        let mut flat = Vec::new();
        tree.export_colliders(&mut flat);
        (tree, flat)
    }

    #[test]
    fn kinematic_colliders_sort_behind_dynamic_ones() {
        // 同一节点内的两个碰撞体
        let (mut tree, mut flat) = build(&[
            (vec![0], Collider::point(10)),
            (vec![0], Collider::point(11)),
        ]);
        let flex = |c: &Collider| if c.vertex() == 10 { 0.0 } else { 1.0 };
        tree.update_kinematic(&mut flat, &flex);
        assert_eq!(flat[tree.begin].vertex(), 11);
        assert_eq!(flat[tree.begin + 1].vertex(), 10);
        assert_eq!(tree.dyn_collider, 1);
        assert!(!tree.is_kinematic);
    }

    #[test]
    fn kinematic_children_sort_behind_dynamic_ones() {
        let (mut tree, mut flat) = build(&[
            (vec![0, 1], Collider::point(10)),
            (vec![0, 2], Collider::point(11)),
        ]);
        // 压扁后根节点直接拥有两个叶子
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].key, 1);

        let flex = |c: &Collider| if c.vertex() == 10 { 0.0 } else { 1.0 };
        tree.update_kinematic(&mut flat, &flex);
        assert_eq!(tree.children[0].key, 2);
        assert_eq!(tree.children[1].key, 1);
        assert_eq!(tree.dyn_child, 1);
        assert!(tree.children[1].is_kinematic);
        assert!(!tree.children[0].is_kinematic);
        assert!(!tree.is_kinematic);
    }

    #[test]
    fn optimize_collapses_single_child_chains() {
        let (tree, flat) = build(&[(vec![3, 4, 5], Collider::point(0))]);
        assert!(tree.children.is_empty());
        assert_eq!(tree.len, 1);
        assert_eq!(flat.len(), 1);
    }

    fn random_tree(rng: &mut StdRng, offset: u32) -> (ColliderTree, Vec<Collider>) {
        let mut entries = Vec::new();
        for i in 0..rng.gen_range(5..40) {
            let depth = rng.gen_range(0..4);
            let keys: Vec<u32> = (0..depth).map(|_| rng.gen_range(0..3)).collect();
            entries.push((keys, Collider::point(offset + i)));
        }
        build(&entries)
    }

    fn vertex_aabb(v: usize) -> Aabb {
        // 伪随机但确定的位置
        let h = (v as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let x = (h % 1000) as f32 / 100.0;
        let y = ((h >> 10) % 1000) as f32 / 100.0;
        let z = ((h >> 20) % 1000) as f32 / 100.0;
        Aabb::from_point(Vec3::new(x, y, z), 1.0)
    }

    fn refresh(tree: &mut ColliderTree, flat: &mut [Collider], kinematic_mod: usize) {
        let flex = |c: &Collider| if c.vertex() % kinematic_mod == 0 { 0.0 } else { 1.0 };
        tree.update_kinematic(flat, &flex);
        let aabbs: Vec<Aabb> = flat.iter().map(|c| vertex_aabb(c.vertex())).collect();
        tree.update_aabb(&aabbs);
    }

    fn brute_force(a: &ColliderTree, b: &ColliderTree) -> BTreeSet<(usize, usize)> {
        let mut left = Vec::new();
        a.visit(&mut |n| if n.len > 0 { left.push(n) });
        let mut right = Vec::new();
        b.visit(&mut |n| if n.len > 0 { right.push(n) });
        let mut set = BTreeSet::new();
        for l in &left {
            for r in &right {
                if l.is_kinematic && r.is_kinematic {
                    continue;
                }
                if l.aabb_mine.collide_with(&r.aabb_mine) {
                    set.insert((l.begin, r.begin));
                }
            }
        }
        set
    }

    #[test]
    fn traversal_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(42);
        for round in 0..200 {
            let (mut a, mut fa) = random_tree(&mut rng, 0);
            let (mut b, mut fb) = random_tree(&mut rng, 1000);
            let modulus = 2 + round % 3;
            refresh(&mut a, &mut fa, modulus);
            refresh(&mut b, &mut fb, modulus);

            let mut pairs = Vec::new();
            a.check_collision(&b, &mut pairs);
            let found: BTreeSet<(usize, usize)> = pairs.iter().map(|(l, r)| (l.begin, r.begin)).collect();
            assert_eq!(found.len(), pairs.len(), "duplicate pairs");

            let expected = brute_force(&a, &b);
            assert_eq!(found, expected);
            assert_eq!(a.collapse_collide(&b), !expected.is_empty());
        }
    }

    #[test]
    fn fully_kinematic_trees_never_pair() {
        let mut rng = StdRng::seed_from_u64(3);
        let (mut a, mut fa) = random_tree(&mut rng, 0);
        let (mut b, mut fb) = random_tree(&mut rng, 0);
        refresh(&mut a, &mut fa, 1);
        refresh(&mut b, &mut fb, 1);
        let mut pairs = Vec::new();
        a.check_collision(&b, &mut pairs);
        assert!(pairs.is_empty());
        assert!(!a.collapse_collide(&b));
    }
}
