//! 宽相检测：沿 X 轴的扫描-剪枝
//!
//! 排序顺序跨帧保留，物体移动不大时排序近乎线性。

use crate::math::Aabb;

#[derive(Default)]
pub struct Broadphase {
    order: Vec<usize>,
    pairs: Vec<(usize, usize)>,
}

impl Broadphase {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由当前所有包围盒计算重叠对，返回的每对满足 a < b
    pub fn update(&mut self, aabbs: &[Aabb]) -> &[(usize, usize)] {
        if self.order.len() != aabbs.len() {
            self.order = (0..aabbs.len()).collect();
        }
        self.order
            .sort_by(|&a, &b| aabbs[a].min.x.total_cmp(&aabbs[b].min.x));

        self.pairs.clear();
        for (i, &a) in self.order.iter().enumerate() {
            let aabb_a = &aabbs[a];
            if aabb_a.is_empty() {
                continue;
            }
            for &b in &self.order[i + 1..] {
                let aabb_b = &aabbs[b];
                if aabb_b.min.x > aabb_a.max.x {
                    break;
                }
                if aabb_a.collide_with(aabb_b) {
                    self.pairs.push((a.min(b), a.max(b)));
                }
            }
        }
        &self.pairs
    }

    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.pairs.clear();
    }
}
