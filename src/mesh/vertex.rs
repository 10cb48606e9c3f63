//! 蒙皮顶点

use glam::{Vec3, Vec4};

/// 每个顶点最多受 4 根骨骼影响
pub const MAX_INFLUENCES: usize = 4;

/// 蒙皮空间顶点
///
/// 权重按降序排列，总和不超过 1，未使用的槽位权重为 0。
/// 骨骼索引指向所属 SkinnedMeshBody 的 skinned_bones。
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vertex {
    pub skin_pos: Vec3,
    pub weights: [f32; MAX_INFLUENCES],
    pub bones: [u32; MAX_INFLUENCES],
}

impl Vertex {
    /// 由任意数量的 (骨骼, 权重) 构造：保留最大的 4 个并重新归一化
    pub fn new(skin_pos: Vec3, influences: &[(u32, f32)]) -> Self {
        let mut sorted: Vec<(u32, f32)> = influences
            .iter()
            .copied()
            .filter(|(_, w)| *w > 0.0 && w.is_finite())
            .collect();
        sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
        sorted.truncate(MAX_INFLUENCES);

        let mut vertex = Self { skin_pos, ..Default::default() };
        let sum: f32 = sorted.iter().map(|(_, w)| w).sum();
        if sum > 0.0 {
            for (i, (bone, w)) in sorted.into_iter().enumerate() {
                vertex.bones[i] = bone;
                vertex.weights[i] = w / sum;
            }
        }
        vertex
    }

    /// 重新按权重降序排列
    pub fn sort_weight(&mut self) {
        let mut pairs: [(u32, f32); MAX_INFLUENCES] =
            std::array::from_fn(|i| (self.bones[i], self.weights[i]));
        pairs.sort_by(|a, b| b.1.total_cmp(&a.1));
        for (i, (bone, w)) in pairs.into_iter().enumerate() {
            self.bones[i] = bone;
            self.weights[i] = w;
        }
    }

    /// 权重非零的影响
    pub fn influences(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.bones
            .iter()
            .zip(self.weights.iter())
            .take_while(|(_, w)| **w > 0.0)
            .map(|(b, w)| (*b as usize, *w))
    }
}

/// 世界空间顶点位置，w 分量存放碰撞边距倍率
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VertexPos(pub Vec4);

impl VertexPos {
    pub fn new(pos: Vec3, margin_multiplier: f32) -> Self {
        Self(pos.extend(margin_multiplier))
    }

    #[inline]
    pub fn pos(&self) -> Vec3 {
        self.0.truncate()
    }

    #[inline]
    pub fn margin_multiplier(&self) -> f32 {
        self.0.w
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn keeps_four_largest_weights_in_order() {
        let v = Vertex::new(
            Vec3::ZERO,
            &[(0, 0.05), (1, 0.4), (2, 0.1), (3, 0.3), (4, 0.15)],
        );
        assert_eq!(v.bones, [1, 3, 4, 2]);
        let sum: f32 = v.weights.iter().sum();
        assert!(sum <= 1.0 + 1e-6);
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
        assert!(v.weights.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn unused_slots_are_zero() {
        let v = Vertex::new(Vec3::ONE, &[(7, 2.0)]);
        assert_eq!(v.weights, [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(v.influences().collect::<Vec<_>>(), vec![(7, 1.0)]);
    }

    #[test]
    fn sort_weight_reorders() {
        let mut v = Vertex {
            skin_pos: Vec3::ZERO,
            weights: [0.2, 0.5, 0.0, 0.3],
            bones: [0, 1, 2, 3],
        };
        v.sort_weight();
        assert_eq!(v.bones, [1, 3, 0, 2]);
    }

    #[test]
    fn vertex_pos_packs_margin() {
        let p = VertexPos::new(Vec3::new(1.0, 2.0, 3.0), 0.5);
        assert_eq!(p.pos(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(p.margin_multiplier(), 0.5);
    }
}
