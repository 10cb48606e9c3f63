//! 顶点蒙皮计算

use glam::Vec3;
use rayon::prelude::*;

use super::{SkinningInput, SkinningOutput};
use crate::math::Transform;
use crate::mesh::{Vertex, VertexPos};

/// 蒙皮上下文
#[derive(Clone, Copy, Debug)]
pub struct SkinningContext {
    /// 顶点数达到该值时使用 rayon 并行
    pub parallel_threshold: usize,
}

impl Default for SkinningContext {
    fn default() -> Self {
        Self { parallel_threshold: 2048 }
    }
}

/// 计算蒙皮，结果写入 output
pub fn compute_skinning(ctx: &SkinningContext, input: &SkinningInput, output: SkinningOutput) {
    let SkinningOutput { positions, flexible } = output;
    debug_assert_eq!(input.vertices.len(), positions.len());
    debug_assert_eq!(input.vertices.len(), flexible.len());

    if input.vertices.len() >= ctx.parallel_threshold {
        positions
            .par_iter_mut()
            .zip(flexible.par_iter_mut())
            .zip(input.vertices.par_iter())
            .for_each(|((pos, flex), vertex)| {
                (*pos, *flex) = compute_single_vertex(vertex, input);
            });
    } else {
        for ((pos, flex), vertex) in positions.iter_mut().zip(flexible.iter_mut()).zip(input.vertices) {
            (*pos, *flex) = compute_single_vertex(vertex, input);
        }
    }
}

/// 计算单个顶点的蒙皮
fn compute_single_vertex(vertex: &Vertex, input: &SkinningInput) -> (VertexPos, f32) {
    let mut pos = Vec3::ZERO;
    let mut margin = 0.0;
    let mut flexible = 0.0;
    for (bone, w) in vertex.influences() {
        let t = get_transform(input.bone_transforms, bone);
        pos += t.transform_point(vertex.skin_pos) * w;
        margin += input.margin_multipliers.get(bone).copied().unwrap_or(1.0) * w;
        if input.dynamic.get(bone).copied().unwrap_or(false) {
            flexible += w;
        }
    }
    (VertexPos::new(pos, margin), flexible)
}

fn get_transform(transforms: &[Transform], index: usize) -> Transform {
    transforms.get(index).copied().unwrap_or(Transform::IDENTITY)
}
