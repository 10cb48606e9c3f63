//! 碰撞图元

/// 碰撞图元：单个顶点（点/球）或三个顶点（三角形）
///
/// 顶点索引指向所属 SkinnedMeshBody 的顶点数组。
/// 点图元的三个索引相同。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Collider {
    pub vertices: [u32; 3],
    /// 每步计算：0 = 完全运动学，>0 = 受动态骨骼影响的程度
    pub flexible: f32,
}

impl Collider {
    pub fn point(vertex: u32) -> Self {
        Self { vertices: [vertex; 3], flexible: 0.0 }
    }

    pub fn triangle(a: u32, b: u32, c: u32) -> Self {
        Self { vertices: [a, b, c], flexible: 0.0 }
    }

    #[inline]
    pub fn vertex(&self) -> usize {
        self.vertices[0] as usize
    }

    #[inline]
    pub fn is_kinematic(&self) -> bool {
        self.flexible < f32::EPSILON
    }
}
