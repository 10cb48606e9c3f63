//! 蒙皮网格物理定义
//!
//! 宿主解析自己的配置格式后填充这些结构，交给 [`SystemBuilder`](super::SystemBuilder) 构建系统。
//! 骨骼、约束都按名称互相引用；几何数据 [`SkinnedGeometry`] 来自宿主的模型。

use glam::{Quat, Vec3};

use crate::math::{BoundingSphere, Transform};

/// 一根物理骨骼
#[derive(Clone, Debug)]
pub struct BoneDef {
    /// 骨架节点名称，同时也是骨骼名称
    pub name: String,
    /// 0 表示运动学骨骼
    pub mass: f32,
    /// 主惯量（刚体局部空间对角线）
    pub inertia: Vec3,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub friction: f32,
    pub rolling_friction: f32,
    pub restitution: f32,
    pub margin_multiplier: f32,
    pub gravity_factor: f32,
    /// 质量非零时也强制为运动学
    pub kinematic: bool,
    /// 骨骼自带碰撞球半径，None 表示只通过蒙皮网格碰撞
    pub collision_radius: Option<f32>,
    pub can_collide_with_bones: Vec<String>,
    pub no_collide_with_bones: Vec<String>,
    /// 刚体相对节点的偏移（节点空间）
    pub rig_offset: Transform,
}

impl BoneDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// 形状引用了但没有声明的骨骼，按运动学处理
    pub fn kinematic(name: impl Into<String>) -> Self {
        Self { name: name.into(), mass: 0.0, kinematic: true, ..Default::default() }
    }

    pub fn is_kinematic(&self) -> bool {
        self.kinematic || self.mass <= 0.0
    }
}

impl Default for BoneDef {
    fn default() -> Self {
        Self {
            name: String::new(),
            mass: 1.0,
            inertia: Vec3::ONE,
            linear_damping: 0.0,
            angular_damping: 0.0,
            friction: 0.5,
            rolling_friction: 0.0,
            restitution: 0.0,
            margin_multiplier: 1.0,
            gravity_factor: 1.0,
            kinematic: false,
            collision_radius: None,
            can_collide_with_bones: Vec::new(),
            no_collide_with_bones: Vec::new(),
            rig_offset: Transform::IDENTITY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ShapeKind {
    PerVertex,
    /// penetration > 0 时三角形单面，为背面允许的穿透深度
    PerTriangle { penetration: f32 },
}

/// 一个碰撞形状，绑定到一份蒙皮几何
#[derive(Clone, Debug)]
pub struct ShapeDef {
    pub name: String,
    /// 引用的 [`SkinnedGeometry::name`]
    pub geometry: String,
    pub kind: ShapeKind,
    pub margin: f32,
    pub tags: Vec<String>,
    pub can_collide_with_tags: Vec<String>,
    pub no_collide_with_tags: Vec<String>,
    /// (骨骼名, 权重阈值)，低于阈值的影响不参与碰撞
    pub weight_thresholds: Vec<(String, f32)>,
}

impl ShapeDef {
    pub fn new(name: impl Into<String>, geometry: impl Into<String>, kind: ShapeKind) -> Self {
        Self {
            name: name.into(),
            geometry: geometry.into(),
            kind,
            margin: 1.0,
            tags: Vec::new(),
            can_collide_with_tags: Vec::new(),
            no_collide_with_tags: Vec::new(),
            weight_thresholds: Vec::new(),
        }
    }

    pub fn weight_threshold(&self, bone: &str) -> f32 {
        self.weight_thresholds.iter().find(|(n, _)| n == bone).map_or(0.0, |(_, w)| *w)
    }
}

/// 约束坐标系的计算方式（都基于构建时两根骨骼的刚体世界变换）
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameType {
    /// A 局部空间中的坐标系
    FrameInA(Transform),
    /// B 局部空间中的坐标系
    FrameInB(Transform),
    /// A、B 之间插值：位置按 translation、旋转按 rotation 比例
    Lerp { translation: f32, rotation: f32 },
    /// 原点在 A，x 轴指向 B
    PointToOther,
}

impl Default for FrameType {
    fn default() -> Self {
        FrameType::FrameInB(Transform::IDENTITY)
    }
}

impl FrameType {
    /// 约束坐标系的世界变换
    pub fn world_frame(&self, tr_a: &Transform, tr_b: &Transform) -> Transform {
        match *self {
            FrameType::FrameInA(local) => (*tr_a * local).without_scale(),
            FrameType::FrameInB(local) => (*tr_b * local).without_scale(),
            FrameType::Lerp { translation, rotation } => Transform::from_rotation_translation(
                tr_a.rotation.slerp(tr_b.rotation, rotation),
                tr_a.translation.lerp(tr_b.translation, translation),
            ),
            FrameType::PointToOther => {
                let rotation = match (tr_b.translation - tr_a.translation).try_normalize() {
                    Some(dir) => Quat::from_rotation_arc(Vec3::X, dir),
                    None => tr_a.rotation,
                };
                Transform::from_rotation_translation(rotation, tr_a.translation)
            }
        }
    }
}

/// 平衡点是构建时两根骨骼的相对姿势
#[derive(Clone, Debug)]
pub struct Generic6DofParams {
    pub linear_lower: Vec3,
    pub linear_upper: Vec3,
    pub angular_lower: Vec3,
    pub angular_upper: Vec3,
    pub linear_stiffness: Vec3,
    pub linear_damping: Vec3,
    pub angular_stiffness: Vec3,
    pub angular_damping: Vec3,
}

impl Default for Generic6DofParams {
    fn default() -> Self {
        Self {
            linear_lower: Vec3::ZERO,
            linear_upper: Vec3::ZERO,
            angular_lower: Vec3::ZERO,
            angular_upper: Vec3::ZERO,
            linear_stiffness: Vec3::ZERO,
            linear_damping: Vec3::ZERO,
            angular_stiffness: Vec3::ZERO,
            angular_damping: Vec3::ZERO,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StiffSpringParams {
    /// 相对构建时锚点距离的倍数
    pub min_distance: f32,
    pub max_distance: f32,
    pub stiffness: f32,
    pub damping: f32,
    pub equilibrium: f32,
}

impl Default for StiffSpringParams {
    fn default() -> Self {
        Self { min_distance: 1.0, max_distance: 1.0, stiffness: 0.0, damping: 0.0, equilibrium: 0.5 }
    }
}

#[derive(Clone, Debug)]
pub struct ConeTwistParams {
    pub swing_span1: f32,
    pub swing_span2: f32,
    pub twist_span: f32,
    pub limit_softness: f32,
    pub bias_factor: f32,
    pub relaxation_factor: f32,
    pub angular_damping: f32,
}

impl Default for ConeTwistParams {
    fn default() -> Self {
        Self {
            swing_span1: std::f32::consts::PI,
            swing_span2: std::f32::consts::PI,
            twist_span: std::f32::consts::PI,
            limit_softness: 1.0,
            bias_factor: 0.3,
            relaxation_factor: 1.0,
            angular_damping: 0.0,
        }
    }
}

#[derive(Clone, Debug)]
pub enum ConstraintParams {
    Generic6DofSpring(Generic6DofParams),
    StiffSpring(StiffSpringParams),
    ConeTwist(ConeTwistParams),
}

#[derive(Clone, Debug)]
pub struct ConstraintDef {
    pub name: String,
    pub bone_a: String,
    pub bone_b: String,
    pub frame: FrameType,
    pub params: ConstraintParams,
}

impl ConstraintDef {
    pub fn new(name: impl Into<String>, bone_a: impl Into<String>, bone_b: impl Into<String>, params: ConstraintParams) -> Self {
        Self {
            name: name.into(),
            bone_a: bone_a.into(),
            bone_b: bone_b.into(),
            frame: FrameType::default(),
            params,
        }
    }
}

/// 一起求解的约束（按约束名称引用）
#[derive(Clone, Debug)]
pub struct ConstraintGroupDef {
    pub constraints: Vec<String>,
    pub iterations: usize,
    pub use_mlcp: bool,
}

impl ConstraintGroupDef {
    pub fn new(constraints: Vec<String>) -> Self {
        Self { constraints, iterations: 16, use_mlcp: true }
    }
}

/// 一个完整的系统定义
#[derive(Clone, Debug, Default)]
pub struct SystemDef {
    pub name: String,
    pub bones: Vec<BoneDef>,
    pub shapes: Vec<ShapeDef>,
    pub constraints: Vec<ConstraintDef>,
    pub groups: Vec<ConstraintGroupDef>,
}

/// 几何中的一根蒙皮骨骼
#[derive(Clone, Debug)]
pub struct GeometryBone {
    pub name: String,
    /// 蒙皮空间 → 节点空间
    pub skin_to_bone: Transform,
    /// 节点空间中受影响顶点的包围球
    pub bounding_sphere: BoundingSphere,
}

/// 宿主提供的蒙皮几何
#[derive(Clone, Debug, Default)]
pub struct SkinnedGeometry {
    pub name: String,
    pub bones: Vec<GeometryBone>,
    pub positions: Vec<Vec3>,
    /// 每个顶点的 (几何骨骼索引, 权重)
    pub influences: Vec<Vec<(u32, f32)>>,
    pub triangles: Vec<[u32; 3]>,
}

impl SkinnedGeometry {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }
}
