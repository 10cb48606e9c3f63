//! 蒙皮网格碰撞体
//!
//! 持有顶点、蒙皮权重和一个碰撞形状。每步：
//! 1. `update_bones`：刷新影响骨骼的世界变换与包围球（宽相使用）
//! 2. `skin_vertices` → `update_shape`：蒙皮顶点并刷新形状（只对参与碰撞的 body 执行）
//!
//! 上一步位置只在上一步也蒙皮过时有效，否则等于当前位置。

use glam::Vec3;

use crate::math::{Aabb, BoundingSphere, Transform};
use crate::physics::SkinnedMeshBone;
use crate::skinning::{compute_skinning, SkinningContext, SkinningInput, SkinningOutput};

use super::{SkinnedMeshShape, Vertex, VertexPos};

/// body 内的一根影响骨骼
#[derive(Clone, Debug)]
pub struct SkinnedBone {
    /// 所属系统中的骨骼索引
    pub bone: usize,
    /// 蒙皮空间 → 节点空间（绑定姿势的逆）
    pub vertex_to_bone: Transform,
    /// 节点空间包围球
    pub local_bounding_sphere: BoundingSphere,
    pub world_bounding_sphere: BoundingSphere,
    pub vertex_to_world: Transform,
    /// 低于该权重的影响不参与碰撞
    pub weight_threshold: f32,
    pub is_kinematic: bool,
    pub margin_multiplier: f32,
}

impl SkinnedBone {
    pub fn new(bone: usize, vertex_to_bone: Transform, local_bounding_sphere: BoundingSphere) -> Self {
        Self {
            bone,
            vertex_to_bone,
            local_bounding_sphere,
            world_bounding_sphere: local_bounding_sphere,
            vertex_to_world: vertex_to_bone,
            weight_threshold: 0.0,
            is_kinematic: true,
            margin_multiplier: 1.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SkinnedMeshBody {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub vpos: Vec<VertexPos>,
    /// 上一步的顶点位置，扫掠检测使用
    pub prev_vpos: Vec<VertexPos>,
    /// 每个顶点受动态骨骼影响的权重
    pub flexible: Vec<f32>,
    pub skinned_bones: Vec<SkinnedBone>,
    pub shape: SkinnedMeshShape,
    pub tags: Vec<String>,
    /// 非空时只与带这些标签的 body 碰撞
    pub can_collide_with_tags: Vec<String>,
    pub no_collide_with_tags: Vec<String>,
    /// 所有影响骨骼都是运动学的
    pub is_kinematic: bool,
    /// 宽相包围盒
    pub aabb: Aabb,
    /// 最近一次蒙皮的步序号
    skinned_step: Option<u64>,
    skinning: SkinningContext,
}

impl SkinnedMeshBody {
    pub fn new(name: impl Into<String>, vertices: Vec<Vertex>, skinned_bones: Vec<SkinnedBone>, shape: SkinnedMeshShape) -> Self {
        let n = vertices.len();
        Self {
            name: name.into(),
            vertices,
            vpos: vec![VertexPos::default(); n],
            prev_vpos: vec![VertexPos::default(); n],
            flexible: vec![0.0; n],
            skinned_bones,
            shape,
            tags: Vec::new(),
            can_collide_with_tags: Vec::new(),
            no_collide_with_tags: Vec::new(),
            is_kinematic: true,
            aabb: Aabb::EMPTY,
            skinned_step: None,
            skinning: SkinningContext::default(),
        }
    }

    /// 每个影响骨骼的权重阈值
    pub fn weight_thresholds(&self) -> Vec<f32> {
        self.skinned_bones.iter().map(|b| b.weight_threshold).collect()
    }

    /// 刷新影响骨骼的世界变换、运动学状态和包围盒
    pub fn update_bones(&mut self, bones: &[SkinnedMeshBone]) {
        let margin = self.shape.margin();
        let mut aabb = Aabb::EMPTY;
        let mut all_kinematic = true;
        for sb in &mut self.skinned_bones {
            let Some(bone) = bones.get(sb.bone) else {
                continue;
            };
            sb.vertex_to_world = bone.current_transform * sb.vertex_to_bone;
            sb.world_bounding_sphere = sb.local_bounding_sphere.transformed(&bone.current_transform);
            sb.is_kinematic = bone.is_kinematic();
            sb.margin_multiplier = bone.margin_multiplier;
            all_kinematic &= sb.is_kinematic;
            aabb.merge(&sb.world_bounding_sphere.aabb(margin * sb.margin_multiplier));
        }
        self.is_kinematic = all_kinematic;
        self.aabb = aabb;
    }

    /// 蒙皮并刷新形状
    pub fn internal_update(&mut self, step: u64) {
        self.skin_vertices(step);
        self.update_shape();
    }

    /// 由影响骨骼的当前变换计算顶点世界位置，step 为当前步序号
    pub fn skin_vertices(&mut self, step: u64) {
        let continuous = self.skinned_step.is_some_and(|last| last.wrapping_add(1) == step);
        if continuous {
            std::mem::swap(&mut self.vpos, &mut self.prev_vpos);
        }

        let transforms: Vec<Transform> = self.skinned_bones.iter().map(|b| b.vertex_to_world).collect();
        let margins: Vec<f32> = self.skinned_bones.iter().map(|b| b.margin_multiplier).collect();
        let dynamic: Vec<bool> = self.skinned_bones.iter().map(|b| !b.is_kinematic).collect();
        let input = SkinningInput {
            vertices: &self.vertices,
            bone_transforms: &transforms,
            margin_multipliers: &margins,
            dynamic: &dynamic,
        };
        compute_skinning(
            &self.skinning,
            &input,
            SkinningOutput { positions: &mut self.vpos, flexible: &mut self.flexible },
        );
        if !continuous {
            self.prev_vpos.copy_from_slice(&self.vpos);
        }
        self.skinned_step = Some(step);
    }

    /// 用本步顶点位置刷新碰撞形状
    pub fn update_shape(&mut self) {
        self.shape.internal_update(&self.vpos, &self.flexible);
    }

    /// 下一次蒙皮不使用上一步位置（瞬移之后）
    pub fn reset_history(&mut self) {
        self.skinned_step = None;
    }

    /// 世界重新居中时随刚体一起平移顶点
    pub fn translate(&mut self, offset: Vec3) {
        let offset = offset.extend(0.0);
        for v in self.vpos.iter_mut().chain(self.prev_vpos.iter_mut()) {
            v.0 += offset;
        }
    }

    /// body 级碰撞过滤：运动学对运动学、标签允许/拒绝列表
    pub fn can_collide_with(&self, other: &SkinnedMeshBody) -> bool {
        if self.is_kinematic && other.is_kinematic {
            return false;
        }
        accepts_tags(self, &other.tags) && accepts_tags(other, &self.tags)
    }

    /// 影响骨骼包围球是否有任意一对相交
    pub fn bounding_spheres_collide(&self, other: &SkinnedMeshBody) -> bool {
        let ma = self.shape.margin();
        let mb = other.shape.margin();
        self.skinned_bones.iter().any(|a| {
            let sa = expand(&a.world_bounding_sphere, ma * a.margin_multiplier);
            other
                .skinned_bones
                .iter()
                .any(|b| sa.is_collide(&expand(&b.world_bounding_sphere, mb * b.margin_multiplier)))
        })
    }
}

fn expand(s: &BoundingSphere, margin: f32) -> BoundingSphere {
    BoundingSphere::new(s.center, s.radius + margin)
}

fn accepts_tags(body: &SkinnedMeshBody, other_tags: &[String]) -> bool {
    if !body.can_collide_with_tags.is_empty() && !other_tags.iter().any(|t| body.can_collide_with_tags.contains(t)) {
        return false;
    }
    !other_tags.iter().any(|t| body.no_collide_with_tags.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::PerVertexShape;
    use crate::physics::RigidBody;

    fn body(name: &str, tags: &[&str]) -> SkinnedMeshBody {
        let vertices = vec![
            Vertex::new(Vec3::ZERO, &[(0, 1.0)]),
            Vertex::new(Vec3::X, &[(0, 0.5), (1, 0.5)]),
        ];
        let shape = SkinnedMeshShape::PerVertex(PerVertexShape::new(&vertices, 0.1, &[0.0, 0.0]));
        let bones = vec![
            SkinnedBone::new(0, Transform::IDENTITY, BoundingSphere::new(Vec3::ZERO, 1.0)),
            SkinnedBone::new(1, Transform::IDENTITY, BoundingSphere::new(Vec3::ZERO, 1.0)),
        ];
        let mut b = SkinnedMeshBody::new(name, vertices, bones, shape);
        b.tags = tags.iter().map(|t| t.to_string()).collect();
        b
    }

    fn bones(kinematic: [bool; 2], offset: Vec3) -> Vec<SkinnedMeshBone> {
        kinematic
            .iter()
            .enumerate()
            .map(|(i, &k)| {
                let rig = RigidBody::new(1.0, Vec3::ONE, Transform::IDENTITY, k);
                let mut bone = SkinnedMeshBone::new(format!("b{i}"), None, rig, Transform::IDENTITY);
                bone.current_transform = Transform::from_translation(offset);
                bone
            })
            .collect()
    }

    #[test]
    fn skinning_follows_bones() {
        let mut b = body("cape", &[]);
        b.update_bones(&bones([true, false], Vec3::new(0.0, 2.0, 0.0)));
        assert!(!b.is_kinematic);
        b.internal_update(0);
        assert_eq!(b.vpos[0].pos(), Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(b.flexible, vec![0.0, 0.5]);
        // 第一帧没有历史，上一步位置等于当前位置
        assert_eq!(b.prev_vpos, b.vpos);
        assert!(b.aabb.min.y <= 1.0 && b.aabb.max.y >= 3.0);
    }

    #[test]
    fn history_is_only_kept_between_consecutive_steps() {
        let mut b = body("skirt", &[]);
        let at = |y: f32| bones([false, false], Vec3::new(0.0, y, 0.0));
        b.update_bones(&at(0.0));
        b.skin_vertices(0);
        b.update_bones(&at(1.0));
        b.skin_vertices(1);
        assert_eq!(b.prev_vpos[0].pos(), Vec3::ZERO);
        assert_eq!(b.vpos[0].pos(), Vec3::new(0.0, 1.0, 0.0));

        // 第 2、3 步没有参与碰撞，第 4 步的上一步位置不能是第 1 步的
        b.update_bones(&at(4.0));
        b.skin_vertices(4);
        assert_eq!(b.prev_vpos[0].pos(), Vec3::new(0.0, 4.0, 0.0));
        assert_eq!(b.vpos[0].pos(), Vec3::new(0.0, 4.0, 0.0));

        b.update_bones(&at(5.0));
        b.skin_vertices(5);
        assert_eq!(b.prev_vpos[0].pos(), Vec3::new(0.0, 4.0, 0.0));

        b.reset_history();
        b.skin_vertices(6);
        assert_eq!(b.prev_vpos, b.vpos);
    }

    #[test]
    fn translate_moves_history_too() {
        let mut b = body("skirt", &[]);
        b.update_bones(&bones([false, false], Vec3::ZERO));
        b.skin_vertices(0);
        b.translate(Vec3::new(0.0, 0.0, -3.0));
        assert_eq!(b.vpos[0].pos(), Vec3::new(0.0, 0.0, -3.0));
        assert_eq!(b.prev_vpos[0].pos(), Vec3::new(0.0, 0.0, -3.0));
        assert_eq!(b.vpos[0].margin_multiplier(), 1.0);
    }

    #[test]
    fn kinematic_bodies_never_collide() {
        let mut a = body("a", &[]);
        let mut c = body("c", &[]);
        let kb = bones([true, true], Vec3::ZERO);
        a.update_bones(&kb);
        c.update_bones(&kb);
        assert!(!a.can_collide_with(&c));
        c.update_bones(&bones([false, true], Vec3::ZERO));
        assert!(a.can_collide_with(&c));
    }

    #[test]
    fn tag_rules() {
        let mut skirt = body("skirt", &["skirt"]);
        let mut leg = body("leg", &["body"]);
        let mut hair = body("hair", &["hair"]);
        let dynamic = bones([false, false], Vec3::ZERO);
        for b in [&mut skirt, &mut leg, &mut hair] {
            b.update_bones(&dynamic);
        }
        skirt.can_collide_with_tags.push("body".into());
        assert!(skirt.can_collide_with(&leg));
        assert!(!skirt.can_collide_with(&hair));

        leg.no_collide_with_tags.push("skirt".into());
        assert!(!skirt.can_collide_with(&leg));
    }

    #[test]
    fn bounding_sphere_pretest() {
        let mut a = body("a", &[]);
        let mut c = body("c", &[]);
        a.update_bones(&bones([false, false], Vec3::ZERO));
        c.update_bones(&bones([false, false], Vec3::new(1.5, 0.0, 0.0)));
        assert!(a.bounding_spheres_collide(&c));
        c.update_bones(&bones([false, false], Vec3::new(5.0, 0.0, 0.0)));
        assert!(!a.bounding_spheres_collide(&c));
    }
}
