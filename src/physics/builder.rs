//! 由定义构建蒙皮网格物理系统
//!
//! 出错的单个元素（找不到节点、几何、骨骼，退化的三角形等）记录警告后跳过，
//! 其余部分照常构建。构建完成后一根骨骼都没有则整体失败。

use std::collections::HashMap;

use log::{debug, info, warn};

use super::definition::{
    BoneDef, ConstraintDef, ConstraintGroupDef, ConstraintParams, ShapeDef, ShapeKind, SkinnedGeometry, SystemDef,
};
use super::{RigidBody, SkinnedMeshBone, SkinnedMeshSystem};
use crate::constraint::{BoneScaleConstraint, ConeTwist, ConstraintGroup, ConstraintKind, Generic6DofSpring, StiffSpring};
use crate::math::Transform;
use crate::mesh::{PerTriangleShape, PerVertexShape, SkinnedBone, SkinnedMeshBody, SkinnedMeshShape, Vertex};
use crate::skeleton::JointProvider;
use crate::{PhysicsError, Result};

pub struct SystemBuilder<'a> {
    joints: &'a dyn JointProvider,
    geometries: &'a [SkinnedGeometry],
}

/// 构建过程中的骨骼表
#[derive(Default)]
struct BoneTable {
    bones: Vec<SkinnedMeshBone>,
    index: HashMap<String, usize>,
}

impl<'a> SystemBuilder<'a> {
    pub fn new(joints: &'a dyn JointProvider, geometries: &'a [SkinnedGeometry]) -> Self {
        Self { joints, geometries }
    }

    pub fn build(&self, def: &SystemDef) -> Result<SkinnedMeshSystem> {
        let mut table = BoneTable::default();

        for bone in &def.bones {
            if table.index.contains_key(&bone.name) {
                warn!("[物理构建] {}: 骨骼 {} 重复定义，忽略", def.name, bone.name);
                continue;
            }
            if let Err(e) = self.add_bone(&mut table, bone) {
                warn!("[物理构建] {}: {e}", def.name);
            }
        }

        let mut bodies = Vec::new();
        for shape in &def.shapes {
            match self.build_body(&mut table, shape) {
                Ok(body) => bodies.push(body),
                Err(e) => warn!("[物理构建] {}: 形状 {} 跳过: {e}", def.name, shape.name),
            }
        }

        if table.bones.is_empty() {
            return Err(PhysicsError::EmptySystem(def.name.clone()));
        }

        let mut constraints = Vec::new();
        let mut constraint_index = HashMap::new();
        for c in &def.constraints {
            match build_constraint(&table, c) {
                Ok(constraint) => {
                    constraint_index.insert(c.name.clone(), constraints.len());
                    constraints.push(constraint);
                }
                Err(e) => warn!("[物理构建] {}: 约束 {} 跳过: {e}", def.name, c.name),
            }
        }

        let groups: Vec<ConstraintGroup> = def
            .groups
            .iter()
            .filter_map(|g| build_group(&def.name, &constraint_index, g))
            .collect();

        for body in &mut bodies {
            body.update_bones(&table.bones);
        }

        info!(
            "[物理构建] {}: 骨骼 {}, 形状 {}, 约束 {}, 约束组 {}",
            def.name,
            table.bones.len(),
            bodies.len(),
            constraints.len(),
            groups.len()
        );
        Ok(SkinnedMeshSystem::new(def.name.clone(), table.bones, bodies, constraints, groups, self.joints))
    }

    fn add_bone(&self, table: &mut BoneTable, def: &BoneDef) -> Result<usize> {
        if let Some(&i) = table.index.get(&def.name) {
            return Ok(i);
        }
        let joint = self.joints.find_joint(&def.name).ok_or_else(|| PhysicsError::MissingJoint(def.name.clone()))?;
        if !def.mass.is_finite() || def.mass < 0.0 || !def.inertia.is_finite() {
            return Err(PhysicsError::InvalidBone(def.name.clone()));
        }

        let mut rig = RigidBody::new(def.mass, def.inertia, Transform::IDENTITY, def.is_kinematic());
        rig.set_damping(def.linear_damping, def.angular_damping);
        rig.friction = def.friction;
        rig.rolling_friction = def.rolling_friction;
        rig.restitution = def.restitution;

        let mut bone = SkinnedMeshBone::new(def.name.clone(), Some(joint), rig, def.rig_offset);
        bone.margin_multiplier = def.margin_multiplier;
        bone.gravity_factor = def.gravity_factor;
        bone.collision_radius = def.collision_radius.filter(|r| *r > 0.0);
        bone.can_collide_with_bones = def.can_collide_with_bones.clone();
        bone.no_collide_with_bones = def.no_collide_with_bones.clone();
        bone.reset_transform(self.joints);

        let index = table.bones.len();
        table.index.insert(def.name.clone(), index);
        table.bones.push(bone);
        Ok(index)
    }

    fn build_body(&self, table: &mut BoneTable, def: &ShapeDef) -> Result<SkinnedMeshBody> {
        let geometry = self
            .geometries
            .iter()
            .find(|g| g.name == def.geometry)
            .ok_or_else(|| PhysicsError::InvalidGeometry(format!("找不到几何 {}", def.geometry)))?;
        let n = geometry.vertex_count();
        if n == 0 || geometry.influences.len() != n {
            return Err(PhysicsError::InvalidGeometry(format!(
                "{}: 顶点 {n}, 权重 {}",
                geometry.name,
                geometry.influences.len()
            )));
        }

        // 几何骨骼 → body 内的影响骨骼；没有声明的骨骼按运动学创建
        let mut skinned = Vec::new();
        let mut remap = vec![None; geometry.bones.len()];
        for (gi, gb) in geometry.bones.iter().enumerate() {
            let bone = match table.index.get(&gb.name) {
                Some(&i) => i,
                None => match self.add_bone(table, &BoneDef::kinematic(gb.name.clone())) {
                    Ok(i) => i,
                    Err(e) => {
                        warn!("[物理构建] 形状 {}: {e}，该骨骼的权重被忽略", def.name);
                        continue;
                    }
                },
            };
            let mut sb = SkinnedBone::new(bone, gb.skin_to_bone, gb.bounding_sphere);
            sb.weight_threshold = def.weight_threshold(&gb.name);
            remap[gi] = Some(skinned.len() as u32);
            skinned.push(sb);
        }
        if skinned.is_empty() {
            return Err(PhysicsError::InvalidGeometry(format!("{} 没有可用的蒙皮骨骼", geometry.name)));
        }

        let vertices: Vec<Vertex> = geometry
            .positions
            .iter()
            .zip(&geometry.influences)
            .map(|(&pos, influences)| {
                let mapped: Vec<(u32, f32)> = influences
                    .iter()
                    .filter_map(|&(b, w)| remap.get(b as usize).copied().flatten().map(|local| (local, w)))
                    .collect();
                Vertex::new(pos, &mapped)
            })
            .collect();
        let thresholds: Vec<f32> = skinned.iter().map(|b| b.weight_threshold).collect();

        let shape = match def.kind {
            ShapeKind::PerVertex => SkinnedMeshShape::PerVertex(PerVertexShape::new(&vertices, def.margin, &thresholds)),
            ShapeKind::PerTriangle { penetration } => {
                let triangles: Vec<[u32; 3]> = geometry.triangles.iter().copied().filter(|t| valid_triangle(t, n)).collect();
                let dropped = geometry.triangles.len() - triangles.len();
                if dropped > 0 {
                    warn!("[物理构建] 形状 {}: 忽略 {dropped} 个无效三角形", def.name);
                }
                if triangles.is_empty() {
                    return Err(PhysicsError::InvalidGeometry(format!("{} 没有有效三角形", geometry.name)));
                }
                SkinnedMeshShape::PerTriangle(PerTriangleShape::new(&vertices, &triangles, def.margin, penetration, &thresholds))
            }
        };

        let mut body = SkinnedMeshBody::new(def.name.clone(), vertices, skinned, shape);
        body.tags = def.tags.clone();
        body.can_collide_with_tags = def.can_collide_with_tags.clone();
        body.no_collide_with_tags = def.no_collide_with_tags.clone();
        debug!("[物理构建] 形状 {}: 顶点 {n}, 影响骨骼 {}", def.name, body.skinned_bones.len());
        Ok(body)
    }
}

fn valid_triangle(t: &[u32; 3], n: usize) -> bool {
    t.iter().all(|&v| (v as usize) < n) && t[0] != t[1] && t[1] != t[2] && t[0] != t[2]
}

fn build_constraint(table: &BoneTable, def: &ConstraintDef) -> Result<BoneScaleConstraint> {
    let find = |name: &str| table.index.get(name).copied().ok_or_else(|| PhysicsError::MissingBone(name.to_string()));
    let a = find(&def.bone_a)?;
    let b = find(&def.bone_b)?;
    if a == b {
        return Err(PhysicsError::InvalidConstraint(format!("{} 两端是同一根骨骼", def.name)));
    }

    let tr_a = table.bones[a].rig.transform;
    let tr_b = table.bones[b].rig.transform;
    let world = def.frame.world_frame(&tr_a, &tr_b);
    let frame_a = tr_a.inverse() * world;
    let frame_b = tr_b.inverse() * world;
    if !frame_a.translation.is_finite() || !frame_b.translation.is_finite() {
        return Err(PhysicsError::InvalidConstraint(format!("{} 坐标系无效", def.name)));
    }

    let kind = match &def.params {
        ConstraintParams::Generic6DofSpring(p) => {
            let mut c = Generic6DofSpring::new(frame_a, frame_b);
            c.linear_lower = p.linear_lower;
            c.linear_upper = p.linear_upper;
            c.angular_lower = p.angular_lower;
            c.angular_upper = p.angular_upper;
            c.linear_stiffness = p.linear_stiffness;
            c.linear_damping = p.linear_damping;
            c.angular_stiffness = p.angular_stiffness;
            c.angular_damping = p.angular_damping;
            ConstraintKind::Generic6DofSpring(c)
        }
        ConstraintParams::StiffSpring(p) => {
            // 锚点取两个刚体的原点，距离限制是构建时距离的倍数
            let length = (tr_b.translation - tr_a.translation).length();
            let mut c = StiffSpring::new(glam::Vec3::ZERO, glam::Vec3::ZERO, p.min_distance * length, p.max_distance * length);
            c.stiffness = p.stiffness;
            c.damping = p.damping;
            c.equilibrium = p.equilibrium.clamp(0.0, 1.0);
            ConstraintKind::StiffSpring(c)
        }
        ConstraintParams::ConeTwist(p) => {
            let mut c = ConeTwist::new(frame_a, frame_b);
            c.set_limit(p.swing_span1, p.swing_span2, p.twist_span);
            c.softness = p.limit_softness;
            c.bias_factor = p.bias_factor;
            c.relaxation = p.relaxation_factor;
            c.damping = p.angular_damping;
            ConstraintKind::ConeTwist(c)
        }
    };
    Ok(BoneScaleConstraint::new(def.name.clone(), a, b, kind, &table.bones))
}

fn build_group(system: &str, index: &HashMap<String, usize>, def: &ConstraintGroupDef) -> Option<ConstraintGroup> {
    let mut constraints = Vec::new();
    for name in &def.constraints {
        match index.get(name) {
            Some(&i) if !constraints.contains(&i) => constraints.push(i),
            Some(_) => {}
            None => warn!("[物理构建] {system}: 约束组引用了不存在的约束 {name}"),
        }
    }
    if constraints.is_empty() {
        warn!("[物理构建] {system}: 空约束组，忽略");
        return None;
    }
    Some(ConstraintGroup { constraints, iterations: def.iterations.max(1), use_mlcp: def.use_mlcp })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::BoundingSphere;
    use crate::physics::definition::{GeometryBone, StiffSpringParams};
    use crate::skeleton::Skeleton;
    use glam::Vec3;

    fn skeleton() -> Skeleton {
        let mut sk = Skeleton::new();
        sk.add_joint("body", None, Transform::IDENTITY);
        sk.add_joint("skirt", Some(0), Transform::from_translation(Vec3::new(0.0, -1.0, 0.0)));
        sk
    }

    fn geometry() -> SkinnedGeometry {
        let bone = |name: &str| GeometryBone {
            name: name.into(),
            skin_to_bone: Transform::IDENTITY,
            bounding_sphere: BoundingSphere::new(Vec3::ZERO, 1.0),
        };
        SkinnedGeometry {
            name: "skirt_mesh".into(),
            bones: vec![bone("body"), bone("skirt"), bone("missing")],
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Z],
            influences: vec![vec![(0, 1.0)], vec![(1, 0.6), (2, 0.4)], vec![(1, 1.0)]],
            triangles: vec![[0, 1, 2], [0, 0, 1], [0, 1, 9]],
        }
    }

    fn def() -> SystemDef {
        SystemDef {
            name: "skirt".into(),
            bones: vec![BoneDef::new("skirt"), BoneDef::new("nowhere")],
            shapes: vec![
                ShapeDef::new("tri", "skirt_mesh", ShapeKind::PerTriangle { penetration: 0.1 }),
                ShapeDef::new("bad", "no_such_mesh", ShapeKind::PerVertex),
            ],
            constraints: vec![
                ConstraintDef::new("spring", "body", "skirt", ConstraintParams::StiffSpring(StiffSpringParams::default())),
                ConstraintDef::new("dangling", "body", "nowhere", ConstraintParams::StiffSpring(StiffSpringParams::default())),
            ],
            groups: vec![ConstraintGroupDef::new(vec!["spring".into(), "dangling".into()])],
        }
    }

    #[test]
    fn skips_bad_elements() {
        let sk = skeleton();
        let geometries = [geometry()];
        let system = SystemBuilder::new(&sk, &geometries).build(&def()).unwrap();

        // skirt 来自定义，body 由形状引用自动创建为运动学
        assert_eq!(system.bones.len(), 2);
        let body = system.find_bone("body").unwrap();
        assert!(system.bones[body].is_kinematic());
        assert!(!system.bones[system.find_bone("skirt").unwrap()].is_kinematic());

        assert_eq!(system.bodies.len(), 1);
        assert_eq!(system.bodies[0].skinned_bones.len(), 2);
        assert_eq!(system.constraints.len(), 1);
        assert_eq!(system.constraint_groups.len(), 1);
        assert_eq!(system.constraint_groups[0].constraints, vec![0]);
    }

    #[test]
    fn stiff_spring_uses_bind_length() {
        let sk = skeleton();
        let geometries = [geometry()];
        let system = SystemBuilder::new(&sk, &geometries).build(&def()).unwrap();
        let ConstraintKind::StiffSpring(s) = &system.constraints[0].kind else {
            panic!("expected stiff spring");
        };
        assert!((s.rest_length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_system_is_rejected() {
        let sk = skeleton();
        let def = SystemDef { name: "ghost".into(), bones: vec![BoneDef::new("nowhere")], ..Default::default() };
        let err = SystemBuilder::new(&sk, &[]).build(&def).unwrap_err();
        assert!(matches!(err, PhysicsError::EmptySystem(name) if name == "ghost"));
    }
}
