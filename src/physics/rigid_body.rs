//! 刚体
//!
//! 每根物理骨骼持有一个刚体。刚体变换不带缩放，
//! 骨骼缩放由 `SkinnedMeshBone` 单独记录。

use glam::{Mat3, Quat, Vec3};

use crate::math::Transform;

/// 单步最大旋转角，超过时按比例截断角速度
const ANGULAR_MOTION_THRESHOLD: f32 = 0.5 * std::f32::consts::FRAC_PI_2;

#[derive(Clone, Debug)]
pub struct RigidBody {
    pub transform: Transform,
    /// 运动学刚体积分的目标，动态刚体为预测变换
    pub interpolation_transform: Transform,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub inv_mass: f32,
    /// 局部空间对角惯量的倒数
    pub inv_inertia_local: Vec3,
    pub inv_inertia_world: Mat3,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub friction: f32,
    pub restitution: f32,
    pub rolling_friction: f32,
    /// 重力加速度（世界重力 × 骨骼重力系数）
    pub gravity: Vec3,
    pub total_force: Vec3,
    pub total_torque: Vec3,
    kinematic: bool,
}

impl RigidBody {
    /// mass 为 0 或 kinematic 为 true 时创建运动学刚体
    pub fn new(mass: f32, inertia: Vec3, transform: Transform, kinematic: bool) -> Self {
        let kinematic = kinematic || mass <= 0.0;
        let inv_mass = if kinematic { 0.0 } else { 1.0 / mass };
        let inv = |x: f32| if x > 0.0 && !kinematic { 1.0 / x } else { 0.0 };
        let transform = transform.without_scale();
        let mut body = Self {
            transform,
            interpolation_transform: transform,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            inv_mass,
            inv_inertia_local: Vec3::new(inv(inertia.x), inv(inertia.y), inv(inertia.z)),
            inv_inertia_world: Mat3::ZERO,
            linear_damping: 0.0,
            angular_damping: 0.0,
            friction: 0.5,
            restitution: 0.0,
            rolling_friction: 0.0,
            gravity: Vec3::ZERO,
            total_force: Vec3::ZERO,
            total_torque: Vec3::ZERO,
            kinematic,
        };
        body.update_inertia_tensor();
        body
    }

    #[inline]
    pub fn is_static_or_kinematic(&self) -> bool {
        self.kinematic
    }

    pub fn mass(&self) -> f32 {
        if self.inv_mass > 0.0 {
            1.0 / self.inv_mass
        } else {
            0.0
        }
    }

    /// I_world^-1 = R * diag(inv_local) * R^T
    pub fn update_inertia_tensor(&mut self) {
        let r = Mat3::from_quat(self.transform.rotation);
        self.inv_inertia_world = r * Mat3::from_diagonal(self.inv_inertia_local) * r.transpose();
    }

    pub fn set_damping(&mut self, linear: f32, angular: f32) {
        self.linear_damping = linear.clamp(0.0, 1.0);
        self.angular_damping = angular.clamp(0.0, 1.0);
    }

    pub fn apply_gravity(&mut self) {
        if !self.kinematic {
            self.total_force += self.gravity * self.mass();
        }
    }

    pub fn apply_central_force(&mut self, force: Vec3) {
        self.total_force += force;
    }

    pub fn apply_torque(&mut self, torque: Vec3) {
        self.total_torque += torque;
    }

    pub fn clear_forces(&mut self) {
        self.total_force = Vec3::ZERO;
        self.total_torque = Vec3::ZERO;
    }

    /// 外力在 dt 内产生的速度增量（线, 角）
    pub fn external_impulse(&self, dt: f32) -> (Vec3, Vec3) {
        (
            self.total_force * self.inv_mass * dt,
            self.inv_inertia_world * self.total_torque * dt,
        )
    }

    /// v += F/m * dt，ω += I^-1 * τ * dt
    pub fn integrate_velocities(&mut self, dt: f32) {
        if self.kinematic {
            return;
        }
        let (lin, ang) = self.external_impulse(dt);
        self.linear_velocity += lin;
        self.angular_velocity += ang;
    }

    /// v *= (1 - damping)^dt
    pub fn apply_damping(&mut self, dt: f32) {
        self.linear_velocity *= (1.0 - self.linear_damping).powf(dt);
        self.angular_velocity *= (1.0 - self.angular_damping).powf(dt);
    }

    /// 按当前速度积分 dt 后的变换（指数映射）
    pub fn predict_integrated_transform(&self, dt: f32) -> Transform {
        integrate_transform(&self.transform, self.linear_velocity, self.angular_velocity, dt)
    }

    pub fn proceed_to_transform(&mut self, transform: Transform) {
        self.transform = transform.without_scale();
        self.update_inertia_tensor();
    }

    /// 运动学刚体：由目标变换反推本步所需速度
    pub fn set_kinematic_target(&mut self, target: Transform, dt: f32) {
        let target = target.without_scale();
        self.interpolation_transform = target;
        if dt <= 0.0 {
            self.linear_velocity = Vec3::ZERO;
            self.angular_velocity = Vec3::ZERO;
            return;
        }
        self.linear_velocity = (target.translation - self.transform.translation) / dt;
        let mut dq = target.rotation * self.transform.rotation.inverse();
        if dq.w < 0.0 {
            dq = -dq;
        }
        let (axis, angle) = dq.to_axis_angle();
        self.angular_velocity = if angle.is_finite() { axis * (angle / dt) } else { Vec3::ZERO };
    }

    /// 把 NaN / 超限速度钳制到有限值
    pub fn clamp_velocities(&mut self, max: f32) {
        self.linear_velocity = clamp_vector(self.linear_velocity, max);
        self.angular_velocity = clamp_vector(self.angular_velocity, max);
    }

    /// 平移刚体（世界重新居中）
    pub fn translate(&mut self, offset: Vec3) {
        self.transform.translation += offset;
        self.interpolation_transform.translation += offset;
    }

    /// 直接设置变换并清零速度
    pub fn teleport(&mut self, transform: Transform) {
        self.transform = transform.without_scale();
        self.interpolation_transform = self.transform;
        self.linear_velocity = Vec3::ZERO;
        self.angular_velocity = Vec3::ZERO;
        self.update_inertia_tensor();
    }
}

fn clamp_vector(v: Vec3, max: f32) -> Vec3 {
    if !v.is_finite() {
        return Vec3::ZERO;
    }
    let len2 = v.length_squared();
    if len2 > max * max {
        v * (max / len2.sqrt())
    } else {
        v
    }
}

/// 指数映射积分，单步旋转角超过阈值时截断
pub fn integrate_transform(t: &Transform, lin_vel: Vec3, ang_vel: Vec3, dt: f32) -> Transform {
    let translation = t.translation + lin_vel * dt;

    let mut angle = ang_vel.length();
    if angle * dt > ANGULAR_MOTION_THRESHOLD {
        angle = ANGULAR_MOTION_THRESHOLD / dt;
    }
    let axis = if angle < 0.001 {
        // 泰勒展开，避免除以很小的角度
        ang_vel * (0.5 * dt - (dt * dt * dt) * (1.0 / 48.0) * angle * angle)
    } else {
        ang_vel * ((0.5 * angle * dt).sin() / angle)
    };
    let dorn = Quat::from_xyzw(axis.x, axis.y, axis.z, (angle * dt * 0.5).cos());
    let rotation = (dorn * t.rotation).normalize();

    Transform::from_rotation_translation(rotation, translation)
}
