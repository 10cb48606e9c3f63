//! 求解器刚体
//!
//! 求解期间每个刚体只用速度增量，外力冲量单独存放，结束时一起写回。
//! [`SolverBodyPool`] 给每个刚体配一把自旋锁，任务按索引从小到大加锁。
//! 不可动的刚体不加锁：它们的速度在求解中不会改变，任务拿到的是一份拷贝。

use std::cell::UnsafeCell;

use glam::{Mat3, Vec3};

use super::spin_lock::{SpinLock, SpinLockGuard};
use crate::physics::RigidBody;

#[derive(Clone, Copy, Debug)]
pub struct SolverBody {
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub delta_linear_velocity: Vec3,
    pub delta_angular_velocity: Vec3,
    pub inv_mass: f32,
    pub inv_inertia_world: Mat3,
    pub external_force_impulse: Vec3,
    pub external_torque_impulse: Vec3,
    pub dynamic: bool,
}

impl Default for SolverBody {
    fn default() -> Self {
        Self::fixed()
    }
}

impl SolverBody {
    /// 不可动、速度为零
    pub fn fixed() -> Self {
        Self {
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            delta_linear_velocity: Vec3::ZERO,
            delta_angular_velocity: Vec3::ZERO,
            inv_mass: 0.0,
            inv_inertia_world: Mat3::ZERO,
            external_force_impulse: Vec3::ZERO,
            external_torque_impulse: Vec3::ZERO,
            dynamic: false,
        }
    }

    pub fn from_rigid_body(rb: &RigidBody, dt: f32) -> Self {
        if rb.is_static_or_kinematic() {
            // 运动学刚体的速度来自动画目标
            return Self {
                linear_velocity: rb.linear_velocity,
                angular_velocity: rb.angular_velocity,
                ..Self::fixed()
            };
        }
        let (force, torque) = rb.external_impulse(dt);
        Self {
            linear_velocity: rb.linear_velocity,
            angular_velocity: rb.angular_velocity,
            inv_mass: rb.inv_mass,
            inv_inertia_world: rb.inv_inertia_world,
            external_force_impulse: force,
            external_torque_impulse: torque,
            dynamic: true,
            ..Self::fixed()
        }
    }

    /// 求解前的速度（含外力冲量）
    #[inline]
    pub fn base_velocity(&self) -> (Vec3, Vec3) {
        (
            self.linear_velocity + self.external_force_impulse,
            self.angular_velocity + self.external_torque_impulse,
        )
    }

    /// 当前的线速度和角速度（含外力冲量与增量）
    #[inline]
    pub fn velocity(&self) -> (Vec3, Vec3) {
        (
            self.linear_velocity + self.external_force_impulse + self.delta_linear_velocity,
            self.angular_velocity + self.external_torque_impulse + self.delta_angular_velocity,
        )
    }

    /// 施加冲量：lin 为雅可比线性部分，ang_component 为 I⁻¹·角部分
    #[inline]
    pub fn apply_impulse(&mut self, lin: Vec3, ang_component: Vec3, impulse: f32) {
        if self.dynamic {
            self.delta_linear_velocity += lin * (self.inv_mass * impulse);
            self.delta_angular_velocity += ang_component * impulse;
        }
    }

    /// 写回刚体速度
    pub fn write_back(&self, rb: &mut RigidBody) {
        if !self.dynamic {
            return;
        }
        let (lin, ang) = self.velocity();
        rb.linear_velocity = lin;
        rb.angular_velocity = ang;
    }
}

struct BodyCell {
    lock: SpinLock,
    /// 建池时确定，不随 body 的修改变化
    dynamic: bool,
    body: UnsafeCell<SolverBody>,
}

/// 带锁的求解刚体数组
pub struct SolverBodyPool {
    cells: Vec<BodyCell>,
}

// 可变访问只在持有对应自旋锁时发生（不可动刚体只读）
unsafe impl Sync for SolverBodyPool {}

impl SolverBodyPool {
    pub fn new(bodies: Vec<SolverBody>) -> Self {
        Self {
            cells: bodies
                .into_iter()
                .map(|body| BodyCell { lock: SpinLock::new(), dynamic: body.dynamic, body: UnsafeCell::new(body) })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&mut self, index: usize) -> Option<&SolverBody> {
        self.cells.get_mut(index).map(|c| &*c.body.get_mut())
    }

    /// 独占访问，不加锁
    pub fn get_mut(&mut self, index: usize) -> Option<&mut SolverBody> {
        self.cells.get_mut(index).map(|c| c.body.get_mut())
    }

    /// 两个刚体同时可写：按索引从小到大加锁
    ///
    /// a == b 时第二个参数是拷贝，对它的修改被丢弃。
    pub fn with_pair<R>(&self, a: usize, b: usize, f: impl FnOnce(&mut SolverBody, &mut SolverBody) -> R) -> Option<R> {
        let (ca, cb) = (self.cells.get(a)?, self.cells.get(b)?);
        let (first, second) = if a <= b { (ca, cb) } else { (cb, ca) };
        let _g1 = lock_if_dynamic(first);
        let _g2 = if a != b { lock_if_dynamic(second) } else { None };

        let mut local_a = None;
        let mut local_b = None;
        // SAFETY: 动态刚体的锁已持有；不可动刚体取拷贝
        let body_a = unsafe { cell_body(ca, &mut local_a) };
        let body_b = if a == b {
            local_b.insert(*body_a)
        } else {
            unsafe { cell_body(cb, &mut local_b) }
        };
        Some(f(body_a, body_b))
    }

    /// 一组刚体同时可写，indices 必须升序且不重复
    pub fn with_bodies<R>(&self, indices: &[usize], f: impl FnOnce(&mut [&mut SolverBody]) -> R) -> Option<R> {
        if indices.windows(2).any(|w| w[0] >= w[1]) {
            return None;
        }
        let cells: Vec<&BodyCell> = indices.iter().map(|&i| self.cells.get(i)).collect::<Option<_>>()?;
        let _guards: Vec<SpinLockGuard<'_>> = cells.iter().filter_map(|c| lock_if_dynamic(c)).collect();

        let mut locals: Vec<Option<SolverBody>> = vec![None; cells.len()];
        // SAFETY: 索引互不相同，动态刚体的锁都已持有
        let mut bodies: Vec<&mut SolverBody> =
            cells.iter().zip(locals.iter_mut()).map(|(c, local)| unsafe { cell_body(c, local) }).collect();
        Some(f(&mut bodies))
    }

    pub fn into_bodies(self) -> Vec<SolverBody> {
        self.cells.into_iter().map(|c| c.body.into_inner()).collect()
    }
}

fn lock_if_dynamic(cell: &BodyCell) -> Option<SpinLockGuard<'_>> {
    cell.dynamic.then(|| cell.lock.lock())
}

/// 动态刚体返回池中的引用（调用方持锁），否则返回拷贝
unsafe fn cell_body<'a>(cell: &'a BodyCell, local: &'a mut Option<SolverBody>) -> &'a mut SolverBody {
    let ptr = cell.body.get();
    if cell.dynamic {
        &mut *ptr
    } else {
        local.insert(*ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Transform;
    use rayon::prelude::*;

    fn dynamic() -> SolverBody {
        SolverBody { inv_mass: 1.0, inv_inertia_world: Mat3::IDENTITY, dynamic: true, ..SolverBody::fixed() }
    }

    #[test]
    fn fixed_bodies_ignore_impulses() {
        let mut b = SolverBody::fixed();
        b.apply_impulse(Vec3::X, Vec3::Y, 1.0);
        assert_eq!(b.velocity(), (Vec3::ZERO, Vec3::ZERO));
        let mut d = dynamic();
        d.apply_impulse(Vec3::X, Vec3::Y, 2.0);
        assert_eq!(d.velocity(), (Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 0.0)));
    }

    #[test]
    fn external_impulse_is_written_back() {
        let mut rb = RigidBody::new(2.0, Vec3::ONE, Transform::IDENTITY, false);
        rb.gravity = Vec3::new(0.0, -10.0, 0.0);
        rb.apply_gravity();
        let sb = SolverBody::from_rigid_body(&rb, 0.1);
        sb.write_back(&mut rb);
        assert!((rb.linear_velocity.y + 1.0).abs() < 1e-5);
    }

    #[test]
    fn pair_updates_are_exclusive() {
        let pool = SolverBodyPool::new(vec![dynamic(), dynamic(), SolverBody::fixed()]);
        (0..1000).into_par_iter().for_each(|i| {
            let (a, b) = if i % 2 == 0 { (0, 1) } else { (1, 0) };
            pool.with_pair(a, b, |x, y| {
                x.apply_impulse(Vec3::X, Vec3::ZERO, 1.0);
                y.apply_impulse(Vec3::X, Vec3::ZERO, 1.0);
            });
            pool.with_pair(0, 2, |x, y| {
                x.apply_impulse(Vec3::Y, Vec3::ZERO, 1.0);
                y.apply_impulse(Vec3::Y, Vec3::ZERO, 1.0);
            });
        });
        let bodies = pool.into_bodies();
        assert_eq!(bodies[0].delta_linear_velocity, Vec3::new(1000.0, 1000.0, 0.0));
        assert_eq!(bodies[1].delta_linear_velocity, Vec3::new(1000.0, 0.0, 0.0));
        assert_eq!(bodies[2].delta_linear_velocity, Vec3::ZERO);
    }

    #[test]
    fn lock_state_is_fixed_at_creation() {
        let mut pool = SolverBodyPool::new(vec![dynamic(), SolverBody::fixed()]);
        assert!(pool.cells[0].dynamic && !pool.cells[1].dynamic);
        // 池内 body 被改成不可动后，仍按建池时的状态加锁
        if let Some(b) = pool.get_mut(0) {
            b.dynamic = false;
        }
        pool.with_pair(0, 1, |a, _| {
            assert!(pool.cells[0].lock.is_locked());
            assert!(!pool.cells[1].lock.is_locked());
            a.delta_linear_velocity = Vec3::X;
        });
        assert!(!pool.cells[0].lock.is_locked());
        assert_eq!(pool.into_bodies()[0].delta_linear_velocity, Vec3::X);
    }

    #[test]
    fn with_bodies_rejects_unsorted() {
        let pool = SolverBodyPool::new(vec![dynamic(), dynamic()]);
        assert!(pool.with_bodies(&[1, 0], |_| ()).is_none());
        let n = pool.with_bodies(&[0, 1], |b| {
            b[1].apply_impulse(Vec3::Z, Vec3::ZERO, 1.0);
            b.len()
        });
        assert_eq!(n, Some(2));
    }
}
