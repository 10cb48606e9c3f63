//! 窄相检测算法
//!
//! 纯函数，不分配内存。约定：
//! - `normal` 从 A 指向 B
//! - `depth` 为负表示穿透
//! - `pos_a` / `pos_b` 分别是 A、B 表面上的最近点

use glam::Vec3;

use crate::math::EPSILON;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CollisionResult {
    pub pos_a: Vec3,
    pub pos_b: Vec3,
    pub normal: Vec3,
    pub depth: f32,
}

impl CollisionResult {
    /// 交换 A/B 的角色
    pub fn swapped(&self) -> Self {
        Self {
            pos_a: self.pos_b,
            pos_b: self.pos_a,
            normal: -self.normal,
            depth: self.depth,
        }
    }
}

/// 预先计算好法线的三角形
#[derive(Clone, Copy, Debug)]
pub struct CheckTriangle {
    pub p0: Vec3,
    pub p1: Vec3,
    pub p2: Vec3,
    pub normal: Vec3,
    pub margin: f32,
    /// > EPSILON 时为单面三角形，允许背面穿透到 -penetration
    pub penetration: f32,
    pub valid: bool,
}

impl CheckTriangle {
    pub fn new(p0: Vec3, p1: Vec3, p2: Vec3, margin: f32, penetration: f32) -> Self {
        let cross = (p1 - p0).cross(p2 - p0);
        let len = cross.length();
        let valid = len > EPSILON;
        let normal = if valid { cross / len } else { Vec3::ZERO };
        Self { p0, p1, p2, normal, margin, penetration, valid }
    }
}

/// 球-球
pub fn check_sphere_sphere(a: Vec3, b: Vec3, ra: f32, rb: f32) -> Option<CollisionResult> {
    let diff = b - a;
    let dist2 = diff.length_squared();
    let bound = ra + rb;
    if dist2 > bound * bound {
        return None;
    }
    let len = dist2.sqrt();
    let normal = if len > EPSILON { diff / len } else { Vec3::Y };
    Some(CollisionResult {
        pos_a: a + normal * ra,
        pos_b: b - normal * rb,
        normal,
        depth: len - bound,
    })
}

/// 投影点是否落在三角形内（三条边的同侧测试）
fn inside_triangle(tri: &CheckTriangle, p: Vec3) -> bool {
    let n = tri.normal;
    let e0 = (tri.p1 - tri.p0).cross(n);
    let e1 = (tri.p2 - tri.p1).cross(n);
    let e2 = (tri.p0 - tri.p2).cross(n);
    let d0 = e0.dot(p - tri.p0);
    let d1 = e1.dot(p - tri.p1);
    let d2 = e2.dot(p - tri.p2);
    // 逆时针三角形时三个值都 <= 0
    (d0 <= 0.0 && d1 <= 0.0 && d2 <= 0.0) || (d0 >= 0.0 && d1 >= 0.0 && d2 >= 0.0)
}

/// 球-三角形（球为 A，三角形为 B）
pub fn check_sphere_triangle(s: Vec3, r: f32, tri: &CheckTriangle) -> Option<CollisionResult> {
    if !tri.valid {
        return None;
    }
    let mut normal = tri.normal;
    let mut distance = normal.dot(s - tri.p0);
    let radius_with_margin = r + tri.margin;

    if tri.penetration > EPSILON {
        if distance < -tri.penetration || distance > radius_with_margin {
            return None;
        }
    } else {
        if distance < 0.0 {
            distance = -distance;
            normal = -normal;
        }
        if distance > radius_with_margin {
            return None;
        }
    }

    let projected = s - normal * distance;
    if !inside_triangle(tri, projected) {
        return None;
    }

    // normal 此时从三角形指向球心，结果里的法线要从 A（球）指向 B
    Some(CollisionResult {
        pos_a: s - normal * r,
        pos_b: projected + normal * tri.margin,
        normal: -normal,
        depth: distance - radius_with_margin,
    })
}

/// 扫掠球-三角形：球心从 so 移动到 sn
///
/// 先做 sn 处的静态测试；未命中且位移超过 r + margin 时，
/// 取运动线段与三角形平面的交点重新测试，并把交点之后沿法线的位移计入穿透深度。
pub fn check_sphere_triangle_swept(so: Vec3, sn: Vec3, r: f32, tri: &CheckTriangle) -> Option<CollisionResult> {
    if let Some(res) = check_sphere_triangle(sn, r, tri) {
        return Some(res);
    }
    if !tri.valid {
        return None;
    }

    let motion = sn - so;
    if motion.length() <= r + tri.margin {
        return None;
    }
    let denom = tri.normal.dot(motion);
    if denom.abs() < EPSILON {
        return None;
    }
    let t = tri.normal.dot(tri.p0 - so) / denom;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }

    let hit = so + motion * t;
    let mut res = check_sphere_triangle(hit, r, tri)?;
    let extra = (sn - hit).dot(res.normal).abs();
    res.depth -= extra;
    res.pos_a += res.normal * extra;
    Some(res)
}

/// 三角形-球（三角形为 A，球为 B）
pub fn check_triangle_sphere(tri: &CheckTriangle, s: Vec3, r: f32) -> Option<CollisionResult> {
    check_sphere_triangle(s, r, tri).map(|res| res.swapped())
}

pub fn check_triangle_sphere_swept(tri: &CheckTriangle, so: Vec3, sn: Vec3, r: f32) -> Option<CollisionResult> {
    check_sphere_triangle_swept(so, sn, r, tri).map(|res| res.swapped())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn unit_triangle(margin: f32, penetration: f32) -> CheckTriangle {
        CheckTriangle::new(
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(0.0, 0.0, 2.0),
            Vec3::new(1.0, 0.0, -1.0),
            margin,
            penetration,
        )
    }

    #[test]
    fn overlapping_spheres() {
        let res = check_sphere_sphere(Vec3::ZERO, Vec3::new(1.5, 0.0, 0.0), 1.0, 1.0).unwrap();
        assert_abs_diff_eq!(res.depth, -0.5, epsilon = 1e-6);
        assert_eq!(res.normal, Vec3::X);
        assert_eq!(res.pos_a, Vec3::X);
        assert_eq!(res.pos_b, Vec3::new(0.5, 0.0, 0.0));
    }

    #[test]
    fn separated_spheres() {
        assert!(check_sphere_sphere(Vec3::ZERO, Vec3::new(3.0, 0.0, 0.0), 1.0, 1.0).is_none());
    }

    #[test]
    fn sphere_sphere_is_symmetric() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let a = Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
            let b = Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
            let ra = rng.gen_range(0.1..1.0);
            let rb = rng.gen_range(0.1..1.0);
            let ab = check_sphere_sphere(a, b, ra, rb);
            let ba = check_sphere_sphere(b, a, rb, ra);
            assert_eq!(ab.is_some(), ba.is_some());
            if let (Some(ab), Some(ba)) = (ab, ba) {
                assert_abs_diff_eq!(ab.depth, ba.depth, epsilon = 1e-5);
                assert_abs_diff_eq!((ab.normal + ba.normal).length(), 0.0, epsilon = 1e-5);
                assert_abs_diff_eq!(ab.pos_a.distance(ba.pos_b), 0.0, epsilon = 1e-5);
                assert_abs_diff_eq!(ab.pos_b.distance(ba.pos_a), 0.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn sphere_above_triangle() {
        let tri = unit_triangle(0.0, 0.0);
        let res = check_sphere_triangle(Vec3::new(0.0, 0.5, 0.0), 1.0, &tri).unwrap();
        assert_abs_diff_eq!(res.depth, -0.5, epsilon = 1e-6);
        // 从球指向三角形
        assert_abs_diff_eq!(res.normal.y, -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(res.pos_b.y, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(res.pos_a.y, -0.5, epsilon = 1e-6);
    }

    #[test]
    fn sphere_outside_triangle_edges() {
        let tri = unit_triangle(0.0, 0.0);
        assert!(check_sphere_triangle(Vec3::new(5.0, 0.5, 0.0), 1.0, &tri).is_none());
        assert!(check_sphere_triangle(Vec3::new(0.0, 2.0, 0.0), 1.0, &tri).is_none());
    }

    #[test]
    fn two_sided_triangle_picks_nearest_face() {
        let tri = unit_triangle(0.0, 0.0);
        let res = check_sphere_triangle(Vec3::new(0.0, -0.5, 0.0), 1.0, &tri).unwrap();
        assert_abs_diff_eq!(res.normal.y, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(res.depth, -0.5, epsilon = 1e-6);
    }

    #[test]
    fn single_sided_triangle_ignores_deep_back_contacts() {
        // 绕序决定法线朝 +y
        let tri = unit_triangle(0.0, 0.2);
        let n = tri.normal;
        // 法线正面一侧
        let front = check_sphere_triangle(n * 0.5, 1.0, &tri).unwrap();
        assert_abs_diff_eq!(front.depth, -0.5, epsilon = 1e-6);
        // 背面浅穿透在容许范围内
        assert!(check_sphere_triangle(-n * 0.1, 1.0, &tri).is_some());
        // 背面过深
        assert!(check_sphere_triangle(-n * 0.5, 1.0, &tri).is_none());
    }

    #[test]
    fn degenerate_triangle_is_rejected() {
        let tri = CheckTriangle::new(Vec3::ZERO, Vec3::X, Vec3::X * 2.0, 0.0, 0.0);
        assert!(!tri.valid);
        assert!(check_sphere_triangle(Vec3::ZERO, 1.0, &tri).is_none());
    }

    #[test]
    fn swept_with_zero_motion_equals_static() {
        let tri = unit_triangle(0.05, 0.0);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..500 {
            let s = Vec3::new(rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..2.0));
            let r = rng.gen_range(0.1..1.0);
            assert_eq!(check_sphere_triangle_swept(s, s, r, &tri), check_sphere_triangle(s, r, &tri));
        }
    }

    #[test]
    fn swept_catches_tunnelling() {
        let tri = unit_triangle(0.0, 0.0);
        let so = Vec3::new(0.0, 3.0, 0.0);
        let sn = Vec3::new(0.0, -3.0, 0.0);
        assert!(check_sphere_triangle(sn, 0.5, &tri).is_none());
        let res = check_sphere_triangle_swept(so, sn, 0.5, &tri).unwrap();
        // 交点处接触深度 -0.5，再加上越过平面后 3.0 的位移
        assert_abs_diff_eq!(res.depth, -3.5, epsilon = 1e-5);
    }

    #[test]
    fn triangle_sphere_swaps_roles() {
        let tri = unit_triangle(0.0, 0.0);
        let s = Vec3::new(0.0, 0.5, 0.0);
        let a = check_sphere_triangle(s, 1.0, &tri).unwrap();
        let b = check_triangle_sphere(&tri, s, 1.0).unwrap();
        assert_eq!(a.pos_a, b.pos_b);
        assert_eq!(a.normal, -b.normal);
        assert_eq!(a.depth, b.depth);
    }
}
