//! Matrix helpers underlying every pose query.
//!
//! Conventions used throughout the crate: glam `Mat4` is column-major with
//! column vectors, and transforms compose as `base * local`.

use std::f32::consts::FRAC_PI_2;

use glam::{EulerRot, Mat4, Quat, Vec3};
use xremu_vr::{Pose, Ray};

/// Column-major indices negated by `S * M * S` with `S = diag(-1, 1, 1, 1)`:
/// the X row and X column of the rotation block plus translation X.
pub const MIRROR_X_COMPONENTS: [usize; 5] = [1, 2, 4, 8, 12];

pub fn compose(position: [f32; 3], orientation: [f32; 4], scale: Vec3) -> Mat4 {
    Mat4::from_scale_rotation_translation(
        scale,
        Quat::from_array(orientation),
        Vec3::from_array(position),
    )
}

pub fn pose_matrix(pose: &Pose) -> Mat4 {
    compose(pose.position, pose.orientation, Vec3::ONE)
}

pub fn quat_from_euler_xyz(x: f32, y: f32, z: f32) -> Quat {
    Quat::from_euler(EulerRot::XYZ, x, y, z)
}

pub fn translate_on_x(matrix: Mat4, distance: f32) -> Mat4 {
    matrix * Mat4::from_translation(Vec3::new(distance, 0.0, 0.0))
}

/// Blend two transforms channel by channel.
///
/// Translation and scale are lerped, rotation is slerped. `alpha <= 0`
/// (or NaN) returns `from` and `alpha >= 1` returns `to` unchanged.
pub fn interpolate_matrix(from: &Mat4, to: &Mat4, alpha: f32) -> Mat4 {
    if !(alpha > 0.0) {
        return *from;
    }
    if alpha >= 1.0 {
        return *to;
    }
    let (from_scale, from_rotation, from_translation) = from.to_scale_rotation_translation();
    let (to_scale, to_rotation, to_translation) = to.to_scale_rotation_translation();
    Mat4::from_scale_rotation_translation(
        from_scale.lerp(to_scale, alpha),
        from_rotation.slerp(to_rotation, alpha),
        from_translation.lerp(to_translation, alpha),
    )
}

/// Mirror a transform across the YZ plane (left hand to right hand).
pub fn mirror_x(matrix: &Mat4) -> Mat4 {
    let mut cols = matrix.to_cols_array();
    for i in MIRROR_X_COMPONENTS {
        cols[i] = -cols[i];
    }
    Mat4::from_cols_array(&cols)
}

/// Reticle frame at `point` whose +Y axis is `facing_normal`.
///
/// Built as a look-at frame with +Z along `-facing_normal`, then rotated
/// -90 degrees about X.
pub fn surface_frame(point: Vec3, facing_normal: Vec3) -> Mat4 {
    let z = -facing_normal.normalize();
    let mut x = Vec3::Y.cross(z);
    if x.length_squared() < 1e-12 {
        // normal is vertical
        x = Vec3::Z.cross(z);
    }
    let x = x.normalize();
    let y = z.cross(x);
    let look = Mat4::from_cols(x.extend(0.0), y.extend(0.0), z.extend(0.0), point.extend(1.0));
    look * Mat4::from_rotation_x(-FRAC_PI_2)
}

/// Transform a ray by `base`, returning world origin and unit direction.
pub fn transform_ray(base: &Mat4, ray: &Ray) -> (Vec3, Vec3) {
    let origin = base.transform_point3(Vec3::from_array(ray.origin));
    let (_, rotation, _) = base.to_scale_rotation_translation();
    let direction = (rotation * Vec3::from_array(ray.direction)).normalize_or_zero();
    (origin, direction)
}

#[cfg(test)]
pub(crate) fn assert_mat_near(a: &Mat4, b: &Mat4, eps: f32) {
    let (a, b) = (a.to_cols_array(), b.to_cols_array());
    for i in 0..16 {
        assert!(
            (a[i] - b[i]).abs() <= eps,
            "component {i}: {} vs {}",
            a[i],
            b[i]
        );
    }
}
