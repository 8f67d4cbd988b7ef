//! Closed-form rigid registration between paired point sets.
//!
//! Both routines solve for the transform `T` minimizing
//! `Σ ‖p_old_i − T ∘ p_new_i‖²` over paired points, i.e. the pose of the
//! "new" frame expressed in the "old" frame. They are the workhorses behind
//! the landmark matchers that bootstrap relative poses for new graph edges.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

use crate::core::pose::{Point2, Pose2, Pose3};

/// Planar rigid registration.
///
/// Closed form: center both sets, recover the rotation from the summed
/// cross terms, then the translation from the centroids. Needs at least two
/// pairs; returns `None` on degenerate input (coincident points).
pub fn rigid_transform_2d(new_pts: &[Point2], old_pts: &[Point2]) -> Option<Pose2> {
    debug_assert_eq!(new_pts.len(), old_pts.len());
    let n = new_pts.len();
    if n < 2 {
        return None;
    }

    let inv_n = 1.0 / n as f64;
    let mut cn = Point2::new(0.0, 0.0);
    let mut co = Point2::new(0.0, 0.0);
    for (p, q) in new_pts.iter().zip(old_pts) {
        cn.x += p.x;
        cn.y += p.y;
        co.x += q.x;
        co.y += q.y;
    }
    cn.x *= inv_n;
    cn.y *= inv_n;
    co.x *= inv_n;
    co.y *= inv_n;

    // Cross terms of the centered sets.
    let (mut sxx, mut syy, mut sxy, mut syx) = (0.0, 0.0, 0.0, 0.0);
    for (p, q) in new_pts.iter().zip(old_pts) {
        let (nx, ny) = (p.x - cn.x, p.y - cn.y);
        let (ox, oy) = (q.x - co.x, q.y - co.y);
        sxx += nx * ox;
        syy += ny * oy;
        sxy += nx * oy;
        syx += ny * ox;
    }

    let num = sxy - syx;
    let den = sxx + syy;
    if num.abs() < 1e-15 && den.abs() < 1e-15 {
        // All points collapse onto the centroid: rotation unobservable.
        return None;
    }
    let theta = num.atan2(den);

    let (sin_t, cos_t) = theta.sin_cos();
    let tx = co.x - (cn.x * cos_t - cn.y * sin_t);
    let ty = co.y - (cn.x * sin_t + cn.y * cos_t);
    Some(Pose2::new(tx, ty, theta))
}

/// 3-D rigid registration via Horn's closed-form solution (SVD variant).
///
/// Centers both sets, accumulates the cross-covariance `H = Σ pₙ pₒᵀ`,
/// recovers the rotation from `H = U Σ Vᵀ` as `R = V Uᵀ` (with reflection
/// correction), then the translation from the centroids. Needs at least
/// three pairs.
pub fn rigid_transform_3d(new_pts: &[Vector3<f64>], old_pts: &[Vector3<f64>]) -> Option<Pose3> {
    debug_assert_eq!(new_pts.len(), old_pts.len());
    let n = new_pts.len();
    if n < 3 {
        return None;
    }

    let inv_n = 1.0 / n as f64;
    let cn: Vector3<f64> = new_pts.iter().sum::<Vector3<f64>>() * inv_n;
    let co: Vector3<f64> = old_pts.iter().sum::<Vector3<f64>>() * inv_n;

    let mut h = Matrix3::zeros();
    for (p, q) in new_pts.iter().zip(old_pts) {
        h += (p - cn) * (q - co).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    let mut rotation_mat = v_t.transpose() * u.transpose();
    if rotation_mat.determinant() < 0.0 {
        // Reflection case: flip the sign of the last column of V.
        let mut v = v_t.transpose();
        for i in 0..3 {
            v[(i, 2)] = -v[(i, 2)];
        }
        rotation_mat = v * u.transpose();
    }

    let rotation =
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation_mat));
    let translation = co - rotation * cn;
    Some(Pose3::new(translation, rotation))
}
