//! Range-bearing observations: distance plus bearing angles to a landmark,
//! as produced by sonar, radar or landmark-detecting laser sensors.
//!
//! Landmarks are kept in Cartesian coordinates in their base frame; the
//! measurement model converts to polar/spherical form. The matchers convert
//! observations back to Cartesian and reuse the rigid registration routines.

use nalgebra::Vector3;

use crate::core::math::angle_diff;
use crate::core::pose::{Point2, Pose2, Pose3};
use crate::sensors::registration::{rigid_transform_2d, rigid_transform_3d};
use crate::sensors::SensorModel;

/// One planar range-bearing measurement.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RangeBearingObs2 {
    /// Distance in meters.
    pub range: f64,
    /// Angle around +Z in radians.
    pub yaw: f64,
}

/// One 3-D range-bearing measurement.
///
/// The observed direction is `Rz(yaw) · Ry(pitch) · [1, 0, 0]`, so a
/// positive pitch points below the sensor's XY plane.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RangeBearingObs3 {
    /// Distance in meters.
    pub range: f64,
    /// Angle around +Z in radians.
    pub yaw: f64,
    /// Angle around +Y in radians.
    pub pitch: f64,
}

fn to_point2(obs: &RangeBearingObs2) -> Point2 {
    Point2::new(obs.range * obs.yaw.cos(), obs.range * obs.yaw.sin())
}

fn to_point3(obs: &RangeBearingObs3) -> Vector3<f64> {
    let cp = obs.pitch.cos();
    Vector3::new(
        obs.range * cp * obs.yaw.cos(),
        obs.range * cp * obs.yaw.sin(),
        -obs.range * obs.pitch.sin(),
    )
}

/// Range + yaw of landmarks relative to the sensor, planar environments.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeBearing2D;

impl SensorModel for RangeBearing2D {
    type Pose = Pose2;
    type ObsData = RangeBearingObs2;
    type Landmark = Point2;
    type Params = ();

    const OBS_DIMS: usize = 2;
    const LM_DIMS: usize = 2;

    fn predict(_params: &(), base_wrt_observer: &Pose2, lm: &Point2) -> Option<RangeBearingObs2> {
        let p = base_wrt_observer.transform_point(lm);
        Some(RangeBearingObs2 {
            range: (p.x * p.x + p.y * p.y).sqrt(),
            yaw: p.y.atan2(p.x),
        })
    }

    fn residual(predicted: &RangeBearingObs2, measured: &RangeBearingObs2, out: &mut [f64]) {
        out[0] = predicted.range - measured.range;
        out[1] = angle_diff(measured.yaw, predicted.yaw);
    }

    fn inverse_model(_params: &(), obs: &RangeBearingObs2) -> Option<Point2> {
        Some(to_point2(obs))
    }

    fn lm_retract(lm: &Point2, delta: &[f64]) -> Point2 {
        Point2::new(lm.x + delta[0], lm.y + delta[1])
    }

    fn find_relative_pose(
        new_kf_obs: &[RangeBearingObs2],
        old_kf_obs: &[RangeBearingObs2],
        _params: &(),
    ) -> Option<Pose2> {
        let new_pts: Vec<Point2> = new_kf_obs.iter().map(to_point2).collect();
        let old_pts: Vec<Point2> = old_kf_obs.iter().map(to_point2).collect();
        rigid_transform_2d(&new_pts, &old_pts)
    }
}

/// Range + yaw + pitch of landmarks relative to the sensor.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeBearing3D;

impl SensorModel for RangeBearing3D {
    type Pose = Pose3;
    type ObsData = RangeBearingObs3;
    type Landmark = Vector3<f64>;
    type Params = ();

    const OBS_DIMS: usize = 3;
    const LM_DIMS: usize = 3;

    fn predict(
        _params: &(),
        base_wrt_observer: &Pose3,
        lm: &Vector3<f64>,
    ) -> Option<RangeBearingObs3> {
        let p = base_wrt_observer.transform_point(lm);
        let range = p.norm();
        if range < 1e-12 {
            return None;
        }
        Some(RangeBearingObs3 {
            range,
            yaw: p.y.atan2(p.x),
            pitch: (-p.z / range).asin(),
        })
    }

    fn residual(predicted: &RangeBearingObs3, measured: &RangeBearingObs3, out: &mut [f64]) {
        out[0] = predicted.range - measured.range;
        out[1] = angle_diff(measured.yaw, predicted.yaw);
        out[2] = angle_diff(measured.pitch, predicted.pitch);
    }

    fn inverse_model(_params: &(), obs: &RangeBearingObs3) -> Option<Vector3<f64>> {
        Some(to_point3(obs))
    }

    fn lm_retract(lm: &Vector3<f64>, delta: &[f64]) -> Vector3<f64> {
        Vector3::new(lm.x + delta[0], lm.y + delta[1], lm.z + delta[2])
    }

    fn find_relative_pose(
        new_kf_obs: &[RangeBearingObs3],
        old_kf_obs: &[RangeBearingObs3],
        _params: &(),
    ) -> Option<Pose3> {
        let new_pts: Vec<Vector3<f64>> = new_kf_obs.iter().map(to_point3).collect();
        let old_pts: Vec<Vector3<f64>> = old_kf_obs.iter().map(to_point3).collect();
        rigid_transform_3d(&new_pts, &old_pts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pose::Pose;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_rb2_polar_cartesian_roundtrip() {
        let obs = RangeBearingObs2 {
            range: 2.0,
            yaw: FRAC_PI_2 / 3.0,
        };
        let lm = RangeBearing2D::inverse_model(&(), &obs).unwrap();
        let back = RangeBearing2D::predict(&(), &Pose2::identity(), &lm).unwrap();
        assert_relative_eq!(back.range, obs.range, epsilon = 1e-12);
        assert_relative_eq!(back.yaw, obs.yaw, epsilon = 1e-12);
    }

    #[test]
    fn test_rb3_spherical_cartesian_roundtrip() {
        let obs = RangeBearingObs3 {
            range: 3.0,
            yaw: 0.4,
            pitch: -0.25,
        };
        let lm = RangeBearing3D::inverse_model(&(), &obs).unwrap();
        let back = RangeBearing3D::predict(&(), &Pose3::identity(), &lm).unwrap();
        assert_relative_eq!(back.range, obs.range, epsilon = 1e-12);
        assert_relative_eq!(back.yaw, obs.yaw, epsilon = 1e-12);
        assert_relative_eq!(back.pitch, obs.pitch, epsilon = 1e-12);
    }

    #[test]
    fn test_rb2_residual_wraps_yaw() {
        let mut out = [0.0; 2];
        let a = RangeBearingObs2 {
            range: 1.0,
            yaw: std::f64::consts::PI - 0.05,
        };
        let b = RangeBearingObs2 {
            range: 1.0,
            yaw: -std::f64::consts::PI + 0.05,
        };
        RangeBearing2D::residual(&a, &b, &mut out);
        assert_relative_eq!(out[1].abs(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_rb2_matcher_recovers_pose() {
        let truth = Pose2::new(0.8, -0.4, 0.6); // new KF wrt old KF
        let lms_old = [
            Point2::new(3.0, 1.0),
            Point2::new(-2.0, 2.0),
            Point2::new(1.0, -3.0),
        ];
        let old_to_new = truth.inverse();
        let old_obs: Vec<RangeBearingObs2> = lms_old
            .iter()
            .map(|p| RangeBearing2D::predict(&(), &Pose2::identity(), p).unwrap())
            .collect();
        let new_obs: Vec<RangeBearingObs2> = lms_old
            .iter()
            .map(|p| {
                let q = old_to_new.transform_point(p);
                RangeBearing2D::predict(&(), &Pose2::identity(), &q).unwrap()
            })
            .collect();

        let est = RangeBearing2D::find_relative_pose(&new_obs, &old_obs, &()).unwrap();
        assert_relative_eq!(est.x, truth.x, epsilon = 1e-9);
        assert_relative_eq!(est.y, truth.y, epsilon = 1e-9);
        assert_relative_eq!(est.theta, truth.theta, epsilon = 1e-9);
    }
}
