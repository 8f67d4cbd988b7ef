//! Cartesian point observations: landmark coordinates measured directly in
//! the sensor frame (e.g. from a depth sensor or external tracker).

use nalgebra::Vector3;

use crate::core::pose::{Point2, Pose2, Pose3};
use crate::sensors::registration::{rigid_transform_2d, rigid_transform_3d};
use crate::sensors::SensorModel;

/// XY coordinates of landmarks relative to the sensor, planar problems.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cartesian2D;

impl SensorModel for Cartesian2D {
    type Pose = Pose2;
    type ObsData = Point2;
    type Landmark = Point2;
    type Params = ();

    const OBS_DIMS: usize = 2;
    const LM_DIMS: usize = 2;

    fn predict(_params: &(), base_wrt_observer: &Pose2, lm: &Point2) -> Option<Point2> {
        Some(base_wrt_observer.transform_point(lm))
    }

    fn residual(predicted: &Point2, measured: &Point2, out: &mut [f64]) {
        out[0] = predicted.x - measured.x;
        out[1] = predicted.y - measured.y;
    }

    fn inverse_model(_params: &(), obs: &Point2) -> Option<Point2> {
        // The observation already is the landmark position in the observer
        // frame, which is the base frame for a first observation.
        Some(*obs)
    }

    fn lm_retract(lm: &Point2, delta: &[f64]) -> Point2 {
        Point2::new(lm.x + delta[0], lm.y + delta[1])
    }

    fn find_relative_pose(
        new_kf_obs: &[Point2],
        old_kf_obs: &[Point2],
        _params: &(),
    ) -> Option<Pose2> {
        rigid_transform_2d(new_kf_obs, old_kf_obs)
    }
}

/// XYZ coordinates of landmarks relative to the sensor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cartesian3D;

impl SensorModel for Cartesian3D {
    type Pose = Pose3;
    type ObsData = Vector3<f64>;
    type Landmark = Vector3<f64>;
    type Params = ();

    const OBS_DIMS: usize = 3;
    const LM_DIMS: usize = 3;

    fn predict(_params: &(), base_wrt_observer: &Pose3, lm: &Vector3<f64>) -> Option<Vector3<f64>> {
        Some(base_wrt_observer.transform_point(lm))
    }

    fn residual(predicted: &Vector3<f64>, measured: &Vector3<f64>, out: &mut [f64]) {
        out[0] = predicted.x - measured.x;
        out[1] = predicted.y - measured.y;
        out[2] = predicted.z - measured.z;
    }

    fn inverse_model(_params: &(), obs: &Vector3<f64>) -> Option<Vector3<f64>> {
        Some(*obs)
    }

    fn lm_retract(lm: &Vector3<f64>, delta: &[f64]) -> Vector3<f64> {
        Vector3::new(lm.x + delta[0], lm.y + delta[1], lm.z + delta[2])
    }

    fn find_relative_pose(
        new_kf_obs: &[Vector3<f64>],
        old_kf_obs: &[Vector3<f64>],
        _params: &(),
    ) -> Option<Pose3> {
        rigid_transform_3d(new_kf_obs, old_kf_obs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pose::{pose_discrepancy, Pose};
    use approx::assert_relative_eq;

    #[test]
    fn test_cartesian2d_predict_roundtrips_inverse_model() {
        let obs = Point2::new(1.2, -0.7);
        let lm = Cartesian2D::inverse_model(&(), &obs).unwrap();
        let pred = Cartesian2D::predict(&(), &Pose2::identity(), &lm).unwrap();
        assert_relative_eq!(pred.x, obs.x);
        assert_relative_eq!(pred.y, obs.y);
    }

    #[test]
    fn test_cartesian2d_matcher_recovers_pose() {
        // Landmarks in the old KF frame, re-expressed in a displaced new KF.
        let truth = Pose2::new(0.5, 0.2, 0.3); // new KF wrt old KF
        let new_wrt_old_inv = truth.inverse();
        let old_obs = [
            Point2::new(2.0, 1.0),
            Point2::new(-1.0, 0.5),
            Point2::new(0.3, -2.0),
        ];
        let new_obs: Vec<Point2> = old_obs
            .iter()
            .map(|p| new_wrt_old_inv.transform_point(p))
            .collect();

        let est = Cartesian2D::find_relative_pose(&new_obs, &old_obs, &()).unwrap();
        let (dt, dr) = pose_discrepancy(&est, &truth);
        assert!(dt < 1e-9 && dr < 1e-9);
    }

    #[test]
    fn test_cartesian3d_residual() {
        let mut out = [0.0; 3];
        Cartesian3D::residual(
            &Vector3::new(1.0, 2.0, 3.0),
            &Vector3::new(0.5, 2.5, 3.0),
            &mut out,
        );
        assert_relative_eq!(out[0], 0.5);
        assert_relative_eq!(out[1], -0.5);
        assert_relative_eq!(out[2], 0.0);
    }

    #[test]
    fn test_cartesian3d_matcher_needs_three_points() {
        let pts = [Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0)];
        assert!(Cartesian3D::find_relative_pose(&pts, &pts, &()).is_none());
    }
}
