//! Relative-pose observations, used to run the engine as a relative
//! graph-SLAM backend without physical landmarks.
//!
//! Each "landmark" is a full pose anchored in its base keyframe; by the
//! engine's convention every keyframe's first observation is a fixed
//! identity self-landmark whose feature ID equals the keyframe ID, and
//! observations of other keyframes' self-landmarks carry the measured
//! relative pose between the keyframes.

use crate::core::math::angle_diff;
use crate::core::pose::{Pose, Pose2, Pose3};
use crate::sensors::SensorModel;

const IDENTITY_EPS: f64 = 1e-9;

fn is_identity<P: Pose>(p: &P) -> bool {
    p.translation_norm() < IDENTITY_EPS && p.rotation_magnitude() < IDENTITY_EPS
}

/// The identity-pair rule shared by both relative-pose matchers: among the
/// paired observations of the same landmark, find one where either side is
/// the identity (a self-landmark seen from its own keyframe) and read the
/// relative pose of the new keyframe off the other side.
fn match_identity_pair<P: Pose>(new_kf_obs: &[P], old_kf_obs: &[P]) -> Option<P> {
    for (n, o) in new_kf_obs.iter().zip(old_kf_obs) {
        if is_identity(o) {
            // The landmark is the old KF itself: the new observation is the
            // old KF expressed in the new frame.
            return Some(n.inverse());
        }
        if is_identity(n) {
            // The landmark is the new KF itself.
            return Some(*o);
        }
    }
    None
}

/// Relative SE(2) pose observations (x, y, yaw).
#[derive(Debug, Clone, Copy, Default)]
pub struct RelativePose2D;

impl SensorModel for RelativePose2D {
    type Pose = Pose2;
    type ObsData = Pose2;
    type Landmark = Pose2;
    type Params = ();

    const OBS_DIMS: usize = 3;
    const LM_DIMS: usize = 3;

    fn predict(_params: &(), base_wrt_observer: &Pose2, lm: &Pose2) -> Option<Pose2> {
        Some(base_wrt_observer.compose(lm))
    }

    fn residual(predicted: &Pose2, measured: &Pose2, out: &mut [f64]) {
        out[0] = predicted.x - measured.x;
        out[1] = predicted.y - measured.y;
        out[2] = angle_diff(measured.theta, predicted.theta);
    }

    fn inverse_model(_params: &(), obs: &Pose2) -> Option<Pose2> {
        Some(*obs)
    }

    fn lm_retract(lm: &Pose2, delta: &[f64]) -> Pose2 {
        lm.retract(delta)
    }

    fn find_relative_pose(new_kf_obs: &[Pose2], old_kf_obs: &[Pose2], _params: &()) -> Option<Pose2> {
        match_identity_pair(new_kf_obs, old_kf_obs)
    }
}

/// Relative SE(3) pose observations.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelativePose3D;

impl SensorModel for RelativePose3D {
    type Pose = Pose3;
    type ObsData = Pose3;
    type Landmark = Pose3;
    type Params = ();

    const OBS_DIMS: usize = 6;
    const LM_DIMS: usize = 6;

    fn predict(_params: &(), base_wrt_observer: &Pose3, lm: &Pose3) -> Option<Pose3> {
        Some(base_wrt_observer.compose(lm))
    }

    fn residual(predicted: &Pose3, measured: &Pose3, out: &mut [f64]) {
        out[0] = predicted.translation.x - measured.translation.x;
        out[1] = predicted.translation.y - measured.translation.y;
        out[2] = predicted.translation.z - measured.translation.z;
        let rot_err = (measured.rotation.inverse() * predicted.rotation).scaled_axis();
        out[3] = rot_err.x;
        out[4] = rot_err.y;
        out[5] = rot_err.z;
    }

    fn inverse_model(_params: &(), obs: &Pose3) -> Option<Pose3> {
        Some(*obs)
    }

    fn lm_retract(lm: &Pose3, delta: &[f64]) -> Pose3 {
        lm.retract(delta)
    }

    fn find_relative_pose(new_kf_obs: &[Pose3], old_kf_obs: &[Pose3], _params: &()) -> Option<Pose3> {
        match_identity_pair(new_kf_obs, old_kf_obs)
    }
}
