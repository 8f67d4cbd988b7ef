//! Monocular and rectified-stereo camera observation models.
//!
//! Camera frames follow the usual computer-vision convention: +Z forward,
//! +X right, +Y down. The stereo pair is assumed rectified, the right
//! camera displaced by `baseline` along +X and sharing the left intrinsics.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::core::pose::Pose3;
use crate::sensors::registration::rigid_transform_3d;
use crate::sensors::SensorModel;

/// Pinhole camera intrinsics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length along x, in pixels.
    pub fx: f64,
    /// Focal length along y, in pixels.
    pub fy: f64,
    /// Principal point x, in pixels.
    pub cx: f64,
    /// Principal point y, in pixels.
    pub cy: f64,
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        // A generic VGA camera.
        Self {
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
        }
    }
}

/// Parameters of a rectified stereo rig.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StereoParams {
    /// Intrinsics shared by both rectified cameras.
    pub left: CameraIntrinsics,
    /// Horizontal distance between the optical centers, in meters.
    pub baseline: f64,
}

impl Default for StereoParams {
    fn default() -> Self {
        Self {
            left: CameraIntrinsics::default(),
            baseline: 0.12,
        }
    }
}

/// One pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelObs {
    /// Column in pixels.
    pub x: f64,
    /// Row in pixels.
    pub y: f64,
}

/// One stereo feature: the matching pixel in each rectified image.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StereoObs {
    /// Pixel in the left image.
    pub left: PixelObs,
    /// Pixel in the right image.
    pub right: PixelObs,
}

impl StereoObs {
    /// Horizontal disparity between the rectified images.
    #[inline]
    pub fn disparity(&self) -> f64 {
        self.left.x - self.right.x
    }
}

fn project(intrinsics: &CameraIntrinsics, p: &Vector3<f64>) -> Option<PixelObs> {
    if p.z <= 1e-9 {
        return None;
    }
    Some(PixelObs {
        x: intrinsics.fx * p.x / p.z + intrinsics.cx,
        y: intrinsics.fy * p.y / p.z + intrinsics.cy,
    })
}

/// Triangulate one stereo observation into a 3-D point in the camera frame.
/// Requires a positive disparity.
fn triangulate(params: &StereoParams, obs: &StereoObs) -> Option<Vector3<f64>> {
    let d = obs.disparity();
    if d <= 0.0 {
        return None;
    }
    let k = &params.left;
    Some(Vector3::new(
        (obs.left.x - k.cx) * params.baseline / d,
        (obs.left.y - k.cy) * params.baseline / d,
        k.fx * params.baseline / d,
    ))
}

/// One monocular camera feature: the pixel coordinates of a landmark.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonocularCamera;

impl SensorModel for MonocularCamera {
    type Pose = Pose3;
    type ObsData = PixelObs;
    type Landmark = Vector3<f64>;
    type Params = CameraIntrinsics;

    const OBS_DIMS: usize = 2;
    const LM_DIMS: usize = 3;

    fn predict(
        params: &CameraIntrinsics,
        base_wrt_observer: &Pose3,
        lm: &Vector3<f64>,
    ) -> Option<PixelObs> {
        project(params, &base_wrt_observer.transform_point(lm))
    }

    fn residual(predicted: &PixelObs, measured: &PixelObs, out: &mut [f64]) {
        out[0] = predicted.x - measured.x;
        out[1] = predicted.y - measured.y;
    }

    fn inverse_model(_params: &CameraIntrinsics, _obs: &PixelObs) -> Option<Vector3<f64>> {
        // Depth is unobservable from one pixel; the caller must supply an
        // initial value or accept the default.
        None
    }

    fn lm_retract(lm: &Vector3<f64>, delta: &[f64]) -> Vector3<f64> {
        Vector3::new(lm.x + delta[0], lm.y + delta[1], lm.z + delta[2])
    }

    /// An absolute relative pose cannot be recovered from two sets of
    /// monocular features alone (scale is unobservable), so this matcher
    /// always reports failure.
    fn find_relative_pose(
        _new_kf_obs: &[PixelObs],
        _old_kf_obs: &[PixelObs],
        _params: &CameraIntrinsics,
    ) -> Option<Pose3> {
        None
    }
}

/// One stereo camera feature: the coordinates of the two matched pixels.
#[derive(Debug, Clone, Copy, Default)]
pub struct StereoCamera;

impl SensorModel for StereoCamera {
    type Pose = Pose3;
    type ObsData = StereoObs;
    type Landmark = Vector3<f64>;
    type Params = StereoParams;

    const OBS_DIMS: usize = 4;
    const LM_DIMS: usize = 3;

    fn predict(
        params: &StereoParams,
        base_wrt_observer: &Pose3,
        lm: &Vector3<f64>,
    ) -> Option<StereoObs> {
        let p = base_wrt_observer.transform_point(lm);
        let left = project(&params.left, &p)?;
        let right = project(
            &params.left,
            &Vector3::new(p.x - params.baseline, p.y, p.z),
        )?;
        Some(StereoObs { left, right })
    }

    fn residual(predicted: &StereoObs, measured: &StereoObs, out: &mut [f64]) {
        out[0] = predicted.left.x - measured.left.x;
        out[1] = predicted.left.y - measured.left.y;
        out[2] = predicted.right.x - measured.right.x;
        out[3] = predicted.right.y - measured.right.y;
    }

    fn inverse_model(params: &StereoParams, obs: &StereoObs) -> Option<Vector3<f64>> {
        triangulate(params, obs)
    }

    fn lm_retract(lm: &Vector3<f64>, delta: &[f64]) -> Vector3<f64> {
        Vector3::new(lm.x + delta[0], lm.y + delta[1], lm.z + delta[2])
    }

    /// Triangulate features with a valid disparity in both keyframes to 3-D
    /// points, then solve the rigid registration between the point sets.
    fn find_relative_pose(
        new_kf_obs: &[StereoObs],
        old_kf_obs: &[StereoObs],
        params: &StereoParams,
    ) -> Option<Pose3> {
        debug_assert_eq!(new_kf_obs.len(), old_kf_obs.len());
        let mut new_pts = Vec::with_capacity(new_kf_obs.len());
        let mut old_pts = Vec::with_capacity(old_kf_obs.len());
        for (n, o) in new_kf_obs.iter().zip(old_kf_obs) {
            let (Some(pn), Some(po)) = (triangulate(params, n), triangulate(params, o)) else {
                continue;
            };
            new_pts.push(pn);
            old_pts.push(po);
        }
        if new_pts.len() < 2 {
            return None;
        }
        rigid_transform_3d(&new_pts, &old_pts)
    }
}
