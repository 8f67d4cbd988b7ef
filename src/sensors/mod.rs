//! Observation models and per-sensor landmark matchers.
//!
//! Each sensor type implements [`SensorModel`]: the pose parameterization it
//! constrains (SE(2) or SE(3)), its raw observation payload, the landmark
//! parameterization in the base-keyframe frame, the forward and inverse
//! measurement models, and `find_relative_pose` — the closed-form matcher
//! the engine uses to bootstrap initial values for new graph edges from two
//! keyframes' shared landmark observations.

pub mod camera;
pub mod cartesian;
pub mod range_bearing;
pub mod registration;
pub mod relative_pose;

use std::fmt::Debug;

use crate::core::pose::Pose;

pub use camera::{CameraIntrinsics, MonocularCamera, PixelObs, StereoCamera, StereoObs, StereoParams};
pub use cartesian::{Cartesian2D, Cartesian3D};
pub use range_bearing::{RangeBearing2D, RangeBearing3D, RangeBearingObs2, RangeBearingObs3};
pub use relative_pose::{RelativePose2D, RelativePose3D};

/// An observation model tying together a pose parameterization, a raw
/// observation payload and a landmark parameterization.
///
/// Implementations are zero-sized tags; all methods are associated
/// functions so the engine stays monomorphized over the sensor type.
pub trait SensorModel: Sized + 'static {
    /// Pose parameterization constrained by this sensor (SE(2) or SE(3)).
    type Pose: Pose;

    /// Raw per-observation payload.
    type ObsData: Copy + Clone + Debug + PartialEq;

    /// Landmark coordinates, expressed in the base keyframe's frame.
    type Landmark: Copy + Clone + Debug + Default;

    /// Sensor-specific parameters (calibration, baseline, ...).
    type Params: Clone + Debug + Default;

    /// Dimension of one observation residual.
    const OBS_DIMS: usize;

    /// Dimension of one landmark parameter block.
    const LM_DIMS: usize;

    /// Predicted observation of `lm` from an observer keyframe, given the
    /// pose of the landmark's base keyframe expressed in the observer frame.
    ///
    /// Returns `None` when the landmark is unobservable from that pose
    /// (e.g. behind a camera).
    fn predict(
        params: &Self::Params,
        base_wrt_observer: &Self::Pose,
        lm: &Self::Landmark,
    ) -> Option<Self::ObsData>;

    /// Residual `predicted − measured`, written into `out` (length
    /// `OBS_DIMS`). Angular components are wrapped to [-π, π].
    fn residual(predicted: &Self::ObsData, measured: &Self::ObsData, out: &mut [f64]);

    /// Inverse sensor model: initial landmark coordinates from a single
    /// observation, or `None` when not recoverable (monocular).
    fn inverse_model(params: &Self::Params, obs: &Self::ObsData) -> Option<Self::Landmark>;

    /// Apply a tangent increment (length `LM_DIMS`) to landmark coordinates.
    fn lm_retract(lm: &Self::Landmark, delta: &[f64]) -> Self::Landmark;

    /// Landmark matcher: estimate the pose of the new keyframe expressed in
    /// the old keyframe's frame from two parallel observation sequences of
    /// the same landmarks. Returns `None` on failure (too few pairs,
    /// degenerate geometry, or an unsupported sensor).
    fn find_relative_pose(
        new_kf_obs: &[Self::ObsData],
        old_kf_obs: &[Self::ObsData],
        params: &Self::Params,
    ) -> Option<Self::Pose>;
}
