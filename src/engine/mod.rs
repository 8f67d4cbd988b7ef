//! SLAM backend engine: graph state, spanning trees, edge creation,
//! initial-guess bootstrapping and bounded local optimization.

pub(crate) mod bootstrap;
pub mod ecp;
pub mod graph;
pub mod local_area;
pub mod optimizer;
pub mod rba;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::ids::{KeyframeId, LandmarkId};
use crate::sensors::SensorModel;

/// Engine errors. All variants are usage errors: the engine aborts the call
/// and leaves the graph unchanged. Geometric and numerical failures are
/// reported through result structures instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RbaError {
    #[error("keyframe #{0} does not exist")]
    UnknownKeyframe(KeyframeId),

    #[error("landmark {0} does not exist")]
    UnknownLandmark(LandmarkId),

    #[error(
        "new keyframe #{kf} would be isolated: no linking keyframe found with a minimum of {min_obs} common observations"
    )]
    IsolatedKeyframe { kf: KeyframeId, min_obs: usize },

    #[error("kf2kf edge endpoints must differ (keyframe #{0})")]
    SelfEdge(KeyframeId),

    #[error("duplicate kf2kf edge between keyframes #{from} and #{to}")]
    DuplicateEdge { from: KeyframeId, to: KeyframeId },

    #[error("observation noise has {got} entries, expected {expected}")]
    BadNoiseDimension { got: usize, expected: usize },

    #[error("spanning tree inconsistency: no path from keyframe #{src} to #{dst}")]
    SpanningTreeInvariant { src: KeyframeId, dst: KeyframeId },
}

/// Covariance recovery policy applied after local optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CovRecovery {
    /// Skip covariance recovery.
    None,
    /// Invert each free landmark's diagonal block of the Hessian.
    LandmarksApprox,
    /// Invert the full Hessian and read out the landmark blocks.
    Full,
}

/// Observation-noise weighting applied to every residual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObsNoise {
    /// Unit information: residuals enter the optimizer unscaled.
    Identity,
    /// Per-dimension information values (inverse variances). The length
    /// must match the sensor's observation dimension.
    Diagonal(Vec<f64>),
}

impl Default for ObsNoise {
    fn default() -> Self {
        ObsNoise::Identity
    }
}

/// Engine parameter block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbaParams {
    /// Maximum depth of all spanning trees.
    pub max_tree_depth: usize,

    /// Maximum local optimization distance.
    pub max_optimize_depth: usize,

    /// Optimize new edges alone before optimizing the entire local area?
    pub optimize_new_edges_alone: bool,

    /// Use the pseudo-Huber kernel on observation residuals?
    pub use_robust_kernel: bool,

    /// Robust kernel parameter.
    pub kernel_param: f64,

    /// Maximum Levenberg-Marquardt iterations per optimization.
    pub max_iters: u32,

    /// Stop when the per-observation RMSE falls below this value.
    pub max_error_per_obs_to_stop: f64,

    /// Stop when the gain ratio of an accepted step exceeds this value.
    pub max_rho: f64,

    /// Declare divergence when the damping factor exceeds this value.
    pub max_lambda: f64,

    /// Stop when the relative error reduction of an accepted step falls
    /// below this ratio.
    pub min_error_reduction_ratio_to_relinearize: f64,

    /// Initial Levenberg-Marquardt damping factor.
    pub initial_damping: f64,

    /// Covariance recovery policy.
    pub cov_recovery: CovRecovery,
}

impl Default for RbaParams {
    fn default() -> Self {
        Self {
            max_tree_depth: 4,
            max_optimize_depth: 4,
            optimize_new_edges_alone: true,
            use_robust_kernel: false,
            kernel_param: 3.0,
            max_iters: 20,
            max_error_per_obs_to_stop: 1e-6,
            max_rho: 10.0,
            max_lambda: 1e20,
            min_error_reduction_ratio_to_relinearize: 0.01,
            initial_damping: 1e-3,
            cov_recovery: CovRecovery::LandmarksApprox,
        }
    }
}

/// One observation handed to [`rba::RbaEngine::define_new_keyframe`].
#[derive(Debug, Clone)]
pub struct NewObservation<S: SensorModel> {
    /// Feature ID of the observed landmark. New IDs register a new landmark
    /// whose base keyframe is the observing one.
    pub feat_id: LandmarkId,

    /// Raw observation payload.
    pub obs: S::ObsData,

    /// Whether the landmark position is known exactly (kept out of the
    /// optimization).
    pub is_fixed: bool,

    /// Optional initial landmark coordinates in the base keyframe frame.
    /// For unknown landmarks this seeds the estimate; absent, the sensor's
    /// inverse model is consulted on first observation.
    pub init_value: Option<S::Landmark>,
}

impl<S: SensorModel> NewObservation<S> {
    /// Observation of a landmark with exactly known relative position.
    pub fn fixed(feat_id: LandmarkId, obs: S::ObsData) -> Self {
        Self {
            feat_id,
            obs,
            is_fixed: true,
            init_value: None,
        }
    }

    /// Observation of a landmark whose position is to be estimated.
    pub fn unknown(feat_id: LandmarkId, obs: S::ObsData) -> Self {
        Self {
            feat_id,
            obs,
            is_fixed: false,
            init_value: None,
        }
    }

    /// Observation of an unknown landmark with a caller-supplied initial
    /// position estimate.
    pub fn unknown_with_init(feat_id: LandmarkId, obs: S::ObsData, init: S::Landmark) -> Self {
        Self {
            feat_id,
            obs,
            is_fixed: false,
            init_value: Some(init),
        }
    }
}
