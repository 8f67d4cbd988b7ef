//! setu-slam - Incremental relative bundle adjustment SLAM backend
//!
//! An online SLAM backend that keeps the map as a graph of keyframes
//! connected by relative-pose edges, with landmarks expressed in the frame
//! of the keyframe that first observed them. There is no global frame:
//! every quantity is relative, and each incoming keyframe only triggers a
//! bounded amount of work around itself.
//!
//! # Architecture
//!
//! The crate is organized into 3 logical layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Orchestration
//! │   (graph state, spanning trees, edge creation,      │
//! │    bootstrap, local area, optimizer, pipeline)      │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                   sensors/                          │  ← Observation models
//! │      (cartesian, range-bearing, cameras,            │
//! │       relative poses, rigid registration)           │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │               (ids, math, poses)                    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Per-keyframe pipeline
//!
//! [`engine::rba::RbaEngine::define_new_keyframe`] is the single mutating
//! entry point. For each keyframe it:
//!
//! 1. Registers unseen landmarks and appends the observations.
//! 2. Asks the edge creation policy (linear chain or fixed-size submaps)
//!    which kf2kf edges to add, including loop closures toward
//!    topologically distant areas.
//! 3. Bootstraps an initial relative pose for each unseeded edge: a
//!    recently estimated pose, a closed-form landmark match between the
//!    endpoints, or — for loop closures — a match between the observer and
//!    base keyframes transferred through the spanning trees.
//! 4. Runs Levenberg-Marquardt over the edges and landmarks within the
//!    bounded local area around the new keyframe.
//!
//! The engine is single-threaded and synchronous; calls return only after
//! all graph updates, spanning-tree rebuilds and optimization complete.

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Observation models (depends on core)
// ============================================================================
pub mod sensors;

// ============================================================================
// Layer 3: Engine (depends on core, sensors)
// ============================================================================
pub mod engine;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

// Core types
pub use crate::core::{pose_discrepancy, EdgeId, KeyframeId, LandmarkId, Point2, Pose, Pose2, Pose3};

// Sensor models
pub use sensors::{
    CameraIntrinsics, Cartesian2D, Cartesian3D, MonocularCamera, PixelObs, RangeBearing2D,
    RangeBearing3D, RangeBearingObs2, RangeBearingObs3, RelativePose2D, RelativePose3D,
    SensorModel, StereoCamera, StereoObs, StereoParams,
};

// Engine
pub use engine::ecp::{EcpParams, EdgePolicy, NewEdgeInfo};
pub use engine::graph::{
    DegreeStats, K2kEdge, Keyframe, LandmarkEntry, Observation, RbaState, SpanTreeEntry,
    SpanningTrees,
};
pub use engine::local_area::{select_local_area, LocalArea};
pub use engine::optimizer::{OptimizeResult, TerminationReason};
pub use engine::rba::{NewKeyframeInfo, RbaEngine};
pub use engine::{CovRecovery, NewObservation, ObsNoise, RbaError, RbaParams};
