//! Identifier types for the keyframe graph.
//!
//! Keyframe and landmark IDs are dense non-negative integers assigned by the
//! engine (keyframes) or by the caller (landmark feature IDs). Edge IDs index
//! the append-only edge arena.

/// Identifier of a keyframe. Assigned monotonically starting at 0.
pub type KeyframeId = u64;

/// Identifier of a landmark (feature). Unique across the map; created on
/// first observation, never destroyed.
pub type LandmarkId = u64;

/// Index of a keyframe-to-keyframe edge in the edge arena.
pub type EdgeId = usize;

/// Index of an observation (kf2feature edge) in the observation arena.
pub type ObsIndex = usize;
