//! Mutable graph state of the relative bundle adjustment problem.
//!
//! The state owns all entities: keyframes, keyframe-to-keyframe edges,
//! observations (kf2feature edges) and the landmark registry. Everything
//! lives in append-only arenas keyed by dense IDs; adjacency lists hold
//! IDs, never owning references. Nothing is destroyed before teardown,
//! which keeps rollback after a failed insertion a simple truncation.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::ids::{EdgeId, KeyframeId, LandmarkId, ObsIndex};
use crate::core::pose::Pose;
use crate::engine::RbaError;
use crate::sensors::SensorModel;

/// A keyframe node: a robot pose at which observations were recorded.
#[derive(Debug, Clone)]
pub struct Keyframe {
    /// Dense ID, assigned monotonically starting at 0.
    pub id: KeyframeId,
    /// IDs of adjacent keyframe-to-keyframe edges.
    pub adjacent_k2k: Vec<EdgeId>,
    /// Indices of observations made from this keyframe.
    pub adjacent_obs: Vec<ObsIndex>,
}

/// A keyframe-to-keyframe edge carrying a relative pose estimate.
///
/// `inv_pose` is the pose of `from` expressed in the frame of `to`.
#[derive(Debug, Clone)]
pub struct K2kEdge<P> {
    /// Index in the edge arena.
    pub id: EdgeId,
    /// Source keyframe.
    pub from: KeyframeId,
    /// Target keyframe.
    pub to: KeyframeId,
    /// Pose of `from` in the frame of `to`. Mutated by the optimizer.
    pub inv_pose: P,
}

impl<P> K2kEdge<P> {
    /// The endpoint opposite to `kf`.
    #[inline]
    pub fn other_endpoint(&self, kf: KeyframeId) -> KeyframeId {
        if self.from == kf {
            self.to
        } else {
            self.from
        }
    }
}

/// One observation of a landmark from a keyframe.
#[derive(Debug, Clone)]
pub struct Observation<O> {
    /// Observing keyframe.
    pub kf: KeyframeId,
    /// Observed landmark.
    pub feat_id: LandmarkId,
    /// Raw sensor payload.
    pub obs: O,
    /// Whether the observed landmark has exactly known relative position.
    pub is_fixed: bool,
}

/// A landmark and its relative position, expressed in the frame of the
/// keyframe that first observed it.
#[derive(Debug, Clone)]
pub struct LandmarkEntry<L> {
    /// Feature ID.
    pub id: LandmarkId,
    /// The keyframe in whose frame `pos` is expressed.
    pub base_kf: KeyframeId,
    /// Known (fixed) position vs. free unknown to be estimated.
    pub fixed: bool,
    /// Current coordinates in the base keyframe frame.
    pub pos: L,
    /// Indices of all observations of this landmark.
    pub obs_indices: Vec<ObsIndex>,
}

/// Node degree statistics over the keyframe graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DegreeStats {
    /// Mean number of k2k edges per keyframe.
    pub mean: f64,
    /// Standard deviation of the degree.
    pub std_dev: f64,
    /// Maximum degree.
    pub max: usize,
}

/// Snapshot of arena sizes, used to roll back a failed keyframe insertion.
#[derive(Debug, Clone, Copy)]
pub struct StateSnapshot {
    num_keyframes: usize,
    num_edges: usize,
    num_observations: usize,
}

/// The mutable problem state.
#[derive(Debug)]
pub struct RbaState<S: SensorModel> {
    keyframes: Vec<Keyframe>,
    k2k_edges: Vec<K2kEdge<S::Pose>>,
    observations: Vec<Observation<S::ObsData>>,
    landmarks: BTreeMap<LandmarkId, LandmarkEntry<S::Landmark>>,
    /// Endpoints of the edges created by the most recent keyframe insertion.
    pub last_timestep_touched_kfs: BTreeSet<KeyframeId>,
}

impl<S: SensorModel> Default for RbaState<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SensorModel> RbaState<S> {
    /// Create an empty problem state.
    pub fn new() -> Self {
        Self {
            keyframes: Vec::new(),
            k2k_edges: Vec::new(),
            observations: Vec::new(),
            landmarks: BTreeMap::new(),
            last_timestep_touched_kfs: BTreeSet::new(),
        }
    }

    /// Reset the entire problem to an empty state.
    pub fn clear(&mut self) {
        self.keyframes.clear();
        self.k2k_edges.clear();
        self.observations.clear();
        self.landmarks.clear();
        self.last_timestep_touched_kfs.clear();
    }

    /// Append a new keyframe and return its ID.
    pub fn insert_keyframe(&mut self) -> KeyframeId {
        let id = self.keyframes.len() as KeyframeId;
        self.keyframes.push(Keyframe {
            id,
            adjacent_k2k: Vec::new(),
            adjacent_obs: Vec::new(),
        });
        id
    }

    /// Number of keyframes.
    pub fn num_keyframes(&self) -> usize {
        self.keyframes.len()
    }

    /// Number of keyframe-to-keyframe edges.
    pub fn num_k2k_edges(&self) -> usize {
        self.k2k_edges.len()
    }

    /// Number of observations.
    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }

    /// Whether the state holds no keyframes.
    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// Look up a keyframe, failing on unknown IDs.
    pub fn keyframe(&self, id: KeyframeId) -> Result<&Keyframe, RbaError> {
        self.keyframes
            .get(id as usize)
            .ok_or(RbaError::UnknownKeyframe(id))
    }

    /// All keyframes, in ID order.
    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    /// Look up an edge by arena index.
    pub fn edge(&self, id: EdgeId) -> &K2kEdge<S::Pose> {
        &self.k2k_edges[id]
    }

    /// Mutable edge access (used by the optimizer and bootstrap).
    pub fn edge_mut(&mut self, id: EdgeId) -> &mut K2kEdge<S::Pose> {
        &mut self.k2k_edges[id]
    }

    /// All edges, in creation order.
    pub fn edges(&self) -> &[K2kEdge<S::Pose>] {
        &self.k2k_edges
    }

    /// All observations, in insertion order.
    pub fn observations(&self) -> &[Observation<S::ObsData>] {
        &self.observations
    }

    /// Look up a landmark entry.
    pub fn landmark(&self, id: LandmarkId) -> Option<&LandmarkEntry<S::Landmark>> {
        self.landmarks.get(&id)
    }

    /// All landmarks, in feature-ID order.
    pub fn landmarks(&self) -> impl Iterator<Item = &LandmarkEntry<S::Landmark>> {
        self.landmarks.values()
    }

    /// Landmarks with exactly known relative position.
    pub fn known_landmarks(&self) -> impl Iterator<Item = &LandmarkEntry<S::Landmark>> {
        self.landmarks.values().filter(|lm| lm.fixed)
    }

    /// Landmarks whose relative position is being estimated.
    pub fn unknown_landmarks(&self) -> impl Iterator<Item = &LandmarkEntry<S::Landmark>> {
        self.landmarks.values().filter(|lm| !lm.fixed)
    }

    /// Overwrite the position estimate of a landmark.
    pub fn set_landmark_pos(&mut self, id: LandmarkId, pos: S::Landmark) {
        if let Some(lm) = self.landmarks.get_mut(&id) {
            lm.pos = pos;
        }
    }

    /// Register a landmark on its first observation.
    ///
    /// `base_kf` becomes the frame in which `pos` is expressed for the rest
    /// of the landmark's life.
    pub fn register_landmark(
        &mut self,
        id: LandmarkId,
        base_kf: KeyframeId,
        fixed: bool,
        pos: S::Landmark,
    ) -> Result<(), RbaError> {
        self.keyframe(base_kf)?;
        self.landmarks.insert(
            id,
            LandmarkEntry {
                id,
                base_kf,
                fixed,
                pos,
                obs_indices: Vec::new(),
            },
        );
        Ok(())
    }

    /// Append an observation of an already-registered landmark.
    pub fn insert_observation(
        &mut self,
        kf: KeyframeId,
        feat_id: LandmarkId,
        obs: S::ObsData,
        is_fixed: bool,
    ) -> Result<ObsIndex, RbaError> {
        self.keyframe(kf)?;
        let idx = self.observations.len();
        self.observations.push(Observation {
            kf,
            feat_id,
            obs,
            is_fixed,
        });
        self.keyframes[kf as usize].adjacent_obs.push(idx);
        if let Some(lm) = self.landmarks.get_mut(&feat_id) {
            lm.obs_indices.push(idx);
        }
        Ok(idx)
    }

    /// Append a keyframe-to-keyframe edge with the supplied initial inverse
    /// pose (identity if none) and update both endpoints' adjacency lists.
    ///
    /// Self-edges and duplicate `(from, to)` pairs (in either direction) are
    /// usage errors.
    pub fn create_kf2kf_edge(
        &mut self,
        from: KeyframeId,
        to: KeyframeId,
        init_inv_pose: Option<S::Pose>,
    ) -> Result<EdgeId, RbaError> {
        self.keyframe(from)?;
        self.keyframe(to)?;
        if from == to {
            return Err(RbaError::SelfEdge(from));
        }
        if self.find_edge_between(from, to).is_some() {
            return Err(RbaError::DuplicateEdge { from, to });
        }

        let id = self.k2k_edges.len();
        self.k2k_edges.push(K2kEdge {
            id,
            from,
            to,
            inv_pose: init_inv_pose.unwrap_or_else(S::Pose::identity),
        });
        self.keyframes[from as usize].adjacent_k2k.push(id);
        self.keyframes[to as usize].adjacent_k2k.push(id);
        Ok(id)
    }

    /// The edge connecting two keyframes, if one exists (either direction).
    pub fn find_edge_between(&self, a: KeyframeId, b: KeyframeId) -> Option<EdgeId> {
        let ka = self.keyframes.get(a as usize)?;
        ka.adjacent_k2k
            .iter()
            .copied()
            .find(|&e| self.k2k_edges[e].other_endpoint(a) == b)
    }

    /// Whether two keyframes share a kf2kf edge, regardless of direction.
    ///
    /// Runs in O(D) with D the degree of `id1`.
    pub fn are_keyframes_connected(
        &self,
        id1: KeyframeId,
        id2: KeyframeId,
    ) -> Result<bool, RbaError> {
        self.keyframe(id1)?;
        self.keyframe(id2)?;
        Ok(self.find_edge_between(id1, id2).is_some())
    }

    /// Degree statistics over all keyframes. Runs in O(N).
    pub fn node_degree_stats(&self) -> DegreeStats {
        let n = self.keyframes.len();
        if n == 0 {
            return DegreeStats {
                mean: 0.0,
                std_dev: 0.0,
                max: 0,
            };
        }
        let degs: Vec<usize> = self
            .keyframes
            .iter()
            .map(|kf| kf.adjacent_k2k.len())
            .collect();
        let mean = degs.iter().sum::<usize>() as f64 / n as f64;
        let var = degs
            .iter()
            .map(|&d| {
                let e = d as f64 - mean;
                e * e
            })
            .sum::<f64>()
            / n as f64;
        DegreeStats {
            mean,
            std_dev: var.sqrt(),
            max: degs.iter().copied().max().unwrap_or(0),
        }
    }

    /// Capture arena sizes before a keyframe insertion.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            num_keyframes: self.keyframes.len(),
            num_edges: self.k2k_edges.len(),
            num_observations: self.observations.len(),
        }
    }

    /// Roll the state back to a snapshot, undoing everything a failed
    /// `define_new_keyframe` call appended. `new_landmarks` lists the
    /// landmark IDs registered since the snapshot.
    pub fn rollback(&mut self, snap: StateSnapshot, new_landmarks: &[LandmarkId]) {
        self.keyframes.truncate(snap.num_keyframes);
        self.k2k_edges.truncate(snap.num_edges);
        self.observations.truncate(snap.num_observations);
        for id in new_landmarks {
            self.landmarks.remove(id);
        }
        for kf in &mut self.keyframes {
            kf.adjacent_k2k.retain(|&e| e < snap.num_edges);
            kf.adjacent_obs.retain(|&o| o < snap.num_observations);
        }
        for lm in self.landmarks.values_mut() {
            lm.obs_indices.retain(|&o| o < snap.num_observations);
        }
    }
}
