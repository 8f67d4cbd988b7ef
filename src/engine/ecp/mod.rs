//! Edge creation policies: the pluggable strategy deciding which new
//! keyframe-to-keyframe edges to add for an incoming keyframe.
//!
//! Two policies are provided. [`linear`] always chains the new keyframe to
//! the previous one and adds loop-closure edges when topologically distant
//! landmarks are re-observed. [`fixed_submaps`] partitions keyframes into
//! fixed-size submaps identified by their center keyframe, links each new
//! keyframe to its center, and inserts inter-submap loop closures by vote.
//!
//! Both guarantee that a non-initial keyframe ends up connected to the rest
//! of the graph; failing to create any edge is a fatal error.

pub mod fixed_submaps;
pub mod linear;

use serde::{Deserialize, Serialize};

use crate::core::ids::{EdgeId, KeyframeId};
use crate::engine::graph::{RbaState, SpanningTrees};
use crate::engine::{NewObservation, RbaError};
use crate::sensors::SensorModel;

/// Which edge creation policy the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgePolicy {
    /// Chain each keyframe to its predecessor; loop closures on distant
    /// re-observations.
    Linear,
    /// Fixed-size submaps around center keyframes; inter-submap loop
    /// closures by vote.
    FixedSubmaps,
}

/// Parameters of the edge creation policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcpParams {
    /// Fixed submap size in number of keyframes.
    pub submap_size: usize,

    /// Minimum number of covisible observations to add a loop closure edge.
    /// Reduce to 1 for relative graph-SLAM.
    pub min_obs_to_loop_closure: usize,
}

impl Default for EcpParams {
    fn default() -> Self {
        Self {
            submap_size: 15,
            min_obs_to_loop_closure: 4,
        }
    }
}

/// Record describing one edge created by a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewEdgeInfo {
    /// Arena index of the created edge.
    pub edge_id: EdgeId,

    /// Whether the edge already carries a usable initial relative pose.
    /// When false, the initial-guess bootstrap tries to provide one.
    pub has_approx_init_val: bool,

    /// For loop-closure edges: the keyframe whose observations triggered
    /// the closure.
    pub loopclosure_observer_kf: Option<KeyframeId>,

    /// For loop-closure edges: the most connected base keyframe inside the
    /// re-observed area.
    pub loopclosure_base_kf: Option<KeyframeId>,
}

impl NewEdgeInfo {
    pub(crate) fn plain(edge_id: EdgeId, has_approx_init_val: bool) -> Self {
        Self {
            edge_id,
            has_approx_init_val,
            loopclosure_observer_kf: None,
            loopclosure_base_kf: None,
        }
    }
}

/// Run the selected policy for a freshly inserted keyframe.
pub(crate) fn eval<S: SensorModel>(
    policy: EdgePolicy,
    new_kf: KeyframeId,
    obs: &[NewObservation<S>],
    state: &mut RbaState<S>,
    trees: &mut SpanningTrees<S::Pose>,
    max_tree_depth: usize,
    params: &EcpParams,
) -> Result<Vec<NewEdgeInfo>, RbaError> {
    match policy {
        EdgePolicy::Linear => linear::eval(new_kf, obs, state, trees, max_tree_depth, params),
        EdgePolicy::FixedSubmaps => {
            fixed_submaps::eval(new_kf, obs, state, trees, max_tree_depth, params)
        }
    }
}

/// Create one kf2kf edge and bring the spanning trees up to date with the
/// changed topology, so the policy's subsequent distance queries see it.
pub(crate) fn create_edge<S: SensorModel>(
    state: &mut RbaState<S>,
    trees: &mut SpanningTrees<S::Pose>,
    max_tree_depth: usize,
    from: KeyframeId,
    to: KeyframeId,
    init_inv_pose: Option<S::Pose>,
) -> Result<EdgeId, RbaError> {
    let id = state.create_kf2kf_edge(from, to, init_inv_pose)?;
    trees.rebuild_around(state, &[from, to], max_tree_depth)?;
    Ok(id)
}

/// Tally the base keyframes referenced by a new keyframe's observations of
/// already-known landmarks, sorted by descending observation count (ties on
/// the lower keyframe ID).
///
/// Landmarks first observed by the new keyframe itself do not vote.
pub(crate) fn tally_base_keyframes<S: SensorModel>(
    state: &RbaState<S>,
    new_kf: KeyframeId,
    obs: &[NewObservation<S>],
) -> Vec<(KeyframeId, usize)> {
    let mut votes: std::collections::BTreeMap<KeyframeId, usize> = std::collections::BTreeMap::new();
    for o in obs {
        let Some(lm) = state.landmark(o.feat_id) else {
            continue;
        };
        if lm.base_kf == new_kf {
            continue; // first observed right now
        }
        *votes.entry(lm.base_kf).or_insert(0) += 1;
    }
    let mut sorted: Vec<(KeyframeId, usize)> = votes.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    sorted
}
