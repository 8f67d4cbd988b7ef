//! Linear edge creation policy.
//!
//! Each keyframe is chained to the preceding one with an identity initial
//! pose (a reasonable start when keyframes are dense in time). When the new
//! keyframe re-observes landmarks whose base keyframe sits beyond the
//! spanning-tree depth, additional loop-closure edges are inserted.

use crate::core::ids::KeyframeId;
use crate::core::pose::Pose;
use crate::engine::ecp::{create_edge, tally_base_keyframes, EcpParams, NewEdgeInfo};
use crate::engine::graph::{RbaState, SpanningTrees};
use crate::engine::{NewObservation, RbaError};
use crate::sensors::SensorModel;

pub(crate) fn eval<S: SensorModel>(
    new_kf: KeyframeId,
    obs: &[NewObservation<S>],
    state: &mut RbaState<S>,
    trees: &mut SpanningTrees<S::Pose>,
    max_tree_depth: usize,
    params: &EcpParams,
) -> Result<Vec<NewEdgeInfo>, RbaError> {
    debug_assert!(new_kf >= 1);
    let mut new_edges = Vec::new();

    // (1/2) Always chain to the previous keyframe. In a linear graph the
    // identity is a usable initial value: the new KF starts at the last
    // KF's pose.
    let id = create_edge(
        state,
        trees,
        max_tree_depth,
        new_kf - 1,
        new_kf,
        Some(S::Pose::identity()),
    )?;
    new_edges.push(NewEdgeInfo::plain(id, true));

    // (2/2) Loop closures: base keyframes of re-observed landmarks, most
    // shared observations first.
    let min_dist_for_loop_closure = max_tree_depth + 1;
    for (base_kf, num_obs) in tally_base_keyframes(state, new_kf, obs) {
        let far = match trees.distance(new_kf, base_kf) {
            Some(d) => d >= min_dist_for_loop_closure,
            // Not in the spanning tree: beyond the depth bound.
            None => true,
        };
        if far && num_obs >= params.min_obs_to_loop_closure {
            let id = create_edge(state, trees, max_tree_depth, base_kf, new_kf, None)?;
            log::info!(
                "[ecp/linear] loop closure {}->{} with {} shared observations",
                base_kf,
                new_kf,
                num_obs
            );
            let mut nei = NewEdgeInfo::plain(id, false);
            nei.loopclosure_observer_kf = Some(new_kf);
            nei.loopclosure_base_kf = Some(base_kf);
            new_edges.push(nei);
        }
    }

    Ok(new_edges)
}
