//! Fixed-size submap edge creation policy.
//!
//! Keyframes are partitioned into submaps of a fixed maximum size; the
//! keyframe opening a submap is its center and local origin. Every other
//! keyframe gets a mandatory edge to its center, and loop-closure edges
//! between submap centers are inserted when a distant area gathers enough
//! observation votes.

use std::collections::BTreeMap;

use crate::core::ids::KeyframeId;
use crate::engine::ecp::{create_edge, tally_base_keyframes, EcpParams, NewEdgeInfo};
use crate::engine::graph::{RbaState, SpanningTrees};
use crate::engine::{NewObservation, RbaError};
use crate::sensors::SensorModel;

/// The submap of a keyframe, identified by its center keyframe (the one
/// defining the submap's local origin of coordinates).
pub fn center_kf_for_kf(kf: KeyframeId, params: &EcpParams) -> KeyframeId {
    let s = params.submap_size as KeyframeId;
    s * (kf / s)
}

/// Vote bookkeeping for one remote area.
struct AreaVotes {
    votes: usize,
    /// Whether every voting base keyframe equals the area center; when so,
    /// one hop of the worst-case topological distance is implicit.
    all_bases_are_center: bool,
    per_base: BTreeMap<KeyframeId, usize>,
}

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

    let current_center = center_kf_for_kf(new_kf, params);
    // By definition, a loop closure connects keyframes farther apart than
    // the spanning-tree depth.
    let min_dist_for_loop_closure = max_tree_depth + 1;

    // Step A: tally observations of already-seen landmarks by base
    // keyframe, grouped into areas by the base's submap center.
    let mut areas: BTreeMap<KeyframeId, AreaVotes> = BTreeMap::new();
    for (base_kf, num_obs) in tally_base_keyframes(state, new_kf, obs) {
        let area_center = center_kf_for_kf(base_kf, params);
        let entry = areas.entry(area_center).or_insert(AreaVotes {
            votes: 0,
            all_bases_are_center: true,
            per_base: BTreeMap::new(),
        });
        entry.votes += num_obs;
        *entry.per_base.entry(base_kf).or_insert(0) += num_obs;
        if base_kf != area_center {
            entry.all_bases_are_center = false;
        }
    }

    // Step B: the mandatory edge to the local center. A keyframe that opens
    // a fresh submap has no center to link to and connects to the most
    // voted remote area below instead.
    if current_center != new_kf {
        let id = create_edge(state, trees, max_tree_depth, current_center, new_kf, None)?;
        new_edges.push(NewEdgeInfo::plain(id, false));
    }

    // Step C: loop closures toward remote areas, most voted first.
    let mut sorted_areas: Vec<(&KeyframeId, &AreaVotes)> = areas.iter().collect();
    sorted_areas.sort_by(|a, b| b.1.votes.cmp(&a.1.votes).then(a.0.cmp(b.0)));

    for (&remote_center, area) in sorted_areas {
        if remote_center == current_center {
            continue; // observing a landmark within our own submap is fine
        }

        // Up to two implicit hops (new KF -> center, base -> remote center)
        // complete the worst-case distance between the observer and the base
        // of the observed landmarks.
        let mut dist_extra_edges = 2usize;
        if current_center == new_kf {
            dist_extra_edges -= 1;
        }
        if area.all_bases_are_center {
            dist_extra_edges -= 1;
        }

        let far = match trees.distance(current_center, remote_center) {
            Some(d) => d + dist_extra_edges >= min_dist_for_loop_closure,
            // Isolated from that area: infinite topological distance.
            None => true,
        };
        if !far || area.votes < params.min_obs_to_loop_closure {
            continue;
        }

        let id = create_edge(
            state,
            trees,
            max_tree_depth,
            remote_center,
            current_center,
            None,
        )?;
        let most_voted_base = area
            .per_base
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(&base, _)| base);
        log::info!(
            "[ecp/submaps] loop closure {}->{} for KF#{} with {} votes",
            remote_center,
            current_center,
            new_kf,
            area.votes
        );
        new_edges.push(NewEdgeInfo {
            edge_id: id,
            has_approx_init_val: false,
            loopclosure_observer_kf: Some(new_kf),
            loopclosure_base_kf: most_voted_base,
        });
    }

    if new_edges.is_empty() {
        return Err(RbaError::IsolatedKeyframe {
            kf: new_kf,
            min_obs: params.min_obs_to_loop_closure,
        });
    }
    Ok(new_edges)
}
