//! Initial-guess bootstrap for new keyframe-to-keyframe edges.
//!
//! Runs after the edge creation policy for every edge still lacking a
//! usable initial relative pose, trying three methods in order:
//!
//! 1. Reuse a recently estimated relative pose from the numeric spanning
//!    tree (valid when the new keyframe is near the previous one).
//! 2. Match the shared landmarks of the two endpoint keyframes with the
//!    sensor's closed-form landmark matcher.
//! 3. For loop-closure edges only: match the observer and base keyframes
//!    recorded by the policy, then transfer the result onto the edge by
//!    composing up to two spanning-tree poses.
//!
//! An edge left without a guess keeps the identity; the optimizer may still
//! converge from it, with degraded performance.

use std::collections::BTreeMap;

use crate::core::ids::{KeyframeId, LandmarkId};
use crate::core::pose::Pose;
use crate::engine::ecp::NewEdgeInfo;
use crate::engine::graph::{RbaState, SpanningTrees};
use crate::engine::{NewObservation, RbaError};
use crate::sensors::SensorModel;

/// Try to fill in an initial `inv_pose` for every new edge with
/// `has_approx_init_val == false`. The numeric spanning tree is refreshed
/// after each assignment so later edges see consistent composed poses.
pub(crate) fn assign_initial_guesses<S: SensorModel>(
    state: &mut RbaState<S>,
    trees: &mut SpanningTrees<S::Pose>,
    new_kf: KeyframeId,
    new_obs: &[NewObservation<S>],
    neis: &mut [NewEdgeInfo],
    sensor_params: &S::Params,
    sensor_pose: &S::Pose,
) -> Result<(), RbaError> {
    for nei in neis.iter_mut() {
        if nei.has_approx_init_val {
            continue;
        }

        let edge = state.edge(nei.edge_id);
        let (from, to) = (edge.from, edge.to);
        let touches_new_kf = from == new_kf || to == new_kf;
        let edge_dir_to_newkf = to == new_kf;

        // Method 1: the relative pose of the previous keyframe toward one
        // endpoint was just estimated; chain it with the assumption that
        // the new keyframe starts near the previous one.
        if touches_new_kf && state.last_timestep_touched_kfs.contains(&from) {
            if let Some(rel) = trees.relative_pose(new_kf - 1, from) {
                let guess = if edge_dir_to_newkf { rel.inverse() } else { rel };
                state.edge_mut(nei.edge_id).inv_pose = guess;
                nei.has_approx_init_val = true;
                trees.refresh_numeric_around(state, &[from, to])?;
                continue;
            }
        }

        // Method 2: direct geometric match between the two endpoints. A
        // matched pose is tagged with the observer/base pair when it came
        // from the loop-closure retry, so the transfer below can only ever
        // see a pair that actually produced the match.
        let (latest, other) = if touches_new_kf {
            (new_kf, if edge_dir_to_newkf { from } else { to })
        } else {
            (from, to)
        };
        let mut matched = run_matcher(state, new_kf, new_obs, latest, other, sensor_params)
            .map(|pose| (pose, None));

        // Method 3: for loop closures, retry between the observer and base
        // keyframes recorded by the edge creation policy.
        if matched.is_none() {
            if let (Some(observer), Some(base)) =
                (nei.loopclosure_observer_kf, nei.loopclosure_base_kf)
            {
                matched = run_matcher(state, new_kf, new_obs, observer, base, sensor_params)
                    .map(|pose| (pose, Some((observer, base))));
            }
        }

        let Some((found, loopclosure_pair)) = matched else {
            log::warn!(
                "[bootstrap] could not provide an initial value for the relative pose {from}<=>{to}"
            );
            continue;
        };

        // Account for the sensor pose on the robot: the matcher works in
        // sensor coordinates, the edge in keyframe coordinates.
        let found = sensor_pose.compose(&found).compose(&sensor_pose.inverse());

        let guess = match loopclosure_pair {
            // `found` is the pose of `latest` in the frame of `other`.
            None => {
                if touches_new_kf && edge_dir_to_newkf {
                    found.inverse()
                } else {
                    found
                }
            }
            Some((observer, base)) => {
                transfer_loopclosure_pose(trees, &found, observer, base, from, to)
            }
        };

        state.edge_mut(nei.edge_id).inv_pose = guess;
        nei.has_approx_init_val = true;
        trees.refresh_numeric_around(state, &[from, to])?;
    }
    Ok(())
}

/// Build the two parallel observation arrays for a keyframe pair by
/// intersecting their landmark sets on feature ID, then run the sensor's
/// landmark matcher. Returns the pose of `latest` in the frame of `other`.
fn run_matcher<S: SensorModel>(
    state: &RbaState<S>,
    new_kf: KeyframeId,
    new_obs: &[NewObservation<S>],
    latest: KeyframeId,
    other: KeyframeId,
    sensor_params: &S::Params,
) -> Option<S::Pose> {
    // Observations of the "latest" side: the incoming list when it is the
    // keyframe being defined, its stored observations otherwise.
    let mut latest_feats: BTreeMap<LandmarkId, S::ObsData> = BTreeMap::new();
    if latest == new_kf {
        for o in new_obs {
            latest_feats.insert(o.feat_id, o.obs);
        }
    } else {
        let kf = state.keyframe(latest).ok()?;
        for &idx in &kf.adjacent_obs {
            let obs = &state.observations()[idx];
            latest_feats.insert(obs.feat_id, obs.obs);
        }
    }

    let other_kf = state.keyframe(other).ok()?;
    let mut latest_arr = Vec::new();
    let mut other_arr = Vec::new();
    for &idx in &other_kf.adjacent_obs {
        let obs = &state.observations()[idx];
        if let Some(latest_obs) = latest_feats.get(&obs.feat_id) {
            latest_arr.push(*latest_obs);
            other_arr.push(obs.obs);
        }
    }

    S::find_relative_pose(&latest_arr, &other_arr, sensor_params)
}

/// Transfer a matched observer-wrt-base pose onto the edge `(from, to)`.
///
/// Up to four keyframes are involved; the side of the edge nearer the
/// observer is "local", the side nearer the base "remote", decided by which
/// spanning-tree lookups resolve:
///
/// ```text
///     observer  <============   base
///        ^     observer_wrt_base  ^
///        |                        |
///        | observer_wrt_local     | base_wrt_remote
///        |                        |
///        +--- local kf <===?===> remote kf ---+
///                   (edge from/to)
/// ```
fn transfer_loopclosure_pose<P: Pose>(
    trees: &SpanningTrees<P>,
    observer_wrt_base: &P,
    observer: KeyframeId,
    base: KeyframeId,
    from: KeyframeId,
    to: KeyframeId,
) -> P {
    let lookup = |kf: KeyframeId, reference: KeyframeId| -> Option<P> {
        if kf == reference {
            Some(P::identity())
        } else {
            trees.relative_pose(kf, reference)
        }
    };

    let observer_wrt_to = lookup(observer, to);
    let base_wrt_to = lookup(base, to);
    let observer_wrt_from = lookup(observer, from);
    let base_wrt_from = lookup(base, from);

    let observer_near_to = (observer_wrt_to.is_some() || base_wrt_from.is_some())
        || !(observer_wrt_from.is_some() || base_wrt_to.is_some());

    // A keyframe sitting right on the submap center resolves to no tree
    // entry on its own side; the identity stands in for it.
    let (local_is_to, observer_wrt_local, base_wrt_remote) = if observer_near_to {
        (
            true,
            observer_wrt_to.unwrap_or_else(P::identity),
            base_wrt_from.unwrap_or_else(P::identity),
        )
    } else {
        (
            false,
            observer_wrt_from.unwrap_or_else(P::identity),
            base_wrt_to.unwrap_or_else(P::identity),
        )
    };

    let local_wrt_remote = base_wrt_remote
        .compose(observer_wrt_base)
        .compose(&observer_wrt_local.inverse());

    // The edge stores the pose of `from` in the frame of `to`.
    if local_is_to {
        local_wrt_remote.inverse()
    } else {
        local_wrt_remote
    }
}
