//! A dataset designed to challenge how submaps are connected: with
//! submaps of five keyframes and a tree depth of three, the observation of
//! KF#1 from KF#11 is a loop closure that must raise a new edge between
//! the submap centers 10 and 0 — and bootstrap its initial relative pose
//! without any directly shared observations between those two keyframes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use setu_slam::{
    pose_discrepancy, EdgePolicy, NewObservation, Pose, Pose2, RbaEngine, RelativePose2D,
};

const STD_NOISE_XY: f64 = 0.001;
const STD_NOISE_YAW: f64 = 0.0009; // ~0.05 degrees

/// (current_kf, observed_kf, x, y, yaw): the relative pose of
/// `observed_kf` as seen from `current_kf`.
const DATASET: &[(u64, u64, f64, f64, f64)] = &[
    (1, 0, -1.0, 0.0, 0.0),
    (2, 1, -1.0, 0.0, 0.0),
    (3, 2, -1.0, 0.0, 0.0),
    (4, 3, -1.0, 0.0, 0.0),
    (5, 4, -1.0, 0.0, 0.0),
    (6, 5, -1.0, 0.0, 0.0),
    (7, 6, -1.0, 0.0, 0.0),
    (8, 7, -1.0, 0.0, 0.0),
    (9, 8, -1.0, 0.0, 0.0),
    (10, 9, -1.0, 0.0, 0.0),
    (11, 10, -1.0, 0.0, 0.0),
    (11, 1, -10.05, 0.0, 0.0),
    (12, 11, -1.0, 0.0, 0.0),
    (13, 12, -1.0, 0.0, 0.0),
    (14, 13, -1.0, 0.0, 0.0),
    (15, 14, -1.0, 0.0, 0.0),
    (16, 15, -1.0, 0.0, 0.0),
];

fn observations_for(
    kf: u64,
    rng: &mut StdRng,
) -> Vec<NewObservation<RelativePose2D>> {
    // Each keyframe carries one fixed self-landmark whose feature ID equals
    // the keyframe ID; the remaining entries are relative-pose observations.
    let mut obs = vec![NewObservation::fixed(kf, Pose2::identity())];
    for &(current, observed, x, y, yaw) in DATASET {
        if current != kf {
            continue;
        }
        obs.push(NewObservation::unknown(
            observed,
            Pose2::new(
                x + rng.gen_range(-STD_NOISE_XY..STD_NOISE_XY),
                y + rng.gen_range(-STD_NOISE_XY..STD_NOISE_XY),
                yaw + rng.gen_range(-STD_NOISE_YAW..STD_NOISE_YAW),
            ),
        ));
    }
    obs
}

fn engine() -> RbaEngine<RelativePose2D> {
    let mut rba = RbaEngine::<RelativePose2D>::new(EdgePolicy::FixedSubmaps);
    rba.params.max_tree_depth = 3;
    rba.params.max_optimize_depth = 3;
    rba.ecp_params.submap_size = 5;
    rba.ecp_params.min_obs_to_loop_closure = 1;
    rba
}

#[test]
fn submap_loop_closure_across_depth() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut rba = engine();

    for kf in 0..=16u64 {
        let obs = observations_for(kf, &mut rng);
        let info = rba.define_new_keyframe(&obs, true).unwrap();
        assert_eq!(info.kf_id, kf);

        if kf == 11 {
            // The loop closure fires here: the mandatory edge to center 10
            // plus the inter-submap edge 0<=>10.
            assert_eq!(info.created_edges.len(), 2);
            assert!(info
                .created_edges
                .iter()
                .any(|e| e.loopclosure_base_kf.is_some()));
            assert!(info
                .created_edges
                .iter()
                .any(|e| e.loopclosure_observer_kf.is_some()));

            let lc = info
                .created_edges
                .iter()
                .find(|e| e.loopclosure_base_kf.is_some())
                .unwrap();
            let edge = rba.state().edge(lc.edge_id);
            assert_eq!(
                (edge.from, edge.to),
                (0, 10),
                "loop closure links the submap centers"
            );
            assert_eq!(lc.loopclosure_observer_kf, Some(11));
            assert_eq!(lc.loopclosure_base_kf, Some(1));

            assert!(info.optimize_results.num_observations > 1);
            assert!(
                info.optimize_results.obs_rmse < 1e-6,
                "rmse {}",
                info.optimize_results.obs_rmse
            );
        } else if kf > 0 {
            assert!(!info.created_edges.is_empty(), "keyframe {kf} isolated");
        }
    }

    // The loop-closure edge settled near the true center-to-center offset:
    // KF 0 sits ten meters behind KF 10.
    let edge_id = rba
        .state()
        .find_edge_between(0, 10)
        .expect("loop closure edge exists");
    let inv_pose = rba.state().edge(edge_id).inv_pose;
    let (dt, dr) = pose_discrepancy(&inv_pose, &Pose2::new(-10.05, 0.0, 0.0));
    assert!(dt < 0.1 && dr < 0.05, "edge 0->10 off by ({dt}, {dr})");
}

#[test]
fn loop_closure_bootstrap_seeds_edge_before_optimization() {
    // Same dataset, but KF 11 is inserted without any optimization pass so
    // the raw bootstrap output is observable: every seeded edge must land
    // within a small neighborhood of the true relative pose.
    let mut rng = StdRng::seed_from_u64(3);
    let mut rba = engine();
    rba.params.optimize_new_edges_alone = false;

    for kf in 0..=10u64 {
        let obs = observations_for(kf, &mut rng);
        rba.define_new_keyframe(&obs, true).unwrap();
    }

    let obs = observations_for(11, &mut rng);
    let info = rba.define_new_keyframe(&obs, false).unwrap();
    assert_eq!(info.created_edges.len(), 2);

    for nei in &info.created_edges {
        assert!(
            nei.has_approx_init_val,
            "edge {} was left unseeded",
            nei.edge_id
        );
        let edge = rba.state().edge(nei.edge_id);
        // Ground truth: keyframe i sits at x = i, so the pose of `from` in
        // the frame of `to` is a pure backward shift.
        let truth = Pose2::new(edge.from as f64 - edge.to as f64, 0.0, 0.0);
        let (dt, dr) = pose_discrepancy(&edge.inv_pose, &truth);
        assert!(
            dt < 0.3 && dr < 0.05,
            "edge {}->{} initial guess off by ({dt}, {dr})",
            edge.from,
            edge.to
        );
    }

    // The deferred optimization still settles the area.
    let res = rba.optimize_local_area(11, 3).unwrap();
    assert!(res.obs_rmse < 1e-6, "rmse {}", res.obs_rmse);
}
