//! Relative graph-SLAM replay: a closed square trajectory processed
//! keyframe by keyframe, adding only edges toward already-existing
//! keyframes. The spanning-tree-reconstructed poses relative to KF 0 must
//! match the ground truth.

use setu_slam::{
    pose_discrepancy, EdgePolicy, NewObservation, Pose, Pose2, RbaEngine, RelativePose2D,
};

/// Ground-truth trajectory: eight keyframes around a 2x2 square, heading
/// along the direction of travel.
fn ground_truth() -> Vec<Pose2> {
    let step_straight = Pose2::new(1.0, 0.0, 0.0);
    let step_turn = Pose2::new(1.0, 0.0, std::f64::consts::FRAC_PI_2);

    let mut poses = vec![Pose2::identity()];
    for i in 0..7 {
        let step = if i % 2 == 0 { step_straight } else { step_turn };
        let last = *poses.last().unwrap();
        poses.push(last.compose(&step));
    }
    poses
}

/// Relative pose of keyframe `j` as seen from keyframe `i`.
fn relative(gt: &[Pose2], j: usize, i: usize) -> Pose2 {
    gt[i].inverse().compose(&gt[j])
}

#[test]
fn square_loop_reconstructs_ground_truth() {
    let gt = ground_truth();
    let n = gt.len();

    let mut rba = RbaEngine::<RelativePose2D>::new(EdgePolicy::FixedSubmaps);
    rba.params.max_tree_depth = 3;
    rba.params.max_optimize_depth = 3;
    rba.ecp_params.submap_size = 40; // a single submap centered at KF 0
    rba.ecp_params.min_obs_to_loop_closure = 1;

    for i in 0..n {
        let mut obs = vec![NewObservation::<RelativePose2D>::fixed(
            i as u64,
            Pose2::identity(),
        )];
        // Online: observe only keyframes that already exist.
        if i > 0 {
            obs.push(NewObservation::unknown(
                (i - 1) as u64,
                relative(&gt, i - 1, i),
            ));
        }
        if i == n - 1 {
            // Closing the loop back to the start.
            obs.push(NewObservation::unknown(0, relative(&gt, 0, i)));
        }

        let info = rba.define_new_keyframe(&obs, true).unwrap();
        if i > 0 {
            assert!(!info.created_edges.is_empty(), "keyframe {i} isolated");
            assert!(
                info.optimize_results.obs_rmse < 1e-6,
                "keyframe {i}: rmse {}",
                info.optimize_results.obs_rmse
            );
        }
    }

    // Every keyframe hangs off the single submap center, so the global
    // position of each keyframe relative to KF 0 is one spanning-tree
    // query away.
    for (i, truth) in gt.iter().enumerate() {
        let est = rba
            .get_kf_relative_pose(i as u64, 0)
            .expect("within tree depth of the center");
        let (dt, dr) = pose_discrepancy(&est, truth);
        assert!(
            dt < 1e-6 && dr < 1e-6,
            "keyframe {i}: reconstructed pose off by ({dt}, {dr})"
        );
    }
}

#[test]
fn star_topology_keeps_distances_short() {
    let gt = ground_truth();
    let mut rba = RbaEngine::<RelativePose2D>::new(EdgePolicy::FixedSubmaps);
    rba.params.max_tree_depth = 3;
    rba.params.max_optimize_depth = 3;
    rba.ecp_params.submap_size = 40;
    rba.ecp_params.min_obs_to_loop_closure = 1;

    for i in 0..gt.len() {
        let mut obs = vec![NewObservation::<RelativePose2D>::fixed(
            i as u64,
            Pose2::identity(),
        )];
        if i > 0 {
            obs.push(NewObservation::unknown(
                (i - 1) as u64,
                relative(&gt, i - 1, i),
            ));
        }
        rba.define_new_keyframe(&obs, true).unwrap();
    }

    // Every non-center keyframe links straight to the center: any pair is
    // at most two hops apart.
    for a in 0..gt.len() as u64 {
        for b in 0..gt.len() as u64 {
            let d = rba.topological_distance(a, b).unwrap();
            assert!(d <= 2, "d({a},{b}) = {d}");
        }
    }
    assert_eq!(rba.num_k2k_edges(), gt.len() - 1);
}
