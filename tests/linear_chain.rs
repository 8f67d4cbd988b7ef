//! End-to-end run of the linear edge creation policy on a straight
//! trajectory, plus the structural invariants the engine must keep after
//! every keyframe insertion.

use setu_slam::{
    pose_discrepancy, EdgePolicy, NewObservation, Pose, Pose2, RbaEngine, RelativePose2D,
};

/// Graph-SLAM style observations: a fixed self-landmark whose feature ID
/// equals the keyframe ID, plus relative-pose observations of earlier
/// keyframes.
fn graph_slam_obs(kf: u64, rel: &[(u64, Pose2)]) -> Vec<NewObservation<RelativePose2D>> {
    let mut obs = vec![NewObservation::fixed(kf, Pose2::identity())];
    obs.extend(
        rel.iter()
            .map(|&(feat, pose)| NewObservation::unknown(feat, pose)),
    );
    obs
}

fn check_invariants(rba: &RbaEngine<RelativePose2D>) {
    let n = rba.num_keyframes() as u64;

    // Every keyframe reaches at least one other within the tree depth.
    if n > 1 {
        for kf in 0..n {
            let entries = rba
                .spanning_trees()
                .reachable_from(kf)
                .expect("keyframe has a spanning tree");
            assert!(!entries.is_empty(), "keyframe {kf} is isolated");
        }
    }

    // Triangle inequality over the symbolic distances.
    for a in 0..n {
        for b in 0..n {
            for c in 0..n {
                if let (Some(ab), Some(bc), Some(ac)) = (
                    rba.topological_distance(a, b),
                    rba.topological_distance(b, c),
                    rba.topological_distance(a, c),
                ) {
                    assert!(
                        ac <= ab + bc,
                        "triangle inequality violated: d({a},{c})={ac} > {ab}+{bc}"
                    );
                }
            }
        }
    }

    // Numeric entries compose to identity both ways.
    for a in 0..n {
        for b in 0..n {
            if a == b {
                continue;
            }
            if let (Some(p), Some(q)) = (
                rba.get_kf_relative_pose(a, b),
                rba.get_kf_relative_pose(b, a),
            ) {
                let (dt, dr) = pose_discrepancy(&p.compose(&q), &Pose2::identity());
                assert!(
                    dt < 1e-6 && dr < 1e-6,
                    "P({a},{b}) ∘ P({b},{a}) is not identity: ({dt}, {dr})"
                );
            }
        }
    }

    // Each edge and its inverse compose to identity, and no pair of
    // keyframes is connected twice.
    let mut seen = std::collections::BTreeSet::new();
    for edge in rba.state().edges() {
        let (dt, dr) = pose_discrepancy(
            &edge.inv_pose.compose(&edge.inv_pose.inverse()),
            &Pose2::identity(),
        );
        assert!(dt < 1e-9 && dr < 1e-9);
        let key = (edge.from.min(edge.to), edge.from.max(edge.to));
        assert!(seen.insert(key), "duplicate edge between {key:?}");
    }
}

#[test]
fn linear_chain_without_loops() {
    let mut rba = RbaEngine::<RelativePose2D>::new(EdgePolicy::Linear);

    for i in 0..10u64 {
        let rel = if i == 0 {
            vec![]
        } else {
            vec![(i - 1, Pose2::new(-1.0, 0.0, 0.0))]
        };
        let info = rba
            .define_new_keyframe(&graph_slam_obs(i, &rel), true)
            .expect("keyframe insertion succeeds");

        assert_eq!(info.kf_id, i);
        if i == 0 {
            assert!(info.created_edges.is_empty());
        } else {
            // Exactly one edge, between consecutive keyframes.
            assert_eq!(info.created_edges.len(), 1, "keyframe {i}");
            let edge = rba.state().edge(info.created_edges[0].edge_id);
            assert_eq!((edge.from, edge.to), (i - 1, i));
            assert!(info.created_edges[0].has_approx_init_val);

            assert!(
                info.optimize_results.obs_rmse < 1e-6,
                "keyframe {i}: rmse {}",
                info.optimize_results.obs_rmse
            );
        }
        check_invariants(&rba);
    }

    assert_eq!(rba.num_k2k_edges(), 9);

    // Composed relative poses along the chain match the trajectory.
    let p = rba.get_kf_relative_pose(9, 5).expect("within tree depth");
    let (dt, dr) = pose_discrepancy(&p, &Pose2::new(4.0, 0.0, 0.0));
    assert!(dt < 1e-6 && dr < 1e-6, "P(9,5) off by ({dt}, {dr})");

    // Beyond the tree depth there is no cached answer.
    assert!(rba.get_kf_relative_pose(9, 0).is_none());
    assert_eq!(rba.topological_distance(3, 7), Some(4));
}

#[test]
fn chain_edges_match_observations_exactly() {
    let mut rba = RbaEngine::<RelativePose2D>::new(EdgePolicy::Linear);
    let step = Pose2::new(-1.0, 0.0, 0.0);

    for i in 0..6u64 {
        let rel = if i == 0 { vec![] } else { vec![(i - 1, step)] };
        rba.define_new_keyframe(&graph_slam_obs(i, &rel), true)
            .unwrap();
    }

    // With noiseless observations every edge converges onto the measured
    // relative pose: inv_pose = pose of (i-1) in the frame of i.
    for edge in rba.state().edges() {
        let (dt, dr) = pose_discrepancy(&edge.inv_pose, &step);
        assert!(
            dt < 1e-6 && dr < 1e-6,
            "edge {}->{} off by ({dt}, {dr})",
            edge.from,
            edge.to
        );
    }
}

#[test]
fn graph_export_reflects_chain() {
    let mut rba = RbaEngine::<RelativePose2D>::new(EdgePolicy::Linear);
    for i in 0..3u64 {
        let rel = if i == 0 {
            vec![]
        } else {
            vec![(i - 1, Pose2::new(-1.0, 0.0, 0.0))]
        };
        rba.define_new_keyframe(&graph_slam_obs(i, &rel), false)
            .unwrap();
    }

    let dot = rba.graph_as_dot(true);
    assert!(dot.contains("0->1;"));
    assert!(dot.contains("1->2;"));
    assert!(dot.contains("0 -> L0;"));
    assert!(dot.contains("2 -> L2;"));

    let stats = rba.node_degree_stats();
    assert_eq!(stats.max, 2);
}
