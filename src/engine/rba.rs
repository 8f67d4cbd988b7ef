//! The engine facade: keyframe insertion pipeline, bounded local
//! optimization and read-only graph queries.
//!
//! [`RbaEngine::define_new_keyframe`] is the single mutating entry point.
//! For each incoming keyframe it registers the observations, asks the edge
//! creation policy for new kf2kf edges, bootstraps initial relative poses,
//! keeps the spanning trees current and runs the local optimizer around the
//! new keyframe. The call either installs everything or, on a usage error,
//! rolls the state back untouched.

use std::io;
use std::path::Path;

use crate::core::ids::{EdgeId, KeyframeId, LandmarkId};
use crate::core::pose::Pose;
use crate::engine::ecp::{self, EcpParams, EdgePolicy, NewEdgeInfo};
use crate::engine::graph::{
    export, DegreeStats, RbaState, SpanningTrees,
};
use crate::engine::local_area::select_local_area;
use crate::engine::optimizer::{optimize_edges, OptimizeResult};
use crate::engine::{bootstrap, NewObservation, ObsNoise, RbaError, RbaParams};
use crate::sensors::SensorModel;

/// Structured result of one [`RbaEngine::define_new_keyframe`] call.
#[derive(Debug, Clone)]
pub struct NewKeyframeInfo {
    /// ID assigned to the new keyframe.
    pub kf_id: KeyframeId,

    /// Edges created by the edge creation policy, in emission order: the
    /// mandatory edge (if any) first, loop closures after.
    pub created_edges: Vec<NewEdgeInfo>,

    /// Outcome of the local optimization pass.
    pub optimize_results: OptimizeResult,
}

/// An incremental relative bundle adjustment engine, generic over the
/// sensor model.
///
/// Configuration lives in public fields, to be adjusted between
/// construction and the first keyframe:
///
/// ```
/// use setu_slam::engine::ecp::EdgePolicy;
/// use setu_slam::engine::rba::RbaEngine;
/// use setu_slam::sensors::RelativePose2D;
///
/// let mut rba = RbaEngine::<RelativePose2D>::new(EdgePolicy::FixedSubmaps);
/// rba.params.max_tree_depth = 3;
/// rba.params.max_optimize_depth = 3;
/// rba.ecp_params.submap_size = 5;
/// rba.ecp_params.min_obs_to_loop_closure = 1;
/// ```
#[derive(Debug)]
pub struct RbaEngine<S: SensorModel> {
    /// Engine parameter block.
    pub params: RbaParams,

    /// Edge creation policy parameters.
    pub ecp_params: EcpParams,

    /// Sensor-specific parameters (calibration, baseline, ...).
    pub sensor_params: S::Params,

    /// Pose of the sensor on the robot. Identity when the sensor frame
    /// coincides with the keyframe frame.
    pub sensor_pose: S::Pose,

    /// Observation-noise information weighting.
    pub obs_noise: ObsNoise,

    policy: EdgePolicy,
    state: RbaState<S>,
    trees: SpanningTrees<S::Pose>,
}

impl<S: SensorModel> RbaEngine<S> {
    /// Create an empty engine running the given edge creation policy.
    pub fn new(policy: EdgePolicy) -> Self {
        Self {
            params: RbaParams::default(),
            ecp_params: EcpParams::default(),
            sensor_params: S::Params::default(),
            sensor_pose: S::Pose::identity(),
            obs_noise: ObsNoise::default(),
            policy,
            state: RbaState::new(),
            trees: SpanningTrees::new(),
        }
    }

    /// Reset the problem to an empty state, keeping the configuration.
    pub fn clear(&mut self) {
        self.state.clear();
        self.trees.clear();
    }

    /// Read-only access to the graph state.
    pub fn state(&self) -> &RbaState<S> {
        &self.state
    }

    /// Read-only access to the spanning-tree caches.
    pub fn spanning_trees(&self) -> &SpanningTrees<S::Pose> {
        &self.trees
    }

    /// Number of keyframes in the map.
    pub fn num_keyframes(&self) -> usize {
        self.state.num_keyframes()
    }

    /// Number of keyframe-to-keyframe edges.
    pub fn num_k2k_edges(&self) -> usize {
        self.state.num_k2k_edges()
    }

    /// Pose of `query` expressed in the frame of `reference`, composed
    /// along the shortest path, when the topological distance is within
    /// `max_tree_depth`.
    pub fn get_kf_relative_pose(
        &self,
        query: KeyframeId,
        reference: KeyframeId,
    ) -> Option<S::Pose> {
        if query == reference {
            return Some(S::Pose::identity());
        }
        self.trees.relative_pose(query, reference)
    }

    /// Topological distance between two keyframes, when within
    /// `max_tree_depth`.
    pub fn topological_distance(&self, a: KeyframeId, b: KeyframeId) -> Option<usize> {
        self.trees.distance(a, b)
    }

    /// Whether two keyframes share a kf2kf edge, in either direction.
    pub fn are_keyframes_connected(
        &self,
        a: KeyframeId,
        b: KeyframeId,
    ) -> Result<bool, RbaError> {
        self.state.are_keyframes_connected(a, b)
    }

    /// Node degree statistics over the keyframe graph.
    pub fn node_degree_stats(&self) -> DegreeStats {
        self.state.node_degree_stats()
    }

    /// Render the map in Graphviz DOT format.
    pub fn graph_as_dot(&self, all_landmarks: bool) -> String {
        export::graph_as_dot(&self.state, all_landmarks)
    }

    /// Write the DOT rendering of the map to a file.
    pub fn save_graph_as_dot(&self, path: &Path, all_landmarks: bool) -> io::Result<()> {
        export::save_graph_as_dot(&self.state, path, all_landmarks)
    }

    /// Render the high-level map structure in DOT format.
    pub fn top_structure_as_dot(&self) -> String {
        export::top_structure_as_dot(&self.state)
    }

    /// Write the high-level DOT rendering to a file.
    pub fn save_graph_top_structure_as_dot(&self, path: &Path) -> io::Result<()> {
        export::save_graph_top_structure_as_dot(&self.state, path)
    }

    /// Manually create a kf2kf edge between two existing keyframes and
    /// bring the spanning trees up to date.
    pub fn create_kf2kf_edge(
        &mut self,
        from: KeyframeId,
        to: KeyframeId,
        init_inv_pose: Option<S::Pose>,
    ) -> Result<EdgeId, RbaError> {
        ecp::create_edge(
            &mut self.state,
            &mut self.trees,
            self.params.max_tree_depth,
            from,
            to,
            init_inv_pose,
        )
    }

    /// Run the local-area optimizer rooted at `root` with the given window,
    /// refreshing the numeric spanning trees afterwards.
    pub fn optimize_local_area(
        &mut self,
        root: KeyframeId,
        window: usize,
    ) -> Result<OptimizeResult, RbaError> {
        self.state.keyframe(root)?;
        let area = select_local_area(
            &self.state,
            &self.trees,
            root,
            window,
            self.params.max_tree_depth,
        );
        let result = optimize_edges(
            &mut self.state,
            &self.trees,
            &self.params,
            &self.obs_noise,
            &self.sensor_params,
            &area.k2k_edges,
            &area.landmarks,
        )?;
        if !area.k2k_edges.is_empty() {
            let touched: Vec<KeyframeId> = area
                .k2k_edges
                .iter()
                .flat_map(|&e| {
                    let edge = self.state.edge(e);
                    [edge.from, edge.to]
                })
                .collect();
            self.trees.refresh_numeric_around(&self.state, &touched)?;
        }
        Ok(result)
    }

    /// Install a new keyframe with its observations.
    ///
    /// The pipeline: register landmarks and observations, run the edge
    /// creation policy (from the second keyframe on), bootstrap initial
    /// relative poses for the new edges, optionally pre-optimize each new
    /// edge alone, then optimize the local area around the new keyframe.
    ///
    /// Usage errors abort the call with the engine state rolled back; the
    /// matcher and optimizer report their failures through the returned
    /// [`NewKeyframeInfo`] instead.
    pub fn define_new_keyframe(
        &mut self,
        observations: &[NewObservation<S>],
        run_local_optimization: bool,
    ) -> Result<NewKeyframeInfo, RbaError> {
        let snapshot = self.state.snapshot();
        let mut new_landmarks: Vec<LandmarkId> = Vec::new();

        match self.define_new_keyframe_inner(
            observations,
            run_local_optimization,
            &mut new_landmarks,
        ) {
            Ok(info) => Ok(info),
            Err(e) => {
                self.state.rollback(snapshot, &new_landmarks);
                self.trees
                    .rebuild_all(&self.state, self.params.max_tree_depth)?;
                Err(e)
            }
        }
    }

    fn define_new_keyframe_inner(
        &mut self,
        observations: &[NewObservation<S>],
        run_local_optimization: bool,
        new_landmarks: &mut Vec<LandmarkId>,
    ) -> Result<NewKeyframeInfo, RbaError> {
        // 1) Allocate the keyframe.
        let kf_id = self.state.insert_keyframe();

        // 2) Register unseen landmarks and append the observations.
        for obs in observations {
            if self.state.landmark(obs.feat_id).is_none() {
                let pos = self.initial_landmark_pos(obs);
                self.state
                    .register_landmark(obs.feat_id, kf_id, obs.is_fixed, pos)?;
                new_landmarks.push(obs.feat_id);
            }
            self.state
                .insert_observation(kf_id, obs.feat_id, obs.obs, obs.is_fixed)?;
        }

        // 3) Edge creation policy, once there is something to connect to.
        let mut created_edges: Vec<NewEdgeInfo> = Vec::new();
        if self.state.num_keyframes() >= 2 {
            created_edges = ecp::eval(
                self.policy,
                kf_id,
                observations,
                &mut self.state,
                &mut self.trees,
                self.params.max_tree_depth,
                &self.ecp_params,
            )?;
        }

        // 4) Initial-guess bootstrap for edges the policy left unseeded.
        bootstrap::assign_initial_guesses(
            &mut self.state,
            &mut self.trees,
            kf_id,
            observations,
            &mut created_edges,
            &self.sensor_params,
            &self.sensor_pose,
        )?;

        // 5) Trees were rebuilt incrementally per edge; make sure the new
        // keyframe has entries even when no edge was created (KF #0).
        if created_edges.is_empty() {
            self.trees
                .rebuild_around(&self.state, &[kf_id], self.params.max_tree_depth)?;
        }

        // 6) Optionally settle each new edge alone before the joint pass.
        if self.params.optimize_new_edges_alone && created_edges.len() > 1 {
            for nei in &created_edges {
                let res = optimize_edges(
                    &mut self.state,
                    &self.trees,
                    &self.params,
                    &self.obs_noise,
                    &self.sensor_params,
                    &[nei.edge_id],
                    &[],
                )?;
                log::debug!(
                    "[define_new_keyframe] edge {} alone: {:.3e} -> {:.3e}",
                    nei.edge_id,
                    res.total_sqr_error_init,
                    res.total_sqr_error_final
                );
                let edge = self.state.edge(nei.edge_id);
                let endpoints = [edge.from, edge.to];
                self.trees
                    .refresh_numeric_around(&self.state, &endpoints)?;
            }
        }

        // 7) Joint optimization of the local area around the new keyframe.
        let optimize_results = if run_local_optimization {
            self.optimize_local_area(kf_id, self.params.max_optimize_depth)?
        } else {
            OptimizeResult::empty()
        };

        // 8) Remember which keyframes this timestep touched.
        self.state.last_timestep_touched_kfs.clear();
        for nei in &created_edges {
            let (from, to) = {
                let edge = self.state.edge(nei.edge_id);
                (edge.from, edge.to)
            };
            self.state.last_timestep_touched_kfs.insert(from);
            self.state.last_timestep_touched_kfs.insert(to);
        }

        Ok(NewKeyframeInfo {
            kf_id,
            created_edges,
            optimize_results,
        })
    }

    /// Initial landmark coordinates for a first observation: the supplied
    /// value, else the sensor's inverse model, else the default (with a
    /// warning, since optimization then starts from nothing).
    fn initial_landmark_pos(&self, obs: &NewObservation<S>) -> S::Landmark {
        if let Some(init) = obs.init_value {
            return init;
        }
        match S::inverse_model(&self.sensor_params, &obs.obs) {
            Some(pos) => pos,
            None => {
                if !obs.is_fixed {
                    log::warn!(
                        "[define_new_keyframe] landmark {} has no initial value and the sensor cannot invert the observation",
                        obs.feat_id
                    );
                }
                S::Landmark::default()
            }
        }
    }
}
