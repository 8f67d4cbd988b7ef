//! Levenberg-Marquardt optimization of a local area.
//!
//! Minimizes the reprojection error of every observation that depends on
//! the selected free variables:
//!
//! ```text
//! F(x) = Σ ρ( ‖ W · ( h(P(base_i, observer_i), l_i) − z_i ) ‖² )
//! ```
//!
//! where `P(base, observer)` composes the current edge estimates along the
//! cached spanning-tree path, `h` is the sensor's measurement model, `W`
//! the per-dimension observation information weighting and `ρ` an optional
//! pseudo-Huber kernel. Free variables are the inverse poses of the
//! selected kf2kf edges plus the positions of the selected landmarks; both
//! are updated in place through tangent-space retraction.
//!
//! Jacobians are evaluated by central finite differences per parameter
//! block, and the damped normal equations are solved with a dense Cholesky
//! factorization. Local windows stay small by construction, so the dense
//! system is the right tool.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::core::ids::{EdgeId, LandmarkId, ObsIndex};
use crate::core::pose::Pose;
use crate::engine::graph::{RbaState, SpanningTrees};
use crate::engine::{CovRecovery, ObsNoise, RbaError, RbaParams};
use crate::sensors::SensorModel;

/// Why an optimization run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Error or error reduction fell below the configured thresholds.
    Converged,
    /// Maximum iterations reached.
    MaxIterations,
    /// Damping exceeded `max_lambda` without an acceptable step.
    Diverged,
    /// The damped normal equations could not be factorized.
    SolveFailed,
    /// Nothing to optimize: no involved observations or free variables.
    NoObservations,
}

/// Outcome of one optimization run.
#[derive(Debug, Clone)]
pub struct OptimizeResult {
    /// Number of observations entering the problem.
    pub num_observations: usize,
    /// Total weighted squared error before the first iteration.
    pub total_sqr_error_init: f64,
    /// Total weighted squared error after the last accepted iterate.
    pub total_sqr_error_final: f64,
    /// Root-mean-square error per observation after optimization.
    pub obs_rmse: f64,
    /// Iterations performed.
    pub iterations: u32,
    /// Whether the run converged.
    pub converged: bool,
    /// Stop reason.
    pub termination: TerminationReason,
    /// Recovered landmark covariance blocks (row-major `LM_DIMS²` entries),
    /// per the configured recovery policy.
    pub landmark_covariances: BTreeMap<LandmarkId, Vec<f64>>,
}

impl OptimizeResult {
    /// Result of a run with nothing to do.
    pub fn empty() -> Self {
        Self {
            num_observations: 0,
            total_sqr_error_init: 0.0,
            total_sqr_error_final: 0.0,
            obs_rmse: 0.0,
            iterations: 0,
            converged: true,
            termination: TerminationReason::NoObservations,
            landmark_covariances: BTreeMap::new(),
        }
    }
}

impl Default for OptimizeResult {
    fn default() -> Self {
        Self::empty()
    }
}

/// One residual block: an observation plus its dependence structure.
struct Term<L> {
    obs_idx: ObsIndex,
    /// Spanning-tree path from the observer to the landmark base, as
    /// `(edge, forward)` hops.
    path: Vec<(EdgeId, bool)>,
    /// Parameter blocks this residual depends on.
    dep_blocks: Vec<usize>,
    /// Where the landmark coordinates come from.
    lm: LandmarkSource<L>,
}

/// Source of a residual's landmark coordinates: an index into the free
/// landmark values, or a snapshot taken at collection time for landmarks
/// outside the free set (those cannot change during the solve).
enum LandmarkSource<L> {
    Free(usize),
    Snapshot(L),
}

/// Current values of the free variables. Blocks `0..ne` are edges, blocks
/// `ne..ne+nl` landmarks.
struct Working<S: SensorModel> {
    edge_ids: Vec<EdgeId>,
    edge_vals: Vec<S::Pose>,
    lm_ids: Vec<LandmarkId>,
    lm_vals: Vec<S::Landmark>,
    edge_block: HashMap<EdgeId, usize>,
    lm_block: HashMap<LandmarkId, usize>,
}

impl<S: SensorModel> Working<S> {
    fn new(
        state: &RbaState<S>,
        free_edges: &[EdgeId],
        free_lms: &[LandmarkId],
    ) -> Result<Self, RbaError> {
        let edge_vals = free_edges.iter().map(|&e| state.edge(e).inv_pose).collect();
        let mut lm_vals = Vec::with_capacity(free_lms.len());
        for &l in free_lms {
            match state.landmark(l) {
                Some(lm) => lm_vals.push(lm.pos),
                None => return Err(RbaError::UnknownLandmark(l)),
            }
        }
        let ne = free_edges.len();
        Ok(Self {
            edge_ids: free_edges.to_vec(),
            edge_vals,
            lm_ids: free_lms.to_vec(),
            lm_vals,
            edge_block: free_edges.iter().enumerate().map(|(i, &e)| (e, i)).collect(),
            lm_block: free_lms
                .iter()
                .enumerate()
                .map(|(i, &l)| (l, ne + i))
                .collect(),
        })
    }

    fn clone_vals(&self) -> (Vec<S::Pose>, Vec<S::Landmark>) {
        (self.edge_vals.clone(), self.lm_vals.clone())
    }

    fn restore_vals(&mut self, vals: (Vec<S::Pose>, Vec<S::Landmark>)) {
        self.edge_vals = vals.0;
        self.lm_vals = vals.1;
    }

    fn edge_pose(&self, state: &RbaState<S>, edge: EdgeId) -> S::Pose {
        match self.edge_block.get(&edge) {
            Some(&b) => self.edge_vals[b],
            None => state.edge(edge).inv_pose,
        }
    }

    /// Apply a full tangent-space step.
    fn retract_step(&mut self, dx: &[f64]) {
        let e_dof = S::Pose::DOF;
        for (i, pose) in self.edge_vals.iter_mut().enumerate() {
            *pose = pose.retract(&dx[i * e_dof..(i + 1) * e_dof]);
        }
        let base = self.edge_ids.len() * e_dof;
        for (i, lm) in self.lm_vals.iter_mut().enumerate() {
            *lm = S::lm_retract(lm, &dx[base + i * S::LM_DIMS..base + (i + 1) * S::LM_DIMS]);
        }
    }

    /// Write the optimized values back into the graph state.
    fn write_back(&self, state: &mut RbaState<S>) {
        for (i, &e) in self.edge_ids.iter().enumerate() {
            state.edge_mut(e).inv_pose = self.edge_vals[i];
        }
        for (i, &l) in self.lm_ids.iter().enumerate() {
            state.set_landmark_pos(l, self.lm_vals[i]);
        }
    }
}

/// Optimize the given free edges and landmarks in place.
///
/// Returns the error statistics; the only fatal failure is a mismatched
/// observation-noise dimension.
pub fn optimize_edges<S: SensorModel>(
    state: &mut RbaState<S>,
    trees: &SpanningTrees<S::Pose>,
    params: &RbaParams,
    noise: &ObsNoise,
    sensor: &S::Params,
    free_edges: &[EdgeId],
    free_lms: &[LandmarkId],
) -> Result<OptimizeResult, RbaError> {
    let weights = noise_weights::<S>(noise)?;

    let e_dof = S::Pose::DOF;
    let lm_dof = S::LM_DIMS;
    let ne = free_edges.len();
    let n_params = ne * e_dof + free_lms.len() * lm_dof;

    let mut working = Working::<S>::new(state, free_edges, free_lms)?;
    let terms = collect_terms(state, trees, &working);

    if terms.is_empty() || n_params == 0 {
        return Ok(OptimizeResult::empty());
    }
    let n_terms = terms.len();

    let kernel = params.use_robust_kernel.then_some(params.kernel_param);
    let mut err = total_error(state, sensor, &weights, &working, &terms, kernel);
    let err_init = err;

    let mut lambda = params.initial_damping;
    let mut iterations = 0u32;
    let mut termination = TerminationReason::MaxIterations;

    for _ in 0..params.max_iters {
        iterations += 1;

        let (h, g) = build_normal_equations(
            state, sensor, &weights, &working, &terms, kernel, n_params,
        );

        // Damp the diagonal and solve for the step.
        let mut h_damped = h.clone();
        let mut damp = vec![0.0; n_params];
        for i in 0..n_params {
            damp[i] = lambda * h[i * n_params + i].max(1.0);
            h_damped[i * n_params + i] += damp[i];
        }
        let Some(dx) = cholesky_solve(&h_damped, &g, n_params).map(|mut x| {
            for v in &mut x {
                *v = -*v;
            }
            x
        }) else {
            lambda *= 10.0;
            if lambda > params.max_lambda {
                termination = TerminationReason::SolveFailed;
                break;
            }
            continue;
        };

        let saved = working.clone_vals();
        working.retract_step(&dx);
        let err_new = total_error(state, sensor, &weights, &working, &terms, kernel);

        if err_new <= err {
            // Accept the step.
            let predicted: f64 = dx
                .iter()
                .enumerate()
                .map(|(i, &d)| 0.5 * d * (damp[i] * d - g[i]))
                .sum();
            let rho = (err - err_new) / predicted.max(1e-300);
            let rel_reduction = (err - err_new) / err.max(1e-300);
            err = err_new;
            lambda = (lambda * 0.1).max(1e-10);

            let rmse = (err / n_terms as f64).sqrt();
            log::debug!(
                "[optimizer] iter {iterations}: err {err:.3e}, rmse {rmse:.3e}, lambda {lambda:.1e}"
            );
            if rmse < params.max_error_per_obs_to_stop
                || rho >= params.max_rho
                || rel_reduction < params.min_error_reduction_ratio_to_relinearize
            {
                termination = TerminationReason::Converged;
                break;
            }
        } else {
            // Reject and raise the damping.
            working.restore_vals(saved);
            lambda *= 10.0;
            if lambda > params.max_lambda {
                termination = TerminationReason::Diverged;
                break;
            }
        }
    }

    working.write_back(state);

    let landmark_covariances = match params.cov_recovery {
        CovRecovery::None => BTreeMap::new(),
        policy => recover_landmark_covariances(
            state, sensor, &weights, &working, &terms, kernel, n_params, policy,
        ),
    };

    let converged = termination == TerminationReason::Converged;
    Ok(OptimizeResult {
        num_observations: n_terms,
        total_sqr_error_init: err_init,
        total_sqr_error_final: err,
        obs_rmse: (err / n_terms as f64).sqrt(),
        iterations,
        converged,
        termination,
        landmark_covariances,
    })
}

fn noise_weights<S: SensorModel>(noise: &ObsNoise) -> Result<Vec<f64>, RbaError> {
    match noise {
        ObsNoise::Identity => Ok(vec![1.0; S::OBS_DIMS]),
        ObsNoise::Diagonal(info) => {
            if info.len() != S::OBS_DIMS {
                return Err(RbaError::BadNoiseDimension {
                    got: info.len(),
                    expected: S::OBS_DIMS,
                });
            }
            Ok(info.iter().map(|v| v.max(0.0).sqrt()).collect())
        }
    }
}

/// Collect the observations whose residual depends on at least one free
/// variable, along with their spanning-tree paths. Observations whose base
/// keyframe is beyond the tree bound cannot be evaluated and are skipped.
fn collect_terms<S: SensorModel>(
    state: &RbaState<S>,
    trees: &SpanningTrees<S::Pose>,
    working: &Working<S>,
) -> Vec<Term<S::Landmark>> {
    let ne = working.edge_ids.len();
    let mut terms = Vec::new();
    for (idx, obs) in state.observations().iter().enumerate() {
        let Some(lm) = state.landmark(obs.feat_id) else {
            continue;
        };
        let path = if obs.kf == lm.base_kf {
            Vec::new()
        } else {
            match trees.path(state, obs.kf, lm.base_kf) {
                Some(p) => p,
                None => continue,
            }
        };

        let mut dep: BTreeSet<usize> = BTreeSet::new();
        for (e, _) in &path {
            if let Some(&b) = working.edge_block.get(e) {
                dep.insert(b);
            }
        }
        let lm_source = match working.lm_block.get(&obs.feat_id) {
            Some(&b) => {
                dep.insert(b);
                LandmarkSource::Free(b - ne)
            }
            None => LandmarkSource::Snapshot(lm.pos),
        };
        if dep.is_empty() {
            continue;
        }
        terms.push(Term {
            obs_idx: idx,
            path,
            dep_blocks: dep.into_iter().collect(),
            lm: lm_source,
        });
    }
    terms
}

/// Evaluate one weighted residual into `out` (length `OBS_DIMS`).
fn eval_residual<S: SensorModel>(
    state: &RbaState<S>,
    sensor: &S::Params,
    weights: &[f64],
    working: &Working<S>,
    term: &Term<S::Landmark>,
    out: &mut [f64],
) {
    let obs = &state.observations()[term.obs_idx];
    let mut base_wrt_observer = S::Pose::identity();
    for &(eid, forward) in &term.path {
        let p = working.edge_pose(state, eid);
        let hop = if forward { p.inverse() } else { p };
        base_wrt_observer = base_wrt_observer.compose(&hop);
    }

    let lm = match &term.lm {
        LandmarkSource::Free(i) => working.lm_vals[*i],
        LandmarkSource::Snapshot(pos) => *pos,
    };
    match S::predict(sensor, &base_wrt_observer, &lm) {
        Some(pred) => {
            S::residual(&pred, &obs.obs, out);
            for (v, w) in out.iter_mut().zip(weights) {
                *v *= w;
            }
        }
        // Unobservable from the current estimate: contributes nothing this
        // iteration rather than aborting the whole solve.
        None => out.fill(0.0),
    }
}

fn robust_loss(sqr: f64, kernel: Option<f64>) -> f64 {
    match kernel {
        None => sqr,
        Some(c) => {
            let c2 = c * c;
            2.0 * c2 * ((1.0 + sqr / c2).sqrt() - 1.0)
        }
    }
}

/// Pseudo-Huber IRLS weight for a squared residual.
fn robust_weight(sqr: f64, kernel: Option<f64>) -> f64 {
    match kernel {
        None => 1.0,
        Some(c) => 1.0 / (1.0 + sqr / (c * c)).sqrt(),
    }
}

fn total_error<S: SensorModel>(
    state: &RbaState<S>,
    sensor: &S::Params,
    weights: &[f64],
    working: &Working<S>,
    terms: &[Term<S::Landmark>],
    kernel: Option<f64>,
) -> f64 {
    let mut buf = vec![0.0; S::OBS_DIMS];
    let mut total = 0.0;
    for term in terms {
        eval_residual(state, sensor, weights, working, term, &mut buf);
        let sqr: f64 = buf.iter().map(|v| v * v).sum();
        total += robust_loss(sqr, kernel);
    }
    total
}

/// Finite-difference step for the numeric Jacobians.
const DIFF_EPS: f64 = 1e-6;

/// Build `H = Σ w Jᵀ J` and `g = Σ w Jᵀ r` with central-difference
/// Jacobians, dense row-major.
#[allow(clippy::too_many_arguments)]
fn build_normal_equations<S: SensorModel>(
    state: &RbaState<S>,
    sensor: &S::Params,
    weights: &[f64],
    working: &Working<S>,
    terms: &[Term<S::Landmark>],
    kernel: Option<f64>,
    n_params: usize,
) -> (Vec<f64>, Vec<f64>) {
    let obs_dims = S::OBS_DIMS;
    let e_dof = S::Pose::DOF;
    let ne = working.edge_ids.len();

    let mut h = vec![0.0; n_params * n_params];
    let mut g = vec![0.0; n_params];

    let mut r = vec![0.0; obs_dims];
    let mut r_plus = vec![0.0; obs_dims];
    let mut r_minus = vec![0.0; obs_dims];

    // Scratch copy perturbed column by column.
    let mut probe = Working::<S> {
        edge_ids: working.edge_ids.clone(),
        edge_vals: working.edge_vals.clone(),
        lm_ids: working.lm_ids.clone(),
        lm_vals: working.lm_vals.clone(),
        edge_block: working.edge_block.clone(),
        lm_block: working.lm_block.clone(),
    };

    for term in terms {
        eval_residual(state, sensor, weights, working, term, &mut r);
        let sqr: f64 = r.iter().map(|v| v * v).sum();
        let w = robust_weight(sqr, kernel);

        // Jacobian columns for the dependent blocks only.
        let mut cols: Vec<(usize, Vec<f64>)> = Vec::new();
        for &block in &term.dep_blocks {
            let (offset, dims) = if block < ne {
                (block * e_dof, e_dof)
            } else {
                (ne * e_dof + (block - ne) * S::LM_DIMS, S::LM_DIMS)
            };
            for k in 0..dims {
                perturb_block(&mut probe, working, block, ne, k, DIFF_EPS);
                eval_residual(state, sensor, weights, &probe, term, &mut r_plus);
                perturb_block(&mut probe, working, block, ne, k, -DIFF_EPS);
                eval_residual(state, sensor, weights, &probe, term, &mut r_minus);
                restore_block(&mut probe, working, block, ne);

                let col: Vec<f64> = r_plus
                    .iter()
                    .zip(&r_minus)
                    .map(|(p, m)| (p - m) / (2.0 * DIFF_EPS))
                    .collect();
                cols.push((offset + k, col));
            }
        }

        for (ci, col_i) in &cols {
            let gi: f64 = col_i.iter().zip(&r).map(|(a, b)| a * b).sum();
            g[*ci] += w * gi;
            for (cj, col_j) in &cols {
                let hij: f64 = col_i.iter().zip(col_j).map(|(a, b)| a * b).sum();
                h[*ci * n_params + *cj] += w * hij;
            }
        }
    }
    (h, g)
}

fn perturb_block<S: SensorModel>(
    probe: &mut Working<S>,
    reference: &Working<S>,
    block: usize,
    ne: usize,
    dim: usize,
    eps: f64,
) {
    if block < ne {
        let mut delta = [0.0; 8];
        delta[dim] = eps;
        probe.edge_vals[block] = reference.edge_vals[block].retract(&delta[..S::Pose::DOF]);
    } else {
        let mut delta = [0.0; 8];
        delta[dim] = eps;
        probe.lm_vals[block - ne] =
            S::lm_retract(&reference.lm_vals[block - ne], &delta[..S::LM_DIMS]);
    }
}

fn restore_block<S: SensorModel>(
    probe: &mut Working<S>,
    reference: &Working<S>,
    block: usize,
    ne: usize,
) {
    if block < ne {
        probe.edge_vals[block] = reference.edge_vals[block];
    } else {
        probe.lm_vals[block - ne] = reference.lm_vals[block - ne];
    }
}

/// Dense Cholesky solve of `H x = b`. Returns `None` when the matrix is not
/// positive definite.
fn cholesky_solve(h: &[f64], b: &[f64], dim: usize) -> Option<Vec<f64>> {
    // Decomposition: H = L * L^T
    let mut l = vec![0.0; dim * dim];
    for i in 0..dim {
        for j in 0..=i {
            let mut sum = h[i * dim + j];
            for k in 0..j {
                sum -= l[i * dim + k] * l[j * dim + k];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[i * dim + j] = sum.sqrt();
            } else {
                l[i * dim + j] = sum / l[j * dim + j];
            }
        }
    }

    // Forward substitution: L * y = b
    let mut y = vec![0.0; dim];
    for i in 0..dim {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * dim + j] * y[j];
        }
        y[i] = sum / l[i * dim + i];
    }

    // Backward substitution: L^T * x = y
    let mut x = vec![0.0; dim];
    for i in (0..dim).rev() {
        let mut sum = y[i];
        for j in (i + 1)..dim {
            sum -= l[j * dim + i] * x[j];
        }
        x[i] = sum / l[i * dim + i];
    }
    Some(x)
}

/// Recover landmark covariance blocks from the Hessian at the final
/// estimate, either per-landmark (diagonal blocks) or from the full
/// inverse.
#[allow(clippy::too_many_arguments)]
fn recover_landmark_covariances<S: SensorModel>(
    state: &RbaState<S>,
    sensor: &S::Params,
    weights: &[f64],
    working: &Working<S>,
    terms: &[Term<S::Landmark>],
    kernel: Option<f64>,
    n_params: usize,
    policy: CovRecovery,
) -> BTreeMap<LandmarkId, Vec<f64>> {
    let mut out = BTreeMap::new();
    if working.lm_ids.is_empty() {
        return out;
    }
    let (h, _) = build_normal_equations(
        state, sensor, weights, working, terms, kernel, n_params,
    );
    let ne = working.edge_ids.len();
    let e_dof = S::Pose::DOF;
    let d = S::LM_DIMS;

    let full_inverse = if policy == CovRecovery::Full {
        match invert_spd(&h, n_params) {
            Some(inv) => Some(inv),
            None => {
                log::debug!("[optimizer] full covariance recovery failed: singular Hessian");
                return out;
            }
        }
    } else {
        None
    };

    for (i, &lm_id) in working.lm_ids.iter().enumerate() {
        let offset = ne * e_dof + i * d;
        let block: Vec<f64> = match &full_inverse {
            Some(inv) => (0..d)
                .flat_map(|r| (0..d).map(move |c| inv[(offset + r) * n_params + offset + c]))
                .collect(),
            None => {
                let mut sub = vec![0.0; d * d];
                for r in 0..d {
                    for c in 0..d {
                        sub[r * d + c] = h[(offset + r) * n_params + offset + c];
                    }
                }
                match invert_spd(&sub, d) {
                    Some(inv) => inv,
                    None => {
                        log::debug!(
                            "[optimizer] covariance block for landmark {lm_id} is singular"
                        );
                        continue;
                    }
                }
            }
        };
        out.insert(lm_id, block);
    }
    out
}

/// Invert a symmetric positive-definite matrix by Cholesky solves against
/// the identity columns.
fn invert_spd(h: &[f64], dim: usize) -> Option<Vec<f64>> {
    let mut inv = vec![0.0; dim * dim];
    let mut unit = vec![0.0; dim];
    for c in 0..dim {
        unit.iter_mut().for_each(|v| *v = 0.0);
        unit[c] = 1.0;
        let col = cholesky_solve(h, &unit, dim)?;
        for r in 0..dim {
            inv[r * dim + c] = col[r];
        }
    }
    Some(inv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pose::{pose_discrepancy, Pose2};
    use crate::sensors::{Cartesian2D, RelativePose2D};
    use crate::core::pose::Point2;
    use approx::assert_relative_eq;

    #[test]
    fn test_cholesky_solves_diagonal() {
        let h = vec![4.0, 0.0, 0.0, 9.0];
        let b = vec![8.0, 27.0];
        let x = cholesky_solve(&h, &b, 2).unwrap();
        assert_relative_eq!(x[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(x[1], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let h = vec![1.0, 2.0, 2.0, 1.0];
        assert!(cholesky_solve(&h, &[1.0, 1.0], 2).is_none());
    }

    #[test]
    fn test_invert_spd_roundtrip() {
        let h = vec![2.0, 0.5, 0.5, 3.0];
        let inv = invert_spd(&h, 2).unwrap();
        // H * H⁻¹ = I
        let i00 = h[0] * inv[0] + h[1] * inv[2];
        let i01 = h[0] * inv[1] + h[1] * inv[3];
        assert_relative_eq!(i00, 1.0, epsilon = 1e-12);
        assert_relative_eq!(i01, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_robust_weight_downweights_outliers() {
        assert_relative_eq!(robust_weight(0.0, Some(3.0)), 1.0);
        assert!(robust_weight(100.0, Some(3.0)) < 0.3);
        assert_relative_eq!(robust_weight(100.0, None), 1.0);
    }

    /// Chain 0-1-2 with a corrupted middle edge: the single relative-pose
    /// observation pins it back.
    #[test]
    fn test_single_edge_recovers_measurement() {
        let mut st: RbaState<RelativePose2D> = RbaState::new();
        let mut trees = SpanningTrees::new();
        for i in 0..2u64 {
            let kf = st.insert_keyframe();
            st.register_landmark(i, kf, true, Pose2::identity()).unwrap();
            st.insert_observation(kf, i, Pose2::identity(), true).unwrap();
        }
        st.create_kf2kf_edge(0, 1, Some(Pose2::new(-0.3, 0.4, 0.2)))
            .unwrap();
        // KF 1 observes KF 0's self-landmark one meter behind.
        st.insert_observation(1, 0, Pose2::new(-1.0, 0.0, 0.0), false)
            .unwrap();
        trees.rebuild_all(&st, 4).unwrap();

        let params = RbaParams::default();
        let res = optimize_edges(
            &mut st,
            &trees,
            &params,
            &ObsNoise::Identity,
            &(),
            &[0],
            &[],
        )
        .unwrap();

        assert_eq!(res.num_observations, 1);
        assert!(res.converged, "termination: {:?}", res.termination);
        assert!(res.obs_rmse < 1e-6, "rmse {}", res.obs_rmse);
        let expected = Pose2::new(-1.0, 0.0, 0.0);
        let (dt, dr) = pose_discrepancy(&st.edge(0).inv_pose, &expected);
        assert!(dt < 1e-6 && dr < 1e-6);
    }

    /// A free landmark and a fixed observer: the landmark moves onto its
    /// observation.
    #[test]
    fn test_free_landmark_converges_to_observation() {
        let mut st: RbaState<Cartesian2D> = RbaState::new();
        let trees = SpanningTrees::new();
        let kf = st.insert_keyframe();
        st.register_landmark(0, kf, false, Point2::new(0.0, 0.0)).unwrap();
        st.insert_observation(kf, 0, Point2::new(2.0, -1.0), false)
            .unwrap();

        let params = RbaParams::default();
        let res = optimize_edges(
            &mut st,
            &trees,
            &params,
            &ObsNoise::Identity,
            &(),
            &[],
            &[0],
        )
        .unwrap();

        assert!(res.converged);
        let lm = st.landmark(0).unwrap();
        assert_relative_eq!(lm.pos.x, 2.0, epsilon = 1e-6);
        assert_relative_eq!(lm.pos.y, -1.0, epsilon = 1e-6);
        // Covariance recovered for the free landmark by default policy.
        assert!(res.landmark_covariances.contains_key(&0));
    }

    #[test]
    fn test_untouched_observations_excluded() {
        let mut st: RbaState<RelativePose2D> = RbaState::new();
        let mut trees = SpanningTrees::new();
        for i in 0..3u64 {
            let kf = st.insert_keyframe();
            st.register_landmark(i, kf, true, Pose2::identity()).unwrap();
            st.insert_observation(kf, i, Pose2::identity(), true).unwrap();
            if i > 0 {
                st.create_kf2kf_edge(i - 1, i, Some(Pose2::new(-1.0, 0.0, 0.0)))
                    .unwrap();
                st.insert_observation(kf, i - 1, Pose2::new(-1.0, 0.0, 0.0), false)
                    .unwrap();
            }
        }
        trees.rebuild_all(&st, 4).unwrap();

        // Only the second edge is free: the 1->0 observation does not
        // involve it and must not be counted.
        let res = optimize_edges(
            &mut st,
            &trees,
            &RbaParams::default(),
            &ObsNoise::Identity,
            &(),
            &[1],
            &[],
        )
        .unwrap();
        assert_eq!(res.num_observations, 1);
    }

    #[test]
    fn test_bad_noise_dimension_is_fatal() {
        let mut st: RbaState<RelativePose2D> = RbaState::new();
        let trees = SpanningTrees::new();
        st.insert_keyframe();
        let err = optimize_edges(
            &mut st,
            &trees,
            &RbaParams::default(),
            &ObsNoise::Diagonal(vec![1.0, 1.0]),
            &(),
            &[],
            &[],
        )
        .unwrap_err();
        assert_eq!(
            err,
            RbaError::BadNoiseDimension {
                got: 2,
                expected: 3
            }
        );
    }

    #[test]
    fn test_unknown_free_landmark_is_fatal() {
        let mut st: RbaState<RelativePose2D> = RbaState::new();
        let trees = SpanningTrees::new();
        st.insert_keyframe();
        let err = optimize_edges(
            &mut st,
            &trees,
            &RbaParams::default(),
            &ObsNoise::Identity,
            &(),
            &[],
            &[42],
        )
        .unwrap_err();
        assert_eq!(err, RbaError::UnknownLandmark(42));
    }

    #[test]
    fn test_empty_problem_is_noop() {
        let mut st: RbaState<RelativePose2D> = RbaState::new();
        let trees = SpanningTrees::new();
        st.insert_keyframe();
        let res = optimize_edges(
            &mut st,
            &trees,
            &RbaParams::default(),
            &ObsNoise::Identity,
            &(),
            &[],
            &[],
        )
        .unwrap();
        assert_eq!(res.termination, TerminationReason::NoObservations);
        assert!(res.converged);
    }
}
