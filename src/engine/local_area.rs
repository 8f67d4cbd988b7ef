//! Local-area selection: the bounded neighborhood of a keyframe that gets
//! jointly optimized.
//!
//! A breadth-first visit rooted at the keyframe, expanding through both
//! kf2kf edges and observations, bounded by the optimization window. A kf2kf
//! edge is selected when both endpoints lie within the window; a landmark
//! when its base keyframe does and its position is not fixed.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::core::ids::{EdgeId, KeyframeId, LandmarkId};
use crate::engine::graph::{RbaState, SpanningTrees};
use crate::sensors::SensorModel;

/// The set of free variables selected for one local optimization.
#[derive(Debug, Clone, Default)]
pub struct LocalArea {
    /// Edges whose relative pose is optimized, in ID order.
    pub k2k_edges: Vec<EdgeId>,
    /// Landmarks whose position is optimized, in ID order.
    pub landmarks: Vec<LandmarkId>,
}

/// Select the local area around `root` with the given window.
///
/// When the window fits inside the prebuilt spanning trees the cached
/// symbolic entries provide the keyframe depths; otherwise an explicit
/// breadth-first traversal runs, which is worth a warning since it defeats
/// the bounded-cost design.
pub fn select_local_area<S: SensorModel>(
    state: &RbaState<S>,
    trees: &SpanningTrees<S::Pose>,
    root: KeyframeId,
    window: usize,
    max_tree_depth: usize,
) -> LocalArea {
    let depths = if window <= max_tree_depth {
        depths_from_tree(trees, root, window)
    } else {
        log::warn!(
            "[local_area] window {} exceeds max_tree_depth {}: falling back to an explicit traversal",
            window,
            max_tree_depth
        );
        depths_by_bfs(state, root, window)
    };

    let mut edges = BTreeSet::new();
    for edge in state.edges() {
        if depths.contains_key(&edge.from) && depths.contains_key(&edge.to) {
            edges.insert(edge.id);
        }
    }

    let mut landmarks = BTreeSet::new();
    for lm in state.unknown_landmarks() {
        if depths.contains_key(&lm.base_kf) {
            landmarks.insert(lm.id);
        }
    }

    LocalArea {
        k2k_edges: edges.into_iter().collect(),
        landmarks: landmarks.into_iter().collect(),
    }
}

fn depths_from_tree<P: crate::core::pose::Pose>(
    trees: &SpanningTrees<P>,
    root: KeyframeId,
    window: usize,
) -> BTreeMap<KeyframeId, usize> {
    let mut depths = BTreeMap::new();
    depths.insert(root, 0);
    if let Some(entries) = trees.reachable_from(root) {
        for (&dst, entry) in entries {
            if entry.distance <= window {
                depths.insert(dst, entry.distance);
            }
        }
    }
    depths
}

/// Explicit bipartite breadth-first traversal over keyframes and landmarks.
fn depths_by_bfs<S: SensorModel>(
    state: &RbaState<S>,
    root: KeyframeId,
    window: usize,
) -> BTreeMap<KeyframeId, usize> {
    #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    enum Node {
        Kf(KeyframeId),
        Lm(LandmarkId),
    }

    let mut kf_depths = BTreeMap::new();
    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::new();
    kf_depths.insert(root, 0usize);
    visited.insert(Node::Kf(root));
    queue.push_back((Node::Kf(root), 0usize));

    while let Some((node, depth)) = queue.pop_front() {
        if depth >= window {
            continue;
        }
        let push = |n: Node,
                    visited: &mut BTreeSet<Node>,
                    kf_depths: &mut BTreeMap<KeyframeId, usize>,
                    queue: &mut VecDeque<(Node, usize)>| {
            if visited.insert(n) {
                if let Node::Kf(kf) = n {
                    kf_depths.insert(kf, depth + 1);
                }
                queue.push_back((n, depth + 1));
            }
        };
        match node {
            Node::Kf(kf) => {
                let Ok(entry) = state.keyframe(kf) else {
                    continue;
                };
                for &e in &entry.adjacent_k2k {
                    let other = state.edge(e).other_endpoint(kf);
                    push(Node::Kf(other), &mut visited, &mut kf_depths, &mut queue);
                }
                for &o in &entry.adjacent_obs {
                    let feat = state.observations()[o].feat_id;
                    push(Node::Lm(feat), &mut visited, &mut kf_depths, &mut queue);
                }
            }
            Node::Lm(lm_id) => {
                let Some(lm) = state.landmark(lm_id) else {
                    continue;
                };
                push(
                    Node::Kf(lm.base_kf),
                    &mut visited,
                    &mut kf_depths,
                    &mut queue,
                );
                for &o in &lm.obs_indices {
                    let kf = state.observations()[o].kf;
                    push(Node::Kf(kf), &mut visited, &mut kf_depths, &mut queue);
                }
            }
        }
    }
    kf_depths
}
