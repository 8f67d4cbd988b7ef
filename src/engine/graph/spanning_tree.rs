//! Bounded shortest-path spanning trees over the keyframe graph.
//!
//! Two parallel caches are maintained per source keyframe, covering every
//! destination within `max_depth` hops:
//!
//! - **Symbolic**: topological distance plus the ID of the first edge on the
//!   shortest path from the source toward the destination.
//! - **Numeric**: the composed relative pose of the destination expressed in
//!   the source frame, refreshed by walking the cached next-edge pointers.
//!
//! Shortest-path ties break on the lowest first-edge ID, which makes
//! rebuilds deterministic. Pose composition follows edge direction: an edge
//! traversed from its `from` to its `to` endpoint applies its `inv_pose`
//! inverted, otherwise directly.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};

use crate::core::ids::{EdgeId, KeyframeId};
use crate::core::pose::Pose;
use crate::engine::graph::state::RbaState;
use crate::engine::RbaError;
use crate::sensors::SensorModel;

/// Symbolic spanning-tree entry for one (source, destination) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanTreeEntry {
    /// Minimal hop count from the source to the destination.
    pub distance: usize,
    /// First edge on the shortest path, leaving the source.
    pub next_edge: EdgeId,
}

/// The symbolic and numeric spanning-tree caches.
#[derive(Debug)]
pub struct SpanningTrees<P: Pose> {
    sym: HashMap<KeyframeId, BTreeMap<KeyframeId, SpanTreeEntry>>,
    num: HashMap<KeyframeId, BTreeMap<KeyframeId, P>>,
}

impl<P: Pose> Default for SpanningTrees<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Pose> SpanningTrees<P> {
    /// Create empty caches.
    pub fn new() -> Self {
        Self {
            sym: HashMap::new(),
            num: HashMap::new(),
        }
    }

    /// Drop all cached entries.
    pub fn clear(&mut self) {
        self.sym.clear();
        self.num.clear();
    }

    /// Topological distance between two keyframes, when within the depth
    /// bound of the cached trees.
    pub fn distance(&self, a: KeyframeId, b: KeyframeId) -> Option<usize> {
        if a == b {
            return Some(0);
        }
        Some(self.sym.get(&a)?.get(&b)?.distance)
    }

    /// Pose of `query` expressed in the frame of `reference`, composed along
    /// the shortest path, when the pair is within the depth bound.
    pub fn relative_pose(&self, query: KeyframeId, reference: KeyframeId) -> Option<P> {
        self.num.get(&reference)?.get(&query).copied()
    }

    /// Symbolic entries of the tree rooted at `src` (destinations, distances
    /// and first-hop edges).
    pub fn reachable_from(
        &self,
        src: KeyframeId,
    ) -> Option<&BTreeMap<KeyframeId, SpanTreeEntry>> {
        self.sym.get(&src)
    }

    /// The shortest path from `src` to `dst` as `(edge, forward)` hops,
    /// where `forward` means the edge is crossed from its `from` endpoint
    /// to its `to` endpoint.
    pub fn path<S: SensorModel<Pose = P>>(
        &self,
        state: &RbaState<S>,
        src: KeyframeId,
        dst: KeyframeId,
    ) -> Option<Vec<(EdgeId, bool)>> {
        if src == dst {
            return Some(Vec::new());
        }
        let max_len = self.sym.get(&src)?.get(&dst)?.distance;
        let mut hops = Vec::with_capacity(max_len);
        let mut cur = src;
        while cur != dst {
            if hops.len() > max_len {
                return None;
            }
            let entry = self.sym.get(&cur)?.get(&dst)?;
            let edge = state.edge(entry.next_edge);
            let forward = cur == edge.from;
            hops.push((entry.next_edge, forward));
            cur = edge.other_endpoint(cur);
        }
        Some(hops)
    }

    /// Rebuild the symbolic and numeric trees of every source keyframe
    /// within `max_depth` of any seed, then refresh their numeric entries.
    ///
    /// Called after each batch of new edges with the edges' endpoints as
    /// seeds.
    pub fn rebuild_around<S: SensorModel<Pose = P>>(
        &mut self,
        state: &RbaState<S>,
        seeds: &[KeyframeId],
        max_depth: usize,
    ) -> Result<(), RbaError> {
        let mut sources: HashSet<KeyframeId> = HashSet::new();
        for &seed in seeds {
            let ball = build_symbolic(state, seed, max_depth);
            sources.extend(ball.keys().copied());
            sources.insert(seed);
            self.sym.insert(seed, ball);
        }
        for &src in &sources {
            if !seeds.contains(&src) {
                self.sym.insert(src, build_symbolic(state, src, max_depth));
            }
        }
        for &src in &sources {
            self.refresh_numeric_for(state, src)?;
        }
        Ok(())
    }

    /// Rebuild every tree from scratch.
    pub fn rebuild_all<S: SensorModel<Pose = P>>(
        &mut self,
        state: &RbaState<S>,
        max_depth: usize,
    ) -> Result<(), RbaError> {
        self.clear();
        for kf in state.keyframes() {
            self.sym.insert(kf.id, build_symbolic(state, kf.id, max_depth));
        }
        let sources: Vec<KeyframeId> = state.keyframes().iter().map(|kf| kf.id).collect();
        for src in sources {
            self.refresh_numeric_for(state, src)?;
        }
        Ok(())
    }

    /// Refresh the numeric entries of every source whose tree can contain a
    /// seed keyframe, by recomposing poses along the cached next-edge
    /// pointers. Called after edge estimates change without any topology
    /// change (bootstrap assignment, optimization).
    pub fn refresh_numeric_around<S: SensorModel<Pose = P>>(
        &mut self,
        state: &RbaState<S>,
        seeds: &[KeyframeId],
    ) -> Result<(), RbaError> {
        let mut sources: HashSet<KeyframeId> = HashSet::new();
        for &seed in seeds {
            sources.insert(seed);
            if let Some(entries) = self.sym.get(&seed) {
                sources.extend(entries.keys().copied());
            }
        }
        for src in sources {
            self.refresh_numeric_for(state, src)?;
        }
        Ok(())
    }

    fn refresh_numeric_for<S: SensorModel<Pose = P>>(
        &mut self,
        state: &RbaState<S>,
        src: KeyframeId,
    ) -> Result<(), RbaError> {
        let Some(entries) = self.sym.get(&src) else {
            self.num.remove(&src);
            return Ok(());
        };
        let mut poses = BTreeMap::new();
        for (&dst, entry) in entries {
            let mut pose = P::identity();
            let mut cur = src;
            let mut hops = 0usize;
            while cur != dst {
                hops += 1;
                if hops > entry.distance {
                    return Err(RbaError::SpanningTreeInvariant { src, dst });
                }
                let step = self
                    .sym
                    .get(&cur)
                    .and_then(|m| m.get(&dst))
                    .ok_or(RbaError::SpanningTreeInvariant { src, dst })?;
                let edge = state.edge(step.next_edge);
                // Crossing from -> to applies the inverse of inv_pose,
                // to -> from applies it directly.
                let hop_pose = if cur == edge.from {
                    edge.inv_pose.inverse()
                } else {
                    edge.inv_pose
                };
                pose = pose.compose(&hop_pose);
                cur = edge.other_endpoint(cur);
            }
            poses.insert(dst, pose);
        }
        self.num.insert(src, poses);
        Ok(())
    }
}

/// Bounded BFS from `src`, settling nodes in order of (distance, first-edge
/// ID) so that equal-distance ties resolve to the lowest first-edge ID.
fn build_symbolic<S: SensorModel>(
    state: &RbaState<S>,
    src: KeyframeId,
    max_depth: usize,
) -> BTreeMap<KeyframeId, SpanTreeEntry> {
    let mut settled: BTreeMap<KeyframeId, SpanTreeEntry> = BTreeMap::new();
    let mut heap: BinaryHeap<Reverse<(usize, EdgeId, KeyframeId)>> = BinaryHeap::new();

    let Ok(root) = state.keyframe(src) else {
        return settled;
    };
    for &e in &root.adjacent_k2k {
        let other = state.edge(e).other_endpoint(src);
        heap.push(Reverse((1, e, other)));
    }

    while let Some(Reverse((dist, first_edge, node))) = heap.pop() {
        if node == src || settled.contains_key(&node) {
            continue;
        }
        settled.insert(
            node,
            SpanTreeEntry {
                distance: dist,
                next_edge: first_edge,
            },
        );
        if dist < max_depth {
            let kf = match state.keyframe(node) {
                Ok(kf) => kf,
                Err(_) => continue,
            };
            for &e in &kf.adjacent_k2k {
                let other = state.edge(e).other_endpoint(node);
                if other != src && !settled.contains_key(&other) {
                    heap.push(Reverse((dist + 1, first_edge, other)));
                }
            }
        }
    }
    settled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pose::{Pose2, pose_discrepancy};
    use crate::sensors::RelativePose2D;
    use approx::assert_relative_eq;

    type State = RbaState<RelativePose2D>;

    /// Chain 0-1-2-3-4 with unit forward motion: edge (i, i+1) stores the
    /// pose of i in the frame of i+1, i.e. (-1, 0, 0).
    fn chain(n: usize) -> State {
        let mut st = State::new();
        for _ in 0..n {
            st.insert_keyframe();
        }
        for i in 0..n - 1 {
            st.create_kf2kf_edge(i as u64, i as u64 + 1, Some(Pose2::new(-1.0, 0.0, 0.0)))
                .unwrap();
        }
        st
    }

    #[test]
    fn test_distances_bounded_by_depth() {
        let st = chain(6);
        let mut trees = SpanningTrees::new();
        trees.rebuild_all(&st, 3).unwrap();

        assert_eq!(trees.distance(0, 1), Some(1));
        assert_eq!(trees.distance(0, 3), Some(3));
        assert_eq!(trees.distance(0, 4), None);
        assert_eq!(trees.distance(2, 5), Some(3));
        assert_eq!(trees.distance(4, 4), Some(0));
    }

    #[test]
    fn test_numeric_composition_along_chain() {
        let st = chain(5);
        let mut trees = SpanningTrees::new();
        trees.rebuild_all(&st, 4).unwrap();

        // Pose of KF 3 in the frame of KF 0: three steps forward.
        let p = trees.relative_pose(3, 0).unwrap();
        assert_relative_eq!(p.x, 3.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-12);

        // And the reverse direction composes to the inverse.
        let q = trees.relative_pose(0, 3).unwrap();
        let (dt, dr) = pose_discrepancy(&p.compose(&q), &Pose2::identity());
        assert!(dt < 1e-12 && dr < 1e-12);
    }

    #[test]
    fn test_next_edge_is_first_hop() {
        let st = chain(4);
        let mut trees = SpanningTrees::new();
        trees.rebuild_all(&st, 3).unwrap();

        let entries = trees.reachable_from(0).unwrap();
        // Toward any destination, the first hop from KF 0 is edge 0.
        for entry in entries.values() {
            assert_eq!(entry.next_edge, 0);
        }
        let from_two = trees.reachable_from(2).unwrap();
        assert_eq!(from_two.get(&0).unwrap().next_edge, 1);
        assert_eq!(from_two.get(&3).unwrap().next_edge, 2);
    }

    #[test]
    fn test_tie_break_prefers_lowest_edge_id() {
        // Diamond: 0-1, 0-2, 1-3, 2-3. Two shortest paths 0->3; the one
        // through edge 0 (via KF 1) must win.
        let mut st = State::new();
        for _ in 0..4 {
            st.insert_keyframe();
        }
        st.create_kf2kf_edge(0, 1, None).unwrap(); // edge 0
        st.create_kf2kf_edge(0, 2, None).unwrap(); // edge 1
        st.create_kf2kf_edge(1, 3, None).unwrap(); // edge 2
        st.create_kf2kf_edge(2, 3, None).unwrap(); // edge 3

        let mut trees = SpanningTrees::new();
        trees.rebuild_all(&st, 4).unwrap();

        let entry = trees.reachable_from(0).unwrap().get(&3).unwrap();
        assert_eq!(entry.distance, 2);
        assert_eq!(entry.next_edge, 0);
    }

    #[test]
    fn test_rebuild_around_covers_ball() {
        let mut st = chain(5);
        let mut trees = SpanningTrees::new();
        trees.rebuild_all(&st, 2).unwrap();
        assert_eq!(trees.distance(0, 4), None);

        // Close the loop 4-0: distances through the new edge appear for all
        // sources within the rebuild ball.
        st.create_kf2kf_edge(4, 0, Some(Pose2::new(4.0, 0.0, 0.0)))
            .unwrap();
        trees.rebuild_around(&st, &[4, 0], 2).unwrap();

        assert_eq!(trees.distance(0, 4), Some(1));
        assert_eq!(trees.distance(1, 4), Some(2));
        assert_eq!(trees.distance(3, 0), Some(2));
    }

    #[test]
    fn test_path_directions() {
        let st = chain(4);
        let mut trees = SpanningTrees::new();
        trees.rebuild_all(&st, 3).unwrap();

        // 0 -> 2 crosses edges 0 and 1 forward (from -> to).
        let path = trees.path(&st, 0, 2).unwrap();
        assert_eq!(path, vec![(0, true), (1, true)]);

        // 2 -> 0 crosses them backward.
        let path = trees.path(&st, 2, 0).unwrap();
        assert_eq!(path, vec![(1, false), (0, false)]);
    }

    #[test]
    fn test_refresh_numeric_tracks_new_estimates() {
        let mut st = chain(3);
        let mut trees = SpanningTrees::new();
        trees.rebuild_all(&st, 2).unwrap();
        assert_relative_eq!(trees.relative_pose(2, 0).unwrap().x, 2.0, epsilon = 1e-12);

        st.edge_mut(1).inv_pose = Pose2::new(-2.0, 0.0, 0.0);
        trees.refresh_numeric_around(&st, &[1, 2]).unwrap();
        assert_relative_eq!(trees.relative_pose(2, 0).unwrap().x, 3.0, epsilon = 1e-12);
    }
}
