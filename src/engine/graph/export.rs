//! Graph export in Graphviz DOT format.
//!
//! Two views: the full map (keyframes, kf2kf edges, optionally landmarks
//! with their base-frame arrows and dotted observation arrows) and the
//! high-level structure (only keyframes with two or more kf2kf edges, the
//! skeleton connecting submaps).

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use crate::engine::graph::state::RbaState;
use crate::sensors::SensorModel;

/// Render the map as a directed graph in DOT format.
///
/// Keyframes are filled boxes and kf2kf edges bold arrows `from -> to`.
/// With `all_landmarks`, landmarks appear as triangles (gray when the
/// relative position is known, white when unknown) with an arrow from the
/// base keyframe, plus dotted observation arrows.
pub fn graph_as_dot<S: SensorModel>(state: &RbaState<S>, all_landmarks: bool) -> String {
    let mut f = String::new();
    f.push_str("digraph G {\n");

    if !state.is_empty() {
        f.push_str("/* KEYFRAMES */\n");
        f.push_str("node [shape=box,style=filled];\n");
        for kf in state.keyframes() {
            let _ = write!(f, "{}; ", kf.id);
        }
        f.push('\n');

        f.push_str("/* KEYFRAME->KEYFRAME edges */\n");
        f.push_str("edge [style=bold];\n");
        for edge in state.edges() {
            let _ = writeln!(f, "{}->{};", edge.from, edge.to);
        }

        if all_landmarks {
            f.push_str("/* LANDMARKS with known relative position, and their base keyframe */\n");
            f.push_str("node [shape=triangle,style=filled,fillcolor=gray80];\n");
            f.push_str("edge [style=bold,color=black];\n");
            for lm in state.known_landmarks() {
                let _ = write!(f, "{} -> L{}; ", lm.base_kf, lm.id);
            }
            f.push('\n');

            f.push_str("/* LANDMARKS with unknown relative position */\n");
            f.push_str("node [shape=triangle,style=filled,fillcolor=white];\n");
            f.push_str("edge [style=solid,color=gray20];\n");
            for lm in state.unknown_landmarks() {
                let _ = write!(f, "{} -> L{}; ", lm.base_kf, lm.id);
            }
            f.push('\n');

            f.push_str("/* OBSERVATIONS */\n");
            f.push_str("edge [style=dotted,color=black];\n");
            for obs in state.observations() {
                let _ = writeln!(f, "{} -> L{};", obs.kf, obs.feat_id);
            }
            f.push('\n');
        }
    }

    f.push_str("\n}\n");
    f
}

/// Write [`graph_as_dot`] output to a file.
pub fn save_graph_as_dot<S: SensorModel>(
    state: &RbaState<S>,
    path: &Path,
    all_landmarks: bool,
) -> io::Result<()> {
    fs::write(path, graph_as_dot(state, all_landmarks))
}

/// Render the high-level structure of the map as an undirected DOT graph:
/// only keyframes adjacent to at least two kf2kf edges, and the edges
/// between them.
pub fn top_structure_as_dot<S: SensorModel>(state: &RbaState<S>) -> String {
    let mut f = String::new();
    f.push_str("graph G {\n");

    if !state.is_empty() {
        let well_connected =
            |id: u64| state.keyframes()[id as usize].adjacent_k2k.len() >= 2;

        f.push_str("/* KEYFRAMES */\n");
        f.push_str("node [shape=box,style=filled];\n");
        for kf in state.keyframes() {
            if kf.adjacent_k2k.len() >= 2 {
                let _ = write!(f, "{}; ", kf.id);
            }
        }
        f.push('\n');

        f.push_str("/* KEYFRAME->KEYFRAME edges */\n");
        f.push_str("edge [style=bold];\n");
        for edge in state.edges() {
            if well_connected(edge.from) && well_connected(edge.to) {
                let _ = writeln!(f, "{}--{};", edge.from, edge.to);
            }
        }
    }

    f.push_str("\n}\n");
    f
}

/// Write [`top_structure_as_dot`] output to a file.
pub fn save_graph_top_structure_as_dot<S: SensorModel>(
    state: &RbaState<S>,
    path: &Path,
) -> io::Result<()> {
    fs::write(path, top_structure_as_dot(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pose::{Pose, Pose2};
    use crate::sensors::RelativePose2D;

    fn sample_state() -> RbaState<RelativePose2D> {
        let mut st = RbaState::new();
        let a = st.insert_keyframe();
        let b = st.insert_keyframe();
        let c = st.insert_keyframe();
        st.create_kf2kf_edge(a, b, None).unwrap();
        st.create_kf2kf_edge(b, c, None).unwrap();
        st.register_landmark(0, a, true, Pose2::identity()).unwrap();
        st.register_landmark(7, b, false, Pose2::identity()).unwrap();
        st.insert_observation(a, 0, Pose2::identity(), true).unwrap();
        st.insert_observation(b, 7, Pose2::identity(), false).unwrap();
        st
    }

    #[test]
    fn test_dot_lists_keyframes_and_edges() {
        let dot = graph_as_dot(&sample_state(), false);
        assert!(dot.starts_with("digraph G {"));
        assert!(dot.contains("0; 1; 2;"));
        assert!(dot.contains("0->1;"));
        assert!(dot.contains("1->2;"));
        assert!(!dot.contains("L0"));
    }

    #[test]
    fn test_dot_with_landmarks() {
        let dot = graph_as_dot(&sample_state(), true);
        assert!(dot.contains("0 -> L0;"));
        assert!(dot.contains("1 -> L7;"));
        assert!(dot.contains("fillcolor=gray80"));
        assert!(dot.contains("fillcolor=white"));
        assert!(dot.contains("style=dotted"));
    }

    #[test]
    fn test_top_structure_keeps_well_connected_only() {
        let dot = top_structure_as_dot(&sample_state());
        // Only KF 1 has two edges; no edge has both endpoints qualified.
        assert!(dot.contains("1;"));
        assert!(!dot.contains("0--1;"));
        assert!(!dot.contains("1--2;"));
    }

    #[test]
    fn test_empty_state_valid_dot() {
        let st: RbaState<RelativePose2D> = RbaState::new();
        let dot = graph_as_dot(&st, true);
        assert!(dot.starts_with("digraph G {"));
        assert!(dot.ends_with("}\n"));
    }
}
