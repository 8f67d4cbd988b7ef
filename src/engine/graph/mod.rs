//! Graph state, spanning-tree caches and export.

pub mod export;
pub mod spanning_tree;
pub mod state;

pub use export::{
    graph_as_dot, save_graph_as_dot, save_graph_top_structure_as_dot, top_structure_as_dot,
};
pub use spanning_tree::{SpanTreeEntry, SpanningTrees};
pub use state::{DegreeStats, K2kEdge, Keyframe, LandmarkEntry, Observation, RbaState, StateSnapshot};
