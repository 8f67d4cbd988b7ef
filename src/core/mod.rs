//! Foundation layer: identifier types, angle math and pose algebra.

pub mod ids;
pub mod math;
pub mod pose;

pub use ids::{EdgeId, KeyframeId, LandmarkId, ObsIndex};
pub use pose::{pose_discrepancy, Point2, Pose, Pose2, Pose3};
