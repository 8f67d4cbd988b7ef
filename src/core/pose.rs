//! Pose algebra for SE(2) and SE(3).
//!
//! All relative poses in the engine obey one convention: a value written
//! `P(x, y)` is "the pose of frame `x` expressed in frame `y`", and poses
//! chain as `P(x, z) = P(y, z) ∘ P(x, y)`. Composition with the inverse
//! satisfies `(A ∘ B) ∘ B⁻¹ = A`.
//!
//! [`Pose2`] is a hand-rolled `{x, y, theta}` transform; [`Pose3`] wraps a
//! translation plus unit quaternion from `nalgebra`.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::core::math::normalize_angle;

/// A rigid transform usable as a keyframe-to-keyframe or sensor pose.
///
/// `retract` applies a small increment expressed in the local tangent space
/// (right multiplication); it is what the optimizer perturbs and updates.
pub trait Pose: Copy + Clone + Debug + PartialEq + Default + 'static {
    /// Degrees of freedom (3 for SE(2), 6 for SE(3)).
    const DOF: usize;

    /// The identity transform.
    fn identity() -> Self;

    /// Compose two poses: `self ∘ other`.
    fn compose(&self, other: &Self) -> Self;

    /// Inverse transform.
    fn inverse(&self) -> Self;

    /// Apply a tangent-space increment: `self ∘ exp(delta)`.
    ///
    /// `delta` must have length `DOF`.
    fn retract(&self, delta: &[f64]) -> Self;

    /// Euclidean norm of the translation part.
    fn translation_norm(&self) -> f64;

    /// Magnitude of the rotation part in radians.
    fn rotation_magnitude(&self) -> f64;
}

/// A 2D point in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    /// X coordinate in meters
    pub x: f64,
    /// Y coordinate in meters
    pub y: f64,
}

impl Point2 {
    /// Create a new point.
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared distance to another point (avoids sqrt).
    #[inline]
    pub fn distance_squared(&self, other: &Point2) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(&self, other: &Point2) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// A rigid transform on the plane: position (x, y) in meters and heading
/// theta in radians, normalized to [-π, π].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose2 {
    /// X translation in meters
    pub x: f64,
    /// Y translation in meters
    pub y: f64,
    /// Rotation in radians, normalized to [-π, π]
    pub theta: f64,
}

impl Pose2 {
    /// Create a new pose with theta normalized to [-π, π].
    #[inline]
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self {
            x,
            y,
            theta: normalize_angle(theta),
        }
    }

    /// Transform a point from this pose's local frame to the outer frame.
    #[inline]
    pub fn transform_point(&self, point: &Point2) -> Point2 {
        let (sin_t, cos_t) = self.theta.sin_cos();
        Point2::new(
            self.x + point.x * cos_t - point.y * sin_t,
            self.y + point.x * sin_t + point.y * cos_t,
        )
    }
}

impl Default for Pose2 {
    fn default() -> Self {
        <Self as Pose>::identity()
    }
}

impl Pose for Pose2 {
    const DOF: usize = 3;

    #[inline]
    fn identity() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            theta: 0.0,
        }
    }

    /// Compose two poses: self ∘ other
    ///
    /// ```text
    /// C = A ∘ B:
    ///   C.x = A.x + B.x * cos(A.θ) - B.y * sin(A.θ)
    ///   C.y = A.y + B.x * sin(A.θ) + B.y * cos(A.θ)
    ///   C.θ = normalize(A.θ + B.θ)
    /// ```
    #[inline]
    fn compose(&self, other: &Pose2) -> Pose2 {
        let (sin_t, cos_t) = self.theta.sin_cos();
        Pose2::new(
            self.x + other.x * cos_t - other.y * sin_t,
            self.y + other.x * sin_t + other.y * cos_t,
            self.theta + other.theta,
        )
    }

    /// Inverse of this pose.
    ///
    /// ```text
    /// A⁻¹:
    ///   x = -A.x * cos(A.θ) - A.y * sin(A.θ)
    ///   y =  A.x * sin(A.θ) - A.y * cos(A.θ)
    ///   θ = -A.θ
    /// ```
    #[inline]
    fn inverse(&self) -> Pose2 {
        let (sin_t, cos_t) = self.theta.sin_cos();
        Pose2::new(
            -self.x * cos_t - self.y * sin_t,
            self.x * sin_t - self.y * cos_t,
            -self.theta,
        )
    }

    #[inline]
    fn retract(&self, delta: &[f64]) -> Pose2 {
        debug_assert_eq!(delta.len(), Self::DOF);
        self.compose(&Pose2::new(delta[0], delta[1], delta[2]))
    }

    #[inline]
    fn translation_norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    #[inline]
    fn rotation_magnitude(&self) -> f64 {
        self.theta.abs()
    }
}

/// A rigid transform in 3D space: translation plus unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose3 {
    /// Translation in meters.
    pub translation: Vector3<f64>,
    /// Rotation as a unit quaternion.
    pub rotation: UnitQuaternion<f64>,
}

impl Pose3 {
    /// Create a pose from a translation and rotation.
    #[inline]
    pub fn new(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// Create a pose from translation components and yaw/pitch/roll Euler
    /// angles (Z-Y-X convention, radians).
    pub fn from_xyz_ypr(x: f64, y: f64, z: f64, yaw: f64, pitch: f64, roll: f64) -> Self {
        Self {
            translation: Vector3::new(x, y, z),
            rotation: UnitQuaternion::from_euler_angles(roll, pitch, yaw),
        }
    }

    /// Transform a point from this pose's local frame to the outer frame.
    #[inline]
    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * point + self.translation
    }
}

impl Default for Pose3 {
    fn default() -> Self {
        <Self as Pose>::identity()
    }
}

impl Pose for Pose3 {
    const DOF: usize = 6;

    #[inline]
    fn identity() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }

    #[inline]
    fn compose(&self, other: &Pose3) -> Pose3 {
        Pose3 {
            translation: self.translation + self.rotation * other.translation,
            rotation: self.rotation * other.rotation,
        }
    }

    #[inline]
    fn inverse(&self) -> Pose3 {
        let inv_rot = self.rotation.inverse();
        Pose3 {
            translation: -(inv_rot * self.translation),
            rotation: inv_rot,
        }
    }

    #[inline]
    fn retract(&self, delta: &[f64]) -> Pose3 {
        debug_assert_eq!(delta.len(), Self::DOF);
        let inc = Pose3 {
            translation: Vector3::new(delta[0], delta[1], delta[2]),
            rotation: UnitQuaternion::from_scaled_axis(Vector3::new(delta[3], delta[4], delta[5])),
        };
        self.compose(&inc)
    }

    #[inline]
    fn translation_norm(&self) -> f64 {
        self.translation.norm()
    }

    #[inline]
    fn rotation_magnitude(&self) -> f64 {
        self.rotation.angle()
    }
}

/// Magnitude of the discrepancy between two poses, as the pair
/// (translation norm, rotation magnitude) of `a ∘ b⁻¹`.
pub fn pose_discrepancy<P: Pose>(a: &P, b: &P) -> (f64, f64) {
    let d = a.compose(&b.inverse());
    (d.translation_norm(), d.rotation_magnitude())
}
