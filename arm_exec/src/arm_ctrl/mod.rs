//! Arm control module
//!
//! Converts tool tip poses into joint demands for the four joint arm, profiles
//! motion between poses, fuses the two angle sensors on each joint, and runs
//! the closed loop control cycle. [`ArmCtrl`] is the interface used by the
//! rest of the software, [`ArmDriver`] is the periodic task it runs.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod arm_config;
mod control_loop;
mod driver;
mod estimator;
mod kinematics;
mod mastering;
mod params;
mod profiler;
mod ring_filter;
mod shared;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::fmt;
use std::sync::PoisonError;

// Internal
pub use arm_config::*;
pub use control_loop::{ControlLoop, LoopInput, StatusReport};
pub use driver::ArmDriver;
pub use estimator::{AngleEstimator, Calibration, JointCalibration};
pub use kinematics::Kinematics;
pub use mastering::MasteringCalibrator;
pub use params::*;
pub use profiler::{MotionProfiler, MotionTarget, ProfileMode, ProfileVelocity};
pub use ring_filter::{RingFilter, FILTER_MAX_LEN, FILTER_MIN_LEN};
pub use shared::PendingChanges;
pub use state::*;

use crate::mech::{JointId, MechError};
use util::scheduler::JobError;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A raw mastering reading outside of its expected range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasteringViolation {
    pub joint: JointId,
    pub raw: i32,
    pub min: i32,
    pub max: i32,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during ArmCtrl operation.
#[derive(Debug, thiserror::Error)]
pub enum ArmCtrlError {
    #[error(
        "Pose is out of reach: wrist distance {distance:.4} is outside [{min:.4}, {max:.4}]"
    )]
    OutOfReach { distance: f64, min: f64, max: f64 },

    #[error("{joint} angle of {angle_deg:.3} deg is outside its range [{min_deg}, {max_deg}]")]
    JointLimit {
        joint: JointId,
        angle_deg: f64,
        min_deg: f64,
        max_deg: f64,
    },

    #[error("Filter length {0} is outside of the allowed range [1, 1000]")]
    InvalidFilterLength(usize),

    #[error("Profile velocity must be positive and finite, found {0}")]
    InvalidVelocity(f64),

    #[error("Profile acceleration must be positive and finite, found {0}")]
    InvalidAcceleration(f64),

    #[error("Mastering aborted, {} reading(s) out of range: {}", .0.len(), ViolationList(.0))]
    MasteringOutOfRange(Vec<MasteringViolation>),

    #[error("The arm is emergency stopped")]
    EmergencyStopped,

    #[error("The arm has not been mastered")]
    NotMastered,

    #[error("Cannot {operation} while the arm is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ArmState,
    },

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("The profiler task is already running")]
    ProfilerRunning,

    #[error("Sync primitive is poisoned")]
    PoisonError,

    #[error("Device error: {0}")]
    Mech(#[from] MechError),

    #[error("Profiler task error: {0}")]
    Job(#[from] JobError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<T> From<PoisonError<T>> for ArmCtrlError {
    fn from(_: PoisonError<T>) -> Self {
        ArmCtrlError::PoisonError
    }
}

impl fmt::Display for MasteringViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} read {} (expected [{}, {}])",
            self.joint, self.raw, self.min, self.max
        )
    }
}

struct ViolationList<'a>(&'a [MasteringViolation]);

impl<'a> fmt::Display for ViolationList<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TEST HELPERS
// ---------------------------------------------------------------------------

/// Parameters shipped with the software, used throughout the tests.
#[cfg(test)]
pub(crate) fn test_params() -> Params {
    util::params::parse(include_str!("../../../params/arm_ctrl.toml")).unwrap()
}
