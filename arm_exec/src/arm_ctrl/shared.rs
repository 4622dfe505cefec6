//! State shared between the supervisor and the control loop
//!
//! The supervisor only ever writes requests into [`PendingChanges`] under the
//! inner lock. The control loop takes the whole set at the start of a cycle,
//! so it always sees a complete snapshot of every request made since the
//! previous cycle.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::{atomic::AtomicBool, Mutex, RwLock};

use super::{ArmState, Calibration, MotionTarget, ProfileVelocity, StatusReport, ToolOffset};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub(crate) struct Shared {
    /// Emergency stop flag, readable without taking any lock.
    pub estop: AtomicBool,

    pub inner: Mutex<Inner>,

    /// Report from the most recent control cycle.
    pub status: RwLock<StatusReport>,
}

pub(crate) struct Inner {
    pub state: ArmState,
    pub has_master_values: bool,

    /// Sequence number of the most recently accepted move.
    pub move_seq: u64,

    pub pending: PendingChanges,
}

/// Requests made since the last control cycle.
#[derive(Debug, Clone, Default)]
pub struct PendingChanges {
    pub target: Option<MotionTarget>,
    pub filter_lens: Option<(usize, usize)>,
    pub velocity: Option<ProfileVelocity>,
    pub tool_offset: Option<ToolOffset>,
    pub calibration: Option<Calibration>,

    /// Abandon any motion and clear the controller's integrators.
    pub reset: bool,

    /// Let the joints coast while idle so the arm can be moved by hand.
    pub release: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Shared {
    pub fn new() -> Self {
        Self {
            estop: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                state: ArmState::Uninitialized,
                has_master_values: false,
                move_seq: 0,
                pending: PendingChanges::default(),
            }),
            status: RwLock::new(StatusReport::default()),
        }
    }
}
