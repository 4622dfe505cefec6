//! # Arm Executable Parameters
//!
//! This module provide parameters for the arm executable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Serialize, Deserialize};

use arm_lib::{
    arm_ctrl::{Pose, ProfileMode, ToolOffset},
    mech::NUM_JOINTS
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
pub struct ArmExecParams {

    /// Potentiometer reading of each simulated joint at zero degrees
    pub sim_pot_zero_counts: [i32; NUM_JOINTS],

    /// Angles the simulated arm starts at, which should be the mastering pose
    pub sim_initial_deg: [f64; NUM_JOINTS],

    /// Offset of the tool tip fitted to the arm
    pub tool_offset: ToolOffset,

    /// Linear acceleration of the profile, arm linear units/second^2
    pub profile_accel: f64,

    /// Maximum time to wait for a move to arrive, seconds
    pub arrival_timeout_s: f64,

    /// Period at which the arm is polled while waiting, seconds
    pub poll_period_s: f64,

    /// Moves to make, in order
    pub waypoints: Vec<Waypoint>
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct Waypoint {
    pub mode: ProfileMode,
    pub pose: Pose
}
