//! # Arm library.
//!
//! This library allows other crates in the workspace, and the benchmarks, to
//! access items defined inside the arm crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Arm control module - converts tool tip poses into joint demands and runs the control loop
pub mod arm_ctrl;

/// Mechanisms - actuator and sensor capabilities, the device registry and the simulated arm
pub mod mech;
