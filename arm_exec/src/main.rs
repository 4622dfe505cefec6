//! Main arm-side executable entry point.
//!
//! # Architecture
//!
//! The executable runs the arm controller against the simulated arm:
//!
//!     - Initialise the session, logging and parameters
//!     - Build the simulated arm and register its devices
//!     - Start the periodic control task
//!     - Master the arm in its mastering pose
//!     - Drive through each configured waypoint, waiting for arrival
//!     - Stow the arm, stop the control task and save the final status
//!
//! All arm motion is performed by the control task, this thread only makes
//! requests of the `ArmCtrl` supervisor and polls it for arrival.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, error, info, warn};
use std::thread;
use std::time::{Duration, Instant};
use color_eyre::{Report, eyre::{WrapErr, eyre}};

// Internal
use arm_lib::{
    arm_ctrl::{self, ArmCtrl, ProfileMode},
    mech::{DeviceRegistry, JointId, NUM_JOINTS, sim::SimArm}
};
use params::ArmExecParams;
use util::{
    logger::{logger_init, LevelFilter},
    scheduler::SystemClock,
    session::Session,
    time::period_to_hz
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Targets whose per-cycle output is kept out of the log.
const QUIET_TARGETS: [&str; 2] = [
    "arm_lib::arm_ctrl::control_loop",
    "arm_lib::arm_ctrl::profiler"
];

/// Number of control cycles to wait in the mastering pose before reading the
/// joint values.
const MASTERING_SETTLE_CYCLES: u32 = 5;

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {

    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new(
        "arm_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &QUIET_TARGETS, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Robotic Arm Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let arm_params: arm_ctrl::Params = util::params::load(
        "arm_ctrl.toml"
    ).wrap_err("Could not load arm control params")?;

    let exec_params: ArmExecParams = util::params::load(
        "arm_exec.toml"
    ).wrap_err("Could not load exec params")?;

    info!("Parameters loaded");

    // ---- INITIALISE ARM ----

    let sim = SimArm::new(
        arm_params.sim_config(exec_params.sim_pot_zero_counts),
        exec_params.sim_initial_deg,
        arm_params.cycle_period_s
    );

    let mut registry = DeviceRegistry::new();
    let joints = sim.register(&mut registry);

    let cycle_period = Duration::from_secs_f64(arm_params.cycle_period_s);
    let control_hz = period_to_hz(arm_params.cycle_period_s);

    let (mut arm, driver) = ArmCtrl::new(arm_params, registry, joints)
        .wrap_err("Failed to initialise ArmCtrl")?;

    arm.start_profiler_task(driver, SystemClock::new())
        .wrap_err("Failed to start the control task")?;

    info!("Control task running at {:.1} Hz\n", control_hz);

    // ---- MASTERING ----

    arm.enter_mastering_mode()
        .wrap_err("Could not enter mastering mode")?;

    // The simulated arm is already in the mastering pose, just wait for the
    // control task to read it.
    thread::sleep(cycle_period * MASTERING_SETTLE_CYCLES);

    let mut raw = [0i32; NUM_JOINTS];
    for joint in JointId::arm_ids().iter() {
        raw[joint.index()] = arm.joint_value(*joint)?;
        debug!("{} mastering value: {}", joint, raw[joint.index()]);
    }

    arm.set_mastering_values(raw)
        .wrap_err("Mastering failed")?;

    thread::sleep(cycle_period * MASTERING_SETTLE_CYCLES);

    info!("Arm mastered, at {:?}\n", arm.get_position()?);

    // ---- PROFILE SETUP ----

    let offset = exec_params.tool_offset;
    arm.set_tool_tip_offset(offset.dr, offset.dp, offset.dz)?;
    arm.set_profile_acceleration(exec_params.profile_accel)
        .wrap_err("Invalid profile acceleration")?;

    info!(
        "Profile velocity {:?}, filter lengths {:?}",
        arm.velocity(),
        arm.filter_lens()
    );

    // ---- WAYPOINTS ----

    let timeout = Duration::from_secs_f64(exec_params.arrival_timeout_s);
    let poll_period = Duration::from_secs_f64(exec_params.poll_period_s);

    for (i, wp) in exec_params.waypoints.iter().enumerate() {
        info!("Waypoint {}: {:?} move to {:?}", i, wp.mode, wp.pose);

        let result = match wp.mode {
            ProfileMode::Linear => arm.move_linear(wp.pose),
            ProfileMode::Joint => arm.move_joint(wp.pose)
        };

        // Unreachable waypoints are skipped, the arm hasn't moved
        if let Err(e) = result {
            warn!("Waypoint {} rejected: {}", i, e);
            continue;
        }

        wait_for_arrival(&arm, timeout, poll_period)
            .wrap_err_with(|| format!("Waypoint {} not reached", i))?;

        info!("Waypoint {} reached, at {:?}", i, arm.get_position()?);
    }

    // ---- SHUTDOWN ----

    info!("Stowing arm");
    arm.stow()?;
    wait_for_arrival(&arm, timeout, poll_period)
        .wrap_err("Stow not reached")?;

    arm.stop_profiler_task()
        .wrap_err("Failed to stop the control task")?;

    let status = arm.status()?;
    session.save("final_status.json", &status)
        .wrap_err("Failed to save the final status")?;

    info!("End of execution");

    Ok(())
}

/// Poll the arm until the current move arrives.
///
/// The arm is emergency stopped if the move does not arrive within `timeout`.
fn wait_for_arrival(
    arm: &ArmCtrl,
    timeout: Duration,
    poll_period: Duration
) -> Result<(), Report> {

    let start = Instant::now();

    while !arm.position_arrived() {
        if arm.is_estopped() {
            return Err(eyre!("The arm was emergency stopped"));
        }

        if start.elapsed() > timeout {
            error!("Move timed out after {:.2} s", timeout.as_secs_f64());
            arm.emergency_stop();
            return Err(eyre!("Timed out waiting for arrival"));
        }

        thread::sleep(poll_period);
    }

    debug!("Arrived after {:.3} s", start.elapsed().as_secs_f64());

    Ok(())
}
