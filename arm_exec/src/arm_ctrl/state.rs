//! # Arm supervisor
//!
//! [`ArmCtrl`] is the interface to the arm used by the rest of the software.
//! Every request is validated on the caller's thread and, once accepted, is
//! handed to the control loop through the shared pending changes. None of the
//! functions here wait on the control loop.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{atomic::Ordering, Arc, MutexGuard};
use std::time::Duration;

// Internal
use super::shared::{Inner, Shared};
use super::*;
use crate::mech::{DeviceRegistry, JointDevices, JointId, NUM_JOINTS};
use util::scheduler::{Clock, PeriodicJob};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Name of the control loop's periodic job.
const JOB_NAME: &str = "arm_ctrl";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Arm supervisor.
pub struct ArmCtrl {
    params: Params,

    /// Kinematics used to validate requests, kept in step with the control
    /// loop's copy.
    kinematics: Kinematics,

    calibrator: MasteringCalibrator,

    shared: Arc<Shared>,

    job: Option<PeriodicJob<ArmDriver>>,

    /// Tool angle used by the moves which only give a position.
    ///
    /// Units: degrees
    tool_angle_deg: f64,

    /// Origin of relative positions.
    relative_origin: Pose,

    velocity: ProfileVelocity,

    filter_lens: (usize, usize),
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Operating state of the arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArmState {
    /// No calibration has been made, the joints are left to coast.
    Uninitialized,

    /// The arm is being positioned by hand for mastering.
    Mastering,

    /// Calibrated and holding position.
    Idle,

    /// Following a motion profile.
    Profiling,

    /// Arrived at the target of the last move and holding position.
    Settled,

    /// Stopped after an emergency stop or a control fault, cleared only by
    /// `reset_emergency_stop`.
    EmergencyStopped,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for ArmState {
    fn default() -> Self {
        ArmState::Uninitialized
    }
}

impl ArmCtrl {
    /// Create a new arm supervisor and the control task which drives the
    /// given joints.
    ///
    /// The task does nothing until it is either passed to
    /// `start_profiler_task` or ticked directly.
    pub fn new(
        params: Params,
        registry: DeviceRegistry,
        joints: [JointDevices; NUM_JOINTS],
    ) -> Result<(Self, ArmDriver), ArmCtrlError> {
        params.validate()?;
        registry.validate(&joints)?;

        let shared = Arc::new(Shared::new());
        let ctrl = ControlLoop::new(&params)?;
        let driver = ArmDriver::new(ctrl, registry, joints, shared.clone());

        let arm = Self {
            kinematics: Kinematics::new(params.geometry),
            calibrator: MasteringCalibrator::new(&params),
            shared,
            job: None,
            tool_angle_deg: 0.0,
            relative_origin: Pose::default(),
            velocity: ProfileVelocity {
                linear: params.linear_vel,
                angular_degs: params.angular_vel_degs,
                joint_degs: params.joint_vel_degs,
            },
            filter_lens: (params.vel_filter_len, params.acc_filter_len),
            params,
        };

        info!("ArmCtrl created");

        Ok((arm, driver))
    }

    // ---- CONTROL TASK ----

    /// Start running the control task periodically on its own thread.
    pub fn start_profiler_task<C: Clock>(
        &mut self,
        driver: ArmDriver,
        clock: C,
    ) -> Result<(), ArmCtrlError> {
        if self.job.is_some() {
            return Err(ArmCtrlError::ProfilerRunning);
        }

        if !driver.is_driven_by(&self.shared) {
            return Err(ArmCtrlError::InvalidParams(
                "the control task belongs to a different arm".into(),
            ));
        }

        self.job = Some(PeriodicJob::spawn(
            JOB_NAME,
            Duration::from_secs_f64(self.params.cycle_period_s),
            clock,
            driver,
        )?);

        Ok(())
    }

    /// Stop the periodic control task, returning it if it was running.
    pub fn stop_profiler_task(&mut self) -> Result<Option<ArmDriver>, ArmCtrlError> {
        match self.job.take() {
            Some(job) => Ok(Some(job.stop()?)),
            None => Ok(None),
        }
    }

    pub fn is_profiler_task_running(&self) -> bool {
        self.job.is_some()
    }

    // ---- STATE ----

    pub fn state(&self) -> ArmState {
        if self.is_estopped() {
            return ArmState::EmergencyStopped;
        }

        match self.shared.inner.lock() {
            Ok(inner) => inner.state,
            Err(_) => ArmState::EmergencyStopped,
        }
    }

    pub fn has_master_values(&self) -> bool {
        match self.shared.inner.lock() {
            Ok(inner) => inner.has_master_values,
            Err(_) => false,
        }
    }

    /// Report from the most recent control cycle.
    pub fn status(&self) -> Result<StatusReport, ArmCtrlError> {
        Ok(self.shared.status.read()?.clone())
    }

    // ---- MASTERING ----

    /// Stop driving the joints so the arm can be placed in the mastering pose.
    pub fn enter_mastering_mode(&mut self) -> Result<(), ArmCtrlError> {
        let mut inner = self.lock()?;

        match inner.state {
            ArmState::Profiling | ArmState::Settled => {
                return Err(self.invalid_state("enter mastering mode", inner.state))
            }
            ArmState::EmergencyStopped => return Err(ArmCtrlError::EmergencyStopped),
            _ => (),
        }

        info!("ArmState: {:?} -> Mastering", inner.state);
        inner.state = ArmState::Mastering;
        inner.pending.reset = true;

        Ok(())
    }

    /// Raw sensor value of a joint as of the last control cycle.
    pub fn joint_value(&self, joint: JointId) -> Result<i32, ArmCtrlError> {
        Ok(self.shared.status.read()?.sensor_values[joint.index()])
    }

    /// Master the arm from the raw sensor values read in the mastering pose.
    ///
    /// Either every joint is calibrated or, if any value is out of range,
    /// none is. The arm must be in mastering mode, so that the values were
    /// read with the joints released in the mastering pose.
    pub fn set_mastering_values(&mut self, raw: [i32; NUM_JOINTS]) -> Result<(), ArmCtrlError> {
        let mut inner = self.lock()?;

        match inner.state {
            ArmState::Mastering => (),
            ArmState::EmergencyStopped => return Err(ArmCtrlError::EmergencyStopped),
            state => return Err(self.invalid_state("set mastering values", state)),
        }

        let calibration = self.calibrator.calibrate(raw)?;

        inner.pending.calibration = Some(calibration);
        inner.pending.reset = true;
        inner.has_master_values = true;

        info!("ArmState: {:?} -> Idle", inner.state);
        inner.state = ArmState::Idle;

        Ok(())
    }

    // ---- MOVES ----

    /// Move the tool tip in a straight line to `pose`.
    ///
    /// Points along the line are checked for reachability and joint limits
    /// before the move is accepted. Returns the sequence number of the move.
    pub fn move_linear(&mut self, pose: Pose) -> Result<u64, ArmCtrlError> {
        self.check_can_move()?;

        let angles = self.solve(&pose)?;

        if let Some(start) = self.current_pose()? {
            self.check_path(&start, &pose)?;
        }

        self.commit_move(ProfileMode::Linear, pose, angles)
    }

    /// Linear move using the current arm angle.
    pub fn move_linear_xyz(&mut self, x: f64, y: f64, z: f64) -> Result<u64, ArmCtrlError> {
        self.move_linear(Pose::new(x, y, z, self.tool_angle_deg))
    }

    /// Move each joint directly to its angle for `pose`.
    pub fn move_joint(&mut self, pose: Pose) -> Result<u64, ArmCtrlError> {
        self.check_can_move()?;

        let angles = self.solve(&pose)?;

        self.commit_move(ProfileMode::Joint, pose, angles)
    }

    /// Joint move using the current arm angle.
    pub fn move_joint_xyz(&mut self, x: f64, y: f64, z: f64) -> Result<u64, ArmCtrlError> {
        self.move_joint(Pose::new(x, y, z, self.tool_angle_deg))
    }

    /// Move to the stowed joint angles.
    pub fn stow(&mut self) -> Result<u64, ArmCtrlError> {
        self.check_can_move()?;

        let angles = JointAngles::from_array(self.params.stow_deg);
        angles.check_limits(&self.params.min_pos_deg, &self.params.max_pos_deg)?;

        info!("Stowing arm");

        self.commit_move(ProfileMode::Joint, self.kinematics.forward(&angles), angles)
    }

    /// Set the tool angle used by the moves which only give a position.
    pub fn set_arm_angle(&mut self, angle_deg: f64) {
        self.tool_angle_deg = angle_deg;
    }

    // ---- RELATIVE POSITIONS ----

    /// Declare the current position to be `pose` in the relative frame.
    pub fn set_relative_position(&mut self, pose: Pose) -> Result<(), ArmCtrlError> {
        let current = self.get_position()?;
        self.relative_origin = current.relative_to(&pose);

        debug!("Relative origin set to {:?}", self.relative_origin);

        Ok(())
    }

    pub fn set_relative_position_xyz(&mut self, x: f64, y: f64, z: f64) -> Result<(), ArmCtrlError> {
        self.set_relative_position(Pose::new(x, y, z, self.tool_angle_deg))
    }

    /// Linear move to a pose in the relative frame.
    pub fn move_to_relative_position(&mut self, pose: Pose) -> Result<u64, ArmCtrlError> {
        self.move_linear(pose.offset_by(&self.relative_origin))
    }

    pub fn get_relative_position(&self) -> Result<Pose, ArmCtrlError> {
        Ok(self.get_position()?.relative_to(&self.relative_origin))
    }

    // ---- PROFILE SETTINGS ----

    /// Set the tool tip speed and tool angle rate of linear moves.
    pub fn set_profile_velocity(&mut self, linear: f64, angular_degs: f64) -> Result<(), ArmCtrlError> {
        self.update_velocity(ProfileVelocity {
            linear,
            angular_degs,
            ..self.velocity
        })
    }

    pub fn set_linear_move_speed(&mut self, linear: f64) -> Result<(), ArmCtrlError> {
        self.update_velocity(ProfileVelocity {
            linear,
            ..self.velocity
        })
    }

    pub fn set_joint_move_speed(&mut self, joint_degs: f64) -> Result<(), ArmCtrlError> {
        self.update_velocity(ProfileVelocity {
            joint_degs,
            ..self.velocity
        })
    }

    pub fn velocity(&self) -> ProfileVelocity {
        self.velocity
    }

    /// Set the acceleration of linear moves by setting the length of the
    /// acceleration filter to the number of cycles needed to reach the
    /// linear speed.
    pub fn set_profile_acceleration(&mut self, linear_accel: f64) -> Result<(), ArmCtrlError> {
        if !(linear_accel.is_finite() && linear_accel > 0.0) {
            return Err(ArmCtrlError::InvalidAcceleration(linear_accel));
        }

        // Saturating cast, out of range lengths are caught below
        let acc_len =
            (self.velocity.linear / (linear_accel * self.params.cycle_period_s)).ceil() as usize;

        self.set_profile_filter(self.filter_lens.0, acc_len)
    }

    /// Set the velocity and acceleration filter lengths.
    ///
    /// Both are checked before either is changed. If the arm is moving the
    /// change takes effect once the move is complete.
    pub fn set_profile_filter(&mut self, vel_len: usize, acc_len: usize) -> Result<(), ArmCtrlError> {
        for len in [vel_len, acc_len].iter() {
            if *len < FILTER_MIN_LEN || *len > FILTER_MAX_LEN {
                warn!("Rejected filter length {}", len);
                return Err(ArmCtrlError::InvalidFilterLength(*len));
            }
        }

        self.lock()?.pending.filter_lens = Some((vel_len, acc_len));
        self.filter_lens = (vel_len, acc_len);

        Ok(())
    }

    pub fn filter_lens(&self) -> (usize, usize) {
        self.filter_lens
    }

    /// Set the offset of the tool tip from the nominal tool position.
    ///
    /// Rejected while a move is in progress, since the move's path was only
    /// checked for the offset it was commanded with.
    pub fn set_tool_tip_offset(&mut self, dr: f64, dp: f64, dz: f64) -> Result<(), ArmCtrlError> {
        let offset = ToolOffset { dr, dp, dz };

        let mut inner = self.lock()?;
        if inner.state == ArmState::Profiling {
            return Err(self.invalid_state("set the tool tip offset", inner.state));
        }

        inner.pending.tool_offset = Some(offset);
        drop(inner);
        self.kinematics.set_tool_offset(offset);

        Ok(())
    }

    pub fn tool_offset(&self) -> ToolOffset {
        *self.kinematics.tool_offset()
    }

    // ---- STATUS ----

    /// True once the last move has arrived and while the arm remains there.
    pub fn position_arrived(&self) -> bool {
        !self.is_estopped() && self.state() == ArmState::Settled
    }

    /// Current tool tip pose, from the best joint angle estimate.
    pub fn get_position(&self) -> Result<Pose, ArmCtrlError> {
        if !self.has_master_values() {
            return Err(ArmCtrlError::NotMastered);
        }

        let best = self.shared.status.read()?.best_angles;

        Ok(self.kinematics.forward(&best))
    }

    /// One axis of the current tool tip pose.
    pub fn axis_position(&self, axis: Axis) -> Result<f64, ArmCtrlError> {
        Ok(self.get_position()?.axis(axis))
    }

    // ---- SAFETY ----

    /// Stop the arm. Takes effect on the next control cycle, repeated calls
    /// have no further effect.
    pub fn emergency_stop(&self) {
        if self.shared.estop.swap(true, Ordering::SeqCst) {
            return;
        }

        error!("EMERGENCY STOP");

        if let Ok(mut inner) = self.shared.inner.lock() {
            inner.state = ArmState::EmergencyStopped;
            inner.pending.target = None;
        }
    }

    pub fn is_estopped(&self) -> bool {
        self.shared.estop.load(Ordering::SeqCst)
    }

    /// Clear an emergency stop, returning to Idle (or Uninitialized if the arm
    /// was never mastered). Any move in progress is abandoned.
    ///
    /// Has no effect if the arm is not emergency stopped.
    pub fn reset_emergency_stop(&mut self) -> Result<(), ArmCtrlError> {
        let mut inner = self.lock()?;

        if !self.is_estopped() && inner.state != ArmState::EmergencyStopped {
            debug!("No emergency stop to clear");
            return Ok(());
        }

        let new_state = if inner.has_master_values {
            ArmState::Idle
        } else {
            ArmState::Uninitialized
        };

        self.shared.estop.store(false, Ordering::SeqCst);
        inner.state = new_state;
        inner.pending.target = None;
        inner.pending.reset = true;

        info!("Emergency stop cleared, ArmState: {:?}", new_state);

        Ok(())
    }

    /// Let the joints coast so the arm can be moved by hand.
    pub fn enable_manual_movement(&mut self) -> Result<(), ArmCtrlError> {
        let mut inner = self.lock()?;

        match inner.state {
            ArmState::EmergencyStopped => return Err(ArmCtrlError::EmergencyStopped),
            ArmState::Profiling => {
                return Err(self.invalid_state("enable manual movement", inner.state))
            }
            ArmState::Idle | ArmState::Settled => {
                info!("ArmState: {:?} -> Idle, manual movement enabled", inner.state);
                inner.state = ArmState::Idle;
                inner.pending.release = true;
            }
            // Already coasting
            ArmState::Uninitialized | ArmState::Mastering => (),
        }

        Ok(())
    }

    // ---- PRIVATE ----

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, ArmCtrlError> {
        Ok(self.shared.inner.lock()?)
    }

    fn invalid_state(&self, operation: &'static str, state: ArmState) -> ArmCtrlError {
        warn!("Cannot {} while {:?}", operation, state);
        ArmCtrlError::InvalidState { operation, state }
    }

    fn update_velocity(&mut self, velocity: ProfileVelocity) -> Result<(), ArmCtrlError> {
        velocity.validate()?;

        self.lock()?.pending.velocity = Some(velocity);
        self.velocity = velocity;

        Ok(())
    }

    /// Early rejection of moves, so that no kinematics are solved for a move
    /// which can't be made. Rechecked when the move is committed.
    fn check_can_move(&self) -> Result<(), ArmCtrlError> {
        if self.is_estopped() {
            return Err(ArmCtrlError::EmergencyStopped);
        }

        let inner = self.lock()?;
        Self::check_move_state(&inner)
    }

    fn check_move_state(inner: &Inner) -> Result<(), ArmCtrlError> {
        match inner.state {
            ArmState::EmergencyStopped => Err(ArmCtrlError::EmergencyStopped),
            _ if !inner.has_master_values => Err(ArmCtrlError::NotMastered),
            ArmState::Idle | ArmState::Profiling | ArmState::Settled => Ok(()),
            state => Err(ArmCtrlError::InvalidState {
                operation: "move",
                state,
            }),
        }
    }

    /// Solve and limit check the joint angles for a pose.
    fn solve(&self, pose: &Pose) -> Result<JointAngles, ArmCtrlError> {
        let angles = self.kinematics.inverse(pose).map_err(|e| {
            warn!("Rejected move to {:?}: {}", pose, e);
            e
        })?;

        angles
            .check_limits(&self.params.min_pos_deg, &self.params.max_pos_deg)
            .map_err(|e| {
                warn!("Rejected move to {:?}: {}", pose, e);
                e
            })?;

        Ok(angles)
    }

    /// The pose the arm is currently being driven to, or where it is if not
    /// moving.
    fn current_pose(&self) -> Result<Option<Pose>, ArmCtrlError> {
        let status = self.shared.status.read()?;

        if !status.has_master_values {
            return Ok(None);
        }

        let angles = status.required_angles.unwrap_or(status.best_angles);

        Ok(Some(self.kinematics.forward(&angles)))
    }

    /// Check points along the straight line from `start` to `end`.
    fn check_path(&self, start: &Pose, end: &Pose) -> Result<(), ArmCtrlError> {
        let num_steps = (start.distance_to(end) / self.params.path_check_step).ceil() as usize;

        for i in 1..num_steps {
            let point = start.lerp(end, i as f64 / num_steps as f64);
            self.solve(&point)?;
        }

        Ok(())
    }

    fn commit_move(
        &mut self,
        mode: ProfileMode,
        pose: Pose,
        angles: JointAngles,
    ) -> Result<u64, ArmCtrlError> {
        let mut inner = self.lock()?;

        // The estop may have been raised while the move was being validated
        if self.is_estopped() {
            return Err(ArmCtrlError::EmergencyStopped);
        }
        Self::check_move_state(&inner)?;

        inner.move_seq += 1;
        let seq = inner.move_seq;

        inner.pending.target = Some(MotionTarget {
            seq,
            mode,
            pose,
            angles,
        });

        if inner.state != ArmState::Profiling {
            info!("ArmState: {:?} -> Profiling", inner.state);
        }
        inner.state = ArmState::Profiling;

        debug!("Move {} accepted: {:?} to {:?} ({:?})", seq, mode, pose, angles);

        Ok(seq)
    }
}

impl Drop for ArmCtrl {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            if let Err(e) = job.stop() {
                error!("Could not stop the control task: {}", e);
            }
        }
    }
}
