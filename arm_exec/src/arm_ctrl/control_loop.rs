//! # Control loop
//!
//! One cycle of arm control. Each cycle:
//!  1. Applies the changes requested by the supervisor since the last cycle.
//!  1. Updates the joint angle estimate from the sensor readings.
//!  1. Produces a demand for every joint according to the arm state. While
//!     profiling the profiler is stepped, the profiled position converted to
//!     required joint angles, and each joint driven towards its required
//!     angle by a feed-forward plus proportional-integral rate law.
//!
//! The loop never changes the arm state itself, it reports arrival through
//! the status report and the driver makes the transition.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, error, info, trace};
use serde::Serialize;

use util::maths::clamp_abs;

use super::*;
use crate::mech::{BrakeMode, JointDemand, JointReading, NUM_JOINTS};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Input to one control cycle.
#[derive(Debug, Clone, Default)]
pub struct LoopInput {
    pub readings: [JointReading; NUM_JOINTS],

    /// Emergency stop flag as read at the start of the cycle.
    pub estop: bool,

    pub state: ArmState,

    pub changes: PendingChanges,
}

/// Monitoring quantities from one control cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    /// Number of cycles executed.
    pub cycle: u64,

    pub state: ArmState,
    pub estop: bool,
    pub has_master_values: bool,

    /// Raw potentiometer readings.
    ///
    /// Units: counts
    pub sensor_values: [i32; NUM_JOINTS],

    /// Calibrated potentiometer angles.
    pub raw_angles: JointAngles,

    /// Best estimate of the joint angles.
    pub best_angles: JointAngles,

    /// Tool tip pose of the best joint angles.
    pub position: Pose,

    pub tool_offset: ToolOffset,

    /// Joint angles the controller is driving towards, if profiling.
    pub required_angles: Option<JointAngles>,

    /// Mode and profiled position, if profiling.
    pub profile_mode: Option<ProfileMode>,
    pub profile_pos: [f64; NUM_JOINTS],

    /// Joint rate demanded of each joint.
    ///
    /// Units: degrees/second
    pub demanded_rate_degs: [f64; NUM_JOINTS],

    /// If true the joint's demanded rate was limited.
    pub rate_limited: [bool; NUM_JOINTS],

    /// If true the joint's integrator was limited.
    pub integral_limited: [bool; NUM_JOINTS],

    /// Sequence number of the move which arrived this cycle.
    pub arrived_seq: Option<u64>,
}

/// The arm's control loop.
pub struct ControlLoop {
    params: Params,
    kinematics: Kinematics,
    estimator: AngleEstimator,
    profiler: MotionProfiler,

    /// Move currently being profiled.
    target: Option<MotionTarget>,

    /// Required angles of the previous profiling cycle.
    last_required: Option<JointAngles>,

    /// Integrated angle error of each joint.
    ///
    /// Units: degree seconds
    integral: [f64; NUM_JOINTS],

    /// Coast rather than hold while idle.
    release: bool,

    num_cycles: u64,

    report: StatusReport,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ControlLoop {
    pub fn new(params: &Params) -> Result<Self, ArmCtrlError> {
        params.validate()?;

        Ok(Self {
            params: params.clone(),
            kinematics: Kinematics::new(params.geometry),
            estimator: AngleEstimator::new(params),
            profiler: MotionProfiler::new(
                ProfileVelocity {
                    linear: params.linear_vel,
                    angular_degs: params.angular_vel_degs,
                    joint_degs: params.joint_vel_degs,
                },
                params.vel_filter_len,
                params.acc_filter_len,
                params.cycle_period_s,
            )?,
            target: None,
            last_required: None,
            integral: [0.0; NUM_JOINTS],
            release: false,
            num_cycles: 0,
            report: StatusReport::default(),
        })
    }

    pub fn estimator(&self) -> &AngleEstimator {
        &self.estimator
    }

    pub fn profiler(&self) -> &MotionProfiler {
        &self.profiler
    }

    pub fn kinematics(&self) -> &Kinematics {
        &self.kinematics
    }

    /// Process one control cycle.
    ///
    /// Returns the demand for each joint and the cycle's status report. An
    /// error means the arm can no longer follow its profile and must be
    /// stopped.
    pub fn proc(
        &mut self,
        input: LoopInput,
    ) -> Result<([JointDemand; NUM_JOINTS], StatusReport), ArmCtrlError> {
        self.num_cycles += 1;
        self.report = StatusReport {
            cycle: self.num_cycles,
            state: input.state,
            estop: input.estop,
            ..Default::default()
        };

        let new_target = self.apply_changes(input.changes);

        let best = self.estimator.update(&input.readings);

        if let Some(target) = new_target {
            self.start_target(target);
        }

        for (v, r) in self.report.sensor_values.iter_mut().zip(input.readings.iter()) {
            *v = r.sensor_value;
        }
        self.report.raw_angles = self.estimator.raw();
        self.report.best_angles = best;
        self.report.position = self.kinematics.forward(&best);
        self.report.tool_offset = *self.kinematics.tool_offset();
        self.report.has_master_values = self.estimator.calibration().has_master_values;

        let demands = if input.estop || input.state == ArmState::EmergencyStopped {
            self.state_estopped()
        } else {
            match input.state {
                ArmState::Uninitialized | ArmState::Mastering => self.state_unmastered(),
                ArmState::Idle => self.state_idle(),
                ArmState::Settled => self.state_settled(),
                ArmState::Profiling => self.state_profiling(&best)?,
                ArmState::EmergencyStopped => self.state_estopped(),
            }
        };

        Ok((demands, self.report.clone()))
    }

    /// Apply a snapshot of supervisor requests, returning any new move to be
    /// started once the angle estimate is up to date.
    fn apply_changes(&mut self, changes: PendingChanges) -> Option<MotionTarget> {
        if changes.reset {
            debug!("Control loop reset");
            self.abandon_motion();
            self.release = false;
        }

        if let Some(cal) = changes.calibration {
            info!("Applying new joint calibration");
            self.estimator.set_calibration(cal);
            self.last_required = None;
        }

        if let Some(offset) = changes.tool_offset {
            info!("Tool tip offset set to {:?}", offset);
            self.kinematics.set_tool_offset(offset);
        }

        if let Some(velocity) = changes.velocity {
            // Validated by the supervisor
            if let Err(e) = self.profiler.set_velocity(velocity) {
                error!("Rejected profile velocity: {}", e);
            }
        }

        if let Some((vel_len, acc_len)) = changes.filter_lens {
            if let Err(e) = self.profiler.set_filter_lens(vel_len, acc_len) {
                error!("Rejected filter lengths: {}", e);
            }
        }

        if changes.release {
            self.release = true;
        }

        changes.target
    }

    /// Begin (or retarget) the profile for a new move.
    fn start_target(&mut self, target: MotionTarget) {
        self.release = false;

        // Start from where the arm was last asked to be, which is continuous
        // with the previous move, or failing that from where it is.
        let from = self.last_required.unwrap_or_else(|| self.estimator.best());
        let current = match target.mode {
            ProfileMode::Linear => self.kinematics.forward(&from).to_sample(),
            ProfileMode::Joint => from.to_sample(),
        };

        info!("Starting move {} ({:?}) to {:?}", target.seq, target.mode, target.pose);

        self.profiler.start(target.mode, target.sample(), current);
        self.target = Some(target);
    }

    /// Drop any motion in progress along with the controller memory.
    fn abandon_motion(&mut self) {
        self.profiler.stop();
        self.target = None;
        self.last_required = None;
        self.integral = [0.0; NUM_JOINTS];
    }

    fn state_estopped(&mut self) -> [JointDemand; NUM_JOINTS] {
        if self.target.is_some() || self.profiler.is_active() {
            error!("Emergency stop, abandoning motion");
        }
        self.abandon_motion();

        [JointDemand::Stop(BrakeMode::Brake); NUM_JOINTS]
    }

    fn state_unmastered(&mut self) -> [JointDemand; NUM_JOINTS] {
        self.abandon_motion();

        [JointDemand::Stop(BrakeMode::Coast); NUM_JOINTS]
    }

    fn state_idle(&mut self) -> [JointDemand; NUM_JOINTS] {
        self.profiler.stop();
        self.target = None;
        self.integral = [0.0; NUM_JOINTS];

        if self.release {
            // Hand movement invalidates the last required angles
            self.last_required = None;
            [JointDemand::Stop(BrakeMode::Coast); NUM_JOINTS]
        } else {
            [JointDemand::Stop(BrakeMode::Hold); NUM_JOINTS]
        }
    }

    fn state_settled(&mut self) -> [JointDemand; NUM_JOINTS] {
        [JointDemand::Stop(BrakeMode::Hold); NUM_JOINTS]
    }

    fn state_profiling(
        &mut self,
        best: &JointAngles,
    ) -> Result<[JointDemand; NUM_JOINTS], ArmCtrlError> {
        let target = match self.target {
            Some(t) => t,
            None => {
                // Only possible if the target was dropped by a reset in this
                // same cycle, the driver will leave profiling on the next one.
                debug!("Profiling without a target, holding");
                return Ok(self.state_settled());
            }
        };

        // Advance the profile and find the angles required to follow it
        let pos = self.profiler.step();
        let required = match target.mode {
            ProfileMode::Linear => self.kinematics.inverse(&Pose::from_sample(&pos))?,
            ProfileMode::Joint => JointAngles::from_sample(&pos),
        };
        required.check_limits(&self.params.min_pos_deg, &self.params.max_pos_deg)?;

        self.report.required_angles = Some(required);
        self.report.profile_mode = Some(target.mode);
        self.report.profile_pos = [pos.x, pos.y, pos.z, pos.w];

        // Arrival check in the profile's own channels
        let (best_sample, tolerance) = match target.mode {
            ProfileMode::Linear => (
                self.kinematics.forward(best).to_sample(),
                Sample4::new(
                    self.params.pos_tolerance,
                    self.params.pos_tolerance,
                    self.params.pos_tolerance,
                    self.params.angle_tolerance_deg,
                ),
            ),
            ProfileMode::Joint => (
                best.to_sample(),
                Sample4::repeat(self.params.angle_tolerance_deg),
            ),
        };

        let arrived = self
            .profiler
            .position_arrived(&best_sample, &tolerance, self.params.settle_cycles);

        if arrived {
            info!("Move {} arrived", target.seq);
            self.report.arrived_seq = Some(target.seq);
            self.profiler.finish();
            self.target = None;
            self.last_required = Some(required);
            self.integral = [0.0; NUM_JOINTS];

            return Ok([JointDemand::Stop(BrakeMode::Hold); NUM_JOINTS]);
        }

        let demands = self.drive(&required, best);
        self.last_required = Some(required);

        Ok(demands)
    }

    /// Rate law driving each joint towards its required angle.
    fn drive(&mut self, required: &JointAngles, best: &JointAngles) -> [JointDemand; NUM_JOINTS] {
        let dt = self.params.cycle_period_s;
        let required_arr = required.to_array();
        let best_arr = best.to_array();
        let last_arr = self.last_required.map(|l| l.to_array());

        let mut demands = [JointDemand::Stop(BrakeMode::Hold); NUM_JOINTS];

        for i in 0..NUM_JOINTS {
            let feed_forward = match last_arr {
                Some(last) => (required_arr[i] - last[i]) / dt,
                None => 0.0,
            };

            let error = required_arr[i] - best_arr[i];

            let (integral, integral_limited) =
                clamp_abs(self.integral[i] + error * dt, self.params.integral_limit_degs);
            self.integral[i] = integral;

            let (rate_degs, rate_limited) = clamp_abs(
                feed_forward + self.params.k_p * error + self.params.k_i * integral,
                self.params.max_rate_degs[i],
            );

            self.report.demanded_rate_degs[i] = rate_degs;
            self.report.rate_limited[i] = rate_limited;
            self.report.integral_limited[i] = integral_limited;

            demands[i] = JointDemand::from_signed_velocity(rate_degs * self.params.gear_ratio[i]);
        }

        trace!("Joint rates {:?}", self.report.demanded_rate_degs);

        demands
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arm_ctrl::test_params;
    use crate::mech::Direction;

    /// Readings for a joint at the given angles, using the test params' pot
    /// scale and an uncalibrated (zero offset) estimator.
    fn readings_at(params: &Params, angles: &JointAngles) -> [JointReading; NUM_JOINTS] {
        let mut readings = [JointReading::default(); NUM_JOINTS];
        for (i, a) in angles.to_array().iter().enumerate() {
            readings[i].sensor_value = (a / params.pot_deg_per_count[i]).round() as i32;
        }
        readings
    }

    fn mastered() -> Calibration {
        Calibration {
            has_master_values: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_demands_by_state() {
        let params = test_params();
        let mut ctrl = ControlLoop::new(&params).unwrap();
        let readings = readings_at(&params, &JointAngles::from_array(params.stow_deg));

        let mut input = LoopInput {
            readings,
            ..Default::default()
        };

        let (demands, report) = ctrl.proc(input.clone()).unwrap();
        assert_eq!(demands, [JointDemand::Stop(BrakeMode::Coast); NUM_JOINTS]);
        assert!(!report.has_master_values);

        input.state = ArmState::Idle;
        input.changes.calibration = Some(mastered());
        let (demands, report) = ctrl.proc(input.clone()).unwrap();
        assert_eq!(demands, [JointDemand::Stop(BrakeMode::Hold); NUM_JOINTS]);
        assert!(report.has_master_values);

        input.changes = PendingChanges {
            release: true,
            ..Default::default()
        };
        let (demands, _) = ctrl.proc(input.clone()).unwrap();
        assert_eq!(demands, [JointDemand::Stop(BrakeMode::Coast); NUM_JOINTS]);

        input.changes = PendingChanges::default();
        input.estop = true;
        let (demands, report) = ctrl.proc(input).unwrap();
        assert_eq!(demands, [JointDemand::Stop(BrakeMode::Brake); NUM_JOINTS]);
        assert!(report.estop);
    }

    #[test]
    fn test_profiling_drives_towards_target() {
        let mut params = test_params();
        params.blend_weight = 0.0;
        let mut ctrl = ControlLoop::new(&params).unwrap();

        let start = JointAngles::from_array(params.stow_deg);
        let mut goal = start;
        goal.j1 += 20.0;
        goal.j3 -= 10.0;

        let mut input = LoopInput {
            readings: readings_at(&params, &start),
            state: ArmState::Profiling,
            ..Default::default()
        };
        input.changes.calibration = Some(mastered());
        input.changes.target = Some(MotionTarget {
            seq: 1,
            mode: ProfileMode::Joint,
            pose: ctrl.kinematics().forward(&goal),
            angles: goal,
        });

        let (demands, report) = ctrl.proc(input.clone()).unwrap();
        assert!(ctrl.profiler().is_active());
        assert!(report.required_angles.is_some());
        assert_eq!(report.arrived_seq, None);

        // Base moves positive, elbow negative, others stay put
        let gear = params.gear_ratio;
        assert!(demands[0].signed_velocity_dps() * gear[0].signum() > 0.0);
        assert!(demands[2].signed_velocity_dps() * gear[2].signum() < 0.0);

        // Rates never exceed the joint limits even with a large error
        input.changes = PendingChanges::default();
        input.readings = readings_at(&params, &JointAngles::new(-150.0, 0.0, -150.0, 170.0));
        let (_, report) = ctrl.proc(input).unwrap();
        for i in 0..NUM_JOINTS {
            assert!(report.demanded_rate_degs[i].abs() <= params.max_rate_degs[i]);
        }
        assert!(report.rate_limited.iter().any(|l| *l));
    }

    #[test]
    fn test_arrival_reported() {
        let mut params = test_params();
        params.settle_cycles = 3;
        let mut ctrl = ControlLoop::new(&params).unwrap();

        let start = JointAngles::from_array(params.stow_deg);

        let mut input = LoopInput {
            readings: readings_at(&params, &start),
            state: ArmState::Profiling,
            ..Default::default()
        };
        input.changes.calibration = Some(mastered());
        input.changes.target = Some(MotionTarget {
            seq: 7,
            mode: ProfileMode::Joint,
            pose: ctrl.kinematics().forward(&start),
            angles: start,
        });

        // Zero length move, arrives after the debounce
        let mut arrived = None;
        for i in 0..10 {
            let (demands, report) = ctrl.proc(input.clone()).unwrap();
            input.changes = PendingChanges::default();

            if let Some(seq) = report.arrived_seq {
                assert_eq!(demands, [JointDemand::Stop(BrakeMode::Hold); NUM_JOINTS]);
                arrived = Some((i, seq));
                break;
            }
        }

        assert_eq!(arrived, Some((2, 7)));
        assert!(!ctrl.profiler().is_active());
    }

    #[test]
    fn test_unreachable_profile_is_error() {
        let params = test_params();
        let mut ctrl = ControlLoop::new(&params).unwrap();

        let start = JointAngles::from_array(params.stow_deg);
        let mut input = LoopInput {
            readings: readings_at(&params, &start),
            state: ArmState::Profiling,
            ..Default::default()
        };
        input.changes.calibration = Some(mastered());

        // A target the supervisor would never accept
        input.changes.target = Some(MotionTarget {
            seq: 1,
            mode: ProfileMode::Joint,
            pose: Pose::default(),
            angles: JointAngles::new(0.0, 0.0, -500.0, 0.0),
        });
        input.changes.velocity = Some(ProfileVelocity {
            linear: 10.0,
            angular_degs: 90.0,
            joint_degs: 1e6,
        });
        input.changes.filter_lens = Some((1, 1));

        match ctrl.proc(input) {
            Err(ArmCtrlError::JointLimit { joint, .. }) => {
                assert_eq!(joint, crate::mech::JointId::Elbow)
            }
            r => panic!("Expected a joint limit error, got {:?}", r.map(|r| r.0)),
        }
    }

    #[test]
    fn test_direction_of_demand() {
        assert_eq!(
            JointDemand::from_signed_velocity(-3.0),
            JointDemand::Spin {
                direction: Direction::Rev,
                velocity_dps: 3.0
            }
        );
    }
}
