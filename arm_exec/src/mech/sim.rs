//! # Simulated arm
//!
//! Ideal velocity-following motors with potentiometers on each joint. Each
//! demand issued to a simulated motor advances its joint by one control
//! period, so a simulation stays in lock step with the control cycles driving
//! it whether they are run by the periodic job or stepped by hand in tests.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::trace;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

use super::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Configuration of one simulated joint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimJointConfig {
    /// Mechanical stops of the joint.
    ///
    /// Units: degrees
    pub min_deg: f64,
    pub max_deg: f64,

    /// Motor degrees per joint degree.
    pub gear_ratio: f64,

    /// Joint degrees per potentiometer count.
    pub pot_deg_per_count: f64,

    /// Potentiometer reading when the joint is at zero degrees.
    ///
    /// Units: counts
    pub pot_zero_counts: i32,
}

/// A simulated four joint arm.
///
/// Cloning produces another view onto the same simulated hardware.
#[derive(Clone)]
pub struct SimArm {
    config: [SimJointConfig; NUM_JOINTS],
    period_s: f64,
    state: Arc<Mutex<[SimJointState; NUM_JOINTS]>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct SimJointState {
    angle_deg: f64,
    motor_velocity_dps: f64,
    motor_rotation_deg: f64,
    brake: Option<BrakeMode>,
    num_demands: u64,
}

struct SimMotor {
    joint: usize,
    arm: SimArm,
}

struct SimPot {
    joint: usize,
    arm: SimArm,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimArm {
    /// Create a new simulated arm resting at the given joint angles.
    pub fn new(
        config: [SimJointConfig; NUM_JOINTS],
        initial_deg: [f64; NUM_JOINTS],
        period_s: f64,
    ) -> Self {
        let mut state = [SimJointState::default(); NUM_JOINTS];

        for (s, a) in state.iter_mut().zip(initial_deg.iter()) {
            s.angle_deg = *a;
        }

        Self {
            config,
            period_s,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Register the motors and potentiometers of this arm, returning the
    /// bindings for each joint.
    pub fn register(&self, registry: &mut DeviceRegistry) -> [JointDevices; NUM_JOINTS] {
        let mut bind = |joint: usize| JointDevices {
            actuator: registry.register_actuator(Box::new(SimMotor {
                joint,
                arm: self.clone(),
            })),
            sensor: registry.register_sensor(Box::new(SimPot {
                joint,
                arm: self.clone(),
            })),
        };

        [bind(0), bind(1), bind(2), bind(3)]
    }

    /// True joint angles of the simulated arm.
    pub fn joint_angles_deg(&self) -> [f64; NUM_JOINTS] {
        let state = self.lock();
        let mut angles = [0.0; NUM_JOINTS];

        for (a, s) in angles.iter_mut().zip(state.iter()) {
            *a = s.angle_deg;
        }

        angles
    }

    /// Move a joint by hand, as happens while mastering.
    pub fn set_joint_angle_deg(&self, joint: JointId, angle_deg: f64) {
        self.lock()[joint.index()].angle_deg = angle_deg;
    }

    /// The potentiometer reading the given joint would produce at the given
    /// angle.
    pub fn pot_counts_at(&self, joint: JointId, angle_deg: f64) -> i32 {
        let cfg = &self.config[joint.index()];
        cfg.pot_zero_counts + (angle_deg / cfg.pot_deg_per_count).round() as i32
    }

    /// Velocity last demanded of a joint's motor.
    ///
    /// Units: degrees/second (motor side)
    pub fn motor_velocity_dps(&self, joint: JointId) -> f64 {
        self.lock()[joint.index()].motor_velocity_dps
    }

    /// Brake mode of a joint's motor, or `None` if it is spinning.
    pub fn brake_mode(&self, joint: JointId) -> Option<BrakeMode> {
        self.lock()[joint.index()].brake
    }

    /// Number of demands a joint's motor has received.
    pub fn num_demands(&self, joint: JointId) -> u64 {
        self.lock()[joint.index()].num_demands
    }

    fn lock(&self) -> MutexGuard<'_, [SimJointState; NUM_JOINTS]> {
        // A panic while holding the lock can't leave the plain-data state
        // inconsistent, so keep simulating.
        match self.state.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    /// Set a joint's motor velocity and advance the joint by one period.
    fn command(&self, joint: usize, motor_velocity_dps: f64, brake: Option<BrakeMode>) {
        let cfg = self.config[joint];
        let mut state = self.lock();
        let s = &mut state[joint];

        s.motor_velocity_dps = motor_velocity_dps;
        s.brake = brake;
        s.num_demands += 1;

        let joint_rate_degs = motor_velocity_dps / cfg.gear_ratio;
        let new_angle = s.angle_deg + joint_rate_degs * self.period_s;

        // Hard stops
        if new_angle > cfg.max_deg || new_angle < cfg.min_deg {
            trace!("Simulated joint {} hit its mechanical stop", joint + 1);
            s.motor_velocity_dps = 0.0;
        }

        let clamped = new_angle.max(cfg.min_deg).min(cfg.max_deg);
        s.motor_rotation_deg += (clamped - s.angle_deg) * cfg.gear_ratio;
        s.angle_deg = clamped;
    }
}

impl Actuator for SimMotor {
    fn spin(&mut self, direction: Direction, velocity_dps: f64) {
        let signed = match direction {
            Direction::Fwd => velocity_dps.abs(),
            Direction::Rev => -velocity_dps.abs(),
        };

        self.arm.command(self.joint, signed, None);
    }

    fn stop(&mut self, mode: BrakeMode) {
        self.arm.command(self.joint, 0.0, Some(mode));
    }

    fn rotation_deg(&self) -> f64 {
        self.arm.lock()[self.joint].motor_rotation_deg
    }

    fn velocity_dps(&self) -> f64 {
        self.arm.lock()[self.joint].motor_velocity_dps
    }
}

impl AngleSensor for SimPot {
    fn value(&self) -> i32 {
        let angle_deg = self.arm.lock()[self.joint].angle_deg;

        match JointId::from_index(self.joint) {
            Some(id) => self.arm.pot_counts_at(id, angle_deg),
            None => 0,
        }
    }

    fn angle_deg(&self) -> f64 {
        self.value() as f64 * self.arm.config[self.joint].pot_deg_per_count
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn config() -> [SimJointConfig; NUM_JOINTS] {
        [SimJointConfig {
            min_deg: -90.0,
            max_deg: 90.0,
            gear_ratio: 5.0,
            pot_deg_per_count: 0.1,
            pot_zero_counts: 2000,
        }; NUM_JOINTS]
    }

    #[test]
    fn test_sim_motion() {
        let arm = SimArm::new(config(), [0.0, 10.0, 0.0, 0.0], 0.01);
        let mut reg = DeviceRegistry::new();
        let joints = arm.register(&mut reg);

        // 50 joint deg/s for one period is half a degree
        reg.apply(&joints[0], &JointDemand::from_signed_velocity(250.0))
            .unwrap();
        assert!((arm.joint_angles_deg()[0] - 0.5).abs() < 1e-12);

        let reading = reg.read_joint(&joints[0]).unwrap();
        assert_eq!(reading.sensor_value, 2005);
        assert_eq!(reading.motor_velocity_dps, 250.0);
        assert!((reading.motor_rotation_deg - 2.5).abs() < 1e-12);

        // Shoulder pot reads its initial angle
        assert_eq!(reg.read_joint(&joints[1]).unwrap().sensor_value, 2100);

        reg.apply(&joints[0], &JointDemand::Stop(BrakeMode::Hold)).unwrap();
        assert_eq!(arm.brake_mode(JointId::Base), Some(BrakeMode::Hold));
        assert_eq!(arm.num_demands(JointId::Base), 2);
    }

    #[test]
    fn test_sim_hard_stop() {
        let arm = SimArm::new(config(), [89.9, 0.0, 0.0, 0.0], 0.01);
        let mut reg = DeviceRegistry::new();
        let joints = arm.register(&mut reg);

        reg.apply(&joints[0], &JointDemand::from_signed_velocity(5000.0))
            .unwrap();

        assert_eq!(arm.joint_angles_deg()[0], 90.0);
        assert_eq!(arm.motor_velocity_dps(JointId::Base), 0.0);
    }
}
