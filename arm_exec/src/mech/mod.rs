//! # Mechanisms
//!
//! Capability interfaces for the devices the arm controller consumes: one
//! actuator and one absolute angle sensor per joint. Devices are owned by a
//! [`DeviceRegistry`] and addressed through stable handles which are resolved
//! on every access, so the controller never holds a reference to a device.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

/// Simulated arm devices.
pub mod sim;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of joints on the arm.
pub const NUM_JOINTS: usize = 4;

const ARM_IDS: [JointId; NUM_JOINTS] = [
    JointId::Base,
    JointId::Shoulder,
    JointId::Elbow,
    JointId::Wrist,
];

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A motor driving one joint.
///
/// Velocities and rotations are on the motor side of any gearing.
pub trait Actuator: Send {
    /// Spin the motor in the given direction at the given speed.
    ///
    /// Units: degrees/second
    fn spin(&mut self, direction: Direction, velocity_dps: f64);

    /// Stop the motor using the given brake mode.
    fn stop(&mut self, mode: BrakeMode);

    /// Accumulated rotation of the motor.
    ///
    /// Units: degrees
    fn rotation_deg(&self) -> f64;

    /// Measured velocity of the motor.
    ///
    /// Units: degrees/second
    fn velocity_dps(&self) -> f64;
}

/// An absolute angle sensor (potentiometer) on one joint.
pub trait AngleSensor: Send {
    /// Raw reading of the sensor.
    ///
    /// Units: counts
    fn value(&self) -> i32;

    /// Reading of the sensor converted to the sensor's own angle.
    ///
    /// Units: degrees
    fn angle_deg(&self) -> f64;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Handle to an actuator stored in a [`DeviceRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActuatorHandle(usize);

/// Handle to a sensor stored in a [`DeviceRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorHandle(usize);

/// The devices bound to one joint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointDevices {
    pub actuator: ActuatorHandle,
    pub sensor: SensorHandle,
}

/// Owner of all devices used by the arm.
#[derive(Default)]
pub struct DeviceRegistry {
    actuators: Vec<Box<dyn Actuator>>,
    sensors: Vec<Box<dyn AngleSensor>>,
}

/// Everything read from one joint's devices during a control cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct JointReading {
    /// Raw absolute sensor value.
    ///
    /// Units: counts
    pub sensor_value: i32,

    /// Motor velocity.
    ///
    /// Units: degrees/second (motor side)
    pub motor_velocity_dps: f64,

    /// Motor rotation.
    ///
    /// Units: degrees (motor side)
    pub motor_rotation_deg: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Identifiers of the arm's joints, J1 to J4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JointId {
    /// J1, rotation about the vertical base axis
    Base,
    /// J2, first link of the planar chain
    Shoulder,
    /// J3, second link of the planar chain
    Elbow,
    /// J4, tool orientation
    Wrist,
}

/// Spin direction of an actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Fwd,
    Rev,
}

/// How an actuator behaves when stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrakeMode {
    /// Free-wheel, allows the joint to be moved by hand.
    Coast,
    /// Short the windings, stopping quickly.
    Brake,
    /// Actively hold the current position.
    Hold,
}

/// A demand for one actuator produced by a control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum JointDemand {
    Spin {
        direction: Direction,

        /// Units: degrees/second (motor side)
        velocity_dps: f64,
    },
    Stop(BrakeMode),
}

/// Errors raised by the device registry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MechError {
    #[error("No actuator is registered with handle {0:?}")]
    UnknownActuator(ActuatorHandle),

    #[error("No sensor is registered with handle {0:?}")]
    UnknownSensor(SensorHandle),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl JointId {
    /// All joints in J1 to J4 order.
    pub fn arm_ids() -> &'static [JointId; NUM_JOINTS] {
        &ARM_IDS
    }

    /// Index of the joint, J1 is zero.
    pub fn index(&self) -> usize {
        match self {
            JointId::Base => 0,
            JointId::Shoulder => 1,
            JointId::Elbow => 2,
            JointId::Wrist => 3,
        }
    }

    /// The joint with the given index, or `None` if out of range.
    pub fn from_index(index: usize) -> Option<Self> {
        ARM_IDS.get(index).copied()
    }
}

impl fmt::Display for JointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "J{} ({:?})", self.index() + 1, self)
    }
}

impl JointDemand {
    /// Build a spin demand from a signed velocity.
    pub fn from_signed_velocity(velocity_dps: f64) -> Self {
        if velocity_dps >= 0.0 {
            JointDemand::Spin {
                direction: Direction::Fwd,
                velocity_dps,
            }
        } else {
            JointDemand::Spin {
                direction: Direction::Rev,
                velocity_dps: -velocity_dps,
            }
        }
    }

    /// The signed velocity demanded, zero for any stop.
    pub fn signed_velocity_dps(&self) -> f64 {
        match self {
            JointDemand::Spin {
                direction: Direction::Fwd,
                velocity_dps,
            } => *velocity_dps,
            JointDemand::Spin {
                direction: Direction::Rev,
                velocity_dps,
            } => -*velocity_dps,
            JointDemand::Stop(_) => 0.0,
        }
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an actuator, returning its handle.
    pub fn register_actuator(&mut self, actuator: Box<dyn Actuator>) -> ActuatorHandle {
        self.actuators.push(actuator);
        ActuatorHandle(self.actuators.len() - 1)
    }

    /// Take ownership of a sensor, returning its handle.
    pub fn register_sensor(&mut self, sensor: Box<dyn AngleSensor>) -> SensorHandle {
        self.sensors.push(sensor);
        SensorHandle(self.sensors.len() - 1)
    }

    pub fn actuator(&self, handle: ActuatorHandle) -> Result<&dyn Actuator, MechError> {
        self.actuators
            .get(handle.0)
            .map(|a| a.as_ref())
            .ok_or(MechError::UnknownActuator(handle))
    }

    pub fn actuator_mut(
        &mut self,
        handle: ActuatorHandle,
    ) -> Result<&mut (dyn Actuator + 'static), MechError> {
        self.actuators
            .get_mut(handle.0)
            .map(|a| a.as_mut())
            .ok_or(MechError::UnknownActuator(handle))
    }

    pub fn sensor(&self, handle: SensorHandle) -> Result<&dyn AngleSensor, MechError> {
        self.sensors
            .get(handle.0)
            .map(|s| s.as_ref())
            .ok_or(MechError::UnknownSensor(handle))
    }

    /// Check that every handle in the given bindings resolves to a device.
    pub fn validate(&self, joints: &[JointDevices; NUM_JOINTS]) -> Result<(), MechError> {
        for j in joints.iter() {
            self.actuator(j.actuator)?;
            self.sensor(j.sensor)?;
        }

        Ok(())
    }

    /// Read the sensor and motor telemetry of one joint.
    pub fn read_joint(&self, joint: &JointDevices) -> Result<JointReading, MechError> {
        let actuator = self.actuator(joint.actuator)?;
        let sensor = self.sensor(joint.sensor)?;

        Ok(JointReading {
            sensor_value: sensor.value(),
            motor_velocity_dps: actuator.velocity_dps(),
            motor_rotation_deg: actuator.rotation_deg(),
        })
    }

    /// Issue a demand to one joint's actuator.
    pub fn apply(&mut self, joint: &JointDevices, demand: &JointDemand) -> Result<(), MechError> {
        let actuator = self.actuator_mut(joint.actuator)?;

        match *demand {
            JointDemand::Spin {
                direction,
                velocity_dps,
            } => actuator.spin(direction, velocity_dps),
            JointDemand::Stop(mode) => actuator.stop(mode),
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct NullSensor(i32);

    impl AngleSensor for NullSensor {
        fn value(&self) -> i32 {
            self.0
        }

        fn angle_deg(&self) -> f64 {
            self.0 as f64
        }
    }

    #[test]
    fn test_unknown_handles() {
        let mut reg = DeviceRegistry::new();
        let s = reg.register_sensor(Box::new(NullSensor(12)));

        assert_eq!(reg.sensor(s).unwrap().value(), 12);
        assert!(reg.sensor(SensorHandle(3)).is_err());
        assert!(reg.actuator(ActuatorHandle(0)).is_err());
    }

    #[test]
    fn test_signed_velocity() {
        let d = JointDemand::from_signed_velocity(-12.5);
        assert_eq!(
            d,
            JointDemand::Spin {
                direction: Direction::Rev,
                velocity_dps: 12.5
            }
        );
        assert_eq!(d.signed_velocity_dps(), -12.5);
        assert_eq!(JointDemand::Stop(BrakeMode::Hold).signed_velocity_dps(), 0.0);
    }

    #[test]
    fn test_joint_ids() {
        for (i, id) in JointId::arm_ids().iter().enumerate() {
            assert_eq!(id.index(), i);
            assert_eq!(JointId::from_index(i), Some(*id));
        }
        assert_eq!(JointId::from_index(4), None);
        assert_eq!(format!("{}", JointId::Elbow), "J3 (Elbow)");
    }
}
