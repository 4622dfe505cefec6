//! Arm configuration types: tool tip poses and joint angles

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::Vector4;
use serde::{Deserialize, Serialize};

// Internal
use super::ArmCtrlError;
use crate::mech::{JointId, NUM_JOINTS};

// ---------------------------------------------------------------------------
// TYPES
// ---------------------------------------------------------------------------

/// A four channel sample (X, Y, Z, A or J1 to J4) as used by the profile
/// filters.
pub type Sample4 = Vector4<f64>;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Position and orientation of the tool tip.
///
/// `x`, `y` and `z` are in the arm's linear unit with the origin on the base
/// axis at the base of the arm, `a` is the tool angle in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub a: f64,
}

/// Angles of the four joints.
///
/// Units: degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JointAngles {
    pub j1: f64,
    pub j2: f64,
    pub j3: f64,
    pub j4: f64,
}

/// Offset of the tool tip from the nominal tool position, applied after the
/// forward kinematics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOffset {
    /// Radial offset, away from the base axis.
    pub dr: f64,

    /// Perpendicular offset, in the horizontal plane at right angles to the
    /// radial direction.
    pub dp: f64,

    /// Vertical offset.
    pub dz: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An axis of a [`Pose`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
    A,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Pose {
    pub fn new(x: f64, y: f64, z: f64, a: f64) -> Self {
        Self { x, y, z, a }
    }

    pub fn from_sample(s: &Sample4) -> Self {
        Self::new(s.x, s.y, s.z, s.w)
    }

    pub fn to_sample(&self) -> Sample4 {
        Sample4::new(self.x, self.y, self.z, self.a)
    }

    pub fn axis(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::A => self.a,
        }
    }

    /// Straight line distance between the tool tip positions of two poses.
    pub fn distance_to(&self, other: &Pose) -> f64 {
        util::maths::norm(
            &[self.x, self.y, self.z],
            &[other.x, other.y, other.z],
        )
        .unwrap_or(0.0)
    }

    /// This pose expressed in a frame whose origin is `origin`.
    pub fn relative_to(&self, origin: &Pose) -> Pose {
        Pose::from_sample(&(self.to_sample() - origin.to_sample()))
    }

    /// The absolute pose of this pose, given relative to `origin`.
    pub fn offset_by(&self, origin: &Pose) -> Pose {
        Pose::from_sample(&(self.to_sample() + origin.to_sample()))
    }

    /// Linear interpolation, `t` = 0 gives `self` and `t` = 1 gives `other`.
    pub fn lerp(&self, other: &Pose, t: f64) -> Pose {
        let s = self.to_sample();
        Pose::from_sample(&(s + (other.to_sample() - s) * t))
    }
}

impl JointAngles {
    pub fn new(j1: f64, j2: f64, j3: f64, j4: f64) -> Self {
        Self { j1, j2, j3, j4 }
    }

    pub fn from_array(a: [f64; NUM_JOINTS]) -> Self {
        Self::new(a[0], a[1], a[2], a[3])
    }

    pub fn to_array(&self) -> [f64; NUM_JOINTS] {
        [self.j1, self.j2, self.j3, self.j4]
    }

    pub fn from_sample(s: &Sample4) -> Self {
        Self::new(s.x, s.y, s.z, s.w)
    }

    pub fn to_sample(&self) -> Sample4 {
        Sample4::new(self.j1, self.j2, self.j3, self.j4)
    }

    pub fn get(&self, joint: JointId) -> f64 {
        self.to_array()[joint.index()]
    }

    /// Largest absolute difference between any joint of `self` and `other`.
    pub fn max_abs_diff(&self, other: &JointAngles) -> f64 {
        (self.to_sample() - other.to_sample()).amax()
    }

    /// Check every joint is within its mechanical range.
    ///
    /// Out of range angles are rejected rather than clamped, the first joint
    /// found outside its range is reported.
    pub fn check_limits(
        &self,
        min_deg: &[f64; NUM_JOINTS],
        max_deg: &[f64; NUM_JOINTS],
    ) -> Result<(), ArmCtrlError> {
        for (joint, angle_deg) in JointId::arm_ids().iter().zip(self.to_array().iter()) {
            let i = joint.index();

            if !(min_deg[i]..=max_deg[i]).contains(angle_deg) {
                return Err(ArmCtrlError::JointLimit {
                    joint: *joint,
                    angle_deg: *angle_deg,
                    min_deg: min_deg[i],
                    max_deg: max_deg[i],
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_relative_poses() {
        let origin = Pose::new(10.0, 2.0, 5.0, 45.0);
        let p = Pose::new(12.0, 2.0, 4.0, 50.0);

        let rel = p.relative_to(&origin);
        assert_eq!(rel, Pose::new(2.0, 0.0, -1.0, 5.0));
        assert_eq!(rel.offset_by(&origin), p);

        assert!((origin.distance_to(&p) - 5f64.sqrt()).abs() < 1e-12);
        assert_eq!(origin.lerp(&p, 0.5), Pose::new(11.0, 2.0, 4.5, 47.5));
        assert_eq!(p.axis(Axis::Z), 4.0);
    }

    #[test]
    fn test_joint_limits() {
        let min = [-90.0; NUM_JOINTS];
        let max = [90.0; NUM_JOINTS];

        assert!(JointAngles::new(0.0, 90.0, -90.0, 12.0)
            .check_limits(&min, &max)
            .is_ok());

        match JointAngles::new(0.0, 0.0, -95.0, 0.0).check_limits(&min, &max) {
            Err(ArmCtrlError::JointLimit { joint, .. }) => assert_eq!(joint, JointId::Elbow),
            r => panic!("Expected a joint limit error, got {:?}", r),
        }

        let a = JointAngles::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(a.max_abs_diff(&JointAngles::new(1.0, 0.0, 3.5, 4.0)), 2.0);
        assert_eq!(a.get(JointId::Wrist), 4.0);
    }
}
