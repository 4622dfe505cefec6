//! Parameters structure for ArmCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::{ArmCtrlError, FILTER_MAX_LEN, FILTER_MIN_LEN};
use crate::mech::{sim::SimJointConfig, NUM_JOINTS};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for Arm control.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Params {
    pub geometry: Geometry,

    // ---- CAPABILITIES ----
    /// Minimum joint angle (mechanical stop).
    ///
    /// Units: degrees
    pub min_pos_deg: [f64; NUM_JOINTS],

    /// Maximum joint angle (mechanical stop).
    ///
    /// Units: degrees
    pub max_pos_deg: [f64; NUM_JOINTS],

    /// Maximum joint rate magnitude which may be demanded.
    ///
    /// Units: degrees/second
    pub max_rate_degs: [f64; NUM_JOINTS],

    /// Motor degrees per joint degree, negative if the motor is reversed.
    pub gear_ratio: [f64; NUM_JOINTS],

    /// Safe resting position of the arm.
    ///
    /// Units: degrees
    pub stow_deg: [f64; NUM_JOINTS],

    // ---- SENSORS ----
    /// Joint degrees per potentiometer count, negative if the pot is reversed.
    pub pot_deg_per_count: [f64; NUM_JOINTS],

    /// Weight given to the integrated motor rate by the complementary filter,
    /// the remainder is given to the potentiometer.
    pub blend_weight: f64,

    // ---- MASTERING ----
    /// Lowest raw potentiometer reading accepted at the mastering pose.
    ///
    /// Units: counts
    pub mastering_min_raw: [i32; NUM_JOINTS],

    /// Highest raw potentiometer reading accepted at the mastering pose.
    ///
    /// Units: counts
    pub mastering_max_raw: [i32; NUM_JOINTS],

    /// Joint angles of the mastering pose.
    ///
    /// Units: degrees
    pub mastering_ref_deg: [f64; NUM_JOINTS],

    // ---- CONTROL ----
    /// Period of the control cycle.
    ///
    /// Units: seconds
    pub cycle_period_s: f64,

    /// Proportional gain on the joint angle error.
    ///
    /// Units: 1/second
    pub k_p: f64,

    /// Integral gain on the joint angle error.
    ///
    /// Units: 1/second^2
    pub k_i: f64,

    /// Limit on the magnitude of each joint's integrated error.
    ///
    /// Units: degree seconds
    pub integral_limit_degs: f64,

    /// Linear tolerance on the profile for arrival.
    ///
    /// Units: arm linear units
    pub pos_tolerance: f64,

    /// Angular tolerance on the profile and joints for arrival.
    ///
    /// Units: degrees
    pub angle_tolerance_deg: f64,

    /// Number of consecutive cycles within tolerance before arrival is
    /// reported.
    pub settle_cycles: u32,

    // ---- PROFILE ----
    /// Default tool tip speed in linear moves.
    ///
    /// Units: arm linear units/second
    pub linear_vel: f64,

    /// Default tool angle rate in linear moves.
    ///
    /// Units: degrees/second
    pub angular_vel_degs: f64,

    /// Default joint rate in joint moves.
    ///
    /// Units: degrees/second
    pub joint_vel_degs: f64,

    /// Default velocity filter length.
    pub vel_filter_len: usize,

    /// Default acceleration filter length.
    pub acc_filter_len: usize,

    /// Spacing between the points checked along a linear move before it is
    /// accepted.
    ///
    /// Units: arm linear units
    pub path_check_step: f64,
}

/// Fixed dimensions of the arm.
///
/// All linear values are in the arm's native linear unit, which the rest of
/// the module inherits.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct Geometry {
    /// Length of the first link of the planar chain (shoulder to elbow).
    pub link_a: f64,

    /// Length of the second link of the planar chain (elbow to wrist).
    pub link_b: f64,

    /// Horizontal distance from the base axis to the shoulder axis.
    pub shoulder_radial: f64,

    /// Height of the shoulder axis.
    pub shoulder_height: f64,

    /// Horizontal distance from the wrist to the tool tip.
    pub tool_radial: f64,

    /// Vertical distance from the wrist to the tool tip.
    pub tool_height: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    /// Check the parameters describe a usable arm.
    pub fn validate(&self) -> Result<(), ArmCtrlError> {
        let fail = |msg: String| Err(ArmCtrlError::InvalidParams(msg));

        if !(self.geometry.link_a > 0.0 && self.geometry.link_b > 0.0) {
            return fail(format!(
                "link lengths must be positive, found {} and {}",
                self.geometry.link_a, self.geometry.link_b
            ));
        }

        if !(self.cycle_period_s.is_finite() && self.cycle_period_s > 0.0) {
            return fail(format!("cycle period must be positive and finite, found {}", self.cycle_period_s));
        }

        if self.settle_cycles == 0 {
            return fail("settle cycles must be at least 1".into());
        }

        if !(0.0..=1.0).contains(&self.blend_weight) {
            return fail(format!("blend weight must be in [0, 1], found {}", self.blend_weight));
        }

        for i in 0..NUM_JOINTS {
            if self.min_pos_deg[i] >= self.max_pos_deg[i] {
                return fail(format!("J{} has an empty angle range", i + 1));
            }
            if self.mastering_min_raw[i] > self.mastering_max_raw[i] {
                return fail(format!("J{} has an empty mastering range", i + 1));
            }
            if self.gear_ratio[i] == 0.0 || self.pot_deg_per_count[i] == 0.0 {
                return fail(format!("J{} has a zero gear ratio or pot scale", i + 1));
            }
            if !(self.max_rate_degs[i] > 0.0) {
                return fail(format!("J{} has no rate capability", i + 1));
            }
        }

        for len in [self.vel_filter_len, self.acc_filter_len].iter() {
            if *len < FILTER_MIN_LEN || *len > FILTER_MAX_LEN {
                return Err(ArmCtrlError::InvalidFilterLength(*len));
            }
        }

        for v in [self.linear_vel, self.angular_vel_degs, self.joint_vel_degs].iter() {
            if !(v.is_finite() && *v > 0.0) {
                return Err(ArmCtrlError::InvalidVelocity(*v));
            }
        }

        if !(self.path_check_step > 0.0) {
            return fail(format!("path check step must be positive, found {}", self.path_check_step));
        }

        Ok(())
    }

    /// Build a simulated joint configuration matching these parameters.
    pub fn sim_config(&self, pot_zero_counts: [i32; NUM_JOINTS]) -> [SimJointConfig; NUM_JOINTS] {
        let joint = |i: usize| SimJointConfig {
            min_deg: self.min_pos_deg[i],
            max_deg: self.max_pos_deg[i],
            gear_ratio: self.gear_ratio[i],
            pot_deg_per_count: self.pot_deg_per_count[i],
            pot_zero_counts: pot_zero_counts[i],
        };

        [joint(0), joint(1), joint(2), joint(3)]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arm_ctrl::test_params;

    #[test]
    fn test_shipped_params_valid() {
        let params = test_params();
        params.validate().unwrap();
        assert_eq!(params.cycle_period_s, 0.01);
    }

    #[test]
    fn test_invalid_params() {
        let mut params = test_params();
        params.vel_filter_len = 1001;
        match params.validate() {
            Err(ArmCtrlError::InvalidFilterLength(1001)) => (),
            r => panic!("Expected invalid filter length, got {:?}", r),
        }

        let mut params = test_params();
        params.blend_weight = 1.5;
        assert!(params.validate().is_err());

        let mut params = test_params();
        params.cycle_period_s = f64::INFINITY;
        assert!(params.validate().is_err());

        // Arrival would be reported on the first profiling cycle
        let mut params = test_params();
        params.settle_cycles = 0;
        assert!(params.validate().is_err());

        assert!(Params::default().validate().is_err());
    }
}
