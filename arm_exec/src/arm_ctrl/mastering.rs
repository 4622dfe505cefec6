//! Mastering calibration
//!
//! With the arm held at the mastering pose the raw potentiometer readings of
//! every joint are recorded. Each reading must lie inside its expected range,
//! otherwise the whole set is rejected.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};

use super::{ArmCtrlError, Calibration, JointCalibration, MasteringViolation, Params};
use crate::mech::{JointId, NUM_JOINTS};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MasteringCalibrator {
    min_raw: [i32; NUM_JOINTS],
    max_raw: [i32; NUM_JOINTS],
    ref_deg: [f64; NUM_JOINTS],
    pot_deg_per_count: [f64; NUM_JOINTS],
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MasteringCalibrator {
    pub fn new(params: &Params) -> Self {
        Self {
            min_raw: params.mastering_min_raw,
            max_raw: params.mastering_max_raw,
            ref_deg: params.mastering_ref_deg,
            pot_deg_per_count: params.pot_deg_per_count,
        }
    }

    /// Compute the calibration from the raw readings taken at the mastering
    /// pose.
    ///
    /// Every reading is checked before anything is computed and all
    /// violations are reported together.
    pub fn calibrate(&self, raw: [i32; NUM_JOINTS]) -> Result<Calibration, ArmCtrlError> {
        let mut violations = Vec::new();

        for joint in JointId::arm_ids().iter() {
            let i = joint.index();

            if raw[i] < self.min_raw[i] || raw[i] > self.max_raw[i] {
                let v = MasteringViolation {
                    joint: *joint,
                    raw: raw[i],
                    min: self.min_raw[i],
                    max: self.max_raw[i],
                };
                warn!("Mastering value out of range: {}", v);
                violations.push(v);
            }
        }

        if !violations.is_empty() {
            return Err(ArmCtrlError::MasteringOutOfRange(violations));
        }

        let mut calibration = Calibration {
            has_master_values: true,
            ..Default::default()
        };

        for i in 0..NUM_JOINTS {
            calibration.joints[i] = JointCalibration {
                offset_deg: raw[i] as f64 * self.pot_deg_per_count[i] - self.ref_deg[i],
            };
        }

        info!("Mastering values accepted: {:?}", raw);

        Ok(calibration)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arm_ctrl::test_params;

    #[test]
    fn test_calibrate() {
        let mut params = test_params();
        params.mastering_min_raw = [100; NUM_JOINTS];
        params.mastering_max_raw = [200; NUM_JOINTS];
        params.mastering_ref_deg = [0.0, 90.0, -90.0, 0.0];
        params.pot_deg_per_count = [0.5; NUM_JOINTS];

        let cal = MasteringCalibrator::new(&params)
            .calibrate([100, 150, 200, 120])
            .unwrap();

        assert!(cal.has_master_values);
        assert_eq!(cal.joints[0].offset_deg, 50.0);
        assert_eq!(cal.joints[1].offset_deg, -15.0);
        assert_eq!(cal.joints[2].offset_deg, 190.0);
        assert_eq!(cal.joints[3].offset_deg, 60.0);
    }

    #[test]
    fn test_reject_all_violations() {
        let mut params = test_params();
        params.mastering_min_raw = [100; NUM_JOINTS];
        params.mastering_max_raw = [200; NUM_JOINTS];

        match MasteringCalibrator::new(&params).calibrate([150, 99, 150, 201]) {
            Err(ArmCtrlError::MasteringOutOfRange(v)) => {
                assert_eq!(v.len(), 2);
                assert_eq!(v[0].joint, JointId::Shoulder);
                assert_eq!(v[0].raw, 99);
                assert_eq!(v[1].joint, JointId::Wrist);
                assert_eq!(v[1].max, 200);
            }
            r => panic!("Expected mastering out of range, got {:?}", r),
        }
    }
}
