//! Joint angle estimation
//!
//! Each joint carries a potentiometer, which is absolute but noisy and coarse,
//! and a motor encoder, whose rate is smooth but only relative. A
//! complementary filter blends the two: the previous estimate is propagated by
//! the motor rate and pulled towards the potentiometer angle by a fixed
//! weight.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::debug;
use serde::{Deserialize, Serialize};

use super::{JointAngles, Params};
use crate::mech::{JointReading, NUM_JOINTS};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Offset of one joint's potentiometer angle from the joint angle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JointCalibration {
    /// Units: degrees
    pub offset_deg: f64,
}

/// Calibration of all joints, produced by mastering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub joints: [JointCalibration; NUM_JOINTS],
    pub has_master_values: bool,
}

#[derive(Debug, Clone)]
pub struct AngleEstimator {
    calibration: Calibration,
    pot_deg_per_count: [f64; NUM_JOINTS],
    gear_ratio: [f64; NUM_JOINTS],
    blend_weight: f64,
    period_s: f64,

    raw: JointAngles,
    best: JointAngles,
    seeded: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl AngleEstimator {
    pub fn new(params: &Params) -> Self {
        Self {
            calibration: Calibration::default(),
            pot_deg_per_count: params.pot_deg_per_count,
            gear_ratio: params.gear_ratio,
            blend_weight: params.blend_weight,
            period_s: params.cycle_period_s,
            raw: JointAngles::default(),
            best: JointAngles::default(),
            seeded: false,
        }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Replace the calibration. The next update restarts the estimate from
    /// the potentiometer angles.
    pub fn set_calibration(&mut self, calibration: Calibration) {
        self.calibration = calibration;
        self.seeded = false;
    }

    /// Calibrated potentiometer angles from the last update.
    pub fn raw(&self) -> JointAngles {
        self.raw
    }

    /// Blended angles from the last update.
    pub fn best(&self) -> JointAngles {
        self.best
    }

    /// Update the estimate with one cycle's readings.
    pub fn update(&mut self, readings: &[JointReading; NUM_JOINTS]) -> JointAngles {
        let mut raw = [0.0; NUM_JOINTS];
        let mut best = self.best.to_array();

        for i in 0..NUM_JOINTS {
            raw[i] = readings[i].sensor_value as f64 * self.pot_deg_per_count[i]
                - self.calibration.joints[i].offset_deg;

            if self.seeded {
                let rate_degs = readings[i].motor_velocity_dps / self.gear_ratio[i];
                let propagated = best[i] + rate_degs * self.period_s;

                best[i] = self.blend_weight * propagated + (1.0 - self.blend_weight) * raw[i];
            } else {
                best[i] = raw[i];
            }
        }

        if !self.seeded {
            debug!("Angle estimate seeded at {:?}", raw);
            self.seeded = true;
        }

        self.raw = JointAngles::from_array(raw);
        self.best = JointAngles::from_array(best);

        self.best
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arm_ctrl::test_params;

    fn reading(sensor_value: i32, motor_velocity_dps: f64) -> JointReading {
        JointReading {
            sensor_value,
            motor_velocity_dps,
            motor_rotation_deg: 0.0,
        }
    }

    fn estimator() -> AngleEstimator {
        let mut params = test_params();
        params.pot_deg_per_count = [0.1; NUM_JOINTS];
        params.gear_ratio = [2.0; NUM_JOINTS];
        params.blend_weight = 0.9;
        params.cycle_period_s = 0.01;
        AngleEstimator::new(&params)
    }

    #[test]
    fn test_seed_and_blend() {
        let mut est = estimator();

        let best = est.update(&[reading(100, 0.0); NUM_JOINTS]);
        assert_eq!(best, JointAngles::new(10.0, 10.0, 10.0, 10.0));

        // Rate propagates 200/2 deg/s * 0.01 s = 1 deg, pot reads 12 deg
        let best = est.update(&[reading(120, 200.0); NUM_JOINTS]);
        let expected = 0.9 * 11.0 + 0.1 * 12.0;
        assert!((best.j1 - expected).abs() < 1e-12);
        assert!((est.raw().j4 - 12.0).abs() < 1e-12);
    }

    #[test]
    fn test_converges_to_pot() {
        let mut est = estimator();
        est.update(&[reading(0, 0.0); NUM_JOINTS]);

        for _ in 0..500 {
            est.update(&[reading(50, 0.0); NUM_JOINTS]);
        }

        assert!((est.best().j2 - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_calibration_reseeds() {
        let mut est = estimator();
        est.update(&[reading(100, 0.0); NUM_JOINTS]);

        let mut cal = Calibration::default();
        cal.joints[2].offset_deg = 4.0;
        cal.has_master_values = true;
        est.set_calibration(cal);

        let best = est.update(&[reading(100, 500.0); NUM_JOINTS]);
        assert_eq!(best.j3, 6.0);
        assert_eq!(best.j1, 10.0);
    }
}
