//! Arm forward and inverse kinematics
//!
//! The arm is a base rotation (J1) carrying a planar two link chain (J2
//! shoulder, J3 elbow) in the vertical plane through the base axis, followed
//! by the wrist (J4). Within the plane J2 is the elevation of link A from the
//! horizontal and J3 the angle of link B relative to link A. The tool angle
//! `a` is the sum of the planar angles and the wrist, `a = J2 + J3 + J4`.
//!
//! The fixed shoulder and tool offsets are applied in the radial/vertical
//! frame, followed by the user's tool tip offset.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::trace;

// Internal imports
use super::{ArmCtrlError, Geometry, JointAngles, Pose, ToolOffset};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Slack on the reach envelope so that poses produced by the forward solve on
/// the boundary of the envelope are accepted by the inverse solve.
const REACH_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Stateless solver between joint space and tool tip space.
#[derive(Debug, Clone, Copy, Default)]
pub struct Kinematics {
    geometry: Geometry,
    tool_offset: ToolOffset,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Kinematics {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            tool_offset: ToolOffset::default(),
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn tool_offset(&self) -> &ToolOffset {
        &self.tool_offset
    }

    pub fn set_tool_offset(&mut self, tool_offset: ToolOffset) {
        self.tool_offset = tool_offset;
    }

    /// Minimum and maximum shoulder to wrist distance.
    pub fn reach(&self) -> (f64, f64) {
        let g = &self.geometry;
        ((g.link_a - g.link_b).abs(), g.link_a + g.link_b)
    }

    /// Total radial offset from the base axis added to the planar chain.
    fn radial_offset(&self) -> f64 {
        self.geometry.shoulder_radial + self.geometry.tool_radial + self.tool_offset.dr
    }

    /// Total vertical offset added to the planar chain.
    fn height_offset(&self) -> f64 {
        self.geometry.shoulder_height + self.geometry.tool_height + self.tool_offset.dz
    }

    /// Perform the forward kinematics, finding the tool tip pose of the given
    /// joint angles.
    pub fn forward(&self, angles: &JointAngles) -> Pose {
        let g = &self.geometry;

        let base_rad = angles.j1.to_radians();
        let shoulder_rad = angles.j2.to_radians();
        let forearm_rad = (angles.j2 + angles.j3).to_radians();

        // Wrist position in the arm plane relative to the shoulder
        let planar_r = g.link_a * shoulder_rad.cos() + g.link_b * forearm_rad.cos();
        let planar_z = g.link_a * shoulder_rad.sin() + g.link_b * forearm_rad.sin();

        let radius = planar_r + self.radial_offset();
        let dp = self.tool_offset.dp;

        Pose {
            x: radius * base_rad.cos() - dp * base_rad.sin(),
            y: radius * base_rad.sin() + dp * base_rad.cos(),
            z: planar_z + self.height_offset(),
            a: angles.j2 + angles.j3 + angles.j4,
        }
    }

    /// Perform the inverse kinematics, finding the joint angles which place
    /// the tool tip at the given pose.
    ///
    /// Of the two solutions of the planar chain the elbow-up one (elbow above
    /// the shoulder-wrist line, J3 <= 0) is always chosen, so identical poses
    /// always give identical angles.
    ///
    /// Joint limits are not checked here, see [`JointAngles::check_limits`].
    pub fn inverse(&self, pose: &Pose) -> Result<JointAngles, ArmCtrlError> {
        let g = &self.geometry;
        let (min_reach, max_reach) = self.reach();
        let dp = self.tool_offset.dp;

        // Radius of the tool tip from the base axis, removing the
        // perpendicular tool offset.
        let horiz_sq = pose.x.powi(2) + pose.y.powi(2);
        if horiz_sq < dp.powi(2) {
            return Err(ArmCtrlError::OutOfReach {
                distance: horiz_sq.sqrt(),
                min: dp.abs(),
                max: std::f64::INFINITY,
            });
        }
        let radius = (horiz_sq - dp.powi(2)).sqrt();

        let base_rad = pose.y.atan2(pose.x) - dp.atan2(radius);

        // Wrist position in the arm plane relative to the shoulder
        let planar_r = radius - self.radial_offset();
        let planar_z = pose.z - self.height_offset();
        let distance = planar_r.hypot(planar_z);

        if distance > max_reach + REACH_EPSILON || distance < min_reach - REACH_EPSILON {
            trace!(
                "{:?} out of reach (distance {}, reach [{}, {}])",
                pose,
                distance,
                min_reach,
                max_reach
            );
            return Err(ArmCtrlError::OutOfReach {
                distance,
                min: min_reach,
                max: max_reach,
            });
        }

        // Law of cosines for the elbow, negative root for elbow-up
        let cos_elbow = ((distance.powi(2) - g.link_a.powi(2) - g.link_b.powi(2))
            / (2.0 * g.link_a * g.link_b))
            .max(-1.0)
            .min(1.0);
        let elbow_rad = -cos_elbow.acos();

        let shoulder_rad = planar_z.atan2(planar_r)
            - (g.link_b * elbow_rad.sin()).atan2(g.link_a + g.link_b * elbow_rad.cos());

        let j1 = base_rad.to_degrees();
        let j2 = shoulder_rad.to_degrees();
        let j3 = elbow_rad.to_degrees();

        Ok(JointAngles {
            j1,
            j2,
            j3,
            j4: pose.a - (j2 + j3),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const EPS: f64 = 1e-9;

    fn simple_arm() -> Kinematics {
        Kinematics::new(Geometry {
            link_a: 7.0,
            link_b: 7.0,
            ..Default::default()
        })
    }

    fn assert_pose_eq(a: &Pose, b: &Pose) {
        assert!(
            a.distance_to(b) < EPS && (a.a - b.a).abs() < EPS,
            "{:?} != {:?}",
            a,
            b
        );
    }

    #[test]
    fn test_reach_examples() {
        let kin = simple_arm();

        let angles = kin.inverse(&Pose::new(10.0, 0.0, 5.0, 0.0)).unwrap();
        assert_pose_eq(&kin.forward(&angles), &Pose::new(10.0, 0.0, 5.0, 0.0));

        match kin.inverse(&Pose::new(20.0, 0.0, 5.0, 0.0)) {
            Err(ArmCtrlError::OutOfReach { distance, min, max }) => {
                assert!((distance - 425f64.sqrt()).abs() < 1e-9);
                assert_eq!(min, 0.0);
                assert_eq!(max, 14.0);
            }
            r => panic!("Expected out of reach, got {:?}", r),
        }
    }

    #[test]
    fn test_inner_reach() {
        let kin = Kinematics::new(Geometry {
            link_a: 7.0,
            link_b: 4.0,
            ..Default::default()
        });

        assert!(kin.inverse(&Pose::new(2.0, 0.0, 0.0, 0.0)).is_err());
        assert!(kin.inverse(&Pose::new(3.0, 0.0, 0.0, 0.0)).is_ok());
        assert!(kin.inverse(&Pose::new(11.0, 0.0, 0.0, 0.0)).is_ok());
    }

    #[test]
    fn test_elbow_up() {
        let kin = simple_arm();
        let angles = kin.inverse(&Pose::new(10.0, 0.0, 0.0, 0.0)).unwrap();

        assert!(angles.j3 < 0.0);
        assert!(angles.j2 > 0.0);

        // Elbow is above the shoulder-wrist line
        assert!(7.0 * angles.j2.to_radians().sin() > 0.0);

        // Repeatable
        assert_eq!(angles, kin.inverse(&Pose::new(10.0, 0.0, 0.0, 0.0)).unwrap());
    }

    #[test]
    fn test_known_forward() {
        let kin = simple_arm();

        // Upper arm vertical, forearm horizontal pointing along +y
        let pose = kin.forward(&JointAngles::new(90.0, 90.0, -90.0, 30.0));
        assert_pose_eq(&pose, &Pose::new(0.0, 7.0, 7.0, 30.0));
    }

    #[test]
    fn test_round_trip() {
        let mut kin = Kinematics::new(Geometry {
            link_a: 7.0,
            link_b: 7.0,
            shoulder_radial: 0.7224,
            shoulder_height: 5.296,
            tool_radial: 1.9509,
            tool_height: -0.7555,
        });

        for offset in [
            ToolOffset::default(),
            ToolOffset {
                dr: 0.5,
                dp: -1.25,
                dz: 2.0,
            },
        ]
        .iter()
        {
            kin.set_tool_offset(*offset);

            let mut num_checked = 0;

            for xi in -12..=12 {
                for yi in -12..=12 {
                    for zi in -4..=16 {
                        let pose = Pose::new(
                            xi as f64 * 1.3,
                            yi as f64 * 1.1,
                            zi as f64 * 0.9,
                            (xi * yi) as f64,
                        );

                        if let Ok(angles) = kin.inverse(&pose) {
                            assert_pose_eq(&kin.forward(&angles), &pose);
                            num_checked += 1;
                        }
                    }
                }
            }

            assert!(num_checked > 1000);
        }
    }

    #[test]
    fn test_envelope_boundary() {
        let kin = simple_arm();

        // Fully extended arm lies exactly on the outer envelope
        let pose = kin.forward(&JointAngles::new(30.0, 20.0, 0.0, 0.0));
        let angles = kin.inverse(&pose).unwrap();
        assert!(angles.j3.abs() < 1e-6);
        assert_pose_eq(&kin.forward(&angles), &pose);
    }
}
