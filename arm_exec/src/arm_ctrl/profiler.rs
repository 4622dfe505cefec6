//! # Motion profiler
//!
//! Advances a profiled position towards a target one control cycle at a time.
//! Each cycle a raw step is taken towards the target, limited by the profile
//! velocity, and integrated into the unfiltered position. The raw step is
//! then passed through the acceleration filter and the velocity filter in
//! turn, and the doubly filtered step is integrated into the profiled
//! position. Both filters are primed with zero steps when a profile starts,
//! so the profiled position ends exactly where the unfiltered one does.
//!
//! In linear mode the four channels are the X, Y, Z and A components of the
//! tool tip pose, in joint mode they are the four joint angles.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use util::maths::within_tol;

use super::{ArmCtrlError, JointAngles, Pose, RingFilter, Sample4};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Velocity limits applied to the raw profile step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileVelocity {
    /// Tool tip speed in linear moves.
    ///
    /// Units: arm linear units/second
    pub linear: f64,

    /// Tool angle rate in linear moves.
    ///
    /// Units: degrees/second
    pub angular_degs: f64,

    /// Rate of each joint in joint moves.
    ///
    /// Units: degrees/second
    pub joint_degs: f64,
}

/// A validated move handed from the supervisor to the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionTarget {
    /// Sequence number of the move, used to match arrival to the request.
    pub seq: u64,
    pub mode: ProfileMode,

    /// Target tool tip pose.
    pub pose: Pose,

    /// Target joint angles, the inverse solution of `pose`.
    pub angles: JointAngles,
}

#[derive(Debug, Clone)]
pub struct MotionProfiler {
    mode: ProfileMode,
    active: bool,

    target: Sample4,
    pos: Sample4,
    unfil: Sample4,

    vel_filter: RingFilter,
    acc_filter: RingFilter,

    /// Filter lengths waiting for the profile to come to rest.
    pending_lens: Option<(usize, usize)>,

    velocity: ProfileVelocity,
    period_s: f64,

    /// Number of consecutive cycles within tolerance of the target.
    settled_count: u32,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileMode {
    /// Straight line motion of the tool tip in cartesian space.
    Linear,

    /// Motion of each joint in joint space.
    Joint,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MotionTarget {
    /// The target in the channels profiled by its mode.
    pub fn sample(&self) -> Sample4 {
        match self.mode {
            ProfileMode::Linear => self.pose.to_sample(),
            ProfileMode::Joint => self.angles.to_sample(),
        }
    }
}

impl ProfileVelocity {
    pub fn validate(&self) -> Result<(), ArmCtrlError> {
        for v in [self.linear, self.angular_degs, self.joint_degs].iter() {
            if !(v.is_finite() && *v > 0.0) {
                return Err(ArmCtrlError::InvalidVelocity(*v));
            }
        }

        Ok(())
    }
}

impl MotionProfiler {
    pub fn new(
        velocity: ProfileVelocity,
        vel_filter_len: usize,
        acc_filter_len: usize,
        period_s: f64,
    ) -> Result<Self, ArmCtrlError> {
        velocity.validate()?;

        Ok(Self {
            mode: ProfileMode::Joint,
            active: false,
            target: Sample4::zeros(),
            pos: Sample4::zeros(),
            unfil: Sample4::zeros(),
            vel_filter: RingFilter::new(vel_filter_len)?,
            acc_filter: RingFilter::new(acc_filter_len)?,
            pending_lens: None,
            velocity,
            period_s,
            settled_count: 0,
        })
    }

    pub fn mode(&self) -> ProfileMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The profiled position.
    pub fn pos(&self) -> Sample4 {
        self.pos
    }

    /// The unfiltered position.
    pub fn unfiltered(&self) -> Sample4 {
        self.unfil
    }

    pub fn target(&self) -> Sample4 {
        self.target
    }

    pub fn velocity(&self) -> ProfileVelocity {
        self.velocity
    }

    /// Current velocity and acceleration filter lengths, including any change
    /// not yet applied.
    pub fn filter_lens(&self) -> (usize, usize) {
        self.pending_lens
            .unwrap_or((self.vel_filter.len(), self.acc_filter.len()))
    }

    /// Set the profile velocity, taking effect from the next step.
    pub fn set_velocity(&mut self, velocity: ProfileVelocity) -> Result<(), ArmCtrlError> {
        velocity.validate()?;
        self.velocity = velocity;
        Ok(())
    }

    /// Set the velocity and acceleration filter lengths.
    ///
    /// Both lengths are validated before either is used. While a profile is
    /// running the change is held until the profile finishes.
    pub fn set_filter_lens(&mut self, vel_len: usize, acc_len: usize) -> Result<(), ArmCtrlError> {
        RingFilter::new(vel_len)?;
        RingFilter::new(acc_len)?;

        if self.active {
            debug!(
                "Profile running, filter lengths ({}, {}) deferred",
                vel_len, acc_len
            );
            self.pending_lens = Some((vel_len, acc_len));
        } else {
            self.vel_filter.configure(vel_len)?;
            self.acc_filter.configure(acc_len)?;
            self.pending_lens = None;
        }

        Ok(())
    }

    /// Start profiling towards `target`.
    ///
    /// If a profile in the same mode is already running it is retargeted
    /// without disturbing its motion. Otherwise the profile restarts at rest
    /// from `current`, which must be in the channels of `mode`.
    pub fn start(&mut self, mode: ProfileMode, target: Sample4, current: Sample4) {
        if !(self.active && self.mode == mode) {
            self.mode = mode;
            self.pos = current;
            self.unfil = current;
            self.vel_filter.prime(Sample4::zeros());
            self.acc_filter.prime(Sample4::zeros());
            self.active = true;
        }

        self.target = target;
        self.settled_count = 0;

        debug!("Profiling {:?} towards {}", mode, target.transpose());
    }

    /// Advance the profile by one period, returning the new profiled
    /// position.
    pub fn step(&mut self) -> Sample4 {
        if !self.active {
            return self.pos;
        }

        let delta = self.target - self.unfil;
        let ratio = self.step_ratio(&delta);
        let raw = delta / ratio;

        self.unfil += raw;

        let acc_out = self.acc_filter.push(raw);
        let vel_out = self.vel_filter.push(acc_out);
        self.pos += vel_out;

        trace!("Profile step {}", vel_out.transpose());

        self.pos
    }

    /// Debounced arrival check.
    ///
    /// `best` is the measured position in the profile's channels. Arrival
    /// requires the unfiltered position, the profiled position and `best` to
    /// all be within the per channel `tolerance` of the target for
    /// `settle_cycles` consecutive calls.
    pub fn position_arrived(&mut self, best: &Sample4, tolerance: &Sample4, settle_cycles: u32) -> bool {
        if !self.active {
            return false;
        }

        let within = |s: &Sample4| {
            self.target
                .iter()
                .zip(s.iter())
                .zip(tolerance.iter())
                .all(|((a, b), t)| within_tol(*a, *b, *t))
        };

        if within(&self.unfil) && within(&self.pos) && within(best) {
            self.settled_count = self.settled_count.saturating_add(1);
        } else {
            self.settled_count = 0;
        }

        self.settled_count >= settle_cycles
    }

    /// End the profile after arrival.
    pub fn finish(&mut self) {
        self.stop();
    }

    /// Stop profiling immediately.
    pub fn stop(&mut self) {
        self.active = false;
        self.settled_count = 0;

        if let Some((vel_len, acc_len)) = self.pending_lens.take() {
            // Lengths were validated when requested
            if self.vel_filter.configure(vel_len).is_ok() && self.acc_filter.configure(acc_len).is_ok() {
                debug!("Applied deferred filter lengths ({}, {})", vel_len, acc_len);
            }
        }
    }

    /// Factor the raw step to the target must be divided by to respect the
    /// profile velocity, never less than one.
    fn step_ratio(&self, delta: &Sample4) -> f64 {
        let mut ratio: f64 = 1.0;

        match self.mode {
            ProfileMode::Linear => {
                let lin = (delta.x.powi(2) + delta.y.powi(2) + delta.z.powi(2)).sqrt();
                ratio = ratio.max(lin / (self.velocity.linear * self.period_s));
                ratio = ratio.max(delta.w.abs() / (self.velocity.angular_degs * self.period_s));
            }
            ProfileMode::Joint => {
                for d in delta.iter() {
                    ratio = ratio.max(d.abs() / (self.velocity.joint_degs * self.period_s));
                }
            }
        }

        ratio
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const PERIOD_S: f64 = 0.01;

    fn profiler(vel_len: usize, acc_len: usize) -> MotionProfiler {
        MotionProfiler::new(
            ProfileVelocity {
                linear: 10.0,
                angular_degs: 90.0,
                joint_degs: 25.0,
            },
            vel_len,
            acc_len,
            PERIOD_S,
        )
        .unwrap()
    }

    fn run_to_arrival(p: &mut MotionProfiler, max_steps: usize) -> (usize, f64) {
        let tol = Sample4::repeat(1e-6);
        let mut prev = p.pos();
        let mut max_speed: f64 = 0.0;

        for i in 0..max_steps {
            let pos = p.step();
            let d = pos - prev;
            let speed = match p.mode() {
                ProfileMode::Linear => (d.x.powi(2) + d.y.powi(2) + d.z.powi(2)).sqrt() / PERIOD_S,
                ProfileMode::Joint => d.amax() / PERIOD_S,
            };
            max_speed = max_speed.max(speed);
            prev = pos;

            if p.position_arrived(&pos, &tol, 1) {
                return (i + 1, max_speed);
            }
        }

        panic!("Profile did not arrive in {} steps", max_steps);
    }

    #[test]
    fn test_linear_velocity_bound() {
        let mut p = profiler(50, 50);
        p.set_filter_lens(50, 50).unwrap();

        p.start(
            ProfileMode::Linear,
            Sample4::new(100.0, 0.0, 0.0, 0.0),
            Sample4::zeros(),
        );

        let (steps, max_speed) = run_to_arrival(&mut p, 2000);

        assert!(max_speed <= 10.0 + 1e-9, "max speed {}", max_speed);

        // 10 s at full speed plus the filter delays
        assert!(steps >= 1000 && steps <= 1100, "{} steps", steps);
        assert!((p.pos().x - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_smooth_start() {
        let mut p = profiler(50, 50);
        p.start(
            ProfileMode::Linear,
            Sample4::new(0.0, 0.0, 50.0, 0.0),
            Sample4::zeros(),
        );

        // Speed rises gradually from rest
        let first = p.step().z;
        assert!(first > 0.0 && first < 0.1 / 100.0);

        let mut prev = first;
        let mut prev_step = first;
        for _ in 0..99 {
            let z = p.step().z;
            assert!(z - prev >= prev_step - 1e-12);
            prev_step = z - prev;
            prev = z;
        }

        // Full speed after both filters fill
        assert!((prev_step - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_joint_mode_limits_each_joint() {
        let mut p = profiler(1, 1);
        p.start(
            ProfileMode::Joint,
            Sample4::new(10.0, -50.0, 5.0, 0.0),
            Sample4::zeros(),
        );

        // Largest move is limited to 25 deg/s, the others scaled with it
        let pos = p.step();
        assert!((pos.y + 0.25).abs() < 1e-12);
        assert!((pos.x - 0.05).abs() < 1e-12);

        let (_, max_speed) = run_to_arrival(&mut p, 1000);
        assert!(max_speed <= 25.0 + 1e-9);
    }

    #[test]
    fn test_angular_limit() {
        let mut p = profiler(1, 1);
        p.start(
            ProfileMode::Linear,
            Sample4::new(0.1, 0.0, 0.0, 90.0),
            Sample4::zeros(),
        );

        let pos = p.step();
        assert!((pos.w - 0.9).abs() < 1e-12);
        assert!((pos.x - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_retarget_keeps_motion() {
        let mut p = profiler(10, 10);
        p.start(
            ProfileMode::Linear,
            Sample4::new(10.0, 0.0, 0.0, 0.0),
            Sample4::zeros(),
        );

        for _ in 0..30 {
            p.step();
        }
        let pos = p.pos();
        let unfil = p.unfiltered();

        p.start(
            ProfileMode::Linear,
            Sample4::new(0.0, 10.0, 0.0, 0.0),
            Sample4::new(99.0, 99.0, 99.0, 99.0),
        );

        assert_eq!(p.pos(), pos);
        assert_eq!(p.unfiltered(), unfil);

        // Switching mode restarts from the given position
        p.start(
            ProfileMode::Joint,
            Sample4::new(1.0, 2.0, 3.0, 4.0),
            Sample4::new(5.0, 5.0, 5.0, 5.0),
        );
        assert_eq!(p.pos(), Sample4::repeat(5.0));
    }

    #[test]
    fn test_deferred_filter_lens() {
        let mut p = profiler(50, 50);
        p.start(
            ProfileMode::Linear,
            Sample4::new(1.0, 0.0, 0.0, 0.0),
            Sample4::zeros(),
        );

        p.set_filter_lens(5, 6).unwrap();
        assert_eq!(p.filter_lens(), (5, 6));
        assert_eq!(p.vel_filter.len(), 50);

        match p.set_filter_lens(0, 6) {
            Err(ArmCtrlError::InvalidFilterLength(0)) => (),
            r => panic!("Expected invalid filter length, got {:?}", r),
        }
        assert_eq!(p.filter_lens(), (5, 6));

        p.finish();
        assert_eq!(p.vel_filter.len(), 5);
        assert_eq!(p.acc_filter.len(), 6);
        assert!(!p.is_active());
    }

    #[test]
    fn test_arrival_debounce() {
        let mut p = profiler(1, 1);
        p.start(ProfileMode::Joint, Sample4::zeros(), Sample4::zeros());

        let tol = Sample4::repeat(0.5);
        let far = Sample4::new(0.0, 0.0, 1.0, 0.0);

        assert!(!p.position_arrived(&Sample4::zeros(), &tol, 3));
        assert!(!p.position_arrived(&Sample4::zeros(), &tol, 3));
        assert!(!p.position_arrived(&far, &tol, 3));
        assert!(!p.position_arrived(&Sample4::zeros(), &tol, 3));
        assert!(!p.position_arrived(&Sample4::zeros(), &tol, 3));
        assert!(p.position_arrived(&Sample4::zeros(), &tol, 3));
    }
}
