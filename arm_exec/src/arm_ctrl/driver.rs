//! Periodic task running the control loop against the arm's devices

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{error, info, warn};
use std::mem;
use std::sync::{atomic::Ordering, Arc};

use util::scheduler::Periodic;

use super::shared::Shared;
use super::*;
use crate::mech::{BrakeMode, DeviceRegistry, JointDemand, JointDevices, JointReading, NUM_JOINTS};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The arm's control task.
///
/// Each tick reads every joint, runs one control cycle and issues the
/// resulting demands. Any failure during a cycle emergency stops the arm.
pub struct ArmDriver {
    ctrl: ControlLoop,
    registry: DeviceRegistry,
    joints: [JointDevices; NUM_JOINTS],
    shared: Arc<Shared>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ArmDriver {
    pub(crate) fn new(
        ctrl: ControlLoop,
        registry: DeviceRegistry,
        joints: [JointDevices; NUM_JOINTS],
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            ctrl,
            registry,
            joints,
            shared,
        }
    }

    /// True if this task serves the arm owning `shared`.
    pub(crate) fn is_driven_by(&self, shared: &Arc<Shared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    pub fn control_loop(&self) -> &ControlLoop {
        &self.ctrl
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Execute one control cycle.
    pub fn cycle(&mut self) -> Result<(), ArmCtrlError> {
        let result = self.cycle_inner();

        if let Err(ref e) = result {
            error!("Control cycle failed, emergency stopping: {}", e);
            self.shared.estop.store(true, Ordering::SeqCst);

            if let Ok(mut inner) = self.shared.inner.lock() {
                inner.state = ArmState::EmergencyStopped;
            }

            self.stop_all(BrakeMode::Brake);
        }

        result
    }

    fn cycle_inner(&mut self) -> Result<(), ArmCtrlError> {
        // Read the devices before touching any shared state
        let mut readings = [JointReading::default(); NUM_JOINTS];
        for (r, j) in readings.iter_mut().zip(self.joints.iter()) {
            *r = self.registry.read_joint(j)?;
        }

        let estop = self.shared.estop.load(Ordering::SeqCst);

        // Take a snapshot of the requests since the last cycle
        let (state, changes) = {
            let mut inner = self.shared.inner.lock()?;
            (inner.state, mem::take(&mut inner.pending))
        };

        let (demands, mut report) = self.ctrl.proc(LoopInput {
            readings,
            estop,
            state,
            changes,
        })?;

        for (j, d) in self.joints.iter().zip(demands.iter()) {
            self.registry.apply(j, d)?;
        }

        // Publish the outcome
        {
            let mut inner = self.shared.inner.lock()?;

            if self.shared.estop.load(Ordering::SeqCst) {
                inner.state = ArmState::EmergencyStopped;
            } else if inner.state == ArmState::Profiling && report.arrived_seq == Some(inner.move_seq) {
                info!("ArmState: Profiling -> Settled");
                inner.state = ArmState::Settled;
            } else if let Some(seq) = report.arrived_seq {
                warn!("Move {} arrived after being superseded", seq);
            }

            report.state = inner.state;
            report.estop = self.shared.estop.load(Ordering::SeqCst);
        }

        *self.shared.status.write()? = report;

        Ok(())
    }

    /// Stop every joint, ignoring failures of individual devices.
    fn stop_all(&mut self, mode: BrakeMode) {
        for j in self.joints.iter() {
            if let Err(e) = self.registry.apply(j, &JointDemand::Stop(mode)) {
                error!("Could not stop joint: {}", e);
            }
        }
    }
}

impl Periodic for ArmDriver {
    fn tick(&mut self) {
        // Errors are logged and acted on inside the cycle
        self.cycle().ok();
    }
}
