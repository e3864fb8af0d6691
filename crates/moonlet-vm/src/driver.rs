//! Stepped execution: run a top-level call a slice of instructions at a
//! time so a host scheduler can interleave the VM with other work.

use crate::dispatch::{self, RunExit};
use crate::error::LuaError;
use crate::vm::Vm;
use moonlet_core::value::TValue;
use thiserror::Error;

/// Result of one [`Driver::step`].
#[derive(Clone, Debug, PartialEq)]
pub enum StepResult {
    /// The entry function returned these values.
    Returned(Vec<TValue>),
    /// The budget ran out; call `step` again.
    Pending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Running,
    Returned,
    /// An error escaped the entry function. Permanent.
    Crashed(String),
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("the VM is busy with another call")]
    Busy,
    #[error("no call in progress")]
    NotRunning,
    #[error("restart is only possible after the entry returned")]
    CannotRestart,
    #[error("driver crashed: {0}")]
    Crashed(String),
    #[error(transparent)]
    Lua(#[from] LuaError),
}

/// Drives one entry function on the main thread.
///
/// The entry and its arguments are anchored in the VM from the first
/// `start` until the driver crashes or is closed, so `restart` still finds
/// them after collections.
#[derive(Debug)]
pub struct Driver {
    entry: TValue,
    args: Vec<TValue>,
    state: DriverState,
    anchored: bool,
}

impl Driver {
    pub fn new(entry: TValue, args: Vec<TValue>) -> Self {
        Driver {
            entry,
            args,
            state: DriverState::Idle,
            anchored: false,
        }
    }

    pub fn state(&self) -> &DriverState {
        &self.state
    }

    /// Push the entry call. The VM must be idle.
    pub fn start(&mut self, vm: &mut Vm) -> Result<(), DriverError> {
        match &self.state {
            DriverState::Idle => {}
            DriverState::Crashed(msg) => return Err(DriverError::Crashed(msg.clone())),
            DriverState::Running | DriverState::Returned => return Err(DriverError::Busy),
        }
        if !vm.is_idle() {
            return Err(DriverError::Busy);
        }
        if !self.anchored {
            vm.anchor(self.entry);
            for &a in &self.args {
                vm.anchor(a);
            }
            self.anchored = true;
        }
        if let Err(e) = dispatch::start_run(vm, self.entry, &self.args) {
            return Err(self.crash(vm, e));
        }
        tracing::info!(target: "moonlet::driver", nargs = self.args.len(), "started");
        self.state = DriverState::Running;
        Ok(())
    }

    /// Execute at most `budget` instructions.
    pub fn step(&mut self, vm: &mut Vm, budget: u64) -> Result<StepResult, DriverError> {
        match &self.state {
            DriverState::Running => {}
            DriverState::Crashed(msg) => return Err(DriverError::Crashed(msg.clone())),
            DriverState::Idle | DriverState::Returned => return Err(DriverError::NotRunning),
        }
        match dispatch::run(vm, Some(budget)) {
            Ok(RunExit::Paused) => Ok(StepResult::Pending),
            Ok(RunExit::Finished(values)) => {
                tracing::info!(target: "moonlet::driver", nresults = values.len(), "returned");
                self.state = DriverState::Returned;
                Ok(StepResult::Returned(values))
            }
            Err(e) => Err(self.crash(vm, e)),
        }
    }

    /// Run the same entry again after it returned.
    pub fn restart(&mut self, vm: &mut Vm) -> Result<(), DriverError> {
        match &self.state {
            DriverState::Returned => {
                tracing::info!(target: "moonlet::driver", "restarting");
                self.state = DriverState::Idle;
                self.start(vm)
            }
            DriverState::Crashed(msg) => Err(DriverError::Crashed(msg.clone())),
            _ => Err(DriverError::CannotRestart),
        }
    }

    /// Step until the entry returns.
    pub fn run_to_end(&mut self, vm: &mut Vm, slice: u64) -> Result<Vec<TValue>, DriverError> {
        loop {
            if let StepResult::Returned(values) = self.step(vm, slice)? {
                return Ok(values);
            }
        }
    }

    /// Drop the anchors of a driver that will not run again.
    pub fn close(mut self, vm: &mut Vm) {
        self.release(vm);
    }

    fn release(&mut self, vm: &mut Vm) {
        if self.anchored {
            vm.release(self.entry);
            for &a in &self.args {
                vm.release(a);
            }
            self.anchored = false;
        }
    }

    fn crash(&mut self, vm: &mut Vm, err: LuaError) -> DriverError {
        self.release(vm);
        let msg = err.message();
        tracing::warn!(target: "moonlet::driver", error = %msg, "crashed");
        self.state = DriverState::Crashed(msg);
        DriverError::Lua(err)
    }
}
