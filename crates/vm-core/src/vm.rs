//! The VM context: lifecycle, per-tick scheduling, boot, and snapshots.
//!
//! A [`Vm`] owns the CPU register block, the memory bus (and through it the
//! backing store, UART, and console), and the pacing clock. The host drives
//! it by issuing lifecycle commands and calling [`Vm::tick`] from its timer.

use crate::config::VmConfig;
use crate::engine::{EngineStatus, StepEngine};
use crate::memory::{BackingStore, BusDiagnostics, MemoryBus};
use crate::peripherals::{Uart, UartInput};
use crate::snapshot::{SnapshotMedium, SnapshotRecord};
use crate::state::{CpuState, HaltReason, VmState};
use crate::timing::{MonotonicClock, SchedulerClock, TimeSource};
use crate::trap::{ConsoleSink, TrapDiagnostics, TrapDispatcher};
use crate::VmError;

/// What a single [`Vm::tick`] did.
#[derive(Debug)]
pub enum TickOutcome {
    /// The VM was not running; the engine was not called.
    Skipped,
    /// The engine returned normally.
    Continued,
    /// The engine used its whole instruction budget.
    BudgetExhausted,
    /// The guest powered off; the VM is now halted.
    PoweredOff,
    /// The guest requested a restart; the CPU is back at its boot state.
    Restarted,
    /// The engine returned an unrecognised status; the VM keeps running.
    UnknownStatus(u32),
    /// An unrecognised status halted the VM under fail-on-all-faults.
    FaultHalted(u32),
    /// The engine aborted; the VM is now halted.
    Fatal(VmError),
}

impl TickOutcome {
    /// Returns `true` when this tick moved the VM to `Halted`.
    #[must_use]
    pub const fn halted(&self) -> bool {
        matches!(
            self,
            Self::PoweredOff | Self::FaultHalted(_) | Self::Fatal(_)
        )
    }
}

/// A single hosted RV32IMA machine.
#[derive(Debug)]
pub struct Vm<S, C, T = MonotonicClock> {
    config: VmConfig,
    cpu: CpuState,
    clock: SchedulerClock,
    time_source: T,
    bus: MemoryBus<S, C>,
    state: VmState,
}

impl<S: BackingStore, C: ConsoleSink> Vm<S, C, MonotonicClock> {
    /// Builds a stopped VM paced by the host monotonic clock when
    /// [`crate::Pacing::WallClock`] is configured.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidConfig`] when `config` does not validate,
    /// or [`VmError::StoreCapacityMismatch`] when `store` is not exactly
    /// `config.ram_size` bytes.
    pub fn new(config: VmConfig, store: S, console: C) -> Result<Self, VmError> {
        Self::with_time_source(config, store, console, MonotonicClock::new())
    }
}

impl<S: BackingStore, C: ConsoleSink, T: TimeSource> Vm<S, C, T> {
    /// Builds a stopped VM reading wall-clock time from `time_source`.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Vm::new`].
    pub fn with_time_source(
        config: VmConfig,
        store: S,
        console: C,
        time_source: T,
    ) -> Result<Self, VmError> {
        config.validate()?;
        if store.capacity() != config.ram_size {
            return Err(VmError::StoreCapacityMismatch {
                expected: config.ram_size,
                actual: store.capacity(),
            });
        }
        let trap = TrapDispatcher::new(
            console,
            Uart::new(config.uart_rx_capacity),
            config.fail_on_all_faults,
        );
        let bus = MemoryBus::new(store, config.image_base, trap);
        let clock = SchedulerClock::new(config.pacing, config.time_divisor);
        log::debug!(
            "created vm: {} bytes of ram at 0x{:08x}",
            config.ram_size,
            config.image_base
        );
        Ok(Self {
            config,
            cpu: CpuState::default(),
            clock,
            time_source,
            bus,
            state: VmState::Stopped,
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> VmState {
        self.state
    }

    /// CPU register block.
    #[must_use]
    pub const fn cpu(&self) -> &CpuState {
        &self.cpu
    }

    /// CPU register block, mutably.
    pub const fn cpu_mut(&mut self) -> &mut CpuState {
        &mut self.cpu
    }

    /// Scheduler time mark reached by the last tick.
    #[must_use]
    pub const fn last_time(&self) -> u64 {
        self.clock.last_time()
    }

    /// Console sink.
    #[must_use]
    pub const fn console(&self) -> &C {
        self.bus.trap().console()
    }

    /// Console sink, mutably.
    pub const fn console_mut(&mut self) -> &mut C {
        self.bus.trap_mut().console_mut()
    }

    /// Producer handle for the guest's UART input.
    #[must_use]
    pub fn uart_input(&self) -> UartInput {
        self.bus.trap().uart_input()
    }

    /// Backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        self.bus.ram()
    }

    /// Backing store, mutably.
    pub const fn store_mut(&mut self) -> &mut S {
        self.bus.ram_mut()
    }

    /// Memory bus counters.
    #[must_use]
    pub const fn bus_diagnostics(&self) -> &BusDiagnostics {
        self.bus.diagnostics()
    }

    /// Trap dispatcher counters.
    #[must_use]
    pub const fn trap_diagnostics(&self) -> &TrapDiagnostics {
        self.bus.trap().diagnostics()
    }

    /// Takes the backing store and console back out of the VM.
    #[must_use]
    pub fn into_parts(self) -> (S, C) {
        let (store, trap) = self.bus.into_parts();
        let console = trap.into_console();
        (store, console)
    }

    /// Boots the CPU and moves `Stopped` to `Paused`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidTransition`] from any other state.
    pub fn power_on(&mut self) -> Result<(), VmError> {
        self.require(VmState::Stopped, "power on")?;
        self.boot();
        self.transition(VmState::Paused);
        Ok(())
    }

    /// Moves `Paused` to `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidTransition`] from any other state.
    pub fn run(&mut self) -> Result<(), VmError> {
        self.require(VmState::Paused, "run")?;
        self.transition(VmState::Running);
        Ok(())
    }

    /// Moves `Running` to `Paused`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidTransition`] from any other state.
    pub fn pause(&mut self) -> Result<(), VmError> {
        self.require(VmState::Running, "pause")?;
        self.transition(VmState::Paused);
        Ok(())
    }

    /// Reboots the CPU, rewinds the time mark, drops pending UART input,
    /// and moves to `Paused` from any state. RAM contents are left alone.
    pub fn reset(&mut self) {
        self.reboot();
        self.transition(VmState::Paused);
    }

    fn require(&self, expected: VmState, command: &'static str) -> Result<(), VmError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(VmError::InvalidTransition {
                from: self.state,
                command,
            })
        }
    }

    fn transition(&mut self, next: VmState) {
        if self.state != next {
            log::info!("vm {:?} -> {:?}", self.state, next);
        }
        self.state = next;
    }

    fn boot(&mut self) {
        self.cpu = self.config.boot_cpu_state();
        self.clock.reset(&mut self.time_source);
    }

    fn reboot(&mut self) {
        self.boot();
        self.bus.trap_mut().uart_mut().clear();
    }

    /// Runs one scheduling quantum.
    ///
    /// Does nothing unless the VM is `Running`. Otherwise computes the
    /// elapsed time since the last tick, lets `engine` execute up to
    /// `instructions_per_tick` instructions, and applies the status it
    /// returns.
    pub fn tick<E: StepEngine + ?Sized>(&mut self, engine: &mut E) -> TickOutcome {
        if !self.state.is_running() {
            return TickOutcome::Skipped;
        }
        let elapsed_us = self.clock.advance(&self.cpu, &mut self.time_source);
        let result = engine.step(
            &mut self.cpu,
            &mut self.bus,
            self.config.image_base,
            elapsed_us,
            self.config.instructions_per_tick,
        );
        match result {
            Ok(code) => self.apply_status(code),
            Err(err) => {
                log::error!("engine aborted at pc 0x{:08x}: {err}", self.cpu.pc);
                self.console_mut().write_str(&format!("FATAL: {err}\n"));
                self.transition(VmState::Halted(HaltReason::EngineError));
                TickOutcome::Fatal(err)
            }
        }
    }

    fn apply_status(&mut self, code: u32) -> TickOutcome {
        match EngineStatus::from_code(code) {
            EngineStatus::Ok => TickOutcome::Continued,
            EngineStatus::BudgetExhausted => {
                let quota = u64::from(self.config.instructions_per_tick);
                self.cpu.set_cycle(self.cpu.cycle().wrapping_add(quota));
                TickOutcome::BudgetExhausted
            }
            EngineStatus::PowerOff => {
                self.console_mut().write_str("POWEROFF!\n");
                log::info!("guest powered off after {} cycles", self.cpu.cycle());
                self.transition(VmState::Halted(HaltReason::PowerOff));
                TickOutcome::PoweredOff
            }
            EngineStatus::Restart => {
                log::info!("guest requested restart");
                self.reboot();
                TickOutcome::Restarted
            }
            EngineStatus::Fault | EngineStatus::Unknown(_) => {
                self.console_mut().write_str("Unknown failure\n");
                log::warn!("engine returned unknown status 0x{code:x}");
                if self.config.fail_on_all_faults {
                    self.transition(VmState::Halted(HaltReason::FaultEscalated {
                        status: code,
                    }));
                    TickOutcome::FaultHalted(code)
                } else {
                    TickOutcome::UnknownStatus(code)
                }
            }
        }
    }

    /// Copies a kernel image to the start of RAM.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::ImageTooLarge`] when the image would reach the DTB
    /// area, or [`VmError::Storage`] when the store fails.
    pub fn load_image(&mut self, image: &[u8]) -> Result<(), VmError> {
        let limit = self.config.dtb_offset();
        if image.len() > limit as usize {
            return Err(VmError::ImageTooLarge {
                limit,
                actual: image.len(),
            });
        }
        self.store_mut().write(0, image)?;
        log::debug!("loaded {} byte image", image.len());
        Ok(())
    }

    /// Copies a device-tree blob to its reserved slot near the top of RAM.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::DtbSize`] unless the blob is exactly `dtb_size`
    /// bytes, or [`VmError::Storage`] when the store fails.
    pub fn load_dtb(&mut self, dtb: &[u8]) -> Result<(), VmError> {
        if dtb.len() != self.config.dtb_size as usize {
            return Err(VmError::DtbSize {
                expected: self.config.dtb_size,
                actual: dtb.len(),
            });
        }
        let offset = self.config.dtb_offset();
        self.store_mut().write(offset, dtb)?;
        log::debug!("loaded dtb at 0x{:08x}", self.config.dtb_pointer());
        Ok(())
    }

    /// Current CPU state and time mark as a record.
    #[must_use]
    pub const fn snapshot(&self) -> SnapshotRecord {
        SnapshotRecord {
            cpu: self.cpu,
            last_time: self.clock.last_time(),
        }
    }

    /// Writes the CPU state and time mark to `medium`, replacing any
    /// previous record. RAM is not included.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Storage`] when the medium fails.
    pub fn save_snapshot(&self, medium: &mut dyn SnapshotMedium) -> Result<(), VmError> {
        medium.commit(&self.snapshot().to_bytes())?;
        log::debug!(
            "saved snapshot at pc 0x{:08x}, last_time {}",
            self.cpu.pc,
            self.clock.last_time()
        );
        Ok(())
    }

    /// Restores CPU state and time mark from `medium`.
    ///
    /// A load counts as an explicit reset for lifecycle purposes: a
    /// `Stopped` or `Halted` VM becomes `Paused`, while `Paused` and
    /// `Running` are kept.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SnapshotMissing`], [`VmError::SnapshotLength`], or
    /// [`VmError::Storage`]; the VM is unchanged in every case.
    pub fn load_snapshot(&mut self, medium: &mut dyn SnapshotMedium) -> Result<(), VmError> {
        let bytes = medium.fetch()?;
        let record = SnapshotRecord::from_bytes(&bytes)?;
        self.restore(record);
        Ok(())
    }

    /// Applies a decoded record; see [`Vm::load_snapshot`].
    pub fn restore(&mut self, record: SnapshotRecord) {
        self.cpu = record.cpu;
        self.clock.set_last_time(record.last_time, &mut self.time_source);
        log::debug!(
            "restored snapshot at pc 0x{:08x}, last_time {}",
            self.cpu.pc,
            record.last_time
        );
        if matches!(self.state, VmState::Stopped | VmState::Halted(_)) {
            self.transition(VmState::Paused);
        }
    }
}
