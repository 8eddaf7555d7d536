//! Contract between the scheduler and the RV32IMA stepping engine.
//!
//! The engine decodes and retires instructions, owns the CLINT timer and
//! syscon registers, and delivers interrupts. Everything else it needs from
//! the host goes through [`GuestBus`].

use crate::memory::AccessWidth;
use crate::state::CpuState;
use crate::trap::TrapVerdict;
use crate::VmError;

/// Engine status: step completed normally.
pub const STATUS_OK: u32 = 0;
/// Engine status: instruction budget exhausted.
pub const STATUS_BUDGET_EXHAUSTED: u32 = 1;
/// Engine status: a fault was escalated by the trap dispatcher.
pub const STATUS_FAULT: u32 = 3;
/// Engine status: guest wrote the power-off code to syscon.
pub const STATUS_POWER_OFF: u32 = 0x5555;
/// Engine status: guest wrote the restart code to syscon.
pub const STATUS_RESTART: u32 = 0x7777;

/// Host services the stepping engine calls while executing.
///
/// Addresses are guest-physical. Loads return the value zero-extended to
/// 32 bits; sign extension is the engine's concern.
pub trait GuestBus {
    /// Loads `width` bytes little-endian from `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::OutOfRange`] when the access hits neither the
    /// control window nor RAM, or [`VmError::Storage`] when the backing
    /// medium fails. Both are fatal to the step.
    fn load(&mut self, width: AccessWidth, addr: u32) -> Result<u32, VmError>;

    /// Stores the low `width` bytes of `value` little-endian at `addr`.
    ///
    /// # Errors
    ///
    /// Same conditions as [`GuestBus::load`].
    fn store(&mut self, width: AccessWidth, addr: u32, value: u32) -> Result<(), VmError>;

    /// Applies fault policy to exception `code` raised by instruction `ir`.
    fn handle_exception(&mut self, ir: u32, code: u32) -> TrapVerdict;

    /// Handles a write to a CSR outside the architectural set.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Storage`] when a debug CSR cannot read guest RAM.
    fn other_csr_write(&mut self, csrno: u16, value: u32) -> Result<(), VmError>;
}

/// An RV32IMA stepping engine.
pub trait StepEngine {
    /// Executes up to `max_instructions` instructions, advancing the timer
    /// by `elapsed_us` first. `image_base` is the guest-physical base of
    /// RAM.
    ///
    /// Returns a raw status code, see [`EngineStatus::from_code`].
    ///
    /// # Errors
    ///
    /// Propagates bus errors, which abort the step.
    fn step(
        &mut self,
        cpu: &mut CpuState,
        bus: &mut dyn GuestBus,
        image_base: u32,
        elapsed_us: u32,
        max_instructions: u32,
    ) -> Result<u32, VmError>;
}

/// Classified engine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineStatus {
    /// Step finished without incident.
    Ok,
    /// The instruction budget ran out.
    BudgetExhausted,
    /// A fault was escalated.
    Fault,
    /// Guest requested power-off.
    PowerOff,
    /// Guest requested a restart.
    Restart,
    /// Any other code.
    Unknown(u32),
}

impl EngineStatus {
    /// Classifies a raw status code.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            STATUS_OK => Self::Ok,
            STATUS_BUDGET_EXHAUSTED => Self::BudgetExhausted,
            STATUS_FAULT => Self::Fault,
            STATUS_POWER_OFF => Self::PowerOff,
            STATUS_RESTART => Self::Restart,
            other => Self::Unknown(other),
        }
    }

    /// Returns the raw status code.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Ok => STATUS_OK,
            Self::BudgetExhausted => STATUS_BUDGET_EXHAUSTED,
            Self::Fault => STATUS_FAULT,
            Self::PowerOff => STATUS_POWER_OFF,
            Self::Restart => STATUS_RESTART,
            Self::Unknown(code) => code,
        }
    }
}
