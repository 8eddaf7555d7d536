//! CPU register block and VM lifecycle state.

/// Machine-mode register block shared with the stepping engine.
pub mod registers;
/// VM lifecycle states and halt reasons.
pub mod run_state;

pub use registers::{
    CpuState, CPU_STATE_BYTES, CPU_STATE_WORDS, EXTRAFLAGS_PRIVILEGE_MASK, EXTRAFLAGS_WFI,
    GENERAL_REGISTER_COUNT, PRIVILEGE_MACHINE, REG_A0, REG_A1,
};
pub use run_state::{HaltReason, VmState};
