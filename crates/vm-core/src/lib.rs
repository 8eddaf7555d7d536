//! Execution substrate for a hosted RV32IMA virtual machine.
//!
//! The crate provides everything around an external instruction-stepping
//! engine: guest RAM on a pluggable backing store, the memory bus and
//! control window, a polled UART, trap and debug-CSR dispatch, a tick-driven
//! scheduler with a small lifecycle state machine, and CPU state snapshots.

/// Error taxonomy for configuration, storage, and lifecycle failures.
pub mod fault;
pub use fault::VmError;

/// CPU register block and VM lifecycle state.
pub mod state;
pub use state::{
    CpuState, HaltReason, VmState, CPU_STATE_BYTES, CPU_STATE_WORDS, EXTRAFLAGS_PRIVILEGE_MASK,
    EXTRAFLAGS_WFI, GENERAL_REGISTER_COUNT, PRIVILEGE_MACHINE, REG_A0, REG_A1,
};

/// Address map, backing stores, and the guest memory bus.
pub mod memory;
pub use memory::{
    check_span, decode_address, device_at, is_control_addr, ram_window_is_disjoint,
    AccessWidth, AddressRegion, BackingStore, BusDiagnostics, DeviceRegister, InMemoryStore,
    MemoryBus, SeekStore, CLINT_MTIME, CLINT_MTIMECMP, CONTROL_END, CONTROL_START,
    DEFAULT_IMAGE_BASE, DEVICE_ADDRESS_MAP, SYSCON, UART_DATA, UART_LINE_STATUS,
};

/// Host-emulated devices.
pub mod peripherals;
pub use peripherals::{
    Uart, UartInput, UartQueueError, DEFAULT_RX_CAPACITY, LSR_BASE, LSR_DATA_READY,
};

/// Guest exception, debug CSR, and console dispatch.
pub mod trap;
pub use trap::{
    ConsoleSink, GuestMemory, StdoutConsole, TrapDiagnostics, TrapDispatcher, TrapVerdict,
    CSR_DEBUG_DECIMAL, CSR_DEBUG_HEX, CSR_DEBUG_STRING, DEBUG_STRING_LIMIT,
    FAULT_ESCALATED_STATUS, GUEST_BREAKPOINT_CODE,
};

/// Stepping engine contract and status codes.
pub mod engine;
pub use engine::{
    EngineStatus, GuestBus, StepEngine, STATUS_BUDGET_EXHAUSTED, STATUS_FAULT, STATUS_OK,
    STATUS_POWER_OFF, STATUS_RESTART,
};

/// Tick pacing sources and the scheduler time mark.
pub mod timing;
pub use timing::{
    MonotonicClock, Pacing, SchedulerClock, TimeSource, DEFAULT_INSTRUCTIONS_PER_TICK,
    DEFAULT_TIME_DIVISOR,
};

/// VM configuration and validation.
pub mod config;
pub use config::{VmConfig, DEFAULT_DTB_SIZE, DEFAULT_RAM_SIZE};

/// Snapshot record codec and persistence media.
pub mod snapshot;
pub use snapshot::{
    FileSnapshot, MemorySnapshot, SnapshotMedium, SnapshotRecord, SNAPSHOT_RECORD_BYTES,
};

/// VM context: lifecycle, scheduling, boot, and snapshots.
pub mod vm;
pub use vm::{TickOutcome, Vm};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
#[cfg(test)]
use tempfile as _;
