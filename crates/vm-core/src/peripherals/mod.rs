//! Host-emulated devices reachable through the control window.

/// 8250/16550-style serial port.
pub mod uart;

pub use uart::{Uart, UartInput, UartQueueError, DEFAULT_RX_CAPACITY, LSR_BASE, LSR_DATA_READY};
