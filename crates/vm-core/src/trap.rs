//! Trap and custom-CSR dispatch between the stepping engine and the host.
//!
//! The dispatcher owns the UART and the console sink. It receives guest
//! exceptions, debug CSR writes, and control-window accesses routed by the
//! memory bus, and turns them into host-visible output or halt decisions.

use std::io::{self, Write};

use crate::memory::map::device_at;
use crate::peripherals::{Uart, UartInput};
use crate::VmError;

/// CSR printing its value as a signed decimal integer.
pub const CSR_DEBUG_DECIMAL: u16 = 0x136;
/// CSR printing its value as eight lower-case hex digits.
pub const CSR_DEBUG_HEX: u16 = 0x137;
/// CSR printing the NUL-terminated guest string at the written address.
pub const CSR_DEBUG_STRING: u16 = 0x138;

/// Longest guest string printed through [`CSR_DEBUG_STRING`].
pub const DEBUG_STRING_LIMIT: usize = 1024;

/// Engine status reported when a fault is escalated.
pub const FAULT_ESCALATED_STATUS: u32 = 3;

/// Exception code the guest runtime raises (`ebreak`) on orderly exit.
pub const GUEST_BREAKPOINT_CODE: u32 = 3;

/// Host console output. Failures are not observable to the core.
pub trait ConsoleSink {
    /// Emits raw bytes.
    fn write_bytes(&mut self, bytes: &[u8]);

    /// Emits UTF-8 text.
    fn write_str(&mut self, text: &str) {
        self.write_bytes(text.as_bytes());
    }
}

/// Captures console output in memory.
impl ConsoleSink for Vec<u8> {
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Console sink writing to the process standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl ConsoleSink for StdoutConsole {
    fn write_bytes(&mut self, bytes: &[u8]) {
        let mut out = io::stdout().lock();
        let _ = out.write_all(bytes);
        let _ = out.flush();
    }
}

/// Read-only view of guest RAM used by debug CSRs.
pub trait GuestMemory {
    /// Reads the byte at a guest-physical address, or `None` when the
    /// address is outside the backing-store window.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Storage`] when the backing medium fails.
    fn peek(&mut self, addr: u32) -> Result<Option<u8>, VmError>;
}

/// Dispatcher decision for a guest exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrapVerdict {
    /// Hand the (possibly remapped) code back to the engine and continue.
    Resume(u32),
    /// Stop the step; the engine must return [`FAULT_ESCALATED_STATUS`].
    Escalate,
}

/// Counters describing dispatcher activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrapDiagnostics {
    /// Last exception code seen, if any.
    pub last_fault_code: Option<u32>,
    /// Instruction word that raised the last exception.
    pub last_fault_ir: u32,
    /// Saturating count of exceptions seen.
    pub faults_seen: u32,
    /// Saturating count of exceptions escalated as fatal.
    pub faults_escalated: u32,
    /// Saturating count of bytes transmitted by the UART.
    pub uart_bytes_out: u64,
}

impl TrapDiagnostics {
    const fn record_fault(&mut self, ir: u32, code: u32) {
        self.last_fault_code = Some(code);
        self.last_fault_ir = ir;
        self.faults_seen = self.faults_seen.saturating_add(1);
    }
}

/// Routes guest exceptions, debug CSR writes, and device accesses.
#[derive(Debug)]
pub struct TrapDispatcher<C> {
    console: C,
    uart: Uart,
    fail_on_all_faults: bool,
    diagnostics: TrapDiagnostics,
}

impl<C: ConsoleSink> TrapDispatcher<C> {
    /// Creates a dispatcher writing to `console`.
    pub const fn new(console: C, uart: Uart, fail_on_all_faults: bool) -> Self {
        Self {
            console,
            uart,
            fail_on_all_faults,
            diagnostics: TrapDiagnostics {
                last_fault_code: None,
                last_fault_ir: 0,
                faults_seen: 0,
                faults_escalated: 0,
                uart_bytes_out: 0,
            },
        }
    }

    /// Returns the console sink.
    #[must_use]
    pub const fn console(&self) -> &C {
        &self.console
    }

    /// Returns the console sink mutably.
    pub const fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    /// Consumes the dispatcher, returning the console sink.
    #[must_use]
    pub fn into_console(self) -> C {
        self.console
    }

    /// Returns the UART.
    #[must_use]
    pub const fn uart(&self) -> &Uart {
        &self.uart
    }

    /// Returns the UART, mutably.
    pub const fn uart_mut(&mut self) -> &mut Uart {
        &mut self.uart
    }

    /// Returns a producer handle for UART input.
    #[must_use]
    pub fn uart_input(&self) -> UartInput {
        self.uart.input()
    }

    /// Returns whether every guest fault is treated as fatal.
    #[must_use]
    pub const fn fail_on_all_faults(&self) -> bool {
        self.fail_on_all_faults
    }

    /// Returns the activity counters.
    #[must_use]
    pub const fn diagnostics(&self) -> &TrapDiagnostics {
        &self.diagnostics
    }

    /// Applies fault policy to an exception raised by instruction `ir`.
    #[must_use]
    pub fn handle_exception(&mut self, ir: u32, code: u32) -> TrapVerdict {
        self.diagnostics.record_fault(ir, code);
        if self.fail_on_all_faults {
            self.diagnostics.faults_escalated = self.diagnostics.faults_escalated.saturating_add(1);
            log::error!("guest fault {code} (ir 0x{ir:08x}) escalated");
            self.console.write_str("FAULT\n");
            return TrapVerdict::Escalate;
        }
        TrapVerdict::Resume(Self::translate_exception(ir, code))
    }

    fn translate_exception(ir: u32, code: u32) -> u32 {
        if code == GUEST_BREAKPOINT_CODE {
            log::debug!("guest breakpoint (ir 0x{ir:08x})");
        }
        code
    }

    /// Handles a load from the control window. Unclaimed addresses read 0.
    #[must_use]
    pub fn control_load(&mut self, addr: u32) -> u32 {
        if let Some(value) = self.uart.control_load(addr) {
            return value;
        }
        if device_at(addr).is_none() {
            log::trace!("control load from unassigned address 0x{addr:08x}");
        }
        0
    }

    /// Handles a store to the control window. Unclaimed addresses ignore it.
    pub fn control_store(&mut self, addr: u32, value: u32) {
        if let Some(byte) = self.uart.control_store(addr, value) {
            self.diagnostics.uart_bytes_out = self.diagnostics.uart_bytes_out.saturating_add(1);
            self.console.write_bytes(&[byte]);
        }
    }

    /// Handles a write to a CSR outside the architectural set.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Storage`] when reading a debug string fails.
    pub fn handle_other_csr_write(
        &mut self,
        csrno: u16,
        value: u32,
        memory: &mut dyn GuestMemory,
    ) -> Result<(), VmError> {
        match csrno {
            CSR_DEBUG_DECIMAL => {
                let signed = i32::from_ne_bytes(value.to_ne_bytes());
                self.console.write_str(&signed.to_string());
            }
            CSR_DEBUG_HEX => self.console.write_str(&format!("{value:08x}")),
            CSR_DEBUG_STRING => self.print_guest_string(value, memory)?,
            _ => log::trace!("ignored write of 0x{value:08x} to csr 0x{csrno:03x}"),
        }
        Ok(())
    }

    fn print_guest_string(&mut self, addr: u32, memory: &mut dyn GuestMemory) -> Result<(), VmError> {
        if memory.peek(addr)?.is_none() {
            self.console
                .write_str(&format!("DEBUG PASSED INVALID PTR ({addr:08x})\n"));
            return Ok(());
        }
        let mut text = Vec::new();
        let mut cursor = addr;
        while text.len() < DEBUG_STRING_LIMIT {
            match memory.peek(cursor)? {
                Some(0) | None => break,
                Some(byte) => text.push(byte),
            }
            cursor = cursor.wrapping_add(1);
        }
        self.console.write_bytes(&text);
        Ok(())
    }
}
