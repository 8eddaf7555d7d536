//! Guest memory bus.
//!
//! Every engine load and store lands here. Control-window addresses go to
//! the trap dispatcher; addresses inside `[image_base, image_base +
//! capacity)` go to the backing store as little-endian spans. Unaligned RAM
//! accesses are allowed. Anything else is fatal to the step.

use crate::engine::GuestBus;
use crate::memory::map::{decode_address, AddressRegion};
use crate::memory::{check_span, AccessWidth, BackingStore};
use crate::trap::{ConsoleSink, GuestMemory, TrapDispatcher, TrapVerdict};
use crate::VmError;

/// Access counters and last-address latches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusDiagnostics {
    /// Guest address of the most recent load.
    pub last_load_addr: Option<u32>,
    /// Guest address of the most recent store.
    pub last_store_addr: Option<u32>,
    /// Saturating count of RAM loads.
    pub ram_loads: u64,
    /// Saturating count of RAM stores.
    pub ram_stores: u64,
    /// Saturating count of control-window loads.
    pub control_loads: u64,
    /// Saturating count of control-window stores.
    pub control_stores: u64,
    /// Saturating count of rejected accesses.
    pub rejected: u64,
}

/// Routes guest accesses to RAM or the trap dispatcher.
#[derive(Debug)]
pub struct MemoryBus<S, C> {
    ram: S,
    image_base: u32,
    trap: TrapDispatcher<C>,
    diagnostics: BusDiagnostics,
}

struct RamView<'a, S> {
    ram: &'a mut S,
    image_base: u32,
}

impl<S: BackingStore> GuestMemory for RamView<'_, S> {
    fn peek(&mut self, addr: u32) -> Result<Option<u8>, VmError> {
        match decode_address(addr, self.image_base, self.ram.capacity()) {
            AddressRegion::Ram { offset } => {
                let mut byte = [0_u8; 1];
                self.ram.read(offset, &mut byte)?;
                Ok(Some(byte[0]))
            }
            AddressRegion::Control | AddressRegion::Unmapped => Ok(None),
        }
    }
}

impl<S: BackingStore, C: ConsoleSink> MemoryBus<S, C> {
    /// Creates a bus mapping `ram` at `image_base`.
    pub const fn new(ram: S, image_base: u32, trap: TrapDispatcher<C>) -> Self {
        Self {
            ram,
            image_base,
            trap,
            diagnostics: BusDiagnostics {
                last_load_addr: None,
                last_store_addr: None,
                ram_loads: 0,
                ram_stores: 0,
                control_loads: 0,
                control_stores: 0,
                rejected: 0,
            },
        }
    }

    /// Guest-physical base of RAM.
    #[must_use]
    pub const fn image_base(&self) -> u32 {
        self.image_base
    }

    /// Returns the backing store.
    #[must_use]
    pub const fn ram(&self) -> &S {
        &self.ram
    }

    /// Returns the backing store mutably.
    pub const fn ram_mut(&mut self) -> &mut S {
        &mut self.ram
    }

    /// Returns the trap dispatcher.
    #[must_use]
    pub const fn trap(&self) -> &TrapDispatcher<C> {
        &self.trap
    }

    /// Returns the trap dispatcher mutably.
    pub const fn trap_mut(&mut self) -> &mut TrapDispatcher<C> {
        &mut self.trap
    }

    /// Returns access counters.
    #[must_use]
    pub const fn diagnostics(&self) -> &BusDiagnostics {
        &self.diagnostics
    }

    /// Splits the bus into its store and dispatcher.
    #[must_use]
    pub fn into_parts(self) -> (S, TrapDispatcher<C>) {
        (self.ram, self.trap)
    }

    fn resolve(&mut self, width: AccessWidth, addr: u32) -> Result<AddressRegion, VmError> {
        let capacity = self.ram.capacity();
        let region = decode_address(addr, self.image_base, capacity);
        let fits = match region {
            AddressRegion::Control => true,
            AddressRegion::Ram { offset } => {
                check_span(offset, usize::from(width.bytes()), capacity).is_ok()
            }
            AddressRegion::Unmapped => false,
        };
        if fits {
            return Ok(region);
        }
        self.diagnostics.rejected = self.diagnostics.rejected.saturating_add(1);
        log::warn!(
            "rejected {}-byte access at 0x{addr:08x} outside mapped windows",
            width.bytes()
        );
        Err(VmError::OutOfRange {
            addr,
            width: width.bytes(),
            capacity,
        })
    }
}

impl<S: BackingStore, C: ConsoleSink> GuestBus for MemoryBus<S, C> {
    fn load(&mut self, width: AccessWidth, addr: u32) -> Result<u32, VmError> {
        self.diagnostics.last_load_addr = Some(addr);
        match self.resolve(width, addr)? {
            AddressRegion::Control => {
                self.diagnostics.control_loads = self.diagnostics.control_loads.saturating_add(1);
                Ok(self.trap.control_load(addr) & width.mask())
            }
            AddressRegion::Ram { offset } => {
                self.diagnostics.ram_loads = self.diagnostics.ram_loads.saturating_add(1);
                let mut buf = [0_u8; 4];
                self.ram
                    .read(offset, &mut buf[..usize::from(width.bytes())])?;
                Ok(u32::from_le_bytes(buf))
            }
            AddressRegion::Unmapped => Err(VmError::OutOfRange {
                addr,
                width: width.bytes(),
                capacity: self.ram.capacity(),
            }),
        }
    }

    fn store(&mut self, width: AccessWidth, addr: u32, value: u32) -> Result<(), VmError> {
        self.diagnostics.last_store_addr = Some(addr);
        match self.resolve(width, addr)? {
            AddressRegion::Control => {
                self.diagnostics.control_stores =
                    self.diagnostics.control_stores.saturating_add(1);
                self.trap.control_store(addr, value & width.mask());
                Ok(())
            }
            AddressRegion::Ram { offset } => {
                self.diagnostics.ram_stores = self.diagnostics.ram_stores.saturating_add(1);
                let bytes = value.to_le_bytes();
                self.ram.write(offset, &bytes[..usize::from(width.bytes())])
            }
            AddressRegion::Unmapped => Err(VmError::OutOfRange {
                addr,
                width: width.bytes(),
                capacity: self.ram.capacity(),
            }),
        }
    }

    fn handle_exception(&mut self, ir: u32, code: u32) -> TrapVerdict {
        self.trap.handle_exception(ir, code)
    }

    fn other_csr_write(&mut self, csrno: u16, value: u32) -> Result<(), VmError> {
        let mut view = RamView {
            ram: &mut self.ram,
            image_base: self.image_base,
        };
        self.trap.handle_other_csr_write(csrno, value, &mut view)
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryBus;
    use crate::engine::GuestBus;
    use crate::memory::map::{DEFAULT_IMAGE_BASE, UART_DATA, UART_LINE_STATUS};
    use crate::memory::{AccessWidth, InMemoryStore};
    use crate::peripherals::{Uart, LSR_BASE};
    use crate::trap::{TrapDispatcher, CSR_DEBUG_STRING};
    use crate::VmError;

    const RAM: u32 = 4096;

    fn bus() -> MemoryBus<InMemoryStore, Vec<u8>> {
        MemoryBus::new(
            InMemoryStore::new(RAM),
            DEFAULT_IMAGE_BASE,
            TrapDispatcher::new(Vec::new(), Uart::new(8), false),
        )
    }

    #[test]
    fn ram_word_is_little_endian() {
        let mut bus = bus();
        bus.store(AccessWidth::Word, DEFAULT_IMAGE_BASE + 8, 0x1122_3344)
            .expect("in range");
        assert_eq!(&bus.ram().as_bytes()[8..12], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(
            bus.load(AccessWidth::Half, DEFAULT_IMAGE_BASE + 9)
                .expect("in range"),
            0x2233
        );
        assert_eq!(
            bus.load(AccessWidth::Byte, DEFAULT_IMAGE_BASE + 11)
                .expect("in range"),
            0x11
        );
    }

    #[test]
    fn narrow_stores_leave_neighbours_untouched() {
        let mut bus = bus();
        bus.store(AccessWidth::Word, DEFAULT_IMAGE_BASE, u32::MAX)
            .expect("in range");
        bus.store(AccessWidth::Byte, DEFAULT_IMAGE_BASE + 1, 0x1234_5600)
            .expect("in range");
        assert_eq!(
            bus.load(AccessWidth::Word, DEFAULT_IMAGE_BASE)
                .expect("in range"),
            0xFFFF_00FF
        );
    }

    #[test]
    fn last_word_of_ram_is_reachable_but_overhang_is_rejected() {
        let mut bus = bus();
        let last = DEFAULT_IMAGE_BASE + RAM - 4;
        bus.store(AccessWidth::Word, last, 7).expect("in range");
        assert_eq!(bus.load(AccessWidth::Word, last).expect("in range"), 7);

        let overhang = bus.load(AccessWidth::Word, last + 1);
        assert!(matches!(
            overhang,
            Err(VmError::OutOfRange { width: 4, .. })
        ));
        assert_eq!(bus.diagnostics().rejected, 1);
    }

    #[test]
    fn unmapped_addresses_are_fatal_and_touch_nothing() {
        let mut bus = bus();
        assert!(bus.store(AccessWidth::Word, 0x0000_0000, 1).is_err());
        assert!(bus.load(AccessWidth::Byte, DEFAULT_IMAGE_BASE - 1).is_err());
        assert!(bus.ram().as_bytes().iter().all(|byte| *byte == 0));
        assert_eq!(bus.diagnostics().last_load_addr, Some(DEFAULT_IMAGE_BASE - 1));
        assert_eq!(bus.diagnostics().last_store_addr, Some(0));
    }

    #[test]
    fn uart_store_goes_to_console_not_ram() {
        let mut bus = bus();
        bus.store(AccessWidth::Byte, UART_DATA, 0x41).expect("mapped");
        assert_eq!(bus.trap().console().as_slice(), b"A");
        assert!(bus.ram().as_bytes().iter().all(|byte| *byte == 0));
        assert_eq!(bus.diagnostics().control_stores, 1);
        assert_eq!(bus.diagnostics().ram_stores, 0);
    }

    #[test]
    fn uart_loads_route_through_dispatcher() {
        let mut bus = bus();
        assert_eq!(
            bus.load(AccessWidth::Byte, UART_LINE_STATUS).expect("mapped"),
            LSR_BASE
        );
        bus.trap().uart_input().push(b'q').expect("room");
        assert_eq!(
            bus.load(AccessWidth::Byte, UART_DATA).expect("mapped"),
            u32::from(b'q')
        );
    }

    #[test]
    fn debug_string_csr_reads_guest_ram() {
        let mut bus = bus();
        for (index, byte) in (0_u32..).zip(b"ok\0") {
            bus.store(
                AccessWidth::Byte,
                DEFAULT_IMAGE_BASE + 0x100 + index,
                u32::from(*byte),
            )
            .expect("in range");
        }
        bus.other_csr_write(CSR_DEBUG_STRING, DEFAULT_IMAGE_BASE + 0x100)
            .expect("readable");
        assert_eq!(bus.trap().console().as_slice(), b"ok");
    }
}
