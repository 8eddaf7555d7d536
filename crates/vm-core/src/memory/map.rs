//! Fixed device address map and guest-physical address decoding.

/// Inclusive start of the control (MMIO) window.
pub const CONTROL_START: u32 = 0x1000_0000;
/// Inclusive end of the control (MMIO) window.
pub const CONTROL_END: u32 = 0x11FF_FFFF;

/// UART 8250/16550 receive/transmit data register.
pub const UART_DATA: u32 = 0x1000_0000;
/// UART 8250/16550 line-status register.
pub const UART_LINE_STATUS: u32 = 0x1000_0005;
/// CLINT `mtimecmp` register, handled inside the stepping engine.
pub const CLINT_MTIMECMP: u32 = 0x1100_4000;
/// CLINT `mtime` register, handled inside the stepping engine.
pub const CLINT_MTIME: u32 = 0x1100_BFF8;
/// Syscon power-off/restart register, handled inside the stepping engine.
pub const SYSCON: u32 = 0x1110_0000;

/// Default guest-physical base of the backing-store window.
pub const DEFAULT_IMAGE_BASE: u32 = 0x8000_0000;

/// Device registers known to the control window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRegister {
    /// UART data register.
    UartData,
    /// UART line-status register.
    UartLineStatus,
    /// CLINT compare register (engine-owned).
    ClintTimerMatch,
    /// CLINT timer register (engine-owned).
    ClintTimer,
    /// Syscon register (engine-owned).
    Syscon,
}

impl DeviceRegister {
    /// Returns the fixed physical address of this register.
    #[must_use]
    pub const fn addr(self) -> u32 {
        match self {
            Self::UartData => UART_DATA,
            Self::UartLineStatus => UART_LINE_STATUS,
            Self::ClintTimerMatch => CLINT_MTIMECMP,
            Self::ClintTimer => CLINT_MTIME,
            Self::Syscon => SYSCON,
        }
    }

    /// Returns `true` for registers emulated by this crate rather than by
    /// the stepping engine.
    #[must_use]
    pub const fn is_host_owned(self) -> bool {
        matches!(self, Self::UartData | Self::UartLineStatus)
    }
}

/// Static device address table in ascending address order.
pub const DEVICE_ADDRESS_MAP: [DeviceRegister; 5] = [
    DeviceRegister::UartData,
    DeviceRegister::UartLineStatus,
    DeviceRegister::ClintTimerMatch,
    DeviceRegister::ClintTimer,
    DeviceRegister::Syscon,
];

const _: () = assert_device_map_layout();

const fn assert_device_map_layout() {
    let mut index = 0;
    while index < DEVICE_ADDRESS_MAP.len() {
        let addr = DEVICE_ADDRESS_MAP[index].addr();
        assert!(
            addr >= CONTROL_START && addr <= CONTROL_END,
            "device registers must sit inside the control window"
        );
        if index > 0 {
            assert!(
                DEVICE_ADDRESS_MAP[index - 1].addr() < addr,
                "device map must be strictly ascending"
            );
        }
        index += 1;
    }

    assert!(
        CONTROL_END < DEFAULT_IMAGE_BASE,
        "default backing-store window must lie above the control window"
    );
}

/// Where a guest-physical address is routed by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressRegion {
    /// Control window; handled by the trap dispatcher.
    Control,
    /// Backing-store window at the given byte offset.
    Ram {
        /// Offset from the image base.
        offset: u32,
    },
    /// Neither window.
    Unmapped,
}

/// Returns `true` when `addr` lies in the control window.
#[must_use]
pub const fn is_control_addr(addr: u32) -> bool {
    addr >= CONTROL_START && addr <= CONTROL_END
}

/// Looks up the device register at an exact address.
#[must_use]
pub const fn device_at(addr: u32) -> Option<DeviceRegister> {
    match addr {
        UART_DATA => Some(DeviceRegister::UartData),
        UART_LINE_STATUS => Some(DeviceRegister::UartLineStatus),
        CLINT_MTIMECMP => Some(DeviceRegister::ClintTimerMatch),
        CLINT_MTIME => Some(DeviceRegister::ClintTimer),
        SYSCON => Some(DeviceRegister::Syscon),
        _ => None,
    }
}

/// Decodes a guest-physical address against the control window first and
/// the backing-store window `[image_base, image_base + capacity)` second.
#[must_use]
pub const fn decode_address(addr: u32, image_base: u32, capacity: u32) -> AddressRegion {
    if is_control_addr(addr) {
        return AddressRegion::Control;
    }
    let offset = addr.wrapping_sub(image_base);
    if addr >= image_base && offset < capacity {
        AddressRegion::Ram { offset }
    } else {
        AddressRegion::Unmapped
    }
}

/// Returns `true` when the backing-store window `[image_base, image_base +
/// capacity)` fits in the 32-bit space without touching the control window.
#[must_use]
pub const fn ram_window_is_disjoint(image_base: u32, capacity: u32) -> bool {
    let Some(end) = image_base.checked_add(capacity) else {
        // A window ending exactly at 4 GiB is still representable.
        return (image_base as u64) + (capacity as u64) == 1 << 32
            && image_base > CONTROL_END;
    };
    end <= CONTROL_START || image_base > CONTROL_END
}
