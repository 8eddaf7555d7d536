//! Guest memory: address map, backing storage, and the routing bus.

/// Pluggable byte-addressable storage for guest RAM.
pub mod backing;
/// Bus routing guest accesses to RAM or the control window.
pub mod bus;
/// Fixed device address map and address decoder.
pub mod map;

pub use backing::{check_span, BackingStore, InMemoryStore, SeekStore};
pub use bus::{BusDiagnostics, MemoryBus};
pub use map::{
    decode_address, device_at, is_control_addr, ram_window_is_disjoint, AddressRegion,
    DeviceRegister, CLINT_MTIME, CLINT_MTIMECMP, CONTROL_END, CONTROL_START, DEFAULT_IMAGE_BASE,
    DEVICE_ADDRESS_MAP, SYSCON, UART_DATA, UART_LINE_STATUS,
};

/// Width of a single guest load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessWidth {
    /// 8-bit access.
    Byte,
    /// 16-bit access.
    Half,
    /// 32-bit access.
    Word,
}

impl AccessWidth {
    /// Number of bytes transferred.
    #[must_use]
    pub const fn bytes(self) -> u8 {
        match self {
            Self::Byte => 1,
            Self::Half => 2,
            Self::Word => 4,
        }
    }

    /// Mask selecting the bits this width carries.
    #[must_use]
    pub const fn mask(self) -> u32 {
        match self {
            Self::Byte => 0xFF,
            Self::Half => 0xFFFF,
            Self::Word => u32::MAX,
        }
    }

    /// Maps a byte count back to a width.
    #[must_use]
    pub const fn from_bytes(bytes: u8) -> Option<Self> {
        match bytes {
            1 => Some(Self::Byte),
            2 => Some(Self::Half),
            4 => Some(Self::Word),
            _ => None,
        }
    }
}
