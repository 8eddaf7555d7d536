use std::io;

use thiserror::Error;

use crate::state::VmState;

/// Error taxonomy for configuration, storage, and lifecycle failures.
///
/// Guest-visible CPU exceptions are not errors at this level; they flow
/// through [`crate::TrapVerdict`] and engine status codes instead.
#[derive(Debug, Error)]
pub enum VmError {
    /// A bus access fell outside both the control window and the mapped
    /// backing-store window.
    #[error("access of {width} byte(s) at 0x{addr:08x} is outside the mapped window (ram size 0x{capacity:08x})")]
    OutOfRange {
        /// Guest physical address of the access.
        addr: u32,
        /// Access width in bytes.
        width: u8,
        /// Backing-store capacity in bytes.
        capacity: u32,
    },
    /// A backing-store offset range exceeded the store capacity.
    #[error("backing store span 0x{offset:08x}+{len} exceeds capacity 0x{capacity:08x}")]
    StoreRange {
        /// First byte offset of the span.
        offset: u32,
        /// Span length in bytes.
        len: usize,
        /// Backing-store capacity in bytes.
        capacity: u32,
    },
    /// The configuration cannot describe a bootable machine.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The supplied backing store does not match the configured RAM size.
    #[error("backing store holds {actual} bytes but the configured ram size is {expected}")]
    StoreCapacityMismatch {
        /// Configured RAM size.
        expected: u32,
        /// Capacity reported by the store.
        actual: u32,
    },
    /// A snapshot record did not have the canonical length.
    #[error("snapshot record is {actual} bytes, expected {expected}")]
    SnapshotLength {
        /// Canonical record length.
        expected: usize,
        /// Length actually read.
        actual: usize,
    },
    /// The snapshot medium holds no record.
    #[error("no snapshot record has been saved")]
    SnapshotMissing,
    /// The device-tree blob size differs from the configured DTB size.
    #[error("device tree blob is {actual} bytes, configured dtb size is {expected}")]
    DtbSize {
        /// Configured DTB size.
        expected: u32,
        /// Supplied blob length.
        actual: usize,
    },
    /// The kernel image would overlap the DTB area.
    #[error("image of {actual} bytes does not fit below the dtb at offset 0x{limit:08x}")]
    ImageTooLarge {
        /// First byte offset reserved for the DTB.
        limit: u32,
        /// Supplied image length.
        actual: usize,
    },
    /// A lifecycle command is not valid in the current state.
    #[error("cannot {command} while {from:?}")]
    InvalidTransition {
        /// State the VM was in when the command arrived.
        from: VmState,
        /// Rejected command name.
        command: &'static str,
    },
    /// The backing store or snapshot medium reported an I/O failure.
    #[error("storage i/o failed: {0}")]
    Storage(#[from] io::Error),
}

impl VmError {
    /// Returns `true` for errors that indicate a mis-sized or mis-wired
    /// machine rather than a transient condition.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::OutOfRange { .. }
                | Self::StoreRange { .. }
                | Self::InvalidConfig(_)
                | Self::StoreCapacityMismatch { .. }
                | Self::SnapshotLength { .. }
                | Self::DtbSize { .. }
                | Self::ImageTooLarge { .. }
        )
    }
}
