//! VM sizing, pacing, and fault policy.

use crate::memory::map::{ram_window_is_disjoint, DEFAULT_IMAGE_BASE};
use crate::peripherals::DEFAULT_RX_CAPACITY;
use crate::state::{CpuState, CPU_STATE_BYTES, PRIVILEGE_MACHINE, REG_A0, REG_A1};
use crate::timing::{Pacing, DEFAULT_INSTRUCTIONS_PER_TICK, DEFAULT_TIME_DIVISOR};
use crate::VmError;

/// Default guest RAM size (12 MiB).
pub const DEFAULT_RAM_SIZE: u32 = 12 * 1024 * 1024;
/// Default size reserved for the device-tree blob.
pub const DEFAULT_DTB_SIZE: u32 = 1536;

/// Configuration for a single VM instance.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct VmConfig {
    /// Guest RAM size in bytes; must equal the backing-store capacity.
    pub ram_size: u32,
    /// Guest-physical address of the first RAM byte and the boot PC.
    pub image_base: u32,
    /// Bytes reserved for the device-tree blob near the top of RAM.
    pub dtb_size: u32,
    /// Divisor applied to the pacing source before computing elapsed time.
    pub time_divisor: u32,
    /// Instruction budget handed to the engine per tick.
    pub instructions_per_tick: u32,
    /// Treat every guest exception as fatal.
    pub fail_on_all_faults: bool,
    /// Capacity of the UART receive queue.
    pub uart_rx_capacity: usize,
    /// Source of the per-tick time mark.
    pub pacing: Pacing,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            ram_size: DEFAULT_RAM_SIZE,
            image_base: DEFAULT_IMAGE_BASE,
            dtb_size: DEFAULT_DTB_SIZE,
            time_divisor: DEFAULT_TIME_DIVISOR,
            instructions_per_tick: DEFAULT_INSTRUCTIONS_PER_TICK,
            fail_on_all_faults: false,
            uart_rx_capacity: DEFAULT_RX_CAPACITY,
            pacing: Pacing::CycleCounter,
        }
    }
}

impl VmConfig {
    /// Checks that the configuration describes a bootable machine.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidConfig`] naming the first violated rule.
    pub fn validate(&self) -> Result<(), VmError> {
        if self.time_divisor == 0 {
            return Err(VmError::InvalidConfig("time_divisor must be non-zero"));
        }
        if self.instructions_per_tick == 0 {
            return Err(VmError::InvalidConfig(
                "instructions_per_tick must be non-zero",
            ));
        }
        let reserved = u64::from(self.dtb_size) + CPU_STATE_BYTES as u64;
        if u64::from(self.ram_size) <= reserved {
            return Err(VmError::InvalidConfig(
                "ram_size must exceed the dtb and cpu state reservation",
            ));
        }
        if !ram_window_is_disjoint(self.image_base, self.ram_size) {
            return Err(VmError::InvalidConfig(
                "ram window overlaps the control window or wraps the address space",
            ));
        }
        Ok(())
    }

    /// Byte offset of the DTB inside RAM. Also the first offset a kernel
    /// image may not reach.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn dtb_offset(&self) -> u32 {
        self.ram_size
            .wrapping_sub(CPU_STATE_BYTES as u32)
            .wrapping_sub(self.dtb_size)
    }

    /// Guest-physical address of the DTB, handed to the kernel in `a1`.
    #[must_use]
    pub const fn dtb_pointer(&self) -> u32 {
        self.dtb_offset().wrapping_add(self.image_base)
    }

    /// CPU state at power-on: PC at the image base, hart 0 in `a0`, the DTB
    /// pointer in `a1`, machine mode.
    #[must_use]
    pub fn boot_cpu_state(&self) -> CpuState {
        let mut cpu = CpuState {
            pc: self.image_base,
            ..CpuState::default()
        };
        cpu.set_reg(REG_A0, 0);
        cpu.set_reg(REG_A1, self.dtb_pointer());
        cpu.extraflags |= PRIVILEGE_MACHINE;
        cpu
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::VmConfig;
    use crate::state::{REG_A0, REG_A1};
    use crate::VmError;

    #[test]
    fn defaults_validate() {
        let config = VmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ram_size, 12_582_912);
        assert_eq!(config.dtb_size, 1536);
        assert_eq!(config.instructions_per_tick, 2048);
        assert_eq!(config.time_divisor, 1);
    }

    #[test]
    fn boot_state_matches_reference_layout() {
        let config = VmConfig::default();
        let cpu = config.boot_cpu_state();
        assert_eq!(cpu.pc, 0x8000_0000);
        assert_eq!(cpu.reg(REG_A0), 0);
        assert_eq!(cpu.reg(REG_A1), 0x80BF_F940);
        assert_eq!(cpu.extraflags & 3, 3);
        assert_eq!(cpu.cycle(), 0);
    }

    #[test]
    fn dtb_offset_sits_below_cpu_state_reservation() {
        let config = VmConfig::default();
        assert_eq!(config.dtb_offset(), 12_582_912 - 192 - 1536);
    }

    #[rstest]
    #[case::zero_divisor(VmConfig { time_divisor: 0, ..VmConfig::default() })]
    #[case::zero_quota(VmConfig { instructions_per_tick: 0, ..VmConfig::default() })]
    #[case::tiny_ram(VmConfig { ram_size: 1536 + 192, ..VmConfig::default() })]
    #[case::overlaps_control(VmConfig { image_base: 0x1000_0000, ..VmConfig::default() })]
    #[case::runs_into_control(VmConfig { image_base: 0x0F00_0000, ram_size: 0x0200_0000, ..VmConfig::default() })]
    #[case::wraps(VmConfig { image_base: 0xFFFF_0000, ..VmConfig::default() })]
    fn invalid_configs_are_rejected(#[case] config: VmConfig) {
        assert!(matches!(config.validate(), Err(VmError::InvalidConfig(_))));
    }

    #[test]
    fn low_ram_window_below_control_is_allowed() {
        let config = VmConfig {
            image_base: 0,
            ram_size: 0x0100_0000,
            ..VmConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.boot_cpu_state().pc, 0);
    }
}
