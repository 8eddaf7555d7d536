/// Number of general-purpose registers (`x0..x31`).
pub const GENERAL_REGISTER_COUNT: usize = 32;
/// Number of 32-bit words in the canonical register block.
pub const CPU_STATE_WORDS: usize = GENERAL_REGISTER_COUNT + 16;
/// Size in bytes of the canonical little-endian register block.
pub const CPU_STATE_BYTES: usize = CPU_STATE_WORDS * 4;

/// Index of `a0`, which carries the hart id at boot.
pub const REG_A0: usize = 10;
/// Index of `a1`, which carries the DTB physical address at boot.
pub const REG_A1: usize = 11;

/// `extraflags` bits holding the current privilege level.
pub const EXTRAFLAGS_PRIVILEGE_MASK: u32 = 0b11;
/// `extraflags` bit set while the hart waits for an interrupt.
pub const EXTRAFLAGS_WFI: u32 = 1 << 2;
/// Machine-mode privilege level.
pub const PRIVILEGE_MACHINE: u32 = 3;

/// Machine-mode register block of a single RV32IMA hart.
///
/// Field order is the canonical snapshot order. The core never forces
/// `regs[0]` to zero; that is the stepping engine's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CpuState {
    /// General-purpose registers.
    pub regs: [u32; GENERAL_REGISTER_COUNT],
    /// Program counter (guest physical address).
    pub pc: u32,
    /// `mstatus` CSR.
    pub mstatus: u32,
    /// Low half of the machine cycle counter.
    pub cyclel: u32,
    /// High half of the machine cycle counter.
    pub cycleh: u32,
    /// Low half of the CLINT `mtime` timer.
    pub timerl: u32,
    /// High half of the CLINT `mtime` timer.
    pub timerh: u32,
    /// Low half of the CLINT `mtimecmp` register.
    pub timermatchl: u32,
    /// High half of the CLINT `mtimecmp` register.
    pub timermatchh: u32,
    /// `mscratch` CSR.
    pub mscratch: u32,
    /// `mtvec` CSR.
    pub mtvec: u32,
    /// `mie` CSR.
    pub mie: u32,
    /// `mip` CSR.
    pub mip: u32,
    /// `mepc` CSR.
    pub mepc: u32,
    /// `mtval` CSR.
    pub mtval: u32,
    /// `mcause` CSR.
    pub mcause: u32,
    /// Privilege level (bits 0..1), WFI flag (bit 2), reservation bits above.
    pub extraflags: u32,
}

impl CpuState {
    /// Reads a general-purpose register. Out-of-range indices read as zero.
    #[must_use]
    pub fn reg(&self, index: usize) -> u32 {
        self.regs.get(index).copied().unwrap_or(0)
    }

    /// Writes a general-purpose register. Out-of-range indices are ignored.
    pub fn set_reg(&mut self, index: usize, value: u32) {
        if let Some(slot) = self.regs.get_mut(index) {
            *slot = value;
        }
    }

    /// Returns the 64-bit machine cycle counter.
    #[must_use]
    pub const fn cycle(&self) -> u64 {
        ((self.cycleh as u64) << 32) | self.cyclel as u64
    }

    /// Replaces the 64-bit machine cycle counter.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn set_cycle(&mut self, value: u64) {
        self.cyclel = value as u32;
        self.cycleh = (value >> 32) as u32;
    }

    /// Returns the current privilege level.
    #[must_use]
    pub const fn privilege(&self) -> u32 {
        self.extraflags & EXTRAFLAGS_PRIVILEGE_MASK
    }

    /// Returns `true` while the hart is parked in `WFI`.
    #[must_use]
    pub const fn is_waiting_for_interrupt(&self) -> bool {
        self.extraflags & EXTRAFLAGS_WFI != 0
    }

    /// Flattens the register block into canonical word order.
    #[must_use]
    pub fn to_words(&self) -> [u32; CPU_STATE_WORDS] {
        let mut words = [0; CPU_STATE_WORDS];
        words[..GENERAL_REGISTER_COUNT].copy_from_slice(&self.regs);
        words[GENERAL_REGISTER_COUNT..].copy_from_slice(&[
            self.pc,
            self.mstatus,
            self.cyclel,
            self.cycleh,
            self.timerl,
            self.timerh,
            self.timermatchl,
            self.timermatchh,
            self.mscratch,
            self.mtvec,
            self.mie,
            self.mip,
            self.mepc,
            self.mtval,
            self.mcause,
            self.extraflags,
        ]);
        words
    }

    /// Rebuilds a register block from canonical word order.
    #[must_use]
    pub fn from_words(words: &[u32; CPU_STATE_WORDS]) -> Self {
        let mut regs = [0; GENERAL_REGISTER_COUNT];
        regs.copy_from_slice(&words[..GENERAL_REGISTER_COUNT]);
        let csr = &words[GENERAL_REGISTER_COUNT..];
        Self {
            regs,
            pc: csr[0],
            mstatus: csr[1],
            cyclel: csr[2],
            cycleh: csr[3],
            timerl: csr[4],
            timerh: csr[5],
            timermatchl: csr[6],
            timermatchh: csr[7],
            mscratch: csr[8],
            mtvec: csr[9],
            mie: csr[10],
            mip: csr[11],
            mepc: csr[12],
            mtval: csr[13],
            mcause: csr[14],
            extraflags: csr[15],
        }
    }

    /// Encodes the register block as little-endian bytes.
    #[must_use]
    pub fn to_le_bytes(&self) -> [u8; CPU_STATE_BYTES] {
        let mut bytes = [0; CPU_STATE_BYTES];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(self.to_words()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Decodes a register block from little-endian bytes.
    #[must_use]
    pub fn from_le_bytes(bytes: &[u8; CPU_STATE_BYTES]) -> Self {
        let mut words = [0; CPU_STATE_WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self::from_words(&words)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CpuState, CPU_STATE_BYTES, CPU_STATE_WORDS, EXTRAFLAGS_WFI, GENERAL_REGISTER_COUNT,
        PRIVILEGE_MACHINE,
    };

    #[test]
    fn register_block_matches_engine_layout() {
        assert_eq!(CPU_STATE_WORDS, 48);
        assert_eq!(CPU_STATE_BYTES, 192);
    }

    #[test]
    fn cycle_counter_spans_both_halves() {
        let mut cpu = CpuState::default();
        cpu.set_cycle(0x0000_0001_FFFF_FFFF);
        assert_eq!(cpu.cyclel, 0xFFFF_FFFF);
        assert_eq!(cpu.cycleh, 0x0000_0001);

        cpu.set_cycle(cpu.cycle() + 1);
        assert_eq!(cpu.cyclel, 0);
        assert_eq!(cpu.cycleh, 2);
        assert_eq!(cpu.cycle(), 0x0000_0002_0000_0000);
    }

    #[test]
    fn register_zero_is_not_hardwired_by_the_core() {
        let mut cpu = CpuState::default();
        cpu.set_reg(0, 0xDEAD_BEEF);
        assert_eq!(cpu.reg(0), 0xDEAD_BEEF);
    }

    #[test]
    fn out_of_range_register_access_is_inert() {
        let mut cpu = CpuState::default();
        cpu.set_reg(GENERAL_REGISTER_COUNT, 7);
        assert_eq!(cpu.reg(GENERAL_REGISTER_COUNT), 0);
        assert_eq!(cpu, CpuState::default());
    }

    #[test]
    fn privilege_and_wfi_decode_from_extraflags() {
        let cpu = CpuState {
            extraflags: PRIVILEGE_MACHINE | EXTRAFLAGS_WFI | 0x80,
            ..CpuState::default()
        };
        assert_eq!(cpu.privilege(), PRIVILEGE_MACHINE);
        assert!(cpu.is_waiting_for_interrupt());
    }

    #[test]
    fn byte_layout_places_fields_in_canonical_order() {
        let mut cpu = CpuState::default();
        cpu.set_reg(1, 0x0403_0201);
        cpu.pc = 0x8000_0000;
        cpu.extraflags = 3;

        let bytes = cpu.to_le_bytes();
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[128..132], &[0x00, 0x00, 0x00, 0x80]);
        assert_eq!(&bytes[188..192], &[0x03, 0x00, 0x00, 0x00]);
        assert_eq!(CpuState::from_le_bytes(&bytes), cpu);
    }
}
