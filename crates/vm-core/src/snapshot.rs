//! Save and resume of CPU state plus the scheduler time mark.
//!
//! The record is the CPU register block in its fixed field order followed
//! by `last_time`, all little-endian. Guest RAM is not part of the record;
//! a resumed VM relies on its backing store still holding the same bytes.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::state::{CpuState, CPU_STATE_BYTES};
use crate::VmError;

/// Length of an encoded [`SnapshotRecord`].
pub const SNAPSHOT_RECORD_BYTES: usize = CPU_STATE_BYTES + 8;

/// Resumable VM state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SnapshotRecord {
    /// CPU register block.
    pub cpu: CpuState,
    /// Scheduler time mark.
    pub last_time: u64,
}

impl SnapshotRecord {
    /// Encodes the record.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SNAPSHOT_RECORD_BYTES] {
        let mut out = [0_u8; SNAPSHOT_RECORD_BYTES];
        out[..CPU_STATE_BYTES].copy_from_slice(&self.cpu.to_le_bytes());
        out[CPU_STATE_BYTES..].copy_from_slice(&self.last_time.to_le_bytes());
        out
    }

    /// Decodes a record.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SnapshotLength`] unless `bytes` is exactly
    /// [`SNAPSHOT_RECORD_BYTES`] long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VmError> {
        let length_error = || VmError::SnapshotLength {
            expected: SNAPSHOT_RECORD_BYTES,
            actual: bytes.len(),
        };
        if bytes.len() != SNAPSHOT_RECORD_BYTES {
            return Err(length_error());
        }
        let (cpu_bytes, time_bytes) = bytes.split_at(CPU_STATE_BYTES);
        let cpu_bytes: &[u8; CPU_STATE_BYTES] =
            cpu_bytes.try_into().map_err(|_| length_error())?;
        let time_bytes: [u8; 8] = time_bytes.try_into().map_err(|_| length_error())?;
        Ok(Self {
            cpu: CpuState::from_le_bytes(cpu_bytes),
            last_time: u64::from_le_bytes(time_bytes),
        })
    }
}

/// Durable home for one snapshot record.
pub trait SnapshotMedium {
    /// Replaces any previous record with `record`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Storage`] when the medium cannot be written.
    fn commit(&mut self, record: &[u8]) -> Result<(), VmError>;

    /// Reads back the most recent record.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SnapshotMissing`] when nothing was committed, or
    /// [`VmError::Storage`] when the medium cannot be read.
    fn fetch(&mut self) -> Result<Vec<u8>, VmError>;
}

/// Snapshot stored in a named file, truncated on every save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    path: PathBuf,
}

impl FileSnapshot {
    /// Uses the file at `path`. Nothing is touched until the first commit.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the record.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotMedium for FileSnapshot {
    fn commit(&mut self, record: &[u8]) -> Result<(), VmError> {
        let mut file = File::create(&self.path)?;
        file.write_all(record)?;
        file.sync_all()?;
        Ok(())
    }

    fn fetch(&mut self) -> Result<Vec<u8>, VmError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(VmError::SnapshotMissing)
            }
            Err(err) => return Err(err.into()),
        };
        let mut record = Vec::with_capacity(SNAPSHOT_RECORD_BYTES);
        file.read_to_end(&mut record)?;
        Ok(record)
    }
}

/// Snapshot held in process memory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemorySnapshot {
    record: Option<Vec<u8>>,
}

impl MemorySnapshot {
    /// Creates an empty medium.
    #[must_use]
    pub const fn new() -> Self {
        Self { record: None }
    }

    /// Raw committed bytes, if any.
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        self.record.as_deref()
    }

    /// Overwrites the stored bytes without validation.
    pub fn replace(&mut self, bytes: Vec<u8>) {
        self.record = Some(bytes);
    }
}

impl SnapshotMedium for MemorySnapshot {
    fn commit(&mut self, record: &[u8]) -> Result<(), VmError> {
        self.record = Some(record.to_vec());
        Ok(())
    }

    fn fetch(&mut self) -> Result<Vec<u8>, VmError> {
        self.record.clone().ok_or(VmError::SnapshotMissing)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        FileSnapshot, MemorySnapshot, SnapshotMedium, SnapshotRecord, SNAPSHOT_RECORD_BYTES,
    };
    use crate::state::{CpuState, CPU_STATE_BYTES};
    use crate::VmError;

    fn sample() -> SnapshotRecord {
        let mut cpu = CpuState {
            pc: 0x8000_1234,
            mcause: 0x8000_0007,
            ..CpuState::default()
        };
        cpu.set_reg(5, 0xDEAD_BEEF);
        cpu.set_cycle(0x1_0000_0002);
        SnapshotRecord {
            cpu,
            last_time: 0x0102_0304_0506_0708,
        }
    }

    #[test]
    fn record_layout_is_cpu_then_little_endian_time() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes.len(), 200);
        assert_eq!(&bytes[CPU_STATE_BYTES..], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&bytes[32 * 4..33 * 4], &0x8000_1234_u32.to_le_bytes());
        assert_eq!(SnapshotRecord::from_bytes(&bytes).expect("valid"), sample());
    }

    #[test]
    fn wrong_lengths_are_rejected() {
        for len in [0, SNAPSHOT_RECORD_BYTES - 1, SNAPSHOT_RECORD_BYTES + 1] {
            let bytes = vec![0_u8; len];
            assert!(matches!(
                SnapshotRecord::from_bytes(&bytes),
                Err(VmError::SnapshotLength { expected: 200, actual }) if actual == len
            ));
        }
    }

    #[test]
    fn memory_medium_starts_empty_and_keeps_latest() {
        let mut medium = MemorySnapshot::new();
        assert!(matches!(medium.fetch(), Err(VmError::SnapshotMissing)));
        medium.commit(&[1, 2, 3]).expect("commit");
        medium.commit(&[4]).expect("commit");
        assert_eq!(medium.fetch().expect("fetch"), vec![4]);
    }

    #[test]
    fn file_medium_truncates_previous_record() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut medium = FileSnapshot::new(dir.path().join("vm.snap"));
        assert!(matches!(medium.fetch(), Err(VmError::SnapshotMissing)));

        medium.commit(&[0xAA; 300]).expect("commit");
        medium.commit(&sample().to_bytes()).expect("commit");
        let bytes = medium.fetch().expect("fetch");
        assert_eq!(bytes.len(), SNAPSHOT_RECORD_BYTES);
        assert_eq!(SnapshotRecord::from_bytes(&bytes).expect("valid"), sample());
    }
}
