//! Backing storage standing in for guest physical RAM.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::VmError;

/// Byte-addressable storage of fixed capacity.
///
/// Callers must validate spans with [`check_span`] first; implementations
/// re-check and never touch bytes past `capacity()`.
pub trait BackingStore {
    /// Fixed capacity in bytes.
    fn capacity(&self) -> u32;

    /// Fills `buf` with the bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::StoreRange`] when the span exceeds capacity, or
    /// [`VmError::Storage`] when the medium fails.
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), VmError>;

    /// Writes `bytes` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::StoreRange`] when the span exceeds capacity, or
    /// [`VmError::Storage`] when the medium fails.
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), VmError>;
}

/// Validates that `offset..offset + len` lies inside `capacity`.
///
/// # Errors
///
/// Returns [`VmError::StoreRange`] when any byte of the span is out of range.
pub fn check_span(offset: u32, len: usize, capacity: u32) -> Result<(), VmError> {
    let end = u64::from(offset) + len as u64;
    if end <= u64::from(capacity) {
        Ok(())
    } else {
        Err(VmError::StoreRange {
            offset,
            len,
            capacity,
        })
    }
}

/// Heap-resident backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemoryStore {
    bytes: Box<[u8]>,
}

impl InMemoryStore {
    /// Allocates a zeroed store of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            bytes: vec![0; capacity as usize].into_boxed_slice(),
        }
    }

    /// Returns the raw contents.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl BackingStore for InMemoryStore {
    #[allow(clippy::cast_possible_truncation)]
    fn capacity(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), VmError> {
        check_span(offset, buf.len(), self.capacity())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), VmError> {
        check_span(offset, bytes.len(), self.capacity())?;
        let start = offset as usize;
        self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// Backing store over any seekable medium.
///
/// Every access seeks to its offset and transfers exactly the requested
/// span, so guest RAM may exceed host-resident memory.
#[derive(Debug)]
pub struct SeekStore<F> {
    medium: F,
    capacity: u32,
}

impl<F: Read + Write + Seek> SeekStore<F> {
    /// Wraps a medium that already holds at least `capacity` bytes.
    pub const fn new(medium: F, capacity: u32) -> Self {
        Self { medium, capacity }
    }

    /// Returns the underlying medium.
    pub fn into_inner(self) -> F {
        self.medium
    }

    fn seek_to(&mut self, offset: u32) -> Result<(), VmError> {
        self.medium.seek(SeekFrom::Start(u64::from(offset)))?;
        Ok(())
    }
}

impl SeekStore<File> {
    /// Opens (creating if needed) a RAM file and zero-extends it to
    /// `capacity` bytes. Existing contents are preserved.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Storage`] when the file cannot be opened or sized.
    pub fn open(path: &Path, capacity: u32) -> Result<Self, VmError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() < u64::from(capacity) {
            file.set_len(u64::from(capacity))?;
        }
        Ok(Self::new(file, capacity))
    }

    /// Flushes pending writes to the device.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::Storage`] when the sync fails.
    pub fn commit(&mut self) -> Result<(), VmError> {
        self.medium.sync_data()?;
        Ok(())
    }
}

impl<F: Read + Write + Seek> BackingStore for SeekStore<F> {
    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), VmError> {
        check_span(offset, buf.len(), self.capacity)?;
        self.seek_to(offset)?;
        self.medium.read_exact(buf)?;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), VmError> {
        check_span(offset, bytes.len(), self.capacity)?;
        self.seek_to(offset)?;
        self.medium.write_all(bytes)?;
        Ok(())
    }
}
