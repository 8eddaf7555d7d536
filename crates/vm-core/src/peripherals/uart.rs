//! 8250/16550-style UART peripheral.
//!
//! Only the two registers a polling guest console driver needs are modelled:
//! the data register and the line-status register. No interrupts are raised.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::memory::map::{UART_DATA, UART_LINE_STATUS};

/// Line-status bits always reported (transmitter idle and holding empty).
pub const LSR_BASE: u32 = 0x60;
/// Line-status bit reporting at least one received byte.
pub const LSR_DATA_READY: u32 = 0x01;

/// Default capacity of the receive queue.
pub const DEFAULT_RX_CAPACITY: usize = 256;

/// Error returned by host-side input pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum UartQueueError {
    /// Queue is at capacity; the byte was dropped.
    #[error("uart receive queue is full")]
    QueueFull,
}

#[derive(Debug)]
struct RxQueue {
    bytes: VecDeque<u8>,
    capacity: usize,
}

type SharedRx = Arc<Mutex<RxQueue>>;

fn lock(queue: &SharedRx) -> MutexGuard<'_, RxQueue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Host-side producer handle for the UART receive queue.
///
/// Cloneable and `Send`, so input may arrive from another thread.
#[derive(Debug, Clone)]
pub struct UartInput {
    queue: SharedRx,
}

impl UartInput {
    /// Appends one byte.
    ///
    /// # Errors
    ///
    /// Returns [`UartQueueError::QueueFull`] when the queue is at capacity.
    pub fn push(&self, byte: u8) -> Result<(), UartQueueError> {
        let mut queue = lock(&self.queue);
        if queue.bytes.len() >= queue.capacity {
            return Err(UartQueueError::QueueFull);
        }
        queue.bytes.push_back(byte);
        Ok(())
    }

    /// Appends bytes in order until the queue fills. Returns how many were
    /// accepted.
    pub fn push_slice(&self, bytes: &[u8]) -> usize {
        let mut queue = lock(&self.queue);
        let room = queue.capacity.saturating_sub(queue.bytes.len());
        let accepted = room.min(bytes.len());
        queue.bytes.extend(&bytes[..accepted]);
        accepted
    }

    /// Number of bytes waiting to be read by the guest.
    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.queue).bytes.len()
    }
}

/// UART peripheral owned by the trap dispatcher.
#[derive(Debug)]
pub struct Uart {
    rx: SharedRx,
}

impl Default for Uart {
    fn default() -> Self {
        Self::new(DEFAULT_RX_CAPACITY)
    }
}

impl Uart {
    /// Creates a UART with an empty receive queue of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            rx: Arc::new(Mutex::new(RxQueue {
                bytes: VecDeque::with_capacity(capacity),
                capacity,
            })),
        }
    }

    /// Returns a producer handle feeding this UART.
    #[must_use]
    pub fn input(&self) -> UartInput {
        UartInput {
            queue: Arc::clone(&self.rx),
        }
    }

    /// Returns `true` when no received byte is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.rx).bytes.is_empty()
    }

    /// Current line-status register value.
    #[must_use]
    pub fn line_status(&self) -> u32 {
        if self.is_empty() {
            LSR_BASE
        } else {
            LSR_BASE | LSR_DATA_READY
        }
    }

    /// Dequeues the oldest received byte.
    pub fn pop(&mut self) -> Option<u8> {
        lock(&self.rx).bytes.pop_front()
    }

    /// Drops every pending byte.
    pub fn clear(&mut self) {
        lock(&self.rx).bytes.clear();
    }

    /// Handles a control-window load. Returns `None` for addresses that are
    /// not UART registers.
    pub fn control_load(&mut self, addr: u32) -> Option<u32> {
        match addr {
            UART_LINE_STATUS => Some(self.line_status()),
            UART_DATA => Some(self.pop().map_or(0, u32::from)),
            _ => None,
        }
    }

    /// Handles a control-window store. Returns the byte to transmit when the
    /// store targets the data register.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn control_store(&self, addr: u32, value: u32) -> Option<u8> {
        match addr {
            UART_DATA => Some(value as u8),
            _ => None,
        }
    }
}
