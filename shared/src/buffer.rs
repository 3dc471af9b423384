//! # Ring Buffer I/O Layer
//!
//! Fixed-capacity byte rings that decouple interrupt/USB driven byte arrival
//! from the blocking-style reads and writes of the frame transport.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────┬───────────────────────┬─────────────────────────┐
//! │ consumed │      unread data      │        writable         │
//! └──────────┴───────────────────────┴─────────────────────────┘
//!            ▲                       ▲
//!          tail                     head
//!      (consumer only)         (producer only)
//! ```
//!
//! One slot is always kept free so that `head == tail` unambiguously means
//! empty; a ring of `N` bytes holds at most `N - 1` unread bytes.
//!
//! ## Concurrency
//!
//! Each ring has exactly one producer and one consumer. The producer only
//! stores `head`, the consumer only stores `tail`, and both publish with
//! release ordering after touching the data, so the two sides may live in
//! different execution contexts (interrupt vs. main loop, or two cores).
//! [`RingBuffer::reset`] touches both cursors and must only be called while
//! the other side is quiescent, which holds in the cooperative main loop.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Size of the outbound GBridge data ring.
pub const OUT_BUFFER_SIZE: usize = 0x100;
/// Size of the inbound GBridge data ring.
pub const IN_BUFFER_SIZE: usize = 0x100;
/// Size of the outbound debug ring.
pub const DEBUG_OUT_BUFFER_SIZE: usize = 0x800;

/// Object-safe view of a ring, used where the transport picks one of the
/// differently sized outbound rings at runtime.
pub trait ByteRing {
    /// Copy as many bytes as fit; returns how many were written.
    fn write(&self, bytes: &[u8]) -> usize;
    /// Take the next unread byte, if any.
    fn read_one(&self) -> Option<u8>;
    /// Free space, in bytes.
    fn available_for_write(&self) -> usize;
    /// Bytes written but not read yet.
    fn unread_count(&self) -> usize;
    /// Drop all unread data.
    fn reset(&self);
}

/// Single-producer single-consumer byte ring of `N` slots.
///
/// # Example
///
/// ```rust
/// use gbridge_shared::buffer::RingBuffer;
///
/// let ring: RingBuffer<8> = RingBuffer::new();
/// assert_eq!(ring.write(b"0123456789"), 7);
/// assert_eq!(ring.read_one(), Some(b'0'));
/// assert_eq!(ring.available_for_write(), 1);
/// ```
pub struct RingBuffer<const N: usize> {
    data: UnsafeCell<[u8; N]>,

    /// Write cursor, stored only by the producer
    head: AtomicUsize,

    /// Read cursor, stored only by the consumer
    tail: AtomicUsize,
}

// SAFETY: the producer only writes slots in the free region and publishes
// them through `head`; the consumer only reads slots in the unread region
// and releases them through `tail`. The two regions never overlap.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> RingBuffer<N> {
    /// Create an empty ring.
    pub const fn new() -> Self {
        Self {
            data: UnsafeCell::new([0u8; N]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Number of slots, including the one that is always kept free.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes written but not read yet.
    #[inline]
    pub fn unread_count(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + N - tail) % N
    }

    /// Free space, in bytes.
    #[inline]
    pub fn available_for_write(&self) -> usize {
        N - 1 - self.unread_count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.available_for_write() == 0
    }

    /// Copy as many bytes of `bytes` as fit without overwriting unread data.
    ///
    /// Never blocks. A short count means the caller must offer the rest
    /// again later.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let len = bytes.len().min(self.available_for_write());
        if len == 0 {
            return 0;
        }

        let head = self.head.load(Ordering::Relaxed);
        let first_len = len.min(N - head);
        let base = self.data.get() as *mut u8;

        // SAFETY: `head..head + len` (modulo N) lies in the free region,
        // which the consumer does not read until `head` is published below.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(head), first_len);
            core::ptr::copy_nonoverlapping(
                bytes.as_ptr().add(first_len),
                base,
                len - first_len,
            );
        }

        self.head.store((head + len) % N, Ordering::Release);
        len
    }

    /// Take the next unread byte, or `None` when the ring is empty.
    pub fn read_one(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: `tail` is inside the unread region published by the producer.
        let byte = unsafe { *(self.data.get() as *const u8).add(tail) };
        self.tail.store((tail + 1) % N, Ordering::Release);
        Some(byte)
    }

    /// Copy unread bytes into `buf`; returns how many were copied.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut count = 0;
        for slot in buf.iter_mut() {
            match self.read_one() {
                Some(byte) => {
                    *slot = byte;
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Reset the ring to empty.
    pub fn reset(&self) {
        self.tail.store(0, Ordering::Release);
        self.head.store(0, Ordering::Release);
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ByteRing for RingBuffer<N> {
    fn write(&self, bytes: &[u8]) -> usize {
        RingBuffer::write(self, bytes)
    }

    fn read_one(&self) -> Option<u8> {
        RingBuffer::read_one(self)
    }

    fn available_for_write(&self) -> usize {
        RingBuffer::available_for_write(self)
    }

    fn unread_count(&self) -> usize {
        RingBuffer::unread_count(self)
    }

    fn reset(&self) {
        RingBuffer::reset(self)
    }
}

/// The three rings shared between the host-facing glue and the transport.
///
/// The glue produces into `data_in` and consumes `data_out`/`debug_out`;
/// the transport does the opposite.
pub struct IoBuffers {
    pub data_out: RingBuffer<OUT_BUFFER_SIZE>,
    pub debug_out: RingBuffer<DEBUG_OUT_BUFFER_SIZE>,
    pub data_in: RingBuffer<IN_BUFFER_SIZE>,
}

impl IoBuffers {
    pub const fn new() -> Self {
        Self {
            data_out: RingBuffer::new(),
            debug_out: RingBuffer::new(),
            data_in: RingBuffer::new(),
        }
    }

    /// Queue bytes received from the host; returns how many fit.
    pub fn enqueue_inbound_bytes(&self, bytes: &[u8]) -> usize {
        self.data_in.write(bytes)
    }

    /// Next byte for the host on the data channel.
    pub fn dequeue_outbound_byte(&self) -> Option<u8> {
        self.data_out.read_one()
    }

    /// Next byte for the host on the debug channel.
    pub fn dequeue_debug_byte(&self) -> Option<u8> {
        self.debug_out.read_one()
    }

    /// Drop pending data in both directions to realign framing.
    pub fn reset_data(&self) {
        self.data_out.reset();
        self.data_in.reset();
    }
}

impl Default for IoBuffers {
    fn default() -> Self {
        Self::new()
    }
}
