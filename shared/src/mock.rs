//! Test doubles for the device collaborators.
//!
//! Compiled for unit tests and behind the `mock` feature, which the
//! integration tests enable to drive the core without hardware.

use core::cell::Cell;
use core::convert::Infallible;
use std::collections::VecDeque;
use std::vec;
use std::vec::Vec;

use embedded_io::{ErrorType as IoErrorType, Read, ReadReady, Write, WriteReady};
use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash};

use crate::adapter::AdapterState;
use crate::addr::MobileAddr;
use crate::traits::{AdapterControl, AdapterDevice, Clock, DnsSlot};

/// Manually driven clock.
///
/// Each read returns the current time and then advances it by `step`, so a
/// wait loop polling a stepping clock times out on its own.
#[derive(Debug, Default)]
pub struct MockClock {
    now: Cell<u64>,
    step: u64,
}

impl MockClock {
    /// Clock frozen at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frozen clock at `now`.
    pub fn starting_at(now: u64) -> Self {
        Self {
            now: Cell::new(now),
            step: 0,
        }
    }

    /// Clock that advances by `step` microseconds on every read.
    pub fn stepping(step: u64) -> Self {
        Self {
            now: Cell::new(0),
            step,
        }
    }

    pub fn set(&self, now: u64) {
        self.now.set(now);
    }

    pub fn advance(&self, delta: u64) {
        self.now.set(self.now.get().wrapping_add(delta));
    }

    /// Current time without stepping.
    pub fn peek(&self) -> u64 {
        self.now.get()
    }
}

impl Clock for MockClock {
    fn now_us(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(self.step));
        now
    }
}

/// Erase granularity of [`MemFlash`].
pub const MEM_FLASH_SECTOR: usize = 4096;

/// RAM-backed NOR flash.
///
/// Programming can only clear bits, as on real NOR parts, and erase sets a
/// whole sector back to `0xFF`. Faults can be injected to model torn writes
/// and power loss.
#[derive(Debug, Clone)]
pub struct MemFlash {
    data: Vec<u8>,
    erases: usize,
    writes: usize,
    torn_writes: usize,
    ops_before_cut: Option<usize>,
}

impl MemFlash {
    /// Fully erased flash of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0xFF; size],
            erases: 0,
            writes: 0,
            torn_writes: 0,
            ops_before_cut: None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable view for planting or corrupting contents directly.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Sector erases performed so far.
    pub fn erase_count(&self) -> usize {
        self.erases
    }

    /// Program operations performed so far.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn reset_counters(&mut self) {
        self.erases = 0;
        self.writes = 0;
    }

    /// The next `count` writes only program the first half of their bytes.
    pub fn tear_next_writes(&mut self, count: usize) {
        self.torn_writes = count;
    }

    /// Let `ops` more erase/write operations through, then silently drop
    /// every later one until [`restore_power`](Self::restore_power).
    pub fn cut_power_after(&mut self, ops: usize) {
        self.ops_before_cut = Some(ops);
    }

    pub fn restore_power(&mut self) {
        self.ops_before_cut = None;
    }

    fn powered(&mut self) -> bool {
        match self.ops_before_cut.as_mut() {
            None => true,
            Some(0) => false,
            Some(left) => {
                *left -= 1;
                true
            }
        }
    }

    fn check_range(&self, offset: u32, len: usize) -> Result<usize, NorFlashErrorKind> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(start),
            _ => Err(NorFlashErrorKind::OutOfBounds),
        }
    }
}

impl ErrorType for MemFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MemFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = self.check_range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for MemFlash {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = MEM_FLASH_SECTOR;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from > to {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        if from as usize % Self::ERASE_SIZE != 0 || to as usize % Self::ERASE_SIZE != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        let start = self.check_range(from, (to - from) as usize)?;
        if !self.powered() {
            return Ok(());
        }
        self.erases += ((to - from) as usize) / Self::ERASE_SIZE;
        self.data[start..to as usize].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let start = self.check_range(offset, bytes.len())?;
        if !self.powered() {
            return Ok(());
        }
        self.writes += 1;
        let programmed = if self.torn_writes > 0 {
            self.torn_writes -= 1;
            bytes.len() / 2
        } else {
            bytes.len()
        };
        for (cell, byte) in self.data[start..start + programmed].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        Ok(())
    }
}

/// In-memory byte endpoint standing in for the USB serial port.
///
/// Bytes fed with [`feed`](Self::feed) are what the host sent; everything
/// the device writes is collected in [`sent`](Self::sent).
#[derive(Debug)]
pub struct MockPort {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    read_chunk: usize,
    write_room: usize,
}

impl MockPort {
    pub fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            tx: Vec::new(),
            read_chunk: usize::MAX,
            write_room: usize::MAX,
        }
    }

    /// Queue bytes from the host.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    /// Cap every read at `chunk` bytes.
    pub fn set_read_chunk(&mut self, chunk: usize) {
        self.read_chunk = chunk.max(1);
    }

    /// Accept only `room` more bytes until changed again.
    pub fn set_write_room(&mut self, room: usize) {
        self.write_room = room;
    }

    pub fn pending_rx(&self) -> usize {
        self.rx.len()
    }

    pub fn sent(&self) -> &[u8] {
        &self.tx
    }

    /// Take everything written so far.
    pub fn take_sent(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.tx)
    }
}

impl Default for MockPort {
    fn default() -> Self {
        Self::new()
    }
}

impl IoErrorType for MockPort {
    type Error = Infallible;
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let len = buf.len().min(self.read_chunk).min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..len)) {
            *slot = byte;
        }
        Ok(len)
    }
}

impl ReadReady for MockPort {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.rx.is_empty())
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let len = buf.len().min(self.write_room);
        self.tx.extend_from_slice(&buf[..len]);
        self.write_room = self.write_room.saturating_sub(len);
        Ok(len)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl WriteReady for MockPort {
    fn write_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.write_room > 0)
    }
}

/// Adapter library double that records every setting it receives.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MockAdapter {
    pub running: bool,
    pub device: Option<(AdapterDevice, bool)>,
    pub relay: MobileAddr,
    pub dns: [MobileAddr; 2],
    pub p2p_port: Option<u16>,
    pub token: Option<[u8; 16]>,
    /// Number of configuration flushes requested
    pub flushes: usize,
}

impl AdapterControl for MockAdapter {
    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn set_device(&mut self, device: AdapterDevice, unmetered: bool) {
        self.device = Some((device, unmetered));
    }

    fn set_relay(&mut self, addr: MobileAddr) {
        self.relay = addr;
    }

    fn set_dns(&mut self, slot: DnsSlot, addr: MobileAddr) {
        match slot {
            DnsSlot::Primary => self.dns[0] = addr,
            DnsSlot::Secondary => self.dns[1] = addr,
        }
    }

    fn set_p2p_port(&mut self, port: u16) {
        self.p2p_port = Some(port);
    }

    fn set_relay_token(&mut self, token: Option<[u8; 16]>) {
        self.token = token;
    }

    fn relay_token(&self) -> Option<[u8; 16]> {
        self.token
    }

    fn flush_config(&mut self, _state: &mut AdapterState, _now_us: u64) {
        self.flushes += 1;
    }
}
