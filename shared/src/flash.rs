//! # Flash Configuration Store
//!
//! Wear-leveled, mirrored persistence of the single adapter configuration
//! record on NOR flash.
//!
//! ## Layout
//!
//! ```text
//! base
//! ├── mirror 0 ── slot 0 │ slot 1 │ ... │ slot S-1   (erased as one unit)
//! ├── mirror 1 ── slot 0 │ slot 1 │ ... │ slot S-1
//! └── ...
//!
//! record:
//! ┌──────────┬──────────────┬────────────┬─────────────┬──────────┐
//! │ key (16) │ config (512) │ unused(236)│ progressive │ checksum │
//! │ "CONFIG" │              │ preserved  │   u16 BE    │  u16 BE  │
//! └──────────┴──────────────┴────────────┴─────────────┴──────────┘
//! ```
//!
//! Each save appends a record one slot further along, rolling into the next
//! mirror when the current one is full. A mirror is erased only when a save
//! wraps back to its first slot, so the newest record lives in a mirror
//! other than the one being erased.
//!
//! ## Boot Selection
//!
//! Mirrors fill from slot 0 upward after every erase, so the scan of a
//! mirror stops at its first slot that fails validation. Among the valid
//! records the newest progressive number wins, compared by signed 16-bit
//! difference so a counter rollover still orders correctly.

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind};

use crate::adapter::CONFIG_SIZE;
use crate::checksum::{self, CHECKSUM_SIZE};

/// Magic key at the start of every valid record.
pub const CONFIG_KEY: &[u8] = b"CONFIG";
/// Width of the NUL-padded key field.
pub const KEY_SIZE: usize = 16;
/// Reserved bytes carried verbatim from record to record.
pub const UNUSED_SIZE: usize = 236;

const CONFIG_OFFSET: usize = KEY_SIZE;
const UNUSED_OFFSET: usize = CONFIG_OFFSET + CONFIG_SIZE;
const PROGRESSIVE_OFFSET: usize = UNUSED_OFFSET + UNUSED_SIZE;
const CHECKSUM_OFFSET: usize = PROGRESSIVE_OFFSET + 2;

/// Encoded record size.
pub const RECORD_SIZE: usize = CHECKSUM_OFFSET + CHECKSUM_SIZE;

/// Where the store lives and how it is carved into mirrors and slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashGeometry {
    /// Byte offset of mirror 0, sector aligned
    pub base: u32,
    /// Program page size; slots are rounded up to it
    pub page_size: usize,
    /// Erase sector size; mirrors are rounded up to it
    pub sector_size: usize,
    pub slots_per_mirror: usize,
    pub mirrors: usize,
}

impl FlashGeometry {
    /// RP2040-class part: 256-byte pages, 4 KiB sectors, 5 slots, 2 mirrors.
    pub const DEFAULT: Self = Self {
        base: 0,
        page_size: 256,
        sector_size: 4096,
        slots_per_mirror: 5,
        mirrors: 2,
    };

    pub const fn slot_size(&self) -> usize {
        RECORD_SIZE.div_ceil(self.page_size) * self.page_size
    }

    pub const fn mirror_size(&self) -> usize {
        (self.slot_size() * self.slots_per_mirror).div_ceil(self.sector_size) * self.sector_size
    }

    /// Bytes spanned by all mirrors.
    pub const fn total_size(&self) -> usize {
        self.mirror_size() * self.mirrors
    }

    fn mirror_start(&self, mirror: usize) -> u32 {
        self.base + (mirror * self.mirror_size()) as u32
    }

    fn slot_offset(&self, pos: SlotPos) -> u32 {
        self.mirror_start(pos.mirror) + (pos.slot * self.slot_size()) as u32
    }

    fn is_valid_for<F: NorFlash>(&self, flash: &F) -> bool {
        self.page_size > 0
            && self.sector_size > 0
            && self.slots_per_mirror > 0
            && self.mirrors > 0
            && self.sector_size % F::ERASE_SIZE == 0
            && self.base as usize % F::ERASE_SIZE == 0
            && RECORD_SIZE % F::WRITE_SIZE == 0
            && RECORD_SIZE % F::READ_SIZE == 0
            && self.slot_size() % F::WRITE_SIZE == 0
            && self.base as usize + self.total_size() <= flash.capacity()
    }
}

impl Default for FlashGeometry {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Flash failure, independent of the driver's error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashFault {
    NotAligned,
    OutOfBounds,
    Other,
}

impl From<NorFlashErrorKind> for FlashFault {
    fn from(kind: NorFlashErrorKind) -> Self {
        match kind {
            NorFlashErrorKind::NotAligned => FlashFault::NotAligned,
            NorFlashErrorKind::OutOfBounds => FlashFault::OutOfBounds,
            _ => FlashFault::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// The flash driver reported an error
    Flash(FlashFault),
    /// Read-back after programming did not match
    VerifyFailed,
    /// Geometry does not fit the flash part
    Geometry,
}

fn fault<E: NorFlashError>(e: E) -> StoreError {
    StoreError::Flash(e.kind().into())
}

/// Mirror and slot index of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotPos {
    pub mirror: usize,
    pub slot: usize,
}

/// Decoded configuration record.
#[derive(Clone, PartialEq, Eq)]
pub struct SavedRecord {
    pub config: [u8; CONFIG_SIZE],
    pub unused: [u8; UNUSED_SIZE],
    pub progressive: u16,
}

impl core::fmt::Debug for SavedRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SavedRecord")
            .field("progressive", &self.progressive)
            .finish_non_exhaustive()
    }
}

impl SavedRecord {
    /// All-zero record with progressive number 0.
    pub const fn blank() -> Self {
        Self {
            config: [0; CONFIG_SIZE],
            unused: [0; UNUSED_SIZE],
            progressive: 0,
        }
    }

    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[..CONFIG_KEY.len()].copy_from_slice(CONFIG_KEY);
        out[CONFIG_OFFSET..UNUSED_OFFSET].copy_from_slice(&self.config);
        out[UNUSED_OFFSET..PROGRESSIVE_OFFSET].copy_from_slice(&self.unused);
        out[PROGRESSIVE_OFFSET..CHECKSUM_OFFSET].copy_from_slice(&self.progressive.to_be_bytes());
        let sum = checksum::seal(&out[..CHECKSUM_OFFSET]);
        out[CHECKSUM_OFFSET..].copy_from_slice(&sum);
        out
    }

    /// Parse a slot; `None` unless both checksum and key match.
    pub fn decode(bytes: &[u8; RECORD_SIZE]) -> Option<Self> {
        if !checksum::verify(&bytes[..CHECKSUM_OFFSET], &bytes[CHECKSUM_OFFSET..]) {
            return None;
        }
        let key = &bytes[..KEY_SIZE];
        if !key.starts_with(CONFIG_KEY) || key[CONFIG_KEY.len()..].iter().any(|&b| b != 0) {
            return None;
        }

        let mut record = Self::blank();
        record.config.copy_from_slice(&bytes[CONFIG_OFFSET..UNUSED_OFFSET]);
        record.unused.copy_from_slice(&bytes[UNUSED_OFFSET..PROGRESSIVE_OFFSET]);
        record.progressive =
            u16::from_be_bytes([bytes[PROGRESSIVE_OFFSET], bytes[PROGRESSIVE_OFFSET + 1]]);
        Some(record)
    }

    /// Whether this record is newer than `other`, tolerating counter wrap.
    pub fn is_newer_than(&self, other: &Self) -> bool {
        (self.progressive.wrapping_sub(other.progressive) as i16) > 0
    }
}

/// The configuration store bound to one flash device.
pub struct FlashConfigStore<F: NorFlash> {
    flash: F,
    geometry: FlashGeometry,
    current: SlotPos,
    record: SavedRecord,
}

impl<F: NorFlash> FlashConfigStore<F> {
    /// Scan the flash and select the newest valid record.
    ///
    /// Each mirror is read from slot 0 upward and the scan of that mirror
    /// stops at the first slot that fails to decode. [`save`](Self::save)
    /// fills a mirror in slot order after erasing it, so slots past an
    /// invalid one are leftovers from before the last erase and must not
    /// win, however high their progressive number.
    ///
    /// Formats mirror 0 with a blank record when nothing valid is found.
    pub fn init(mut flash: F, geometry: FlashGeometry) -> Result<Self, StoreError> {
        if !geometry.is_valid_for(&flash) {
            return Err(StoreError::Geometry);
        }

        let mut best: Option<(SlotPos, SavedRecord)> = None;
        let mut raw = [0u8; RECORD_SIZE];
        for mirror in 0..geometry.mirrors {
            for slot in 0..geometry.slots_per_mirror {
                let pos = SlotPos { mirror, slot };
                flash
                    .read(geometry.slot_offset(pos), &mut raw)
                    .map_err(fault)?;
                let Some(record) = SavedRecord::decode(&raw) else {
                    break;
                };
                let newer = match &best {
                    Some((_, current)) => record.is_newer_than(current),
                    None => true,
                };
                if newer {
                    best = Some((pos, record));
                }
            }
        }

        let mut store = Self {
            flash,
            geometry,
            current: SlotPos { mirror: 0, slot: 0 },
            record: SavedRecord::blank(),
        };
        match best {
            Some((pos, record)) => {
                debug!(
                    "flash: record {} at mirror {} slot {}",
                    record.progressive, pos.mirror, pos.slot
                );
                store.current = pos;
                store.record = record;
            }
            None => {
                info!("flash: no valid configuration, formatting");
                let bytes = store.record.encode();
                store.program(store.current, &bytes, true)?;
            }
        }
        Ok(store)
    }

    /// Copy the selected configuration blob into `dest`; returns the count.
    pub fn read(&self, dest: &mut [u8]) -> usize {
        let len = dest.len().min(CONFIG_SIZE);
        dest[..len].copy_from_slice(&self.record.config[..len]);
        len
    }

    pub fn config(&self) -> &[u8; CONFIG_SIZE] {
        &self.record.config
    }

    pub fn record(&self) -> &SavedRecord {
        &self.record
    }

    pub fn progressive(&self) -> u16 {
        self.record.progressive
    }

    /// Slot holding the authoritative record.
    pub fn position(&self) -> SlotPos {
        self.current
    }

    pub fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Give the flash device back.
    pub fn release(self) -> F {
        self.flash
    }

    /// Append a new record holding `config`.
    ///
    /// On a failed verification the write is retried once at slot 0 of a
    /// freshly erased mirror that does not hold the current record. If that
    /// also fails the previous record stays authoritative.
    pub fn save(&mut self, config: &[u8; CONFIG_SIZE]) -> Result<(), StoreError> {
        let record = SavedRecord {
            config: *config,
            unused: self.record.unused,
            progressive: self.record.progressive.wrapping_add(1),
        };
        let bytes = record.encode();

        let target = self.next_position();
        let result = match self.program(target, &bytes, target.slot == 0) {
            Ok(()) => Ok(target),
            Err(e) => {
                warn!(
                    "flash: write to mirror {} slot {} failed ({:?}), retrying",
                    target.mirror, target.slot, e
                );
                let mut mirror = target.mirror;
                if mirror == self.current.mirror {
                    mirror = (mirror + 1) % self.geometry.mirrors;
                }
                let retry = SlotPos { mirror, slot: 0 };
                self.program(retry, &bytes, true).map(|()| retry)
            }
        };

        match result {
            Ok(pos) => {
                self.current = pos;
                self.record = record;
                Ok(())
            }
            Err(e) => {
                error!(
                    "flash: save of record {} failed ({:?}), keeping record {}",
                    record.progressive, e, self.record.progressive
                );
                Err(e)
            }
        }
    }

    fn next_position(&self) -> SlotPos {
        let SlotPos { mirror, slot } = self.current;
        if slot + 1 < self.geometry.slots_per_mirror {
            SlotPos {
                mirror,
                slot: slot + 1,
            }
        } else {
            SlotPos {
                mirror: (mirror + 1) % self.geometry.mirrors,
                slot: 0,
            }
        }
    }

    /// Write `bytes` at `pos`, erasing its mirror first when asked, and
    /// verify by reading back.
    fn program(
        &mut self,
        pos: SlotPos,
        bytes: &[u8; RECORD_SIZE],
        erase: bool,
    ) -> Result<(), StoreError> {
        if erase {
            let from = self.geometry.mirror_start(pos.mirror);
            let to = from + self.geometry.mirror_size() as u32;
            self.flash.erase(from, to).map_err(fault)?;
        }
        let offset = self.geometry.slot_offset(pos);
        self.flash.write(offset, bytes).map_err(fault)?;

        let mut check = [0u8; RECORD_SIZE];
        self.flash.read(offset, &mut check).map_err(fault)?;
        if check != *bytes {
            return Err(StoreError::VerifyFailed);
        }
        Ok(())
    }
}
