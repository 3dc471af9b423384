//! Adapter-side configuration state and the save debounce.
//!
//! The mobile-adapter library reads and writes its configuration through
//! [`AdapterState`]. Edits only mark the state dirty; the main loop commits
//! to flash once edits have settled for [`SAVE_DEBOUNCE_US`].

use embedded_storage::nor_flash::NorFlash;
use heapless::String;

use crate::flash::{FlashConfigStore, StoreError};

/// Size of the configuration blob the adapter persists.
pub const CONFIG_SIZE: usize = 0x200;

/// Longest phone number the adapter reports.
pub const MAX_NUMBER_SIZE: usize = 0x20;

/// Quiet time after the last edit before a save is allowed.
pub const SAVE_DEBOUNCE_US: u64 = 1_000_000;

/// Which phone number an update refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NumberKind {
    /// The adapter's own number
    User,
    /// The number of the current peer
    Peer,
}

pub struct AdapterState {
    config: [u8; CONFIG_SIZE],
    number_user: String<MAX_NUMBER_SIZE>,
    number_peer: String<MAX_NUMBER_SIZE>,
    automatic_save: bool,
    force_save: bool,
    dirty: bool,
    last_edit_us: u64,
}

impl AdapterState {
    pub fn new() -> Self {
        Self::with_config([0; CONFIG_SIZE])
    }

    /// State seeded with a blob loaded from flash.
    pub fn with_config(config: [u8; CONFIG_SIZE]) -> Self {
        Self {
            config,
            number_user: String::new(),
            number_peer: String::new(),
            automatic_save: true,
            force_save: false,
            dirty: false,
            last_edit_us: 0,
        }
    }

    pub fn config(&self) -> &[u8; CONFIG_SIZE] {
        &self.config
    }

    /// Copy `dest.len()` bytes starting at `offset`; `false` if out of range.
    pub fn config_read(&self, offset: usize, dest: &mut [u8]) -> bool {
        match offset
            .checked_add(dest.len())
            .and_then(|end| self.config.get(offset..end))
        {
            Some(src) => {
                dest.copy_from_slice(src);
                true
            }
            None => false,
        }
    }

    /// Overwrite bytes at `offset`; `false` if out of range.
    ///
    /// A write that changes any byte marks the state dirty as of `now_us`.
    pub fn config_write(&mut self, offset: usize, src: &[u8], now_us: u64) -> bool {
        let Some(end) = offset.checked_add(src.len()) else {
            return false;
        };
        let Some(dest) = self.config.get_mut(offset..end) else {
            return false;
        };
        if dest != src {
            dest.copy_from_slice(src);
            self.dirty = true;
            self.last_edit_us = now_us;
        }
        true
    }

    /// Write as much of `src` as fits from `offset`, clamping both to the
    /// blob. Returns the number of bytes written.
    pub fn write_clamped(&mut self, offset: usize, src: &[u8], now_us: u64) -> usize {
        let offset = offset.min(CONFIG_SIZE);
        let len = src.len().min(CONFIG_SIZE - offset);
        self.config_write(offset, &src[..len], now_us);
        len
    }

    /// Replace a phone number, truncated to [`MAX_NUMBER_SIZE`]; `None`
    /// clears it.
    pub fn update_number(&mut self, kind: NumberKind, number: Option<&str>) {
        let dest = match kind {
            NumberKind::User => &mut self.number_user,
            NumberKind::Peer => &mut self.number_peer,
        };
        dest.clear();
        if let Some(number) = number {
            for c in number.chars() {
                if dest.push(c).is_err() {
                    break;
                }
            }
        }
    }

    pub fn number(&self, kind: NumberKind) -> &str {
        match kind {
            NumberKind::User => &self.number_user,
            NumberKind::Peer => &self.number_peer,
        }
    }

    pub fn automatic_save(&self) -> bool {
        self.automatic_save
    }

    pub fn set_automatic_save(&mut self, enabled: bool) {
        self.automatic_save = enabled;
    }

    /// Save on the next opportunity even if automatic saving is off.
    pub fn request_save(&mut self) {
        self.force_save = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether a save is due at `now_us`.
    pub fn needs_save(&self, now_us: u64) -> bool {
        let wanted = (self.dirty && self.automatic_save) || self.force_save;
        wanted && now_us.wrapping_sub(self.last_edit_us) >= SAVE_DEBOUNCE_US
    }

    /// Write the blob to `store` and clear the pending flags.
    ///
    /// The flags clear even when the store fails: it keeps its previous
    /// record and the failure is only reported.
    pub fn commit<F: NorFlash>(&mut self, store: &mut FlashConfigStore<F>) -> Result<(), StoreError> {
        let result = store.save(&self.config);
        self.dirty = false;
        self.force_save = false;
        result
    }

    /// Commit when [`needs_save`](Self::needs_save) allows it. Returns
    /// whether a save was attempted.
    pub fn poll_save<F: NorFlash>(&mut self, store: &mut FlashConfigStore<F>, now_us: u64) -> bool {
        if !self.needs_save(now_us) {
            return false;
        }
        if let Err(e) = self.commit(store) {
            warn!("adapter: configuration save failed: {:?}", e);
        }
        true
    }
}

impl Default for AdapterState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::FlashGeometry;
    use crate::mock::MemFlash;

    #[test]
    fn test_config_bounds() {
        let mut state = AdapterState::new();
        assert!(state.config_write(0x1FE, &[1, 2], 0));
        assert!(!state.config_write(0x1FF, &[1, 2], 0));
        assert!(!state.config_write(usize::MAX, &[1], 0));

        let mut dest = [0u8; 2];
        assert!(state.config_read(0x1FE, &mut dest));
        assert_eq!(dest, [1, 2]);
        assert!(!state.config_read(0x200, &mut dest));
    }

    #[test]
    fn test_unchanged_write_stays_clean() {
        let mut state = AdapterState::new();
        assert!(state.config_write(0, &[0, 0, 0], 10));
        assert!(!state.is_dirty());
        assert!(state.config_write(0, &[0, 7], 10));
        assert!(state.is_dirty());
    }

    #[test]
    fn test_write_clamped() {
        let mut state = AdapterState::new();
        assert_eq!(state.write_clamped(0x1FC, &[9; 16], 0), 4);
        assert_eq!(&state.config()[0x1FC..], &[9; 4]);
        assert_eq!(state.write_clamped(0x300, &[9; 16], 0), 0);
    }

    #[test]
    fn test_numbers_truncate_and_clear() {
        let mut state = AdapterState::new();
        state.update_number(NumberKind::User, Some("09012345678"));
        assert_eq!(state.number(NumberKind::User), "09012345678");

        let long = "1".repeat(40);
        state.update_number(NumberKind::Peer, Some(&long));
        assert_eq!(state.number(NumberKind::Peer).len(), MAX_NUMBER_SIZE);

        state.update_number(NumberKind::User, None);
        assert_eq!(state.number(NumberKind::User), "");
    }

    #[test]
    fn test_save_debounce() {
        let mut state = AdapterState::new();
        assert!(!state.needs_save(5_000_000));

        state.config_write(4, &[1], 2_000_000);
        assert!(!state.needs_save(2_500_000));
        assert!(state.needs_save(3_000_000));

        state.set_automatic_save(false);
        assert!(!state.needs_save(3_000_000));
        state.request_save();
        assert!(state.needs_save(3_000_000));
    }

    #[test]
    fn test_poll_save_commits_once() {
        let mut store = FlashConfigStore::init(MemFlash::new(8192), FlashGeometry::DEFAULT).unwrap();
        let mut state = AdapterState::with_config(*store.config());

        state.config_write(0, b"GB", 0);
        assert!(!state.poll_save(&mut store, 10));
        assert!(state.poll_save(&mut store, SAVE_DEBOUNCE_US));
        assert!(!state.poll_save(&mut store, 2 * SAVE_DEBOUNCE_US));

        assert_eq!(store.progressive(), 1);
        assert_eq!(&store.config()[..2], b"GB");
    }
}
