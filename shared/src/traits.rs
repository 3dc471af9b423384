//! # Collaborator Traits
//!
//! Seams between the transport core and the parts of the device it does not
//! own:
//!
//! - **Clock**: monotonic microsecond time source for timeouts
//! - **Upkeep**: cooperative hook run while the transport waits
//! - **AdapterControl**: the mobile-adapter library driven by debug commands
//!
//! Each is injected at construction, so tests swap in scripted doubles and
//! the firmware binds the real peripherals once at startup.
//!
//! ## Cooperative Waiting
//!
//! ```text
//! FrameTransport::receive
//!     │
//!     ├── poll RingBuffer(in) ── empty ──► Upkeep::upkeep()
//!     │                                        │
//!     │                           USB service, timers, LED
//!     │                                        │
//!     └◄───────────────────────────────────────┘
//! ```

use crate::adapter::AdapterState;
use crate::addr::MobileAddr;

/// Monotonic time source in microseconds.
///
/// Values may wrap; consumers compare timestamps with wrapping subtraction.
pub trait Clock {
    fn now_us(&self) -> u64;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }
}

/// Hook invoked on every iteration of a transport wait loop.
///
/// This is the single point where other device duties run while the
/// transport blocks: host I/O servicing, timers and status LEDs.
pub trait Upkeep {
    fn upkeep(&mut self);
}

impl<F: FnMut()> Upkeep for F {
    fn upkeep(&mut self) {
        self()
    }
}

/// Upkeep hook that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoUpkeep;

impl Upkeep for NoUpkeep {
    fn upkeep(&mut self) {}
}

/// Which DNS server entry to update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DnsSlot {
    Primary,
    Secondary,
}

/// Adapter type reported to the Game Boy.
///
/// Only the low 7 bits of the wire byte select the device; bit 7 carries
/// the unmetered flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AdapterDevice {
    Blue = 8,
    Yellow = 9,
    Green = 10,
    Red = 11,
    Purple = 12,
    Black = 13,
    Pink = 14,
    Grey = 15,
}

impl TryFrom<u8> for AdapterDevice {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            8 => Ok(Self::Blue),
            9 => Ok(Self::Yellow),
            10 => Ok(Self::Green),
            11 => Ok(Self::Red),
            12 => Ok(Self::Purple),
            13 => Ok(Self::Black),
            14 => Ok(Self::Pink),
            15 => Ok(Self::Grey),
            _ => Err(()),
        }
    }
}

/// Control surface of the external mobile-adapter library.
///
/// The debug command interpreter mutates adapter settings only through
/// this trait. Implementations apply the change to the library's own
/// copy of the configuration blob.
pub trait AdapterControl {
    /// Start the adapter protocol loop.
    fn start(&mut self);

    /// Stop the adapter protocol loop.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    fn set_device(&mut self, device: AdapterDevice, unmetered: bool);

    fn set_relay(&mut self, addr: MobileAddr);

    fn set_dns(&mut self, slot: DnsSlot, addr: MobileAddr);

    fn set_p2p_port(&mut self, port: u16);

    /// Replace the relay authentication token; `None` clears it.
    fn set_relay_token(&mut self, token: Option<[u8; 16]>);

    fn relay_token(&self) -> Option<[u8; 16]>;

    /// Write settings changed through this trait back into the blob.
    ///
    /// Called before a configuration commit. Libraries that already edit
    /// the blob through [`AdapterState::config_write`] keep the default.
    fn flush_config(&mut self, _state: &mut AdapterState, _now_us: u64) {}
}
