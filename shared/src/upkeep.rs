//! Device upkeep: the duties run from every transport wait.
//!
//! ```text
//! FrameTransport wait loop
//!     └─► DeviceUpkeep::upkeep
//!             ├── HostLink::pump   (USB in → in ring, out rings → USB)
//!             └── queue debug envelopes for the main loop
//! ```
//!
//! Debug envelopes are only queued here. The main loop takes them with
//! [`DeviceUpkeep::take_debug_envelope`] and runs them through the debug
//! interpreter once no adapter transfer is in flight.

use embedded_io::{Error as _, Read, ReadReady, Write, WriteReady};
use heapless::Deque;

use crate::buffer::IoBuffers;
use crate::link::{DebugEnvelope, HostLink, LinkError};
use crate::traits::Upkeep;

/// Debug envelopes held until the main loop gets to them.
pub const DEBUG_QUEUE_DEPTH: usize = 4;

pub struct DeviceUpkeep<'a, T> {
    link: HostLink<'a, T>,
    envelopes: Deque<DebugEnvelope, DEBUG_QUEUE_DEPTH>,
    link_errors: u32,
}

impl<'a, T> DeviceUpkeep<'a, T>
where
    T: Read + ReadReady + Write + WriteReady,
{
    pub fn new(endpoint: T, io: &'a IoBuffers) -> Self {
        Self {
            link: HostLink::new(endpoint, io),
            envelopes: Deque::new(),
            link_errors: 0,
        }
    }

    pub fn link(&self) -> &HostLink<'a, T> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut HostLink<'a, T> {
        &mut self.link
    }

    /// Oldest debug envelope not yet handled.
    pub fn take_debug_envelope(&mut self) -> Option<DebugEnvelope> {
        self.envelopes.pop_front()
    }

    /// Endpoint errors seen since startup.
    pub fn link_errors(&self) -> u32 {
        self.link_errors
    }
}

impl<'a, T> Upkeep for DeviceUpkeep<'a, T>
where
    T: Read + ReadReady + Write + WriteReady,
{
    fn upkeep(&mut self) {
        match self.link.pump() {
            Ok(Some(envelope)) => {
                if self.envelopes.push_back(envelope).is_err() {
                    warn!("upkeep: debug queue full, command dropped");
                }
            }
            Ok(None) => {}
            Err(LinkError::Endpoint(e)) => {
                self.link_errors = self.link_errors.wrapping_add(1);
                warn!("upkeep: host endpoint error {:?}", e.kind());
            }
        }
    }
}
