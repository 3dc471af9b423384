//! # Host Link
//!
//! Moves bytes between the USB endpoint and the [`IoBuffers`] rings.
//!
//! ## Packet Format
//!
//! Both directions use packets of at most 64 bytes:
//!
//! ```text
//! ┌───────┬───────┬──────────────────────────┐
//! │ flags │ count │  count payload bytes     │
//! │ 2 bit │ 6 bit │  (0..=63)                │
//! └───────┴───────┴──────────────────────────┘
//! ```
//!
//! | Direction    | Flags  | Payload                          |
//! |--------------|--------|----------------------------------|
//! | host→device  | `0x00` | GBridge bytes for the in ring    |
//! | host→device  | `0xC0` | one whole debug command envelope |
//! | device→host  | `0x00` | bytes from the out ring          |
//! | device→host  | `0x80` | bytes from the debug-out ring    |
//!
//! The out ring always drains before the debug-out ring so GBridge replies
//! are never held up behind log traffic.

use embedded_io::{Read, ReadReady, Write, WriteReady};
use heapless::Vec;

use crate::buffer::{ByteRing, IoBuffers};

/// Largest packet in either direction.
pub const PACKET_SIZE: usize = 64;

/// Largest payload of one packet.
pub const MAX_PACKET_PAYLOAD: usize = PACKET_SIZE - 1;

/// Header bits holding the channel flags.
pub const FLAGS_MASK: u8 = 0xC0;
/// Header bits holding the payload count.
pub const COUNT_MASK: u8 = 0x3F;

/// Channel flags of the packet header.
pub mod flags {
    pub const DATA: u8 = 0x00;
    /// Device→host debug-out bytes
    pub const DEBUG_OUT: u8 = 0x80;
    /// Host→device debug command envelope
    pub const DEBUG_COMMAND: u8 = 0xC0;
}

/// A debug command envelope lifted out of a packet.
pub type DebugEnvelope = Vec<u8, MAX_PACKET_PAYLOAD>;

/// What an inbound packet carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'p> {
    /// GBridge bytes, all queued on the in ring
    Data(usize),
    /// A debug command envelope for the interpreter
    DebugCommand(&'p [u8]),
    /// Header with a zero count
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketError {
    /// Fewer bytes than the header's count
    Truncated,
    /// Flags not valid in the host→device direction
    UnknownChannel(u8),
    /// The in ring cannot take the whole payload yet; nothing was queued
    InboundFull,
}

/// Splits and builds packets over one set of rings.
#[derive(Clone, Copy)]
pub struct PacketMux<'a> {
    io: &'a IoBuffers,
}

impl<'a> PacketMux<'a> {
    pub const fn new(io: &'a IoBuffers) -> Self {
        Self { io }
    }

    pub fn io(&self) -> &'a IoBuffers {
        self.io
    }

    /// Route one host→device packet.
    pub fn ingest<'p>(&self, packet: &'p [u8]) -> Result<Inbound<'p>, PacketError> {
        let (&header, rest) = packet.split_first().ok_or(PacketError::Truncated)?;
        let count = (header & COUNT_MASK) as usize;
        let payload = rest.get(..count).ok_or(PacketError::Truncated)?;

        match header & FLAGS_MASK {
            _ if count == 0 => Ok(Inbound::Empty),
            flags::DATA => {
                if self.io.data_in.available_for_write() < count {
                    return Err(PacketError::InboundFull);
                }
                Ok(Inbound::Data(self.io.enqueue_inbound_bytes(payload)))
            }
            flags::DEBUG_COMMAND => Ok(Inbound::DebugCommand(payload)),
            other => Err(PacketError::UnknownChannel(other)),
        }
    }

    /// Build the next device→host packet into `dest`.
    ///
    /// Returns the packet length, or 0 when both rings are empty.
    pub fn next_packet(&self, dest: &mut [u8; PACKET_SIZE]) -> usize {
        let (flag, ring) = if self.io.data_out.unread_count() > 0 {
            (flags::DATA, &self.io.data_out as &dyn ByteRing)
        } else if self.io.debug_out.unread_count() > 0 {
            (flags::DEBUG_OUT, &self.io.debug_out as &dyn ByteRing)
        } else {
            return 0;
        };

        let mut count = 0;
        while count < MAX_PACKET_PAYLOAD {
            match ring.read_one() {
                Some(byte) => {
                    dest[1 + count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        dest[0] = flag | count as u8;
        1 + count
    }
}

/// Error from the endpoint under a [`HostLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError<E> {
    Endpoint(E),
}

/// Packet pump between a byte endpoint and the rings.
///
/// Call [`pump`](Self::pump) from the upkeep hook. Packets may arrive and
/// leave in pieces; partial packets are carried over between calls.
pub struct HostLink<'a, T> {
    endpoint: T,
    mux: PacketMux<'a>,
    inbound: Vec<u8, PACKET_SIZE>,
    outbound: [u8; PACKET_SIZE],
    out_len: usize,
    out_pos: usize,
}

impl<'a, T> HostLink<'a, T>
where
    T: Read + ReadReady + Write + WriteReady,
{
    pub fn new(endpoint: T, io: &'a IoBuffers) -> Self {
        Self {
            endpoint,
            mux: PacketMux::new(io),
            inbound: Vec::new(),
            outbound: [0; PACKET_SIZE],
            out_len: 0,
            out_pos: 0,
        }
    }

    pub fn endpoint(&self) -> &T {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut T {
        &mut self.endpoint
    }

    /// Service both directions once.
    ///
    /// Returns a debug command envelope when one arrived; at most one is
    /// taken per call.
    pub fn pump(&mut self) -> Result<Option<DebugEnvelope>, LinkError<T::Error>> {
        let envelope = self.pump_in()?;
        self.pump_out()?;
        Ok(envelope)
    }

    fn pump_in(&mut self) -> Result<Option<DebugEnvelope>, LinkError<T::Error>> {
        while self.endpoint.read_ready().map_err(LinkError::Endpoint)? {
            // a new packet is only started once its payload is sure to fit
            if self.inbound.is_empty()
                && self.mux.io().data_in.available_for_write() < MAX_PACKET_PAYLOAD
            {
                break;
            }

            let total = match self.inbound.first() {
                Some(&header) => 1 + (header & COUNT_MASK) as usize,
                None => 1,
            };
            let mut chunk = [0u8; PACKET_SIZE];
            let need = total - self.inbound.len();
            let read = self
                .endpoint
                .read(&mut chunk[..need])
                .map_err(LinkError::Endpoint)?;
            if read == 0 {
                break;
            }
            // never overflows: `read` is at most the bytes still missing
            let _ = self.inbound.extend_from_slice(&chunk[..read]);

            let complete = match self.inbound.first() {
                Some(&header) => self.inbound.len() == 1 + (header & COUNT_MASK) as usize,
                None => false,
            };
            if !complete {
                continue;
            }

            let envelope = match self.mux.ingest(&self.inbound) {
                Ok(Inbound::DebugCommand(bytes)) => Vec::from_slice(bytes).ok(),
                Ok(_) => None,
                Err(e) => {
                    warn!("link: dropped packet ({:?})", e);
                    None
                }
            };
            self.inbound.clear();
            if envelope.is_some() {
                return Ok(envelope);
            }
        }
        Ok(None)
    }

    fn pump_out(&mut self) -> Result<(), LinkError<T::Error>> {
        while self.endpoint.write_ready().map_err(LinkError::Endpoint)? {
            if self.out_pos == self.out_len {
                self.out_len = self.mux.next_packet(&mut self.outbound);
                self.out_pos = 0;
                if self.out_len == 0 {
                    break;
                }
            }
            let written = self
                .endpoint
                .write(&self.outbound[self.out_pos..self.out_len])
                .map_err(LinkError::Endpoint)?;
            if written == 0 {
                break;
            }
            self.out_pos += written;
        }
        Ok(())
    }
}
