//! # Socket Relay Client
//!
//! The adapter library's socket callbacks, forwarded to the PC as small
//! RPCs over the GBridge data channel. The PC side opens the real sockets
//! and answers each request with a reply frame that echoes the request id.
//!
//! ```text
//! device                                   PC
//!   │ ── DATA  [id, conn, args..] ──────────► │
//!   │ ◄───────────────────── ack byte ─────── │
//!   │ ── (SEND only) STREAM payload ────────► │
//!   │ ◄───────────────────── ack byte ─────── │
//!   │ ◄───── DATA_PC  [id, result..] ──────── │
//!   │ ── ack byte ──────────────────────────► │
//!   │ ◄───── (RECV only) STREAM_PC payload ── │
//! ```
//!
//! Every call blocks cooperatively through the transport's upkeep hook.

use crate::addr::{MobileAddr, MAX_ADDR_SIZE};
use crate::protocol::{FrameClass, RelayCommand, MAX_DATA_SIZE};
use crate::traits::{Clock, Upkeep};
use crate::transport::{FrameTransport, SendOptions, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RelayError {
    Transport(TransportError),
    /// Reply with the wrong id, size or address
    UnexpectedReply,
}

impl From<TransportError> for RelayError {
    fn from(e: TransportError) -> Self {
        RelayError::Transport(e)
    }
}

/// Socket type requested by [`RelayClient::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SockType {
    Tcp = 0,
    Udp = 1,
}

/// Result of a RECV call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Received {
    /// Bytes received, 0 on orderly close, negative on socket error
    pub size: i16,
    /// Sender address for datagram sockets
    pub from: MobileAddr,
}

pub struct RelayClient<'t, 'a, C: Clock, U: Upkeep> {
    transport: &'t mut FrameTransport<'a, C, U>,
}

impl<'t, 'a, C: Clock, U: Upkeep> RelayClient<'t, 'a, C, U> {
    pub fn new(transport: &'t mut FrameTransport<'a, C, U>) -> Self {
        Self { transport }
    }

    /// Open socket `conn`, optionally bound to `bind_port`.
    pub fn open(
        &mut self,
        conn: u8,
        kind: SockType,
        addr_type: u8,
        bind_port: u16,
    ) -> Result<bool, RelayError> {
        let [hi, lo] = bind_port.to_be_bytes();
        let request = [RelayCommand::Open as u8, conn, kind as u8, addr_type, hi, lo];
        let reply = self.call(&request, 2)?;
        Ok(reply[1] != 0)
    }

    pub fn close(&mut self, conn: u8) -> Result<(), RelayError> {
        self.call(&[RelayCommand::Close as u8, conn], 1)?;
        Ok(())
    }

    /// Returns 1 once connected, 0 while in progress, negative on failure.
    pub fn connect(&mut self, conn: u8, addr: &MobileAddr) -> Result<i8, RelayError> {
        let mut request = [0u8; 2 + MAX_ADDR_SIZE];
        let len = addressed(&mut request, RelayCommand::Connect, conn, addr)?;
        let reply = self.call(&request[..len], 2)?;
        Ok(reply[1] as i8)
    }

    pub fn listen(&mut self, conn: u8) -> Result<bool, RelayError> {
        let reply = self.call(&[RelayCommand::Listen as u8, conn], 2)?;
        Ok(reply[1] != 0)
    }

    pub fn accept(&mut self, conn: u8) -> Result<bool, RelayError> {
        let reply = self.call(&[RelayCommand::Accept as u8, conn], 2)?;
        Ok(reply[1] != 0)
    }

    /// Send `data` on `conn`, to `addr` for datagram sockets. Returns the
    /// PC's byte count, negative on socket error.
    pub fn send(&mut self, conn: u8, data: &[u8], addr: &MobileAddr) -> Result<i16, RelayError> {
        if data.len() > FrameClass::Stream.max_payload() {
            return Err(TransportError::InvalidSize.into());
        }
        let mut request = [0u8; 2 + MAX_ADDR_SIZE];
        let len = addressed(&mut request, RelayCommand::Send, conn, addr)?;
        self.transport
            .send(&request[..len], FrameClass::Data, SendOptions::default())?;
        self.transport
            .send(data, FrameClass::Stream, SendOptions::default())?;

        let mut reply = [0u8; MAX_DATA_SIZE];
        let read = self.receive_reply(&mut reply, 3)?;
        if read != 3 || reply[0] != RelayCommand::Send as u8 {
            return Err(RelayError::UnexpectedReply);
        }
        Ok(i16::from_be_bytes([reply[1], reply[2]]))
    }

    /// Ask for up to `size` bytes from `conn`.
    ///
    /// With `dest` set, a positive result is followed by the payload, which
    /// lands at the front of `dest`. Without it the call only peeks.
    pub fn recv(
        &mut self,
        conn: u8,
        size: u16,
        dest: Option<&mut [u8]>,
    ) -> Result<Received, RelayError> {
        let [hi, lo] = size.to_be_bytes();
        let want_data = dest.is_some() as u8;
        self.transport.send(
            &[RelayCommand::Recv as u8, conn, hi, lo, want_data],
            FrameClass::Data,
            SendOptions::default(),
        )?;

        let mut reply = [0u8; MAX_DATA_SIZE];
        let read = self.receive_reply(&mut reply, 3)?;
        if read < 3 || reply[0] != RelayCommand::Recv as u8 {
            return Err(RelayError::UnexpectedReply);
        }
        let got = i16::from_be_bytes([reply[1], reply[2]]);
        let from = match MobileAddr::decode(&reply[3..read]) {
            Some((addr, used)) if used + 3 == read => addr,
            _ => return Err(RelayError::UnexpectedReply),
        };

        if got > 0 {
            if let Some(dest) = dest {
                let len = got as usize;
                if len > dest.len() {
                    return Err(RelayError::UnexpectedReply);
                }
                self.transport
                    .receive(&mut dest[..len], len, FrameClass::Stream, len, true)?;
            }
        }
        Ok(Received { size: got, from })
    }

    /// Send a request and read a reply of exactly `reply_len` bytes that
    /// echoes its id.
    fn call(
        &mut self,
        request: &[u8],
        reply_len: usize,
    ) -> Result<[u8; MAX_DATA_SIZE], RelayError> {
        self.transport
            .send(request, FrameClass::Data, SendOptions::default())?;
        let mut reply = [0u8; MAX_DATA_SIZE];
        let read = self.receive_reply(&mut reply, reply_len)?;
        if read != reply_len || reply[0] != request[0] {
            debug!("relay: unexpected reply to command {}", request[0]);
            return Err(RelayError::UnexpectedReply);
        }
        Ok(reply)
    }

    fn receive_reply(
        &mut self,
        reply: &mut [u8; MAX_DATA_SIZE],
        requested: usize,
    ) -> Result<usize, RelayError> {
        Ok(self
            .transport
            .receive(reply, requested, FrameClass::Data, MAX_DATA_SIZE, true)?)
    }
}

/// `[id, conn, address]` request; returns its length.
fn addressed(
    request: &mut [u8; 2 + MAX_ADDR_SIZE],
    command: RelayCommand,
    conn: u8,
    addr: &MobileAddr,
) -> Result<usize, RelayError> {
    request[0] = command as u8;
    request[1] = conn;
    let len = addr
        .encode(&mut request[2..])
        .ok_or(RelayError::Transport(TransportError::InvalidSize))?;
    Ok(2 + len)
}
