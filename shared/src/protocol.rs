//! # GBridge Wire Protocol Definitions
//!
//! Command codes and frame headers shared by the device and the host tool.
//! The numeric values are a compatibility contract with the host side and
//! must not change.
//!
//! ## Frame Format
//!
//! ```text
//! ┌─────────┬─────────────────┬──────────────────┬──────────┐
//! │ Command │  Length (BE)    │     Payload      │ Checksum │
//! │ 1 byte  │ 0, 1 or 2 bytes │  Length bytes    │ 2 bytes  │
//! └─────────┴─────────────────┴──────────────────┴──────────┘
//! ```
//!
//! The checksum covers the payload only. Replies are a single byte:
//! `REPLY_FLAG | command` acknowledges a frame, `REPLY_FLAG | (command + 1)`
//! asks the sender to resend it.
//!
//! ## Command Families
//!
//! - **Device → host**: data and stream frames for the adapter, debug output
//! - **Host → device**: the `_PC` variants of data and stream, program control
//! - **Debug sub-protocol**: second-level ids inside debug envelopes

use heapless::Vec;

/// High bit of a command byte marks an acknowledgment.
pub const REPLY_FLAG: u8 = 0x80;

/// Largest data-class payload the adapter exchanges with the host.
pub const MAX_DATA_SIZE: usize = 0x80;

/// Widest length field ever placed on the wire.
pub const MAX_LENGTH_WIDTH: usize = 4;

/// Top-level GBridge command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    Ping = 0x01,
    DebugLine = 0x02,
    DebugChar = 0x03,
    DebugInfo = 0x04,
    DebugLog = 0x05,
    DebugAck = 0x08,
    Data = 0x0A,
    DataFail = 0x0B,
    Stream = 0x0C,
    StreamFail = 0x0D,
    ProgStop = 0x41,
    ProgStart = 0x42,
    DataPc = 0x4A,
    DataFailPc = 0x4B,
    StreamPc = 0x4C,
    StreamFailPc = 0x4D,
    Reset = 0x4F,
}

impl Command {
    /// Wire byte of this command.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Byte that acknowledges a frame carrying this command.
    #[inline]
    pub const fn ack(self) -> u8 {
        REPLY_FLAG | self as u8
    }

    /// Byte that asks for this frame to be resent.
    #[inline]
    pub const fn nack(self) -> u8 {
        REPLY_FLAG | (self as u8 + 1)
    }

    /// Width of the length field that follows this command on the wire.
    pub const fn length_width(self) -> usize {
        match self {
            Command::Data | Command::DataFail | Command::DataPc | Command::DataFailPc => 1,
            Command::DebugAck => 0,
            _ => 2,
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Ping),
            0x02 => Ok(Self::DebugLine),
            0x03 => Ok(Self::DebugChar),
            0x04 => Ok(Self::DebugInfo),
            0x05 => Ok(Self::DebugLog),
            0x08 => Ok(Self::DebugAck),
            0x0A => Ok(Self::Data),
            0x0B => Ok(Self::DataFail),
            0x0C => Ok(Self::Stream),
            0x0D => Ok(Self::StreamFail),
            0x41 => Ok(Self::ProgStop),
            0x42 => Ok(Self::ProgStart),
            0x4A => Ok(Self::DataPc),
            0x4B => Ok(Self::DataFailPc),
            0x4C => Ok(Self::StreamPc),
            0x4D => Ok(Self::StreamFailPc),
            0x4F => Ok(Self::Reset),
            _ => Err(()),
        }
    }
}

/// Frame class of adapter traffic: selects command pair and length width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameClass {
    /// Short frames, 1-byte length
    Data,
    /// Long frames, 2-byte length
    Stream,
}

impl FrameClass {
    /// Command the device sends for this class.
    pub const fn outbound(self) -> Command {
        match self {
            FrameClass::Data => Command::Data,
            FrameClass::Stream => Command::Stream,
        }
    }

    /// Command the device expects from the host for this class.
    pub const fn inbound(self) -> Command {
        match self {
            FrameClass::Data => Command::DataPc,
            FrameClass::Stream => Command::StreamPc,
        }
    }

    pub const fn length_width(self) -> usize {
        match self {
            FrameClass::Data => 1,
            FrameClass::Stream => 2,
        }
    }

    /// Largest payload the length field can describe.
    pub const fn max_payload(self) -> usize {
        match self {
            FrameClass::Data => 0xFF,
            FrameClass::Stream => 0xFFFF,
        }
    }
}

/// Command byte plus big-endian length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameHeader {
    pub command: u8,
    pub length: u32,
    /// Length field width, at most [`MAX_LENGTH_WIDTH`]
    pub width: usize,
}

impl FrameHeader {
    /// Header with the width clamped to [`MAX_LENGTH_WIDTH`].
    ///
    /// Lengths wider than the field are truncated to its low bytes.
    pub fn new(command: u8, length: u32, width: usize) -> Self {
        Self {
            command,
            length,
            width: width.min(MAX_LENGTH_WIDTH),
        }
    }

    /// Encoded size: command byte plus length field.
    #[inline]
    pub fn size(&self) -> usize {
        1 + self.width
    }

    pub fn encode(&self) -> Vec<u8, { 1 + MAX_LENGTH_WIDTH }> {
        let mut out = Vec::new();
        // capacity is 1 + MAX_LENGTH_WIDTH and width is clamped to that
        let _ = out.push(self.command);
        for i in (0..self.width).rev() {
            let _ = out.push((self.length >> (8 * i)) as u8);
        }
        out
    }

    /// Parse a header of the given width from `bytes`.
    pub fn decode(bytes: &[u8], width: usize) -> Option<Self> {
        let width = width.min(MAX_LENGTH_WIDTH);
        let (&command, rest) = bytes.split_first()?;
        let field = rest.get(..width)?;
        let length = field
            .iter()
            .fold(0u32, |acc, &byte| (acc << 8) | byte as u32);
        Some(Self {
            command,
            length,
            width,
        })
    }
}

/// Second-level ids carried in debug command envelopes from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DebugCommand {
    SendEeprom = 1,
    UpdateEeprom = 2,
    UpdateRelay = 3,
    UpdateRelayToken = 4,
    UpdateDns1 = 5,
    UpdateDns2 = 6,
    UpdateP2pPort = 7,
    UpdateDevice = 8,
    SendNameInfo = 9,
    SendOtherInfo = 10,
    Stop = 11,
    Start = 12,
    Status = 13,
    SendNumberOwn = 14,
    SendNumberOther = 15,
    SendRelayToken = 16,
    SetSaveStyle = 17,
    ForceSave = 18,
}

impl DebugCommand {
    /// Whether a successful run changes persisted configuration.
    pub const fn mutates_config(self) -> bool {
        matches!(
            self,
            DebugCommand::UpdateEeprom
                | DebugCommand::UpdateRelay
                | DebugCommand::UpdateRelayToken
                | DebugCommand::UpdateDns1
                | DebugCommand::UpdateDns2
                | DebugCommand::UpdateP2pPort
                | DebugCommand::UpdateDevice
                | DebugCommand::ForceSave
        )
    }

    /// Whether the device confirms this command with a debug ack.
    pub const fn is_acked(self) -> bool {
        self.mutates_config()
            || matches!(
                self,
                DebugCommand::Stop | DebugCommand::Start | DebugCommand::SetSaveStyle
            )
    }
}

impl TryFrom<u8> for DebugCommand {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::SendEeprom),
            2 => Ok(Self::UpdateEeprom),
            3 => Ok(Self::UpdateRelay),
            4 => Ok(Self::UpdateRelayToken),
            5 => Ok(Self::UpdateDns1),
            6 => Ok(Self::UpdateDns2),
            7 => Ok(Self::UpdateP2pPort),
            8 => Ok(Self::UpdateDevice),
            9 => Ok(Self::SendNameInfo),
            10 => Ok(Self::SendOtherInfo),
            11 => Ok(Self::Stop),
            12 => Ok(Self::Start),
            13 => Ok(Self::Status),
            14 => Ok(Self::SendNumberOwn),
            15 => Ok(Self::SendNumberOther),
            16 => Ok(Self::SendRelayToken),
            17 => Ok(Self::SetSaveStyle),
            18 => Ok(Self::ForceSave),
            _ => Err(()),
        }
    }
}

/// First payload byte of a `DebugInfo` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DebugInfo {
    Cfg = 1,
    Name = 2,
    Other = 3,
    Status = 4,
    Number = 5,
    NumberPeer = 6,
    RelayToken = 7,
}

impl TryFrom<u8> for DebugInfo {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Cfg),
            2 => Ok(Self::Name),
            3 => Ok(Self::Other),
            4 => Ok(Self::Status),
            5 => Ok(Self::Number),
            6 => Ok(Self::NumberPeer),
            7 => Ok(Self::RelayToken),
            _ => Err(()),
        }
    }
}

/// Socket relay RPC ids, first byte of each request and reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RelayCommand {
    Open = 0,
    Close = 1,
    Connect = 2,
    Listen = 3,
    Accept = 4,
    Send = 5,
    Recv = 6,
}

/// Status bits of a `DebugInfo::Status` reply.
pub mod status {
    pub const RUNNING: u8 = 1 << 0;
    pub const CAN_SAVE: u8 = 1 << 1;
    pub const AUTO_SAVE: u8 = 1 << 2;
}
