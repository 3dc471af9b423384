//! Device→host traffic: packet unwrapping, incremental frame decoding and
//! debug reply parsing.

use gbridge_shared::checksum::{self, CHECKSUM_SIZE};
use gbridge_shared::link::{flags, COUNT_MASK, FLAGS_MASK, MAX_PACKET_PAYLOAD};
use gbridge_shared::protocol::{status, Command, DebugInfo, FrameHeader, REPLY_FLAG};
use log::{debug, warn};

use crate::error::HostError;

/// Device→host packet channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChannel {
    /// GBridge frames and reply bytes from the out ring
    Data,
    /// Debug frames from the debug-out ring
    Debug,
}

/// Split a device packet into its channel and payload.
pub fn unpack(packet: &[u8]) -> Result<(DeviceChannel, &[u8]), HostError> {
    let (&header, rest) = packet.split_first().ok_or(HostError::MalformedPacket)?;
    let count = (header & COUNT_MASK) as usize;
    let payload = rest.get(..count).ok_or(HostError::MalformedPacket)?;
    match header & FLAGS_MASK {
        flags::DATA => Ok((DeviceChannel::Data, payload)),
        flags::DEBUG_OUT => Ok((DeviceChannel::Debug, payload)),
        other => Err(HostError::UnknownChannel(other)),
    }
}

/// One unit decoded from the device byte stream.
///
/// Bytes that do not open a known frame (reply bytes to the host's own
/// frames, mostly) come through as frames with an empty payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFrame {
    pub command: u8,
    pub payload: Vec<u8>,
    pub checksum_ok: bool,
}

impl DeviceFrame {
    /// Byte the host answers a `DATA`/`STREAM` frame with: the reply flag,
    /// plus one when the checksum failed. `None` for every other frame.
    pub fn reply_byte(&self) -> Option<u8> {
        match Command::try_from(self.command) {
            Ok(Command::Data) | Ok(Command::Stream) => {
                Some((self.command | REPLY_FLAG) + !self.checksum_ok as u8)
            }
            _ => None,
        }
    }
}

/// Length layout of a device command: field width and fixed payload size.
fn layout(command: u8) -> Option<(usize, Option<usize>)> {
    match Command::try_from(command).ok()? {
        Command::DebugAck => Some((0, Some(1))),
        Command::Data => Some((1, None)),
        Command::Stream
        | Command::DebugLine
        | Command::DebugChar
        | Command::DebugInfo
        | Command::DebugLog => Some((2, None)),
        _ => None,
    }
}

/// Incremental decoder of the device byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Feed bytes; returns every frame they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<DeviceFrame> {
        self.pending.extend_from_slice(bytes);
        let mut frames = Vec::new();
        let mut used = 0;
        while let Some((frame, len)) = Self::next_frame(&self.pending[used..]) {
            if !frame.checksum_ok {
                warn!("decoder: checksum mismatch on command {:#04x}", frame.command);
            }
            frames.push(frame);
            used += len;
        }
        self.pending.drain(..used);
        frames
    }

    /// Throw away a partial frame.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    fn next_frame(bytes: &[u8]) -> Option<(DeviceFrame, usize)> {
        let &command = bytes.first()?;
        let Some((width, fixed)) = layout(command) else {
            return Some((
                DeviceFrame {
                    command,
                    payload: Vec::new(),
                    checksum_ok: true,
                },
                1,
            ));
        };

        let header = FrameHeader::decode(bytes, width)?;
        let len = fixed.unwrap_or(header.length as usize);
        let start = header.size();
        let total = start + len + CHECKSUM_SIZE;
        if bytes.len() < total {
            return None;
        }
        let payload = &bytes[start..start + len];
        let checksum_ok = checksum::verify(payload, &bytes[start + len..total]);
        Some((
            DeviceFrame {
                command,
                payload: payload.to_vec(),
                checksum_ok,
            },
            total,
        ))
    }
}

/// Adapter status flags from a `STATUS` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterStatus {
    pub running: bool,
    pub can_save: bool,
    pub automatic_save: bool,
}

/// A decoded debug-channel reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugReply {
    /// Debug command confirmed
    Ack(u8),
    Config(Vec<u8>),
    Name(String),
    Other(String),
    Status(AdapterStatus),
    Number(String),
    PeerNumber(String),
    RelayToken(Option<[u8; 16]>),
}

impl DebugReply {
    pub fn parse(frame: &DeviceFrame) -> Result<Self, HostError> {
        if !frame.checksum_ok {
            return Err(HostError::BadChecksum);
        }
        let (&kind, rest) = frame
            .payload
            .split_first()
            .ok_or_else(|| HostError::MalformedReply("empty payload".into()))?;

        match Command::try_from(frame.command) {
            Ok(Command::DebugAck) => return Ok(DebugReply::Ack(kind)),
            Ok(Command::DebugInfo) => {}
            _ => return Err(HostError::NotDebugReply(frame.command)),
        }

        let info = DebugInfo::try_from(kind)
            .map_err(|_| HostError::MalformedReply(format!("unknown info id {kind}")))?;
        let reply = match info {
            DebugInfo::Cfg => DebugReply::Config(rest.to_vec()),
            DebugInfo::Name => DebugReply::Name(String::from_utf8_lossy(rest).into_owned()),
            DebugInfo::Other => DebugReply::Other(String::from_utf8_lossy(rest).into_owned()),
            DebugInfo::Status => {
                let &bits = rest
                    .first()
                    .ok_or_else(|| HostError::MalformedReply("status without flags".into()))?;
                DebugReply::Status(AdapterStatus {
                    running: bits & status::RUNNING != 0,
                    can_save: bits & status::CAN_SAVE != 0,
                    automatic_save: bits & status::AUTO_SAVE != 0,
                })
            }
            DebugInfo::Number => DebugReply::Number(until_nul(rest)),
            DebugInfo::NumberPeer => DebugReply::PeerNumber(until_nul(rest)),
            DebugInfo::RelayToken => match rest {
                [0, ..] => DebugReply::RelayToken(None),
                [_, token @ ..] if token.len() == 16 => {
                    let mut value = [0u8; 16];
                    value.copy_from_slice(token);
                    DebugReply::RelayToken(Some(value))
                }
                _ => return Err(HostError::MalformedReply("bad relay token".into())),
            },
        };
        debug!("decoder: debug reply {:?}", reply);
        Ok(reply)
    }
}

fn until_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Decoders for both device channels, fed packet by packet.
#[derive(Debug, Default)]
pub struct DeviceStream {
    pub data: FrameDecoder,
    pub debug: FrameDecoder,
}

impl DeviceStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one packet; returns the channel it was on and the frames it
    /// completed.
    pub fn push_packet(
        &mut self,
        packet: &[u8],
    ) -> Result<(DeviceChannel, Vec<DeviceFrame>), HostError> {
        if packet.len() > 1 + MAX_PACKET_PAYLOAD {
            return Err(HostError::PacketTooLarge(packet.len() - 1));
        }
        let (channel, payload) = unpack(packet)?;
        let frames = match channel {
            DeviceChannel::Data => self.data.push(payload),
            DeviceChannel::Debug => self.debug.push(payload),
        };
        Ok((channel, frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack() {
        assert_eq!(
            unpack(&[0x82, 1, 2, 0xFF]),
            Ok((DeviceChannel::Debug, &[1u8, 2][..]))
        );
        assert_eq!(unpack(&[0x03, 1]), Err(HostError::MalformedPacket));
        assert_eq!(unpack(&[0xC0]), Err(HostError::UnknownChannel(0xC0)));
    }

    #[test]
    fn test_unpack_device_built_packets() {
        use gbridge_shared::buffer::ByteRing;
        use gbridge_shared::link::{PacketMux, PACKET_SIZE};
        use gbridge_shared::IoBuffers;

        let io = IoBuffers::new();
        let mux = PacketMux::new(&io);
        let mut packet = [0u8; PACKET_SIZE];

        let long = [0x33u8; 80];
        io.debug_out.write(&long);
        let len = mux.next_packet(&mut packet);
        assert_eq!(len, PACKET_SIZE);
        assert_eq!(
            unpack(&packet[..len]),
            Ok((DeviceChannel::Debug, &long[..MAX_PACKET_PAYLOAD]))
        );

        io.data_out.write(&[0x8A]);
        let len = mux.next_packet(&mut packet);
        assert_eq!(unpack(&packet[..len]), Ok((DeviceChannel::Data, &[0x8Au8][..])));
    }

    #[test]
    fn test_decode_across_pushes() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&[0x0A, 0x03, 1]).is_empty());
        assert_eq!(decoder.pending(), 3);

        let frames = decoder.push(&[2, 3, 0x00, 0x06, 0xCA]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload, [1, 2, 3]);
        assert!(frames[0].checksum_ok);
        assert_eq!(frames[0].reply_byte(), Some(0x8A));
        assert_eq!(frames[1].command, 0xCA);
        assert_eq!(frames[1].reply_byte(), None);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_bad_checksum_asks_for_resend() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&[0x0C, 0x00, 0x01, 0x05, 0x00, 0x06]);
        assert!(!frames[0].checksum_ok);
        assert_eq!(frames[0].reply_byte(), Some(0x8D));
    }

    #[test]
    fn test_debug_ack_has_fixed_payload() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&[0x08, 11, 0x00, 11]);
        assert_eq!(DebugReply::parse(&frames[0]), Ok(DebugReply::Ack(11)));
    }

    #[test]
    fn test_parse_info_replies() {
        let frame = |payload: &[u8]| DeviceFrame {
            command: Command::DebugInfo.code(),
            payload: payload.to_vec(),
            checksum_ok: true,
        };
        assert_eq!(
            DebugReply::parse(&frame(&[4, 0b101])),
            Ok(DebugReply::Status(AdapterStatus {
                running: true,
                can_save: false,
                automatic_save: true,
            }))
        );
        assert_eq!(
            DebugReply::parse(&frame(b"\x05090\0")),
            Ok(DebugReply::Number("090".into()))
        );
        assert_eq!(
            DebugReply::parse(&frame(&[7, 0])),
            Ok(DebugReply::RelayToken(None))
        );
        assert!(DebugReply::parse(&frame(&[7, 1, 2])).is_err());
        assert!(DebugReply::parse(&frame(&[9])).is_err());

        let mut line = frame(&[1]);
        line.command = Command::DebugLine.code();
        assert_eq!(
            DebugReply::parse(&line),
            Err(HostError::NotDebugReply(0x02))
        );
    }
}
