//! Host→device traffic: GBridge frames, debug command envelopes and USB
//! packets.

use gbridge_shared::checksum;
use gbridge_shared::link::{flags, MAX_PACKET_PAYLOAD};
use gbridge_shared::protocol::{DebugCommand, FrameClass, FrameHeader};

use crate::error::HostError;

/// Argument bytes carried by one debug envelope.
pub const MAX_DEBUG_ARGS: usize = MAX_PACKET_PAYLOAD - 1 - checksum::CHECKSUM_SIZE;

/// Configuration bytes per `UPDATE_EEPROM` envelope, after the offset.
pub const EEPROM_CHUNK: usize = MAX_DEBUG_ARGS - 2;

/// Build a `DATA_PC` or `STREAM_PC` frame.
pub fn encode_frame(payload: &[u8], class: FrameClass) -> Result<Vec<u8>, HostError> {
    if payload.len() > class.max_payload() {
        return Err(HostError::PayloadTooLarge {
            len: payload.len(),
            class,
        });
    }
    let header = FrameHeader::new(
        class.inbound().code(),
        payload.len() as u32,
        class.length_width(),
    );
    let mut frame = header.encode().to_vec();
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&checksum::seal(payload));
    Ok(frame)
}

/// One debug command with its arguments, ready to be split into envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugRequest {
    pub command: DebugCommand,
    pub args: Vec<u8>,
}

impl DebugRequest {
    pub fn new(command: DebugCommand, args: &[u8]) -> Self {
        Self {
            command,
            args: args.to_vec(),
        }
    }

    /// Configuration dump written from offset 0, pre-split into
    /// `[offset BE, bytes..]` pieces so each envelope is self-contained.
    pub fn update_eeprom(config: &[u8]) -> Self {
        let mut args = Vec::with_capacity(config.len() + config.len() / EEPROM_CHUNK * 2 + 2);
        for (i, chunk) in config.chunks(EEPROM_CHUNK).enumerate() {
            args.extend_from_slice(&((i * EEPROM_CHUNK) as u16).to_be_bytes());
            args.extend_from_slice(chunk);
        }
        Self::new(DebugCommand::UpdateEeprom, &args)
    }

    /// Whether the device confirms this command with a `DEBUG_ACK` per
    /// envelope.
    pub fn wants_ack(&self) -> bool {
        self.command.is_acked()
    }

    /// Envelopes `[command, args.., checksum BE]`, at most
    /// [`MAX_DEBUG_ARGS`] argument bytes each. A command without arguments
    /// still produces one envelope.
    pub fn encode(&self) -> Vec<Vec<u8>> {
        let id = self.command as u8;
        let mut chunks: Vec<&[u8]> = self.args.chunks(MAX_DEBUG_ARGS).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        chunks
            .into_iter()
            .map(|chunk| {
                let mut envelope = Vec::with_capacity(1 + chunk.len() + 2);
                envelope.push(id);
                envelope.extend_from_slice(chunk);
                let sum = checksum::seal(&envelope);
                envelope.extend_from_slice(&sum);
                envelope
            })
            .collect()
    }
}

/// Host→device packet channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostChannel {
    /// GBridge bytes for the device's in ring
    Data,
    /// One debug command envelope
    Debug,
}

/// Wrap `bytes` into one USB packet.
pub fn packet_for(bytes: &[u8], channel: HostChannel) -> Result<Vec<u8>, HostError> {
    if bytes.len() > MAX_PACKET_PAYLOAD {
        return Err(HostError::PacketTooLarge(bytes.len()));
    }
    let flag = match channel {
        HostChannel::Data => flags::DATA,
        HostChannel::Debug => flags::DEBUG_COMMAND,
    };
    let mut packet = Vec::with_capacity(1 + bytes.len());
    packet.push(flag | bytes.len() as u8);
    packet.extend_from_slice(bytes);
    Ok(packet)
}

/// Split a data stream into as many packets as it needs.
pub fn data_packets(bytes: &[u8]) -> Vec<Vec<u8>> {
    bytes
        .chunks(MAX_PACKET_PAYLOAD)
        .map(|chunk| {
            let mut packet = Vec::with_capacity(1 + chunk.len());
            packet.push(flags::DATA | chunk.len() as u8);
            packet.extend_from_slice(chunk);
            packet
        })
        .collect()
}
