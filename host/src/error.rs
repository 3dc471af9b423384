use gbridge_shared::FrameClass;
use thiserror::Error;

/// Errors raised while building or interpreting GBridge traffic on the PC.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("payload of {len} bytes does not fit a {class:?} frame")]
    PayloadTooLarge { len: usize, class: FrameClass },
    #[error("packet payload of {0} bytes exceeds 63")]
    PacketTooLarge(usize),
    #[error("malformed packet")]
    MalformedPacket,
    #[error("unexpected device channel flags {0:#04x}")]
    UnknownChannel(u8),
    #[error("frame {0:#04x} is not a debug reply")]
    NotDebugReply(u8),
    #[error("debug reply failed its checksum")]
    BadChecksum,
    #[error("malformed debug reply: {0}")]
    MalformedReply(String),
}
