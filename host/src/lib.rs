//! # GBridge Host Library
//!
//! PC-side counterpart of the GBridge protocol spoken by the adapter
//! firmware:
//!
//! - **Decoder**: unwraps device packets and decodes frames, reply bytes
//!   and debug replies as they trickle in
//! - **Encoder**: builds `DATA_PC`/`STREAM_PC` frames, debug command
//!   envelopes and the USB packets that carry them
//!
//! ## Exchange
//!
//! ```text
//! ┌──────────────┐   packets (0x00 / 0xC0)   ┌──────────────────┐
//! │   PC (this)  │ ────────────────────────► │  adapter firmware │
//! │              │ ◄──────────────────────── │                   │
//! └──────────────┘   packets (0x00 / 0x80)   └──────────────────┘
//! ```

pub mod decoder;
pub mod encoder;
pub mod error;

pub use decoder::{AdapterStatus, DebugReply, DeviceChannel, DeviceFrame, DeviceStream, FrameDecoder};
pub use encoder::{data_packets, encode_frame, packet_for, DebugRequest, HostChannel};
pub use error::HostError;

/// Default relay server port.
pub const DEFAULT_RELAY_PORT: u16 = 31227;

/// Default DNS server port.
pub const DEFAULT_DNS_PORT: u16 = 53;

/// Default peer-to-peer port.
pub const DEFAULT_P2P_PORT: u16 = 1027;
