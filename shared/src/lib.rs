//! # GBridge Shared Library
//!
//! Firmware core of a Game Boy Mobile Adapter bridged to a PC over USB:
//!
//! - **Ring Buffers**: fixed single-producer/single-consumer byte queues
//!   between the USB endpoint and the protocol engine
//! - **Frame Transport**: checksummed GBridge frames with timeouts, retries
//!   and acknowledgment handling
//! - **Debug Commands**: configuration dumps and edits from the host tool
//! - **Flash Store**: wear-leveled, mirrored configuration records
//!
//! ## Architecture
//!
//! ```text
//!            USB packets                         Game Boy side
//! PC ◄──────────────────► HostLink ◄──► IoBuffers ◄──► FrameTransport ◄──► adapter library
//!                            │                              │                    │
//!                     debug envelopes             RelayClient (sockets)   AdapterState
//!                            │                                                   │
//!                            └──────────► DebugInterpreter ──────────► FlashConfigStore
//! ```
//!
//! ## Cooperative Scheduling
//!
//! There are no threads. Every blocking wait in the transport runs the
//! injected [`Upkeep`] hook, which is where the host link is pumped and
//! pending configuration saves are polled.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(any(test, feature = "std"))]
extern crate std;

// must come first so the logging macros are visible in every module
#[macro_use]
mod fmt;

pub mod adapter;
pub mod addr;
pub mod buffer;
pub mod checksum;
pub mod debug;
pub mod flash;
pub mod link;
pub mod protocol;
pub mod relay;
pub mod retry;
pub mod traits;
pub mod transport;
pub mod upkeep;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export main types for convenience
pub use adapter::{AdapterState, NumberKind, CONFIG_SIZE};
pub use addr::MobileAddr;
pub use buffer::{ByteRing, IoBuffers, RingBuffer};
pub use debug::{DebugContext, DebugError, DebugInterpreter, LoopPhase};
pub use flash::{FlashConfigStore, FlashGeometry, StoreError};
pub use link::{HostLink, PacketMux};
pub use protocol::{Command, DebugCommand, FrameClass};
pub use relay::{RelayClient, RelayError};
pub use retry::{RetryPolicy, TimeResolution, TransportConfig};
pub use traits::{AdapterControl, Clock, NoUpkeep, Upkeep};
pub use transport::{FrameTransport, SendOptions, TransportError};
pub use upkeep::DeviceUpkeep;

/// Library version for protocol compatibility checks
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
