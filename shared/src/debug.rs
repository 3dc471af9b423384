//! # Debug Command Interpreter
//!
//! Handles the small command set the host tool sends over the debug
//! channel: configuration dumps and edits, adapter start/stop, identity and
//! status queries.
//!
//! ## Envelope
//!
//! ```text
//! ┌────────────┬──────────────────┬──────────────┐
//! │ command id │   arguments      │ checksum BE  │
//! │   1 byte   │  0..=60 bytes    │   2 bytes    │
//! └────────────┴──────────────────┴──────────────┘
//! ```
//!
//! The checksum covers the id and the arguments. Envelopes that are too
//! short, fail the checksum, carry unknown ids or bad arguments are dropped
//! without a reply; the host tool resends on its own.
//!
//! Replies go out as `DebugInfo` frames on the debug ring. Commands that
//! change settings are confirmed with a `DebugAck` frame carrying the
//! command id, after the configuration has been committed.

use embedded_storage::nor_flash::NorFlash;

use crate::adapter::{AdapterState, NumberKind, CONFIG_SIZE, MAX_NUMBER_SIZE};
use crate::addr::MobileAddr;
use crate::checksum::{self, CHECKSUM_SIZE};
use crate::flash::FlashConfigStore;
use crate::protocol::{status, Command, DebugCommand, DebugInfo};
use crate::traits::{AdapterControl, AdapterDevice, Clock, DnsSlot, Upkeep};
use crate::transport::{FrameTransport, TransportError};

/// Largest envelope accepted, checksum included.
pub const MAX_DEBUG_COMMAND_SIZE: usize = 63;

/// Implementation name reported to the host tool.
pub const IMPLEMENTATION_NAME: &str = "PICO-USB-SM";

/// Firmware version reported to the host tool.
pub const IMPLEMENTATION_VERSION: &str = "1.0.0";

/// Errors that caused an envelope to be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DebugError {
    /// Not longer than its checksum
    TooShort,
    BadChecksum,
    /// The adapter protocol loop is running
    Reentrant,
    UnknownCommand,
    /// Arguments missing, oversized or out of range
    Malformed,
    /// The reply could not be queued
    Reply(TransportError),
}

impl From<TransportError> for DebugError {
    fn from(e: TransportError) -> Self {
        DebugError::Reply(e)
    }
}

/// Where the caller is relative to the adapter protocol loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoopPhase {
    Idle,
    InMobileLoop,
}

/// Identity strings returned by the name and info queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub name: &'static str,
    pub version: &'static str,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            name: IMPLEMENTATION_NAME,
            version: IMPLEMENTATION_VERSION,
        }
    }
}

/// Everything a debug command may touch.
pub struct DebugContext<'c, A: AdapterControl, F: NorFlash> {
    pub state: &'c mut AdapterState,
    pub control: &'c mut A,
    /// `None` on builds without persistent storage
    pub store: Option<&'c mut FlashConfigStore<F>>,
    pub now_us: u64,
}

pub struct DebugInterpreter {
    identity: Identity,
}

impl DebugInterpreter {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Validate and run one envelope.
    pub fn handle<C, U, A, F>(
        &mut self,
        phase: LoopPhase,
        envelope: &[u8],
        transport: &mut FrameTransport<'_, C, U>,
        ctx: &mut DebugContext<'_, A, F>,
    ) -> Result<(), DebugError>
    where
        C: Clock,
        U: Upkeep,
        A: AdapterControl,
        F: NorFlash,
    {
        let result = self.dispatch(phase, envelope, transport, ctx);
        match result {
            Err(DebugError::Reentrant) => warn!("debug: command refused inside the adapter loop"),
            Err(e) => debug!("debug: dropped command ({:?})", e),
            Ok(()) => {}
        }
        result
    }

    fn dispatch<C, U, A, F>(
        &mut self,
        phase: LoopPhase,
        envelope: &[u8],
        transport: &mut FrameTransport<'_, C, U>,
        ctx: &mut DebugContext<'_, A, F>,
    ) -> Result<(), DebugError>
    where
        C: Clock,
        U: Upkeep,
        A: AdapterControl,
        F: NorFlash,
    {
        if envelope.len() <= CHECKSUM_SIZE {
            return Err(DebugError::TooShort);
        }
        if envelope.len() > MAX_DEBUG_COMMAND_SIZE {
            return Err(DebugError::Malformed);
        }
        let (body, sum) = envelope.split_at(envelope.len() - CHECKSUM_SIZE);
        if !checksum::verify(body, sum) {
            return Err(DebugError::BadChecksum);
        }
        if phase == LoopPhase::InMobileLoop {
            return Err(DebugError::Reentrant);
        }

        let command = DebugCommand::try_from(body[0]).map_err(|_| DebugError::UnknownCommand)?;
        let args = &body[1..];
        trace!("debug: command {:?}", command);

        let mut commit = true;
        match command {
            DebugCommand::SendEeprom => {
                let mut reply = [0u8; 1 + CONFIG_SIZE];
                reply[0] = DebugInfo::Cfg as u8;
                reply[1..].copy_from_slice(ctx.state.config());
                transport.debug_send(&reply, Command::DebugInfo)?;
            }
            DebugCommand::UpdateEeprom => {
                let (offset, data) = match args {
                    [hi, lo, data @ ..] => (u16::from_be_bytes([*hi, *lo]) as usize, data),
                    _ => return Err(DebugError::Malformed),
                };
                ctx.state.write_clamped(offset, data, ctx.now_us);
                // a chunk matching the current blob leaves nothing to program
                commit = ctx.state.is_dirty();
            }
            DebugCommand::UpdateRelay => ctx.control.set_relay(address(args)?),
            DebugCommand::UpdateDns1 => ctx.control.set_dns(DnsSlot::Primary, address(args)?),
            DebugCommand::UpdateDns2 => ctx.control.set_dns(DnsSlot::Secondary, address(args)?),
            DebugCommand::UpdateRelayToken => {
                let token = match args {
                    [0, ..] => None,
                    [_, token @ ..] if token.len() >= 16 => {
                        let mut value = [0u8; 16];
                        value.copy_from_slice(&token[..16]);
                        Some(value)
                    }
                    _ => return Err(DebugError::Malformed),
                };
                ctx.control.set_relay_token(token);
            }
            DebugCommand::UpdateP2pPort => match args {
                [hi, lo, ..] => ctx.control.set_p2p_port(u16::from_be_bytes([*hi, *lo])),
                _ => return Err(DebugError::Malformed),
            },
            DebugCommand::UpdateDevice => {
                let &raw = args.first().ok_or(DebugError::Malformed)?;
                let device =
                    AdapterDevice::try_from(raw & 0x7F).map_err(|_| DebugError::Malformed)?;
                ctx.control.set_device(device, raw & 0x80 != 0);
            }
            DebugCommand::SendNameInfo => {
                self.send_text(transport, DebugInfo::Name, self.identity.name.as_bytes())?
            }
            DebugCommand::SendOtherInfo => {
                self.send_text(transport, DebugInfo::Other, self.identity.version.as_bytes())?
            }
            DebugCommand::Stop => ctx.control.stop(),
            DebugCommand::Start => ctx.control.start(),
            DebugCommand::Status => {
                let mut bits = 0;
                if ctx.control.is_running() {
                    bits |= status::RUNNING;
                }
                if ctx.store.is_some() {
                    bits |= status::CAN_SAVE;
                }
                if ctx.state.automatic_save() {
                    bits |= status::AUTO_SAVE;
                }
                transport.debug_send(&[DebugInfo::Status as u8, bits], Command::DebugInfo)?;
            }
            DebugCommand::SendNumberOwn => {
                send_number(transport, DebugInfo::Number, ctx.state.number(NumberKind::User))?
            }
            DebugCommand::SendNumberOther => send_number(
                transport,
                DebugInfo::NumberPeer,
                ctx.state.number(NumberKind::Peer),
            )?,
            DebugCommand::SendRelayToken => {
                let mut reply = [0u8; 2 + 16];
                reply[0] = DebugInfo::RelayToken as u8;
                let len = match ctx.control.relay_token() {
                    Some(token) => {
                        reply[1] = 1;
                        reply[2..].copy_from_slice(&token);
                        reply.len()
                    }
                    None => 2,
                };
                transport.debug_send(&reply[..len], Command::DebugInfo)?;
            }
            DebugCommand::SetSaveStyle => {
                let &style = args.first().ok_or(DebugError::Malformed)?;
                ctx.state.set_automatic_save(style != 0);
            }
            DebugCommand::ForceSave => ctx.state.request_save(),
        }

        if command.mutates_config() {
            ctx.control.flush_config(ctx.state, ctx.now_us);
            if let Some(store) = ctx.store.as_deref_mut().filter(|_| commit) {
                if let Err(e) = ctx.state.commit(store) {
                    warn!("debug: configuration commit failed ({:?})", e);
                }
            }
        }
        if command.is_acked() {
            transport.debug_send_ack(command as u8)?;
        }
        Ok(())
    }

    fn send_text<C: Clock, U: Upkeep>(
        &self,
        transport: &mut FrameTransport<'_, C, U>,
        info: DebugInfo,
        text: &[u8],
    ) -> Result<(), DebugError> {
        let mut reply = [0u8; 1 + MAX_TEXT_SIZE];
        let len = text.len().min(MAX_TEXT_SIZE);
        reply[0] = info as u8;
        reply[1..1 + len].copy_from_slice(&text[..len]);
        transport.debug_send(&reply[..1 + len], Command::DebugInfo)?;
        Ok(())
    }
}

impl Default for DebugInterpreter {
    fn default() -> Self {
        Self::new(Identity::default())
    }
}

/// Longest identity string sent back.
const MAX_TEXT_SIZE: usize = 0x40;

fn address(args: &[u8]) -> Result<MobileAddr, DebugError> {
    MobileAddr::decode(args)
        .map(|(addr, _)| addr)
        .ok_or(DebugError::Malformed)
}

/// Phone number reply, NUL-terminated.
fn send_number<C: Clock, U: Upkeep>(
    transport: &mut FrameTransport<'_, C, U>,
    info: DebugInfo,
    number: &str,
) -> Result<(), DebugError> {
    let mut reply = [0u8; 1 + MAX_NUMBER_SIZE + 1];
    let bytes = number.as_bytes();
    reply[0] = info as u8;
    reply[1..1 + bytes.len()].copy_from_slice(bytes);
    transport.debug_send(&reply[..bytes.len() + 2], Command::DebugInfo)?;
    Ok(())
}
