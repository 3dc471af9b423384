//! # GBridge Frame Transport
//!
//! Blocking-style frame exchange over the shared [`IoBuffers`], kept
//! cooperative by running the [`Upkeep`] hook on every wait iteration.
//!
//! ## Receive
//!
//! ```text
//! reset attempts
//! └─► attempt ─► header ─► command ok? ─► payload ─► checksum ─► verify
//!        ▲          │            │            │           │          │
//!        │       timeout      mismatch     timeout     timeout    ack / nack
//!        └──────────┴────────────┴────────────┴───────────┴──── retry ┘
//! ```
//!
//! The payload size is the declared length clamped to `limit`, raised to
//! the caller's `requested` size when that is larger, so a caller waiting
//! for a fixed-size reply always gets that many bytes.
//!
//! ## Send
//!
//! Header, payload and checksum are written in order against ring
//! backpressure. When an acknowledgment is expected, the single reply byte
//! decides between success and resend; unrelated bytes are skipped and
//! re-arm the timer.
//!
//! Every failure of the data channel leaves both data rings reset so the
//! next frame starts aligned.

use crate::buffer::{ByteRing, IoBuffers};
use crate::checksum::{self, CHECKSUM_SIZE};
use crate::protocol::{Command, FrameClass, FrameHeader, MAX_LENGTH_WIDTH};
use crate::retry::RetryPolicy;
use crate::traits::{Clock, Upkeep};

/// Errors returned by transport operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// The last attempt waited longer than the timeout without progress
    Timeout,
    /// Every attempt was spent on bad checksums, nacks or foreign commands
    RetriesExhausted,
    /// The debug ring cannot take the whole frame right now
    DebugBufferFull,
    /// Payload or destination does not fit the frame class
    InvalidSize,
}

/// Behaviour of a single send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SendOptions {
    /// Run the upkeep hook while waiting
    pub run_upkeep: bool,
    /// Append the payload checksum
    pub with_checksum: bool,
    /// Wait for the peer's one-byte reply
    pub expect_ack: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            run_upkeep: true,
            with_checksum: true,
            expect_ack: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Data,
    Debug,
}

/// GBridge protocol endpoint of the device.
///
/// Only one operation may be in flight at a time; the retry state and the
/// out ring are shared by every call.
pub struct FrameTransport<'a, C: Clock, U: Upkeep> {
    io: &'a IoBuffers,
    retry: RetryPolicy<C>,
    upkeep: U,
}

impl<'a, C: Clock, U: Upkeep> FrameTransport<'a, C, U> {
    pub fn new(io: &'a IoBuffers, retry: RetryPolicy<C>, upkeep: U) -> Self {
        Self { io, retry, upkeep }
    }

    pub fn io(&self) -> &'a IoBuffers {
        self.io
    }

    pub fn retry(&self) -> &RetryPolicy<C> {
        &self.retry
    }

    pub fn retry_mut(&mut self) -> &mut RetryPolicy<C> {
        &mut self.retry
    }

    pub fn upkeep_mut(&mut self) -> &mut U {
        &mut self.upkeep
    }

    /// Run the upkeep hook once outside of any wait.
    pub fn run_upkeep(&mut self) {
        self.upkeep.upkeep();
    }

    /// Receive one frame of `class` from the host into `dest`.
    ///
    /// `limit` caps the declared length and is itself capped to
    /// `dest.len()`. Returns the number of validated payload bytes.
    pub fn receive(
        &mut self,
        dest: &mut [u8],
        requested: usize,
        class: FrameClass,
        limit: usize,
        run_upkeep: bool,
    ) -> Result<usize, TransportError> {
        if requested > dest.len() {
            return Err(TransportError::InvalidSize);
        }
        let limit = limit.min(dest.len());
        let command = class.inbound();
        let width = class.length_width();
        let mut last = TransportError::RetriesExhausted;

        self.retry.reset_attempts();
        while self.retry.attempt_allowed() {
            let mut raw_header = [0u8; 1 + MAX_LENGTH_WIDTH];
            if let Err(e) = self.read_section(&mut raw_header[..1 + width], run_upkeep) {
                last = e;
                continue;
            }
            let header = match FrameHeader::decode(&raw_header, width) {
                Some(header) => header,
                None => continue,
            };
            if header.command != command.code() {
                trace!("receive: skipping command {:#x}", header.command);
                last = TransportError::RetriesExhausted;
                continue;
            }

            let size = (header.length as usize).min(limit).max(requested);
            if let Err(e) = self.read_section(&mut dest[..size], run_upkeep) {
                last = e;
                continue;
            }
            let mut sum = [0u8; CHECKSUM_SIZE];
            if let Err(e) = self.read_section(&mut sum, run_upkeep) {
                last = e;
                continue;
            }

            let valid = checksum::verify(&dest[..size], &sum);
            let reply = if valid { command.ack() } else { command.nack() };
            self.send_reply(reply, run_upkeep);
            if valid {
                return Ok(size);
            }
            debug!("receive: checksum mismatch, resend requested");
            last = TransportError::RetriesExhausted;
        }

        warn!(
            "receive: giving up after {} attempts",
            self.retry.attempts_used()
        );
        self.io.reset_data();
        Err(last)
    }

    /// Send one frame of `class` to the host on the data channel.
    pub fn send(
        &mut self,
        payload: &[u8],
        class: FrameClass,
        options: SendOptions,
    ) -> Result<(), TransportError> {
        if payload.len() > class.max_payload() {
            return Err(TransportError::InvalidSize);
        }
        self.send_frame(
            Channel::Data,
            class.outbound(),
            class.length_width(),
            payload,
            options,
        )
    }

    /// Queue a debug frame on the debug ring; fire and forget.
    ///
    /// Fails at once with [`TransportError::DebugBufferFull`] rather than
    /// writing part of the frame.
    pub fn debug_send(&mut self, payload: &[u8], command: Command) -> Result<(), TransportError> {
        if payload.len() > FrameClass::Stream.max_payload() {
            return Err(TransportError::InvalidSize);
        }
        self.send_frame(Channel::Debug, command, 2, payload, Self::DEBUG_OPTIONS)
    }

    /// Acknowledge debug command `command_id` on the debug ring.
    pub fn debug_send_ack(&mut self, command_id: u8) -> Result<(), TransportError> {
        self.send_frame(
            Channel::Debug,
            Command::DebugAck,
            Command::DebugAck.length_width(),
            &[command_id],
            Self::DEBUG_OPTIONS,
        )
    }

    const DEBUG_OPTIONS: SendOptions = SendOptions {
        run_upkeep: false,
        with_checksum: true,
        expect_ack: false,
    };

    fn send_frame(
        &mut self,
        channel: Channel,
        command: Command,
        width: usize,
        payload: &[u8],
        options: SendOptions,
    ) -> Result<(), TransportError> {
        let header = FrameHeader::new(command.code(), payload.len() as u32, width);
        let header_bytes = header.encode();
        let sum = checksum::seal(payload);
        let trailer = if options.with_checksum { &sum[..] } else { &sum[..0] };
        let total = header.size() + payload.len() + trailer.len();

        let io = self.io;
        let ring: &dyn ByteRing = match channel {
            Channel::Data => &io.data_out,
            Channel::Debug => &io.debug_out,
        };

        let mut last = TransportError::RetriesExhausted;
        self.retry.reset_attempts();
        while self.retry.attempt_allowed() {
            if channel == Channel::Debug && ring.available_for_write() < total {
                return Err(TransportError::DebugBufferFull);
            }

            let sections: [&[u8]; 3] = [header_bytes.as_slice(), payload, trailer];
            if let Err(e) = self.write_sections(ring, &sections, options.run_upkeep) {
                if channel == Channel::Data {
                    self.io.reset_data();
                }
                last = e;
                continue;
            }

            if !options.expect_ack {
                return Ok(());
            }
            match self.await_reply(command, options.run_upkeep) {
                Ok(()) => return Ok(()),
                Err(e) => last = e,
            }
        }

        warn!(
            "send: command {:#x} failed after {} attempts",
            command.code(),
            self.retry.attempts_used()
        );
        if channel == Channel::Data {
            self.io.reset_data();
        }
        Err(last)
    }

    /// Fill `buf` from the inbound ring, re-arming the timer on progress.
    fn read_section(&mut self, buf: &mut [u8], run_upkeep: bool) -> Result<(), TransportError> {
        let mut pos = 0;
        let mut progressed = true;
        while pos < buf.len() {
            if progressed {
                self.retry.arm_timeout();
            } else if self.retry.timeout_expired() {
                self.io.reset_data();
                return Err(TransportError::Timeout);
            }
            progressed = false;
            if run_upkeep {
                self.upkeep.upkeep();
            }
            while pos < buf.len() {
                match self.io.data_in.read_one() {
                    Some(byte) => {
                        buf[pos] = byte;
                        pos += 1;
                        progressed = true;
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }

    fn write_sections(
        &mut self,
        ring: &dyn ByteRing,
        sections: &[&[u8]],
        run_upkeep: bool,
    ) -> Result<(), TransportError> {
        self.retry.arm_timeout();
        for section in sections {
            let mut pos = 0;
            while pos < section.len() {
                let written = ring.write(&section[pos..]);
                if written > 0 {
                    pos += written;
                    self.retry.arm_timeout();
                } else if self.retry.timeout_expired() {
                    return Err(TransportError::Timeout);
                }
                if run_upkeep {
                    self.upkeep.upkeep();
                }
            }
        }
        Ok(())
    }

    /// Wait for the peer's reply to `command`.
    fn await_reply(&mut self, command: Command, run_upkeep: bool) -> Result<(), TransportError> {
        self.retry.arm_timeout();
        loop {
            if self.retry.timeout_expired() {
                self.io.reset_data();
                return Err(TransportError::Timeout);
            }
            if run_upkeep {
                self.upkeep.upkeep();
            }
            match self.io.data_in.read_one() {
                Some(byte) if byte == command.ack() => return Ok(()),
                Some(byte) if byte == command.nack() => {
                    debug!("send: peer asked for resend");
                    return Err(TransportError::RetriesExhausted);
                }
                Some(_) => self.retry.arm_timeout(),
                None => {}
            }
        }
    }

    /// Best-effort single byte reply on the data channel.
    fn send_reply(&mut self, reply: u8, run_upkeep: bool) {
        self.retry.arm_timeout();
        loop {
            if self.io.data_out.write(&[reply]) == 1 {
                return;
            }
            if self.retry.timeout_expired() {
                self.io.reset_data();
                return;
            }
            if run_upkeep {
                self.upkeep.upkeep();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockClock;
    use crate::retry::TransportConfig;
    use crate::traits::NoUpkeep;
    use core::cell::Cell;

    fn drain(ring: &dyn ByteRing) -> std::vec::Vec<u8> {
        core::iter::from_fn(|| ring.read_one()).collect()
    }

    fn host_frame(class: FrameClass, payload: &[u8]) -> std::vec::Vec<u8> {
        let header = FrameHeader::new(
            class.inbound().code(),
            payload.len() as u32,
            class.length_width(),
        );
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&checksum::seal(payload));
        frame
    }

    fn config(timeout_us: u64, max_retries: u8) -> TransportConfig {
        TransportConfig {
            timeout_us,
            max_retries,
        }
    }

    #[test]
    fn test_data_frame_wire_bytes() {
        let io = IoBuffers::new();
        let clock = MockClock::new();
        let mut transport =
            FrameTransport::new(&io, RetryPolicy::new(&clock, config(1_000, 4)), NoUpkeep);

        io.data_in.write(&[Command::Data.ack()]);
        transport
            .send(&[0x01, 0x02, 0x03], FrameClass::Data, SendOptions::default())
            .unwrap();
        assert_eq!(
            drain(&io.data_out),
            [0x0A, 0x03, 0x01, 0x02, 0x03, 0x00, 0x06]
        );
    }

    #[test]
    fn test_send_without_checksum() {
        let io = IoBuffers::new();
        let mut transport = FrameTransport::new(
            &io,
            RetryPolicy::new(MockClock::new(), config(1_000, 4)),
            NoUpkeep,
        );
        let options = SendOptions {
            with_checksum: false,
            expect_ack: false,
            ..SendOptions::default()
        };
        transport.send(&[0xAB], FrameClass::Stream, options).unwrap();
        assert_eq!(drain(&io.data_out), [0x0C, 0x00, 0x01, 0xAB]);
    }

    #[test]
    fn test_send_resends_after_nack() {
        let io = IoBuffers::new();
        let mut transport = FrameTransport::new(
            &io,
            RetryPolicy::new(MockClock::new(), config(1_000, 4)),
            NoUpkeep,
        );

        // an unrelated byte, a resend request, then the acknowledgment
        io.data_in.write(&[0x42, Command::Data.nack(), Command::Data.ack()]);
        transport
            .send(&[0x05], FrameClass::Data, SendOptions::default())
            .unwrap();
        let frame = [0x0A, 0x01, 0x05, 0x00, 0x05];
        let wire = drain(&io.data_out);
        assert_eq!(&wire[..5], &frame);
        assert_eq!(&wire[5..], &frame);
    }

    #[test]
    fn test_send_times_out_without_ack() {
        let io = IoBuffers::new();
        let clock = MockClock::stepping(100);
        let mut transport =
            FrameTransport::new(&io, RetryPolicy::new(&clock, config(1_000, 2)), NoUpkeep);

        let result = transport.send(&[1], FrameClass::Data, SendOptions::default());
        assert_eq!(result, Err(TransportError::Timeout));
        assert!(io.data_out.is_empty());
        assert!(io.data_in.is_empty());
    }

    #[test]
    fn test_send_rejects_oversized_payload() {
        let io = IoBuffers::new();
        let mut transport = FrameTransport::new(
            &io,
            RetryPolicy::new(MockClock::new(), config(1_000, 4)),
            NoUpkeep,
        );
        let payload = [0u8; 0x100];
        assert_eq!(
            transport.send(&payload, FrameClass::Data, SendOptions::default()),
            Err(TransportError::InvalidSize)
        );
    }

    #[test]
    fn test_loopback_round_trip() {
        let io = IoBuffers::new();
        let mut transport = FrameTransport::new(
            &io,
            RetryPolicy::new(MockClock::new(), config(1_000, 4)),
            NoUpkeep,
        );
        let options = SendOptions {
            expect_ack: false,
            ..SendOptions::default()
        };

        for size in [0usize, 1, 17, 0x80] {
            let payload: std::vec::Vec<u8> = (0..size).map(|i| (i * 7) as u8).collect();
            transport.send(&payload, FrameClass::Data, options).unwrap();

            // feed the frame back, relabelled as coming from the host
            let mut wire = drain(&io.data_out);
            wire[0] = FrameClass::Data.inbound().code();
            assert_eq!(io.enqueue_inbound_bytes(&wire), wire.len());

            let mut dest = [0u8; 0x80];
            let read = transport
                .receive(&mut dest, 0, FrameClass::Data, 0x80, false)
                .unwrap();
            assert_eq!(read, size);
            assert_eq!(&dest[..read], payload.as_slice());
            assert_eq!(drain(&io.data_out), [Command::DataPc.ack()]);
        }
    }

    #[test]
    fn test_receive_honors_larger_requested_size() {
        let io = IoBuffers::new();
        let mut transport = FrameTransport::new(
            &io,
            RetryPolicy::new(MockClock::new(), config(1_000, 4)),
            NoUpkeep,
        );
        // declared length 2, caller insists on 4 bytes
        io.enqueue_inbound_bytes(&[0x4A, 0x02, 1, 2, 3, 4]);
        io.enqueue_inbound_bytes(&checksum::seal(&[1, 2, 3, 4]));

        let mut dest = [0u8; 8];
        let read = transport
            .receive(&mut dest, 4, FrameClass::Data, 8, false)
            .unwrap();
        assert_eq!(read, 4);
        assert_eq!(&dest[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_receive_clamps_to_limit() {
        let io = IoBuffers::new();
        let mut transport = FrameTransport::new(
            &io,
            RetryPolicy::new(MockClock::new(), config(1_000, 4)),
            NoUpkeep,
        );
        io.enqueue_inbound_bytes(&[0x4A, 0x10, 9, 8]);
        io.enqueue_inbound_bytes(&checksum::seal(&[9, 8]));

        let mut dest = [0u8; 2];
        let read = transport
            .receive(&mut dest, 0, FrameClass::Data, 0x80, false)
            .unwrap();
        assert_eq!(read, 2);
        assert_eq!(dest, [9, 8]);

        assert_eq!(
            transport.receive(&mut dest, 3, FrameClass::Data, 0x80, false),
            Err(TransportError::InvalidSize)
        );
    }

    #[test]
    fn test_receive_skips_foreign_command() {
        let io = IoBuffers::new();
        let mut transport = FrameTransport::new(
            &io,
            RetryPolicy::new(MockClock::new(), config(1_000, 4)),
            NoUpkeep,
        );
        io.enqueue_inbound_bytes(&[0x4C, 0x00]);
        io.enqueue_inbound_bytes(&host_frame(FrameClass::Data, &[7]));

        let mut dest = [0u8; 4];
        assert_eq!(
            transport.receive(&mut dest, 0, FrameClass::Data, 4, false),
            Ok(1)
        );
        assert_eq!(dest[0], 7);
    }

    #[test]
    fn test_receive_stream_frame_via_upkeep() {
        let io = IoBuffers::new();
        let frame = host_frame(FrameClass::Stream, &[0x55; 300]);
        let offset = Cell::new(0usize);

        // the peer trickles the frame in as ring space frees up
        let peer = || {
            let pos = offset.get();
            if pos < frame.len() {
                let end = (pos + 16).min(frame.len());
                offset.set(pos + io.enqueue_inbound_bytes(&frame[pos..end]));
            }
        };
        let mut transport =
            FrameTransport::new(&io, RetryPolicy::new(MockClock::new(), config(1_000, 4)), peer);

        let mut dest = [0u8; 512];
        let read = transport
            .receive(&mut dest, 0, FrameClass::Stream, 512, true)
            .unwrap();
        assert_eq!(read, 300);
        assert!(dest[..300].iter().all(|&b| b == 0x55));
    }

    #[test]
    fn test_retry_exhaustion_on_corrupt_checksums() {
        let io = IoBuffers::new();
        let mut corrupt = host_frame(FrameClass::Data, &[1, 2, 3]);
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0x01;

        let fed = Cell::new(0u32);
        let peer = || {
            if io.data_in.is_empty() {
                io.enqueue_inbound_bytes(&corrupt);
                fed.set(fed.get() + 1);
            }
        };
        let mut transport =
            FrameTransport::new(&io, RetryPolicy::new(MockClock::new(), config(1_000, 3)), peer);

        let mut dest = [0u8; 8];
        let result = transport.receive(&mut dest, 0, FrameClass::Data, 8, true);
        assert_eq!(result, Err(TransportError::RetriesExhausted));
        assert_eq!(fed.get(), 3);
        assert!(io.data_in.is_empty());
        assert!(io.data_out.is_empty());
    }

    #[test]
    fn test_receive_times_out_after_duration() {
        let io = IoBuffers::new();
        let clock = MockClock::stepping(100);
        let mut transport =
            FrameTransport::new(&io, RetryPolicy::new(&clock, config(5_000, 1)), NoUpkeep);

        let start = clock.peek();
        let mut dest = [0u8; 4];
        let result = transport.receive(&mut dest, 0, FrameClass::Data, 4, false);
        assert_eq!(result, Err(TransportError::Timeout));
        let elapsed = clock.peek() - start;
        assert!(elapsed > 5_000, "elapsed {elapsed}");
        assert!(elapsed <= 5_500, "elapsed {elapsed}");
    }

    #[test]
    fn test_each_attempt_gets_full_timeout() {
        let io = IoBuffers::new();
        let clock = MockClock::stepping(100);
        let mut transport =
            FrameTransport::new(&io, RetryPolicy::new(&clock, config(5_000, 3)), NoUpkeep);

        let mut dest = [0u8; 4];
        let result = transport.receive(&mut dest, 0, FrameClass::Data, 4, false);
        assert_eq!(result, Err(TransportError::Timeout));
        assert!(clock.peek() > 15_000);
    }

    #[test]
    fn test_send_blocks_until_acked_with_zero_limits() {
        let io = IoBuffers::new();
        // a minute passes on every clock read
        let clock = MockClock::stepping(60_000_000);
        let frames = Cell::new(0u32);
        let answered = Cell::new(0u32);
        let idle = Cell::new(0u32);
        let peer = || {
            if io.data_out.unread_count() >= 5 {
                drain(&io.data_out);
                frames.set(frames.get() + 1);
                idle.set(0);
            }
            if frames.get() > answered.get() {
                idle.set(idle.get() + 1);
                if idle.get() > 20 {
                    answered.set(frames.get());
                    let reply = if frames.get() <= 10 {
                        Command::Data.nack()
                    } else {
                        Command::Data.ack()
                    };
                    io.data_in.write(&[reply]);
                }
            }
        };
        let mut transport =
            FrameTransport::new(&io, RetryPolicy::new(&clock, config(0, 0)), peer);

        let result = transport.send(&[0x05], FrameClass::Data, SendOptions::default());
        assert_eq!(result, Ok(()));
        assert_eq!(frames.get(), 11);
        assert!(clock.peek() >= 11 * 60_000_000);
    }

    #[test]
    fn test_receive_blocks_until_valid_with_zero_limits() {
        let io = IoBuffers::new();
        let clock = MockClock::stepping(60_000_000);
        let good = host_frame(FrameClass::Data, &[1, 2, 3]);
        let mut corrupt = good.clone();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0x01;

        let fed = Cell::new(0u32);
        let idle = Cell::new(0u32);
        let peer = || {
            if !io.data_in.is_empty() {
                return;
            }
            idle.set(idle.get() + 1);
            if idle.get() > 20 {
                idle.set(0);
                fed.set(fed.get() + 1);
                let frame = if fed.get() <= 6 { &corrupt } else { &good };
                io.enqueue_inbound_bytes(frame);
            }
        };
        let mut transport =
            FrameTransport::new(&io, RetryPolicy::new(&clock, config(0, 0)), peer);

        let mut dest = [0u8; 8];
        let result = transport.receive(&mut dest, 0, FrameClass::Data, 8, true);
        assert_eq!(result, Ok(3));
        assert_eq!(&dest[..3], &[1, 2, 3]);
        assert_eq!(fed.get(), 7);

        let mut replies = [Command::DataPc.nack(); 7];
        replies[6] = Command::DataPc.ack();
        assert_eq!(drain(&io.data_out), replies);
    }

    #[test]
    fn test_debug_send_refuses_partial_frame() {
        let io = IoBuffers::new();
        let mut transport = FrameTransport::new(
            &io,
            RetryPolicy::new(MockClock::new(), config(1_000, 4)),
            NoUpkeep,
        );
        let filler = [0u8; 0x800 - 1 - 6];
        assert_eq!(io.debug_out.write(&filler), filler.len());

        // header 3 + payload 2 + checksum 2 needs 7 bytes, 6 are free
        assert_eq!(
            transport.debug_send(&[1, 2], Command::DebugLine),
            Err(TransportError::DebugBufferFull)
        );
        assert_eq!(io.debug_out.unread_count(), filler.len());

        transport.debug_send(&[1], Command::DebugLine).unwrap();
        assert!(io.debug_out.is_full());
    }

    #[test]
    fn test_debug_frames() {
        let io = IoBuffers::new();
        let mut transport = FrameTransport::new(
            &io,
            RetryPolicy::new(MockClock::new(), config(1_000, 4)),
            NoUpkeep,
        );
        transport.debug_send(&[4, 0xAA], Command::DebugInfo).unwrap();
        transport.debug_send_ack(13).unwrap();
        assert_eq!(
            drain(&io.debug_out),
            [0x04, 0x00, 0x02, 0x04, 0xAA, 0x00, 0xAE, 0x08, 13, 0x00, 13]
        );
        assert!(io.data_out.is_empty());
    }
}
