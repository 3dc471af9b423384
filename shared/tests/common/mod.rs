//! Scripted PC peer for driving the device transport from its upkeep hook.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use gbridge_shared::buffer::ByteRing;
use gbridge_shared::checksum;
use gbridge_shared::protocol::{Command, FrameClass, FrameHeader, REPLY_FLAG};
use gbridge_shared::IoBuffers;

/// Frame the PC sends for `class`.
pub fn host_frame(class: FrameClass, payload: &[u8]) -> Vec<u8> {
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

/// A frame the device sent, as the peer saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenFrame {
    pub command: u8,
    pub payload: Vec<u8>,
}

/// PC stand-in polled from the device's upkeep hook.
///
/// Every complete `DATA`/`STREAM` frame from the device is acknowledged,
/// and after each acknowledgment the next scripted reply is queued. Bytes
/// that open no frame are the device's own acknowledgments and are kept in
/// [`replies_seen`](Self::replies_seen).
pub struct ScriptedPeer<'a> {
    io: &'a IoBuffers,
    pending: RefCell<Vec<u8>>,
    frames: RefCell<Vec<SeenFrame>>,
    acks: RefCell<Vec<u8>>,
    script: RefCell<VecDeque<Option<Vec<u8>>>>,
    nacks_left: Cell<usize>,
    /// Inbound bytes released per poll
    inbound: RefCell<VecDeque<u8>>,
    trickle: usize,
}

impl<'a> ScriptedPeer<'a> {
    pub fn new(io: &'a IoBuffers) -> Self {
        Self {
            io,
            pending: RefCell::new(Vec::new()),
            frames: RefCell::new(Vec::new()),
            acks: RefCell::new(Vec::new()),
            script: RefCell::new(VecDeque::new()),
            nacks_left: Cell::new(0),
            inbound: RefCell::new(VecDeque::new()),
            trickle: 16,
        }
    }

    /// Queue what the PC answers after acknowledging the next device frame;
    /// `None` answers with the acknowledgment only.
    pub fn then_reply(&self, reply: Option<Vec<u8>>) {
        self.script.borrow_mut().push_back(reply);
    }

    /// Ask for a resend of the next `count` device frames.
    pub fn nack_next(&self, count: usize) {
        self.nacks_left.set(count);
    }

    pub fn frames(&self) -> Vec<SeenFrame> {
        self.frames.borrow().clone()
    }

    pub fn replies_seen(&self) -> Vec<u8> {
        self.acks.borrow().clone()
    }

    /// One upkeep iteration.
    pub fn poll(&self) {
        let mut pending = self.pending.borrow_mut();
        while let Some(byte) = self.io.dequeue_outbound_byte() {
            pending.push(byte);
        }

        loop {
            let Some(&command) = pending.first() else { break };
            let width = match Command::try_from(command) {
                Ok(Command::Data) => 1,
                Ok(Command::Stream) => 2,
                _ => {
                    self.acks.borrow_mut().push(command);
                    pending.remove(0);
                    continue;
                }
            };
            let Some(header) = FrameHeader::decode(&pending, width) else { break };
            let total = header.size() + header.length as usize + checksum::CHECKSUM_SIZE;
            if pending.len() < total {
                break;
            }
            let payload = pending[header.size()..total - 2].to_vec();
            let ok = checksum::verify(&payload, &pending[total - 2..total]);
            pending.drain(..total);

            let mut inbound = self.inbound.borrow_mut();
            if !ok || self.nacks_left.get() > 0 {
                self.nacks_left.set(self.nacks_left.get().saturating_sub(1));
                inbound.push_back(REPLY_FLAG | (command + 1));
                continue;
            }
            inbound.push_back(REPLY_FLAG | command);
            self.frames.borrow_mut().push(SeenFrame { command, payload });
            if let Some(Some(reply)) = self.script.borrow_mut().pop_front() {
                inbound.extend(reply);
            }
        }
        drop(pending);

        let mut inbound = self.inbound.borrow_mut();
        let room = self.io.data_in.available_for_write().min(self.trickle);
        let chunk: Vec<u8> = (0..room).map_while(|_| inbound.pop_front()).collect();
        self.io.enqueue_inbound_bytes(&chunk);
    }
}
