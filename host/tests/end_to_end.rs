//! Host encoder and decoder against the firmware core, wired through the
//! USB packet layer.

use gbridge_host::{
    data_packets, encode_frame, packet_for, AdapterStatus, DebugReply, DebugRequest,
    DeviceChannel, DeviceFrame, DeviceStream, HostChannel,
};
use gbridge_shared::debug::Identity;
use gbridge_shared::link::COUNT_MASK;
use gbridge_shared::mock::{MemFlash, MockAdapter, MockClock, MockPort};
use gbridge_shared::protocol::DebugCommand;
use gbridge_shared::{
    AdapterState, DebugContext, DebugInterpreter, DeviceUpkeep, FlashConfigStore, FlashGeometry,
    FrameClass, FrameTransport, IoBuffers, LoopPhase, RetryPolicy, SendOptions, TransportConfig,
    CONFIG_SIZE,
};

type Transport<'a> = FrameTransport<'a, MockClock, DeviceUpkeep<'a, MockPort>>;

/// Firmware main loop plus the PC-side decoders.
struct Bench<'a> {
    transport: Transport<'a>,
    interpreter: DebugInterpreter,
    state: AdapterState,
    control: MockAdapter,
    store: FlashConfigStore<MemFlash>,
    host: DeviceStream,
}

impl<'a> Bench<'a> {
    fn new(io: &'a IoBuffers) -> Self {
        let store = FlashConfigStore::init(
            MemFlash::new(FlashGeometry::DEFAULT.total_size()),
            FlashGeometry::DEFAULT,
        )
        .unwrap();
        Self {
            transport: FrameTransport::new(
                io,
                RetryPolicy::new(MockClock::stepping(100), TransportConfig::default()),
                DeviceUpkeep::new(MockPort::new(), io),
            ),
            interpreter: DebugInterpreter::new(Identity::default()),
            state: AdapterState::with_config(*store.config()),
            control: MockAdapter::default(),
            store,
            host: DeviceStream::new(),
        }
    }

    fn port(&mut self) -> &mut MockPort {
        self.transport.upkeep_mut().link_mut().endpoint_mut()
    }

    /// Deliver packets one at a time, running queued debug commands after
    /// each, the way the idle main loop does.
    fn deliver(&mut self, packets: &[Vec<u8>]) {
        for packet in packets {
            self.port().feed(packet);
            self.transport.run_upkeep();
            while let Some(envelope) = self.transport.upkeep_mut().take_debug_envelope() {
                let mut ctx = DebugContext {
                    state: &mut self.state,
                    control: &mut self.control,
                    store: Some(&mut self.store),
                    now_us: 0,
                };
                let _ = self.interpreter.handle(
                    LoopPhase::Idle,
                    &envelope,
                    &mut self.transport,
                    &mut ctx,
                );
            }
        }
    }

    /// Flush the device rings and decode everything the host received.
    fn collect(&mut self) -> Vec<(DeviceChannel, DeviceFrame)> {
        self.transport.run_upkeep();
        let sent = self.port().take_sent();
        let mut out = Vec::new();
        let mut rest = sent.as_slice();
        while let Some(&header) = rest.first() {
            let (packet, tail) = rest.split_at(1 + (header & COUNT_MASK) as usize);
            let (channel, frames) = self.host.push_packet(packet).unwrap();
            out.extend(frames.into_iter().map(|frame| (channel, frame)));
            rest = tail;
        }
        out
    }

    fn debug_replies(&mut self) -> Vec<DebugReply> {
        self.collect()
            .into_iter()
            .filter(|(channel, _)| *channel == DeviceChannel::Debug)
            .map(|(_, frame)| DebugReply::parse(&frame).unwrap())
            .collect()
    }
}

fn debug_packets(request: &DebugRequest) -> Vec<Vec<u8>> {
    request
        .encode()
        .iter()
        .map(|envelope| packet_for(envelope, HostChannel::Debug).unwrap())
        .collect()
}

#[test]
fn test_status_query() {
    let io = IoBuffers::new();
    let mut bench = Bench::new(&io);
    bench.deliver(&debug_packets(&DebugRequest::new(DebugCommand::Status, &[])));

    assert_eq!(
        bench.debug_replies(),
        [DebugReply::Status(AdapterStatus {
            running: false,
            can_save: true,
            automatic_save: true,
        })]
    );
}

#[test]
fn test_configuration_upload_and_dump() {
    let io = IoBuffers::new();
    let mut bench = Bench::new(&io);
    let config: Vec<u8> = (0..CONFIG_SIZE).map(|i| (i * 7) as u8).collect();

    let request = DebugRequest::update_eeprom(&config);
    bench.deliver(&debug_packets(&request));

    let replies = bench.debug_replies();
    assert_eq!(replies.len(), request.encode().len());
    assert!(replies
        .iter()
        .all(|reply| *reply == DebugReply::Ack(DebugCommand::UpdateEeprom as u8)));
    assert_eq!(&bench.state.config()[..], &config[..]);
    assert_eq!(&bench.store.config()[..], &config[..]);

    bench.deliver(&debug_packets(&DebugRequest::new(DebugCommand::SendEeprom, &[])));
    assert_eq!(bench.debug_replies(), [DebugReply::Config(config)]);
}

#[test]
fn test_corrupt_envelope_is_ignored() {
    let io = IoBuffers::new();
    let mut bench = Bench::new(&io);
    let mut envelope = DebugRequest::new(DebugCommand::Start, &[]).encode().remove(0);
    envelope[1] ^= 0xFF;
    bench.deliver(&[packet_for(&envelope, HostChannel::Debug).unwrap()]);

    assert!(bench.debug_replies().is_empty());
    assert!(!bench.control.running);
}

#[test]
fn test_data_frames_both_ways() {
    let io = IoBuffers::new();
    let mut bench = Bench::new(&io);

    let frame = encode_frame(b"hello", FrameClass::Data).unwrap();
    bench.port().feed(&data_packets(&frame).concat());
    let mut dest = [0u8; 0x80];
    let len = bench
        .transport
        .receive(&mut dest, 5, FrameClass::Data, 0x80, true)
        .unwrap();
    assert_eq!(&dest[..len], b"hello");

    let frames = bench.collect();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, DeviceChannel::Data);
    assert_eq!(frames[0].1.command, FrameClass::Data.inbound().ack());

    // the host's acknowledgment is already waiting when the device sends
    let ack = packet_for(&[FrameClass::Data.outbound().ack()], HostChannel::Data).unwrap();
    bench.port().feed(&ack);
    bench
        .transport
        .send(b"ok", FrameClass::Data, SendOptions::default())
        .unwrap();

    let frames = bench.collect();
    assert_eq!(frames.len(), 1);
    let (channel, frame) = &frames[0];
    assert_eq!(*channel, DeviceChannel::Data);
    assert_eq!(frame.payload, b"ok");
    assert_eq!(frame.reply_byte(), Some(FrameClass::Data.outbound().ack()));
}
