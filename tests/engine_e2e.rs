//! End-to-end tests for the engine over a scripted USB transport.
//!
//! These tests verify the full activate -> READY -> BOOT -> WAIT -> RUN ->
//! stop lifecycle with synthetic device traffic: the mock transport feeds a
//! known inbound wire pattern and records every outbound transfer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use overbridge::{
    DeviceDesc, Dll, Engine, IoConfig, MidiEvent, RingBuffer, Status, TransferError,
    TransferLayout, UsbTransport, BLOCK_HEADER, FRAMES_PER_BLOCK, SAMPLE_RATE,
};

// =============================================================================
// Test doubles
// =============================================================================

/// A scripted stand-in for the USB stack.
///
/// Inbound audio transfers are filled with one constant big-endian sample;
/// outbound audio and MIDI transfers are recorded with their arrival time.
struct MockTransport {
    inbound_sample: i32,
    period: Duration,
    audio_out: Mutex<Vec<Vec<u8>>>,
    midi_out: Mutex<Vec<(Vec<u8>, Instant)>>,
    midi_in: Mutex<VecDeque<Vec<u8>>>,
}

impl MockTransport {
    fn new(inbound_sample: i32) -> Arc<Self> {
        Arc::new(Self {
            inbound_sample,
            period: Duration::from_millis(1),
            audio_out: Mutex::new(Vec::new()),
            midi_out: Mutex::new(Vec::new()),
            midi_in: Mutex::new(VecDeque::new()),
        })
    }
}

impl UsbTransport for MockTransport {
    fn read_audio(&self, buf: &mut [u8]) -> Result<usize, TransferError> {
        // One blocking period per transfer, like the real device clock.
        thread::sleep(self.period);
        let sample = self.inbound_sample.to_be_bytes();
        for raw in buf.chunks_exact_mut(4) {
            raw.copy_from_slice(&sample);
        }
        Ok(buf.len())
    }

    fn write_audio(&self, buf: &[u8]) -> Result<usize, TransferError> {
        let mut recorded = self.audio_out.lock().unwrap();
        if recorded.len() < 256 {
            recorded.push(buf.to_vec());
        }
        Ok(buf.len())
    }

    fn read_midi(&self, buf: &mut [u8]) -> Result<usize, TransferError> {
        match self.midi_in.lock().unwrap().pop_front() {
            Some(payload) => {
                buf[..payload.len()].copy_from_slice(&payload);
                Ok(payload.len())
            }
            None => Err(TransferError::Timeout),
        }
    }

    fn write_midi(&self, buf: &[u8]) -> Result<usize, TransferError> {
        self.midi_out
            .lock()
            .unwrap()
            .push((buf.to_vec(), Instant::now()));
        Ok(buf.len())
    }
}

/// Bounded SPSC byte ring.
struct TestRing {
    data: Mutex<VecDeque<u8>>,
    capacity: usize,
}

impl TestRing {
    fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(VecDeque::new()),
            capacity,
        })
    }

    fn write_f32s(&self, samples: &[f32]) {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        self.write(&bytes);
    }

    fn read_f32s(&self, count: usize) -> Vec<f32> {
        let mut bytes = vec![0u8; count * 4];
        self.read(&mut bytes);
        bytes
            .chunks_exact(4)
            .map(|raw| f32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]))
            .collect()
    }
}

impl RingBuffer for TestRing {
    fn read_space(&self) -> usize {
        self.data.lock().unwrap().len()
    }
    fn write_space(&self) -> usize {
        self.capacity - self.data.lock().unwrap().len()
    }
    fn read(&self, dst: &mut [u8]) {
        let mut q = self.data.lock().unwrap();
        for b in dst.iter_mut() {
            *b = q.pop_front().expect("read past read_space");
        }
    }
    fn discard(&self, len: usize) {
        let mut q = self.data.lock().unwrap();
        assert!(len <= q.len(), "discard past read_space");
        q.drain(..len);
    }
    fn write(&self, src: &[u8]) {
        let mut q = self.data.lock().unwrap();
        assert!(src.len() <= self.capacity - q.len(), "write past write_space");
        q.extend(src);
    }
}

struct RecordingDll {
    resets: Arc<Mutex<Vec<(u32, usize)>>>,
    ticks: Arc<AtomicUsize>,
}

impl Dll for RecordingDll {
    fn reset(&mut self, sample_rate: u32, frames_per_transfer: usize, _time: f64) {
        self.resets
            .lock()
            .unwrap()
            .push((sample_rate, frames_per_transfer));
    }

    fn tick(&mut self, frames: usize, _time: f64) {
        self.ticks.fetch_add(frames, Ordering::SeqCst);
    }
}

const NOMINAL_DESC: DeviceDesc = DeviceDesc {
    name: "mock",
    product_id: 0x0000,
    inputs: 2,
    outputs: 4,
};

fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn nominal_full_duplex_session() {
    let transport = MockTransport::new(i32::MAX / 2);
    let layout = TransferLayout::new(&NOMINAL_DESC, 8);
    let o2p_audio = TestRing::with_capacity(64 * layout.o2p_transfer_bytes);
    let p2o_audio = TestRing::with_capacity(256 * layout.p2o_transfer_bytes);

    let mut engine = Engine::with_transport(transport.clone(), NOMINAL_DESC, 8).unwrap();
    engine
        .activate(IoConfig::new().with_audio(o2p_audio.clone(), p2o_audio.clone()))
        .unwrap();
    assert_eq!(engine.status(), Status::Ready);

    engine.set_status(Status::Boot);
    assert!(wait_until(500, || engine.status() == Status::Wait));

    // Warm-up: transfers flow but nothing is published yet.
    thread::sleep(Duration::from_millis(10));
    assert_eq!(o2p_audio.read_space(), 0);

    engine.set_status(Status::Run);
    engine.set_p2o_audio_enabled(true);

    // The first full transfer is deliberately swallowed: it flips the
    // outbound sub-machine from waiting to running and aligns the ring.
    let samples_per_transfer = layout.frames_per_transfer * layout.inputs;
    p2o_audio.write_f32s(&vec![0.25f32; samples_per_transfer]);
    assert!(wait_until(500, || p2o_audio.read_space() == 0));

    // Now feed the signal proper.
    p2o_audio.write_f32s(&vec![0.25f32; samples_per_transfer * 63]);

    // Device-to-host: the constant be32(INT_MAX/2) pattern decodes to ~0.5f.
    assert!(wait_until(1000, || {
        o2p_audio.read_space() >= layout.o2p_transfer_bytes
    }));
    let decoded = o2p_audio.read_f32s(layout.frames_per_transfer * layout.outputs);
    for sample in decoded {
        assert!((sample - 0.5).abs() < 1e-6);
    }

    // Host-to-device: wait for a transfer carrying the signal, not silence.
    let expected = ((0.25f32 * i32::MAX as f32) as i32).to_be_bytes();
    assert!(wait_until(1000, || {
        transport.audio_out.lock().unwrap().iter().any(|transfer| {
            transfer
                .chunks_exact(layout.usb_out_block_len)
                .all(|block| block[32..36] == expected)
        })
    }));

    // Every recorded transfer satisfies the wire invariants.
    {
        let recorded = transport.audio_out.lock().unwrap();
        assert!(!recorded.is_empty());
        let mut counter = 0u16;
        for transfer in recorded.iter() {
            assert_eq!(transfer.len(), layout.usb_out_len);
            for block in transfer.chunks_exact(layout.usb_out_block_len) {
                assert_eq!(u16::from_be_bytes([block[0], block[1]]), BLOCK_HEADER);
                counter = counter.wrapping_add(FRAMES_PER_BLOCK as u16);
                assert_eq!(u16::from_be_bytes([block[2], block[3]]), counter);
            }
        }
    }

    let (current, max) = engine.p2o_latency();
    assert!(max >= current);
    assert!(max > 0);

    engine.stop();
    engine.wait();
    assert_eq!(engine.status(), Status::Stop);
}

#[test]
fn inbound_overflow_drops_transfers_without_corruption() {
    let transport = MockTransport::new(1000);
    let layout = TransferLayout::new(&NOMINAL_DESC, 8);
    // Room for exactly one decoded transfer; the host never drains it.
    let o2p_audio = TestRing::with_capacity(layout.o2p_transfer_bytes);
    let p2o_audio = TestRing::with_capacity(16 * layout.p2o_transfer_bytes);

    let mut engine = Engine::with_transport(transport, NOMINAL_DESC, 8).unwrap();
    engine
        .activate(IoConfig::new().with_audio(o2p_audio.clone(), p2o_audio))
        .unwrap();

    engine.set_status(Status::Boot);
    assert!(wait_until(500, || engine.status() == Status::Wait));
    engine.set_status(Status::Run);

    // Let several inbound transfers complete past the first.
    thread::sleep(Duration::from_millis(30));

    assert_eq!(o2p_audio.read_space(), layout.o2p_transfer_bytes);
    assert_eq!(engine.status(), Status::Run);

    engine.stop();
    engine.wait();
}

#[test]
fn midi_out_bursts_are_timestamp_paced() {
    let transport = MockTransport::new(0);
    let layout = TransferLayout::new(&NOMINAL_DESC, 8);
    let o2p_audio = TestRing::with_capacity(16 * layout.o2p_transfer_bytes);
    let p2o_audio = TestRing::with_capacity(16 * layout.p2o_transfer_bytes);
    let o2p_midi = TestRing::with_capacity(1 << 12);
    let p2o_midi = TestRing::with_capacity(1 << 12);

    // Three outbound events: two simultaneous, one 100 ms later.
    for (bytes, time) in [
        ([0x09, 0x90, 0x40, 0x7f], 0.0),
        ([0x09, 0x90, 0x43, 0x7f], 0.0),
        ([0x08, 0x80, 0x40, 0x00], 0.100),
    ] {
        p2o_midi.write(&MidiEvent { bytes, time }.encode());
    }

    let mut engine = Engine::with_transport(transport.clone(), NOMINAL_DESC, 8).unwrap();
    engine
        .activate(
            IoConfig::new()
                .with_audio(o2p_audio, p2o_audio)
                .with_midi(o2p_midi, p2o_midi.clone())
                .with_time(Arc::new(|| 0.0)),
        )
        .unwrap();

    assert!(wait_until(1000, || {
        transport.midi_out.lock().unwrap().len() >= 2
    }));

    engine.stop();
    engine.wait();

    let bursts = transport.midi_out.lock().unwrap();
    assert_eq!(bursts.len(), 2);

    let first = &bursts[0].0;
    assert_eq!(&first[..8], &[0x09, 0x90, 0x40, 0x7f, 0x09, 0x90, 0x43, 0x7f]);
    assert!(first[8..].iter().all(|b| *b == 0));

    let second = &bursts[1].0;
    assert_eq!(&second[..4], &[0x08, 0x80, 0x40, 0x00]);

    let gap = bursts[1].1.duration_since(bursts[0].1);
    assert!(gap >= Duration::from_millis(95), "gap was {gap:?}");
    assert!(p2o_midi.read_space() < MidiEvent::ENCODED_SIZE);
}

#[test]
fn inbound_midi_is_filtered_and_timestamped() {
    let transport = MockTransport::new(0);
    let layout = TransferLayout::new(&NOMINAL_DESC, 8);
    let o2p_audio = TestRing::with_capacity(64 * layout.o2p_transfer_bytes);
    let p2o_audio = TestRing::with_capacity(16 * layout.p2o_transfer_bytes);
    let o2p_midi = TestRing::with_capacity(1 << 12);
    let p2o_midi = TestRing::with_capacity(1 << 12);

    let mut engine = Engine::with_transport(transport.clone(), NOMINAL_DESC, 8).unwrap();
    engine
        .activate(
            IoConfig::new()
                .with_audio(o2p_audio, p2o_audio)
                .with_midi(o2p_midi.clone(), p2o_midi)
                .with_time(Arc::new(|| 7.25)),
        )
        .unwrap();

    engine.set_status(Status::Boot);
    assert!(wait_until(500, || engine.status() == Status::Wait));
    engine.set_status(Status::Run);

    // Inject the burst only once events are being published, so it cannot
    // land in the warm-up window where everything is dropped.
    transport.midi_in.lock().unwrap().push_back(vec![
        0x09, 0x90, 0x40, 0x7f, // note on: kept
        0x04, 0xf0, 0x7e, 0x00, // sysex: dropped
    ]);

    assert!(wait_until(500, || {
        o2p_midi.read_space() >= MidiEvent::ENCODED_SIZE
    }));

    engine.stop();
    engine.wait();

    let mut raw = [0u8; MidiEvent::ENCODED_SIZE];
    o2p_midi.read(&mut raw);
    let event = MidiEvent::decode(&raw);
    assert_eq!(event.bytes, [0x09, 0x90, 0x40, 0x7f]);
    assert_eq!(event.time, 7.25);
    assert!(o2p_midi.read_space() < MidiEvent::ENCODED_SIZE);
}

#[test]
fn dll_is_reset_per_cycle_and_ticked_per_transfer() {
    let transport = MockTransport::new(0);
    let layout = TransferLayout::new(&NOMINAL_DESC, 4);
    let o2p_audio = TestRing::with_capacity(64 * layout.o2p_transfer_bytes);
    let p2o_audio = TestRing::with_capacity(16 * layout.p2o_transfer_bytes);
    let o2p_midi = TestRing::with_capacity(1 << 12);
    let p2o_midi = TestRing::with_capacity(1 << 12);

    let resets = Arc::new(Mutex::new(Vec::new()));
    let ticks = Arc::new(AtomicUsize::new(0));
    let dll = RecordingDll {
        resets: resets.clone(),
        ticks: ticks.clone(),
    };

    let mut engine = Engine::with_transport(transport, NOMINAL_DESC, 4).unwrap();
    engine
        .activate_with_dll(
            IoConfig::new()
                .with_audio(o2p_audio, p2o_audio)
                .with_midi(o2p_midi, p2o_midi)
                .with_time(Arc::new(|| 0.0)),
            Box::new(dll),
        )
        .unwrap();

    engine.set_status(Status::Boot);
    assert!(wait_until(500, || engine.status() == Status::Wait));
    assert_eq!(
        resets.lock().unwrap().as_slice(),
        &[(SAMPLE_RATE, layout.frames_per_transfer)]
    );

    // Each completed inbound transfer contributes one frames_per_transfer tick.
    assert!(wait_until(500, || {
        ticks.load(Ordering::SeqCst) >= 3 * layout.frames_per_transfer
    }));
    assert_eq!(ticks.load(Ordering::SeqCst) % layout.frames_per_transfer, 0);

    engine.stop();
    engine.wait();
}

#[test]
fn stop_and_wait_shut_both_threads_down_promptly() {
    let transport = MockTransport::new(0);
    let layout = TransferLayout::new(&NOMINAL_DESC, 8);
    let o2p_audio = TestRing::with_capacity(64 * layout.o2p_transfer_bytes);
    let p2o_audio = TestRing::with_capacity(16 * layout.p2o_transfer_bytes);
    let o2p_midi = TestRing::with_capacity(1 << 12);
    let p2o_midi = TestRing::with_capacity(1 << 12);

    let mut engine = Engine::with_transport(transport, NOMINAL_DESC, 8).unwrap();
    engine
        .activate(
            IoConfig::new()
                .with_audio(o2p_audio, p2o_audio)
                .with_midi(o2p_midi, p2o_midi)
                .with_time(Arc::new(|| 0.0)),
        )
        .unwrap();

    engine.set_status(Status::Boot);
    assert!(wait_until(500, || engine.status() == Status::Wait));

    let started = Instant::now();
    engine.stop();
    engine.wait();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(engine.status(), Status::Stop);

    // Dropping after wait must not hang or double-join.
    drop(engine);
}
