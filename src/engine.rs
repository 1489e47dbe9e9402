//! Engine supervisor: lifecycle, shared state and the transfer pump.
//!
//! An activated engine runs two threads. The audio/USB thread owns the
//! transfer buffers and drives one transfer cycle after another: read one
//! inbound audio transfer (the device clock paces the loop through this
//! blocking call), bridge it to the host, refill and write the outbound
//! transfer, then poll for inbound MIDI. The MIDI-out thread runs the
//! event-paced pacing pump. All cross-thread state lives
//! in [`Shared`] behind two low-latency locks whose critical sections are
//! O(1) and never span I/O.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info};
use parking_lot::Mutex;

use crate::audio::AudioBridge;
use crate::codec::TransferLayout;
use crate::device::DeviceDesc;
use crate::error::{Error, Result};
use crate::io::{Dll, Io, IoConfig, TimeFn};
use crate::midi::{MidiInBridge, MidiOutPump};
use crate::resample::LinearResampler;
use crate::transport::UsbTransport;
use crate::types::{Status, SAMPLE_RATE, USB_BULK_MIDI_SIZE};
use crate::usb::RusbTransport;

/// State shared between the engine threads and the public accessors.
pub(crate) struct Shared {
    state: Mutex<CoreState>,
    /// Outbound MIDI handshake: true once the last burst completed.
    midi_ready: Mutex<bool>,
}

struct CoreState {
    status: Status,
    p2o_latency: usize,
    p2o_max_latency: usize,
    p2o_audio_enabled: bool,
    dll: Option<Box<dyn Dll>>,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CoreState {
                status: Status::Stop,
                p2o_latency: 0,
                p2o_max_latency: 0,
                p2o_audio_enabled: false,
                dll: None,
            }),
            midi_ready: Mutex::new(false),
        }
    }

    pub fn status(&self) -> Status {
        self.state.lock().status
    }

    pub fn set_status(&self, status: Status) {
        self.state.lock().status = status;
    }

    pub fn is_p2o_audio_enabled(&self) -> bool {
        self.state.lock().p2o_audio_enabled
    }

    pub fn set_p2o_audio_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        if state.p2o_audio_enabled != enabled {
            state.p2o_audio_enabled = enabled;
            debug!("setting p2o audio to {enabled}");
        }
    }

    pub fn p2o_latency(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.p2o_latency, state.p2o_max_latency)
    }

    pub fn record_p2o_latency(&self, bytes: usize) {
        let mut state = self.state.lock();
        state.p2o_latency = bytes;
        if bytes > state.p2o_max_latency {
            state.p2o_max_latency = bytes;
        }
    }

    pub fn reset_cycle_stats(&self) {
        let mut state = self.state.lock();
        state.p2o_latency = 0;
        state.p2o_max_latency = 0;
    }

    pub fn install_dll(&self, dll: Option<Box<dyn Dll>>) {
        self.state.lock().dll = dll;
    }

    /// Re-anchors the DLL and enters the wait state at the start of a cycle.
    pub fn begin_wait(&self, frames_per_transfer: usize, now: Option<f64>) {
        let mut state = self.state.lock();
        if let (Some(dll), Some(now)) = (state.dll.as_mut(), now) {
            dll.reset(SAMPLE_RATE, frames_per_transfer, now);
        }
        state.status = Status::Wait;
    }

    /// Feeds the DLL one inbound timing sample and snapshots the status.
    pub fn inbound_tick(&self, frames: usize, now: Option<f64>) -> Status {
        let mut state = self.state.lock();
        if let (Some(dll), Some(now)) = (state.dll.as_mut(), now) {
            dll.tick(frames, now);
        }
        state.status
    }

    pub fn midi_ready(&self) -> bool {
        *self.midi_ready.lock()
    }

    pub fn set_midi_ready(&self, ready: bool) {
        *self.midi_ready.lock() = ready;
    }
}

struct Threads {
    audio: JoinHandle<()>,
    midi: Option<JoinHandle<()>>,
}

/// One opened device plus the machinery bridging it to the host graph.
///
/// Lifecycle: [`open`](Engine::open) (or
/// [`with_transport`](Engine::with_transport)) → [`activate`](Engine::activate)
/// → external code drives [`Status`] up to [`Status::Run`] → [`stop`](Engine::stop)
/// → [`wait`](Engine::wait). Dropping the engine stops and joins the threads
/// and releases the device.
pub struct Engine {
    desc: DeviceDesc,
    layout: TransferLayout,
    transport: Arc<dyn UsbTransport>,
    shared: Arc<Shared>,
    threads: Option<Threads>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("desc", &self.desc)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Opens the supported device at `(bus, address)` and prepares transfer
    /// buffers for `blocks_per_transfer` blocks per USB transfer.
    pub fn open(bus: u8, address: u8, blocks_per_transfer: usize) -> Result<Self> {
        let (transport, desc) = RusbTransport::open(bus, address)?;
        info!("device: {desc}");
        Self::with_transport(Arc::new(transport), *desc, blocks_per_transfer)
    }

    /// Builds an engine over an already-configured transport.
    ///
    /// This is the seam the test suite uses to substitute a scripted fake
    /// for the USB stack.
    pub fn with_transport(
        transport: Arc<dyn UsbTransport>,
        desc: DeviceDesc,
        blocks_per_transfer: usize,
    ) -> Result<Self> {
        if blocks_per_transfer == 0 {
            return Err(Error::CantPrepareTransfer);
        }
        Ok(Self {
            layout: TransferLayout::new(&desc, blocks_per_transfer),
            desc,
            transport,
            shared: Arc::new(Shared::new()),
            threads: None,
        })
    }

    /// The descriptor of the opened device.
    pub fn device_desc(&self) -> &DeviceDesc {
        &self.desc
    }

    /// The transfer geometry in force for this engine.
    pub fn layout(&self) -> &TransferLayout {
        &self.layout
    }

    pub fn status(&self) -> Status {
        self.shared.status()
    }

    /// Drives the lifecycle state machine; external code raises the status
    /// to [`Status::Run`] to start publishing audio.
    pub fn set_status(&self, status: Status) {
        self.shared.set_status(status);
    }

    pub fn is_p2o_audio_enabled(&self) -> bool {
        self.shared.is_p2o_audio_enabled()
    }

    /// Enables or disables the host-to-device audio path. While disabled the
    /// device is fed silence and the outbound sub-machine idles.
    pub fn set_p2o_audio_enabled(&self, enabled: bool) {
        self.shared.set_p2o_audio_enabled(enabled);
    }

    /// Current and peak host-to-device latency, in ring bytes.
    pub fn p2o_latency(&self) -> (usize, usize) {
        self.shared.p2o_latency()
    }

    /// Starts the engine threads without drift tracking.
    pub fn activate(&mut self, io: IoConfig) -> Result<()> {
        self.start(io, None)
    }

    /// Starts the engine threads with a DLL receiving one timing sample per
    /// inbound transfer. Requires a time source in `io`.
    pub fn activate_with_dll(&mut self, io: IoConfig, dll: Box<dyn Dll>) -> Result<()> {
        self.start(io, Some(dll))
    }

    fn start(&mut self, io: IoConfig, dll: Option<Box<dyn Dll>>) -> Result<()> {
        if self.threads.is_some() {
            return Err(Error::Generic);
        }
        let io = Io::validate(io, dll.is_some())?;
        self.shared.install_dll(dll);

        let audio = AudioBridge::new(
            self.layout,
            io.o2p_audio.clone(),
            io.p2o_audio.clone(),
            io.time.clone(),
            self.shared.clone(),
            Box::new(LinearResampler),
        );
        // Validation guarantees a time source whenever MIDI is configured.
        let (midi_in, midi_pump) = match (&io.midi, &io.time) {
            (Some(midi), Some(time)) => (
                Some(MidiInBridge::new(
                    midi.o2p.clone(),
                    time.clone(),
                    self.shared.clone(),
                )),
                Some(MidiOutPump::new(
                    midi.p2o.clone(),
                    time.clone(),
                    self.shared.clone(),
                    self.transport.clone(),
                )),
            ),
            _ => (None, None),
        };

        self.shared.set_status(Status::Ready);

        let midi = match midi_pump {
            Some(pump) => {
                debug!("starting p2o MIDI thread");
                let handle = thread::Builder::new()
                    .name("overbridge-midi".into())
                    .spawn(move || pump.run())
                    .map_err(Error::Thread)?;
                Some(handle)
            }
            None => None,
        };

        debug!("starting audio and o2p MIDI thread");
        let runner = AudioRunner {
            transport: self.transport.clone(),
            shared: self.shared.clone(),
            time: io.time.clone(),
            audio,
            midi_in,
            midi_buf: vec![0u8; USB_BULK_MIDI_SIZE],
        };
        let audio = match thread::Builder::new()
            .name("overbridge-audio".into())
            .spawn(move || runner.run())
        {
            Ok(handle) => handle,
            Err(err) => {
                // Unwind the MIDI thread we already started.
                self.shared.set_status(Status::Stop);
                if let Some(handle) = midi {
                    let _ = handle.join();
                }
                return Err(Error::Thread(err));
            }
        };

        self.threads = Some(Threads { audio, midi });
        Ok(())
    }

    /// Blocks until both engine threads have exited.
    pub fn wait(&mut self) {
        if let Some(threads) = self.threads.take() {
            let _ = threads.audio.join();
            if let Some(midi) = threads.midi {
                let _ = midi.join();
            }
        }
    }

    /// Requests shutdown; the threads observe it at their next check.
    pub fn stop(&self) {
        self.shared.set_status(Status::Stop);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
        self.wait();
    }
}

/// The audio/USB thread body.
struct AudioRunner {
    transport: Arc<dyn UsbTransport>,
    shared: Arc<Shared>,
    time: Option<TimeFn>,
    audio: AudioBridge,
    midi_in: Option<MidiInBridge>,
    midi_buf: Vec<u8>,
}

impl AudioRunner {
    fn run(mut self) {
        // Hold until external code moves the engine out of Ready.
        while self.shared.status() == Status::Ready {
            thread::yield_now();
        }

        loop {
            if self.shared.status() <= Status::Stop {
                break;
            }

            self.audio.begin_cycle();
            let now = self.time.as_ref().map(|t| t());
            self.shared
                .begin_wait(self.audio.frames_per_transfer(), now);

            while self.shared.status() >= Status::Wait {
                self.cycle();
            }

            if self.shared.status() <= Status::Stop {
                break;
            }

            // A callback dropped us to Boot: flush and start a fresh cycle.
            self.shared.set_status(Status::Boot);
            self.audio.flush_between_cycles();
        }
    }

    /// One transfer cycle; the blocking inbound read paces the loop against
    /// the device clock.
    fn cycle(&mut self) {
        match self.transport.read_audio(self.audio.usb_in_mut()) {
            Ok(_) => self.audio.handle_inbound(),
            Err(err) if err.is_fatal() => {
                error!("o2p: error on USB audio transfer: {err}");
                self.shared.set_status(Status::Error);
                return;
            }
            // Keep cycling even if this transfer did not succeed.
            Err(err) => error!("o2p: error on USB audio transfer: {err}"),
        }

        // The outbound buffer is always refilled before the next submission
        // so the device never sees stale data.
        self.audio.fill_outbound();
        match self.transport.write_audio(self.audio.usb_out()) {
            Ok(_) => {}
            Err(err) if err.is_fatal() => {
                error!("p2o: error on USB audio transfer: {err}");
                self.shared.set_status(Status::Error);
                return;
            }
            Err(err) => error!("p2o: error on USB audio transfer: {err}"),
        }

        if let Some(bridge) = &self.midi_in {
            match self.transport.read_midi(&mut self.midi_buf) {
                Ok(received) => bridge.handle(&self.midi_buf[..received]),
                // An empty poll is the normal case.
                Err(err) if err.is_timeout() => {}
                Err(err) if err.is_fatal() => {
                    error!("o2p: error on USB MIDI transfer: {err}");
                    self.shared.set_status(Status::Error);
                }
                Err(err) => error!("o2p: error on USB MIDI transfer: {err}"),
            }
        }
    }
}
