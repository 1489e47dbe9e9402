//! Collaborator seams: host ring buffers, time source and DLL.
//!
//! The engine never owns the audio/MIDI rings. The enclosing program (a
//! JACK-style client, typically) supplies them behind [`RingBuffer`] together
//! with a monotonic clock, and the engine only assumes the single-producer /
//! single-consumer discipline spelled out on the trait.

use std::sync::Arc;

use crate::error::{Error, Result};

/// Monotonic host time in seconds.
pub type TimeFn = Arc<dyn Fn() -> f64 + Send + Sync>;

/// A lock-free byte ring with one producer and one consumer.
///
/// # Contract
///
/// - `read_space` / `write_space` must be conservative under concurrent
///   single-producer/single-consumer access: a count once reported remains
///   available to the corresponding side.
/// - `read`, `discard` and `write` transfer exactly the requested byte
///   count; the engine always checks the corresponding space first.
pub trait RingBuffer: Send + Sync {
    /// Bytes currently readable.
    fn read_space(&self) -> usize;

    /// Bytes currently writable.
    fn write_space(&self) -> usize;

    /// Consumes exactly `dst.len()` bytes into `dst`.
    fn read(&self, dst: &mut [u8]);

    /// Consumes and drops exactly `len` bytes.
    fn discard(&self, len: usize);

    /// Writes exactly `src.len()` bytes.
    fn write(&self, src: &[u8]);
}

/// Delay-locked loop fed by the engine with one timing sample per inbound
/// audio transfer, so the host can track device-vs-host clock drift.
pub trait Dll: Send {
    /// Re-anchors the loop at the start of an engine cycle.
    fn reset(&mut self, sample_rate: u32, frames_per_transfer: usize, time: f64);

    /// Records that `frames` device frames arrived at host time `time`.
    fn tick(&mut self, frames: usize, time: f64);
}

/// Host I/O configuration handed to [`Engine::activate`].
///
/// Audio rings are mandatory. MIDI is optional, but the two MIDI rings and
/// the time source come as a package: supplying any of them requires all
/// three. Attaching a DLL also requires the time source.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use overbridge::IoConfig;
/// # fn rings() -> (Arc<dyn overbridge::RingBuffer>, Arc<dyn overbridge::RingBuffer>) { unimplemented!() }
///
/// let (o2p, p2o) = rings();
/// let io = IoConfig::new()
///     .with_audio(o2p, p2o)
///     .with_time(Arc::new(|| 0.0));
/// ```
///
/// [`Engine::activate`]: crate::Engine::activate
#[derive(Default, Clone)]
pub struct IoConfig {
    pub(crate) o2p_audio: Option<Arc<dyn RingBuffer>>,
    pub(crate) p2o_audio: Option<Arc<dyn RingBuffer>>,
    pub(crate) o2p_midi: Option<Arc<dyn RingBuffer>>,
    pub(crate) p2o_midi: Option<Arc<dyn RingBuffer>>,
    pub(crate) time: Option<TimeFn>,
}

impl IoConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies the device-to-host and host-to-device audio rings.
    pub fn with_audio(mut self, o2p: Arc<dyn RingBuffer>, p2o: Arc<dyn RingBuffer>) -> Self {
        self.o2p_audio = Some(o2p);
        self.p2o_audio = Some(p2o);
        self
    }

    /// Supplies the device-to-host and host-to-device MIDI rings.
    pub fn with_midi(mut self, o2p: Arc<dyn RingBuffer>, p2o: Arc<dyn RingBuffer>) -> Self {
        self.o2p_midi = Some(o2p);
        self.p2o_midi = Some(p2o);
        self
    }

    /// Supplies the monotonic host clock.
    pub fn with_time(mut self, time: TimeFn) -> Self {
        self.time = Some(time);
        self
    }
}

/// Validated I/O hooks, shared by both engine threads.
pub(crate) struct Io {
    pub o2p_audio: Arc<dyn RingBuffer>,
    pub p2o_audio: Arc<dyn RingBuffer>,
    pub midi: Option<MidiIo>,
    pub time: Option<TimeFn>,
}

impl std::fmt::Debug for Io {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Io")
            .field("midi", &self.midi.is_some())
            .field("time", &self.time.is_some())
            .finish_non_exhaustive()
    }
}

pub(crate) struct MidiIo {
    pub o2p: Arc<dyn RingBuffer>,
    pub p2o: Arc<dyn RingBuffer>,
}

impl Io {
    /// Applies the activation preconditions to a raw configuration.
    pub fn validate(config: IoConfig, dll_attached: bool) -> Result<Self> {
        let o2p_audio = config.o2p_audio.ok_or(Error::NoO2pAudioBuffer)?;
        let p2o_audio = config.p2o_audio.ok_or(Error::NoP2oAudioBuffer)?;

        let midi_wanted =
            config.time.is_some() || config.o2p_midi.is_some() || config.p2o_midi.is_some();
        let midi = if midi_wanted {
            let time_present = config.time.is_some();
            if !time_present {
                return Err(Error::NoTimeSource);
            }
            let o2p = config.o2p_midi.ok_or(Error::NoO2pMidiBuffer)?;
            let p2o = config.p2o_midi.ok_or(Error::NoP2oMidiBuffer)?;
            Some(MidiIo { o2p, p2o })
        } else {
            None
        };

        if dll_attached && config.time.is_none() {
            return Err(Error::NoTimeSource);
        }

        Ok(Self {
            o2p_audio,
            p2o_audio,
            midi,
            time: config.time,
        })
    }
}
