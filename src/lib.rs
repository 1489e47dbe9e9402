//! USB audio and MIDI bridging engine for Elektron Overbridge devices.
//!
//! This crate couples an Overbridge-family device (multichannel audio plus
//! MIDI over proprietary vendor USB interfaces) to a host audio graph. The
//! engine continuously transports interleaved PCM in both directions,
//! multiplexes a MIDI byte stream alongside, and reports timing samples to a
//! delay-locked loop so the host can track clock drift.
//!
//! The host side of the bridge is supplied by the caller: four lock-free
//! ring buffers and a monotonic clock behind [`RingBuffer`] and
//! [`IoConfig`]. The engine owns the USB side: transfer pacing, the wire
//! block format, fixed-point conversion and the outbound MIDI scheduler.
//!
//! # Getting started
//!
//! ```no_run
//! use overbridge::{Engine, IoConfig, Status};
//! # fn rings() -> (std::sync::Arc<dyn overbridge::RingBuffer>, std::sync::Arc<dyn overbridge::RingBuffer>) { unimplemented!() }
//!
//! let (o2p_audio, p2o_audio) = rings();
//! let mut engine = Engine::open(1, 4, 24)?;
//! engine.activate(IoConfig::new().with_audio(o2p_audio, p2o_audio))?;
//!
//! // Once the host graph is consuming, start publishing audio.
//! engine.set_status(Status::Run);
//! engine.set_p2o_audio_enabled(true);
//!
//! // ... later ...
//! engine.stop();
//! engine.wait();
//! # Ok::<(), overbridge::Error>(())
//! ```
//!
//! # Threads
//!
//! An activated engine runs two threads: the audio/USB thread (transfer
//! pump, audio bridge, inbound MIDI) and the outbound MIDI pacing thread.
//! Both exit cooperatively when the status drops to [`Status::Stop`] or a
//! fatal USB error drives it to [`Status::Error`].

mod audio;
pub mod codec;
pub mod device;
mod engine;
mod error;
pub mod io;
mod midi;
pub mod resample;
pub mod transport;
pub mod usb;
mod types;

pub use codec::{TransferLayout, BLOCK_HEADER, BYTES_PER_SAMPLE, FRAMES_PER_BLOCK, PADDING_SIZE};
pub use device::{lookup, DeviceDesc, DEVICE_DESCS, VENDOR_ID};
pub use engine::Engine;
pub use error::{Error, Result};
pub use io::{Dll, IoConfig, RingBuffer, TimeFn};
pub use resample::{LinearResampler, ResampleError, Resampler};
pub use transport::{TransferError, UsbTransport};
pub use types::{
    bytes_to_frame_bytes, MidiEvent, Status, MIDI_EVENT_SIZE, SAMPLE_RATE, USB_BULK_MIDI_SIZE,
};
pub use usb::RusbTransport;
