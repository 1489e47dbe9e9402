//! Engine-wide types and protocol constants.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Device sample rate in Hz. The hardware runs at a fixed rate; the host
/// graph is expected to match it (drift is absorbed by the DLL collaborator).
pub const SAMPLE_RATE: u32 = 48_000;

/// Duration of one frame in nanoseconds.
pub const SAMPLE_TIME_NS: u64 = 1_000_000_000 / SAMPLE_RATE as u64;

/// Size of one MIDI event on the USB wire.
pub const MIDI_EVENT_SIZE: usize = 4;

/// Size of an outbound or inbound bulk MIDI transfer. Outbound bursts are
/// always submitted at this length, zero-padded past the staged events.
pub const USB_BULK_MIDI_SIZE: usize = 512;

/// Engine lifecycle state.
///
/// The ordering is significant and used throughout the engine: the audio
/// thread keeps cycling while `status >= Wait`, publishes audio only at
/// `Run`, and both threads exit once `status <= Stop`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Status {
    /// A fatal USB error occurred; both threads unwind.
    Error,
    /// Shutdown requested or engine not running.
    Stop,
    /// Activated, waiting for the host to start the first cycle.
    Ready,
    /// Between cycles: buffers flushed, about to re-enter the wait state.
    Boot,
    /// Transfers are flowing but decoded audio is still discarded (warm-up).
    Wait,
    /// Audio and MIDI are published to the host rings.
    Run,
}

/// A host-side MIDI event: the raw 4-byte USB-MIDI packet plus the host
/// time at which it was observed (inbound) or should be sent (outbound).
///
/// On the MIDI rings the event occupies [`MidiEvent::ENCODED_SIZE`] bytes:
/// the packet, four bytes of padding, then the timestamp as a native-endian
/// `f64`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MidiEvent {
    /// Raw USB-MIDI packet; `bytes[0]` carries the cable/code index.
    pub bytes: [u8; MIDI_EVENT_SIZE],
    /// Host time in seconds.
    pub time: f64,
}

impl MidiEvent {
    /// Encoded size of one event on the host MIDI rings.
    pub const ENCODED_SIZE: usize = 16;

    /// Serializes the event for a host MIDI ring.
    pub fn encode(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut out = [0u8; Self::ENCODED_SIZE];
        out[..MIDI_EVENT_SIZE].copy_from_slice(&self.bytes);
        out[8..].copy_from_slice(&self.time.to_ne_bytes());
        out
    }

    /// Deserializes an event previously written with [`MidiEvent::encode`].
    pub fn decode(raw: &[u8; Self::ENCODED_SIZE]) -> Self {
        let mut bytes = [0u8; MIDI_EVENT_SIZE];
        bytes.copy_from_slice(&raw[..MIDI_EVENT_SIZE]);
        let mut time = [0u8; 8];
        time.copy_from_slice(&raw[8..]);
        Self {
            bytes,
            time: f64::from_ne_bytes(time),
        }
    }
}

/// Rounds a byte count down to a whole number of frames.
pub fn bytes_to_frame_bytes(bytes: usize, frame_bytes: usize) -> usize {
    (bytes / frame_bytes) * frame_bytes
}
