//! Hardware transport seam.
//!
//! The engine drives the device through [`UsbTransport`], four blocking
//! transfer operations matching the vendor endpoint layout. The production
//! implementation lives in [`usb`](crate::usb); tests substitute scripted
//! fakes.

use thiserror::Error;

/// Interrupt endpoint carrying device-to-host audio.
pub const AUDIO_IN_EP: u8 = 0x83;
/// Interrupt endpoint carrying host-to-device audio.
pub const AUDIO_OUT_EP: u8 = 0x03;
/// Bulk endpoint carrying device-to-host MIDI.
pub const MIDI_IN_EP: u8 = 0x81;
/// Bulk endpoint carrying host-to-device MIDI.
pub const MIDI_OUT_EP: u8 = 0x01;

/// Outcome classification for a single transfer.
///
/// The pump treats these differently: timeouts on the MIDI-in poll are
/// normal and silent, fatal errors drive the engine to [`Status::Error`],
/// and everything else is logged while the cycle continues.
///
/// [`Status::Error`]: crate::Status::Error
#[derive(Error, Debug)]
pub enum TransferError {
    /// The transfer timed out before the device produced or accepted data.
    #[error("transfer timed out")]
    Timeout,

    /// The device is gone; no further transfer can succeed.
    #[error("device disconnected")]
    Disconnected,

    /// The endpoint stalled.
    #[error("endpoint stalled")]
    Stall,

    /// Any other transport failure.
    #[error("transfer failed: {0}")]
    Other(String),
}

impl TransferError {
    /// True when no future transfer on this device can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransferError::Disconnected)
    }

    /// True for the benign poll-timeout case.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransferError::Timeout)
    }
}

/// Blocking transfer operations over the four vendor endpoints.
///
/// # Contract
///
/// - Audio operations block until the device produces or consumes one full
///   transfer (the device clock paces the engine through them).
/// - `write_midi` blocks until the burst is accepted.
/// - `read_midi` polls: it must return [`TransferError::Timeout`] promptly
///   when no MIDI is pending, so the audio cycle is not held up.
/// - At most one operation per endpoint is ever issued at a time; the two
///   engine threads never share an endpoint.
pub trait UsbTransport: Send + Sync {
    /// Reads one audio transfer from the device. Returns bytes received.
    fn read_audio(&self, buf: &mut [u8]) -> Result<usize, TransferError>;

    /// Writes one audio transfer to the device. Returns bytes sent.
    fn write_audio(&self, buf: &[u8]) -> Result<usize, TransferError>;

    /// Polls for inbound MIDI. Returns bytes received.
    fn read_midi(&self, buf: &mut [u8]) -> Result<usize, TransferError>;

    /// Writes one MIDI burst to the device. Returns bytes sent.
    fn write_midi(&self, buf: &[u8]) -> Result<usize, TransferError>;
}
