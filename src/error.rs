//! Crate-level error types.

use thiserror::Error;

/// Errors reported by the engine.
///
/// Every failure mode has its own variant with a fixed message, so callers
/// can match on the condition and log the canonical string.
#[derive(Error, Debug)]
pub enum Error {
    /// The USB library context could not be initialized.
    #[error("libusb init failed")]
    LibusbInit(#[source] rusb::Error),

    /// No supported device was found at the requested bus and address.
    #[error("can't find a matching device")]
    DeviceNotFound,

    /// The device rejected the USB configuration.
    #[error("can't set usb config")]
    CantSetConfig(#[source] rusb::Error),

    /// A vendor interface could not be claimed.
    #[error("can't claim usb interface")]
    CantClaimInterface(#[source] rusb::Error),

    /// An interface alternate setting could not be selected.
    #[error("can't set usb alt setting")]
    CantSetAltSetting(#[source] rusb::Error),

    /// An endpoint halt condition could not be cleared.
    #[error("can't clear endpoint")]
    CantClearEndpoint(#[source] rusb::Error),

    /// The transfer buffers could not be prepared.
    #[error("can't prepare transfer")]
    CantPrepareTransfer,

    /// The device-to-host audio ring buffer is missing.
    #[error("'o2p_audio' buffer not set")]
    NoO2pAudioBuffer,

    /// The host-to-device audio ring buffer is missing.
    #[error("'p2o_audio' buffer not set")]
    NoP2oAudioBuffer,

    /// The device-to-host MIDI ring buffer is missing.
    #[error("'o2p_midi' buffer not set")]
    NoO2pMidiBuffer,

    /// The host-to-device MIDI ring buffer is missing.
    #[error("'p2o_midi' buffer not set")]
    NoP2oMidiBuffer,

    /// The host time source is missing but required (MIDI or DLL in use).
    #[error("'get_time' not set")]
    NoTimeSource,

    /// An engine thread could not be spawned.
    #[error("can't start engine thread")]
    Thread(#[source] std::io::Error),

    /// Catch-all for conditions without a dedicated code.
    #[error("generic error")]
    Generic,
}

/// Crate-level result type.
pub type Result<T> = std::result::Result<T, Error>;
