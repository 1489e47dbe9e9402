//! rusb-backed transport for a device opened by bus and address.

use std::time::Duration;

use log::warn;
use rusb::{Context, DeviceHandle, UsbContext};

use crate::device::{self, DeviceDesc};
use crate::error::{Error, Result};
use crate::transport::{
    TransferError, UsbTransport, AUDIO_IN_EP, AUDIO_OUT_EP, MIDI_IN_EP, MIDI_OUT_EP,
};

/// Zero means infinite/blocking: audio transfers pace the engine against the
/// device clock, and outbound MIDI relies on the same natural backpressure.
const BLOCKING: Duration = Duration::ZERO;

/// Inbound MIDI is polled once per audio cycle; the timeout has to be short
/// enough not to eat into the cycle period.
const MIDI_POLL: Duration = Duration::from_millis(1);

/// Vendor interfaces and the alternate settings the streaming mode needs,
/// in the exact order the device expects them.
const ALT_SETTINGS: [(u8, u8); 3] = [(1, 3), (2, 2), (3, 0)];

/// A claimed and configured USB device.
pub struct RusbTransport {
    handle: DeviceHandle<Context>,
}

impl RusbTransport {
    /// Opens the supported device at `(bus, address)` and brings it into
    /// streaming mode.
    ///
    /// The device's vendor/product pair must appear in the descriptor table;
    /// anything else at that address is reported as not found.
    pub fn open(bus: u8, address: u8) -> Result<(Self, &'static DeviceDesc)> {
        let context = Context::new().map_err(Error::LibusbInit)?;
        let devices = context.devices().map_err(Error::LibusbInit)?;

        let mut found = None;
        for device in devices.iter() {
            if device.bus_number() != bus || device.address() != address {
                continue;
            }
            let fields = match device.device_descriptor() {
                Ok(fields) => fields,
                Err(err) => {
                    warn!("error reading device descriptor: {err}");
                    continue;
                }
            };
            if let Some(desc) = device::lookup(fields.vendor_id(), fields.product_id()) {
                found = Some((device, desc));
                break;
            }
        }
        let (device, desc) = found.ok_or(Error::DeviceNotFound)?;

        let handle = device.open().map_err(|err| {
            warn!("error opening {}: {err}", desc.name);
            Error::DeviceNotFound
        })?;

        handle
            .set_active_configuration(1)
            .map_err(Error::CantSetConfig)?;
        for (interface, alt) in ALT_SETTINGS {
            handle
                .claim_interface(interface)
                .map_err(Error::CantClaimInterface)?;
            handle
                .set_alternate_setting(interface, alt)
                .map_err(Error::CantSetAltSetting)?;
        }
        for endpoint in [AUDIO_IN_EP, AUDIO_OUT_EP, MIDI_IN_EP, MIDI_OUT_EP] {
            handle.clear_halt(endpoint).map_err(Error::CantClearEndpoint)?;
        }

        Ok((Self { handle }, desc))
    }
}

fn classify(err: rusb::Error) -> TransferError {
    match err {
        rusb::Error::Timeout => TransferError::Timeout,
        rusb::Error::NoDevice => TransferError::Disconnected,
        rusb::Error::Pipe => TransferError::Stall,
        other => TransferError::Other(other.to_string()),
    }
}

impl UsbTransport for RusbTransport {
    fn read_audio(&self, buf: &mut [u8]) -> std::result::Result<usize, TransferError> {
        self.handle
            .read_interrupt(AUDIO_IN_EP, buf, BLOCKING)
            .map_err(classify)
    }

    fn write_audio(&self, buf: &[u8]) -> std::result::Result<usize, TransferError> {
        self.handle
            .write_interrupt(AUDIO_OUT_EP, buf, BLOCKING)
            .map_err(classify)
    }

    fn read_midi(&self, buf: &mut [u8]) -> std::result::Result<usize, TransferError> {
        self.handle
            .read_bulk(MIDI_IN_EP, buf, MIDI_POLL)
            .map_err(classify)
    }

    fn write_midi(&self, buf: &[u8]) -> std::result::Result<usize, TransferError> {
        self.handle
            .write_bulk(MIDI_OUT_EP, buf, BLOCKING)
            .map_err(classify)
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        for (interface, _) in ALT_SETTINGS {
            let _ = self.handle.release_interface(interface);
        }
    }
}
