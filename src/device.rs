//! Descriptors for the supported Overbridge device family.

#[cfg(feature = "serde")]
use serde::Serialize;
use std::fmt;

/// USB vendor id shared by the whole device family.
pub const VENDOR_ID: u16 = 0x1935;

/// Static description of one device model.
///
/// `inputs` counts the channels the host sends to the device (p2o) and
/// `outputs` the channels the device sends to the host (o2p); both are
/// dictated by the hardware and never negotiated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct DeviceDesc {
    /// Human-readable model name.
    pub name: &'static str,
    /// USB product id.
    pub product_id: u16,
    /// Host-to-device channel count.
    pub inputs: usize,
    /// Device-to-host channel count.
    pub outputs: usize,
}

impl fmt::Display for DeviceDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (outputs: {}, inputs: {})",
            self.name, self.outputs, self.inputs
        )
    }
}

/// Every model the engine knows how to drive.
pub const DEVICE_DESCS: &[DeviceDesc] = &[
    DeviceDesc {
        name: "Analog Four",
        product_id: 0x0004,
        inputs: 4,
        outputs: 8,
    },
    DeviceDesc {
        name: "Analog Keys",
        product_id: 0x0006,
        inputs: 4,
        outputs: 8,
    },
    DeviceDesc {
        name: "Analog Rytm",
        product_id: 0x0008,
        inputs: 12,
        outputs: 12,
    },
    DeviceDesc {
        name: "Analog Heat",
        product_id: 0x000a,
        inputs: 4,
        outputs: 4,
    },
    DeviceDesc {
        name: "Digitakt",
        product_id: 0x000c,
        inputs: 2,
        outputs: 12,
    },
    DeviceDesc {
        name: "Analog Four MKII",
        product_id: 0x0014,
        inputs: 6,
        outputs: 8,
    },
    DeviceDesc {
        name: "Analog Rytm MKII",
        product_id: 0x0016,
        inputs: 12,
        outputs: 12,
    },
    DeviceDesc {
        name: "Digitone",
        product_id: 0x0018,
        inputs: 2,
        outputs: 12,
    },
    DeviceDesc {
        name: "Analog Heat MKII",
        product_id: 0x001a,
        inputs: 4,
        outputs: 4,
    },
    DeviceDesc {
        name: "Digitone Keys",
        product_id: 0x001c,
        inputs: 2,
        outputs: 12,
    },
];

/// Looks up a connected device by its USB identity.
///
/// Returns `None` for anything outside the supported family.
pub fn lookup(vendor_id: u16, product_id: u16) -> Option<&'static DeviceDesc> {
    if vendor_id != VENDOR_ID {
        return None;
    }
    DEVICE_DESCS.iter().find(|d| d.product_id == product_id)
}
