//! Wire-block codec for the vendor audio protocol.
//!
//! The device exchanges audio as transfers of `B` contiguous blocks. Each
//! block is a 32-byte header region followed by `FRAMES_PER_BLOCK` frames of
//! channel-interleaved big-endian 32-bit fixed-point samples:
//!
//! ```text
//! header: u16   0x07FF on every outbound block (ignored inbound)
//! frames: u16   running block sequence counter, big-endian
//! padding: [u8; 28]   device-specific, zeroed
//! data: [i32; FRAMES_PER_BLOCK * channels]   big-endian samples
//! ```
//!
//! The host side works in native-endian normalised `f32`. This module is the
//! only place that touches endianness or fixed-point scaling.

use crate::device::DeviceDesc;

/// Frames carried by one wire block.
pub const FRAMES_PER_BLOCK: usize = 32;

/// Opaque device-specific bytes between the counters and the samples.
pub const PADDING_SIZE: usize = 28;

/// Sentinel stamped on every outbound block header.
pub const BLOCK_HEADER: u16 = 0x07ff;

/// Wire size of one sample.
pub const BYTES_PER_SAMPLE: usize = 4;

/// Offset of the sample data within a block.
const DATA_OFFSET: usize = 4 + PADDING_SIZE;

/// Scale between normalised floats and 32-bit fixed point.
const SCALE: f32 = i32::MAX as f32;

/// Byte geometry of the audio transfers for one device and block count.
///
/// Everything here is fixed at engine construction; the device dictates the
/// channel counts and the caller picks `blocks_per_transfer`.
#[derive(Clone, Copy, Debug)]
pub struct TransferLayout {
    /// Blocks carried by one USB transfer.
    pub blocks_per_transfer: usize,
    /// Frames carried by one USB transfer.
    pub frames_per_transfer: usize,
    /// Host-to-device channel count.
    pub inputs: usize,
    /// Device-to-host channel count.
    pub outputs: usize,
    /// Bytes of one host-to-device frame on the host rings.
    pub p2o_frame_bytes: usize,
    /// Bytes of one device-to-host frame on the host rings.
    pub o2p_frame_bytes: usize,
    /// Bytes of one host-to-device transfer on the host rings.
    pub p2o_transfer_bytes: usize,
    /// Bytes of one device-to-host transfer on the host rings.
    pub o2p_transfer_bytes: usize,
    /// Wire length of one inbound block.
    pub usb_in_block_len: usize,
    /// Wire length of one outbound block.
    pub usb_out_block_len: usize,
    /// Wire length of one inbound transfer.
    pub usb_in_len: usize,
    /// Wire length of one outbound transfer.
    pub usb_out_len: usize,
}

impl TransferLayout {
    /// Computes the geometry for a device and a block count.
    pub fn new(desc: &DeviceDesc, blocks_per_transfer: usize) -> Self {
        let frames_per_transfer = blocks_per_transfer * FRAMES_PER_BLOCK;
        let usb_in_block_len = DATA_OFFSET + FRAMES_PER_BLOCK * desc.outputs * BYTES_PER_SAMPLE;
        let usb_out_block_len = DATA_OFFSET + FRAMES_PER_BLOCK * desc.inputs * BYTES_PER_SAMPLE;
        let p2o_frame_bytes = desc.inputs * BYTES_PER_SAMPLE;
        let o2p_frame_bytes = desc.outputs * BYTES_PER_SAMPLE;
        Self {
            blocks_per_transfer,
            frames_per_transfer,
            inputs: desc.inputs,
            outputs: desc.outputs,
            p2o_frame_bytes,
            o2p_frame_bytes,
            p2o_transfer_bytes: frames_per_transfer * p2o_frame_bytes,
            o2p_transfer_bytes: frames_per_transfer * o2p_frame_bytes,
            usb_in_block_len,
            usb_out_block_len,
            usb_in_len: blocks_per_transfer * usb_in_block_len,
            usb_out_len: blocks_per_transfer * usb_out_block_len,
        }
    }

    /// Stamps the fixed header and zeroed padding on every outbound block.
    ///
    /// Done once at engine construction; `encode_outbound` only rewrites the
    /// `frames` counter and the samples afterwards.
    pub fn init_outbound(&self, wire: &mut [u8]) {
        debug_assert_eq!(wire.len(), self.usb_out_len);
        for block in wire.chunks_exact_mut(self.usb_out_block_len) {
            block[..2].copy_from_slice(&BLOCK_HEADER.to_be_bytes());
            block[2..DATA_OFFSET].fill(0);
        }
    }

    /// Decodes one inbound transfer into normalised floats.
    ///
    /// `out` must hold `frames_per_transfer * outputs` samples; the inbound
    /// header and counter fields are not interpreted.
    pub fn decode_inbound(&self, wire: &[u8], out: &mut [f32]) {
        debug_assert_eq!(wire.len(), self.usb_in_len);
        debug_assert_eq!(out.len(), self.frames_per_transfer * self.outputs);
        let samples_per_block = FRAMES_PER_BLOCK * self.outputs;
        for (block, samples) in wire
            .chunks_exact(self.usb_in_block_len)
            .zip(out.chunks_exact_mut(samples_per_block))
        {
            for (raw, sample) in block[DATA_OFFSET..]
                .chunks_exact(BYTES_PER_SAMPLE)
                .zip(samples.iter_mut())
            {
                *sample = i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as f32 / SCALE;
            }
        }
    }

    /// Encodes one outbound transfer from normalised floats.
    ///
    /// `frames` is the running block sequence counter: it advances by
    /// [`FRAMES_PER_BLOCK`] per block (wrapping) and each block carries the
    /// post-increment value, big-endian. Samples outside `[-1, 1]` saturate.
    pub fn encode_outbound(&self, samples: &[f32], frames: &mut u16, wire: &mut [u8]) {
        debug_assert_eq!(wire.len(), self.usb_out_len);
        debug_assert_eq!(samples.len(), self.frames_per_transfer * self.inputs);
        let samples_per_block = FRAMES_PER_BLOCK * self.inputs;
        for (block, samples) in wire
            .chunks_exact_mut(self.usb_out_block_len)
            .zip(samples.chunks_exact(samples_per_block))
        {
            *frames = frames.wrapping_add(FRAMES_PER_BLOCK as u16);
            block[2..4].copy_from_slice(&frames.to_be_bytes());
            for (raw, sample) in block[DATA_OFFSET..]
                .chunks_exact_mut(BYTES_PER_SAMPLE)
                .zip(samples)
            {
                raw.copy_from_slice(&((*sample * SCALE) as i32).to_be_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceDesc;

    const DESC: DeviceDesc = DeviceDesc {
        name: "test",
        product_id: 0x0000,
        inputs: 2,
        outputs: 4,
    };

    fn layout(blocks: usize) -> TransferLayout {
        TransferLayout::new(&DESC, blocks)
    }

    #[test]
    fn geometry_matches_device() {
        let l = layout(4);
        assert_eq!(l.frames_per_transfer, 128);
        assert_eq!(l.usb_out_block_len, 32 + FRAMES_PER_BLOCK * 2 * 4);
        assert_eq!(l.usb_in_block_len, 32 + FRAMES_PER_BLOCK * 4 * 4);
        assert_eq!(l.p2o_transfer_bytes, 128 * 2 * 4);
        assert_eq!(l.o2p_transfer_bytes, 128 * 4 * 4);
    }

    #[test]
    fn outbound_blocks_carry_header_and_counter() {
        let l = layout(3);
        let mut wire = vec![0u8; l.usb_out_len];
        l.init_outbound(&mut wire);
        let samples = vec![0.0f32; l.frames_per_transfer * l.inputs];
        let mut frames = 100u16;
        l.encode_outbound(&samples, &mut frames, &mut wire);

        for (i, block) in wire.chunks_exact(l.usb_out_block_len).enumerate() {
            assert_eq!(u16::from_be_bytes([block[0], block[1]]), BLOCK_HEADER);
            let expected = 100u16.wrapping_add(((i + 1) * FRAMES_PER_BLOCK) as u16);
            assert_eq!(u16::from_be_bytes([block[2], block[3]]), expected);
        }
        assert_eq!(frames, 100 + 3 * FRAMES_PER_BLOCK as u16);
    }

    #[test]
    fn frames_counter_wraps() {
        let l = layout(1);
        let mut wire = vec![0u8; l.usb_out_len];
        l.init_outbound(&mut wire);
        let samples = vec![0.0f32; l.frames_per_transfer * l.inputs];
        let mut frames = u16::MAX - 10;
        l.encode_outbound(&samples, &mut frames, &mut wire);
        assert_eq!(frames, 21);
        assert_eq!(u16::from_be_bytes([wire[2], wire[3]]), 21);
    }

    #[test]
    fn decode_scales_big_endian_samples() {
        let l = layout(2);
        let mut wire = vec![0u8; l.usb_in_len];
        let half = i32::MAX / 2;
        for block in wire.chunks_exact_mut(l.usb_in_block_len) {
            for raw in block[32..].chunks_exact_mut(4) {
                raw.copy_from_slice(&half.to_be_bytes());
            }
        }
        let mut out = vec![0.0f32; l.frames_per_transfer * l.outputs];
        l.decode_inbound(&wire, &mut out);
        assert_eq!(out.len(), l.frames_per_transfer * l.outputs);
        for sample in out {
            assert!((sample - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn encode_then_decode_is_lossless_within_one_lsb() {
        let out_desc = DeviceDesc {
            name: "loop",
            product_id: 0x0000,
            inputs: 2,
            outputs: 2,
        };
        let l = TransferLayout::new(&out_desc, 2);
        let samples: Vec<f32> = (0..l.frames_per_transfer * 2)
            .map(|i| ((i as f32 / 97.0).sin() * 0.9).clamp(-1.0, 1.0 - f32::EPSILON))
            .collect();

        let mut wire = vec![0u8; l.usb_out_len];
        l.init_outbound(&mut wire);
        let mut frames = 0u16;
        l.encode_outbound(&samples, &mut frames, &mut wire);

        // Outbound and inbound layouts coincide when inputs == outputs.
        let mut round = vec![0.0f32; samples.len()];
        l.decode_inbound(&wire, &mut round);

        let lsb = 1.0 / i32::MAX as f32;
        for (a, b) in samples.iter().zip(&round) {
            assert!((a - b).abs() <= lsb, "{a} vs {b}");
        }
    }
}
