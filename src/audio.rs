//! Audio bridge between the USB transfer buffers and the host rings.
//!
//! Inbound, every completed transfer is decoded and pushed to the o2p ring
//! (or dropped during warm-up / on overflow). Outbound, a two-state
//! sub-machine keeps the device fed: it idles on silence until the host ring
//! holds a full transfer, then streams steadily, stretching short reads over
//! a whole transfer when the ring underflows.

use std::sync::Arc;

use log::{debug, error};

use crate::codec::TransferLayout;
use crate::engine::Shared;
use crate::io::{RingBuffer, TimeFn};
use crate::resample::Resampler;
use crate::types::{bytes_to_frame_bytes, Status};

pub(crate) struct AudioBridge {
    layout: TransferLayout,
    o2p: Arc<dyn RingBuffer>,
    p2o: Arc<dyn RingBuffer>,
    time: Option<TimeFn>,
    shared: Arc<Shared>,
    resampler: Box<dyn Resampler>,

    usb_in: Vec<u8>,
    usb_out: Vec<u8>,
    o2p_samples: Vec<f32>,
    o2p_bytes: Vec<u8>,
    p2o_samples: Vec<f32>,
    p2o_bytes: Vec<u8>,
    scratch_bytes: Vec<u8>,
    scratch_samples: Vec<f32>,

    /// Running block sequence counter stamped on outbound blocks.
    frames: u16,
    /// False while waiting for the host to fill one whole transfer.
    reading_at_p2o_end: bool,
}

impl AudioBridge {
    pub fn new(
        layout: TransferLayout,
        o2p: Arc<dyn RingBuffer>,
        p2o: Arc<dyn RingBuffer>,
        time: Option<TimeFn>,
        shared: Arc<Shared>,
        resampler: Box<dyn Resampler>,
    ) -> Self {
        let mut usb_out = vec![0u8; layout.usb_out_len];
        layout.init_outbound(&mut usb_out);
        Self {
            o2p,
            p2o,
            time,
            shared,
            resampler,
            usb_in: vec![0u8; layout.usb_in_len],
            usb_out,
            o2p_samples: vec![0.0; layout.frames_per_transfer * layout.outputs],
            o2p_bytes: vec![0u8; layout.o2p_transfer_bytes],
            p2o_samples: vec![0.0; layout.frames_per_transfer * layout.inputs],
            p2o_bytes: vec![0u8; layout.p2o_transfer_bytes],
            scratch_bytes: vec![0u8; layout.p2o_transfer_bytes],
            scratch_samples: vec![0.0; layout.frames_per_transfer * layout.inputs],
            frames: 0,
            reading_at_p2o_end: false,
            layout,
        }
    }

    /// Inbound transfer buffer, filled by the transport before
    /// [`handle_inbound`](Self::handle_inbound).
    pub fn usb_in_mut(&mut self) -> &mut [u8] {
        &mut self.usb_in
    }

    /// Outbound transfer buffer, valid after [`fill_outbound`](Self::fill_outbound).
    pub fn usb_out(&self) -> &[u8] {
        &self.usb_out
    }

    pub fn frames_per_transfer(&self) -> usize {
        self.layout.frames_per_transfer
    }

    /// Resets per-cycle state before the engine enters the wait state.
    pub fn begin_cycle(&mut self) {
        self.reading_at_p2o_end = false;
        self.shared.reset_cycle_stats();
    }

    /// Drains the host ring to a frame boundary and silences the outbound
    /// buffer between engine cycles.
    pub fn flush_between_cycles(&mut self) {
        let readable = self.p2o.read_space();
        self.p2o
            .discard(bytes_to_frame_bytes(readable, self.layout.p2o_frame_bytes));
        self.p2o_samples.fill(0.0);
    }

    /// Processes one completed inbound transfer.
    pub fn handle_inbound(&mut self) {
        let now = self.time.as_ref().map(|t| t());
        let status = self
            .shared
            .inbound_tick(self.layout.frames_per_transfer, now);

        self.layout.decode_inbound(&self.usb_in, &mut self.o2p_samples);

        if status < Status::Run {
            return;
        }

        if self.o2p.write_space() >= self.layout.o2p_transfer_bytes {
            samples_to_bytes(&self.o2p_samples, &mut self.o2p_bytes);
            self.o2p.write(&self.o2p_bytes);
        } else {
            error!("o2p: audio ring buffer overflow, discarding data");
        }
    }

    /// Refills and encodes the outbound transfer buffer.
    pub fn fill_outbound(&mut self) {
        let enabled = self.shared.is_p2o_audio_enabled();
        let readable = self.p2o.read_space();

        if !self.reading_at_p2o_end {
            // Waiting to start: swallow whatever accumulated while idle so
            // the stream begins aligned to a transfer boundary.
            if enabled && readable >= self.layout.p2o_transfer_bytes {
                debug!("p2o: emptying buffer and running");
                self.p2o
                    .discard(bytes_to_frame_bytes(readable, self.layout.p2o_frame_bytes));
                self.reading_at_p2o_end = true;
            }
        } else if !enabled {
            debug!("p2o: clearing buffer and stopping");
            self.reading_at_p2o_end = false;
            self.p2o_samples.fill(0.0);
        } else {
            self.shared.record_p2o_latency(readable);

            if readable >= self.layout.p2o_transfer_bytes {
                self.p2o.read(&mut self.p2o_bytes);
                bytes_to_samples(&self.p2o_bytes, &mut self.p2o_samples);
            } else {
                self.resample_short_read(readable);
            }
        }

        self.layout
            .encode_outbound(&self.p2o_samples, &mut self.frames, &mut self.usb_out);
    }

    /// Stretches a partial ring read over one full transfer.
    fn resample_short_read(&mut self, readable: usize) {
        let frames = readable / self.layout.p2o_frame_bytes;
        let bytes = frames * self.layout.p2o_frame_bytes;
        debug!(
            "p2o: audio ring buffer underflow ({readable} < {}), resampling",
            self.layout.p2o_transfer_bytes
        );

        self.p2o.read(&mut self.scratch_bytes[..bytes]);
        let samples = frames * self.layout.inputs;
        bytes_to_samples(
            &self.scratch_bytes[..bytes],
            &mut self.scratch_samples[..samples],
        );

        match self.resampler.resample(
            &self.scratch_samples[..samples],
            &mut self.p2o_samples,
            self.layout.inputs,
        ) {
            Ok(generated) if generated != self.layout.frames_per_transfer => {
                error!(
                    "p2o: unexpected resampled frames (output {generated}, expected {})",
                    self.layout.frames_per_transfer
                );
            }
            Ok(_) => {}
            Err(err) => debug!("p2o: error while resampling: {err}"),
        }
    }
}

fn samples_to_bytes(src: &[f32], dst: &mut [u8]) {
    for (sample, raw) in src.iter().zip(dst.chunks_exact_mut(4)) {
        raw.copy_from_slice(&sample.to_ne_bytes());
    }
}

fn bytes_to_samples(src: &[u8], dst: &mut [f32]) {
    for (raw, sample) in src.chunks_exact(4).zip(dst.iter_mut()) {
        *sample = f32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]);
    }
}
