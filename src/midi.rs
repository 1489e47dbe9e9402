//! MIDI bridge: inbound event filtering and the outbound pacing pump.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, trace};

use crate::engine::Shared;
use crate::io::{RingBuffer, TimeFn};
use crate::transport::UsbTransport;
use crate::types::{MidiEvent, Status, MIDI_EVENT_SIZE, SAMPLE_TIME_NS, USB_BULK_MIDI_SIZE};

/// First byte of a USB-MIDI packet carrying a channel voice or single-byte
/// realtime message: note-off, note-on, poly pressure, control change,
/// program change, channel pressure, pitch bend, single byte.
const CABLE_CODE_RANGE: std::ops::RangeInclusive<u8> = 0x08..=0x0f;

/// Idle sleep between pacing wakeups: half the average wait for a 32-frame
/// buffer period.
const IDLE_SLEEP: Duration = Duration::from_nanos(SAMPLE_TIME_NS * 32 / 2);

/// Filters and timestamps inbound MIDI packets into the host ring.
pub(crate) struct MidiInBridge {
    ring: Arc<dyn RingBuffer>,
    time: TimeFn,
    shared: Arc<Shared>,
}

impl MidiInBridge {
    pub fn new(ring: Arc<dyn RingBuffer>, time: TimeFn, shared: Arc<Shared>) -> Self {
        Self { ring, time, shared }
    }

    /// Processes the payload of one completed inbound bulk transfer.
    ///
    /// All events in the burst share one clock reading.
    pub fn handle(&self, payload: &[u8]) {
        if self.shared.status() < Status::Run {
            return;
        }

        let time = (self.time)();
        for packet in payload.chunks_exact(MIDI_EVENT_SIZE) {
            if !CABLE_CODE_RANGE.contains(&packet[0]) {
                continue;
            }
            trace!(
                "o2p MIDI: {:02x}, {:02x}, {:02x}, {:02x} ({time})",
                packet[0],
                packet[1],
                packet[2],
                packet[3]
            );
            if self.ring.write_space() >= MidiEvent::ENCODED_SIZE {
                let event = MidiEvent {
                    bytes: [packet[0], packet[1], packet[2], packet[3]],
                    time,
                };
                self.ring.write(&event.encode());
            } else {
                error!("o2p: MIDI ring buffer overflow, discarding data");
            }
        }
    }
}

/// Event-paced outbound MIDI pump, run on its own thread.
///
/// Events sharing a timestamp are coalesced into one bulk burst; a
/// later-timestamped event flushes the burst and sleeps out the inter-event
/// gap, so the device receives MIDI in real time rather than in clumps.
/// A burst carries at most [`USB_BULK_MIDI_SIZE`] bytes (128 events) per
/// wakeup; this is a deliberate rate cap.
pub(crate) struct MidiOutPump {
    ring: Arc<dyn RingBuffer>,
    time: TimeFn,
    shared: Arc<Shared>,
    transport: Arc<dyn UsbTransport>,
}

impl MidiOutPump {
    pub fn new(
        ring: Arc<dyn RingBuffer>,
        time: TimeFn,
        shared: Arc<Shared>,
        transport: Arc<dyn UsbTransport>,
    ) -> Self {
        Self {
            ring,
            time,
            shared,
            transport,
        }
    }

    pub fn run(self) {
        let mut staging = [0u8; USB_BULK_MIDI_SIZE];
        let mut pos = 0;
        let mut diff = 0.0f64;
        let mut held: Option<MidiEvent> = None;
        let mut last_time = (self.time)();

        self.shared.set_midi_ready(true);
        loop {
            // Stage events that are already due; a held event from a
            // previous wakeup is due by construction once its gap slept out.
            while (held.is_some() || self.ring.read_space() >= MidiEvent::ENCODED_SIZE)
                && pos < USB_BULK_MIDI_SIZE
            {
                if pos == 0 {
                    staging.fill(0);
                    diff = 0.0;
                }

                let event = match held.take() {
                    Some(event) => event,
                    None => {
                        let mut raw = [0u8; MidiEvent::ENCODED_SIZE];
                        self.ring.read(&mut raw);
                        MidiEvent::decode(&raw)
                    }
                };

                if event.time > last_time {
                    diff = event.time - last_time;
                    last_time = event.time;
                    held = Some(event);
                    break;
                }

                staging[pos..pos + MIDI_EVENT_SIZE].copy_from_slice(&event.bytes);
                pos += MIDI_EVENT_SIZE;
            }

            if pos > 0 {
                trace!("p2o MIDI burst: {pos} bytes; gap {diff}");
                self.shared.set_midi_ready(false);
                match self.transport.write_midi(&staging) {
                    Ok(_) => {}
                    Err(err) if err.is_fatal() => {
                        error!("p2o: error on USB MIDI transfer: {err}");
                        self.shared.set_status(Status::Error);
                    }
                    Err(err) => error!("p2o: error on USB MIDI transfer: {err}"),
                }
                self.shared.set_midi_ready(true);
                pos = 0;
            }

            if diff > 0.0 {
                thread::sleep(Duration::from_secs_f64(diff));
            } else {
                thread::sleep(IDLE_SLEEP);
            }

            while !self.shared.midi_ready() {
                thread::sleep(IDLE_SLEEP);
            }

            if self.shared.status() <= Status::Stop {
                break;
            }
        }
    }
}
