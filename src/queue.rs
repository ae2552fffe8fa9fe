//! Dispatch queues toward the synth collaborator and the host loop
//!
//! Both queues are bounded lock-free ring buffers. Producer and consumer
//! halves sit behind mutexes; the consumer side always uses try_lock so a
//! synth running on an audio thread is never blocked. When a queue is
//! full the event is dropped with a debug log, which is the acceptable
//! failure mode for burst absorption.

use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use serde::Serialize;

use crate::events::{MidiEvent, MidiMessage};

/// Command of a [`SynthEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SynthCommand {
    NoteOn,
    NoteOff,
    KeyAfterTouch,
    ControlChange,
    PatchChange,
    ChannelAfterTouch,
    PitchBend,
}

/// Compact channel event handed to the synthesizer.
///
/// `value` holds the primary data byte (note number, controller number,
/// program, or the 14-bit pitch bend value); `velocity` holds the
/// secondary one (velocity, pressure, or controller value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SynthEvent {
    /// Absolute tick of the source event (unquantized)
    pub tick: u64,
    /// MIDI channel (0-15)
    pub channel: u8,
    pub command: SynthCommand,
    pub value: u16,
    pub velocity: u8,
}

impl SynthEvent {
    /// Convert a sequenced event. Meta events are sequencer-internal and
    /// yield `None`.
    pub fn from_event(event: &MidiEvent) -> Option<Self> {
        let (command, value, velocity) = match event.message {
            MidiMessage::NoteOn { key, velocity } => (SynthCommand::NoteOn, key as u16, velocity),
            MidiMessage::NoteOff { key, velocity } => (SynthCommand::NoteOff, key as u16, velocity),
            MidiMessage::KeyAfterTouch { key, pressure } => {
                (SynthCommand::KeyAfterTouch, key as u16, pressure)
            }
            MidiMessage::ControlChange { controller, value } => {
                (SynthCommand::ControlChange, controller as u16, value)
            }
            MidiMessage::PatchChange { program } => (SynthCommand::PatchChange, program as u16, 0),
            MidiMessage::ChannelAfterTouch { pressure } => {
                (SynthCommand::ChannelAfterTouch, pressure as u16, 0)
            }
            MidiMessage::PitchBend { value } => (SynthCommand::PitchBend, value, 0),
            MidiMessage::Meta(_) => return None,
        };
        Some(Self {
            tick: event.tick,
            channel: event.channel,
            command,
            value,
            velocity,
        })
    }
}

/// Why playback ended, reported with the end notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndReason {
    /// The last tick was reached without an explicit stop
    NaturalEnd,
    /// `stop()` was called
    ExplicitStop,
    /// `replay()` restarted the current file
    Replay,
    /// Loop policy restarted the current file
    Loop,
    /// `next()` moved to another catalog entry
    Next,
    /// `previous()` moved to another catalog entry
    Previous,
    /// The file failed to load at play time
    LoadError,
}

/// Lifecycle notification consumed by the host loop each step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlayerNotification {
    /// Playback started (also re-raised on each loop restart)
    Started { name: String },
    /// Playback ended
    Ended { name: String, reason: EndReason },
}

/// Bounded queue of [`SynthEvent`]s, the seam toward the synthesizer.
pub struct SynthEventQueue {
    producer: Mutex<ringbuf::HeapProd<SynthEvent>>,
    consumer: Mutex<ringbuf::HeapCons<SynthEvent>>,
    capacity: usize,
}

impl SynthEventQueue {
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = HeapRb::new(capacity).split();
        Self {
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
            capacity,
        }
    }

    /// Push an event. Returns false when the queue is full or contended;
    /// dropping is preferred over blocking.
    #[inline]
    pub fn push(&self, event: SynthEvent) -> bool {
        if let Some(mut producer) = self.producer.try_lock() {
            if producer.try_push(event).is_ok() {
                return true;
            }
            log::debug!("synth queue full (capacity {}), event dropped", self.capacity);
        }
        false
    }

    /// Drain pending events into a pre-allocated buffer without blocking.
    /// Returns the number of events drained; a held lock yields 0 and the
    /// events are picked up on the next call.
    #[inline]
    pub fn drain_into(&self, buffer: &mut Vec<SynthEvent>) -> usize {
        buffer.clear();
        if let Some(mut consumer) = self.consumer.try_lock() {
            while let Some(event) = consumer.try_pop() {
                buffer.push(event);
            }
        }
        buffer.len()
    }

    /// Pop a single event.
    #[inline]
    pub fn pop(&self) -> Option<SynthEvent> {
        self.consumer.try_lock()?.try_pop()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.consumer.try_lock().map(|c| c.is_empty()).unwrap_or(true)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.consumer.try_lock().map(|c| c.occupied_len()).unwrap_or(0)
    }
}

/// Bounded queue of [`PlayerNotification`]s for the host loop.
pub struct NotificationQueue {
    producer: Mutex<ringbuf::HeapProd<PlayerNotification>>,
    consumer: Mutex<ringbuf::HeapCons<PlayerNotification>>,
    capacity: usize,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = HeapRb::new(capacity).split();
        Self {
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
            capacity,
        }
    }

    #[inline]
    pub fn push(&self, notification: PlayerNotification) -> bool {
        if let Some(mut producer) = self.producer.try_lock() {
            if producer.try_push(notification).is_ok() {
                return true;
            }
            log::debug!(
                "notification queue full (capacity {}), notification dropped",
                self.capacity
            );
        }
        false
    }

    /// Drain pending notifications into a buffer. Non-blocking.
    #[inline]
    pub fn drain_into(&self, buffer: &mut Vec<PlayerNotification>) -> usize {
        buffer.clear();
        if let Some(mut consumer) = self.consumer.try_lock() {
            while let Some(notification) = consumer.try_pop() {
                buffer.push(notification);
            }
        }
        buffer.len()
    }

    #[inline]
    pub fn pop(&self) -> Option<PlayerNotification> {
        self.consumer.try_lock()?.try_pop()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.consumer.try_lock().map(|c| c.is_empty()).unwrap_or(true)
    }
}
