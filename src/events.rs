//! MIDI event data model
//!
//! Events are produced by the parser and are immutable afterwards: the
//! sequencer and player only ever read them. Within a track, `tick` is
//! non-decreasing.

use serde::Serialize;

/// Channel-voice or meta message carried by a [`MidiEvent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MidiMessage {
    /// Note on (velocity 0 is treated as a note off by convention)
    NoteOn {
        /// MIDI note number (0-127)
        key: u8,
        /// Velocity (0-127)
        velocity: u8,
    },
    /// Note off
    NoteOff {
        /// MIDI note number (0-127)
        key: u8,
        /// Release velocity (0-127, often ignored)
        velocity: u8,
    },
    /// Polyphonic key pressure
    KeyAfterTouch {
        /// MIDI note number (0-127)
        key: u8,
        /// Pressure (0-127)
        pressure: u8,
    },
    /// Control change (CC)
    ControlChange {
        /// Controller number (0-127)
        controller: u8,
        /// Controller value (0-127)
        value: u8,
    },
    /// Program (patch) change
    PatchChange {
        /// Program number (0-127)
        program: u8,
    },
    /// Channel pressure
    ChannelAfterTouch {
        /// Pressure (0-127)
        pressure: u8,
    },
    /// Pitch bend
    PitchBend {
        /// 14-bit value (0-16383, center at 8192)
        value: u16,
    },
    /// Meta event (tempo, text, end of track, ...)
    Meta(MetaEvent),
}

/// Kinds of text-carrying meta events (FF 01..FF 08).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextKind {
    Text,
    Copyright,
    SequenceName,
    InstrumentName,
    Lyric,
    Marker,
    CuePoint,
    ProgramName,
}

/// Decoded meta event.
///
/// Fixed-length meta events (tempo, SMPTE offset, time signature) are
/// validated and decoded; text events are decoded as UTF-8 with lossy
/// fallback; every other type is captured raw without interpretation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MetaEvent {
    /// Set tempo (FF 51), microseconds per quarter note
    Tempo {
        microseconds_per_quarter: u32,
    },
    /// Time signature (FF 58)
    TimeSignature {
        numerator: u8,
        /// Denominator as a power of two (2 = quarter, 3 = eighth)
        denominator: u8,
        /// MIDI clocks per metronome click
        clocks_per_click: u8,
        /// Number of notated 32nd notes per quarter note
        thirty_seconds_per_quarter: u8,
    },
    /// SMPTE offset (FF 54), always 5 data bytes
    SmpteOffset {
        hours: u8,
        minutes: u8,
        seconds: u8,
        frames: u8,
        /// 100ths of a frame
        sub_frames: u8,
    },
    /// End of track (FF 2F)
    EndOfTrack,
    /// Text-carrying event (FF 01..FF 08)
    Text {
        kind: TextKind,
        text: String,
    },
    /// Any meta type not interpreted above, payload kept as-is
    Raw {
        /// Meta type byte
        kind: u8,
        data: Vec<u8>,
    },
}

/// One decoded event from a MIDI file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MidiEvent {
    /// Absolute position in ticks from the start of the file
    pub tick: u64,
    /// Delta ticks relative to the previous event in the same track
    pub delta: u32,
    /// Index of the track this event was read from (0-based)
    pub track: u16,
    /// MIDI channel (0-15, 0 for meta events)
    pub channel: u8,
    /// Decoded message
    pub message: MidiMessage,
}

impl MidiEvent {
    /// True for a note on with non-zero velocity.
    ///
    /// Note on with velocity 0 is the running-status idiom for note off
    /// and is not counted as a sounding note.
    #[inline]
    pub fn is_note_on(&self) -> bool {
        matches!(self.message, MidiMessage::NoteOn { velocity, .. } if velocity > 0)
    }

    /// True for a note off, or a note on with velocity 0.
    #[inline]
    pub fn is_note_off(&self) -> bool {
        match self.message {
            MidiMessage::NoteOff { .. } => true,
            MidiMessage::NoteOn { velocity, .. } => velocity == 0,
            _ => false,
        }
    }

    /// True for any meta event.
    #[inline]
    pub fn is_meta(&self) -> bool {
        matches!(self.message, MidiMessage::Meta(_))
    }

    /// Tempo in microseconds per quarter note, if this is a tempo event.
    #[inline]
    pub fn tempo(&self) -> Option<u32> {
        match self.message {
            MidiMessage::Meta(MetaEvent::Tempo { microseconds_per_quarter }) => {
                Some(microseconds_per_quarter)
            }
            _ => None,
        }
    }
}
