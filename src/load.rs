//! Parsed MIDI document
//!
//! [`MidiLoad`] owns the result of one file load: the merged tick-ordered
//! event stream, the tempo map, computed tick bounds and duration, and the
//! metadata strings captured from meta events. It is immutable once
//! built; playback state lives in the sequencer, which only references it.

use serde::Serialize;

use crate::events::{MetaEvent, MidiEvent, MidiMessage, TextKind};
use crate::parser::{self, ParseError};
use crate::timing::{TempoChange, TempoMap};

/// Load-time options.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Keep note-off events in the playback stream. Default true.
    pub keep_note_off: bool,
    /// Keep end-of-track meta events; when kept they count toward the
    /// last tick and duration. Default false.
    pub keep_end_track: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            keep_note_off: true,
            keep_end_track: false,
        }
    }
}

/// Per-track summary.
#[derive(Debug, Clone, Serialize)]
pub struct TrackInfo {
    /// Track index (0-based)
    pub index: u16,
    /// Track name from the sequence-name meta event, if present
    pub name: Option<String>,
    /// Number of events kept from this track
    pub event_count: usize,
    /// Number of sounding note-on events
    pub note_count: usize,
    /// Channel used by the track's channel events, if consistent
    pub channel: Option<u8>,
}

/// Caller-facing summary of a loaded file.
#[derive(Debug, Clone, Serialize)]
pub struct MidiInfo {
    pub division: u16,
    pub format: u16,
    pub track_count: u16,
    /// Tempo at tick 0, in BPM
    pub initial_bpm: f64,
    pub duration_ms: f64,
    pub last_tick: u64,
    pub first_note_tick: Option<u64>,
    pub last_note_tick: Option<u64>,
    pub tempo_changes: Vec<TempoChange>,
    pub tracks: Vec<TrackInfo>,
    pub sequence_name: String,
    pub instrument_name: String,
    pub program_name: String,
    pub copyright: String,
    pub text: String,
}

/// A parsed MIDI document, ready for sequencing.
#[derive(Debug)]
pub struct MidiLoad {
    events: Vec<MidiEvent>,
    tempo_map: TempoMap,
    format: u16,
    track_count: u16,
    tracks: Vec<TrackInfo>,
    last_tick: u64,
    first_note_tick: Option<u64>,
    last_note_tick: Option<u64>,
    duration_ms: f64,
    sequence_name: String,
    instrument_name: String,
    program_name: String,
    copyright: String,
    text: String,
}

impl MidiLoad {
    /// Parse a raw SMF byte buffer with default options.
    pub fn load(data: &[u8]) -> Result<Self, ParseError> {
        Self::load_with(data, LoadOptions::default())
    }

    /// Parse a raw SMF byte buffer.
    pub fn load_with(data: &[u8], options: LoadOptions) -> Result<Self, ParseError> {
        let parsed = parser::parse(data)?;
        let tempo_map = TempoMap::from_tracks(&parsed.tracks, parsed.division);

        let mut sequence_name = String::new();
        let mut instrument_name = String::new();
        let mut program_name = String::new();
        let mut copyright = String::new();
        let mut text = String::new();

        let mut tracks = Vec::with_capacity(parsed.tracks.len());
        let mut events: Vec<MidiEvent> = Vec::new();
        let mut first_note_tick: Option<u64> = None;
        let mut last_note_tick: Option<u64> = None;

        for (index, track) in parsed.tracks.iter().enumerate() {
            let mut info = TrackInfo {
                index: index as u16,
                name: None,
                event_count: 0,
                note_count: 0,
                channel: None,
            };
            let mut mixed_channels = false;

            for event in track {
                if let MidiMessage::Meta(MetaEvent::Text { kind, text: value }) = &event.message {
                    let slot = match kind {
                        TextKind::SequenceName => {
                            if info.name.is_none() {
                                info.name = Some(value.clone());
                            }
                            &mut sequence_name
                        }
                        TextKind::InstrumentName => &mut instrument_name,
                        TextKind::ProgramName => &mut program_name,
                        TextKind::Copyright => &mut copyright,
                        TextKind::Text => &mut text,
                        _ => continue,
                    };
                    if slot.is_empty() {
                        *slot = value.clone();
                    }
                    continue;
                }

                if event.is_meta() {
                    if matches!(event.message, MidiMessage::Meta(MetaEvent::EndOfTrack))
                        && !options.keep_end_track
                    {
                        continue;
                    }
                } else {
                    if event.is_note_off() && !options.keep_note_off {
                        continue;
                    }
                    match info.channel {
                        None if !mixed_channels => info.channel = Some(event.channel),
                        Some(ch) if ch != event.channel => {
                            info.channel = None;
                            mixed_channels = true;
                        }
                        _ => {}
                    }
                }

                if event.is_note_on() {
                    info.note_count += 1;
                    first_note_tick = Some(first_note_tick.map_or(event.tick, |t| t.min(event.tick)));
                    last_note_tick = Some(last_note_tick.map_or(event.tick, |t| t.max(event.tick)));
                }

                info.event_count += 1;
                events.push(event.clone());
            }

            tracks.push(info);
        }

        // Merge to playback order. Tracks were appended in file order, so
        // a stable sort on tick keeps the track tie-break for equal ticks.
        events.sort_by_key(|e| e.tick);

        let last_tick = events.last().map_or(0, |e| e.tick);
        let duration_ms = tempo_map.tick_to_ms(last_tick);

        log::info!(
            "loaded MIDI: {} tracks, {} events, last tick {}, {:.0} ms",
            parsed.tracks.len(),
            events.len(),
            last_tick,
            duration_ms
        );

        Ok(Self {
            events,
            tempo_map,
            format: parsed.format,
            track_count: parsed.tracks.len() as u16,
            tracks,
            last_tick,
            first_note_tick,
            last_note_tick,
            duration_ms,
            sequence_name,
            instrument_name,
            program_name,
            copyright,
            text,
        })
    }

    /// The merged event stream in playback order.
    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    /// Copy of the events with tick in `[from, to]`, for callers that want
    /// to inspect a slice of the file outside playback.
    pub fn read_events(&self, from: u64, to: u64) -> Vec<MidiEvent> {
        let start = self.events.partition_point(|e| e.tick < from);
        let end = self.events.partition_point(|e| e.tick <= to);
        self.events[start..end].to_vec()
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo_map
    }

    /// Delta ticks per quarter note.
    #[inline]
    pub fn division(&self) -> u16 {
        self.tempo_map.division()
    }

    #[inline]
    pub fn track_count(&self) -> u16 {
        self.track_count
    }

    /// Tick of the last event kept in the stream.
    #[inline]
    pub fn last_tick(&self) -> u64 {
        self.last_tick
    }

    /// Tick of the first sounding note-on, if the file has any.
    #[inline]
    pub fn first_note_tick(&self) -> Option<u64> {
        self.first_note_tick
    }

    /// Tick of the last sounding note-on, if the file has any.
    #[inline]
    pub fn last_note_tick(&self) -> Option<u64> {
        self.last_note_tick
    }

    /// Nominal duration in milliseconds, tempo map applied, speed ignored.
    #[inline]
    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    pub fn sequence_name(&self) -> &str {
        &self.sequence_name
    }

    pub fn instrument_name(&self) -> &str {
        &self.instrument_name
    }

    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    pub fn copyright(&self) -> &str {
        &self.copyright
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Serializable summary.
    pub fn info(&self) -> MidiInfo {
        MidiInfo {
            division: self.division(),
            format: self.format,
            track_count: self.track_count,
            initial_bpm: 60_000_000.0 / self.tempo_map.tempo_at(0) as f64,
            duration_ms: self.duration_ms,
            last_tick: self.last_tick,
            first_note_tick: self.first_note_tick,
            last_note_tick: self.last_note_tick,
            tempo_changes: self.tempo_map.changes().to_vec(),
            tracks: self.tracks.clone(),
            sequence_name: self.sequence_name.clone(),
            instrument_name: self.instrument_name.clone(),
            program_name: self.program_name.clone(),
            copyright: self.copyright.clone(),
            text: self.text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{SmfBuilder, TrackWriter};

    fn two_track_file() -> Vec<u8> {
        let mut t0 = TrackWriter::new();
        t0.text(0, TextKind::SequenceName, "Fixture")
            .tempo(0, 500_000)
            .note_on(100, 0, 60, 100)
            .note_off(380, 0, 60, 0);
        let mut t1 = TrackWriter::new();
        t1.note_on(100, 1, 64, 90).note_off(400, 1, 64, 0);

        let mut builder = SmfBuilder::new(480);
        builder.add_track(t0).add_track(t1);
        builder.to_bytes()
    }

    #[test]
    fn test_load_two_tracks() {
        let load = MidiLoad::load(&two_track_file()).unwrap();
        assert_eq!(load.track_count(), 2);
        assert_eq!(load.first_note_tick(), Some(100));
        assert_eq!(load.last_note_tick(), Some(100));
        assert_eq!(load.last_tick(), 500);
        assert_eq!(load.sequence_name(), "Fixture");
        assert_eq!(load.tracks[0].channel, Some(0));
        assert_eq!(load.tracks[1].channel, Some(1));
    }

    #[test]
    fn test_equal_tick_preserves_track_order() {
        let load = MidiLoad::load(&two_track_file()).unwrap();
        // Both note-ons land on tick 100: track 0 must come first.
        let batch = load.read_events(100, 100);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].track, 0);
        assert_eq!(batch[1].track, 1);
    }

    #[test]
    fn test_read_events_inclusive() {
        let load = MidiLoad::load(&two_track_file()).unwrap();
        let events = load.read_events(100, 480);
        assert!(events.iter().all(|e| e.tick >= 100 && e.tick <= 480));
        assert_eq!(events.iter().filter(|e| e.is_note_on()).count(), 2);
    }

    #[test]
    fn test_duration_follows_tempo_map() {
        let load = MidiLoad::load(&two_track_file()).unwrap();
        // 500 ticks at 120 BPM with division 480.
        let expected = 500.0 * 500_000.0 / 480.0 / 1000.0;
        assert!((load.duration_ms() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_keep_note_off_filter() {
        let options = LoadOptions {
            keep_note_off: false,
            ..LoadOptions::default()
        };
        let load = MidiLoad::load_with(&two_track_file(), options).unwrap();
        assert!(load.events().iter().all(|e| !e.is_note_off()));
        // Note-ons are untouched.
        assert_eq!(load.events().iter().filter(|e| e.is_note_on()).count(), 2);
    }

    #[test]
    fn test_keep_end_track_extends_last_tick() {
        let mut t0 = TrackWriter::new();
        t0.note_on(0, 0, 60, 100).note_off(480, 0, 60, 0).raw_meta(480, 0x7F, &[]);
        let mut builder = SmfBuilder::new(480);
        builder.add_track(t0);
        let data = builder.to_bytes();

        let without = MidiLoad::load(&data).unwrap();
        assert_eq!(without.last_tick(), 960);

        let with = MidiLoad::load_with(
            &data,
            LoadOptions {
                keep_end_track: true,
                ..LoadOptions::default()
            },
        )
        .unwrap();
        // End of track sits at the same tick as the last event here, but
        // it is now part of the stream.
        assert!(with
            .events()
            .iter()
            .any(|e| e.message == MidiMessage::Meta(MetaEvent::EndOfTrack)));
    }

    #[test]
    fn test_corrupt_file_yields_no_document() {
        let result = MidiLoad::load(b"MThd\x00\x00\x00\x06\x00\x00");
        assert!(result.is_err());
    }
}
