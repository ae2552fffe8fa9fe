//! Tempo map and tick/time conversion
//!
//! A tempo map is an ordered list of tempo changes over tick positions,
//! with at most one change per tick (the last one read wins). Conversion
//! walks tempo segments: within a segment,
//! `ms = tick_delta * microseconds_per_quarter / division / 1000`.
//! Cumulative millisecond anchors are cached per change so conversions in
//! both directions agree exactly at segment boundaries.

use serde::Serialize;

use crate::events::MidiEvent;

/// MIDI default tempo: 500 000 µs per quarter note, i.e. 120 BPM.
pub const DEFAULT_TEMPO: u32 = 500_000;

/// One tempo change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TempoChange {
    /// Tick position where this tempo takes effect
    pub tick: u64,
    /// Microseconds per quarter note
    pub microseconds_per_quarter: u32,
    /// Elapsed milliseconds at `tick`, from tick 0 through all prior segments
    pub time_ms: f64,
}

impl TempoChange {
    /// Tempo expressed as quarters per minute (BPM).
    #[inline]
    pub fn bpm(&self) -> f64 {
        60_000_000.0 / self.microseconds_per_quarter as f64
    }
}

/// Ordered tempo changes plus the file's time base.
#[derive(Debug, Clone)]
pub struct TempoMap {
    changes: Vec<TempoChange>,
    division: u16,
}

impl TempoMap {
    /// Build the map from every tempo meta event across all tracks.
    ///
    /// Changes are ordered by tick; when several tracks put a tempo at the
    /// same tick, the last one in file order is kept. A default 120 BPM
    /// entry is inserted at tick 0 when the file has none there.
    pub fn from_tracks(tracks: &[Vec<MidiEvent>], division: u16) -> Self {
        let mut raw: Vec<(u64, u32)> = Vec::new();
        for track in tracks {
            for event in track {
                if let Some(tempo) = event.tempo() {
                    if tempo == 0 {
                        log::warn!("tempo event with zero value at tick {}, using default", event.tick);
                        raw.push((event.tick, DEFAULT_TEMPO));
                    } else {
                        raw.push((event.tick, tempo));
                    }
                }
            }
        }
        raw.sort_by_key(|&(tick, _)| tick);

        let mut changes: Vec<TempoChange> = Vec::with_capacity(raw.len() + 1);
        if raw.first().map_or(true, |&(tick, _)| tick > 0) {
            changes.push(TempoChange {
                tick: 0,
                microseconds_per_quarter: DEFAULT_TEMPO,
                time_ms: 0.0,
            });
        }
        for (tick, tempo) in raw {
            if let Some(last) = changes.last_mut() {
                if last.tick == tick {
                    // Same tick: last one read wins.
                    last.microseconds_per_quarter = tempo;
                    continue;
                }
            }
            changes.push(TempoChange {
                tick,
                microseconds_per_quarter: tempo,
                time_ms: 0.0,
            });
        }

        let mut map = Self { changes, division };
        map.rebuild_anchors();
        map
    }

    fn rebuild_anchors(&mut self) {
        let division = self.division as f64;
        let mut elapsed = 0.0;
        let mut prev: Option<TempoChange> = None;
        for change in &mut self.changes {
            if let Some(p) = prev {
                let ms_per_tick = p.microseconds_per_quarter as f64 / division / 1000.0;
                elapsed += (change.tick - p.tick) as f64 * ms_per_tick;
            }
            change.time_ms = elapsed;
            prev = Some(*change);
        }
    }

    /// Milliseconds per tick under the given tempo (the pulse length).
    #[inline]
    fn ms_per_tick(&self, microseconds_per_quarter: u32) -> f64 {
        microseconds_per_quarter as f64 / self.division as f64 / 1000.0
    }

    /// Delta ticks per quarter note.
    #[inline]
    pub fn division(&self) -> u16 {
        self.division
    }

    /// All changes in tick order.
    pub fn changes(&self) -> &[TempoChange] {
        &self.changes
    }

    /// The change active at `tick` (the last one at or before it).
    pub fn change_at(&self, tick: u64) -> &TempoChange {
        let idx = self.changes.partition_point(|c| c.tick <= tick);
        // changes is never empty: tick 0 always has an entry
        &self.changes[idx.saturating_sub(1)]
    }

    /// Microseconds per quarter note active at `tick`.
    #[inline]
    pub fn tempo_at(&self, tick: u64) -> u32 {
        self.change_at(tick).microseconds_per_quarter
    }

    /// Convert an absolute tick position to elapsed milliseconds.
    pub fn tick_to_ms(&self, tick: u64) -> f64 {
        let change = self.change_at(tick);
        change.time_ms + (tick - change.tick) as f64 * self.ms_per_tick(change.microseconds_per_quarter)
    }

    /// Convert elapsed milliseconds back to the tick position.
    ///
    /// Inverse of [`tick_to_ms`](Self::tick_to_ms): exact at segment
    /// boundaries, within one tick elsewhere.
    pub fn ms_to_tick(&self, ms: f64) -> u64 {
        if ms <= 0.0 {
            return 0;
        }
        let idx = self.changes.partition_point(|c| c.time_ms <= ms);
        let change = &self.changes[idx.saturating_sub(1)];
        let ticks = (ms - change.time_ms) / self.ms_per_tick(change.microseconds_per_quarter);
        change.tick + ticks.round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MetaEvent, MidiMessage};

    fn tempo_event(track: u16, tick: u64, tempo: u32) -> MidiEvent {
        MidiEvent {
            tick,
            delta: 0,
            track,
            channel: 0,
            message: MidiMessage::Meta(MetaEvent::Tempo {
                microseconds_per_quarter: tempo,
            }),
        }
    }

    #[test]
    fn test_default_tempo_inserted() {
        let map = TempoMap::from_tracks(&[vec![]], 480);
        assert_eq!(map.changes().len(), 1);
        assert_eq!(map.tempo_at(0), DEFAULT_TEMPO);
        // 480 ticks = one quarter at 120 BPM = 500 ms
        assert!((map.tick_to_ms(480) - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_tempo_segments() {
        // 120 BPM for the first quarter, then 60 BPM.
        let tracks = vec![vec![
            tempo_event(0, 0, 500_000),
            tempo_event(0, 480, 1_000_000),
        ]];
        let map = TempoMap::from_tracks(&tracks, 480);

        assert!((map.tick_to_ms(480) - 500.0).abs() < 1e-9);
        // One more quarter at 60 BPM is a full second.
        assert!((map.tick_to_ms(960) - 1500.0).abs() < 1e-9);
        assert_eq!(map.tempo_at(479), 500_000);
        assert_eq!(map.tempo_at(480), 1_000_000);
    }

    #[test]
    fn test_round_trip_stability() {
        let tracks = vec![vec![
            tempo_event(0, 0, 640_917),
            tempo_event(0, 353, 480_331),
            tempo_event(0, 7919, 1_202_553),
        ]];
        let map = TempoMap::from_tracks(&tracks, 384);

        for tick in (0..20_000).step_by(7) {
            let back = map.ms_to_tick(map.tick_to_ms(tick));
            assert!(
                back.abs_diff(tick) <= 1,
                "tick {} round-tripped to {}",
                tick,
                back
            );
        }
        // Segment boundaries must be exact.
        for &tick in &[0u64, 353, 7919] {
            assert_eq!(map.ms_to_tick(map.tick_to_ms(tick)), tick);
        }
    }

    #[test]
    fn test_same_tick_last_wins() {
        let tracks = vec![
            vec![tempo_event(0, 100, 400_000)],
            vec![tempo_event(1, 100, 600_000)],
        ];
        let map = TempoMap::from_tracks(&tracks, 480);
        assert_eq!(map.tempo_at(100), 600_000);
        // Only the default at 0 plus one change at 100.
        assert_eq!(map.changes().len(), 2);
    }

    #[test]
    fn test_negative_time_clamps_to_zero() {
        let map = TempoMap::from_tracks(&[vec![]], 480);
        assert_eq!(map.ms_to_tick(-5.0), 0);
    }
}
