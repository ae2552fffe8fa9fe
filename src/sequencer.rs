//! Stepped playback sequencer
//!
//! The sequencer is not a thread: the host calls [`Sequencer::step`] once
//! per frame with the wall-clock time elapsed since the previous call.
//! Each step advances a virtual playback-time accumulator by the elapsed
//! time scaled by the speed factor, converts it to a tick boundary, and
//! returns the batch of not-yet-delivered events with tick at or below
//! that boundary, in stream order. Pause and seek take effect on the
//! next step.

use crate::events::MidiEvent;
use crate::load::MidiLoad;

/// Sequencer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// No document attached
    Idle,
    /// A load is in progress
    Loading,
    /// Document attached, playback not started
    Ready,
    Playing,
    Paused,
    /// The last tick was reached or playback was stopped
    Ended,
}

/// Playback cursor over a [`MidiLoad`].
///
/// References the document, never owns it. The cursor, accumulator,
/// speed and quantization are the mutable session layered on top of the
/// immutable parse result.
#[derive(Debug)]
pub struct Sequencer {
    state: SequencerState,
    /// Index of the next undelivered event in the merged stream
    cursor: usize,
    current_tick: u64,
    /// Virtual playback time in milliseconds, advanced by
    /// `wall_dt * speed` each step
    elapsed_ms: f64,
    speed: f64,
    /// 0 = off, 1..=6 = quarter..128th note grid
    quantization: u8,
    /// Session tempo override (microseconds per quarter note), anchored
    /// at the position where it was set
    tempo_override: Option<TempoAnchor>,
}

#[derive(Debug, Clone, Copy)]
struct TempoAnchor {
    microseconds_per_quarter: u32,
    tick: u64,
    elapsed_ms: f64,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequencer {
    pub fn new() -> Self {
        Self {
            state: SequencerState::Idle,
            cursor: 0,
            current_tick: 0,
            elapsed_ms: 0.0,
            speed: 1.0,
            quantization: 0,
            tempo_override: None,
        }
    }

    #[inline]
    pub fn state(&self) -> SequencerState {
        self.state
    }

    #[inline]
    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    #[inline]
    pub fn speed(&self) -> f64 {
        self.speed
    }

    #[inline]
    pub fn quantization(&self) -> u8 {
        self.quantization
    }

    /// Mark a load in progress (Idle/Ended -> Loading).
    pub fn begin_load(&mut self) {
        self.state = SequencerState::Loading;
    }

    /// Loading failed: fall back to Idle with no session state kept.
    pub fn load_failed(&mut self) {
        *self = Self {
            speed: self.speed,
            quantization: self.quantization,
            ..Self::new()
        };
    }

    /// Loading succeeded (Loading -> Ready).
    pub fn ready(&mut self) {
        self.cursor = 0;
        self.current_tick = 0;
        self.elapsed_ms = 0.0;
        self.tempo_override = None;
        self.state = SequencerState::Ready;
    }

    /// Begin playing from `from_tick` (Ready/Ended -> Playing).
    pub fn start(&mut self, load: &MidiLoad, from_tick: u64) {
        self.state = SequencerState::Playing;
        self.tempo_override = None;
        self.seek(load, from_tick);
    }

    pub fn pause(&mut self) {
        if self.state == SequencerState::Playing {
            self.state = SequencerState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == SequencerState::Paused {
            self.state = SequencerState::Playing;
        }
    }

    /// Halt: no batch is produced by any later step until restarted.
    pub fn halt(&mut self) {
        self.state = SequencerState::Ended;
    }

    /// Set the playback speed factor. The caller validates the range.
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
    }

    /// Set the quantization level. The caller validates the range.
    pub fn set_quantization(&mut self, level: u8) {
        self.quantization = level;
    }

    /// Override the session tempo from the current position onward.
    ///
    /// Changes the subsequent tick/time slope only: stored event ticks,
    /// the tempo map and the nominal duration are untouched.
    pub fn set_tempo(&mut self, microseconds_per_quarter: u32) {
        self.tempo_override = Some(TempoAnchor {
            microseconds_per_quarter,
            tick: self.current_tick,
            elapsed_ms: self.elapsed_ms,
        });
    }

    /// Session tempo at the current position, in µs per quarter note.
    pub fn tempo(&self, load: &MidiLoad) -> u32 {
        match self.tempo_override {
            Some(anchor) => anchor.microseconds_per_quarter,
            None => load.tempo_map().tempo_at(self.current_tick),
        }
    }

    /// Move the cursor to `tick` (clamped to the document). Skipped
    /// events are never delivered; events exactly at the target tick
    /// will play on the next step. The accumulator is re-anchored so
    /// scheduling resumes from the new position.
    pub fn seek(&mut self, load: &MidiLoad, tick: u64) {
        let tick = tick.min(load.last_tick());
        self.cursor = load.events().partition_point(|e| e.tick < tick);
        self.current_tick = tick;
        self.elapsed_ms = load.tempo_map().tick_to_ms(tick);
        if let Some(anchor) = &mut self.tempo_override {
            anchor.tick = tick;
            anchor.elapsed_ms = self.elapsed_ms;
        }
    }

    /// Advance the clock by `wall_dt_ms` of real time and gather the due
    /// batch. Equal-tick events keep their stream order (track order for
    /// events from different tracks).
    pub fn step<'a>(&mut self, load: &'a MidiLoad, wall_dt_ms: f64) -> &'a [MidiEvent] {
        if self.state != SequencerState::Playing {
            return &[];
        }

        self.elapsed_ms += wall_dt_ms.max(0.0) * self.speed;
        let new_tick = self.tick_for_elapsed(load).min(load.last_tick());

        let events = load.events();
        let start = self.cursor;
        while self.cursor < events.len() && events[self.cursor].tick <= new_tick {
            self.cursor += 1;
        }
        self.current_tick = new_tick;

        if new_tick >= load.last_tick() {
            self.state = SequencerState::Ended;
        }
        &events[start..self.cursor]
    }

    fn tick_for_elapsed(&self, load: &MidiLoad) -> u64 {
        match self.tempo_override {
            Some(anchor) => {
                let ms_per_tick = anchor.microseconds_per_quarter as f64
                    / load.division() as f64
                    / 1000.0;
                let delta = (self.elapsed_ms - anchor.elapsed_ms) / ms_per_tick;
                anchor.tick + delta.round().max(0.0) as u64
            }
            None => load.tempo_map().ms_to_tick(self.elapsed_ms),
        }
    }

    /// Snap a tick to the quantization grid for reporting. With level 0,
    /// or a tick already on a boundary, the tick is returned unchanged.
    /// Stored event ticks are never altered.
    pub fn quantized_tick(&self, load: &MidiLoad, tick: u64) -> u64 {
        if self.quantization == 0 {
            return tick;
        }
        // level 1 = quarter note grid, each further level halves it
        let grid = (load.division() as u64 >> (self.quantization - 1)).max(1);
        let snapped = (tick + grid / 2) / grid * grid;
        snapped.min(load.last_tick())
    }

    /// Position of the cursor in milliseconds along the nominal timeline.
    pub fn position_ms(&self, load: &MidiLoad) -> f64 {
        load.tempo_map().tick_to_ms(self.current_tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TextKind;
    use crate::writer::{SmfBuilder, TrackWriter};

    /// 480 division, 120 BPM, a note-on every quarter for 4 quarters
    /// starting at tick 480. Last tick is 2400.
    fn quarters_file() -> MidiLoad {
        let mut track = TrackWriter::new();
        track.text(0, TextKind::SequenceName, "quarters").tempo(0, 500_000);
        for i in 0..4 {
            track.note_on(if i == 0 { 480 } else { 0 }, 0, 60 + i, 100);
            track.note_off(480, 0, 60 + i, 0);
        }
        let mut builder = SmfBuilder::new(480);
        builder.add_track(track);
        MidiLoad::load(&builder.to_bytes()).unwrap()
    }

    fn playing(load: &MidiLoad) -> Sequencer {
        let mut seq = Sequencer::new();
        seq.begin_load();
        seq.ready();
        seq.start(load, 0);
        seq
    }

    #[test]
    fn test_state_transitions() {
        let load = quarters_file();
        let mut seq = Sequencer::new();
        assert_eq!(seq.state(), SequencerState::Idle);
        seq.begin_load();
        assert_eq!(seq.state(), SequencerState::Loading);
        seq.ready();
        assert_eq!(seq.state(), SequencerState::Ready);
        seq.start(&load, 0);
        assert_eq!(seq.state(), SequencerState::Playing);
        seq.pause();
        assert_eq!(seq.state(), SequencerState::Paused);
        seq.resume();
        assert_eq!(seq.state(), SequencerState::Playing);
        seq.halt();
        assert_eq!(seq.state(), SequencerState::Ended);
    }

    #[test]
    fn test_load_failed_resets_session() {
        let mut seq = Sequencer::new();
        seq.set_speed(2.0);
        seq.begin_load();
        seq.load_failed();
        assert_eq!(seq.state(), SequencerState::Idle);
        assert_eq!(seq.current_tick(), 0);
        // Settings survive a failed load.
        assert_eq!(seq.speed(), 2.0);
    }

    #[test]
    fn test_step_delivers_due_events_once() {
        let load = quarters_file();
        let mut seq = playing(&load);

        // 500 ms at 120 BPM covers exactly the first quarter.
        let batch = seq.step(&load, 500.0);
        // Tick-0 events (the tempo) are part of the first batch.
        assert_eq!(batch[0].tick, 0);
        assert_eq!(batch.iter().filter(|e| e.is_note_on()).count(), 1);
        assert_eq!(seq.current_tick(), 480);

        // Nothing at or before tick 480 is delivered again.
        let batch = seq.step(&load, 500.0);
        assert!(batch.iter().all(|e| e.tick > 480));
    }

    #[test]
    fn test_speed_scales_tick_advance() {
        let load = quarters_file();
        let mut seq = playing(&load);
        seq.set_speed(2.0);
        seq.step(&load, 250.0);
        // 250 ms of wall clock at double speed is one quarter.
        assert_eq!(seq.current_tick(), 480);
    }

    #[test]
    fn test_paused_step_produces_nothing() {
        let load = quarters_file();
        let mut seq = playing(&load);
        seq.pause();
        assert!(seq.step(&load, 1000.0).is_empty());
        assert_eq!(seq.current_tick(), 0);
    }

    #[test]
    fn test_seek_skips_without_replaying() {
        let load = quarters_file();
        let mut seq = playing(&load);
        seq.seek(&load, 960);
        let batch = seq.step(&load, 500.0);
        // Events before the seek target are skipped for good; events at
        // the target itself play.
        assert!(batch.iter().all(|e| e.tick >= 960));
        assert!(batch.iter().any(|e| e.tick == 960));
        assert_eq!(seq.current_tick(), 1440);
    }

    #[test]
    fn test_seek_clamps_to_last_tick() {
        let load = quarters_file();
        let mut seq = playing(&load);
        seq.seek(&load, u64::MAX);
        assert_eq!(seq.current_tick(), load.last_tick());
    }

    #[test]
    fn test_reaching_last_tick_ends() {
        let load = quarters_file();
        let mut seq = playing(&load);
        let batch = seq.step(&load, 60_000.0);
        assert!(!batch.is_empty());
        assert_eq!(seq.state(), SequencerState::Ended);
        assert_eq!(seq.current_tick(), load.last_tick());
    }

    #[test]
    fn test_tempo_override_changes_slope_only() {
        let load = quarters_file();
        let duration_before = load.duration_ms();
        let mut seq = playing(&load);

        // Half tempo: a quarter now takes a second.
        seq.set_tempo(1_000_000);
        seq.step(&load, 500.0);
        assert_eq!(seq.current_tick(), 240);

        assert_eq!(load.duration_ms(), duration_before);
        assert_eq!(load.tempo_map().tempo_at(0), 500_000);
    }

    #[test]
    fn test_quantized_tick_informational() {
        let load = quarters_file();
        let mut seq = playing(&load);

        seq.set_quantization(1); // quarter grid = 480 ticks
        assert_eq!(seq.quantized_tick(&load, 480), 480); // on boundary: unchanged
        assert_eq!(seq.quantized_tick(&load, 700), 480); // nearest below
        assert_eq!(seq.quantized_tick(&load, 721), 960); // nearest above

        seq.set_quantization(3); // 16th grid = 120 ticks
        assert_eq!(seq.quantized_tick(&load, 130), 120);

        seq.set_quantization(0);
        assert_eq!(seq.quantized_tick(&load, 700), 700);
    }
}
