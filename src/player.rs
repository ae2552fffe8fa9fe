//! MIDI file playback controller
//!
//! [`MidiFilePlayer`] owns a [`MidiCatalog`], at most one loaded document
//! and its sequencer session, and the queues toward the synth and the
//! host. It is driven cooperatively: the host calls
//! [`MidiFilePlayer::step`] once per frame with the elapsed wall-clock
//! time, and drains the synth/notification queues in the same loop.
//!
//! Control operations validate their input and return an error kind on
//! rejection; ongoing playback is never affected by a rejected call.

use std::sync::Arc;

use crate::catalog::MidiCatalog;
use crate::events::MidiEvent;
use crate::load::{LoadOptions, MidiInfo, MidiLoad};
use crate::parser::ParseError;
use crate::queue::{
    EndReason, NotificationQueue, PlayerNotification, SynthEvent, SynthEventQueue,
};
use crate::sequencer::{Sequencer, SequencerState};

/// Speed factor bounds, inclusive.
pub const SPEED_RANGE: (f64, f64) = (0.1, 10.0);
/// Highest quantization level (128th note grid).
pub const MAX_QUANTIZATION: u8 = 6;

const SYNTH_QUEUE_CAPACITY: usize = 1024;
const NOTIFICATION_QUEUE_CAPACITY: usize = 64;

/// Controller error. Parse and resource errors abort a load; parameter
/// errors reject the single call and leave prior state intact.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("MIDI '{0}' not found in the catalog")]
    ResourceMissing(String),
    #[error("no MIDI selected and the catalog is empty")]
    NothingToPlay,
    #[error("no MIDI loaded")]
    NoMidiLoaded,
    #[error("invalid {param}: {value}")]
    InvalidParameter { param: &'static str, value: f64 },
}

/// Tick-accurate MIDI file player.
pub struct MidiFilePlayer {
    catalog: MidiCatalog,
    midi_name: String,
    load: Option<MidiLoad>,
    sequencer: Sequencer,
    load_options: LoadOptions,
    speed: f64,
    quantization: u8,
    loop_enabled: bool,
    start_at_first_note: bool,
    channel_enabled: [bool; 16],
    /// Wall-clock milliseconds left on a timed pause
    pause_remaining_ms: Option<f64>,
    synth_queue: Arc<SynthEventQueue>,
    notifications: Arc<NotificationQueue>,
}

impl MidiFilePlayer {
    /// Create a player over the given catalog.
    pub fn new(catalog: MidiCatalog) -> Self {
        Self {
            catalog,
            midi_name: String::new(),
            load: None,
            sequencer: Sequencer::new(),
            load_options: LoadOptions::default(),
            speed: 1.0,
            quantization: 0,
            loop_enabled: false,
            start_at_first_note: false,
            channel_enabled: [true; 16],
            pause_remaining_ms: None,
            synth_queue: Arc::new(SynthEventQueue::new(SYNTH_QUEUE_CAPACITY)),
            notifications: Arc::new(NotificationQueue::new(NOTIFICATION_QUEUE_CAPACITY)),
        }
    }

    /// Queue of channel events toward the synth collaborator.
    pub fn synth_queue(&self) -> Arc<SynthEventQueue> {
        Arc::clone(&self.synth_queue)
    }

    /// Queue of lifecycle notifications for the host loop.
    pub fn notifications(&self) -> Arc<NotificationQueue> {
        Arc::clone(&self.notifications)
    }

    pub fn catalog(&self) -> &MidiCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut MidiCatalog {
        &mut self.catalog
    }

    /// Select the MIDI to play by catalog name. Takes effect at the next
    /// (re)start, not mid-playback.
    pub fn set_midi_name(&mut self, name: impl Into<String>) -> Result<(), PlayerError> {
        let name = name.into();
        if self.catalog.get(&name).is_none() {
            log::warn!("MIDI '{}' not found in the catalog", name);
            return Err(PlayerError::ResourceMissing(name));
        }
        self.midi_name = name;
        Ok(())
    }

    /// Select the MIDI to play by catalog index.
    pub fn set_midi_index(&mut self, index: usize) -> Result<(), PlayerError> {
        match self.catalog.name_at(index) {
            Some(name) => {
                self.midi_name = name.to_string();
                Ok(())
            }
            None => {
                log::warn!("catalog index {} out of range", index);
                Err(PlayerError::InvalidParameter {
                    param: "midi index",
                    value: index as f64,
                })
            }
        }
    }

    pub fn midi_name(&self) -> &str {
        &self.midi_name
    }

    /// Start playing the selected MIDI.
    ///
    /// Idempotent when already playing; resumes when paused. A load
    /// failure is non-fatal: the player stays Idle, nothing partial is
    /// kept, and an `Ended(LoadError)` notification is raised.
    pub fn play(&mut self) -> Result<(), PlayerError> {
        match self.sequencer.state() {
            SequencerState::Paused => {
                self.unpause();
                return Ok(());
            }
            SequencerState::Playing => return Ok(()),
            _ => {}
        }

        let name = if self.midi_name.is_empty() {
            // No explicit selection: fall back to the first catalog entry.
            self.catalog
                .name_at(0)
                .map(str::to_string)
                .ok_or(PlayerError::NothingToPlay)?
        } else {
            self.midi_name.clone()
        };
        self.begin(name, None)
    }

    /// Stop playing. No further event batches are produced once the stop
    /// is observed; flushing of already-dispatched events is the synth
    /// collaborator's concern.
    pub fn stop(&mut self) {
        self.end_session(EndReason::ExplicitStop);
    }

    /// Restart the current MIDI from the beginning.
    pub fn replay(&mut self) -> Result<(), PlayerError> {
        match self.sequencer.state() {
            SequencerState::Playing | SequencerState::Paused | SequencerState::Ended
                if self.load.is_some() =>
            {
                self.restart_session(EndReason::Replay)
            }
            _ => self.play(),
        }
    }

    /// Play the next catalog entry, wrapping at the end of the catalog.
    pub fn next(&mut self) -> Result<(), PlayerError> {
        self.navigate(EndReason::Next)
    }

    /// Play the previous catalog entry, wrapping at the start.
    pub fn previous(&mut self) -> Result<(), PlayerError> {
        self.navigate(EndReason::Previous)
    }

    /// Suspend tick advancement. With a duration, playback resumes by
    /// itself once that much wall-clock time has passed through
    /// [`step`](Self::step); without one, it stays paused until
    /// [`unpause`](Self::unpause) or [`play`](Self::play).
    pub fn pause(&mut self, duration_ms: Option<f64>) {
        if self.sequencer.state() != SequencerState::Playing {
            return;
        }
        self.pause_remaining_ms = duration_ms.filter(|d| *d > 0.0);
        self.sequencer.pause();
        log::info!("paused '{}' ({:?} ms)", self.midi_name, self.pause_remaining_ms);
    }

    pub fn unpause(&mut self) {
        self.pause_remaining_ms = None;
        self.sequencer.resume();
    }

    pub fn is_playing(&self) -> bool {
        self.sequencer.state() == SequencerState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.sequencer.state() == SequencerState::Paused
    }

    pub fn state(&self) -> SequencerState {
        self.sequencer.state()
    }

    /// Move the playback position to `tick`, clamped into the document.
    pub fn seek_tick(&mut self, tick: u64) -> Result<(), PlayerError> {
        let load = self.load.as_ref().ok_or(PlayerError::NoMidiLoaded)?;
        self.sequencer.seek(load, tick);
        Ok(())
    }

    /// Move the playback position to `ms` on the nominal timeline.
    pub fn seek_ms(&mut self, ms: f64) -> Result<(), PlayerError> {
        let load = self.load.as_ref().ok_or(PlayerError::NoMidiLoaded)?;
        let tick = load.tempo_map().ms_to_tick(ms);
        self.sequencer.seek(load, tick);
        Ok(())
    }

    /// Set the speed factor. Values outside [0.1, 10] are rejected and
    /// the prior speed is kept.
    pub fn set_speed(&mut self, speed: f64) -> Result<(), PlayerError> {
        if !(SPEED_RANGE.0..=SPEED_RANGE.1).contains(&speed) {
            log::warn!("speed {} out of range, keeping {}", speed, self.speed);
            return Err(PlayerError::InvalidParameter {
                param: "speed",
                value: speed,
            });
        }
        self.speed = speed;
        self.sequencer.set_speed(speed);
        Ok(())
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Set the quantization level: 0 = off, 1 = quarter .. 6 = 128th.
    /// Reporting only; stored event ticks are never altered.
    pub fn set_quantization(&mut self, level: u8) -> Result<(), PlayerError> {
        if level > MAX_QUANTIZATION {
            log::warn!("quantization level {} out of range", level);
            return Err(PlayerError::InvalidParameter {
                param: "quantization",
                value: level as f64,
            });
        }
        self.quantization = level;
        self.sequencer.set_quantization(level);
        Ok(())
    }

    pub fn quantization(&self) -> u8 {
        self.quantization
    }

    /// Override the session tempo in µs per quarter note. The tempo map
    /// and nominal duration are untouched.
    pub fn set_tempo(&mut self, microseconds_per_quarter: u32) -> Result<(), PlayerError> {
        if microseconds_per_quarter == 0 {
            return Err(PlayerError::InvalidParameter {
                param: "tempo",
                value: 0.0,
            });
        }
        if self.load.is_none() {
            return Err(PlayerError::NoMidiLoaded);
        }
        self.sequencer.set_tempo(microseconds_per_quarter);
        Ok(())
    }

    /// Current session tempo in BPM (0 when nothing is loaded).
    pub fn tempo_bpm(&self) -> f64 {
        match &self.load {
            Some(load) => 60_000_000.0 / self.sequencer.tempo(load) as f64,
            None => 0.0,
        }
    }

    /// Enable or mute one channel's events toward the synth.
    pub fn set_channel_enabled(&mut self, channel: u8, enabled: bool) -> Result<(), PlayerError> {
        if channel >= 16 {
            log::warn!("channel {} out of range", channel);
            return Err(PlayerError::InvalidParameter {
                param: "channel",
                value: channel as f64,
            });
        }
        self.channel_enabled[channel as usize] = enabled;
        Ok(())
    }

    /// Enable or mute every channel at once (the "-1 means all channels"
    /// convention of the caller API).
    pub fn set_all_channels_enabled(&mut self, enabled: bool) {
        self.channel_enabled = [enabled; 16];
    }

    pub fn channel_enabled(&self, channel: u8) -> bool {
        self.channel_enabled.get(channel as usize).copied().unwrap_or(false)
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    /// Start playback (and each loop restart) at the first note-on
    /// instead of tick 0. The reported duration is unaffected.
    pub fn set_start_at_first_note(&mut self, enabled: bool) {
        self.start_at_first_note = enabled;
    }

    /// Options applied to subsequent loads.
    pub fn set_load_options(&mut self, options: LoadOptions) {
        self.load_options = options;
    }

    /// Advance playback by `wall_dt_ms` of real time.
    ///
    /// Returns every event that became due this step, in stream order;
    /// channel events from enabled channels are additionally forwarded to
    /// the synth queue. Handles timed-pause expiry and the loop policy.
    pub fn step(&mut self, wall_dt_ms: f64) -> Vec<MidiEvent> {
        let mut dt = wall_dt_ms;
        if self.sequencer.state() == SequencerState::Paused {
            if let Some(remaining) = self.pause_remaining_ms {
                if remaining > wall_dt_ms {
                    self.pause_remaining_ms = Some(remaining - wall_dt_ms);
                } else {
                    // The pause deadline falls inside this step: only the
                    // time past it counts as playback.
                    dt = wall_dt_ms - remaining;
                    self.unpause();
                }
            }
        }

        if self.sequencer.state() != SequencerState::Playing {
            return Vec::new();
        }
        let Some(load) = self.load.as_ref() else {
            return Vec::new();
        };

        let batch: Vec<MidiEvent> = self.sequencer.step(load, dt).to_vec();
        for event in &batch {
            if event.is_meta() || !self.channel_enabled[event.channel as usize] {
                continue;
            }
            if let Some(synth_event) = SynthEvent::from_event(event) {
                self.synth_queue.push(synth_event);
            }
        }

        // The step above is the only place a natural end can happen.
        if self.sequencer.state() == SequencerState::Ended {
            if self.loop_enabled {
                self.notifications.push(PlayerNotification::Ended {
                    name: self.midi_name.clone(),
                    reason: EndReason::Loop,
                });
                let from = self.session_start_tick();
                if let Some(load) = self.load.as_ref() {
                    self.sequencer.start(load, from);
                }
                self.sequencer.set_speed(self.speed);
                self.sequencer.set_quantization(self.quantization);
                self.notifications.push(PlayerNotification::Started {
                    name: self.midi_name.clone(),
                });
                log::info!("looping '{}' from tick {}", self.midi_name, from);
            } else {
                self.notifications.push(PlayerNotification::Ended {
                    name: self.midi_name.clone(),
                    reason: EndReason::NaturalEnd,
                });
                log::info!("'{}' reached its last tick", self.midi_name);
            }
        }

        batch
    }

    /// Current playback position in ticks.
    pub fn current_tick(&self) -> u64 {
        self.sequencer.current_tick()
    }

    /// Current position snapped to the quantization grid, for display.
    pub fn current_tick_quantized(&self) -> u64 {
        match &self.load {
            Some(load) => self.sequencer.quantized_tick(load, self.sequencer.current_tick()),
            None => 0,
        }
    }

    /// Current playback position in milliseconds on the nominal timeline.
    pub fn position_ms(&self) -> f64 {
        self.load
            .as_ref()
            .map_or(0.0, |load| self.sequencer.position_ms(load))
    }

    /// Nominal duration of the loaded MIDI in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.load.as_ref().map_or(0.0, |load| load.duration_ms())
    }

    pub fn last_tick(&self) -> u64 {
        self.load.as_ref().map_or(0, |load| load.last_tick())
    }

    pub fn first_note_tick(&self) -> Option<u64> {
        self.load.as_ref().and_then(|load| load.first_note_tick())
    }

    pub fn last_note_tick(&self) -> Option<u64> {
        self.load.as_ref().and_then(|load| load.last_note_tick())
    }

    pub fn track_count(&self) -> u16 {
        self.load.as_ref().map_or(0, |load| load.track_count())
    }

    /// Delta ticks per quarter note of the loaded MIDI (0 when idle).
    pub fn division(&self) -> u16 {
        self.load.as_ref().map_or(0, |load| load.division())
    }

    pub fn sequence_name(&self) -> &str {
        self.load.as_ref().map_or("", |load| load.sequence_name())
    }

    pub fn instrument_name(&self) -> &str {
        self.load.as_ref().map_or("", |load| load.instrument_name())
    }

    pub fn program_name(&self) -> &str {
        self.load.as_ref().map_or("", |load| load.program_name())
    }

    pub fn copyright(&self) -> &str {
        self.load.as_ref().map_or("", |load| load.copyright())
    }

    pub fn text(&self) -> &str {
        self.load.as_ref().map_or("", |load| load.text())
    }

    /// The loaded document, if any.
    pub fn loaded(&self) -> Option<&MidiLoad> {
        self.load.as_ref()
    }

    /// Serializable summary of the loaded document.
    pub fn info(&self) -> Option<MidiInfo> {
        self.load.as_ref().map(|load| load.info())
    }

    /// Load `name` from the catalog and start playing it. `ended` is the
    /// reason reported for the session being displaced, if one is active.
    fn begin(&mut self, name: String, ended: Option<EndReason>) -> Result<(), PlayerError> {
        let Some(data) = self.catalog.get(&name).map(<[u8]>::to_vec) else {
            log::warn!("MIDI '{}' not found in the catalog", name);
            return Err(PlayerError::ResourceMissing(name));
        };

        if let Some(reason) = ended {
            self.end_session(reason);
        }

        self.sequencer.begin_load();
        let load = match MidiLoad::load_with(&data, self.load_options) {
            Ok(load) => load,
            Err(err) => {
                log::warn!("failed to load '{}': {}", name, err);
                self.sequencer.load_failed();
                self.load = None;
                self.notifications.push(PlayerNotification::Ended {
                    name,
                    reason: EndReason::LoadError,
                });
                return Err(err.into());
            }
        };

        self.midi_name = name;
        self.sequencer.ready();
        self.sequencer.set_speed(self.speed);
        self.sequencer.set_quantization(self.quantization);

        let from = if self.start_at_first_note {
            load.first_note_tick().unwrap_or(0)
        } else {
            0
        };
        self.sequencer.start(&load, from);
        self.load = Some(load);
        self.pause_remaining_ms = None;

        log::info!("playing '{}' from tick {}", self.midi_name, from);
        self.notifications.push(PlayerNotification::Started {
            name: self.midi_name.clone(),
        });
        Ok(())
    }

    /// Restart the already-loaded document from the beginning.
    fn restart_session(&mut self, reason: EndReason) -> Result<(), PlayerError> {
        self.end_session(reason);
        let from = self.session_start_tick();
        let load = self.load.as_ref().ok_or(PlayerError::NoMidiLoaded)?;
        self.sequencer.start(load, from);
        self.pause_remaining_ms = None;
        self.notifications.push(PlayerNotification::Started {
            name: self.midi_name.clone(),
        });
        Ok(())
    }

    fn navigate(&mut self, reason: EndReason) -> Result<(), PlayerError> {
        let target = if self.midi_name.is_empty() {
            self.catalog.name_at(0)
        } else if reason == EndReason::Next {
            self.catalog.next_after(&self.midi_name)
        } else {
            self.catalog.previous_before(&self.midi_name)
        };
        let target = target.map(str::to_string).ok_or(PlayerError::NothingToPlay)?;

        let ended = matches!(
            self.sequencer.state(),
            SequencerState::Playing | SequencerState::Paused
        )
        .then_some(reason);
        self.begin(target, ended)
    }

    /// Emit the end notification and halt, once, if a session is active.
    fn end_session(&mut self, reason: EndReason) {
        match self.sequencer.state() {
            SequencerState::Playing | SequencerState::Paused | SequencerState::Ready => {
                self.sequencer.halt();
                self.pause_remaining_ms = None;
                log::info!("'{}' ended: {:?}", self.midi_name, reason);
                self.notifications.push(PlayerNotification::Ended {
                    name: self.midi_name.clone(),
                    reason,
                });
            }
            SequencerState::Ended if reason == EndReason::Replay => {
                // Replay after a natural end: the end was already reported.
            }
            _ => {}
        }
    }

    fn session_start_tick(&self) -> u64 {
        if self.start_at_first_note {
            self.load
                .as_ref()
                .and_then(|load| load.first_note_tick())
                .unwrap_or(0)
        } else {
            0
        }
    }
}
