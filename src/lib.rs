//! Tick-accurate Standard MIDI File player.
//!
//! The crate splits into a parsing layer and a playback layer:
//!
//! - [`parser`] reads SMF bytes into typed [`events`], and [`writer`]
//!   produces them (mostly for tests and fixtures).
//! - [`load`] merges the parsed tracks into one tick-ordered stream with
//!   a [`timing::TempoMap`] for tick/millisecond conversion.
//! - [`sequencer`] advances a loaded stream by wall-clock steps, and
//!   [`player`] wraps it with the catalog, channel filtering, looping
//!   and the queues toward the synth and the host.
//!
//! The player never spawns a thread: the host calls
//! [`MidiFilePlayer::step`] once per frame with the elapsed milliseconds
//! and drains the synth queue in its own audio path.

pub mod catalog;
pub mod events;
pub mod load;
pub mod parser;
pub mod player;
pub mod queue;
pub mod sequencer;
pub mod timing;
pub mod writer;

pub use catalog::MidiCatalog;
pub use events::{MetaEvent, MidiEvent, MidiMessage, TextKind};
pub use load::{LoadOptions, MidiInfo, MidiLoad, TrackInfo};
pub use parser::{parse, ParseError, ParsedFile};
pub use player::{MidiFilePlayer, PlayerError};
pub use queue::{
    EndReason, NotificationQueue, PlayerNotification, SynthCommand, SynthEvent,
    SynthEventQueue,
};
pub use sequencer::{Sequencer, SequencerState};
pub use timing::{TempoChange, TempoMap, DEFAULT_TEMPO};
