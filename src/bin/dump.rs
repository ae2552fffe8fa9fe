//! MIDI file inspector
//!
//! Parses a Standard MIDI File and prints a JSON summary: format,
//! division, duration, tempo changes, per-track statistics and the
//! embedded text metadata.
//!
//! Usage: maestro-dump <file.mid> [--events] [--play]
//! - `--events` also prints every merged event, one JSON object per line
//! - `--play` streams the file through the player in real time, printing
//!   each synth event as it becomes due

use std::env;
use std::thread;
use std::time::{Duration, Instant};

use maestro::{MidiCatalog, MidiFilePlayer, MidiLoad, SequencerState};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: maestro-dump <file.mid> [--events] [--play]");
        std::process::exit(1);
    }
    let path = &args[1];
    let print_events = args.iter().any(|a| a == "--events");
    let play = args.iter().any(|a| a == "--play");

    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) => {
            eprintln!("cannot read {}: {}", path, err);
            std::process::exit(1);
        }
    };

    let load = match MidiLoad::load(&data) {
        Ok(load) => load,
        Err(err) => {
            eprintln!("cannot parse {}: {}", path, err);
            std::process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&load.info()) {
        Ok(json) => println!("{}", json),
        Err(err) => {
            eprintln!("cannot serialize summary: {}", err);
            std::process::exit(1);
        }
    }

    if print_events {
        for event in load.events() {
            match serde_json::to_string(event) {
                Ok(json) => println!("{}", json),
                Err(err) => {
                    eprintln!("cannot serialize event: {}", err);
                    break;
                }
            }
        }
    }

    if play {
        stream(path, data);
    }
}

/// Drive the player in real time at ~60 steps per second, printing the
/// synth events as they fall due.
fn stream(path: &str, data: Vec<u8>) {
    let mut catalog = MidiCatalog::new();
    catalog.add(path, data);
    let mut player = MidiFilePlayer::new(catalog);
    let synth = player.synth_queue();
    let notifications = player.notifications();

    if let Err(err) = player.play() {
        eprintln!("cannot play {}: {}", path, err);
        std::process::exit(1);
    }
    log::info!(
        "streaming {} ({:.1} s)",
        path,
        player.duration_ms() / 1000.0
    );

    let mut synth_events = Vec::new();
    let mut last = Instant::now();
    loop {
        thread::sleep(Duration::from_millis(16));
        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f64() * 1000.0;
        last = now;

        player.step(dt);
        synth_events.clear();
        synth.drain_into(&mut synth_events);
        for event in &synth_events {
            println!(
                "{:>8} ch{:<2} {:?} {} {}",
                event.tick, event.channel, event.command, event.value, event.velocity
            );
        }
        while let Some(notification) = notifications.pop() {
            log::info!("{:?}", notification);
        }

        if player.state() == SequencerState::Ended {
            break;
        }
    }
}
