//! Standard MIDI File parser
//!
//! Decodes a raw SMF byte stream (`MThd` header chunk + `MTrk` track
//! chunks) into per-track event lists. Handles running status,
//! variable-length deltas, and meta events. Unknown meta event types are
//! captured with their raw payload rather than rejected; unknown chunk
//! types between tracks are skipped.

use crate::events::{MetaEvent, MidiEvent, MidiMessage, TextKind};

/// Parse failure, fatal to the load. The caller can retry with another file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("bad header: {0}")]
    BadHeader(&'static str),
    #[error("bad track chunk: {0}")]
    BadTrackChunk(&'static str),
    #[error("truncated data: needed {needed} bytes at offset {offset}")]
    TruncatedData { offset: usize, needed: usize },
    #[error("invalid {kind} meta length: got {got}, expected {expected}")]
    InvalidMetaLength {
        kind: &'static str,
        got: u32,
        expected: u32,
    },
}

/// Raw parse result: ordered per-track event lists plus the time base.
///
/// Within a track, event ticks are non-decreasing and events keep their
/// file order. [`crate::load::MidiLoad`] builds the merged playback
/// stream and tempo map from this.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile {
    /// SMF format (0, 1 or 2)
    pub format: u16,
    /// Delta ticks per quarter note
    pub division: u16,
    /// Decoded tracks, in file order
    pub tracks: Vec<Vec<MidiEvent>>,
}

/// Parse a complete SMF byte stream.
pub fn parse(data: &[u8]) -> Result<ParsedFile, ParseError> {
    let mut reader = Reader::new(data);

    let id = reader.take(4)?;
    if id != b"MThd" {
        return Err(ParseError::BadHeader("missing MThd chunk"));
    }
    let header_len = reader.u32()?;
    if header_len < 6 {
        return Err(ParseError::BadHeader("header chunk shorter than 6 bytes"));
    }
    let format = reader.u16()?;
    let track_count = reader.u16()?;
    let raw_division = reader.u16()?;
    // A header longer than 6 bytes is legal, extra bytes are ignored.
    reader.take(header_len as usize - 6)?;

    let division = if raw_division & 0x8000 != 0 {
        // SMPTE division: frames/sec in the high byte (two's complement),
        // ticks per frame in the low byte. Approximate a metrical time
        // base at the default 120 BPM.
        let fps = (0x100 - (raw_division >> 8)) & 0xFF;
        let ticks_per_frame = raw_division & 0xFF;
        let approx = fps * ticks_per_frame / 2;
        if approx == 0 {
            return Err(ParseError::BadHeader("SMPTE division resolves to zero"));
        }
        approx
    } else {
        if raw_division == 0 {
            return Err(ParseError::BadHeader("zero ticks per quarter note"));
        }
        raw_division
    };

    let mut tracks = Vec::with_capacity(track_count as usize);
    while tracks.len() < track_count as usize {
        let Ok(id) = reader.take(4) else {
            return Err(ParseError::BadTrackChunk("fewer tracks than header declares"));
        };
        let chunk_len = reader.u32()? as usize;
        let body = reader.take(chunk_len)?;
        if id == b"MTrk" {
            let track_index = tracks.len() as u16;
            tracks.push(parse_track(body, track_index)?);
        } else {
            log::debug!(
                "skipping unknown chunk {:02X?} ({} bytes)",
                id,
                chunk_len
            );
        }
    }

    Ok(ParsedFile {
        format,
        division,
        tracks,
    })
}

/// Decode one `MTrk` chunk body into an ordered event list.
fn parse_track(body: &[u8], track_index: u16) -> Result<Vec<MidiEvent>, ParseError> {
    let mut reader = Reader::new(body);
    let mut events = Vec::new();
    let mut tick: u64 = 0;
    let mut running_status: Option<u8> = None;

    while !reader.is_empty() {
        let delta = reader.vlq()?;
        tick += delta as u64;

        let first = reader.u8()?;
        let status = if first & 0x80 != 0 {
            first
        } else {
            // Running status: reuse the previous channel status, the byte
            // just read is the first data byte.
            reader.rewind(1);
            running_status.ok_or(ParseError::BadTrackChunk(
                "data byte without a preceding status byte",
            ))?
        };

        let message = match status & 0xF0 {
            0xF0 => {
                // Meta and sysex cancel running status.
                running_status = None;
                match status {
                    0xFF => parse_meta(&mut reader)?,
                    0xF0 | 0xF7 => {
                        let len = reader.vlq()? as usize;
                        reader.take(len)?;
                        continue; // sysex payload is not sequenced
                    }
                    _ => return Err(ParseError::BadTrackChunk("unexpected system message in track")),
                }
            }
            command => {
                running_status = Some(status);
                parse_channel_message(&mut reader, command)?
            }
        };

        let channel = if status < 0xF0 { status & 0x0F } else { 0 };
        events.push(MidiEvent {
            tick,
            delta,
            track: track_index,
            channel,
            message,
        });
    }

    Ok(events)
}

fn parse_channel_message(reader: &mut Reader, command: u8) -> Result<MidiMessage, ParseError> {
    Ok(match command {
        0x80 => MidiMessage::NoteOff {
            key: reader.data_byte()?,
            velocity: reader.data_byte()?,
        },
        0x90 => MidiMessage::NoteOn {
            key: reader.data_byte()?,
            velocity: reader.data_byte()?,
        },
        0xA0 => MidiMessage::KeyAfterTouch {
            key: reader.data_byte()?,
            pressure: reader.data_byte()?,
        },
        0xB0 => MidiMessage::ControlChange {
            controller: reader.data_byte()?,
            value: reader.data_byte()?,
        },
        0xC0 => MidiMessage::PatchChange {
            program: reader.data_byte()?,
        },
        0xD0 => MidiMessage::ChannelAfterTouch {
            pressure: reader.data_byte()?,
        },
        0xE0 => {
            let lsb = reader.data_byte()? as u16;
            let msb = reader.data_byte()? as u16;
            MidiMessage::PitchBend {
                value: lsb | (msb << 7),
            }
        }
        _ => unreachable!("caller matched a channel command"),
    })
}

/// Decode a meta event (status byte 0xFF already consumed).
///
/// Fixed-length types are validated against the lengths the format
/// mandates; anything unrecognized is captured raw.
fn parse_meta(reader: &mut Reader) -> Result<MidiMessage, ParseError> {
    let kind = reader.u8()?;
    let len = reader.vlq()?;

    let meta = match kind {
        0x51 => {
            if len != 3 {
                return Err(ParseError::InvalidMetaLength {
                    kind: "tempo",
                    got: len,
                    expected: 3,
                });
            }
            let data = reader.take(3)?;
            MetaEvent::Tempo {
                microseconds_per_quarter: ((data[0] as u32) << 16)
                    | ((data[1] as u32) << 8)
                    | data[2] as u32,
            }
        }
        0x54 => {
            if len != 5 {
                return Err(ParseError::InvalidMetaLength {
                    kind: "SMPTE offset",
                    got: len,
                    expected: 5,
                });
            }
            let data = reader.take(5)?;
            MetaEvent::SmpteOffset {
                hours: data[0],
                minutes: data[1],
                seconds: data[2],
                frames: data[3],
                sub_frames: data[4],
            }
        }
        0x58 => {
            if len != 4 {
                return Err(ParseError::InvalidMetaLength {
                    kind: "time signature",
                    got: len,
                    expected: 4,
                });
            }
            let data = reader.take(4)?;
            MetaEvent::TimeSignature {
                numerator: data[0],
                denominator: data[1],
                clocks_per_click: data[2],
                thirty_seconds_per_quarter: data[3],
            }
        }
        0x2F => {
            if len != 0 {
                return Err(ParseError::InvalidMetaLength {
                    kind: "end of track",
                    got: len,
                    expected: 0,
                });
            }
            MetaEvent::EndOfTrack
        }
        0x01..=0x08 => {
            let text_kind = match kind {
                0x01 => TextKind::Text,
                0x02 => TextKind::Copyright,
                0x03 => TextKind::SequenceName,
                0x04 => TextKind::InstrumentName,
                0x05 => TextKind::Lyric,
                0x06 => TextKind::Marker,
                0x07 => TextKind::CuePoint,
                _ => TextKind::ProgramName,
            };
            let bytes = reader.take(len as usize)?;
            MetaEvent::Text {
                kind: text_kind,
                text: String::from_utf8_lossy(bytes).into_owned(),
            }
        }
        _ => {
            let bytes = reader.take(len as usize)?;
            MetaEvent::Raw {
                kind,
                data: bytes.to_vec(),
            }
        }
    };

    Ok(MidiMessage::Meta(meta))
}

/// Byte cursor over the input, all reads bounds-checked.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if self.pos + n > self.data.len() {
            return Err(ParseError::TruncatedData {
                offset: self.pos,
                needed: n,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn rewind(&mut self, n: usize) {
        self.pos -= n;
    }

    fn u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    /// Read a data byte; high bit set means the stream is corrupt.
    fn data_byte(&mut self) -> Result<u8, ParseError> {
        let byte = self.u8()?;
        if byte & 0x80 != 0 {
            return Err(ParseError::BadTrackChunk("status byte where data expected"));
        }
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16, ParseError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, ParseError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a variable-length quantity (at most 4 bytes).
    fn vlq(&mut self) -> Result<u32, ParseError> {
        let mut value: u32 = 0;
        for _ in 0..4 {
            let byte = self.u8()?;
            value = (value << 7) | (byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ParseError::BadTrackChunk("variable-length quantity over 4 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{SmfBuilder, TrackWriter};

    fn single_track(track: TrackWriter) -> Vec<u8> {
        let mut builder = SmfBuilder::new(480);
        builder.add_track(track);
        builder.to_bytes()
    }

    #[test]
    fn test_parse_simple_file() {
        let mut track = TrackWriter::new();
        track
            .tempo(0, 500_000)
            .patch_change(0, 0, 24)
            .note_on(0, 0, 60, 100)
            .note_off(480, 0, 60, 0);
        let parsed = parse(&single_track(track)).unwrap();

        assert_eq!(parsed.format, 0);
        assert_eq!(parsed.division, 480);
        assert_eq!(parsed.tracks.len(), 1);

        let events = &parsed.tracks[0];
        assert_eq!(events[0].tempo(), Some(500_000));
        assert_eq!(
            events[2].message,
            MidiMessage::NoteOn { key: 60, velocity: 100 }
        );
        assert_eq!(events[3].tick, 480);
        assert_eq!(events[3].delta, 480);
        assert_eq!(
            events[4].message,
            MidiMessage::Meta(MetaEvent::EndOfTrack)
        );
    }

    #[test]
    fn test_running_status() {
        // Two note-ons sharing one status byte.
        let body = [
            0x00, 0x90, 60, 100, // note on, full status
            0x10, 62, 90, // note on via running status
            0x00, 0xFF, 0x2F, 0x00, // end of track
        ];
        let mut data = Vec::new();
        data.extend_from_slice(b"MThd");
        data.extend_from_slice(&6u32.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&96u16.to_be_bytes());
        data.extend_from_slice(b"MTrk");
        data.extend_from_slice(&(body.len() as u32).to_be_bytes());
        data.extend_from_slice(&body);

        let parsed = parse(&data).unwrap();
        let events = &parsed.tracks[0];
        assert_eq!(
            events[1].message,
            MidiMessage::NoteOn { key: 62, velocity: 90 }
        );
        assert_eq!(events[1].tick, 0x10);
        assert_eq!(events[1].channel, 0);
    }

    #[test]
    fn test_bad_header() {
        assert_eq!(
            parse(b"RIFF\x00\x00\x00\x06\x00\x00\x00\x01\x01\xe0"),
            Err(ParseError::BadHeader("missing MThd chunk"))
        );
    }

    #[test]
    fn test_truncated_track() {
        let mut track = TrackWriter::new();
        track.note_on(0, 0, 60, 100);
        let mut data = single_track(track);
        data.truncate(data.len() - 3);
        assert!(matches!(
            parse(&data),
            Err(ParseError::TruncatedData { .. })
        ));
    }

    #[test]
    fn test_corrupt_smpte_offset_length() {
        // SMPTE offset with 4 data bytes instead of 5.
        let mut track = TrackWriter::new();
        track.raw_meta(0, 0x54, &[1, 2, 3, 4]);
        let err = parse(&single_track(track)).unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidMetaLength {
                kind: "SMPTE offset",
                got: 4,
                expected: 5,
            }
        );
    }

    #[test]
    fn test_corrupt_tempo_length() {
        let mut track = TrackWriter::new();
        track.raw_meta(0, 0x51, &[0x07, 0xA1, 0x20, 0x00]);
        assert_eq!(
            parse(&single_track(track)).unwrap_err(),
            ParseError::InvalidMetaLength {
                kind: "tempo",
                got: 4,
                expected: 3,
            }
        );
    }

    #[test]
    fn test_unknown_meta_captured_raw() {
        // Sequencer-specific meta (0x7F), arbitrary payload.
        let mut track = TrackWriter::new();
        track.raw_meta(0, 0x7F, &[0xDE, 0xAD, 0xBE]);
        let parsed = parse(&single_track(track)).unwrap();
        assert_eq!(
            parsed.tracks[0][0].message,
            MidiMessage::Meta(MetaEvent::Raw {
                kind: 0x7F,
                data: vec![0xDE, 0xAD, 0xBE],
            })
        );
    }

    #[test]
    fn test_text_meta_events() {
        let mut track = TrackWriter::new();
        track
            .text(0, TextKind::SequenceName, "Adagio")
            .text(0, TextKind::Copyright, "(c) 1723");
        let parsed = parse(&single_track(track)).unwrap();
        assert_eq!(
            parsed.tracks[0][0].message,
            MidiMessage::Meta(MetaEvent::Text {
                kind: TextKind::SequenceName,
                text: "Adagio".into(),
            })
        );
    }

    #[test]
    fn test_unknown_chunk_skipped() {
        let mut track = TrackWriter::new();
        track.note_on(0, 3, 60, 100);
        let mut builder = SmfBuilder::new(480);
        builder.add_track(track);
        let bytes = builder.to_bytes();

        // Splice an unknown chunk between header and track.
        let mut data = bytes[..14].to_vec();
        data.extend_from_slice(b"XFIH");
        data.extend_from_slice(&2u32.to_be_bytes());
        data.extend_from_slice(&[0xAA, 0xBB]);
        data.extend_from_slice(&bytes[14..]);

        let parsed = parse(&data).unwrap();
        assert_eq!(parsed.tracks.len(), 1);
        assert_eq!(parsed.tracks[0][0].channel, 3);
    }

    #[test]
    fn test_sysex_skipped() {
        let body = [
            0x00, 0xF0, 0x03, 0x01, 0x02, 0xF7, // sysex, 3 payload bytes
            0x00, 0x90, 60, 100, // note on
            0x00, 0xFF, 0x2F, 0x00,
        ];
        let mut data = Vec::new();
        data.extend_from_slice(b"MThd");
        data.extend_from_slice(&6u32.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&96u16.to_be_bytes());
        data.extend_from_slice(b"MTrk");
        data.extend_from_slice(&(body.len() as u32).to_be_bytes());
        data.extend_from_slice(&body);

        let parsed = parse(&data).unwrap();
        assert_eq!(parsed.tracks[0].len(), 2);
        assert!(parsed.tracks[0][0].is_note_on());
    }

    #[test]
    fn test_smpte_division_approximated() {
        // 25 fps, 40 ticks per frame.
        let mut data = Vec::new();
        data.extend_from_slice(b"MThd");
        data.extend_from_slice(&6u32.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        let division: u16 = ((0x100 - 25) as u16) << 8 | 40;
        data.extend_from_slice(&division.to_be_bytes());

        let parsed = parse(&data).unwrap();
        assert_eq!(parsed.division, 25 * 40 / 2);
    }
}
