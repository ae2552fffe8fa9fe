//! Standard MIDI File writer
//!
//! Serializes events into SMF bytes (header chunk + track chunks,
//! variable-length deltas, no running status). Counterpart of the parser;
//! also used to build test fixtures throughout the crate.

use crate::events::TextKind;

/// Builds one `MTrk` chunk body, one event at a time.
///
/// Deltas are relative to the previous event pushed into this track.
/// `finish` (called by [`SmfBuilder::add_track`]) appends the mandatory
/// end-of-track meta event.
#[derive(Debug, Default)]
pub struct TrackWriter {
    data: Vec<u8>,
}

impl TrackWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_on(&mut self, delta: u32, channel: u8, key: u8, velocity: u8) -> &mut Self {
        self.status(delta, 0x90, channel);
        self.data.push(key & 0x7F);
        self.data.push(velocity & 0x7F);
        self
    }

    pub fn note_off(&mut self, delta: u32, channel: u8, key: u8, velocity: u8) -> &mut Self {
        self.status(delta, 0x80, channel);
        self.data.push(key & 0x7F);
        self.data.push(velocity & 0x7F);
        self
    }

    pub fn control_change(&mut self, delta: u32, channel: u8, controller: u8, value: u8) -> &mut Self {
        self.status(delta, 0xB0, channel);
        self.data.push(controller & 0x7F);
        self.data.push(value & 0x7F);
        self
    }

    pub fn patch_change(&mut self, delta: u32, channel: u8, program: u8) -> &mut Self {
        self.status(delta, 0xC0, channel);
        self.data.push(program & 0x7F);
        self
    }

    pub fn pitch_bend(&mut self, delta: u32, channel: u8, value: u16) -> &mut Self {
        self.status(delta, 0xE0, channel);
        self.data.push((value & 0x7F) as u8);
        self.data.push(((value >> 7) & 0x7F) as u8);
        self
    }

    /// Set tempo meta event, 3 big-endian data bytes.
    pub fn tempo(&mut self, delta: u32, microseconds_per_quarter: u32) -> &mut Self {
        self.meta_header(delta, 0x51, 3);
        self.data.push(((microseconds_per_quarter >> 16) & 0xFF) as u8);
        self.data.push(((microseconds_per_quarter >> 8) & 0xFF) as u8);
        self.data.push((microseconds_per_quarter & 0xFF) as u8);
        self
    }

    pub fn time_signature(
        &mut self,
        delta: u32,
        numerator: u8,
        denominator: u8,
        clocks_per_click: u8,
        thirty_seconds_per_quarter: u8,
    ) -> &mut Self {
        self.meta_header(delta, 0x58, 4);
        self.data.extend_from_slice(&[
            numerator,
            denominator,
            clocks_per_click,
            thirty_seconds_per_quarter,
        ]);
        self
    }

    pub fn smpte_offset(
        &mut self,
        delta: u32,
        hours: u8,
        minutes: u8,
        seconds: u8,
        frames: u8,
        sub_frames: u8,
    ) -> &mut Self {
        self.meta_header(delta, 0x54, 5);
        self.data
            .extend_from_slice(&[hours, minutes, seconds, frames, sub_frames]);
        self
    }

    pub fn text(&mut self, delta: u32, kind: TextKind, text: &str) -> &mut Self {
        let type_byte = match kind {
            TextKind::Text => 0x01,
            TextKind::Copyright => 0x02,
            TextKind::SequenceName => 0x03,
            TextKind::InstrumentName => 0x04,
            TextKind::Lyric => 0x05,
            TextKind::Marker => 0x06,
            TextKind::CuePoint => 0x07,
            TextKind::ProgramName => 0x08,
        };
        let bytes = text.as_bytes();
        self.meta_header(delta, type_byte, bytes.len() as u32);
        self.data.extend_from_slice(bytes);
        self
    }

    /// Arbitrary meta event with a raw payload.
    pub fn raw_meta(&mut self, delta: u32, kind: u8, payload: &[u8]) -> &mut Self {
        self.meta_header(delta, kind, payload.len() as u32);
        self.data.extend_from_slice(payload);
        self
    }

    fn status(&mut self, delta: u32, command: u8, channel: u8) {
        write_vlq(&mut self.data, delta);
        self.data.push(command | (channel & 0x0F));
    }

    fn meta_header(&mut self, delta: u32, kind: u8, length: u32) {
        write_vlq(&mut self.data, delta);
        self.data.push(0xFF);
        self.data.push(kind);
        write_vlq(&mut self.data, length);
    }

    fn finish(mut self) -> Vec<u8> {
        // end of track
        self.data.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);
        self.data
    }
}

/// Assembles a complete SMF byte stream from finished tracks.
#[derive(Debug)]
pub struct SmfBuilder {
    division: u16,
    tracks: Vec<Vec<u8>>,
}

impl SmfBuilder {
    /// Create a builder with the given division (delta ticks per quarter note).
    pub fn new(division: u16) -> Self {
        Self {
            division,
            tracks: Vec::new(),
        }
    }

    pub fn add_track(&mut self, track: TrackWriter) -> &mut Self {
        self.tracks.push(track.finish());
        self
    }

    /// Serialize header + track chunks. Format 0 for a single track,
    /// format 1 otherwise.
    pub fn to_bytes(&self) -> Vec<u8> {
        let format: u16 = if self.tracks.len() <= 1 { 0 } else { 1 };

        let mut out = Vec::new();
        out.extend_from_slice(b"MThd");
        out.extend_from_slice(&6u32.to_be_bytes());
        out.extend_from_slice(&format.to_be_bytes());
        out.extend_from_slice(&(self.tracks.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.division.to_be_bytes());

        for track in &self.tracks {
            out.extend_from_slice(b"MTrk");
            out.extend_from_slice(&(track.len() as u32).to_be_bytes());
            out.extend_from_slice(track);
        }

        out
    }
}

/// Write a MIDI variable-length quantity (up to 4 bytes, 28 bits).
fn write_vlq(buf: &mut Vec<u8>, mut value: u32) {
    let mut bytes = [0u8; 4];
    let mut i = 3;
    bytes[i] = (value & 0x7F) as u8;
    value >>= 7;
    while value > 0 {
        i -= 1;
        bytes[i] = ((value & 0x7F) | 0x80) as u8;
        value >>= 7;
    }
    buf.extend_from_slice(&bytes[i..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vlq(value: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        write_vlq(&mut buf, value);
        buf
    }

    #[test]
    fn test_vlq_encoding() {
        assert_eq!(vlq(0), vec![0x00]);
        assert_eq!(vlq(0x40), vec![0x40]);
        assert_eq!(vlq(0x7F), vec![0x7F]);
        assert_eq!(vlq(0x80), vec![0x81, 0x00]);
        assert_eq!(vlq(0x2000), vec![0xC0, 0x00]);
        assert_eq!(vlq(0x3FFF), vec![0xFF, 0x7F]);
        assert_eq!(vlq(0x4000), vec![0x81, 0x80, 0x00]);
        assert_eq!(vlq(0x0FFF_FFFF), vec![0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn test_header_layout() {
        let mut builder = SmfBuilder::new(480);
        builder.add_track(TrackWriter::new());
        let bytes = builder.to_bytes();

        assert_eq!(&bytes[0..4], b"MThd");
        assert_eq!(&bytes[4..8], &6u32.to_be_bytes());
        assert_eq!(&bytes[8..10], &0u16.to_be_bytes()); // format 0
        assert_eq!(&bytes[10..12], &1u16.to_be_bytes()); // 1 track
        assert_eq!(&bytes[12..14], &480u16.to_be_bytes());
        assert_eq!(&bytes[14..18], b"MTrk");
    }

    #[test]
    fn test_end_of_track_appended() {
        let mut track = TrackWriter::new();
        track.note_on(0, 0, 60, 100);
        let body = track.finish();
        assert_eq!(&body[body.len() - 4..], &[0x00, 0xFF, 0x2F, 0x00]);
    }
}
