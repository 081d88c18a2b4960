use tracing::debug;

use crate::note::{Clip, NoteEvent, Tempo, TimeSignature};

/// Largest delta a variable-length quantity can carry (28 bits).
const MAX_VLQ: u32 = 0x0FFF_FFFF;

/// Empty text meta event used to carry deltas longer than one VLQ.
const FILLER_EVENT: [u8; 3] = [0xFF, 0x01, 0x00];

/// MIDI clocks per metronome click and 32nds per quarter written into
/// time-signature events.
const CLOCKS_PER_CLICK: u8 = 0x18;
const THIRTY_SECONDS_PER_QUARTER: u8 = 0x08;

/// One track chunk to be written.
#[derive(Debug, Clone, Default)]
pub struct TrackSpec<'a> {
    pub name: Option<&'a str>,
    /// Tempo and time signature written at tick 0 of this track.
    pub timing: Option<(Tempo, TimeSignature)>,
    pub notes: Vec<&'a NoteEvent>,
    /// Tick of the end-of-track event; later events push it back.
    pub end_tick: u64,
}

/// Ordering class for events sharing a tick: meta first, then note-offs,
/// then note-ons, so a retriggered pitch closes before it reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EventClass {
    Meta,
    NoteOff,
    NoteOn,
}

/// Serialize a clip back to SMF bytes.
///
/// Format 0 clips become a single track carrying tempo, time signature and
/// every note. Format 1 clips keep their source track layout; track 0 is the
/// tempo-bearing track.
pub fn encode(clip: &Clip) -> Vec<u8> {
    let mut notes: Vec<&NoteEvent> = clip.notes.iter().collect();
    notes.sort_by(|a, b| a.start_tick.cmp(&b.start_tick).then(a.pitch.cmp(&b.pitch)));

    let timing = Some((clip.tempo, clip.time_signature));
    let name_of = |i: usize| clip.track_names.get(i).and_then(|n| n.as_deref());

    if clip.header.format == 0 {
        let track = TrackSpec {
            name: name_of(0),
            timing,
            notes,
            end_tick: clip.length_ticks,
        };
        return write_smf(0, clip.header.ppqn, &[track]);
    }

    let track_count = notes
        .iter()
        .map(|n| n.track + 1)
        .max()
        .unwrap_or(0)
        .max(clip.header.track_count as usize)
        .max(1);

    let mut tracks: Vec<TrackSpec<'_>> = (0..track_count)
        .map(|i| TrackSpec {
            name: name_of(i),
            timing: None,
            notes: Vec::new(),
            end_tick: clip.length_ticks,
        })
        .collect();
    tracks[0].timing = timing;
    for note in notes {
        tracks[note.track].notes.push(note);
    }

    write_smf(1, clip.header.ppqn, &tracks)
}

/// Assemble a complete SMF from track specs.
pub fn write_smf(format: u16, ppqn: u16, tracks: &[TrackSpec<'_>]) -> Vec<u8> {
    let chunks: Vec<Vec<u8>> = tracks.iter().map(build_track).collect();

    let mut buf = Vec::new();

    // MThd header
    buf.extend_from_slice(b"MThd");
    buf.extend_from_slice(&6u32.to_be_bytes());
    buf.extend_from_slice(&format.to_be_bytes());
    buf.extend_from_slice(&(chunks.len() as u16).to_be_bytes());
    buf.extend_from_slice(&ppqn.to_be_bytes());

    // MTrk chunks
    for track_data in &chunks {
        buf.extend_from_slice(b"MTrk");
        buf.extend_from_slice(&(track_data.len() as u32).to_be_bytes());
        buf.extend_from_slice(track_data);
    }

    debug!(format, ppqn, tracks = chunks.len(), bytes = buf.len(), "encoded SMF");
    buf
}

/// Build the body of one track chunk.
fn build_track(spec: &TrackSpec<'_>) -> Vec<u8> {
    let mut events: Vec<(u64, EventClass, Vec<u8>)> = Vec::new();

    if let Some(name) = spec.name {
        let mut name_event = vec![0xFF, 0x03];
        write_vlq(&mut name_event, name.len() as u32);
        name_event.extend_from_slice(name.as_bytes());
        events.push((0, EventClass::Meta, name_event));
    }

    if let Some((tempo, time_signature)) = spec.timing {
        events.push((0, EventClass::Meta, tempo_event(tempo)));
        events.push((0, EventClass::Meta, time_signature_event(time_signature)));
    }

    for note in &spec.notes {
        let channel = note.channel & 0x0F;
        events.push((
            note.start_tick,
            EventClass::NoteOn,
            vec![0x90 | channel, note.pitch & 0x7F, note.velocity.clamp(1, 127)],
        ));
        events.push((
            note.end_tick,
            EventClass::NoteOff,
            vec![0x80 | channel, note.pitch & 0x7F, 0],
        ));
    }

    // Stable: note-ons keep the (start, pitch) order they were given in.
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut track_data = Vec::new();
    let mut last_tick = 0u64;

    for (tick, _, data) in events {
        write_delta(&mut track_data, tick.saturating_sub(last_tick));
        track_data.extend_from_slice(&data);
        last_tick = tick;
    }

    // End of track, held until the clip's full length so trailing rests survive.
    write_delta(&mut track_data, spec.end_tick.saturating_sub(last_tick));
    track_data.extend_from_slice(&[0xFF, 0x2F, 0x00]);

    track_data
}

fn tempo_event(tempo: Tempo) -> Vec<u8> {
    let usec = tempo.micros_per_quarter.min(0xFF_FFFF);
    vec![
        0xFF,
        0x51,
        0x03,
        (usec >> 16) as u8,
        (usec >> 8) as u8,
        usec as u8,
    ]
}

fn time_signature_event(ts: TimeSignature) -> Vec<u8> {
    let denom_pow = ts.denominator.max(1).trailing_zeros() as u8;
    vec![
        0xFF,
        0x58,
        0x04,
        ts.numerator,
        denom_pow,
        CLOCKS_PER_CLICK,
        THIRTY_SECONDS_PER_QUARTER,
    ]
}

/// Write a variable-length quantity to a byte buffer.
/// Write a delta time of any length. Deltas past the VLQ limit are split
/// across empty text events so absolute ticks survive.
fn write_delta(buf: &mut Vec<u8>, mut delta: u64) {
    while delta > u64::from(MAX_VLQ) {
        write_vlq(buf, MAX_VLQ);
        buf.extend_from_slice(&FILLER_EVENT);
        delta -= u64::from(MAX_VLQ);
    }
    write_vlq(buf, delta as u32);
}

pub fn write_vlq(buf: &mut Vec<u8>, mut value: u32) {
    if value == 0 {
        buf.push(0);
        return;
    }

    let mut bytes = Vec::new();
    bytes.push((value & 0x7F) as u8);
    value >>= 7;

    while value > 0 {
        bytes.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }

    bytes.reverse();
    buf.extend_from_slice(&bytes);
}
