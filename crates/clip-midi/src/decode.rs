//! SMF decoding: chunk framing, header validation, and per-track event lists
//! with absolute ticks.
//!
//! Chunk framing is checked here so every failure maps onto a precise
//! [`Error`] variant. The event stream inside each `MTrk` body, including
//! running status, is read with midly's event iterator.

use midly::{MetaMessage, MidiMessage, TrackEventKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::note::SmfHeader;
use crate::{Error, Result};

const HEADER_MAGIC: &[u8; 4] = b"MThd";
const TRACK_MAGIC: &[u8; 4] = b"MTrk";

/// Largest time-signature denominator exponent accepted (1/64 notes).
const MAX_DENOMINATOR_POW: u8 = 6;

/// A decoded low-level event with its absolute tick, before note pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub tick: u64,
    pub kind: RawEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawEventKind {
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8 },
    Tempo { micros_per_quarter: u32 },
    TimeSignature { numerator: u8, denominator: u8 },
    TrackName(String),
    /// Any other channel message (controllers, program changes, bends...).
    OtherChannel { channel: u8 },
    /// SysEx, escapes and meta events the engine does not interpret.
    Other,
    EndOfTrack,
}

/// Header plus one absolute-tick event list per track chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSmf {
    pub header: SmfHeader,
    pub tracks: Vec<Vec<RawEvent>>,
}

/// Big-endian cursor over the file bytes.
struct ChunkReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ChunkReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Error::Truncated(format!(
                "{what} needs {len} bytes, {} remain",
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a chunk header and body: `(type tag, body)`.
    fn chunk(&mut self) -> Result<(&'a [u8], &'a [u8])> {
        let tag = self.take(4, "chunk type")?;
        let len = self.u32("chunk length")? as usize;
        let body = self.take(len, "chunk body")?;
        Ok((tag, body))
    }
}

/// Parse the `MThd` chunk.
fn read_header(reader: &mut ChunkReader<'_>) -> Result<SmfHeader> {
    if reader.remaining() < 4 || &reader.bytes[..4] != HEADER_MAGIC {
        return Err(Error::InvalidFormat("missing MThd header chunk".into()));
    }
    reader.take(4, "header magic")?;

    let len = reader.u32("header length")? as usize;
    if len < 6 {
        return Err(Error::InvalidFormat(format!(
            "header chunk length {len} is shorter than 6"
        )));
    }
    let body = reader.take(len, "header chunk")?;
    let format = u16::from_be_bytes([body[0], body[1]]);
    let track_count = u16::from_be_bytes([body[2], body[3]]);
    let division = u16::from_be_bytes([body[4], body[5]]);

    if division & 0x8000 != 0 {
        return Err(Error::UnsupportedDivision(format!(
            "SMPTE division 0x{division:04X}"
        )));
    }
    if division == 0 {
        return Err(Error::InvalidFormat("division of zero ticks per quarter".into()));
    }
    match format {
        0 if track_count != 1 => {
            return Err(Error::InvalidFormat(format!(
                "format 0 declares {track_count} tracks"
            )))
        }
        0 | 1 => {}
        other => {
            return Err(Error::InvalidFormat(format!(
                "unsupported SMF format {other}"
            )))
        }
    }

    Ok(SmfHeader {
        format,
        track_count,
        ppqn: division,
    })
}

/// Decode raw SMF bytes into a header and per-track absolute-tick event lists.
///
/// Note-on/note-off pairing is left to [`crate::extract`].
pub fn decode(bytes: &[u8]) -> Result<RawSmf> {
    let mut reader = ChunkReader::new(bytes);
    let header = read_header(&mut reader)?;

    let mut tracks = Vec::with_capacity(header.track_count as usize);
    while tracks.len() < header.track_count as usize {
        if reader.remaining() == 0 {
            return Err(Error::Truncated(format!(
                "header declares {} tracks, found {}",
                header.track_count,
                tracks.len()
            )));
        }
        let (tag, body) = reader.chunk()?;
        if tag != TRACK_MAGIC {
            // Unknown chunk types are skipped per the SMF spec.
            debug!(tag = ?String::from_utf8_lossy(tag), "skipping alien chunk");
            continue;
        }
        let index = tracks.len();
        tracks.push(decode_track(body, index)?);
    }

    debug!(
        format = header.format,
        tracks = tracks.len(),
        ppqn = header.ppqn,
        "decoded SMF"
    );

    Ok(RawSmf { header, tracks })
}

/// Decode one `MTrk` body into absolute-tick events.
fn decode_track(body: &[u8], index: usize) -> Result<Vec<RawEvent>> {
    let mut events = Vec::new();
    let mut tick: u64 = 0;

    for event in midly::EventIter::new(body) {
        let event =
            event.map_err(|e| Error::MalformedEvent(format!("track {index}: {e}")))?;
        tick += event.delta.as_int() as u64;

        let kind = match event.kind {
            TrackEventKind::Midi { channel, message } => {
                let channel = channel.as_int();
                match message {
                    MidiMessage::NoteOn { key, vel } => RawEventKind::NoteOn {
                        channel,
                        pitch: key.as_int(),
                        velocity: vel.as_int(),
                    },
                    MidiMessage::NoteOff { key, .. } => RawEventKind::NoteOff {
                        channel,
                        pitch: key.as_int(),
                    },
                    _ => RawEventKind::OtherChannel { channel },
                }
            }
            TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => {
                let micros_per_quarter = tempo.as_int();
                if micros_per_quarter == 0 {
                    return Err(Error::MalformedEvent(format!(
                        "track {index}: tempo of zero at tick {tick}"
                    )));
                }
                RawEventKind::Tempo { micros_per_quarter }
            }
            TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, denom_pow, _, _)) => {
                if numerator == 0 || denom_pow > MAX_DENOMINATOR_POW {
                    return Err(Error::MalformedEvent(format!(
                        "track {index}: time signature {numerator}/2^{denom_pow} at tick {tick}"
                    )));
                }
                RawEventKind::TimeSignature {
                    numerator,
                    denominator: 1 << denom_pow,
                }
            }
            TrackEventKind::Meta(MetaMessage::TrackName(name)) => {
                RawEventKind::TrackName(String::from_utf8_lossy(name).into_owned())
            }
            TrackEventKind::Meta(MetaMessage::EndOfTrack) => {
                events.push(RawEvent {
                    tick,
                    kind: RawEventKind::EndOfTrack,
                });
                break;
            }
            // midly only decodes these when the payload is long enough.
            TrackEventKind::Meta(MetaMessage::Unknown(kind @ (0x51 | 0x58), data)) => {
                return Err(Error::MalformedEvent(format!(
                    "track {index}: meta event 0x{kind:02X} with {} data bytes at tick {tick}",
                    data.len()
                )));
            }
            _ => RawEventKind::Other,
        };

        events.push(RawEvent { tick, kind });
    }

    Ok(events)
}
