use serde::{Deserialize, Serialize};

/// Non-fatal conditions collected while decoding, transforming or exporting.
///
/// Warnings never abort an operation; they travel beside its result so the
/// caller can surface them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A note-on never saw a matching note-off and was closed at clip end.
    UnmatchedNoteOn {
        channel: u8,
        pitch: u8,
        start_tick: u64,
        closed_at: u64,
    },
    /// A note-off arrived at the same tick as its note-on.
    ZeroLengthNoteDropped { channel: u8, pitch: u8, tick: u64 },
    /// Only the first tempo event is honored.
    ExtraTempoIgnored { tick: u64 },
    /// Only the first time-signature event is honored.
    ExtraTimeSignatureIgnored { tick: u64 },
    /// Velocity scaling was requested on a clip with no audible notes.
    SilentVelocityScale,
    /// An option that only applies to preview was passed to export.
    PreviewOnlyOptionIgnored { option: String },
    /// A file in a batch failed and was skipped.
    SkippedFile { file: String, error: String },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::UnmatchedNoteOn {
                channel,
                pitch,
                start_tick,
                closed_at,
            } => write!(
                f,
                "note {pitch} on channel {channel} at tick {start_tick} had no note-off, closed at {closed_at}"
            ),
            Warning::ZeroLengthNoteDropped {
                channel,
                pitch,
                tick,
            } => write!(
                f,
                "zero-length note {pitch} on channel {channel} at tick {tick} dropped"
            ),
            Warning::ExtraTempoIgnored { tick } => {
                write!(f, "tempo change at tick {tick} ignored")
            }
            Warning::ExtraTimeSignatureIgnored { tick } => {
                write!(f, "time signature change at tick {tick} ignored")
            }
            Warning::SilentVelocityScale => {
                write!(f, "velocity scaling skipped: clip has no notes")
            }
            Warning::PreviewOnlyOptionIgnored { option } => {
                write!(f, "{option} only applies to preview, ignored on export")
            }
            Warning::SkippedFile { file, error } => write!(f, "{file} skipped: {error}"),
        }
    }
}
