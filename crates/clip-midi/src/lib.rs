//! Standard MIDI File plumbing for clip processing: decode SMF bytes into
//! absolute-tick events, pair them into notes, and encode notes back to SMF.

pub mod decode;
pub mod encode;
pub mod extract;
pub mod note;
pub mod warning;

#[cfg(test)]
pub(crate) mod test_support;

pub use decode::{decode, RawEvent, RawEventKind, RawSmf};
pub use encode::{encode, write_smf, TrackSpec};
pub use extract::{extract, Extraction};
pub use note::{sort_notes, Clip, NoteEvent, SmfHeader, Tempo, TimeSignature};
pub use warning::Warning;

/// Errors from decoding Standard MIDI Files.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid MIDI file: {0}")]
    InvalidFormat(String),

    #[error("unsupported division: {0}")]
    UnsupportedDivision(String),

    #[error("truncated MIDI file: {0}")]
    Truncated(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Decode bytes and extract notes in one step.
pub fn decode_clip(bytes: &[u8]) -> Result<(Clip, Vec<Warning>)> {
    let raw = decode(bytes)?;
    Ok(extract(&raw).into_clip(raw.header))
}
