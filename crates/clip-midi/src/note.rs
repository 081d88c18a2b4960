use serde::{Deserialize, Serialize};

/// Default tempo: 120 BPM.
pub const DEFAULT_MICROS_PER_QUARTER: u32 = 500_000;

/// A single MIDI note with absolute tick timing.
///
/// `end_tick` is always greater than `start_tick` for notes produced by the
/// extractor and by every transform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: u8,
    pub velocity: u8,
    pub start_tick: u64,
    pub end_tick: u64,
    pub channel: u8,
    /// Index of the source track chunk the note was read from.
    pub track: usize,
}

impl NoteEvent {
    pub fn duration_ticks(&self) -> u64 {
        self.end_tick.saturating_sub(self.start_tick)
    }

    pub fn pitch_class(&self) -> u8 {
        self.pitch % 12
    }

    /// Whether the note is sounding anywhere inside `[from, to)`.
    pub fn overlaps(&self, from: u64, to: u64) -> bool {
        self.start_tick < to && self.end_tick > from
    }
}

/// Sort notes by start tick, ties broken by ascending pitch.
pub fn sort_notes(notes: &mut [NoteEvent]) {
    notes.sort_by(|a, b| {
        a.start_tick
            .cmp(&b.start_tick)
            .then(a.pitch.cmp(&b.pitch))
            .then(a.channel.cmp(&b.channel))
            .then(a.end_tick.cmp(&b.end_tick))
    });
}

/// Tempo as microseconds per quarter note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tempo {
    pub micros_per_quarter: u32,
}

impl Tempo {
    pub fn from_bpm(bpm: f64) -> Self {
        Self {
            micros_per_quarter: (60_000_000.0 / bpm).round() as u32,
        }
    }

    pub fn bpm(&self) -> f64 {
        60_000_000.0 / self.micros_per_quarter.max(1) as f64
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self {
            micros_per_quarter: DEFAULT_MICROS_PER_QUARTER,
        }
    }
}

/// Time signature. The denominator is stored as the note value (4, 8, ...),
/// not as the power-of-two exponent used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl TimeSignature {
    /// `ppqn × 4 × numerator / denominator`, rounded, never zero.
    pub fn ticks_per_bar(&self, ppqn: u16) -> u64 {
        let num = ppqn as u64 * 4 * self.numerator as u64;
        let den = self.denominator.max(1) as u64;
        ((num + den / 2) / den).max(1)
    }

    /// Length of one beat (one denominator note), rounded, never zero.
    pub fn ticks_per_beat(&self, ppqn: u16) -> u64 {
        let den = self.denominator.max(1) as u64;
        ((ppqn as u64 * 4 + den / 2) / den).max(1)
    }

    /// Round `tick` up to the next whole bar boundary.
    pub fn round_up_to_bar(&self, tick: u64, ppqn: u16) -> u64 {
        let bar = self.ticks_per_bar(ppqn);
        tick.div_ceil(bar) * bar
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

impl std::fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// SMF header fields that survive into a [`Clip`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmfHeader {
    /// 0 (single track) or 1 (parallel tracks).
    pub format: u16,
    /// Declared number of track chunks.
    pub track_count: u16,
    /// Ticks per quarter note.
    pub ppqn: u16,
}

/// A decoded MIDI clip: notes plus the timing context needed to re-encode it.
///
/// Clips are values. Every transform returns a new `Clip` and leaves its
/// input untouched so the same source can be previewed repeatedly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub header: SmfHeader,
    /// Sorted by start tick, then pitch.
    pub notes: Vec<NoteEvent>,
    pub tempo: Tempo,
    pub time_signature: TimeSignature,
    /// Clip length rounded up to a whole bar.
    pub length_ticks: u64,
    /// Track name per source track chunk, if one was present.
    pub track_names: Vec<Option<String>>,
    /// Human name of the clip, usually the file stem.
    pub name: Option<String>,
}

impl Clip {
    pub fn ppqn(&self) -> u16 {
        self.header.ppqn
    }

    pub fn ticks_per_bar(&self) -> u64 {
        self.time_signature.ticks_per_bar(self.header.ppqn)
    }

    /// Whole bars covered by `length_ticks`.
    pub fn bar_count(&self) -> u64 {
        self.length_ticks.div_ceil(self.ticks_per_bar())
    }

    /// Latest note end, or 0 for an empty clip.
    pub fn last_note_end(&self) -> u64 {
        self.notes.iter().map(|n| n.end_tick).max().unwrap_or(0)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
