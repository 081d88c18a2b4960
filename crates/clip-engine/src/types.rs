use serde::{Deserialize, Serialize};

/// Musical mode of a key. Analysis only ever yields `Major` or `Minor`; the
/// church modes come from file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
}

impl Mode {
    /// Scale degree of the major scale this mode starts on (ionian = 0).
    fn degree(&self) -> usize {
        match self {
            Mode::Major => 0,
            Mode::Dorian => 1,
            Mode::Phrygian => 2,
            Mode::Lydian => 3,
            Mode::Mixolydian => 4,
            Mode::Minor => 5,
            Mode::Locrian => 6,
        }
    }

    /// Semitone intervals of the mode's scale, measured from its root.
    pub fn intervals(&self) -> [u8; 7] {
        let d = self.degree();
        let mut out = [0u8; 7];
        for (i, slot) in out.iter_mut().enumerate() {
            let step = MAJOR_SCALE[(d + i) % 7] + 12 - MAJOR_SCALE[d];
            *slot = step % 12;
        }
        out
    }

    /// Semitones from the mode's root up to the tonic of its parent major
    /// scale (Dorian: 10, Minor: 3, ...).
    pub fn ionian_offset(&self) -> u8 {
        (12 - MAJOR_SCALE[self.degree()]) % 12
    }

    /// Display name used in file tags.
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Major => "Major",
            Mode::Minor => "Minor",
            Mode::Dorian => "Dorian",
            Mode::Phrygian => "Phrygian",
            Mode::Lydian => "Lydian",
            Mode::Mixolydian => "Mixolydian",
            Mode::Locrian => "Locrian",
        }
    }
}

const MAJOR_SCALE: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Filename,
    Analysis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyDetection {
    /// Root note name: "C", "Db", "F#", etc.
    pub root: String,
    /// Pitch class 0–11 (C=0, C#=1, ...)
    pub root_pitch_class: u8,
    pub mode: Mode,
    pub source: KeySource,
    /// Pearson correlation with the winning profile; 1.0 for file names.
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Rhythmic,
    Monophonic,
    Polyphonic,
}

impl Classification {
    /// Short code used in exported file names.
    pub fn short_code(&self) -> &'static str {
        match self {
            Classification::Rhythmic => "Rhythmic",
            Classification::Monophonic => "Mono",
            Classification::Polyphonic => "Poly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
    Augmented,
    Suspended4,
    Suspended2,
    Dominant7,
    Major7,
    Minor7,
}

impl ChordQuality {
    /// Suffix for chord symbol display
    pub fn suffix(&self) -> &'static str {
        match self {
            ChordQuality::Major => "",
            ChordQuality::Minor => "m",
            ChordQuality::Diminished => "dim",
            ChordQuality::Augmented => "aug",
            ChordQuality::Suspended4 => "sus4",
            ChordQuality::Suspended2 => "sus2",
            ChordQuality::Dominant7 => "7",
            ChordQuality::Major7 => "maj7",
            ChordQuality::Minor7 => "m7",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordEvent {
    /// Index of the beat window where this chord begins.
    pub beat: u64,
    pub start_tick: u64,
    /// Full chord symbol: "Cmaj7", "Dm", "G7"
    pub symbol: String,
    pub root_pitch_class: u8,
    pub quality: ChordQuality,
    pub score: f64,
}

/// Everything the analyzer derives from one clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipMetadata {
    pub root_pitch_class: u8,
    pub root_name: String,
    pub mode: Mode,
    pub key_source: KeySource,
    pub key_confidence: f64,
    /// Distinct pitch classes.
    pub unique_pitch_count: usize,
    /// Distinct MIDI pitches.
    pub unique_note_count: usize,
    /// More distinct pitches than a 16-step user arpeggio phrase can hold.
    pub exceeds_sixteen_notes: bool,
    pub max_polyphony: usize,
    pub classification: Classification,
    pub channels_used: Vec<u8>,
    pub uses_drum_channel: bool,
    /// Hint to load the clip as a fixed-note (drum) type on the device.
    pub suggest_fixed_type: bool,
    pub transpose_to_root_semitones: u8,
    pub chord_progression: Vec<String>,
    pub chords: Vec<ChordEvent>,
    pub tempo_bpm: f64,
    /// "n/d"
    pub time_signature: String,
    pub ppqn: u16,
    pub bars_estimate: f64,
    pub note_count: usize,
}
