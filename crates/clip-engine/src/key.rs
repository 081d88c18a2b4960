use std::path::Path;

use clip_midi::NoteEvent;

use crate::types::{KeyDetection, KeySource, Mode};

/// Krumhansl-Kessler major key profile (duration-weighted perception studies).
const MAJOR_PROFILE: [f64; 12] = [6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88];

/// Krumhansl-Kessler minor key profile.
const MINOR_PROFILE: [f64; 12] = [6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17];

/// Profiles for all 24 keys, indexed by pitch class.
/// Row `2 * root` is `root` major, row `2 * root + 1` is `root` minor.
static KEY_PROFILES: [[f64; 12]; 24] = build_key_profiles();

const fn build_key_profiles() -> [[f64; 12]; 24] {
    let mut table = [[0.0; 12]; 24];
    let mut root = 0;
    while root < 12 {
        let mut pc = 0;
        while pc < 12 {
            let degree = (pc + 12 - root) % 12;
            table[root * 2][pc] = MAJOR_PROFILE[degree];
            table[root * 2 + 1][pc] = MINOR_PROFILE[degree];
            pc += 1;
        }
        root += 1;
    }
    table
}

const NOTE_NAMES_SHARP: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
const NOTE_NAMES_FLAT: [&str; 12] = ["C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B"];

/// Major-scale tonics conventionally written with flats: F Bb Eb Ab Db Gb.
const FLAT_TONICS: [u8; 6] = [5, 10, 3, 8, 1, 6];

/// Mode keywords accepted in file names, matched case-insensitively.
const MODE_KEYWORDS: &[(&str, Mode)] = &[
    ("major", Mode::Major),
    ("maj", Mode::Major),
    ("ionian", Mode::Major),
    ("minor", Mode::Minor),
    ("min", Mode::Minor),
    ("aeolian", Mode::Minor),
    ("m", Mode::Minor),
    ("dorian", Mode::Dorian),
    ("phrygian", Mode::Phrygian),
    ("lydian", Mode::Lydian),
    ("mixolydian", Mode::Mixolydian),
    ("locrian", Mode::Locrian),
];

pub fn note_name(pitch_class: u8, use_flats: bool) -> &'static str {
    let idx = (pitch_class % 12) as usize;
    if use_flats {
        NOTE_NAMES_FLAT[idx]
    } else {
        NOTE_NAMES_SHARP[idx]
    }
}

/// Whether a key is written with flats, judged by its parent major scale.
pub fn prefers_flats(root_pitch_class: u8, mode: Mode) -> bool {
    let tonic = (root_pitch_class % 12 + mode.ionian_offset()) % 12;
    FLAT_TONICS.contains(&tonic)
}

/// Conventional spelling of a key root.
pub fn spell_root(root_pitch_class: u8, mode: Mode) -> &'static str {
    note_name(root_pitch_class, prefers_flats(root_pitch_class, mode))
}

fn mode_keyword(token: &str) -> Option<Mode> {
    MODE_KEYWORDS
        .iter()
        .find(|(word, _)| token.eq_ignore_ascii_case(word))
        .map(|(_, mode)| *mode)
}

/// Candidate roots at the start of a token as `(pitch class, name, bytes used)`,
/// the accidental reading first.
fn root_candidates(token: &str) -> Vec<(u8, String, usize)> {
    let bytes = token.as_bytes();
    let Some(&letter) = bytes.first() else {
        return Vec::new();
    };
    let letter = letter.to_ascii_uppercase();
    let natural = match letter {
        b'C' => 0,
        b'D' => 2,
        b'E' => 4,
        b'F' => 5,
        b'G' => 7,
        b'A' => 9,
        b'B' => 11,
        _ => return Vec::new(),
    };

    let mut candidates = Vec::with_capacity(2);
    match bytes.get(1) {
        Some(b'#') => candidates.push(((natural + 1) % 12, format!("{}#", letter as char), 2)),
        Some(b'b') | Some(b'B') => {
            candidates.push(((natural + 11) % 12, format!("{}b", letter as char), 2))
        }
        _ => {}
    }
    candidates.push((natural, (letter as char).to_string(), 1));
    candidates
}

fn strip_parenthesised(text: &str) -> String {
    let mut depth = 0usize;
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Read a key out of a file name such as `"Dmin_groove.mid"` or
/// `"Lead (v2) F# dorian.mid"`.
///
/// A token matches when it is a root (`A`–`G`, optional `#` or `b`)
/// immediately followed by a mode keyword, or a bare root followed by a
/// separate mode-keyword token. Text in parentheses is ignored.
pub fn key_from_filename(name: &str) -> Option<KeyDetection> {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let cleaned = strip_parenthesised(stem);
    let tokens: Vec<&str> = cleaned
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '#'))
        .filter(|t| !t.is_empty())
        .collect();

    for (i, token) in tokens.iter().enumerate() {
        for (pitch_class, root, used) in root_candidates(token) {
            let rest = &token[used..];
            let mode = if rest.is_empty() {
                // A lone "m" is too ambiguous as a separate word.
                tokens
                    .get(i + 1)
                    .filter(|next| !next.eq_ignore_ascii_case("m"))
                    .and_then(|next| mode_keyword(next))
            } else {
                mode_keyword(rest)
            };

            if let Some(mode) = mode {
                return Some(KeyDetection {
                    root,
                    root_pitch_class: pitch_class,
                    mode,
                    source: KeySource::Filename,
                    confidence: 1.0,
                });
            }
        }
    }

    None
}

/// Detect the key of a clip using the Krumhansl-Schmuckler algorithm.
///
/// Builds a duration-weighted pitch-class histogram (drum channel excluded)
/// and correlates it against all 24 key profiles. Ties go to the lower root,
/// then to major.
pub fn detect_key(notes: &[NoteEvent]) -> KeyDetection {
    let mut histogram = [0.0_f64; 12];
    for note in notes.iter().filter(|n| n.channel != crate::DRUM_CHANNEL) {
        histogram[note.pitch_class() as usize] += note.duration_ticks().max(1) as f64;
    }

    if histogram.iter().all(|&h| h == 0.0) {
        return KeyDetection {
            root: "C".into(),
            root_pitch_class: 0,
            mode: Mode::Major,
            source: KeySource::Analysis,
            confidence: 0.0,
        };
    }

    let mut best = 0usize;
    let mut best_corr = f64::NEG_INFINITY;
    for (index, profile) in KEY_PROFILES.iter().enumerate() {
        let corr = pearson(&histogram, profile);
        if corr > best_corr {
            best_corr = corr;
            best = index;
        }
    }

    let root_pitch_class = (best / 2) as u8;
    let mode = if best % 2 == 0 { Mode::Major } else { Mode::Minor };

    KeyDetection {
        root: spell_root(root_pitch_class, mode).to_string(),
        root_pitch_class,
        mode,
        source: KeySource::Analysis,
        confidence: (best_corr * 10000.0).round() / 10000.0,
    }
}

/// Pearson correlation coefficient between two 12-element arrays.
fn pearson(x: &[f64; 12], y: &[f64; 12]) -> f64 {
    let x_mean: f64 = x.iter().sum::<f64>() / 12.0;
    let y_mean: f64 = y.iter().sum::<f64>() / 12.0;

    let mut num = 0.0;
    let mut x_sq = 0.0;
    let mut y_sq = 0.0;

    for i in 0..12 {
        let xd = x[i] - x_mean;
        let yd = y[i] - y_mean;
        num += xd * yd;
        x_sq += xd * xd;
        y_sq += yd * yd;
    }

    let denom = (x_sq * y_sq).sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    num / denom
}
