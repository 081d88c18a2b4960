use crate::key::note_name;
use crate::types::ChordQuality;

/// A chord template: quality enum + interval set from root (as bitmask over 12 pitch classes).
pub struct ChordTemplate {
    pub quality: ChordQuality,
    pub intervals: u16, // bitmask: bit i set means interval i is in the template
    pub size: u32,
}

impl ChordTemplate {
    const fn new(quality: ChordQuality, intervals: &[u8]) -> Self {
        let mut mask = 0u16;
        let mut i = 0;
        while i < intervals.len() {
            mask |= 1 << intervals[i];
            i += 1;
        }
        Self {
            quality,
            intervals: mask,
            size: intervals.len() as u32,
        }
    }
}

/// Recognized chord templates, simplest first. Ties are resolved in this order.
pub static TEMPLATES: &[ChordTemplate] = &[
    ChordTemplate::new(ChordQuality::Major, &[0, 4, 7]),
    ChordTemplate::new(ChordQuality::Minor, &[0, 3, 7]),
    ChordTemplate::new(ChordQuality::Diminished, &[0, 3, 6]),
    ChordTemplate::new(ChordQuality::Augmented, &[0, 4, 8]),
    ChordTemplate::new(ChordQuality::Suspended4, &[0, 5, 7]),
    ChordTemplate::new(ChordQuality::Suspended2, &[0, 2, 7]),
    ChordTemplate::new(ChordQuality::Dominant7, &[0, 4, 7, 10]),
    ChordTemplate::new(ChordQuality::Major7, &[0, 4, 7, 11]),
    ChordTemplate::new(ChordQuality::Minor7, &[0, 3, 7, 10]),
];

/// Penalty per template tone missing from the window and per window tone
/// outside the template.
const MISMATCH_PENALTY: f64 = 0.5;

/// Best template match for a pitch-class set.
#[derive(Debug, Clone, PartialEq)]
pub struct ChordMatch {
    pub root: u8,
    pub quality: ChordQuality,
    pub symbol: String,
    pub score: f64,
}

/// Bitmask of the pitch classes present in `pitches` (any octave).
pub fn pitch_class_mask(pitches: impl IntoIterator<Item = u8>) -> u16 {
    pitches.into_iter().fold(0u16, |mask, p| mask | 1 << (p % 12))
}

/// Rotate a pitch-class mask so `root` becomes interval 0.
fn to_interval_mask(pitch_classes: u16, root: u8) -> u16 {
    let r = root as u32 % 12;
    ((pitch_classes >> r) | (pitch_classes << (12 - r))) & 0x0FFF
}

struct Candidate {
    root: u8,
    template: usize,
    score: f64,
    bass_root: bool,
}

/// Match a pitch-class set against the chord templates.
///
/// Every template is tried at every root and scored as
/// `matched - 0.5 * (missing + extra)`; at least two template tones must be
/// present. Among equal scores the smaller template wins, then a root equal
/// to `bass`, then the earlier template, then the lower root.
pub fn match_chord(pitch_classes: u16, bass: Option<u8>, use_flats: bool) -> Option<ChordMatch> {
    let pitch_classes = pitch_classes & 0x0FFF;
    if pitch_classes.count_ones() < 2 {
        return None;
    }

    let mut candidates = Vec::new();
    for root in 0..12u8 {
        let intervals = to_interval_mask(pitch_classes, root);

        for (index, template) in TEMPLATES.iter().enumerate() {
            let matched = (intervals & template.intervals).count_ones();
            if matched < 2 {
                continue;
            }
            let missing = template.size - matched;
            let extra = (intervals & !template.intervals).count_ones();

            candidates.push(Candidate {
                root,
                template: index,
                score: matched as f64 - MISMATCH_PENALTY * (missing + extra) as f64,
                bass_root: bass.map(|b| b % 12) == Some(root),
            });
        }
    }

    let best = candidates.into_iter().min_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(TEMPLATES[a.template].size.cmp(&TEMPLATES[b.template].size))
            .then(b.bass_root.cmp(&a.bass_root))
            .then(a.template.cmp(&b.template))
            .then(a.root.cmp(&b.root))
    })?;

    let quality = TEMPLATES[best.template].quality;
    Some(ChordMatch {
        root: best.root,
        quality,
        symbol: format!("{}{}", note_name(best.root, use_flats), quality.suffix()),
        score: best.score,
    })
}
