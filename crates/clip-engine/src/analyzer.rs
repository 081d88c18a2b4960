use std::collections::BTreeSet;

use clip_midi::{Clip, NoteEvent};
use tracing::debug;

use crate::chords::infer_chords;
use crate::key::{detect_key, key_from_filename};
use crate::types::{ChordEvent, Classification, ClipMetadata, KeyDetection};

/// Distinct pitches above this count do not fit a 16-step user arpeggio.
const ARPEGGIO_NOTE_LIMIT: usize = 16;

/// Trait for clip analysis backends.
pub trait ClipAnalyzer: Send + Sync {
    fn detect_key(&self, clip: &Clip, filename_hint: Option<&str>) -> KeyDetection;

    fn infer_chords(&self, clip: &Clip, key: &KeyDetection) -> Vec<ChordEvent>;
}

/// Heuristic analyzer: file-name key grammar with Krumhansl-Schmuckler
/// fallback, and template-matching chord inference.
pub struct HeuristicAnalyzer;

impl ClipAnalyzer for HeuristicAnalyzer {
    fn detect_key(&self, clip: &Clip, filename_hint: Option<&str>) -> KeyDetection {
        filename_hint
            .and_then(key_from_filename)
            .unwrap_or_else(|| detect_key(&clip.notes))
    }

    fn infer_chords(&self, clip: &Clip, key: &KeyDetection) -> Vec<ChordEvent> {
        infer_chords(clip, key)
    }
}

/// Peak number of simultaneously sounding notes.
///
/// Sweep over note boundaries; at equal ticks starts are counted before
/// ends, so a note that begins exactly where another stops overlaps it.
pub fn max_polyphony(notes: &[NoteEvent]) -> usize {
    let mut events: Vec<(u64, i32)> = Vec::with_capacity(notes.len() * 2);
    for note in notes {
        events.push((note.start_tick, 1));
        events.push((note.end_tick, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut current = 0i32;
    let mut max = 0i32;
    for (_, delta) in events {
        current += delta;
        max = max.max(current);
    }
    max as usize
}

/// Rhythmic when at most one pitch class is used, Monophonic when no two
/// notes ever sound together, Polyphonic otherwise.
pub fn classify(unique_pitch_count: usize, max_polyphony: usize) -> Classification {
    if unique_pitch_count <= 1 {
        Classification::Rhythmic
    } else if max_polyphony == 1 {
        Classification::Monophonic
    } else {
        Classification::Polyphonic
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Derive the full metadata record for a clip.
pub fn analyze_clip(
    analyzer: &dyn ClipAnalyzer,
    clip: &Clip,
    filename_hint: Option<&str>,
) -> ClipMetadata {
    let key = analyzer.detect_key(clip, filename_hint);

    let pitch_classes: BTreeSet<u8> = clip.notes.iter().map(|n| n.pitch_class()).collect();
    let pitches: BTreeSet<u8> = clip.notes.iter().map(|n| n.pitch).collect();
    let channels: BTreeSet<u8> = clip.notes.iter().map(|n| n.channel).collect();
    let uses_drum_channel = channels.contains(&crate::DRUM_CHANNEL);

    let max_polyphony = max_polyphony(&clip.notes);
    let classification = classify(pitch_classes.len(), max_polyphony);

    let chords = analyzer.infer_chords(clip, &key);
    let chord_progression = chords.iter().map(|c| c.symbol.clone()).collect();

    let bars_estimate = clip.last_note_end() as f64 / clip.ticks_per_bar() as f64;

    debug!(
        root = %key.root,
        mode = %key.mode,
        source = ?key.source,
        polyphony = max_polyphony,
        class = classification.short_code(),
        chords = chords.len(),
        "analyzed clip"
    );

    ClipMetadata {
        root_pitch_class: key.root_pitch_class,
        root_name: key.root,
        mode: key.mode,
        key_source: key.source,
        key_confidence: key.confidence,
        unique_pitch_count: pitch_classes.len(),
        unique_note_count: pitches.len(),
        exceeds_sixteen_notes: pitches.len() > ARPEGGIO_NOTE_LIMIT,
        max_polyphony,
        classification,
        channels_used: channels.into_iter().collect(),
        uses_drum_channel,
        suggest_fixed_type: uses_drum_channel,
        transpose_to_root_semitones: (12 - key.root_pitch_class % 12) % 12,
        chord_progression,
        chords,
        tempo_bpm: round_to(clip.tempo.bpm(), 2),
        time_signature: clip.time_signature.to_string(),
        ppqn: clip.ppqn(),
        bars_estimate: round_to(bars_estimate, 3),
        note_count: clip.notes.len(),
    }
}
