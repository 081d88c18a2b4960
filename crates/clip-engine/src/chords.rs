use std::collections::BTreeSet;

use clip_midi::{Clip, NoteEvent};

use crate::chord_templates::{match_chord, pitch_class_mask};
use crate::key::prefers_flats;
use crate::types::{ChordEvent, KeyDetection};

/// Label each beat of a clip with a chord symbol.
///
/// A beat is one time-signature denominator note. Every note sounding
/// anywhere in a beat window contributes its pitch class, and the lowest
/// sounding pitch is the bass hint. Drum-channel notes are ignored.
/// Consecutive identical labels collapse into one event.
pub fn infer_chords(clip: &Clip, key: &KeyDetection) -> Vec<ChordEvent> {
    let notes: Vec<_> = clip
        .notes
        .iter()
        .filter(|n| n.channel != crate::DRUM_CHANNEL)
        .collect();
    if notes.is_empty() {
        return Vec::new();
    }

    let use_flats = prefers_flats(key.root_pitch_class, key.mode);
    let beat_ticks = clip.time_signature.ticks_per_beat(clip.ppqn()).max(1);

    let mut chords: Vec<ChordEvent> = Vec::new();
    for beat in window_starts(&notes, beat_ticks) {
        let from = beat * beat_ticks;
        let to = from + beat_ticks;

        let sounding: Vec<u8> = notes
            .iter()
            .filter(|n| n.overlaps(from, to))
            .map(|n| n.pitch)
            .collect();
        let bass = sounding.iter().min().copied();

        if let Some(found) = match_chord(pitch_class_mask(sounding), bass, use_flats) {
            if chords.last().map(|c| c.symbol.as_str()) != Some(found.symbol.as_str()) {
                chords.push(ChordEvent {
                    beat,
                    start_tick: from,
                    symbol: found.symbol,
                    root_pitch_class: found.root,
                    quality: found.quality,
                    score: found.score,
                });
            }
        }
    }

    chords
}

/// Beat windows whose sounding set can differ from the window before.
///
/// Only windows holding a note start or end, and the window right after
/// them, can change the set. Every other window repeats its predecessor and
/// would collapse anyway, so the work stays proportional to the note count
/// however far apart the notes are.
fn window_starts(notes: &[&NoteEvent], beat_ticks: u64) -> BTreeSet<u64> {
    let mut beats = BTreeSet::new();
    for note in notes {
        let first = note.start_tick / beat_ticks;
        let last = note.end_tick.saturating_sub(1).max(note.start_tick) / beat_ticks;
        beats.extend([first, first + 1, last, last + 1]);
    }
    beats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KeySource, Mode};
    use clip_midi::{SmfHeader, Tempo, TimeSignature};
    use pretty_assertions::assert_eq;

    fn make_note(pitch: u8, onset: u64, offset: u64) -> NoteEvent {
        NoteEvent {
            pitch,
            velocity: 80,
            start_tick: onset,
            end_tick: offset,
            channel: 0,
            track: 0,
        }
    }

    fn clip(notes: Vec<NoteEvent>, length_ticks: u64) -> Clip {
        Clip {
            header: SmfHeader {
                format: 0,
                track_count: 1,
                ppqn: 480,
            },
            notes,
            tempo: Tempo::default(),
            time_signature: TimeSignature::default(),
            length_ticks,
            track_names: vec![],
            name: None,
        }
    }

    fn key(root_pitch_class: u8, mode: Mode) -> KeyDetection {
        KeyDetection {
            root: String::new(),
            root_pitch_class,
            mode,
            source: KeySource::Analysis,
            confidence: 0.9,
        }
    }

    fn symbols(chords: &[ChordEvent]) -> Vec<&str> {
        chords.iter().map(|c| c.symbol.as_str()).collect()
    }

    #[test]
    fn empty_notes_empty_chords() {
        let result = infer_chords(&clip(vec![], 1920), &key(0, Mode::Major));
        assert!(result.is_empty());
    }

    #[test]
    fn held_chord_collapses_to_one_label() {
        let notes = vec![make_note(62, 0, 1920), make_note(65, 0, 1920), make_note(69, 0, 1920)];
        let chords = infer_chords(&clip(notes, 1920), &key(2, Mode::Minor));
        assert_eq!(symbols(&chords), vec!["Dm"]);
        assert_eq!((chords[0].beat, chords[0].start_tick), (0, 0));
    }

    #[test]
    fn chord_change_emits_new_event() {
        let notes = vec![
            make_note(60, 0, 960),
            make_note(64, 0, 960),
            make_note(67, 0, 960),
            make_note(70, 0, 960),
            make_note(65, 960, 1920),
            make_note(69, 960, 1920),
            make_note(72, 960, 1920),
        ];
        let chords = infer_chords(&clip(notes, 1920), &key(5, Mode::Major));
        assert_eq!(symbols(&chords), vec!["C7", "F"]);
        assert_eq!(chords[1].beat, 2);
        assert_eq!(chords[1].start_tick, 960);
    }

    #[test]
    fn repeated_label_after_gap_collapses() {
        // C, rest, C: the silent beat does not break the run.
        let notes = vec![
            make_note(60, 0, 480),
            make_note(64, 0, 480),
            make_note(67, 0, 480),
            make_note(60, 960, 1440),
            make_note(64, 960, 1440),
            make_note(67, 960, 1440),
        ];
        let chords = infer_chords(&clip(notes, 1920), &key(0, Mode::Major));
        assert_eq!(symbols(&chords), vec!["C"]);
    }

    #[test]
    fn bass_note_picks_root() {
        let notes = vec![make_note(60, 0, 960), make_note(62, 0, 960), make_note(43, 0, 960)];
        let chords = infer_chords(&clip(notes, 1920), &key(0, Mode::Major));
        assert_eq!(symbols(&chords), vec!["Gsus4"]);
    }

    #[test]
    fn flats_follow_key() {
        let notes = vec![make_note(70, 0, 480), make_note(74, 0, 480), make_note(77, 0, 480)];
        let chords = infer_chords(&clip(notes, 1920), &key(5, Mode::Major));
        assert_eq!(symbols(&chords), vec!["Bb"]);
    }

    #[test]
    fn far_apart_notes_stay_cheap() {
        let far = 480u64 << 30;
        let notes = vec![
            make_note(60, 0, 480),
            make_note(64, 0, 480),
            make_note(67, 0, 480),
            make_note(62, far, far + 480),
            make_note(65, far, far + 480),
            make_note(69, far, far + 480),
        ];
        let chords = infer_chords(&clip(notes, far + 1920), &key(0, Mode::Major));
        assert_eq!(symbols(&chords), vec!["C", "Dm"]);
        assert_eq!(chords[1].start_tick, far);
        assert_eq!(chords[1].beat, 1 << 30);
    }

    #[test]
    fn long_held_note_under_changes() {
        // Pedal C under C then F major triads, each two bars long.
        let notes = vec![
            make_note(48, 0, 7680),
            make_note(64, 0, 3840),
            make_note(67, 0, 3840),
            make_note(65, 3840, 7680),
            make_note(69, 3840, 7680),
        ];
        let chords = infer_chords(&clip(notes, 7680), &key(0, Mode::Major));
        assert_eq!(symbols(&chords), vec!["C", "F"]);
        assert_eq!(chords[1].start_tick, 3840);
    }

    #[test]
    fn drum_channel_ignored() {
        let mut kick = make_note(36, 0, 1920);
        kick.channel = crate::DRUM_CHANNEL;
        let mut snare = make_note(40, 0, 1920);
        snare.channel = crate::DRUM_CHANNEL;
        let chords = infer_chords(&clip(vec![kick, snare], 1920), &key(0, Mode::Major));
        assert!(chords.is_empty());
    }
}
