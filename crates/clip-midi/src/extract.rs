use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::decode::{RawEvent, RawEventKind, RawSmf};
use crate::note::{sort_notes, Clip, NoteEvent, SmfHeader, Tempo, TimeSignature};
use crate::warning::Warning;

/// Notes and timing context pulled out of a decoded file.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub notes: Vec<NoteEvent>,
    pub tempo: Tempo,
    pub time_signature: TimeSignature,
    pub length_ticks: u64,
    pub track_names: Vec<Option<String>>,
    pub warnings: Vec<Warning>,
}

impl Extraction {
    /// Attach the header to produce a [`Clip`]; warnings are returned beside it.
    pub fn into_clip(self, header: SmfHeader) -> (Clip, Vec<Warning>) {
        let clip = Clip {
            header,
            notes: self.notes,
            tempo: self.tempo,
            time_signature: self.time_signature,
            length_ticks: self.length_ticks,
            track_names: self.track_names,
            name: None,
        };
        (clip, self.warnings)
    }
}

/// Open note-ons per (channel, pitch), oldest first.
type Pending = HashMap<(u8, u8), VecDeque<(u64, u8, usize)>>;

/// Merge every track's events in time order and pair note-ons with note-offs.
///
/// Each note-off (or note-on with velocity 0) closes the oldest open note-on
/// with the same channel and pitch. Note-ons still open at the end are closed
/// at the clip end with an [`Warning::UnmatchedNoteOn`].
pub fn extract(raw: &RawSmf) -> Extraction {
    let ppqn = raw.header.ppqn;

    // Stable sort keeps track order for events sharing a tick.
    let mut merged: Vec<(usize, &RawEvent)> = raw
        .tracks
        .iter()
        .enumerate()
        .flat_map(|(track, events)| events.iter().map(move |e| (track, e)))
        .collect();
    merged.sort_by_key(|(_, e)| e.tick);

    let mut notes = Vec::new();
    let mut warnings = Vec::new();
    let mut pending: Pending = HashMap::new();
    let mut tempo: Option<Tempo> = None;
    let mut time_signature: Option<TimeSignature> = None;
    let mut track_names: Vec<Option<String>> = vec![None; raw.tracks.len()];
    let mut last_tick: u64 = 0;

    for (track, event) in merged {
        let tick = event.tick;
        last_tick = last_tick.max(tick);

        match &event.kind {
            RawEventKind::NoteOn {
                channel,
                pitch,
                velocity,
            } if *velocity > 0 => {
                pending
                    .entry((*channel, *pitch))
                    .or_default()
                    .push_back((tick, *velocity, track));
            }
            RawEventKind::NoteOn { channel, pitch, .. }
            | RawEventKind::NoteOff { channel, pitch } => {
                let Some((start, velocity, source_track)) = pending
                    .get_mut(&(*channel, *pitch))
                    .and_then(|queue| queue.pop_front())
                else {
                    continue;
                };
                if tick > start {
                    notes.push(NoteEvent {
                        pitch: *pitch,
                        velocity,
                        start_tick: start,
                        end_tick: tick,
                        channel: *channel,
                        track: source_track,
                    });
                } else {
                    warnings.push(Warning::ZeroLengthNoteDropped {
                        channel: *channel,
                        pitch: *pitch,
                        tick,
                    });
                }
            }
            RawEventKind::Tempo { micros_per_quarter } => match tempo {
                None => {
                    tempo = Some(Tempo {
                        micros_per_quarter: *micros_per_quarter,
                    })
                }
                Some(first) if first.micros_per_quarter != *micros_per_quarter => {
                    warnings.push(Warning::ExtraTempoIgnored { tick });
                }
                Some(_) => {}
            },
            RawEventKind::TimeSignature {
                numerator,
                denominator,
            } => {
                let ts = TimeSignature {
                    numerator: *numerator,
                    denominator: *denominator,
                };
                match time_signature {
                    None => time_signature = Some(ts),
                    Some(first) if first != ts => {
                        warnings.push(Warning::ExtraTimeSignatureIgnored { tick });
                    }
                    Some(_) => {}
                }
            }
            RawEventKind::TrackName(name) => {
                if track_names[track].is_none() {
                    track_names[track] = Some(name.clone());
                }
            }
            RawEventKind::OtherChannel { .. } | RawEventKind::Other | RawEventKind::EndOfTrack => {}
        }
    }

    let tempo = tempo.unwrap_or_default();
    let time_signature = time_signature.unwrap_or_default();

    let last_end = notes.iter().map(|n| n.end_tick).max().unwrap_or(0);
    let mut length_ticks = time_signature.round_up_to_bar(last_tick.max(last_end), ppqn);

    // Close dangling note-ons at clip end, growing the clip if one starts there.
    let mut unmatched: Vec<((u8, u8), (u64, u8, usize))> = pending
        .into_iter()
        .flat_map(|(key, queue)| queue.into_iter().map(move |open| (key, open)))
        .collect();
    unmatched.sort_by_key(|((channel, pitch), (start, _, _))| (*start, *pitch, *channel));

    if let Some(latest_start) = unmatched.iter().map(|(_, (start, _, _))| *start).max() {
        length_ticks = length_ticks.max(time_signature.round_up_to_bar(latest_start + 1, ppqn));
    }

    for ((channel, pitch), (start, velocity, track)) in unmatched {
        warnings.push(Warning::UnmatchedNoteOn {
            channel,
            pitch,
            start_tick: start,
            closed_at: length_ticks,
        });
        notes.push(NoteEvent {
            pitch,
            velocity,
            start_tick: start,
            end_tick: length_ticks,
            channel,
            track,
        });
    }

    sort_notes(&mut notes);

    for warning in &warnings {
        warn!(%warning, "extract");
    }
    debug!(
        notes = notes.len(),
        length_ticks,
        bpm = tempo.bpm(),
        time_signature = %time_signature,
        "extracted notes"
    );

    Extraction {
        notes,
        tempo,
        time_signature,
        length_ticks,
        track_names,
        warnings,
    }
}
