use clip_midi::{write_smf, Clip, Tempo, TimeSignature, TrackSpec};
use tracing::info;

use crate::config::check_ppqn;
use crate::transform::resample;
use crate::{Error, Result};

/// Most clips a packed file can carry; the target device has four tracks.
pub const MAX_PACK_CLIPS: usize = 4;

/// Resolution of an empty pack with no forced PPQN.
const FALLBACK_PPQN: u16 = 480;

/// Merge up to four clips into one format-1 file.
///
/// Track 0 carries tempo and time signature from the first clip. Each clip
/// then gets its own track, named after the clip, with its channels left as
/// they are. Clips not at the target resolution are resampled first; the
/// target is `force_ppqn` or else the highest input resolution.
pub fn pack(clips: &[Clip], force_ppqn: Option<u16>) -> Result<Vec<u8>> {
    if clips.len() > MAX_PACK_CLIPS {
        return Err(Error::TooManyTracks { given: clips.len() });
    }
    if let Some(ppqn) = force_ppqn {
        check_ppqn(ppqn)?;
    }

    let ppqn = force_ppqn
        .or_else(|| clips.iter().map(|c| c.ppqn()).max())
        .unwrap_or(FALLBACK_PPQN);

    let resampled: Vec<Clip> = clips.iter().map(|c| resample(c, ppqn)).collect();

    let timing = resampled
        .first()
        .map(|c| (c.tempo, c.time_signature))
        .unwrap_or((Tempo::default(), TimeSignature::default()));
    let end_tick = resampled.iter().map(|c| c.length_ticks).max().unwrap_or(0);

    let mut tracks = Vec::with_capacity(resampled.len() + 1);
    tracks.push(TrackSpec {
        name: None,
        timing: Some(timing),
        notes: Vec::new(),
        end_tick,
    });
    for clip in &resampled {
        tracks.push(TrackSpec {
            name: clip.name.as_deref(),
            timing: None,
            notes: clip.notes.iter().collect(),
            end_tick: clip.length_ticks,
        });
    }

    let bytes = write_smf(1, ppqn, &tracks);
    info!(clips = clips.len(), ppqn, bytes = bytes.len(), "packed clips");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clip_midi::{decode, NoteEvent, RawEventKind, SmfHeader};
    use pretty_assertions::assert_eq;

    fn make_clip(name: &str, ppqn: u16, channel: u8, pitch: u8) -> Clip {
        let quarter = ppqn as u64;
        Clip {
            header: SmfHeader {
                format: 0,
                track_count: 1,
                ppqn,
            },
            notes: vec![NoteEvent {
                pitch,
                velocity: 100,
                start_tick: quarter,
                end_tick: quarter * 2,
                channel,
                track: 0,
            }],
            tempo: Tempo::from_bpm(100.0),
            time_signature: TimeSignature::default(),
            length_ticks: quarter * 4,
            track_names: vec![],
            name: Some(name.to_string()),
        }
    }

    fn note_ons(events: &[clip_midi::RawEvent]) -> Vec<(u64, u8, u8)> {
        events
            .iter()
            .filter_map(|e| match e.kind {
                RawEventKind::NoteOn {
                    channel, pitch, ..
                } => Some((e.tick, channel, pitch)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn rejects_more_than_four() {
        let clips: Vec<_> = (0..5).map(|i| make_clip("x", 480, 0, 60 + i)).collect();
        assert!(matches!(pack(&clips, None), Err(Error::TooManyTracks { given: 5 })));
    }

    #[test]
    fn rejects_unwritable_resolution() {
        let clips = vec![make_clip("lead", 480, 0, 72)];
        for ppqn in [0, 0x8000, u16::MAX] {
            assert!(
                matches!(pack(&clips, Some(ppqn)), Err(Error::InvalidConfig(_))),
                "ppqn {ppqn} should be rejected"
            );
        }
        let bytes = pack(&clips, Some(0x7FFF)).unwrap();
        assert_eq!(decode(&bytes).unwrap().header.ppqn, 0x7FFF);
    }

    #[test]
    fn empty_pack_is_tempo_track_only() {
        let bytes = pack(&[], None).unwrap();
        let raw = decode(&bytes).unwrap();
        assert_eq!(raw.header.ppqn, 480);
        assert_eq!(raw.tracks.len(), 1);
    }

    #[test]
    fn uses_highest_resolution_and_keeps_channels() {
        let clips = vec![make_clip("bass", 96, 1, 36), make_clip("keys", 480, 1, 60)];
        let raw = decode(&pack(&clips, None).unwrap()).unwrap();

        assert_eq!(raw.header.format, 1);
        assert_eq!(raw.header.ppqn, 480);
        assert_eq!(raw.tracks.len(), 3);
        assert!(note_ons(&raw.tracks[0]).is_empty());
        assert_eq!(note_ons(&raw.tracks[1]), vec![(480, 1, 36)]);
        assert_eq!(note_ons(&raw.tracks[2]), vec![(480, 1, 60)]);
        assert!(matches!(&raw.tracks[1][0].kind, RawEventKind::TrackName(n) if n == "bass"));
    }

    #[test]
    fn forced_resolution_and_first_clip_tempo() {
        let mut second = make_clip("pad", 480, 2, 64);
        second.tempo = Tempo::from_bpm(140.0);
        let clips = vec![make_clip("lead", 480, 0, 72), second];
        let raw = decode(&pack(&clips, Some(96)).unwrap()).unwrap();

        assert_eq!(raw.header.ppqn, 96);
        let tempos: Vec<u32> = raw
            .tracks
            .iter()
            .flatten()
            .filter_map(|e| match e.kind {
                RawEventKind::Tempo { micros_per_quarter } => Some(micros_per_quarter),
                _ => None,
            })
            .collect();
        assert_eq!(tempos, vec![600_000]);
        assert_eq!(note_ons(&raw.tracks[2]), vec![(96, 2, 64)]);
    }
}
