//! Pure clip-to-clip transforms.
//!
//! Every function takes a borrowed clip and returns a new one, so a decoded
//! source can be previewed with different settings any number of times.

use clip_midi::{sort_notes, Clip, Warning};
use tracing::{debug, warn};

use crate::config::TransformConfig;
use crate::types::ClipMetadata;

/// Where a transformed clip is headed. Some options only make sense for
/// playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preview,
    Export,
}

/// A transformed clip and the warnings raised while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub clip: Clip,
    pub warnings: Vec<Warning>,
}

/// Shift every pitch by `semitones`, clamped to 0..=127.
pub fn transpose(clip: &Clip, semitones: i32) -> Clip {
    let mut out = clip.clone();
    if semitones == 0 {
        return out;
    }
    for note in &mut out.notes {
        note.pitch = (note.pitch as i32 + semitones).clamp(0, 127) as u8;
    }
    sort_notes(&mut out.notes);
    out
}

/// Transpose so the detected key root becomes C, keeping the mode.
pub fn normalize_to_c(clip: &Clip, metadata: &ClipMetadata) -> Clip {
    transpose(clip, metadata.transpose_to_root_semitones as i32)
}

/// Cut the clip at `bars` whole bars.
///
/// Notes starting at or after the cut are dropped and notes sounding across
/// it end exactly on it.
pub fn truncate_to_bars(clip: &Clip, bars: u32) -> Clip {
    let boundary = bars as u64 * clip.ticks_per_bar();
    let mut out = clip.clone();
    out.notes.retain(|n| n.start_tick < boundary);
    for note in &mut out.notes {
        note.end_tick = note.end_tick.min(boundary);
    }
    out.length_ticks = out.length_ticks.min(boundary);
    out
}

/// Rescale velocities so the loudest note lands on `target`.
///
/// A clip without notes is returned unchanged with a warning.
pub fn scale_velocity(clip: &Clip, target: u8) -> (Clip, Option<Warning>) {
    let mut out = clip.clone();
    let Some(loudest) = clip.notes.iter().map(|n| n.velocity as u32).max().filter(|&v| v > 0) else {
        return (out, Some(Warning::SilentVelocityScale));
    };

    let target = target.clamp(1, 127) as u32;
    for note in &mut out.notes {
        let scaled = (note.velocity as u32 * target * 2 + loudest) / (loudest * 2);
        note.velocity = scaled.clamp(1, 127) as u8;
    }
    (out, None)
}

/// Convert a tick from one resolution to another, rounding half up.
pub fn resample_tick(tick: u64, from_ppqn: u16, to_ppqn: u16) -> u64 {
    let from = from_ppqn.max(1) as u128;
    let scaled = (tick as u128 * to_ppqn as u128 + from / 2) / from;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Re-time the clip at `target_ppqn` ticks per quarter note.
///
/// Notes that would collapse to zero length keep one tick.
pub fn resample(clip: &Clip, target_ppqn: u16) -> Clip {
    let from = clip.ppqn();
    if from == target_ppqn || target_ppqn == 0 {
        return clip.clone();
    }

    let mut out = clip.clone();
    out.header.ppqn = target_ppqn;
    for note in &mut out.notes {
        note.start_tick = resample_tick(note.start_tick, from, target_ppqn);
        note.end_tick = resample_tick(note.end_tick, from, target_ppqn).max(note.start_tick + 1);
    }
    sort_notes(&mut out.notes);

    let bars = clip.bar_count() * out.ticks_per_bar();
    out.length_ticks = bars.max(
        out.time_signature
            .round_up_to_bar(out.last_note_end(), target_ppqn),
    );

    debug!(from, to = target_ppqn, length = out.length_ticks, "resampled clip");
    out
}

/// Smallest power-of-two bar count that holds the whole clip.
pub fn power_of_two_bars(clip: &Clip) -> u64 {
    clip.bar_count().max(1).next_power_of_two()
}

/// Run the fixed pipeline: transpose, truncate, velocity, resample.
///
/// `round_power_of_two` only applies to [`Stage::Preview`]; on export it is
/// ignored with a warning.
pub fn apply(
    clip: &Clip,
    metadata: &ClipMetadata,
    config: &TransformConfig,
    stage: Stage,
) -> Transformed {
    let mut warnings = Vec::new();

    let mut out = if config.normalize_to_c {
        normalize_to_c(clip, metadata)
    } else {
        clip.clone()
    };

    if let Some(bars) = config.max_bars {
        out = truncate_to_bars(&out, bars);
    }

    if config.velocity_scale {
        let (scaled, warning) = scale_velocity(&out, config.velocity_target);
        out = scaled;
        warnings.extend(warning);
    }

    if let Some(ppqn) = config.force_ppqn {
        out = resample(&out, ppqn);
    }

    if config.round_power_of_two {
        match stage {
            Stage::Preview => {
                out.length_ticks = power_of_two_bars(&out) * out.ticks_per_bar();
            }
            Stage::Export => warnings.push(Warning::PreviewOnlyOptionIgnored {
                option: "round_power_of_two".into(),
            }),
        }
    }

    for warning in &warnings {
        warn!(%warning, "transform");
    }

    Transformed {
        clip: out,
        warnings,
    }
}
