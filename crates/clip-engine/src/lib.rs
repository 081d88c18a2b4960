//! Clip analysis and transformation engine.
//!
//! Decodes SMF bytes through `clip-midi`, derives key, polyphony and chord
//! metadata, runs the transform pipeline and encodes or packs the result.

pub mod analyzer;
pub mod chord_templates;
pub mod chords;
pub mod config;
pub mod export;
pub mod key;
pub mod pack;
pub mod transform;
pub mod types;

pub use analyzer::{analyze_clip, ClipAnalyzer, HeuristicAnalyzer};
pub use clip_midi::{Clip, NoteEvent, Warning};
pub use config::{ConfigSources, EngineConfig, TransformConfig};
pub use export::{BatchReport, ExportTags, ExportedFile};
pub use pack::MAX_PACK_CLIPS;
pub use transform::{Stage, Transformed};
pub use types::{
    ChordEvent, ChordQuality, Classification, ClipMetadata, KeyDetection, KeySource, Mode,
};

use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{info, instrument, warn};

/// General MIDI percussion channel (channel 10, zero-based).
pub const DRUM_CHANNEL: u8 = 9;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Midi(#[from] clip_midi::Error),

    #[error("too many clips to pack: {given} (max 4)")]
    TooManyTracks { given: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    Config { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A decoded clip with its metadata and decode warnings.
#[derive(Debug, Clone)]
pub struct AnalyzedClip {
    pub clip: Clip,
    pub metadata: ClipMetadata,
    pub warnings: Vec<Warning>,
}

/// Notes ready for a renderer or player.
#[derive(Debug, Clone)]
pub struct Preview {
    /// Sorted by start tick, then pitch.
    pub notes: Vec<NoteEvent>,
    pub ppqn: u16,
    pub tempo_bpm: f64,
    /// Playback loop length, stretched to a power-of-two bar count when asked.
    pub loop_ticks: u64,
    /// Metadata of the untransformed source.
    pub metadata: ClipMetadata,
    pub warnings: Vec<Warning>,
}

/// Encoded result of one export.
#[derive(Debug, Clone)]
pub struct Export {
    pub bytes: Vec<u8>,
    pub tags: ExportTags,
    /// Metadata of the untransformed source.
    pub metadata: ClipMetadata,
    pub warnings: Vec<Warning>,
}

/// One clip going into a pack.
#[derive(Debug, Clone)]
pub struct PackInput<'a> {
    pub bytes: &'a [u8],
    pub filename_hint: Option<&'a str>,
    pub config: TransformConfig,
}

/// Encoded multi-track pack.
#[derive(Debug, Clone)]
pub struct Packed {
    pub bytes: Vec<u8>,
    /// `<stem>_<class>_OrgRoot=<root>` per packed clip, in track order.
    pub descriptors: Vec<String>,
    pub warnings: Vec<Warning>,
}

/// Clip engine entry point.
///
/// Holds no clip state between calls: every operation decodes its own input
/// and works on its own values, so one engine can serve concurrent requests.
pub struct ClipEngine {
    analyzer: Arc<dyn ClipAnalyzer>,
    config: EngineConfig,
}

impl ClipEngine {
    /// Create with the default heuristic analyzer.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            analyzer: Arc::new(HeuristicAnalyzer),
            config,
        }
    }

    /// Create with a custom analyzer (for testing or another backend).
    pub fn with_analyzer(analyzer: Arc<dyn ClipAnalyzer>, config: EngineConfig) -> Self {
        Self { analyzer, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decode bytes and analyze the clip, keeping everything.
    pub fn load(&self, bytes: &[u8], filename_hint: Option<&str>) -> Result<AnalyzedClip> {
        let (mut clip, warnings) = clip_midi::decode_clip(bytes)?;
        if let Some(hint) = filename_hint {
            clip = clip.with_name(export::file_stem(hint));
        }
        let metadata = analyze_clip(self.analyzer.as_ref(), &clip, filename_hint);
        Ok(AnalyzedClip {
            clip,
            metadata,
            warnings,
        })
    }

    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub fn decode_and_analyze(
        &self,
        bytes: &[u8],
        filename_hint: Option<&str>,
    ) -> Result<ClipMetadata> {
        Ok(self.load(bytes, filename_hint)?.metadata)
    }

    /// Transformed notes for playback. Power-of-two looping applies here.
    #[instrument(skip(self, bytes, config), fields(bytes = bytes.len()))]
    pub fn preview(
        &self,
        bytes: &[u8],
        filename_hint: Option<&str>,
        config: &TransformConfig,
    ) -> Result<Preview> {
        config.validate()?;
        let loaded = self.load(bytes, filename_hint)?;
        let transformed = transform::apply(&loaded.clip, &loaded.metadata, config, Stage::Preview);

        let mut warnings = loaded.warnings;
        warnings.extend(transformed.warnings);

        let clip = transformed.clip;
        Ok(Preview {
            ppqn: clip.ppqn(),
            tempo_bpm: loaded.metadata.tempo_bpm,
            loop_ticks: clip.length_ticks,
            notes: clip.notes,
            metadata: loaded.metadata,
            warnings,
        })
    }

    /// Transform and encode one clip.
    #[instrument(skip(self, bytes, config), fields(bytes = bytes.len()))]
    pub fn export_one(
        &self,
        bytes: &[u8],
        filename_hint: Option<&str>,
        config: &TransformConfig,
    ) -> Result<Export> {
        config.validate()?;
        let loaded = self.load(bytes, filename_hint)?;
        let transformed = transform::apply(&loaded.clip, &loaded.metadata, config, Stage::Export);

        let mut warnings = loaded.warnings;
        warnings.extend(transformed.warnings);

        let bytes = clip_midi::encode(&transformed.clip);
        let tags = ExportTags::new(&loaded.metadata, config, self.config.chord_tag_max_len);
        info!(
            bytes = bytes.len(),
            notes = transformed.clip.notes.len(),
            tags = %tags,
            "exported clip"
        );

        Ok(Export {
            bytes,
            tags,
            metadata: loaded.metadata,
            warnings,
        })
    }

    /// Transform up to four clips independently and merge them into one
    /// multi-track file.
    #[instrument(skip(self, inputs), fields(clips = inputs.len()))]
    pub fn pack_four(&self, inputs: &[PackInput<'_>], force_ppqn: Option<u16>) -> Result<Packed> {
        if inputs.len() > MAX_PACK_CLIPS {
            return Err(Error::TooManyTracks {
                given: inputs.len(),
            });
        }
        if let Some(ppqn) = force_ppqn {
            config::check_ppqn(ppqn)?;
        }

        let prepared: Vec<(Clip, String, Vec<Warning>)> = inputs
            .par_iter()
            .map(|input| -> Result<(Clip, String, Vec<Warning>)> {
                input.config.validate()?;
                let loaded = self.load(input.bytes, input.filename_hint)?;
                let transformed =
                    transform::apply(&loaded.clip, &loaded.metadata, &input.config, Stage::Export);
                let stem = input
                    .filename_hint
                    .map(export::file_stem)
                    .unwrap_or_else(|| "untitled".to_string());
                let descriptor = export::pack_descriptor(&stem, &loaded.metadata);

                let mut warnings = loaded.warnings;
                warnings.extend(transformed.warnings);
                Ok((transformed.clip, descriptor, warnings))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut clips = Vec::with_capacity(prepared.len());
        let mut descriptors = Vec::with_capacity(prepared.len());
        let mut warnings = Vec::new();
        for (clip, descriptor, clip_warnings) in prepared {
            clips.push(clip);
            descriptors.push(descriptor);
            warnings.extend(clip_warnings);
        }

        let bytes = pack::pack(&clips, force_ppqn)?;
        if !warnings.is_empty() {
            warn!(count = warnings.len(), "pack finished with warnings");
        }

        Ok(Packed {
            bytes,
            descriptors,
            warnings,
        })
    }
}

impl Default for ClipEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
