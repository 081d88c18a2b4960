//! Writing processed clips to a destination directory.
//!
//! File names carry tags in a fixed order so exports of the same source with
//! the same options always land on the same name. Files are assembled in a
//! temp file inside the destination and linked into place without replacing
//! anything; a taken name gets a ` (2)`, ` (3)`, ... suffix.

use std::fmt;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use clip_midi::Warning;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::TransformConfig;
use crate::key::{note_name, prefers_flats};
use crate::types::{Classification, ClipMetadata, Mode};
use crate::{ClipEngine, Error, PackInput, Result};

const MIDI_EXTENSION: &str = ".mid";

/// Give up on collision suffixes after this many attempts.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Tags appended to an exported file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportTags {
    /// Mode of a clip normalized to C.
    pub normalized_mode: Option<Mode>,
    pub max_bars: Option<u32>,
    pub classification: Classification,
    /// Key root before normalization.
    pub original_root: Option<String>,
    pub velocity_max: Option<u8>,
    pub chords: Option<String>,
}

impl ExportTags {
    pub fn new(metadata: &ClipMetadata, config: &TransformConfig, chord_tag_max_len: usize) -> Self {
        let chords = if config.include_chord_tag {
            let labels = exported_chord_labels(metadata, config.normalize_to_c);
            Some(sanitize_progression(&labels, chord_tag_max_len)).filter(|s| !s.is_empty())
        } else {
            None
        };

        Self {
            normalized_mode: config.normalize_to_c.then_some(metadata.mode),
            max_bars: config.max_bars,
            classification: metadata.classification,
            original_root: config.normalize_to_c.then(|| metadata.root_name.clone()),
            velocity_max: config.velocity_scale.then_some(config.velocity_target),
            chords,
        }
    }

    /// Tags in file-name order.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens = Vec::new();
        if let Some(mode) = self.normalized_mode {
            tokens.push(format!("C {}", mode.label()));
        }
        if let Some(bars) = self.max_bars {
            tokens.push(format!("max{bars}bar"));
        }
        tokens.push(self.classification.short_code().to_string());
        if let Some(root) = &self.original_root {
            tokens.push(format!("OrgRoot={root}"));
        }
        if let Some(velocity) = self.velocity_max {
            tokens.push(format!("VelMax={velocity}"));
        }
        if let Some(chords) = &self.chords {
            tokens.push(format!("Chords={chords}"));
        }
        tokens
    }

    /// `<stem> - <tags>.mid`, cut to `max_len` characters.
    pub fn file_name(&self, stem: &str, max_len: usize) -> String {
        limit_file_name(&format!("{stem} - {self}"), max_len)
    }
}

impl fmt::Display for ExportTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens().join(" "))
    }
}

/// Chord labels as they sound in the exported file.
fn exported_chord_labels(metadata: &ClipMetadata, normalized: bool) -> Vec<String> {
    let (shift, use_flats) = if normalized {
        (metadata.transpose_to_root_semitones, prefers_flats(0, metadata.mode))
    } else {
        (0, prefers_flats(metadata.root_pitch_class, metadata.mode))
    };

    let mut labels: Vec<String> = Vec::with_capacity(metadata.chords.len());
    for chord in &metadata.chords {
        let root = (chord.root_pitch_class + shift) % 12;
        let label = format!("{}{}", note_name(root, use_flats), chord.quality.suffix());
        if labels.last() != Some(&label) {
            labels.push(label);
        }
    }
    labels
}

/// Join chord labels with `-`, keeping only file-name-safe characters and
/// stopping before `max_len` would be exceeded.
pub fn sanitize_progression(labels: &[String], max_len: usize) -> String {
    let mut out = String::new();
    for label in labels {
        let clean: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '#')
            .collect();
        if clean.is_empty() {
            continue;
        }
        let needed = clean.len() + usize::from(!out.is_empty());
        if out.len() + needed > max_len {
            break;
        }
        if !out.is_empty() {
            out.push('-');
        }
        out.push_str(&clean);
    }
    out
}

/// File stem of a name or path hint.
pub fn file_stem(hint: &str) -> String {
    Path::new(hint)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| hint.to_string())
}

/// `<stem>_<class>_OrgRoot=<root>`
pub fn pack_descriptor(stem: &str, metadata: &ClipMetadata) -> String {
    format!(
        "{stem}_{}_OrgRoot={}",
        metadata.classification.short_code(),
        metadata.root_name
    )
}

/// `PACK4_<descriptor>+<descriptor>...mid`, cut to `max_len` characters.
pub fn pack_file_name(descriptors: &[String], max_len: usize) -> String {
    let body = if descriptors.is_empty() {
        "untitled".to_string()
    } else {
        descriptors.join("+")
    };
    limit_file_name(&format!("PACK4_{body}"), max_len)
}

/// Append `.mid`, cutting the name so the whole thing fits in `max_len`
/// characters.
fn limit_file_name(name: &str, max_len: usize) -> String {
    let room = max_len.saturating_sub(MIDI_EXTENSION.len());
    let cut: String = name.chars().take(room).collect();
    format!("{}{MIDI_EXTENSION}", cut.trim_end())
}

fn numbered(file_name: &str, n: u32) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem} ({n}).{ext}"),
        None => format!("{file_name} ({n})"),
    }
}

/// Write `bytes` into `dir` under `file_name` without replacing any existing
/// file. The data is complete on disk before it becomes visible.
pub fn write_unique(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| Error::Io { path, source }
    };

    std::fs::create_dir_all(dir).map_err(io_err(dir))?;

    let mut staged = NamedTempFile::new_in(dir).map_err(io_err(dir))?;
    staged.write_all(bytes).map_err(io_err(staged.path()))?;
    staged.as_file().sync_all().map_err(io_err(staged.path()))?;

    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let name = if attempt == 1 {
            file_name.to_string()
        } else {
            numbered(file_name, attempt)
        };
        let target = dir.join(&name);

        match staged.persist_noclobber(&target) {
            Ok(_) => {
                debug!(path = %target.display(), bytes = bytes.len(), "wrote file");
                return Ok(target);
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => staged = e.file,
            Err(e) => {
                return Err(Error::Io {
                    path: target,
                    source: e.error,
                })
            }
        }
    }

    Err(Error::Io {
        path: dir.join(file_name),
        source: std::io::Error::new(ErrorKind::AlreadyExists, "no free file name"),
    })
}

/// One file written by an export.
#[derive(Debug, Clone)]
pub struct ExportedFile {
    pub path: PathBuf,
    pub metadata: ClipMetadata,
    pub warnings: Vec<Warning>,
}

/// Outcome of a multi-file export. Failed files are listed as
/// [`Warning::SkippedFile`].
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub written: Vec<PathBuf>,
    pub warnings: Vec<Warning>,
}

fn read_source(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl ClipEngine {
    /// Export one clip into `dest` under its tagged name.
    ///
    /// Requests without `force_ppqn` get the engine's default export
    /// resolution.
    pub fn export_to_dir(
        &self,
        bytes: &[u8],
        file_name: &str,
        config: &TransformConfig,
        dest: &Path,
    ) -> Result<ExportedFile> {
        let mut config = config.clone();
        config.force_ppqn = self.config().export_ppqn(config.force_ppqn);

        let export = self.export_one(bytes, Some(file_name), &config)?;
        let name = export
            .tags
            .file_name(&file_stem(file_name), self.config().max_file_name_len);
        let path = write_unique(dest, &name, &export.bytes)?;

        info!(path = %path.display(), "exported file");
        Ok(ExportedFile {
            path,
            metadata: export.metadata,
            warnings: export.warnings,
        })
    }

    /// Export every source file in parallel. A file that cannot be read,
    /// decoded or written is skipped and reported; the rest still export.
    pub fn export_batch(
        &self,
        sources: &[PathBuf],
        config: &TransformConfig,
        dest: &Path,
    ) -> Result<BatchReport> {
        config.validate()?;

        let results: Vec<(PathBuf, Result<ExportedFile>)> = self.in_pool(|| {
            sources
                .par_iter()
                .map(|source| {
                    let result = read_source(source).and_then(|bytes| {
                        let name = source
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        self.export_to_dir(&bytes, &name, config, dest)
                    });
                    (source.clone(), result)
                })
                .collect()
        });

        let mut report = BatchReport::default();
        for (source, result) in results {
            match result {
                Ok(exported) => {
                    report.written.push(exported.path);
                    report.warnings.extend(exported.warnings);
                }
                Err(e) => {
                    let warning = Warning::SkippedFile {
                        file: source.display().to_string(),
                        error: e.to_string(),
                    };
                    warn!(%warning, "batch export");
                    report.warnings.push(warning);
                }
            }
        }

        info!(
            written = report.written.len(),
            skipped = sources.len() - report.written.len(),
            "batch export finished"
        );
        Ok(report)
    }

    /// Pack up to four source files into `dest`. Any failing source fails
    /// the pack.
    pub fn pack_to_dir(
        &self,
        sources: &[PathBuf],
        config: &TransformConfig,
        force_ppqn: Option<u16>,
        dest: &Path,
    ) -> Result<PathBuf> {
        let contents = sources
            .iter()
            .map(|p| read_source(p))
            .collect::<Result<Vec<_>>>()?;
        let names: Vec<String> = sources
            .iter()
            .map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default())
            .collect();

        let inputs: Vec<PackInput<'_>> = contents
            .iter()
            .zip(&names)
            .map(|(bytes, name)| PackInput {
                bytes,
                filename_hint: Some(name.as_str()),
                config: config.clone(),
            })
            .collect();

        let packed = self.pack_four(&inputs, self.config().export_ppqn(force_ppqn))?;
        let name = pack_file_name(&packed.descriptors, self.config().max_file_name_len);
        let path = write_unique(dest, &name, &packed.bytes)?;

        info!(path = %path.display(), clips = inputs.len(), "wrote pack");
        Ok(path)
    }

    /// Run `job` on a dedicated pool when `parallel_jobs` is set.
    fn in_pool<T: Send>(&self, job: impl FnOnce() -> T + Send) -> T {
        let jobs = self.config().parallel_jobs;
        if jobs == 0 {
            return job();
        }
        match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
            Ok(pool) => pool.install(job),
            Err(e) => {
                warn!(error = %e, jobs, "could not build export pool, using global pool");
                job()
            }
        }
    }
}
