//! Per-request transform options and engine-wide defaults.
//!
//! `EngineConfig` loads in layers (later wins):
//! 1. Compiled defaults
//! 2. `./clipkit.toml`, or an explicit path instead
//! 3. `CLIPKIT_*` environment variables

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Largest division a metrical SMF header can carry.
pub const MAX_PPQN: u16 = 0x7FFF;

/// Local config file picked up from the working directory.
pub const LOCAL_CONFIG_FILE: &str = "clipkit.toml";

/// Reject resolutions a metrical SMF header cannot carry.
pub fn check_ppqn(ppqn: u16) -> Result<()> {
    if ppqn == 0 || ppqn > MAX_PPQN {
        return Err(Error::InvalidConfig(format!(
            "force_ppqn must be 1-{MAX_PPQN}, got {ppqn}"
        )));
    }
    Ok(())
}

/// Options applied to one clip on preview or export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Transpose so the key root lands on C.
    pub normalize_to_c: bool,
    /// Rescale velocities so the loudest note hits `velocity_target`.
    pub velocity_scale: bool,
    pub velocity_target: u8,
    pub max_bars: Option<u32>,
    /// Preview only: stretch the loop to a power-of-two bar count.
    pub round_power_of_two: bool,
    pub force_ppqn: Option<u16>,
    /// Add the chord progression to exported file names.
    pub include_chord_tag: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            normalize_to_c: false,
            velocity_scale: false,
            velocity_target: 127,
            max_bars: None,
            round_power_of_two: false,
            force_ppqn: None,
            include_chord_tag: false,
        }
    }
}

impl TransformConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=127).contains(&self.velocity_target) {
            return Err(Error::InvalidConfig(format!(
                "velocity_target must be 1-127, got {}",
                self.velocity_target
            )));
        }
        if self.max_bars == Some(0) {
            return Err(Error::InvalidConfig("max_bars must be at least 1".into()));
        }
        if let Some(ppqn) = self.force_ppqn {
            check_ppqn(ppqn)?;
        }
        Ok(())
    }

    /// Parse and validate options sent as JSON by a serving layer.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(format!("transform options: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

/// Engine-wide defaults used by the export side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Destination directory for exported and packed files.
    pub export_dir: PathBuf,
    /// Resolution exports are resampled to when a request sets none.
    /// 0 keeps each source's own resolution.
    pub default_force_ppqn: u16,
    pub chord_tag_max_len: usize,
    pub max_file_name_len: usize,
    /// Worker threads for batch export; 0 uses the global rayon pool.
    pub parallel_jobs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from("selected"),
            default_force_ppqn: 480,
            chord_tag_max_len: 48,
            max_file_name_len: 180,
            parallel_jobs: 0,
        }
    }
}

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

impl EngineConfig {
    /// Load from `./clipkit.toml` (if present) and the environment.
    pub fn load() -> Result<Self> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from an optional explicit file, then apply env
    /// overrides. An explicit path replaces `./clipkit.toml` and must exist.
    pub fn load_with_sources_from(config_path: Option<&Path>) -> Result<(Self, ConfigSources)> {
        let mut sources = ConfigSources::default();
        let mut config = EngineConfig::default();

        let file = match config_path {
            Some(path) => Some(path.to_path_buf()),
            None => Some(PathBuf::from(LOCAL_CONFIG_FILE)).filter(|p| p.exists()),
        };
        if let Some(path) = file {
            config = Self::load_from_file(&path)?;
            sources.files.push(path);
        }

        config.apply_env_overrides(&mut sources, |name| env::var(name).ok());
        config.validate()?;

        Ok((config, sources))
    }

    /// Load config from a TOML file. Missing keys keep their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse_toml(&contents, path)
    }

    fn parse_toml(contents: &str, path: &Path) -> Result<Self> {
        toml::from_str(contents).map_err(|e: toml::de::Error| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply `CLIPKIT_*` overrides. Values that do not parse are ignored.
    pub fn apply_env_overrides(
        &mut self,
        sources: &mut ConfigSources,
        lookup: impl Fn(&str) -> Option<String>,
    ) {
        if let Some(v) = lookup("CLIPKIT_EXPORT_DIR") {
            self.export_dir = PathBuf::from(v);
            sources.env_overrides.push("CLIPKIT_EXPORT_DIR".to_string());
        }
        if let Some(v) = lookup("CLIPKIT_FORCE_PPQN") {
            if let Ok(ppqn) = v.parse() {
                self.default_force_ppqn = ppqn;
                sources.env_overrides.push("CLIPKIT_FORCE_PPQN".to_string());
            }
        }
        if let Some(v) = lookup("CLIPKIT_CHORD_TAG_MAX_LEN") {
            if let Ok(len) = v.parse() {
                self.chord_tag_max_len = len;
                sources.env_overrides.push("CLIPKIT_CHORD_TAG_MAX_LEN".to_string());
            }
        }
        if let Some(v) = lookup("CLIPKIT_MAX_FILE_NAME_LEN") {
            if let Ok(len) = v.parse() {
                self.max_file_name_len = len;
                sources.env_overrides.push("CLIPKIT_MAX_FILE_NAME_LEN".to_string());
            }
        }
        if let Some(v) = lookup("CLIPKIT_PARALLEL_JOBS") {
            if let Ok(jobs) = v.parse() {
                self.parallel_jobs = jobs;
                sources.env_overrides.push("CLIPKIT_PARALLEL_JOBS".to_string());
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_force_ppqn > MAX_PPQN {
            return Err(Error::InvalidConfig(format!(
                "default_force_ppqn must be at most {MAX_PPQN}"
            )));
        }
        // Room for "PACK4_" plus ".mid" and a few characters of stem.
        if self.max_file_name_len < 16 {
            return Err(Error::InvalidConfig(
                "max_file_name_len must be at least 16".into(),
            ));
        }
        Ok(())
    }

    /// The resolution exports should use when a request leaves it unset.
    pub fn export_ppqn(&self, requested: Option<u16>) -> Option<u16> {
        requested.or(Some(self.default_force_ppqn).filter(|&p| p > 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn transform_defaults_validate() {
        let config = TransformConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.velocity_target, 127);
    }

    #[test]
    fn transform_rejects_out_of_range() {
        let bad = [
            TransformConfig {
                velocity_target: 0,
                ..Default::default()
            },
            TransformConfig {
                velocity_target: 128,
                ..Default::default()
            },
            TransformConfig {
                max_bars: Some(0),
                ..Default::default()
            },
            TransformConfig {
                force_ppqn: Some(0),
                ..Default::default()
            },
            TransformConfig {
                force_ppqn: Some(0x8000),
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(Error::InvalidConfig(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn transform_from_json_fills_defaults() {
        let config =
            TransformConfig::from_json(r#"{"normalize_to_c": true, "max_bars": 4}"#).unwrap();
        assert_eq!(
            config,
            TransformConfig {
                normalize_to_c: true,
                max_bars: Some(4),
                ..Default::default()
            }
        );

        assert!(TransformConfig::from_json(r#"{"velocity_target": 0}"#).is_err());
        assert!(TransformConfig::from_json("not json").is_err());
    }

    #[test]
    fn engine_partial_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("clipkit.toml");
        std::fs::write(&path, "export_dir = \"out\"\nchord_tag_max_len = 20\n").unwrap();

        let config = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(config.export_dir, PathBuf::from("out"));
        assert_eq!(config.chord_tag_max_len, 20);
        assert_eq!(config.default_force_ppqn, 480);
        assert_eq!(config.max_file_name_len, 180);
    }

    #[test]
    fn engine_bad_toml_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("clipkit.toml");
        std::fs::write(&path, "chord_tag_max_len = \"long\"").unwrap();

        match EngineConfig::load_from_file(&path) {
            Err(Error::Config { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn explicit_missing_file_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        let result = EngineConfig::load_with_sources_from(Some(missing.as_path()));
        assert!(matches!(result, Err(Error::Io { .. })));
    }

    #[test]
    fn env_overrides_apply_and_record() {
        let vars: HashMap<&str, &str> = [
            ("CLIPKIT_EXPORT_DIR", "/tmp/clips"),
            ("CLIPKIT_FORCE_PPQN", "960"),
            ("CLIPKIT_MAX_FILE_NAME_LEN", "not a number"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        let mut sources = ConfigSources::default();
        config.apply_env_overrides(&mut sources, |name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.export_dir, PathBuf::from("/tmp/clips"));
        assert_eq!(config.default_force_ppqn, 960);
        assert_eq!(config.max_file_name_len, 180);
        assert_eq!(
            sources.env_overrides,
            vec!["CLIPKIT_EXPORT_DIR".to_string(), "CLIPKIT_FORCE_PPQN".to_string()]
        );
    }

    #[test]
    fn export_ppqn_fallback() {
        let config = EngineConfig::default();
        assert_eq!(config.export_ppqn(Some(96)), Some(96));
        assert_eq!(config.export_ppqn(None), Some(480));

        let keep = EngineConfig {
            default_force_ppqn: 0,
            ..Default::default()
        };
        assert_eq!(keep.export_ppqn(None), None);
    }
}
