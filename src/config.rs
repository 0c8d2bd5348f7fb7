//! Demuxer tunables.
//!
//! A [`DemuxConfig`] is passed by value to [`crate::Demuxer::open`]. It starts
//! from documented defaults and can be overridden from `VDKDEMUX_*` environment
//! variables or a TOML file.

use crate::error::{DemuxError, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// How an AVI index is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IndexMode {
    /// Never use an index; seeking is unavailable for AVI.
    Ignore,
    /// Use the index the file carries; rebuild lazily on the first seek.
    #[default]
    Auto,
    /// Rebuild at open when the file has no usable index.
    Build,
    /// Always rebuild by scanning the file at open.
    Force,
}

/// When the Ogg syncpoint table is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OggIndexMode {
    /// Build before the first seek.
    #[default]
    Lazy,
    /// Scan the whole file at open.
    Full,
    /// Only read the tail of the file at open to learn the duration.
    DurationOnly,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub mode: IndexMode,
    /// Side-file tried before any embedded index.
    pub file_load: Option<PathBuf>,
    /// Side-file written after a linear recovery.
    pub file_save: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            mode: IndexMode::Auto,
            file_load: None,
            file_save: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AviConfig {
    /// Read every stream through its own cursor from the start.
    pub force_non_interleaved: bool,
    /// Derive audio timestamps from the byte count instead of the chunk count.
    pub pts_from_bps: bool,
}

impl Default for AviConfig {
    fn default() -> Self {
        Self {
            force_non_interleaved: false,
            pts_from_bps: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OggConfig {
    pub index: OggIndexMode,
    /// Upper bound on refinement rounds after the syncpoint bisection.
    pub seek_refinements: u32,
    /// Overshoot, in seconds, accepted without stepping back a syncpoint.
    pub seek_tolerance: f64,
}

impl Default for OggConfig {
    fn default() -> Self {
        Self {
            index: OggIndexMode::Lazy,
            seek_refinements: 3,
            seek_tolerance: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_packets: usize,
    pub max_bytes: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_packets: 4096,
            max_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Every tunable the demuxer reads.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DemuxConfig {
    /// Bytes peeked by format probes.
    pub probe_size: usize,
    pub index: IndexConfig,
    pub avi: AviConfig,
    pub ogg: OggConfig,
    pub queue: QueueConfig,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            probe_size: 2048,
            index: IndexConfig::default(),
            avi: AviConfig::default(),
            ogg: OggConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl DemuxConfig {
    /// Defaults overridden by `VDKDEMUX_INDEX_MODE`, `VDKDEMUX_PROBE_SIZE` and
    /// `VDKDEMUX_FORCE_NI`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(mode) = env::var("VDKDEMUX_INDEX_MODE") {
            config.index.mode = parse_index_mode(&mode)?;
        }
        if let Ok(size) = env::var("VDKDEMUX_PROBE_SIZE") {
            config.probe_size = size
                .trim()
                .parse()
                .map_err(|e| DemuxError::Config(format!("VDKDEMUX_PROBE_SIZE: {}", e)))?;
        }
        if let Ok(flag) = env::var("VDKDEMUX_FORCE_NI") {
            config.avi.force_non_interleaved = matches!(flag.trim(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DemuxConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.probe_size < 16 {
            return Err(DemuxError::Config(format!(
                "probe_size {} is too small",
                self.probe_size
            )));
        }
        if self.queue.max_packets == 0 || self.queue.max_bytes == 0 {
            return Err(DemuxError::Config("queue limits must be non-zero".into()));
        }
        if !(self.ogg.seek_tolerance >= 0.0) {
            return Err(DemuxError::Config("ogg.seek_tolerance must be >= 0".into()));
        }
        Ok(())
    }
}

fn parse_index_mode(value: &str) -> Result<IndexMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "ignore" | "0" => Ok(IndexMode::Ignore),
        "auto" | "-1" => Ok(IndexMode::Auto),
        "build" | "1" => Ok(IndexMode::Build),
        "force" | "2" => Ok(IndexMode::Force),
        other => Err(DemuxError::Config(format!("unknown index mode '{}'", other))),
    }
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = include_str!(concat!(env!("OUT_DIR"), "/config.template.toml"));
        std::fs::write(path, template)?;
    }
    Ok(())
}
