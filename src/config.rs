use anyhow::Result;
use serde::Deserialize;

use crate::audio::{AssemblerConfig, SILENCE_AMPLITUDE_THRESHOLD};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

/// Connection settings for the Dify application.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// API base, e.g. "https://api.dify.ai/v1"
    pub endpoint: String,
    pub api_key: String,
    /// Stable end-user identifier sent with every request
    #[serde(default = "default_user")]
    pub user: String,
}

/// Tuning for TTS audio segmentation.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Buffered KiB above which segment extraction is attempted
    #[serde(default = "default_flush_threshold_kib")]
    pub flush_threshold_kib: usize,

    /// Hard ceiling on buffer growth, in KiB
    #[serde(default = "default_max_buffer_kib")]
    pub max_buffer_kib: usize,

    /// Peak amplitude below which a frame counts as silent, on [-1, 1]
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,
}

fn default_user() -> String {
    format!("dify-stream-{}", uuid::Uuid::new_v4())
}

fn default_flush_threshold_kib() -> usize {
    80
}

fn default_max_buffer_kib() -> usize {
    1024
}

fn default_silence_threshold() -> f32 {
    SILENCE_AMPLITUDE_THRESHOLD
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            flush_threshold_kib: default_flush_threshold_kib(),
            max_buffer_kib: default_max_buffer_kib(),
            silence_threshold: default_silence_threshold(),
        }
    }
}

impl AudioConfig {
    pub fn assembler_config(&self) -> AssemblerConfig {
        AssemblerConfig {
            flush_threshold_bytes: self.flush_threshold_kib * 1024,
            max_buffer_bytes: self.max_buffer_kib * 1024,
            silence_threshold: self.silence_threshold,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
