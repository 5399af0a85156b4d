use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::extraction::DEFAULT_RENDER_DPI;

/// Application-level constants
pub const APP_NAME: &str = "tenderlens";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version stamped into `meta.pipeline_version` of every FinalOutput.
/// Bump when any existing output field changes type.
pub const PIPELINE_VERSION: &str = "tenderlens-1";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "tenderlens=debug"
    } else {
        "tenderlens=info"
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Tunables for one pipeline instance. Every field has a default so an
/// empty TOML file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Whole-document analysis is only attempted at or below this size.
    pub direct_max_bytes: u64,
    /// Text longer than this is cut down before the text-prompt call.
    pub truncate_threshold_chars: usize,
    pub truncate_head_chars: usize,
    pub truncate_tail_chars: usize,
    /// Raw text excerpt backfilled after a successful direct analysis.
    pub raw_excerpt_chars: usize,
    /// Characters per KB below which a large PDF counts as scanned.
    pub ocr_density_threshold: f64,
    pub ocr_min_file_kb: f64,
    pub ocr_min_chars_per_page: f64,
    /// Documents above this page count are sampled head + tail.
    pub page_sample_threshold: usize,
    pub page_sample_head: usize,
    pub page_sample_tail: usize,
    /// Concurrent page renders within one batch.
    pub render_parallelism: usize,
    pub render_dpi: u32,
    pub page_max_width: u32,
    pub page_max_height: u32,
    pub jpeg_quality: u8,
    /// Upper bound for each external call (analyzer, extractor, converter).
    pub call_timeout_secs: u64,
    /// Structured Extractor fields below this confidence count as absent.
    pub min_merge_confidence: f64,
    /// Text layers shorter than this are treated as empty.
    pub min_text_chars: usize,
    /// Enrich a successful text_layer pass with visual analysis of table pages.
    pub hybrid_table_pages: bool,
    /// Allowed difference between source and chunked character counts.
    pub char_loss_tolerance: usize,
    pub analyzer: AnalyzerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            direct_max_bytes: 25 * 1024 * 1024,
            truncate_threshold_chars: 120_000,
            truncate_head_chars: 100_000,
            truncate_tail_chars: 20_000,
            raw_excerpt_chars: 10_000,
            ocr_density_threshold: 20.0,
            ocr_min_file_kb: 50.0,
            ocr_min_chars_per_page: 100.0,
            page_sample_threshold: 20,
            page_sample_head: 15,
            page_sample_tail: 5,
            render_parallelism: 3,
            render_dpi: DEFAULT_RENDER_DPI,
            page_max_width: 1000,
            page_max_height: 1400,
            jpeg_quality: 80,
            call_timeout_secs: 180,
            min_merge_confidence: 0.4,
            min_text_chars: 100,
            hybrid_table_pages: false,
            char_loss_tolerance: 10,
            analyzer: AnalyzerConfig::default(),
        }
    }
}

/// Connection settings for the Generative Analyzer HTTP backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub base_url: String,
    pub model: String,
    /// Model used for single-image calls. Falls back to `model` when empty.
    pub vision_model: String,
    /// HTTP client timeout. Must not exceed `call_timeout_secs`.
    pub timeout_secs: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "qwen2.5:14b".into(),
            vision_model: "qwen2.5vl:7b".into(),
            timeout_secs: 180,
        }
    }
}

impl AnalyzerConfig {
    pub fn vision_model(&self) -> &str {
        if self.vision_model.is_empty() {
            &self.model
        } else {
            &self.vision_model
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════

/// Read and validate a TOML configuration file.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let config: PipelineConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render_parallelism == 0 {
            return Err(ConfigError::Invalid("render_parallelism must be > 0".into()));
        }
        if self.truncate_head_chars + self.truncate_tail_chars > self.truncate_threshold_chars {
            return Err(ConfigError::Invalid(
                "truncate_head_chars + truncate_tail_chars must not exceed truncate_threshold_chars"
                    .into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_merge_confidence) {
            return Err(ConfigError::Invalid(
                "min_merge_confidence must be in [0.0, 1.0]".into(),
            ));
        }
        if self.page_sample_head == 0 {
            return Err(ConfigError::Invalid("page_sample_head must be > 0".into()));
        }
        if self.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid("call_timeout_secs must be > 0".into()));
        }
        if self.analyzer.timeout_secs == 0 || self.analyzer.timeout_secs > self.call_timeout_secs {
            return Err(ConfigError::Invalid(
                "analyzer.timeout_secs must be in 1..=call_timeout_secs".into(),
            ));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(ConfigError::Invalid("jpeg_quality must be in 1..=100".into()));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.call_timeout_secs)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config.direct_max_bytes, 25 * 1024 * 1024);
        assert_eq!(config.render_parallelism, 3);
        assert!((config.min_merge_confidence - 0.4).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let config: PipelineConfig = toml::from_str(
            r#"
            render_parallelism = 5
            [analyzer]
            model = "llama3.1:8b"
            "#,
        )
        .unwrap();
        assert_eq!(config.render_parallelism, 5);
        assert_eq!(config.page_sample_head, 15);
        assert_eq!(config.analyzer.model, "llama3.1:8b");
        assert_eq!(config.analyzer.base_url, "http://localhost:11434");
    }

    #[test]
    fn load_config_rejects_zero_parallelism() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenderlens.toml");
        std::fs::write(&path, "render_parallelism = 0\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_config_rejects_oversized_truncation_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenderlens.toml");
        std::fs::write(&path, "truncate_head_chars = 110000\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn default_analyzer_timeout_fits_call_timeout() {
        let config = PipelineConfig::default();
        assert!(config.analyzer.timeout_secs <= config.call_timeout_secs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_config_rejects_analyzer_timeout_beyond_call_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenderlens.toml");
        std::fs::write(&path, "call_timeout_secs = 60\n\n[analyzer]\ntimeout_secs = 300\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("analyzer.timeout_secs")));
    }

    #[test]
    fn load_config_missing_file_is_read_error() {
        let err = load_config(Path::new("/nonexistent/tenderlens.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn vision_model_falls_back_to_text_model() {
        let analyzer = AnalyzerConfig {
            vision_model: String::new(),
            ..AnalyzerConfig::default()
        };
        assert_eq!(analyzer.vision_model(), analyzer.model);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let text = PipelineConfig::default().to_toml().unwrap();
        let parsed: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.truncate_threshold_chars, 120_000);
    }

    #[test]
    fn log_filter_targets_crate() {
        assert!(default_log_filter().starts_with("tenderlens="));
    }
}
