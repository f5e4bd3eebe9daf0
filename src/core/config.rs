//! Configuration management for the sidecar.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - CLI argument overrides
//! - Validation and defaults
//!
//! Everything here is plain data. The adjuster receives an explicit
//! [`AdjusterSettings`] at construction; nothing is read from globals.

use crate::core::{Result, SidecarError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default pattern for the metric carrying the scraped process start time.
pub const DEFAULT_START_TIME_METRIC_REGEX: &str = "^(.+_)*process_start_time_seconds$";

/// Complete configuration for the sidecar
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Start time resolution and reset handling
    pub adjuster: AdjusterConfig,
    /// Series cache garbage collection
    pub gc: GcConfig,
    /// Per-target worker pipeline
    pub pipeline: PipelineConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// How the start time of a cumulative series is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentMode {
    /// Read the start time from a dedicated metric in the same scrape.
    StartTimeMetric,
    /// The first observed point of a series establishes its start time.
    InitialPoint,
}

/// Which wall-clock instant stands in for a missing start time metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackScope {
    /// One timestamp shared by every target: when this process started.
    Process,
    /// Each target uses the wall-clock time it was first scraped.
    Target,
}

/// Adjuster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjusterConfig {
    /// Start time strategy
    pub mode: AdjustmentMode,
    /// Pattern matched against metric names to find the start time metric
    pub start_time_metric_regex: String,
    /// Substitute a fallback start time when the start time metric is absent
    pub use_collector_start_time_fallback: bool,
    /// Scope of the fallback start time
    pub fallback_scope: FallbackScope,
    /// Prefer a created timestamp carried on the point on first sight
    pub use_created_timestamp: bool,
    /// Detect counter resets while in start time metric mode
    pub allow_cumulative_resets: bool,
}

/// Garbage collection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// How often the sweep runs
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// How long a series may go without updates before eviction
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Buffered scrape batches per target worker
    pub channel_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Structured logging format
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for AdjusterConfig {
    fn default() -> Self {
        AdjusterConfig {
            mode: AdjustmentMode::StartTimeMetric,
            start_time_metric_regex: DEFAULT_START_TIME_METRIC_REGEX.to_string(),
            use_collector_start_time_fallback: true,
            fallback_scope: FallbackScope::Process,
            use_created_timestamp: false,
            allow_cumulative_resets: true,
        }
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            sweep_interval: Duration::from_secs(60),
            retention: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            channel_capacity: 64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

/// Adjuster configuration with the start time metric pattern compiled.
#[derive(Debug, Clone)]
pub struct AdjusterSettings {
    /// Start time strategy
    pub mode: AdjustmentMode,
    /// Compiled start time metric pattern
    pub start_time_metric: Regex,
    /// Substitute a fallback start time when the start time metric is absent
    pub use_fallback: bool,
    /// Scope of the fallback start time
    pub fallback_scope: FallbackScope,
    /// Prefer a created timestamp carried on the point on first sight
    pub use_created_timestamp: bool,
    /// Detect counter resets while in start time metric mode
    pub allow_cumulative_resets: bool,
    /// Eviction threshold for idle series
    pub retention: Duration,
}

impl AdjusterConfig {
    /// Compile the start time metric pattern.
    pub fn compile(&self, gc: &GcConfig) -> Result<AdjusterSettings> {
        let start_time_metric = Regex::new(&self.start_time_metric_regex)?;
        Ok(AdjusterSettings {
            mode: self.mode,
            start_time_metric,
            use_fallback: self.use_collector_start_time_fallback,
            fallback_scope: self.fallback_scope,
            use_created_timestamp: self.use_created_timestamp,
            allow_cumulative_resets: self.allow_cumulative_resets,
            retention: gc.retention,
        })
    }
}

impl AdjusterSettings {
    /// Settings for the initial point strategy with default GC retention.
    pub fn initial_point() -> Self {
        AdjusterConfig {
            mode: AdjustmentMode::InitialPoint,
            ..AdjusterConfig::default()
        }
        .compile(&GcConfig::default())
            .expect("default start time regex compiles")
    }

    /// Settings for the start time metric strategy with default GC retention.
    pub fn start_time_metric() -> Self {
        AdjusterConfig::default()
            .compile(&GcConfig::default())
            .expect("default start time regex compiles")
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let Err(e) = Regex::new(&self.adjuster.start_time_metric_regex) {
            return Err(SidecarError::config(format!(
                "start_time_metric_regex '{}' does not compile: {}",
                self.adjuster.start_time_metric_regex, e
            )));
        }

        if self.gc.sweep_interval.is_zero() {
            return Err(SidecarError::config("gc.sweep_interval must be greater than 0"));
        }

        if self.gc.retention < self.gc.sweep_interval {
            return Err(SidecarError::config(format!(
                "gc.retention ({:?}) must not be shorter than gc.sweep_interval ({:?})",
                self.gc.retention, self.gc.sweep_interval
            )));
        }

        if self.pipeline.channel_capacity == 0 {
            return Err(SidecarError::config("pipeline.channel_capacity must be greater than 0"));
        }

        Ok(())
    }

    /// Compile the adjuster settings from this configuration
    pub fn adjuster_settings(&self) -> Result<AdjusterSettings> {
        self.adjuster.compile(&self.gc)
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| SidecarError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set the adjustment mode
    pub fn mode(mut self, mode: AdjustmentMode) -> Self {
        self.config.adjuster.mode = mode;
        self
    }

    /// Set the start time metric pattern
    pub fn start_time_metric_regex(mut self, pattern: impl Into<String>) -> Self {
        self.config.adjuster.start_time_metric_regex = pattern.into();
        self
    }

    /// Enable or disable the fallback start time
    pub fn use_fallback(mut self, enable: bool) -> Self {
        self.config.adjuster.use_collector_start_time_fallback = enable;
        self
    }

    /// Set the fallback scope
    pub fn fallback_scope(mut self, scope: FallbackScope) -> Self {
        self.config.adjuster.fallback_scope = scope;
        self
    }

    /// Honor created timestamps on first sight
    pub fn use_created_timestamp(mut self, enable: bool) -> Self {
        self.config.adjuster.use_created_timestamp = enable;
        self
    }

    /// Allow reset detection in start time metric mode
    pub fn allow_cumulative_resets(mut self, enable: bool) -> Self {
        self.config.adjuster.allow_cumulative_resets = enable;
        self
    }

    /// Set GC sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.gc.sweep_interval = interval;
        self
    }

    /// Set GC retention
    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.gc.retention = retention;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
