//! Core configuration and error types shared by the whole sidecar.

#![warn(missing_docs)]

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{
    AdjusterConfig, AdjusterSettings, AdjustmentMode, Config, ConfigBuilder, FallbackScope,
    GcConfig, LogLevel, LoggingConfig, PipelineConfig,
};
pub use error::{Result, SidecarError};
