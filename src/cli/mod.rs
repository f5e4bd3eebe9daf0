//! Command-line interface for the sidecar.
//!
//! Replays Prometheus exposition files as consecutive scrapes of a single
//! target through the adjustment pipeline and prints the adjusted points.

use crate::adjuster::{spawn_gc, Adjuster};
use crate::core::{AdjustmentMode, Config, ConfigBuilder, LoggingConfig, Result, SidecarError};
use crate::metrics::{AdjustedBatch, AdjustedPoint, PointValue, Timestamp};
use crate::pipeline::{ChannelSink, ScrapePipeline};
use crate::receiver::load_scrape;
use clap::{Parser, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Prometheus start time and reset adjustment, replayed from exposition files
#[derive(Parser, Debug)]
#[command(name = "prom-sidecar")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Exposition files, one scrape each, in scrape order
    pub files: Vec<PathBuf>,

    /// Configuration file path (default: ~/.config/prom-sidecar/config.yaml)
    #[arg(short, long, env = "PROM_SIDECAR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Job label of the replayed target
    #[arg(long, env = "PROM_SIDECAR_JOB", default_value = "replay")]
    pub job: String,

    /// Instance label of the replayed target
    #[arg(long, env = "PROM_SIDECAR_INSTANCE", default_value = "localhost:9090")]
    pub instance: String,

    /// Seconds between consecutive replayed scrapes
    #[arg(long, default_value_t = 60)]
    pub interval_secs: u64,

    /// Override the configured adjustment mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Print adjuster statistics to stderr when done
    #[arg(long)]
    pub stats: bool,

    /// Enable debug logging
    #[arg(short, long, env = "PROM_SIDECAR_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

/// Adjustment mode as given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    StartTimeMetric,
    InitialPoint,
}

impl From<ModeArg> for AdjustmentMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::StartTimeMetric => AdjustmentMode::StartTimeMetric,
            ModeArg::InitialPoint => AdjustmentMode::InitialPoint,
        }
    }
}

/// How adjusted points are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One JSON object per point
    Json,
    /// One human-readable line per point
    Text,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables
    /// 3. Config file
    /// 4. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let config_path = if let Some(path) = &self.config {
            path.clone()
        } else {
            let default_path = dirs::config_dir()
                .map(|d| d.join("prom-sidecar").join("config.yaml"))
                .unwrap_or_else(|| PathBuf::from("~/.config/prom-sidecar/config.yaml"));

            if default_path.exists() {
                default_path
            } else {
                return self.build_config_from_args(builder);
            }
        };

        match tokio::fs::read_to_string(&config_path).await {
            Ok(content) => {
                builder = builder.from_yaml(&content)?;
            }
            Err(e) if self.config.is_some() => {
                return Err(SidecarError::config(format!(
                    "Failed to read config file {:?}: {}",
                    config_path, e
                )));
            }
            Err(_) => {}
        }

        self.build_config_from_args(builder)
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(mode) = self.mode {
            builder = builder.mode(mode.into());
        }
        builder.debug(self.debug).build()
    }

    /// Initialize logging. `--debug` wins over `PROM_SIDECAR_LOG_LEVEL`,
    /// which wins over the configured level.
    pub fn init_logging(&self, logging: &LoggingConfig) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let env_log_level = std::env::var("PROM_SIDECAR_LOG_LEVEL")
            .unwrap_or_else(|_| logging.level.as_str().to_string());
        let log_level = if self.debug {
            "debug"
        } else {
            env_log_level.as_str()
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        // Logs go to stderr; stdout carries the adjusted points
        let fmt_layer = if logging.structured {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_line_number(false)
                .compact()
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| SidecarError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute the sidecar replay.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;
    cli.init_logging(&config.logging)?;

    if cli.check_config {
        config.validate()?;
        println!("Configuration is valid!");
        println!("  Mode: {:?}", config.adjuster.mode);
        println!("  Start time metric: {}", config.adjuster.start_time_metric_regex);
        println!(
            "  Fallback: {} ({:?})",
            config.adjuster.use_collector_start_time_fallback, config.adjuster.fallback_scope
        );
        println!("  GC sweep interval: {:?}", config.gc.sweep_interval);
        println!("  GC retention: {:?}", config.gc.retention);
        return Ok(());
    }

    if cli.files.is_empty() {
        return Err(SidecarError::config("no exposition files given"));
    }

    let adjuster = Arc::new(Adjuster::from_config(&config)?);
    let gc = spawn_gc(Arc::clone(&adjuster), config.gc.sweep_interval);

    let (sink, mut rx) = ChannelSink::new(config.pipeline.channel_capacity);
    let pipeline = ScrapePipeline::new(Arc::clone(&adjuster), Arc::new(sink), &config.pipeline);

    let format = cli.format;
    let printer = tokio::spawn(async move {
        let stdout = std::io::stdout();
        while let Some(batch) = rx.recv().await {
            print_batch(&mut stdout.lock(), &batch, format)?;
        }
        Ok::<(), SidecarError>(())
    });

    tracing::info!(
        files = cli.files.len(),
        job = %cli.job,
        instance = %cli.instance,
        "Replaying scrapes"
    );

    tokio::select! {
        result = replay(&cli, &pipeline) => {
            if let Err(e) = result {
                tracing::error!("Replay failed: {}", e);
                pipeline.abort().await?;
                gc.shutdown().await?;
                return Err(e);
            }
            pipeline.shutdown().await?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping...");
            pipeline.abort().await?;
        }
    }

    // Dropping the pipeline closes the sink channel
    drop(pipeline);
    printer.await??;
    gc.shutdown().await?;

    if cli.stats {
        let snapshot = adjuster.stats().snapshot();
        eprintln!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    Ok(())
}

/// Feeds every file through the pipeline, one scrape interval apart
async fn replay(cli: &Cli, pipeline: &ScrapePipeline) -> Result<()> {
    let start = Timestamp::now();
    let interval = Duration::from_secs(cli.interval_secs);

    for (i, path) in cli.files.iter().enumerate() {
        let offset = interval.saturating_mul(u32::try_from(i).unwrap_or(u32::MAX));
        let batch = load_scrape(path, &cli.job, &cli.instance, start.saturating_add(offset)).await?;
        pipeline.submit(batch).await?;
    }
    Ok(())
}

fn print_batch(out: &mut impl Write, batch: &AdjustedBatch, format: OutputFormat) -> Result<()> {
    for point in &batch.points {
        match format {
            OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(point)?)?,
            OutputFormat::Text => writeln!(out, "{}", render_point(point))?,
        }
    }
    Ok(())
}

fn render_point(point: &AdjustedPoint) -> String {
    format!(
        "{} start={} ts={} {} ({:?})",
        point.series,
        point.start_timestamp.to_rfc3339(),
        point.timestamp.to_rfc3339(),
        render_value(&point.value),
        point.outcome
    )
}

fn render_value(value: &PointValue) -> String {
    match value {
        PointValue::Sum { value, .. } | PointValue::Gauge { value } => format!("value={}", value),
        PointValue::Histogram { count, sum, .. } | PointValue::Summary { count, sum, .. } => {
            format!("count={} sum={}", count, sum)
        }
    }
}
