//! Per-target adjustment pipeline.
//!
//! Every (job, instance) gets its own tokio worker fed by a bounded channel,
//! so batches of one target are adjusted strictly in arrival order while
//! different targets proceed independently. Adjusted batches go to an
//! [`AdjustedSink`].

use crate::adjuster::Adjuster;
use crate::core::{PipelineConfig, Result, SidecarError};
use crate::metrics::{AdjustedBatch, ScrapeBatch, TargetKey};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Downstream consumer of adjusted batches
#[async_trait::async_trait]
pub trait AdjustedSink: Send + Sync {
    /// Hands one adjusted batch downstream.
    async fn consume(&self, batch: AdjustedBatch) -> Result<()>;
}

/// Sink forwarding batches into a bounded channel
pub struct ChannelSink {
    tx: mpsc::Sender<AdjustedBatch>,
}

impl ChannelSink {
    /// Creates the sink and the receiving end of its channel
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AdjustedBatch>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl AdjustedSink for ChannelSink {
    async fn consume(&self, batch: AdjustedBatch) -> Result<()> {
        self.tx
            .send(batch)
            .await
            .map_err(|_| SidecarError::ChannelSend)
    }
}

struct TargetWorker {
    tx: mpsc::Sender<ScrapeBatch>,
    handle: JoinHandle<()>,
}

/// Routes scrape batches to per-target workers
pub struct ScrapePipeline {
    adjuster: Arc<Adjuster>,
    sink: Arc<dyn AdjustedSink>,
    capacity: usize,
    workers: DashMap<TargetKey, TargetWorker, ahash::RandomState>,
    cancel: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl ScrapePipeline {
    /// Creates a pipeline with no workers; they start on first submit
    pub fn new(adjuster: Arc<Adjuster>, sink: Arc<dyn AdjustedSink>, config: &PipelineConfig) -> Self {
        Self {
            adjuster,
            sink,
            capacity: config.channel_capacity.max(1),
            workers: DashMap::with_hasher(ahash::RandomState::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
        }
    }

    /// Shared adjuster
    pub fn adjuster(&self) -> &Arc<Adjuster> {
        &self.adjuster
    }

    /// Number of targets with a running worker
    pub fn target_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues a batch for its target's worker. Waits while the target's
    /// queue is full.
    pub async fn submit(&self, batch: ScrapeBatch) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SidecarError::Shutdown);
        }

        let target = TargetKey::new(batch.job.as_str(), batch.instance.as_str());
        let tx = self.worker_tx(&target);
        let batch = match tx.send(batch).await {
            Ok(()) => return Ok(()),
            Err(mpsc::error::SendError(batch)) => batch,
        };

        // The worker stopped after a fatal sink error. Replace it unless
        // another submit already did.
        if self.closed.load(Ordering::Acquire) {
            return Err(SidecarError::Shutdown);
        }
        self.workers
            .remove_if(&target, |_, worker| worker.tx.same_channel(&tx));
        warn!(scrape_target = %target, "Restarting stopped target worker");

        self.worker_tx(&target)
            .send(batch)
            .await
            .map_err(|_| SidecarError::ChannelSend)
    }

    /// Sender of the target's worker, started if absent. The map guard is
    /// released before the caller awaits on the sender.
    fn worker_tx(&self, target: &TargetKey) -> mpsc::Sender<ScrapeBatch> {
        self.workers
            .entry(target.clone())
            .or_insert_with(|| self.spawn_worker(target.clone()))
            .tx
            .clone()
    }

    fn spawn_worker(&self, target: TargetKey) -> TargetWorker {
        let (tx, mut rx) = mpsc::channel::<ScrapeBatch>(self.capacity);
        let adjuster = Arc::clone(&self.adjuster);
        let sink = Arc::clone(&self.sink);
        let cancel = Arc::clone(&self.cancel);

        debug!(scrape_target = %target, "Starting target worker");
        let handle = tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                let adjusted = adjuster.adjust_cancellable(&batch, SystemTime::now(), &cancel);
                if adjusted.report.cancelled {
                    warn!(scrape_target = %target, "Batch abandoned during shutdown");
                    break;
                }
                if let Err(e) = sink.consume(adjusted).await {
                    if e.is_recoverable() {
                        warn!(scrape_target = %target, category = e.category(), "Sink rejected batch: {}", e);
                    } else {
                        error!(scrape_target = %target, category = e.category(), "Sink failed: {}", e);
                        break;
                    }
                }
            }
            debug!(scrape_target = %target, "Target worker stopped");
        });

        TargetWorker { tx, handle }
    }

    /// Stops the worker of a target that is no longer scraped, after it has
    /// processed what is already queued
    pub async fn remove_target(&self, target: &TargetKey) -> Result<()> {
        if let Some((_, worker)) = self.workers.remove(target) {
            drop(worker.tx);
            worker.handle.await?;
        }
        Ok(())
    }

    /// Stops accepting batches and waits for every worker to drain its queue
    pub async fn shutdown(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);

        let targets: Vec<TargetKey> = self.workers.iter().map(|w| w.key().clone()).collect();
        let count = targets.len();
        for target in &targets {
            self.remove_target(target).await?;
        }
        info!(targets = count, "Pipeline shut down");
        Ok(())
    }

    /// Like [`ScrapePipeline::shutdown`], but queued batches are discarded
    /// and a batch being adjusted stops between points
    pub async fn abort(&self) -> Result<()> {
        self.cancel.store(true, Ordering::Release);
        self.shutdown().await
    }
}
