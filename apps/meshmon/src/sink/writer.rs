use super::assembler::{BatchAssembler, FlushReason};
use super::backend::Backend;
use super::point::{counter_points, global_point, node_point, Batch, Point};
use super::retention::spawn_retention;
use super::SinkError;
use crate::export::{CounterMap, GlobalStats};
use crate::registry::Node;
use crate::shutdown::{self, shutdown_requested};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterOptions {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
    /// Zero disables the retention task.
    pub delete_interval: Duration,
    pub delete_after: Duration,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            batch_size: 500,
            batch_timeout: Duration::from_secs(5),
            queue_capacity: 1000,
            max_retries: 5,
            retry_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            delete_interval: Duration::from_secs(60 * 60),
            delete_after: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug)]
pub struct WriterStats {
    pub queue_depth: AtomicU64,
    pub flushed_batches: AtomicU64,
    pub flushed_points: AtomicU64,
    pub dropped_points: AtomicU64,
    pub last_batch_len: AtomicU64,
    pub last_flush_unix_ms: AtomicU64,
    pub average_flush_micros: AtomicU64,
    pub healthy: AtomicBool,
    pub last_error: Mutex<Option<String>>,
}

impl WriterStats {
    pub fn new() -> Self {
        Self {
            queue_depth: AtomicU64::new(0),
            flushed_batches: AtomicU64::new(0),
            flushed_points: AtomicU64::new(0),
            dropped_points: AtomicU64::new(0),
            last_batch_len: AtomicU64::new(0),
            last_flush_unix_ms: AtomicU64::new(0),
            average_flush_micros: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
            last_error: Mutex::new(None),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|guard| guard.clone())
    }

    pub fn record_error(&self, err: impl Into<String>) {
        self.healthy.store(false, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn clear_error(&self) {
        self.healthy.store(true, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    fn record_flush(&self, len: usize, micros: u64) {
        let len = len as u64;
        self.flushed_batches.fetch_add(1, Ordering::Relaxed);
        self.flushed_points.fetch_add(len, Ordering::Relaxed);
        self.last_batch_len.store(len, Ordering::Relaxed);
        let now = Utc::now().timestamp_millis().max(0) as u64;
        self.last_flush_unix_ms.store(now, Ordering::Relaxed);
        let prev = self.average_flush_micros.load(Ordering::Relaxed);
        let avg = if prev == 0 { micros } else { (prev + micros) / 2 };
        self.average_flush_micros.store(avg, Ordering::Relaxed);
        self.clear_error();
    }
}

impl Default for WriterStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer handle. Cloned into every task that submits points.
#[derive(Clone)]
pub struct PointSender {
    tx: mpsc::Sender<Point>,
    stats: Arc<WriterStats>,
}

impl PointSender {
    /// Queues one point, waiting while the queue is full.
    pub async fn submit(&self, point: Point) -> Result<(), SinkError> {
        let queue_depth = self.stats.queue_depth.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(queue_depth, measurement = %point.measurement, "queued point");
        if self.tx.send(point).await.is_err() {
            self.stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
            return Err(SinkError::Closed);
        }
        Ok(())
    }

    /// Queues the per-node point. Nodes without statistics are skipped.
    pub async fn add_node(&self, node_id: &str, node: &Node) -> Result<(), SinkError> {
        match node_point(node_id, node, Utc::now()) {
            Some(point) => self.submit(point).await,
            None => Ok(()),
        }
    }

    pub async fn add_global(
        &self,
        stats: &GlobalStats,
        time: DateTime<Utc>,
    ) -> Result<(), SinkError> {
        self.submit(global_point(stats, time)).await
    }

    pub async fn add_counter_map(
        &self,
        measurement: &str,
        counts: &CounterMap,
    ) -> Result<(), SinkError> {
        for point in counter_points(measurement, counts, Utc::now()) {
            self.submit(point).await?;
        }
        Ok(())
    }
}

/// Batched, backpressured writer in front of one [`Backend`], plus its retention task.
pub struct TimeSeriesWriter {
    sender: PointSender,
    backend: Arc<dyn Backend>,
    stats: Arc<WriterStats>,
    shutdown: watch::Sender<bool>,
    consumer: JoinHandle<()>,
    retention: Option<JoinHandle<()>>,
}

impl TimeSeriesWriter {
    pub fn spawn(backend: Arc<dyn Backend>, options: WriterOptions) -> Self {
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        let stats = Arc::new(WriterStats::new());

        let retention = if options.delete_interval.is_zero() {
            None
        } else {
            Some(spawn_retention(
                backend.clone(),
                options.delete_interval,
                options.delete_after,
                shutdown_rx.clone(),
            ))
        };
        let consumer = tokio::spawn(run_consumer(
            backend.clone(),
            rx,
            shutdown_rx,
            stats.clone(),
            options,
        ));

        Self {
            sender: PointSender {
                tx,
                stats: stats.clone(),
            },
            backend,
            stats,
            shutdown: shutdown_tx,
            consumer,
            retention,
        }
    }

    pub fn sender(&self) -> PointSender {
        self.sender.clone()
    }

    pub fn stats(&self) -> Arc<WriterStats> {
        self.stats.clone()
    }

    /// On-demand retention delete, outside the periodic task.
    pub async fn delete_node(&self, older_than: Duration) -> Result<(), SinkError> {
        self.backend.delete_node(older_than).await
    }

    /// Stops accepting points, flushes everything already queued and closes the backend.
    pub async fn close(self) -> Result<(), SinkError> {
        let _ = self.shutdown.send(true);
        drop(self.sender);
        if let Err(err) = self.consumer.await {
            tracing::error!(error = %err, "point writer task failed");
        }
        if let Some(retention) = self.retention {
            if let Err(err) = retention.await {
                tracing::error!(error = %err, "retention task failed");
            }
        }
        self.backend.close().await?;
        tracing::info!(
            flushed_points = self.stats.flushed_points.load(Ordering::Relaxed),
            dropped_points = self.stats.dropped_points.load(Ordering::Relaxed),
            "time-series writer closed"
        );
        Ok(())
    }
}

async fn run_consumer(
    backend: Arc<dyn Backend>,
    mut rx: mpsc::Receiver<Point>,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<WriterStats>,
    options: WriterOptions,
) {
    let mut assembler = BatchAssembler::new(options.batch_size, options.batch_timeout);

    loop {
        let deadline = assembler.deadline();
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(batch) = assembler.take() {
                    flush(backend.as_ref(), batch, FlushReason::Timeout, &stats, &options).await;
                }
            }
            point = rx.recv() => {
                let Some(point) = point else {
                    break;
                };
                stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
                if let Some(batch) = assembler.push(point, Instant::now()) {
                    flush(backend.as_ref(), batch, FlushReason::Size, &stats, &options).await;
                }
            }
        }
    }

    rx.close();
    while let Some(point) = rx.recv().await {
        stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
        if let Some(batch) = assembler.push(point, Instant::now()) {
            flush(backend.as_ref(), batch, FlushReason::Size, &stats, &options).await;
        }
    }
    if let Some(batch) = assembler.take() {
        flush(backend.as_ref(), batch, FlushReason::Shutdown, &stats, &options).await;
    }
    tracing::debug!("point writer drained");
}

async fn flush(
    backend: &dyn Backend,
    batch: Batch,
    reason: FlushReason,
    stats: &WriterStats,
    options: &WriterOptions,
) {
    let len = batch.len();
    let mut delay = options.retry_backoff;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let started = std::time::Instant::now();
        match backend.write(&batch).await {
            Ok(()) => {
                let micros = started.elapsed().as_micros() as u64;
                stats.record_flush(len, micros);
                tracing::debug!(len, micros, reason = reason.as_str(), "flushed point batch");
                return;
            }
            Err(err) => {
                stats.record_error(err.to_string());
                tracing::error!(
                    error = %err,
                    attempt,
                    len,
                    reason = reason.as_str(),
                    "failed to flush point batch"
                );
                if !err.is_transient() || attempt > options.max_retries {
                    stats.dropped_points.fetch_add(len as u64, Ordering::Relaxed);
                    tracing::warn!(
                        len,
                        attempts = attempt,
                        transient = err.is_transient(),
                        "dropping point batch"
                    );
                    return;
                }
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2).min(options.max_backoff);
            }
        }
    }
}
