//! Periodic expiry plus atomic snapshot and export files.

use crate::config::{ExportConfig, NodesConfig};
use crate::export::{build_graph, node_list, GlobalStats};
use crate::registry::{ExpireSummary, NodeRegistry, RegistrySnapshot};
use crate::shutdown::shutdown_requested;
use crate::sink::{PointSender, MEASUREMENT_FIRMWARE, MEASUREMENT_MODEL};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Serializes `value` into a temporary file next to `path` and renames it over `path`.
///
/// The destination only ever holds the previous or the new complete content. A failure before
/// the rename removes the temporary file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer(&mut writer, value)
            .with_context(|| format!("serialize {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("write {}", path.display()))?;
    }
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync {}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    RunningCycle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub expired: ExpireSummary,
    pub nodes: usize,
    pub files_written: usize,
    pub stats_published: bool,
}

pub struct PersistenceWorker {
    registry: Arc<NodeRegistry>,
    nodes: NodesConfig,
    exports: ExportConfig,
    sink: Option<PointSender>,
    state: WorkerState,
}

impl PersistenceWorker {
    pub fn new(
        registry: Arc<NodeRegistry>,
        nodes: NodesConfig,
        exports: ExportConfig,
        sink: Option<PointSender>,
    ) -> Self {
        Self {
            registry,
            nodes,
            exports,
            sink,
            state: WorkerState::Idle,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Runs one cycle: expire, snapshot, write every configured file, publish global stats.
    ///
    /// File writing stops at the first failure. Stats are published either way; the returned
    /// error is the write failure.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        self.state = WorkerState::RunningCycle;
        let result = self.cycle(now).await;
        self.state = WorkerState::Idle;
        result
    }

    async fn cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let expired = self
            .registry
            .expire(now, self.nodes.offline_after, self.nodes.prune_after)
            .await;
        let snapshot = self.registry.snapshot().await;
        let stats = GlobalStats::from_snapshot(&snapshot);
        let node_count = snapshot.len();

        let targets = WriteTargets {
            state_path: self.nodes.state_path.clone(),
            exports: self.exports.clone(),
        };
        let written = tokio::task::spawn_blocking(move || targets.write_all(&snapshot, now))
            .await
            .context("file writer task failed")
            .and_then(|result| result);

        let stats_published = match self.sink.as_ref() {
            Some(sink) => publish_stats(sink, &stats, now).await,
            None => false,
        };

        let files_written = written?;
        Ok(CycleReport {
            expired,
            nodes: node_count,
            files_written,
            stats_published,
        })
    }

    async fn run_logged_cycle(&mut self) {
        match self.run_cycle(Utc::now()).await {
            Ok(report) => tracing::info!(
                nodes = report.nodes,
                pruned = report.expired.pruned,
                marked_offline = report.expired.marked_offline,
                files = report.files_written,
                "persistence cycle complete"
            ),
            Err(err) => tracing::warn!(
                error = %format!("{err:#}"),
                "persistence cycle failed; retrying next tick"
            ),
        }
    }

    /// Ticks every save interval until shutdown, then runs one final cycle.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let every = self.nodes.save_interval;
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            self.run_logged_cycle().await;
        }
        self.run_logged_cycle().await;
        tracing::debug!("persistence worker stopped");
    }
}

struct WriteTargets {
    state_path: Option<PathBuf>,
    exports: ExportConfig,
}

impl WriteTargets {
    fn write_all(&self, snapshot: &RegistrySnapshot, now: DateTime<Utc>) -> Result<usize> {
        let mut written = 0;
        if let Some(path) = self.state_path.as_deref() {
            write_json_atomic(path, snapshot)?;
            written += 1;
        }
        if let Some(path) = self.exports.nodes_path.as_deref() {
            write_json_atomic(path, &node_list(snapshot, self.exports.nodes_version, now))?;
            written += 1;
        }
        if let Some(path) = self.exports.graph_path.as_deref() {
            write_json_atomic(path, &build_graph(snapshot, now))?;
            written += 1;
        }
        Ok(written)
    }
}

async fn publish_stats(sink: &PointSender, stats: &GlobalStats, now: DateTime<Utc>) -> bool {
    let result = async {
        sink.add_global(stats, now).await?;
        sink.add_counter_map(MEASUREMENT_MODEL, &stats.models).await?;
        sink.add_counter_map(MEASUREMENT_FIRMWARE, &stats.firmwares)
            .await
    }
    .await;
    match result {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "failed to publish global stats");
            false
        }
    }
}
