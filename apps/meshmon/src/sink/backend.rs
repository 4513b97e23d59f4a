use super::influx::InfluxBackend;
use super::logfile::LogFileBackend;
use super::point::Point;
use super::timescale::TimescaleBackend;
use super::SinkError;
use crate::config::BackendConfig;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Capability set every time-series database integration provides.
///
/// Implementations are selected at runtime from [`BackendConfig`], so the methods return boxed
/// futures to keep the trait object safe.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Writes one batch as a single call, preserving point order.
    fn write<'a>(&'a self, batch: &'a [Point]) -> BoxFuture<'a, Result<(), SinkError>>;

    /// Deletes node measurement rows older than `older_than`.
    fn delete_node(&self, older_than: Duration) -> BoxFuture<'_, Result<(), SinkError>>;

    fn close(&self) -> BoxFuture<'_, Result<(), SinkError>>;
}

pub async fn connect(config: &BackendConfig) -> Result<Arc<dyn Backend>, SinkError> {
    let backend: Arc<dyn Backend> = match config {
        BackendConfig::Influx {
            address,
            database,
            username,
            password,
        } => Arc::new(InfluxBackend::new(
            address,
            database,
            username.clone(),
            password.clone(),
        )?),
        BackendConfig::Timescale { url, pool_size } => {
            Arc::new(TimescaleBackend::connect(url, *pool_size).await?)
        }
        BackendConfig::LogFile { path } => Arc::new(LogFileBackend::open(path).await?),
    };
    tracing::info!(backend = backend.name(), "time-series backend ready");
    Ok(backend)
}
