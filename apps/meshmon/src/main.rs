use anyhow::{Context, Result};
use meshmon::config::Config;
use meshmon::ingest::{spawn_line_feed, NodeIngest};
use meshmon::persist::PersistenceWorker;
use meshmon::registry::NodeRegistry;
use meshmon::shutdown;
use meshmon::sink::{self, TimeSeriesWriter};
use std::sync::Arc;
use tokio::io::BufReader;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,meshmon=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let endpoint = normalize_otlp_http_endpoint(endpoint);
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "meshmon"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.ends_with("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{trimmed}/v1/traces")
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(&config)?;

    let registry = Arc::new(NodeRegistry::load_or_empty(
        config.nodes.state_path.as_deref(),
    ));

    let writer = match config.database.as_ref() {
        Some(database) => {
            let backend = sink::connect(&database.backend)
                .await
                .context("connect time-series backend")?;
            Some(TimeSeriesWriter::spawn(backend, database.writer_options()))
        }
        None => None,
    };
    let point_sender = writer.as_ref().map(TimeSeriesWriter::sender);

    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    let worker = PersistenceWorker::new(
        registry.clone(),
        config.nodes.clone(),
        config.exports.clone(),
        point_sender.clone(),
    );
    let worker_handle = tokio::spawn(worker.run(shutdown_rx.clone()));

    let ingest = NodeIngest::new(registry.clone(), point_sender);
    let feed_handle = config.stdin_feed.then(|| {
        spawn_line_feed(
            BufReader::new(tokio::io::stdin()),
            ingest.clone(),
            shutdown_rx.clone(),
        )
    });

    tracing::info!(
        nodes = registry.len().await,
        backend = config.database.is_some(),
        stdin_feed = config.stdin_feed,
        "meshmon started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Some(handle) = feed_handle {
        if let Err(err) = handle.await {
            tracing::warn!(error = %err, "announcement feed task failed");
        }
    }
    if let Err(err) = worker_handle.await {
        tracing::error!(error = %err, "persistence worker failed");
    }
    drop(ingest);

    if let Some(writer) = writer {
        let stats = writer.stats();
        if let Err(err) = writer.close().await {
            tracing::warn!(error = %err, "time-series backend did not close cleanly");
        }
        if !stats.is_healthy() {
            tracing::warn!(
                last_error = %stats.last_error().unwrap_or_default(),
                "time-series writer ended unhealthy"
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::normalize_otlp_http_endpoint;

    #[test]
    fn otlp_endpoint_gets_traces_path_once() {
        assert_eq!(
            normalize_otlp_http_endpoint("http://collector:4318/"),
            "http://collector:4318/v1/traces"
        );
        assert_eq!(
            normalize_otlp_http_endpoint("http://collector:4318/v1/traces"),
            "http://collector:4318/v1/traces"
        );
        assert_eq!(normalize_otlp_http_endpoint("  "), "");
    }
}
