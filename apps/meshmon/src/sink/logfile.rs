use super::backend::Backend;
use super::point::Point;
use super::SinkError;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only debug sink: one readable line per point and per retention call.
#[derive(Debug)]
pub struct LogFileBackend {
    path: PathBuf,
    file: Mutex<File>,
}

impl LogFileBackend {
    pub async fn open(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, text: &str) -> Result<(), SinkError> {
        let mut file = self.file.lock().await;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn render(point: &Point) -> String {
    let tags = point
        .tags
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",");
    let fields = serde_json::to_string(&point.fields).unwrap_or_default();
    format!(
        "[{}] {} [{}] {}\n",
        point.time.to_rfc3339(),
        point.measurement,
        tags,
        fields
    )
}

impl Backend for LogFileBackend {
    fn name(&self) -> &'static str {
        "logfile"
    }

    fn write<'a>(&'a self, batch: &'a [Point]) -> BoxFuture<'a, Result<(), SinkError>> {
        async move {
            let text: String = batch.iter().map(render).collect();
            self.append(&text).await
        }
        .boxed()
    }

    fn delete_node(&self, older_than: Duration) -> BoxFuture<'_, Result<(), SinkError>> {
        async move {
            let line = format!(
                "[{}] delete node older than {}s\n",
                Utc::now().to_rfc3339(),
                older_than.as_secs()
            );
            self.append(&line).await
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, Result<(), SinkError>> {
        async move {
            let file = self.file.lock().await;
            file.sync_all().await?;
            Ok(())
        }
        .boxed()
    }
}
