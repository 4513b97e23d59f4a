//! Time-series sink: point construction, batching, retention and the database backends.

mod assembler;
mod backend;
mod influx;
mod logfile;
mod point;
mod retention;
mod timescale;
mod writer;


pub use assembler::{BatchAssembler, FlushReason};
pub use backend::{connect, Backend};
pub use influx::InfluxBackend;
pub use logfile::LogFileBackend;
pub use point::{
    counter_points, global_point, node_point, Batch, FieldValue, Point, MEASUREMENT_FIRMWARE,
    MEASUREMENT_GLOBAL, MEASUREMENT_MODEL, MEASUREMENT_NODE,
};
pub use retention::spawn_retention;
pub use timescale::{TimescaleBackend, MAX_BATCH_POINTS};
pub use writer::{PointSender, TimeSeriesWriter, WriterOptions, WriterStats};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("time-series writer is closed")]
    Closed,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode points: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SinkError {
    /// Whether retrying the same write can succeed. Rejected requests and encoding failures
    /// fail the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            SinkError::Http(_) | SinkError::Database(_) | SinkError::Io(_) => true,
            SinkError::Status { status, .. } => *status >= 500 || matches!(*status, 408 | 429),
            SinkError::Closed | SinkError::Encode(_) => false,
        }
    }
}
