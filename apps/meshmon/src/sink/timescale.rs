use super::backend::Backend;
use super::point::{Point, MEASUREMENT_NODE};
use super::SinkError;
use chrono::{Duration as ChronoDuration, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::time::Duration;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS mesh_points (
    measurement TEXT NOT NULL,
    ts TIMESTAMPTZ NOT NULL,
    tags JSONB NOT NULL,
    fields JSONB NOT NULL
)";
const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS mesh_points_measurement_ts ON mesh_points (measurement, ts)";

const BINDS_PER_POINT: usize = 4;

/// Largest batch one insert can carry under the Postgres limit of 65535 bind parameters.
pub const MAX_BATCH_POINTS: usize = u16::MAX as usize / BINDS_PER_POINT;

/// Postgres/Timescale storage with one row per point and tags/fields kept as jsonb.
#[derive(Debug, Clone)]
pub struct TimescaleBackend {
    pool: PgPool,
}

impl TimescaleBackend {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_INDEX).execute(&pool).await?;
        Ok(Self { pool })
    }
}

impl Backend for TimescaleBackend {
    fn name(&self) -> &'static str {
        "timescale"
    }

    fn write<'a>(&'a self, batch: &'a [Point]) -> BoxFuture<'a, Result<(), SinkError>> {
        async move {
            if batch.is_empty() {
                return Ok(());
            }
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO mesh_points (measurement, ts, tags, fields) ");
            builder.push_values(batch.iter(), |mut row, point| {
                row.push_bind(&point.measurement)
                    .push_bind(point.time)
                    .push_bind(Json(&point.tags))
                    .push_bind(Json(&point.fields));
            });
            builder.build().execute(&self.pool).await?;
            Ok(())
        }
        .boxed()
    }

    fn delete_node(&self, older_than: Duration) -> BoxFuture<'_, Result<(), SinkError>> {
        async move {
            let Some(cutoff) = ChronoDuration::from_std(older_than)
                .ok()
                .and_then(|age| Utc::now().checked_sub_signed(age))
            else {
                return Ok(());
            };
            let result = sqlx::query("DELETE FROM mesh_points WHERE measurement = $1 AND ts < $2")
                .bind(MEASUREMENT_NODE)
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
            tracing::debug!(rows = result.rows_affected(), "deleted aged node rows");
            Ok(())
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, Result<(), SinkError>> {
        async move {
            self.pool.close().await;
            Ok(())
        }
        .boxed()
    }
}
