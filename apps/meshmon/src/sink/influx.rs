use super::backend::Backend;
use super::point::{Point, MEASUREMENT_NODE};
use super::SinkError;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// InfluxDB 1.x HTTP API: `/write` for line protocol, `/query` for retention deletes.
#[derive(Debug, Clone)]
pub struct InfluxBackend {
    client: Client,
    address: String,
    database: String,
    username: Option<String>,
    password: Option<String>,
}

impl InfluxBackend {
    pub fn new(
        address: &str,
        database: &str,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            address: address.trim_end_matches('/').to_string(),
            database: database.to_string(),
            username,
            password,
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{path}", self.address));
        match self.username.as_deref() {
            Some(username) => request.basic_auth(username, self.password.as_deref()),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(), SinkError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

pub(crate) fn retention_query(older_than: Duration) -> String {
    format!(
        "delete from {MEASUREMENT_NODE} where time < now() - {}s",
        older_than.as_secs()
    )
}

impl Backend for InfluxBackend {
    fn name(&self) -> &'static str {
        "influxdb"
    }

    fn write<'a>(&'a self, batch: &'a [Point]) -> BoxFuture<'a, Result<(), SinkError>> {
        async move {
            let body = batch
                .iter()
                .map(Point::to_line_protocol)
                .collect::<Vec<_>>()
                .join("\n");
            let request = self
                .request("/write")
                .query(&[("db", self.database.as_str()), ("precision", "ns")])
                .body(body);
            self.send(request).await
        }
        .boxed()
    }

    fn delete_node(&self, older_than: Duration) -> BoxFuture<'_, Result<(), SinkError>> {
        async move {
            let query = retention_query(older_than);
            let request = self
                .request("/query")
                .query(&[("db", self.database.as_str()), ("q", query.as_str())]);
            self.send(request).await
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, Result<(), SinkError>> {
        async { Ok(()) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_query_targets_node_measurement() {
        assert_eq!(
            retention_query(Duration::from_secs(7 * 24 * 3600)),
            "delete from node where time < now() - 604800s"
        );
    }

    #[test]
    fn address_loses_trailing_slash() {
        let backend = InfluxBackend::new("http://influx:8086/", "mesh", None, None).unwrap();
        assert_eq!(backend.address, "http://influx:8086");
    }
}
