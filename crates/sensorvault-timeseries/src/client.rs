// InfluxDB 3 HTTP client

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use sensorvault_core::{Point, TimeSeriesConfig};
use serde_json::json;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::{Duration, Instant};

use crate::error::{TimeSeriesError, TimeSeriesResult};
use crate::line_protocol::encode_batch;

/// One result row keyed by column name
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Write and query access to the time-series store
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Write points; timestamps are Unix seconds
    async fn write_points(&self, points: &[Point]) -> TimeSeriesResult<()>;

    /// Run a SQL query and return its rows in order
    async fn query(&self, sql: &str) -> TimeSeriesResult<Vec<Row>>;

    /// Cheap round trip used by health checks
    async fn ping(&self) -> TimeSeriesResult<()> {
        self.query("SELECT 1").await.map(|_| ())
    }
}

pub struct InfluxDb3Client {
    http_client: Client,
    base_url: String,
    database: String,
    token: Option<String>,
    batch_size: usize,
}

impl Debug for InfluxDb3Client {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("InfluxDb3Client")
            .field("base_url", &self.base_url)
            .field("database", &self.database)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl InfluxDb3Client {
    pub fn new(config: &TimeSeriesConfig, timeout: Duration) -> TimeSeriesResult<Self> {
        if config.database.is_empty() {
            return Err(TimeSeriesError::Config(
                "time-series database name is required".to_string(),
            ));
        }

        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TimeSeriesError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.host.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            token: config.token.clone(),
            batch_size: config.write_batch_size.max(1),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check_status(response: Response) -> TimeSeriesResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(TimeSeriesError::from_status(status.as_u16(), error_text))
    }

    /// Write a single point
    pub async fn write_point(&self, point: &Point) -> TimeSeriesResult<()> {
        self.write_points(std::slice::from_ref(point)).await
    }

    async fn write_chunk(&self, body: String) -> TimeSeriesResult<()> {
        let url = format!("{}/api/v3/write_lp", self.base_url);
        let request = self
            .http_client
            .post(&url)
            .query(&[("db", self.database.as_str()), ("precision", "second")])
            .header("content-type", "text/plain; charset=utf-8")
            .body(body);

        let response = self.authorize(request).send().await?;
        Self::check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl TimeSeriesStore for InfluxDb3Client {
    async fn write_points(&self, points: &[Point]) -> TimeSeriesResult<()> {
        if points.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        for chunk in points.chunks(self.batch_size) {
            let body = encode_batch(chunk)?;
            self.write_chunk(body).await?;
        }

        tracing::debug!(
            database = %self.database,
            point_count = points.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Points written"
        );
        Ok(())
    }

    async fn query(&self, sql: &str) -> TimeSeriesResult<Vec<Row>> {
        let url = format!("{}/api/v3/query_sql", self.base_url);
        let body = json!({
            "db": self.database,
            "q": sql,
            "format": "json",
        });

        let start = Instant::now();
        let request = self.http_client.post(&url).json(&body);
        let response = self.authorize(request).send().await?;
        let response = Self::check_status(response).await?;

        let text = response.text().await?;
        let rows = if text.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str::<Vec<Row>>(&text)
                .map_err(|e| TimeSeriesError::Decode(e.to_string()))?
        };

        tracing::debug!(
            database = %self.database,
            row_count = rows.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Query executed"
        );
        Ok(rows)
    }
}
