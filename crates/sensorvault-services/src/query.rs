use sensorvault_core::{Access, AppResult, Point, Principal, RetryExecutor};
use sensorvault_timeseries::{decode_rows, plan, QueryOptions, TimeSeriesStore};
use std::sync::Arc;
use std::time::Instant;

use crate::permission::PermissionGate;
use crate::sink::from_timeseries_error;

/// Permission-checked, retried reads from the time-series store
#[derive(Clone)]
pub struct QueryService {
    gate: PermissionGate,
    series: Arc<dyn TimeSeriesStore>,
    retry: RetryExecutor,
    default_limit: u32,
}

impl QueryService {
    pub fn new(
        gate: PermissionGate,
        series: Arc<dyn TimeSeriesStore>,
        retry: RetryExecutor,
        default_limit: u32,
    ) -> Self {
        Self {
            gate,
            series,
            retry,
            default_limit,
        }
    }

    #[tracing::instrument(skip(self, options), fields(uid = principal.uid, dev_id = %options.dev_id, measurement = %options.measurement))]
    pub async fn query(&self, principal: &Principal, options: &QueryOptions) -> AppResult<Vec<Point>> {
        let plan = plan(options, self.default_limit).map_err(from_timeseries_error)?;
        self.gate
            .authorize(principal, options.dev_id, Access::Read)
            .await?;

        let start = Instant::now();
        let series = &self.series;
        let sql = plan.sql.as_str();
        let rows = self
            .retry
            .run("query", move || series.query(sql))
            .await
            .map_err(from_timeseries_error)?;

        let points = decode_rows(&plan, rows).map_err(from_timeseries_error)?;
        tracing::debug!(
            point_count = points.len(),
            interval_ms = plan.interval.as_millis() as u64,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Query completed"
        );
        Ok(points)
    }
}
