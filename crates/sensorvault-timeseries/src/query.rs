//! Read query planning and result decoding.
//!
//! A logical query (device, time range, tags, fields, aggregation, point
//! budget) becomes one SQL statement for InfluxDB 3 in one of two shapes:
//!
//! ```text
//! SELECT DATE_BIN(INTERVAL '<ms> milliseconds', time) AS bucket, AVG("value") AS "value"
//!   FROM "<measurement>" WHERE <time range> AND <tags> GROUP BY bucket ORDER BY bucket LIMIT <n>
//!
//! SELECT <time, fields | *> FROM "<measurement>" WHERE <time range> AND <tags>
//!   ORDER BY time LIMIT <n>
//! ```
//!
//! Points are stored with second precision, so aggregation buckets are never
//! narrower than one second.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use sensorvault_core::constants::{DEV_ID_TAG, RESERVED_TAGS};
use sensorvault_core::validation::validate_identifier;
use sensorvault_core::{DeviceId, FieldValue, Point};
use serde::Deserialize;

use crate::client::Row;
use crate::error::{TimeSeriesError, TimeSeriesResult};

/// Field aggregated when an aggregate is requested without fields
pub const DEFAULT_AGGREGATE_FIELD: &str = "value";

const MIN_DOWNSAMPLE_INTERVAL: Duration = Duration::from_millis(1);

/// Timestamp resolution of stored points
const STORE_PRECISION: Duration = Duration::from_secs(1);

/// Allowed aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Aggregate {
    Mean,
    Max,
    Min,
    Sum,
    Count,
    Median,
    First,
    Last,
}

impl Aggregate {
    fn projection(&self, field: &str) -> String {
        let quoted = quote_identifier(field);
        match self {
            Aggregate::Mean => format!("AVG({})", quoted),
            Aggregate::Max => format!("MAX({})", quoted),
            Aggregate::Min => format!("MIN({})", quoted),
            Aggregate::Sum => format!("SUM({})", quoted),
            Aggregate::Count => format!("COUNT({})", quoted),
            Aggregate::Median => format!("MEDIAN({})", quoted),
            // Ordered selectors need the time column
            Aggregate::First => format!("FIRST_VALUE({} ORDER BY time)", quoted),
            Aggregate::Last => format!("LAST_VALUE({} ORDER BY time)", quoted),
        }
    }
}

impl FromStr for Aggregate {
    type Err = TimeSeriesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mean" | "avg" => Ok(Aggregate::Mean),
            "max" => Ok(Aggregate::Max),
            "min" => Ok(Aggregate::Min),
            "sum" => Ok(Aggregate::Sum),
            "count" => Ok(Aggregate::Count),
            "median" => Ok(Aggregate::Median),
            "first" => Ok(Aggregate::First),
            "last" => Ok(Aggregate::Last),
            other => Err(TimeSeriesError::InvalidQuery(format!(
                "unsupported aggregate '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Aggregate {
    type Error = TimeSeriesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for Aggregate {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Aggregate::Mean => "mean",
            Aggregate::Max => "max",
            Aggregate::Min => "min",
            Aggregate::Sum => "sum",
            Aggregate::Count => "count",
            Aggregate::Median => "median",
            Aggregate::First => "first",
            Aggregate::Last => "last",
        };
        f.write_str(name)
    }
}

/// Logical read query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryOptions {
    pub measurement: String,
    pub dev_id: DeviceId,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Exact-match tag filters; `dev_id` is always forced to the queried device
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Fields to project; empty means all fields
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default, with = "humantime_opt")]
    pub downsample_interval: Option<Duration>,
    #[serde(default)]
    pub aggregate: Option<Aggregate>,
    /// Point budget; unset or 0 uses the configured default
    #[serde(default)]
    pub limit_points: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    Raw,
    Aggregated(Aggregate),
}

/// Executable query plus what is needed to decode its rows
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub sql: String,
    pub measurement: String,
    pub shape: QueryShape,
    pub interval: Duration,
    pub limit: u32,
    /// Columns decoded as tags; everything else is a field
    pub tag_keys: BTreeSet<String>,
}

/// Interval that keeps a range within the point budget, floored to 1ms.
pub fn downsample_interval(range: Duration, limit_points: u32) -> Duration {
    if limit_points == 0 {
        return MIN_DOWNSAMPLE_INTERVAL;
    }
    (range / limit_points).max(MIN_DOWNSAMPLE_INTERVAL)
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Nanosecond-precision timestamp literal for a time predicate
fn timestamp_literal(at: DateTime<Utc>) -> String {
    format!(
        "to_timestamp('{}')",
        at.to_rfc3339_opts(SecondsFormat::Nanos, true)
    )
}

/// Validate a logical query and build its SQL.
pub fn plan(options: &QueryOptions, default_limit: u32) -> TimeSeriesResult<QueryPlan> {
    if options.measurement.trim().is_empty() {
        return Err(TimeSeriesError::InvalidQuery(
            "measurement is required".to_string(),
        ));
    }
    validate_identifier("Measurement", &options.measurement)
        .map_err(|e| TimeSeriesError::InvalidQuery(e.to_string()))?;

    let (start, end) = match (options.start, options.end) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            return Err(TimeSeriesError::InvalidQuery(
                "time range start and end are required".to_string(),
            ))
        }
    };
    if start > end {
        return Err(TimeSeriesError::InvalidQuery(
            "time range start must not be after end".to_string(),
        ));
    }

    let limit = match options.limit_points {
        Some(limit) if limit > 0 => limit,
        _ => default_limit,
    };

    let interval = match options.downsample_interval {
        Some(interval) if !interval.is_zero() => interval,
        _ => {
            let range = (end - start).to_std().unwrap_or(Duration::ZERO);
            downsample_interval(range, limit)
        }
    };
    // Finer buckets would collapse onto the same decoded second
    let interval = interval.max(STORE_PRECISION);

    // Caller tags first, then the device tag so it cannot be overridden
    let mut tags = options.tags.clone();
    tags.insert(DEV_ID_TAG.to_string(), options.dev_id.to_string());
    for key in tags.keys() {
        validate_identifier("Tag", key).map_err(|e| TimeSeriesError::InvalidQuery(e.to_string()))?;
    }

    let mut seen = BTreeSet::new();
    let mut fields = Vec::new();
    for field in &options.fields {
        validate_identifier("Field", field)
            .map_err(|e| TimeSeriesError::InvalidQuery(e.to_string()))?;
        if seen.insert(field.as_str()) {
            fields.push(field.as_str());
        }
    }

    let shape = match options.aggregate {
        Some(aggregate) => QueryShape::Aggregated(aggregate),
        None => QueryShape::Raw,
    };

    let mut sql = String::from("SELECT ");
    match shape {
        QueryShape::Aggregated(aggregate) => {
            if fields.is_empty() {
                fields.push(DEFAULT_AGGREGATE_FIELD);
            }
            let projections: Vec<String> = fields
                .iter()
                .map(|f| format!("{} AS {}", aggregate.projection(f), quote_identifier(f)))
                .collect();
            sql.push_str(&format!(
                "DATE_BIN(INTERVAL '{} milliseconds', time) AS bucket, {}",
                interval.as_millis(),
                projections.join(", ")
            ));
        }
        QueryShape::Raw => {
            if fields.is_empty() {
                sql.push('*');
            } else {
                let columns: Vec<String> = fields.iter().map(|f| quote_identifier(f)).collect();
                sql.push_str(&format!("time, {}", columns.join(", ")));
            }
        }
    }

    sql.push_str(&format!(" FROM {}", quote_identifier(&options.measurement)));

    let mut conditions = vec![
        format!("time >= {}", timestamp_literal(start)),
        format!("time <= {}", timestamp_literal(end)),
    ];
    for (key, value) in &tags {
        conditions.push(format!("{} = {}", quote_identifier(key), quote_literal(value)));
    }
    sql.push_str(" WHERE ");
    sql.push_str(&conditions.join(" AND "));

    match shape {
        QueryShape::Aggregated(_) => sql.push_str(" GROUP BY bucket ORDER BY bucket"),
        QueryShape::Raw => sql.push_str(" ORDER BY time"),
    }
    sql.push_str(&format!(" LIMIT {}", limit));

    let mut tag_keys: BTreeSet<String> = tags.into_keys().collect();
    tag_keys.extend(RESERVED_TAGS.iter().map(|t| t.to_string()));
    if matches!(shape, QueryShape::Aggregated(_)) {
        // Aggregated rows carry no tag columns
        tag_keys.clear();
    }

    Ok(QueryPlan {
        sql,
        measurement: options.measurement.clone(),
        shape,
        interval,
        limit,
        tag_keys,
    })
}

/// Parse the time column as returned by InfluxDB 3 JSON output.
fn parse_time(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|t| t.and_utc())
            }),
        // Epoch nanoseconds
        serde_json::Value::Number(n) => n.as_i64().and_then(|nanos| {
            DateTime::from_timestamp(
                nanos.div_euclid(1_000_000_000),
                nanos.rem_euclid(1_000_000_000) as u32,
            )
        }),
        _ => None,
    }
}

/// Turn result rows into points, keeping the query's ordering.
pub fn decode_rows(plan: &QueryPlan, rows: Vec<Row>) -> TimeSeriesResult<Vec<Point>> {
    let time_column = match plan.shape {
        QueryShape::Aggregated(_) => "bucket",
        QueryShape::Raw => "time",
    };

    let mut points = Vec::with_capacity(rows.len());
    for row in rows {
        let time = row
            .get(time_column)
            .and_then(parse_time)
            .ok_or_else(|| {
                TimeSeriesError::Decode(format!("row is missing a valid '{}' column", time_column))
            })?;

        let mut point = Point::new(plan.measurement.clone()).at(time.timestamp());
        for (column, value) in row {
            if column == time_column || column == "time" || value.is_null() {
                continue;
            }
            if plan.tag_keys.contains(&column) {
                let tag = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                point.tags.insert(column, tag);
            } else if let Some(field) = FieldValue::from_json(&value) {
                point.fields.insert(column, field);
            }
        }
        points.push(point);
    }

    Ok(points)
}

mod humantime_opt {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(s) if !s.trim().is_empty() => humantime::parse_duration(s.trim())
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
