//! Sensorvault CLI: operator access to the ingestion and query services.
//!
//! Reads the same environment as the services (DATABASE_URL, INFLUXDB_*, S3_*).
//! Commands run as an administrator unless `--uid` is given.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use sensorvault_core::{
    CompleteUploadRequest, Config, DataType, DeviceBinding, DeviceId, MetadataFilter,
    NewMetadata, PermissionLevel, Point, Principal, UploadGrantRequest,
};
use sensorvault_services::{init_tracing, QueryOptions, Services};
use sensorvault_timeseries::Aggregate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sensorvault", about = "Sensor data ingestion and query CLI")]
struct Cli {
    /// Act as this user instead of as an administrator
    #[arg(long, global = true)]
    uid: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations and exit
    Migrate,
    /// Grant a user access to a device
    Bind {
        #[arg(long)]
        dev_id: i64,
        #[arg(long)]
        user: i64,
        /// r, w or rw
        #[arg(long, default_value = "r")]
        level: PermissionLevel,
    },
    /// Upload a JSON array of points as one series batch
    Ingest {
        /// Path to the points file
        file: PathBuf,
        #[arg(long)]
        dev_id: i64,
        #[arg(long)]
        quality: f64,
        /// Base timestamp (unix seconds) for points without one
        #[arg(long)]
        timestamp: i64,
        #[arg(long)]
        measurement: Option<String>,
        /// Client-chosen id; re-sending the same id does not duplicate the batch
        #[arg(long)]
        data_id: Option<i64>,
    },
    /// Upload a file through a presigned URL and record it
    Put {
        file: PathBuf,
        #[arg(long)]
        dev_id: i64,
        #[arg(long)]
        quality: f64,
        #[arg(long)]
        timestamp: i64,
        #[arg(long)]
        bucket: Option<String>,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Query time-series points for a device
    Query {
        #[arg(long)]
        measurement: String,
        #[arg(long)]
        dev_id: i64,
        /// RFC 3339 start of the range
        #[arg(long)]
        start: DateTime<Utc>,
        /// RFC 3339 end of the range
        #[arg(long)]
        end: DateTime<Utc>,
        /// mean, max, min, sum, count, median, first or last
        #[arg(long)]
        aggregate: Option<Aggregate>,
        /// Bucket width, e.g. "5m"; derived from --limit when omitted
        #[arg(long, value_parser = humantime::parse_duration)]
        every: Option<Duration>,
        #[arg(long)]
        limit: Option<u32>,
        /// Field to return (repeatable)
        #[arg(long = "field")]
        fields: Vec<String>,
        /// Tag filter as key=value (repeatable)
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
    },
    /// List metadata records
    List {
        #[arg(long)]
        dev_id: Option<i64>,
        /// series or file
        #[arg(long)]
        r#type: Option<DataType>,
        #[arg(long)]
        min_quality: Option<f64>,
        #[arg(long)]
        max_quality: Option<f64>,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        page_size: u32,
    },
    /// List a device's stored files
    Files {
        #[arg(long)]
        dev_id: i64,
        #[arg(long, default_value = "image")]
        bucket: String,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        page_size: u32,
    },
    /// Print a download link for a stored file
    Download {
        #[arg(long)]
        dev_id: i64,
        #[arg(long)]
        bucket: String,
        key: String,
    },
    /// Delete a data record
    Delete { data_id: i64 },
    /// Record counts for a device
    Stats {
        #[arg(long)]
        dev_id: i64,
    },
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

fn file_name(path: &std::path::Path) -> anyhow::Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no usable file name", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize tracing: {}", e);
    }

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    let services = Services::initialize(&config).await?;
    let principal = match cli.uid {
        Some(uid) => Principal::user(uid),
        None => Principal::admin(0),
    };

    let result = run(cli.command, &services, &principal).await;
    services.shutdown().await;
    result
}

async fn run(command: Commands, services: &Services, principal: &Principal) -> anyhow::Result<()> {
    match command {
        // Initialization already applied them
        Commands::Migrate => {
            tracing::info!("Migrations applied");
        }
        Commands::Bind {
            dev_id,
            user,
            level,
        } => {
            if !principal.is_admin() {
                bail!("Only administrators can bind users to devices");
            }
            let binding = DeviceBinding {
                uid: user,
                dev_id: DeviceId(dev_id),
                permission_level: level,
                is_active: true,
            };
            services.sinks.permissions.bind(&binding).await?;
            print_json(&binding)?;
        }
        Commands::Ingest {
            file,
            dev_id,
            quality,
            timestamp,
            measurement,
            data_id,
        } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let points: Vec<Point> =
                serde_json::from_str(&raw).context("Points file must be a JSON array of points")?;
            let metadata = NewMetadata {
                dev_id: DeviceId(dev_id),
                quality_score: quality,
                timestamp,
                measurement,
                data_id,
            };
            let data_id = services
                .ingest
                .upload_series(principal, metadata, points)
                .await?;
            print_json(&serde_json::json!({ "data_id": data_id }))?;
        }
        Commands::Put {
            file,
            dev_id,
            quality,
            timestamp,
            bucket,
            content_type,
        } => {
            let filename = file_name(&file)?;
            let body = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let grant = services
                .ingest
                .issue_upload_grant(
                    principal,
                    UploadGrantRequest {
                        dev_id: DeviceId(dev_id),
                        filename,
                        bucket,
                        content_type,
                    },
                )
                .await?;
            tracing::debug!(bucket = %grant.bucket, key = %grant.object_key, "Upload granted");

            let response = reqwest::Client::new()
                .put(&grant.upload_url)
                .header(reqwest::header::CONTENT_TYPE, grant.content_type.as_str())
                .body(body)
                .send()
                .await
                .context("Upload request failed")?;
            if !response.status().is_success() {
                bail!("Object store rejected the upload: HTTP {}", response.status());
            }

            let data_id = services
                .ingest
                .complete_file_upload(
                    principal,
                    CompleteUploadRequest {
                        metadata: NewMetadata {
                            dev_id: DeviceId(dev_id),
                            quality_score: quality,
                            timestamp,
                            measurement: None,
                            data_id: None,
                        },
                        upload_id: grant.upload_id,
                        bucket: None,
                        object_key: None,
                    },
                )
                .await?;
            print_json(&serde_json::json!({
                "data_id": data_id,
                "bucket": grant.bucket,
                "object_key": grant.object_key,
            }))?;
        }
        Commands::Query {
            measurement,
            dev_id,
            start,
            end,
            aggregate,
            every,
            limit,
            fields,
            tags,
        } => {
            let options = QueryOptions {
                measurement,
                dev_id: DeviceId(dev_id),
                start: Some(start),
                end: Some(end),
                tags: tags.into_iter().collect::<BTreeMap<_, _>>(),
                fields,
                downsample_interval: every,
                aggregate,
                limit_points: limit,
            };
            let points = services.queries.query(principal, &options).await?;
            print_json(&points)?;
        }
        Commands::List {
            dev_id,
            r#type,
            min_quality,
            max_quality,
            page,
            page_size,
        } => {
            let filter = MetadataFilter {
                dev_id: dev_id.map(DeviceId),
                data_type: r#type,
                min_quality,
                max_quality,
                page,
                page_size,
                ..Default::default()
            };
            let records = services.ingest.list_data(principal, &filter).await?;
            print_json(&records)?;
        }
        Commands::Files {
            dev_id,
            bucket,
            page,
            page_size,
        } => {
            let files = services
                .files
                .list(principal, &bucket, DeviceId(dev_id), page, page_size)
                .await?;
            print_json(&files)?;
        }
        Commands::Download {
            dev_id,
            bucket,
            key,
        } => {
            let url = services
                .files
                .download_url(principal, DeviceId(dev_id), &bucket, &key)
                .await?;
            println!("{}", url);
        }
        Commands::Delete { data_id } => {
            let outcome = services.ingest.delete_data(principal, data_id).await?;
            print_json(&outcome)?;
        }
        Commands::Stats { dev_id } => {
            let stats = services
                .ingest
                .data_statistics(principal, DeviceId(dev_id))
                .await?;
            print_json(&stats)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tag() {
        assert_eq!(
            parse_tag("site=north").unwrap(),
            ("site".to_string(), "north".to_string())
        );
        assert_eq!(parse_tag("empty=").unwrap().1, "");
        assert!(parse_tag("novalue").is_err());
        assert!(parse_tag("=x").is_err());
    }

    #[test]
    fn test_query_arguments_parse() {
        let cli = Cli::try_parse_from([
            "sensorvault",
            "query",
            "--measurement",
            "temperature",
            "--dev-id",
            "7",
            "--start",
            "2024-03-05T00:00:00Z",
            "--end",
            "2024-03-05T01:00:00Z",
            "--aggregate",
            "avg",
            "--every",
            "5m",
            "--tag",
            "site=north",
        ])
        .unwrap();

        match cli.command {
            Commands::Query {
                aggregate,
                every,
                tags,
                ..
            } => {
                assert_eq!(aggregate, Some(Aggregate::Mean));
                assert_eq!(every, Some(Duration::from_secs(300)));
                assert_eq!(tags, vec![("site".to_string(), "north".to_string())]);
            }
            _ => panic!("expected query"),
        }
        assert!(cli.uid.is_none());
    }

    #[test]
    fn test_uid_is_global() {
        let cli = Cli::try_parse_from(["sensorvault", "stats", "--dev-id", "7", "--uid", "3"]).unwrap();
        assert_eq!(cli.uid, Some(3));
    }
}
