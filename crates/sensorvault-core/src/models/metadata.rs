use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::device::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Series,
    File,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Series => "series",
            DataType::File => "file",
        }
    }
}

impl FromStr for DataType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "series" => Ok(DataType::Series),
            "file" => Ok(DataType::File),
            _ => Err(anyhow::anyhow!("Invalid data type: {}", s)),
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Summary of a series batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesDetails {
    pub measurement: String,
    pub point_count: usize,
    pub first_timestamp: i64,
    pub last_timestamp: i64,
}

/// Location and description of a stored object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDetails {
    pub bucket: String,
    pub object_key: String,
    pub filename: String,
    pub content_type: String,
}

/// Type-specific payload of a metadata record.
///
/// Serialized as `data_type` plus `extra_data`, the column pair it is stored in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "data_type", content = "extra_data", rename_all = "lowercase")]
pub enum DataDetails {
    Series(SeriesDetails),
    File(FileDetails),
}

impl DataDetails {
    pub fn data_type(&self) -> DataType {
        match self {
            DataDetails::Series(_) => DataType::Series,
            DataDetails::File(_) => DataType::File,
        }
    }

    pub fn as_file(&self) -> Option<&FileDetails> {
        match self {
            DataDetails::File(details) => Some(details),
            DataDetails::Series(_) => None,
        }
    }
}

/// One record per uploaded unit (series batch or file)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub data_id: i64,
    pub dev_id: DeviceId,
    pub uid: i64,
    pub quality_score: f64,
    /// Unix seconds
    pub timestamp: i64,
    #[serde(flatten)]
    pub details: DataDetails,
}

impl Metadata {
    pub fn data_type(&self) -> DataType {
        self.details.data_type()
    }
}

/// Caller-supplied metadata for an upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewMetadata {
    pub dev_id: DeviceId,
    #[validate(range(
        min = 0.0,
        max = 100.0,
        message = "Quality score must be between 0 and 100"
    ))]
    pub quality_score: f64,
    /// Unix seconds
    #[validate(range(min = 0, message = "Timestamp must not be negative"))]
    pub timestamp: i64,
    /// Measurement for points that do not name one
    #[serde(default)]
    pub measurement: Option<String>,
    /// Idempotency key; re-sending the same id never creates a second record
    #[serde(default)]
    pub data_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Timestamp,
    QualityScore,
    DataId,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            SortField::Timestamp => "timestamp",
            SortField::QualityScore => "quality_score",
            SortField::DataId => "data_id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filter and paging for metadata listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct MetadataFilter {
    #[serde(default)]
    pub dev_id: Option<DeviceId>,
    #[serde(default)]
    pub uid: Option<i64>,
    #[serde(default)]
    pub data_type: Option<DataType>,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub min_quality: Option<f64>,
    #[serde(default)]
    pub max_quality: Option<f64>,
    #[serde(default)]
    pub sort_by: SortField,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[validate(range(min = 1, message = "Page must be at least 1"))]
    pub page: u32,
    #[validate(range(min = 1, max = 1000, message = "Page size must be between 1 and 1000"))]
    pub page_size: u32,
}

impl Default for MetadataFilter {
    fn default() -> Self {
        Self {
            dev_id: None,
            uid: None,
            data_type: None,
            start_time: None,
            end_time: None,
            min_quality: None,
            max_quality: None,
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
            page: 1,
            page_size: 20,
        }
    }
}

impl MetadataFilter {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }
}

/// One page of a listing plus the total matching count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStatistics {
    pub dev_id: DeviceId,
    pub total: i64,
    /// Records with a quality score below the abnormal threshold
    pub abnormal: i64,
}

/// Result of deleting a data unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub data_id: i64,
    pub data_type: DataType,
    /// Whether the payload itself was physically removed
    pub payload_removed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_serializes_as_type_and_extra_data() {
        let metadata = Metadata {
            data_id: 1,
            dev_id: DeviceId(7),
            uid: 3,
            quality_score: 88.0,
            timestamp: 1000,
            details: DataDetails::File(FileDetails {
                bucket: "image".to_string(),
                object_key: "7/2024/01/02/a.jpg".to_string(),
                filename: "a.jpg".to_string(),
                content_type: "image/jpeg".to_string(),
            }),
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["data_type"], "file");
        assert_eq!(json["extra_data"]["bucket"], "image");

        let back: Metadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn test_new_metadata_validation() {
        let mut metadata = NewMetadata {
            dev_id: DeviceId(1),
            quality_score: 50.0,
            timestamp: 1000,
            measurement: None,
            data_id: None,
        };
        assert!(metadata.validate().is_ok());

        metadata.quality_score = 101.0;
        assert!(metadata.validate().is_err());
    }

    #[test]
    fn test_filter_offset() {
        let filter = MetadataFilter {
            page: 3,
            page_size: 20,
            ..Default::default()
        };
        assert_eq!(filter.offset(), 40);
        assert!(filter.validate().is_ok());

        let filter = MetadataFilter {
            page: 0,
            ..Default::default()
        };
        assert!(filter.validate().is_err());
    }
}
