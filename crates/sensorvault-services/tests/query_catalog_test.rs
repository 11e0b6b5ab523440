mod helpers;

use chrono::{TimeZone, Utc};
use helpers::{harness, DEVICE, READER_UID, STRANGER_UID, WRITER_UID};
use sensorvault_core::{
    AppError, DataType, FieldValue, MetadataFilter, NewMetadata, Point, Principal,
};
use sensorvault_timeseries::{Aggregate, QueryOptions, TimeSeriesError};

fn six_thousand_seconds() -> QueryOptions {
    QueryOptions {
        measurement: "temperature".to_string(),
        dev_id: DEVICE,
        start: Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
        end: Some(Utc.timestamp_opt(1_700_006_000, 0).unwrap()),
        aggregate: Some(Aggregate::Mean),
        limit_points: Some(6000),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_query_downsamples_to_point_budget() {
    let h = harness();
    h.series
        .set_rows(r#"[{"bucket":"2023-11-14T22:13:20","value":21.0},{"bucket":"2023-11-14T22:13:21","value":22.0}]"#);

    let points = h
        .services
        .queries
        .query(&Principal::user(READER_UID), &six_thousand_seconds())
        .await
        .unwrap();

    let sql = h.series.queries.lock().unwrap()[0].clone();
    assert!(sql.contains("DATE_BIN(INTERVAL '1000 milliseconds', time)"));
    assert!(sql.contains("\"dev_id\" = '7'"));
    assert!(sql.ends_with("LIMIT 6000"));

    assert_eq!(points.len(), 2);
    assert_eq!(points[0].timestamp, 1_700_000_000);
    assert_eq!(points[1].fields.get("value"), Some(&FieldValue::Float(22.0)));
}

#[tokio::test]
async fn test_query_permissions() {
    let h = harness();
    let options = six_thousand_seconds();

    assert!(h
        .services
        .queries
        .query(&Principal::user(WRITER_UID), &options)
        .await
        .is_ok());
    assert!(h
        .services
        .queries
        .query(&Principal::admin(42), &options)
        .await
        .is_ok());

    let err = h
        .services
        .queries
        .query(&Principal::user(STRANGER_UID), &options)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn test_query_validation_happens_before_the_store() {
    let h = harness();
    let mut options = six_thousand_seconds();
    options.end = None;

    let err = h
        .services
        .queries
        .query(&Principal::user(READER_UID), &options)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
    assert!(h.series.queries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_query_surfaces_last_error_after_retries() {
    let h = harness();
    for _ in 0..3 {
        h.series
            .fail_next(TimeSeriesError::Unavailable("connection reset".into()));
    }

    let err = h
        .services
        .queries
        .query(&Principal::user(READER_UID), &six_thousand_seconds())
        .await
        .unwrap_err();
    match err {
        AppError::SinkUnavailable { message, .. } => assert!(message.contains("connection reset")),
        other => panic!("expected SinkUnavailable, got {:?}", other),
    }
    assert_eq!(h.series.queries.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_catalog_lists_only_the_devices_objects() {
    let h = harness();
    h.storage
        .put_object("image", "7/x.jpg", "image/jpeg", vec![1u8, 2, 3])
        .await
        .unwrap();
    h.storage
        .put_object("image", "8/y.jpg", "image/jpeg", vec![1u8])
        .await
        .unwrap();

    let page = h
        .services
        .files
        .list(&Principal::user(READER_UID), "image", DEVICE, 1, 20)
        .await
        .unwrap();

    assert_eq!(page.total, 1);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].key, "7/x.jpg");
    assert_eq!(page.items[0].filename, "x.jpg");
    assert_eq!(page.items[0].size, 3);
    assert_eq!(
        page.items[0].preview_url,
        "memory://image/7/x.jpg?method=GET&expires_in=1800"
    );
}

#[tokio::test]
async fn test_catalog_pagination() {
    let h = harness();
    for i in 0..5 {
        h.storage
            .put_object("file", &format!("7/{}.csv", i), "text/csv", vec![0u8])
            .await
            .unwrap();
    }
    let principal = Principal::user(READER_UID);

    let page = h.services.files.list(&principal, "file", DEVICE, 2, 2).await.unwrap();
    let keys: Vec<_> = page.items.iter().map(|f| f.key.as_str()).collect();
    assert_eq!(keys, vec!["7/2.csv", "7/3.csv"]);
    assert_eq!(page.total, 5);

    let beyond = h.services.files.list(&principal, "file", DEVICE, 9, 2).await.unwrap();
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total, 5);

    assert!(matches!(
        h.services.files.list(&principal, "file", DEVICE, 0, 2).await,
        Err(AppError::InvalidInput(_))
    ));
    assert!(matches!(
        h.services
            .files
            .list(&Principal::user(STRANGER_UID), "file", DEVICE, 1, 2)
            .await,
        Err(AppError::Forbidden(_))
    ));
}

#[tokio::test]
async fn test_download_url_is_an_attachment() {
    let h = harness();
    let url = h
        .services
        .files
        .download_url(&Principal::user(READER_UID), DEVICE, "image", "7/x.jpg")
        .await
        .unwrap();
    assert_eq!(
        url,
        "memory://image/7/x.jpg?method=GET&expires_in=300&attachment=x.jpg"
    );

    let err = h
        .services
        .files
        .download_url(&Principal::user(READER_UID), DEVICE, "image", "8/y.jpg")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
}

#[tokio::test]
async fn test_delete_series_is_metadata_only() {
    let h = harness();
    let principal = Principal::user(WRITER_UID);
    let data_id = h
        .services
        .ingest
        .upload_series(
            &principal,
            NewMetadata {
                dev_id: DEVICE,
                quality_score: 10.0,
                timestamp: 1000,
                measurement: None,
                data_id: None,
            },
            vec![Point::new("").field("value", 1.0)],
        )
        .await
        .unwrap();

    let err = h
        .services
        .ingest
        .delete_data(&Principal::user(READER_UID), data_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let outcome = h.services.ingest.delete_data(&principal, data_id).await.unwrap();
    assert_eq!(outcome.data_type, DataType::Series);
    assert!(!outcome.payload_removed);
    assert!(outcome.notice.unwrap().contains("retention"));
    assert!(h.metadata.get_sync(data_id).is_none());
    assert_eq!(h.series.written().len(), 1);

    let err = h.services.ingest.delete_data(&principal, data_id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_file_removes_object_then_metadata() {
    let h = harness();
    let principal = Principal::user(WRITER_UID);
    let grant = h
        .services
        .ingest
        .issue_upload_grant(
            &principal,
            sensorvault_core::UploadGrantRequest {
                dev_id: DEVICE,
                filename: "a.jpg".to_string(),
                bucket: None,
                content_type: None,
            },
        )
        .await
        .unwrap();
    h.storage
        .put_object(&grant.bucket, &grant.object_key, &grant.content_type, vec![1u8])
        .await
        .unwrap();
    let data_id = h
        .services
        .ingest
        .complete_file_upload(
            &principal,
            sensorvault_core::CompleteUploadRequest {
                metadata: NewMetadata {
                    dev_id: DEVICE,
                    quality_score: 60.0,
                    timestamp: 1000,
                    measurement: None,
                    data_id: None,
                },
                upload_id: grant.upload_id.clone(),
                bucket: None,
                object_key: None,
            },
        )
        .await
        .unwrap();

    let outcome = h.services.ingest.delete_data(&principal, data_id).await.unwrap();
    assert_eq!(outcome.data_type, DataType::File);
    assert!(outcome.payload_removed);
    assert!(h.storage.get_object(&grant.bucket, &grant.object_key).await.is_none());
    assert!(h.metadata.get_sync(data_id).is_none());
}

#[tokio::test]
async fn test_listing_and_statistics() {
    let h = harness();
    let principal = Principal::user(WRITER_UID);
    for (quality, timestamp) in [(10.0, 100), (50.0, 200), (95.0, 300)] {
        h.services
            .ingest
            .upload_series(
                &principal,
                NewMetadata {
                    dev_id: DEVICE,
                    quality_score: quality,
                    timestamp,
                    measurement: Some("temperature".to_string()),
                    data_id: None,
                },
                vec![Point::new("").field("value", quality)],
            )
            .await
            .unwrap();
    }

    let filter = MetadataFilter {
        dev_id: Some(DEVICE),
        min_quality: Some(30.0),
        ..Default::default()
    };
    let page = h
        .services
        .ingest
        .list_data(&Principal::user(READER_UID), &filter)
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    // Newest first by default
    assert_eq!(page.items[0].timestamp, 300);

    let err = h
        .services
        .ingest
        .list_data(&Principal::user(READER_UID), &MetadataFilter::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let stats = h
        .services
        .ingest
        .data_statistics(&Principal::user(READER_UID), DEVICE)
        .await
        .unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.abnormal, 1);

    let err = h
        .services
        .ingest
        .data_statistics(&Principal::user(STRANGER_UID), DEVICE)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}
