//! End-to-end export tests against the in-memory reader.
//!
//! Every run writes real Parquet files into a temporary directory and reads
//! them back with the arrow reader.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Array, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{NaiveDate, NaiveDateTime};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use sql_to_parquet::{
    ExportTarget, FailureKind, MemoryReader, Orchestrator, RunSettings, RunSummary, SqlValue,
};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn hired(day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap()
}

fn employees(n: i64) -> Vec<Vec<SqlValue>> {
    (1..=n)
        .map(|i| {
            vec![
                SqlValue::Int(i),
                SqlValue::Text(format!("employee {}", i)),
                SqlValue::Float(1000.0 + i as f64),
                SqlValue::Timestamp(hired((i % 28 + 1) as u32)),
            ]
        })
        .collect()
}

const EMPLOYEE_COLUMNS: &[&str] = &["id", "name", "salary", "hired_at"];

fn read_back(path: &Path) -> (SchemaRef, Vec<RecordBatch>) {
    let file = File::open(path).unwrap();
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
    let schema = builder.schema().clone();
    let batches = builder
        .build()
        .unwrap()
        .collect::<std::result::Result<Vec<_>, _>>()
        .unwrap();
    (schema, batches)
}

fn total_rows(batches: &[RecordBatch]) -> usize {
    batches.iter().map(|b| b.num_rows()).sum()
}

async fn export(
    reader: MemoryReader,
    targets: Vec<ExportTarget>,
    settings: &RunSettings,
) -> RunSummary {
    Orchestrator::new(Arc::new(reader))
        .run(targets, settings, CancellationToken::new())
        .await
        .unwrap()
}

fn leftover_partials(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".partial"))
        .collect()
}

#[tokio::test]
async fn test_end_to_end_25_rows_batch_10() {
    let dir = tempdir().unwrap();
    let reader = MemoryReader::new().with_table("dbo.Employees", EMPLOYEE_COLUMNS, employees(25));
    let settings = RunSettings::new(dir.path(), 10);

    let summary = export(
        reader,
        vec![ExportTarget::new("employees", "Employees", None)],
        &settings,
    )
    .await;

    assert!(summary.all_succeeded());
    assert_eq!(summary.total_rows_written, 25);
    let result = &summary.results[0];
    assert_eq!(result.rows_written, 25);
    assert_eq!(result.batches, 3);

    let path = dir.path().join("employees.parquet");
    assert_eq!(result.file_path.as_deref(), Some(path.as_path()));

    let (schema, batches) = read_back(&path);
    assert_eq!(total_rows(&batches), 25);

    let fields: Vec<(&str, &DataType, bool)> = schema
        .fields()
        .iter()
        .map(|f| (f.name().as_str(), f.data_type(), f.is_nullable()))
        .collect();
    assert_eq!(
        fields,
        vec![
            ("id", &DataType::Int64, false),
            ("name", &DataType::Utf8, false),
            ("salary", &DataType::Float64, false),
            ("hired_at", &DataType::Timestamp(TimeUnit::Microsecond, None), false),
        ]
    );

    let ids: Vec<i64> = batches
        .iter()
        .flat_map(|b| {
            let col = b.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
            col.values().to_vec()
        })
        .collect();
    assert_eq!(ids, (1..=25).collect::<Vec<_>>());

    let first = &batches[0];
    let names = first.column(1).as_any().downcast_ref::<StringArray>().unwrap();
    assert_eq!(names.value(0), "employee 1");
    let salaries = first.column(2).as_any().downcast_ref::<Float64Array>().unwrap();
    assert_eq!(salaries.value(0), 1001.0);
    let hired_at = first
        .column(3)
        .as_any()
        .downcast_ref::<TimestampMicrosecondArray>()
        .unwrap();
    assert_eq!(hired_at.value(0), hired(2).and_utc().timestamp_micros());
}

#[tokio::test]
async fn test_failed_target_does_not_stop_run() {
    let dir = tempdir().unwrap();
    let reader = MemoryReader::new()
        .with_table("dbo.Employees", EMPLOYEE_COLUMNS, employees(12))
        .with_view("sales.vw_OrderDetails", &["order_id"], (0..7).map(|i| vec![SqlValue::Int(i)]).collect());
    let settings = RunSettings::new(dir.path(), 5);

    let summary = export(
        reader,
        vec![
            ExportTarget::new("employees", "Employees", None),
            ExportTarget::new("broken", "", None),
            ExportTarget::new("order_details", "sales.vw_OrderDetails", None),
        ],
        &settings,
    )
    .await;

    assert_eq!(summary.results.len(), 3);
    assert_eq!(summary.succeeded(), 2);
    assert_eq!(summary.failed(), 1);

    assert_eq!(summary.results[0].rows_written, 12);
    assert_eq!(
        summary.results[1].failure().map(|f| f.kind),
        Some(FailureKind::InvalidConfiguration)
    );
    assert_eq!(summary.results[2].rows_written, 7);
    assert_eq!(summary.total_rows_written, 19);

    assert!(dir.path().join("employees.parquet").exists());
    assert!(!dir.path().join("broken.parquet").exists());
    let (_, batches) = read_back(&dir.path().join("order_details.parquet"));
    assert_eq!(total_rows(&batches), 7);
}

#[tokio::test]
async fn test_schema_conflict_discards_file() {
    let dir = tempdir().unwrap();
    let mut rows: Vec<Vec<SqlValue>> = (0..10).map(|i| vec![SqlValue::Int(i)]).collect();
    rows.push(vec![SqlValue::Text("not a number".into())]);
    let reader = MemoryReader::new().with_table("dbo.Codes", &["code"], rows);

    let summary = export(
        reader,
        vec![ExportTarget::new("codes", "Codes", None)],
        &RunSettings::new(dir.path(), 10),
    )
    .await;

    let failure = summary.results[0].failure().unwrap();
    assert_eq!(failure.kind, FailureKind::SchemaConflict);
    assert!(failure.message.contains("code"), "{}", failure.message);
    assert_eq!(summary.results[0].rows_written, 0);
    assert!(summary.results[0].file_path.is_none());
    assert!(!dir.path().join("codes.parquet").exists());
    assert!(leftover_partials(dir.path()).is_empty());
}

#[tokio::test]
async fn test_write_failure_never_reports_truncated_file() {
    let dir = tempdir().unwrap();
    // The final path is taken by a directory, so the rename at close fails.
    let blocked = dir.path().join("employees.parquet");
    fs::create_dir(&blocked).unwrap();
    fs::write(blocked.join("keep"), b"x").unwrap();

    let reader = MemoryReader::new().with_table("dbo.Employees", EMPLOYEE_COLUMNS, employees(25));
    let summary = export(
        reader,
        vec![ExportTarget::new("employees", "Employees", None)],
        &RunSettings::new(dir.path(), 10),
    )
    .await;

    let result = &summary.results[0];
    assert!(!result.is_success());
    assert_eq!(result.failure().unwrap().kind, FailureKind::Write);
    assert_eq!(result.rows_written, 0);
    assert!(result.file_path.is_none());
    assert!(blocked.is_dir());
    assert!(blocked.join("keep").exists());
    assert!(leftover_partials(dir.path()).is_empty());
}

#[tokio::test]
async fn test_batch_counts_follow_batch_size() {
    for (n, batch_size, expected) in [(25i64, 10usize, 3u64), (30, 10, 3), (1, 10, 1), (7, 1, 7)] {
        let dir = tempdir().unwrap();
        let reader = MemoryReader::new().with_table("dbo.Employees", EMPLOYEE_COLUMNS, employees(n));
        let summary = export(
            reader,
            vec![ExportTarget::new("employees", "dbo.Employees", None)],
            &RunSettings::new(dir.path(), batch_size),
        )
        .await;

        let result = &summary.results[0];
        assert_eq!(result.batches, expected, "n={} batch_size={}", n, batch_size);
        assert_eq!(result.rows_written, n as u64);
    }
}

#[tokio::test]
async fn test_empty_object_replaces_previous_file() {
    let dir = tempdir().unwrap();
    let targets = vec![ExportTarget::new("employees", "Employees", None)];
    let settings = RunSettings::new(dir.path(), 10);
    let path = dir.path().join("employees.parquet");

    let first = MemoryReader::new().with_table("dbo.Employees", EMPLOYEE_COLUMNS, employees(3));
    let summary = export(first, targets.clone(), &settings).await;
    assert!(summary.all_succeeded());
    assert_eq!(total_rows(&read_back(&path).1), 3);

    let emptied = MemoryReader::new().with_table("dbo.Employees", EMPLOYEE_COLUMNS, vec![]);
    let summary = export(emptied, targets, &settings).await;

    assert!(summary.all_succeeded());
    let result = &summary.results[0];
    assert_eq!(result.rows_written, 0);
    assert_eq!(result.batches, 0);
    assert_eq!(result.file_path.as_deref(), Some(path.as_path()));

    let (schema, batches) = read_back(&path);
    assert_eq!(total_rows(&batches), 0);
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(names, EMPLOYEE_COLUMNS);
    assert!(schema
        .fields()
        .iter()
        .all(|f| f.is_nullable() && f.data_type() == &DataType::Utf8));
    assert!(leftover_partials(dir.path()).is_empty());
}

#[tokio::test]
async fn test_cancelled_run_marks_every_target() {
    let dir = tempdir().unwrap();
    let reader = MemoryReader::new()
        .with_table("dbo.A", &["id"], vec![vec![SqlValue::Int(1)]])
        .with_table("dbo.B", &["id"], vec![vec![SqlValue::Int(2)]]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = Orchestrator::new(Arc::new(reader))
        .run(
            vec![ExportTarget::new("a", "A", None), ExportTarget::new("b", "B", None)],
            &RunSettings::new(dir.path(), 10),
            cancel,
        )
        .await
        .unwrap();

    assert_eq!(summary.failed(), 2);
    for result in &summary.results {
        assert_eq!(result.failure().unwrap().kind, FailureKind::Cancelled);
    }
    assert!(!dir.path().join("a.parquet").exists());
}

#[tokio::test]
async fn test_cancel_between_batches_removes_partial_file() {
    let dir = tempdir().unwrap();
    let rows = |n: i64| -> Vec<Vec<SqlValue>> {
        (0..n).map(|v| vec![SqlValue::Int(v)]).collect()
    };
    let reader = MemoryReader::new()
        .with_batch_delay(Duration::from_millis(20))
        .with_table("dbo.A", &["id"], rows(50))
        .with_table("dbo.B", &["id"], rows(50));
    let cancel = CancellationToken::new();

    // Cancel once the first target has started writing.
    let partial = dir.path().join("a.parquet.partial");
    let trigger = cancel.clone();
    tokio::spawn(async move {
        for _ in 0..200 {
            if partial.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let summary = Orchestrator::new(Arc::new(reader))
        .run(
            vec![ExportTarget::new("a", "A", None), ExportTarget::new("b", "B", None)],
            &RunSettings::new(dir.path(), 2),
            cancel,
        )
        .await
        .unwrap();

    assert_eq!(summary.failed(), 2);
    for result in &summary.results {
        assert_eq!(result.failure().unwrap().kind, FailureKind::Cancelled);
        assert!(result.file_path.is_none());
    }
    assert!(!dir.path().join("a.parquet").exists());
    assert!(!dir.path().join("b.parquet").exists());
    assert!(leftover_partials(dir.path()).is_empty());
}

#[tokio::test]
async fn test_parallel_workers_keep_configuration_order() {
    let dir = tempdir().unwrap();
    let mut reader = MemoryReader::new().with_batch_delay(Duration::from_millis(5));
    let mut targets = Vec::new();
    for i in 0..5i64 {
        let rows = (0..(i + 1) * 4).map(|v| vec![SqlValue::Int(v)]).collect();
        reader = reader.with_table(&format!("dbo.T{}", i), &["id"], rows);
        targets.push(ExportTarget::new(format!("t{}", i), format!("T{}", i), None));
    }

    let settings = RunSettings::new(dir.path(), 3).with_workers(3);
    let summary = export(reader, targets, &settings).await;

    assert!(summary.all_succeeded());
    let names: Vec<&str> = summary.results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["t0", "t1", "t2", "t3", "t4"]);
    for (i, result) in summary.results.iter().enumerate() {
        assert_eq!(result.rows_written, (i as u64 + 1) * 4);
        let (_, batches) = read_back(result.file_path.as_ref().unwrap());
        assert_eq!(total_rows(&batches), (i + 1) * 4);
    }
}

#[tokio::test]
async fn test_transient_source_error_is_retried() {
    let dir = tempdir().unwrap();
    let reader = MemoryReader::new()
        .with_table("dbo.Employees", EMPLOYEE_COLUMNS, employees(4))
        .fail_open("dbo.Employees", 1);

    let no_retry = export(
        MemoryReader::new()
            .with_table("dbo.Employees", EMPLOYEE_COLUMNS, employees(4))
            .fail_open("dbo.Employees", 1),
        vec![ExportTarget::new("employees", "Employees", None)],
        &RunSettings::new(dir.path(), 10),
    )
    .await;
    assert_eq!(
        no_retry.results[0].failure().map(|f| f.kind),
        Some(FailureKind::SourceRead)
    );

    let summary = export(
        reader,
        vec![ExportTarget::new("employees", "Employees", None)],
        &RunSettings::new(dir.path(), 10).with_max_retries(1),
    )
    .await;
    assert!(summary.all_succeeded());
    assert_eq!(summary.results[0].attempts, 2);
    assert_eq!(summary.results[0].rows_written, 4);
}

#[tokio::test]
async fn test_mixed_numeric_column_widens_to_float() {
    let dir = tempdir().unwrap();
    let rows = vec![
        vec![SqlValue::Int(1), SqlValue::Null],
        vec![SqlValue::Float(2.5), SqlValue::Null],
        vec![SqlValue::Int(3), SqlValue::Null],
    ];
    let reader = MemoryReader::new().with_table("dbo.Amounts", &["amount", "note"], rows);

    let summary = export(
        reader,
        vec![ExportTarget::new("amounts", "Amounts", None)],
        &RunSettings::new(dir.path(), 10),
    )
    .await;
    assert!(summary.all_succeeded());

    let (schema, batches) = read_back(&dir.path().join("amounts.parquet"));
    assert_eq!(schema.field(0).data_type(), &DataType::Float64);
    assert!(!schema.field(0).is_nullable());
    assert_eq!(schema.field(1).data_type(), &DataType::Utf8);
    assert!(schema.field(1).is_nullable());

    let amounts = batches[0].column(0).as_any().downcast_ref::<Float64Array>().unwrap();
    assert_eq!(amounts.values().to_vec(), vec![1.0, 2.5, 3.0]);
    assert_eq!(batches[0].column(1).null_count(), 3);
}
