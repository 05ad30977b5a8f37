//! On-disk result table (Arrow/Parquet)
//!
//! Append-only: rows are never rewritten or deleted. An append reads the
//! existing row groups, writes everything plus the new rows to a sibling
//! temp file, fsyncs and atomically renames over the table path - the table
//! is never observable half-written, even through an unclean kill
//! mid-append. Mutation happens only under the advisory lock held by the
//! writer pipeline; readers treat the file as immutable.
//!
//! Parquet has no in-file table registry, so the configured table name is
//! carried in the Arrow schema metadata and verified on read; a mismatch is
//! a schema-mismatch condition.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, BinaryArray, BinaryBuilder, Float64Array, Float64Builder, Int64Array, Int64Builder,
    UInt64Array, UInt64Builder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use crate::config::TableRef;
use crate::error::{Error, Result};
use crate::record::{FitOutcome, ResultRecord};

/// Schema metadata key carrying the table name.
pub const TABLE_NAME_KEY: &str = "fitstore.table";

const COL_PRIMARY: usize = 0;
const COL_SECONDARY: usize = 1;
const COL_CPU_TIME: usize = 2;
const COL_WALL_TIME: usize = 3;
const COL_CPU_TIME_SECONDARY: usize = 4;
const COL_WALL_TIME_SECONDARY: usize = 5;
const COL_SEED: usize = 6;
const COL_RUN_ID: usize = 7;

/// Arrow schema of a result table named `table`.
#[must_use]
pub fn table_schema(table: &str) -> SchemaRef {
    let mut metadata = HashMap::new();
    metadata.insert(TABLE_NAME_KEY.to_string(), table.to_string());
    Arc::new(Schema::new_with_metadata(
        vec![
            Field::new("primary", DataType::Binary, false),
            Field::new("secondary", DataType::Binary, true),
            Field::new("cpu_time", DataType::Float64, false),
            Field::new("wall_time", DataType::Float64, false),
            Field::new("cpu_time_secondary", DataType::Float64, false),
            Field::new("wall_time_secondary", DataType::Float64, false),
            Field::new("seed", DataType::UInt64, false),
            Field::new("run_id", DataType::Int64, false),
        ],
        metadata,
    ))
}

fn verify_table_name(schema: &Schema, expected: &str) -> Result<()> {
    match schema.metadata().get(TABLE_NAME_KEY) {
        Some(name) if name == expected => Ok(()),
        Some(name) => Err(Error::CannotRead(format!(
            "table name mismatch: file holds '{name}', expected '{expected}'"
        ))),
        None => Err(Error::CannotRead(format!(
            "file carries no table name, expected '{expected}'"
        ))),
    }
}

fn encode_batch(schema: SchemaRef, records: &[ResultRecord]) -> Result<RecordBatch> {
    let mut primary = BinaryBuilder::new();
    let mut secondary = BinaryBuilder::new();
    let mut cpu_time = Float64Builder::new();
    let mut wall_time = Float64Builder::new();
    let mut cpu_time_secondary = Float64Builder::new();
    let mut wall_time_secondary = Float64Builder::new();
    let mut seed = UInt64Builder::new();
    let mut run_id = Int64Builder::new();

    for record in records {
        primary.append_value(serde_json::to_vec(&record.primary)?);
        match &record.secondary {
            Some(outcome) => secondary.append_value(serde_json::to_vec(outcome)?),
            None => secondary.append_null(),
        }
        cpu_time.append_value(record.cpu_time);
        wall_time.append_value(record.wall_time);
        cpu_time_secondary.append_value(record.cpu_time_secondary);
        wall_time_secondary.append_value(record.wall_time_secondary);
        seed.append_value(record.seed);
        run_id.append_value(record.run_id);
    }

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(primary.finish()),
            Arc::new(secondary.finish()),
            Arc::new(cpu_time.finish()),
            Arc::new(wall_time.finish()),
            Arc::new(cpu_time_secondary.finish()),
            Arc::new(wall_time_secondary.finish()),
            Arc::new(seed.finish()),
            Arc::new(run_id.finish()),
        ],
    )
    .map_err(Error::from)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, index: usize, name: &str) -> Result<&'a T> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::CannotRead(format!("unexpected type for column '{name}'")))
}

/// Decode one record batch into result records (on-disk row order).
///
/// # Errors
///
/// Returns `CannotRead` on any shape mismatch, `Codec` on a corrupt blob.
pub fn decode_batch(batch: &RecordBatch) -> Result<Vec<ResultRecord>> {
    if batch.num_columns() != 8 {
        return Err(Error::CannotRead(format!(
            "expected 8 columns, found {}",
            batch.num_columns()
        )));
    }
    let primary = column::<BinaryArray>(batch, COL_PRIMARY, "primary")?;
    let secondary = column::<BinaryArray>(batch, COL_SECONDARY, "secondary")?;
    let cpu_time = column::<Float64Array>(batch, COL_CPU_TIME, "cpu_time")?;
    let wall_time = column::<Float64Array>(batch, COL_WALL_TIME, "wall_time")?;
    let cpu_time_secondary =
        column::<Float64Array>(batch, COL_CPU_TIME_SECONDARY, "cpu_time_secondary")?;
    let wall_time_secondary =
        column::<Float64Array>(batch, COL_WALL_TIME_SECONDARY, "wall_time_secondary")?;
    let seed = column::<UInt64Array>(batch, COL_SEED, "seed")?;
    let run_id = column::<Int64Array>(batch, COL_RUN_ID, "run_id")?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let primary_outcome: FitOutcome = serde_json::from_slice(primary.value(row))?;
        let secondary_outcome: Option<FitOutcome> = if secondary.is_null(row) {
            None
        } else {
            Some(serde_json::from_slice(secondary.value(row))?)
        };
        records.push(ResultRecord {
            primary: primary_outcome,
            secondary: secondary_outcome,
            cpu_time: cpu_time.value(row),
            wall_time: wall_time.value(row),
            cpu_time_secondary: cpu_time_secondary.value(row),
            wall_time_secondary: wall_time_secondary.value(row),
            seed: seed.value(row),
            run_id: run_id.value(row),
        });
    }
    Ok(records)
}

fn read_batches(path: &Path) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = Arc::clone(builder.schema());
    let reader = builder.build()?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok((schema, batches))
}

/// Read every row of a shard as result records, verifying the table name.
///
/// # Errors
///
/// Returns `Io` when the shard is absent, `Parquet`/`Arrow`/`Codec` when it
/// is corrupt, `CannotRead` on table-name or shape mismatch. The reader
/// pipeline logs and skips on any of these.
pub fn read_records(shard: &TableRef) -> Result<Vec<ResultRecord>> {
    let (schema, batches) = read_batches(&shard.path)?;
    verify_table_name(&schema, &shard.table)?;
    let mut records = Vec::new();
    for batch in &batches {
        records.extend(decode_batch(batch)?);
    }
    Ok(records)
}

/// Append records to the output table, creating it if absent. Flushes and
/// commits atomically (temp file + fsync + rename). Must only be called
/// while holding the table's advisory lock.
///
/// # Errors
///
/// Returns `CannotStore` when the existing file belongs to a different
/// table or schema; propagates IO/Arrow/Parquet failures. Any error here
/// leaves the previous table contents intact.
pub fn append_rows(output: &TableRef, records: &[ResultRecord]) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }

    let schema = table_schema(&output.table);
    let existing = if output.path.exists() {
        let (existing_schema, batches) = read_batches(&output.path)?;
        verify_table_name(&existing_schema, &output.table)
            .map_err(|e| Error::CannotStore(e.to_string()))?;
        if existing_schema.fields() != schema.fields() {
            return Err(Error::CannotStore(format!(
                "schema mismatch in existing table {}",
                output.path.display()
            )));
        }
        batches
    } else {
        Vec::new()
    };

    let appended = encode_batch(Arc::clone(&schema), records)?;

    let mut temp_path = output.path.as_os_str().to_owned();
    temp_path.push(format!(".tmp.{}", std::process::id()));
    let temp_path = std::path::PathBuf::from(temp_path);

    let result = (|| -> Result<()> {
        let file = File::create(&temp_path)?;
        let mut writer = ArrowWriter::try_new(file, Arc::clone(&schema), None)?;
        for batch in &existing {
            writer.write(batch)?;
        }
        writer.write(&appended)?;
        let file = writer.into_inner()?;
        file.sync_all()?;
        std::fs::rename(&temp_path, &output.path)?;
        Ok(())
    })();

    if result.is_err() {
        // the rename never happened; the old table is still intact
        let _ = std::fs::remove_file(&temp_path);
    }
    result.map(|()| records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FitParameter;

    fn scratch_table(tag: &str) -> TableRef {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "fitstore_table_{tag}_{}_{}.parquet",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        TableRef::new(p, "toy_results")
    }

    fn record(seed: u64, run_id: i64) -> ResultRecord {
        ResultRecord::new(
            FitOutcome {
                covariance_quality: 3,
                status_history: vec![("MIGRAD".into(), 0)],
                parameters: vec![FitParameter::new("tau", 1.5, 1.52, 0.03)],
            },
            12.5,
            14.0,
            seed,
            run_id,
        )
    }

    #[test]
    fn test_append_and_read_roundtrip() {
        let table = scratch_table("roundtrip");
        let records = vec![
            record(1, 0),
            record(2, 5).with_secondary(
                FitOutcome {
                    covariance_quality: 2,
                    status_history: vec![("HESSE".into(), -1)],
                    parameters: vec![],
                },
                3.0,
                4.0,
            ),
        ];
        assert_eq!(append_rows(&table, &records).unwrap(), 2);

        let back = read_records(&table).unwrap();
        assert_eq!(back, records);
        std::fs::remove_file(&table.path).unwrap();
    }

    #[test]
    fn test_append_accumulates_rows() {
        let table = scratch_table("accumulate");
        append_rows(&table, &[record(1, 0)]).unwrap();
        append_rows(&table, &[record(2, 0), record(3, 0)]).unwrap();
        let back = read_records(&table).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(
            back.iter().map(|r| r.seed).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        std::fs::remove_file(&table.path).unwrap();
    }

    #[test]
    fn test_empty_append_is_noop() {
        let table = scratch_table("noop");
        assert_eq!(append_rows(&table, &[]).unwrap(), 0);
        assert!(!table.path.exists());
    }

    #[test]
    fn test_table_name_mismatch_rejected() {
        let table = scratch_table("name");
        append_rows(&table, &[record(1, 0)]).unwrap();

        let wrong = TableRef::new(table.path.clone(), "other_table");
        let read_err = read_records(&wrong).unwrap_err();
        assert!(matches!(read_err, Error::CannotRead(_)));
        let store_err = append_rows(&wrong, &[record(2, 0)]).unwrap_err();
        assert!(matches!(store_err, Error::CannotStore(_)));
        std::fs::remove_file(&table.path).unwrap();
    }

    #[test]
    fn test_missing_shard_is_io_error() {
        let table = scratch_table("missing");
        assert!(matches!(read_records(&table).unwrap_err(), Error::Io(_)));
    }

    #[test]
    fn test_corrupt_shard_is_reported_not_panicking() {
        let table = scratch_table("corrupt");
        std::fs::write(&table.path, b"definitely not parquet").unwrap();
        assert!(read_records(&table).is_err());
        std::fs::remove_file(&table.path).unwrap();
    }
}
