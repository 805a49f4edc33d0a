//! Parquet file I/O, partition layout and content checksums

use super::ledger::Codec;
use crate::{Error, Result};
use arrow::array::{Array, UInt32Array};
use arrow::compute::take_record_batch;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const PART_FILE: &str = "part-0.parquet";

fn writer_properties(codec: Codec) -> WriterProperties {
    let created_by = KeyValue {
        key: "created_by".to_string(),
        value: Some("sgre-common".to_string()),
    };
    WriterProperties::builder()
        .set_compression(codec.to_parquet())
        .set_key_value_metadata(Some(vec![created_by]))
        .build()
}

/// Write batches to a single parquet file (temp file + rename)
pub(crate) fn write_file(
    path: &Path,
    schema: SchemaRef,
    batches: &[RecordBatch],
    codec: Codec,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("parquet.tmp");
    let file = File::create(&tmp)
        .map_err(|e| Error::internal(format!("Create {}", tmp.display()), e))?;

    let mut writer = ArrowWriter::try_new(file, schema, Some(writer_properties(codec)))
        .map_err(|e| Error::internal("parquet writer init failed", e))?;
    for batch in batches {
        writer
            .write(batch)
            .map_err(|e| Error::internal("parquet write failed", e))?;
    }
    writer
        .close()
        .map_err(|e| Error::internal("parquet close failed", e))?;

    std::fs::rename(&tmp, path)
        .map_err(|e| Error::internal(format!("Replace {}", path.display()), e))?;
    Ok(())
}

/// Write a hive-style partitioned directory: `<dir>/<col>=<value>/part-0.parquet`
///
/// The partition columns stay inside each file, so a file read on its own is
/// still a complete record set.
pub(crate) fn write_partitioned(
    dir: &Path,
    schema: SchemaRef,
    batch: &RecordBatch,
    partition_cols: &[String],
    codec: Codec,
) -> Result<()> {
    let mut key_columns = Vec::with_capacity(partition_cols.len());
    for col in partition_cols {
        let idx = schema
            .index_of(col)
            .map_err(|_| Error::InvalidInput(format!("unknown partition column '{}'", col)))?;
        key_columns.push(batch.column(idx).clone());
    }

    let mut groups: BTreeMap<Vec<String>, Vec<u32>> = BTreeMap::new();
    for row in 0..batch.num_rows() {
        let mut key = Vec::with_capacity(key_columns.len());
        for column in &key_columns {
            let value = if column.is_null(row) {
                "__null__".to_string()
            } else {
                array_value_to_string(column.as_ref(), row)?
            };
            key.push(sanitize_partition_value(&value));
        }
        let row = u32::try_from(row)
            .map_err(|_| Error::InvalidInput("batch too large to partition".to_string()))?;
        groups.entry(key).or_default().push(row);
    }

    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }

    for (key, rows) in groups {
        let mut part_dir = dir.to_path_buf();
        for (col, value) in partition_cols.iter().zip(&key) {
            part_dir.push(format!("{}={}", col, value));
        }
        let part = take_record_batch(batch, &UInt32Array::from(rows))?;
        write_file(&part_dir.join(PART_FILE), schema.clone(), &[part], codec)?;
    }

    Ok(())
}

fn sanitize_partition_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '=') { '_' } else { c })
        .collect()
}

/// Read every batch from a parquet file or a partitioned directory
pub(crate) fn read_path(path: &Path) -> Result<Vec<RecordBatch>> {
    let mut batches = Vec::new();
    for file in data_files(path)? {
        batches.extend(read_file(&file)?);
    }
    Ok(batches)
}

fn read_file(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(batches)
}

/// Data files backing an artifact, in a stable order
fn data_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::internal(format!("Walk {}", path.display()), e))?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("parquet")
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// SHA-256 over the artifact content
///
/// For partitioned directories the relative path of each file is hashed ahead
/// of its bytes so a renamed partition changes the checksum.
pub(crate) fn checksum(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024]; // 1MB chunks

    for file_path in data_files(path)? {
        if path.is_dir() {
            let rel = file_path.strip_prefix(path).unwrap_or(&file_path);
            hasher.update(rel.to_string_lossy().as_bytes());
        }

        let mut file = File::open(&file_path)?;
        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn sample() -> (SchemaRef, RecordBatch) {
        let schema = Arc::new(Schema::new(vec![
            Field::new("town", DataType::Utf8, false),
            Field::new("price", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["BEDOK", "BISHAN", "BEDOK"])),
                Arc::new(Int64Array::from(vec![400_000_i64, 650_000, 410_000])),
            ],
        )
        .expect("record batch build");
        (schema, batch)
    }

    #[test]
    fn test_partitioned_layout_and_read_back() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("sales");
        let (schema, batch) = sample();

        write_partitioned(&root, schema, &batch, &["town".to_string()], Codec::Zstd).unwrap();

        assert!(root.join("town=BEDOK").join(PART_FILE).is_file());
        assert!(root.join("town=BISHAN").join(PART_FILE).is_file());

        let rows: usize = read_path(&root).unwrap().iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 3);
    }

    #[test]
    fn test_partitioned_high_cardinality_column() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("by_price");
        let (schema, _) = sample();

        let towns: Vec<String> = (0..300).map(|i| format!("TOWN {}", i % 150)).collect();
        let prices: Vec<i64> = (0..300).map(|i| 100_000 + i as i64).collect();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(towns)),
                Arc::new(Int64Array::from(prices)),
            ],
        )
        .unwrap();

        write_partitioned(&root, schema, &batch, &["town".to_string()], Codec::Snappy).unwrap();

        assert_eq!(data_files(&root).unwrap().len(), 150);

        let part = read_path(&root.join("town=TOWN 7")).unwrap();
        let prices: Vec<i64> = part
            .iter()
            .flat_map(|b| {
                b.column(1)
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .unwrap()
                    .values()
                    .to_vec()
            })
            .collect();
        assert_eq!(prices, vec![100_007, 100_157]);

        let rows: usize = read_path(&root).unwrap().iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 300);
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.parquet");
        let (schema, batch) = sample();

        write_file(&path, schema.clone(), &[batch.clone()], Codec::None).unwrap();
        let first = checksum(&path).unwrap();
        assert_eq!(first, checksum(&path).unwrap());

        let smaller = batch.slice(0, 1);
        write_file(&path, schema, &[smaller], Codec::None).unwrap();
        assert_ne!(first, checksum(&path).unwrap());
    }

    #[test]
    fn test_sanitize_partition_value() {
        assert_eq!(sanitize_partition_value("A/B=C"), "A_B_C");
    }
}
