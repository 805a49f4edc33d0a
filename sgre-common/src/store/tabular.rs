//! Typed records ↔ Arrow record batches
//!
//! Every artifact kind is a plain struct implementing [`Tabular`]. The trait
//! is the only place a record's column layout is spelled out, so "which fields
//! exist" is answered by the type rather than by lookups at read time.

use crate::{Error, Result};
use arrow::array::{Array, Float64Array, Int64Array, StringArray, UInt32Array};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use std::any::type_name;

/// A record type that can be stored as an artifact
pub trait Tabular: Sized {
    /// Arrow schema written to parquet
    fn schema() -> SchemaRef;

    /// Encode rows into a single record batch
    fn to_batch(rows: &[Self]) -> Result<RecordBatch>;

    /// Decode one record batch back into rows
    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>>;
}

/// Look up a required column and downcast it
pub fn column<'a, A: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a A> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|e| Error::Internal(format!("missing column '{name}': {e}")))?;

    downcast(batch, idx, name)
}

/// Look up a column that older files may not have
pub fn optional_column<'a, A: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<Option<&'a A>> {
    match batch.schema().index_of(name) {
        Ok(idx) => downcast(batch, idx, name).map(Some),
        Err(_) => Ok(None),
    }
}

fn downcast<'a, A: Array + 'static>(batch: &'a RecordBatch, idx: usize, name: &str) -> Result<&'a A> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<A>()
        .ok_or_else(|| {
            let expected = type_name::<A>().rsplit("::").next().unwrap_or("array");
            Error::Internal(format!("column '{name}' is not {expected}"))
        })
}

/// Value of a nullable string cell
pub fn opt_string(col: &StringArray, row: usize) -> Option<String> {
    if col.is_null(row) {
        None
    } else {
        Some(col.value(row).to_string())
    }
}

/// Value of a nullable string cell from a column that may be absent
pub fn opt_string_in(col: Option<&StringArray>, row: usize) -> Option<String> {
    col.and_then(|c| opt_string(c, row))
}

/// Value of a nullable f64 cell
pub fn opt_f64(col: &Float64Array, row: usize) -> Option<f64> {
    if col.is_null(row) {
        None
    } else {
        Some(col.value(row))
    }
}

/// Value of a nullable i64 cell
pub fn opt_i64(col: &Int64Array, row: usize) -> Option<i64> {
    if col.is_null(row) {
        None
    } else {
        Some(col.value(row))
    }
}

/// Value of a nullable u32 cell
pub fn opt_u32(col: &UInt32Array, row: usize) -> Option<u32> {
    if col.is_null(row) {
        None
    } else {
        Some(col.value(row))
    }
}
