//! Record types stored as artifacts by this stage
//!
//! Each type implements [`Tabular`](sgre_common::Tabular) so the artifact
//! store can persist it as parquet.

pub mod geocoded;
pub mod transactions;

pub use geocoded::{AddressLocation, AddressRecord, GeocodedAddress, PropertyType};
pub use transactions::{HdbTransaction, PrivateTransaction};

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray, UInt32Array};
use std::sync::Arc;

pub(crate) fn utf8<'a>(values: impl Iterator<Item = &'a str>) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(values))
}

pub(crate) fn utf8_opt<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ArrayRef {
    Arc::new(values.collect::<StringArray>())
}

pub(crate) fn f64s(values: impl Iterator<Item = f64>) -> ArrayRef {
    Arc::new(Float64Array::from_iter_values(values))
}

pub(crate) fn f64_opt(values: impl Iterator<Item = Option<f64>>) -> ArrayRef {
    Arc::new(values.collect::<Float64Array>())
}

pub(crate) fn i64s(values: impl Iterator<Item = i64>) -> ArrayRef {
    Arc::new(Int64Array::from_iter_values(values))
}

pub(crate) fn u32s(values: impl Iterator<Item = u32>) -> ArrayRef {
    Arc::new(UInt32Array::from_iter_values(values))
}
