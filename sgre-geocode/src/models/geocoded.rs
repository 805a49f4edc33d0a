//! Address and geocoding records (L1 artifacts)

use super::{f64_opt, f64s, u32s, utf8};
use arrow::array::{Float64Array, StringArray, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use sgre_common::store::tabular::{column, opt_f64};
use sgre_common::{Error, Result, Tabular};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Property category attached to an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    #[serde(rename = "HDB")]
    Hdb,
    #[serde(rename = "Condo")]
    Condo,
    #[serde(rename = "EC")]
    Ec,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Hdb => "HDB",
            PropertyType::Condo => "Condo",
            PropertyType::Ec => "EC",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HDB" => Ok(PropertyType::Hdb),
            "CONDO" => Ok(PropertyType::Condo),
            "EC" => Ok(PropertyType::Ec),
            other => Err(Error::InvalidInput(format!("unknown property type '{other}'"))),
        }
    }
}

/// Unique address extracted from the transaction tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Normalized (uppercase, single-spaced) query string
    pub address: String,
    pub property_type: PropertyType,
    /// Number of source tables that mention this address
    pub source_count: u32,
}

/// One ranked candidate returned by the geocoding service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodedAddress {
    /// The query string this candidate answers
    pub address: String,
    /// Rank within the query's result list, 0 = best match
    pub search_result: u32,
    pub searchval: String,
    pub blk_no: String,
    pub road_name: String,
    pub building: String,
    pub full_address: String,
    pub postal: String,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
}

impl GeocodedAddress {
    pub fn is_best_match(&self) -> bool {
        self.search_result == 0
    }
}

/// Best match for an address, tagged with its property type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressLocation {
    pub address: String,
    pub property_type: PropertyType,
    pub full_address: String,
    pub blk_no: String,
    pub road_name: String,
    pub building: String,
    pub postal: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl AddressLocation {
    pub fn from_match(matched: &GeocodedAddress, property_type: PropertyType) -> Self {
        Self {
            address: matched.address.clone(),
            property_type,
            full_address: matched.full_address.clone(),
            blk_no: matched.blk_no.clone(),
            road_name: matched.road_name.clone(),
            building: matched.building.clone(),
            postal: matched.postal.clone(),
            latitude: matched.latitude,
            longitude: matched.longitude,
        }
    }
}

fn parse_property_type(value: &str) -> Result<PropertyType> {
    value
        .parse()
        .map_err(|e| Error::internal("decode property_type", e))
}

impl Tabular for AddressRecord {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("address", DataType::Utf8, false),
            Field::new("property_type", DataType::Utf8, false),
            Field::new("source_count", DataType::UInt32, false),
        ]))
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch> {
        Ok(RecordBatch::try_new(
            Self::schema(),
            vec![
                utf8(rows.iter().map(|r| r.address.as_str())),
                utf8(rows.iter().map(|r| r.property_type.as_str())),
                u32s(rows.iter().map(|r| r.source_count)),
            ],
        )?)
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let address = column::<StringArray>(batch, "address")?;
        let property_type = column::<StringArray>(batch, "property_type")?;
        let source_count = column::<UInt32Array>(batch, "source_count")?;

        (0..batch.num_rows())
            .map(|row| {
                Ok(AddressRecord {
                    address: address.value(row).to_string(),
                    property_type: parse_property_type(property_type.value(row))?,
                    source_count: source_count.value(row),
                })
            })
            .collect()
    }
}

impl Tabular for GeocodedAddress {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("address", DataType::Utf8, false),
            Field::new("search_result", DataType::UInt32, false),
            Field::new("searchval", DataType::Utf8, false),
            Field::new("blk_no", DataType::Utf8, false),
            Field::new("road_name", DataType::Utf8, false),
            Field::new("building", DataType::Utf8, false),
            Field::new("full_address", DataType::Utf8, false),
            Field::new("postal", DataType::Utf8, false),
            Field::new("x", DataType::Float64, true),
            Field::new("y", DataType::Float64, true),
            Field::new("latitude", DataType::Float64, false),
            Field::new("longitude", DataType::Float64, false),
        ]))
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch> {
        Ok(RecordBatch::try_new(
            Self::schema(),
            vec![
                utf8(rows.iter().map(|r| r.address.as_str())),
                u32s(rows.iter().map(|r| r.search_result)),
                utf8(rows.iter().map(|r| r.searchval.as_str())),
                utf8(rows.iter().map(|r| r.blk_no.as_str())),
                utf8(rows.iter().map(|r| r.road_name.as_str())),
                utf8(rows.iter().map(|r| r.building.as_str())),
                utf8(rows.iter().map(|r| r.full_address.as_str())),
                utf8(rows.iter().map(|r| r.postal.as_str())),
                f64_opt(rows.iter().map(|r| r.x)),
                f64_opt(rows.iter().map(|r| r.y)),
                f64s(rows.iter().map(|r| r.latitude)),
                f64s(rows.iter().map(|r| r.longitude)),
            ],
        )?)
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let address = column::<StringArray>(batch, "address")?;
        let rank = column::<UInt32Array>(batch, "search_result")?;
        let searchval = column::<StringArray>(batch, "searchval")?;
        let blk_no = column::<StringArray>(batch, "blk_no")?;
        let road_name = column::<StringArray>(batch, "road_name")?;
        let building = column::<StringArray>(batch, "building")?;
        let full_address = column::<StringArray>(batch, "full_address")?;
        let postal = column::<StringArray>(batch, "postal")?;
        let x = column::<Float64Array>(batch, "x")?;
        let y = column::<Float64Array>(batch, "y")?;
        let latitude = column::<Float64Array>(batch, "latitude")?;
        let longitude = column::<Float64Array>(batch, "longitude")?;

        Ok((0..batch.num_rows())
            .map(|row| GeocodedAddress {
                address: address.value(row).to_string(),
                search_result: rank.value(row),
                searchval: searchval.value(row).to_string(),
                blk_no: blk_no.value(row).to_string(),
                road_name: road_name.value(row).to_string(),
                building: building.value(row).to_string(),
                full_address: full_address.value(row).to_string(),
                postal: postal.value(row).to_string(),
                x: opt_f64(x, row),
                y: opt_f64(y, row),
                latitude: latitude.value(row),
                longitude: longitude.value(row),
            })
            .collect())
    }
}

impl Tabular for AddressLocation {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("address", DataType::Utf8, false),
            Field::new("property_type", DataType::Utf8, false),
            Field::new("full_address", DataType::Utf8, false),
            Field::new("blk_no", DataType::Utf8, false),
            Field::new("road_name", DataType::Utf8, false),
            Field::new("building", DataType::Utf8, false),
            Field::new("postal", DataType::Utf8, false),
            Field::new("latitude", DataType::Float64, false),
            Field::new("longitude", DataType::Float64, false),
        ]))
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch> {
        Ok(RecordBatch::try_new(
            Self::schema(),
            vec![
                utf8(rows.iter().map(|r| r.address.as_str())),
                utf8(rows.iter().map(|r| r.property_type.as_str())),
                utf8(rows.iter().map(|r| r.full_address.as_str())),
                utf8(rows.iter().map(|r| r.blk_no.as_str())),
                utf8(rows.iter().map(|r| r.road_name.as_str())),
                utf8(rows.iter().map(|r| r.building.as_str())),
                utf8(rows.iter().map(|r| r.postal.as_str())),
                f64s(rows.iter().map(|r| r.latitude)),
                f64s(rows.iter().map(|r| r.longitude)),
            ],
        )?)
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let address = column::<StringArray>(batch, "address")?;
        let property_type = column::<StringArray>(batch, "property_type")?;
        let full_address = column::<StringArray>(batch, "full_address")?;
        let blk_no = column::<StringArray>(batch, "blk_no")?;
        let road_name = column::<StringArray>(batch, "road_name")?;
        let building = column::<StringArray>(batch, "building")?;
        let postal = column::<StringArray>(batch, "postal")?;
        let latitude = column::<Float64Array>(batch, "latitude")?;
        let longitude = column::<Float64Array>(batch, "longitude")?;

        (0..batch.num_rows())
            .map(|row| {
                Ok(AddressLocation {
                    address: address.value(row).to_string(),
                    property_type: parse_property_type(property_type.value(row))?,
                    full_address: full_address.value(row).to_string(),
                    blk_no: blk_no.value(row).to_string(),
                    road_name: road_name.value(row).to_string(),
                    building: building.value(row).to_string(),
                    postal: postal.value(row).to_string(),
                    latitude: latitude.value(row),
                    longitude: longitude.value(row),
                })
            })
            .collect()
    }
}
