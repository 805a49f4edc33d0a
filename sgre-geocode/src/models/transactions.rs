//! Raw transaction tables (L0 artifacts)

use super::{f64s, i64s, utf8, utf8_opt};
use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use sgre_common::store::tabular::{column, opt_string_in, optional_column};
use sgre_common::{Result, Tabular};
use std::sync::Arc;

/// HDB resale transaction (data.gov.sg resale flat prices)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HdbTransaction {
    /// `YYYY-MM`
    pub month: String,
    pub town: String,
    pub flat_type: String,
    pub block: String,
    pub street_name: String,
    pub storey_range: String,
    pub floor_area_sqm: f64,
    pub flat_model: String,
    pub lease_commence_date: i64,
    pub remaining_lease: Option<String>,
    pub resale_price: f64,
}

/// Private residential transaction (URA); shared by condo and EC tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateTransaction {
    pub project_name: String,
    pub street_name: String,
    /// URA property type, e.g. "Condominium", "Executive Condominium"
    pub property_type: String,
    pub market_segment: Option<String>,
    pub contract_date: String,
    pub area_sqm: f64,
    pub price: f64,
    pub tenure: Option<String>,
    pub postal_district: Option<String>,
}

impl PrivateTransaction {
    pub fn is_executive_condo(&self) -> bool {
        self.property_type
            .trim()
            .eq_ignore_ascii_case("Executive Condominium")
    }
}

impl Tabular for HdbTransaction {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("month", DataType::Utf8, false),
            Field::new("town", DataType::Utf8, false),
            Field::new("flat_type", DataType::Utf8, false),
            Field::new("block", DataType::Utf8, false),
            Field::new("street_name", DataType::Utf8, false),
            Field::new("storey_range", DataType::Utf8, false),
            Field::new("floor_area_sqm", DataType::Float64, false),
            Field::new("flat_model", DataType::Utf8, false),
            Field::new("lease_commence_date", DataType::Int64, false),
            Field::new("remaining_lease", DataType::Utf8, true),
            Field::new("resale_price", DataType::Float64, false),
        ]))
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch> {
        Ok(RecordBatch::try_new(
            Self::schema(),
            vec![
                utf8(rows.iter().map(|r| r.month.as_str())),
                utf8(rows.iter().map(|r| r.town.as_str())),
                utf8(rows.iter().map(|r| r.flat_type.as_str())),
                utf8(rows.iter().map(|r| r.block.as_str())),
                utf8(rows.iter().map(|r| r.street_name.as_str())),
                utf8(rows.iter().map(|r| r.storey_range.as_str())),
                f64s(rows.iter().map(|r| r.floor_area_sqm)),
                utf8(rows.iter().map(|r| r.flat_model.as_str())),
                i64s(rows.iter().map(|r| r.lease_commence_date)),
                utf8_opt(rows.iter().map(|r| r.remaining_lease.as_deref())),
                f64s(rows.iter().map(|r| r.resale_price)),
            ],
        )?)
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let month = column::<StringArray>(batch, "month")?;
        let town = column::<StringArray>(batch, "town")?;
        let flat_type = column::<StringArray>(batch, "flat_type")?;
        let block = column::<StringArray>(batch, "block")?;
        let street_name = column::<StringArray>(batch, "street_name")?;
        let storey_range = column::<StringArray>(batch, "storey_range")?;
        let floor_area = column::<Float64Array>(batch, "floor_area_sqm")?;
        let flat_model = column::<StringArray>(batch, "flat_model")?;
        let lease = column::<Int64Array>(batch, "lease_commence_date")?;
        let remaining = optional_column::<StringArray>(batch, "remaining_lease")?;
        let price = column::<Float64Array>(batch, "resale_price")?;

        Ok((0..batch.num_rows())
            .map(|row| HdbTransaction {
                month: month.value(row).to_string(),
                town: town.value(row).to_string(),
                flat_type: flat_type.value(row).to_string(),
                block: block.value(row).to_string(),
                street_name: street_name.value(row).to_string(),
                storey_range: storey_range.value(row).to_string(),
                floor_area_sqm: floor_area.value(row),
                flat_model: flat_model.value(row).to_string(),
                lease_commence_date: lease.value(row),
                remaining_lease: opt_string_in(remaining, row),
                resale_price: price.value(row),
            })
            .collect())
    }
}

impl Tabular for PrivateTransaction {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("project_name", DataType::Utf8, false),
            Field::new("street_name", DataType::Utf8, false),
            Field::new("property_type", DataType::Utf8, false),
            Field::new("market_segment", DataType::Utf8, true),
            Field::new("contract_date", DataType::Utf8, false),
            Field::new("area_sqm", DataType::Float64, false),
            Field::new("price", DataType::Float64, false),
            Field::new("tenure", DataType::Utf8, true),
            Field::new("postal_district", DataType::Utf8, true),
        ]))
    }

    fn to_batch(rows: &[Self]) -> Result<RecordBatch> {
        Ok(RecordBatch::try_new(
            Self::schema(),
            vec![
                utf8(rows.iter().map(|r| r.project_name.as_str())),
                utf8(rows.iter().map(|r| r.street_name.as_str())),
                utf8(rows.iter().map(|r| r.property_type.as_str())),
                utf8_opt(rows.iter().map(|r| r.market_segment.as_deref())),
                utf8(rows.iter().map(|r| r.contract_date.as_str())),
                f64s(rows.iter().map(|r| r.area_sqm)),
                f64s(rows.iter().map(|r| r.price)),
                utf8_opt(rows.iter().map(|r| r.tenure.as_deref())),
                utf8_opt(rows.iter().map(|r| r.postal_district.as_deref())),
            ],
        )?)
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let project = column::<StringArray>(batch, "project_name")?;
        let street = column::<StringArray>(batch, "street_name")?;
        let property_type = column::<StringArray>(batch, "property_type")?;
        let segment = optional_column::<StringArray>(batch, "market_segment")?;
        let contract_date = column::<StringArray>(batch, "contract_date")?;
        let area = column::<Float64Array>(batch, "area_sqm")?;
        let price = column::<Float64Array>(batch, "price")?;
        let tenure = optional_column::<StringArray>(batch, "tenure")?;
        let district = optional_column::<StringArray>(batch, "postal_district")?;

        Ok((0..batch.num_rows())
            .map(|row| PrivateTransaction {
                project_name: project.value(row).to_string(),
                street_name: street.value(row).to_string(),
                property_type: property_type.value(row).to_string(),
                market_segment: opt_string_in(segment, row),
                contract_date: contract_date.value(row).to_string(),
                area_sqm: area.value(row),
                price: price.value(row),
                tenure: opt_string_in(tenure, row),
                postal_district: opt_string_in(district, row),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn hdb(block: &str, street: &str) -> HdbTransaction {
        HdbTransaction {
            month: "2024-01".to_string(),
            town: "ANG MO KIO".to_string(),
            flat_type: "4 ROOM".to_string(),
            block: block.to_string(),
            street_name: street.to_string(),
            storey_range: "07 TO 09".to_string(),
            floor_area_sqm: 92.0,
            flat_model: "New Generation".to_string(),
            lease_commence_date: 1978,
            remaining_lease: None,
            resale_price: 450_000.0,
        }
    }

    #[test]
    fn test_hdb_batch_preserves_optional_lease() {
        let mut with_lease = hdb("123", "ANG MO KIO AVE 3");
        with_lease.remaining_lease = Some("53 years 02 months".to_string());
        let rows = vec![with_lease, hdb("124", "ANG MO KIO AVE 3")];

        let batch = HdbTransaction::to_batch(&rows).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(HdbTransaction::from_batch(&batch).unwrap(), rows);
    }

    #[test]
    fn test_executive_condo_detection() {
        let mut tx = PrivateTransaction {
            project_name: "PARC CANBERRA".to_string(),
            street_name: "CANBERRA WALK".to_string(),
            property_type: "Executive Condominium".to_string(),
            market_segment: Some("OCR".to_string()),
            contract_date: "0324".to_string(),
            area_sqm: 95.0,
            price: 1_100_000.0,
            tenure: Some("99 yrs lease".to_string()),
            postal_district: Some("27".to_string()),
        };
        assert!(tx.is_executive_condo());

        tx.property_type = "Condominium".to_string();
        assert!(!tx.is_executive_condo());
    }
}
