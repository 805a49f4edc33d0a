//! Raw CSV ingest into L0 artifacts
//!
//! HDB resale CSVs (data.gov.sg) and URA private-transaction CSVs are read
//! with serde. Numeric cells tolerate thousands separators and currency
//! symbols; rows that still fail to parse are skipped and counted.

use crate::error::PipelineResult;
use crate::models::{HdbTransaction, PrivateTransaction};
use serde::Deserialize;
use sgre_common::{ArtifactStore, SaveOptions};
use std::io::Read;
use std::path::Path;

pub const HDB_DATASET: &str = "L0_hdb_transactions";
pub const CONDO_DATASET: &str = "L0_condo_transactions";
pub const EC_DATASET: &str = "L0_ec_transactions";

#[derive(Debug, Deserialize)]
struct HdbCsvRow {
    month: String,
    town: String,
    flat_type: String,
    block: String,
    street_name: String,
    storey_range: String,
    floor_area_sqm: String,
    flat_model: String,
    lease_commence_date: String,
    #[serde(default)]
    remaining_lease: Option<String>,
    resale_price: String,
}

#[derive(Debug, Deserialize)]
struct PrivateCsvRow {
    #[serde(rename = "Project Name", alias = "project_name")]
    project_name: String,
    #[serde(rename = "Street Name", alias = "street_name")]
    street_name: String,
    #[serde(rename = "Property Type", alias = "property_type")]
    property_type: String,
    #[serde(rename = "Market Segment", alias = "market_segment", default)]
    market_segment: Option<String>,
    #[serde(rename = "Sale Date", alias = "contract_date")]
    contract_date: String,
    #[serde(rename = "Area (SQM)", alias = "area_sqm")]
    area_sqm: String,
    #[serde(rename = "Transacted Price ($)", alias = "price")]
    price: String,
    #[serde(rename = "Tenure", alias = "tenure", default)]
    tenure: Option<String>,
    #[serde(rename = "Postal District", alias = "postal_district", default)]
    postal_district: Option<String>,
}

/// Parsed rows plus the number of rows that were dropped
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub rows: Vec<T>,
    pub skipped: usize,
}

/// Row counts written by [`ingest`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub hdb: usize,
    pub condo: usize,
    pub ec: usize,
    pub skipped: usize,
}

fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | ' '))
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl HdbCsvRow {
    fn into_transaction(self) -> Option<HdbTransaction> {
        Some(HdbTransaction {
            floor_area_sqm: parse_number(&self.floor_area_sqm)?,
            lease_commence_date: parse_number(&self.lease_commence_date)? as i64,
            resale_price: parse_number(&self.resale_price)?,
            month: self.month,
            town: self.town,
            flat_type: self.flat_type,
            block: self.block,
            street_name: self.street_name,
            storey_range: self.storey_range,
            flat_model: self.flat_model,
            remaining_lease: non_empty(self.remaining_lease),
        })
    }
}

impl PrivateCsvRow {
    fn into_transaction(self) -> Option<PrivateTransaction> {
        Some(PrivateTransaction {
            area_sqm: parse_number(&self.area_sqm)?,
            price: parse_number(&self.price)?,
            project_name: self.project_name,
            street_name: self.street_name,
            property_type: self.property_type,
            market_segment: non_empty(self.market_segment),
            contract_date: self.contract_date,
            tenure: non_empty(self.tenure),
            postal_district: non_empty(self.postal_district),
        })
    }
}

fn read_rows<R, Raw, T>(reader: R, kind: &str, convert: fn(Raw) -> Option<T>) -> PipelineResult<Parsed<T>>
where
    R: Read,
    Raw: serde::de::DeserializeOwned,
{
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut rows = Vec::new();
    let mut skipped = 0usize;

    for (line, record) in csv_reader.deserialize::<Raw>().enumerate() {
        let parsed = match record {
            Ok(raw) => convert(raw),
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                tracing::debug!(kind, line = line + 2, error = %e, "Unparseable CSV row");
                None
            }
        };
        match parsed {
            Some(row) => rows.push(row),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::warn!(kind, skipped, kept = rows.len(), "Skipped malformed CSV rows");
    }
    Ok(Parsed { rows, skipped })
}

pub fn read_hdb<R: Read>(reader: R) -> PipelineResult<Parsed<HdbTransaction>> {
    read_rows::<_, HdbCsvRow, _>(reader, "hdb", HdbCsvRow::into_transaction)
}

pub fn read_private<R: Read>(reader: R) -> PipelineResult<Parsed<PrivateTransaction>> {
    read_rows::<_, PrivateCsvRow, _>(reader, "private", PrivateCsvRow::into_transaction)
}

/// Split private rows into (condo, executive condo)
pub fn split_private(rows: Vec<PrivateTransaction>) -> (Vec<PrivateTransaction>, Vec<PrivateTransaction>) {
    rows.into_iter().partition(|r| !r.is_executive_condo())
}

fn save_table<T: sgre_common::Tabular>(
    store: &ArtifactStore,
    rows: &[T],
    name: &str,
    source: &Path,
) -> PipelineResult<usize> {
    if rows.is_empty() {
        tracing::warn!(dataset = name, "No rows to ingest");
        return Ok(0);
    }
    let options = SaveOptions::new()
        .source(source.display().to_string())
        .with_checksum();
    let meta = store.save(rows, name, options)?;
    Ok(meta.rows as usize)
}

/// Read the given CSVs and save them as L0 artifacts
pub fn ingest(
    store: &ArtifactStore,
    hdb_csv: Option<&Path>,
    private_csv: Option<&Path>,
) -> PipelineResult<IngestSummary> {
    let mut summary = IngestSummary::default();

    if let Some(path) = hdb_csv {
        let parsed = read_hdb(std::fs::File::open(path).map_err(sgre_common::Error::from)?)?;
        summary.skipped += parsed.skipped;
        summary.hdb = save_table(store, &parsed.rows, HDB_DATASET, path)?;
    }

    if let Some(path) = private_csv {
        let parsed = read_private(std::fs::File::open(path).map_err(sgre_common::Error::from)?)?;
        summary.skipped += parsed.skipped;
        let (condo, ec) = split_private(parsed.rows);
        summary.condo = save_table(store, &condo, CONDO_DATASET, path)?;
        summary.ec = save_table(store, &ec, EC_DATASET, path)?;
    }

    tracing::info!(
        hdb = summary.hdb,
        condo = summary.condo,
        ec = summary.ec,
        skipped = summary.skipped,
        "Ingest complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgre_common::PipelineConfig;
    use tempfile::TempDir;

    const HDB_CSV: &str = "\
month,town,flat_type,block,street_name,storey_range,floor_area_sqm,flat_model,lease_commence_date,remaining_lease,resale_price
2024-01,ANG MO KIO,3 ROOM,406,ANG MO KIO AVE 10,10 TO 12,44,Improved,1979,54 years 03 months,267000
2024-01,BEDOK,4 ROOM,101,BEDOK NTH AVE 4,01 TO 03,84,Simplified,1978,,\"420,000\"
2024-01,BEDOK,4 ROOM,102,BEDOK NTH AVE 4,01 TO 03,n/a,Simplified,1978,,400000
";

    const URA_CSV: &str = "\
Project Name,Street Name,Property Type,Market Segment,Sale Date,Area (SQM),Transacted Price ($),Tenure,Postal District
THE SAIL @ MARINA BAY,MARINA BOULEVARD,Apartment,CCR,Jan-24,\"1,001\",\"2,100,000\",99 yrs lease,01
PARC CANBERRA,CANBERRA WALK,Executive Condominium,OCR,Feb-24,95,\"1,150,000\",99 yrs lease,27
";

    #[test]
    fn test_read_hdb_skips_bad_numbers() {
        let parsed = read_hdb(HDB_CSV.as_bytes()).unwrap();

        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.skipped, 1);
        assert_eq!(parsed.rows[0].remaining_lease.as_deref(), Some("54 years 03 months"));
        assert_eq!(parsed.rows[1].remaining_lease, None);
        assert_eq!(parsed.rows[1].resale_price, 420_000.0);
    }

    #[test]
    fn test_read_private_accepts_ura_headers() {
        let parsed = read_private(URA_CSV.as_bytes()).unwrap();

        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].price, 2_100_000.0);
        assert_eq!(parsed.rows[0].area_sqm, 1001.0);
        assert_eq!(parsed.rows[1].market_segment.as_deref(), Some("OCR"));
    }

    #[test]
    fn test_split_private_routes_executive_condos() {
        let parsed = read_private(URA_CSV.as_bytes()).unwrap();
        let (condo, ec) = split_private(parsed.rows);

        assert_eq!(condo.len(), 1);
        assert_eq!(ec.len(), 1);
        assert_eq!(ec[0].project_name, "PARC CANBERRA");
    }

    #[test]
    fn test_ingest_writes_l0_artifacts() {
        let dir = TempDir::new().unwrap();
        let hdb_path = dir.path().join("resale.csv");
        let ura_path = dir.path().join("ura.csv");
        std::fs::write(&hdb_path, HDB_CSV).unwrap();
        std::fs::write(&ura_path, URA_CSV).unwrap();
        let store = ArtifactStore::new(&PipelineConfig::for_data_dir(dir.path().join("data")));

        let summary = ingest(&store, Some(&hdb_path), Some(&ura_path)).unwrap();

        assert_eq!(summary, IngestSummary { hdb: 2, condo: 1, ec: 1, skipped: 1 });
        let hdb: Vec<HdbTransaction> = store.load(HDB_DATASET, None).unwrap();
        assert_eq!(hdb.len(), 2);
        assert!(store.info(EC_DATASET).unwrap().unwrap().checksum.is_some());
        assert!(dir.path().join("data/L0/hdb_transactions.parquet").exists());
    }

    #[test]
    fn test_missing_csv_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(&PipelineConfig::for_data_dir(dir.path()));
        let missing = dir.path().join("nope.csv");

        assert!(ingest(&store, Some(&missing), None).is_err());
    }
}
