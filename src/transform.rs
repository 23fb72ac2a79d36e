// Transform stage: raw table rows -> derived columns -> outlier filter

use crate::config::Config;
use crate::models::{DistanceCategory, ProcessedRecord, SourceRecord};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Best-effort date parse; anything unrecognised is None
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
}

// ============================================================================
// EXTRACT
// ============================================================================

/// Rows of the raw table with non-null price, suburb and type
pub fn extract_from_raw(conn: &Connection) -> Result<Vec<SourceRecord>> {
    info!("Extracting data from properties_raw");

    let mut stmt = conn
        .prepare(
            "SELECT price, date_sold, suburb, num_bath, num_bed, num_parking,
                    property_size, type, km_from_cbd
             FROM properties_raw
             WHERE price IS NOT NULL
               AND suburb IS NOT NULL
               AND type IS NOT NULL
             ORDER BY id",
        )
        .context("Error extracting data")?;

    let records = stmt
        .query_map([], |row| {
            let date_sold: Option<String> = row.get(1)?;
            Ok(SourceRecord {
                price: row.get(0)?,
                date_sold: date_sold.as_deref().and_then(parse_date),
                suburb: row.get(2)?,
                num_bath: row.get(3)?,
                num_bed: row.get(4)?,
                num_parking: row.get(5)?,
                property_size: row.get(6)?,
                property_type: row.get(7)?,
                km_from_cbd: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Error extracting data")?;

    info!("Extracted {} records", records.len());
    Ok(records)
}

// ============================================================================
// DERIVED COLUMNS
// ============================================================================

/// price / size when size is present and positive
pub fn price_per_sqm(price: f64, property_size: Option<f64>) -> Option<f64> {
    match property_size {
        Some(size) if size > 0.0 => Some(price / size),
        _ => None,
    }
}

/// Case-insensitive "house" substring; "Townhouse" counts
pub fn is_house(property_type: Option<&str>) -> bool {
    property_type.is_some_and(|t| t.to_lowercase().contains("house"))
}

pub fn derive(record: SourceRecord) -> ProcessedRecord {
    ProcessedRecord {
        price_per_sqm: price_per_sqm(record.price, record.property_size),
        is_house: is_house(Some(&record.property_type)),
        distance_category: DistanceCategory::from_km(record.km_from_cbd),
        num_parking: Some(record.num_parking.unwrap_or(0)),
        price: record.price,
        date_sold: record.date_sold,
        suburb: record.suburb,
        num_bath: record.num_bath,
        num_bed: record.num_bed,
        property_size: record.property_size,
        property_type: record.property_type,
        km_from_cbd: record.km_from_cbd,
    }
}

// ============================================================================
// OUTLIER FILTER
// ============================================================================

/// Keep rows with min_price <= price <= max_price
pub fn filter_outliers(records: Vec<ProcessedRecord>, min_price: f64, max_price: f64) -> Vec<ProcessedRecord> {
    records
        .into_iter()
        .filter(|r| r.price >= min_price && r.price <= max_price)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransformStats {
    pub input_rows: usize,
    pub outliers_removed: usize,
    pub output_rows: usize,
}

pub fn transform(records: Vec<SourceRecord>, config: &Config) -> (Vec<ProcessedRecord>, TransformStats) {
    info!("Starting data transformations");
    let input_rows = records.len();

    let derived: Vec<ProcessedRecord> = records.into_iter().map(derive).collect();
    info!("Calculated price per sqm, is_house flag and distance category");

    let kept = filter_outliers(derived, config.min_price, config.max_price);
    let outliers_removed = input_rows - kept.len();
    info!(
        "Removed outliers: {} records outside ${:.0} - ${:.0}",
        outliers_removed, config.min_price, config.max_price
    );

    info!("Transformation complete: {} records ready for loading", kept.len());

    let stats = TransformStats {
        input_rows,
        outliers_removed,
        output_rows: kept.len(),
    };
    (kept, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_raw_records, setup_database, ImportMode, Session};
    use crate::models::RawRecord;

    #[test]
    fn test_price_per_sqm() {
        assert_eq!(price_per_sqm(500_000.0, Some(100.0)), Some(5000.0));
        assert_eq!(price_per_sqm(500_000.0, Some(0.0)), None);
        assert_eq!(price_per_sqm(500_000.0, Some(-10.0)), None);
        assert_eq!(price_per_sqm(500_000.0, None), None);
    }

    #[test]
    fn test_is_house() {
        assert!(is_house(Some("House")));
        assert!(is_house(Some("Townhouse")));
        assert!(is_house(Some("WAREHOUSE CONVERSION")));
        assert!(!is_house(Some("Apartment")));
        assert!(!is_house(Some("Villa")));
        assert!(!is_house(None));
    }

    #[test]
    fn test_outlier_bounds_inclusive() {
        let config = Config::default();
        let records: Vec<SourceRecord> = [99_999.0, 100_000.0, 10_000_000.0, 10_000_001.0]
            .into_iter()
            .map(|price| SourceRecord::new(price, "Ryde", "House", Some(1.0)))
            .collect();

        let (kept, stats) = transform(records, &config);

        let prices: Vec<f64> = kept.iter().map(|r| r.price).collect();
        assert_eq!(prices, vec![100_000.0, 10_000_000.0]);
        assert_eq!(stats.outliers_removed, 2);

        let again = filter_outliers(kept.clone(), config.min_price, config.max_price);
        assert_eq!(again, kept);
    }

    #[test]
    fn test_parking_defaults_to_zero() {
        let record = SourceRecord::new(500_000.0, "Ryde", "Unit", Some(3.0)).with_rooms(Some(2), Some(1), None);
        let processed = derive(record);
        assert_eq!(processed.num_parking, Some(0));
        assert_eq!(processed.num_bed, Some(2));
    }

    #[test]
    fn test_null_distance_passes_through() {
        let processed = derive(SourceRecord::new(500_000.0, "Ryde", "Unit", None));
        assert_eq!(processed.distance_category, None);
        assert_eq!(processed.km_from_cbd, None);
    }

    #[test]
    fn test_parse_date_best_effort() {
        let expected = NaiveDate::from_ymd_opt(2021, 3, 15);
        assert_eq!(parse_date("2021-03-15"), expected);
        assert_eq!(parse_date("15/03/2021"), expected);
        assert_eq!(parse_date("2021-03-15 00:00:00"), expected);
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date("31/02/2021"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_extract_then_transform_three_rows() {
        let mut session = Session::open_in_memory().unwrap();
        setup_database(session.conn()).unwrap();

        let raw = |price: f64, size: Option<f64>, kind: &str, km: f64| RawRecord {
            price: Some(price),
            suburb: Some("Parramatta".to_string()),
            property_size: size,
            property_type: Some(kind.to_string()),
            km_from_cbd: Some(km),
            ..Default::default()
        };
        let mut missing_type = raw(750_000.0, None, "House", 4.0);
        missing_type.property_type = None;

        insert_raw_records(
            &mut session,
            vec![
                raw(500_000.0, Some(100.0), "House", 3.0),
                raw(50_000.0, Some(50.0), "Apartment", 15.0),
                raw(2_000_000.0, None, "Townhouse", 25.0),
                missing_type,
            ],
            1000,
            ImportMode::Append,
        )
        .unwrap();

        let extracted = extract_from_raw(session.conn()).unwrap();
        assert_eq!(extracted.len(), 3);

        let (processed, stats) = transform(extracted, &Config::default());
        assert_eq!(stats.outliers_removed, 1);
        assert_eq!(processed.len(), 2);

        assert_eq!(processed[0].price_per_sqm, Some(5000.0));
        assert!(processed[0].is_house);
        assert_eq!(processed[0].distance_category, Some(DistanceCategory::InnerCity));

        assert_eq!(processed[1].price_per_sqm, None);
        assert!(processed[1].is_house);
        assert_eq!(processed[1].distance_category, Some(DistanceCategory::OuterSuburbs));
    }
}
