// CSV ingestion: read, explore, clean and snapshot the raw sales file

use crate::error::PipelineError;
use crate::models::RawRecord;
use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// File name of the processed-table export read by the dashboard.
/// Excluded when picking the latest cleaned snapshot.
pub const LATEST_EXPORT_FILENAME: &str = "properties_processed_latest.csv";

/// Read a sales CSV into raw records
pub fn read_raw_csv(path: &Path) -> Result<Vec<RawRecord>> {
    if !path.exists() {
        error!("File not found: {}", path.display());
        return Err(PipelineError::FileNotFound(path.to_path_buf()).into());
    }

    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut records = Vec::new();
    for (line, result) in rdr.deserialize().enumerate() {
        // +2: header row and 1-based numbering
        let record: RawRecord = result
            .with_context(|| format!("Failed to parse {} at line {}", path.display(), line + 2))?;
        records.push(record);
    }

    Ok(records)
}

/// Load the configured raw file, logging a hint when it is missing
pub fn load_raw_data(path: &Path) -> Result<Vec<RawRecord>> {
    match read_raw_csv(path) {
        Ok(records) => {
            info!("Loaded {} records from {}", records.len(), path.display());
            Ok(records)
        }
        Err(e) => {
            if matches!(e.downcast_ref::<PipelineError>(), Some(PipelineError::FileNotFound(_))) {
                error!("Please download a dataset and place it at {}", path.display());
            } else {
                error!("Error loading data: {:#}", e);
            }
            Err(e)
        }
    }
}

// ============================================================================
// EXPLORATION
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ColumnMissing {
    pub column: String,
    pub missing: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataOverview {
    pub rows: usize,
    pub columns: usize,
    pub missing: Vec<ColumnMissing>,
    pub price_min: Option<f64>,
    pub price_mean: Option<f64>,
    pub price_max: Option<f64>,
}

/// Shape, per-column missing counts and price statistics
pub fn explore_data(records: &[RawRecord]) -> DataOverview {
    let mut missing = [0usize; 17];
    for record in records {
        for (slot, is_missing) in missing.iter_mut().zip(record.missing_flags()) {
            if is_missing {
                *slot += 1;
            }
        }
    }

    let prices: Vec<f64> = records.iter().filter_map(|r| r.price).collect();
    let price_min = prices.iter().copied().reduce(f64::min);
    let price_max = prices.iter().copied().reduce(f64::max);
    let price_mean = if prices.is_empty() {
        None
    } else {
        Some(prices.iter().sum::<f64>() / prices.len() as f64)
    };

    let overview = DataOverview {
        rows: records.len(),
        columns: RawRecord::COLUMNS.len(),
        missing: RawRecord::COLUMNS
            .iter()
            .zip(missing)
            .map(|(column, missing)| ColumnMissing {
                column: column.to_string(),
                missing,
            })
            .collect(),
        price_min,
        price_mean,
        price_max,
    };

    info!("=== Data overview ===");
    info!("Shape: ({}, {})", overview.rows, overview.columns);
    info!("Missing values:");
    for col in &overview.missing {
        info!("  {:<26} {}", col.column, col.missing);
    }
    if let (Some(min), Some(mean), Some(max)) = (price_min, price_mean, price_max) {
        info!("Price: min ${:.0}, mean ${:.0}, max ${:.0}", min, mean, max);
    }

    overview
}

// ============================================================================
// CLEANING
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanStats {
    pub input_rows: usize,
    pub duplicates_removed: usize,
    pub incomplete_removed: usize,
    pub output_rows: usize,
}

/// Drop exact duplicate rows (first occurrence kept), then rows missing
/// price, suburb, type or km_from_cbd
pub fn clean_data(records: Vec<RawRecord>) -> (Vec<RawRecord>, CleanStats) {
    let input_rows = records.len();

    let mut seen = HashSet::new();
    let unique: Vec<RawRecord> = records
        .into_iter()
        .filter(|r| seen.insert(r.fingerprint()))
        .collect();
    let duplicates_removed = input_rows - unique.len();
    info!("Removed {} duplicate rows", duplicates_removed);

    let before = unique.len();
    let cleaned: Vec<RawRecord> = unique
        .into_iter()
        .filter(RawRecord::has_required_fields)
        .collect();
    let incomplete_removed = before - cleaned.len();
    info!("Cleaned data: {} records remaining", cleaned.len());

    let stats = CleanStats {
        input_rows,
        duplicates_removed,
        incomplete_removed,
        output_rows: cleaned.len(),
    };
    (cleaned, stats)
}

// ============================================================================
// SNAPSHOTS
// ============================================================================

/// Write cleaned records with a header; default name is timestamp-suffixed
pub fn save_processed_data(records: &[RawRecord], dir: &Path, filename: Option<&str>) -> Result<PathBuf> {
    let filename = match filename {
        Some(name) => name.to_string(),
        None => format!(
            "properties_processed_{}.csv",
            Local::now().format("%Y%m%d_%H%M%S")
        ),
    };

    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(filename);

    let mut wtr = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    if records.is_empty() {
        wtr.write_record(RawRecord::COLUMNS)?;
    }
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;

    info!("Saved processed data to {}", path.display());
    Ok(path)
}

/// Most recently modified cleaned snapshot in `dir`
pub fn latest_processed_file(dir: &Path) -> Result<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Err(PipelineError::NoProcessedFiles(dir.to_path_buf()).into()),
    };

    let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_snapshot = path.extension().is_some_and(|ext| ext == "csv")
            && path.file_name().is_some_and(|name| name != LATEST_EXPORT_FILENAME);
        if !is_snapshot {
            continue;
        }

        let modified = entry.metadata()?.modified()?;
        if latest.as_ref().map_or(true, |(t, _)| modified >= *t) {
            latest = Some((modified, path));
        }
    }

    latest
        .map(|(_, path)| path)
        .ok_or_else(|| PipelineError::NoProcessedFiles(dir.to_path_buf()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(price: Option<f64>, suburb: Option<&str>, km: Option<f64>) -> RawRecord {
        RawRecord {
            price,
            suburb: suburb.map(str::to_string),
            property_type: Some("House".to_string()),
            km_from_cbd: km,
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_file_is_typed_error() {
        let err = read_raw_csv(Path::new("/nonexistent/housing_data.csv")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_clean_data_dedupes_then_drops_incomplete() {
        let records = vec![
            record(Some(500_000.0), Some("Ryde"), Some(12.0)),
            record(Some(500_000.0), Some("Ryde"), Some(12.0)),
            record(None, Some("Ryde"), Some(12.0)),
            record(Some(700_000.0), None, Some(3.0)),
            record(Some(900_000.0), Some("Manly"), None),
            record(Some(650_000.0), Some("Manly"), Some(11.0)),
        ];

        let (cleaned, stats) = clean_data(records);

        assert_eq!(cleaned.len(), 2);
        assert_eq!(
            stats,
            CleanStats {
                input_rows: 6,
                duplicates_removed: 1,
                incomplete_removed: 3,
                output_rows: 2,
            }
        );
        assert_eq!(cleaned[0].price, Some(500_000.0));
        assert_eq!(cleaned[1].suburb.as_deref(), Some("Manly"));
    }

    #[test]
    fn test_explore_counts_missing() {
        let records = vec![
            record(Some(100.0), Some("Ryde"), None),
            record(Some(300.0), None, None),
        ];

        let overview = explore_data(&records);

        assert_eq!(overview.rows, 2);
        assert_eq!(overview.columns, 17);
        let km = overview.missing.iter().find(|c| c.column == "km_from_cbd").unwrap();
        assert_eq!(km.missing, 2);
        let suburb = overview.missing.iter().find(|c| c.column == "suburb").unwrap();
        assert_eq!(suburb.missing, 1);
        assert_eq!(overview.price_mean, Some(200.0));
    }

    #[test]
    fn test_save_and_reload_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![record(Some(800_000.0), Some("Ryde"), Some(12.5))];

        let path = save_processed_data(&records, dir.path(), None).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("properties_processed_"));
        assert!(name.ends_with(".csv"));

        let reloaded = read_raw_csv(&path).unwrap();
        assert_eq!(reloaded, records);
        assert_eq!(latest_processed_file(dir.path()).unwrap(), path);
    }

    #[test]
    fn test_latest_skips_dashboard_export() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = save_processed_data(&[], dir.path(), Some("properties_processed_1.csv")).unwrap();
        fs::write(dir.path().join(LATEST_EXPORT_FILENAME), "price\n").unwrap();

        assert_eq!(latest_processed_file(dir.path()).unwrap(), snapshot);
    }

    #[test]
    fn test_no_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let err = latest_processed_file(dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NoProcessedFiles(_))
        ));
    }
}
