// Load stage: replace the processed table with a batch, all-or-nothing

use crate::batch::{ProcessedBatch, PROCESSED_COLUMNS};
use crate::db::{effective_page_size, insert_rows, Session, PROCESSED_TABLE};
use crate::error::PipelineError;
use crate::loader::LATEST_EXPORT_FILENAME;
use crate::models::{DistanceCategory, ProcessedRecord};
use crate::transform::parse_date;
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Truncate `properties_processed` and insert `batch` in one transaction.
/// On failure the transaction is rolled back and the previous contents remain.
pub fn load_to_processed(session: &mut Session, batch: &ProcessedBatch, page_size: usize) -> Result<usize> {
    let tx = session.transaction()?;

    match replace_contents(&tx, batch, page_size) {
        Ok(inserted) => {
            tx.commit()
                .map_err(|e| PipelineError::load(PROCESSED_TABLE, e.to_string()))?;
            info!("Successfully loaded {} records to {}", inserted, PROCESSED_TABLE);
            Ok(inserted)
        }
        Err(e) => {
            error!("Error loading data: {:#}", e);
            if let Err(rollback_err) = tx.rollback() {
                error!("Rollback failed: {}", rollback_err);
            }
            Err(PipelineError::load(PROCESSED_TABLE, format!("{:#}", e)).into())
        }
    }
}

fn replace_contents(conn: &Connection, batch: &ProcessedBatch, page_size: usize) -> Result<usize> {
    info!("Clearing {} table", PROCESSED_TABLE);
    conn.execute("DELETE FROM properties_processed", [])?;

    info!("Loading {} records to {}", batch.len(), PROCESSED_TABLE);
    let page_size = effective_page_size(page_size, PROCESSED_COLUMNS.len());

    let mut inserted = 0;
    for page in batch.pages(page_size) {
        debug!("Inserting rows {}..{}", page.start, page.end);
        inserted += insert_rows(
            conn,
            PROCESSED_TABLE,
            &PROCESSED_COLUMNS,
            page.map(|i| batch.row_values(i)),
            page_size,
        )?;
    }

    Ok(inserted)
}

/// Current contents of the processed table, in insertion order
pub fn read_processed_records(conn: &Connection) -> Result<Vec<ProcessedRecord>> {
    let mut stmt = conn.prepare(
        "SELECT price, date_sold, suburb, num_bath, num_bed, num_parking, property_size,
                type, km_from_cbd, price_per_sqm, is_house, distance_category
         FROM properties_processed
         ORDER BY id",
    )?;

    let records = stmt
        .query_map([], |row| {
            let date_sold: Option<String> = row.get(1)?;
            let category: Option<String> = row.get(11)?;
            Ok(ProcessedRecord {
                price: row.get(0)?,
                date_sold: date_sold.as_deref().and_then(parse_date),
                suburb: row.get(2)?,
                num_bath: row.get(3)?,
                num_bed: row.get(4)?,
                num_parking: row.get(5)?,
                property_size: row.get(6)?,
                property_type: row.get(7)?,
                km_from_cbd: row.get(8)?,
                price_per_sqm: row.get(9)?,
                is_house: row.get::<_, Option<bool>>(10)?.unwrap_or(false),
                distance_category: category.as_deref().and_then(DistanceCategory::parse),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

/// Write the processed table to `dir/properties_processed_latest.csv` for the dashboard
pub fn export_processed_csv(conn: &Connection, dir: &Path) -> Result<PathBuf> {
    let records = read_processed_records(conn)?;

    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(LATEST_EXPORT_FILENAME);

    let mut wtr = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    if records.is_empty() {
        wtr.write_record(PROCESSED_COLUMNS)?;
    }
    for record in &records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;

    info!("Exported {} processed records to {}", records.len(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_rows, setup_database};

    fn record(price: f64, suburb: &str) -> ProcessedRecord {
        ProcessedRecord {
            price,
            date_sold: None,
            suburb: suburb.to_string(),
            num_bath: Some(1),
            num_bed: Some(2),
            num_parking: Some(0),
            property_size: Some(80.0),
            property_type: "Unit".to_string(),
            km_from_cbd: Some(6.0),
            price_per_sqm: Some(price / 80.0),
            is_house: false,
            distance_category: Some(DistanceCategory::InnerSuburbs),
        }
    }

    fn setup() -> Session {
        let session = Session::open_in_memory().unwrap();
        setup_database(session.conn()).unwrap();
        session
    }

    #[test]
    fn test_load_replaces_contents() {
        let mut session = setup();

        let first = ProcessedBatch::from_records((0..25).map(|i| record(300_000.0 + i as f64, "Ryde")).collect()).unwrap();
        assert_eq!(load_to_processed(&mut session, &first, 10).unwrap(), 25);
        assert_eq!(count_rows(session.conn(), PROCESSED_TABLE).unwrap(), 25);

        let second = ProcessedBatch::from_records(vec![record(450_000.0, "Manly")]).unwrap();
        assert_eq!(load_to_processed(&mut session, &second, 1000).unwrap(), 1);
        assert_eq!(count_rows(session.conn(), PROCESSED_TABLE).unwrap(), 1);
    }

    #[test]
    fn test_failed_load_keeps_previous_contents() {
        let mut session = setup();
        let good = ProcessedBatch::from_records(vec![record(500_000.0, "Ryde"), record(510_000.0, "Ryde")]).unwrap();
        load_to_processed(&mut session, &good, 1000).unwrap();

        // Force the insert to fail after the delete has run
        session
            .conn()
            .execute_batch(
                "CREATE TRIGGER reject_manly BEFORE INSERT ON properties_processed
                 WHEN NEW.suburb = 'Manly'
                 BEGIN SELECT RAISE(ABORT, 'forced failure'); END;",
            )
            .unwrap();

        let bad = ProcessedBatch::from_records(vec![record(600_000.0, "Bondi"), record(700_000.0, "Manly")]).unwrap();
        let err = load_to_processed(&mut session, &bad, 1).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Load { .. })
        ));
        assert_eq!(count_rows(session.conn(), PROCESSED_TABLE).unwrap(), 2);

        let suburbs: Vec<String> = session
            .conn()
            .prepare("SELECT DISTINCT suburb FROM properties_processed")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(suburbs, vec!["Ryde".to_string()]);
    }

    #[test]
    fn test_empty_batch_truncates() {
        let mut session = setup();
        let good = ProcessedBatch::from_records(vec![record(500_000.0, "Ryde")]).unwrap();
        load_to_processed(&mut session, &good, 1000).unwrap();

        let inserted = load_to_processed(&mut session, &ProcessedBatch::default(), 1000).unwrap();

        assert_eq!(inserted, 0);
        assert_eq!(count_rows(session.conn(), PROCESSED_TABLE).unwrap(), 0);
    }

    #[test]
    fn test_export_round_trip() {
        let mut session = setup();
        let mut first = record(500_000.0, "Ryde");
        first.date_sold = chrono::NaiveDate::from_ymd_opt(2022, 11, 5);
        let mut second = record(900_000.0, "Manly");
        second.km_from_cbd = None;
        second.distance_category = None;
        second.is_house = true;
        let batch = ProcessedBatch::from_records(vec![first.clone(), second.clone()]).unwrap();
        load_to_processed(&mut session, &batch, 1000).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = export_processed_csv(session.conn(), dir.path()).unwrap();
        assert!(path.ends_with(LATEST_EXPORT_FILENAME));

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let reloaded: Vec<ProcessedRecord> = rdr.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(reloaded, vec![first, second]);
    }
}
