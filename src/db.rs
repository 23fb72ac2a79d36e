use crate::error::PipelineError;
use crate::loader::read_raw_csv;
use crate::models::RawRecord;
use crate::transform::parse_date;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const RAW_TABLE: &str = "properties_raw";
pub const PROCESSED_TABLE: &str = "properties_processed";
pub const EVENTS_TABLE: &str = "events";

/// SQLITE_MAX_VARIABLE_NUMBER for the bundled library
const MAX_BIND_PARAMS: usize = 32_766;

// ============================================================================
// SESSION (one connection per pipeline run)
// ============================================================================

/// Owned database connection shared by every stage of a run.
/// Dropping the session closes the connection.
pub struct Session {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Session {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PipelineError::Connection(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        let conn = Connection::open(path).map_err(|e| {
            error!("Failed to connect to database {}: {}", path.display(), e);
            PipelineError::Connection(format!("{}: {}", path.display(), e))
        })?;

        info!("Successfully connected to database {}", path.display());
        Ok(Session {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PipelineError::Connection(e.to_string()))?;
        Ok(Session { conn, path: None })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Scoped transaction; rolls back on drop unless committed
    pub fn transaction(&mut self) -> Result<rusqlite::Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| anyhow::Error::new(e).context("Failed to close database connection"))?;
        info!("Database connection closed");
        Ok(())
    }
}

/// Open a session for the duration of `f`; the connection is closed on every exit path
pub fn with_session<T, F>(path: &Path, f: F) -> Result<T>
where
    F: FnOnce(&mut Session) -> Result<T>,
{
    let mut session = Session::open(path)?;
    let result = f(&mut session);
    if let Err(e) = session.close() {
        warn!("{:#}", e);
    }
    result
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS properties_raw (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            price REAL,
            date_sold TEXT,
            suburb TEXT,
            num_bath INTEGER,
            num_bed INTEGER,
            num_parking INTEGER,
            property_size REAL,
            type TEXT,
            suburb_population INTEGER,
            suburb_median_income REAL,
            suburb_sqkm REAL,
            suburb_lat REAL,
            suburb_lng REAL,
            suburb_elevation REAL,
            cash_rate REAL,
            property_inflation_index REAL,
            km_from_cbd REAL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS properties_processed (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            price REAL NOT NULL,
            date_sold TEXT,
            suburb TEXT NOT NULL,
            num_bath INTEGER,
            num_bed INTEGER,
            num_parking INTEGER,
            property_size REAL,
            type TEXT NOT NULL,
            km_from_cbd REAL,
            price_per_sqm REAL,
            is_house INTEGER,
            distance_category TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            CONSTRAINT valid_price CHECK (price > 0),
            CONSTRAINT valid_distance CHECK (km_from_cbd >= 0)
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_suburb ON properties_processed(suburb);
        CREATE INDEX IF NOT EXISTS idx_type ON properties_processed(type);
        CREATE INDEX IF NOT EXISTS idx_price ON properties_processed(price);
        CREATE INDEX IF NOT EXISTS idx_date ON properties_processed(date_sold);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);",
    )
    .context("Failed to create tables")?;

    info!("Tables '{}' and '{}' ready with indexes", RAW_TABLE, PROCESSED_TABLE);
    Ok(())
}

/// List user tables
pub fn check_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;

    let tables = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    info!("Tables in database: {:?}", tables);
    Ok(tables)
}

pub fn drop_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS properties_raw;
         DROP TABLE IF EXISTS properties_processed;",
    )
    .context("Failed to drop tables")?;
    warn!("All property tables dropped");
    Ok(())
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

// ============================================================================
// MULTI-ROW INSERT
// ============================================================================

/// Rows per statement, capped so one statement never exceeds the bind limit
pub fn effective_page_size(page_size: usize, column_count: usize) -> usize {
    let cap = (MAX_BIND_PARAMS / column_count.max(1)).max(1);
    page_size.clamp(1, cap)
}

/// Insert `rows` into `table` with `INSERT ... VALUES (..), (..)` statements of
/// up to `page_size` rows each. Runs on whatever connection or transaction is passed.
pub fn insert_rows<I>(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    rows: I,
    page_size: usize,
) -> Result<usize>
where
    I: IntoIterator<Item = Vec<Value>>,
{
    let page_size = effective_page_size(page_size, columns.len());
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    let head = format!("INSERT INTO {} ({}) VALUES ", table, columns.join(", "));

    let mut inserted = 0;
    let mut page: Vec<Value> = Vec::with_capacity(page_size * columns.len());
    let mut page_rows = 0;

    let flush = |page: &mut Vec<Value>, page_rows: &mut usize| -> Result<usize> {
        if *page_rows == 0 {
            return Ok(0);
        }
        let sql = format!("{}{}", head, vec![placeholders.as_str(); *page_rows].join(", "));
        let n = conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(page.drain(..)))?;
        *page_rows = 0;
        Ok(n)
    };

    for row in rows {
        debug_assert_eq!(row.len(), columns.len());
        page.extend(row);
        page_rows += 1;
        if page_rows == page_size {
            inserted += flush(&mut page, &mut page_rows)?;
        }
    }
    inserted += flush(&mut page, &mut page_rows)?;

    Ok(inserted)
}

fn opt_real(v: Option<f64>) -> Value {
    v.map(Value::Real).unwrap_or(Value::Null)
}

fn opt_int(v: Option<i64>) -> Value {
    v.map(Value::Integer).unwrap_or(Value::Null)
}

fn opt_text(v: Option<String>) -> Value {
    v.map(Value::Text).unwrap_or(Value::Null)
}

// ============================================================================
// RAW TABLE IMPORT
// ============================================================================

/// Raw record as stored: date_sold normalised to ISO text or NULL
fn raw_row_values(record: RawRecord) -> Vec<Value> {
    let date_sold = record
        .date_sold
        .as_deref()
        .and_then(parse_date)
        .map(|d| d.format("%Y-%m-%d").to_string());

    vec![
        opt_real(record.price),
        opt_text(date_sold),
        opt_text(record.suburb),
        opt_int(record.num_bath),
        opt_int(record.num_bed),
        opt_int(record.num_parking),
        opt_real(record.property_size),
        opt_text(record.property_type),
        opt_int(record.suburb_population),
        opt_real(record.suburb_median_income),
        opt_real(record.suburb_sqkm),
        opt_real(record.suburb_lat),
        opt_real(record.suburb_lng),
        opt_real(record.suburb_elevation),
        opt_real(record.cash_rate),
        opt_real(record.property_inflation_index),
        opt_real(record.km_from_cbd),
    ]
}

/// Whether an import keeps existing raw rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Append,
    Replace,
}

/// Insert raw records in one transaction; any failure rolls back every row
pub fn insert_raw_records(
    session: &mut Session,
    records: Vec<RawRecord>,
    page_size: usize,
    mode: ImportMode,
) -> Result<usize> {
    let tx = session.transaction()?;
    let total = records.len();

    if mode == ImportMode::Replace {
        tx.execute("DELETE FROM properties_raw", [])
            .map_err(|e| PipelineError::load(RAW_TABLE, e.to_string()))?;
    }

    info!("Inserting {} rows into {}...", total, RAW_TABLE);
    let inserted = insert_rows(
        &tx,
        RAW_TABLE,
        &RawRecord::COLUMNS,
        records.into_iter().map(raw_row_values),
        page_size,
    )
    .map_err(|e| {
        error!("Error loading data into {}: {:#}", RAW_TABLE, e);
        PipelineError::load(RAW_TABLE, format!("{:#}", e))
    })?;

    tx.commit()
        .map_err(|e| PipelineError::load(RAW_TABLE, e.to_string()))?;

    info!("Successfully inserted {} rows into {}", inserted, RAW_TABLE);
    Ok(inserted)
}

/// Read a cleaned CSV and append its rows to the raw table
pub fn load_csv_to_raw(
    session: &mut Session,
    csv_path: &Path,
    page_size: usize,
    mode: ImportMode,
) -> Result<usize> {
    info!("Reading CSV from {}...", csv_path.display());
    let records = read_raw_csv(csv_path)?;
    info!("Loaded {} rows", records.len());
    insert_raw_records(session, records, page_size, mode)
}

#[derive(Debug, Clone, Serialize)]
pub struct RawSample {
    pub id: i64,
    pub price: Option<f64>,
    pub suburb: Option<String>,
    pub property_type: Option<String>,
    pub km_from_cbd: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RawTableStats {
    pub total_rows: i64,
    pub priced_rows: i64,
    pub avg_price: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub num_suburbs: i64,
    pub sample: Vec<RawSample>,
}

/// Row count, a five-row sample and price statistics of the raw table
pub fn verify_raw(conn: &Connection) -> Result<RawTableStats> {
    let total_rows = count_rows(conn, RAW_TABLE)?;
    info!("Total rows in {}: {}", RAW_TABLE, total_rows);

    let mut stmt = conn.prepare(
        "SELECT id, price, suburb, type, km_from_cbd FROM properties_raw ORDER BY id LIMIT 5",
    )?;
    let sample = stmt
        .query_map([], |row| {
            Ok(RawSample {
                id: row.get(0)?,
                price: row.get(1)?,
                suburb: row.get(2)?,
                property_type: row.get(3)?,
                km_from_cbd: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for row in &sample {
        info!("  {:?}", row);
    }

    let (priced_rows, avg_price, min_price, max_price, num_suburbs) = conn.query_row(
        "SELECT COUNT(*), AVG(price), MIN(price), MAX(price), COUNT(DISTINCT suburb)
         FROM properties_raw
         WHERE price IS NOT NULL",
        [],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<f64>>(1)?,
                row.get::<_, Option<f64>>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, i64>(4)?,
            ))
        },
    )?;

    info!("Basic statistics:");
    info!("  Total properties: {}", priced_rows);
    if let (Some(avg), Some(min), Some(max)) = (avg_price, min_price, max_price) {
        info!("  Average price: ${:.2}", avg);
        info!("  Min price: ${:.2}", min);
        info!("  Max price: ${:.2}", max);
    }
    info!("  Number of suburbs: {}", num_suburbs);

    Ok(RawTableStats {
        total_rows,
        priced_rows,
        avg_price,
        min_price,
        max_price,
        num_suburbs,
        sample,
    })
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Event for the audit trail
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}
