// Read-only reporting over the property tables
// Every function here only SELECTs; rendering helpers format results as text tables

use anyhow::Result;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use tracing::info;

// ============================================================================
// REPORT ROWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistanceStats {
    pub distance_category: String,
    pub num_properties: i64,
    pub avg_price: f64,
    pub avg_price_per_sqm: Option<f64>,
    pub avg_bedrooms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStats {
    pub property_category: String,
    pub count: i64,
    pub avg_price: f64,
    pub avg_price_per_sqm: Option<f64>,
    pub avg_bedrooms: Option<f64>,
    pub avg_bathrooms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuburbValue {
    pub suburb: String,
    pub num_properties: i64,
    pub avg_price: f64,
    pub avg_price_per_sqm: f64,
    pub avg_distance_cbd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuburbPrice {
    pub suburb: String,
    pub num_properties: i64,
    pub avg_price: f64,
    pub max_price: f64,
    pub avg_distance_cbd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    pub total_records: i64,
    pub unique_suburbs: i64,
    pub unique_types: i64,
    pub avg_price: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub avg_bedrooms: Option<f64>,
    pub avg_price_per_sqm: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeCount {
    pub property_type: String,
    pub count: i64,
    pub avg_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistanceRange {
    pub distance_range: String,
    pub num_properties: i64,
    pub avg_price: f64,
}

// ============================================================================
// PROCESSED TABLE REPORTS
// ============================================================================

/// Per distance bucket, in bucket order; rows without a bucket are excluded
pub fn price_by_distance(conn: &Connection) -> Result<Vec<DistanceStats>> {
    info!("=== Price Analysis by Distance from CBD ===");
    query_all(
        conn,
        "SELECT distance_category,
                COUNT(*),
                ROUND(AVG(price), 2),
                ROUND(AVG(price_per_sqm), 2),
                ROUND(AVG(num_bed), 1)
         FROM properties_processed
         WHERE distance_category IS NOT NULL
         GROUP BY distance_category
         ORDER BY CASE distance_category
                    WHEN 'Inner City' THEN 1
                    WHEN 'Inner Suburbs' THEN 2
                    WHEN 'Middle Suburbs' THEN 3
                    WHEN 'Outer Suburbs' THEN 4
                  END",
        [],
        |row| {
            Ok(DistanceStats {
                distance_category: row.get(0)?,
                num_properties: row.get(1)?,
                avg_price: row.get(2)?,
                avg_price_per_sqm: row.get(3)?,
                avg_bedrooms: row.get(4)?,
            })
        },
    )
}

/// Houses first, then apartments
pub fn house_vs_apartment(conn: &Connection) -> Result<Vec<CategoryStats>> {
    info!("=== House vs Apartment ===");
    query_all(
        conn,
        "SELECT CASE WHEN is_house THEN 'House' ELSE 'Apartment' END,
                COUNT(*),
                ROUND(AVG(price), 2),
                ROUND(AVG(price_per_sqm), 2),
                ROUND(AVG(num_bed), 1),
                ROUND(AVG(num_bath), 1)
         FROM properties_processed
         GROUP BY is_house
         ORDER BY is_house DESC",
        [],
        |row| {
            Ok(CategoryStats {
                property_category: row.get(0)?,
                count: row.get(1)?,
                avg_price: row.get(2)?,
                avg_price_per_sqm: row.get(3)?,
                avg_bedrooms: row.get(4)?,
                avg_bathrooms: row.get(5)?,
            })
        },
    )
}

/// Cheapest suburbs per square metre among those with at least `min_group` priced rows
pub fn top_suburbs_by_value(conn: &Connection, min_group: i64) -> Result<Vec<SuburbValue>> {
    info!("=== Top 10 Suburbs by Value (Price/SqM) ===");
    query_all(
        conn,
        "SELECT suburb,
                COUNT(*),
                ROUND(AVG(price), 2),
                ROUND(AVG(price_per_sqm), 2),
                ROUND(AVG(km_from_cbd), 1)
         FROM properties_processed
         WHERE price_per_sqm IS NOT NULL
         GROUP BY suburb
         HAVING COUNT(*) >= ?1
         ORDER BY AVG(price_per_sqm) ASC
         LIMIT 10",
        params![min_group],
        |row| {
            Ok(SuburbValue {
                suburb: row.get(0)?,
                num_properties: row.get(1)?,
                avg_price: row.get(2)?,
                avg_price_per_sqm: row.get(3)?,
                avg_distance_cbd: row.get(4)?,
            })
        },
    )
}

/// Highest average price among suburbs with at least `min_group` sales
pub fn most_expensive_suburbs(conn: &Connection, min_group: i64) -> Result<Vec<SuburbPrice>> {
    info!("=== Top 10 Most Expensive Suburbs ===");
    query_all(
        conn,
        "SELECT suburb,
                COUNT(*),
                ROUND(AVG(price), 2),
                ROUND(MAX(price), 2),
                ROUND(AVG(km_from_cbd), 1)
         FROM properties_processed
         GROUP BY suburb
         HAVING COUNT(*) >= ?1
         ORDER BY AVG(price) DESC
         LIMIT 10",
        params![min_group],
        |row| {
            Ok(SuburbPrice {
                suburb: row.get(0)?,
                num_properties: row.get(1)?,
                avg_price: row.get(2)?,
                max_price: row.get(3)?,
                avg_distance_cbd: row.get(4)?,
            })
        },
    )
}

pub fn summary_stats(conn: &Connection) -> Result<SummaryStats> {
    let stats = conn.query_row(
        "SELECT COUNT(*),
                COUNT(DISTINCT suburb),
                COUNT(DISTINCT type),
                ROUND(AVG(price), 2),
                ROUND(MIN(price), 2),
                ROUND(MAX(price), 2),
                ROUND(AVG(num_bed), 1),
                ROUND(AVG(price_per_sqm), 2)
         FROM properties_processed",
        [],
        |row| {
            Ok(SummaryStats {
                total_records: row.get(0)?,
                unique_suburbs: row.get(1)?,
                unique_types: row.get(2)?,
                avg_price: row.get(3)?,
                min_price: row.get(4)?,
                max_price: row.get(5)?,
                avg_bedrooms: row.get(6)?,
                avg_price_per_sqm: row.get(7)?,
            })
        },
    )?;

    info!("=== Summary Statistics ===");
    info!("Total records: {}", stats.total_records);
    info!("Unique suburbs: {}", stats.unique_suburbs);
    info!("Property types: {}", stats.unique_types);
    info!("Average price: {}", money(stats.avg_price));
    info!("Price range: {} - {}", money(stats.min_price), money(stats.max_price));
    info!("Average bedrooms: {}", decimal(stats.avg_bedrooms, 1));
    info!("Average price/sqm: {}", money(stats.avg_price_per_sqm));

    Ok(stats)
}

// ============================================================================
// RAW TABLE EXPLORATION
// ============================================================================

/// Highest average price per suburb over the raw table, no group-size floor
pub fn raw_expensive_suburbs(conn: &Connection) -> Result<Vec<SuburbPrice>> {
    info!("=== Top 10 Most Expensive Suburbs (raw) ===");
    query_all(
        conn,
        "SELECT suburb, COUNT(*), AVG(price), MAX(price), AVG(km_from_cbd)
         FROM properties_raw
         WHERE price IS NOT NULL AND suburb IS NOT NULL
         GROUP BY suburb
         ORDER BY AVG(price) DESC
         LIMIT 10",
        [],
        |row| {
            Ok(SuburbPrice {
                suburb: row.get(0)?,
                num_properties: row.get(1)?,
                avg_price: row.get(2)?,
                max_price: row.get(3)?,
                avg_distance_cbd: row.get(4)?,
            })
        },
    )
}

pub fn raw_properties_by_type(conn: &Connection) -> Result<Vec<TypeCount>> {
    info!("=== Properties by Type (raw) ===");
    query_all(
        conn,
        "SELECT type, COUNT(*), AVG(price)
         FROM properties_raw
         WHERE price IS NOT NULL AND type IS NOT NULL
         GROUP BY type
         ORDER BY COUNT(*) DESC, type",
        [],
        |row| {
            Ok(TypeCount {
                property_type: row.get(0)?,
                count: row.get(1)?,
                avg_price: row.get(2)?,
            })
        },
    )
}

pub fn raw_price_by_distance_range(conn: &Connection) -> Result<Vec<DistanceRange>> {
    info!("=== Average Price by Distance from CBD (raw) ===");
    query_all(
        conn,
        "SELECT distance_range, COUNT(*), AVG(price)
         FROM (
            SELECT CASE
                     WHEN km_from_cbd < 5 THEN '0-5km'
                     WHEN km_from_cbd < 10 THEN '5-10km'
                     WHEN km_from_cbd < 20 THEN '10-20km'
                     ELSE '20km+'
                   END AS distance_range,
                   price
            FROM properties_raw
            WHERE price IS NOT NULL AND km_from_cbd IS NOT NULL
         )
         GROUP BY distance_range
         ORDER BY CASE distance_range
                    WHEN '0-5km' THEN 1
                    WHEN '5-10km' THEN 2
                    WHEN '10-20km' THEN 3
                    ELSE 4
                  END",
        [],
        |row| {
            Ok(DistanceRange {
                distance_range: row.get(0)?,
                num_properties: row.get(1)?,
                avg_price: row.get(2)?,
            })
        },
    )
}

fn query_all<T, P, F>(conn: &Connection, sql: &str, params: P, f: F) -> Result<Vec<T>>
where
    P: rusqlite::Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, f)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============================================================================
// TEXT RENDERING
// ============================================================================

/// A report row that can be printed as one line of a text table
pub trait TableRow {
    fn headers() -> Vec<&'static str>;
    fn cells(&self) -> Vec<String>;
}

impl TableRow for DistanceStats {
    fn headers() -> Vec<&'static str> {
        vec!["distance_category", "num_properties", "avg_price", "avg_price_per_sqm", "avg_bedrooms"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.distance_category.clone(),
            self.num_properties.to_string(),
            money(Some(self.avg_price)),
            money(self.avg_price_per_sqm),
            decimal(self.avg_bedrooms, 1),
        ]
    }
}

impl TableRow for CategoryStats {
    fn headers() -> Vec<&'static str> {
        vec!["property_category", "count", "avg_price", "avg_price_per_sqm", "avg_bedrooms", "avg_bathrooms"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.property_category.clone(),
            self.count.to_string(),
            money(Some(self.avg_price)),
            money(self.avg_price_per_sqm),
            decimal(self.avg_bedrooms, 1),
            decimal(self.avg_bathrooms, 1),
        ]
    }
}

impl TableRow for SuburbValue {
    fn headers() -> Vec<&'static str> {
        vec!["suburb", "num_properties", "avg_price", "avg_price_per_sqm", "avg_distance_cbd"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.suburb.clone(),
            self.num_properties.to_string(),
            money(Some(self.avg_price)),
            money(Some(self.avg_price_per_sqm)),
            decimal(self.avg_distance_cbd, 1),
        ]
    }
}

impl TableRow for SuburbPrice {
    fn headers() -> Vec<&'static str> {
        vec!["suburb", "num_properties", "avg_price", "max_price", "avg_distance_cbd"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.suburb.clone(),
            self.num_properties.to_string(),
            money(Some(self.avg_price)),
            money(Some(self.max_price)),
            decimal(self.avg_distance_cbd, 1),
        ]
    }
}

impl TableRow for TypeCount {
    fn headers() -> Vec<&'static str> {
        vec!["type", "count", "avg_price"]
    }

    fn cells(&self) -> Vec<String> {
        vec![self.property_type.clone(), self.count.to_string(), money(Some(self.avg_price))]
    }
}

impl TableRow for DistanceRange {
    fn headers() -> Vec<&'static str> {
        vec!["distance_range", "num_properties", "avg_price"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.distance_range.clone(),
            self.num_properties.to_string(),
            money(Some(self.avg_price)),
        ]
    }
}

/// Left-aligned first column, right-aligned numbers
pub fn render_table<T: TableRow>(rows: &[T]) -> String {
    let headers = T::headers();
    let cells: Vec<Vec<String>> = rows.iter().map(|r| r.cells()).collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(h.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let format_line = |values: Vec<String>| -> String {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                if i == 0 {
                    format!("{:<width$}", v, width = widths[i])
                } else {
                    format!("{:>width$}", v, width = widths[i])
                }
            })
            .collect::<Vec<_>>()
            .join("  ")
    };

    let mut out = format_line(headers.iter().map(|h| h.to_string()).collect());
    for row in cells {
        out.push('\n');
        out.push_str(&format_line(row));
    }
    if rows.is_empty() {
        out.push_str("\n(no rows)");
    }
    out
}

/// "$1,234,567.89", or "N/A" for missing values
pub fn money(value: Option<f64>) -> String {
    match value {
        Some(v) => {
            let negative = v < 0.0;
            let fixed = format!("{:.2}", v.abs());
            let (whole, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
            let mut grouped = String::new();
            for (i, ch) in whole.chars().enumerate() {
                if i > 0 && (whole.len() - i) % 3 == 0 {
                    grouped.push(',');
                }
                grouped.push(ch);
            }
            format!("{}${}.{}", if negative { "-" } else { "" }, grouped, frac)
        }
        None => "N/A".to_string(),
    }
}

fn decimal(value: Option<f64>, places: usize) -> String {
    value
        .map(|v| format!("{:.*}", places, v))
        .unwrap_or_else(|| "N/A".to_string())
}
