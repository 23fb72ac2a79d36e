// Property sale records
// Raw rows as ingested from CSV, source rows extracted from the raw table,
// and processed rows ready for the processed table

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ============================================================================
// DISTANCE CATEGORY
// ============================================================================

/// Ordered buckets of straight-line distance from the CBD
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DistanceCategory {
    #[serde(rename = "Inner City")]
    InnerCity,
    #[serde(rename = "Inner Suburbs")]
    InnerSuburbs,
    #[serde(rename = "Middle Suburbs")]
    MiddleSuburbs,
    #[serde(rename = "Outer Suburbs")]
    OuterSuburbs,
}

impl DistanceCategory {
    pub const ALL: [DistanceCategory; 4] = [
        DistanceCategory::InnerCity,
        DistanceCategory::InnerSuburbs,
        DistanceCategory::MiddleSuburbs,
        DistanceCategory::OuterSuburbs,
    ];

    /// Bucket a distance; thresholds are inclusive-low, exclusive-high
    pub fn from_km(km: Option<f64>) -> Option<Self> {
        let km = km?;
        if km.is_nan() {
            return None;
        }
        Some(if km < 5.0 {
            DistanceCategory::InnerCity
        } else if km < 10.0 {
            DistanceCategory::InnerSuburbs
        } else if km < 20.0 {
            DistanceCategory::MiddleSuburbs
        } else {
            DistanceCategory::OuterSuburbs
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceCategory::InnerCity => "Inner City",
            DistanceCategory::InnerSuburbs => "Inner Suburbs",
            DistanceCategory::MiddleSuburbs => "Middle Suburbs",
            DistanceCategory::OuterSuburbs => "Outer Suburbs",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == label)
    }

    /// 1-based position used for report ordering
    pub fn rank(&self) -> u8 {
        *self as u8 + 1
    }
}

impl fmt::Display for DistanceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RAW RECORD (one CSV row)
// ============================================================================

/// One observed sale as it appears in the source CSV
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "non_empty")]
    pub date_sold: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub suburb: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub num_bath: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub num_bed: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub num_parking: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub property_size: Option<f64>,
    #[serde(rename = "type", default, deserialize_with = "non_empty")]
    pub property_type: Option<String>,

    // Suburb demographics and macro indicators: loaded, not used downstream
    #[serde(default, deserialize_with = "lenient_i64")]
    pub suburb_population: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub suburb_median_income: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub suburb_sqkm: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub suburb_lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub suburb_lng: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub suburb_elevation: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub cash_rate: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub property_inflation_index: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64")]
    pub km_from_cbd: Option<f64>,
}

impl RawRecord {
    /// Column names in CSV / raw table order
    pub const COLUMNS: [&'static str; 17] = [
        "price",
        "date_sold",
        "suburb",
        "num_bath",
        "num_bed",
        "num_parking",
        "property_size",
        "type",
        "suburb_population",
        "suburb_median_income",
        "suburb_sqkm",
        "suburb_lat",
        "suburb_lng",
        "suburb_elevation",
        "cash_rate",
        "property_inflation_index",
        "km_from_cbd",
    ];

    /// SHA-256 over every field; identical rows share a fingerprint
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{:?}", self));
        format!("{:x}", hasher.finalize())
    }

    /// Mandatory fields for a row to survive cleaning
    pub fn has_required_fields(&self) -> bool {
        self.price.is_some()
            && self.suburb.is_some()
            && self.property_type.is_some()
            && self.km_from_cbd.is_some()
    }

    /// Per-column null flags, in COLUMNS order
    pub fn missing_flags(&self) -> [bool; 17] {
        [
            self.price.is_none(),
            self.date_sold.is_none(),
            self.suburb.is_none(),
            self.num_bath.is_none(),
            self.num_bed.is_none(),
            self.num_parking.is_none(),
            self.property_size.is_none(),
            self.property_type.is_none(),
            self.suburb_population.is_none(),
            self.suburb_median_income.is_none(),
            self.suburb_sqkm.is_none(),
            self.suburb_lat.is_none(),
            self.suburb_lng.is_none(),
            self.suburb_elevation.is_none(),
            self.cash_rate.is_none(),
            self.property_inflation_index.is_none(),
            self.km_from_cbd.is_none(),
        ]
    }
}

// ============================================================================
// SOURCE RECORD (extracted from properties_raw)
// ============================================================================

/// Row selected from the raw table for transformation.
/// price, suburb and type are guaranteed by the extraction filter.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub price: f64,
    pub date_sold: Option<NaiveDate>,
    pub suburb: String,
    pub num_bath: Option<i64>,
    pub num_bed: Option<i64>,
    pub num_parking: Option<i64>,
    pub property_size: Option<f64>,
    pub property_type: String,
    pub km_from_cbd: Option<f64>,
}

impl SourceRecord {
    pub fn new(price: f64, suburb: &str, property_type: &str, km_from_cbd: Option<f64>) -> Self {
        SourceRecord {
            price,
            date_sold: None,
            suburb: suburb.to_string(),
            num_bath: None,
            num_bed: None,
            num_parking: None,
            property_size: None,
            property_type: property_type.to_string(),
            km_from_cbd,
        }
    }

    /// Builder pattern: add property size
    pub fn with_size(mut self, size: Option<f64>) -> Self {
        self.property_size = size;
        self
    }

    /// Builder pattern: add room counts
    pub fn with_rooms(mut self, bed: Option<i64>, bath: Option<i64>, parking: Option<i64>) -> Self {
        self.num_bed = bed;
        self.num_bath = bath;
        self.num_parking = parking;
        self
    }

    /// Builder pattern: add sale date
    pub fn with_date(mut self, date: Option<NaiveDate>) -> Self {
        self.date_sold = date;
        self
    }
}

// ============================================================================
// PROCESSED RECORD
// ============================================================================

/// One retained sale after derived-field computation and outlier rejection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub price: f64,
    pub date_sold: Option<NaiveDate>,
    pub suburb: String,
    pub num_bath: Option<i64>,
    pub num_bed: Option<i64>,
    pub num_parking: Option<i64>,
    pub property_size: Option<f64>,
    #[serde(rename = "type")]
    pub property_type: String,
    pub km_from_cbd: Option<f64>,
    pub price_per_sqm: Option<f64>,
    pub is_house: bool,
    pub distance_category: Option<DistanceCategory>,
}

// ============================================================================
// LENIENT CSV FIELD PARSING
// ============================================================================

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !is_null_marker(s)))
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(non_empty(deserializer)?.and_then(|s| parse_f64(&s)))
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(non_empty(deserializer)?.and_then(|s| parse_i64(&s)))
}

fn is_null_marker(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "nan" | "null" | "none" | "na")
}

/// Parse a number, tolerating thousands separators and a leading '$'
pub fn parse_f64(s: &str) -> Option<f64> {
    let cleaned: String = s
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse an integer count; "2.0" (pandas float export) is accepted, "2.5" is not
pub fn parse_i64(s: &str) -> Option<i64> {
    if let Ok(v) = s.trim().parse::<i64>() {
        return Some(v);
    }
    parse_f64(s).filter(|v| v.fract() == 0.0).map(|v| v as i64)
}
