// Columnar batch of processed rows
// Validated once at build time; the load stage only decides how statements are shaped

use crate::error::PipelineError;
use crate::models::{DistanceCategory, ProcessedRecord};
use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::types::Value;
use std::ops::Range;

/// Insert column order of the processed table
pub const PROCESSED_COLUMNS: [&str; 12] = [
    "price",
    "date_sold",
    "suburb",
    "num_bath",
    "num_bed",
    "num_parking",
    "property_size",
    "type",
    "km_from_cbd",
    "price_per_sqm",
    "is_house",
    "distance_category",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedBatch {
    price: Vec<f64>,
    date_sold: Vec<Option<NaiveDate>>,
    suburb: Vec<String>,
    num_bath: Vec<Option<i64>>,
    num_bed: Vec<Option<i64>>,
    num_parking: Vec<Option<i64>>,
    property_size: Vec<Option<f64>>,
    property_type: Vec<String>,
    km_from_cbd: Vec<Option<f64>>,
    price_per_sqm: Vec<Option<f64>>,
    is_house: Vec<bool>,
    distance_category: Vec<Option<DistanceCategory>>,
}

impl ProcessedBatch {
    /// Build from records, rejecting the whole batch on the first row that
    /// would violate the processed table's constraints
    pub fn from_records(records: Vec<ProcessedRecord>) -> Result<Self> {
        let mut batch = ProcessedBatch::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            validate(index, &record)?;
            batch.push(record);
        }
        Ok(batch)
    }

    fn with_capacity(n: usize) -> Self {
        ProcessedBatch {
            price: Vec::with_capacity(n),
            date_sold: Vec::with_capacity(n),
            suburb: Vec::with_capacity(n),
            num_bath: Vec::with_capacity(n),
            num_bed: Vec::with_capacity(n),
            num_parking: Vec::with_capacity(n),
            property_size: Vec::with_capacity(n),
            property_type: Vec::with_capacity(n),
            km_from_cbd: Vec::with_capacity(n),
            price_per_sqm: Vec::with_capacity(n),
            is_house: Vec::with_capacity(n),
            distance_category: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, r: ProcessedRecord) {
        self.price.push(r.price);
        self.date_sold.push(r.date_sold);
        self.suburb.push(r.suburb);
        self.num_bath.push(r.num_bath);
        self.num_bed.push(r.num_bed);
        self.num_parking.push(r.num_parking);
        self.property_size.push(r.property_size);
        self.property_type.push(r.property_type);
        self.km_from_cbd.push(r.km_from_cbd);
        self.price_per_sqm.push(r.price_per_sqm);
        self.is_house.push(r.is_house);
        self.distance_category.push(r.distance_category);
    }

    pub fn len(&self) -> usize {
        self.price.len()
    }

    pub fn is_empty(&self) -> bool {
        self.price.is_empty()
    }

    /// SQL values of row `i` in PROCESSED_COLUMNS order
    pub fn row_values(&self, i: usize) -> Vec<Value> {
        vec![
            Value::Real(self.price[i]),
            self.date_sold[i]
                .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null),
            Value::Text(self.suburb[i].clone()),
            int_or_null(self.num_bath[i]),
            int_or_null(self.num_bed[i]),
            int_or_null(self.num_parking[i]),
            real_or_null(self.property_size[i]),
            Value::Text(self.property_type[i].clone()),
            real_or_null(self.km_from_cbd[i]),
            real_or_null(self.price_per_sqm[i]),
            Value::Integer(self.is_house[i] as i64),
            self.distance_category[i]
                .map(|c| Value::Text(c.as_str().to_string()))
                .unwrap_or(Value::Null),
        ]
    }

    /// Every row's values, in order
    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.len()).map(move |i| self.row_values(i))
    }

    /// Consecutive row ranges of at most `page_size` rows
    pub fn pages(&self, page_size: usize) -> impl Iterator<Item = Range<usize>> {
        let len = self.len();
        let step = page_size.max(1);
        (0..len).step_by(step).map(move |start| start..(start + step).min(len))
    }
}

fn int_or_null(v: Option<i64>) -> Value {
    v.map(Value::Integer).unwrap_or(Value::Null)
}

fn real_or_null(v: Option<f64>) -> Value {
    v.map(Value::Real).unwrap_or(Value::Null)
}

fn validate(index: usize, r: &ProcessedRecord) -> Result<()> {
    let problem = if !r.price.is_finite() || r.price <= 0.0 {
        Some(format!("price must be positive, got {}", r.price))
    } else if r.km_from_cbd.is_some_and(|km| km.is_nan() || km < 0.0) {
        Some(format!("km_from_cbd must be >= 0, got {:?}", r.km_from_cbd))
    } else if r.suburb.trim().is_empty() {
        Some("suburb is empty".to_string())
    } else if r.property_type.trim().is_empty() {
        Some("type is empty".to_string())
    } else {
        None
    };

    match problem {
        Some(message) => Err(PipelineError::Transform(format!("row {}: {}", index, message)).into()),
        None => Ok(()),
    }
}
