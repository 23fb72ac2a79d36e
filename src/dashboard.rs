// Dashboard data layer
// Reads the processed-table export and turns a filter selection into chart-ready data.
// Rendering lives in the web page served by the property-dashboard binary.

use crate::models::{DistanceCategory, ProcessedRecord};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{error, info};

pub const ALL: &str = "All";
pub const HISTOGRAM_BINS: usize = 50;
pub const TOP_SUBURBS: usize = 10;

// ============================================================================
// DATA
// ============================================================================

/// Dashboard dataset; `error` is shown as a banner above empty charts
#[derive(Debug, Clone, Default)]
pub struct DashboardData {
    pub records: Vec<ProcessedRecord>,
    pub error: Option<String>,
}

/// Never fails: a missing or unreadable file yields empty data plus a banner message
pub fn load_dashboard_data(path: &Path) -> DashboardData {
    if !path.exists() {
        error!("Dashboard data file not found: {}", path.display());
        return DashboardData {
            records: Vec::new(),
            error: Some("Data file not found. Please check the data directory.".to_string()),
        };
    }

    let read = || -> anyhow::Result<Vec<ProcessedRecord>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let records = rdr.deserialize().collect::<Result<Vec<ProcessedRecord>, _>>()?;
        Ok(records)
    };

    match read() {
        Ok(records) => {
            info!("Loaded {} dashboard records from {}", records.len(), path.display());
            DashboardData { records, error: None }
        }
        Err(e) => {
            error!("Error loading dashboard data: {:#}", e);
            DashboardData {
                records: Vec::new(),
                error: Some(format!("Error loading data: {}", e)),
            }
        }
    }
}

// ============================================================================
// FILTER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardFilter {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    #[serde(rename = "type")]
    pub property_type: String,
    pub distance: String,
}

impl Default for DashboardFilter {
    fn default() -> Self {
        DashboardFilter {
            min_price: None,
            max_price: None,
            property_type: ALL.to_string(),
            distance: ALL.to_string(),
        }
    }
}

impl DashboardFilter {
    pub fn matches(&self, r: &ProcessedRecord) -> bool {
        self.min_price.map_or(true, |min| r.price >= min)
            && self.max_price.map_or(true, |max| r.price <= max)
            && (self.property_type == ALL || r.property_type == self.property_type)
            && (self.distance == ALL
                || r.distance_category.is_some_and(|c| c.as_str() == self.distance))
    }

    pub fn apply<'a>(&self, records: &'a [ProcessedRecord]) -> Vec<&'a ProcessedRecord> {
        records.iter().filter(|r| self.matches(r)).collect()
    }
}

// ============================================================================
// VIEW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_properties: usize,
    /// filtered count minus full count; zero or negative
    pub filtered_delta: i64,
    pub avg_price: Option<f64>,
    pub avg_price_per_sqm: Option<f64>,
    pub suburbs: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelCount {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub km_from_cbd: f64,
    pub price: f64,
    pub is_house: bool,
    pub num_bed: Option<i64>,
    pub num_bath: Option<i64>,
    pub suburb: String,
    #[serde(rename = "type")]
    pub property_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuburbRow {
    pub suburb: String,
    pub count: usize,
    pub avg_price: f64,
    pub max_price: f64,
    pub avg_distance_km: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonBar {
    pub label: String,
    pub avg_price: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterOptions {
    pub types: Vec<String>,
    pub distances: Vec<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub banner: Option<String>,
    pub metrics: Metrics,
    pub histogram: Vec<HistogramBin>,
    pub distance_counts: Vec<LabelCount>,
    pub scatter: Vec<ScatterPoint>,
    pub top_suburbs: Vec<SuburbRow>,
    pub house_vs_apartment: Vec<ComparisonBar>,
    pub options: FilterOptions,
    pub dataset_size: usize,
    pub generated_at: String,
}

/// Everything the page draws for one filter selection
pub fn build_view(data: &DashboardData, filter: &DashboardFilter) -> DashboardView {
    let all = &data.records;
    let filtered = filter.apply(all);

    let banner = data.error.clone().or_else(|| {
        if !all.is_empty() && filtered.is_empty() {
            Some("No properties match the selected filters. Try adjusting the criteria.".to_string())
        } else {
            None
        }
    });

    DashboardView {
        banner,
        metrics: metrics(all.len(), &filtered),
        histogram: histogram(&filtered, HISTOGRAM_BINS),
        distance_counts: distance_counts(&filtered),
        scatter: scatter(&filtered),
        top_suburbs: suburb_table(&filtered, TOP_SUBURBS),
        house_vs_apartment: house_vs_apartment(&filtered),
        options: filter_options(all),
        dataset_size: all.len(),
        generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn metrics(total: usize, filtered: &[&ProcessedRecord]) -> Metrics {
    let suburbs: BTreeSet<&str> = filtered.iter().map(|r| r.suburb.as_str()).collect();
    Metrics {
        total_properties: filtered.len(),
        filtered_delta: filtered.len() as i64 - total as i64,
        avg_price: mean(filtered.iter().map(|r| r.price)),
        avg_price_per_sqm: mean(filtered.iter().filter_map(|r| r.price_per_sqm)),
        suburbs: suburbs.len(),
    }
}

/// Equal-width price bins between the filtered min and max
pub fn histogram(filtered: &[&ProcessedRecord], bins: usize) -> Vec<HistogramBin> {
    let prices: Vec<f64> = filtered.iter().map(|r| r.price).collect();
    let (Some(min), Some(max)) = (
        prices.iter().copied().reduce(f64::min),
        prices.iter().copied().reduce(f64::max),
    ) else {
        return Vec::new();
    };

    if min == max || bins <= 1 {
        return vec![HistogramBin {
            lower: min,
            upper: max,
            count: prices.len(),
        }];
    }

    let width = (max - min) / bins as f64;
    let mut counts = vec![0usize; bins];
    for price in &prices {
        let index = (((price - min) / width).floor() as usize).min(bins - 1);
        counts[index] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            lower: min + width * i as f64,
            upper: if i == bins - 1 { max } else { min + width * (i + 1) as f64 },
            count,
        })
        .collect()
}

/// Count per distance bucket, largest first; rows without a bucket are left out
pub fn distance_counts(filtered: &[&ProcessedRecord]) -> Vec<LabelCount> {
    let mut counts: HashMap<DistanceCategory, usize> = HashMap::new();
    for category in filtered.iter().filter_map(|r| r.distance_category) {
        *counts.entry(category).or_insert(0) += 1;
    }

    let mut slices: Vec<(DistanceCategory, usize)> = counts.into_iter().collect();
    slices.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.rank().cmp(&b.0.rank())));
    slices
        .into_iter()
        .map(|(category, count)| LabelCount {
            label: category.as_str().to_string(),
            count,
        })
        .collect()
}

pub fn scatter(filtered: &[&ProcessedRecord]) -> Vec<ScatterPoint> {
    filtered
        .iter()
        .filter_map(|r| {
            r.km_from_cbd.map(|km| ScatterPoint {
                km_from_cbd: km,
                price: r.price,
                is_house: r.is_house,
                num_bed: r.num_bed,
                num_bath: r.num_bath,
                suburb: r.suburb.clone(),
                property_type: r.property_type.clone(),
            })
        })
        .collect()
}

/// Per-suburb count, average and max price, average distance; highest average first
pub fn suburb_table(filtered: &[&ProcessedRecord], limit: usize) -> Vec<SuburbRow> {
    let mut groups: BTreeMap<&str, Vec<&ProcessedRecord>> = BTreeMap::new();
    for r in filtered {
        groups.entry(r.suburb.as_str()).or_default().push(r);
    }

    let mut rows: Vec<SuburbRow> = groups
        .into_iter()
        .map(|(suburb, sales)| SuburbRow {
            suburb: suburb.to_string(),
            count: sales.len(),
            avg_price: mean(sales.iter().map(|r| r.price)).map_or(0.0, round2),
            max_price: sales.iter().map(|r| r.price).fold(f64::MIN, f64::max),
            avg_distance_km: mean(sales.iter().filter_map(|r| r.km_from_cbd)).map(round2),
        })
        .collect();

    rows.sort_by(|a, b| b.avg_price.total_cmp(&a.avg_price));
    rows.truncate(limit);
    rows
}

/// Apartment bar first, then House; a side with no rows is omitted
pub fn house_vs_apartment(filtered: &[&ProcessedRecord]) -> Vec<ComparisonBar> {
    [(false, "Apartment"), (true, "House")]
        .into_iter()
        .filter_map(|(flag, label)| {
            let prices: Vec<f64> = filtered.iter().filter(|r| r.is_house == flag).map(|r| r.price).collect();
            mean(prices.iter().copied()).map(|avg_price| ComparisonBar {
                label: label.to_string(),
                avg_price,
                count: prices.len(),
            })
        })
        .collect()
}

/// Selector contents; each list starts with "All"
pub fn filter_options(all: &[ProcessedRecord]) -> FilterOptions {
    let types: BTreeSet<&str> = all.iter().map(|r| r.property_type.as_str()).collect();
    let present: BTreeSet<DistanceCategory> = all.iter().filter_map(|r| r.distance_category).collect();

    FilterOptions {
        types: std::iter::once(ALL)
            .chain(types)
            .map(str::to_string)
            .collect(),
        distances: std::iter::once(ALL.to_string())
            .chain(
                DistanceCategory::ALL
                    .iter()
                    .filter(|c| present.contains(*c))
                    .map(|c| c.as_str().to_string()),
            )
            .collect(),
        price_min: all.iter().map(|r| r.price).reduce(f64::min),
        price_max: all.iter().map(|r| r.price).reduce(f64::max),
    }
}
