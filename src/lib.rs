// Sydney Property Pipeline - Core Library
// Exposes all modules for use in the CLI, the dashboard server, and tests

pub mod config;
pub mod error;
pub mod models;
pub mod db;
pub mod loader;     // CSV ingestion and cleaned snapshots
pub mod transform;  // Derived columns and outlier filter
pub mod batch;      // Columnar processed batch
pub mod load;       // Transactional truncate + bulk load
pub mod quality;    // Count-based quality checks
pub mod analytics;
pub mod pipeline;   // Four-task orchestration
pub mod dashboard;

// Re-export commonly used types
pub use config::Config;
pub use error::PipelineError;
pub use models::{DistanceCategory, ProcessedRecord, RawRecord, SourceRecord};
pub use db::{
    Session, ImportMode, Event, RawTableStats,
    with_session, setup_database, check_tables, drop_all_tables, count_rows,
    insert_raw_records, load_csv_to_raw, verify_raw,
    insert_event, get_events_for_entity,
};
pub use loader::{
    load_raw_data, explore_data, clean_data, save_processed_data, latest_processed_file,
    DataOverview, CleanStats,
};
pub use transform::{extract_from_raw, transform, filter_outliers, TransformStats};
pub use batch::ProcessedBatch;
pub use load::{load_to_processed, export_processed_csv};
pub use quality::{run_quality_checks, QualityCheck, QualityReport};
pub use analytics::{
    price_by_distance, house_vs_apartment, top_suburbs_by_value, most_expensive_suburbs,
    summary_stats, render_table, SummaryStats,
};
pub use pipeline::{Pipeline, PipelineRun, RetryPolicy, Task, TaskReport};
pub use dashboard::{load_dashboard_data, build_view, DashboardData, DashboardFilter, DashboardView};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
