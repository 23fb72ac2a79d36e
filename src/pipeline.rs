// Pipeline orchestration
// Four tasks in strict order, one shared session per run:
// load_raw_data -> run_etl_pipeline -> generate_summary -> notify_completion

use crate::analytics::{summary_stats, SummaryStats};
use crate::batch::ProcessedBatch;
use crate::config::Config;
use crate::db::{insert_event, load_csv_to_raw, Event, ImportMode, Session};
use crate::error::PipelineError;
use crate::load::{export_processed_csv, load_to_processed};
use crate::loader::{clean_data, explore_data, load_raw_data, save_processed_data, CleanStats};
use crate::quality::{run_quality_checks, QualityReport};
use crate::transform::{extract_from_raw, transform, TransformStats};
use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

pub const PIPELINE_ENTITY: &str = "pipeline_run";
pub const PIPELINE_COMPLETED: &str = "pipeline_completed";

// ============================================================================
// TASKS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Task {
    LoadRawData,
    RunEtl,
    GenerateSummary,
    Notify,
}

impl Task {
    pub const ALL: [Task; 4] = [Task::LoadRawData, Task::RunEtl, Task::GenerateSummary, Task::Notify];

    pub fn id(&self) -> &'static str {
        match self {
            Task::LoadRawData => "load_raw_data",
            Task::RunEtl => "run_etl_pipeline",
            Task::GenerateSummary => "generate_summary",
            Task::Notify => "notify_completion",
        }
    }
}

/// Retries after the first attempt, with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        RetryPolicy {
            retries: config.retries,
            delay: config.retry_delay(),
        }
    }

    pub fn none() -> Self {
        RetryPolicy {
            retries: 0,
            delay: Duration::ZERO,
        }
    }

    /// Run `f` until it succeeds or the retries are spent.
    /// Returns the last result and the number of attempts made.
    pub fn run<T, F>(&self, task: Task, mut f: F) -> (Result<T>, u32)
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 1;
        loop {
            match f() {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if attempt <= self.retries => {
                    warn!(
                        "Task {} failed (attempt {}/{}): {:#}",
                        task.id(),
                        attempt,
                        self.retries + 1,
                        e
                    );
                    if !self.delay.is_zero() {
                        info!("Retrying {} in {}s", task.id(), self.delay.as_secs());
                        thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task: Task,
    pub attempts: u32,
    pub succeeded: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RawLoadReport {
    pub source: PathBuf,
    pub snapshot: PathBuf,
    pub clean: CleanStats,
    pub imported: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EtlReport {
    pub transform: TransformStats,
    pub loaded: usize,
    pub quality: QualityReport,
    pub export: PathBuf,
}

/// Outcome of one full run
#[derive(Debug)]
pub struct PipelineRun {
    pub run_id: String,
    pub tasks: Vec<TaskReport>,
    pub raw: Option<RawLoadReport>,
    pub etl: Option<EtlReport>,
    pub summary: Option<SummaryStats>,
    pub error: Option<anyhow::Error>,
}

impl PipelineRun {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// The failing task's error, or the run itself
    pub fn into_result(mut self) -> Result<Self> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline<'a> {
    config: &'a Config,
    session: &'a mut Session,
    retry: RetryPolicy,
    run_id: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, session: &'a mut Session) -> Self {
        Pipeline {
            config,
            session,
            retry: RetryPolicy::from_config(config),
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Read, explore and clean the source CSV, snapshot it, then replace the raw table with it
    pub fn load_raw_data(&mut self) -> Result<RawLoadReport> {
        let source = self.config.raw_data_path();
        let records = load_raw_data(&source)?;

        let overview = explore_data(&records);
        info!("Dataset shape: {} rows x {} columns", overview.rows, overview.columns);

        let (cleaned, clean) = clean_data(records);
        let snapshot = save_processed_data(&cleaned, self.config.processed_dir(), None)?;
        let imported = load_csv_to_raw(self.session, &snapshot, self.config.page_size, ImportMode::Replace)?;

        Ok(RawLoadReport {
            source,
            snapshot,
            clean,
            imported,
        })
    }

    /// Extract, transform, load and check the processed table.
    /// Failed quality checks escalate to an error after the load has committed.
    pub fn run_etl(&mut self) -> Result<EtlReport> {
        info!("=== Starting ETL Pipeline ===");

        let extracted = extract_from_raw(self.session.conn())?;
        let (processed, transform_stats) = transform(extracted, self.config);
        let batch = ProcessedBatch::from_records(processed)?;
        let loaded = load_to_processed(self.session, &batch, self.config.page_size)?;

        let quality = run_quality_checks(self.session.conn())?;
        let export = export_processed_csv(self.session.conn(), self.config.processed_dir())?;

        if !quality.all_passed() {
            error!("ETL completed with quality failures: {}", quality.summary());
            return Err(PipelineError::QualityChecksFailed(quality.failed_count()).into());
        }

        info!("=== ETL Pipeline Completed Successfully ===");
        Ok(EtlReport {
            transform: transform_stats,
            loaded,
            quality,
            export,
        })
    }

    pub fn generate_summary(&mut self) -> Result<SummaryStats> {
        summary_stats(self.session.conn())
    }

    /// Log completion and record it in the audit trail
    pub fn notify(&mut self, summary: Option<&SummaryStats>) -> Result<()> {
        info!("Pipeline {} completed successfully!", self.run_id);

        let data = serde_json::json!({
            "tasks": Task::ALL.iter().map(|t| t.id()).collect::<Vec<_>>(),
            "summary": summary,
        });
        let event = Event::new(PIPELINE_COMPLETED, PIPELINE_ENTITY, &self.run_id, data, "property-pipeline");
        insert_event(self.session.conn(), &event)
    }

    /// Run every task in order; stops at the first task whose retries are exhausted
    pub fn run(mut self) -> PipelineRun {
        info!("Starting pipeline run {}", self.run_id);
        let retry = self.retry;

        let mut run = PipelineRun {
            run_id: self.run_id.clone(),
            tasks: Vec::with_capacity(Task::ALL.len()),
            raw: None,
            etl: None,
            summary: None,
            error: None,
        };

        for task in Task::ALL {
            let (outcome, attempts) = match task {
                Task::LoadRawData => {
                    let (r, n) = retry.run(task, || self.load_raw_data());
                    (r.map(|report| run.raw = Some(report)), n)
                }
                Task::RunEtl => {
                    let (r, n) = retry.run(task, || self.run_etl());
                    (r.map(|report| run.etl = Some(report)), n)
                }
                Task::GenerateSummary => {
                    let (r, n) = retry.run(task, || self.generate_summary());
                    (r.map(|stats| run.summary = Some(stats)), n)
                }
                Task::Notify => {
                    let summary = run.summary.clone();
                    retry.run(task, || self.notify(summary.as_ref()))
                }
            };

            match outcome {
                Ok(()) => run.tasks.push(TaskReport {
                    task,
                    attempts,
                    succeeded: true,
                    error: None,
                }),
                Err(e) => {
                    error!("Task {} failed after {} attempt(s): {:#}", task.id(), attempts, e);
                    run.tasks.push(TaskReport {
                        task,
                        attempts,
                        succeeded: false,
                        error: Some(format!("{:#}", e)),
                    });
                    run.error = Some(e);
                    break;
                }
            }
        }

        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_rows, get_events_for_entity, setup_database, PROCESSED_TABLE, RAW_TABLE};
    use crate::models::RawRecord;
    use std::cell::Cell;
    use std::fs;
    use std::path::Path;

    fn write_source(dir: &Path, rows: &[&str]) {
        fs::create_dir_all(dir).unwrap();
        let mut body = RawRecord::COLUMNS.join(",");
        for row in rows {
            body.push('\n');
            body.push_str(row);
        }
        body.push('\n');
        fs::write(dir.join("housing_data.csv"), body).unwrap();
    }

    fn config_in(root: &Path) -> Config {
        Config {
            db_path: root.join("property_data.db"),
            raw_data_dir: root.join("raw"),
            processed_data_dir: root.join("processed"),
            retries: 0,
            retry_delay_secs: 0,
            ..Config::default()
        }
    }

    const ROWS: [&str; 4] = [
        "500000,2021-03-15,Parramatta,1,2,,100,House,,,,,,,,,3.0",
        "50000,15/04/2021,Parramatta,1,1,1,50,Apartment,,,,,,,,,15.0",
        "2000000,,Ryde,2,4,2,,Townhouse,,,,,,,,,25.0",
        "2000000,,Ryde,2,4,2,,Townhouse,,,,,,,,,25.0",
    ];

    #[test]
    fn test_retry_policy_counts_attempts() {
        let calls = Cell::new(0);
        let policy = RetryPolicy {
            retries: 2,
            delay: Duration::ZERO,
        };

        let (result, attempts) = policy.run(Task::RunEtl, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                anyhow::bail!("transient")
            }
            Ok(calls.get())
        });

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts, 3);

        let (result, attempts) = RetryPolicy::none().run(Task::Notify, || -> Result<()> { anyhow::bail!("down") });
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_full_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        write_source(&config.raw_data_dir, &ROWS);

        let mut session = Session::open(&config.db_path).unwrap();
        setup_database(session.conn()).unwrap();

        let run = Pipeline::new(&config, &mut session).run();
        assert!(run.succeeded(), "{:?}", run.error);
        assert_eq!(run.tasks.len(), 4);
        assert!(run.tasks.iter().all(|t| t.succeeded && t.attempts == 1));

        let raw = run.raw.as_ref().unwrap();
        assert_eq!(raw.clean.duplicates_removed, 1);
        assert_eq!(raw.imported, 3);

        let etl = run.etl.as_ref().unwrap();
        assert_eq!(etl.transform.outliers_removed, 1);
        assert_eq!(etl.loaded, 2);
        assert!(etl.quality.all_passed());
        assert!(etl.export.exists());

        assert_eq!(run.summary.as_ref().unwrap().total_records, 2);

        let events = get_events_for_entity(session.conn(), PIPELINE_ENTITY, &run.run_id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, PIPELINE_COMPLETED);
    }

    #[test]
    fn test_rerun_replaces_raw_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        write_source(&config.raw_data_dir, &ROWS);

        let mut session = Session::open(&config.db_path).unwrap();
        setup_database(session.conn()).unwrap();

        Pipeline::new(&config, &mut session).run().into_result().unwrap();
        Pipeline::new(&config, &mut session).run().into_result().unwrap();

        assert_eq!(count_rows(session.conn(), RAW_TABLE).unwrap(), 3);
        assert_eq!(count_rows(session.conn(), PROCESSED_TABLE).unwrap(), 2);
    }

    #[test]
    fn test_missing_source_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let mut session = Session::open(&config.db_path).unwrap();
        setup_database(session.conn()).unwrap();

        let run = Pipeline::new(&config, &mut session).run();

        assert_eq!(run.tasks.len(), 1);
        assert_eq!(run.tasks[0].task, Task::LoadRawData);
        assert!(!run.tasks[0].succeeded);

        let err = run.into_result().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_quality_failure_escalates() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let mut session = Session::open(&config.db_path).unwrap();
        setup_database(session.conn()).unwrap();
        // Bypass the table's CHECK constraints so a bad row reaches the checks
        session
            .conn()
            .execute_batch(
                "DROP TABLE properties_processed;
                 CREATE TABLE properties_processed (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    price REAL, date_sold TEXT, suburb TEXT, num_bath INTEGER,
                    num_bed INTEGER, num_parking INTEGER, property_size REAL,
                    type TEXT, km_from_cbd REAL, price_per_sqm REAL,
                    is_house BOOLEAN, distance_category TEXT,
                    created_at TEXT DEFAULT CURRENT_TIMESTAMP
                 );
                 CREATE TRIGGER sneak_negative AFTER INSERT ON properties_processed
                 WHEN NEW.suburb = 'Ryde'
                 BEGIN UPDATE properties_processed SET km_from_cbd = -1 WHERE id = NEW.id; END;
                 INSERT INTO properties_raw (price, suburb, type, km_from_cbd)
                 VALUES (800000, 'Ryde', 'House', 12.0);",
            )
            .unwrap();

        let err = Pipeline::new(&config, &mut session).run_etl().unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::QualityChecksFailed(1))
        ));
        // The load itself committed
        assert_eq!(count_rows(session.conn(), PROCESSED_TABLE).unwrap(), 1);
    }
}
