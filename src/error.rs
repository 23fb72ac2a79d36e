// Pipeline error kinds
// Stages return anyhow::Result; these are raised where callers need to tell failures apart

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Failed to connect to database: {0}")]
    Connection(String),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Load into {table} failed, transaction rolled back: {message}")]
    Load { table: String, message: String },

    #[error("{0} data quality check(s) failed")]
    QualityChecksFailed(usize),

    #[error("No processed CSV files found in {}", .0.display())]
    NoProcessedFiles(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn load(table: &str, message: impl Into<String>) -> Self {
        PipelineError::Load {
            table: table.to_string(),
            message: message.into(),
        }
    }
}
