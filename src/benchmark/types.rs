use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::classifier::SizeCategory;
use crate::config::BlacklistConfig;
use crate::lifecycle::{ErrorKind, LifecycleError};
use crate::params::{ParamError, ParameterSet};

#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error("no models to benchmark: {0}")]
    NoModels(String),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Params(#[from] ParamError),
    #[error("invalid question list: {0}")]
    Questions(String),
    #[error("{path}: {reason}")]
    Output { path: PathBuf, reason: String },
}

/// One question asked of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub model: String,
    pub question: String,
    /// Answer with reasoning markup removed
    pub response: String,
    pub raw_response: String,
    pub inference_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl BenchmarkRecord {
    pub fn is_error(&self) -> bool {
        self.error.is_some() || self.error_message.is_some()
    }
}

/// Per-model outcome, including models that never finished loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    pub model: String,
    pub category: SizeCategory,
    pub estimated_parameters_b: Option<f64>,
    pub load_duration_ms: Option<u64>,
    pub questions_answered: usize,
    pub total_inference_ms: u64,
    pub errors: Vec<String>,
}

impl ModelReport {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty() && self.load_duration_ms.is_some()
    }
}

/// Everything a run produced. Returned even when the run was interrupted.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub interrupted: bool,
    pub questions: Vec<String>,
    pub models_attempted: usize,
    pub models_succeeded: usize,
    pub reports: Vec<ModelReport>,
    pub records_by_category: BTreeMap<SizeCategory, Vec<BenchmarkRecord>>,
    pub output_files: Vec<PathBuf>,
    pub output_errors: Vec<String>,
}

impl BenchmarkRun {
    pub fn new(questions: Vec<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Local::now(),
            finished_at: None,
            interrupted: false,
            questions,
            models_attempted: 0,
            models_succeeded: 0,
            reports: Vec::new(),
            records_by_category: BTreeMap::new(),
            output_files: Vec::new(),
            output_errors: Vec::new(),
        }
    }

    pub fn push_record(&mut self, category: SizeCategory, record: BenchmarkRecord) {
        self.records_by_category.entry(category).or_default().push(record);
    }

    pub fn records(&self) -> impl Iterator<Item = &BenchmarkRecord> {
        self.records_by_category.values().flatten()
    }

    pub fn record_count(&self) -> usize {
        self.records_by_category.values().map(Vec::len).sum()
    }
}

/// Inputs for one benchmark run.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Explicit subset; all server models when `None`
    pub models: Option<Vec<String>>,
    pub category: Option<SizeCategory>,
    pub questions: Vec<String>,
    pub preset: Option<String>,
    pub overrides: ParameterSet,
    pub system_prompt: Option<String>,
    pub output_dir: PathBuf,
    pub blacklist: BlacklistConfig,
    pub show_progress: bool,
}
