use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use super::types::{BenchmarkError, BenchmarkRecord, BenchmarkRun, ModelReport};
use crate::classifier::SizeCategory;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTiming {
    pub name: String,
    pub total_inference_ms: u64,
    pub average_per_question_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub description: String,
    pub total_models: usize,
    pub successful_models: usize,
    pub failed_models: usize,
    pub record_count: usize,
    pub average_load_ms: Option<f64>,
    pub average_inference_ms: Option<f64>,
    pub fastest_model: Option<ModelTiming>,
    pub slowest_model: Option<ModelTiming>,
}

/// Contents of `benchmark-<timestamp>_<category>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryFile {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub category: SizeCategory,
    pub category_stats: CategoryStats,
    pub questions: Vec<String>,
    pub models: Vec<ModelReport>,
    pub records: Vec<BenchmarkRecord>,
}

/// Contents of `benchmark-<timestamp>_summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryFile {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub interrupted: bool,
    pub total_questions: usize,
    pub models_attempted: usize,
    pub models_succeeded: usize,
    pub total_records: usize,
    pub fastest_model: Option<ModelTiming>,
    pub slowest_model: Option<ModelTiming>,
    /// Keyed by category name
    pub categories: BTreeMap<String, CategoryStats>,
    /// Models that reported at least one error
    pub model_errors: BTreeMap<String, Vec<String>>,
}

/// Files written by [`write_results`] and the ones that failed.
#[derive(Debug, Default)]
pub struct OutputReport {
    pub written: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, String)>,
}

pub fn file_stem(started_at: &DateTime<Local>) -> String {
    format!("benchmark-{}", started_at.format("%Y-%m-%d-%H.%M.%S"))
}

fn timing(report: &ModelReport, questions: usize) -> ModelTiming {
    ModelTiming {
        name: report.model.clone(),
        total_inference_ms: report.total_inference_ms,
        average_per_question_ms: if questions == 0 {
            0.0
        } else {
            report.total_inference_ms as f64 / questions as f64
        },
    }
}

fn fastest_and_slowest<'a>(
    reports: impl Iterator<Item = &'a ModelReport> + Clone,
    questions: usize,
) -> (Option<ModelTiming>, Option<ModelTiming>) {
    let fastest = reports.clone().min_by_key(|r| r.total_inference_ms);
    let slowest = reports.max_by_key(|r| r.total_inference_ms);
    (fastest.map(|r| timing(r, questions)), slowest.map(|r| timing(r, questions)))
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

pub fn category_stats(run: &BenchmarkRun, category: SizeCategory) -> CategoryStats {
    let reports: Vec<&ModelReport> = run.reports.iter().filter(|r| r.category == category).collect();
    let successful: Vec<&ModelReport> = reports.iter().copied().filter(|r| r.succeeded()).collect();
    let records = run.records_by_category.get(&category);
    let (fastest_model, slowest_model) =
        fastest_and_slowest(successful.iter().copied(), run.questions.len());

    CategoryStats {
        description: category.description().to_string(),
        total_models: reports.len(),
        successful_models: successful.len(),
        failed_models: reports.len() - successful.len(),
        record_count: records.map(Vec::len).unwrap_or(0),
        average_load_ms: average(reports.iter().filter_map(|r| r.load_duration_ms).map(|v| v as f64)),
        average_inference_ms: average(
            records
                .into_iter()
                .flatten()
                .filter(|r| !r.is_error())
                .map(|r| r.inference_duration_ms as f64),
        ),
        fastest_model,
        slowest_model,
    }
}

pub fn build_summary(run: &BenchmarkRun) -> SummaryFile {
    let (fastest_model, slowest_model) =
        fastest_and_slowest(run.reports.iter().filter(|r| r.succeeded()), run.questions.len());
    SummaryFile {
        run_id: run.run_id,
        started_at: run.started_at,
        finished_at: run.finished_at,
        interrupted: run.interrupted,
        total_questions: run.questions.len(),
        models_attempted: run.models_attempted,
        models_succeeded: run.models_succeeded,
        total_records: run.record_count(),
        fastest_model,
        slowest_model,
        categories: SizeCategory::ALL
            .iter()
            .map(|c| (c.as_str().to_string(), category_stats(run, *c)))
            .collect(),
        model_errors: run
            .reports
            .iter()
            .filter(|r| !r.errors.is_empty())
            .map(|r| (r.model.clone(), r.errors.clone()))
            .collect(),
    }
}

/// Serializes `value` to a hidden sibling file, then renames it over `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output.json".to_string());
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    let result = write_then_rename(&tmp, path, value);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_then_rename<T: Serialize>(tmp: &Path, path: &Path, value: &T) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(tmp)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    fs::rename(tmp, path)
}

/// Writes one file per non-empty category plus the summary.
///
/// A failed file is reported and skipped; files already written stay intact.
pub fn write_results(run: &BenchmarkRun, output_dir: &Path) -> Result<OutputReport, BenchmarkError> {
    fs::create_dir_all(output_dir).map_err(|e| BenchmarkError::Output {
        path: output_dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let stem = file_stem(&run.started_at);
    let mut report = OutputReport::default();

    for (category, records) in &run.records_by_category {
        if records.is_empty() {
            continue;
        }
        let contents = CategoryFile {
            run_id: run.run_id,
            started_at: run.started_at,
            category: *category,
            category_stats: category_stats(run, *category),
            questions: run.questions.clone(),
            models: run.reports.iter().filter(|r| r.category == *category).cloned().collect(),
            records: records.clone(),
        };
        let path = output_dir.join(format!("{}_{}.json", stem, category.as_str()));
        record_write(&mut report, path, &contents);
    }

    let path = output_dir.join(format!("{}_summary.json", stem));
    record_write(&mut report, path, &build_summary(run));

    Ok(report)
}

fn record_write<T: Serialize>(report: &mut OutputReport, path: PathBuf, value: &T) {
    match write_json_atomic(&path, value) {
        Ok(()) => {
            info!(path = %path.display(), "Wrote benchmark file");
            report.written.push(path);
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to write benchmark file");
            report.failures.push((path, e.to_string()));
        }
    }
}

pub fn read_category_file(path: &Path) -> Result<CategoryFile, BenchmarkError> {
    let raw = fs::read_to_string(path).map_err(|e| BenchmarkError::Output {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| BenchmarkError::Output {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
