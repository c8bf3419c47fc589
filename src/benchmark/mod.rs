//! # Benchmark
//!
//! Asks every eligible model the same questions and writes per-category result
//! files plus a run summary.

mod cleaner;
mod orchestrator;
mod output;
mod questions;
mod types;

pub use cleaner::strip_thinking;
pub use orchestrator::BenchmarkOrchestrator;
pub use output::{
    build_summary, category_stats, file_stem, read_category_file, write_json_atomic,
    write_results, CategoryFile, CategoryStats, ModelTiming, OutputReport, SummaryFile,
};
pub use questions::{default_questions, load_questions, DEFAULT_QUESTIONS};
pub use types::{BenchmarkConfig, BenchmarkError, BenchmarkRecord, BenchmarkRun, ModelReport};
