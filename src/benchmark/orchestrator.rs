use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::cleaner::strip_thinking;
use super::output::write_results;
use super::types::{BenchmarkConfig, BenchmarkError, BenchmarkRecord, BenchmarkRun, ModelReport};
use crate::classifier::{CapabilityCache, ModelCapabilities, ModelClassifier};
use crate::lifecycle::{LifecycleManager, LoadOutcome};
use crate::params::ParameterResolver;
use crate::transport::{GenerateRequest, ModelDescriptor};

/// Sweeps models through the question list, one model resident at a time.
pub struct BenchmarkOrchestrator<'a> {
    manager: &'a mut LifecycleManager,
    classifier: &'a ModelClassifier,
    resolver: &'a ParameterResolver,
    cache: CapabilityCache,
}

struct Candidate {
    descriptor: ModelDescriptor,
    capabilities: ModelCapabilities,
}

impl<'a> BenchmarkOrchestrator<'a> {
    pub fn new(
        manager: &'a mut LifecycleManager,
        classifier: &'a ModelClassifier,
        resolver: &'a ParameterResolver,
    ) -> Self {
        Self {
            manager,
            classifier,
            resolver,
            cache: CapabilityCache::new(),
        }
    }

    /// Runs the benchmark, checking `cancel` between models and between questions.
    ///
    /// Results are flushed to disk before returning, interrupted or not.
    pub async fn run(
        &mut self,
        config: &BenchmarkConfig,
        cancel: &AtomicBool,
    ) -> Result<BenchmarkRun, BenchmarkError> {
        if config.questions.is_empty() {
            return Err(BenchmarkError::Questions("question list is empty".to_string()));
        }
        // Surface a bad preset name before any model is touched
        self.resolver
            .resolve_for(config.preset.as_deref(), Some(&config.overrides), &ModelCapabilities::unknown())?;

        let candidates = self.select_candidates(config).await?;
        info!(
            models = candidates.len(),
            questions = config.questions.len(),
            "Starting benchmark"
        );

        let mut run = BenchmarkRun::new(config.questions.clone());
        let progress = progress_bar(config.show_progress, (candidates.len() * config.questions.len()) as u64);

        'models: for candidate in &candidates {
            if cancel.load(Ordering::SeqCst) {
                run.interrupted = true;
                break;
            }
            let name = candidate.descriptor.name.as_str();
            let caps = &candidate.capabilities;
            run.models_attempted += 1;
            progress.set_message(name.to_string());

            let mut report = ModelReport {
                model: name.to_string(),
                category: caps.size_category,
                estimated_parameters_b: caps.estimated_parameters_b,
                load_duration_ms: None,
                questions_answered: 0,
                total_inference_ms: 0,
                errors: Vec::new(),
            };

            let params = self
                .resolver
                .resolve_for(config.preset.as_deref(), Some(&config.overrides), caps)?;

            match self.manager.ensure_loaded(name).await {
                Ok(LoadOutcome::Loaded { load_duration, .. }) => {
                    report.load_duration_ms = Some(load_duration.as_millis() as u64);
                }
                Ok(LoadOutcome::AlreadyLoaded) => report.load_duration_ms = Some(0),
                Err(e) => {
                    error!(model = name, error = %e, "Skipping model, load failed");
                    report.errors.push(format!("load: {}", e));
                    progress.inc(config.questions.len() as u64);
                    run.reports.push(report);
                    continue;
                }
            }

            let keep_alive = Value::String(self.manager.options().keep_alive.clone());
            for (index, question) in config.questions.iter().enumerate() {
                if cancel.load(Ordering::SeqCst) {
                    run.interrupted = true;
                    run.reports.push(report);
                    break 'models;
                }

                let request = GenerateRequest {
                    model: name.to_string(),
                    prompt: params.apply_thinking_instruction(question),
                    system: config.system_prompt.clone(),
                    options: params.options_json(),
                    keep_alive: Some(keep_alive.clone()),
                    ..Default::default()
                };

                let started = Instant::now();
                let result = self.manager.generate(name, &request).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                progress.inc(1);

                match result {
                    Ok(completion) => {
                        debug!(model = name, question = index + 1, ms = elapsed_ms, "Answered");
                        report.questions_answered += 1;
                        report.total_inference_ms += elapsed_ms;
                        run.push_record(
                            caps.size_category,
                            BenchmarkRecord {
                                model: name.to_string(),
                                question: question.clone(),
                                response: strip_thinking(&completion.text),
                                tokens_per_second: completion.tokens_per_second(),
                                raw_response: completion.text,
                                inference_duration_ms: elapsed_ms,
                                error: None,
                                error_message: None,
                            },
                        );
                    }
                    Err(e) => {
                        warn!(model = name, question = index + 1, error = %e, "Question failed, skipping rest of model");
                        report.errors.push(format!("question {}: {}", index + 1, e));
                        run.push_record(
                            caps.size_category,
                            BenchmarkRecord {
                                model: name.to_string(),
                                question: question.clone(),
                                response: String::new(),
                                raw_response: String::new(),
                                inference_duration_ms: elapsed_ms,
                                tokens_per_second: None,
                                error: e.kind(),
                                error_message: Some(e.to_string()),
                            },
                        );
                        let skipped = config.questions.len() - index - 1;
                        progress.inc(skipped as u64);
                        break;
                    }
                }
            }

            if report.succeeded() {
                run.models_succeeded += 1;
            }
            run.reports.push(report);
        }

        progress.finish_and_clear();

        run.finished_at = Some(Local::now());
        if run.interrupted {
            warn!(records = run.record_count(), "Benchmark interrupted, saving partial results");
        }

        match write_results(&run, &config.output_dir) {
            Ok(report) => {
                run.output_files = report.written;
                run.output_errors = report
                    .failures
                    .into_iter()
                    .map(|(path, reason)| format!("{}: {}", path.display(), reason))
                    .collect();
            }
            Err(e) => {
                error!(error = %e, "Could not write benchmark results");
                run.output_errors.push(e.to_string());
            }
        }

        self.release_last_model(run.interrupted).await;

        info!(
            run_id = %run.run_id,
            attempted = run.models_attempted,
            succeeded = run.models_succeeded,
            records = run.record_count(),
            "Benchmark finished"
        );
        Ok(run)
    }

    /// Server models, narrowed to the requested subset, minus the blacklist,
    /// then described, classified and filtered by category.
    async fn select_candidates(&mut self, config: &BenchmarkConfig) -> Result<Vec<Candidate>, BenchmarkError> {
        let available = self.manager.list_models(true).await?;

        let mut selected: Vec<ModelDescriptor> = match &config.models {
            Some(requested) => requested
                .iter()
                .filter_map(|wanted| {
                    let found = available
                        .iter()
                        .find(|m| m.name == *wanted || m.name == format!("{}:latest", wanted));
                    if found.is_none() {
                        warn!(model = %wanted, "Requested model is not on the server");
                    }
                    found.cloned()
                })
                .collect(),
            None => available,
        };
        selected.sort_by(|a, b| a.name.cmp(&b.name));
        selected.dedup_by(|a, b| a.name == b.name);

        for model in config.blacklist.remove_blocked(&mut selected) {
            info!(model = %model, "Skipping blacklisted model");
        }

        let mut candidates = Vec::with_capacity(selected.len());
        for descriptor in selected {
            let descriptor = self.manager.with_details(descriptor).await;
            let capabilities = self.cache.get_or_classify(self.classifier, &descriptor);
            if config.category.map_or(true, |wanted| capabilities.size_category == wanted) {
                candidates.push(Candidate {
                    descriptor,
                    capabilities,
                });
            }
        }

        if candidates.is_empty() {
            let reason = match config.category {
                Some(category) => format!("no eligible models in category '{}'", category),
                None => "no eligible models on the server".to_string(),
            };
            return Err(BenchmarkError::NoModels(reason));
        }
        Ok(candidates)
    }

    /// An interrupted run gets one unload attempt without recovery.
    async fn release_last_model(&mut self, interrupted: bool) {
        let result = if interrupted {
            self.manager.release_current().await
        } else {
            let current = self.manager.state().current_model().map(|m| m.name.clone());
            match current {
                Some(model) => self.manager.unload(&model).await,
                None => Ok(()),
            }
        };
        if let Err(e) = result {
            debug!(error = %e, "Could not unload after benchmark");
        }
    }
}

fn progress_bar(visible: bool, total: u64) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {wide_msg}",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
