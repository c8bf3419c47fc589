use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ollama_pilot::benchmark::{default_questions, load_questions, BenchmarkConfig, BenchmarkOrchestrator};
use ollama_pilot::chat::display::{
    display_benchmark_summary, display_categories, display_gpus, display_models_table,
    display_service_status,
};
use ollama_pilot::chat::{chat_loop, parse_assignments, ChatOptions};
use ollama_pilot::classifier::{ModelCapabilities, ModelClassifier, SizeCategory};
use ollama_pilot::config::Settings;
use ollama_pilot::gpu;
use ollama_pilot::lifecycle::{LifecycleManager, LifecycleOptions};
use ollama_pilot::params::{ParameterResolver, ParameterSet};
use ollama_pilot::service::{ServiceController, SystemctlManager};
use ollama_pilot::transport::{ModelDescriptor, OllamaClient, Transport};

/// Ollama Pilot - model lifecycle, chat and benchmarks for a local Ollama server
#[derive(Parser)]
#[command(name = "ollama-pilot")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding default.toml and local.toml
    #[arg(long, global = true, value_name = "DIR")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat with automatic model loading and recovery
    Chat {
        /// Model to load on start
        #[arg(short, long)]
        model: Option<String>,

        /// Parameter preset; picked per prompt when omitted
        #[arg(short, long)]
        preset: Option<String>,
    },
    /// Ask every eligible model the same questions and save the results
    ///
    /// Examples:
    ///   ollama-pilot bench --category small
    ///   ollama-pilot bench --models llama3.1:8b,qwen2.5:7b --set temperature=0.2
    Bench {
        /// Only models in this size category (small, medium, large, unknown)
        #[arg(short, long)]
        category: Option<SizeCategory>,

        /// Comma-separated subset of models
        #[arg(short, long, value_delimiter = ',')]
        models: Vec<String>,

        /// JSON array of questions to ask instead of the built-in list
        #[arg(short, long, value_name = "FILE")]
        questions: Option<PathBuf>,

        /// Where result files are written
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Parameter preset for every model
        #[arg(short, long)]
        preset: Option<String>,

        /// Parameter override, repeatable
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,

        /// No progress bar
        #[arg(long)]
        quiet: bool,
    },
    /// List models on the server with size category and capabilities
    Models,
    /// Group server models by size category
    Categories,
    /// Inspect or restart the host service
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
    /// Show GPUs and suggested server environment
    Gpu,
}

#[derive(Subcommand)]
enum ServiceAction {
    /// Unit state, server health and version
    Status,
    /// Restart the unit and wait until the server answers
    Restart,
}

struct App {
    settings: Settings,
    manager: LifecycleManager,
    classifier: ModelClassifier,
    resolver: ParameterResolver,
}

impl App {
    fn build(settings: Settings) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(
            OllamaClient::new(&settings.server).context("Failed to build HTTP client")?,
        );
        let service = ServiceController::new(
            Arc::new(SystemctlManager::from_config(&settings.service)),
            transport.clone(),
            settings.service.clone(),
        );
        let manager = LifecycleManager::new(
            transport,
            service,
            LifecycleOptions::from_config(&settings.server, &settings.lifecycle),
        );
        let classifier = ModelClassifier::new(
            settings.classifier.keyword_tables(),
            settings.classifier.moe.clone(),
        );
        let resolver = ParameterResolver::new(
            settings.presets.clone(),
            settings.generation.overrides.clone(),
        );
        Ok(Self {
            settings,
            manager,
            classifier,
            resolver,
        })
    }

    /// Server models minus the blacklist, with their capabilities.
    async fn classified_models(&mut self) -> Result<Vec<(ModelDescriptor, ModelCapabilities)>> {
        let mut models = self
            .manager
            .list_models_detailed(true)
            .await
            .context("Could not list models")?;
        let hidden = self.settings.blacklist.remove_blocked(&mut models);
        if !hidden.is_empty() {
            println!(
                "{}",
                format!("Note: {} blacklisted model(s) hidden: {}", hidden.len(), hidden.join(", "))
                    .bright_black()
            );
        }
        Ok(models
            .into_iter()
            .map(|m| {
                let caps = self.classifier.classify(&m);
                (m, caps)
            })
            .collect())
    }
}

fn init_tracing(settings: &Settings) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::RollingFileAppender::new(
        tracing_appender::rolling::Rotation::DAILY,
        &settings.logging.directory,
        "ollama-pilot",
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.to_lowercase()));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        // Plain text in log files
        .with_ansi(false)
        .with_line_number(true)
        .with_file(true)
        .with_thread_ids(true)
        .with_target(false)
        .with_env_filter(filter)
        .init();
    guard
}

/// Sets the flag on every Ctrl-C instead of exiting; loops read it between steps.
fn install_interrupt_handler() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            handler_flag.store(true, Ordering::SeqCst);
        }
    });
    flag
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(dir) => Settings::load_from(dir),
        None => Settings::new(),
    }
    .context("Failed to load configuration")?;
    settings
        .ensure_directories()
        .context("Failed to prepare directories")?;

    let _guard = init_tracing(&settings);
    info!(server = %settings.server.url, unit = %settings.service.unit, "Ollama Pilot starting");

    let mut app = App::build(settings)?;

    match cli.command {
        Commands::Chat { model, preset } => {
            let options = ChatOptions {
                model,
                preset,
                system_prompt: app.settings.generation.system_prompt.clone(),
                blacklist: app.settings.blacklist.clone(),
                settings: app.settings.chat.clone(),
            };
            chat_loop(&mut app.manager, &app.classifier, &app.resolver, options, install_interrupt_handler())
                .await
                .map_err(|e| anyhow!(e))?;
        }
        Commands::Bench {
            category,
            models,
            questions,
            output_dir,
            preset,
            overrides,
            quiet,
        } => {
            let questions = match questions.or_else(|| app.settings.benchmark.questions_file.clone()) {
                Some(path) => load_questions(&path)?,
                None => default_questions(),
            };
            let overrides: ParameterSet = parse_assignments(&overrides.join(" "))
                .map_err(|bad| anyhow!("expected KEY=VALUE, got '{}'", bad))?
                .into_iter()
                .collect();
            let config = BenchmarkConfig {
                models: (!models.is_empty()).then_some(models),
                category,
                questions,
                preset: preset.or_else(|| Some(app.settings.generation.default_preset.clone())),
                overrides,
                system_prompt: app.settings.generation.system_prompt.clone(),
                output_dir: output_dir.unwrap_or_else(|| app.settings.benchmark.output_dir.clone()),
                blacklist: app.settings.blacklist.clone(),
                show_progress: !quiet,
            };

            let interrupt = install_interrupt_handler();
            let run = BenchmarkOrchestrator::new(&mut app.manager, &app.classifier, &app.resolver)
                .run(&config, &interrupt)
                .await?;
            display_benchmark_summary(&run);
        }
        Commands::Models => display_models_table(&app.classified_models().await?, None),
        Commands::Categories => display_categories(&app.classified_models().await?),
        Commands::Service { action } => {
            let service = app.manager.service();
            match action {
                ServiceAction::Status => display_service_status(&service.status().await, None),
                ServiceAction::Restart => {
                    println!("Restarting {}...", service.unit().yellow());
                    match service.restart(None).await {
                        Ok(()) => println!("{}", "Service is back and responding".green()),
                        Err(e) => {
                            warn!(error = %e, "Manual service restart failed");
                            println!("{} {}", "Restart failed:".red(), e);
                            println!("Try by hand: {}", service.manual_restart_hint());
                        }
                    }
                }
            }
        }
        Commands::Gpu => {
            let gpus = gpu::detect_gpus();
            display_gpus(&gpus);

            let environment = gpu::server_environment();
            println!("\n{}", "Server environment:".bold());
            if environment.is_empty() {
                println!("  {}", "(none of the usual variables are set)".bright_black());
            }
            for (name, value) in environment {
                println!("  {}={}", name.green(), value);
            }

            let advice = gpu::recommend(&gpus);
            if !advice.is_empty() {
                println!("\n{}", "Suggested settings for the ollama service:".bold());
                for line in advice {
                    println!("  {}", line);
                }
            }
        }
    }

    Ok(())
}
