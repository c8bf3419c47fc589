use colored::*;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::benchmark::BenchmarkRun;
use crate::classifier::{ModelCapabilities, SizeCategory};
use crate::gpu::GpuInfo;
use crate::lifecycle::LifecycleState;
use crate::params::GenerationParameters;
use crate::service::ServiceStatus;
use crate::transport::{ModelDescriptor, RunningModel};

fn header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(label).fg(Color::Cyan).add_attribute(Attribute::Bold))
        .collect()
}

fn new_table(labels: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .set_header(header(labels))
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn yes_no(value: bool) -> Cell {
    if value {
        Cell::new("yes").fg(Color::Green).set_alignment(CellAlignment::Center)
    } else {
        Cell::new("-").fg(Color::DarkGrey).set_alignment(CellAlignment::Center)
    }
}

fn gib(bytes: u64) -> String {
    format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
}

/// Models on the server with their derived capabilities. `current` is marked.
pub fn display_models_table(models: &[(ModelDescriptor, ModelCapabilities)], current: Option<&str>) {
    if models.is_empty() {
        println!("{}", "No models found on the server".yellow());
        return;
    }

    let mut table = new_table(&[
        "#", "Name", "Size", "Params", "Category", "Quantization", "Vision", "Thinking", "MoE",
    ]);
    for (i, (model, caps)) in models.iter().enumerate() {
        let name = if current == Some(model.name.as_str()) {
            Cell::new(format!("{} *", model.name)).fg(Color::Yellow).add_attribute(Attribute::Bold)
        } else {
            Cell::new(&model.name).fg(Color::Green)
        };
        table.add_row(vec![
            Cell::new(i + 1).set_alignment(CellAlignment::Center),
            name,
            Cell::new(format!("{:.2} GB", model.size_gb())).fg(Color::Blue).set_alignment(CellAlignment::Right),
            Cell::new(caps.estimate_label().unwrap_or_else(|| "?".to_string()))
                .fg(Color::Magenta)
                .set_alignment(CellAlignment::Center),
            Cell::new(caps.size_category.as_str()).set_alignment(CellAlignment::Center),
            Cell::new(model.quantization.as_deref().unwrap_or("-")).fg(Color::Cyan).set_alignment(CellAlignment::Center),
            yes_no(caps.supports_vision),
            yes_no(caps.supports_thinking),
            yes_no(caps.is_moe),
        ]);
    }

    println!("\n{}", table);
    println!("{}", format!("Total models: {}", models.len()).bright_green());
}

/// Model counts and names grouped by size category.
pub fn display_categories(models: &[(ModelDescriptor, ModelCapabilities)]) {
    let mut table = new_table(&["Category", "Description", "Models", "Names"]);
    for category in SizeCategory::ALL {
        let names: Vec<&str> = models
            .iter()
            .filter(|(_, caps)| caps.size_category == category)
            .map(|(m, _)| m.name.as_str())
            .collect();
        table.add_row(vec![
            Cell::new(category.as_str()).fg(Color::Yellow),
            Cell::new(category.description()),
            Cell::new(names.len()).set_alignment(CellAlignment::Right),
            Cell::new(names.join(", ")).fg(Color::Green),
        ]);
    }
    println!("\n{}", table);
}

pub fn display_running_models(models: &[RunningModel]) {
    if models.is_empty() {
        println!("{}", "No models resident in server memory".yellow());
        return;
    }
    let mut table = new_table(&["Name", "Size", "VRAM", "Expires"]);
    for model in models {
        table.add_row(vec![
            Cell::new(&model.name).fg(Color::Green),
            Cell::new(gib(model.size)).set_alignment(CellAlignment::Right),
            Cell::new(gib(model.size_vram)).set_alignment(CellAlignment::Right),
            Cell::new(model.expires_at.as_deref().unwrap_or("-")).fg(Color::DarkGrey),
        ]);
    }
    println!("\n{}", table);
}

pub fn display_parameters(preset: &str, params: &GenerationParameters) {
    let mut table = new_table(&["Parameter", "Value"]);
    for (key, value) in &params.options {
        table.add_row(vec![Cell::new(key).fg(Color::Green), Cell::new(value.to_string())]);
    }
    table.add_row(vec![Cell::new("enable_thinking").fg(Color::Magenta), Cell::new(params.enable_thinking)]);
    table.add_row(vec![Cell::new("enable_vision").fg(Color::Magenta), Cell::new(params.enable_vision)]);
    if let Some(format) = &params.thinking_format {
        table.add_row(vec![Cell::new("thinking_format").fg(Color::Magenta), Cell::new(format)]);
    }
    if let Some(quality) = &params.image_quality {
        table.add_row(vec![Cell::new("image_quality").fg(Color::Magenta), Cell::new(quality)]);
    }
    if let Some(limit) = params.max_image_size {
        table.add_row(vec![
            Cell::new("max_image_size").fg(Color::Magenta),
            Cell::new(format!("{} KiB", limit)),
        ]);
    }
    println!("\n{} {}", "Preset:".bold(), preset.yellow());
    println!("{}", table);
}

pub fn display_service_status(status: &ServiceStatus, state: Option<&LifecycleState>) {
    let active = if status.active { "active".green() } else { "inactive".red() };
    let healthy = if status.healthy { "responding".green() } else { "not responding".red() };
    println!("\n{} {} ({})", "Service:".bold(), status.unit.yellow(), active);
    println!("{} {}", "Server:".bold(), healthy);
    if let Some(version) = &status.server_version {
        println!("{} {}", "Version:".bold(), version);
    }
    if let Some(state) = state {
        let current = state
            .current_model()
            .map(|m| m.name.as_str())
            .unwrap_or("none");
        println!("{} {} ({:?})", "Loaded model:".bold(), current.yellow(), state.phase());
        if state.consecutive_failures() > 0 {
            println!(
                "{} {}{}",
                "Failure streak:".bold(),
                state.consecutive_failures().to_string().red(),
                if state.restart_attempted_in_streak() { " (restart already tried)" } else { "" }
            );
        }
    }
}

/// Per-model outcome of a benchmark run.
pub fn display_benchmark_summary(run: &BenchmarkRun) {
    let mut table = new_table(&["Model", "Category", "Load", "Answered", "Avg / question", "Errors"]);
    for report in &run.reports {
        let avg = if report.questions_answered > 0 {
            format!("{:.0} ms", report.total_inference_ms as f64 / report.questions_answered as f64)
        } else {
            "-".to_string()
        };
        let errors = if report.errors.is_empty() {
            Cell::new("-").fg(Color::DarkGrey)
        } else {
            Cell::new(report.errors.join("; ")).fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(&report.model).fg(Color::Green),
            Cell::new(report.category.as_str()).set_alignment(CellAlignment::Center),
            Cell::new(
                report
                    .load_duration_ms
                    .map(|ms| format!("{} ms", ms))
                    .unwrap_or_else(|| "-".to_string()),
            )
            .set_alignment(CellAlignment::Right),
            Cell::new(format!("{}/{}", report.questions_answered, run.questions.len()))
                .set_alignment(CellAlignment::Center),
            Cell::new(avg).set_alignment(CellAlignment::Right),
            errors,
        ]);
    }
    println!("\n{}", table);

    let headline = format!(
        "{} of {} model(s) succeeded, {} record(s)",
        run.models_succeeded,
        run.models_attempted,
        run.record_count()
    );
    if run.interrupted {
        println!("{} {}", headline.yellow(), "(interrupted, partial results)".yellow());
    } else {
        println!("{}", headline.bright_green());
    }
    for path in &run.output_files {
        println!("  {} {}", "wrote".green(), path.display());
    }
    for failure in &run.output_errors {
        println!("  {} {}", "failed".red(), failure);
    }
}

pub fn display_gpus(gpus: &[GpuInfo]) {
    if gpus.is_empty() {
        println!("{}", "No NVIDIA GPU detected (nvidia-smi unavailable or failed)".yellow());
        return;
    }
    let mut table = new_table(&["#", "Name", "Memory", "Used", "Util", "Power", "Temp"]);
    for gpu in gpus {
        table.add_row(vec![
            Cell::new(gpu.index).set_alignment(CellAlignment::Center),
            Cell::new(&gpu.name).fg(Color::Green),
            Cell::new(format!("{} MB", gpu.memory_total_mb)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.0}%", gpu.memory_used_percent())).set_alignment(CellAlignment::Right),
            Cell::new(format!("{}%", gpu.utilization_percent)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1} W", gpu.power_draw_w)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{} °C", gpu.temperature_c)).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("\n{}", table);
}
