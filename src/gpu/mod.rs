//! GPU inventory and server environment advice
//!
//! Queries `nvidia-smi` for the installed GPUs and suggests environment
//! variables for the inference server. Best effort: no GPU means an empty list.

use std::process::Command;

use serde::Serialize;
use tracing::debug;

const QUERY_FIELDS: &str =
    "index,name,memory.total,memory.free,memory.used,utilization.gpu,power.draw,temperature.gpu";

/// Server environment variables worth showing next to the GPU list.
pub const SERVER_ENV_VARS: &[&str] = &[
    "CUDA_VISIBLE_DEVICES",
    "OLLAMA_GPU_MEMORY_FRACTION",
    "OLLAMA_MAX_LOADED_MODELS",
    "OLLAMA_GPU_LAYERS",
    "OLLAMA_HOST",
    "OLLAMA_KEEP_ALIVE",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuInfo {
    pub index: u32,
    pub name: String,
    pub memory_total_mb: u64,
    pub memory_free_mb: u64,
    pub memory_used_mb: u64,
    pub utilization_percent: u32,
    pub power_draw_w: f64,
    pub temperature_c: u32,
}

impl GpuInfo {
    pub fn memory_used_percent(&self) -> f64 {
        if self.memory_total_mb == 0 {
            0.0
        } else {
            self.memory_used_mb as f64 / self.memory_total_mb as f64 * 100.0
        }
    }
}

/// Detect NVIDIA GPUs via nvidia-smi (empty when unavailable)
pub fn detect_gpus() -> Vec<GpuInfo> {
    let query = format!("--query-gpu={}", QUERY_FIELDS);
    let output = match Command::new("nvidia-smi")
        .args([query.as_str(), "--format=csv,noheader,nounits"])
        .output()
    {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            debug!(code = ?output.status.code(), "nvidia-smi exited with an error");
            return Vec::new();
        }
        Err(e) => {
            debug!(error = %e, "nvidia-smi not available");
            return Vec::new();
        }
    };
    parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
}

// "[Not Supported]" and "[N/A]" read as zero
fn number<T: std::str::FromStr + Default>(raw: &str) -> T {
    raw.trim().parse().unwrap_or_default()
}

/// Parses `nvidia-smi --format=csv,noheader,nounits` output.
pub fn parse_nvidia_smi(stdout: &str) -> Vec<GpuInfo> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < 8 {
                debug!(line, "Skipping malformed nvidia-smi line");
                return None;
            }
            Some(GpuInfo {
                index: parts[0].parse().ok()?,
                name: parts[1].to_string(),
                memory_total_mb: number(parts[2]),
                memory_free_mb: number(parts[3]),
                memory_used_mb: number(parts[4]),
                utilization_percent: number(parts[5]),
                power_draw_w: number(parts[6]),
                temperature_c: number(parts[7]),
            })
        })
        .collect()
}

/// Server-related variables that are set in this process's environment.
pub fn server_environment() -> Vec<(String, String)> {
    SERVER_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok().map(|v| (var.to_string(), v)))
        .collect()
}

/// Suggested `export` lines: largest GPU first, one resident model.
pub fn recommend(gpus: &[GpuInfo]) -> Vec<String> {
    if gpus.is_empty() {
        return Vec::new();
    }
    let mut by_memory: Vec<&GpuInfo> = gpus.iter().collect();
    by_memory.sort_by(|a, b| b.memory_total_mb.cmp(&a.memory_total_mb));

    let mut lines = Vec::new();
    if by_memory.len() > 1 {
        let order: Vec<String> = by_memory.iter().map(|g| g.index.to_string()).collect();
        lines.push(format!("export CUDA_VISIBLE_DEVICES={}", order.join(",")));
    }
    lines.push("export OLLAMA_GPU_MEMORY_FRACTION=0.9".to_string());
    lines.push("export OLLAMA_MAX_LOADED_MODELS=1".to_string());
    lines
}
