//! # Ollama Pilot
//!
//! Drives a local Ollama server: keeps one model resident, recovers from server
//! failures by retrying, unloading or restarting the host service, resolves
//! generation parameters from presets, and benchmarks models by size category.

pub mod benchmark;
pub mod chat;
pub mod classifier;
pub mod config;
pub mod gpu;
pub mod lifecycle;
pub mod params;
pub mod service;
pub mod transport;
