//! Load-generation engine for OpenAI-compatible inference APIs.
//!
//! This crate provides tools to:
//! - Drive a chat-completions endpoint with a configured request volume
//! - Enforce a bounded concurrency ceiling with an optional warmup phase
//! - Measure per-request latency and generated-token throughput
//! - Aggregate results into percentiles, rates and an error breakdown
//! - Output results in multiple formats (console, JSON, CSV)

pub mod client;
pub mod config;
pub mod metrics;
pub mod prompts;
pub mod report;
pub mod runner;

pub use client::InferenceClient;
pub use config::{PromptConfig, PromptSelection, RunConfig};
pub use metrics::{AggregateStats, ErrorKind, RequestOutcome};
pub use prompts::PromptGenerator;
pub use report::ResultsReport;
pub use runner::{LoadRunner, Phase, RunSummary};
