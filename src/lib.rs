//! qmap: bulk question/query mapping generation
//!
//! Drives an LLM provider to translate question/query pairs from source databases to a
//! target database, repairs and validates the JSON it returns, retries under a bounded
//! budget and rolls outcome counters up through pipelines and source units.

pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod generation;
pub mod logging;
pub mod prompt;
pub mod provider;
pub mod sink;
pub mod stats;
