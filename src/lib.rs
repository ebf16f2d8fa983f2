//! Staged quality-control pipeline for shotgun sequencing reads.
//!
//! Raw FASTQ samples go through deduplication, adapter trimming, optional rRNA
//! separation, host removal against one or more reference indices and
//! low-complexity masking. Every stage records how many reads survived it, and
//! the counts are collated into a per-sample loss table.

pub mod accounting;
pub mod config;
pub mod error;
pub mod executor;
pub mod host;
pub mod pair_handler;
pub mod pipeline;
pub mod reader;
pub mod resolver;
pub mod stage;
pub mod tool;
pub mod triage;
pub mod types;
pub mod util;
pub mod writer;

pub use config::PipelineConfig;
pub use error::Error;
pub use pipeline::{run_pipeline, run_with, summarize, RunReport};
