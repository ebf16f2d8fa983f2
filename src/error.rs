//! Error types for each part of the pipeline.
//!
//! Resolver errors abort the whole run, stage errors abort one sample's chain and
//! accounting errors only exclude a sample from the summary table.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::stage::{Stage, Step};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no input files ending in `{suffix}` found in {}", .dir.display())]
    NoInput { dir: PathBuf, suffix: String },

    #[error("input files do not correspond: {0}")]
    InputMismatch(String),

    #[error("couldn't list input directory {}", .dir.display())]
    Io {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("{stage} failed for sample {sample_id} ({})", status_text(.exit_status))]
    ToolInvocation {
        stage: Stage,
        sample_id: String,
        exit_status: Option<i32>,
    },

    #[error("couldn't launch {stage} for sample {sample_id}")]
    ToolSpawn {
        stage: Stage,
        sample_id: String,
        #[source]
        source: io::Error,
    },

    #[error("mate files of sample {sample_id} disagree at record {record}: {detail}")]
    CorruptPairing {
        sample_id: String,
        record: u64,
        detail: String,
    },

    #[error("couldn't parse reads in {}", .path.display())]
    Fastq {
        path: PathBuf,
        #[source]
        source: bio::io::fastq::Error,
    },

    #[error("malformed screening output {}: {detail}", .path.display())]
    ScreenOutput { path: PathBuf, detail: String },

    #[error("I/O error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("run cancelled before {stage} for sample {sample_id}")]
    Cancelled { stage: Stage, sample_id: String },
}

impl StageError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StageError::Io {
            path: path.into(),
            source,
        }
    }
}

fn status_text(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}

#[derive(Debug, Error)]
pub enum AccountingError {
    #[error("sample {sample_id} is missing read counts for: {}", display_steps(.missing))]
    IncompleteAccounting { sample_id: String, missing: Vec<Step> },

    #[error("sample {sample_id} gained reads at {step} ({previous} -> {current})")]
    ConservationViolated {
        sample_id: String,
        step: Step,
        previous: u64,
        current: u64,
    },

    #[error("couldn't read count file {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed count file {}", .path.display())]
    MalformedCount { path: PathBuf },
}

fn display_steps(steps: &[Step]) -> String {
    steps.iter().map(|step| step.to_string()).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't read configuration {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("couldn't parse configuration")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("required program `{program}` not found on PATH")]
    MissingProgram { program: String },
}

/// Run-level errors surfaced by [`crate::pipeline::run_pipeline`].
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Accounting(#[from] AccountingError),

    #[error("couldn't start sample workers")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
