//! Whole-run entry points: resolve the input, run every sample, write the summary.

use std::path::PathBuf;

use indicatif::ProgressBar;
use log::{info, warn};

use crate::accounting::{aggregate, load_counts, AccountingTable};
use crate::config::{DataType, PipelineConfig};
use crate::error::Error;
use crate::executor::{CancelToken, Executor, SampleOutcome};
use crate::host::{strategy_for, HostRemovalStrategy};
use crate::resolver::{resolve, ResolvedInput};
use crate::stage::{Layout, StagePlan};
use crate::tool::{check_programs, CommandAdapter, JobSlots, ToolAdapter};

#[derive(Debug)]
pub struct RunReport {
    pub outcomes: Vec<SampleOutcome>,
    pub table: AccountingTable,
    pub summary: PathBuf,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &SampleOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_complete())
    }
}

/// Run the configured pipeline with the external tools named in `config`.
pub fn run_pipeline(config: &PipelineConfig, cancel: CancelToken, progress: &ProgressBar) -> Result<RunReport, Error> {
    config.validate()?;
    let input = resolve(&config.input.dir, &config.input.fastq1_suffix, &config.input.fastq2_suffix)?;

    let slots = JobSlots::new(config.concurrency.max_concurrent_jobs);
    let adapter = CommandAdapter::new(config, slots.clone());
    let mut templates = adapter.templates();
    templates.extend([config.host.paired_template(), config.host.single_template()]);
    check_programs(&templates)?;

    let host = strategy_for(&config.host, slots);
    run_with(config, &input, &adapter, host.as_ref(), cancel, progress)
}

/// Run resolved samples through `adapter` and `host`, then write the summary table.
pub fn run_with(
    config: &PipelineConfig,
    input: &ResolvedInput,
    adapter: &dyn ToolAdapter,
    host: &dyn HostRemovalStrategy,
    cancel: CancelToken,
    progress: &ProgressBar,
) -> Result<RunReport, Error> {
    let executor = Executor::new(config, adapter, host).with_cancel_token(cancel);
    progress.set_length(input.samples.len() as u64);
    let outcomes = executor.run_all(&input.samples, progress)?;
    progress.finish_and_clear();

    let counts = outcomes.iter().flat_map(|outcome| outcome.counts.iter().cloned());
    let table = aggregate(counts, &executor.plan().required_steps());
    let summary = write_summary(config, executor.layout(), &table)?;
    Ok(RunReport {
        outcomes,
        table,
        summary,
    })
}

/// Rebuild the summary table from the count files of an earlier run.
pub fn summarize(config: &PipelineConfig) -> Result<(AccountingTable, PathBuf), Error> {
    let layout = Layout::new(&config.output_dir);
    let counts = load_counts(&layout.count_dir())?;
    if counts.is_empty() {
        warn!("no read counts found in {}", layout.count_dir().display());
    }
    let table = aggregate(counts, &StagePlan::from_config(config).required_steps());
    let summary = write_summary(config, &layout, &table)?;
    Ok((table, summary))
}

fn write_summary(config: &PipelineConfig, layout: &Layout, table: &AccountingTable) -> Result<PathBuf, Error> {
    let path = layout.summary_path();
    let with_rrna = config.data_type == DataType::Metatranscriptome || table.has_rrna_losses();
    table.write_tsv_file(&path, with_rrna).map_err(|source| Error::Io {
        path: path.clone(),
        source,
    })?;
    info!("wrote {}", path.display());
    Ok(path)
}
