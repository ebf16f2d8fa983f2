//! Drives every sample through the stage plan.
//!
//! Samples run in parallel on a bounded worker pool; the stages of one sample run
//! strictly in order. Each stage writes into a staging directory inside its stage
//! directory and is promoted only once it has succeeded, so whatever is found at
//! a stage's final paths on a later run is complete and is reused.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::ProgressBar;
use log::{error, info, warn};
use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::error::{Error, StageError};
use crate::host::HostRemovalStrategy;
use crate::stage::{Layout, PlannedStage, Stage, StageFiles, StageMode, StagePlan, Step};
use crate::tool::{StageOutput, ToolAdapter};
use crate::triage::TriageEngine;
use crate::types::{SampleReadSet, StageCount};
use crate::util::{count_records, link_through, promote, read_nreads, write_nreads};

/// Shared flag that stops samples from starting further stages.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    /// Output from an earlier run was reused.
    Skipped,
    Failed,
}

#[derive(Debug)]
pub struct SampleOutcome {
    pub sample_id: String,
    pub counts: Vec<StageCount>,
    pub stages: Vec<(Stage, StageStatus)>,
    pub error: Option<StageError>,
}

impl SampleOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    pub fn status(&self, stage: Stage) -> Option<StageStatus> {
        self.stages.iter().find(|(done, _)| *done == stage).map(|(_, status)| *status)
    }
}

pub struct Executor<'a> {
    config: &'a PipelineConfig,
    layout: Layout,
    plan: StagePlan,
    adapter: &'a dyn ToolAdapter,
    host: &'a dyn HostRemovalStrategy,
    cancel: CancelToken,
}

impl<'a> Executor<'a> {
    pub fn new(config: &'a PipelineConfig, adapter: &'a dyn ToolAdapter, host: &'a dyn HostRemovalStrategy) -> Self {
        Executor {
            config,
            layout: Layout::new(&config.output_dir),
            plan: StagePlan::from_config(config),
            adapter,
            host,
            cancel: CancelToken::default(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Process every sample, at most `max_parallel_samples` at a time. Returns
    /// once all samples have finished or failed, in input order.
    pub fn run_all(&self, samples: &[SampleReadSet], progress: &ProgressBar) -> Result<Vec<SampleOutcome>, Error> {
        self.layout.create_dirs().map_err(|source| Error::Io {
            path: self.layout.root().to_path_buf(),
            source,
        })?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.concurrency.max_parallel_samples.max(1))
            .thread_name(|n| format!("sample-{n}"))
            .build()?;

        Ok(pool.install(|| {
            samples
                .par_iter()
                .map(|sample| {
                    let outcome = self.run_sample(sample);
                    progress.inc(1);
                    outcome
                })
                .collect()
        }))
    }

    /// Run the stage chain for one sample. Errors stop this sample only.
    pub fn run_sample(&self, input: &SampleReadSet) -> SampleOutcome {
        let mut outcome = SampleOutcome {
            sample_id: input.sample_id().to_string(),
            counts: Vec::new(),
            stages: Vec::new(),
            error: None,
        };

        let input_count = match self.input_count(input) {
            Ok(count) => count,
            Err(err) => {
                error!("{}: couldn't count input reads: {err}", outcome.sample_id);
                outcome.error = Some(err);
                return outcome;
            }
        };
        outcome.counts.push(StageCount {
            sample_id: outcome.sample_id.clone(),
            step: Step::Input,
            read_pairs: input_count,
        });

        let mut current = input.clone();
        let mut previous_count = input_count;
        for planned in self.plan.iter() {
            match self.run_stage(planned, &current, previous_count) {
                Ok((output, status)) => {
                    outcome.stages.push((planned.stage, status));
                    outcome.counts.push(StageCount {
                        sample_id: outcome.sample_id.clone(),
                        step: Step::After(planned.stage),
                        read_pairs: output.count,
                    });
                    previous_count = output.count;
                    current = output.reads;
                }
                Err(err) => {
                    match &err {
                        StageError::Cancelled { .. } => warn!("{err}"),
                        _ => error!("{}: {} failed: {err}", outcome.sample_id, planned.stage),
                    }
                    outcome.stages.push((planned.stage, StageStatus::Failed));
                    outcome.error = Some(err);
                    break;
                }
            }
        }
        outcome
    }

    fn input_count(&self, input: &SampleReadSet) -> Result<u64, StageError> {
        let path = self.layout.nreads_path(input.sample_id(), Step::Input);
        if let Some(count) = read_nreads(&path).ok().flatten() {
            return Ok(count);
        }
        let count = count_records(input.read1())?;
        write_nreads(&path, count).map_err(|err| StageError::io(&path, err))?;
        Ok(count)
    }

    fn run_stage(
        &self,
        planned: &PlannedStage,
        input: &SampleReadSet,
        previous_count: u64,
    ) -> Result<(StageOutput, StageStatus), StageError> {
        let stage = planned.stage;
        let sample_id = input.sample_id();
        let mode = input.pairing_mode();
        let files = self.layout.stage_files(stage, sample_id, mode);
        let nreads = self.layout.nreads_path(sample_id, Step::After(stage));

        if files.is_complete() {
            let count = match read_nreads(&nreads).ok().flatten() {
                Some(count) => count,
                None => {
                    let count = count_records(&files.read1)?;
                    write_nreads(&nreads, count).map_err(|err| StageError::io(&nreads, err))?;
                    count
                }
            };
            info!("{sample_id}: {stage} already done, reusing {}", files.read1.display());
            let output = StageOutput {
                reads: files.read_set(sample_id),
                count,
            };
            return Ok((output, StageStatus::Skipped));
        }

        if self.cancel.is_cancelled() {
            return Err(StageError::Cancelled {
                stage,
                sample_id: sample_id.to_string(),
            });
        }

        let stage_dir = self.layout.stage_dir(stage);
        let staging = tempfile::Builder::new()
            .prefix(&format!(".staging-{sample_id}-"))
            .tempdir_in(&stage_dir)
            .map_err(|err| StageError::io(&stage_dir, err))?;
        let staged = files.in_dir(staging.path());

        let (count, host_moves) = match planned.mode {
            StageMode::Invoke => {
                let output = self.adapter.run(stage, input, &staged)?;
                drop_unexpected_orphans(stage, input, &staged)?;
                (output.count, Vec::new())
            }
            StageMode::PassThrough => {
                info!("{sample_id}: {stage} not applicable, linking reads through");
                pass_through(input, &staged)?;
                (previous_count, Vec::new())
            }
            StageMode::HostTriage => {
                let host_files = self.layout.host_files(sample_id, mode);
                let staged_host = host_files.in_dir(staging.path());
                let engine = TriageEngine::new(
                    self.host,
                    &self.config.host.indices,
                    self.config.host.pair_drop_policy,
                    self.config.host.keep_host_reads,
                );
                let outcome = engine.run(input, &staged, &staged_host, &staging.path().join("screen"))?;
                let moves = staged_host.iter().cloned().zip(host_files.iter().cloned()).collect();
                (outcome.count, moves)
            }
        };

        // in-flight work may finish after a cancel, but its output is not kept
        if self.cancel.is_cancelled() {
            return Err(StageError::Cancelled {
                stage,
                sample_id: sample_id.to_string(),
            });
        }

        promote(&host_moves)?;
        let moves: Vec<_> = staged.iter().cloned().zip(files.iter().cloned()).collect();
        promote(&moves)?;
        write_nreads(&nreads, count).map_err(|err| StageError::io(&nreads, err))?;
        info!("{sample_id}: {stage} done, {count} remaining");

        Ok((
            StageOutput {
                reads: files.read_set(sample_id),
                count,
            },
            StageStatus::Completed,
        ))
    }
}

/// Only stages that can split pairs may start a singleton file.
fn drop_unexpected_orphans(stage: Stage, input: &SampleReadSet, staged: &StageFiles) -> Result<(), StageError> {
    if stage.can_orphan() || input.orphan().is_some() {
        return Ok(());
    }
    match staged.read3.as_deref() {
        Some(read3) if read3.exists() => {
            warn!("{}: {stage} wrote singletons it can't produce; ignoring them", input.sample_id());
            std::fs::remove_file(read3).map_err(|err| StageError::io(read3, err))
        }
        _ => Ok(()),
    }
}

fn pass_through(input: &SampleReadSet, staged: &StageFiles) -> Result<(), StageError> {
    let link = |target: &Path, link: &Path| link_through(target, link).map_err(|err| StageError::io(link, err));
    link(input.read1(), &staged.read1)?;
    if let (Some(read2), Some(staged2)) = (input.read2(), staged.read2.as_deref()) {
        link(read2, staged2)?;
    }
    if let (Some(orphan), Some(staged3)) = (input.orphan(), staged.read3.as_deref()) {
        link(orphan, staged3)?;
    }
    Ok(())
}
