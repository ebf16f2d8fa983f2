//! Stage definitions, the per-run stage plan and the on-disk layout of stage outputs.

use std::fmt;
use std::path::{Path, PathBuf};

use strum::VariantArray;

use crate::config::{DataType, PipelineConfig};
use crate::types::{PairingMode, SampleReadSet};

pub const COUNT_DIR: &str = "read_count_summary.dir";
pub const SUMMARY_FILE: &str = "processing_summary.tsv";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, strum::VariantArray, strum::Display)]
pub enum Stage {
    #[strum(serialize = "dedup")]
    Dedup,
    #[strum(serialize = "adapter_trim")]
    AdapterTrim,
    #[strum(serialize = "rrna_split")]
    RrnaSplit,
    #[strum(serialize = "host_removal")]
    HostRemoval,
    #[strum(serialize = "low_complexity_mask")]
    LowComplexityMask,
}

impl Stage {
    pub fn predecessor(self) -> Option<Stage> {
        match self {
            Stage::Dedup => None,
            Stage::AdapterTrim => Some(Stage::Dedup),
            Stage::RrnaSplit => Some(Stage::AdapterTrim),
            Stage::HostRemoval => Some(Stage::RrnaSplit),
            Stage::LowComplexityMask => Some(Stage::HostRemoval),
        }
    }

    /// Whether the stage may leave one mate of a pair without its partner.
    pub fn can_orphan(self) -> bool {
        matches!(self, Stage::AdapterTrim | Stage::HostRemoval)
    }

    /// Whether configuration may turn the stage into a pass-through.
    pub fn skippable(self) -> bool {
        matches!(self, Stage::Dedup | Stage::RrnaSplit)
    }

    pub fn directory(self) -> &'static str {
        match self {
            Stage::Dedup => "reads_deduped.dir",
            Stage::AdapterTrim => "reads_adaptersRemoved.dir",
            Stage::RrnaSplit => "reads_rrnaRemoved.dir",
            Stage::HostRemoval => "reads_hostRemoved.dir",
            Stage::LowComplexityMask => "reads_dusted.dir",
        }
    }

    /// Label used in output file names and count files.
    pub fn label(self) -> &'static str {
        match self {
            Stage::Dedup => "deduped",
            Stage::AdapterTrim => "deadapt",
            Stage::RrnaSplit => "rRNAremoved",
            Stage::HostRemoval => "dehost",
            Stage::LowComplexityMask => "masked",
        }
    }
}

/// A point at which reads are counted: the raw input or the output of a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Step {
    Input,
    After(Stage),
}

impl Step {
    pub fn label(self) -> &'static str {
        match self {
            Step::Input => "input",
            Step::After(stage) => stage.label(),
        }
    }

    pub fn from_label(label: &str) -> Option<Step> {
        if label == "input" {
            return Some(Step::Input);
        }
        Stage::VARIANTS
            .iter()
            .find(|stage| stage.label() == label)
            .map(|stage| Step::After(*stage))
    }

    /// Every step, in pipeline order.
    pub fn all() -> impl Iterator<Item = Step> {
        std::iter::once(Step::Input).chain(Stage::VARIANTS.iter().copied().map(Step::After))
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How the executor realises a stage for this run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageMode {
    /// Run the configured external tool.
    Invoke,
    /// Link the previous output through unchanged.
    PassThrough,
    /// Screen against the reference indices and reconcile.
    HostTriage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlannedStage {
    pub stage: Stage,
    pub mode: StageMode,
}

/// The linear stage sequence chosen once per run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagePlan {
    stages: Vec<PlannedStage>,
}

impl StagePlan {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let stages = Stage::VARIANTS
            .iter()
            .map(|&stage| {
                let disabled = match stage {
                    Stage::Dedup => !config.dedup.enabled,
                    Stage::RrnaSplit => config.data_type == DataType::Metagenome,
                    _ => false,
                };
                let mode = match stage {
                    Stage::HostRemoval => StageMode::HostTriage,
                    _ if disabled && stage.skippable() => StageMode::PassThrough,
                    _ => StageMode::Invoke,
                };
                PlannedStage { stage, mode }
            })
            .collect::<Vec<_>>();

        debug_assert!(Self::ordered(&stages));
        StagePlan { stages }
    }

    fn ordered(stages: &[PlannedStage]) -> bool {
        stages
            .iter()
            .enumerate()
            .all(|(n, planned)| planned.stage.predecessor() == n.checked_sub(1).map(|prev| stages[prev].stage))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedStage> {
        self.stages.iter()
    }

    /// Steps that must carry a count before a sample can be accounted for.
    pub fn required_steps(&self) -> Vec<Step> {
        std::iter::once(Step::Input)
            .chain(self.stages.iter().map(|planned| Step::After(planned.stage)))
            .collect()
    }
}

/// Expected read files of one sample in one directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageFiles {
    pub read1: PathBuf,
    pub read2: Option<PathBuf>,
    pub read3: Option<PathBuf>,
}

impl StageFiles {
    fn named(dir: &Path, stem: &str, mode: PairingMode) -> Self {
        let file = |n: u8| dir.join(format!("{stem}.fastq.{n}.gz"));
        match mode {
            PairingMode::Paired => StageFiles {
                read1: file(1),
                read2: Some(file(2)),
                read3: Some(file(3)),
            },
            PairingMode::SingleEnd => StageFiles {
                read1: file(1),
                read2: None,
                read3: None,
            },
        }
    }

    /// The same file names, placed in another directory.
    pub fn in_dir(&self, dir: &Path) -> Self {
        let rebase = |path: &PathBuf| dir.join(path.file_name().unwrap_or(path.as_os_str()));
        StageFiles {
            read1: rebase(&self.read1),
            read2: self.read2.as_ref().map(rebase),
            read3: self.read3.as_ref().map(rebase),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.read1).chain(self.read2.iter()).chain(self.read3.iter())
    }

    /// Mate 1 is written last, so its presence marks a finished stage.
    pub fn is_complete(&self) -> bool {
        self.read1.exists()
    }

    /// The read set these files hold; the orphan file is included only if it exists.
    pub fn read_set(&self, sample_id: &str) -> SampleReadSet {
        match &self.read2 {
            Some(read2) => SampleReadSet::Paired {
                sample_id: sample_id.to_string(),
                read1: self.read1.clone(),
                read2: read2.clone(),
                orphan: self.read3.clone().filter(|path| path.exists()),
            },
            None => SampleReadSet::Unpaired {
                sample_id: sample_id.to_string(),
                read1: self.read1.clone(),
            },
        }
    }
}

/// Directory layout of a run rooted at the working directory.
#[derive(Clone, Debug)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Layout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stage_dir(&self, stage: Stage) -> PathBuf {
        self.root.join(stage.directory())
    }

    pub fn count_dir(&self) -> PathBuf {
        self.root.join(COUNT_DIR)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join(SUMMARY_FILE)
    }

    pub fn stage_files(&self, stage: Stage, sample_id: &str, mode: PairingMode) -> StageFiles {
        StageFiles::named(&self.stage_dir(stage), &format!("{sample_id}_{}", stage.label()), mode)
    }

    /// Side output holding the reads classified as host.
    pub fn host_files(&self, sample_id: &str, mode: PairingMode) -> StageFiles {
        StageFiles::named(&self.stage_dir(Stage::HostRemoval), &format!("{sample_id}_host"), mode)
    }

    pub fn log_path(&self, stage: Stage, sample_id: &str) -> PathBuf {
        self.stage_dir(stage).join(format!("{sample_id}_{}.log", stage.label()))
    }

    pub fn nreads_path(&self, sample_id: &str, step: Step) -> PathBuf {
        self.count_dir().join(format!("{sample_id}_{}.nreads", step.label()))
    }

    pub fn create_dirs(&self) -> std::io::Result<()> {
        for stage in Stage::VARIANTS {
            std::fs::create_dir_all(self.stage_dir(*stage))?;
        }
        std::fs::create_dir_all(self.count_dir())
    }
}
