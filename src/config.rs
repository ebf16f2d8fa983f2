//! Run configuration, read from `pipeline.yml`.
//!
//! The configuration is loaded once and handed to each component by reference;
//! nothing reads it from global state.

use std::fs;
use std::path::{Path, PathBuf};

use clap::builder::PossibleValue;
use clap::ValueEnum;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use strum::VariantArray;

use crate::error::ConfigError;
use crate::pair_handler::PairDropPolicy;
use crate::stage::Stage;

pub const DEFAULT_CONFIG_FILE: &str = "pipeline.yml";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, strum::VariantArray)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Metagenome,
    Metatranscriptome,
}

impl ValueEnum for DataType {
    fn value_variants<'a>() -> &'a [Self] {
        Self::VARIANTS
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(match self {
            DataType::Metagenome => PossibleValue::new("metagenome").help("DNA reads; rRNA separation is skipped"),
            DataType::Metatranscriptome => {
                PossibleValue::new("metatranscriptome").help("RNA reads; rRNA reads are split off before host removal")
            }
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, strum::VariantArray)]
#[serde(rename_all = "lowercase")]
pub enum HostTool {
    #[default]
    Bmtagger,
    #[serde(alias = "hisat")]
    Hisat2,
}

impl ValueEnum for HostTool {
    fn value_variants<'a>() -> &'a [Self] {
        Self::VARIANTS
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(match self {
            HostTool::Bmtagger => PossibleValue::new("bmtagger").help("screener reporting a list of host read names"),
            HostTool::Hisat2 => PossibleValue::new("hisat2")
                .alias("hisat")
                .help("aligner reporting host reads as SAM records"),
        })
    }
}

/// One host genome index screened during host removal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceIndex {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub dir: PathBuf,
    pub fastq1_suffix: String,
    pub fastq2_suffix: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig {
            dir: PathBuf::from("input.dir"),
            fastq1_suffix: "fastq.1.gz".to_string(),
            fastq2_suffix: "fastq.2.gz".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Samples processed at the same time.
    pub max_parallel_samples: usize,
    /// External tool invocations running at the same time, across all samples.
    pub max_concurrent_jobs: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        ConcurrencyConfig {
            max_parallel_samples: 4,
            max_concurrent_jobs: 4,
        }
    }
}

/// Command templates for a stage run through the external tool adapter.
///
/// Templates are run with `sh -c` after substituting `{in1}`, `{in2}`, `{in3}`,
/// `{out1}`, `{out2}`, `{out3}`, `{workdir}`, `{threads}` and `{sample}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub threads: usize,
    pub paired_command: String,
    pub single_command: String,
    /// Run on a nonempty orphan file with `{in1}`/`{out1}` bound to it; orphans
    /// are linked through unchanged when absent.
    pub orphan_command: Option<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig {
            threads: 1,
            paired_command: String::new(),
            single_command: String::new(),
            orphan_command: None,
        }
    }
}

impl ToolConfig {
    fn with_commands(threads: usize, paired: &str, single: &str, orphan: Option<&str>) -> Self {
        ToolConfig {
            threads,
            paired_command: paired.to_string(),
            single_command: single.to_string(),
            orphan_command: orphan.map(str::to_string),
        }
    }
}

/// Duplicate removal is the only filtering stage that can be switched off.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupConfig {
    pub enabled: bool,
    pub tool: ToolConfig,
}

impl Default for DedupConfig {
    fn default() -> Self {
        DedupConfig {
            enabled: true,
            tool: ToolConfig::with_commands(
                1,
                "zcat {in1} > {workdir}/in.1.fq && zcat {in2} > {workdir}/in.2.fq && \
                 cd-hit-dup -i {workdir}/in.1.fq -i2 {workdir}/in.2.fq \
                 -o {workdir}/out.1.fq -o2 {workdir}/out.2.fq -e 0.03 && \
                 gzip -c {workdir}/out.2.fq > {out2} && gzip -c {workdir}/out.1.fq > {out1}",
                "zcat {in1} > {workdir}/in.1.fq && \
                 cd-hit-dup -i {workdir}/in.1.fq -o {workdir}/out.1.fq -e 0.03 && \
                 gzip -c {workdir}/out.1.fq > {out1}",
                None,
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub tool: HostTool,
    pub pair_drop_policy: PairDropPolicy,
    pub indices: Vec<ReferenceIndex>,
    pub threads: usize,
    /// Write the host partition next to the clean reads.
    pub keep_host_reads: bool,
    /// Screening templates; `{index}` is the index path and `{out}` the file the
    /// screener writes its hits to. Defaults depend on `tool`.
    pub paired_command: Option<String>,
    pub single_command: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            tool: HostTool::default(),
            pair_drop_policy: PairDropPolicy::DiscardPair,
            indices: Vec::new(),
            threads: 4,
            keep_host_reads: true,
            paired_command: None,
            single_command: None,
        }
    }
}

impl HostConfig {
    /// Whether the pair drop policy can change the outcome. Screeners that
    /// report hits per fragment never flag a single mate.
    pub fn reports_single_mates(&self) -> bool {
        match self.tool {
            HostTool::Bmtagger => false,
            HostTool::Hisat2 => true,
        }
    }

    pub fn paired_template(&self) -> &str {
        match (&self.paired_command, self.tool) {
            (Some(command), _) => command,
            (None, HostTool::Bmtagger) => {
                "zcat {in1} > {workdir}/r1.fq && zcat {in2} > {workdir}/r2.fq && \
                 bmtagger.sh -b {index}.bitmask -x {index}.srprism -T {workdir} -q1 \
                 -1 {workdir}/r1.fq -2 {workdir}/r2.fq -o {out}"
            }
            (None, HostTool::Hisat2) => "hisat2 -p {threads} -x {index} -1 {in1} -2 {in2} --no-unal -S {out}",
        }
    }

    pub fn single_template(&self) -> &str {
        match (&self.single_command, self.tool) {
            (Some(command), _) => command,
            (None, HostTool::Bmtagger) => {
                "zcat {in1} > {workdir}/r1.fq && \
                 bmtagger.sh -b {index}.bitmask -x {index}.srprism -T {workdir} -q1 \
                 -1 {workdir}/r1.fq -o {out}"
            }
            (None, HostTool::Hisat2) => "hisat2 -p {threads} -x {index} -U {in1} --no-unal -S {out}",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_type: DataType,
    pub input: InputConfig,
    /// Root under which the stage directories are created.
    pub output_dir: PathBuf,
    pub concurrency: ConcurrencyConfig,
    pub dedup: DedupConfig,
    pub adapter_trim: ToolConfig,
    pub rrna_split: ToolConfig,
    pub host: HostConfig,
    pub low_complexity: ToolConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            data_type: DataType::default(),
            input: InputConfig::default(),
            output_dir: PathBuf::from("."),
            concurrency: ConcurrencyConfig::default(),
            dedup: DedupConfig::default(),
            adapter_trim: ToolConfig::with_commands(
                4,
                "trimmomatic PE -threads {threads} -phred33 {in1} {in2} \
                 {out1} {workdir}/1s.fastq.gz {out2} {workdir}/2s.fastq.gz \
                 ILLUMINACLIP:adapters.fa:2:30:10:8:true LEADING:3 TRAILING:3 MINLEN:36 && \
                 cat {workdir}/1s.fastq.gz {workdir}/2s.fastq.gz > {out3}",
                "trimmomatic SE -threads {threads} -phred33 {in1} {out1} \
                 ILLUMINACLIP:adapters.fa:2:30:10 LEADING:3 TRAILING:3 MINLEN:36",
                None,
            ),
            rrna_split: ToolConfig::with_commands(
                4,
                "sortmerna --ref rRNA.fasta --reads {in1} --reads {in2} --paired_in --fastx \
                 --other {workdir}/other --out2 --workdir {workdir} --threads {threads} && \
                 mv {workdir}/other_fwd.fq.gz {out1} && mv {workdir}/other_rev.fq.gz {out2}",
                "sortmerna --ref rRNA.fasta --reads {in1} --fastx --other {workdir}/other \
                 --workdir {workdir} --threads {threads} && mv {workdir}/other.fq.gz {out1}",
                Some(
                    "sortmerna --ref rRNA.fasta --reads {in1} --fastx --other {workdir}/other \
                     --workdir {workdir} --threads {threads} && mv {workdir}/other.fq.gz {out1}",
                ),
            ),
            host: HostConfig::default(),
            low_complexity: ToolConfig::with_commands(
                4,
                "bbduk.sh in={in1} in2={in2} out={workdir}/out.1.fq.gz out2={workdir}/out.2.fq.gz \
                 entropy=0.7 threads={threads} && \
                 mv {workdir}/out.2.fq.gz {out2} && mv {workdir}/out.1.fq.gz {out1}",
                "bbduk.sh in={in1} out={workdir}/out.1.fq.gz entropy=0.7 threads={threads} && \
                 mv {workdir}/out.1.fq.gz {out1}",
                Some(
                    "bbduk.sh in={in1} out={workdir}/out.1.fq.gz entropy=0.7 threads={threads} && \
                     mv {workdir}/out.1.fq.gz {out1}",
                ),
            ),
        }
    }
}

impl PipelineConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&text)?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Tool settings for stages run through the external tool adapter.
    pub fn tool(&self, stage: Stage) -> Option<&ToolConfig> {
        match stage {
            Stage::Dedup => Some(&self.dedup.tool),
            Stage::AdapterTrim => Some(&self.adapter_trim),
            Stage::RrnaSplit => Some(&self.rrna_split),
            Stage::HostRemoval => None,
            Stage::LowComplexityMask => Some(&self.low_complexity),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency.max_parallel_samples == 0 || self.concurrency.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid("concurrency limits must be at least 1".to_string()));
        }
        if self.host.indices.is_empty() {
            return Err(ConfigError::Invalid("at least one host reference index is required".to_string()));
        }
        if let Some(index) = self.host.indices.iter().find(|index| index.name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "reference index {} has no name",
                index.path.display()
            )));
        }
        if self.host.pair_drop_policy == PairDropPolicy::KeepUnflaggedAsSingleton && !self.host.reports_single_mates() {
            warn!(
                "{:?} flags whole pairs, so `keep-unflagged-as-singleton` behaves like `discard-pair`",
                self.host.tool
            );
        }

        let invoked = [
            (Stage::Dedup, self.dedup.enabled),
            (Stage::AdapterTrim, true),
            (Stage::RrnaSplit, self.data_type == DataType::Metatranscriptome),
            (Stage::LowComplexityMask, true),
        ];
        for (stage, active) in invoked {
            let tool = self.tool(stage).filter(|_| active);
            if tool.is_some_and(|tool| tool.paired_command.trim().is_empty() || tool.single_command.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!("{stage} needs both a paired and a single-end command")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = PipelineConfig::from_yaml(indoc! {"
            data_type: metatranscriptome
            host:
              tool: hisat
              pair_drop_policy: keep-unflagged-as-singleton
              indices:
                - name: human
                  path: /refs/GRCh38
                - name: mouse
                  path: /refs/GRCm39
            concurrency:
              max_parallel_samples: 2
        "})
        .unwrap();

        assert_eq!(config.data_type, DataType::Metatranscriptome);
        assert_eq!(config.host.tool, HostTool::Hisat2);
        assert_eq!(config.host.pair_drop_policy, PairDropPolicy::KeepUnflaggedAsSingleton);
        assert_eq!(config.host.indices.len(), 2);
        assert_eq!(config.concurrency.max_parallel_samples, 2);
        assert_eq!(config.concurrency.max_concurrent_jobs, 4);
        assert_eq!(config.input.fastq1_suffix, "fastq.1.gz");
        assert!(config.host.paired_template().starts_with("hisat2"));
        config.validate().unwrap();
    }

    #[test]
    fn test_default_config_round_trips_through_yaml() {
        let config = PipelineConfig::default();
        let parsed = PipelineConfig::from_yaml(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validation_failures() {
        let config = PipelineConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = PipelineConfig::default();
        config.host.indices.push(ReferenceIndex {
            name: "human".to_string(),
            path: PathBuf::from("/refs/human"),
        });
        config.validate().unwrap();

        config.adapter_trim.single_command.clear();
        assert!(config.validate().is_err());

        config.adapter_trim = ToolConfig::default();
        config.concurrency.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_only_dedup_can_be_disabled() {
        let config = PipelineConfig::from_yaml(indoc! {"
            dedup:
              enabled: false
        "})
        .unwrap();
        assert!(!config.dedup.enabled);
        assert_eq!(config.dedup.tool, DedupConfig::default().tool);

        for stage in ["adapter_trim", "rrna_split", "low_complexity"] {
            let yaml = format!("{stage}:\n  enabled: false\n");
            assert!(
                matches!(PipelineConfig::from_yaml(&yaml), Err(ConfigError::Parse(_))),
                "{stage} accepted `enabled`"
            );
        }
    }

    #[test]
    fn test_keep_unflagged_policy_needs_mate_level_hits() {
        let mut host = HostConfig {
            pair_drop_policy: PairDropPolicy::KeepUnflaggedAsSingleton,
            ..HostConfig::default()
        };
        assert!(!host.reports_single_mates());
        host.tool = HostTool::Hisat2;
        assert!(host.reports_single_mates());
    }

    #[test]
    fn test_rrna_commands_only_required_for_metatranscriptome() {
        let mut config = PipelineConfig::default();
        config.host.indices.push(ReferenceIndex {
            name: "human".to_string(),
            path: PathBuf::from("/refs/human"),
        });
        config.rrna_split = ToolConfig::default();
        config.validate().unwrap();

        config.data_type = DataType::Metatranscriptome;
        assert!(config.validate().is_err());
    }
}
