//! The seam to external filtering tools.
//!
//! Stages other than host removal are run through a [`ToolAdapter`]. The
//! [`CommandAdapter`] renders the configured shell template for a stage and runs
//! it; every external process, including host screening, holds a [`JobSlot`]
//! while it runs.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crossbeam::channel::{bounded, Receiver, Sender};
use itertools::Itertools;
use log::{debug, info};

use crate::config::{DataType, PipelineConfig, ToolConfig};
use crate::error::{ConfigError, StageError};
use crate::stage::{Layout, Stage, StageFiles};
use crate::types::SampleReadSet;
use crate::util::{count_records, link_through};

/// A stage's product: the new read set and the number of read pairs (or single
/// reads) it holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageOutput {
    pub reads: SampleReadSet,
    pub count: u64,
}

pub trait ToolAdapter: Send + Sync {
    /// Run `stage` on `input`, writing into `target`.
    ///
    /// `target` is a staging location; the executor moves the files into place
    /// once the stage has succeeded.
    fn run(&self, stage: Stage, input: &SampleReadSet, target: &StageFiles) -> Result<StageOutput, StageError>;
}

/// Bounded pool of permits for external tool invocations.
#[derive(Clone)]
pub struct JobSlots {
    release: Sender<()>,
    acquire: Receiver<()>,
}

pub struct JobSlot<'a> {
    slots: &'a JobSlots,
}

impl JobSlots {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (release, acquire) = bounded(size);
        for _ in 0..size {
            let _ = release.send(());
        }
        JobSlots { release, acquire }
    }

    /// Block until a permit is free.
    pub fn acquire(&self) -> JobSlot<'_> {
        // both ends live in `self`, so the channel cannot disconnect here
        let _ = self.acquire.recv();
        JobSlot { slots: self }
    }

    pub fn available(&self) -> usize {
        self.acquire.len()
    }
}

impl Drop for JobSlot<'_> {
    fn drop(&mut self) {
        let _ = self.slots.release.send(());
    }
}

/// Substitute `{name}` placeholders in a command template.
pub fn render(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter()
        .fold(template.to_string(), |command, (name, value)| command.replace(&format!("{{{name}}}"), value))
}

const SHELL_BUILTINS: &[&str] = &["cd", "exit", "export", "set", "true", "false", "test", "["];

/// Programs a template launches: the first word of each `&&`, `||`, `|` or `;`
/// separated segment.
pub fn required_programs(template: &str) -> Vec<String> {
    template
        .split(['|', '&', ';'])
        .filter_map(|segment| segment.split_whitespace().next())
        .filter(|word| !word.contains('{') && !word.contains('='))
        .filter(|word| !word.starts_with(|c: char| c.is_ascii_digit() || c == '>' || c == '<'))
        .filter(|word| !SHELL_BUILTINS.contains(word))
        .map(str::to_string)
        .unique()
        .collect()
}

/// Check that every program named by the active templates is on `PATH`.
pub fn check_programs(templates: &[&str]) -> Result<(), ConfigError> {
    for program in templates.iter().flat_map(|template| required_programs(template)).unique() {
        match which::which(&program) {
            Ok(found) => debug!("found {program} at {}", found.display()),
            Err(_) => return Err(ConfigError::MissingProgram { program }),
        }
    }
    Ok(())
}

/// Run a rendered command with `sh -c`, sending its output to `log_path`.
pub fn run_shell(
    command: &str,
    log_path: &Path,
    slots: &JobSlots,
    stage: Stage,
    sample_id: &str,
) -> Result<(), StageError> {
    let log = File::options()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|err| StageError::io(log_path, err))?;
    let log_err = log.try_clone().map_err(|err| StageError::io(log_path, err))?;

    let _slot = slots.acquire();
    debug!("{sample_id}: {stage}: {command}");
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .status()
        .map_err(|source| StageError::ToolSpawn {
            stage,
            sample_id: sample_id.to_string(),
            source,
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(StageError::ToolInvocation {
            stage,
            sample_id: sample_id.to_string(),
            exit_status: status.code(),
        })
    }
}

/// Runs the shell templates from [`PipelineConfig`].
pub struct CommandAdapter<'a> {
    config: &'a PipelineConfig,
    layout: Layout,
    slots: JobSlots,
}

impl<'a> CommandAdapter<'a> {
    pub fn new(config: &'a PipelineConfig, slots: JobSlots) -> Self {
        CommandAdapter {
            config,
            layout: Layout::new(&config.output_dir),
            slots,
        }
    }

    /// Every template this adapter may run during the configured pipeline.
    pub fn templates(&self) -> Vec<&str> {
        let mut active = vec![&self.config.adapter_trim, &self.config.low_complexity];
        if self.config.dedup.enabled {
            active.push(&self.config.dedup.tool);
        }
        if self.config.data_type == DataType::Metatranscriptome {
            active.push(&self.config.rrna_split);
        }
        active
            .into_iter()
            .flat_map(|tool| {
                [tool.paired_command.as_str(), tool.single_command.as_str()]
                    .into_iter()
                    .chain(tool.orphan_command.as_deref())
            })
            .collect()
    }
}

fn path_text(path: Option<&Path>) -> String {
    path.map(|path| path.display().to_string()).unwrap_or_default()
}

impl ToolAdapter for CommandAdapter<'_> {
    fn run(&self, stage: Stage, input: &SampleReadSet, target: &StageFiles) -> Result<StageOutput, StageError> {
        let sample_id = input.sample_id();
        let tool = self.config.tool(stage).ok_or_else(|| StageError::ToolInvocation {
            stage,
            sample_id: sample_id.to_string(),
            exit_status: None,
        })?;
        let workdir = target.read1.with_extension("work");
        fs::create_dir_all(&workdir).map_err(|err| StageError::io(&workdir, err))?;
        let log_path = self.layout.log_path(stage, sample_id);

        let template = match input {
            SampleReadSet::Paired { .. } => &tool.paired_command,
            SampleReadSet::Unpaired { .. } => &tool.single_command,
        };
        let vars = [
            ("in1", input.read1().display().to_string()),
            ("in2", path_text(input.read2())),
            ("in3", path_text(input.orphan())),
            ("out1", target.read1.display().to_string()),
            ("out2", path_text(target.read2.as_deref())),
            ("out3", path_text(target.read3.as_deref())),
            ("workdir", workdir.display().to_string()),
            ("threads", tool.threads.to_string()),
            ("sample", sample_id.to_string()),
        ];
        info!("{sample_id}: running {stage}");
        run_shell(&render(template, &vars), &log_path, &self.slots, stage, sample_id)?;

        if let (Some(orphan), Some(out3)) = (input.orphan(), target.read3.as_deref()) {
            self.run_orphans(stage, tool, sample_id, orphan, out3, &workdir, &log_path)?;
        }
        let _ = fs::remove_dir_all(&workdir);

        let count = count_records(&target.read1)?;
        Ok(StageOutput {
            reads: target.read_set(sample_id),
            count,
        })
    }
}

impl CommandAdapter<'_> {
    #[allow(clippy::too_many_arguments)]
    fn run_orphans(
        &self,
        stage: Stage,
        tool: &ToolConfig,
        sample_id: &str,
        orphan: &Path,
        out3: &Path,
        workdir: &Path,
        log_path: &Path,
    ) -> Result<(), StageError> {
        // the paired template already wrote the singleton file
        if out3.exists() {
            return Ok(());
        }
        let empty = crate::reader::is_empty_fastq(orphan).map_err(|err| StageError::io(orphan, err))?;
        match (&tool.orphan_command, empty) {
            (Some(template), false) => {
                let orphan_workdir: PathBuf = workdir.join("orphans");
                fs::create_dir_all(&orphan_workdir).map_err(|err| StageError::io(&orphan_workdir, err))?;
                let vars = [
                    ("in1", orphan.display().to_string()),
                    ("out1", out3.display().to_string()),
                    ("workdir", orphan_workdir.display().to_string()),
                    ("threads", tool.threads.to_string()),
                    ("sample", sample_id.to_string()),
                ];
                run_shell(&render(template, &vars), log_path, &self.slots, stage, sample_id)
            }
            _ => link_through(orphan, out3).map_err(|err| StageError::io(out3, err)),
        }
    }
}
