//! Host screening strategies.
//!
//! A strategy screens reads against one reference index and reports the reads it
//! considers host. The two implementations differ only in how the screening
//! tool reports its hits: a plain list of read names, or SAM records.

use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use log::debug;
use noodles::sam;

use crate::config::{HostConfig, HostTool, ReferenceIndex};
use crate::error::StageError;
use crate::stage::Stage;
use crate::tool::{render, run_shell, JobSlots};
use crate::types::{ContaminantIdSet, MateHits};
use crate::util::normalize_read_id;

/// Reads handed to a screening call.
#[derive(Clone, Copy, Debug)]
pub enum ScreenInput<'a> {
    Pair { read1: &'a Path, read2: &'a Path },
    Single { reads: &'a Path },
}

pub trait HostRemovalStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Screen `input` against `index`, using `workdir` for scratch files.
    fn screen(
        &self,
        sample_id: &str,
        input: ScreenInput<'_>,
        index: &ReferenceIndex,
        workdir: &Path,
    ) -> Result<ContaminantIdSet, StageError>;
}

/// Pick the strategy for the configured host tool.
pub fn strategy_for(config: &HostConfig, slots: JobSlots) -> Box<dyn HostRemovalStrategy + '_> {
    match config.tool {
        HostTool::Bmtagger => Box::new(IdListScreener { config, slots }),
        HostTool::Hisat2 => Box::new(SamScreener { config, slots }),
    }
}

fn run_screen(
    config: &HostConfig,
    slots: &JobSlots,
    sample_id: &str,
    input: ScreenInput<'_>,
    index: &ReferenceIndex,
    workdir: &Path,
) -> Result<std::path::PathBuf, StageError> {
    let out = workdir.join("hits");
    let (template, in1, in2) = match input {
        ScreenInput::Pair { read1, read2 } => (config.paired_template(), read1, Some(read2)),
        ScreenInput::Single { reads } => (config.single_template(), reads, None),
    };
    let vars = [
        ("in1", in1.display().to_string()),
        ("in2", in2.map(|path| path.display().to_string()).unwrap_or_default()),
        ("index", index.path.display().to_string()),
        ("out", out.display().to_string()),
        ("workdir", workdir.display().to_string()),
        ("threads", config.threads.to_string()),
        ("sample", sample_id.to_string()),
    ];
    debug!("{sample_id}: screening against {}", index.name);
    run_shell(
        &render(template, &vars),
        &workdir.join("screen.log"),
        slots,
        Stage::HostRemoval,
        sample_id,
    )?;
    Ok(out)
}

/// Screener that writes one host read name per line, as bmtagger does.
///
/// Names are reported per fragment, so a hit on a pair flags both mates.
pub struct IdListScreener<'a> {
    config: &'a HostConfig,
    slots: JobSlots,
}

impl HostRemovalStrategy for IdListScreener<'_> {
    fn name(&self) -> &'static str {
        "bmtagger"
    }

    fn screen(
        &self,
        sample_id: &str,
        input: ScreenInput<'_>,
        index: &ReferenceIndex,
        workdir: &Path,
    ) -> Result<ContaminantIdSet, StageError> {
        let hits = run_screen(self.config, &self.slots, sample_id, input, index, workdir)?;
        let mates = match input {
            ScreenInput::Pair { .. } => MateHits::BOTH,
            ScreenInput::Single { .. } => MateHits::FIRST,
        };
        parse_id_list(&hits, mates)
    }
}

pub fn parse_id_list(path: &Path, mates: MateHits) -> Result<ContaminantIdSet, StageError> {
    // a screener with nothing to report may not create its output at all
    if !path.exists() {
        return Ok(ContaminantIdSet::default());
    }
    let file = fs::File::open(path).map_err(|err| StageError::io(path, err))?;
    let mut set = ContaminantIdSet::default();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| StageError::io(path, err))?;
        let id = normalize_read_id(&line);
        if !id.is_empty() {
            set.insert(id, mates);
        }
    }
    Ok(set)
}

/// Aligner that writes SAM, as hisat2 does. Every mapped record is a host hit;
/// the first/second-in-pair flags say which mate it belongs to.
pub struct SamScreener<'a> {
    config: &'a HostConfig,
    slots: JobSlots,
}

impl HostRemovalStrategy for SamScreener<'_> {
    fn name(&self) -> &'static str {
        "hisat2"
    }

    fn screen(
        &self,
        sample_id: &str,
        input: ScreenInput<'_>,
        index: &ReferenceIndex,
        workdir: &Path,
    ) -> Result<ContaminantIdSet, StageError> {
        let hits = run_screen(self.config, &self.slots, sample_id, input, index, workdir)?;
        parse_sam_hits(&hits)
    }
}

pub fn parse_sam_hits(path: &Path) -> Result<ContaminantIdSet, StageError> {
    let malformed = |err: io::Error| StageError::ScreenOutput {
        path: path.to_path_buf(),
        detail: err.to_string(),
    };
    let file = fs::File::open(path).map_err(|err| StageError::io(path, err))?;
    let mut reader = sam::io::Reader::new(BufReader::new(file));
    reader.read_header().map_err(malformed)?;

    let mut set = ContaminantIdSet::default();
    for result in reader.records() {
        let record = result.map_err(malformed)?;
        let flags = record.flags().map_err(malformed)?;
        if flags.is_unmapped() {
            continue;
        }
        let Some(name) = record.name() else {
            return Err(StageError::ScreenOutput {
                path: path.to_path_buf(),
                detail: "mapped record without a read name".to_string(),
            });
        };
        let mates = match (flags.is_first_segment(), flags.is_last_segment()) {
            (true, true) => MateHits::BOTH,
            (false, true) => MateHits::SECOND,
            _ => MateHits::FIRST,
        };
        set.insert(normalize_read_id(&String::from_utf8_lossy(name)), mates);
    }
    Ok(set)
}
