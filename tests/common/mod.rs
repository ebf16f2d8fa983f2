#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use shotgun_preprocess::config::{PipelineConfig, ReferenceIndex};
use shotgun_preprocess::error::StageError;
use shotgun_preprocess::host::{HostRemovalStrategy, ScreenInput};
use shotgun_preprocess::reader::reader_from_path;
use shotgun_preprocess::stage::{Stage, StageFiles};
use shotgun_preprocess::tool::{StageOutput, ToolAdapter};
use shotgun_preprocess::types::{ContaminantIdSet, MateHits, SampleReadSet};
use shotgun_preprocess::writer::writer_from_path;

pub fn fastq(ids: &[&str], mate: Option<u8>) -> String {
    ids.iter()
        .map(|id| match mate {
            Some(mate) => format!("@{id}/{mate} extra\nACGTACGT\n+\nIIIIIIII\n"),
            None => format!("@{id}\nACGTACGT\n+\nIIIIIIII\n"),
        })
        .collect()
}

/// Write a paired sample into `dir` as plain text behind `.gz` names.
pub fn write_paired(dir: &Path, sample: &str, ids: &[&str]) -> (PathBuf, PathBuf) {
    fs::create_dir_all(dir).unwrap();
    let read1 = dir.join(format!("{sample}.fastq.1.gz"));
    let read2 = dir.join(format!("{sample}.fastq.2.gz"));
    fs::write(&read1, fastq(ids, Some(1))).unwrap();
    fs::write(&read2, fastq(ids, Some(2))).unwrap();
    (read1, read2)
}

pub fn write_single(dir: &Path, sample: &str, ids: &[&str]) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let read1 = dir.join(format!("{sample}.fastq.1.gz"));
    fs::write(&read1, fastq(ids, None)).unwrap();
    read1
}

/// Record IDs of a FASTQ file, in file order.
pub fn read_ids(path: &Path) -> Vec<String> {
    reader_from_path(path)
        .unwrap()
        .records()
        .map(|record| record.unwrap().id().to_string())
        .collect()
}

pub fn index(name: &str) -> ReferenceIndex {
    ReferenceIndex {
        name: name.to_string(),
        path: PathBuf::from(format!("/refs/{name}")),
    }
}

pub fn test_config(root: &Path, indices: &[&str]) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.output_dir = root.to_path_buf();
    config.input.dir = root.join("input.dir");
    config.host.indices = indices.iter().map(|name| index(name)).collect();
    config
}

/// Reads a stage drops: IDs carrying the stage's marker.
fn marker(stage: Stage) -> &'static str {
    match stage {
        Stage::Dedup => "_dup",
        Stage::AdapterTrim => "_adapt",
        Stage::RrnaSplit => "_rrna",
        Stage::HostRemoval => "_never",
        Stage::LowComplexityMask => "_lowc",
    }
}

/// In-process stand-in for the external filtering tools.
#[derive(Default)]
pub struct FakeAdapter {
    pub invocations: AtomicUsize,
    pub fail: Option<(String, Stage)>,
}

impl FakeAdapter {
    pub fn failing(sample_id: &str, stage: Stage) -> Self {
        FakeAdapter {
            invocations: AtomicUsize::new(0),
            fail: Some((sample_id.to_string(), stage)),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

fn filter_single(input: &Path, output: &Path, marker: &str) -> u64 {
    let mut writer = writer_from_path(output).unwrap();
    let mut kept = 0;
    for record in reader_from_path(input).unwrap().records() {
        let record = record.unwrap();
        if !record.id().contains(marker) {
            writer.write_record(&record).unwrap();
            kept += 1;
        }
    }
    writer.flush().unwrap();
    kept
}

fn filter_pairs(inputs: (&Path, &Path), outputs: (&Path, &Path), marker: &str) -> u64 {
    let mut forward = writer_from_path(outputs.0).unwrap();
    let mut reverse = writer_from_path(outputs.1).unwrap();
    let mut kept = 0;
    let pairs = reader_from_path(inputs.0)
        .unwrap()
        .records()
        .zip(reader_from_path(inputs.1).unwrap().records());
    for (rec_fwr, rec_rev) in pairs {
        let (rec_fwr, rec_rev) = (rec_fwr.unwrap(), rec_rev.unwrap());
        if !rec_fwr.id().contains(marker) {
            forward.write_record(&rec_fwr).unwrap();
            reverse.write_record(&rec_rev).unwrap();
            kept += 1;
        }
    }
    forward.flush().unwrap();
    reverse.flush().unwrap();
    kept
}

impl ToolAdapter for FakeAdapter {
    fn run(&self, stage: Stage, input: &SampleReadSet, target: &StageFiles) -> Result<StageOutput, StageError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let sample_id = input.sample_id();
        if self.fail.as_ref().is_some_and(|(sample, failing)| sample == sample_id && *failing == stage) {
            return Err(StageError::ToolInvocation {
                stage,
                sample_id: sample_id.to_string(),
                exit_status: Some(1),
            });
        }

        let marker = marker(stage);
        let count = match input {
            SampleReadSet::Paired { read1, read2, orphan, .. } => {
                let out2 = target.read2.as_deref().unwrap();
                let count = filter_pairs((read1.as_path(), read2.as_path()), (target.read1.as_path(), out2), marker);
                if let (Some(orphan), Some(out3)) = (orphan, target.read3.as_deref()) {
                    filter_single(orphan, out3, marker);
                }
                count
            }
            SampleReadSet::Unpaired { read1, .. } => filter_single(read1, &target.read1, marker),
        };
        Ok(StageOutput {
            reads: target.read_set(sample_id),
            count,
        })
    }
}

/// Screener reporting fixed hits per index name.
#[derive(Default)]
pub struct FakeScreener {
    pub pair_hits: HashMap<String, Vec<(String, MateHits)>>,
    pub single_hits: HashMap<String, Vec<String>>,
    pub failing_index: Option<String>,
    /// `(index, screened a pair)` for every call.
    pub calls: Mutex<Vec<(String, bool)>>,
}

impl FakeScreener {
    pub fn flag_pair(mut self, index: &str, id: &str, mates: MateHits) -> Self {
        self.pair_hits.entry(index.to_string()).or_default().push((id.to_string(), mates));
        self
    }

    pub fn flag_single(mut self, index: &str, id: &str) -> Self {
        self.single_hits.entry(index.to_string()).or_default().push(id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, bool)> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

impl HostRemovalStrategy for FakeScreener {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn screen(
        &self,
        sample_id: &str,
        input: ScreenInput<'_>,
        index: &ReferenceIndex,
        _workdir: &Path,
    ) -> Result<ContaminantIdSet, StageError> {
        let paired = matches!(input, ScreenInput::Pair { .. });
        self.calls.lock().unwrap().push((index.name.clone(), paired));
        if self.failing_index.as_deref() == Some(index.name.as_str()) {
            return Err(StageError::ToolInvocation {
                stage: Stage::HostRemoval,
                sample_id: sample_id.to_string(),
                exit_status: Some(2),
            });
        }
        let hits = if paired {
            self.pair_hits.get(&index.name).cloned().unwrap_or_default()
        } else {
            self.single_hits
                .get(&index.name)
                .into_iter()
                .flatten()
                .map(|id| (id.clone(), MateHits::FIRST))
                .collect()
        };
        Ok(hits.into_iter().collect())
    }
}
