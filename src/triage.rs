//! Host-contamination triage: screen a sample against every reference index,
//! union the hits and partition the reads into clean and host outputs.

use std::fs;
use std::path::Path;

use bio::io::fastq;
use log::{debug, info};
use rayon::prelude::*;

use crate::config::ReferenceIndex;
use crate::error::StageError;
use crate::host::{HostRemovalStrategy, ScreenInput};
use crate::pair_handler::{PairDropPolicy, PairHandler, PartitionCounts};
use crate::reader::{is_empty_fastq, make_reader_pair, reader_from_path, FastqReader};
use crate::stage::StageFiles;
use crate::types::{ContaminantIdSet, OutputWriters, PairingMode, SampleReadSet};
use crate::util::normalize_read_id;
use crate::writer::{make_writer_pair, null_writer, writer_from_path};

pub struct TriageEngine<'a> {
    strategy: &'a dyn HostRemovalStrategy,
    indices: &'a [ReferenceIndex],
    policy: PairDropPolicy,
    keep_host_reads: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriageOutcome {
    pub clean: SampleReadSet,
    /// Read pairs (or single reads) in the clean mate-1 output.
    pub count: u64,
    pub partition: PartitionCounts,
    pub paired_flagged: usize,
    pub singleton_flagged: usize,
}

impl<'a> TriageEngine<'a> {
    pub fn new(
        strategy: &'a dyn HostRemovalStrategy,
        indices: &'a [ReferenceIndex],
        policy: PairDropPolicy,
        keep_host_reads: bool,
    ) -> Self {
        TriageEngine {
            strategy,
            indices,
            policy,
            keep_host_reads,
        }
    }

    /// Screen against every index concurrently and union the hits.
    ///
    /// Any failing index fails the whole call; no partial union is returned.
    pub fn screen_all(
        &self,
        sample_id: &str,
        input: ScreenInput<'_>,
        workdir: &Path,
    ) -> Result<ContaminantIdSet, StageError> {
        let sets = self
            .indices
            .par_iter()
            .enumerate()
            .map(|(n, index)| {
                let scratch = workdir.join(format!("index{}", n + 1));
                fs::create_dir_all(&scratch).map_err(|err| StageError::io(&scratch, err))?;
                let hits = self.strategy.screen(sample_id, input, index, &scratch)?;
                debug!("{sample_id}: {} flagged {} reads", index.name, hits.len());
                Ok(hits)
            })
            .collect::<Result<Vec<_>, StageError>>()?;

        Ok(sets.into_iter().fold(ContaminantIdSet::default(), ContaminantIdSet::union))
    }

    /// Screen and reconcile `input`, writing clean reads to `clean` and host reads
    /// to `host`. Both targets must match the pairing mode of `input`.
    pub fn run(
        &self,
        input: &SampleReadSet,
        clean: &StageFiles,
        host: &StageFiles,
        workdir: &Path,
    ) -> Result<TriageOutcome, StageError> {
        let sample_id = input.sample_id();
        info!(
            "{sample_id}: screening with {} against {} reference {}",
            self.strategy.name(),
            self.indices.len(),
            if self.indices.len() == 1 { "index" } else { "indices" }
        );

        let (paired_flagged, singleton_flagged) = match input {
            SampleReadSet::Paired { read1, read2, orphan, .. } => {
                let paired = self.screen_all(sample_id, ScreenInput::Pair { read1, read2 }, &workdir.join("paired"))?;
                let singletons = match orphan {
                    Some(orphan) if !is_empty_fastq(orphan).map_err(|err| StageError::io(orphan, err))? => {
                        self.screen_all(sample_id, ScreenInput::Single { reads: orphan }, &workdir.join("singletons"))?
                    }
                    _ => {
                        debug!("{sample_id}: no singletons to screen");
                        ContaminantIdSet::default()
                    }
                };
                (paired, singletons)
            }
            SampleReadSet::Unpaired { read1, .. } => (
                ContaminantIdSet::default(),
                self.screen_all(sample_id, ScreenInput::Single { reads: read1 }, &workdir.join("single"))?,
            ),
        };

        let partition = self.reconcile(input, &paired_flagged, &singleton_flagged, clean, host)?;
        info!(
            "{sample_id}: {} host, {} clean",
            partition.host_pairs + partition.host_singletons,
            partition.clean_pairs + partition.clean_singletons
        );

        let count = match input {
            SampleReadSet::Paired { .. } => partition.clean_pairs,
            SampleReadSet::Unpaired { .. } => partition.clean_singletons,
        };
        Ok(TriageOutcome {
            clean: clean.read_set(sample_id),
            count,
            partition,
            paired_flagged: paired_flagged.len(),
            singleton_flagged: singleton_flagged.len(),
        })
    }

    /// Partition the reads of `input` given the union of screening hits.
    pub fn reconcile(
        &self,
        input: &SampleReadSet,
        paired_flagged: &ContaminantIdSet,
        singleton_flagged: &ContaminantIdSet,
        clean: &StageFiles,
        host: &StageFiles,
    ) -> Result<PartitionCounts, StageError> {
        let sample_id = input.sample_id();
        let mut handler = PairHandler {
            clean: self.open_partition(clean, input, true)?,
            host: self.open_partition(host, input, self.keep_host_reads)?,
            policy: self.policy,
            counts: PartitionCounts::default(),
        };

        match input {
            SampleReadSet::Paired { read1, read2, orphan, .. } => {
                let (forward, reverse) =
                    make_reader_pair((read1.as_path(), read2.as_path())).map_err(|err| StageError::io(read1, err))?;
                reconcile_pairs(
                    sample_id,
                    &mut handler,
                    forward,
                    reverse,
                    (read1.as_path(), read2.as_path()),
                    paired_flagged,
                )?;
                if let Some(orphan) = orphan {
                    let reader = reader_from_path(orphan).map_err(|err| StageError::io(orphan, err))?;
                    reconcile_singles(&mut handler, reader, orphan, singleton_flagged, clean.read3.as_deref())?;
                }
            }
            SampleReadSet::Unpaired { read1, .. } => {
                let reader = reader_from_path(read1).map_err(|err| StageError::io(read1, err))?;
                reconcile_singles(&mut handler, reader, read1, singleton_flagged, Some(clean.read1.as_path()))?;
            }
        }

        let counts = handler.finish().map_err(|err| StageError::io(&clean.read1, err))?;

        // singleton outputs only exist when something landed in them
        if input.pairing_mode() == PairingMode::Paired {
            if counts.clean_singletons == 0 {
                remove_if_present(clean.read3.as_deref())?;
            }
            if counts.host_singletons == 0 {
                remove_if_present(host.read3.as_deref())?;
            }
        }
        Ok(counts)
    }

    fn open_partition(&self, files: &StageFiles, input: &SampleReadSet, write: bool) -> Result<OutputWriters, StageError> {
        if !write {
            return Ok(OutputWriters {
                paired: input.read2().map(|_| (null_writer(), null_writer())),
                unpaired: null_writer(),
            });
        }
        let open = |path: &Path| writer_from_path(path).map_err(|err| StageError::io(path, err));
        match (&files.read2, &files.read3) {
            (Some(read2), Some(read3)) => Ok(OutputWriters {
                paired: Some(make_writer_pair((files.read1.as_path(), read2.as_path())).map_err(|err| StageError::io(&files.read1, err))?),
                unpaired: open(read3.as_path())?,
            }),
            _ => Ok(OutputWriters {
                paired: None,
                unpaired: open(files.read1.as_path())?,
            }),
        }
    }
}

fn remove_if_present(path: Option<&Path>) -> Result<(), StageError> {
    match path {
        Some(path) if path.exists() => fs::remove_file(path).map_err(|err| StageError::io(path, err)),
        _ => Ok(()),
    }
}

fn reconcile_pairs(
    sample_id: &str,
    handler: &mut PairHandler,
    forward: FastqReader,
    reverse: FastqReader,
    paths: (&Path, &Path),
    flagged: &ContaminantIdSet,
) -> Result<(), StageError> {
    let parse = |path: &Path| {
        let path = path.to_path_buf();
        move |source| StageError::Fastq { path, source }
    };
    let mut forward = forward.records();
    let mut reverse = reverse.records();
    let mut record = 0u64;
    loop {
        record += 1;
        let pair = match (forward.next(), reverse.next()) {
            (None, None) => return Ok(()),
            (Some(rec_fwr), Some(rec_rev)) => (rec_fwr.map_err(parse(paths.0))?, rec_rev.map_err(parse(paths.1))?),
            (Some(_), None) | (None, Some(_)) => {
                return Err(StageError::CorruptPairing {
                    sample_id: sample_id.to_string(),
                    record,
                    detail: "mate files hold different numbers of reads".to_string(),
                })
            }
        };

        let id = normalize_read_id(pair.0.id());
        if id != normalize_read_id(pair.1.id()) {
            return Err(StageError::CorruptPairing {
                sample_id: sample_id.to_string(),
                record,
                detail: format!("`{}` is paired with `{}`", pair.0.id(), pair.1.id()),
            });
        }
        handler
            .handle_pair(&pair, flagged.get(id))
            .map_err(|err| StageError::io(paths.0, err))?;
    }
}

fn reconcile_singles(
    handler: &mut PairHandler,
    reader: FastqReader,
    path: &Path,
    flagged: &ContaminantIdSet,
    output: Option<&Path>,
) -> Result<(), StageError> {
    for record in reader.records() {
        let record: fastq::Record = record.map_err(|source| StageError::Fastq {
            path: path.to_path_buf(),
            source,
        })?;
        let host = flagged.contains(normalize_read_id(record.id()));
        handler
            .handle_single(&record, host)
            .map_err(|err| StageError::io(output.unwrap_or(path), err))?;
    }
    Ok(())
}
