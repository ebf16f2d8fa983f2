//! Turns a directory of raw FASTQ files into one read set per sample.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use itertools::Itertools;
use log::info;

use crate::error::ResolveError;
use crate::types::{PairingMode, SampleReadSet};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedInput {
    pub mode: PairingMode,
    /// Sorted by sample ID.
    pub samples: Vec<SampleReadSet>,
}

/// Sample stub of `name`: everything before `suffix`, without the joining dot.
fn stub<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    let stub = name.strip_suffix(suffix)?;
    let stub = stub.strip_suffix('.').unwrap_or(stub);
    (!stub.is_empty()).then_some(stub)
}

/// Stub to file name, for every name carrying `suffix`.
fn stubs(names: &[String], suffix: &str) -> BTreeMap<String, String> {
    names
        .iter()
        .filter_map(|name| Some((stub(name, suffix)?.to_string(), name.clone())))
        .collect()
}

/// Find every sample in `dir`. All samples must share one pairing mode.
pub fn resolve(dir: &Path, fastq1_suffix: &str, fastq2_suffix: &str) -> Result<ResolvedInput, ResolveError> {
    let io_error = |source| ResolveError::Io {
        dir: dir.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }

    let first = stubs(&names, fastq1_suffix);
    let second = stubs(&names, fastq2_suffix);
    if first.is_empty() {
        return Err(ResolveError::NoInput {
            dir: dir.to_path_buf(),
            suffix: fastq1_suffix.to_string(),
        });
    }

    let (mode, samples) = if second.is_empty() {
        let samples = first
            .iter()
            .map(|(sample, name)| SampleReadSet::Unpaired {
                sample_id: sample.clone(),
                read1: dir.join(name),
            })
            .collect();
        (PairingMode::SingleEnd, samples)
    } else {
        if !first.keys().eq(second.keys()) {
            let unpaired = first
                .keys()
                .filter(|sample| !second.contains_key(*sample))
                .chain(second.keys().filter(|sample| !first.contains_key(*sample)))
                .join(", ");
            return Err(ResolveError::InputMismatch(format!(
                "{} first-mate and {} second-mate files; no partner for {unpaired}",
                first.len(),
                second.len()
            )));
        }
        let samples = first
            .iter()
            .zip(second.values())
            .map(|((sample, name1), name2)| SampleReadSet::Paired {
                sample_id: sample.clone(),
                read1: dir.join(name1),
                read2: dir.join(name2),
                orphan: None,
            })
            .collect();
        (PairingMode::Paired, samples)
    };

    info!(
        "found {} {} in {}",
        pluralizer::pluralize("sample", first.len() as isize, true),
        match mode {
            PairingMode::Paired => "with paired reads",
            PairingMode::SingleEnd => "with single-end reads",
        },
        dir.display()
    );
    Ok(ResolvedInput { mode, samples })
}
