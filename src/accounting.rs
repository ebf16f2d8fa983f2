//! Read-count accounting: per-stage losses and final retention for each sample.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use itertools::Itertools;
use log::{error, warn};

use crate::error::AccountingError;
use crate::stage::{Stage, Step};
use crate::types::StageCount;
use crate::util::read_nreads;

#[derive(Clone, Debug, PartialEq)]
pub struct StageLoss {
    pub stage: Stage,
    pub reads: u64,
    pub percent: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AccountingRow {
    pub sample_id: String,
    pub input_reads: u64,
    pub output_reads: u64,
    pub losses: Vec<StageLoss>,
    pub remaining_percent: f64,
}

impl AccountingRow {
    pub fn loss(&self, stage: Stage) -> u64 {
        self.losses
            .iter()
            .find(|loss| loss.stage == stage)
            .map_or(0, |loss| loss.reads)
    }

    fn loss_percent(&self, stage: Stage) -> f64 {
        self.losses
            .iter()
            .find(|loss| loss.stage == stage)
            .map_or(0.0, |loss| loss.percent)
    }

    pub fn total_loss(&self) -> u64 {
        self.losses.iter().map(|loss| loss.reads).sum()
    }

    /// `input = output + Σ losses`, before any rounding.
    pub fn is_conserved(&self) -> bool {
        self.output_reads + self.total_loss() == self.input_reads
    }
}

/// `part` as a percentage of `whole`, rounded to two decimals with ties to even.
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 100.0 * 100.0).round_ties_even() / 100.0
}

/// Build the accounting row of one sample. `steps` are the steps that must be
/// present, in pipeline order, starting with [`Step::Input`].
pub fn account_sample(sample_id: &str, counts: &[StageCount], steps: &[Step]) -> Result<AccountingRow, AccountingError> {
    let by_step: BTreeMap<Step, u64> = counts
        .iter()
        .filter(|count| count.sample_id == sample_id)
        .map(|count| (count.step, count.read_pairs))
        .collect();

    let missing: Vec<Step> = std::iter::once(&Step::Input)
        .chain(steps.iter().filter(|step| **step != Step::Input))
        .filter(|step| !by_step.contains_key(step))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(AccountingError::IncompleteAccounting {
            sample_id: sample_id.to_string(),
            missing,
        });
    }

    let input_reads = by_step[&Step::Input];
    let mut previous = input_reads;
    let mut losses = Vec::new();
    for step in steps {
        let Step::After(stage) = *step else { continue };
        let current = by_step[step];
        let reads = previous.checked_sub(current).ok_or_else(|| AccountingError::ConservationViolated {
            sample_id: sample_id.to_string(),
            step: *step,
            previous,
            current,
        })?;
        losses.push(StageLoss {
            stage,
            reads,
            percent: percent(reads, input_reads),
        });
        previous = current;
    }

    let row = AccountingRow {
        sample_id: sample_id.to_string(),
        input_reads,
        output_reads: previous,
        remaining_percent: percent(previous, input_reads),
        losses,
    };
    debug_assert!(row.is_conserved());
    Ok(row)
}

#[derive(Debug, Default)]
pub struct AccountingTable {
    pub rows: Vec<AccountingRow>,
    pub excluded: Vec<AccountingError>,
}

/// Account for every sample found in `counts`. Samples that can't be accounted
/// for are left out of the table with a warning.
pub fn aggregate(counts: impl IntoIterator<Item = StageCount>, steps: &[Step]) -> AccountingTable {
    let mut by_sample: BTreeMap<String, Vec<StageCount>> = BTreeMap::new();
    for count in counts {
        let sample = by_sample.entry(count.sample_id.clone()).or_default();
        if sample.iter().any(|seen| seen.step == count.step) {
            warn!("{}: ignoring repeated count for {}", count.sample_id, count.step);
            continue;
        }
        sample.push(count);
    }

    let mut table = AccountingTable::default();
    for (sample_id, counts) in by_sample {
        match account_sample(&sample_id, &counts, steps) {
            Ok(row) => table.rows.push(row),
            Err(err @ AccountingError::IncompleteAccounting { .. }) => {
                warn!("{err}; leaving it out of the summary");
                table.excluded.push(err);
            }
            Err(err) => {
                error!("{err}; leaving it out of the summary");
                table.excluded.push(err);
            }
        }
    }
    table
}

/// Read every `<sample>_<step>.nreads` file in `dir`.
pub fn load_counts(dir: &Path) -> Result<Vec<StageCount>, AccountingError> {
    let io_error = |source| AccountingError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut counts = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some((sample_id, step)) = name
            .strip_suffix(".nreads")
            .and_then(|stem| stem.rsplit_once('_'))
            .and_then(|(sample_id, label)| Some((sample_id, Step::from_label(label)?)))
        else {
            continue;
        };
        let read_pairs = read_nreads(&path)
            .map_err(|source| AccountingError::Io {
                path: path.clone(),
                source,
            })?
            .ok_or_else(|| AccountingError::MalformedCount { path: path.clone() })?;
        counts.push(StageCount {
            sample_id: sample_id.to_string(),
            step,
            read_pairs,
        });
    }
    Ok(counts)
}

const LEADING_COLUMNS: [&str; 6] = [
    "sample_id",
    "input_reads",
    "output_reads",
    "duplicates",
    "adapter_contamination",
    "rrna",
];

impl AccountingTable {
    /// Write the table as tab-separated text. The rRNA columns are present only
    /// when `with_rrna` is set.
    pub fn write_tsv(&self, mut out: impl Write, with_rrna: bool) -> io::Result<()> {
        let mut header: Vec<&str> = LEADING_COLUMNS.to_vec();
        if !with_rrna {
            header.pop();
        }
        header.extend(["host", "low_complexity", "duplicates_percent", "adapters_percent"]);
        if with_rrna {
            header.push("rrna_percent");
        }
        header.extend(["host_percent", "low_complexity_percent", "remaining_percent"]);
        writeln!(out, "{}", header.join("\t"))?;

        for row in &self.rows {
            let mut losses = vec![Stage::Dedup, Stage::AdapterTrim];
            if with_rrna {
                losses.push(Stage::RrnaSplit);
            }
            losses.extend([Stage::HostRemoval, Stage::LowComplexityMask]);

            let fields = [row.sample_id.clone(), row.input_reads.to_string(), row.output_reads.to_string()]
                .into_iter()
                .chain(losses.iter().map(|stage| row.loss(*stage).to_string()))
                .chain(losses.iter().map(|stage| format!("{:?}", row.loss_percent(*stage))))
                .chain(std::iter::once(format!("{:?}", row.remaining_percent)));
            writeln!(out, "{}", fields.format("\t"))?;
        }
        Ok(())
    }

    pub fn write_tsv_file(&self, path: &Path, with_rrna: bool) -> io::Result<()> {
        let mut file = io::BufWriter::new(fs::File::create(path)?);
        self.write_tsv(&mut file, with_rrna)?;
        file.flush()
    }

    /// Whether any row lost reads to rRNA separation.
    pub fn has_rrna_losses(&self) -> bool {
        self.rows.iter().any(|row| row.loss(Stage::RrnaSplit) > 0)
    }
}
