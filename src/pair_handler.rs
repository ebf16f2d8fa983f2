use std::io;

use bio::io::fastq;
use clap::builder::PossibleValue;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use strum::VariantArray;

use crate::types::{FastqPair, MateHits, OutputWriters};
use crate::writer::null_writer;

/// What to do with a pair when only one mate was flagged as host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, VariantArray, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PairDropPolicy {
    DiscardPair,
    KeepUnflaggedAsSingleton,
}

impl ValueEnum for PairDropPolicy {
    fn value_variants<'a>() -> &'a [Self] {
        Self::VARIANTS
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(match self {
            PairDropPolicy::DiscardPair => PossibleValue::new("discard-pair")
                .help("send both mates to the host output when either one is flagged"),
            PairDropPolicy::KeepUnflaggedAsSingleton => PossibleValue::new("keep-unflagged-as-singleton")
                .help("keep the unflagged mate as a clean singleton, send only the flagged mate to host"),
        })
    }
}

/// Where the two mates of a pair end up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairRoute {
    Clean,
    Host,
    /// First mate stays clean as a singleton, second goes to host.
    KeepFirst,
    /// Second mate stays clean as a singleton, first goes to host.
    KeepSecond,
}

impl PairDropPolicy {
    pub fn route(&self, hits: MateHits) -> PairRoute {
        match (self, hits.first, hits.second) {
            (_, false, false) => PairRoute::Clean,
            (_, true, true) | (PairDropPolicy::DiscardPair, _, _) => PairRoute::Host,
            (PairDropPolicy::KeepUnflaggedAsSingleton, false, true) => PairRoute::KeepFirst,
            (PairDropPolicy::KeepUnflaggedAsSingleton, true, false) => PairRoute::KeepSecond,
        }
    }
}

/// Tally of where reads were routed during reconciliation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartitionCounts {
    pub clean_pairs: u64,
    pub host_pairs: u64,
    pub clean_singletons: u64,
    pub host_singletons: u64,
    /// Pairs broken up because only one mate was flagged.
    pub split_pairs: u64,
}

pub struct PairHandler {
    pub clean: OutputWriters,
    pub host: OutputWriters,
    pub policy: PairDropPolicy,
    pub counts: PartitionCounts,
}

impl Default for PairHandler {
    fn default() -> Self {
        let sink = || OutputWriters {
            paired: Some((null_writer(), null_writer())),
            unpaired: null_writer(),
        };
        PairHandler {
            clean: sink(),
            host: sink(),
            policy: PairDropPolicy::DiscardPair,
            counts: PartitionCounts::default(),
        }
    }
}

fn write_pair(writers: &mut OutputWriters, pair: &FastqPair) -> io::Result<()> {
    let (forward, reverse) = writers
        .paired
        .as_mut()
        .ok_or_else(|| io::Error::other("no paired output for a single-end partition"))?;
    forward.write_record(&pair.0)?;
    reverse.write_record(&pair.1)
}

impl PairHandler {
    pub fn handle_pair(&mut self, pair: &FastqPair, hits: Option<MateHits>) -> io::Result<()> {
        match self.policy.route(hits.unwrap_or_default()) {
            PairRoute::Clean => {
                write_pair(&mut self.clean, pair)?;
                self.counts.clean_pairs += 1;
            }
            PairRoute::Host => {
                write_pair(&mut self.host, pair)?;
                self.counts.host_pairs += 1;
            }
            PairRoute::KeepFirst => self.split(&pair.0, &pair.1)?,
            PairRoute::KeepSecond => self.split(&pair.1, &pair.0)?,
        }
        Ok(())
    }

    fn split(&mut self, keep: &fastq::Record, drop: &fastq::Record) -> io::Result<()> {
        self.clean.unpaired.write_record(keep)?;
        self.host.unpaired.write_record(drop)?;
        self.counts.split_pairs += 1;
        self.counts.clean_singletons += 1;
        self.counts.host_singletons += 1;
        Ok(())
    }

    pub fn handle_single(&mut self, record: &fastq::Record, flagged: bool) -> io::Result<()> {
        if flagged {
            self.host.unpaired.write_record(record)?;
            self.counts.host_singletons += 1;
        } else {
            self.clean.unpaired.write_record(record)?;
            self.counts.clean_singletons += 1;
        }
        Ok(())
    }

    /// Flush every writer and hand back the tally.
    pub fn finish(mut self) -> io::Result<PartitionCounts> {
        for writers in [&mut self.clean, &mut self.host] {
            if let Some((forward, reverse)) = writers.paired.as_mut() {
                forward.flush()?;
                reverse.flush()?;
            }
            writers.unpaired.flush()?;
        }
        Ok(self.counts)
    }
}
