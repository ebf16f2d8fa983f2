use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bio::io::fastq;

use crate::stage::Step;
use crate::writer::FastqWriter;

pub type FastqPair = (fastq::Record, fastq::Record);
pub type ReadId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairingMode {
    Paired,
    SingleEnd,
}

/// The read files of one sample at one point of the pipeline.
///
/// Never mutated; each stage produces a new one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SampleReadSet {
    Unpaired {
        sample_id: String,
        read1: PathBuf,
    },
    Paired {
        sample_id: String,
        read1: PathBuf,
        read2: PathBuf,
        orphan: Option<PathBuf>,
    },
}

impl SampleReadSet {
    pub fn sample_id(&self) -> &str {
        match self {
            SampleReadSet::Unpaired { sample_id, .. } | SampleReadSet::Paired { sample_id, .. } => sample_id,
        }
    }

    pub fn read1(&self) -> &Path {
        match self {
            SampleReadSet::Unpaired { read1, .. } | SampleReadSet::Paired { read1, .. } => read1,
        }
    }

    pub fn read2(&self) -> Option<&Path> {
        match self {
            SampleReadSet::Unpaired { .. } => None,
            SampleReadSet::Paired { read2, .. } => Some(read2),
        }
    }

    pub fn orphan(&self) -> Option<&Path> {
        match self {
            SampleReadSet::Unpaired { .. } => None,
            SampleReadSet::Paired { orphan, .. } => orphan.as_deref(),
        }
    }

    pub fn pairing_mode(&self) -> PairingMode {
        match self {
            SampleReadSet::Unpaired { .. } => PairingMode::SingleEnd,
            SampleReadSet::Paired { .. } => PairingMode::Paired,
        }
    }
}

/// Which mates of a read pair a screen flagged. Unpaired reads only use `first`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MateHits {
    pub first: bool,
    pub second: bool,
}

impl MateHits {
    pub const FIRST: MateHits = MateHits { first: true, second: false };
    pub const SECOND: MateHits = MateHits { first: false, second: true };
    pub const BOTH: MateHits = MateHits { first: true, second: true };

    pub fn merge(self, other: MateHits) -> MateHits {
        MateHits {
            first: self.first || other.first,
            second: self.second || other.second,
        }
    }

    pub fn any(self) -> bool {
        self.first || self.second
    }
}

/// Read identifiers flagged as host by at least one reference index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContaminantIdSet {
    hits: HashMap<ReadId, MateHits>,
}

impl ContaminantIdSet {
    pub fn insert(&mut self, id: impl Into<ReadId>, hits: MateHits) {
        let entry = self.hits.entry(id.into()).or_default();
        *entry = entry.merge(hits);
    }

    /// Set union; mate flags of shared identifiers are merged.
    pub fn union(mut self, other: ContaminantIdSet) -> ContaminantIdSet {
        if self.hits.len() < other.hits.len() {
            return other.union(self);
        }
        for (id, hits) in other.hits {
            self.insert(id, hits);
        }
        self
    }

    pub fn get(&self, id: &str) -> Option<MateHits> {
        self.hits.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some_and(MateHits::any)
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

impl FromIterator<(ReadId, MateHits)> for ContaminantIdSet {
    fn from_iter<T: IntoIterator<Item = (ReadId, MateHits)>>(iter: T) -> Self {
        let mut set = ContaminantIdSet::default();
        for (id, hits) in iter {
            set.insert(id, hits);
        }
        set
    }
}

/// Number of read pairs (or single reads) remaining after a step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageCount {
    pub sample_id: String,
    pub step: Step,
    pub read_pairs: u64,
}

/// Destinations for one partition of a sample: mates go to `paired`, anything
/// without a partner goes to `unpaired`.
pub struct OutputWriters {
    pub paired: Option<(FastqWriter, FastqWriter)>,
    pub unpaired: FastqWriter,
}
