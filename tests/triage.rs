mod common;

use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;

use shotgun_preprocess::config::ReferenceIndex;
use shotgun_preprocess::error::StageError;
use shotgun_preprocess::pair_handler::PairDropPolicy;
use shotgun_preprocess::stage::{Layout, Stage, StageFiles};
use shotgun_preprocess::triage::{TriageEngine, TriageOutcome};
use shotgun_preprocess::types::{MateHits, PairingMode, SampleReadSet};

use common::*;

struct Scratch {
    dir: tempfile::TempDir,
}

impl Scratch {
    fn new() -> Self {
        Scratch {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Clean and host targets under a fresh output root.
    fn targets(&self, root: &str, mode: PairingMode) -> (StageFiles, StageFiles) {
        let layout = Layout::new(self.path().join(root));
        layout.create_dirs().unwrap();
        (
            layout.stage_files(Stage::HostRemoval, "S1", mode),
            layout.host_files("S1", mode),
        )
    }
}

fn paired_input(dir: &Path, ids: &[&str], orphans: Option<&[&str]>) -> SampleReadSet {
    let (read1, read2) = write_paired(dir, "S1", ids);
    let orphan = orphans.map(|orphans| {
        let path = dir.join("S1.fastq.3.gz");
        fs::write(&path, fastq(orphans, None)).unwrap();
        path
    });
    SampleReadSet::Paired {
        sample_id: "S1".to_string(),
        read1,
        read2,
        orphan,
    }
}

fn triage(
    screener: &FakeScreener,
    indices: &[ReferenceIndex],
    policy: PairDropPolicy,
    input: &SampleReadSet,
    targets: &(StageFiles, StageFiles),
    workdir: &Path,
) -> Result<TriageOutcome, StageError> {
    TriageEngine::new(screener, indices, policy, true).run(input, &targets.0, &targets.1, workdir)
}

#[test]
fn test_hits_are_unioned_across_indices() {
    let scratch = Scratch::new();
    let input = paired_input(&scratch.path().join("in"), &["a", "b", "c", "d"], None);
    let screener = FakeScreener::default()
        .flag_pair("human", "a", MateHits::BOTH)
        .flag_pair("mouse", "c", MateHits::BOTH)
        .flag_pair("mouse", "a", MateHits::BOTH);
    let indices = [index("human"), index("mouse")];
    let targets = scratch.targets("out", PairingMode::Paired);

    let outcome = triage(&screener, &indices, PairDropPolicy::DiscardPair, &input, &targets, scratch.path()).unwrap();
    assert_eq!(outcome.count, 2);
    assert_eq!(outcome.paired_flagged, 2);
    assert_eq!(read_ids(&targets.0.read1), vec!["b/1", "d/1"]);
    assert_eq!(read_ids(&targets.1.read1), vec!["a/1", "c/1"]);
    assert_eq!(
        screener.calls(),
        vec![("human".to_string(), true), ("mouse".to_string(), true)]
    );
}

#[test]
fn test_triage_of_clean_output_is_a_no_op() {
    let scratch = Scratch::new();
    let input = paired_input(&scratch.path().join("in"), &["a", "b", "c"], Some(&["s1", "s2"]));
    let screener = FakeScreener::default()
        .flag_pair("human", "b", MateHits::BOTH)
        .flag_single("human", "s2");
    let indices = [index("human")];

    let first_targets = scratch.targets("first", PairingMode::Paired);
    let first = triage(&screener, &indices, PairDropPolicy::DiscardPair, &input, &first_targets, &scratch.path().join("w1"))
        .unwrap();
    let second_targets = scratch.targets("second", PairingMode::Paired);
    let second = triage(
        &screener,
        &indices,
        PairDropPolicy::DiscardPair,
        &first.clean,
        &second_targets,
        &scratch.path().join("w2"),
    )
    .unwrap();

    assert_eq!(second.count, first.count);
    assert_eq!(second.partition.host_pairs, 0);
    assert_eq!(second.partition.host_singletons, 0);
    assert_eq!(read_ids(&second_targets.0.read1), read_ids(&first_targets.0.read1));
    assert_eq!(
        read_ids(second_targets.0.read3.as_deref().unwrap()),
        vec!["s1".to_string()]
    );
}

#[test]
fn test_empty_singletons_are_not_screened() {
    let scratch = Scratch::new();
    let input = paired_input(&scratch.path().join("in"), &["a", "b"], Some(&[]));
    let screener = FakeScreener::default();
    let indices = [index("human"), index("mouse")];
    let targets = scratch.targets("out", PairingMode::Paired);

    let outcome = triage(&screener, &indices, PairDropPolicy::DiscardPair, &input, &targets, scratch.path()).unwrap();
    assert_eq!(outcome.count, 2);
    assert!(screener.calls().iter().all(|(_, paired)| *paired));
    assert!(!targets.0.read3.as_deref().unwrap().exists());
    assert_eq!(outcome.clean.orphan(), None);
}

#[test]
fn test_keep_unflagged_mate_as_singleton() {
    let scratch = Scratch::new();
    let input = paired_input(&scratch.path().join("in"), &["a", "b", "c"], None);
    let screener = FakeScreener::default()
        .flag_pair("human", "a", MateHits::SECOND)
        .flag_pair("human", "c", MateHits::FIRST);
    let indices = [index("human")];
    let targets = scratch.targets("out", PairingMode::Paired);

    let outcome = triage(
        &screener,
        &indices,
        PairDropPolicy::KeepUnflaggedAsSingleton,
        &input,
        &targets,
        scratch.path(),
    )
    .unwrap();

    assert_eq!(outcome.count, 1);
    assert_eq!(outcome.partition.split_pairs, 2);
    assert_eq!(read_ids(&targets.0.read1), vec!["b/1"]);
    assert_eq!(read_ids(targets.0.read3.as_deref().unwrap()), vec!["a/1", "c/2"]);
    assert_eq!(read_ids(targets.1.read3.as_deref().unwrap()), vec!["a/2", "c/1"]);
    assert!(read_ids(&targets.1.read1).is_empty());
}

#[test]
fn test_discard_pair_when_one_mate_flagged() {
    let scratch = Scratch::new();
    let input = paired_input(&scratch.path().join("in"), &["a", "b"], None);
    let screener = FakeScreener::default().flag_pair("human", "a", MateHits::SECOND);
    let indices = [index("human")];
    let targets = scratch.targets("out", PairingMode::Paired);

    let outcome = triage(&screener, &indices, PairDropPolicy::DiscardPair, &input, &targets, scratch.path()).unwrap();
    assert_eq!(outcome.count, 1);
    assert_eq!(read_ids(&targets.1.read1), vec!["a/1"]);
    assert_eq!(read_ids(targets.1.read2.as_deref().unwrap()), vec!["a/2"]);
}

#[test]
fn test_mismatched_mates_are_corrupt() {
    let scratch = Scratch::new();
    let dir = scratch.path().join("in");
    let (read1, read2) = write_paired(&dir, "S1", &["a", "b", "c"]);
    fs::write(&read2, fastq(&["a", "x", "c"], Some(2))).unwrap();
    let input = SampleReadSet::Paired {
        sample_id: "S1".to_string(),
        read1,
        read2,
        orphan: None,
    };
    let targets = scratch.targets("out", PairingMode::Paired);

    let err = triage(
        &FakeScreener::default(),
        &[index("human")],
        PairDropPolicy::DiscardPair,
        &input,
        &targets,
        scratch.path(),
    )
    .unwrap_err();
    assert!(matches!(err, StageError::CorruptPairing { record: 2, .. }), "{err}");
}

#[test]
fn test_unequal_mate_counts_are_corrupt() {
    let scratch = Scratch::new();
    let dir = scratch.path().join("in");
    let (read1, read2) = write_paired(&dir, "S1", &["a", "b"]);
    fs::write(&read2, fastq(&["a"], Some(2))).unwrap();
    let input = SampleReadSet::Paired {
        sample_id: "S1".to_string(),
        read1,
        read2,
        orphan: None,
    };
    let targets = scratch.targets("out", PairingMode::Paired);

    let err = triage(
        &FakeScreener::default(),
        &[index("human")],
        PairDropPolicy::DiscardPair,
        &input,
        &targets,
        scratch.path(),
    )
    .unwrap_err();
    assert!(matches!(err, StageError::CorruptPairing { .. }), "{err}");
}

#[test]
fn test_screening_failure_writes_nothing() {
    let scratch = Scratch::new();
    let input = paired_input(&scratch.path().join("in"), &["a", "b"], None);
    let screener = FakeScreener {
        failing_index: Some("mouse".to_string()),
        ..FakeScreener::default().flag_pair("human", "a", MateHits::BOTH)
    };
    let targets = scratch.targets("out", PairingMode::Paired);

    let err = triage(
        &screener,
        &[index("human"), index("mouse")],
        PairDropPolicy::DiscardPair,
        &input,
        &targets,
        scratch.path(),
    )
    .unwrap_err();
    assert!(matches!(err, StageError::ToolInvocation { stage: Stage::HostRemoval, .. }));
    assert!(!targets.0.read1.exists());
    assert!(!targets.1.read1.exists());
}

#[test]
fn test_single_end_partition() {
    let scratch = Scratch::new();
    let read1 = write_single(&scratch.path().join("in"), "S1", &["a", "b", "c"]);
    let input = SampleReadSet::Unpaired {
        sample_id: "S1".to_string(),
        read1,
    };
    let screener = FakeScreener::default().flag_single("human", "b");
    let targets = scratch.targets("out", PairingMode::SingleEnd);

    let outcome = triage(&screener, &[index("human")], PairDropPolicy::DiscardPair, &input, &targets, scratch.path())
        .unwrap();
    assert_eq!(outcome.count, 2);
    assert_eq!(outcome.singleton_flagged, 1);
    assert_eq!(read_ids(&targets.0.read1), vec!["a", "c"]);
    assert_eq!(read_ids(&targets.1.read1), vec!["b"]);
    assert_eq!(screener.calls(), vec![("human".to_string(), false)]);
}
