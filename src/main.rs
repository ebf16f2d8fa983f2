use std::fs;
use std::path::PathBuf;
use std::process::exit;

use anyhow::{bail, Context};
use clap::{ArgAction, ArgMatches, ValueHint};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, LevelFilter};
use pluralizer::pluralize;

use shotgun_preprocess::config::{DataType, DEFAULT_CONFIG_FILE};
use shotgun_preprocess::executor::CancelToken;
use shotgun_preprocess::pair_handler::PairDropPolicy;
use shotgun_preprocess::{run_pipeline, summarize, PipelineConfig};

fn config_arg() -> clap::Arg {
    clap::arg!(-'c' --"config" <"pipeline.yml"> "pipeline configuration to use")
        .value_parser(clap::value_parser!(PathBuf))
        .value_hint(ValueHint::FilePath)
        .default_value(DEFAULT_CONFIG_FILE)
}

fn load_config(args: &ArgMatches) -> anyhow::Result<PipelineConfig> {
    let path = args.get_one::<PathBuf>("config").context("no configuration path")?;
    let mut config = PipelineConfig::from_path(path).with_context(|| format!("couldn't load {}", path.display()))?;

    if let Some(dir) = args.try_get_one::<PathBuf>("input-dir").ok().flatten() {
        config.input.dir = dir.clone();
    }
    if let Some(data_type) = args.try_get_one::<DataType>("data-type").ok().flatten() {
        config.data_type = *data_type;
    }
    if let Some(policy) = args.try_get_one::<PairDropPolicy>("pair-drop-policy").ok().flatten() {
        config.host.pair_drop_policy = *policy;
    }
    if let Some(jobs) = args.try_get_one::<u64>("jobs").ok().flatten() {
        config.concurrency.max_concurrent_jobs = usize::try_from(*jobs)?;
    }
    if let Some(samples) = args.try_get_one::<u64>("samples").ok().flatten() {
        config.concurrency.max_parallel_samples = usize::try_from(*samples)?;
    }
    Ok(config)
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} samples") {
        bar.set_style(style);
    }
    bar
}

fn run(args: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let cancel = CancelToken::default();
    let report = run_pipeline(&config, cancel, &progress_bar()).context("pipeline run failed")?;

    let failed: Vec<_> = report.failed().collect();
    for outcome in &failed {
        if let Some(err) = &outcome.error {
            error!("{}: {err}", outcome.sample_id);
        }
    }
    info!(
        "processed {}; {} in {}",
        pluralize("sample", report.outcomes.len() as isize, true),
        pluralize("row", report.table.rows.len() as isize, true),
        report.summary.display()
    );
    if !failed.is_empty() {
        error!("{} failed", pluralize("sample", failed.len() as isize, true));
        exit(1);
    }
    if !report.table.excluded.is_empty() {
        error!(
            "{} left out of the summary",
            pluralize("sample", report.table.excluded.len() as isize, true)
        );
        exit(1);
    }
    Ok(())
}

fn write_default_config(args: &ArgMatches) -> anyhow::Result<()> {
    let path = args.get_one::<PathBuf>("output").context("no output path")?;
    if path.exists() && !args.get_flag("force") {
        bail!("{} already exists; pass --force to overwrite it", path.display());
    }
    let text = PipelineConfig::default().to_yaml()?;
    fs::write(path, text).with_context(|| format!("couldn't write {}", path.display()))?;
    info!("wrote default configuration to {}", path.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cmd = clap::command!("shotgun-preprocess")
        .about("Quality-control pipeline for shotgun metagenome and metatranscriptome reads")
        .subcommand_required(true)
        .arg(clap::arg!(-'v' --"verbose" "log debug messages")
            .global(true)
            .action(ArgAction::SetTrue))
        .subcommand(clap::Command::new("run")
            .about("process every sample in the input directory and write the summary table")
            .arg(config_arg())
            .arg(clap::arg!(--"input-dir" <"dir"> "directory holding the raw reads")
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::DirPath))
            .arg(clap::arg!(--"data-type" <"type"> "kind of sequencing data")
                .value_parser(clap::value_parser!(DataType)))
            .arg(clap::arg!(--"pair-drop-policy" <"policy"> "what to do with a pair when only one mate is host")
                .visible_alias("pdp")
                .value_parser(clap::value_parser!(PairDropPolicy)))
            .arg(clap::arg!(-'j' --"jobs" <"n"> "external tool invocations allowed to run at once")
                .value_parser(clap::value_parser!(u64).range(1..)))
            .arg(clap::arg!(-'s' --"samples" <"n"> "samples processed at once")
                .value_parser(clap::value_parser!(u64).range(1..))))
        .subcommand(clap::Command::new("summarize")
            .visible_alias("summarise")
            .about("rebuild the summary table from the read counts of an earlier run")
            .arg(config_arg()))
        .subcommand(clap::Command::new("config")
            .about("write a default pipeline configuration")
            .arg(clap::arg!(-'o' --"output" <"file"> "where to write the configuration")
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::FilePath)
                .default_value(DEFAULT_CONFIG_FILE))
            .arg(clap::arg!(-'f' --"force" "overwrite an existing file")
                .action(ArgAction::SetTrue)));

    let args = cmd.get_matches();

    let level = if args.get_flag("verbose") { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match args.subcommand() {
        Some(("run", sub)) => run(sub),
        Some(("summarize", sub)) => {
            let config = load_config(sub)?;
            let (table, path) = summarize(&config).context("couldn't summarize read counts")?;
            info!("{} in {}", pluralize("row", table.rows.len() as isize, true), path.display());
            Ok(())
        }
        Some(("config", sub)) => write_default_config(sub),
        _ => unreachable!("a subcommand is required"),
    }
}
