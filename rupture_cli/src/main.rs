use rupture_core::archive::CrashArchive;
use rupture_core::config::RuptureConfig;
use rupture_core::corpus::{Corpus, InMemoryCorpus};
use rupture_core::executor::{CommandExecutor, Executor};
use rupture_core::fuzzer::Fuzzer;
use rupture_core::mutator::RangeOverwriteMutator;
use rupture_core::stats::ConsoleReporter;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Executable under test, invoked as `<target> -x <input-file>`.
    #[clap(long)]
    target: Option<PathBuf>,
    #[clap(long)]
    corpus_dir: Option<PathBuf>,
    #[clap(long)]
    crash_dir: Option<PathBuf>,
    #[clap(short = 'j', long)]
    max_workers: Option<usize>,
    /// Stop after this many cases instead of running until Ctrl-C.
    #[clap(short, long)]
    iterations: Option<u64>,
    #[clap(long)]
    timeout_ms: Option<u64>,
}

/// Exit status used when a second interrupt aborts the drain.
const FORCED_EXIT_CODE: i32 = 130;

#[derive(Debug, PartialEq, Eq)]
enum InterruptAction {
    /// First interrupt: stop dispatching and let in-flight cases finish.
    Drain,
    /// A later interrupt while still draining: exit right away.
    ForceExit,
}

fn on_interrupt(cancel: &AtomicBool) -> InterruptAction {
    if cancel.swap(true, Ordering::SeqCst) {
        InterruptAction::ForceExit
    } else {
        InterruptAction::Drain
    }
}

fn load_config(cli: &Cli) -> Result<RuptureConfig, anyhow::Error> {
    let mut config = match &cli.config_file {
        Some(config_path) => {
            log::info!("Loading configuration from specified path: {config_path:?}");
            RuptureConfig::load_from_file(config_path)?
        }
        None => {
            let default_config_path = PathBuf::from("config.toml");
            if default_config_path.exists() {
                log::info!(
                    "No config file specified via CLI, loading default: {default_config_path:?}"
                );
                RuptureConfig::load_from_file(&default_config_path)?
            } else {
                log::info!(
                    "No config file specified and default 'config.toml' not found, using built-in defaults."
                );
                RuptureConfig::default()
            }
        }
    };

    if let Some(target) = &cli.target {
        config.target.path = target.clone();
    }
    if let Some(corpus_dir) = &cli.corpus_dir {
        config.corpus.dir = corpus_dir.clone();
    }
    if let Some(crash_dir) = &cli.crash_dir {
        config.crashes.dir = crash_dir.clone();
    }
    if let Some(max_workers) = cli.max_workers {
        config.fuzzer.max_workers = max_workers;
    }
    if let Some(iterations) = cli.iterations {
        config.fuzzer.max_iterations = Some(iterations);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.target.timeout_ms = Some(timeout_ms);
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    log::debug!("Effective configuration: {config:#?}");

    let corpus: InMemoryCorpus<Vec<u8>> = InMemoryCorpus::load(&config.corpus.dir)
        .with_context(|| format!("Failed to load corpus from {:?}", config.corpus.dir))?;

    let executor = CommandExecutor::new(config.executor_config());
    executor
        .preflight()
        .context("Target cannot be executed")?;

    let corpus: Arc<dyn Corpus<Vec<u8>>> = Arc::new(corpus);
    let executor: Arc<dyn Executor<Vec<u8>>> = Arc::new(executor);
    let mut fuzzer = Fuzzer::new(
        corpus,
        executor,
        RangeOverwriteMutator,
        CrashArchive::new(config.crashes.dir.clone()),
        Box::new(ConsoleReporter::stdout()),
        &config.fuzzer,
    )?;

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_cancel = Arc::clone(&cancel);
    ctrlc::set_handler(move || match on_interrupt(&handler_cancel) {
        InterruptAction::Drain => {
            println!("\r[*] Exiting...");
            log::info!("Waiting for in-flight cases, press Ctrl-C again to abort");
        }
        InterruptAction::ForceExit => {
            log::warn!("Second interrupt, abandoning in-flight cases");
            std::process::exit(FORCED_EXIT_CODE);
        }
    })
    .context("Failed to install Ctrl-C handler")?;

    log::info!(
        "Fuzzing {:?} with corpus {:?}, crashes go to {:?}",
        config.target.path,
        config.corpus.dir,
        config.crashes.dir
    );
    let summary = fuzzer.run(&cancel);
    log::info!(
        "Stopped after {} cases, {} crashing",
        summary.cases_completed,
        summary.crashes
    );
    Ok(())
}
