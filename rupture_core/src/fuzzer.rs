use crate::archive::CrashArchive;
use crate::config::FuzzerSettings;
use crate::corpus::Corpus;
use crate::executor::{ExecutionResult, Executor};
use crate::input::Input;
use crate::mutator::Mutator;
use crate::scheduler::{RandomScheduler, Scheduler, SchedulerError};
use crate::stats::{CaseOutcome, CaseReport, FuzzSummary, Reporter};
use anyhow::anyhow;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long a saturated pool waits for a completion before rechecking the
/// cancel flag.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Sent by a worker thread when its case is done, whatever the outcome.
#[derive(Debug)]
struct Completion {
    case_id: u64,
    elapsed: Duration,
    outcome: CaseOutcome,
}

/// The bounded-concurrency fuzz loop.
///
/// Each case runs on its own worker thread, which mutates a copy of the
/// chosen seed, hands it to the executor and archives it if the target
/// crashed. At most `max_workers` cases are in flight at any time; a slot is
/// reclaimed as soon as any case finishes, regardless of dispatch order.
pub struct Fuzzer<I, M>
where
    I: Input,
    M: Mutator<I, ChaCha8Rng> + Clone + Send + 'static,
{
    corpus: Arc<dyn Corpus<I>>,
    executor: Arc<dyn Executor<I>>,
    mutator: M,
    archive: Arc<CrashArchive>,
    scheduler: Box<dyn Scheduler<I>>,
    reporter: Box<dyn Reporter>,
    rng: ChaCha8Rng,
    max_workers: usize,
    max_iterations: Option<u64>,
}

impl<I, M> Fuzzer<I, M>
where
    I: Input,
    M: Mutator<I, ChaCha8Rng> + Clone + Send + 'static,
{
    /// Builds a fuzzer with a uniform random seed scheduler and an
    /// entropy-seeded RNG.
    ///
    /// Fails if the corpus has nothing to schedule.
    pub fn new(
        corpus: Arc<dyn Corpus<I>>,
        executor: Arc<dyn Executor<I>>,
        mutator: M,
        archive: CrashArchive,
        reporter: Box<dyn Reporter>,
        settings: &FuzzerSettings,
    ) -> Result<Self, SchedulerError> {
        if corpus.is_empty() {
            return Err(SchedulerError::CorpusEmpty);
        }
        Ok(Self {
            corpus,
            executor,
            mutator,
            archive: Arc::new(archive),
            scheduler: Box::new(RandomScheduler::new()),
            reporter,
            rng: ChaCha8Rng::from_rng(&mut rand::rng()),
            max_workers: settings.max_workers.max(1),
            max_iterations: settings.max_iterations,
        })
    }

    /// Replaces the RNG used for seed selection and for deriving per-case RNGs.
    pub fn with_rng(mut self, rng: ChaCha8Rng) -> Self {
        self.rng = rng;
        self
    }

    /// Replaces the uniform seed scheduler.
    pub fn with_scheduler(mut self, scheduler: Box<dyn Scheduler<I>>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn archive(&self) -> &CrashArchive {
        &self.archive
    }

    /// Runs until `cancel` is set (or `max_iterations` cases were dispatched),
    /// then waits for every in-flight case before returning.
    pub fn run(&mut self, cancel: &AtomicBool) -> FuzzSummary {
        let start_time = Instant::now();
        let (tx, rx) = mpsc::channel::<Completion>();
        let mut in_flight: HashMap<u64, JoinHandle<()>> = HashMap::new();
        let mut summary = FuzzSummary::default();
        let mut next_case_id: u64 = 0;

        log::info!(
            "Fuzzing {} seeds with up to {} workers",
            self.corpus.len(),
            self.max_workers
        );

        loop {
            while let Ok(done) = rx.try_recv() {
                self.reclaim(done, &mut in_flight, &mut summary);
            }

            if cancel.load(Ordering::SeqCst) {
                log::info!("Stop requested, draining {} in-flight cases", in_flight.len());
                break;
            }
            if self.max_iterations.is_some_and(|max| next_case_id >= max) {
                log::info!("Dispatched {next_case_id} cases, iteration limit reached");
                break;
            }

            if in_flight.len() >= self.max_workers {
                match rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                    Ok(done) => self.reclaim(done, &mut in_flight, &mut summary),
                    Err(RecvTimeoutError::Timeout) => {}
                    // `tx` is still alive here, so this cannot happen.
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                continue;
            }

            let case_id = next_case_id;
            let seed_id = match self.scheduler.next(self.corpus.as_ref(), &mut self.rng) {
                Ok(id) => id,
                Err(e) => {
                    log::error!("Cannot schedule case {case_id}: {e}");
                    break;
                }
            };
            next_case_id += 1;

            match self.dispatch(case_id, seed_id, start_time, tx.clone()) {
                Ok(handle) => {
                    in_flight.insert(case_id, handle);
                }
                Err(e) => {
                    log::error!("Failed to start worker for case {case_id}: {e}");
                    let done = Completion {
                        case_id,
                        elapsed: start_time.elapsed(),
                        outcome: CaseOutcome::Failed(Arc::new(e.into())),
                    };
                    self.reclaim(done, &mut in_flight, &mut summary);
                }
            }
        }

        drop(tx);
        while !in_flight.is_empty() {
            match rx.recv() {
                Ok(done) => self.reclaim(done, &mut in_flight, &mut summary),
                Err(_) => break,
            }
        }
        for (case_id, handle) in in_flight.drain() {
            if handle.join().is_err() {
                log::error!("Worker for case {case_id} panicked");
            }
        }

        summary.cases_dispatched = next_case_id;
        summary.elapsed = start_time.elapsed();
        log::info!(
            "{} unique crash records in {:?}",
            self.archive.len(),
            self.archive.dir()
        );
        self.reporter.finish(&summary);
        summary
    }

    fn dispatch(
        &mut self,
        case_id: u64,
        seed_id: usize,
        start_time: Instant,
        tx: Sender<Completion>,
    ) -> std::io::Result<JoinHandle<()>> {
        let corpus = Arc::clone(&self.corpus);
        let executor = Arc::clone(&self.executor);
        let archive = Arc::clone(&self.archive);
        let mut mutator = self.mutator.clone();
        let mut case_rng = ChaCha8Rng::from_rng(&mut self.rng);
        log::debug!("Dispatching case {case_id} from seed {seed_id}");

        thread::Builder::new()
            .name(format!("case-{case_id}"))
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    let seed = corpus
                        .get(seed_id)
                        .ok_or_else(|| anyhow!("Seed {seed_id} is not in the corpus"))?;
                    run_case(
                        seed,
                        case_id,
                        &mut mutator,
                        &mut case_rng,
                        executor.as_ref(),
                        &archive,
                    )
                }));
                let outcome = match result {
                    Ok(Ok(execution)) => CaseOutcome::Executed(execution),
                    Ok(Err(e)) => CaseOutcome::Failed(Arc::new(e)),
                    Err(panic_payload) => {
                        let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                            s.to_string()
                        } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "Unknown panic type".to_string()
                        };
                        CaseOutcome::Failed(Arc::new(anyhow!("Worker panicked: {msg}")))
                    }
                };
                // The receiver only goes away once the loop has returned.
                let _ = tx.send(Completion {
                    case_id,
                    elapsed: start_time.elapsed(),
                    outcome,
                });
            })
    }

    fn reclaim(
        &mut self,
        done: Completion,
        in_flight: &mut HashMap<u64, JoinHandle<()>>,
        summary: &mut FuzzSummary,
    ) {
        if let Some(handle) = in_flight.remove(&done.case_id) {
            if handle.join().is_err() {
                log::error!("Worker for case {} panicked after reporting", done.case_id);
            }
        }

        summary.cases_completed += 1;
        match &done.outcome {
            CaseOutcome::Failed(e) => {
                summary.failed_cases += 1;
                log::warn!("Case {} failed: {e:#}", done.case_id);
            }
            CaseOutcome::Executed(result) if result.crashed => summary.crashes += 1,
            CaseOutcome::Executed(_) => {}
        }

        self.reporter.report(&CaseReport {
            case_id: done.case_id,
            elapsed: done.elapsed,
            outcome: done.outcome,
        });
    }
}

/// Mutate, execute, and archive on crash. Runs on a worker thread.
fn run_case<I, M>(
    seed: &I,
    case_id: u64,
    mutator: &mut M,
    rng: &mut ChaCha8Rng,
    executor: &dyn Executor<I>,
    archive: &CrashArchive,
) -> anyhow::Result<ExecutionResult>
where
    I: Input,
    M: Mutator<I, ChaCha8Rng>,
{
    let mutated = mutator.mutate(seed, rng)?;
    let result = executor.execute_sync(&mutated, case_id)?;
    if result.crashed {
        match archive.record(&mutated) {
            Ok(path) => log::info!("Case {case_id} crashed the target, saved as {path:?}"),
            Err(e) => log::error!("Case {case_id} crashed the target but was not saved: {e}"),
        }
    }
    Ok(result)
}
