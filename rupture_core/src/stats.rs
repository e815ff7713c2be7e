use crate::executor::{ExecutionResult, ExecutionStatus};
use std::io::{self, Stdout, Write};
use std::sync::Arc;
use std::time::Duration;

/// How a single fuzz case ended.
#[derive(Debug, Clone)]
pub enum CaseOutcome {
    /// The target ran to completion (or was killed on timeout).
    Executed(ExecutionResult),
    /// The case never produced a result. The error keeps its source chain, so
    /// callers can downcast to `MutatorError` or `ExecutorError`.
    Failed(Arc<anyhow::Error>),
}

impl CaseOutcome {
    pub fn crashed(&self) -> bool {
        matches!(self, CaseOutcome::Executed(result) if result.crashed)
    }
}

/// One completed fuzz case, as seen by a [`Reporter`].
#[derive(Debug, Clone)]
pub struct CaseReport {
    pub case_id: u64,
    /// Time since the fuzzer started, taken when the case completed.
    pub elapsed: Duration,
    pub outcome: CaseOutcome,
}

/// Totals for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuzzSummary {
    pub cases_dispatched: u64,
    pub cases_completed: u64,
    pub crashes: u64,
    pub failed_cases: u64,
    pub elapsed: Duration,
}

/// Cumulative average throughput since start. Zero elapsed time yields 0.0.
pub fn cases_per_second(case_id: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { case_id as f64 / secs } else { 0.0 }
}

pub fn format_case_line(report: &CaseReport) -> String {
    let retcode = match &report.outcome {
        CaseOutcome::Executed(ExecutionResult {
            status: ExecutionStatus::Exited { return_code },
            ..
        }) => return_code.to_string(),
        CaseOutcome::Executed(ExecutionResult {
            status: ExecutionStatus::Timeout,
            ..
        }) => "timeout".to_string(),
        CaseOutcome::Failed(_) => "error".to_string(),
    };
    let mut line = format!(
        "[{:10.4}] | Case {:10} | Retcode {} | fcps {:10.4}",
        report.elapsed.as_secs_f64(),
        report.case_id,
        retcode,
        cases_per_second(report.case_id, report.elapsed)
    );
    if report.outcome.crashed() {
        line.push_str(" | CRASH");
    }
    line
}

/// Receives one call per completed case, on the scheduler thread.
///
/// Reporting is purely observational: implementations swallow their own
/// failures.
pub trait Reporter: Send {
    fn report(&mut self, case: &CaseReport);

    fn finish(&mut self, _summary: &FuzzSummary) {}
}

/// Writes one line per case, and a summary at the end, to a writer (stdout by default).
#[derive(Debug)]
pub struct ConsoleReporter<W: Write + Send = Stdout> {
    out: W,
}

impl ConsoleReporter<Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write + Send> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Reporter for ConsoleReporter<W> {
    fn report(&mut self, case: &CaseReport) {
        if let Err(e) = writeln!(self.out, "{}", format_case_line(case)) {
            log::debug!("Dropped report line for case {}: {e}", case.case_id);
        }
    }

    fn finish(&mut self, summary: &FuzzSummary) {
        let result = writeln!(
            self.out,
            "Fuzz loop finished in {:.2?}.\nTotal cases: {} dispatched, {} completed, {} failed. Crashes: {}. fcps {:.4}",
            summary.elapsed,
            summary.cases_dispatched,
            summary.cases_completed,
            summary.failed_cases,
            summary.crashes,
            cases_per_second(summary.cases_completed, summary.elapsed)
        )
        .and_then(|_| self.out.flush());
        if let Err(e) = result {
            log::debug!("Dropped run summary: {e}");
        }
    }
}
