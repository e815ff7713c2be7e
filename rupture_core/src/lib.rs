pub mod archive;
pub mod config;
pub mod corpus;
pub mod executor;
pub mod fuzzer;
pub mod input;
pub mod mutator;
pub mod scheduler;
pub mod stats;

pub use archive::{ArchiveError, CrashArchive};
pub use config::{ConfigError, FuzzerSettings, RuptureConfig};
pub use corpus::{Corpus, CorpusError, InMemoryCorpus};
pub use executor::{
    CommandExecutor, CommandExecutorConfig, ExecutionResult, ExecutionStatus, Executor,
    ExecutorError,
};
pub use fuzzer::Fuzzer;
pub use input::Input;
pub use mutator::{Mutator, MutatorError, RangeOverwriteMutator};
pub use scheduler::{RandomScheduler, Scheduler, SchedulerError};
pub use stats::{CaseOutcome, CaseReport, ConsoleReporter, FuzzSummary, Reporter};
