use crate::corpus::Corpus;
use crate::input::Input;
use rand_core::RngCore;
use thiserror::Error;

/// Errors that can occur during scheduler operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    /// Indicates that the corpus is empty, and therefore no input can be scheduled.
    #[error("Corpus is empty, cannot schedule next input")]
    CorpusEmpty,
}

/// A `Scheduler` is responsible for selecting the next seed from the `Corpus` to be fuzzed.
pub trait Scheduler<I: Input>: Send {
    /// Selects and returns the ID of the next seed to mutate.
    ///
    /// # Arguments
    /// * `corpus`: The read-only corpus to select from.
    /// * `rng`: Random source for schedulers whose choice involves randomness.
    ///
    /// # Returns
    /// The ID (index) of the selected seed within the corpus, or
    /// `SchedulerError::CorpusEmpty` if there is nothing to select.
    fn next(&mut self, corpus: &dyn Corpus<I>, rng: &mut dyn RngCore)
    -> Result<usize, SchedulerError>;
}

/// Picks seeds uniformly at random. No feedback is taken into account.
#[derive(Default, Debug)]
pub struct RandomScheduler;

impl RandomScheduler {
    /// Creates a new `RandomScheduler`.
    pub fn new() -> Self {
        RandomScheduler
    }
}

impl<I: Input> Scheduler<I> for RandomScheduler {
    fn next(
        &mut self,
        corpus: &dyn Corpus<I>,
        rng: &mut dyn RngCore,
    ) -> Result<usize, SchedulerError> {
        corpus
            .random_select(rng)
            .map(|(id, _input)| id)
            .ok_or(SchedulerError::CorpusEmpty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::InMemoryCorpus;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    #[test]
    fn random_scheduler_next_from_empty_corpus_returns_corpus_empty_error() {
        let mut scheduler = RandomScheduler::new();
        let corpus: InMemoryCorpus<Vec<u8>> = InMemoryCorpus::from_inputs(Vec::new());
        let mut rng = ChaCha8Rng::from_seed([0; 32]);

        assert_eq!(
            scheduler.next(&corpus, &mut rng),
            Err(SchedulerError::CorpusEmpty)
        );
    }

    #[test]
    fn random_scheduler_next_from_non_empty_corpus_returns_valid_id() {
        let mut scheduler = RandomScheduler::new();
        let corpus: InMemoryCorpus<Vec<u8>> =
            InMemoryCorpus::from_inputs(vec![vec![1, 0, 1], vec![2, 1, 2]]);
        let mut rng = ChaCha8Rng::from_seed([1; 32]);

        let mut selected_ids_set = std::collections::HashSet::new();
        let number_of_selections = 50;

        for i in 0..number_of_selections {
            match scheduler.next(&corpus, &mut rng) {
                Ok(id) => {
                    assert!(
                        id < corpus.len(),
                        "Selected ID {} is out of bounds for corpus of length {}. Iteration: {}",
                        id,
                        corpus.len(),
                        i
                    );
                    selected_ids_set.insert(id);
                }
                Err(e) => panic!("scheduler.next() failed on iteration {}: {:?}", i, e),
            }
        }
        assert_eq!(
            selected_ids_set.len(),
            corpus.len(),
            "Scheduler should have selected every seed of a small corpus over {} selections. Selected IDs: {:?}",
            number_of_selections,
            selected_ids_set
        );
    }

    #[test]
    fn random_scheduler_is_roughly_uniform() {
        let mut scheduler = RandomScheduler::new();
        let corpus: InMemoryCorpus<Vec<u8>> =
            InMemoryCorpus::from_inputs((0..4u8).map(|b| vec![b, b]));
        let mut rng = ChaCha8Rng::seed_from_u64(9);

        let mut counts = [0usize; 4];
        for _ in 0..4_000 {
            counts[scheduler.next(&corpus, &mut rng).unwrap()] += 1;
        }
        for (id, count) in counts.iter().enumerate() {
            assert!(
                (800..1200).contains(count),
                "Seed {id} picked {count} times out of 4000"
            );
        }
    }
}
