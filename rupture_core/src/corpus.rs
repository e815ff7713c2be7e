use crate::input::Input;
use rand::Rng;
use rand_core::RngCore;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Seeds shorter than this cannot produce a non-empty mutation range.
pub const MIN_SEED_LEN: usize = 2;

/// Defines errors that can arise while loading a corpus.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// The seed directory yielded no usable seed. Fuzzing cannot start.
    #[error("No usable seeds found in {0:?}")]
    Empty(PathBuf),

    /// The seed directory itself could not be opened or enumerated.
    #[error("Corpus I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Defines the common read-only interface over a loaded set of seeds.
///
/// A corpus is built once at startup and never mutated afterwards, so every
/// accessor takes `&self` and implementations can be shared between worker
/// threads behind an `Arc`.
pub trait Corpus<I: Input>: Send + Sync {
    /// Retrieves the seed with the given ID, if present.
    fn get(&self, id: usize) -> Option<&I>;

    /// Selects a seed uniformly at random.
    ///
    /// Returns `None` only when the corpus is empty.
    fn random_select(&self, rng: &mut dyn RngCore) -> Option<(usize, &I)>;

    /// Returns the number of distinct seeds.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-memory corpus holding each distinct seed once.
#[derive(Debug)]
pub struct InMemoryCorpus<I: Input> {
    entries: Vec<I>,
}

impl<I: Input + From<Vec<u8>>> InMemoryCorpus<I> {
    /// Loads every regular file directly inside `seed_dir` as one seed.
    ///
    /// Files are visited in path order. Unreadable files and seeds shorter
    /// than [`MIN_SEED_LEN`] are skipped with a warning, and byte-identical
    /// files collapse into a single entry (first occurrence wins). The source
    /// files are never modified.
    pub fn load(seed_dir: &Path) -> Result<Self, CorpusError> {
        let read_dir = fs::read_dir(seed_dir).map_err(|e| CorpusError::Io {
            path: seed_dir.to_path_buf(),
            source: e,
        })?;

        let mut seed_paths = Vec::new();
        for entry_result in read_dir {
            let entry = entry_result.map_err(|e| CorpusError::Io {
                path: seed_dir.to_path_buf(),
                source: e,
            })?;
            let path = entry.path();
            if path.is_file() {
                seed_paths.push(path);
            } else {
                log::debug!("Skipping non-file corpus entry {path:?}");
            }
        }
        seed_paths.sort();

        let mut raw_seeds = Vec::with_capacity(seed_paths.len());
        for path in &seed_paths {
            match fs::read(path) {
                Ok(data) => raw_seeds.push(data),
                Err(e) => log::warn!("Skipping unreadable seed {path:?}: {e}"),
            }
        }

        let corpus = Self::from_inputs(raw_seeds);
        if corpus.is_empty() {
            return Err(CorpusError::Empty(seed_dir.to_path_buf()));
        }
        log::info!(
            "Loaded {} distinct seeds from {} files in {:?}",
            corpus.len(),
            seed_paths.len(),
            seed_dir
        );
        Ok(corpus)
    }

    /// Builds a corpus from raw byte buffers, applying the same length filter
    /// and deduplication as [`InMemoryCorpus::load`].
    ///
    /// The result may be empty; callers that need at least one seed must check.
    pub fn from_inputs<S>(seeds: S) -> Self
    where
        S: IntoIterator<Item = Vec<u8>>,
    {
        let mut known: HashSet<Vec<u8>> = HashSet::new();
        let mut entries = Vec::new();
        for data in seeds {
            if data.len() < MIN_SEED_LEN {
                log::warn!(
                    "Skipping seed of {} byte(s); at least {} are needed to mutate",
                    data.len(),
                    MIN_SEED_LEN
                );
                continue;
            }
            if known.contains(&data) {
                continue;
            }
            known.insert(data.clone());
            entries.push(I::from(data));
        }
        Self { entries }
    }
}

impl<I: Input> Corpus<I> for InMemoryCorpus<I> {
    fn get(&self, id: usize) -> Option<&I> {
        self.entries.get(id)
    }

    fn random_select(&self, rng: &mut dyn RngCore) -> Option<(usize, &I)> {
        if self.entries.is_empty() {
            return None;
        }
        let index = rng.random_range(0..self.entries.len());
        self.entries.get(index).map(|input| (index, input))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
