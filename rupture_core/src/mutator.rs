use crate::input::Input;
use rand::Rng;
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MutatorError {
    /// The input is too short to hold a mutation range.
    #[error("Input of {len} byte(s) is too short to mutate, need at least 2")]
    InputTooShort { len: usize },
}

/// A `Mutator` is responsible for transforming an `Input` into a new, modified `Input`.
///
/// The seed is only borrowed: implementations copy it into a fresh buffer
/// before changing anything, so the shared corpus entry stays untouched.
///
/// # Type Parameters
/// * `I`: The type of `Input` this mutator operates on.
/// * `R`: The type of random number generator used for mutation decisions.
pub trait Mutator<I: Input, R: Rng + ?Sized> {
    /// Produces a mutated copy of `input`.
    fn mutate(&mut self, input: &I, rng: &mut R) -> Result<I, MutatorError>;
}

/// Picks the overwrite range for an input of `len` bytes.
///
/// `end` is drawn uniformly from `[1, len - 1]` and `start` from `[0, end]`,
/// so the range never covers the last byte and is empty when `start == end`.
pub fn pick_range<R: Rng + ?Sized>(
    len: usize,
    rng: &mut R,
) -> Result<Range<usize>, MutatorError> {
    if len < 2 {
        return Err(MutatorError::InputTooShort { len });
    }
    let end = rng.random_range(1..len);
    let start = rng.random_range(0..=end);
    Ok(start..end)
}

/// Overwrites one contiguous random range of the input with random bytes.
///
/// The output always has the same length as the input.
#[derive(Debug, Default, Clone, Copy)]
pub struct RangeOverwriteMutator;

impl<I, R> Mutator<I, R> for RangeOverwriteMutator
where
    I: Input + From<Vec<u8>>,
    R: Rng + ?Sized,
{
    fn mutate(&mut self, input: &I, rng: &mut R) -> Result<I, MutatorError> {
        let range = pick_range(input.len(), rng)?;
        let mut input_bytes = input.as_bytes().to_vec();
        for byte in &mut input_bytes[range] {
            *byte = rng.random::<u8>();
        }
        Ok(I::from(input_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    #[test]
    fn range_overwrite_preserves_length() {
        let mut mutator = RangeOverwriteMutator;
        let mut rng = ChaCha8Rng::from_seed([0u8; 32]);

        for len in 2..64usize {
            let seed: Vec<u8> = (0..len as u8).collect();
            for _ in 0..20 {
                let mutated = mutator.mutate(&seed, &mut rng).unwrap();
                assert_eq!(mutated.len(), seed.len(), "Length changed for len {len}");
            }
        }
    }

    #[test]
    fn range_overwrite_only_touches_picked_range() {
        let mut mutator = RangeOverwriteMutator;
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let seed: Vec<u8> = vec![0xAA; 32];

        for _ in 0..500 {
            let mut range_rng = rng.clone();
            let range = pick_range(seed.len(), &mut range_rng).unwrap();
            let mutated = mutator.mutate(&seed, &mut rng).unwrap();

            for (idx, (before, after)) in seed.iter().zip(mutated.iter()).enumerate() {
                if !range.contains(&idx) {
                    assert_eq!(before, after, "Byte {idx} outside {range:?} was modified");
                }
            }
            assert_eq!(mutated[seed.len() - 1], 0xAA, "Last byte is never in range");
        }
    }

    #[test]
    fn range_overwrite_does_not_touch_the_seed() {
        let mut mutator = RangeOverwriteMutator;
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let seed: Vec<u8> = b"AAAAAAAA".to_vec();

        for _ in 0..50 {
            let _ = mutator.mutate(&seed, &mut rng).unwrap();
        }
        assert_eq!(seed, b"AAAAAAAA".to_vec());
    }

    #[test]
    fn range_overwrite_reaches_every_byte_value() {
        let mut mutator = RangeOverwriteMutator;
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let seed: Vec<u8> = vec![0u8; 16];
        let mut seen = [false; 256];

        for _ in 0..5_000 {
            let mutated = mutator.mutate(&seed, &mut rng).unwrap();
            for byte in mutated {
                seen[byte as usize] = true;
            }
        }
        let missing: Vec<usize> = (0..256).filter(|b| !seen[*b]).collect();
        assert!(missing.is_empty(), "Byte values never produced: {missing:?}");
    }

    #[test]
    fn pick_range_stays_within_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut saw_empty = false;
        let mut saw_start_zero = false;

        for _ in 0..2_000 {
            let range = pick_range(5, &mut rng).unwrap();
            assert!(range.start <= range.end);
            assert!(range.end >= 1 && range.end <= 4, "end out of bounds: {range:?}");
            saw_empty |= range.is_empty();
            saw_start_zero |= range.start == 0;
        }
        assert!(saw_empty, "start == end should be reachable");
        assert!(saw_start_zero, "start == 0 should be reachable");
    }

    #[test]
    fn two_byte_seed_only_mutates_first_byte() {
        let mut mutator = RangeOverwriteMutator;
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let seed: Vec<u8> = b"AB".to_vec();

        for _ in 0..200 {
            let mutated = mutator.mutate(&seed, &mut rng).unwrap();
            assert_eq!(mutated[1], b'B');
        }
    }

    #[test]
    fn short_inputs_are_rejected() {
        let mut mutator = RangeOverwriteMutator;
        let mut rng = ChaCha8Rng::from_seed([1u8; 32]);

        let empty: Vec<u8> = vec![];
        let single: Vec<u8> = vec![0x41];
        assert_eq!(
            mutator.mutate(&empty, &mut rng),
            Err(MutatorError::InputTooShort { len: 0 })
        );
        assert_eq!(
            mutator.mutate(&single, &mut rng),
            Err(MutatorError::InputTooShort { len: 1 })
        );
    }
}
