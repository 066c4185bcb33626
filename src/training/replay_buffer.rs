use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

use crate::ai::Transition;
use crate::error::InsufficientDataError;

/// Fixed-capacity ring buffer of transitions. Once full, each insert
/// overwrites the oldest entry.
pub struct ReplayBuffer {
    buffer: Vec<Transition>,
    capacity: usize,
    position: usize,
    rng: StdRng,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, StdRng::from_os_rng())
    }

    pub fn with_seed(capacity: usize, seed: u64) -> Self {
        Self::with_rng(capacity, StdRng::seed_from_u64(seed))
    }

    fn with_rng(capacity: usize, rng: StdRng) -> Self {
        assert!(capacity > 0, "replay buffer capacity must be > 0");
        ReplayBuffer {
            buffer: Vec::with_capacity(capacity.min(1 << 16)),
            capacity,
            position: 0,
            rng,
        }
    }

    /// Add a transition. Overwrites the oldest when full.
    pub fn insert(&mut self, transition: Transition) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(transition);
        } else {
            self.buffer[self.position] = transition;
        }
        self.position = (self.position + 1) % self.capacity;
    }

    /// Uniform sample without replacement using the buffer's own generator.
    pub fn sample(&mut self, batch_size: usize) -> Result<Vec<Transition>, InsufficientDataError> {
        let Self { buffer, rng, .. } = self;
        sample_from(buffer, batch_size, rng)
    }

    /// Uniform sample without replacement using a caller-supplied generator.
    pub fn sample_with<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        rng: &mut R,
    ) -> Result<Vec<Transition>, InsufficientDataError> {
        sample_from(&self.buffer, batch_size, rng)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn sample_from<R: Rng + ?Sized>(
    buffer: &[Transition],
    batch_size: usize,
    rng: &mut R,
) -> Result<Vec<Transition>, InsufficientDataError> {
    if batch_size > buffer.len() {
        return Err(InsufficientDataError {
            requested: batch_size,
            available: buffer.len(),
        });
    }
    let indices = index::sample(rng, buffer.len(), batch_size);
    Ok(indices.iter().map(|i| buffer[i].clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameState;

    /// Transition tagged by its reward so tests can tell entries apart.
    fn tagged(tag: usize) -> Transition {
        let state = GameState::initial();
        Transition {
            state,
            action: tag % 7,
            reward: tag as f32,
            next_state: state.apply(tag % 7).unwrap(),
            done: false,
        }
    }

    fn tags(batch: &[Transition]) -> Vec<usize> {
        batch.iter().map(|t| t.reward as usize).collect()
    }

    #[test]
    fn test_insert_and_len() {
        let mut buf = ReplayBuffer::with_seed(10, 0);
        assert!(buf.is_empty());

        buf.insert(tagged(0));
        assert_eq!(buf.len(), 1);

        for i in 1..10 {
            buf.insert(tagged(i));
        }
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let capacity = 5;
        let k = 3;
        let mut buf = ReplayBuffer::with_seed(capacity, 1);
        for i in 0..capacity + k {
            buf.insert(tagged(i));
        }
        assert_eq!(buf.len(), capacity);

        let mut all = tags(&buf.sample(capacity).unwrap());
        all.sort_unstable();
        assert_eq!(all, (k..capacity + k).collect::<Vec<_>>());
    }

    #[test]
    fn test_sample_without_replacement() {
        let mut buf = ReplayBuffer::with_seed(100, 2);
        for i in 0..50 {
            buf.insert(tagged(i));
        }
        let mut batch = tags(&buf.sample(20).unwrap());
        assert_eq!(batch.len(), 20);
        batch.sort_unstable();
        batch.dedup();
        assert_eq!(batch.len(), 20, "sample must not repeat entries");
    }

    #[test]
    fn test_sample_too_many() {
        let mut buf = ReplayBuffer::with_seed(10, 3);
        buf.insert(tagged(0));
        let err = buf.sample(5).unwrap_err();
        assert_eq!(
            err,
            InsufficientDataError {
                requested: 5,
                available: 1
            }
        );
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let mut a = ReplayBuffer::with_seed(64, 7);
        let mut b = ReplayBuffer::with_seed(64, 7);
        for i in 0..64 {
            a.insert(tagged(i));
            b.insert(tagged(i));
        }
        for _ in 0..5 {
            assert_eq!(tags(&a.sample(8).unwrap()), tags(&b.sample(8).unwrap()));
        }
    }

    #[test]
    fn test_sampling_is_roughly_uniform() {
        let mut buf = ReplayBuffer::with_seed(10, 11);
        for i in 0..10 {
            buf.insert(tagged(i));
        }
        let mut hits = [0usize; 10];
        for _ in 0..5000 {
            for t in tags(&buf.sample(2).unwrap()) {
                hits[t] += 1;
            }
        }
        // Each entry is expected 1000 times.
        for (i, &h) in hits.iter().enumerate() {
            assert!((850..1150).contains(&h), "entry {i} drawn {h} times");
        }
    }
}
