use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use rand::Rng;

use crate::ai::Transition;
use crate::error::InsufficientDataError;
use crate::training::replay_buffer::ReplayBuffer;

/// Cooperative stop flag shared between a run and whoever controls it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Replay buffer shared by self-play producers and the learner.
/// Inserts take the write lock, samples take the read lock.
pub struct SharedReplayBuffer {
    inner: RwLock<ReplayBuffer>,
}

impl SharedReplayBuffer {
    pub fn new(buffer: ReplayBuffer) -> Self {
        SharedReplayBuffer {
            inner: RwLock::new(buffer),
        }
    }

    pub fn insert(&self, transition: Transition) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(transition);
    }

    pub fn insert_all(&self, transitions: impl IntoIterator<Item = Transition>) {
        let mut buffer = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for t in transitions {
            buffer.insert(t);
        }
    }

    pub fn sample<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        rng: &mut R,
    ) -> Result<Vec<Transition>, InsufficientDataError> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sample_with(batch_size, rng)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_inner(self) -> ReplayBuffer {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holder for a published value that is swapped as a whole. Readers get a
/// clone of one complete version, never a mix of two.
pub struct SnapshotCell<T> {
    inner: Mutex<(u64, T)>,
}

impl<T: Clone> SnapshotCell<T> {
    pub fn new(value: T) -> Self {
        SnapshotCell {
            inner: Mutex::new((0, value)),
        }
    }

    /// Replace the value and bump the version.
    pub fn publish(&self, value: T) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.0 += 1;
        guard.1 = value;
    }

    pub fn load(&self) -> (u64, T) {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        (guard.0, guard.1.clone())
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).0
    }
}
