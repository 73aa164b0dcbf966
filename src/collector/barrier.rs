//! Countdown that fires one completion after N parties reported in.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::collector::engine::Completion;
use crate::collector::error::CollectError;

/// Invokes its completion exactly once, when the last of `parties`
/// participants calls [`CompletionBarrier::complete`].
///
/// The completion receives the first error any participant reported, or
/// `Ok(())`. A barrier serves a single cycle; create a new one per cycle.
pub struct CompletionBarrier {
    remaining: AtomicUsize,
    completion: Mutex<Option<Completion>>,
    first_error: Mutex<Option<CollectError>>,
}

impl CompletionBarrier {
    /// A barrier with zero parties never fires.
    pub fn new(parties: usize, completion: Completion) -> Self {
        Self {
            remaining: AtomicUsize::new(parties),
            completion: Mutex::new(Some(completion)),
            first_error: Mutex::new(None),
        }
    }

    /// Participants still outstanding.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Reports one participant as done. Calls past the expected count are
    /// ignored.
    pub fn complete(&self, result: Result<(), CollectError>) {
        if let Err(e) = result {
            let mut first = self
                .first_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if first.is_none() {
                *first = Some(e);
            }
        }

        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous != Ok(1) {
            return;
        }

        let completion = self
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let error = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(completion) = completion {
            completion(error.map_or(Ok(()), Err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;

    fn counting(fired: &Arc<AtomicUsize>) -> Completion {
        let fired = Arc::clone(fired);
        Box::new(move |res: Result<(), CollectError>| {
            res.unwrap();
            fired.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_fires_once_after_all_parties() {
        let fired = Arc::new(AtomicUsize::new(0));
        let barrier = CompletionBarrier::new(3, counting(&fired));
        barrier.complete(Ok(()));
        barrier.complete(Ok(()));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(barrier.remaining(), 1);
        barrier.complete(Ok(()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        barrier.complete(Ok(()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(barrier.remaining(), 0);
    }

    #[test]
    fn test_concurrent_completion_fires_exactly_once() {
        for _ in 0..50 {
            let fired = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(CompletionBarrier::new(8, counting(&fired)));
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let b = Arc::clone(&barrier);
                    thread::spawn(move || b.complete(Ok(())))
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(fired.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_first_error_is_reported() {
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let barrier = CompletionBarrier::new(
            3,
            Box::new(move |res: Result<(), CollectError>| {
                *s.lock().unwrap() = Some(res)
            }),
        );
        barrier.complete(Ok(()));
        barrier.complete(Err(CollectError::Stopped {
            path: PathBuf::from("/sys/a"),
        }));
        barrier.complete(Err(CollectError::Stopped {
            path: PathBuf::from("/sys/b"),
        }));

        match seen.lock().unwrap().take() {
            Some(Err(CollectError::Stopped { path })) => assert_eq!(path, PathBuf::from("/sys/a")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_zero_parties_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let barrier = CompletionBarrier::new(0, counting(&fired));
        barrier.complete(Ok(()));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
