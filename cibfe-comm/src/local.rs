use crate::{CommError, Communicator};
use log::trace;
use parking_lot::{Condvar, Mutex};
use std::panic::resume_unwind;
use std::sync::Arc;
use std::thread;

/// Runs an SPMD closure on a fixed number of threads, one per rank.
///
/// Each thread receives its own [`LocalCommunicator`]. The collectives are blocking: a rank
/// that enters a collective waits until every other rank has entered the same collective.
///
/// ```
/// use cibfe_comm::{Communicator, LocalCluster};
///
/// let sums = LocalCluster::new(3).run(|comm| {
///     let mut value = [comm.rank() as f64];
///     comm.sum_reduce("example", &mut value).unwrap();
///     value[0]
/// });
/// assert_eq!(sums, vec![3.0, 3.0, 3.0]);
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LocalCluster {
    size: usize,
}

impl LocalCluster {
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "A cluster needs at least one rank.");
        Self { size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `f` on every rank and returns the per-rank results ordered by rank.
    ///
    /// If any rank panics, ranks blocked in a collective are released with
    /// [`CommError::Poisoned`] and the panic is propagated to the caller.
    pub fn run<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(LocalCommunicator) -> R + Sync,
        R: Send,
    {
        let shared = Arc::new(Shared::default());
        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.size)
                .map(|rank| {
                    let comm = LocalCommunicator {
                        rank,
                        size: self.size,
                        shared: Arc::clone(&shared),
                    };
                    let guard = DepartureGuard {
                        shared: Arc::clone(&shared),
                    };
                    let f = &f;
                    scope.spawn(move || {
                        let _guard = guard;
                        f(comm)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|payload| resume_unwind(payload)))
                .collect()
        })
    }
}

/// The communicator handed to each rank of a [`LocalCluster`].
#[derive(Debug)]
pub struct LocalCommunicator {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    round: Mutex<Round>,
    condvar: Condvar,
}

#[derive(Debug, Default)]
struct Round {
    generation: u64,
    arrived: usize,
    departed: usize,
    poisoned: bool,
    tag: &'static str,
    accumulator: Vec<f64>,
    mismatch: Option<CommError>,
    // Outcome of the most recently completed round, tagged with its generation.
    // It can only be overwritten once every rank has left the round it belongs to.
    completed: Option<(u64, Result<Vec<f64>, CommError>)>,
}

struct DepartureGuard {
    shared: Arc<Shared>,
}

impl Drop for DepartureGuard {
    fn drop(&mut self) {
        let mut round = self.shared.round.lock();
        round.departed += 1;
        if thread::panicking() {
            round.poisoned = true;
        }
        self.shared.condvar.notify_all();
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sum_reduce(&self, tag: &'static str, values: &mut [f64]) -> Result<(), CommError> {
        let mut round = self.shared.round.lock();
        if round.poisoned {
            return Err(CommError::Poisoned);
        }
        if round.departed > 0 {
            round.poisoned = true;
            self.shared.condvar.notify_all();
            return Err(CommError::MissingParticipants {
                tag,
                arrived: round.arrived + 1,
                size: self.size,
            });
        }

        let generation = round.generation;
        if round.arrived == 0 {
            round.tag = tag;
            round.accumulator.clear();
            round.accumulator.resize(values.len(), 0.0);
            round.mismatch = None;
        } else if round.tag != tag || round.accumulator.len() != values.len() {
            if round.mismatch.is_none() {
                round.mismatch = Some(CommError::CollectiveMismatch {
                    rank: self.rank,
                    expected_tag: round.tag,
                    expected_len: round.accumulator.len(),
                    found_tag: tag,
                    found_len: values.len(),
                });
            }
        }

        if round.mismatch.is_none() {
            for (acc, v) in round.accumulator.iter_mut().zip(values.iter()) {
                *acc += *v;
            }
        }
        round.arrived += 1;

        if round.arrived == self.size {
            let outcome = match round.mismatch.take() {
                Some(err) => Err(err),
                None => Ok(std::mem::take(&mut round.accumulator)),
            };
            round.completed = Some((generation, outcome));
            round.arrived = 0;
            round.generation += 1;
            self.shared.condvar.notify_all();
        } else {
            while round.generation == generation {
                if round.poisoned {
                    return Err(CommError::Poisoned);
                }
                if round.departed > 0 && round.arrived + round.departed >= self.size {
                    let arrived = round.arrived;
                    round.poisoned = true;
                    self.shared.condvar.notify_all();
                    return Err(CommError::MissingParticipants {
                        tag,
                        arrived,
                        size: self.size,
                    });
                }
                self.shared.condvar.wait(&mut round);
            }
        }

        trace!("rank {} completed collective '{}' (round {})", self.rank, tag, generation);
        match &round.completed {
            Some((completed_generation, Ok(sum))) if *completed_generation == generation => {
                values.copy_from_slice(sum);
                Ok(())
            }
            Some((completed_generation, Err(err))) if *completed_generation == generation => Err(err.clone()),
            _ => Err(CommError::Poisoned),
        }
    }
}
