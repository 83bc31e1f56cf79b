//! Collective reductions across the ranks of an SPMD computation.
//!
//! Every rank owns a disjoint part of the data and participates in *collective* operations,
//! which must be issued by all ranks in the same order, with the same tag and the same operand
//! length. The [`Communicator`] trait captures the small set of collectives needed by `cibfe`:
//! rank/size queries, element-wise sum reductions and barriers.
//!
//! Two implementations are provided:
//!
//! - [`SerialCommunicator`], a single rank for which all collectives are trivial.
//! - [`LocalCluster`], which runs a closure on several threads, each with its own
//!   [`LocalCommunicator`]. It validates that all ranks agree on every collective and reports
//!   disagreement as [`CommError`] instead of silently combining unrelated data.
use std::error::Error;
use std::fmt;
use std::fmt::Display;

mod local;

pub use local::{LocalCluster, LocalCommunicator};

/// Errors produced by collective operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommError {
    /// Two ranks issued different collectives in the same round.
    CollectiveMismatch {
        rank: usize,
        expected_tag: &'static str,
        expected_len: usize,
        found_tag: &'static str,
        found_len: usize,
    },
    /// A collective was issued after another rank stopped participating.
    MissingParticipants {
        tag: &'static str,
        arrived: usize,
        size: usize,
    },
    /// Another rank failed while a collective was in progress.
    Poisoned,
}

impl Display for CommError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommError::CollectiveMismatch {
                rank,
                expected_tag,
                expected_len,
                found_tag,
                found_len,
            } => write!(
                f,
                "Collective mismatch on rank {rank}: expected '{expected_tag}' with {expected_len} values, \
                 found '{found_tag}' with {found_len} values."
            ),
            CommError::MissingParticipants { tag, arrived, size } => write!(
                f,
                "Collective '{tag}' can not complete: only {arrived} of {size} ranks are still participating."
            ),
            CommError::Poisoned => write!(f, "Communicator poisoned by a failure on another rank."),
        }
    }
}

impl Error for CommError {}

/// Collective communication between the ranks of a distributed computation.
pub trait Communicator {
    /// The rank of the calling process, in `0 .. size()`.
    fn rank(&self) -> usize;

    /// The total number of ranks.
    fn size(&self) -> usize;

    /// Replaces `values` by the element-wise sum of `values` over all ranks.
    ///
    /// The `tag` identifies the call site. All ranks must pass the same tag and the same number
    /// of values.
    fn sum_reduce(&self, tag: &'static str, values: &mut [f64]) -> Result<(), CommError>;

    /// Sum reduction of a single scalar.
    fn sum_reduce_scalar(&self, tag: &'static str, value: f64) -> Result<f64, CommError> {
        let mut buffer = [value];
        self.sum_reduce(tag, &mut buffer)?;
        Ok(buffer[0])
    }

    /// Blocks until all ranks have reached the barrier with the same tag.
    fn barrier(&self, tag: &'static str) -> Result<(), CommError> {
        self.sum_reduce(tag, &mut [])
    }

    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

impl<'a, C> Communicator for &'a C
where
    C: Communicator + ?Sized,
{
    fn rank(&self) -> usize {
        C::rank(self)
    }

    fn size(&self) -> usize {
        C::size(self)
    }

    fn sum_reduce(&self, tag: &'static str, values: &mut [f64]) -> Result<(), CommError> {
        C::sum_reduce(self, tag, values)
    }
}

/// A communicator consisting of a single rank.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn sum_reduce(&self, _tag: &'static str, _values: &mut [f64]) -> Result<(), CommError> {
        Ok(())
    }
}
