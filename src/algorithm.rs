//! The four distributed algorithms and their dispatch.

use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::sort;
use crate::ReduceOp;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// An operator command: which algorithm the session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Sum of all elements
    Sum,
    /// Minimum element
    Min,
    /// Maximum element
    Max,
    /// Full odd-even transposition sort
    Sort,
}

impl Command {
    /// All commands, in menu order.
    pub const ALL: [Command; 4] = [Command::Sum, Command::Min, Command::Max, Command::Sort];

    /// Name as typed by the operator and broadcast to workers.
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Sum => "SUM",
            Command::Min => "MIN",
            Command::Max => "MAX",
            Command::Sort => "SORT",
        }
    }

    /// One-line description for the operator menu.
    pub fn describe(self) -> &'static str {
        match self {
            Command::Sum => "Calculate sum of array",
            Command::Min => "Find minimum of array",
            Command::Max => "Find maximum of array",
            Command::Sort => "Sort array using odd-even transposition",
        }
    }

    fn reduce_op(self) -> Option<ReduceOp> {
        match self {
            Command::Sum => Some(ReduceOp::Sum),
            Command::Min => Some(ReduceOp::Min),
            Command::Max => Some(ReduceOp::Max),
            Command::Sort => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = Error;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Command::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::UnknownCommand(wanted.to_string()))
    }
}

/// Result of a command, available at the root only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// SUM, MIN or MAX result
    Scalar(i32),
    /// Globally sorted array and the number of rounds it took
    Sorted {
        /// The merged array
        data: Vec<i32>,
        /// ODD/EVEN round pairs executed
        rounds: usize,
    },
}

/// Run `command` on this rank's chunk.
///
/// Every rank must call this with the same command. The root gets
/// `Some(outcome)`, workers get `None`. `original_len` is the length of the
/// scattered array and only matters for [`Command::Sort`] at the root.
pub fn execute(
    command: Command,
    comm: &Communicator,
    chunk: &mut [i32],
    original_len: usize,
) -> Result<Option<Outcome>> {
    match command.reduce_op() {
        Some(op) => {
            let local = local_fold(chunk, op);
            debug!(rank = comm.rank(), %command, local, "local result");
            Ok(comm.reduce(local, op)?.map(Outcome::Scalar))
        }
        None => {
            let report = sort::sort(comm, chunk, original_len)?;
            Ok(report.sorted.map(|data| Outcome::Sorted {
                data,
                rounds: report.rounds,
            }))
        }
    }
}

/// Fold a chunk with `op`; an empty chunk yields the identity.
pub fn local_fold(chunk: &[i32], op: ReduceOp) -> i32 {
    chunk
        .iter()
        .fold(op.identity(), |acc, &v| op.apply(acc, v))
}

/// Check an outcome against a sequential computation over the input.
pub fn validate(command: Command, outcome: &Outcome, original: &[i32]) -> bool {
    match (command, outcome) {
        (Command::Sum, Outcome::Scalar(v)) => validate_sum(*v, original),
        (Command::Min, Outcome::Scalar(v)) => validate_min(*v, original),
        (Command::Max, Outcome::Scalar(v)) => validate_max(*v, original),
        (Command::Sort, Outcome::Sorted { data, .. }) => validate_sorted(data, original),
        _ => false,
    }
}

/// True if `sum` equals the wrapping sum of `original`.
pub fn validate_sum(sum: i32, original: &[i32]) -> bool {
    sum == local_fold(original, ReduceOp::Sum)
}

/// True if `min` is the smallest element of `original`.
pub fn validate_min(min: i32, original: &[i32]) -> bool {
    original.iter().min().map_or(min == i32::MAX, |&m| m == min)
}

/// True if `max` is the largest element of `original`.
pub fn validate_max(max: i32, original: &[i32]) -> bool {
    original.iter().max().map_or(max == i32::MIN, |&m| m == max)
}

/// True if `sorted` is non-decreasing and a permutation of `original`.
pub fn validate_sorted(sorted: &[i32], original: &[i32]) -> bool {
    if !sort::is_sorted(sorted) || sorted.len() != original.len() {
        return false;
    }
    let mut expected = original.to_vec();
    expected.sort_unstable();
    expected == sorted
}

/// An array of `len` random integers in `1..=99`.
pub fn random_array(len: usize) -> Vec<i32> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(1..=99)).collect()
}
