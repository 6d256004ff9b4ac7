//! # ferroring
//!
//! A minimal MPI-style message-passing runtime over raw TCP.
//!
//! One coordinator (rank 0) and N workers (ranks 1..=N) share two
//! topologies:
//! - a **star**: the root holds a link to every worker, used for
//!   point-to-point traffic and all collectives
//! - a **ring**: each rank links to its rank-adjacent neighbors, used only
//!   for the sort's boundary exchange
//!
//! On top of the star the [`Communicator`] implements broadcast, scatter,
//! gather, reduce and barrier using nothing but blocking integer sends and
//! receives. The [`sort`] module layers a distributed odd-even transposition
//! sort on both topologies.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ferroring::{session, Command, Coordinator, SessionConfig};
//!
//! fn main() -> Result<(), ferroring::Error> {
//!     let config = SessionConfig::from_env()?;
//!     let coordinator = Coordinator::bind(&config)?;
//!
//!     // Close registration as soon as two workers have joined
//!     let data = ferroring::random_array(config.array_len);
//!     let report = session::run_coordinator(coordinator, &data, |registered: usize| {
//!         (registered == 2).then_some(Command::Sort)
//!     })?;
//!     println!("{:?}", report.outcome);
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol Constraints
//!
//! - Integers travel as 4-byte values in host byte order; peers must share
//!   an architecture.
//! - Collectives carry no tags. Every rank enters them in the same order,
//!   one at a time.
//! - There are no timeouts: a silent peer blocks its counterpart forever.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

mod algorithm;
mod chunk;
mod comm;
mod config;
mod error;
pub mod session;
pub mod sort;
mod topology;
mod wire;

pub use algorithm::{
    execute, local_fold, random_array, validate, validate_max, validate_min, validate_sorted,
    validate_sum, Command, Outcome,
};
pub use chunk::{chunk_offsets, chunk_sizes};
pub use comm::{Communicator, CommunicatorBuilder, ROOT};
pub use config::{
    RoutingPolicy, SessionConfig, COORDINATOR_PORT, DEFAULT_ARRAY_LEN, MAX_WORKERS,
    REGISTRATION_TIMEOUT,
};
pub use error::{Error, Result};
pub use topology::{
    connect_to_coordinator, CommandSource, Coordinator, Registration, WorkerConnection, WorkerInfo,
};
pub use wire::INET_ADDRSTRLEN;

/// Reduction operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Sum of values (wrapping, like the 32-bit wire type)
    Sum,
    /// Maximum value
    Max,
    /// Minimum value
    Min,
}

impl ReduceOp {
    /// Combine two values.
    pub fn apply(self, a: i32, b: i32) -> i32 {
        match self {
            ReduceOp::Sum => a.wrapping_add(b),
            ReduceOp::Max => a.max(b),
            ReduceOp::Min => a.min(b),
        }
    }

    /// The value that leaves any other unchanged under [`apply`](Self::apply).
    pub fn identity(self) -> i32 {
        match self {
            ReduceOp::Sum => 0,
            ReduceOp::Max => i32::MIN,
            ReduceOp::Min => i32::MAX,
        }
    }
}
