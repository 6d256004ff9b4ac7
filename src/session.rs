//! One complete run, from registration to teardown, for either role.
//!
//! Root: registration -> communicator -> scatter -> broadcast command ->
//! algorithm -> final barrier. Workers mirror each step.

use crate::algorithm::{self, Command, Outcome};
use crate::chunk::chunk_sizes;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::topology::{self, CommandSource, Coordinator};
use std::net::SocketAddr;
use tracing::info;

/// What the root ends a session with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorReport {
    /// Command the operator chose
    pub command: Command,
    /// Participants including the root
    pub participants: usize,
    /// Chunk length per rank
    pub chunk_sizes: Vec<usize>,
    /// Algorithm result
    pub outcome: Outcome,
}

/// What a worker ends a session with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    /// Rank assigned at registration
    pub rank: i32,
    /// Command received from the root
    pub command: Command,
    /// This rank's chunk after the algorithm ran (sorted slice for SORT)
    pub chunk: Vec<i32>,
}

/// Run the root's side of a session over `data`.
///
/// `command` is polled with the current registration count, see
/// [`Coordinator::accept_workers`].
pub fn run_coordinator<S: CommandSource>(
    coordinator: Coordinator,
    data: &[i32],
    command: S,
) -> Result<CoordinatorReport> {
    let registration = coordinator.accept_workers(command)?;
    let command = registration.command();
    let comm = registration.into_communicator()?;
    let participants = comm.size().map_or(1, |s| s as usize);

    let sizes = chunk_sizes(data.len(), participants);
    info!(participants, len = data.len(), "scattering array");
    let mut chunk = comm.scatter(data, &sizes)?;
    comm.broadcast(command.as_str())?;

    info!(%command, "executing");
    let outcome = algorithm::execute(command, &comm, &mut chunk, data.len())?
        .ok_or_else(|| Error::Protocol("root produced no result".into()))?;
    match &outcome {
        Outcome::Scalar(value) => info!(%command, value, "final result"),
        Outcome::Sorted { data, rounds } => info!(rounds, sorted = ?data, "final sorted array"),
    }

    comm.barrier()?;
    info!("session complete");
    Ok(CoordinatorReport {
        command,
        participants,
        chunk_sizes: sizes,
        outcome,
    })
}

/// Run a worker's side of a session against the root at `coordinator`.
pub fn run_worker(coordinator: SocketAddr, config: &SessionConfig) -> Result<WorkerReport> {
    let connection = topology::connect_to_coordinator(coordinator, config)?;
    let rank = connection.rank();
    let comm = connection.into_communicator()?;
    info!(rank, "ready and waiting for data");

    let mut chunk = comm.scatter(&[], &[])?;
    info!(rank, len = chunk.len(), "received chunk");

    let command: Command = comm
        .receive_broadcast()?
        .ok_or_else(|| Error::Protocol("worker expected a command broadcast".into()))?
        .parse()?;
    info!(rank, %command, "executing");
    algorithm::execute(command, &comm, &mut chunk, 0)?;

    comm.barrier()?;
    info!(rank, "shutting down");
    Ok(WorkerReport {
        rank,
        command,
        chunk,
    })
}
