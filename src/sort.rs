//! Distributed odd-even transposition sort.
//!
//! Every rank presorts its chunk, then the ranks alternate ODD and EVEN
//! rounds in which ring neighbors swap boundary elements. The root announces
//! each step with a phase marker broadcast, OR-reduces the swap flags after
//! each phase, and keeps going until a full round produces no swap anywhere.
//! Finally the root gathers the chunks and concatenates them in rank order.
//!
//! ```text
//! PRESORT -> barrier -> { ODD -> reduce -> EVEN -> reduce -> CONTINUE|DONE }* -> GATHER
//! ```

use crate::chunk::chunk_sizes;
use crate::comm::Communicator;
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, trace};

/// Phase markers broadcast by the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Every rank sorts its own chunk
    Presort,
    /// Odd ranks exchange with their right neighbor
    Odd,
    /// Even ranks exchange with their right neighbor
    Even,
    /// Some rank swapped during the round; run another
    Continue,
    /// No rank swapped; the data is globally sorted
    Done,
    /// Workers send their chunks to the root
    Gather,
}

impl Phase {
    /// Marker text as sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Presort => "PRESORT",
            Phase::Odd => "ODD",
            Phase::Even => "EVEN",
            Phase::Continue => "CONTINUE",
            Phase::Done => "DONE",
            Phase::Gather => "GATHER",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PRESORT" => Ok(Phase::Presort),
            "ODD" => Ok(Phase::Odd),
            "EVEN" => Ok(Phase::Even),
            "CONTINUE" => Ok(Phase::Continue),
            "DONE" => Ok(Phase::Done),
            "GATHER" => Ok(Phase::Gather),
            other => Err(Error::Protocol(format!("unknown phase marker {other:?}"))),
        }
    }
}

/// What one rank observed while sorting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortReport {
    /// ODD/EVEN round pairs executed, including the final quiet one.
    pub rounds: usize,
    /// The merged array; only present at the root.
    pub sorted: Option<Vec<i32>>,
}

/// State for one sort invocation on one rank.
struct SortContext<'a> {
    comm: &'a Communicator,
    local: &'a mut [i32],
}

/// Run the distributed sort on this rank's chunk.
///
/// `local` is sorted in place and holds this rank's final slice of the
/// global order afterwards. `original_len` is the length of the array that
/// was scattered; the root uses it to rebuild the chunk plan for the merge.
/// Workers may pass anything.
pub fn sort(comm: &Communicator, local: &mut [i32], original_len: usize) -> Result<SortReport> {
    let rank = comm.rank();
    let mut ctx = SortContext { comm, local };

    announce(comm, Phase::Presort)?;
    presort(ctx.local);
    debug!(rank, data = ?ctx.local, "presorted");
    // Presort has no communication of its own
    comm.barrier()?;

    let mut rounds = 0;
    loop {
        rounds += 1;
        trace!(rank, round = rounds, "round start");

        announce(comm, Phase::Odd)?;
        trace!(rank, round = rounds, data = ?ctx.local, "before ODD");
        let odd = ctx.execute_phase(Phase::Odd)?;
        let odd_any = comm.reduce_bool(odd)?;

        announce(comm, Phase::Even)?;
        trace!(rank, round = rounds, data = ?ctx.local, "before EVEN");
        let even = ctx.execute_phase(Phase::Even)?;
        let even_any = comm.reduce_bool(even)?;

        let proceed = match (odd_any, even_any) {
            (Some(odd_any), Some(even_any)) => {
                let swapped = odd_any || even_any;
                debug!(round = rounds, swapped, "round complete");
                let verdict = if swapped { Phase::Continue } else { Phase::Done };
                comm.broadcast(verdict.as_str())?;
                swapped
            }
            _ => match next_marker(comm)? {
                Phase::Continue => true,
                Phase::Done => false,
                other => {
                    return Err(Error::Protocol(format!(
                        "expected CONTINUE or DONE, got {other}"
                    )))
                }
            },
        };
        if !proceed {
            break;
        }
    }

    announce(comm, Phase::Gather)?;
    let sorted = match comm.gather(ctx.local)? {
        Some(chunks) => Some(merge(chunks, original_len)?),
        None => None,
    };
    if sorted.is_some() {
        info!(rounds, "sort complete");
    }
    Ok(SortReport { rounds, sorted })
}

/// Root broadcasts `phase`; workers wait for it and check it.
fn announce(comm: &Communicator, phase: Phase) -> Result<()> {
    if comm.is_root() {
        return comm.broadcast(phase.as_str());
    }
    let got = next_marker(comm)?;
    if got != phase {
        return Err(Error::Protocol(format!("expected {phase}, got {got}")));
    }
    Ok(())
}

fn next_marker(comm: &Communicator) -> Result<Phase> {
    comm.receive_broadcast()?
        .ok_or_else(|| Error::Protocol("root cannot receive phase markers".into()))?
        .parse()
}

/// Concatenate gathered chunks in rank order, checked against the plan.
fn merge(chunks: Vec<Vec<i32>>, original_len: usize) -> Result<Vec<i32>> {
    let plan = chunk_sizes(original_len, chunks.len());
    let mut out = Vec::with_capacity(original_len);
    for (rank, (chunk, expected)) in chunks.into_iter().zip(plan).enumerate() {
        if chunk.len() != expected {
            return Err(Error::Protocol(format!(
                "rank {rank} returned {} elements, plan says {expected}",
                chunk.len()
            )));
        }
        out.extend(chunk);
    }
    Ok(out)
}

impl SortContext<'_> {
    /// Run one ODD or EVEN phase; returns whether this rank swapped.
    fn execute_phase(&mut self, phase: Phase) -> Result<bool> {
        let rank = self.comm.rank();
        let active = (rank % 2 == 1) == (phase == Phase::Odd);
        if active && self.comm.has_right_neighbor() {
            trace!(rank, %phase, "active");
            self.exchange_with_right()
        } else if !active && self.comm.has_left_neighbor() {
            trace!(rank, %phase, "passive");
            self.receive_from_left()
        } else {
            trace!(rank, %phase, "no neighbor to exchange with");
            Ok(false)
        }
    }

    /// Send our largest element right; take back the smaller of the pair.
    fn exchange_with_right(&mut self) -> Result<bool> {
        let rank = self.comm.rank();
        let Some(&mine) = self.local.last() else {
            // Nothing can move through an empty chunk
            self.comm.send_right(i32::MIN)?;
            self.comm.recv_right()?;
            return Ok(false);
        };
        self.comm.send_right(mine)?;
        let theirs = self.comm.recv_right()?;
        if mine > theirs {
            let last = self.local.len() - 1;
            self.local[last] = theirs;
            insert_from_right(self.local);
            debug!(rank, sent = mine, got = theirs, "swapped with right");
            return Ok(true);
        }
        Ok(false)
    }

    /// Compare the left neighbor's largest against our smallest.
    fn receive_from_left(&mut self) -> Result<bool> {
        let rank = self.comm.rank();
        let theirs = self.comm.recv_left()?;
        match self.local.first().copied() {
            Some(mine) if theirs > mine => {
                self.comm.send_left(mine)?;
                self.local[0] = theirs;
                insert_from_left(self.local);
                debug!(rank, sent = mine, got = theirs, "swapped with left");
                Ok(true)
            }
            _ => {
                self.comm.send_left(theirs)?;
                Ok(false)
            }
        }
    }
}

/// Sort a local chunk ascending (quicksort, median-of-three pivot).
pub fn presort(data: &mut [i32]) {
    quick_sort(data);
}

/// In-place quicksort with a median-of-three pivot.
pub fn quick_sort(data: &mut [i32]) {
    if data.len() < 2 {
        return;
    }
    let pivot = partition(data);
    let (low, high) = data.split_at_mut(pivot);
    quick_sort(low);
    quick_sort(&mut high[1..]);
}

/// Partition around the median of first, middle and last; returns the
/// pivot's final index.
fn partition(data: &mut [i32]) -> usize {
    let high = data.len() - 1;
    let mid = high / 2;
    if data[mid] < data[0] {
        data.swap(0, mid);
    }
    if data[high] < data[0] {
        data.swap(0, high);
    }
    if data[high] < data[mid] {
        data.swap(mid, high);
    }
    data.swap(mid, high);

    let pivot = data[high];
    let mut store = 0;
    for j in 0..high {
        if data[j] <= pivot {
            data.swap(store, j);
            store += 1;
        }
    }
    data.swap(store, high);
    store
}

/// Move `data[0]` right until the slice is sorted again.
///
/// Assumes `data[1..]` is already sorted.
pub fn insert_from_left(data: &mut [i32]) {
    let Some(&value) = data.first() else {
        return;
    };
    let mut i = 0;
    while i + 1 < data.len() && value > data[i + 1] {
        data[i] = data[i + 1];
        i += 1;
    }
    data[i] = value;
}

/// Move the last element left until the slice is sorted again.
///
/// Assumes `data[..len - 1]` is already sorted.
pub fn insert_from_right(data: &mut [i32]) {
    let Some(&value) = data.last() else {
        return;
    };
    let mut i = data.len() - 1;
    while i > 0 && value < data[i - 1] {
        data[i] = data[i - 1];
        i -= 1;
    }
    data[i] = value;
}

/// True if `data` is non-decreasing.
pub fn is_sorted(data: &[i32]) -> bool {
    data.windows(2).all(|w| w[0] <= w[1])
}
