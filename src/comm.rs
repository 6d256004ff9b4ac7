//! The per-process communicator: star links for control and collectives,
//! ring links for neighbor exchange.

use crate::chunk::chunk_offsets;
use crate::config::RoutingPolicy;
use crate::error::{Error, Result};
use crate::wire;
use crate::ReduceOp;
use std::net::{Shutdown, TcpStream};
use tracing::{debug, trace};

/// Rank of the coordinator in every session.
pub const ROOT: i32 = 0;

/// A communicator under construction.
///
/// Links can only be attached while building; [`build`](Self::build) freezes
/// the topology into an active [`Communicator`].
#[derive(Debug)]
pub struct CommunicatorBuilder {
    rank: i32,
    is_root: bool,
    star: Vec<TcpStream>,
    left: Option<TcpStream>,
    right: Option<TcpStream>,
    routing: RoutingPolicy,
}

impl CommunicatorBuilder {
    /// Start a root communicator. `workers[i]` must be the link to rank `i + 1`.
    pub fn root(workers: Vec<TcpStream>) -> Self {
        CommunicatorBuilder {
            rank: ROOT,
            is_root: true,
            star: workers,
            left: None,
            right: None,
            routing: RoutingPolicy::default(),
        }
    }

    /// Start a worker communicator holding its single link to the root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRank`] if `rank` is not a worker rank (≥ 1).
    pub fn worker(rank: i32, coordinator: TcpStream) -> Result<Self> {
        if rank < 1 {
            return Err(Error::InvalidRank(rank));
        }
        Ok(CommunicatorBuilder {
            rank,
            is_root: false,
            star: vec![coordinator],
            left: None,
            right: None,
            routing: RoutingPolicy::default(),
        })
    }

    /// Attach the link to the ring predecessor.
    pub fn left(mut self, link: TcpStream) -> Self {
        self.left = Some(link);
        self
    }

    /// Attach the link to the ring successor.
    pub fn right(mut self, link: TcpStream) -> Self {
        self.right = Some(link);
        self
    }

    /// Choose how primitives treat ranks with no link.
    pub fn routing(mut self, routing: RoutingPolicy) -> Self {
        self.routing = routing;
        self
    }

    /// Freeze the topology.
    pub fn build(self) -> Result<Communicator> {
        for link in self.star.iter().chain(&self.left).chain(&self.right) {
            link.set_nodelay(true)?;
        }
        debug!(
            rank = self.rank,
            star = self.star.len(),
            left = self.left.is_some(),
            right = self.right.is_some(),
            "communicator active"
        );
        Ok(Communicator {
            rank: self.rank,
            is_root: self.is_root,
            star: self.star,
            left: self.left,
            right: self.right,
            routing: self.routing,
        })
    }
}

/// A communicator over raw TCP.
///
/// The root holds one star link per worker; a worker holds exactly one, to
/// the root. Ring links are optional and independent of the star. All
/// operations block until the OS accepts the bytes (send) or the full frame
/// arrives (receive); there are no timeouts.
///
/// Collectives carry no tags. Every rank must enter them in the same order,
/// one at a time.
#[derive(Debug)]
pub struct Communicator {
    rank: i32,
    is_root: bool,
    star: Vec<TcpStream>,
    left: Option<TcpStream>,
    right: Option<TcpStream>,
    routing: RoutingPolicy,
}

impl Communicator {
    /// Get the rank of the calling process.
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Number of participants. Only the root knows it.
    pub fn size(&self) -> Option<i32> {
        self.is_root.then(|| self.star.len() as i32 + 1)
    }

    /// Whether this is the coordinator.
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Number of star links held: `size - 1` at the root, 1 at a worker.
    pub fn star_degree(&self) -> usize {
        self.star.len()
    }

    /// Whether a ring predecessor is connected.
    pub fn has_left_neighbor(&self) -> bool {
        self.left.is_some()
    }

    /// Whether a ring successor is connected.
    pub fn has_right_neighbor(&self) -> bool {
        self.right.is_some()
    }

    /// Active routing policy.
    pub fn routing(&self) -> RoutingPolicy {
        self.routing
    }

    fn star_link(&self, peer: i32) -> Result<Option<&TcpStream>> {
        let link = if self.is_root {
            usize::try_from(peer)
                .ok()
                .filter(|&i| i >= 1)
                .and_then(|i| self.star.get(i - 1))
        } else if peer == ROOT {
            self.star.first()
        } else {
            None
        };
        match (link, self.routing) {
            (Some(link), _) => Ok(Some(link)),
            (None, RoutingPolicy::Strict) => Err(Error::InvalidRank(peer)),
            (None, RoutingPolicy::Permissive) => {
                debug!(rank = self.rank, peer, "no star link, ignoring");
                Ok(None)
            }
        }
    }

    // ========================================================================
    // Point-to-Point Communication
    // ========================================================================

    /// Send one integer over the star link to `dest`.
    pub fn send_int(&self, value: i32, dest: i32) -> Result<()> {
        match self.star_link(dest)? {
            Some(mut link) => wire::write_int(&mut link, value),
            None => Ok(()),
        }
    }

    /// Receive one integer over the star link from `source`.
    ///
    /// Yields 0 without blocking when no such link exists under permissive
    /// routing.
    pub fn recv_int(&self, source: i32) -> Result<i32> {
        match self.star_link(source)? {
            Some(mut link) => wire::read_int(&mut link),
            None => Ok(0),
        }
    }

    /// Send a length-prefixed integer array to `dest`.
    pub fn send_array(&self, data: &[i32], dest: i32) -> Result<()> {
        match self.star_link(dest)? {
            Some(mut link) => wire::write_ints(&mut link, data),
            None => Ok(()),
        }
    }

    /// Receive a length-prefixed integer array from `source`.
    pub fn recv_array(&self, source: i32) -> Result<Vec<i32>> {
        match self.star_link(source)? {
            Some(mut link) => wire::read_ints(&mut link),
            None => Ok(Vec::new()),
        }
    }

    // ========================================================================
    // Ring Neighbors
    // ========================================================================

    /// Send one integer to the ring predecessor, if any.
    pub fn send_left(&self, value: i32) -> Result<()> {
        match self.left.as_ref() {
            Some(mut link) => wire::write_int(&mut link, value),
            None => Ok(()),
        }
    }

    /// Send one integer to the ring successor, if any.
    pub fn send_right(&self, value: i32) -> Result<()> {
        match self.right.as_ref() {
            Some(mut link) => wire::write_int(&mut link, value),
            None => Ok(()),
        }
    }

    /// Receive one integer from the ring predecessor; 0 if there is none.
    pub fn recv_left(&self) -> Result<i32> {
        match self.left.as_ref() {
            Some(mut link) => wire::read_int(&mut link),
            None => Ok(0),
        }
    }

    /// Receive one integer from the ring successor; 0 if there is none.
    pub fn recv_right(&self) -> Result<i32> {
        match self.right.as_ref() {
            Some(mut link) => wire::read_int(&mut link),
            None => Ok(0),
        }
    }

    // ========================================================================
    // Blocking Collectives
    // ========================================================================

    /// Broadcast a string from the root to every worker, in rank order.
    ///
    /// A no-op when called on a worker.
    pub fn broadcast(&self, message: &str) -> Result<()> {
        if !self.is_root {
            return Ok(());
        }
        trace!(message, "broadcast");
        for mut link in &self.star {
            wire::write_str(&mut link, message)?;
        }
        Ok(())
    }

    /// Block until the root's next broadcast arrives.
    ///
    /// Returns `None` on the root.
    pub fn receive_broadcast(&self) -> Result<Option<String>> {
        if self.is_root {
            return Ok(None);
        }
        let mut link = &self.star[0];
        wire::read_str(&mut link).map(Some)
    }

    /// Distribute contiguous slices of `data` according to `chunk_sizes`.
    ///
    /// At the root, `chunk_sizes[i]` is the length of rank `i`'s slice and the
    /// root keeps slice 0. Workers pass empty slices and get their chunk back.
    ///
    /// # Errors
    ///
    /// At the root, [`Error::InvalidCount`] if `chunk_sizes` does not have one
    /// entry per participant and [`Error::InvalidBuffer`] if the sizes do not
    /// sum to `data.len()`.
    pub fn scatter(&self, data: &[i32], chunk_sizes: &[usize]) -> Result<Vec<i32>> {
        if !self.is_root {
            return self.recv_array(ROOT);
        }
        if chunk_sizes.len() != self.star.len() + 1 {
            return Err(Error::InvalidCount(chunk_sizes.len() as i64));
        }
        if chunk_sizes.iter().sum::<usize>() != data.len() {
            return Err(Error::InvalidBuffer);
        }
        let offsets = chunk_offsets(chunk_sizes);
        for (i, (&offset, &count)) in offsets.iter().zip(chunk_sizes).enumerate().skip(1) {
            self.send_array(&data[offset..offset + count], i as i32)?;
        }
        Ok(data[..chunk_sizes[0]].to_vec())
    }

    /// Collect every rank's `data` at the root, indexed by rank.
    ///
    /// Workers send exactly once and get `None`.
    pub fn gather(&self, data: &[i32]) -> Result<Option<Vec<Vec<i32>>>> {
        if !self.is_root {
            self.send_array(data, ROOT)?;
            return Ok(None);
        }
        let mut all = Vec::with_capacity(self.star.len() + 1);
        all.push(data.to_vec());
        for source in 1..=self.star.len() as i32 {
            all.push(self.recv_array(source)?);
        }
        Ok(Some(all))
    }

    /// Fold every rank's `value` at the root in ascending rank order.
    ///
    /// The result is not redistributed: workers get `None`.
    pub fn reduce(&self, value: i32, op: ReduceOp) -> Result<Option<i32>> {
        if !self.is_root {
            self.send_int(value, ROOT)?;
            return Ok(None);
        }
        let mut acc = value;
        for source in 1..=self.star.len() as i32 {
            acc = op.apply(acc, self.recv_int(source)?);
        }
        Ok(Some(acc))
    }

    /// Logical OR across all ranks, meaningful only at the root.
    pub fn reduce_bool(&self, value: bool) -> Result<Option<bool>> {
        Ok(self
            .reduce(i32::from(value), ReduceOp::Max)?
            .map(|v| v != 0))
    }

    /// Barrier synchronization.
    ///
    /// The root collects one signal from every worker before acknowledging
    /// any of them, so no rank leaves until all have entered.
    pub fn barrier(&self) -> Result<()> {
        if self.is_root {
            for source in 1..=self.star.len() as i32 {
                self.recv_int(source)?;
            }
            for dest in 1..=self.star.len() as i32 {
                self.send_int(1, dest)?;
            }
        } else {
            self.send_int(1, ROOT)?;
            self.recv_int(ROOT)?;
        }
        Ok(())
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        for link in self.star.iter().chain(&self.left).chain(&self.right) {
            // Peer may already be gone
            let _ = link.shutdown(Shutdown::Both);
        }
        debug!(rank = self.rank, "communicator closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    /// A connected loopback pair: (near end, far end).
    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let near = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (far, _) = listener.accept().unwrap();
        (near, far)
    }

    #[test]
    fn worker_rank_must_be_positive() {
        let (near, _far) = pair();
        assert!(matches!(
            CommunicatorBuilder::worker(0, near),
            Err(Error::InvalidRank(0))
        ));
    }

    #[test]
    fn lone_root_collectives_are_local() {
        let comm = CommunicatorBuilder::root(Vec::new()).build().unwrap();
        assert_eq!(comm.size(), Some(1));
        assert_eq!(comm.reduce(7, ReduceOp::Sum).unwrap(), Some(7));
        assert_eq!(comm.reduce_bool(false).unwrap(), Some(false));
        assert_eq!(comm.scatter(&[3, 1, 2], &[3]).unwrap(), vec![3, 1, 2]);
        assert_eq!(comm.gather(&[4]).unwrap(), Some(vec![vec![4]]));
        comm.broadcast("ODD").unwrap();
        assert_eq!(comm.receive_broadcast().unwrap(), None);
        comm.barrier().unwrap();
    }

    #[test]
    fn permissive_routing_ignores_unknown_ranks() {
        let comm = CommunicatorBuilder::root(Vec::new()).build().unwrap();
        comm.send_int(5, 3).unwrap();
        assert_eq!(comm.recv_int(3).unwrap(), 0);
        assert!(comm.recv_array(-1).unwrap().is_empty());
        assert_eq!(comm.recv_left().unwrap(), 0);
        comm.send_right(9).unwrap();
    }

    #[test]
    fn strict_routing_rejects_unknown_ranks() {
        let comm = CommunicatorBuilder::root(Vec::new())
            .routing(RoutingPolicy::Strict)
            .build()
            .unwrap();
        assert!(matches!(comm.send_int(5, 1), Err(Error::InvalidRank(1))));
        assert!(matches!(comm.recv_int(0), Err(Error::InvalidRank(0))));
    }

    #[test]
    fn scatter_checks_the_chunk_plan() {
        let comm = CommunicatorBuilder::root(Vec::new()).build().unwrap();
        assert!(matches!(
            comm.scatter(&[1, 2], &[1, 1]),
            Err(Error::InvalidCount(2))
        ));
        assert!(matches!(comm.scatter(&[1, 2], &[1]), Err(Error::InvalidBuffer)));
    }

    #[test]
    fn root_and_worker_exchange_over_star_link() {
        let (root_end, worker_end) = pair();
        let root = CommunicatorBuilder::root(vec![root_end]).build().unwrap();
        let worker = CommunicatorBuilder::worker(1, worker_end)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(root.size(), Some(2));
        assert_eq!(worker.size(), None);
        assert_eq!(worker.star_degree(), 1);

        root.send_array(&[4, 5, 6], 1).unwrap();
        assert_eq!(worker.recv_array(ROOT).unwrap(), vec![4, 5, 6]);

        worker.send_int(-3, ROOT).unwrap();
        assert_eq!(root.recv_int(1).unwrap(), -3);

        root.broadcast("GATHER").unwrap();
        assert_eq!(worker.receive_broadcast().unwrap().as_deref(), Some("GATHER"));
        // Broadcasting from a worker sends nothing
        worker.broadcast("ignored").unwrap();
    }

    #[test]
    fn ring_links_carry_single_values() {
        let (a, b) = pair();
        let (c, _d) = pair();
        let left_side = CommunicatorBuilder::root(Vec::new()).right(a).build().unwrap();
        let right_side = CommunicatorBuilder::worker(1, c)
            .unwrap()
            .left(b)
            .build()
            .unwrap();
        assert!(left_side.has_right_neighbor());
        assert!(right_side.has_left_neighbor());
        assert!(!right_side.has_right_neighbor());

        left_side.send_right(42).unwrap();
        assert_eq!(right_side.recv_left().unwrap(), 42);
        right_side.send_left(17).unwrap();
        assert_eq!(left_side.recv_right().unwrap(), 17);
    }
}
