//! Collectives across hand-wired communicators, one thread per rank.

use ferroring::sort::presort;
use ferroring::{Communicator, CommunicatorBuilder, Error, ReduceOp, RoutingPolicy, ROOT};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let near = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (far, _) = listener.accept().unwrap();
    (near, far)
}

/// A star of `size` ranks (no ring links): the root plus one communicator
/// per worker, in rank order.
fn star(size: usize, routing: RoutingPolicy) -> (Communicator, Vec<Communicator>) {
    let (root_ends, worker_ends): (Vec<_>, Vec<_>) = (1..size).map(|_| pair()).unzip();
    let root = CommunicatorBuilder::root(root_ends)
        .routing(routing)
        .build()
        .unwrap();
    let workers = worker_ends
        .into_iter()
        .enumerate()
        .map(|(i, end)| {
            CommunicatorBuilder::worker(i as i32 + 1, end)
                .unwrap()
                .routing(routing)
                .build()
                .unwrap()
        })
        .collect();
    (root, workers)
}

#[test]
fn gather_and_reduce_follow_rank_order() {
    let (root, workers) = star(4, RoutingPolicy::Permissive);
    let handles: Vec<_> = workers
        .into_iter()
        .map(|comm| {
            thread::spawn(move || {
                let rank = comm.rank();
                assert_eq!(comm.gather(&vec![rank; rank as usize]).unwrap(), None);
                assert_eq!(comm.reduce(rank * 10, ReduceOp::Sum).unwrap(), None);
                assert_eq!(comm.reduce_bool(rank == 2).unwrap(), None);
            })
        })
        .collect();

    let gathered = root.gather(&[0]).unwrap().unwrap();
    assert_eq!(gathered, vec![vec![0], vec![1], vec![2, 2], vec![3, 3, 3]]);
    assert_eq!(root.reduce(5, ReduceOp::Sum).unwrap(), Some(65));
    assert_eq!(root.reduce_bool(false).unwrap(), Some(true));
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn broadcast_reaches_every_worker_in_sequence() {
    let (root, workers) = star(3, RoutingPolicy::Permissive);
    let handles: Vec<_> = workers
        .into_iter()
        .map(|comm| {
            thread::spawn(move || {
                let first = comm.receive_broadcast().unwrap();
                let second = comm.receive_broadcast().unwrap();
                (first, second)
            })
        })
        .collect();

    root.broadcast("ODD").unwrap();
    root.broadcast("").unwrap();
    for h in handles {
        let (first, second) = h.join().unwrap();
        assert_eq!(first.as_deref(), Some("ODD"));
        assert_eq!(second.as_deref(), Some(""));
    }
}

#[test]
fn scatter_hands_out_contiguous_slices() {
    let (root, workers) = star(3, RoutingPolicy::Permissive);
    let handles: Vec<_> = workers
        .into_iter()
        .map(|comm| thread::spawn(move || (comm.rank(), comm.scatter(&[], &[]).unwrap())))
        .collect();

    let mine = root.scatter(&[10, 11, 12, 13, 14], &[2, 2, 1]).unwrap();
    assert_eq!(mine, vec![10, 11]);
    let mut got: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    got.sort();
    assert_eq!(got, vec![(1, vec![12, 13]), (2, vec![14])]);
}

#[test]
fn scatter_then_presort_on_three_ranks() {
    let (root, workers) = star(3, RoutingPolicy::Permissive);
    let handles: Vec<_> = workers
        .into_iter()
        .map(|comm| {
            thread::spawn(move || {
                let scattered = comm.scatter(&[], &[]).unwrap();
                let mut local = scattered.clone();
                presort(&mut local);
                (comm.rank(), scattered, local)
            })
        })
        .collect();

    let scattered = root.scatter(&[5, 3, 8, 1, 9, 2], &[2, 2, 2]).unwrap();
    assert_eq!(scattered, vec![5, 3]);
    let mut local = scattered;
    presort(&mut local);
    assert_eq!(local, vec![3, 5]);

    let mut got: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    got.sort();
    assert_eq!(
        got,
        vec![(1, vec![8, 1], vec![1, 8]), (2, vec![9, 2], vec![2, 9])]
    );
}

#[test]
fn barrier_releases_no_rank_early() {
    const SIZE: usize = 4;
    let (root, workers) = star(SIZE, RoutingPolicy::Permissive);
    let entered = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = workers
        .into_iter()
        .map(|comm| {
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                // Stagger arrival
                thread::sleep(Duration::from_millis(10 * comm.rank() as u64));
                entered.fetch_add(1, Ordering::SeqCst);
                comm.barrier().unwrap();
                assert_eq!(entered.load(Ordering::SeqCst), SIZE);
            })
        })
        .collect();

    entered.fetch_add(1, Ordering::SeqCst);
    root.barrier().unwrap();
    assert_eq!(entered.load(Ordering::SeqCst), SIZE);
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn strict_worker_rejects_peer_to_peer_traffic() {
    let (_root, mut workers) = star(3, RoutingPolicy::Strict);
    let worker = workers.remove(0);
    assert!(matches!(worker.send_int(1, 2), Err(Error::InvalidRank(2))));
    assert!(matches!(worker.recv_array(-1), Err(Error::InvalidRank(-1))));
}

#[test]
fn permissive_worker_ignores_peer_to_peer_traffic() {
    let (root, mut workers) = star(3, RoutingPolicy::Permissive);
    let worker = workers.remove(0);
    worker.send_int(1, 2).unwrap();
    assert_eq!(worker.recv_int(2).unwrap(), 0);

    // The dropped send left nothing on the root link
    worker.send_int(77, ROOT).unwrap();
    assert_eq!(root.recv_int(1).unwrap(), 77);
}

#[test]
fn closed_peer_surfaces_as_disconnect() {
    let (root, mut workers) = star(2, RoutingPolicy::Permissive);
    drop(workers.remove(0));
    let err = root.recv_int(1).unwrap_err();
    assert!(err.is_disconnect(), "{err:?}");
}
