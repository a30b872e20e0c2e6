//! In-process transport: one OS thread per rank, pairwise channels between
//! them.
//!
//! This is the transport the tests run against. Each ordered rank pair gets
//! its own channel, so messages from a given source arrive in the order they
//! were sent and never interleave with another source's traffic.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;

use parking_lot::Mutex;
use regatta_error::{ErrorKind, RegattaError, Result};
use tracing::debug;

use super::Communicator;

pub struct LocalComm {
    rank: usize,
    size: usize,
    /// `senders[dst]` delivers from this rank to `dst`.
    senders: Vec<Sender<Vec<u8>>>,
    /// `receivers[src]` yields messages sent by `src` to this rank.
    receivers: Vec<Receiver<Vec<u8>>>,
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, to: usize, data: Vec<u8>) -> Result<()> {
        let sender = self.senders.get(to).ok_or_else(|| {
            RegattaError::new("Destination rank out of bounds")
                .with_field("to", to)
                .with_field("size", self.size)
        })?;
        sender.send(data).map_err(|_| {
            RegattaError::with_kind(ErrorKind::Internal, "Peer channel closed")
                .with_field("to", to)
        })
    }

    fn recv(&self, from: usize) -> Result<Vec<u8>> {
        let receiver = self.receivers.get(from).ok_or_else(|| {
            RegattaError::new("Source rank out of bounds")
                .with_field("from", from)
                .with_field("size", self.size)
        })?;
        receiver.recv().map_err(|_| {
            RegattaError::with_kind(ErrorKind::Internal, "Peer channel closed")
                .with_field("from", from)
        })
    }
}

/// Spawns `num_ranks` threads wired together with [`LocalComm`]s.
pub struct LocalCluster;

impl LocalCluster {
    /// Build the communicators without running anything. Mostly useful when a
    /// caller manages its own threads.
    pub fn connect(num_ranks: usize) -> Vec<LocalComm> {
        assert!(num_ranks > 0, "cluster needs at least one rank");

        let mut comms: Vec<LocalComm> = (0..num_ranks)
            .map(|rank| LocalComm {
                rank,
                size: num_ranks,
                senders: Vec::with_capacity(num_ranks),
                receivers: Vec::with_capacity(num_ranks),
            })
            .collect();

        for src in 0..num_ranks {
            for dst in 0..num_ranks {
                let (tx, rx) = channel();
                comms[src].senders.push(tx);
                comms[dst].receivers.push(rx);
            }
        }

        comms
    }

    /// Run `f` on every rank concurrently and collect per-rank results.
    ///
    /// A rank that panics reports an `Internal` error rather than poisoning
    /// the others; surviving ranks fail on closed channels at their next
    /// collective.
    pub fn run<T, F>(num_ranks: usize, f: F) -> Vec<Result<T>>
    where
        T: Send,
        F: Fn(&LocalComm) -> Result<T> + Send + Sync,
    {
        let comms = Self::connect(num_ranks);
        debug!(num_ranks, "starting local cluster");

        let results: Mutex<Vec<Option<Result<T>>>> =
            Mutex::new((0..num_ranks).map(|_| None).collect());

        // Receivers are not Sync, so each thread takes its comm by value.
        thread::scope(|s| {
            for comm in comms {
                let results = &results;
                let f = &f;
                s.spawn(move || {
                    let rank = comm.rank();
                    let out = f(&comm);
                    results.lock()[rank] = Some(out);
                });
            }
        });

        results
            .into_inner()
            .into_iter()
            .enumerate()
            .map(|(rank, result)| {
                result.unwrap_or_else(|| {
                    Err(
                        RegattaError::with_kind(ErrorKind::Internal, "Rank thread panicked")
                            .with_field("rank", rank),
                    )
                })
            })
            .collect()
    }
}
