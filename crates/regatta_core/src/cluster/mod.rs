//! Rank-to-rank communication.
//!
//! The engine runs the same code on every rank and exchanges bytes through a
//! [`Communicator`]. Collectives are built on pairwise send/recv so that a
//! transport only has to provide point-to-point delivery. All receive loops
//! iterate sources in rank order, which is what downstream code relies on for
//! deterministic row ordering.

pub mod local;

use bytes::{Buf, BufMut};
use regatta_error::{ErrorKind, RegattaError, Result};

pub trait Communicator: Send {
    /// This rank's id, in `0..size`.
    fn rank(&self) -> usize;

    /// Total number of ranks.
    fn size(&self) -> usize;

    /// Send a buffer to another rank. May buffer; completion does not imply
    /// delivery.
    fn send(&self, to: usize, data: Vec<u8>) -> Result<()>;

    /// Receive the next buffer sent by `from`. Blocks.
    fn recv(&self, from: usize) -> Result<Vec<u8>>;

    /// Every rank contributes one buffer per destination and receives one
    /// buffer per source, ordered by source rank.
    fn all_to_all(&self, mut outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        if outgoing.len() != self.size() {
            return Err(RegattaError::new("all_to_all requires one buffer per rank")
                .with_field("buffers", outgoing.len())
                .with_field("size", self.size()));
        }

        let rank = self.rank();
        let mut own = Some(std::mem::take(&mut outgoing[rank]));
        for (dst, data) in outgoing.into_iter().enumerate() {
            if dst != rank {
                self.send(dst, data)?;
            }
        }

        let mut incoming = Vec::with_capacity(self.size());
        for src in 0..self.size() {
            if src == rank {
                incoming.push(own.take().unwrap_or_default());
            } else {
                incoming.push(self.recv(src)?);
            }
        }
        Ok(incoming)
    }

    /// Every rank contributes one buffer; every rank receives all buffers
    /// ordered by source rank.
    fn all_gather(&self, data: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        let outgoing = vec![data; self.size()];
        self.all_to_all(outgoing)
    }

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<()> {
        self.all_gather(Vec::new())?;
        Ok(())
    }
}

/// Synchronize a fallible local step across all ranks.
///
/// Ranks between collectives must fail together: if any rank errored, every
/// rank must learn about it before the next collective, otherwise the healthy
/// ranks block forever waiting for data that will never come. The origin rank
/// keeps its own error; other ranks get a `PeerFailure` naming the origin.
pub fn check_collective<T>(comm: &dyn Communicator, result: Result<T>) -> Result<T> {
    let mut buf = Vec::new();
    match &result {
        Ok(_) => buf.put_u8(0),
        Err(err) => {
            buf.put_u8(1);
            let msg = err.to_string();
            buf.put_u32_le(msg.len() as u32);
            buf.put_slice(msg.as_bytes());
        }
    }

    let gathered = comm.all_gather(buf)?;

    // Local error wins; the caller sees the real failure.
    let value = result?;

    for (origin, peer) in gathered.iter().enumerate() {
        if origin == comm.rank() {
            continue;
        }
        let mut peer = peer.as_slice();
        if peer.remaining() < 1 {
            return Err(RegattaError::with_kind(
                ErrorKind::Internal,
                "Malformed status buffer from peer",
            )
            .with_field("origin_rank", origin));
        }
        if peer.get_u8() == 1 {
            let msg = decode_peer_message(&mut peer);
            return Err(
                RegattaError::with_kind(ErrorKind::PeerFailure, "Peer rank failed")
                    .with_field("origin_rank", origin)
                    .with_field("peer_error", msg),
            );
        }
    }

    Ok(value)
}

fn decode_peer_message(buf: &mut impl Buf) -> String {
    if buf.remaining() < 4 {
        return String::from("<truncated>");
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return String::from("<truncated>");
    }
    let mut bytes = vec![0; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::local::LocalCluster;
    use super::*;

    #[test]
    fn all_gather_ordered_by_rank() {
        let results = LocalCluster::run(3, |comm| {
            let gathered = comm.all_gather(vec![comm.rank() as u8])?;
            Ok(gathered)
        });
        for result in results {
            let gathered = result.unwrap();
            assert_eq!(vec![vec![0_u8], vec![1], vec![2]], gathered);
        }
    }

    #[test]
    fn all_to_all_routes_by_destination() {
        let results = LocalCluster::run(2, |comm| {
            let outgoing = (0..comm.size())
                .map(|dst| vec![comm.rank() as u8, dst as u8])
                .collect();
            comm.all_to_all(outgoing)
        });
        let rank0 = results[0].as_ref().unwrap();
        assert_eq!(vec![vec![0_u8, 0], vec![1, 0]], *rank0);
        let rank1 = results[1].as_ref().unwrap();
        assert_eq!(vec![vec![0_u8, 1], vec![1, 1]], *rank1);
    }

    #[test]
    fn failure_reaches_all_ranks() {
        let results = LocalCluster::run(3, |comm| {
            let step: Result<()> = if comm.rank() == 1 {
                Err(RegattaError::new("local step blew up"))
            } else {
                Ok(())
            };
            check_collective(comm, step)
        });

        assert!(results[1].as_ref().unwrap_err().to_string().contains("blew up"));
        for rank in [0, 2] {
            let err = results[rank].as_ref().unwrap_err();
            assert_eq!(ErrorKind::PeerFailure, err.kind());
        }
    }
}
