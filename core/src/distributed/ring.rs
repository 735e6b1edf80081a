//! Ring all-reduce over any point-to-point link.
//!
//! The buffer is cut into `world_size` chunks. In the reduce-scatter phase each
//! rank forwards a partial sum to its right neighbour `world_size - 1` times, so
//! that rank `r` ends up owning the full sum of chunk `(r + 1) % world_size`. In
//! the all-gather phase the owned chunks travel once more around the ring and
//! overwrite the stale copies.
//!
//! Every element of the result is added up on exactly one rank and then copied,
//! which is what makes the result bit-identical everywhere.

use crate::error::{Error, Result};
use std::ops::Range;

/// One rank's view of the ring: a sender to `rank + 1` and a receiver from `rank - 1`.
pub trait RingLink {
    /// Sends `send` to the right neighbour and returns what the left neighbour sent
    /// in the same step.
    ///
    /// Implementations must not deadlock when every rank calls this at once.
    fn exchange(&self, send: &[f32]) -> Result<Vec<f32>>;
}

/// Element range of chunk `index` when `len` values are split into `chunks` pieces.
///
/// Trailing chunks are shorter, possibly empty, when `len` does not divide evenly.
pub fn chunk_range(len: usize, chunks: usize, index: usize) -> Range<usize> {
    let size = len.div_ceil(chunks.max(1));
    let start = (index * size).min(len);
    let end = (start + size).min(len);
    start..end
}

/// In-place ring all-reduce (sum) of `buf` across `world_size` ranks.
pub fn ring_all_reduce_sum<L>(link: &L, rank: usize, world_size: usize, buf: &mut [f32]) -> Result<()>
where
    L: RingLink + ?Sized,
{
    if world_size == 0 {
        return Err(Error::InvalidWorldSize);
    }
    if rank >= world_size {
        return Err(Error::InvalidRank { rank, world_size });
    }
    if world_size == 1 {
        return Ok(());
    }

    let len = buf.len();
    let left = (rank + world_size - 1) % world_size;
    // Chunk owned `back` positions to the left of this rank's own index.
    let chunk = |back: usize| chunk_range(len, world_size, (rank + world_size - back) % world_size);

    // Reduce-scatter: at step s, send chunk (r - s), accumulate chunk (r - s - 1).
    for step in 0..world_size - 1 {
        let send = chunk(step);
        let recv = chunk(step + 1);
        let incoming = link.exchange(&buf[send])?;
        check_len(left, recv.len(), incoming.len())?;
        for (dst, src) in buf[recv].iter_mut().zip(&incoming) {
            *dst += *src;
        }
    }

    // All-gather: at step s, send chunk (r + 1 - s), overwrite chunk (r - s).
    for step in 0..world_size - 1 {
        let send = chunk_range(len, world_size, (rank + 1 + world_size - step) % world_size);
        let recv = chunk(step);
        let incoming = link.exchange(&buf[send])?;
        check_len(left, recv.len(), incoming.len())?;
        buf[recv].copy_from_slice(&incoming);
    }

    Ok(())
}

fn check_len(peer: usize, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(Error::CollectiveStall {
            peer,
            reason: format!("expected a chunk of {expected} values, received {got}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_ranges_cover_buffer() {
        // 5 values over 4 ranks: sizes 2, 2, 1, 0.
        let ranges: Vec<_> = (0..4).map(|i| chunk_range(5, 4, i)).collect();
        assert_eq!(ranges, vec![0..2, 2..4, 4..5, 5..5]);

        // Fewer values than ranks.
        let ranges: Vec<_> = (0..3).map(|i| chunk_range(1, 3, i)).collect();
        assert_eq!(ranges, vec![0..1, 1..1, 1..1]);
    }

    struct Loopback;

    impl RingLink for Loopback {
        fn exchange(&self, send: &[f32]) -> Result<Vec<f32>> {
            Ok(send.to_vec())
        }
    }

    #[test]
    fn test_single_rank_is_identity() {
        let mut buf = vec![1.0, 2.0];
        ring_all_reduce_sum(&Loopback, 0, 1, &mut buf).unwrap();
        assert_eq!(buf, vec![1.0, 2.0]);
    }

    #[test]
    fn test_invalid_rank() {
        let mut buf = vec![1.0];
        assert!(matches!(
            ring_all_reduce_sum(&Loopback, 2, 2, &mut buf),
            Err(Error::InvalidRank { rank: 2, world_size: 2 })
        ));
    }

    struct ShortLink;

    impl RingLink for ShortLink {
        fn exchange(&self, _send: &[f32]) -> Result<Vec<f32>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_short_chunk_is_reported() {
        let mut buf = vec![1.0; 4];
        let err = ring_all_reduce_sum(&ShortLink, 0, 2, &mut buf).unwrap_err();
        assert!(matches!(err, Error::CollectiveStall { peer: 1, .. }));
    }
}
