// src/utils.rs
// Utility functions shared across the engine

use std::time::{SystemTime, UNIX_EPOCH};

/// Creates a vector of (start_block, end_block) tuples for a given range and
/// chunk size. Used to parallelize log scans during pool discovery and to
/// split oversized `getLogs` ranges.
pub fn create_block_chunks(from_block: u64, to_block: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    let mut chunks = Vec::new();
    if chunk_size == 0 || from_block > to_block {
        return chunks;
    }
    let mut current_from = from_block;
    while current_from <= to_block {
        let current_to = std::cmp::min(current_from + chunk_size - 1, to_block);
        chunks.push((current_from, current_to));
        current_from = current_to + 1;
    }
    chunks
}

/// Wall-clock milliseconds since the Unix epoch. Monotonic enough for
/// `last_updated` stamps and TTL expiry checks.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Adds up to `spread_ms` of random jitter to a base interval so pollers
/// across restarts do not align on the same tick.
pub fn jittered_ms(base_ms: u64, spread_ms: u64) -> u64 {
    use rand::Rng;
    if spread_ms == 0 {
        return base_ms;
    }
    base_ms + rand::thread_rng().gen_range(0..spread_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_chunks_cover_range_exactly() {
        let chunks = create_block_chunks(100, 350, 100);
        assert_eq!(chunks, vec![(100, 199), (200, 299), (300, 350)]);
    }

    #[test]
    fn block_chunks_single_block() {
        assert_eq!(create_block_chunks(5, 5, 100), vec![(5, 5)]);
    }

    #[test]
    fn block_chunks_empty_on_inverted_range() {
        assert!(create_block_chunks(10, 5, 100).is_empty());
        assert!(create_block_chunks(1, 10, 0).is_empty());
    }

    #[test]
    fn jitter_stays_in_bounds() {
        for _ in 0..50 {
            let v = jittered_ms(2000, 1000);
            assert!((2000..3000).contains(&v));
        }
        assert_eq!(jittered_ms(2000, 0), 2000);
    }
}
