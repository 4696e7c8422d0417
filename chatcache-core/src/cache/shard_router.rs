//! Deterministic shard assignment and read-replica selection
//!
//! Write shards are chosen by CRC-32 of the room identifier; read replicas
//! are chosen round-robin from a process-wide cursor.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Key namespaces whose second segment is a room id.
///
/// All entries of one room land on the same write shard.
const ROOM_SCOPED_PREFIXES: [&str; 6] = [
    "messages:",
    "recent:",
    "msg_count:",
    "room:",
    "participants:",
    "socket:room_users:",
];

/// Shard router
///
/// The mapping is only stable for a fixed shard count; changing the count
/// remaps every room and there is no rehashing support.
#[derive(Debug)]
pub struct ShardRouter {
    shard_count: usize,
    replica_count: usize,
    read_cursor: AtomicUsize,
}

impl ShardRouter {
    /// Create a router over `shard_count` write shards and `replica_count`
    /// read replicas. A zero shard count is treated as one shard.
    #[must_use]
    pub const fn new(shard_count: usize, replica_count: usize) -> Self {
        Self {
            shard_count: if shard_count == 0 { 1 } else { shard_count },
            replica_count,
            read_cursor: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn shard_count(&self) -> usize {
        self.shard_count
    }

    #[must_use]
    pub const fn replica_count(&self) -> usize {
        self.replica_count
    }

    /// Shard index in `[0, shard_count)` for a room identifier
    #[must_use]
    pub fn shard_for(&self, room_id: &str) -> usize {
        let hash = crc32fast::hash(room_id.as_bytes());
        (hash as usize) % self.shard_count
    }

    /// Shard index for a full cache key
    ///
    /// Room-scoped keys route by their room id, everything else by the
    /// whole key.
    #[must_use]
    pub fn route_key(&self, key: &str) -> usize {
        self.shard_for(routing_token(key))
    }

    /// Next read replica in round-robin order, `None` without replicas.
    ///
    /// Concurrent callers each get a distinct cursor value; there is no
    /// ordering guarantee between them beyond eventual fairness.
    pub fn next_read_target(&self) -> Option<usize> {
        if self.replica_count == 0 {
            return None;
        }
        let cursor = self.read_cursor.fetch_add(1, Ordering::Relaxed);
        Some(cursor % self.replica_count)
    }
}

/// The part of a key used for shard selection
#[must_use]
pub fn routing_token(key: &str) -> &str {
    for prefix in ROOM_SCOPED_PREFIXES {
        if let Some(rest) = key.strip_prefix(prefix) {
            return rest.split_once(':').map_or(rest, |(room_id, _)| room_id);
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_shard_for_is_deterministic() {
        let router = ShardRouter::new(3, 0);
        for i in 0..1000 {
            let room_id = format!("room-{i}");
            let first = router.shard_for(&room_id);
            assert!(first < 3);
            assert_eq!(first, router.shard_for(&room_id));
            assert_eq!(first, ShardRouter::new(3, 2).shard_for(&room_id));
        }
    }

    #[test]
    fn test_shard_for_matches_crc32() {
        let router = ShardRouter::new(3, 0);
        // CRC-32/ISO-HDLC("123456789") = 0xCBF43926
        assert_eq!(crc32fast::hash(b"123456789"), 0xCBF4_3926);
        assert_eq!(router.shard_for("123456789"), (0xCBF4_3926_usize) % 3);
    }

    #[test]
    fn test_shard_distribution_chi_square() {
        let shard_count = 3;
        let samples = 12_000;
        let router = ShardRouter::new(shard_count, 0);

        let mut buckets = vec![0_u64; shard_count];
        for i in 0..samples {
            buckets[router.shard_for(&format!("room-{i}"))] += 1;
        }

        let expected = f64::from(samples) / shard_count as f64;
        let chi_square: f64 = buckets
            .iter()
            .map(|&observed| {
                let diff = observed as f64 - expected;
                diff * diff / expected
            })
            .sum();

        // df = 2, p = 0.001
        assert!(chi_square < 13.816, "chi-square {chi_square} for {buckets:?}");
    }

    #[test]
    fn test_round_robin_wraps() {
        let router = ShardRouter::new(3, 3);
        let picks: Vec<usize> = (0..7).filter_map(|_| router.next_read_target()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_no_replicas() {
        let router = ShardRouter::new(3, 0);
        assert_eq!(router.next_read_target(), None);
    }

    #[test]
    fn test_round_robin_under_concurrency() {
        let router = Arc::new(ShardRouter::new(3, 4));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let router = router.clone();
                std::thread::spawn(move || {
                    (0..1000)
                        .filter_map(|_| router.next_read_target())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts = [0_usize; 4];
        for handle in handles {
            for pick in handle.join().unwrap() {
                counts[pick] += 1;
            }
        }
        // 8000 increments spread exactly evenly over 4 replicas
        assert_eq!(counts, [2000, 2000, 2000, 2000]);
    }

    #[test]
    fn test_routing_token() {
        assert_eq!(routing_token("messages:r1:0"), "r1");
        assert_eq!(routing_token("recent:r1"), "r1");
        assert_eq!(routing_token("msg_count:r1"), "r1");
        assert_eq!(routing_token("socket:room_users:r1"), "r1");
        assert_eq!(routing_token("message:m1"), "message:m1");
        assert_eq!(routing_token("unread:u1:r1"), "unread:u1:r1");
    }

    #[test]
    fn test_room_keys_colocate() {
        let router = ShardRouter::new(5, 0);
        let shards: HashSet<usize> = [
            "messages:room-42:0",
            "messages:room-42:3",
            "recent:room-42",
            "msg_count:room-42",
            "room:room-42",
            "participants:room-42",
            "socket:room_users:room-42",
        ]
        .iter()
        .map(|key| router.route_key(key))
        .collect();
        assert_eq!(shards.len(), 1);
        assert!(shards.contains(&router.shard_for("room-42")));
    }
}
