//! Partition selection strategies for produced messages.
//!
//! The strategies here take `&mut self` and keep their state unsynchronized: a strategy
//! belongs to one produce-calling thread. [`StrategyPartitioner`] is the wrapper the
//! producer uses to share one behind a lock.
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait PartitionSelector {
    /// Pick a partition in `[0, partition_count)` for a message with the given key.
    fn select(&mut self, key: Option<&[u8]>, partition_count: i32) -> i32;
}

/// Always the same partition, whatever the key or partition count.
#[derive(Debug, Clone, Copy)]
pub struct ManualPartitioner {
    partition: i32,
}

impl ManualPartitioner {
    pub fn new(partition: i32) -> Self {
        Self { partition }
    }
}

impl PartitionSelector for ManualPartitioner {
    fn select(&mut self, _key: Option<&[u8]>, _partition_count: i32) -> i32 {
        self.partition
    }
}

#[derive(Debug)]
pub struct RandomPartitioner {
    rng: StdRng,
}

impl RandomPartitioner {
    /// Seeded once from the wall clock.
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        Self::with_seed(seed)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomPartitioner {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionSelector for RandomPartitioner {
    fn select(&mut self, _key: Option<&[u8]>, partition_count: i32) -> i32 {
        if partition_count <= 0 {
            return 0;
        }
        self.rng.gen_range(0..partition_count)
    }
}

#[derive(Debug, Default, Clone)]
pub struct RoundRobinPartitioner {
    next: i32,
}

impl RoundRobinPartitioner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PartitionSelector for RoundRobinPartitioner {
    fn select(&mut self, _key: Option<&[u8]>, partition_count: i32) -> i32 {
        // Checked on every call so a topic growing or shrinking takes effect immediately
        if self.next >= partition_count {
            self.next = 0;
        }
        let partition = self.next;
        self.next += 1;
        partition
    }
}

pub type HashFn = Box<dyn Fn(&[u8]) -> u32 + Send>;

/// Hashes the key and takes it modulo the partition count. Keyless messages go to partition 0.
pub struct HashPartitioner {
    hash: HashFn,
}

impl HashPartitioner {
    pub fn new() -> Self {
        Self {
            hash: Box::new(djb_hash),
        }
    }

    pub fn with_hash_fn<F>(hash: F) -> Self
    where
        F: Fn(&[u8]) -> u32 + Send + 'static,
    {
        Self {
            hash: Box::new(hash),
        }
    }
}

impl Default for HashPartitioner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HashPartitioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashPartitioner").finish_non_exhaustive()
    }
}

impl PartitionSelector for HashPartitioner {
    fn select(&mut self, key: Option<&[u8]>, partition_count: i32) -> i32 {
        let Some(key) = key else {
            return 0;
        };
        if partition_count <= 0 {
            return 0;
        }
        let partition = (self.hash)(key) % partition_count.unsigned_abs();
        // Lossless: the remainder is smaller than an i32 partition count
        i32::try_from(partition).unwrap_or_default()
    }
}

/// djb2: seed 5381, `hash * 33 + byte` for every byte.
pub fn djb_hash(bytes: &[u8]) -> u32 {
    bytes.iter().fold(5381u32, |hash, &byte| {
        hash.wrapping_mul(33).wrapping_add(u32::from(byte))
    })
}

pub type CustomSelectFn = Box<dyn FnMut(Option<&[u8]>, i32) -> i32 + Send>;

/// A partitioner chosen at producer construction.
pub enum PartitionStrategy {
    Manual(ManualPartitioner),
    Random(RandomPartitioner),
    RoundRobin(RoundRobinPartitioner),
    Hash(HashPartitioner),
    Custom(CustomSelectFn),
}

impl PartitionStrategy {
    pub fn custom<F>(select: F) -> Self
    where
        F: FnMut(Option<&[u8]>, i32) -> i32 + Send + 'static,
    {
        PartitionStrategy::Custom(Box::new(select))
    }
}

impl PartitionSelector for PartitionStrategy {
    fn select(&mut self, key: Option<&[u8]>, partition_count: i32) -> i32 {
        match self {
            PartitionStrategy::Manual(p) => p.select(key, partition_count),
            PartitionStrategy::Random(p) => p.select(key, partition_count),
            PartitionStrategy::RoundRobin(p) => p.select(key, partition_count),
            PartitionStrategy::Hash(p) => p.select(key, partition_count),
            PartitionStrategy::Custom(select) => select(key, partition_count),
        }
    }
}

impl fmt::Debug for PartitionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionStrategy::Manual(p) => f.debug_tuple("Manual").field(p).finish(),
            PartitionStrategy::Random(_) => f.write_str("Random"),
            PartitionStrategy::RoundRobin(p) => f.debug_tuple("RoundRobin").field(p).finish(),
            PartitionStrategy::Hash(_) => f.write_str("Hash"),
            PartitionStrategy::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Config-level name of a built-in strategy: `manual:<partition>`, `random`, `round_robin`
/// or `hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionerKind {
    Manual(i32),
    Random,
    RoundRobin,
    Hash,
}

impl PartitionerKind {
    pub fn into_strategy(self) -> PartitionStrategy {
        match self {
            PartitionerKind::Manual(partition) => {
                PartitionStrategy::Manual(ManualPartitioner::new(partition))
            }
            PartitionerKind::Random => PartitionStrategy::Random(RandomPartitioner::new()),
            PartitionerKind::RoundRobin => {
                PartitionStrategy::RoundRobin(RoundRobinPartitioner::new())
            }
            PartitionerKind::Hash => PartitionStrategy::Hash(HashPartitioner::new()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParsePartitionerKindError(pub String);

impl fmt::Display for ParsePartitionerKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown partitioner {:?}, expected manual:<n>, random, round_robin or hash",
            self.0
        )
    }
}

impl std::error::Error for ParsePartitionerKindError {}

impl FromStr for PartitionerKind {
    type Err = ParsePartitionerKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "random" => Ok(PartitionerKind::Random),
            "round_robin" | "roundrobin" | "round-robin" => Ok(PartitionerKind::RoundRobin),
            "hash" => Ok(PartitionerKind::Hash),
            other => other
                .strip_prefix("manual:")
                .and_then(|partition| partition.parse::<i32>().ok())
                .filter(|partition| *partition >= 0)
                .map(PartitionerKind::Manual)
                .ok_or_else(|| ParsePartitionerKindError(s.to_owned())),
        }
    }
}

/// A strategy shared by the producer's callbacks, serialized by a mutex.
///
/// librdkafka calls this from whichever thread enqueues a message without an explicit
/// partition.
pub struct StrategyPartitioner {
    strategy: Mutex<PartitionStrategy>,
}

impl StrategyPartitioner {
    pub fn new(strategy: PartitionStrategy) -> Self {
        Self {
            strategy: Mutex::new(strategy),
        }
    }

    pub fn select(&self, key: Option<&[u8]>, partition_count: i32) -> i32 {
        self.strategy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .select(key, partition_count)
    }
}

impl rdkafka::producer::Partitioner for StrategyPartitioner {
    fn partition(
        &self,
        _topic_name: &str,
        key: Option<&[u8]>,
        partition_cnt: i32,
        _is_partition_available: impl Fn(i32) -> bool,
    ) -> i32 {
        self.select(key, partition_cnt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_ignores_key_and_count() {
        let mut partitioner = ManualPartitioner::new(7);
        assert_eq!(partitioner.select(None, 0), 7);
        assert_eq!(partitioner.select(Some(b"key"), 3), 7);
    }

    #[test]
    fn test_round_robin_wraps() {
        let mut partitioner = RoundRobinPartitioner::new();
        let picked: Vec<i32> = (0..7).map(|_| partitioner.select(None, 3)).collect();
        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_round_robin_honours_count_change() {
        let mut partitioner = RoundRobinPartitioner::new();
        assert_eq!(partitioner.select(None, 4), 0);
        assert_eq!(partitioner.select(None, 4), 1);
        assert_eq!(partitioner.select(None, 4), 2);

        // The topic shrank to two partitions, so the next pick wraps straight away
        assert_eq!(partitioner.select(None, 2), 0);
        assert_eq!(partitioner.select(None, 2), 1);
        assert_eq!(partitioner.select(None, 2), 0);

        assert_eq!(partitioner.select(None, 5), 1);
    }

    #[test]
    fn test_round_robin_with_no_partitions() {
        let mut partitioner = RoundRobinPartitioner::new();
        assert_eq!(partitioner.select(None, 0), 0);
        assert_eq!(partitioner.select(None, 0), 0);
    }

    #[test]
    fn test_random_stays_in_range() {
        let mut partitioner = RandomPartitioner::with_seed(42);
        for _ in 0..1000 {
            let partition = partitioner.select(None, 5);
            assert!((0..5).contains(&partition));
        }
        assert_eq!(partitioner.select(None, 0), 0);
        assert_eq!(partitioner.select(None, 1), 0);
    }

    #[test]
    fn test_random_same_seed_same_sequence() {
        let mut first = RandomPartitioner::with_seed(7);
        let mut second = RandomPartitioner::with_seed(7);
        let a: Vec<i32> = (0..20).map(|_| first.select(None, 16)).collect();
        let b: Vec<i32> = (0..20).map(|_| second.select(None, 16)).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_djb_hash() {
        assert_eq!(djb_hash(b""), 5381);
        assert_eq!(djb_hash(b"a"), 5381 * 33 + 97);
        assert_eq!(djb_hash(b"ab"), (5381 * 33 + 97) * 33 + 98);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let mut partitioner = HashPartitioner::new();
        let first = partitioner.select(Some(b"user-42"), 12);
        for _ in 0..10 {
            assert_eq!(partitioner.select(Some(b"user-42"), 12), first);
        }
        assert_eq!(HashPartitioner::new().select(Some(b"user-42"), 12), first);
    }

    #[test]
    fn test_hash_without_key_or_partitions() {
        let mut partitioner = HashPartitioner::new();
        assert_eq!(partitioner.select(None, 4), 0);
        assert_eq!(partitioner.select(Some(b"a"), 0), 0);
    }

    #[test]
    fn test_hash_known_keys() {
        let mut partitioner = HashPartitioner::new();
        let picked: Vec<i32> = [b"a", b"b", b"c"]
            .iter()
            .map(|key| partitioner.select(Some(key.as_slice()), 4))
            .collect();
        assert_eq!(picked, vec![2, 3, 0]);
    }

    #[test]
    fn test_hash_with_custom_function() {
        let mut partitioner = HashPartitioner::with_hash_fn(|key| key.len() as u32);
        assert_eq!(partitioner.select(Some(b"abcde"), 3), 2);
        assert_eq!(partitioner.select(Some(b""), 3), 0);
    }

    #[test]
    fn test_strategy_dispatch() {
        let mut strategy = PartitionerKind::RoundRobin.into_strategy();
        assert_eq!(strategy.select(None, 2), 0);
        assert_eq!(strategy.select(None, 2), 1);

        let mut calls = 0;
        let mut custom = PartitionStrategy::custom(move |_, count| {
            calls += 1;
            calls % count.max(1)
        });
        assert_eq!(custom.select(None, 3), 1);
        assert_eq!(custom.select(None, 3), 2);
    }

    #[test]
    fn test_shared_partitioner() {
        let shared = StrategyPartitioner::new(PartitionerKind::Manual(3).into_strategy());
        assert_eq!(shared.select(Some(b"k"), 8), 3);

        let shared = StrategyPartitioner::new(PartitionerKind::Hash.into_strategy());
        assert_eq!(shared.select(Some(b"c"), 4), 0);
    }

    #[test]
    fn test_parse_partitioner_kind() {
        assert_eq!("random".parse(), Ok(PartitionerKind::Random));
        assert_eq!("ROUND_ROBIN".parse(), Ok(PartitionerKind::RoundRobin));
        assert_eq!("hash".parse(), Ok(PartitionerKind::Hash));
        assert_eq!("manual:3".parse(), Ok(PartitionerKind::Manual(3)));
        assert!("manual:-1".parse::<PartitionerKind>().is_err());
        assert!("manual".parse::<PartitionerKind>().is_err());
        assert!("murmur2".parse::<PartitionerKind>().is_err());
    }
}
