//! Strategy memory: the shared, embedding-indexed store of past strategies.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::classification::BillCategory;
use crate::domain::memory::{MemoryEntryId, MemoryStats, ScoredEntry, StrategyMemoryEntry};
use crate::errors::ApplicationError;

#[async_trait]
pub trait EmbeddingCapability: Send + Sync {
    fn name(&self) -> &'static str;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApplicationError>;
}

/// Reads are unrestricted. Writes are serialized per entry: feedback on one
/// entry never waits on writes to another.
#[async_trait]
pub trait StrategyMemory: Send + Sync {
    /// Append-only; an id that already exists is rejected.
    async fn insert(&self, entry: StrategyMemoryEntry) -> Result<MemoryEntryId, ApplicationError>;

    /// At most `k` entries ordered by descending `rank_score`.
    async fn retrieve_similar(
        &self,
        embedding: &[f32],
        category: Option<BillCategory>,
        k: usize,
    ) -> Result<SimilarEntries, ApplicationError>;

    /// Increments one outcome counter. Strategy content is never touched.
    async fn record_feedback(
        &self,
        id: &MemoryEntryId,
        success: bool,
    ) -> Result<(), ApplicationError>;

    async fn get(&self, id: &MemoryEntryId) -> Result<Option<StrategyMemoryEntry>, ApplicationError>;

    async fn stats(&self) -> Result<MemoryStats, ApplicationError>;
}

/// Finite, single-pass retrieval result.
#[derive(Debug)]
pub struct SimilarEntries {
    inner: std::vec::IntoIter<ScoredEntry>,
}

impl SimilarEntries {
    pub fn empty() -> Self {
        Self { inner: Vec::new().into_iter() }
    }
}

impl Iterator for SimilarEntries {
    type Item = ScoredEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for SimilarEntries {}

/// Cosine similarity; `None` when dimensions differ or a vector is empty.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> Option<f64> {
    if left.is_empty() || left.len() != right.len() {
        return None;
    }

    let (mut dot, mut left_norm, mut right_norm) = (0.0f64, 0.0f64, 0.0f64);
    for (a, b) in left.iter().zip(right) {
        let (a, b) = (f64::from(*a), f64::from(*b));
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return Some(0.0);
    }
    Some((dot / (left_norm.sqrt() * right_norm.sqrt())).clamp(-1.0, 1.0))
}

/// Scores candidates against `query`, keeps those in `category` (when
/// given), and returns the best `k` by `rank_score`. Ties fall back to raw
/// similarity, then age, then id, so the order is stable.
pub fn rank_candidates<I>(
    candidates: I,
    query: &[f32],
    category: Option<BillCategory>,
    k: usize,
) -> SimilarEntries
where
    I: IntoIterator<Item = StrategyMemoryEntry>,
{
    let mut scored: Vec<ScoredEntry> = candidates
        .into_iter()
        .filter(|entry| category.map_or(true, |category| entry.category == category))
        .filter_map(|entry| {
            let similarity = cosine_similarity(query, &entry.embedding)?;
            Some(ScoredEntry::new(entry, similarity))
        })
        .collect();

    scored.sort_by(compare_ranked);
    scored.truncate(k);
    SimilarEntries { inner: scored.into_iter() }
}

fn compare_ranked(left: &ScoredEntry, right: &ScoredEntry) -> Ordering {
    right
        .rank_score
        .total_cmp(&left.rank_score)
        .then_with(|| right.similarity.total_cmp(&left.similarity))
        .then_with(|| left.entry.created_at.cmp(&right.entry.created_at))
        .then_with(|| left.entry.id.cmp(&right.entry.id))
}

pub fn summarize<'a, I>(entries: I) -> MemoryStats
where
    I: IntoIterator<Item = &'a StrategyMemoryEntry>,
{
    let mut stats = MemoryStats::default();
    let mut rate_sum = 0.0;
    let mut rated = 0u64;
    for entry in entries {
        stats.total_entries += 1;
        stats.total_feedback += u64::from(entry.total_feedback());
        stats.total_successes += u64::from(entry.successes);
        if entry.total_feedback() > 0 {
            rate_sum += entry.success_rate();
            rated += 1;
        }
    }
    if rated > 0 {
        stats.average_success_rate = rate_sum / rated as f64;
    }
    stats
}

#[derive(Clone, Copy, Debug, Default)]
struct Counters {
    successes: u32,
    failures: u32,
    version: u64,
}

#[derive(Debug)]
struct Slot {
    content: StrategyMemoryEntry,
    counters: Mutex<Counters>,
}

impl Slot {
    fn new(entry: StrategyMemoryEntry) -> Self {
        let counters =
            Counters { successes: entry.successes, failures: entry.failures, version: entry.version };
        Self { content: entry, counters: Mutex::new(counters) }
    }

    fn snapshot(&self) -> StrategyMemoryEntry {
        let counters = match self.counters.lock() {
            Ok(counters) => *counters,
            Err(poisoned) => *poisoned.into_inner(),
        };
        StrategyMemoryEntry {
            successes: counters.successes,
            failures: counters.failures,
            version: counters.version,
            ..self.content.clone()
        }
    }

    fn apply_feedback(&self, success: bool) -> Counters {
        let mut guard = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if success {
            guard.successes = guard.successes.saturating_add(1);
        } else {
            guard.failures = guard.failures.saturating_add(1);
        }
        guard.version = guard.version.saturating_add(1);
        *guard
    }
}

/// Process-local strategy memory. Each entry carries its own counter lock;
/// the map lock is held only long enough to find or add an entry.
#[derive(Clone, Default)]
pub struct InMemoryStrategyMemory {
    entries: Arc<RwLock<HashMap<MemoryEntryId, Arc<Slot>>>>,
}

impl InMemoryStrategyMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StrategyMemory for InMemoryStrategyMemory {
    async fn insert(&self, entry: StrategyMemoryEntry) -> Result<MemoryEntryId, ApplicationError> {
        let id = entry.id.clone();
        let mut entries = self.entries.write().await;
        if entries.contains_key(&id) {
            return Err(ApplicationError::MemoryStore(format!(
                "memory entry {} already exists",
                id.0
            )));
        }
        entries.insert(id.clone(), Arc::new(Slot::new(entry)));
        Ok(id)
    }

    async fn retrieve_similar(
        &self,
        embedding: &[f32],
        category: Option<BillCategory>,
        k: usize,
    ) -> Result<SimilarEntries, ApplicationError> {
        let snapshots: Vec<StrategyMemoryEntry> =
            self.entries.read().await.values().map(|slot| slot.snapshot()).collect();
        Ok(rank_candidates(snapshots, embedding, category, k))
    }

    async fn record_feedback(
        &self,
        id: &MemoryEntryId,
        success: bool,
    ) -> Result<(), ApplicationError> {
        let slot = self.entries.read().await.get(id).cloned().ok_or_else(|| {
            ApplicationError::MemoryStore(format!("memory entry {} does not exist", id.0))
        })?;
        let counters = slot.apply_feedback(success);
        tracing::debug!(
            event_name = "memory.feedback.recorded",
            entry_id = %id.0,
            success,
            successes = counters.successes,
            failures = counters.failures,
            version = counters.version,
            "strategy feedback recorded"
        );
        Ok(())
    }

    async fn get(&self, id: &MemoryEntryId) -> Result<Option<StrategyMemoryEntry>, ApplicationError> {
        Ok(self.entries.read().await.get(id).map(|slot| slot.snapshot()))
    }

    async fn stats(&self) -> Result<MemoryStats, ApplicationError> {
        let snapshots: Vec<StrategyMemoryEntry> =
            self.entries.read().await.values().map(|slot| slot.snapshot()).collect();
        Ok(summarize(&snapshots))
    }
}
