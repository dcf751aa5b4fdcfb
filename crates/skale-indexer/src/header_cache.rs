//! Per-scrape block header memo with coalesced range tracking.

use skale_common::{BlockHeader, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::transport::ChainTransport;

/// Inclusive block range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    fn touches(&self, other: &BlockRange) -> bool {
        self.from <= other.to.saturating_add(1) && other.from <= self.to.saturating_add(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRange {
    pub range: BlockRange,
    pub header: Option<BlockHeader>,
}

#[derive(Debug, Default)]
struct Inner {
    // keyed by range.from; ranges are pairwise disjoint
    ranges: BTreeMap<u64, CachedRange>,
    headers: HashMap<u64, BlockHeader>,
}

impl Inner {
    fn insert(&mut self, range: BlockRange, header: Option<BlockHeader>) {
        let merged: Vec<u64> = self
            .ranges
            .values()
            .filter(|stored| stored.range.touches(&range))
            .map(|stored| stored.range.from)
            .collect();

        let mut from = range.from;
        let mut to = range.to;
        let mut best = header;
        let explicit = best.is_some();
        for key in merged {
            let Some(stored) = self.ranges.remove(&key) else {
                continue;
            };
            from = from.min(stored.range.from);
            to = to.max(stored.range.to);
            if !explicit {
                best = match (best, stored.header) {
                    (Some(a), Some(b)) => Some(if b.number > a.number { b } else { a }),
                    (a, b) => a.or(b),
                };
            }
        }

        // a header outside the merged span cannot anchor it
        let header = best.filter(|h| h.number <= to);
        if let Some(h) = &header {
            from = from.max(h.number);
        }

        self.ranges.insert(
            from,
            CachedRange {
                range: BlockRange { from, to },
                header,
            },
        );
    }
}

/// Shared across the workers of one scrape; dropped when the scrape ends.
#[derive(Debug, Default)]
pub struct HeaderCache {
    inner: RwLock<Inner>,
}

impl HeaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, range: BlockRange, header: Option<BlockHeader>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(h) = &header {
            inner.headers.insert(h.number, h.clone());
        }
        inner.insert(range, header);
    }

    pub fn ranges(&self) -> Vec<CachedRange> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.ranges.values().cloned().collect()
    }

    pub fn get(&self, height: u64) -> Option<BlockHeader> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.headers.get(&height).cloned()
    }

    /// Cached header for `height`, fetching it on a miss. The fetch runs
    /// without holding the lock.
    pub async fn get_or_fetch(&self, height: u64, transport: &dyn ChainTransport) -> Result<BlockHeader> {
        if let Some(header) = self.get(height) {
            return Ok(header);
        }
        let header = transport.get_block_header(height).await?;
        self.insert(BlockRange::new(height, height), Some(header.clone()));
        Ok(header)
    }
}
