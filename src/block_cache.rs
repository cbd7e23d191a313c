use lru::LruCache;

pub(crate) struct CachedBlock {
    pub data: Vec<u8>,
    pub dirty: bool,
}

/// LRU of decoded scanlines for one band, bounded by a byte budget.
///
/// Evicted dirty blocks are handed back to the caller so they can be
/// written through before the data is dropped.
pub(crate) struct BlockCache {
    entries: LruCache<usize, CachedBlock>,
    current_bytes: usize,
    capacity_bytes: usize,
}

impl BlockCache {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            current_bytes: 0,
            capacity_bytes: capacity_bytes.max(1),
        }
    }

    pub fn contains(&self, row: usize) -> bool {
        self.entries.contains(&row)
    }

    pub fn get(&mut self, row: usize) -> Option<&CachedBlock> {
        self.entries.get(&row)
    }

    pub fn get_mut(&mut self, row: usize) -> Option<&mut CachedBlock> {
        self.entries.get_mut(&row)
    }

    /// Inserts a block, evicting least-recently-used entries past the byte
    /// budget. Returns evicted rows that still held unflushed writes.
    pub fn insert(&mut self, row: usize, data: Vec<u8>, dirty: bool) -> Vec<(usize, Vec<u8>)> {
        let size = data.len();
        if let Some(old) = self.entries.pop(&row) {
            self.current_bytes = self.current_bytes.saturating_sub(old.data.len());
        }

        let mut spilled = Vec::new();
        while !self.entries.is_empty() && self.current_bytes + size > self.capacity_bytes {
            if let Some((old_row, old)) = self.entries.pop_lru() {
                self.current_bytes = self.current_bytes.saturating_sub(old.data.len());
                if old.dirty {
                    spilled.push((old_row, old.data));
                }
            } else {
                break;
            }
        }

        self.current_bytes = self.current_bytes.saturating_add(size);
        self.entries.put(row, CachedBlock { data, dirty });
        spilled
    }

    /// Rows with unflushed writes, in ascending order.
    pub fn dirty_rows(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self
            .entries
            .iter()
            .filter(|(_, b)| b.dirty)
            .map(|(row, _)| *row)
            .collect();
        rows.sort_unstable();
        rows
    }

    pub fn mark_clean(&mut self, row: usize) {
        if let Some(block) = self.entries.get_mut(&row) {
            block.dirty = false;
        }
    }

    /// Number of rows from `[first, first + count)` currently cached.
    pub fn loaded_count(&self, first: usize, count: usize) -> usize {
        (first..first + count)
            .filter(|row| self.entries.contains(row))
            .count()
    }
}
