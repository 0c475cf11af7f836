use crate::*;
use rustc_hash::FxHashMap;

/// Frame replacement policy, fixed at pool construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReplacementPolicy {
    Lru,
    Fifo,
    Clock,
}

/// A buffer pool slot holding one page.
struct Frame {
    page_id: PageId,
    data: Vec<u8>,
    dirty: bool,
    pin_count: u32,
    /// Tick at which the page was loaded (FIFO victim order).
    loaded: u64,
    /// Tick of the most recent fetch (LRU victim order).
    last_used: u64,
    /// Reference bit for the CLOCK sweep.
    referenced: bool,
}

/// Access statistics, updated on every fetch.
#[derive(Clone, Copy, Debug, Default)]
pub struct BufferStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub dirty_count: u64,
}

/// Fixed-capacity page cache between the table layer and backing storage.
pub struct BufferPool {
    frames: Vec<Frame>,
    map: FxHashMap<PageId, usize>,
    free: Vec<usize>,
    capacity: usize,
    policy: ReplacementPolicy,
    tick: u64,
    hand: usize,
    stats: BufferStats,
}

impl BufferPool {
    pub fn new(capacity: usize, policy: ReplacementPolicy) -> Self {
        assert!(capacity > 0, "buffer pool needs at least one frame");
        Self {
            frames: Vec::with_capacity(capacity),
            capacity,
            map: FxHashMap::default(),
            free: Vec::new(),
            policy,
            tick: 0,
            hand: 0,
            stats: BufferStats::default(),
        }
    }

    pub fn policy(&self) -> ReplacementPolicy {
        self.policy
    }

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    /// Number of frames currently pinned. Zero at the end of every public
    /// engine call.
    pub fn pinned(&self) -> usize {
        self.frames.iter().filter(|f| f.pin_count > 0).count()
    }

    /// Fetch a page into the pool and pin it. Loads from storage on a miss,
    /// evicting a victim when the pool is full.
    pub fn fetch(&mut self, pid: PageId, stg: &mut dyn Storage) -> Result<usize> {
        self.tick += 1;
        if let Some(&fid) = self.map.get(&pid) {
            self.stats.hits += 1;
            let f = &mut self.frames[fid];
            f.pin_count += 1;
            f.last_used = self.tick;
            f.referenced = true;
            return Ok(fid);
        }
        self.stats.misses += 1;
        let fid = self.take_frame(stg)?;
        stg.read(pid * PAGE_SIZE as u64, &mut self.frames[fid].data)
            .map_err(StorageError::Io)?;
        let tick = self.tick;
        let f = &mut self.frames[fid];
        f.page_id = pid;
        f.dirty = false;
        f.pin_count = 1;
        f.loaded = tick;
        f.last_used = tick;
        f.referenced = true;
        self.map.insert(pid, fid);
        Ok(fid)
    }

    /// Release a pin, recording whether the caller modified the page.
    pub fn unpin(&mut self, fid: usize, dirty: bool) {
        let f = &mut self.frames[fid];
        debug_assert!(f.pin_count > 0, "unpin without pin");
        f.pin_count = f.pin_count.saturating_sub(1);
        if dirty && !f.dirty {
            f.dirty = true;
            self.stats.dirty_count += 1;
        }
    }

    pub fn data(&self, fid: usize) -> &[u8] {
        &self.frames[fid].data
    }

    pub fn data_mut(&mut self, fid: usize) -> &mut [u8] {
        &mut self.frames[fid].data
    }

    /// Write one page back to storage if it is dirty.
    pub fn flush(&mut self, pid: PageId, stg: &mut dyn Storage) -> Result<()> {
        if let Some(&fid) = self.map.get(&pid) {
            self.write_back(fid, stg)?;
        }
        Ok(())
    }

    /// Write every dirty frame back to storage.
    pub fn flush_all(&mut self, stg: &mut dyn Storage) -> Result<()> {
        for fid in 0..self.frames.len() {
            self.write_back(fid, stg)?;
        }
        stg.sync().map_err(StorageError::Io)?;
        Ok(())
    }

    /// True when no frame is dirty.
    pub fn clean(&self) -> bool {
        self.frames.iter().all(|f| !f.dirty)
    }

    /// Drop every resident page. Used after pages are freed wholesale.
    pub fn clear(&mut self) {
        debug_assert_eq!(self.pinned(), 0);
        self.map.clear();
        self.free = (0..self.frames.len()).collect();
        for f in &mut self.frames {
            f.dirty = false;
            f.page_id = NO_PAGE;
        }
    }

    fn write_back(&mut self, fid: usize, stg: &mut dyn Storage) -> Result<()> {
        let f = &mut self.frames[fid];
        if f.dirty {
            stg.write(f.page_id * PAGE_SIZE as u64, &f.data)
                .map_err(StorageError::Io)?;
            f.dirty = false;
            self.stats.dirty_count = self.stats.dirty_count.saturating_sub(1);
        }
        Ok(())
    }

    /// Obtain an empty frame, growing up to capacity, reusing a free slot,
    /// or evicting a victim.
    fn take_frame(&mut self, stg: &mut dyn Storage) -> Result<usize> {
        if let Some(fid) = self.free.pop() {
            return Ok(fid);
        }
        if self.frames.len() < self.capacity {
            self.frames.push(Frame {
                page_id: NO_PAGE,
                data: vec![0u8; PAGE_SIZE],
                dirty: false,
                pin_count: 0,
                loaded: 0,
                last_used: 0,
                referenced: false,
            });
            return Ok(self.frames.len() - 1);
        }
        let victim = self.pick_victim()?;
        log::debug!(
            "evicting page {} from frame {}",
            self.frames[victim].page_id,
            victim
        );
        self.write_back(victim, stg)?;
        self.map.remove(&self.frames[victim].page_id);
        self.stats.evictions += 1;
        Ok(victim)
    }

    /// Pick an unpinned victim frame according to the replacement policy.
    fn pick_victim(&mut self) -> Result<usize> {
        match self.policy {
            ReplacementPolicy::Lru => self.min_by(|f| f.last_used),
            ReplacementPolicy::Fifo => self.min_by(|f| f.loaded),
            ReplacementPolicy::Clock => self.clock_sweep(),
        }
    }

    fn min_by(&self, key: impl Fn(&Frame) -> u64) -> Result<usize> {
        self.frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.pin_count == 0)
            .min_by_key(|(_, f)| key(f))
            .map(|(i, _)| i)
            .ok_or_else(|| StorageError::NoFramesAvailable.into())
    }

    fn clock_sweep(&mut self) -> Result<usize> {
        let n = self.frames.len();
        // Two full sweeps suffice: the first clears reference bits, the
        // second must find a victim unless every frame is pinned.
        for _ in 0..2 * n {
            let fid = self.hand;
            self.hand = (self.hand + 1) % n;
            let f = &mut self.frames[fid];
            if f.pin_count > 0 {
                continue;
            }
            if f.referenced {
                f.referenced = false;
            } else {
                return Ok(fid);
            }
        }
        Err(StorageError::NoFramesAvailable.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_page(pool: &mut BufferPool, stg: &mut dyn Storage, pid: PageId, fill: u8) {
        let fid = pool.fetch(pid, stg).unwrap();
        page::init(pool.data_mut(fid), pid);
        pool.data_mut(fid)[PAGE_HDR] = fill;
        pool.unpin(fid, true);
    }

    #[test]
    fn hit_miss_accounting() {
        let mut stg = MemStorage::new();
        let mut pool = BufferPool::new(4, ReplacementPolicy::Lru);
        let fid = pool.fetch(0, &mut stg).unwrap();
        pool.unpin(fid, false);
        let fid = pool.fetch(0, &mut stg).unwrap();
        pool.unpin(fid, false);
        let s = pool.stats();
        assert_eq!((s.hits, s.misses), (1, 1));
    }

    #[test]
    fn lru_evicts_least_recently_fetched() {
        let mut stg = MemStorage::new();
        let mut pool = BufferPool::new(2, ReplacementPolicy::Lru);
        write_page(&mut pool, &mut stg, 0, 10);
        write_page(&mut pool, &mut stg, 1, 11);
        // Touch page 0 so page 1 is the LRU victim.
        let fid = pool.fetch(0, &mut stg).unwrap();
        pool.unpin(fid, false);
        write_page(&mut pool, &mut stg, 2, 12);
        assert_eq!(pool.stats().evictions, 1);
        // Page 1 was written back on eviction and reloads intact.
        let fid = pool.fetch(1, &mut stg).unwrap();
        assert_eq!(pool.data(fid)[PAGE_HDR], 11);
        pool.unpin(fid, false);
    }

    #[test]
    fn fifo_evicts_earliest_loaded() {
        let mut stg = MemStorage::new();
        let mut pool = BufferPool::new(2, ReplacementPolicy::Fifo);
        write_page(&mut pool, &mut stg, 0, 10);
        write_page(&mut pool, &mut stg, 1, 11);
        // Touching page 0 must not save it under FIFO.
        let fid = pool.fetch(0, &mut stg).unwrap();
        pool.unpin(fid, false);
        write_page(&mut pool, &mut stg, 2, 12);
        assert!(!pool.map.contains_key(&0));
        assert!(pool.map.contains_key(&1));
    }

    #[test]
    fn clock_skips_referenced_then_evicts() {
        let mut stg = MemStorage::new();
        let mut pool = BufferPool::new(2, ReplacementPolicy::Clock);
        write_page(&mut pool, &mut stg, 0, 10);
        write_page(&mut pool, &mut stg, 1, 11);
        write_page(&mut pool, &mut stg, 2, 12);
        assert_eq!(pool.stats().evictions, 1);
    }

    #[test]
    fn pinned_frames_never_evicted() {
        let mut stg = MemStorage::new();
        let mut pool = BufferPool::new(2, ReplacementPolicy::Lru);
        let a = pool.fetch(0, &mut stg).unwrap();
        let b = pool.fetch(1, &mut stg).unwrap();
        assert!(matches!(
            pool.fetch(2, &mut stg),
            Err(Error::Storage(StorageError::NoFramesAvailable))
        ));
        pool.unpin(a, false);
        assert!(pool.fetch(2, &mut stg).is_ok());
        pool.unpin(b, false);
        let fid = pool.map[&2];
        pool.unpin(fid, false);
        assert_eq!(pool.pinned(), 0);
    }

    #[test]
    fn flush_all_leaves_no_dirty_frames() {
        let mut stg = MemStorage::new();
        let mut pool = BufferPool::new(4, ReplacementPolicy::Clock);
        for pid in 0..4 {
            write_page(&mut pool, &mut stg, pid, pid as u8 + 1);
        }
        assert!(!pool.clean());
        pool.flush_all(&mut stg).unwrap();
        assert!(pool.clean());
        assert_eq!(pool.stats().dirty_count, 0);
        // On-disk bytes match the last write through the frames.
        for pid in 0u64..4 {
            let mut buf = vec![0u8; PAGE_SIZE];
            stg.read(pid * PAGE_SIZE as u64, &mut buf).unwrap();
            assert_eq!(buf[PAGE_HDR], pid as u8 + 1);
        }
    }
}
