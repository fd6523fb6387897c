use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::common::{FrameId, OxbowError, PageId, Result, INVALID_PAGE_ID};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{Frame, LruReplacer};

/// State guarded by the pool's single coarse latch.
struct BufferPoolInner {
    /// Page table: maps resident page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Frames holding no resident page, in FIFO order
    free_list: VecDeque<FrameId>,
}

/// BufferPoolManager caches disk pages in a fixed set of frames and evicts
/// with an LRU policy once the free list runs dry.
///
/// Every public operation serializes behind one coarse latch; the replacer
/// carries its own internal mutex. Callers pair each `fetch_page`/`new_page`
/// with exactly one `unpin_page`, passing a dirty hint on release.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// The buffer pool frames
    frames: Vec<Arc<Frame>>,
    /// Page table and free list, behind the coarse latch
    latch: Mutex<BufferPoolInner>,
    /// LRU replacer for eviction decisions
    replacer: LruReplacer,
    /// Disk scheduler for page I/O
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size and disk manager.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(Frame::new(frame_id)));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            latch: Mutex::new(BufferPoolInner {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
            }),
            replacer: LruReplacer::new(pool_size),
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Fetches the page into the pool and pins it.
    ///
    /// On a page-table hit the resident frame is pinned and returned.
    /// Otherwise a frame is taken from the free list or evicted from the
    /// replacer (writing a dirty victim back first) and the page is read
    /// from disk. Fails with `PoolExhausted` when every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Frame>> {
        if page_id == INVALID_PAGE_ID {
            return Err(OxbowError::InvalidPageId(page_id));
        }

        let mut inner = self.latch.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.index()];
            frame.pin();
            self.replacer.pin(frame_id);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &self.frames[frame_id.index()];

        {
            let mut data = frame.write_data();
            if let Err(e) = self.disk_scheduler.read_sync(page_id, &mut data[..]) {
                // Leave the pool consistent: the frame goes back to the
                // free list unpinned and no page-table entry is installed.
                drop(data);
                frame.reset();
                inner.free_list.push_back(frame_id);
                return Err(e);
            }
        }

        frame.set_page_id(page_id);
        frame.clear_dirty();
        frame.pin();
        inner.page_table.insert(page_id, frame_id);

        Ok(Arc::clone(frame))
    }

    /// Drops one pin on the page, recording the caller's dirty hint.
    ///
    /// Returns false if the page is not resident or not currently pinned.
    /// The dirty flag is OR-accumulated: once set it survives until the
    /// next writeback, regardless of later `is_dirty = false` hints.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = self.latch.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.index()];

        if frame.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            frame.mark_dirty();
        }

        if frame.unpin() == 0 {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// Allocates a fresh page on disk and pins a zeroed frame for it.
    /// Fails with `PoolExhausted` when every frame is pinned.
    pub fn new_page(&self) -> Result<Arc<Frame>> {
        let mut inner = self.latch.lock();

        if inner.free_list.is_empty() && self.replacer.size() == 0 {
            return Err(OxbowError::PoolExhausted);
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &self.frames[frame_id.index()];

        let page_id = match self.disk_scheduler.disk_manager().allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                inner.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        frame.reset();
        frame.set_page_id(page_id);
        frame.pin();
        inner.page_table.insert(page_id, frame_id);

        debug!(
            page_id = page_id.as_u32(),
            frame_id = frame_id.as_u32(),
            "created page"
        );
        Ok(Arc::clone(frame))
    }

    /// Deletes the page from the pool and deallocates it on disk.
    ///
    /// Deleting a page that is not resident succeeds vacuously. Returns
    /// false if the page is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.latch.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(true);
        };
        let frame = &self.frames[frame_id.index()];

        if frame.pin_count() != 0 {
            return Ok(false);
        }

        inner.page_table.remove(&page_id);
        self.replacer.pin(frame_id);
        frame.reset();
        inner.free_list.push_back(frame_id);
        self.disk_scheduler.disk_manager().deallocate_page(page_id)?;

        debug!(
            page_id = page_id.as_u32(),
            frame_id = frame_id.as_u32(),
            "deleted page"
        );
        Ok(true)
    }

    /// Writes the page back to disk unconditionally and clears its dirty
    /// flag. Returns false if the page is not resident. Pinning is not
    /// affected.
    ///
    /// Flushing copies the page bytes under the coarse latch, so callers
    /// must not hold a write latch on a pinned frame's data while another
    /// thread flushes.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let inner = self.latch.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(false);
        };

        self.flush_frame(page_id, frame_id)?;
        Ok(true)
    }

    /// Flushes every resident page.
    pub fn flush_all(&self) -> Result<()> {
        let inner = self.latch.lock();

        let entries: Vec<(PageId, FrameId)> =
            inner.page_table.iter().map(|(&p, &f)| (p, f)).collect();
        for (page_id, frame_id) in entries {
            self.flush_frame(page_id, frame_id)?;
        }
        Ok(())
    }

    /// Returns the pin count for a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.latch.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.frames[frame_id.index()].pin_count())
    }

    /// Returns the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of frames holding no page.
    pub fn free_frame_count(&self) -> usize {
        self.latch.lock().free_list.len()
    }

    /// Returns the number of evictable frames.
    pub fn replacer_size(&self) -> usize {
        self.replacer.size()
    }

    /// Returns the number of frames with at least one pin outstanding.
    pub fn pinned_frame_count(&self) -> usize {
        let _inner = self.latch.lock();
        self.frames.iter().filter(|f| f.pin_count() > 0).count()
    }

    /// Writes one resident frame back and clears its dirty flag.
    /// Caller holds the latch.
    fn flush_frame(&self, page_id: PageId, frame_id: FrameId) -> Result<()> {
        let frame = &self.frames[frame_id.index()];

        self.disk_scheduler.write_sync(page_id, &frame.read_data()[..])?;
        frame.clear_dirty();
        Ok(())
    }

    /// Picks a frame to (re)use: the free list head if any, otherwise an
    /// LRU victim. A dirty victim is written back BEFORE its page-table
    /// entry is dropped. Caller holds the latch.
    fn acquire_frame(&self, inner: &mut MutexGuard<'_, BufferPoolInner>) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.victim().ok_or(OxbowError::PoolExhausted)?;
        let frame = &self.frames[frame_id.index()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            trace!(
                page_id = old_page_id.as_u32(),
                frame_id = frame_id.as_u32(),
                "writing back dirty victim"
            );
            if let Err(e) = self
                .disk_scheduler
                .write_sync(old_page_id, &frame.read_data()[..])
            {
                // Put the victim back so the pool stays consistent.
                self.replacer.unpin(frame_id);
                return Err(e);
            }
        }

        inner.page_table.remove(&old_page_id);
        frame.reset();
        Ok(frame_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new(pool_size, dm);
        (bpm, temp_file)
    }

    #[test]
    fn test_buffer_pool_manager_new() {
        let (bpm, _temp) = create_bpm(10);
        assert_eq!(bpm.pool_size(), 10);
        assert_eq!(bpm.free_frame_count(), 10);
        assert_eq!(bpm.replacer_size(), 0);
    }

    #[test]
    fn test_new_page_is_pinned_and_zeroed() {
        let (bpm, _temp) = create_bpm(10);

        let frame = bpm.new_page().unwrap();
        let page_id = frame.page_id();

        assert_eq!(page_id, PageId::new(1)); // page 0 is the header page
        assert_eq!(bpm.pin_count(page_id), Some(1));
        assert_eq!(bpm.free_frame_count(), 9);
        assert!(frame.read_data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unpin_moves_frame_into_replacer() {
        let (bpm, _temp) = create_bpm(10);

        let frame = bpm.new_page().unwrap();
        let page_id = frame.page_id();

        assert_eq!(bpm.replacer_size(), 0);
        assert!(bpm.unpin_page(page_id, false));
        assert_eq!(bpm.pin_count(page_id), Some(0));
        assert_eq!(bpm.replacer_size(), 1);
    }

    #[test]
    fn test_unpin_of_unpinned_page_fails() {
        let (bpm, _temp) = create_bpm(10);

        let frame = bpm.new_page().unwrap();
        let page_id = frame.page_id();

        assert!(bpm.unpin_page(page_id, false));
        assert!(!bpm.unpin_page(page_id, false));
        assert_eq!(bpm.replacer_size(), 1);

        // Unpinning a page that was never fetched also fails.
        assert!(!bpm.unpin_page(PageId::new(999), false));
    }

    #[test]
    fn test_fetch_page_hit_repins() {
        let (bpm, _temp) = create_bpm(10);

        let frame = bpm.new_page().unwrap();
        let page_id = frame.page_id();
        bpm.unpin_page(page_id, false);
        assert_eq!(bpm.replacer_size(), 1);

        let again = bpm.fetch_page(page_id).unwrap();
        assert_eq!(again.page_id(), page_id);
        assert_eq!(bpm.pin_count(page_id), Some(1));
        assert_eq!(bpm.replacer_size(), 0);

        bpm.unpin_page(page_id, false);
    }

    #[test]
    fn test_pool_exhaustion_and_recovery() {
        let (bpm, _temp) = create_bpm(3);

        let frames: Vec<_> = (0..3).map(|_| bpm.new_page().unwrap()).collect();
        assert!(matches!(bpm.new_page(), Err(OxbowError::PoolExhausted)));
        assert!(matches!(
            bpm.fetch_page(PageId::new(99)),
            Err(OxbowError::PoolExhausted)
        ));

        bpm.unpin_page(frames[1].page_id(), false);
        let frame = bpm.new_page().unwrap();
        assert_eq!(bpm.pin_count(frame.page_id()), Some(1));
    }

    #[test]
    fn test_dirty_writeback_on_eviction() {
        let (bpm, _temp) = create_bpm(1);

        let frame = bpm.new_page().unwrap();
        let p0 = frame.page_id();
        frame.write_data()[0] = 42;
        bpm.unpin_page(p0, true);

        let writes_before = bpm.disk_scheduler.disk_manager().num_writes();
        let frame = bpm.new_page().unwrap();
        let p1 = frame.page_id();
        assert_ne!(p0, p1);
        // The dirty victim hit the disk before p1 took its frame.
        assert_eq!(
            bpm.disk_scheduler.disk_manager().num_writes(),
            writes_before + 1
        );
        bpm.unpin_page(p1, false);

        let frame = bpm.fetch_page(p0).unwrap();
        assert_eq!(frame.read_data()[0], 42);
        bpm.unpin_page(p0, false);
    }

    #[test]
    fn test_dirty_flag_survives_clean_unpin() {
        let (bpm, _temp) = create_bpm(2);

        let frame = bpm.new_page().unwrap();
        let page_id = frame.page_id();
        frame.write_data()[7] = 7;

        // Pin twice, unpin dirty then clean: dirtiness must stick.
        bpm.fetch_page(page_id).unwrap();
        assert!(bpm.unpin_page(page_id, true));
        assert!(bpm.unpin_page(page_id, false));
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_delete_page() {
        let (bpm, _temp) = create_bpm(10);

        let frame = bpm.new_page().unwrap();
        let page_id = frame.page_id();

        // Cannot delete while pinned.
        assert!(!bpm.delete_page(page_id).unwrap());

        bpm.unpin_page(page_id, false);
        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.pin_count(page_id), None);
        assert_eq!(bpm.free_frame_count(), 10);
        assert_eq!(bpm.replacer_size(), 0);

        // Deleting an absent page succeeds vacuously.
        assert!(bpm.delete_page(page_id).unwrap());
    }

    #[test]
    fn test_flush_page_clears_dirty() {
        let (bpm, temp) = create_bpm(10);

        let frame = bpm.new_page().unwrap();
        let page_id = frame.page_id();
        frame.write_data()[0] = 9;
        bpm.unpin_page(page_id, true);

        assert!(bpm.flush_page(page_id).unwrap());
        assert!(!frame.is_dirty());
        assert!(!bpm.flush_page(PageId::new(404)).unwrap());

        // The bytes are durable: reopen and read.
        drop(bpm);
        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let bpm2 = BufferPoolManager::new(10, dm);
        let frame = bpm2.fetch_page(page_id).unwrap();
        assert_eq!(frame.read_data()[0], 9);
        bpm2.unpin_page(page_id, false);
    }

    #[test]
    fn test_frame_accounting_invariant() {
        let (bpm, _temp) = create_bpm(5);

        let check = |bpm: &BufferPoolManager| {
            assert_eq!(
                bpm.free_frame_count() + bpm.replacer_size() + bpm.pinned_frame_count(),
                bpm.pool_size()
            );
        };

        check(&bpm);
        let pages: Vec<_> = (0..5).map(|_| bpm.new_page().unwrap().page_id()).collect();
        check(&bpm);

        for &p in &pages[..3] {
            bpm.unpin_page(p, false);
            check(&bpm);
        }

        bpm.fetch_page(pages[0]).unwrap();
        check(&bpm);
        bpm.delete_page(pages[1]).unwrap();
        check(&bpm);
        bpm.new_page().unwrap();
        check(&bpm);
    }
}
