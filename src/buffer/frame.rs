use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// One slot of the buffer pool.
///
/// All metadata transitions happen while the pool holds its latch, so
/// the fields are plain atomics rather than locked state. The byte
/// buffer sits behind its own read-write latch, letting callers work on
/// page contents after the pool call that pinned the frame has returned.
///
/// Two rules hold for every frame: it is never evicted while its pin
/// count is nonzero, and once marked dirty it stays dirty until the pool
/// has written the bytes back.
pub struct Frame {
    /// Position of this frame in the pool's frame array
    slot: FrameId,
    /// Resident page number, INVALID_PAGE_ID while the frame is free
    page_id: AtomicU32,
    /// Outstanding acquisitions; eviction requires zero
    pin_count: AtomicU32,
    /// Bytes diverge from the on-disk copy
    dirty: AtomicBool,
    /// The page bytes
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl Frame {
    pub fn new(slot: FrameId) -> Self {
        Self {
            slot,
            page_id: AtomicU32::new(INVALID_PAGE_ID.0),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.slot
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    pub(crate) fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.0, Ordering::Release);
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Registers one more acquisition of this frame.
    pub(crate) fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Releases one acquisition and returns the count that remains.
    /// Unpinning a frame nobody holds is a bookkeeping bug, so it
    /// terminates.
    pub(crate) fn unpin(&self) -> u32 {
        let previous = self
            .pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .unwrap_or_else(|_| panic!("unpin of unpinned frame {}", self.slot));
        previous - 1
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Records that the bytes no longer match disk. There is no inverse
    /// for callers: dirtiness accumulates across releases and only a
    /// writeback clears it.
    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Called by the pool once the bytes have reached disk.
    pub(crate) fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Shared access to the page bytes.
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Exclusive access to the page bytes. Callers mutating through this
    /// guard report it with the dirty hint when they unpin.
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Returns the frame to its free state: no page, no pins, clean,
    /// zeroed bytes.
    pub(crate) fn reset(&self) {
        self.page_id.store(INVALID_PAGE_ID.0, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_frame_is_free() {
        let frame = Frame::new(FrameId::new(3));

        assert_eq!(frame.frame_id(), FrameId::new(3));
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert!(frame.read_data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pin_count_tracks_acquisitions() {
        let frame = Frame::new(FrameId::new(0));

        frame.pin();
        frame.pin();
        frame.pin();
        assert_eq!(frame.pin_count(), 3);

        assert_eq!(frame.unpin(), 2);
        assert_eq!(frame.unpin(), 1);
        assert_eq!(frame.unpin(), 0);
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    #[should_panic(expected = "unpin of unpinned frame")]
    fn test_unpin_underflow_terminates() {
        let frame = Frame::new(FrameId::new(5));
        frame.unpin();
    }

    #[test]
    fn test_dirtiness_accumulates_until_writeback() {
        let frame = Frame::new(FrameId::new(0));

        frame.mark_dirty();
        frame.mark_dirty();
        assert!(frame.is_dirty());

        frame.clear_dirty();
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_data_guards_share_one_buffer() {
        let frame = Frame::new(FrameId::new(0));

        frame.write_data()[17] = 0xAB;
        frame.write_data()[PAGE_SIZE - 1] = 0xCD;

        let data = frame.read_data();
        assert_eq!(data[17], 0xAB);
        assert_eq!(data[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn test_reset_clears_everything() {
        let frame = Frame::new(FrameId::new(1));

        frame.set_page_id(PageId::new(9));
        frame.pin();
        frame.mark_dirty();
        frame.write_data()[17] = 0xAB;

        frame.reset();

        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert_eq!(frame.read_data()[17], 0);
    }
}
