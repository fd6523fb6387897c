use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::common::{OxbowError, PageId, Result, PAGE_SIZE};

use super::DiskManager;

/// A disk I/O request handed to the worker thread.
///
/// The buffer pointer must stay valid until the completion channel fires;
/// the synchronous wrappers below guarantee this by blocking the caller.
enum DiskRequest {
    Read {
        page_id: PageId,
        buf: *mut u8,
        done: mpsc::Sender<Result<()>>,
    },
    Write {
        page_id: PageId,
        buf: *const u8,
        done: mpsc::Sender<Result<()>>,
    },
}

// Safety: the pointers are only dereferenced by the worker thread while the
// issuing thread blocks on the completion channel.
unsafe impl Send for DiskRequest {}

/// DiskScheduler funnels page I/O through a single background worker thread.
/// The buffer pool issues synchronous requests and blocks until completion.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_tx: Sender<DiskRequest>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a scheduler over the given disk manager and spawns its worker.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (tx, rx) = bounded::<DiskRequest>(128);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm = Arc::clone(&disk_manager);
        let stop = Arc::clone(&shutdown);
        let worker = thread::spawn(move || Self::run_worker(dm, rx, stop));

        Self {
            disk_manager,
            request_tx: tx,
            shutdown,
            worker: Some(worker),
        }
    }

    /// Reads a page and blocks until the worker has filled `data`.
    pub fn read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (done, wait) = mpsc::channel();
        self.submit(DiskRequest::Read {
            page_id,
            buf: data.as_mut_ptr(),
            done,
        })?;
        Self::await_completion(wait)
    }

    /// Writes a page and blocks until the worker has persisted `data`.
    pub fn write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (done, wait) = mpsc::channel();
        self.submit(DiskRequest::Write {
            page_id,
            buf: data.as_ptr(),
            done,
        })?;
        Self::await_completion(wait)
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    fn submit(&self, request: DiskRequest) -> Result<()> {
        self.request_tx
            .send(request)
            .map_err(|e| OxbowError::Scheduler(format!("failed to queue request: {}", e)))
    }

    fn await_completion(wait: mpsc::Receiver<Result<()>>) -> Result<()> {
        wait.recv()
            .map_err(|e| OxbowError::Scheduler(format!("worker dropped request: {}", e)))?
    }

    fn run_worker(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                // Drain what is already queued before exiting.
                while let Ok(request) = receiver.try_recv() {
                    Self::process(&disk_manager, request);
                }
                break;
            }

            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(request) => Self::process(&disk_manager, request),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process(disk_manager: &DiskManager, request: DiskRequest) {
        match request {
            DiskRequest::Read { page_id, buf, done } => {
                // Safety: the issuing thread keeps the buffer alive while it
                // blocks on `done`.
                let data = unsafe { std::slice::from_raw_parts_mut(buf, PAGE_SIZE) };
                let _ = done.send(disk_manager.read_page(page_id, data));
            }
            DiskRequest::Write { page_id, buf, done } => {
                let data = unsafe { std::slice::from_raw_parts(buf, PAGE_SIZE) };
                let _ = done.send(disk_manager.write_page(page_id, data));
            }
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_disk_scheduler_read_write() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let page_id = scheduler.disk_manager().allocate_page().unwrap();

        let mut write_data = [0u8; PAGE_SIZE];
        write_data[0] = 42;
        write_data[100] = 255;
        scheduler.write_sync(page_id, &write_data).unwrap();

        let mut read_data = [0u8; PAGE_SIZE];
        scheduler.read_sync(page_id, &mut read_data).unwrap();

        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
    }

    #[test]
    fn test_disk_scheduler_many_requests() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let pages: Vec<_> = (0..8)
            .map(|_| scheduler.disk_manager().allocate_page().unwrap())
            .collect();

        for (i, &page_id) in pages.iter().enumerate() {
            let data = [i as u8 + 1; PAGE_SIZE];
            scheduler.write_sync(page_id, &data).unwrap();
        }

        for (i, &page_id) in pages.iter().enumerate() {
            let mut data = [0u8; PAGE_SIZE];
            scheduler.read_sync(page_id, &mut data).unwrap();
            assert_eq!(data[0], i as u8 + 1);
        }
    }
}
